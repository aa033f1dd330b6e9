use crate::codec::FileHeader;
use crate::contribution::{contribute_with_key, ContributionSummary};
use crate::errors::{CeremonyError, Result};
use crate::keypair::PrivateKey;
use crate::parameters::CeremonyParams;
use crate::verification::verify_and_transform_full;
use blake2::{Blake2b512, Digest};
use libs::group_structures::CeremonyCurve;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::info;

pub const DEFAULT_ITERATIONS_EXP: u32 = 10;
pub const MAX_ITERATIONS_EXP: u32 = 40;

/// Public randomness from the beacon seed: Blake2b-512 of the seed, then
/// `2^iterations_exp` further rounds of Blake2b-512; the first 32 bytes.
pub fn beacon_randomness(seed: &[u8], iterations_exp: u32) -> Result<[u8; 32]> {
    if iterations_exp > MAX_ITERATIONS_EXP {
        return Err(CeremonyError::mismatch("beacon iterations exponent", format!("<= {}", MAX_ITERATIONS_EXP), iterations_exp));
    }
    let mut cur = Blake2b512::digest(seed);
    for _ in 0..(1u64 << iterations_exp) {
        cur = Blake2b512::digest(cur);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&cur[..32]);
    Ok(out)
}

pub fn beacon_rng(seed: &[u8], iterations_exp: u32) -> Result<ChaCha20Rng> {
    Ok(ChaCha20Rng::from_seed(beacon_randomness(seed, iterations_exp)?))
}

/// Applies the beacon contribution to a full transcript and re-verifies the
/// result end to end before it appears at `output`.
pub fn finalize_with_beacon<E: CeremonyCurve>(
    params: &CeremonyParams,
    transcript: &Path,
    output: &Path,
    seed: &[u8],
    iterations_exp: u32,
) -> Result<ContributionSummary<E>> {
    let header = FileHeader::read(&mut BufReader::new(File::open(transcript)?))?;
    let segment = header.check_phase1(params)?;
    if !segment.is_full(params) {
        return Err(CeremonyError::mismatch(
            "segment",
            format!("0..{}", params.powers_length()),
            format!("{}..{}", segment.start, segment.end),
        ));
    }
    let key = PrivateKey::<E>::generate(&mut beacon_rng(seed, iterations_exp)?)?;

    let dir = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let staging = tempfile::Builder::new().prefix(".beacon").tempfile_in(dir)?.into_temp_path();
    let summary = contribute_with_key(params, transcript, &staging, &key)?;
    verify_and_transform_full::<E>(params, transcript, &staging, None)?;
    staging.persist(output).map_err(|e| CeremonyError::IoError(e.error))?;
    info!(path = %output.display(), iterations_exp, "beacon contribution verified and written");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::new_challenge;
    use crate::parameters::ContributionMode;
    use ark_bls12_381::Bls12_381;
    use libs::group_structures::CurveKind;
    use libs::iotools::blank_hash;

    #[test]
    fn test_beacon_randomness() {
        assert_eq!(beacon_randomness(b"TEST", 3).unwrap(), beacon_randomness(b"TEST", 3).unwrap());
        assert_ne!(beacon_randomness(b"TEST", 3).unwrap(), beacon_randomness(b"TEST", 4).unwrap());
        assert_ne!(beacon_randomness(b"TEST", 3).unwrap(), beacon_randomness(b"TESU", 3).unwrap());
        assert!(matches!(
            beacon_randomness(b"TEST", MAX_ITERATIONS_EXP + 1),
            Err(CeremonyError::ParameterMismatch { field: "beacon iterations exponent", .. })
        ));
    }

    #[test]
    fn test_beacon_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let params = CeremonyParams::new(CurveKind::Bls12_381, 3, 8, 4, ContributionMode::Full).unwrap();
        let challenge = dir.path().join("challenge");
        new_challenge::<Bls12_381>(&params, params.full_segment(), &blank_hash(), &challenge).unwrap();

        let (a, b, c) = (dir.path().join("a"), dir.path().join("b"), dir.path().join("c"));
        finalize_with_beacon::<Bls12_381>(&params, &challenge, &a, b"TEST", 2).unwrap();
        finalize_with_beacon::<Bls12_381>(&params, &challenge, &b, b"TEST", 2).unwrap();
        finalize_with_beacon::<Bls12_381>(&params, &challenge, &c, b"OTHER", 2).unwrap();
        assert_eq!(std::fs::read(&a).unwrap(), std::fs::read(&b).unwrap());
        assert_ne!(std::fs::read(&a).unwrap(), std::fs::read(&c).unwrap());
        crate::verification::verify_ratios::<Bls12_381>(&params, &c).unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 4, "no staging files left behind");
    }

    #[test]
    fn test_beacon_needs_full_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let params = CeremonyParams::new(CurveKind::Bls12_381, 3, 4, 4, ContributionMode::Chunked).unwrap();
        let challenge = dir.path().join("challenge");
        new_challenge::<Bls12_381>(&params, params.chunk(0).unwrap(), &blank_hash(), &challenge).unwrap();
        let out = dir.path().join("beacon");
        assert!(matches!(
            finalize_with_beacon::<Bls12_381>(&params, &challenge, &out, b"TEST", 1),
            Err(CeremonyError::ParameterMismatch { field: "segment", .. })
        ));
        assert!(!out.exists());
    }
}
