use crate::accumulator::{ChunkReader, ChunkWriter, Prelude, Section};
use crate::codec::FileKind;
use crate::errors::{CeremonyError, Result};
use crate::keypair::{PrivateKey, PublicKey};
use crate::parameters::{CeremonyParams, ContributionMode, Segment};
use ark_ec::AffineRepr;
use libs::field_structures::powers_from;
use libs::group_structures::CeremonyCurve;
use libs::iotools::{AtomicOutput, Hash};
use libs::vector_operations::batch_mul;
use rand::Rng;
use std::io::Write;
use std::path::Path;
use std::time::Instant;
use tracing::{info, info_span};
use zeroize::Zeroize;

/// What a contributor publishes after a turn on one file.
#[derive(Clone, Debug)]
pub struct ContributionSummary<E: CeremonyCurve> {
    pub segment: Segment,
    pub challenge_hash: Hash,
    pub response_hash: Hash,
    pub public_key: PublicKey<E>,
    pub elapsed_seconds: f64,
}

/// Samples a fresh key from `rng` and applies it to `challenge`.
pub fn contribute<E: CeremonyCurve, R: Rng + ?Sized>(
    params: &CeremonyParams,
    challenge: &Path,
    response: &Path,
    rng: &mut R,
) -> Result<ContributionSummary<E>> {
    let key = PrivateKey::<E>::generate(rng)?;
    contribute_with_key(params, challenge, response, &key)
}

/// Key for one contributor's turn. Every chunk of a turn needs the same key,
/// so a seed is required once the accumulator spans several chunks;
/// otherwise the key is sampled from the operating system.
pub fn turn_key<E: CeremonyCurve>(params: &CeremonyParams, seed: Option<&[u8]>) -> Result<PrivateKey<E>> {
    match seed {
        Some(seed) => PrivateKey::from_seed(seed),
        None if params.mode == ContributionMode::Chunked && params.num_chunks() > 1 => Err(CeremonyError::mismatch(
            "seed",
            format!("a seed shared by all {} chunks", params.num_chunks()),
            "none",
        )),
        None => PrivateKey::generate(&mut rand::rngs::OsRng),
    }
}

/// Multiplies the element at exponent `k` by `tau^k` (and the alpha / beta
/// elements additionally by `alpha` / `beta`), writing a response bound to
/// the challenge hash. Accepts a chunk challenge or a combined transcript.
pub fn contribute_with_key<E: CeremonyCurve>(
    params: &CeremonyParams,
    challenge: &Path,
    response: &Path,
    key: &PrivateKey<E>,
) -> Result<ContributionSummary<E>> {
    let started = Instant::now();
    let mut reader = ChunkReader::<E>::open(challenge, params, &[FileKind::Challenge, FileKind::Combined])?;
    let segment = reader.segment();
    let _span = info_span!("contribute", chunk = segment.first_chunk, chunks = segment.chunk_count).entered();

    let challenge_hash = reader.hash();
    let public_key = key.public_key(&challenge_hash);
    let anchors = reader.anchors().transform(key)?;
    let prelude = Prelude::Response { challenge_hash, public_key };
    let mut writer = ChunkWriter::create(AtomicOutput::create(response)?, params, segment, &prelude, &anchors)?;

    transform_section::<E, E::G1Affine, _>(&mut reader, &mut writer, Section::TauG1, key.tau(), None)?;
    transform_section::<E, E::G2Affine, _>(&mut reader, &mut writer, Section::TauG2, key.tau(), None)?;
    transform_section::<E, E::G1Affine, _>(&mut reader, &mut writer, Section::AlphaG1, key.tau(), Some(key.alpha()))?;
    transform_section::<E, E::G1Affine, _>(&mut reader, &mut writer, Section::BetaG1, key.tau(), Some(key.beta()))?;

    let (out, response_hash) = writer.finish()?;
    out.commit()?;
    let elapsed_seconds = started.elapsed().as_secs_f64();
    info!(path = %response.display(), elapsed_seconds, "wrote response");
    Ok(ContributionSummary { segment, challenge_hash, response_hash, public_key, elapsed_seconds })
}

/// Streams one section through `base^k * factor` scaling. The scalar buffers
/// are wiped after every batch.
fn transform_section<E, P, W>(
    reader: &mut ChunkReader<E>,
    writer: &mut ChunkWriter<E, W>,
    section: Section,
    base: E::ScalarField,
    factor: Option<E::ScalarField>,
) -> Result<()>
where
    E: CeremonyCurve,
    P: AffineRepr<ScalarField = E::ScalarField>,
    W: Write,
{
    reader.for_each_batch(section, |start, batch: &[P]| {
        let mut scalars = powers_from(base, start as u64, batch.len());
        if let Some(f) = factor {
            scalars.iter_mut().for_each(|s| *s *= f);
        }
        let out = batch_mul::<P::Group>(batch, &scalars);
        scalars.zeroize();
        writer.write_batch(section, &out)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::{new_challenge, read_chunk};
    use ark_bls12_381::{Bls12_381, G1Affine, G2Affine};
    use ark_ec::CurveGroup;
    use ark_ff::Field;
    use libs::group_structures::CurveKind;
    use libs::iotools::blank_hash;

    #[test]
    fn test_contribution_raises_powers() {
        let dir = tempfile::tempdir().unwrap();
        let params = CeremonyParams::new(CurveKind::Bls12_381, 3, 3, 2, ContributionMode::Chunked).unwrap();
        let challenge = dir.path().join("challenge_1");
        let response = dir.path().join("response_1");
        new_challenge::<Bls12_381>(&params, params.chunk(1).unwrap(), &blank_hash(), &challenge).unwrap();
        let key = PrivateKey::<Bls12_381>::from_seed(b"contributor").unwrap();
        let summary = contribute_with_key(&params, &challenge, &response, &key).unwrap();
        assert_eq!(summary.segment.start, 3);

        let (slice, prelude) = read_chunk::<Bls12_381>(&response, &params).unwrap();
        match prelude {
            Prelude::Response { challenge_hash, public_key } => {
                assert_eq!(challenge_hash, summary.challenge_hash);
                assert_eq!(public_key, summary.public_key);
            }
            other => panic!("unexpected prelude {:?}", other),
        }
        for (i, k) in (3..6).enumerate() {
            let t = key.tau().pow([k as u64]);
            assert_eq!(slice.tau_g2[i], (G2Affine::generator() * t).into_affine());
            assert_eq!(slice.alpha_g1[i], (G1Affine::generator() * (t * key.alpha())).into_affine());
            assert_eq!(slice.beta_g1[i], (G1Affine::generator() * (t * key.beta())).into_affine());
        }
        assert_eq!(slice.tau_g1.len(), 3);
        assert_eq!(slice.anchors.tau_g1, (G1Affine::generator() * key.tau()).into_affine());
    }

    #[test]
    fn test_contribute_rejects_response_input() {
        let dir = tempfile::tempdir().unwrap();
        let params = CeremonyParams::new(CurveKind::Bls12_381, 2, 4, 2, ContributionMode::Full).unwrap();
        let challenge = dir.path().join("challenge");
        let response = dir.path().join("response");
        new_challenge::<Bls12_381>(&params, params.full_segment(), &blank_hash(), &challenge).unwrap();
        contribute::<Bls12_381, _>(&params, &challenge, &response, &mut ark_std::test_rng()).unwrap();
        let again = dir.path().join("again");
        assert!(matches!(
            contribute::<Bls12_381, _>(&params, &response, &again, &mut ark_std::test_rng()),
            Err(CeremonyError::FormatError(_))
        ));
        assert!(!again.exists(), "failed contributions leave no artifact");
    }

    #[test]
    fn test_turn_key_requires_seed_across_chunks() {
        let chunked = CeremonyParams::new(CurveKind::Bls12_381, 3, 3, 2, ContributionMode::Chunked).unwrap();
        assert!(matches!(
            turn_key::<Bls12_381>(&chunked, None),
            Err(CeremonyError::ParameterMismatch { field: "seed", .. })
        ));
        let seeded = turn_key::<Bls12_381>(&chunked, Some(b"s".as_slice())).unwrap();
        assert_eq!(seeded.tau(), PrivateKey::<Bls12_381>::from_seed(b"s").unwrap().tau());

        let full = CeremonyParams::new(CurveKind::Bls12_381, 3, 0, 2, ContributionMode::Full).unwrap();
        turn_key::<Bls12_381>(&full, None).unwrap();
        let one_chunk = CeremonyParams::new(CurveKind::Bls12_381, 3, 8, 2, ContributionMode::Chunked).unwrap();
        turn_key::<Bls12_381>(&one_chunk, None).unwrap();
    }
}
