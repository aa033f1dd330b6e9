use crate::accumulator::{extract_challenges, Anchors, ChunkReader, ChunkWriter, Prelude, Section};
use crate::codec::FileKind;
use crate::errors::{CeremonyError, Result};
use crate::parameters::{CeremonyParams, Segment};
use crate::utils::ro;
use ark_ec::AffineRepr;
use libs::group_structures::{same_ratio, CeremonyCurve};
use libs::iotools::{AtomicOutput, Hash};
use libs::vector_operations::power_pairs;
use std::path::Path;
use tracing::{debug, info, info_span};

const ALL_PHASE1_KINDS: [FileKind; 3] = [FileKind::Challenge, FileKind::Response, FileKind::Combined];

/// Outcome of a successful per-chunk verification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifiedChunk {
    pub segment: Segment,
    pub challenge_hash: Hash,
    pub response_hash: Hash,
}

/// Checks `response` against `challenge`: header agreement, both content
/// hashes, the challenge hash reference, every proof of knowledge, the anchor
/// transitions and the power ratios inside the response.
pub fn verify<E: CeremonyCurve>(params: &CeremonyParams, challenge: &Path, response: &Path) -> Result<VerifiedChunk> {
    let (verified, _) = verify_chunk::<E>(params, challenge, response, None)?;
    Ok(verified)
}

/// [`verify`], then writes the next challenge for the same chunk, linked to
/// the response hash. Nothing is written if any check fails.
pub fn verify_and_transform_pok_and_correctness<E: CeremonyCurve>(
    params: &CeremonyParams,
    challenge: &Path,
    response: &Path,
    new_challenge: &Path,
) -> Result<VerifiedChunk> {
    let (verified, out) = verify_chunk::<E>(params, challenge, response, Some(new_challenge))?;
    if let Some(out) = out {
        out.commit()?;
        info!(path = %new_challenge.display(), "wrote next challenge");
    }
    Ok(verified)
}

/// Per-chunk verification plus whole-transcript ratio verification of the
/// response. The response must cover the whole accumulator.
pub fn verify_and_transform_full<E: CeremonyCurve>(
    params: &CeremonyParams,
    challenge: &Path,
    response: &Path,
    new_challenge: Option<&Path>,
) -> Result<VerifiedChunk> {
    let (verified, out) = verify_chunk::<E>(params, challenge, response, new_challenge)?;
    if !verified.segment.is_full(params) {
        return Err(CeremonyError::mismatch(
            "segment",
            format!("0..{}", params.powers_length()),
            format!("{}..{}", verified.segment.start, verified.segment.end),
        ));
    }
    verify_ratios::<E>(params, response)?;
    if let (Some(out), Some(path)) = (out, new_challenge) {
        out.commit()?;
        info!(path = %path.display(), "wrote next challenge");
    }
    Ok(verified)
}

/// Ratio-only check of a file spanning the whole accumulator: the powers
/// start at the generators, every vector is a geometric sequence in the
/// anchored tau, and the anchors agree across groups. No proofs of knowledge
/// are involved. Returns the file's content hash.
pub fn verify_ratios<E: CeremonyCurve>(params: &CeremonyParams, path: &Path) -> Result<Hash> {
    let mut reader = ChunkReader::<E>::open(path, params, &ALL_PHASE1_KINDS)?;
    let segment = reader.segment();
    if !segment.is_full(params) {
        return Err(CeremonyError::mismatch(
            "segment",
            format!("0..{}", params.powers_length()),
            format!("{}..{}", segment.start, segment.end),
        ));
    }
    let _span = info_span!("verify_ratios", path = %path.display()).entered();
    let anchors = *reader.anchors();
    check_anchor_consistency(&anchors, 0)?;
    check_elements::<E>(&mut reader, &anchors, None)?;
    info!("transcript ratios verified");
    Ok(reader.hash())
}

/// [`verify_ratios`], then optionally extracts the challenge for `segment`
/// from the verified file.
pub fn verify_and_transform_ratios<E: CeremonyCurve>(
    params: &CeremonyParams,
    path: &Path,
    next: Option<(&Path, Segment)>,
) -> Result<Hash> {
    let hash = verify_ratios::<E>(params, path)?;
    if let Some((out, segment)) = next {
        extract_challenges::<E>(params, path, &[(segment, out.to_path_buf())])?;
    }
    Ok(hash)
}

fn verify_chunk<E: CeremonyCurve>(
    params: &CeremonyParams,
    challenge: &Path,
    response: &Path,
    new_challenge: Option<&Path>,
) -> Result<(VerifiedChunk, Option<AtomicOutput>)> {
    let before = ChunkReader::<E>::open(challenge, params, &[FileKind::Challenge, FileKind::Combined])?;
    let mut after = ChunkReader::<E>::open(response, params, &[FileKind::Response])?;
    let segment = after.segment();
    let chunk = segment.first_chunk;
    let _span = info_span!("verify", chunk, chunks = segment.chunk_count).entered();

    if before.segment() != segment {
        return Err(CeremonyError::mismatch(
            "chunk index",
            format!("{}+{}", before.segment().first_chunk, before.segment().chunk_count),
            format!("{}+{}", chunk, segment.chunk_count),
        ));
    }

    let v = before.hash();
    let public_key = match after.prelude() {
        Prelude::Response { challenge_hash, public_key } => {
            if *challenge_hash != v {
                return Err(CeremonyError::hash_mismatch("challenge hash reference", chunk, &v, challenge_hash));
            }
            *public_key
        }
        _ => return Err(CeremonyError::FormatError("response without a public key".to_string())),
    };

    for (name, proof) in public_key.proofs() {
        if proof.commitment.is_zero() {
            return Err(CeremonyError::DegenerateContribution(format!("{} commitment is the identity", name)));
        }
        if !proof.verify(&v) {
            return Err(CeremonyError::ProofOfKnowledgeInvalid { key: name, chunk_index: chunk });
        }
    }
    debug!("proofs of knowledge verified");

    let prev = *before.anchors();
    let next = *after.anchors();
    next.check_non_identity()?;
    let g1 = E::g1_generator();
    let r_tau = ro::<E>(&public_key.tau.commitment, &v);
    let r_alpha = ro::<E>(&public_key.alpha.commitment, &v);
    let r_beta = ro::<E>(&public_key.beta.commitment, &v);
    let transitions = [
        ("tau g1 anchor", same_ratio::<E>(prev.tau_g1, next.tau_g1, r_tau, public_key.tau.pok)),
        ("tau g2 anchor", same_ratio::<E>(g1, public_key.tau.commitment, prev.tau_g2, next.tau_g2)),
        ("alpha g1 anchor", same_ratio::<E>(prev.alpha_g1, next.alpha_g1, r_alpha, public_key.alpha.pok)),
        ("beta g1 anchor", same_ratio::<E>(prev.beta_g1, next.beta_g1, r_beta, public_key.beta.pok)),
        ("beta g2 anchor", same_ratio::<E>(g1, public_key.beta.commitment, prev.beta_g2, next.beta_g2)),
    ];
    if let Some((check, _)) = transitions.iter().find(|(_, ok)| !ok) {
        return Err(CeremonyError::ratio(chunk, *check));
    }
    check_anchor_consistency(&next, chunk)?;

    let mut out = match new_challenge {
        Some(path) => {
            let prelude = Prelude::Challenge { link: after.hash() };
            Some(ChunkWriter::create(AtomicOutput::create(path)?, params, segment, &prelude, &next)?)
        }
        None => None,
    };
    check_elements::<E>(&mut after, &next, out.as_mut())?;
    let out = match out {
        Some(w) => Some(w.finish()?.0),
        None => None,
    };
    info!("chunk verified");
    Ok((VerifiedChunk { segment, challenge_hash: v, response_hash: after.hash() }, out))
}

fn check_anchor_consistency<E: CeremonyCurve>(anchors: &Anchors<E>, chunk: usize) -> Result<()> {
    let (g1, g2) = (E::g1_generator(), E::g2_generator());
    if !same_ratio::<E>(g1, anchors.tau_g1, g2, anchors.tau_g2) {
        return Err(CeremonyError::ratio(chunk, "tau anchors disagree between G1 and G2"));
    }
    if !same_ratio::<E>(g1, anchors.beta_g1, g2, anchors.beta_g2) {
        return Err(CeremonyError::ratio(chunk, "beta anchors disagree between G1 and G2"));
    }
    Ok(())
}

/// Streams every section of `reader`, checking element validity and power
/// ratios against `anchors`, and copies the elements to `out` when given.
fn check_elements<E: CeremonyCurve>(
    reader: &mut ChunkReader<E>,
    anchors: &Anchors<E>,
    mut out: Option<&mut ChunkWriter<E, AtomicOutput>>,
) -> Result<()> {
    let segment = reader.segment();
    let origin = segment.contains_origin();
    let (g1, g2) = (E::g1_generator(), E::g2_generator());
    let tau_g1 = anchors.tau_g1;
    let tau_g2 = anchors.tau_g2;

    let prefix = |first: E::G1Affine, second: Option<E::G1Affine>| -> Vec<E::G1Affine> {
        if origin {
            std::iter::once(first).chain(second).collect()
        } else {
            Vec::new()
        }
    };
    let g1_ratio = |a: E::G1Affine, b: E::G1Affine| same_ratio::<E>(a, b, g2, tau_g2);

    check_section::<E, E::G1Affine, _>(reader, Section::TauG1, &prefix(g1, Some(tau_g1)), g1_ratio, out.as_deref_mut())?;
    let g2_prefix = if origin { vec![g2, tau_g2] } else { Vec::new() };
    check_section::<E, E::G2Affine, _>(
        reader,
        Section::TauG2,
        &g2_prefix,
        |a, b| same_ratio::<E>(g1, tau_g1, a, b),
        out.as_deref_mut(),
    )?;
    check_section::<E, E::G1Affine, _>(reader, Section::AlphaG1, &prefix(anchors.alpha_g1, None), g1_ratio, out.as_deref_mut())?;
    check_section::<E, E::G1Affine, _>(reader, Section::BetaG1, &prefix(anchors.beta_g1, None), g1_ratio, out.as_deref_mut())?;
    Ok(())
}

/// One section: no identity elements, the leading elements equal `prefix`
/// (global exponents `0..prefix.len()`), and consecutive elements share one
/// ratio. The last element of a batch is carried into the next so that pairs
/// straddling a batch boundary are covered.
fn check_section<E, P, F>(
    reader: &mut ChunkReader<E>,
    section: Section,
    prefix: &[P],
    ratio_holds: F,
    mut out: Option<&mut ChunkWriter<E, AtomicOutput>>,
) -> Result<()>
where
    E: CeremonyCurve,
    P: AffineRepr,
    F: Fn(P, P) -> bool,
{
    let chunk = reader.segment().first_chunk;
    let mut rng = rand::thread_rng();
    let mut carry: Option<P> = None;
    let mut joined: Vec<P> = Vec::new();
    reader.for_each_batch(section, |start, batch: &[P]| {
        for (i, p) in batch.iter().enumerate() {
            let k = start + i;
            if p.is_zero() {
                return Err(CeremonyError::ratio(chunk, format!("{} element {} is the identity", section.name(), k)));
            }
            if let Some(expected) = prefix.get(k) {
                if p != expected {
                    return Err(CeremonyError::ratio(chunk, format!("{} element {} does not match its anchor", section.name(), k)));
                }
            }
        }
        joined.clear();
        joined.extend(carry);
        joined.extend_from_slice(batch);
        if let Some((a, b)) = power_pairs::<P::Group, _>(&joined, &mut rng) {
            if !ratio_holds(a, b) {
                return Err(CeremonyError::ratio(chunk, format!("{} powers near exponent {}", section.name(), start)));
            }
        }
        carry = batch.last().copied();
        if let Some(w) = out.as_deref_mut() {
            w.write_batch(section, batch)?;
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::{new_challenge, read_chunk, write_chunk};
    use crate::contribution::contribute_with_key;
    use crate::keypair::PrivateKey;
    use crate::parameters::ContributionMode;
    use ark_bls12_381::{Bls12_381, G1Affine};
    use libs::group_structures::CurveKind;
    use libs::iotools::blank_hash;

    fn full_params() -> CeremonyParams {
        CeremonyParams::new(CurveKind::Bls12_381, 3, 8, 3, ContributionMode::Full).unwrap()
    }

    #[test]
    fn test_honest_chunk_verifies_and_transforms() {
        let dir = tempfile::tempdir().unwrap();
        let params = CeremonyParams::new(CurveKind::Bls12_381, 3, 3, 2, ContributionMode::Chunked).unwrap();
        for chunk in 0..params.num_chunks() {
            let challenge = dir.path().join(format!("challenge_{}", chunk));
            let response = dir.path().join(format!("response_{}", chunk));
            let next = dir.path().join(format!("next_{}", chunk));
            new_challenge::<Bls12_381>(&params, params.chunk(chunk).unwrap(), &blank_hash(), &challenge).unwrap();
            let key = PrivateKey::<Bls12_381>::from_seed(b"honest").unwrap();
            let summary = contribute_with_key(&params, &challenge, &response, &key).unwrap();
            let verified = verify_and_transform_pok_and_correctness::<Bls12_381>(&params, &challenge, &response, &next).unwrap();
            assert_eq!(verified.response_hash, summary.response_hash);

            let (next_slice, prelude) = read_chunk::<Bls12_381>(&next, &params).unwrap();
            let (response_slice, _) = read_chunk::<Bls12_381>(&response, &params).unwrap();
            assert_eq!(prelude, Prelude::Challenge { link: summary.response_hash });
            assert_eq!(next_slice, response_slice);
        }
    }

    #[test]
    fn test_wrong_key_fails_pok() {
        let dir = tempfile::tempdir().unwrap();
        let params = full_params();
        let (c1, c2) = (dir.path().join("c1"), dir.path().join("c2"));
        new_challenge::<Bls12_381>(&params, params.full_segment(), &blank_hash(), &c1).unwrap();
        new_challenge::<Bls12_381>(&params, params.full_segment(), &[7u8; 64], &c2).unwrap();
        let response = dir.path().join("response");
        contribute_with_key(&params, &c2, &response, &PrivateKey::<Bls12_381>::from_seed(b"k").unwrap()).unwrap();
        assert!(matches!(
            verify::<Bls12_381>(&params, &c1, &response),
            Err(CeremonyError::HashMismatch { what: "challenge hash reference", .. })
        ));
        assert!(verify_and_transform_full::<Bls12_381>(&params, &c2, &response, None).is_ok());
    }

    #[test]
    fn test_tampered_element_fails_ratio() {
        let dir = tempfile::tempdir().unwrap();
        let params = full_params();
        let challenge = dir.path().join("challenge");
        let response = dir.path().join("response");
        new_challenge::<Bls12_381>(&params, params.full_segment(), &blank_hash(), &challenge).unwrap();
        contribute_with_key(&params, &challenge, &response, &PrivateKey::<Bls12_381>::from_seed(b"k").unwrap()).unwrap();
        verify_ratios::<Bls12_381>(&params, &response).unwrap();

        let (mut slice, prelude) = read_chunk::<Bls12_381>(&response, &params).unwrap();
        slice.alpha_g1[5] = G1Affine::generator();
        let forged = dir.path().join("forged");
        write_chunk(&slice, &prelude, &params, &forged).unwrap();
        assert!(matches!(verify_ratios::<Bls12_381>(&params, &forged), Err(CeremonyError::RatioCheckFailed { .. })));
        let next = dir.path().join("next");
        assert!(matches!(
            verify_and_transform_pok_and_correctness::<Bls12_381>(&params, &challenge, &forged, &next),
            Err(CeremonyError::RatioCheckFailed { .. })
        ));
        assert!(!next.exists(), "no challenge is emitted for a failed verification");
    }

    #[test]
    fn test_ratios_need_full_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let params = CeremonyParams::new(CurveKind::Bls12_381, 3, 4, 2, ContributionMode::Chunked).unwrap();
        let challenge = dir.path().join("challenge");
        new_challenge::<Bls12_381>(&params, params.chunk(1).unwrap(), &blank_hash(), &challenge).unwrap();
        assert!(matches!(
            verify_ratios::<Bls12_381>(&params, &challenge),
            Err(CeremonyError::ParameterMismatch { field: "segment", .. })
        ));
    }
}
