use super::chunk::{Phase2Prelude, StreamReader, StreamWriter};
use crate::codec::FileKind;
use crate::errors::{CeremonyError, Result};
use crate::parameters::CeremonyParams;
use crate::utils::ro;
use ark_ec::AffineRepr;
use libs::group_structures::{same_ratio, CeremonyCurve};
use libs::iotools::{AtomicOutput, Hash};
use libs::memory_pool::BatchBuffer;
use libs::vector_operations::merge_pairs;
use std::ops::Range;
use std::path::Path;
use tracing::{debug, info, info_span};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifiedStreamChunk {
    pub first_chunk: usize,
    pub chunk_count: usize,
    pub range: Range<usize>,
    pub challenge_hash: Hash,
    pub response_hash: Hash,
}

/// Checks a phase-2 response against its challenge: content hashes, the
/// challenge hash reference, the proof of knowledge of the delta key, the
/// delta transition and that every element was divided by that key.
pub fn verify<E: CeremonyCurve>(params: &CeremonyParams, challenge: &Path, response: &Path) -> Result<VerifiedStreamChunk> {
    verify_stream::<E>(params, challenge, response, None)
}

/// [`verify`], then writes the next challenge of the same chunks linked to
/// the response. Nothing is written if a check fails.
pub fn verify_and_transform<E: CeremonyCurve>(
    params: &CeremonyParams,
    challenge: &Path,
    response: &Path,
    new_challenge: &Path,
) -> Result<VerifiedStreamChunk> {
    let verified = verify_stream::<E>(params, challenge, response, Some(new_challenge))?;
    info!(path = %new_challenge.display(), "wrote next phase-2 challenge");
    Ok(verified)
}

fn verify_stream<E: CeremonyCurve>(
    params: &CeremonyParams,
    challenge: &Path,
    response: &Path,
    new_challenge: Option<&Path>,
) -> Result<VerifiedStreamChunk> {
    let mut before = StreamReader::<E>::open(challenge, params, &[FileKind::Phase2Challenge])?;
    let mut after = StreamReader::<E>::open(response, params, &[FileKind::Phase2Response])?;
    let (first_chunk, chunk_count) = (after.first_chunk(), after.chunk_count());
    let _span = info_span!("phase2_verify", chunk = first_chunk, chunks = chunk_count).entered();

    if (before.first_chunk(), before.chunk_count()) != (first_chunk, chunk_count) {
        return Err(CeremonyError::mismatch(
            "chunk index",
            format!("{}+{}", before.first_chunk(), before.chunk_count()),
            format!("{}+{}", first_chunk, chunk_count),
        ));
    }
    if before.layout() != after.layout() {
        let (b, a) = (before.layout(), after.layout());
        if b.query_hash != a.query_hash {
            return Err(CeremonyError::hash_mismatch("query hash", first_chunk, &b.query_hash, &a.query_hash));
        }
        return Err(CeremonyError::mismatch(
            "stream layout",
            format!("{}+{}", b.h_len, b.stream_len - b.h_len),
            format!("{}+{}", a.h_len, a.stream_len - a.h_len),
        ));
    }

    let v = before.hash();
    let proof = match after.prelude() {
        Phase2Prelude::Response { challenge_hash, proof } => {
            if *challenge_hash != v {
                return Err(CeremonyError::hash_mismatch("challenge hash reference", first_chunk, &v, challenge_hash));
            }
            *proof
        }
        Phase2Prelude::Challenge { .. } => return Err(CeremonyError::FormatError("response without a proof".to_string())),
    };
    if proof.commitment.is_zero() {
        return Err(CeremonyError::DegenerateContribution("delta commitment is the identity".to_string()));
    }
    if !proof.verify(&v) {
        return Err(CeremonyError::ProofOfKnowledgeInvalid { key: "delta", chunk_index: first_chunk });
    }
    debug!("proof of knowledge verified");

    let (prev, next) = (*before.delta(), *after.delta());
    let r_delta = ro::<E>(&proof.commitment, &v);
    if !same_ratio::<E>(prev.g1, next.g1, r_delta, proof.pok) {
        return Err(CeremonyError::ratio(first_chunk, "delta g1 transition"));
    }
    if !same_ratio::<E>(E::g1_generator(), proof.commitment, prev.g2, next.g2) {
        return Err(CeremonyError::ratio(first_chunk, "delta g2 transition"));
    }
    if !next.is_consistent() {
        return Err(CeremonyError::ratio(first_chunk, "delta disagrees between G1 and G2"));
    }

    let mut out = match new_challenge {
        Some(path) => {
            let prelude = Phase2Prelude::Challenge { link: after.hash() };
            Some(StreamWriter::create(AtomicOutput::create(path)?, params, after.layout(), (first_chunk, chunk_count), &prelude, &next)?)
        }
        None => None,
    };

    // e(after, delta' G2) = e(before, delta G2), one random combination per batch
    let mut rng = rand::thread_rng();
    let mut before_buf = BatchBuffer::new(params.batch_size);
    let mut after_buf = BatchBuffer::new(params.batch_size);
    loop {
        let b = before.next_batch(&mut before_buf)?;
        let a = after.next_batch(&mut after_buf)?;
        let ((start, b), (_, a)) = match (b, a) {
            (Some(b), Some(a)) => (b, a),
            (None, None) => break,
            _ => return Err(CeremonyError::FormatError("challenge and response streams differ in length".to_string())),
        };
        if let Some((x, y)) = merge_pairs::<E::G1, _>(a, b, &mut rng) {
            if !same_ratio::<E>(x, y, prev.g2, next.g2) {
                return Err(CeremonyError::ratio(first_chunk, format!("stream elements near position {}", start)));
            }
        }
        if let Some(w) = out.as_mut() {
            w.write_batch(a)?;
        }
    }
    if let Some(w) = out {
        let (sink, _) = w.finish()?;
        sink.commit()?;
    }
    info!("phase-2 chunk verified");
    Ok(VerifiedStreamChunk {
        first_chunk,
        chunk_count,
        range: after.range(),
        challenge_hash: v,
        response_hash: after.hash(),
    })
}
