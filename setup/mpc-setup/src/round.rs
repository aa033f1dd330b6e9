//! One round of a chunked ceremony: every chunk of the accumulator is handled
//! by the same contributor, chunks in parallel.
use crate::accumulator::{new_challenge, ChunkReader};
use crate::codec::FileKind;
use crate::contribution::{contribute_with_key, ContributionSummary};
use crate::errors::{CeremonyError, Result};
use crate::keypair::PrivateKey;
use crate::parameters::CeremonyParams;
use crate::transcript::TranscriptState;
use crate::verification::{verify_and_transform_pok_and_correctness, VerifiedChunk};
use libs::group_structures::CeremonyCurve;
use libs::iotools::blank_hash;
use rayon::prelude::*;
use rayon::ThreadPool;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

pub fn challenge_path(dir: &Path, chunk: usize) -> PathBuf {
    dir.join(format!("challenge_{:04}", chunk))
}

pub fn response_path(dir: &Path, chunk: usize) -> PathBuf {
    dir.join(format!("response_{:04}", chunk))
}

fn pool(threads: Option<usize>) -> Result<ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads.unwrap_or_else(num_cpus::get).max(1))
        .build()
        .map_err(|e| CeremonyError::IoError(io::Error::new(io::ErrorKind::Other, e.to_string())))
}

/// Writes the initial challenge of every chunk into `dir` and starts the
/// transcript.
pub fn new_round<E: CeremonyCurve>(params: &CeremonyParams, dir: &Path, threads: Option<usize>) -> Result<TranscriptState> {
    let link = blank_hash();
    let hashes = pool(threads)?.install(|| {
        (0..params.num_chunks())
            .into_par_iter()
            .map(|i| new_challenge::<E>(params, params.chunk(i)?, &link, &challenge_path(dir, i)))
            .collect::<Result<Vec<_>>>()
    })?;
    let mut state = TranscriptState::new(params);
    for (i, h) in hashes.iter().enumerate() {
        state.record_challenge(i, h)?;
    }
    info!(chunks = hashes.len(), dir = %dir.display(), "started ceremony");
    Ok(state)
}

/// Applies one seeded key to every challenge in `challenges`, writing the
/// responses into `responses`.
pub fn contribute_round<E: CeremonyCurve>(
    params: &CeremonyParams,
    challenges: &Path,
    responses: &Path,
    seed: &[u8],
    threads: Option<usize>,
) -> Result<Vec<ContributionSummary<E>>> {
    let key = PrivateKey::<E>::from_seed(seed)?;
    let summaries = pool(threads)?.install(|| {
        (0..params.num_chunks())
            .into_par_iter()
            .map(|i| contribute_with_key(params, &challenge_path(challenges, i), &response_path(responses, i), &key))
            .collect::<Result<Vec<_>>>()
    })?;
    info!(chunks = summaries.len(), "round contribution complete");
    Ok(summaries)
}

/// Verifies every response of a round against its challenge, writes the next
/// challenges into `next` and extends the transcript. All responses must
/// carry the same key, and the transcript only changes if every chunk
/// verified.
pub fn verify_round<E: CeremonyCurve>(
    params: &CeremonyParams,
    challenges: &Path,
    responses: &Path,
    next: &Path,
    state: &mut TranscriptState,
    threads: Option<usize>,
) -> Result<Vec<VerifiedChunk>> {
    state.check_params(params)?;
    let pool = pool(threads)?;
    let anchors = pool.install(|| {
        (0..params.num_chunks())
            .into_par_iter()
            .map(|i| Ok(*ChunkReader::<E>::open(&response_path(responses, i), params, &[FileKind::Response])?.anchors()))
            .collect::<Result<Vec<_>>>()
    })?;
    // One contributor, one key: every chunk must land on the same anchors.
    if let Some(i) = anchors.iter().position(|a| *a != anchors[0]) {
        return Err(CeremonyError::ratio(i, "anchors differ between chunks of the round"));
    }
    let verified = pool.install(|| {
        (0..params.num_chunks())
            .into_par_iter()
            .map(|i| {
                verify_and_transform_pok_and_correctness::<E>(
                    params,
                    &challenge_path(challenges, i),
                    &response_path(responses, i),
                    &challenge_path(next, i),
                )
            })
            .collect::<Result<Vec<_>>>()
    })?;
    let mut updated = state.clone();
    for v in &verified {
        let i = v.segment.first_chunk;
        updated.record_contribution(i, &v.challenge_hash, &v.response_hash)?;
        let next_hash = ChunkReader::<E>::open(&challenge_path(next, i), params, &[FileKind::Challenge])?.hash();
        updated.record_challenge(i, &next_hash)?;
    }
    *state = updated;
    info!(chunks = verified.len(), "round verified");
    Ok(verified)
}
