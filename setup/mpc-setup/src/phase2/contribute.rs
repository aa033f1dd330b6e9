use super::chunk::{Phase2Prelude, StreamReader, StreamWriter};
use super::verify::verify;
use super::StreamLayout;
use crate::beacon::beacon_rng;
use crate::codec::FileKind;
use crate::errors::{CeremonyError, Result};
use crate::keypair::{DeltaKey, KeyProof};
use crate::parameters::CeremonyParams;
use ark_ec::AffineRepr;
use ark_ff::Field;
use libs::group_structures::CeremonyCurve;
use libs::iotools::{AtomicOutput, Hash};
use libs::memory_pool::BatchBuffer;
use libs::vector_operations::batch_scale;
use rand::Rng;
use std::path::Path;
use std::time::Instant;
use tracing::{info, info_span};
use zeroize::Zeroize;

#[derive(Clone, Debug)]
pub struct Phase2Summary<E: CeremonyCurve> {
    pub first_chunk: usize,
    pub chunk_count: usize,
    pub layout: StreamLayout,
    pub challenge_hash: Hash,
    pub response_hash: Hash,
    pub proof: KeyProof<E>,
    pub elapsed_seconds: f64,
}

pub fn contribute<E: CeremonyCurve, R: Rng + ?Sized>(
    params: &CeremonyParams,
    challenge: &Path,
    response: &Path,
    rng: &mut R,
) -> Result<Phase2Summary<E>> {
    let key = DeltaKey::<E>::generate(rng)?;
    contribute_with_key(params, challenge, response, &key)
}

/// Key for one contributor's turn on `challenge`. Streams that span several
/// chunks need the same key on each of them, so they require a seed.
pub fn turn_key<E: CeremonyCurve>(params: &CeremonyParams, challenge: &Path, seed: Option<&[u8]>) -> Result<DeltaKey<E>> {
    if let Some(seed) = seed {
        return DeltaKey::from_seed(seed);
    }
    let reader = StreamReader::<E>::open(challenge, params, &[FileKind::Phase2Challenge])?;
    let chunks = reader.layout().num_chunks(params);
    if chunks > 1 {
        return Err(CeremonyError::mismatch("seed", format!("a seed shared by all {} stream chunks", chunks), "none"));
    }
    DeltaKey::generate(&mut rand::rngs::OsRng)
}

/// Multiplies delta by the key and divides every stream element by it. All
/// chunks of one circuit must receive the same key, so multi-chunk turns use
/// a seeded key.
pub fn contribute_with_key<E: CeremonyCurve>(
    params: &CeremonyParams,
    challenge: &Path,
    response: &Path,
    key: &DeltaKey<E>,
) -> Result<Phase2Summary<E>> {
    let started = Instant::now();
    let mut reader = StreamReader::<E>::open(challenge, params, &[FileKind::Phase2Challenge])?;
    let (first_chunk, chunk_count) = (reader.first_chunk(), reader.chunk_count());
    let _span = info_span!("phase2_contribute", chunk = first_chunk, chunks = chunk_count).entered();

    let challenge_hash = reader.hash();
    let layout = *reader.layout();
    let proof = key.proof(&challenge_hash);
    let delta = reader.delta().scale(key.delta());
    if delta.g1.is_zero() || delta.g2.is_zero() {
        return Err(CeremonyError::DegenerateContribution("delta is the identity".to_string()));
    }
    let mut inverse = key
        .delta()
        .inverse()
        .ok_or_else(|| CeremonyError::DegenerateContribution("delta key has no inverse".to_string()))?;

    let prelude = Phase2Prelude::Response { challenge_hash, proof };
    let mut writer = StreamWriter::create(AtomicOutput::create(response)?, params, &layout, (first_chunk, chunk_count), &prelude, &delta)?;
    let mut buf = BatchBuffer::new(params.batch_size);
    while let Some((_, batch)) = reader.next_batch(&mut buf)? {
        writer.write_batch(&batch_scale::<E::G1>(batch, inverse))?;
    }
    inverse.zeroize();
    let (out, response_hash) = writer.finish()?;
    out.commit()?;

    let elapsed_seconds = started.elapsed().as_secs_f64();
    info!(path = %response.display(), elapsed_seconds, "wrote phase-2 response");
    Ok(Phase2Summary { first_chunk, chunk_count, layout, challenge_hash, response_hash, proof, elapsed_seconds })
}

/// Beacon contribution to one phase-2 chunk. The key derives from the beacon
/// seed only, so every chunk receives the same one; the response is verified
/// before it appears at `response`.
pub fn finalize_with_beacon<E: CeremonyCurve>(
    params: &CeremonyParams,
    challenge: &Path,
    response: &Path,
    seed: &[u8],
    iterations_exp: u32,
) -> Result<Phase2Summary<E>> {
    let key = DeltaKey::<E>::generate(&mut beacon_rng(seed, iterations_exp)?)?;
    let dir = match response.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let staging = tempfile::Builder::new().prefix(".beacon").tempfile_in(dir)?.into_temp_path();
    let summary = contribute_with_key(params, challenge, &staging, &key)?;
    verify::<E>(params, challenge, &staging)?;
    staging.persist(response).map_err(|e| CeremonyError::IoError(e.error))?;
    info!(path = %response.display(), iterations_exp, "phase-2 beacon contribution verified and written");
    Ok(summary)
}
