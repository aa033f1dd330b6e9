use super::chunk::{parameters_writer, read_parameters, read_query, StreamReader};
use crate::codec::FileKind;
use crate::errors::{CeremonyError, Result};
use crate::parameters::CeremonyParams;
use libs::group_structures::{point_from_hex, point_to_hex, CeremonyCurve, CurveKind};
use libs::iotools::{AtomicOutput, Hash};
use libs::memory_pool::BatchBuffer;
use libs::{impl_read_from_json, impl_write_into_json};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, info_span};

/// Assembles verified phase-2 responses covering every stream chunk, in
/// order, into one Groth16 parameter file.
pub fn combine<E: CeremonyCurve>(params: &CeremonyParams, query: &Path, responses: &[PathBuf], output: &Path) -> Result<Hash> {
    let (query, query_hash) = read_query::<E>(params, query)?;
    let mut readers = responses
        .iter()
        .map(|p| StreamReader::<E>::open(p, params, &[FileKind::Phase2Response]))
        .collect::<Result<Vec<_>>>()?;
    let first = readers
        .first()
        .ok_or_else(|| CeremonyError::ChunkSequenceError("no responses to combine".to_string()))?;
    let layout = *first.layout();
    let delta = *first.delta();
    let _span = info_span!("phase2_combine", responses = readers.len()).entered();

    let mut next = 0;
    for r in &readers {
        if r.layout().query_hash != query_hash {
            return Err(CeremonyError::hash_mismatch("query hash", r.first_chunk(), &query_hash, &r.layout().query_hash));
        }
        if *r.layout() != layout {
            return Err(CeremonyError::FormatError(format!("chunk {} has a different stream layout", r.first_chunk())));
        }
        if r.first_chunk() != next {
            return Err(CeremonyError::ChunkSequenceError(format!(
                "expected chunk {}, found chunk {}",
                next,
                r.first_chunk()
            )));
        }
        if *r.delta() != delta {
            return Err(CeremonyError::ratio(r.first_chunk(), "delta differs between chunks"));
        }
        next += r.chunk_count();
    }
    if next != layout.num_chunks(params) {
        return Err(CeremonyError::ChunkSequenceError(format!(
            "responses cover chunks 0..{} of {}",
            next,
            layout.num_chunks(params)
        )));
    }
    if query.n_wires().saturating_sub(query.n_public()) + layout.h_len != layout.stream_len || query.domain_size - 1 != layout.h_len {
        return Err(CeremonyError::mismatch(
            "stream layout",
            format!("{} H and {} L elements", query.domain_size - 1, query.n_wires().saturating_sub(query.n_public())),
            format!("{} H and {} L elements", layout.h_len, layout.stream_len - layout.h_len),
        ));
    }

    let response_hashes: Vec<Hash> = readers.iter().map(|r| r.hash()).collect();
    let mut w = parameters_writer(AtomicOutput::create(output)?, params, &layout, &response_hashes, &query, &delta)?;
    let mut buf = BatchBuffer::new(params.batch_size);
    for r in readers.iter_mut() {
        while let Some((_, batch)) = r.next_batch(&mut buf)? {
            w.write_elements(batch)?;
        }
    }
    let (out, hash) = w.finish()?;
    out.commit()?;
    info!(path = %output.display(), "wrote Groth16 parameters");
    Ok(hash)
}

/// Groth16 verifying key with points as compressed hex.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyingKey {
    pub curve: CurveKind,
    pub alpha_g1: String,
    pub beta_g2: String,
    pub gamma_g2: String,
    pub delta_g2: String,
    pub gamma_abc_g1: Vec<String>,
}

impl_read_from_json!(VerifyingKey);
impl_write_into_json!(VerifyingKey);

impl VerifyingKey {
    /// Decodes the points for curve `E`.
    #[allow(clippy::type_complexity)]
    pub fn points<E: CeremonyCurve>(&self) -> Result<(E::G1Affine, E::G2Affine, E::G2Affine, E::G2Affine, Vec<E::G1Affine>)> {
        if self.curve != E::KIND {
            return Err(CeremonyError::mismatch("curve", E::KIND, self.curve));
        }
        Ok((
            point_from_hex(&self.alpha_g1)?,
            point_from_hex(&self.beta_g2)?,
            point_from_hex(&self.gamma_g2)?,
            point_from_hex(&self.delta_g2)?,
            self.gamma_abc_g1.iter().map(|p| point_from_hex(p)).collect::<std::result::Result<_, _>>()?,
        ))
    }
}

/// Extracts the verifying key of a parameter file and writes it as JSON.
pub fn export_vk<E: CeremonyCurve>(params: &CeremonyParams, parameters: &Path, output: &Path) -> Result<VerifyingKey> {
    let (acc, _, _) = read_parameters::<E>(params, parameters)?;
    let vk = VerifyingKey {
        curve: E::KIND,
        alpha_g1: point_to_hex(&acc.query.alpha_g1),
        beta_g2: point_to_hex(&acc.query.beta_g2),
        gamma_g2: point_to_hex(&acc.query.gamma_g2),
        delta_g2: point_to_hex(&acc.delta.g2),
        gamma_abc_g1: acc.query.gamma_abc_g1.iter().map(point_to_hex).collect(),
    };
    vk.write_into_json(output)?;
    info!(path = %output.display(), "wrote verifying key");
    Ok(vk)
}
