use crate::accumulator::{Anchors, ChunkReader, ChunkWriter, Prelude, Section};
use crate::codec::FileKind;
use crate::errors::{CeremonyError, Result};
use crate::parameters::CeremonyParams;
use crate::transcript::TranscriptState;
use ark_ec::AffineRepr;
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use libs::group_structures::{same_ratio, CeremonyCurve};
use libs::iotools::{AtomicOutput, Hash};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, info_span};

/// Reads a response list: one path per line, blank lines ignored. Relative
/// paths are resolved against the list's directory.
pub fn read_response_list(list: &Path) -> Result<Vec<PathBuf>> {
    let base = list.parent().map(Path::to_path_buf).unwrap_or_default();
    Ok(fs::read_to_string(list)?
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| {
            let p = PathBuf::from(l);
            if p.is_absolute() {
                p
            } else {
                base.join(p)
            }
        })
        .collect())
}

pub fn combine<E: CeremonyCurve>(
    params: &CeremonyParams,
    response_list: &Path,
    output: &Path,
    transcript: Option<&TranscriptState>,
) -> Result<Hash> {
    let inputs = read_response_list(response_list)?;
    combine_responses::<E>(params, &inputs, output, transcript)
}

/// Concatenates verified responses (or combined runs) covering a contiguous
/// ascending range of chunks into one combined transcript. Combining runs
/// `[0..k)` and `[k..n)` gives the same bytes as combining `[0..n)`.
pub fn combine_responses<E: CeremonyCurve>(
    params: &CeremonyParams,
    inputs: &[PathBuf],
    output: &Path,
    transcript: Option<&TranscriptState>,
) -> Result<Hash> {
    if inputs.is_empty() {
        return Err(CeremonyError::ChunkSequenceError("no responses to combine".to_string()));
    }
    let mut readers = inputs
        .iter()
        .map(|p| ChunkReader::<E>::open(p, params, &[FileKind::Response, FileKind::Combined]))
        .collect::<Result<Vec<_>>>()?;

    let first = readers[0].segment().first_chunk;
    let mut next = first;
    for r in &readers {
        let s = r.segment();
        if s.first_chunk != next {
            return Err(CeremonyError::ChunkSequenceError(format!(
                "expected chunk {}, found chunk {} ({} chunks)",
                next, s.first_chunk, s.chunk_count
            )));
        }
        next += s.chunk_count;
    }
    let segment = params.segment(first, next - first)?;
    let _span = info_span!("combine", first_chunk = first, chunks = segment.chunk_count).entered();

    let anchors: Anchors<E> = *readers[0].anchors();
    if let Some(r) = readers.iter().find(|r| *r.anchors() != anchors) {
        return Err(CeremonyError::ratio(r.segment().first_chunk, "anchors differ between chunks"));
    }

    let response_hashes: Vec<Hash> = readers.iter().flat_map(|r| r.prelude().response_hashes(&r.hash())).collect();
    if let Some(state) = transcript {
        for (i, h) in response_hashes.iter().enumerate() {
            state.check_response(first + i, h)?;
        }
    }

    let prelude = Prelude::Combined { response_hashes };
    let mut writer = ChunkWriter::create(AtomicOutput::create(output)?, params, segment, &prelude, &anchors)?;
    let (g1, g2) = (E::g1_generator(), E::g2_generator());
    let g1_step = |a: E::G1Affine, b: E::G1Affine| same_ratio::<E>(a, b, g2, anchors.tau_g2);
    concat_section::<E, E::G1Affine, _>(&mut readers, &mut writer, Section::TauG1, g1_step)?;
    concat_section::<E, E::G2Affine, _>(&mut readers, &mut writer, Section::TauG2, |a, b| {
        same_ratio::<E>(g1, anchors.tau_g1, a, b)
    })?;
    concat_section::<E, E::G1Affine, _>(&mut readers, &mut writer, Section::AlphaG1, g1_step)?;
    concat_section::<E, E::G1Affine, _>(&mut readers, &mut writer, Section::BetaG1, g1_step)?;

    let (out, hash) = writer.finish()?;
    out.commit()?;
    info!(path = %output.display(), "wrote combined transcript");
    Ok(hash)
}

/// Copies one section of every input in order, checking that the last
/// element of each input and the first of the next are one power of tau
/// apart.
fn concat_section<E, P, F>(
    readers: &mut [ChunkReader<E>],
    writer: &mut ChunkWriter<E, AtomicOutput>,
    section: Section,
    step_holds: F,
) -> Result<()>
where
    E: CeremonyCurve,
    P: AffineRepr + CanonicalSerialize + CanonicalDeserialize,
    F: Fn(P, P) -> bool,
{
    let mut last: Option<P> = None;
    for r in readers.iter_mut() {
        let chunk = r.segment().first_chunk;
        let mut boundary_pending = true;
        r.for_each_batch(section, |_, batch: &[P]| {
            if boundary_pending {
                boundary_pending = false;
                if let (Some(prev), Some(first)) = (last, batch.first()) {
                    if !step_holds(prev, *first) {
                        return Err(CeremonyError::ratio(chunk, format!("{} boundary with the previous chunk", section.name())));
                    }
                }
            }
            if let Some(p) = batch.last() {
                last = Some(*p);
            }
            writer.write_batch(section, batch)
        })?;
    }
    Ok(())
}
