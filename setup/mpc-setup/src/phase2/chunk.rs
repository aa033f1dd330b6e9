//! Phase-2 files.
//!
//! ```text
//! query:      header | query                                             | content hash
//! challenge:  header | link           | layout | delta         | stream | content hash
//! response:   header | challenge hash | layout | proof | delta | stream | content hash
//! parameters: header | layout | response hashes | query | delta | H | L | content hash
//! ```
//!
//! The layout names the query the stream belongs to, so a chunk can never be
//! combined into the parameters of a different circuit.
use super::{Delta, Groth16Query, Phase2Accumulator, StreamLayout};
use crate::codec::{open_checked, ElementReader, ElementWriter, FileHeader, FileKind};
use crate::errors::{CeremonyError, Result};
use crate::keypair::KeyProof;
use crate::parameters::CeremonyParams;
use ark_ec::pairing::Pairing;
use ark_serialize::Compress;
use libs::group_structures::{encoded_size, CeremonyCurve};
use libs::iotools::{AtomicOutput, Hash, HASH_LEN};
use libs::memory_pool::BatchBuffer;
use std::fs::{self, File};
use std::io::{BufReader, Write};
use std::marker::PhantomData;
use std::ops::Range;
use std::path::Path;
use tracing::{debug, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase2Prelude<E: Pairing> {
    Challenge { link: Hash },
    Response { challenge_hash: Hash, proof: KeyProof<E> },
}

impl<E: Pairing> Phase2Prelude<E> {
    pub fn kind(&self) -> FileKind {
        match self {
            Phase2Prelude::Challenge { .. } => FileKind::Phase2Challenge,
            Phase2Prelude::Response { .. } => FileKind::Phase2Response,
        }
    }

    fn lead_hash(&self) -> &Hash {
        match self {
            Phase2Prelude::Challenge { link } => link,
            Phase2Prelude::Response { challenge_hash, .. } => challenge_hash,
        }
    }
}

fn check_curve<E: CeremonyCurve>(params: &CeremonyParams) -> Result<()> {
    if params.curve != E::KIND {
        return Err(CeremonyError::mismatch("curve", E::KIND, params.curve));
    }
    Ok(())
}

fn check_file_len(path: &Path, expected: usize) -> Result<()> {
    let actual = fs::metadata(path)?.len();
    if actual != expected as u64 {
        return Err(CeremonyError::FormatError(format!(
            "{} has {} bytes, its header implies {}",
            path.display(),
            actual,
            expected
        )));
    }
    Ok(())
}

fn stream_file_len<E: Pairing>(kind: FileKind, elements: usize) -> usize {
    let compress = kind.compression();
    let proof = match kind {
        FileKind::Phase2Response => encoded_size::<E::G1Affine>(compress) + encoded_size::<E::G2Affine>(compress),
        _ => 0,
    };
    FileHeader::LEN
        + HASH_LEN
        + StreamLayout::ENCODED_LEN
        + proof
        + Delta::<E>::encoded_len(compress)
        + elements * encoded_size::<E::G1Affine>(compress)
        + HASH_LEN
}

/// Streams the delta elements of a phase-2 challenge or response.
pub struct StreamReader<E: Pairing> {
    header: FileHeader,
    layout: StreamLayout,
    prelude: Phase2Prelude<E>,
    delta: Delta<E>,
    hash: Hash,
    range: Range<usize>,
    position: usize,
    elements: ElementReader<BufReader<File>>,
    batch_size: usize,
}

impl<E: CeremonyCurve> StreamReader<E> {
    pub fn open(path: &Path, params: &CeremonyParams, kinds: &[FileKind]) -> Result<Self> {
        check_curve::<E>(params)?;
        let (header, mut elements, hash) = open_checked(path)?;
        header.expect_kind(kinds)?;
        header.check_phase2(params)?;
        check_file_len(path, stream_file_len::<E>(header.kind, header.element_count as usize))?;

        let lead = elements.read_hash()?;
        let layout = StreamLayout::read(&mut elements)?;
        let prelude = match header.kind {
            FileKind::Phase2Challenge => Phase2Prelude::Challenge { link: lead },
            FileKind::Phase2Response => Phase2Prelude::Response { challenge_hash: lead, proof: KeyProof::read(&mut elements)? },
            other => return Err(CeremonyError::FormatError(format!("{:?} is not a phase-2 chunk", other))),
        };
        let range = layout.chunk_range(params, header.first_chunk as usize, header.chunk_count as usize)?;
        if range.len() != header.element_count as usize {
            return Err(CeremonyError::mismatch("element count", range.len(), header.element_count));
        }
        let delta = Delta::read(&mut elements)?;
        debug!(path = %path.display(), kind = ?header.kind, first_chunk = header.first_chunk, "opened phase-2 chunk");
        Ok(Self {
            position: range.start,
            header,
            layout,
            prelude,
            delta,
            hash,
            range,
            elements,
            batch_size: params.batch_size,
        })
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn layout(&self) -> &StreamLayout {
        &self.layout
    }

    pub fn prelude(&self) -> &Phase2Prelude<E> {
        &self.prelude
    }

    pub fn delta(&self) -> &Delta<E> {
        &self.delta
    }

    pub fn hash(&self) -> Hash {
        self.hash
    }

    /// Stream positions this file covers.
    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }

    pub fn first_chunk(&self) -> usize {
        self.header.first_chunk as usize
    }

    pub fn chunk_count(&self) -> usize {
        self.header.chunk_count as usize
    }

    /// Next batch of elements with its stream position, or `None` once the
    /// file is exhausted.
    pub fn next_batch<'a>(&mut self, buf: &'a mut BatchBuffer<E::G1Affine>) -> Result<Option<(usize, &'a [E::G1Affine])>> {
        if self.position >= self.range.end {
            return Ok(None);
        }
        let start = self.position;
        let len = self.batch_size.min(self.range.end - start);
        let batch = self.elements.read_batch(buf, len)?;
        self.position += len;
        Ok(Some((start, batch)))
    }

    pub fn read_all(&mut self) -> Result<Vec<E::G1Affine>> {
        let mut out = Vec::with_capacity(self.range.len());
        let mut buf = BatchBuffer::new(self.batch_size);
        while let Some((_, batch)) = self.next_batch(&mut buf)? {
            out.extend_from_slice(batch);
        }
        Ok(out)
    }
}

/// Writes a phase-2 chunk file; the element count is fixed by the range.
pub struct StreamWriter<E: Pairing, W: Write> {
    inner: ElementWriter<W>,
    remaining: usize,
    _curve: PhantomData<E>,
}

impl<E: CeremonyCurve, W: Write> StreamWriter<E, W> {
    pub fn create(
        sink: W,
        params: &CeremonyParams,
        layout: &StreamLayout,
        chunks: (usize, usize),
        prelude: &Phase2Prelude<E>,
        delta: &Delta<E>,
    ) -> Result<Self> {
        let (first, count) = chunks;
        let range = layout.chunk_range(params, first, count)?;
        let header = FileHeader::phase2(prelude.kind(), params, first, count, range.len());
        let mut inner = ElementWriter::create(sink, &header)?;
        inner.write_hash(prelude.lead_hash())?;
        layout.write(&mut inner)?;
        if let Phase2Prelude::Response { proof, .. } = prelude {
            proof.write(&mut inner)?;
        }
        delta.write(&mut inner)?;
        Ok(Self { inner, remaining: range.len(), _curve: PhantomData })
    }

    pub fn write_batch(&mut self, items: &[E::G1Affine]) -> Result<()> {
        if items.len() > self.remaining {
            return Err(CeremonyError::mismatch("element count", self.remaining, items.len()));
        }
        self.remaining -= items.len();
        self.inner.write_elements(items)
    }

    pub fn finish(self) -> Result<(W, Hash)> {
        if self.remaining != 0 {
            return Err(CeremonyError::FormatError(format!("{} stream elements missing", self.remaining)));
        }
        self.inner.finish()
    }
}

pub fn write_query<E: CeremonyCurve>(params: &CeremonyParams, query: &Groth16Query<E>, path: &Path) -> Result<Hash> {
    check_curve::<E>(params)?;
    let header = FileHeader::phase2(FileKind::Phase2Query, params, 0, 1, query.element_count());
    let mut w = ElementWriter::create(AtomicOutput::create(path)?, &header)?;
    query.write(&mut w)?;
    let (out, hash) = w.finish()?;
    out.commit()?;
    info!(path = %path.display(), wires = query.n_wires(), public = query.n_public(), "wrote phase-2 query");
    Ok(hash)
}

/// Wire counts implied by a header's element count and the file size.
fn query_shape<E: Pairing>(element_count: usize, body_len: usize) -> Result<(usize, usize)> {
    let g1 = encoded_size::<E::G1Affine>(Compress::No);
    let g2 = encoded_size::<E::G2Affine>(Compress::No);
    let fixed = Groth16Query::<E>::encoded_len(0, 0);
    // body = fixed + n_wires * (2 g1 + g2) + n_public * g1, points = 4 + 3 n_wires + n_public
    let points = element_count.checked_sub(4).ok_or_else(|| CeremonyError::FormatError("query is too short".to_string()))?;
    let extra = body_len.checked_sub(fixed + points * g1).ok_or_else(|| CeremonyError::FormatError("query is too short".to_string()))?;
    let per_wire = g2 - g1;
    if extra % per_wire != 0 {
        return Err(CeremonyError::FormatError("query size does not match its element count".to_string()));
    }
    let n_wires = extra / per_wire;
    let n_public = points
        .checked_sub(3 * n_wires)
        .ok_or_else(|| CeremonyError::FormatError("query size does not match its element count".to_string()))?;
    Ok((n_wires, n_public))
}

pub fn read_query<E: CeremonyCurve>(params: &CeremonyParams, path: &Path) -> Result<(Groth16Query<E>, Hash)> {
    check_curve::<E>(params)?;
    let (header, mut r, hash) = open_checked(path)?;
    header.expect_kind(&[FileKind::Phase2Query])?;
    header.check_phase2(params)?;
    let body = (fs::metadata(path)?.len() as usize).saturating_sub(FileHeader::LEN + HASH_LEN);
    let shape = query_shape::<E>(header.element_count as usize, body)?;
    let query = Groth16Query::read(&mut r, Some(shape))?;
    Ok((query, hash))
}

/// Writes the parameters header, layout, response hashes, query and delta;
/// the caller streams `H || L` after it.
pub(crate) fn parameters_writer<E: CeremonyCurve>(
    sink: AtomicOutput,
    params: &CeremonyParams,
    layout: &StreamLayout,
    response_hashes: &[Hash],
    query: &Groth16Query<E>,
    delta: &Delta<E>,
) -> Result<ElementWriter<AtomicOutput>> {
    let header = FileHeader::phase2(FileKind::Phase2Parameters, params, 0, response_hashes.len(), layout.stream_len);
    let mut w = ElementWriter::create(sink, &header)?;
    layout.write(&mut w)?;
    for h in response_hashes {
        w.write_hash(h)?;
    }
    query.write(&mut w)?;
    delta.write(&mut w)?;
    Ok(w)
}

/// Reads a combined parameter file. Returns the parameters, the response
/// hashes they were assembled from and the file's content hash.
pub fn read_parameters<E: CeremonyCurve>(params: &CeremonyParams, path: &Path) -> Result<(Phase2Accumulator<E>, Vec<Hash>, Hash)> {
    check_curve::<E>(params)?;
    let (header, mut r, hash) = open_checked(path)?;
    header.expect_kind(&[FileKind::Phase2Parameters])?;
    header.check_phase2(params)?;
    let layout = StreamLayout::read(&mut r)?;
    let chunks = header.chunk_count as usize;
    if layout.stream_len != header.element_count as usize || chunks != layout.num_chunks(params) {
        return Err(CeremonyError::FormatError("parameter header disagrees with its stream layout".to_string()));
    }
    let g1 = encoded_size::<E::G1Affine>(Compress::No);
    let fixed = FileHeader::LEN + StreamLayout::ENCODED_LEN + chunks * HASH_LEN + Delta::<E>::encoded_len(Compress::No) + layout.stream_len * g1 + HASH_LEN;
    let body = (fs::metadata(path)?.len() as usize)
        .checked_sub(fixed)
        .ok_or_else(|| CeremonyError::FormatError("parameter file is too short".to_string()))?;
    let response_hashes = (0..chunks).map(|_| r.read_hash()).collect::<Result<Vec<_>>>()?;

    // The query's own counts are cross-checked against the remaining size.
    let query = Groth16Query::<E>::read(&mut r, None)?;
    if Groth16Query::<E>::encoded_len(query.n_wires(), query.n_public()) != body {
        return Err(CeremonyError::FormatError("query section size disagrees with its counts".to_string()));
    }
    let delta = Delta::read(&mut r)?;
    let h_query = (0..layout.h_len).map(|_| r.read_element()).collect::<Result<Vec<_>>>()?;
    let l_query = (layout.h_len..layout.stream_len).map(|_| r.read_element()).collect::<Result<Vec<_>>>()?;
    Ok((Phase2Accumulator { query, delta, h_query, l_query }, response_hashes, hash))
}


#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;
    use crate::parameters::ContributionMode;
    use ark_bls12_381::{Bls12_381, Fr, G1Affine};
    use ark_ec::{AffineRepr, CurveGroup};
    use libs::group_structures::CurveKind;
    use libs::iotools::hash_bytes;
    use std::path::PathBuf;

    /// A one-chunk phase-2 challenge over five distinct points.
    pub(crate) fn single_chunk_challenge(dir: &Path) -> (CeremonyParams, PathBuf, Vec<G1Affine>) {
        let params = CeremonyParams::new(CurveKind::Bls12_381, 3, 8, 2, ContributionMode::Chunked).unwrap();
        let layout = StreamLayout { query_hash: hash_bytes(b"query"), h_len: 2, stream_len: 5 };
        let points: Vec<G1Affine> = (1..=5u64).map(|k| (G1Affine::generator() * Fr::from(k)).into_affine()).collect();
        let path = dir.join("challenge_0000");
        let prelude = Phase2Prelude::<Bls12_381>::Challenge { link: layout.query_hash };
        let mut w = StreamWriter::create(AtomicOutput::create(&path).unwrap(), &params, &layout, (0, 1), &prelude, &Delta::one()).unwrap();
        w.write_batch(&points).unwrap();
        let (out, _) = w.finish().unwrap();
        out.commit().unwrap();
        (params, path, points)
    }
}
