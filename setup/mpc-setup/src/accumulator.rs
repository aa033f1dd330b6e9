//! Phase-1 accumulator files and their streaming reader and writer.
//!
//! A file covers one [`Segment`] of the four power vectors and stores them
//! section after section:
//!
//! ```text
//! header | prelude | anchors | tau_g1 | tau_g2 | alpha_g1 | beta_g1 | content hash
//! ```
//!
//! The prelude depends on the file kind: a challenge carries the hash it is
//! linked to, a response the hash of the challenge it answers and the
//! contributor's public key, a combined transcript the hashes of the responses
//! it was assembled from.
use crate::codec::{open_checked, ElementReader, ElementWriter, FileHeader, FileKind};
use crate::errors::{CeremonyError, Result};
use crate::keypair::{PrivateKey, PublicKey};
use crate::parameters::{CeremonyParams, Segment};
use ark_ec::pairing::Pairing;
use ark_ec::{AffineRepr, CurveGroup};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize, Compress};
use libs::group_structures::{encoded_size, CeremonyCurve};
use libs::iotools::{AtomicOutput, Hash, HASH_LEN};
use libs::memory_pool::{batch_ranges, BatchBuffer};
use std::fs::{self, File};
use std::io::{BufReader, Read, Write};
use std::marker::PhantomData;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Section {
    TauG1,
    TauG2,
    AlphaG1,
    BetaG1,
}

impl Section {
    pub const ALL: [Section; 4] = [Section::TauG1, Section::TauG2, Section::AlphaG1, Section::BetaG1];

    fn index(self) -> usize {
        match self {
            Section::TauG1 => 0,
            Section::TauG2 => 1,
            Section::AlphaG1 => 2,
            Section::BetaG1 => 3,
        }
    }

    pub fn len(self, segment: &Segment) -> usize {
        match self {
            Section::TauG1 => segment.tau_g1_len(),
            _ => segment.powers_len(),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Section::TauG1 => "tau g1",
            Section::TauG2 => "tau g2",
            Section::AlphaG1 => "alpha g1",
            Section::BetaG1 => "beta g1",
        }
    }
}

/// Exponent-one values carried by every file, so a chunk can be checked
/// against the contributor's key without chunk 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Anchors<E: Pairing> {
    pub tau_g1: E::G1Affine,
    pub tau_g2: E::G2Affine,
    pub alpha_g1: E::G1Affine,
    pub beta_g1: E::G1Affine,
    pub beta_g2: E::G2Affine,
}

impl<E: Pairing> Anchors<E> {
    /// Anchors of a fresh ceremony: every secret is one.
    pub fn initial() -> Self {
        let g1 = E::G1Affine::generator();
        let g2 = E::G2Affine::generator();
        Self { tau_g1: g1, tau_g2: g2, alpha_g1: g1, beta_g1: g1, beta_g2: g2 }
    }

    pub fn read<R: Read>(r: &mut ElementReader<R>) -> Result<Self> {
        Ok(Self {
            tau_g1: r.read_element()?,
            tau_g2: r.read_element()?,
            alpha_g1: r.read_element()?,
            beta_g1: r.read_element()?,
            beta_g2: r.read_element()?,
        })
    }

    pub fn write<W: Write>(&self, w: &mut ElementWriter<W>) -> Result<()> {
        w.write_element(&self.tau_g1)?;
        w.write_element(&self.tau_g2)?;
        w.write_element(&self.alpha_g1)?;
        w.write_element(&self.beta_g1)?;
        w.write_element(&self.beta_g2)
    }

    pub fn transform(&self, key: &PrivateKey<E>) -> Result<Self> {
        let next = Self {
            tau_g1: (self.tau_g1 * key.tau()).into_affine(),
            tau_g2: (self.tau_g2 * key.tau()).into_affine(),
            alpha_g1: (self.alpha_g1 * key.alpha()).into_affine(),
            beta_g1: (self.beta_g1 * key.beta()).into_affine(),
            beta_g2: (self.beta_g2 * key.beta()).into_affine(),
        };
        next.check_non_identity()?;
        Ok(next)
    }

    pub fn check_non_identity(&self) -> Result<()> {
        let g1 = [("tau g1", self.tau_g1), ("alpha g1", self.alpha_g1), ("beta g1", self.beta_g1)];
        let g2 = [("tau g2", self.tau_g2), ("beta g2", self.beta_g2)];
        let zero = g1.iter().find(|(_, p)| p.is_zero()).map(|(n, _)| *n)
            .or_else(|| g2.iter().find(|(_, p)| p.is_zero()).map(|(n, _)| *n));
        match zero {
            Some(name) => Err(CeremonyError::DegenerateContribution(format!("{} anchor is the identity", name))),
            None => Ok(()),
        }
    }

    fn encoded_len(compress: Compress) -> usize {
        3 * encoded_size::<E::G1Affine>(compress) + 2 * encoded_size::<E::G2Affine>(compress)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Prelude<E: Pairing> {
    Challenge { link: Hash },
    Response { challenge_hash: Hash, public_key: PublicKey<E> },
    Combined { response_hashes: Vec<Hash> },
}

impl<E: Pairing> Prelude<E> {
    pub fn kind(&self) -> FileKind {
        match self {
            Prelude::Challenge { .. } => FileKind::Challenge,
            Prelude::Response { .. } => FileKind::Response,
            Prelude::Combined { .. } => FileKind::Combined,
        }
    }

    fn read<R: Read>(kind: FileKind, r: &mut ElementReader<R>, chunk_count: usize) -> Result<Self> {
        match kind {
            FileKind::Challenge => Ok(Prelude::Challenge { link: r.read_hash()? }),
            FileKind::Response => Ok(Prelude::Response {
                challenge_hash: r.read_hash()?,
                public_key: PublicKey::read(r)?,
            }),
            FileKind::Combined => {
                let response_hashes = (0..chunk_count).map(|_| r.read_hash()).collect::<Result<Vec<_>>>()?;
                Ok(Prelude::Combined { response_hashes })
            }
            other => Err(CeremonyError::FormatError(format!("{:?} is not a phase-1 file", other))),
        }
    }

    fn write<W: Write>(&self, w: &mut ElementWriter<W>) -> Result<()> {
        match self {
            Prelude::Challenge { link } => w.write_hash(link),
            Prelude::Response { challenge_hash, public_key } => {
                w.write_hash(challenge_hash)?;
                public_key.write(w)
            }
            Prelude::Combined { response_hashes } => {
                for h in response_hashes {
                    w.write_hash(h)?;
                }
                Ok(())
            }
        }
    }

    fn encoded_len(kind: FileKind, chunk_count: usize, compress: Compress) -> usize {
        let key = 3 * (encoded_size::<E::G1Affine>(compress) + encoded_size::<E::G2Affine>(compress));
        match kind {
            FileKind::Response => HASH_LEN + key,
            FileKind::Combined => HASH_LEN * chunk_count,
            _ => HASH_LEN,
        }
    }

    /// Hashes of the responses a file stands for, in chunk order.
    pub fn response_hashes(&self, own_hash: &Hash) -> Vec<Hash> {
        match self {
            Prelude::Combined { response_hashes } => response_hashes.clone(),
            _ => vec![*own_hash],
        }
    }
}

/// Size of a well-formed phase-1 file, used to reject truncated or padded
/// bodies before decoding.
fn expected_file_len<E: Pairing>(kind: FileKind, segment: &Segment) -> u64 {
    let compress = kind.compression();
    let g1 = encoded_size::<E::G1Affine>(compress);
    let g2 = encoded_size::<E::G2Affine>(compress);
    let body = Prelude::<E>::encoded_len(kind, segment.chunk_count, compress)
        + Anchors::<E>::encoded_len(compress)
        + segment.tau_g1_len() * g1
        + segment.powers_len() * (g2 + 2 * g1);
    (FileHeader::LEN + body + HASH_LEN) as u64
}

/// Enforces the section order and the per-section element counts.
struct SectionCursor {
    segment: Segment,
    position: usize,
    done: usize,
}

impl SectionCursor {
    fn new(segment: Segment) -> Self {
        Self { segment, position: 0, done: 0 }
    }

    fn take(&mut self, section: Section, n: usize) -> Result<()> {
        let target = section.index();
        if target < self.position {
            return Err(CeremonyError::FormatError(format!("{} section is already closed", section.name())));
        }
        while self.position < target {
            self.close_current()?;
        }
        let len = section.len(&self.segment);
        if self.done + n > len {
            return Err(CeremonyError::FormatError(format!(
                "{} section holds {} elements, got {}",
                section.name(),
                len,
                self.done + n
            )));
        }
        self.done += n;
        Ok(())
    }

    fn close_current(&mut self) -> Result<()> {
        let current = Section::ALL[self.position];
        let len = current.len(&self.segment);
        if self.done != len {
            return Err(CeremonyError::FormatError(format!(
                "{} section holds {} of {} elements",
                current.name(),
                self.done,
                len
            )));
        }
        self.position += 1;
        self.done = 0;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        while self.position < Section::ALL.len() {
            self.close_current()?;
        }
        Ok(())
    }
}

/// Streams a verified phase-1 file section by section in batches.
pub struct ChunkReader<E: Pairing> {
    header: FileHeader,
    segment: Segment,
    prelude: Prelude<E>,
    anchors: Anchors<E>,
    hash: Hash,
    elements: ElementReader<BufReader<File>>,
    cursor: SectionCursor,
    batch_size: usize,
}

impl<E: CeremonyCurve> ChunkReader<E> {
    /// Opens `path`, accepting only the listed kinds. The content hash is
    /// verified before anything past the header is decoded.
    pub fn open(path: &Path, params: &CeremonyParams, kinds: &[FileKind]) -> Result<Self> {
        if params.curve != E::KIND {
            return Err(CeremonyError::mismatch("curve", E::KIND, params.curve));
        }
        let (header, mut elements, hash) = open_checked(path)?;
        header.expect_kind(kinds)?;
        let segment = header.check_phase1(params)?;
        let expected = expected_file_len::<E>(header.kind, &segment);
        let actual = fs::metadata(path)?.len();
        if actual != expected {
            return Err(CeremonyError::FormatError(format!(
                "{} has {} bytes, its header implies {}",
                path.display(),
                actual,
                expected
            )));
        }
        let prelude = Prelude::read(header.kind, &mut elements, segment.chunk_count)?;
        let anchors = Anchors::read(&mut elements)?;
        debug!(path = %path.display(), kind = ?header.kind, first_chunk = segment.first_chunk, "opened accumulator file");
        Ok(Self {
            header,
            segment,
            prelude,
            anchors,
            hash,
            elements,
            cursor: SectionCursor::new(segment),
            batch_size: params.batch_size,
        })
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn segment(&self) -> Segment {
        self.segment
    }

    pub fn prelude(&self) -> &Prelude<E> {
        &self.prelude
    }

    pub fn anchors(&self) -> &Anchors<E> {
        &self.anchors
    }

    /// Content hash of the file.
    pub fn hash(&self) -> Hash {
        self.hash
    }

    /// Feeds the whole `section` to `f` in batches. `f` receives the global
    /// exponent of the first element of each batch.
    pub fn for_each_batch<P, F>(&mut self, section: Section, mut f: F) -> Result<()>
    where
        P: CanonicalDeserialize,
        F: FnMut(usize, &[P]) -> Result<()>,
    {
        let total = section.len(&self.segment);
        self.cursor.take(section, total)?;
        let mut buf = BatchBuffer::new(self.batch_size);
        for (offset, len) in batch_ranges(total, self.batch_size) {
            let batch = self.elements.read_batch(&mut buf, len)?;
            f(self.segment.start + offset, batch)?;
        }
        Ok(())
    }

    pub fn read_section<P: CanonicalDeserialize + Clone>(&mut self, section: Section) -> Result<Vec<P>> {
        let mut out = Vec::with_capacity(section.len(&self.segment));
        self.for_each_batch(section, |_, batch: &[P]| {
            out.extend_from_slice(batch);
            Ok(())
        })?;
        Ok(out)
    }
}

/// Writes a phase-1 file while hashing it. Sections must arrive in order and
/// complete; `finish` appends the content hash.
pub struct ChunkWriter<E: Pairing, W: Write> {
    inner: ElementWriter<W>,
    cursor: SectionCursor,
    _curve: PhantomData<E>,
}

impl<E: CeremonyCurve, W: Write> ChunkWriter<E, W> {
    pub fn create(sink: W, params: &CeremonyParams, segment: Segment, prelude: &Prelude<E>, anchors: &Anchors<E>) -> Result<Self> {
        if let Prelude::Combined { response_hashes } = prelude {
            if response_hashes.len() != segment.chunk_count {
                return Err(CeremonyError::mismatch("response hash count", segment.chunk_count, response_hashes.len()));
            }
        }
        let header = FileHeader::phase1(prelude.kind(), params, &segment);
        let mut inner = ElementWriter::create(sink, &header)?;
        prelude.write(&mut inner)?;
        anchors.write(&mut inner)?;
        Ok(Self { inner, cursor: SectionCursor::new(segment), _curve: PhantomData })
    }

    pub fn write_batch<P: CanonicalSerialize>(&mut self, section: Section, items: &[P]) -> Result<()> {
        self.cursor.take(section, items.len())?;
        self.inner.write_elements(items)
    }

    pub fn finish(mut self) -> Result<(W, Hash)> {
        self.cursor.finish()?;
        self.inner.finish()
    }
}

/// In-memory view of one segment of the accumulator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccumulatorSlice<E: Pairing> {
    pub segment: Segment,
    pub anchors: Anchors<E>,
    pub tau_g1: Vec<E::G1Affine>,
    pub tau_g2: Vec<E::G2Affine>,
    pub alpha_g1: Vec<E::G1Affine>,
    pub beta_g1: Vec<E::G1Affine>,
}

pub fn read_chunk<E: CeremonyCurve>(path: &Path, params: &CeremonyParams) -> Result<(AccumulatorSlice<E>, Prelude<E>)> {
    let mut reader = ChunkReader::<E>::open(path, params, &[FileKind::Challenge, FileKind::Response, FileKind::Combined])?;
    let tau_g1 = reader.read_section(Section::TauG1)?;
    let tau_g2 = reader.read_section(Section::TauG2)?;
    let alpha_g1 = reader.read_section(Section::AlphaG1)?;
    let beta_g1 = reader.read_section(Section::BetaG1)?;
    let slice = AccumulatorSlice { segment: reader.segment(), anchors: *reader.anchors(), tau_g1, tau_g2, alpha_g1, beta_g1 };
    Ok((slice, reader.prelude().clone()))
}

/// Writes `slice` atomically to `path` and returns its content hash.
pub fn write_chunk<E: CeremonyCurve>(
    slice: &AccumulatorSlice<E>,
    prelude: &Prelude<E>,
    params: &CeremonyParams,
    path: &Path,
) -> Result<Hash> {
    let mut w = ChunkWriter::create(AtomicOutput::create(path)?, params, slice.segment, prelude, &slice.anchors)?;
    for (section, len) in [
        (Section::TauG1, slice.tau_g1.len()),
        (Section::TauG2, slice.tau_g2.len()),
        (Section::AlphaG1, slice.alpha_g1.len()),
        (Section::BetaG1, slice.beta_g1.len()),
    ] {
        if len != section.len(&slice.segment) {
            return Err(CeremonyError::mismatch("element count", section.len(&slice.segment), len));
        }
    }
    w.write_batch(Section::TauG1, &slice.tau_g1)?;
    w.write_batch(Section::TauG2, &slice.tau_g2)?;
    w.write_batch(Section::AlphaG1, &slice.alpha_g1)?;
    w.write_batch(Section::BetaG1, &slice.beta_g1)?;
    let (out, hash) = w.finish()?;
    out.commit()?;
    Ok(hash)
}

/// Writes the challenge of a fresh ceremony for `segment`: every secret is
/// one, so every element is a generator.
pub fn new_challenge<E: CeremonyCurve>(params: &CeremonyParams, segment: Segment, link: &Hash, path: &Path) -> Result<Hash> {
    let prelude = Prelude::<E>::Challenge { link: *link };
    let mut w = ChunkWriter::create(AtomicOutput::create(path)?, params, segment, &prelude, &Anchors::initial())?;
    let g1 = vec![E::g1_generator(); params.batch_size];
    let g2 = vec![E::g2_generator(); params.batch_size];
    for section in Section::ALL {
        for (_, len) in batch_ranges(section.len(&segment), params.batch_size) {
            match section {
                Section::TauG2 => w.write_batch(section, &g2[..len])?,
                _ => w.write_batch(section, &g1[..len])?,
            }
        }
    }
    let (out, hash) = w.finish()?;
    out.commit()?;
    info!(chunk = segment.first_chunk, chunks = segment.chunk_count, path = %path.display(), "wrote initial challenge");
    Ok(hash)
}

/// Cuts the listed segments out of a larger file into fresh challenges
/// linked to that file's hash, in a single pass over the source.
pub fn extract_challenges<E: CeremonyCurve>(
    params: &CeremonyParams,
    source: &Path,
    targets: &[(Segment, PathBuf)],
) -> Result<Vec<Hash>> {
    let mut reader = ChunkReader::<E>::open(source, params, &[FileKind::Challenge, FileKind::Response, FileKind::Combined])?;
    let have = reader.segment();
    let prelude = Prelude::Challenge { link: reader.hash() };
    let anchors = *reader.anchors();
    let mut writers = Vec::with_capacity(targets.len());
    for (segment, path) in targets {
        if segment.start < have.start || segment.end > have.end {
            return Err(CeremonyError::mismatch(
                "segment",
                format!("within {}..{}", have.start, have.end),
                format!("{}..{}", segment.start, segment.end),
            ));
        }
        writers.push(ChunkWriter::create(AtomicOutput::create(path)?, params, *segment, &prelude, &anchors)?);
    }
    let ranges = |section: Section| -> Vec<Range<usize>> {
        targets
            .iter()
            .map(|(s, _)| match section {
                Section::TauG1 => s.tau_g1_range(),
                _ => s.powers_range(),
            })
            .collect()
    };
    split_section::<E, E::G1Affine>(&mut reader, &mut writers, Section::TauG1, &ranges(Section::TauG1))?;
    split_section::<E, E::G2Affine>(&mut reader, &mut writers, Section::TauG2, &ranges(Section::TauG2))?;
    split_section::<E, E::G1Affine>(&mut reader, &mut writers, Section::AlphaG1, &ranges(Section::AlphaG1))?;
    split_section::<E, E::G1Affine>(&mut reader, &mut writers, Section::BetaG1, &ranges(Section::BetaG1))?;

    let mut hashes = Vec::with_capacity(writers.len());
    for w in writers {
        let (out, hash) = w.finish()?;
        out.commit()?;
        hashes.push(hash);
    }
    info!(source = %source.display(), challenges = hashes.len(), "extracted challenges");
    Ok(hashes)
}

fn split_section<E: CeremonyCurve, P: CanonicalDeserialize + CanonicalSerialize>(
    reader: &mut ChunkReader<E>,
    writers: &mut [ChunkWriter<E, AtomicOutput>],
    section: Section,
    ranges: &[Range<usize>],
) -> Result<()> {
    reader.for_each_batch(section, |start, batch: &[P]| {
        let end = start + batch.len();
        for (w, range) in writers.iter_mut().zip(ranges) {
            let lo = range.start.max(start);
            let hi = range.end.min(end);
            if lo < hi {
                w.write_batch(section, &batch[lo - start..hi - start])?;
            }
        }
        Ok(())
    })
}
