//! Binary container shared by every ceremony artifact.
//!
//! ```text
//! magic(4) | version(u16) | kind(u8) | curve(u8) | power(u32) | chunk_size(u64)
//! | first_chunk(u32) | chunk_count(u32) | element_count(u64) | body ... | blake2b-512(body and header)
//! ```
//!
//! Integers are big-endian. The trailing digest covers every preceding byte and
//! is checked in a full streaming pass before any element is decoded.
use crate::errors::{CeremonyError, Result};
use crate::parameters::{CeremonyParams, Segment};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize, Compress};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use libs::group_structures::{read_point, write_point, CurveKind};
use libs::iotools::{hash_with_trailer, Hash, HashWriter, HASH_LEN};
use libs::memory_pool::BatchBuffer;
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::Path;
use tracing::debug;

pub const PHASE1_MAGIC: [u8; 4] = *b"PTAU";
pub const PHASE2_MAGIC: [u8; 4] = *b"PHS2";
pub const FORMAT_VERSION: u16 = 1;

const READ_BUFFER: usize = 1 << 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    Challenge,
    Response,
    Combined,
    Phase2Query,
    Phase2Challenge,
    Phase2Response,
    Phase2Parameters,
}

impl FileKind {
    fn id(self) -> u8 {
        match self {
            FileKind::Challenge => 1,
            FileKind::Response => 2,
            FileKind::Combined => 3,
            FileKind::Phase2Query => 4,
            FileKind::Phase2Challenge => 5,
            FileKind::Phase2Response => 6,
            FileKind::Phase2Parameters => 7,
        }
    }

    fn from_id(id: u8) -> Option<Self> {
        Some(match id {
            1 => FileKind::Challenge,
            2 => FileKind::Response,
            3 => FileKind::Combined,
            4 => FileKind::Phase2Query,
            5 => FileKind::Phase2Challenge,
            6 => FileKind::Phase2Response,
            7 => FileKind::Phase2Parameters,
            _ => return None,
        })
    }

    pub fn magic(self) -> [u8; 4] {
        match self {
            FileKind::Challenge | FileKind::Response | FileKind::Combined => PHASE1_MAGIC,
            _ => PHASE2_MAGIC,
        }
    }

    /// Responses travel between participants and are stored compressed;
    /// everything else favours decoding speed.
    pub fn compression(self) -> Compress {
        match self {
            FileKind::Response | FileKind::Phase2Response => Compress::Yes,
            _ => Compress::No,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileHeader {
    pub kind: FileKind,
    pub curve: CurveKind,
    pub power: u32,
    pub chunk_size: u64,
    pub first_chunk: u32,
    pub chunk_count: u32,
    pub element_count: u64,
}

impl FileHeader {
    pub const LEN: usize = 4 + 2 + 1 + 1 + 4 + 8 + 4 + 4 + 8;

    /// Header of a phase-1 file covering `segment`.
    pub fn phase1(kind: FileKind, params: &CeremonyParams, segment: &Segment) -> Self {
        Self {
            kind,
            curve: params.curve,
            power: params.power as u32,
            chunk_size: params.chunk_size as u64,
            first_chunk: segment.first_chunk as u32,
            chunk_count: segment.chunk_count as u32,
            element_count: segment.element_count() as u64,
        }
    }

    pub fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.kind.magic())?;
        w.write_u16::<BigEndian>(FORMAT_VERSION)?;
        w.write_u8(self.kind.id())?;
        w.write_u8(self.curve.id())?;
        w.write_u32::<BigEndian>(self.power)?;
        w.write_u64::<BigEndian>(self.chunk_size)?;
        w.write_u32::<BigEndian>(self.first_chunk)?;
        w.write_u32::<BigEndian>(self.chunk_count)?;
        w.write_u64::<BigEndian>(self.element_count)?;
        Ok(())
    }

    pub fn read<R: Read>(r: &mut R) -> Result<Self> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic).map_err(truncated)?;
        if magic != PHASE1_MAGIC && magic != PHASE2_MAGIC {
            return Err(CeremonyError::FormatError(format!("unknown magic {:02x?}", magic)));
        }
        let version = r.read_u16::<BigEndian>().map_err(truncated)?;
        if version != FORMAT_VERSION {
            return Err(CeremonyError::FormatError(format!(
                "unsupported format version {} (expected {})",
                version, FORMAT_VERSION
            )));
        }
        let kind_id = r.read_u8().map_err(truncated)?;
        let kind = FileKind::from_id(kind_id)
            .ok_or_else(|| CeremonyError::FormatError(format!("unknown file kind {}", kind_id)))?;
        if kind.magic() != magic {
            return Err(CeremonyError::FormatError(format!("file kind {:?} under the wrong magic", kind)));
        }
        let curve_id = r.read_u8().map_err(truncated)?;
        let curve = CurveKind::from_id(curve_id)
            .ok_or_else(|| CeremonyError::FormatError(format!("unknown curve id {}", curve_id)))?;
        Ok(Self {
            kind,
            curve,
            power: r.read_u32::<BigEndian>().map_err(truncated)?,
            chunk_size: r.read_u64::<BigEndian>().map_err(truncated)?,
            first_chunk: r.read_u32::<BigEndian>().map_err(truncated)?,
            chunk_count: r.read_u32::<BigEndian>().map_err(truncated)?,
            element_count: r.read_u64::<BigEndian>().map_err(truncated)?,
        })
    }

    pub fn expect_kind(&self, kinds: &[FileKind]) -> Result<()> {
        if kinds.contains(&self.kind) {
            Ok(())
        } else {
            Err(CeremonyError::FormatError(format!(
                "expected a {:?} file, found {:?}",
                kinds, self.kind
            )))
        }
    }

    /// Checks the header against the invocation and returns the segment it
    /// declares.
    pub fn check_phase1(&self, params: &CeremonyParams) -> Result<Segment> {
        if self.curve != params.curve {
            return Err(CeremonyError::mismatch("curve", params.curve, self.curve));
        }
        if self.power as usize != params.power {
            return Err(CeremonyError::mismatch("power", params.power, self.power));
        }
        if self.chunk_size as usize != params.chunk_size {
            return Err(CeremonyError::mismatch("chunk size", params.chunk_size, self.chunk_size));
        }
        let segment = params.segment(self.first_chunk as usize, self.chunk_count as usize)?;
        if self.element_count as usize != segment.element_count() {
            return Err(CeremonyError::mismatch("element count", segment.element_count(), self.element_count));
        }
        Ok(segment)
    }

    /// Header of a phase-2 file. Phase-2 chunks split the delta stream, so the
    /// segment fields count stream chunks and stream elements.
    pub fn phase2(kind: FileKind, params: &CeremonyParams, first_chunk: usize, chunk_count: usize, element_count: usize) -> Self {
        Self {
            kind,
            curve: params.curve,
            power: params.power as u32,
            chunk_size: params.chunk_size as u64,
            first_chunk: first_chunk as u32,
            chunk_count: chunk_count as u32,
            element_count: element_count as u64,
        }
    }

    pub fn check_phase2(&self, params: &CeremonyParams) -> Result<()> {
        if self.curve != params.curve {
            return Err(CeremonyError::mismatch("curve", params.curve, self.curve));
        }
        if self.power as usize != params.power {
            return Err(CeremonyError::mismatch("power", params.power, self.power));
        }
        if self.chunk_size as usize != params.chunk_size {
            return Err(CeremonyError::mismatch("chunk size", params.chunk_size, self.chunk_size));
        }
        Ok(())
    }

    pub fn chunk_index(&self) -> usize {
        self.first_chunk as usize
    }
}

fn truncated(e: io::Error) -> CeremonyError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        CeremonyError::FormatError("file ends inside its header".to_string())
    } else {
        CeremonyError::IoError(e)
    }
}

/// Opens an artifact: parses the header, then checks the trailing content
/// hash over the whole file. The returned reader is positioned right after
/// the header.
pub fn open_checked(path: &Path) -> Result<(FileHeader, ElementReader<BufReader<File>>, Hash)> {
    let mut file = BufReader::with_capacity(READ_BUFFER, File::open(path)?);
    let header = FileHeader::read(&mut file)?;
    let (recomputed, declared) = hash_with_trailer(path)?;
    if recomputed != declared {
        return Err(CeremonyError::hash_mismatch(
            "content hash",
            header.chunk_index(),
            &declared,
            &recomputed,
        ));
    }
    debug!(path = %path.display(), kind = ?header.kind, "content hash verified");
    let compress = header.kind.compression();
    Ok((header, ElementReader::new(file, compress), recomputed))
}

/// Decodes group elements and raw fields from an artifact body.
pub struct ElementReader<R: Read> {
    inner: R,
    compress: Compress,
}

impl<R: Read> ElementReader<R> {
    pub fn new(inner: R, compress: Compress) -> Self {
        Self { inner, compress }
    }

    pub fn compression(&self) -> Compress {
        self.compress
    }

    pub fn read_element<P: CanonicalDeserialize>(&mut self) -> Result<P> {
        Ok(read_point(&mut self.inner, self.compress)?)
    }

    /// Reads `n` elements into `buf`, reusing its allocation.
    pub fn read_batch<'a, P: CanonicalDeserialize>(
        &mut self,
        buf: &'a mut BatchBuffer<P>,
        n: usize,
    ) -> Result<&'a [P]> {
        let compress = self.compress;
        let inner = &mut self.inner;
        let read = buf.refill(n, || read_point::<_, P>(inner, compress))?;
        if read.len() != n {
            return Err(CeremonyError::FormatError(format!(
                "batch of {} exceeds buffer capacity {}",
                n,
                read.len()
            )));
        }
        Ok(read)
    }

    /// Skips `n` elements of the encoded size `size`.
    pub fn skip(&mut self, n: usize, size: usize) -> Result<()> {
        let want = (n * size) as u64;
        let copied = io::copy(&mut (&mut self.inner).take(want), &mut io::sink())?;
        if copied != want {
            return Err(CeremonyError::FormatError("file ends inside an element section".to_string()));
        }
        Ok(())
    }

    pub fn read_hash(&mut self) -> Result<Hash> {
        let mut h = [0u8; HASH_LEN];
        self.inner.read_exact(&mut h)?;
        Ok(h)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(self.inner.read_u64::<BigEndian>()?)
    }
}

/// Encodes an artifact while hashing it; `finish` appends the digest.
pub struct ElementWriter<W: Write> {
    inner: HashWriter<W>,
    compress: Compress,
}

impl<W: Write> ElementWriter<W> {
    pub fn create(sink: W, header: &FileHeader) -> Result<Self> {
        let mut inner = HashWriter::new(sink);
        header.write(&mut inner)?;
        Ok(Self { inner, compress: header.kind.compression() })
    }

    pub fn write_element<P: CanonicalSerialize>(&mut self, p: &P) -> Result<()> {
        Ok(write_point(&mut self.inner, p, self.compress)?)
    }

    pub fn write_elements<P: CanonicalSerialize>(&mut self, ps: &[P]) -> Result<()> {
        for p in ps {
            write_point(&mut self.inner, p, self.compress)?;
        }
        Ok(())
    }

    pub fn write_hash(&mut self, h: &Hash) -> Result<()> {
        self.inner.write_all(h)?;
        Ok(())
    }

    pub fn write_u64(&mut self, v: u64) -> Result<()> {
        self.inner.write_u64::<BigEndian>(v)?;
        Ok(())
    }

    /// Appends the content hash and hands back the sink.
    pub fn finish(self) -> Result<(W, Hash)> {
        let (mut sink, hash) = self.inner.into_parts();
        sink.write_all(&hash)?;
        sink.flush()?;
        Ok((sink, hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::ContributionMode;
    use ark_bls12_381::G1Affine;
    use ark_ec::AffineRepr;

    fn header() -> FileHeader {
        let params = CeremonyParams::new(CurveKind::Bls12_381, 4, 4, 4, ContributionMode::Chunked).unwrap();
        FileHeader::phase1(FileKind::Challenge, &params, &params.chunk(2).unwrap())
    }

    #[test]
    fn test_header_roundtrip() {
        let h = header();
        let mut buf = Vec::new();
        h.write(&mut buf).unwrap();
        assert_eq!(buf.len(), FileHeader::LEN);
        assert_eq!(FileHeader::read(&mut buf.as_slice()).unwrap(), h);
    }

    #[test]
    fn test_header_rejects_bad_magic_and_version() {
        let mut buf = Vec::new();
        header().write(&mut buf).unwrap();

        let mut bad_magic = buf.clone();
        bad_magic[0] = b'X';
        assert!(matches!(FileHeader::read(&mut bad_magic.as_slice()), Err(CeremonyError::FormatError(_))));

        let mut bad_version = buf.clone();
        bad_version[5] = 9;
        assert!(matches!(FileHeader::read(&mut bad_version.as_slice()), Err(CeremonyError::FormatError(_))));

        assert!(matches!(FileHeader::read(&mut &buf[..7]), Err(CeremonyError::FormatError(_))));
    }

    #[test]
    fn test_header_parameter_checks() {
        let h = header();
        let other = CeremonyParams::new(CurveKind::Bls12_381, 5, 4, 4, ContributionMode::Chunked).unwrap();
        assert!(matches!(
            h.check_phase1(&other),
            Err(CeremonyError::ParameterMismatch { field: "power", .. })
        ));
        let bn = CeremonyParams::new(CurveKind::Bn254, 4, 4, 4, ContributionMode::Chunked).unwrap();
        assert!(matches!(
            h.check_phase1(&bn),
            Err(CeremonyError::ParameterMismatch { field: "curve", .. })
        ));
        let mut wrong_count = h.clone();
        wrong_count.element_count += 1;
        let same = CeremonyParams::new(CurveKind::Bls12_381, 4, 4, 4, ContributionMode::Chunked).unwrap();
        assert!(matches!(
            wrong_count.check_phase1(&same),
            Err(CeremonyError::ParameterMismatch { field: "element count", .. })
        ));
        assert_eq!(h.check_phase1(&same).unwrap().first_chunk, 2);
    }

    #[test]
    fn test_writer_appends_verifiable_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifact");
        let file = File::create(&path).unwrap();
        let mut w = ElementWriter::create(file, &header()).unwrap();
        w.write_elements(&[G1Affine::generator(); 3]).unwrap();
        let (_, hash) = w.finish().unwrap();

        let (h, mut r, recomputed) = open_checked(&path).unwrap();
        assert_eq!(h, header());
        assert_eq!(recomputed, hash);
        let mut buf = BatchBuffer::new(4);
        let got = r.read_batch::<G1Affine>(&mut buf, 3).unwrap();
        assert_eq!(got, &[G1Affine::generator(); 3]);

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[FileHeader::LEN + 1] ^= 0x01;
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(open_checked(&path), Err(CeremonyError::HashMismatch { .. })));
    }
}
