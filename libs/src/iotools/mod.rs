use blake2::{Blake2b512, Digest};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const HASH_LEN: usize = 64;

/// Blake2b-512 digest used for every content hash and hash-chain link.
pub type Hash = [u8; HASH_LEN];

#[macro_export]
macro_rules! impl_read_from_json {
    ($t:ty) => {
        impl $t {
            pub fn read_from_json(path: impl AsRef<std::path::Path>) -> std::io::Result<Self> {
                use serde_json::from_reader;
                use std::fs::File;
                use std::io::BufReader;
                let file = File::open(path.as_ref())?;
                let reader = BufReader::new(file);
                let res: Self = from_reader(reader)?;
                Ok(res)
            }
        }
    };
}

#[macro_export]
macro_rules! impl_write_into_json {
    ($t:ty) => {
        impl $t {
            pub fn write_into_json(&self, path: impl AsRef<std::path::Path>) -> std::io::Result<()> {
                use serde_json::to_writer_pretty;
                use std::fs::{self, File};
                use std::io::{BufWriter, Write};
                let path = path.as_ref();
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        fs::create_dir_all(parent)?;
                    }
                }
                let file = File::create(path)?;
                let mut writer = BufWriter::new(file);
                to_writer_pretty(&mut writer, self)?;
                writer.flush()?;
                Ok(())
            }
        }
    };
}

pub fn hash_bytes(bytes: &[u8]) -> Hash {
    let mut out = [0u8; HASH_LEN];
    out.copy_from_slice(&Blake2b512::digest(bytes));
    out
}

/// Hash of the empty input; the link a fresh ceremony starts from.
pub fn blank_hash() -> Hash {
    hash_bytes(&[])
}

/// Hex rendering of a hash in four rows of sixteen bytes.
pub fn format_hash(hash: &Hash) -> String {
    hash.chunks(16)
        .map(|row| {
            row.chunks(4)
                .map(hex::encode)
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Writer that feeds every byte it forwards into a Blake2b-512 state.
pub struct HashWriter<W: Write> {
    inner: W,
    hasher: Blake2b512,
    written: u64,
}

impl<W: Write> HashWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, hasher: Blake2b512::new(), written: 0 }
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// Digest of everything written so far. The writer keeps hashing.
    pub fn current_hash(&self) -> Hash {
        let mut out = [0u8; HASH_LEN];
        out.copy_from_slice(&self.hasher.clone().finalize());
        out
    }

    pub fn into_parts(self) -> (W, Hash) {
        let mut out = [0u8; HASH_LEN];
        out.copy_from_slice(&self.hasher.finalize());
        (self.inner, out)
    }
}

impl<W: Write> Write for HashWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Reader counterpart of [`HashWriter`].
pub struct HashReader<R: Read> {
    inner: R,
    hasher: Blake2b512,
}

impl<R: Read> HashReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, hasher: Blake2b512::new() }
    }

    pub fn into_parts(self) -> (R, Hash) {
        let mut out = [0u8; HASH_LEN];
        out.copy_from_slice(&self.hasher.finalize());
        (self.inner, out)
    }
}

impl<R: Read> Read for HashReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}

/// Streams a file whose last [`HASH_LEN`] bytes are a digest of everything
/// before them. Returns `(recomputed, declared)`.
pub fn hash_with_trailer(path: &Path) -> io::Result<(Hash, Hash)> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    if len < HASH_LEN as u64 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("{} is too short to carry a content hash", path.display()),
        ));
    }
    let body_len = len - HASH_LEN as u64;
    let mut hashing = HashReader::new(BufReader::new((&mut file).take(body_len)));
    io::copy(&mut hashing, &mut io::sink())?;
    let (_, recomputed) = hashing.into_parts();

    file.seek(SeekFrom::Start(body_len))?;
    let mut declared = [0u8; HASH_LEN];
    file.read_exact(&mut declared)?;
    Ok((recomputed, declared))
}

/// Output file that only appears at its final path once [`commit`] is called.
/// Dropping it without committing removes the partial data.
///
/// [`commit`]: AtomicOutput::commit
pub struct AtomicOutput {
    writer: BufWriter<NamedTempFile>,
    target: PathBuf,
}

impl AtomicOutput {
    pub fn create(target: impl AsRef<Path>) -> io::Result<Self> {
        let target = target.as_ref().to_path_buf();
        let dir = match target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;
        let tmp = NamedTempFile::new_in(&dir)?;
        Ok(Self { writer: BufWriter::with_capacity(1 << 16, tmp), target })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn commit(self) -> io::Result<()> {
        let tmp = self.writer.into_inner().map_err(|e| e.into_error())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.target).map_err(|e| e.error)?;
        Ok(())
    }
}

impl Write for AtomicOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_writer_matches_one_shot() {
        let mut w = HashWriter::new(Vec::new());
        w.write_all(b"hello ").unwrap();
        w.write_all(b"world").unwrap();
        assert_eq!(w.written(), 11);
        let (bytes, h) = w.into_parts();
        assert_eq!(bytes, b"hello world");
        assert_eq!(h, hash_bytes(b"hello world"));
        assert_ne!(h, blank_hash());
    }

    #[test]
    fn test_hash_with_trailer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        let body = vec![7u8; 100_000];
        let mut data = body.clone();
        data.extend_from_slice(&hash_bytes(&body));
        fs::write(&path, &data).unwrap();
        let (recomputed, declared) = hash_with_trailer(&path).unwrap();
        assert_eq!(recomputed, declared);

        data[10] ^= 1;
        fs::write(&path, &data).unwrap();
        let (recomputed, declared) = hash_with_trailer(&path).unwrap();
        assert_ne!(recomputed, declared);

        fs::write(&path, [0u8; 10]).unwrap();
        assert!(hash_with_trailer(&path).is_err());
    }

    #[test]
    fn test_atomic_output_only_appears_on_commit() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.bin");
        {
            let mut out = AtomicOutput::create(&target).unwrap();
            out.write_all(b"partial").unwrap();
        }
        assert!(!target.exists(), "dropped output must not be persisted");

        let mut out = AtomicOutput::create(&target).unwrap();
        out.write_all(b"complete").unwrap();
        out.commit().unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"complete");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_format_hash_rows() {
        let text = format_hash(&blank_hash());
        assert_eq!(text.lines().count(), 4);
        assert!(text.lines().all(|l| l.split(' ').count() == 4));
    }
}
