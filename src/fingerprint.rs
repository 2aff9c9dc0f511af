use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::OnceLock;

use md5::{Digest, Md5};

use crate::error::{Error, Result};
use crate::murmur::Murmur3x64;

pub const DIGEST_LEN: usize = 16;

/// Tag byte written in place of a fingerprint when a record has none.
pub const NO_FINGERPRINT_TAG: u8 = 0xFF;

/// Size recorded by every [`Algorithm::LegacyHash128`] fingerprint. Legacy
/// checksum data never carried the content length.
pub const LEGACY_SIZE: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Algorithm {
    /// MurmurHash3 x64 128-bit. Used for all new content.
    #[default]
    ContentHash128,
    /// MD5, kept for older checksum data.
    LegacyHash128,
}

impl Algorithm {
    pub fn tag(self) -> u8 {
        match self {
            Algorithm::ContentHash128 => 0,
            Algorithm::LegacyHash128 => 1,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Algorithm::ContentHash128),
            1 => Some(Algorithm::LegacyHash128),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Algorithm::ContentHash128 => "ContentHash128",
            Algorithm::LegacyHash128 => "LegacyHash128",
        }
    }
}

#[derive(Debug, Clone, Copy, Eq)]
pub struct Fingerprint {
    algorithm: Algorithm,
    size: u32,
    digest: [u8; DIGEST_LEN],
}

impl Fingerprint {
    pub fn new(algorithm: Algorithm, size: u32, digest: [u8; DIGEST_LEN]) -> Result<Self> {
        if size == 0 {
            return Err(Error::invalid_input("fingerprint size must be non-zero"));
        }
        Ok(Self {
            algorithm,
            size,
            digest,
        })
    }

    /// Fingerprint a buffer with the default algorithm.
    pub fn of(data: &[u8]) -> Result<Self> {
        Self::of_with(data, Algorithm::default())
    }

    pub fn of_with(data: &[u8], algorithm: Algorithm) -> Result<Self> {
        let size = checked_size(data.len() as u64)?;
        let mut hasher = ContentHasher::new(algorithm);
        hasher.update(data);
        Ok(Self {
            algorithm,
            size: recorded_size(algorithm, size),
            digest: hasher.finish(),
        })
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn digest(&self) -> &[u8; DIGEST_LEN] {
        &self.digest
    }

    /// Read an optional fingerprint: a tag byte, then size and digest unless the tag
    /// is [`NO_FINGERPRINT_TAG`].
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Option<Self>> {
        let mut tag = [0u8; 1];
        reader.read_exact(&mut tag)?;
        if tag[0] == NO_FINGERPRINT_TAG {
            return Ok(None);
        }
        let algorithm = Algorithm::from_tag(tag[0])
            .ok_or_else(|| Error::corrupt(format!("unknown fingerprint algorithm tag {}", tag[0])))?;

        let mut size = [0u8; 4];
        reader.read_exact(&mut size)?;
        let mut digest = [0u8; DIGEST_LEN];
        reader.read_exact(&mut digest)?;

        let size = u32::from_le_bytes(size);
        if size == 0 {
            return Err(Error::corrupt("fingerprint with zero size"));
        }
        Ok(Some(Self {
            algorithm,
            size,
            digest,
        }))
    }

    pub fn write_to<W: Write>(fingerprint: Option<&Self>, writer: &mut W) -> io::Result<()> {
        match fingerprint {
            Some(fp) => {
                writer.write_all(&[fp.algorithm.tag()])?;
                writer.write_all(&fp.size.to_le_bytes())?;
                writer.write_all(&fp.digest)
            }
            None => writer.write_all(&[NO_FINGERPRINT_TAG]),
        }
    }
}

impl PartialEq for Fingerprint {
    fn eq(&self, other: &Self) -> bool {
        debug_assert_eq!(
            self.algorithm, other.algorithm,
            "fingerprints of different algorithms compared"
        );
        self.size == other.size && self.digest == other.digest
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {} bytes, {})",
            hex::encode(self.digest),
            self.size,
            self.algorithm.name()
        )
    }
}

fn recorded_size(algorithm: Algorithm, size: u32) -> u32 {
    match algorithm {
        Algorithm::ContentHash128 => size,
        Algorithm::LegacyHash128 => LEGACY_SIZE,
    }
}

fn checked_size(len: u64) -> Result<u32> {
    if len == 0 {
        return Err(Error::invalid_input("source must have contents"));
    }
    u32::try_from(len).map_err(|_| Error::invalid_input(format!("source too large: {} bytes", len)))
}

enum ContentHasher {
    Content(Murmur3x64),
    Legacy(Md5),
}

impl ContentHasher {
    fn new(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::ContentHash128 => ContentHasher::Content(Murmur3x64::new()),
            Algorithm::LegacyHash128 => ContentHasher::Legacy(Md5::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            ContentHasher::Content(h) => h.update(data),
            ContentHasher::Legacy(h) => h.update(data),
        }
    }

    fn finish(self) -> [u8; DIGEST_LEN] {
        match self {
            ContentHasher::Content(h) => h.finish(),
            ContentHasher::Legacy(h) => {
                // Shorter cryptographic digests are zero-padded to the fixed width.
                let mut digest = [0u8; DIGEST_LEN];
                let md5 = h.finalize();
                let n = md5.len().min(DIGEST_LEN);
                digest[..n].copy_from_slice(&md5[..n]);
                digest
            }
        }
    }
}

impl Write for ContentHasher {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Owns a byte source until its fingerprint is computed.
///
/// `compute` consumes the builder, so the source (a file handle, a decompressing
/// stream) is dropped on every exit path, including read errors.
pub struct FingerprintBuilder<R> {
    reader: R,
    size: u32,
    algorithm: Algorithm,
}

impl FingerprintBuilder<File> {
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::NotFound(path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };
        let len = file.metadata()?.len();
        Self::from_reader(file, len)
    }
}

impl<R: Read> FingerprintBuilder<R> {
    /// `len` is the number of bytes the reader yields; it is recorded as the size.
    pub fn from_reader(reader: R, len: u64) -> Result<Self> {
        Ok(Self {
            reader,
            size: checked_size(len)?,
            algorithm: Algorithm::default(),
        })
    }

    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn compute(self) -> Result<Fingerprint> {
        let Self {
            reader,
            size,
            algorithm,
        } = self;
        let mut hasher = ContentHasher::new(algorithm);
        let mut reader = io::BufReader::with_capacity(256 * 1024, reader);
        let read = io::copy(&mut reader, &mut hasher)?;
        if read != size as u64 {
            return Err(Error::invalid_input(format!(
                "source yielded {} bytes, expected {}",
                read, size
            )));
        }
        Ok(Fingerprint {
            algorithm,
            size: recorded_size(algorithm, size),
            digest: hasher.finish(),
        })
    }
}

/// Fingerprint of a borrowed buffer, hashed on first access and memoized.
///
/// The size is known up front, so callers that only need to know the content
/// exists never pay for hashing.
pub struct LazyFingerprint<'a> {
    data: &'a [u8],
    size: u32,
    algorithm: Algorithm,
    cell: OnceLock<Fingerprint>,
}

impl<'a> LazyFingerprint<'a> {
    pub fn new(data: &'a [u8]) -> Result<Self> {
        Ok(Self {
            data,
            size: checked_size(data.len() as u64)?,
            algorithm: Algorithm::default(),
            cell: OnceLock::new(),
        })
    }

    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self.cell = OnceLock::new();
        self
    }

    /// Content length, whatever size the fingerprint records.
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn is_computed(&self) -> bool {
        self.cell.get().is_some()
    }

    pub fn get(&self) -> &Fingerprint {
        self.cell.get_or_init(|| {
            let mut hasher = ContentHasher::new(self.algorithm);
            hasher.update(self.data);
            Fingerprint {
                algorithm: self.algorithm,
                size: recorded_size(self.algorithm, self.size),
                digest: hasher.finish(),
            }
        })
    }
}
