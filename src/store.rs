use std::collections::btree_map;
use std::collections::BTreeMap;
use std::io::{self, Cursor, Read, Write};
use std::path::Path;

use memmap2::Mmap;

use crate::archive::normalize_path;
use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;

pub const PATCH_EXTENSION: &str = "pat";
pub const RENAME_EXTENSION: &str = "ren";

#[derive(Debug, Clone, PartialEq)]
pub struct PatchRecord {
    pub target: Option<Fingerprint>,
    pub diff: Vec<u8>,
}

impl PatchRecord {
    pub fn new(target: Fingerprint, diff: Vec<u8>) -> Self {
        Self {
            target: Some(target),
            diff,
        }
    }

    /// A record with neither a target nor a diff: no change is expected.
    pub fn empty() -> Self {
        Self {
            target: None,
            diff: Vec::new(),
        }
    }

    pub fn is_empty_sentinel(&self) -> bool {
        self.target.is_none() && self.diff.is_empty()
    }
}

/// Patch chains keyed by normalized logical path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatchStore {
    chains: BTreeMap<String, Vec<PatchRecord>>,
}

impl PatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: &str, chain: Vec<PatchRecord>) {
        self.chains.insert(normalize_path(path), chain);
    }

    pub fn get(&self, path: &str) -> Option<&[PatchRecord]> {
        self.chains.get(path).map(Vec::as_slice)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.chains.contains_key(path)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Vec<PatchRecord>> {
        self.chains.iter()
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

/// Rename mappings: new logical path -> old logical path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenameStore {
    renames: BTreeMap<String, String>,
}

impl RenameStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, new_path: &str, old_path: &str) {
        self.renames
            .insert(normalize_path(new_path), normalize_path(old_path));
    }

    /// Consume a mapping once it has been applied.
    pub fn remove(&mut self, new_path: &str) -> Option<String> {
        self.renames.remove(new_path)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, String> {
        self.renames.iter()
    }

    pub fn len(&self) -> usize {
        self.renames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.renames.is_empty()
    }
}

/// Load a patch database. A missing file is `Error::NotFound`.
pub fn load_patch_store(path: &Path) -> Result<PatchStore> {
    let raw = match map_store(path)? {
        Some(raw) => raw,
        None => return Err(Error::NotFound(path.to_path_buf())),
    };
    let bytes: &[u8] = raw.as_deref().unwrap_or(&[]);
    parse_patch_store(bytes).map_err(|e| with_path(e, path))
}

/// Load a rename database. A missing file is an empty store.
pub fn load_rename_store(path: &Path) -> Result<RenameStore> {
    let raw = match map_store(path)? {
        Some(raw) => raw,
        None => return Ok(RenameStore::new()),
    };
    let bytes: &[u8] = raw.as_deref().unwrap_or(&[]);
    parse_rename_store(bytes).map_err(|e| with_path(e, path))
}

fn with_path(e: Error, path: &Path) -> Error {
    match e {
        Error::CorruptStore(msg) => Error::corrupt(format!("{}: {}", path.display(), msg)),
        other => other,
    }
}

/// `None` when the file does not exist, `Some(None)` when it is empty.
fn map_store(path: &Path) -> Result<Option<Option<Mmap>>> {
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if file.metadata()?.len() == 0 {
        return Ok(Some(None));
    }
    // SAFETY: read-only mapping; store files are not modified while patching.
    let mmap = unsafe { Mmap::map(&file)? };
    Ok(Some(Some(mmap)))
}

pub fn parse_patch_store(bytes: &[u8]) -> Result<PatchStore> {
    let mut reader = Cursor::new(bytes);
    let mut store = PatchStore::new();

    while (reader.position() as usize) < bytes.len() {
        let path = read_string(&mut reader)?;
        let count = read_u32(&mut reader)?;

        let mut chain = Vec::with_capacity(count.min(16) as usize);
        for _ in 0..count {
            let target = Fingerprint::read_from(&mut reader).map_err(eof_as_corrupt)?;
            let diff = read_bytes(&mut reader)?;
            chain.push(PatchRecord { target, diff });
        }
        store.insert(&path, chain);
    }

    Ok(store)
}

pub fn parse_rename_store(bytes: &[u8]) -> Result<RenameStore> {
    let mut reader = Cursor::new(bytes);
    let mut store = RenameStore::new();

    while (reader.position() as usize) < bytes.len() {
        let new_path = read_string(&mut reader)?;
        let old_path = read_string(&mut reader)?;
        store.insert(&new_path, &old_path);
    }

    Ok(store)
}

pub fn write_patch_store<W: Write>(store: &PatchStore, writer: &mut W) -> io::Result<()> {
    for (path, chain) in store.iter() {
        write_string(writer, path)?;
        writer.write_all(&(chain.len() as u32).to_le_bytes())?;
        for record in chain {
            Fingerprint::write_to(record.target.as_ref(), writer)?;
            writer.write_all(&(record.diff.len() as u32).to_le_bytes())?;
            writer.write_all(&record.diff)?;
        }
    }
    Ok(())
}

pub fn write_rename_store<W: Write>(store: &RenameStore, writer: &mut W) -> io::Result<()> {
    for (new_path, old_path) in store.iter() {
        write_string(writer, new_path)?;
        write_string(writer, old_path)?;
    }
    Ok(())
}

fn eof_as_corrupt(e: Error) -> Error {
    match e {
        Error::Io(io) if io.kind() == io::ErrorKind::UnexpectedEof => {
            Error::corrupt("unexpected end of data")
        }
        other => other,
    }
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    reader.read_exact(buf).map_err(|e| eof_as_corrupt(e.into()))
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    read_exact(reader, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_7bit_len<R: Read>(reader: &mut R) -> Result<usize> {
    let mut value: u32 = 0;
    for shift in (0..35).step_by(7) {
        let mut byte = [0u8; 1];
        read_exact(reader, &mut byte)?;
        value |= ((byte[0] & 0x7F) as u32) << shift;
        if byte[0] & 0x80 == 0 {
            return Ok(value as usize);
        }
    }
    Err(Error::corrupt("string length prefix too long"))
}

fn read_string(reader: &mut Cursor<&[u8]>) -> Result<String> {
    let len = read_7bit_len(reader)?;
    if len > remaining(reader) {
        return Err(Error::corrupt("string length exceeds the data remaining"));
    }
    let mut buf = vec![0u8; len];
    read_exact(reader, &mut buf)?;
    String::from_utf8(buf).map_err(|_| Error::corrupt("path is not valid UTF-8"))
}

fn read_bytes(reader: &mut Cursor<&[u8]>) -> Result<Vec<u8>> {
    let len = read_u32(reader)? as usize;
    let remaining = remaining(reader);
    if len > remaining {
        return Err(Error::corrupt(format!(
            "diff of {} bytes exceeds the {} bytes remaining",
            len, remaining
        )));
    }
    let mut buf = vec![0u8; len];
    read_exact(reader, &mut buf)?;
    Ok(buf)
}

fn remaining(reader: &Cursor<&[u8]>) -> usize {
    reader.get_ref().len().saturating_sub(reader.position() as usize)
}

fn write_string<W: Write>(writer: &mut W, value: &str) -> io::Result<()> {
    let mut len = value.len() as u32;
    while len >= 0x80 {
        writer.write_all(&[(len as u8) | 0x80])?;
        len >>= 7;
    }
    writer.write_all(&[len as u8])?;
    writer.write_all(value.as_bytes())
}
