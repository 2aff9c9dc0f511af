use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::archive::{normalize_path, Archive, CompressionOptions};

pub const PACK_MAGIC: &[u8; 8] = b"ARCPAK01";
pub const PACK_FORMAT_VERSION: u32 = 1;

pub trait Container: Send + Sync {
    fn open(&self, path: &Path, options: CompressionOptions) -> Result<Archive>;
    fn save(&self, archive: &Archive, path: &Path) -> Result<()>;
}

/// Pick a container for an existing source path: directories are trees, anything
/// else is a packed file.
pub fn for_path(path: &Path) -> Box<dyn Container> {
    if path.is_dir() {
        Box::new(DirectoryContainer)
    } else {
        Box::new(PackedContainer)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PackManifest {
    version: u32,
    folders: Vec<PackedFolder>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PackedFolder {
    path: String,
    entries: Vec<PackedEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PackedEntry {
    name: String,
    data: Vec<u8>,
    blake3_hash: [u8; 32],
}

/// Single file: magic, then a zstd-compressed bincode manifest. Every entry carries
/// a BLAKE3 hash that is checked on open.
#[derive(Debug, Default, Clone, Copy)]
pub struct PackedContainer;

impl Container for PackedContainer {
    fn open(&self, path: &Path, options: CompressionOptions) -> Result<Archive> {
        let raw = mmap_file(path)?;

        if raw.len() < PACK_MAGIC.len() || &raw[..PACK_MAGIC.len()] != PACK_MAGIC {
            bail!("Invalid archive {}: missing magic header", path.display());
        }

        let decoder = zstd::Decoder::new(&raw[PACK_MAGIC.len()..])
            .context("Failed to create zstd decoder")?;
        let manifest: PackManifest = bincode::deserialize_from(decoder)
            .with_context(|| format!("Failed to deserialize archive: {}", path.display()))?;

        if manifest.version != PACK_FORMAT_VERSION {
            bail!(
                "Unsupported archive version: {} (expected {})",
                manifest.version,
                PACK_FORMAT_VERSION
            );
        }

        let mut archive = Archive::new(options);
        for folder in manifest.folders {
            let id = archive.add_folder(&folder.path);
            for entry in folder.entries {
                if *blake3::hash(&entry.data).as_bytes() != entry.blake3_hash {
                    bail!(
                        "Checksum mismatch for {}/{} in {}",
                        folder.path,
                        entry.name,
                        path.display()
                    );
                }
                archive.add_entry(id, &entry.name, entry.data);
            }
        }
        Ok(archive)
    }

    fn save(&self, archive: &Archive, path: &Path) -> Result<()> {
        let folders = archive
            .folders()
            .map(|(_, folder)| PackedFolder {
                path: folder.path().to_string(),
                entries: folder
                    .entries()
                    .iter()
                    .filter_map(|&id| archive.entry(id))
                    .map(|entry| PackedEntry {
                        name: entry.name().to_string(),
                        data: entry.data().to_vec(),
                        blake3_hash: *blake3::hash(entry.data()).as_bytes(),
                    })
                    .collect(),
            })
            .collect();
        let manifest = PackManifest {
            version: PACK_FORMAT_VERSION,
            folders,
        };

        let encoded = bincode::serialize(&manifest).context("Failed to serialize archive")?;
        let compressed = zstd::bulk::compress(&encoded, archive.options().level)
            .context("Failed to compress archive")?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let mut file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create archive: {}", path.display()))?;
        file.write_all(PACK_MAGIC)?;
        file.write_all(&compressed)?;
        file.flush()?;
        Ok(())
    }
}

/// A directory tree: each sub-directory is a folder, each file an entry.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectoryContainer;

impl Container for DirectoryContainer {
    fn open(&self, path: &Path, options: CompressionOptions) -> Result<Archive> {
        let root = path
            .canonicalize()
            .with_context(|| format!("Failed to canonicalize path: {}", path.display()))?;

        let mut files: Vec<(String, PathBuf)> = Vec::new();
        for entry in WalkDir::new(&root).min_depth(1) {
            let entry = entry
                .with_context(|| format!("Failed to read directory entry in {}", root.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&root)
                .with_context(|| "Failed to compute relative path")?;
            let relative = relative
                .to_str()
                .with_context(|| format!("Non-UTF8 path: {}", relative.display()))?;
            files.push((normalize_path(relative), entry.path().to_path_buf()));
        }
        files.sort();

        let mut archive = Archive::new(options);
        for (logical, full) in files {
            let data = std::fs::read(&full)
                .with_context(|| format!("Failed to read file: {}", full.display()))?;
            archive.insert(&logical, data);
        }
        Ok(archive)
    }

    fn save(&self, archive: &Archive, path: &Path) -> Result<()> {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory: {}", path.display()))?;

        for (id, entry) in archive.entries() {
            let Some(logical) = archive.path_of(id) else {
                continue;
            };
            let full = path.join(&logical);
            if let Some(parent) = full.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&full, entry.data())
                .with_context(|| format!("Failed to write file: {}", full.display()))?;
        }
        Ok(())
    }
}

/// Memory-map a file for read-only access.
///
/// # Safety
/// The mapping is read-only. Callers must not concurrently truncate or replace
/// the underlying file while the `Mmap` is live.
fn mmap_file(path: &Path) -> Result<Mmap> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open file: {}", path.display()))?;
    // SAFETY: We only read from this mapping; archives are not modified while open.
    unsafe {
        Mmap::map(&file).with_context(|| format!("Failed to memory-map file: {}", path.display()))
    }
}
