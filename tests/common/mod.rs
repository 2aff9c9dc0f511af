#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use arcpatch::archive::{Archive, CompressionOptions};
use arcpatch::bsdiff::{self, Control};
use arcpatch::config::{ArchivePair, PatchConfig};
use arcpatch::container::{Container, PackedContainer};
use arcpatch::fingerprint::Fingerprint;
use arcpatch::store::{self, PatchRecord, PatchStore, RenameStore};

/// BSDIFF40 payload turning `old` into `new`: one mix over the common prefix
/// length, the rest from the extra stream.
pub fn naive_diff(old: &[u8], new: &[u8]) -> Vec<u8> {
    let common = old.len().min(new.len());
    let diff: Vec<u8> = new[..common]
        .iter()
        .zip(&old[..common])
        .map(|(n, o)| n.wrapping_sub(*o))
        .collect();
    let extra = &new[common..];
    let controls = [Control {
        add: common as u64,
        copy: extra.len() as u64,
        seek: 0,
    }];
    bsdiff::pack(new.len() as u64, &controls, &diff, extra).unwrap()
}

/// Single-step chain upgrading `old` to `new`.
pub fn upgrade(old: &[u8], new: &[u8]) -> Vec<PatchRecord> {
    vec![PatchRecord::new(Fingerprint::of(new).unwrap(), naive_diff(old, new))]
}

/// Chain whose only record says `content` is already the target.
pub fn keep(content: &[u8]) -> Vec<PatchRecord> {
    vec![PatchRecord::new(Fingerprint::of(content).unwrap(), Vec::new())]
}

pub fn build_archive(files: &[(&str, &[u8])]) -> Archive {
    let mut archive = Archive::new(CompressionOptions::default());
    for (path, data) in files {
        archive.insert(path, data.to_vec());
    }
    archive
}

pub fn read_archive(path: &Path) -> Vec<(String, Vec<u8>)> {
    let archive = PackedContainer
        .open(path, CompressionOptions::default())
        .unwrap();
    let mut entries: Vec<(String, Vec<u8>)> = archive
        .entries()
        .map(|(id, entry)| (archive.path_of(id).unwrap(), entry.data().to_vec()))
        .collect();
    entries.sort();
    entries
}

/// A scratch directory holding a packed source archive and its databases.
pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub config: PatchConfig,
    pub pair: ArchivePair,
}

impl Fixture {
    pub fn new(files: &[(&str, &[u8])], patches: &PatchStore, renames: Option<&RenameStore>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let patch_dir = dir.path().join("patches");
        fs::create_dir_all(&patch_dir).unwrap();

        let source = dir.path().join("old.pak");
        PackedContainer.save(&build_archive(files), &source).unwrap();

        let config = PatchConfig {
            patch_dir,
            workers: Some(2),
            ..PatchConfig::default()
        };
        let pair = config.pair(source, dir.path().join("out").join("New.pak"));

        let mut file = fs::File::create(&pair.patch_db).unwrap();
        store::write_patch_store(patches, &mut file).unwrap();
        if let Some(renames) = renames {
            let mut file = fs::File::create(&pair.rename_db).unwrap();
            store::write_rename_store(renames, &mut file).unwrap();
        }

        Self { dir, config, pair }
    }

    pub fn output(&self) -> PathBuf {
        self.pair.normalized_output()
    }

    pub fn output_entries(&self) -> Vec<(String, Vec<u8>)> {
        read_archive(&self.output())
    }
}
