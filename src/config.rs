use std::path::{Path, PathBuf};

use crate::archive::{normalize_path, CompressionOptions};
use crate::store::{PATCH_EXTENSION, RENAME_EXTENSION};

pub const DEFAULT_SILENT_SKIP_PREFIX: &str = "sound/voice";

/// Settings shared by every archive operation in a run.
#[derive(Debug, Clone)]
pub struct PatchConfig {
    /// Directory holding the `.pat` and `.ren` databases.
    pub patch_dir: PathBuf,
    /// Paths whose empty-sentinel records are skipped without a warning.
    pub silent_skip_prefixes: Vec<String>,
    /// Run every phase except saving.
    pub simulate: bool,
    /// Worker-pool size for the patch phase; `None` uses every core.
    pub workers: Option<usize>,
    pub compression: CompressionOptions,
    /// Rebuild outputs that already exist.
    pub overwrite: bool,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            patch_dir: PathBuf::from("."),
            silent_skip_prefixes: vec![DEFAULT_SILENT_SKIP_PREFIX.to_string()],
            simulate: false,
            workers: None,
            compression: CompressionOptions::default(),
            overwrite: false,
        }
    }
}

impl PatchConfig {
    pub fn is_silent_skip(&self, path: &str) -> bool {
        self.silent_skip_prefixes
            .iter()
            .any(|prefix| path.starts_with(&normalize_path(prefix)))
    }

    /// Describe the pair turning `source` into `output`, with its databases
    /// looked up in `patch_dir` by the output's file stem.
    pub fn pair(&self, source: impl Into<PathBuf>, output: impl Into<PathBuf>) -> ArchivePair {
        let source = source.into();
        let output = output.into();
        let stem = output
            .file_stem()
            .map(|s| s.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        ArchivePair {
            patch_db: self.patch_dir.join(format!("{}.{}", stem, PATCH_EXTENSION)),
            rename_db: self.patch_dir.join(format!("{}.{}", stem, RENAME_EXTENSION)),
            source,
            output,
        }
    }
}

/// One old-archive/new-archive operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivePair {
    pub source: PathBuf,
    pub output: PathBuf,
    pub patch_db: PathBuf,
    pub rename_db: PathBuf,
}

impl ArchivePair {
    /// Output path with the file name lower-cased.
    pub fn normalized_output(&self) -> PathBuf {
        lowercase_file_name(&self.output)
    }
}

fn lowercase_file_name(path: &Path) -> PathBuf {
    match path.file_name() {
        Some(name) => path.with_file_name(name.to_string_lossy().to_lowercase()),
        None => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_paths() {
        let config = PatchConfig {
            patch_dir: PathBuf::from("/data/patches"),
            ..PatchConfig::default()
        };
        let pair = config.pair("/game/Fallout - Sound.pak", "/out/TaleOfTwoWastelands - Sounds.pak");
        assert_eq!(
            pair.patch_db,
            PathBuf::from("/data/patches/taleoftwowastelands - sounds.pat")
        );
        assert_eq!(
            pair.rename_db,
            PathBuf::from("/data/patches/taleoftwowastelands - sounds.ren")
        );
        assert_eq!(
            pair.normalized_output(),
            PathBuf::from("/out/taleoftwowastelands - sounds.pak")
        );
    }

    #[test]
    fn test_silent_skip_prefixes() {
        let config = PatchConfig::default();
        assert!(config.is_silent_skip("sound/voice/npc/hello.ogg"));
        assert!(!config.is_silent_skip("sound/fx/ui/click.wav"));

        let config = PatchConfig {
            silent_skip_prefixes: vec!["Music\\".to_string()],
            ..PatchConfig::default()
        };
        assert!(config.is_silent_skip("music/theme.mp3"));
        assert!(!config.is_silent_skip("sound/voice/npc/hello.ogg"));
    }
}
