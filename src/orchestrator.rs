use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::archive::{Archive, EntryId};
use crate::bsdiff;
use crate::config::{ArchivePair, PatchConfig};
use crate::container::{self, Container};
use crate::error::{Error, Result};
use crate::fingerprint::{Fingerprint, LazyFingerprint};
use crate::progress::{CancellationToken, Operation, ProgressSink, Scale};
use crate::store::{self, PatchRecord, PatchStore, RenameStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    OpenArchive,
    LoadRenames,
    LoadPatches,
    ApplyRenames,
    ApplyPatches,
    Prune,
    Save,
}

impl Phase {
    pub const ALL: [Phase; 7] = [
        Phase::OpenArchive,
        Phase::LoadRenames,
        Phase::LoadPatches,
        Phase::ApplyRenames,
        Phase::ApplyPatches,
        Phase::Prune,
        Phase::Save,
    ];
}

/// What happened to one patch-store path.
#[derive(Debug)]
pub enum EntryOutcome {
    /// Content already matched every target in the chain.
    AlreadyCurrent,
    /// `applied` diffs were applied and verified; the new content was committed.
    Patched { applied: usize },
    /// Empty-sentinel record. `silent` paths are expected to carry one.
    Skipped { silent: bool },
    /// No archive entry (or an empty one) for the path.
    NotFound,
    /// The entry keeps its original content.
    Failed(Error),
    /// Cancellation was observed before the entry was dispatched.
    NotRun,
}

impl EntryOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, EntryOutcome::Failed(_))
    }
}

#[derive(Debug)]
pub enum Event {
    PhaseStarted(Phase),
    PhaseFinished(Phase),
    Renamed { from: String, to: String },
    RenameUnresolved { new_path: String, old_path: String },
    Entry { path: String, outcome: EntryOutcome },
    Pruned { entries: usize, folders: usize },
    Saved { path: PathBuf },
    SaveSkipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchStats {
    pub renamed: usize,
    pub unresolved_renames: usize,
    pub already_current: usize,
    pub patched: usize,
    pub skipped: usize,
    pub missing: usize,
    pub failed: usize,
    pub pruned_entries: usize,
    pub pruned_folders: usize,
}

#[derive(Debug)]
pub struct PatchReport {
    pub outcome: Outcome,
    pub events: Vec<Event>,
    pub stats: PatchStats,
}

impl PatchReport {
    /// Completed with every patched entry verified. Missing entries and unresolved
    /// renames do not count against success.
    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Completed && self.stats.failed == 0
    }

    /// Successful and nothing was missing.
    pub fn is_complete(&self) -> bool {
        self.is_success() && self.stats.missing == 0 && self.stats.unresolved_renames == 0
    }

    pub fn entry_outcome(&self, path: &str) -> Option<&EntryOutcome> {
        self.events.iter().find_map(|event| match event {
            Event::Entry { path: p, outcome } if p == path => Some(outcome),
            _ => None,
        })
    }
}

pub struct ArchivePatcher<'a> {
    config: &'a PatchConfig,
    progress: &'a dyn ProgressSink,
    cancel: CancellationToken,
    container: Option<Box<dyn Container>>,
}

impl<'a> ArchivePatcher<'a> {
    pub fn new(
        config: &'a PatchConfig,
        progress: &'a dyn ProgressSink,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            progress,
            cancel,
            container: None,
        }
    }

    /// Use a fixed container instead of choosing one from the source path.
    pub fn with_container(mut self, container: Box<dyn Container>) -> Self {
        self.container = Some(container);
        self
    }

    pub fn config(&self) -> &PatchConfig {
        self.config
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run every phase for one pair.
    ///
    /// Errors are reserved for failures that stop the pair: a missing patch
    /// database, an unreadable archive or store, or a failed save. Per-entry
    /// problems are reported in the returned [`PatchReport`].
    pub fn patch_archive(&self, pair: &ArchivePair) -> Result<PatchReport> {
        let mut tracker = Tracker::new(self.progress);
        let outcome = self.run(pair, &mut tracker)?;
        if outcome == Outcome::Cancelled {
            log::info!("Patching {} cancelled", pair.source.display());
        }
        Ok(tracker.finish(outcome))
    }

    fn run(&self, pair: &ArchivePair, t: &mut Tracker<'_>) -> Result<Outcome> {
        let fallback;
        let container: &dyn Container = match &self.container {
            Some(c) => c.as_ref(),
            None => {
                fallback = container::for_path(&pair.source);
                fallback.as_ref()
            }
        };

        t.begin(Phase::OpenArchive, format!("Opening {}", file_name(&pair.source)));
        let mut archive = container.open(&pair.source, self.config.compression)?;
        t.end(Phase::OpenArchive);

        t.begin(Phase::LoadRenames, "Opening rename database".to_string());
        let mut renames = store::load_rename_store(&pair.rename_db)?;
        t.end(Phase::LoadRenames);

        t.begin(Phase::LoadPatches, "Opening patch database".to_string());
        let patches = match store::load_patch_store(&pair.patch_db) {
            Ok(patches) => patches,
            Err(e @ Error::NotFound(_)) => {
                log::warn!("No patch database is available for: {}", pair.source.display());
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        t.end(Phase::LoadPatches);

        if self.cancel.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }

        t.begin(Phase::ApplyRenames, "Renaming entries".to_string());
        self.resolve_renames(&mut archive, &mut renames, t);
        t.end(Phase::ApplyRenames);

        t.begin(Phase::ApplyPatches, "Patching entries".to_string());
        let commits = match self.patch_entries(&archive, &patches, t)? {
            Some(commits) => commits,
            None => return Ok(Outcome::Cancelled),
        };
        for (id, data) in commits {
            archive.replace_contents(id, data);
        }
        t.end(Phase::ApplyPatches);

        t.begin(Phase::Prune, "Removing unnecessary files".to_string());
        let entries = archive.remove_entries_where(|path, _| !patches.contains(path));
        let folders = archive.remove_empty_folders();
        log::debug!("Pruned {} entries and {} empty folders", entries, folders);
        t.push(Event::Pruned { entries, folders });
        t.end(Phase::Prune);

        if self.cancel.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }

        let output = pair.normalized_output();
        t.begin(Phase::Save, format!("Building {}", file_name(&output)));
        if self.config.simulate {
            log::info!("Simulation: not writing {}", output.display());
            t.push(Event::SaveSkipped);
        } else {
            container.save(&archive, &output)?;
            t.push(Event::Saved { path: output });
        }
        t.end(Phase::Save);

        Ok(Outcome::Completed)
    }

    fn resolve_renames(&self, archive: &mut Archive, renames: &mut RenameStore, t: &mut Tracker<'_>) {
        // Resolve against the archive as it stood before any copy was made.
        let resolved: Vec<(String, String, Vec<u8>)> = renames
            .iter()
            .filter_map(|(new_path, old_path)| {
                let id = archive.find(old_path)?;
                let data = archive.entry(id)?.data().to_vec();
                Some((new_path.clone(), old_path.clone(), data))
            })
            .collect();

        let mut op = Operation::new(self.progress, Scale::Entry, resolved.len());
        op.set_current_operation("Renaming entries");

        for (new_path, old_path, data) in resolved {
            archive.insert(&new_path, data);
            renames.remove(&new_path);
            log::debug!("Renamed {} -> {}", old_path, new_path);
            t.push(Event::Renamed {
                from: old_path,
                to: new_path,
            });
            op.step();
        }

        for (new_path, old_path) in renames.iter() {
            log::warn!("File not found: {}", old_path);
            log::warn!("\tCannot create: {}", new_path);
            t.push(Event::RenameUnresolved {
                new_path: new_path.clone(),
                old_path: old_path.clone(),
            });
        }
    }

    /// Returns the verified replacements, or `None` if cancellation was observed.
    fn patch_entries(
        &self,
        archive: &Archive,
        patches: &PatchStore,
        t: &mut Tracker<'_>,
    ) -> Result<Option<Vec<(EntryId, Vec<u8>)>>> {
        if self.cancel.is_cancelled() {
            return Ok(None);
        }

        let mut jobs: Vec<Job<'_>> = Vec::with_capacity(patches.len());
        for (path, chain) in patches.iter() {
            // Empty content has no fingerprint and counts as missing.
            let found = archive.find(path).and_then(|id| {
                let current = LazyFingerprint::new(archive.entry(id)?.data()).ok()?;
                Some((id, current))
            });
            match found {
                Some((id, current)) => jobs.push(Job {
                    id,
                    path,
                    current,
                    chain,
                }),
                None => {
                    log::warn!("File not found: {}", path);
                    t.push(Event::Entry {
                        path: path.clone(),
                        outcome: EntryOutcome::NotFound,
                    });
                }
            }
        }

        let mut op = Operation::new(self.progress, Scale::Entry, jobs.len());
        op.set_current_operation("Validating and patching entries");

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers.unwrap_or(0))
            .build()?;
        let results: Vec<(EntryOutcome, Option<Vec<u8>>)> = pool.install(|| {
            jobs.par_iter()
                .map(|job| {
                    if self.cancel.is_cancelled() {
                        return (EntryOutcome::NotRun, None);
                    }
                    let result = self.patch_entry(job.path, &job.current, job.chain);
                    op.step();
                    result
                })
                .collect()
        });

        if self.cancel.is_cancelled() {
            return Ok(None);
        }

        let mut commits = Vec::new();
        for (job, (outcome, data)) in jobs.iter().zip(results) {
            log_outcome(job.path, &outcome);
            if let Some(data) = data {
                commits.push((job.id, data));
            }
            t.push(Event::Entry {
                path: job.path.clone(),
                outcome,
            });
        }
        Ok(Some(commits))
    }

    /// Walk one patch chain. The new content is returned only when every record
    /// verified and at least one diff was applied.
    ///
    /// The original content is hashed through `original` at most once; any other
    /// fingerprint of the current content is computed once per algorithm.
    fn patch_entry(
        &self,
        path: &str,
        original: &LazyFingerprint<'_>,
        chain: &[PatchRecord],
    ) -> (EntryOutcome, Option<Vec<u8>>) {
        let mut patched: Option<Vec<u8>> = None;
        let mut known: Vec<Fingerprint> = Vec::new();
        let mut applied = 0;

        for record in chain {
            if record.is_empty_sentinel() {
                if applied > 0 {
                    break;
                }
                let silent = self.config.is_silent_skip(path);
                return (EntryOutcome::Skipped { silent }, None);
            }
            let Some(target) = record.target else {
                let err = Error::corrupt(format!("record for {} has a diff but no target", path));
                return (EntryOutcome::Failed(err), None);
            };

            let content = patched.as_deref().unwrap_or(original.data());
            let current = if patched.is_none() && original.algorithm() == target.algorithm() {
                *original.get()
            } else if let Some(fp) = known.iter().find(|fp| fp.algorithm() == target.algorithm()) {
                *fp
            } else {
                match Fingerprint::of_with(content, target.algorithm()) {
                    Ok(fp) => {
                        known.push(fp);
                        fp
                    }
                    Err(e) => return (EntryOutcome::Failed(e), None),
                }
            };
            if current == target {
                continue;
            }

            if record.diff.is_empty() {
                let err = Error::Unpatchable {
                    path: path.to_string(),
                    actual: current,
                };
                return (EntryOutcome::Failed(err), None);
            }

            let output = match bsdiff::apply(content, &record.diff) {
                Ok(output) => output,
                Err(e) => return (EntryOutcome::Failed(e), None),
            };
            let actual = match Fingerprint::of_with(&output, target.algorithm()) {
                Ok(fp) => fp,
                Err(_) => {
                    let err = Error::malformed(format!("patch for {} produced no output", path));
                    return (EntryOutcome::Failed(err), None);
                }
            };
            if actual != target {
                let err = Error::VerificationMismatch {
                    path: path.to_string(),
                    expected: target,
                    actual,
                };
                return (EntryOutcome::Failed(err), None);
            }

            patched = Some(output);
            known.clear();
            known.push(actual);
            applied += 1;
        }

        match patched {
            Some(data) => (EntryOutcome::Patched { applied }, Some(data)),
            None => (EntryOutcome::AlreadyCurrent, None),
        }
    }
}

/// One joined store key: the entry handle, its lazily hashed content and the chain.
struct Job<'a> {
    id: EntryId,
    path: &'a String,
    current: LazyFingerprint<'a>,
    chain: &'a [PatchRecord],
}

fn log_outcome(path: &str, outcome: &EntryOutcome) {
    match outcome {
        EntryOutcome::AlreadyCurrent => log::trace!("{} is up to date", path),
        EntryOutcome::Patched { applied } => log::debug!("Patched {} ({} diffs)", path, applied),
        EntryOutcome::Skipped { silent: true } => log::debug!("Skipping {}", path),
        EntryOutcome::Skipped { silent: false } => log::warn!("Empty patch for file {}", path),
        EntryOutcome::NotFound => log::warn!("File not found: {}", path),
        EntryOutcome::Failed(e) => log::warn!("Patching {} failed: {}", path, e),
        EntryOutcome::NotRun => {}
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Collects events and stats, and drives the phase-scale progress.
struct Tracker<'a> {
    phases: Operation<'a>,
    events: Vec<Event>,
    stats: PatchStats,
}

impl<'a> Tracker<'a> {
    fn new(sink: &'a dyn ProgressSink) -> Self {
        Self {
            phases: Operation::new(sink, Scale::Phase, Phase::ALL.len()),
            events: Vec::new(),
            stats: PatchStats::default(),
        }
    }

    fn begin(&mut self, phase: Phase, label: String) {
        log::info!("{}", label);
        self.phases.set_current_operation(label);
        self.events.push(Event::PhaseStarted(phase));
    }

    fn end(&mut self, phase: Phase) {
        self.phases.step();
        self.events.push(Event::PhaseFinished(phase));
    }

    fn push(&mut self, event: Event) {
        let stats = &mut self.stats;
        match &event {
            Event::Renamed { .. } => stats.renamed += 1,
            Event::RenameUnresolved { .. } => stats.unresolved_renames += 1,
            Event::Entry { outcome, .. } => match outcome {
                EntryOutcome::AlreadyCurrent => stats.already_current += 1,
                EntryOutcome::Patched { .. } => stats.patched += 1,
                EntryOutcome::Skipped { .. } => stats.skipped += 1,
                EntryOutcome::NotFound => stats.missing += 1,
                EntryOutcome::Failed(_) => stats.failed += 1,
                EntryOutcome::NotRun => {}
            },
            Event::Pruned { entries, folders } => {
                stats.pruned_entries += entries;
                stats.pruned_folders += folders;
            }
            _ => {}
        }
        self.events.push(event);
    }

    fn finish(self, outcome: Outcome) -> PatchReport {
        if outcome == Outcome::Completed {
            self.phases.finish();
        }
        PatchReport {
            outcome,
            events: self.events,
            stats: self.stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::Algorithm;
    use crate::progress::NullProgress;

    fn patcher(config: &PatchConfig) -> ArchivePatcher<'_> {
        ArchivePatcher::new(config, &NullProgress, CancellationToken::new())
    }

    #[test]
    fn test_sentinel_never_hashes() {
        let config = PatchConfig::default();
        let current = LazyFingerprint::new(b"voice line").unwrap();

        let (outcome, data) =
            patcher(&config).patch_entry("sound/voice/a.ogg", &current, &[PatchRecord::empty()]);
        assert!(matches!(outcome, EntryOutcome::Skipped { silent: true }));
        assert!(data.is_none());
        assert!(!current.is_computed());
    }

    #[test]
    fn test_current_content_hashed_once_per_chain() {
        let config = PatchConfig::default();
        let content: &[u8] = b"already at the new revision";
        let target = Fingerprint::of(content).unwrap();
        let legacy = Fingerprint::of_with(content, Algorithm::LegacyHash128).unwrap();
        let current = LazyFingerprint::new(content).unwrap();

        let chain = [
            PatchRecord::new(target, Vec::new()),
            PatchRecord::new(legacy, Vec::new()),
            PatchRecord::new(target, Vec::new()),
        ];
        let (outcome, data) = patcher(&config).patch_entry("a.bin", &current, &chain);
        assert!(matches!(outcome, EntryOutcome::AlreadyCurrent));
        assert!(data.is_none());
        assert!(current.is_computed());
        assert_eq!(*current.get(), target);
    }
}
