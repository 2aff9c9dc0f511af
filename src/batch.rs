use crate::config::ArchivePair;
use crate::error::Error;
use crate::orchestrator::{ArchivePatcher, Outcome, PatchReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Run the pair again from scratch.
    Retry,
    /// Accept the failure and move on to the next pair.
    Ignore,
    /// Cancel the run.
    Abort,
}

/// Decides what to do after a pair fails. `report` is `None` when the pair
/// stopped with an error.
pub trait FailureHandler {
    fn on_failure(
        &mut self,
        pair: &ArchivePair,
        report: Option<&PatchReport>,
        error: Option<&Error>,
    ) -> Resolution;
}

/// Fixed resolution with a retry budget per pair.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub resolution: Resolution,
    pub max_retries: usize,
    /// Used once the retry budget is spent.
    pub exhausted: Resolution,
    retries: usize,
    current: Option<ArchivePair>,
}

impl RetryPolicy {
    pub fn new(resolution: Resolution, max_retries: usize, exhausted: Resolution) -> Self {
        Self {
            resolution,
            max_retries,
            exhausted,
            retries: 0,
            current: None,
        }
    }

    pub fn abort() -> Self {
        Self::new(Resolution::Abort, 0, Resolution::Abort)
    }

    pub fn ignore() -> Self {
        Self::new(Resolution::Ignore, 0, Resolution::Ignore)
    }
}

impl FailureHandler for RetryPolicy {
    fn on_failure(
        &mut self,
        pair: &ArchivePair,
        _report: Option<&PatchReport>,
        _error: Option<&Error>,
    ) -> Resolution {
        if self.current.as_ref() != Some(pair) {
            self.current = Some(pair.clone());
            self.retries = 0;
        }
        if self.resolution != Resolution::Retry {
            return self.resolution;
        }
        if self.retries < self.max_retries {
            self.retries += 1;
            Resolution::Retry
        } else {
            self.exhausted
        }
    }
}

#[derive(Debug)]
pub enum PairResult {
    Built(PatchReport),
    /// The output already existed and overwriting was not requested.
    Skipped,
    /// Failed and the handler chose to move on.
    Ignored {
        report: Option<PatchReport>,
        error: Option<Error>,
    },
    /// Failed and the handler aborted the run.
    Failed {
        report: Option<PatchReport>,
        error: Option<Error>,
    },
    Cancelled,
}

#[derive(Debug, Default)]
pub struct BatchSummary {
    pub results: Vec<(ArchivePair, PairResult)>,
    pub aborted: bool,
    pub cancelled: bool,
}

impl BatchSummary {
    pub fn all_built(&self) -> bool {
        !self.aborted
            && !self.cancelled
            && self
                .results
                .iter()
                .all(|(_, r)| matches!(r, PairResult::Built(_) | PairResult::Skipped))
    }
}

pub fn patch_all<H: FailureHandler>(
    patcher: &ArchivePatcher<'_>,
    pairs: &[ArchivePair],
    handler: &mut H,
) -> BatchSummary {
    let cancel = patcher.cancellation();
    let mut summary = BatchSummary::default();

    for pair in pairs {
        if cancel.is_cancelled() {
            summary.cancelled = true;
            break;
        }

        let output = pair.normalized_output();
        if !patcher.config().overwrite && output.exists() {
            log::info!("{} has already been built. Skipping.", output.display());
            summary.results.push((pair.clone(), PairResult::Skipped));
            continue;
        }

        log::info!("Building {}", output.display());
        let result = loop {
            let (report, error) = match patcher.patch_archive(pair) {
                Ok(report) if report.outcome == Outcome::Cancelled => break PairResult::Cancelled,
                Ok(report) if report.is_success() => break PairResult::Built(report),
                Ok(report) => (Some(report), None),
                Err(e) => (None, Some(e)),
            };
            log::warn!("Errors occurred while patching {}", pair.source.display());

            match handler.on_failure(pair, report.as_ref(), error.as_ref()) {
                Resolution::Retry if !cancel.is_cancelled() => {
                    log::info!("Retrying build.");
                }
                Resolution::Retry => break PairResult::Cancelled,
                Resolution::Ignore => {
                    log::info!("Ignoring errors.");
                    break PairResult::Ignored { report, error };
                }
                Resolution::Abort => {
                    log::warn!("Install aborted.");
                    cancel.cancel();
                    summary.aborted = true;
                    break PairResult::Failed { report, error };
                }
            }
        };

        let stop = matches!(result, PairResult::Cancelled | PairResult::Failed { .. });
        if matches!(result, PairResult::Cancelled) {
            summary.cancelled = true;
        }
        summary.results.push((pair.clone(), result));
        if stop {
            break;
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn pair(name: &str) -> ArchivePair {
        ArchivePair {
            source: PathBuf::from(format!("{}.pak", name)),
            output: PathBuf::from(format!("out/{}.pak", name)),
            patch_db: PathBuf::from(format!("{}.pat", name)),
            rename_db: PathBuf::from(format!("{}.ren", name)),
        }
    }

    #[test]
    fn test_retry_budget_per_pair() {
        let mut policy = RetryPolicy::new(Resolution::Retry, 2, Resolution::Ignore);
        let a = pair("a");
        let b = pair("b");

        assert_eq!(policy.on_failure(&a, None, None), Resolution::Retry);
        assert_eq!(policy.on_failure(&a, None, None), Resolution::Retry);
        assert_eq!(policy.on_failure(&a, None, None), Resolution::Ignore);
        assert_eq!(policy.on_failure(&b, None, None), Resolution::Retry);
    }

    #[test]
    fn test_fixed_policies() {
        let a = pair("a");
        assert_eq!(RetryPolicy::abort().on_failure(&a, None, None), Resolution::Abort);
        assert_eq!(RetryPolicy::ignore().on_failure(&a, None, None), Resolution::Ignore);
    }
}
