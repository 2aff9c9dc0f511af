use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Which of the two progress scales an update belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scale {
    /// Macro-steps of one archive operation.
    Phase,
    /// Entries within the patch phase.
    Entry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressUpdate<'a> {
    pub scale: Scale,
    pub operation: &'a str,
    pub items_total: usize,
    pub items_done: usize,
}

/// Receives progress updates. Called from worker threads; must not block.
pub trait ProgressSink: Send + Sync {
    fn report(&self, update: &ProgressUpdate<'_>);
}

/// Discards every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn report(&self, _update: &ProgressUpdate<'_>) {}
}

/// Renders updates as log lines: phases at info, entries at debug roughly every
/// tenth of the way through.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn report(&self, update: &ProgressUpdate<'_>) {
        match update.scale {
            Scale::Phase => log::info!(
                "[{}/{}] {}",
                update.items_done,
                update.items_total,
                update.operation
            ),
            Scale::Entry => {
                let tenth = (update.items_total / 10).max(1);
                if update.items_done % tenth == 0 || update.items_done == update.items_total {
                    log::debug!(
                        "{}: {}/{}",
                        update.operation,
                        update.items_done,
                        update.items_total
                    );
                }
            }
        }
    }
}

/// A step-counted operation feeding one scale of a sink.
///
/// The label and total are set from the owning thread; `step` may be called from
/// any worker.
pub struct Operation<'a> {
    sink: &'a dyn ProgressSink,
    scale: Scale,
    label: String,
    total: usize,
    done: AtomicUsize,
}

impl<'a> Operation<'a> {
    pub fn new(sink: &'a dyn ProgressSink, scale: Scale, total: usize) -> Self {
        Self {
            sink,
            scale,
            label: String::new(),
            total,
            done: AtomicUsize::new(0),
        }
    }

    pub fn set_total(&mut self, total: usize) {
        self.total = total;
        self.emit(self.done());
    }

    pub fn set_current_operation(&mut self, label: impl Into<String>) {
        self.label = label.into();
        self.emit(self.done());
    }

    /// Count one finished item; returns the new done-count.
    pub fn step(&self) -> usize {
        let done = self.done.fetch_add(1, Ordering::AcqRel) + 1;
        self.emit(done);
        done
    }

    pub fn done(&self) -> usize {
        self.done.load(Ordering::Acquire)
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Mark the remaining items done.
    pub fn finish(&self) {
        self.done.store(self.total, Ordering::Release);
        self.emit(self.total);
    }

    fn emit(&self, done: usize) {
        self.sink.report(&ProgressUpdate {
            scale: self.scale,
            operation: &self.label,
            items_total: self.total,
            items_done: done,
        });
    }
}

/// Shared "cancellation requested" flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
