pub mod archive;
pub mod batch;
pub mod bsdiff;
pub mod config;
pub mod container;
pub mod error;
pub mod fingerprint;
pub mod murmur;
pub mod orchestrator;
pub mod progress;
pub mod store;

pub use archive::{Archive, CompressionOptions, EntryId, FolderId};
pub use batch::{patch_all, BatchSummary, FailureHandler, PairResult, Resolution, RetryPolicy};
pub use config::{ArchivePair, PatchConfig};
pub use container::{Container, DirectoryContainer, PackedContainer};
pub use error::{Error, Result};
pub use fingerprint::{Algorithm, Fingerprint, FingerprintBuilder, LazyFingerprint};
pub use orchestrator::{ArchivePatcher, EntryOutcome, Event, Outcome, PatchReport, PatchStats, Phase};
pub use progress::{CancellationToken, LogProgress, NullProgress, ProgressSink, ProgressUpdate, Scale};
pub use store::{PatchRecord, PatchStore, RenameStore};
