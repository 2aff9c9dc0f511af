use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};

use arcpatch::archive::CompressionOptions;
use arcpatch::batch::{self, PairResult, Resolution, RetryPolicy};
use arcpatch::config::{ArchivePair, PatchConfig};
use arcpatch::fingerprint::{Algorithm, FingerprintBuilder};
use arcpatch::orchestrator::{ArchivePatcher, Outcome, PatchStats};
use arcpatch::progress::{CancellationToken, LogProgress};
use arcpatch::store;

#[derive(Parser)]
#[command(name = "arcpatch", about = "Archive upgrader driven by BSDIFF40 patch databases")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Clone)]
struct PatchArgs {
    /// Directory holding the .pat and .ren databases
    #[arg(long, default_value = ".")]
    patch_dir: PathBuf,
    /// Run every step except writing the output archive
    #[arg(long)]
    simulate: bool,
    /// Worker threads for the patch phase (default: all cores)
    #[arg(long)]
    workers: Option<usize>,
    /// zstd level used when saving packed archives
    #[arg(long, default_value_t = 3)]
    level: i32,
    /// Path prefix whose empty patches are skipped without a warning (repeatable)
    #[arg(long = "silent-skip", default_value = arcpatch::config::DEFAULT_SILENT_SKIP_PREFIX)]
    silent_skip: Vec<String>,
}

impl PatchArgs {
    fn into_config(self, overwrite: bool) -> PatchConfig {
        PatchConfig {
            patch_dir: self.patch_dir,
            silent_skip_prefixes: self.silent_skip,
            simulate: self.simulate,
            workers: self.workers,
            compression: CompressionOptions { level: self.level },
            overwrite,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum OnError {
    Abort,
    Ignore,
    Retry,
}

#[derive(Subcommand)]
enum Commands {
    /// Upgrade one archive
    Apply {
        /// Archive at the old revision
        #[arg(long)]
        source: PathBuf,
        /// Where to write the upgraded archive
        #[arg(long, short)]
        output: PathBuf,
        #[command(flatten)]
        patch: PatchArgs,
    },
    /// Upgrade every archive listed in a pairs file
    Build {
        /// File of `source<TAB>output` lines
        #[arg(long)]
        pairs: PathBuf,
        #[command(flatten)]
        patch: PatchArgs,
        /// What to do when an archive fails
        #[arg(long, value_enum, default_value_t = OnError::Abort)]
        on_error: OnError,
        /// Retries per archive with --on-error retry
        #[arg(long, default_value_t = 2)]
        max_retries: usize,
        /// Rebuild outputs that already exist
        #[arg(long)]
        overwrite: bool,
    },
    /// List the contents of a patch database
    Inspect {
        #[arg(long)]
        patch_db: PathBuf,
    },
    /// Print the fingerprint of a file
    Fingerprint {
        file: PathBuf,
        /// Use the legacy MD5 fingerprint
        #[arg(long)]
        legacy: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("Interrupted, cancelling");
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Commands::Apply {
            source,
            output,
            patch,
        } => {
            let config = patch.into_config(true);
            let pair = config.pair(source, output);

            println!("Patching archive...");
            println!("  Source: {}", pair.source.display());
            println!("  Output: {}", pair.normalized_output().display());
            println!("  Patch database: {}", pair.patch_db.display());

            let start = Instant::now();
            let report = tokio::task::spawn_blocking(move || {
                let patcher = ArchivePatcher::new(&config, &LogProgress, cancel);
                patcher.patch_archive(&pair)
            })
            .await??;
            let elapsed = start.elapsed();

            if report.outcome == Outcome::Cancelled {
                bail!("Patching cancelled");
            }
            print_stats(&report.stats);
            println!("  Time elapsed: {:.3}s", elapsed.as_secs_f64());
            if !report.is_success() {
                bail!("{} entries failed to patch", report.stats.failed);
            }
            println!("\nArchive patched successfully!");
        }
        Commands::Build {
            pairs,
            patch,
            on_error,
            max_retries,
            overwrite,
        } => {
            let config = patch.into_config(overwrite);
            let pairs = read_pairs(&pairs, &config)?;
            let mut policy = match on_error {
                OnError::Abort => RetryPolicy::abort(),
                OnError::Ignore => RetryPolicy::ignore(),
                OnError::Retry => RetryPolicy::new(Resolution::Retry, max_retries, Resolution::Abort),
            };

            println!("Building {} archives...", pairs.len());
            let start = Instant::now();
            let summary = tokio::task::spawn_blocking(move || {
                let patcher = ArchivePatcher::new(&config, &LogProgress, cancel);
                batch::patch_all(&patcher, &pairs, &mut policy)
            })
            .await?;
            let elapsed = start.elapsed();

            for (pair, result) in &summary.results {
                let status = match result {
                    PairResult::Built(_) => "built",
                    PairResult::Skipped => "skipped",
                    PairResult::Ignored { .. } => "failed (ignored)",
                    PairResult::Failed { .. } => "failed",
                    PairResult::Cancelled => "cancelled",
                };
                println!("  {}: {}", pair.normalized_output().display(), status);
                if let PairResult::Failed { error: Some(e), .. }
                | PairResult::Ignored { error: Some(e), .. } = result
                {
                    println!("    {}", e);
                }
            }
            println!("  Time elapsed: {:.3}s", elapsed.as_secs_f64());

            if summary.cancelled {
                bail!("Build cancelled");
            }
            if !summary.all_built() {
                bail!("Build finished with errors");
            }
            println!("\nAll archives built successfully!");
        }
        Commands::Inspect { patch_db } => {
            let patches = store::load_patch_store(&patch_db)?;
            println!("{}: {} entries", patch_db.display(), patches.len());
            for (path, chain) in patches.iter() {
                println!("  {} ({} records)", path, chain.len());
                for record in chain {
                    match &record.target {
                        Some(target) => println!("    -> {} [{} byte diff]", target, record.diff.len()),
                        None => println!("    -> (empty)"),
                    }
                }
            }
        }
        Commands::Fingerprint { file, legacy } => {
            let algorithm = if legacy {
                Algorithm::LegacyHash128
            } else {
                Algorithm::ContentHash128
            };
            let fingerprint = tokio::task::spawn_blocking(move || {
                FingerprintBuilder::from_path(&file)?
                    .with_algorithm(algorithm)
                    .compute()
            })
            .await??;
            println!("{}", fingerprint);
        }
    }

    Ok(())
}

fn print_stats(stats: &PatchStats) {
    println!("  Renamed: {}", stats.renamed);
    println!("  Unresolved renames: {}", stats.unresolved_renames);
    println!("  Already current: {}", stats.already_current);
    println!("  Patched: {}", stats.patched);
    println!("  Skipped: {}", stats.skipped);
    println!("  Missing: {}", stats.missing);
    println!("  Failed: {}", stats.failed);
    println!(
        "  Pruned: {} entries, {} folders",
        stats.pruned_entries, stats.pruned_folders
    );
}

/// Parse a pairs file: one `source<TAB>output` per line, blank lines and `#`
/// comments ignored.
fn read_pairs(path: &Path, config: &PatchConfig) -> anyhow::Result<Vec<ArchivePair>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read pairs file: {}", path.display()))?;

    let mut pairs = Vec::new();
    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((source, output)) = line.split_once('\t') else {
            bail!("{}:{}: expected `source<TAB>output`", path.display(), number + 1);
        };
        pairs.push(config.pair(source.trim(), output.trim()));
    }
    Ok(pairs)
}
