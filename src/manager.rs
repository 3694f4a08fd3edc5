use std::fmt;
use std::fs;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use rayon::prelude::*;
use serde::Serialize;

use crate::domain::{Slot, SourceKind};
use crate::error::AfDataError;
use crate::fs_util::STAGING_PREFIX;
use crate::registry::SourceRegistry;
use crate::source::{Action, OperationContext, PruneAction, Source};
use crate::transfer::TransferBackend;
use crate::verify::{AcceptAll, Verifier};

/// Directory under the data root holding one symlink per source.
pub const CURRENT_DIR: &str = "current";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Download,
    Decompress,
    Prune,
    Link,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Download => write!(f, "download"),
            Operation::Decompress => write!(f, "decompress"),
            Operation::Prune => write!(f, "prune"),
            Operation::Link => write!(f, "link"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Performed,
    Skipped,
    Removed,
    NothingToRemove,
    Retained,
    /// The source kind has no implementation for the operation. Only prune
    /// reports this; elsewhere an unsupported operation is a failure.
    Unsupported,
    Failed,
}

impl Outcome {
    pub fn is_failure(self) -> bool {
        self == Outcome::Failed
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Outcome::Performed => "done",
            Outcome::Skipped => "up to date",
            Outcome::Removed => "removed",
            Outcome::NothingToRemove => "nothing to remove",
            Outcome::Retained => "kept until decompressed",
            Outcome::Unsupported => "unsupported",
            Outcome::Failed => "failed",
        };
        write!(f, "{label}")
    }
}

impl From<Action> for Outcome {
    fn from(action: Action) -> Self {
        match action {
            Action::Performed => Outcome::Performed,
            Action::Skipped => Outcome::Skipped,
        }
    }
}

impl From<PruneAction> for Outcome {
    fn from(action: PruneAction) -> Self {
        match action {
            PruneAction::Removed => Outcome::Removed,
            PruneAction::NothingToRemove => Outcome::NothingToRemove,
            PruneAction::Retained => Outcome::Retained,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceOutcome {
    pub name: String,
    pub version: String,
    pub outcome: Outcome,
    pub error: Option<String>,
    pub retryable: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub operation: Operation,
    pub items: Vec<SourceOutcome>,
}

impl BatchReport {
    /// Aggregate success: no source failed.
    pub fn success(&self) -> bool {
        self.items.iter().all(|item| !item.outcome.is_failure())
    }

    pub fn failures(&self) -> impl Iterator<Item = &SourceOutcome> {
        self.items.iter().filter(|item| item.outcome.is_failure())
    }

    pub fn get(&self, name: &str) -> Option<&SourceOutcome> {
        self.items.iter().find(|item| item.name == name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateReport {
    pub download: BatchReport,
    pub decompress: BatchReport,
}

impl UpdateReport {
    pub fn success(&self) -> bool {
        self.download.success() && self.decompress.success()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusRow {
    pub name: String,
    pub kind: SourceKind,
    pub version: String,
    pub compressed: bool,
    pub uncompressed: bool,
    pub compressed_path: String,
    pub uncompressed_path: String,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub data_dir: String,
    pub sources: Vec<StatusRow>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

/// Receives progress while a batch runs. Events from different sources may
/// arrive interleaved and from different threads.
pub trait ProgressSink: Sync {
    fn event(&self, event: ProgressEvent);
}

pub struct DataManager<B: TransferBackend> {
    root: Utf8PathBuf,
    registry: SourceRegistry,
    backend: B,
    verifier: Box<dyn Verifier>,
    jobs: usize,
}

impl<B: TransferBackend> DataManager<B> {
    pub fn new(root: Utf8PathBuf, registry: SourceRegistry, backend: B) -> Self {
        Self {
            root,
            registry,
            backend,
            verifier: Box::new(AcceptAll),
            jobs: 1,
        }
    }

    /// Number of sources processed concurrently.
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    pub fn with_verifier(mut self, verifier: impl Verifier + 'static) -> Self {
        self.verifier = Box::new(verifier);
        self
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn download_all(&self, force: bool, sink: &dyn ProgressSink) -> BatchReport {
        let ctx = self.context();
        self.for_each_source(Operation::Download, sink, |source| {
            source.download(&self.root, ctx, force).map(Outcome::from)
        })
    }

    pub fn decompress_all(&self, force: bool, sink: &dyn ProgressSink) -> BatchReport {
        let ctx = self.context();
        self.for_each_source(Operation::Decompress, sink, |source| {
            source.decompress(&self.root, ctx, force).map(Outcome::from)
        })
    }

    pub fn prune_all(&self, sink: &dyn ProgressSink) -> BatchReport {
        self.for_each_source(Operation::Prune, sink, |source| {
            source.prune(&self.root).map(Outcome::from)
        })
    }

    /// Download then decompress. Both stages always run: sources are
    /// independent, so one failed download must not hold back the rest.
    pub fn update(&self, sink: &dyn ProgressSink) -> UpdateReport {
        let download = self.download_all(false, sink);
        let decompress = self.decompress_all(false, sink);
        UpdateReport {
            download,
            decompress,
        }
    }

    /// Points `<root>/current/<name>` at the configured version of every
    /// source, so switching versions is a config change plus `link`.
    pub fn link(&self, sink: &dyn ProgressSink) -> BatchReport {
        self.for_each_source(Operation::Link, sink, |source| self.link_source(source))
    }

    pub fn status(&self) -> StatusReport {
        let sources = self
            .registry
            .iter()
            .map(|source| StatusRow {
                name: source.name().to_string(),
                kind: source.kind(),
                version: source.version().to_string(),
                compressed: source.compressed_available(&self.root),
                uncompressed: source.uncompressed_available(&self.root),
                compressed_path: source.path(&self.root, Slot::Compressed).to_string(),
                uncompressed_path: source.path(&self.root, Slot::Uncompressed).to_string(),
                updated_at: source
                    .last_modified(&self.root, Slot::Uncompressed)
                    .or_else(|| source.last_modified(&self.root, Slot::Compressed))
                    .map(|time| time.to_rfc3339()),
            })
            .collect();
        StatusReport {
            data_dir: self.root.to_string(),
            sources,
        }
    }

    fn context(&self) -> OperationContext<'_> {
        OperationContext::new(&self.backend).with_verifier(self.verifier.as_ref())
    }

    fn for_each_source<F>(
        &self,
        operation: Operation,
        sink: &dyn ProgressSink,
        work: F,
    ) -> BatchReport
    where
        F: Fn(&Source) -> Result<Outcome, AfDataError> + Sync,
    {
        let run_one = |source: &Source| {
            let start = Instant::now();
            sink.event(ProgressEvent {
                message: format!("{operation} {}: started", source.name()),
                elapsed: None,
            });
            let item = match work(source) {
                Ok(outcome) => SourceOutcome {
                    name: source.name().to_string(),
                    version: source.version().to_string(),
                    outcome,
                    error: None,
                    retryable: false,
                },
                Err(err) => {
                    let outcome = if operation == Operation::Prune && err.is_unsupported() {
                        tracing::info!(source = source.name(), "{err}");
                        Outcome::Unsupported
                    } else {
                        tracing::error!(
                            source = source.name(),
                            version = source.version(),
                            %operation,
                            "{err}"
                        );
                        Outcome::Failed
                    };
                    SourceOutcome {
                        name: source.name().to_string(),
                        version: source.version().to_string(),
                        outcome,
                        error: Some(err.to_string()),
                        retryable: err.is_retryable(),
                    }
                }
            };
            sink.event(ProgressEvent {
                message: format!("{operation} {}: {}", source.name(), item.outcome),
                elapsed: Some(start.elapsed()),
            });
            item
        };

        let sources = self.registry.iter().collect::<Vec<_>>();
        let items = match rayon::ThreadPoolBuilder::new()
            .num_threads(self.jobs)
            .build()
        {
            Ok(pool) => pool.install(|| {
                sources
                    .par_iter()
                    .map(|source| run_one(*source))
                    .collect::<Vec<_>>()
            }),
            Err(err) => {
                tracing::warn!("{}; running sequentially", AfDataError::Scheduler(err.to_string()));
                sources.iter().map(|source| run_one(*source)).collect()
            }
        };

        BatchReport { operation, items }
    }

    fn link_source(&self, source: &Source) -> Result<Outcome, AfDataError> {
        if !source.uncompressed_available(&self.root) {
            return Err(AfDataError::NotInstalled(
                source.path(&self.root, Slot::Uncompressed),
            ));
        }
        let link_dir = self.root.join(CURRENT_DIR);
        fs::create_dir_all(link_dir.as_std_path())
            .map_err(|err| AfDataError::Filesystem(err.to_string()))?;
        let link = link_dir.join(source.name());
        let target = Utf8PathBuf::from("..").join(source.uncompressed());

        if let Ok(existing) = fs::read_link(link.as_std_path()) {
            if existing == target.as_std_path() {
                return Ok(Outcome::Skipped);
            }
        }

        let staged = link_dir.join(format!("{STAGING_PREFIX}{}", source.name()));
        replace_symlink(source, &target, &staged, &link)?;
        tracing::info!(source = source.name(), "{link} -> {target}");
        Ok(Outcome::Performed)
    }
}

// A fresh symlink is renamed over the old one so readers never observe a
// missing link.
#[cfg(unix)]
fn replace_symlink(
    _source: &Source,
    target: &Utf8Path,
    staged: &Utf8Path,
    link: &Utf8Path,
) -> Result<(), AfDataError> {
    let fs_err = |err: std::io::Error| AfDataError::Filesystem(format!("link {link}: {err}"));
    if fs::symlink_metadata(staged.as_std_path()).is_ok() {
        fs::remove_file(staged.as_std_path()).map_err(fs_err)?;
    }
    std::os::unix::fs::symlink(target.as_std_path(), staged.as_std_path()).map_err(fs_err)?;
    fs::rename(staged.as_std_path(), link.as_std_path()).map_err(fs_err)?;
    Ok(())
}

#[cfg(not(unix))]
fn replace_symlink(
    source: &Source,
    _target: &Utf8Path,
    _staged: &Utf8Path,
    _link: &Utf8Path,
) -> Result<(), AfDataError> {
    Err(AfDataError::UnsupportedFormat {
        kind: source.kind(),
        operation: "link",
    })
}
