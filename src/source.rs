//! One versioned data bundle and its lifecycle under a data root.
//!
//! A [`Source`] holds no state of its own beyond identity: whether it is
//! downloaded or decompressed is read back from the filesystem on every call.
//! Every mutating operation follows the same shape: a lock-free check that
//! returns early when nothing needs doing, then the per-source lock, a second
//! check under the lock, and finally work staged next to the destination and
//! renamed into place.

use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{Layout, Slot, SourceKind};
use crate::error::AfDataError;
use crate::fs_util;
use crate::lock::SourceLock;
use crate::transfer::TransferBackend;
use crate::verify::{AcceptAll, Verifier};

/// What a download or decompress call ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Performed,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PruneAction {
    Removed,
    NothingToRemove,
    /// The archive is the only copy until it has been decompressed.
    Retained,
}

/// Collaborators a source operation delegates to.
#[derive(Clone, Copy)]
pub struct OperationContext<'a> {
    pub backend: &'a dyn TransferBackend,
    pub verifier: &'a dyn Verifier,
}

impl<'a> OperationContext<'a> {
    pub fn new(backend: &'a dyn TransferBackend) -> Self {
        Self {
            backend,
            verifier: &AcceptAll,
        }
    }

    pub fn with_verifier(mut self, verifier: &'a dyn Verifier) -> Self {
        self.verifier = verifier;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Source {
    kind: SourceKind,
    version: String,
    url: String,
    compressed: Utf8PathBuf,
    uncompressed: Utf8PathBuf,
}

impl Source {
    pub fn new(kind: SourceKind, version: &str) -> Result<Self, AfDataError> {
        let url = kind.url(version)?;
        let compressed = slot_path(kind, Slot::Compressed, version);
        let uncompressed = slot_path(kind, Slot::Uncompressed, version);
        debug_assert_ne!(compressed, uncompressed);
        Ok(Self {
            kind,
            version: version.to_string(),
            url,
            compressed,
            uncompressed,
        })
    }

    pub fn name(&self) -> &'static str {
        self.kind.flag()
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Compressed slot, relative to the data root.
    pub fn compressed(&self) -> &Utf8Path {
        &self.compressed
    }

    /// Uncompressed slot, relative to the data root.
    pub fn uncompressed(&self) -> &Utf8Path {
        &self.uncompressed
    }

    pub fn path(&self, root: &Utf8Path, slot: Slot) -> Utf8PathBuf {
        match slot {
            Slot::Compressed => root.join(&self.compressed),
            Slot::Uncompressed => root.join(&self.uncompressed),
        }
    }

    pub fn compressed_available(&self, root: &Utf8Path) -> bool {
        fs_util::is_populated(self.path(root, Slot::Compressed).as_std_path())
    }

    pub fn uncompressed_available(&self, root: &Utf8Path) -> bool {
        fs_util::is_populated(self.path(root, Slot::Uncompressed).as_std_path())
    }

    pub fn last_modified(&self, root: &Utf8Path, slot: Slot) -> Option<DateTime<Utc>> {
        fs_util::modified(self.path(root, slot).as_std_path()).map(DateTime::<Utc>::from)
    }

    /// Fetches the compressed artifact. Skipped without `force` once either
    /// slot is available: an expanded copy makes the archive redundant.
    pub fn download(
        &self,
        root: &Utf8Path,
        ctx: OperationContext<'_>,
        force: bool,
    ) -> Result<Action, AfDataError> {
        if !force && self.download_satisfied(root) {
            tracing::debug!(source = self.name(), "download not needed");
            return Ok(Action::Skipped);
        }

        let mut lock = SourceLock::open(root, self)?;
        let _guard = lock.acquire()?;
        if !force && self.download_satisfied(root) {
            return Ok(Action::Skipped);
        }

        let destination = self.path(root, Slot::Compressed);
        tracing::info!(
            source = self.name(),
            version = %self.version,
            url = %self.url,
            "downloading to {destination}"
        );
        let strategy = self.kind.download_strategy();
        let previous = self
            .compressed_available(root)
            .then_some(destination.as_std_path());
        let work = |staged: &Path| {
            ctx.backend.download(strategy, &self.url, staged, previous)?;
            ctx.verifier.verify(self, staged)
        };
        self.stage(Slot::Compressed, &destination, work)?;
        Ok(Action::Performed)
    }

    /// Expands the compressed artifact into the uncompressed slot.
    pub fn decompress(
        &self,
        root: &Utf8Path,
        ctx: OperationContext<'_>,
        force: bool,
    ) -> Result<Action, AfDataError> {
        let archive = self.path(root, Slot::Compressed);
        if !self.compressed_available(root) {
            return Err(AfDataError::MissingInput(archive));
        }
        if !force && self.uncompressed_available(root) {
            tracing::debug!(source = self.name(), "decompress not needed");
            return Ok(Action::Skipped);
        }
        let strategy = self
            .kind
            .decompress_strategy()
            .ok_or(AfDataError::UnsupportedFormat {
                kind: self.kind,
                operation: "decompress",
            })?;

        let mut lock = SourceLock::open(root, self)?;
        let _guard = lock.acquire()?;
        if !self.compressed_available(root) {
            return Err(AfDataError::MissingInput(archive));
        }
        if !force && self.uncompressed_available(root) {
            return Ok(Action::Skipped);
        }

        let destination = self.path(root, Slot::Uncompressed);
        tracing::info!(
            source = self.name(),
            version = %self.version,
            "decompressing {archive} to {destination}"
        );
        self.stage(Slot::Uncompressed, &destination, |staged: &Path| {
            ctx.backend
                .decompress(strategy, archive.as_std_path(), staged)
        })?;
        Ok(Action::Performed)
    }

    /// Reclaims the compressed slot once the uncompressed slot is available.
    pub fn prune(&self, root: &Utf8Path) -> Result<PruneAction, AfDataError> {
        if !self.kind.supports_prune() {
            return Err(AfDataError::UnsupportedFormat {
                kind: self.kind,
                operation: "prune",
            });
        }
        let archive = self.path(root, Slot::Compressed);
        if !archive.as_std_path().exists() {
            return Ok(PruneAction::NothingToRemove);
        }
        if !self.uncompressed_available(root) {
            return Ok(PruneAction::Retained);
        }

        let mut lock = SourceLock::open(root, self)?;
        let _guard = lock.acquire()?;
        if !self.uncompressed_available(root) {
            return Ok(PruneAction::Retained);
        }
        tracing::info!(source = self.name(), "removing {archive}");
        fs_util::remove_artifact(archive.as_std_path())?;
        Ok(PruneAction::Removed)
    }

    fn download_satisfied(&self, root: &Utf8Path) -> bool {
        self.uncompressed_available(root) || self.compressed_available(root)
    }

    fn stage<F>(&self, slot: Slot, destination: &Utf8Path, work: F) -> Result<(), AfDataError>
    where
        F: FnOnce(&Path) -> Result<(), AfDataError>,
    {
        match self.kind.layout(slot) {
            Layout::File => fs_util::stage_file(destination.as_std_path(), work),
            Layout::Directory => fs_util::stage_dir(destination.as_std_path(), work),
        }
    }
}

fn slot_path(kind: SourceKind, slot: Slot, version: &str) -> Utf8PathBuf {
    Utf8PathBuf::from(slot.dir_name())
        .join(kind.flag())
        .join(version)
        .join(kind.artifact_name(slot, version))
}
