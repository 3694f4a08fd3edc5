use std::path::PathBuf;

use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

use crate::domain::SourceKind;

#[derive(Debug, Error, Diagnostic)]
pub enum AfDataError {
    #[error("transfer failed ({tool}): {message}")]
    Transfer { tool: String, message: String },

    #[error("compressed artifact not found: {0}")]
    #[diagnostic(help("run `afdata download` first"))]
    MissingInput(Utf8PathBuf),

    #[error("uncompressed artifact not found: {0}")]
    #[diagnostic(help("run `afdata decompress` first"))]
    NotInstalled(Utf8PathBuf),

    #[error("{operation} is not supported for {kind} sources")]
    UnsupportedFormat {
        kind: SourceKind,
        operation: &'static str,
    },

    #[error("unknown {kind} version: {version}")]
    UnknownVersion { kind: SourceKind, version: String },

    #[error("unknown source kind: {0}")]
    UnknownSource(String),

    #[error("source configured more than once: {0}")]
    DuplicateSource(SourceKind),

    #[error("source not configured: {0}")]
    #[diagnostic(help("add it to the sources list in afdata.json"))]
    NotConfigured(SourceKind),

    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("no data directory given")]
    #[diagnostic(help("pass --data-dir or set ALPHAFOLD_DATA"))]
    MissingDataDir,

    #[error("data directory does not exist or is not a directory: {0}")]
    #[diagnostic(help("pass --data-dir or set ALPHAFOLD_DATA"))]
    InvalidDataDir(Utf8PathBuf),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to start worker pool: {0}")]
    Scheduler(String),
}

impl AfDataError {
    /// Transfer failures may succeed on a later attempt; everything else
    /// needs a code, configuration or ordering change first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AfDataError::Transfer { .. })
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, AfDataError::UnsupportedFormat { .. })
    }

    /// Process exit status when this error ends a run: 2 for invalid
    /// invocation or configuration, 1 for everything else.
    pub fn exit_code(&self) -> u8 {
        match self {
            AfDataError::MissingDataDir
            | AfDataError::InvalidDataDir(_)
            | AfDataError::ConfigRead(_)
            | AfDataError::ConfigParse(_)
            | AfDataError::UnknownSource(_)
            | AfDataError::UnknownVersion { .. }
            | AfDataError::DuplicateSource(_)
            | AfDataError::NotConfigured(_) => 2,
            _ => 1,
        }
    }
}
