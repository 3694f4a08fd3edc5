use std::fs;
use std::path::Path;

use crate::error::AfDataError;
use crate::source::Source;

/// Post-download hook. Runs against the staged artifact before it is moved
/// into the compressed slot, so a rejected artifact is never published.
pub trait Verifier: Send + Sync {
    fn verify(&self, source: &Source, artifact: &Path) -> Result<(), AfDataError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl Verifier for AcceptAll {
    fn verify(&self, _source: &Source, _artifact: &Path) -> Result<(), AfDataError> {
        Ok(())
    }
}

/// Rejects single-file artifacts smaller than a byte threshold, which catches
/// truncated transfers and HTML error pages saved in place of an archive.
#[derive(Debug, Clone, Copy)]
pub struct MinimumSize(pub u64);

impl Verifier for MinimumSize {
    fn verify(&self, source: &Source, artifact: &Path) -> Result<(), AfDataError> {
        let meta = fs::metadata(artifact)
            .map_err(|err| AfDataError::Filesystem(format!("stat {}: {err}", artifact.display())))?;
        if meta.is_file() && meta.len() < self.0 {
            return Err(AfDataError::Integrity(format!(
                "{} artifact is {} bytes, expected at least {}",
                source.name(),
                meta.len(),
                self.0
            )));
        }
        Ok(())
    }
}
