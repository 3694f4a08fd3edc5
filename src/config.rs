use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use camino::{Utf8Path, Utf8PathBuf};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::domain::SourceKind;
use crate::error::AfDataError;

pub const CONFIG_FILE: &str = "afdata.json";
pub const DATA_DIR_ENV: &str = "ALPHAFOLD_DATA";

const MAX_DEFAULT_JOBS: usize = 4;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub jobs: Option<usize>,
    #[serde(default)]
    pub sources: Option<Vec<SourceEntry>>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SourceEntry {
    Shorthand(String),
    Detailed(SourceEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SourceEntryObject {
    pub kind: String,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRequest {
    pub kind: SourceKind,
    pub version: String,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub jobs: usize,
    pub sources: Vec<SourceRequest>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            schema_version: 1,
            jobs: default_jobs(),
            sources: default_sources(),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads the explicit `path`, else `./afdata.json`, else the per-user
    /// config file. With no file anywhere the pinned defaults apply.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, AfDataError> {
        let config_path = match path {
            Some(path) => Some(PathBuf::from(path)),
            None => Self::discover(),
        };
        let Some(config_path) = config_path else {
            tracing::debug!("no config file found, using pinned defaults");
            return Ok(ResolvedConfig::default());
        };

        tracing::debug!(path = %config_path.display(), "loading config");
        let content = fs::read_to_string(&config_path)
            .map_err(|_| AfDataError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| AfDataError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, AfDataError> {
        let schema_version = config.schema_version.unwrap_or(1);
        let jobs = config.jobs.filter(|jobs| *jobs > 0).unwrap_or_else(default_jobs);

        let sources = match config.sources {
            None => default_sources(),
            Some(entries) => entries
                .into_iter()
                .map(|entry| match entry {
                    SourceEntry::Shorthand(value) => {
                        let kind: SourceKind = value.parse()?;
                        Ok(pinned_request(kind))
                    }
                    SourceEntry::Detailed(obj) => {
                        let kind: SourceKind = obj.kind.parse()?;
                        let version = obj
                            .version
                            .unwrap_or_else(|| kind.pinned_version().to_string());
                        if !kind.known_versions().contains(&version.as_str()) {
                            return Err(AfDataError::UnknownVersion { kind, version });
                        }
                        Ok(SourceRequest { kind, version })
                    }
                })
                .collect::<Result<Vec<_>, AfDataError>>()?,
        };

        let mut seen = BTreeSet::new();
        for request in &sources {
            if !seen.insert(request.kind) {
                return Err(AfDataError::DuplicateSource(request.kind));
            }
        }

        Ok(ResolvedConfig {
            schema_version,
            jobs,
            sources,
        })
    }

    fn discover() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE);
        if local.is_file() {
            return Some(local);
        }
        ProjectDirs::from("", "", "afdata")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
            .filter(|path| path.is_file())
    }
}

/// The data root must already exist; it is never created implicitly so a
/// typo cannot scatter hundreds of gigabytes into a fresh directory.
pub fn validate_data_dir(path: Option<&Utf8Path>) -> Result<Utf8PathBuf, AfDataError> {
    let path = path.ok_or(AfDataError::MissingDataDir)?;
    if !path.as_std_path().is_dir() {
        return Err(AfDataError::InvalidDataDir(path.to_path_buf()));
    }
    Ok(path.to_path_buf())
}

pub fn default_sources() -> Vec<SourceRequest> {
    [SourceKind::Params, SourceKind::Bfd, SourceKind::Mgnify]
        .into_iter()
        .map(pinned_request)
        .collect()
}

pub fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(1)
        .min(MAX_DEFAULT_JOBS)
}

fn pinned_request(kind: SourceKind) -> SourceRequest {
    SourceRequest {
        kind,
        version: kind.pinned_version().to_string(),
    }
}
