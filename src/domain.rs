use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::AfDataError;

const PARAMS_VERSIONS: &[&str] = &["2021-07-14", "2021-10-27", "2022-03-02", "2022-12-06"];
const BFD_VERSIONS: &[&str] = &["6a634dc6eb105c2e9b4cba7bbae93412"];
const MGNIFY_VERSIONS: &[&str] = &["2018_12", "2022_05"];
const PDB_MMCIF_VERSIONS: &[&str] = &["20220103", "20230102", "20240101"];

const GCS_DATABASES: &str = "https://storage.googleapis.com/alphafold-databases";
const BFD_ARCHIVE: &str = "bfd_metaclust_clu_complete_id30_c90_final_seq.sorted_opt.tar.gz";

/// Every kind of data bundle the manager knows how to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Model parameters, shipped as a plain tar archive.
    Params,
    /// Big Fantastic Database, a tar.gz of HH-suite files.
    Bfd,
    /// MGnify clusters, a single gzip-compressed FASTA.
    Mgnify,
    /// wwPDB mmCIF snapshot, mirrored as a directory tree of `.cif.gz` files.
    #[value(name = "pdb_mmcif")]
    PdbMmcif,
}

/// How remote bytes reach the compressed slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStrategy {
    File,
    Mirror,
}

/// How the compressed slot is expanded into the uncompressed slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecompressStrategy {
    Tar,
    TarGz,
    Gunzip,
}

/// Whether an artifact slot holds a single file or a directory tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    File,
    Directory,
}

/// The two artifact slots every source owns under the data root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    Compressed,
    Uncompressed,
}

impl Slot {
    pub fn dir_name(self) -> &'static str {
        match self {
            Slot::Compressed => "compressed",
            Slot::Uncompressed => "uncompressed",
        }
    }
}

impl SourceKind {
    pub const ALL: [SourceKind; 4] = [
        SourceKind::Params,
        SourceKind::Bfd,
        SourceKind::Mgnify,
        SourceKind::PdbMmcif,
    ];

    pub fn flag(self) -> &'static str {
        match self {
            SourceKind::Params => "params",
            SourceKind::Bfd => "bfd",
            SourceKind::Mgnify => "mgnify",
            SourceKind::PdbMmcif => "pdb_mmcif",
        }
    }

    pub fn known_versions(self) -> &'static [&'static str] {
        match self {
            SourceKind::Params => PARAMS_VERSIONS,
            SourceKind::Bfd => BFD_VERSIONS,
            SourceKind::Mgnify => MGNIFY_VERSIONS,
            SourceKind::PdbMmcif => PDB_MMCIF_VERSIONS,
        }
    }

    /// Version used when configuration does not pin one explicitly.
    pub fn pinned_version(self) -> &'static str {
        match self {
            SourceKind::Params => "2022-12-06",
            SourceKind::Bfd => "6a634dc6eb105c2e9b4cba7bbae93412",
            SourceKind::Mgnify => "2022_05",
            SourceKind::PdbMmcif => "20240101",
        }
    }

    /// Remote location of `version`. Mirrors reorganise their trees between
    /// releases, so every version is mapped explicitly.
    pub fn url(self, version: &str) -> Result<String, AfDataError> {
        let url = match (self, version) {
            (SourceKind::Params, v) if PARAMS_VERSIONS.contains(&v) => {
                format!("https://storage.googleapis.com/alphafold/alphafold_params_{v}.tar")
            }
            (SourceKind::Bfd, v) if BFD_VERSIONS.contains(&v) => {
                format!("{GCS_DATABASES}/casp14_versions/{BFD_ARCHIVE}")
            }
            (SourceKind::Mgnify, "2018_12") => {
                format!("{GCS_DATABASES}/casp14_versions/mgy_clusters_2018_12.fa.gz")
            }
            (SourceKind::Mgnify, "2022_05") => {
                format!("{GCS_DATABASES}/v2.3/mgy_clusters_2022_05.fa.gz")
            }
            (SourceKind::PdbMmcif, v) if PDB_MMCIF_VERSIONS.contains(&v) => {
                format!("rsync://snapshots.wwpdb.org/snapshots/{v}/pub/pdb/data/structures/divided/mmCIF/")
            }
            _ => {
                return Err(AfDataError::UnknownVersion {
                    kind: self,
                    version: version.to_string(),
                });
            }
        };
        Ok(url)
    }

    pub fn artifact_name(self, slot: Slot, version: &str) -> String {
        match (self, slot) {
            (SourceKind::Params, Slot::Compressed) => format!("alphafold_params_{version}.tar"),
            (SourceKind::Params, Slot::Uncompressed) => "params".to_string(),
            (SourceKind::Bfd, Slot::Compressed) => BFD_ARCHIVE.to_string(),
            (SourceKind::Bfd, Slot::Uncompressed) => "bfd".to_string(),
            (SourceKind::Mgnify, Slot::Compressed) => format!("mgy_clusters_{version}.fa.gz"),
            (SourceKind::Mgnify, Slot::Uncompressed) => format!("mgy_clusters_{version}.fa"),
            (SourceKind::PdbMmcif, _) => "mmcif_files".to_string(),
        }
    }

    pub fn layout(self, slot: Slot) -> Layout {
        match (self, slot) {
            (SourceKind::Params | SourceKind::Bfd, Slot::Compressed) => Layout::File,
            (SourceKind::Params | SourceKind::Bfd, Slot::Uncompressed) => Layout::Directory,
            (SourceKind::Mgnify, _) => Layout::File,
            (SourceKind::PdbMmcif, _) => Layout::Directory,
        }
    }

    pub fn download_strategy(self) -> DownloadStrategy {
        match self {
            SourceKind::PdbMmcif => DownloadStrategy::Mirror,
            _ => DownloadStrategy::File,
        }
    }

    /// `None` when no decompressor exists for this kind's archive format.
    pub fn decompress_strategy(self) -> Option<DecompressStrategy> {
        match self {
            SourceKind::Params => Some(DecompressStrategy::Tar),
            SourceKind::Bfd => Some(DecompressStrategy::TarGz),
            SourceKind::Mgnify => Some(DecompressStrategy::Gunzip),
            // Expanding every .cif.gz of a mirror in place is not implemented.
            SourceKind::PdbMmcif => None,
        }
    }

    /// Whether the compressed slot may be reclaimed once expanded.
    pub fn supports_prune(self) -> bool {
        !matches!(self, SourceKind::PdbMmcif)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.flag())
    }
}

impl FromStr for SourceKind {
    type Err = AfDataError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase().replace('-', "_");
        SourceKind::ALL
            .into_iter()
            .find(|kind| kind.flag() == normalized)
            .ok_or_else(|| AfDataError::UnknownSource(value.to_string()))
    }
}
