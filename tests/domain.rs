use assert_matches::assert_matches;

use afdata::domain::{DecompressStrategy, DownloadStrategy, Layout, Slot, SourceKind};
use afdata::error::AfDataError;

#[test]
fn parse_source_kind_valid() {
    let kind: SourceKind = "mgnify".parse().unwrap();
    assert_eq!(kind, SourceKind::Mgnify);
    assert_eq!(kind.to_string(), "mgnify");
}

#[test]
fn parse_source_kind_invalid() {
    let err = "uniclust30".parse::<SourceKind>().unwrap_err();
    assert_matches!(err, AfDataError::UnknownSource(_));
}

#[test]
fn every_known_version_resolves_to_a_url() {
    for kind in SourceKind::ALL {
        for version in kind.known_versions() {
            let url = kind.url(version).unwrap();
            match kind.download_strategy() {
                DownloadStrategy::File => assert!(url.starts_with("https://"), "{url}"),
                DownloadStrategy::Mirror => assert!(url.starts_with("rsync://"), "{url}"),
            }
        }
    }
}

#[test]
fn mgnify_releases_live_in_different_trees() {
    let old = SourceKind::Mgnify.url("2018_12").unwrap();
    let new = SourceKind::Mgnify.url("2022_05").unwrap();
    assert!(old.ends_with("casp14_versions/mgy_clusters_2018_12.fa.gz"));
    assert!(new.ends_with("v2.3/mgy_clusters_2022_05.fa.gz"));
}

#[test]
fn pdb_snapshot_url_embeds_the_date() {
    let url = SourceKind::PdbMmcif.url("20230102").unwrap();
    assert_eq!(
        url,
        "rsync://snapshots.wwpdb.org/snapshots/20230102/pub/pdb/data/structures/divided/mmCIF/"
    );
}

#[test]
fn strategies_and_layouts() {
    assert_eq!(
        SourceKind::Params.decompress_strategy(),
        Some(DecompressStrategy::Tar)
    );
    assert_eq!(
        SourceKind::Bfd.decompress_strategy(),
        Some(DecompressStrategy::TarGz)
    );
    assert_eq!(
        SourceKind::Mgnify.decompress_strategy(),
        Some(DecompressStrategy::Gunzip)
    );
    assert_eq!(SourceKind::PdbMmcif.decompress_strategy(), None);
    assert!(!SourceKind::PdbMmcif.supports_prune());

    assert_eq!(SourceKind::Bfd.layout(Slot::Compressed), Layout::File);
    assert_eq!(SourceKind::Bfd.layout(Slot::Uncompressed), Layout::Directory);
    assert_eq!(SourceKind::Mgnify.layout(Slot::Uncompressed), Layout::File);
    assert_eq!(SourceKind::PdbMmcif.layout(Slot::Compressed), Layout::Directory);
}

#[test]
fn artifact_names_never_collide_across_slots() {
    for kind in SourceKind::ALL {
        let version = kind.pinned_version();
        let compressed = format!(
            "{}/{}",
            Slot::Compressed.dir_name(),
            kind.artifact_name(Slot::Compressed, version)
        );
        let uncompressed = format!(
            "{}/{}",
            Slot::Uncompressed.dir_name(),
            kind.artifact_name(Slot::Uncompressed, version)
        );
        assert_ne!(compressed, uncompressed);
    }
}
