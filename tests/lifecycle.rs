use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};

use afdata::domain::{DecompressStrategy, DownloadStrategy, Slot, SourceKind};
use afdata::error::AfDataError;
use afdata::source::{Action, OperationContext, PruneAction, Source};
use afdata::transfer::{DownloadTool, SystemTransfer, TransferBackend};
use afdata::verify::MinimumSize;

#[derive(Default)]
struct MockTransfer {
    downloads: Mutex<usize>,
    previous: Mutex<Vec<Option<PathBuf>>>,
    decompressions: Mutex<usize>,
    fail_download: bool,
    fail_decompress: bool,
    delay: Option<Duration>,
}

impl MockTransfer {
    fn failing_download() -> Self {
        Self {
            fail_download: true,
            ..Self::default()
        }
    }

    fn failing_decompress() -> Self {
        Self {
            fail_decompress: true,
            ..Self::default()
        }
    }

    fn downloads(&self) -> usize {
        *self.downloads.lock().unwrap()
    }

    fn decompressions(&self) -> usize {
        *self.decompressions.lock().unwrap()
    }
}

impl TransferBackend for MockTransfer {
    fn download(
        &self,
        strategy: DownloadStrategy,
        _url: &str,
        destination: &Path,
        previous: Option<&Path>,
    ) -> Result<(), AfDataError> {
        *self.downloads.lock().unwrap() += 1;
        self.previous
            .lock()
            .unwrap()
            .push(previous.map(Path::to_path_buf));
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        // Bytes land before the failure, like an interrupted transfer.
        match strategy {
            DownloadStrategy::File => fs::write(destination, b"archive bytes").unwrap(),
            DownloadStrategy::Mirror => fs::write(destination.join("1abc.cif.gz"), b"cif").unwrap(),
        }
        if self.fail_download {
            return Err(AfDataError::Transfer {
                tool: "mock".to_string(),
                message: "exit status 22".to_string(),
            });
        }
        Ok(())
    }

    fn decompress(
        &self,
        strategy: DecompressStrategy,
        _archive: &Path,
        destination: &Path,
    ) -> Result<(), AfDataError> {
        *self.decompressions.lock().unwrap() += 1;
        match strategy {
            DecompressStrategy::Tar | DecompressStrategy::TarGz => {
                fs::write(destination.join("params_model_1.npz"), b"weights").unwrap()
            }
            DecompressStrategy::Gunzip => fs::write(destination, b">seq\nMKV\n").unwrap(),
        }
        if self.fail_decompress {
            return Err(AfDataError::Transfer {
                tool: "mock".to_string(),
                message: "unexpected end of archive".to_string(),
            });
        }
        Ok(())
    }
}

fn temp_root() -> (tempfile::TempDir, Utf8PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    (temp, root)
}

fn params() -> Source {
    Source::new(SourceKind::Params, "2021-10-27").unwrap()
}

fn populate_dir(path: &Utf8Path) {
    fs::create_dir_all(path.as_std_path()).unwrap();
    fs::write(path.join("entry").as_std_path(), b"x").unwrap();
}

#[test]
fn compressed_becomes_available_after_download() {
    let (_temp, root) = temp_root();
    let source = params();
    let backend = MockTransfer::default();

    assert!(!source.compressed_available(&root));
    let action = source
        .download(&root, OperationContext::new(&backend), false)
        .unwrap();

    assert_eq!(action, Action::Performed);
    assert!(source.compressed_available(&root));
    assert!(!source.uncompressed_available(&root));
    assert_eq!(backend.downloads(), 1);
}

#[test]
fn second_download_is_a_noop() {
    let (_temp, root) = temp_root();
    let source = params();
    let backend = MockTransfer::default();
    let ctx = OperationContext::new(&backend);

    source.download(&root, ctx, false).unwrap();
    let action = source.download(&root, ctx, false).unwrap();

    assert_eq!(action, Action::Skipped);
    assert_eq!(backend.downloads(), 1);
}

#[test]
fn force_always_transfers() {
    let (_temp, root) = temp_root();
    let source = params();
    let backend = MockTransfer::default();
    let ctx = OperationContext::new(&backend);

    source.download(&root, ctx, true).unwrap();
    source.download(&root, ctx, true).unwrap();

    assert_eq!(backend.downloads(), 2);
    assert!(source.compressed_available(&root));
}

#[test]
fn decompress_without_archive_fails_and_touches_nothing() {
    let (_temp, root) = temp_root();
    let source = params();
    let backend = MockTransfer::default();

    let err = source
        .decompress(&root, OperationContext::new(&backend), false)
        .unwrap_err();

    assert_matches!(err, AfDataError::MissingInput(path) if path == source.path(&root, Slot::Compressed));
    assert_eq!(fs::read_dir(root.as_std_path()).unwrap().count(), 0);
    assert_eq!(backend.decompressions(), 0);
}

#[test]
fn failed_download_leaves_nothing_at_final_path() {
    let (_temp, root) = temp_root();
    let source = params();
    let backend = MockTransfer::failing_download();

    let err = source
        .download(&root, OperationContext::new(&backend), false)
        .unwrap_err();

    assert!(err.is_retryable());
    assert!(!source.compressed_available(&root));
    let destination = source.path(&root, Slot::Compressed);
    assert!(!destination.as_std_path().exists());
    let staging_dir = destination.parent().unwrap();
    assert_eq!(fs::read_dir(staging_dir.as_std_path()).unwrap().count(), 0);
}

#[test]
fn existing_uncompressed_skips_download() {
    let (_temp, root) = temp_root();
    let source = params();
    let backend = MockTransfer::default();
    populate_dir(&source.path(&root, Slot::Uncompressed));

    let action = source
        .download(&root, OperationContext::new(&backend), false)
        .unwrap();

    assert_eq!(action, Action::Skipped);
    assert_eq!(backend.downloads(), 0);
    assert!(!source.compressed_available(&root));
}

#[test]
fn empty_directory_is_not_available() {
    let (_temp, root) = temp_root();
    let source = params();
    fs::create_dir_all(source.path(&root, Slot::Compressed).as_std_path()).unwrap();

    assert!(!source.compressed_available(&root));
}

#[test]
fn tar_source_round_trip() {
    let (_temp, root) = temp_root();
    let source = params();
    let backend = MockTransfer::default();
    let ctx = OperationContext::new(&backend);

    source.download(&root, ctx, false).unwrap();
    let action = source.decompress(&root, ctx, false).unwrap();

    assert_eq!(action, Action::Performed);
    assert!(source.uncompressed_available(&root));
    let extracted = source.path(&root, Slot::Uncompressed).join("params_model_1.npz");
    assert!(extracted.as_std_path().is_file());

    let again = source.decompress(&root, ctx, false).unwrap();
    assert_eq!(again, Action::Skipped);
    assert_eq!(backend.decompressions(), 1);
}

#[test]
fn gunzip_source_produces_single_file() {
    let (_temp, root) = temp_root();
    let source = Source::new(SourceKind::Mgnify, "2022_05").unwrap();
    let backend = MockTransfer::default();
    let ctx = OperationContext::new(&backend);

    source.download(&root, ctx, false).unwrap();
    source.decompress(&root, ctx, false).unwrap();

    let fasta = source.path(&root, Slot::Uncompressed);
    assert!(fasta.as_std_path().is_file());
    assert_eq!(fasta.file_name(), Some("mgy_clusters_2022_05.fa"));
}

#[test]
fn failed_decompress_is_not_available() {
    let (_temp, root) = temp_root();
    let source = params();
    let ok = MockTransfer::default();
    source
        .download(&root, OperationContext::new(&ok), false)
        .unwrap();

    let failing = MockTransfer::failing_decompress();
    let err = source
        .decompress(&root, OperationContext::new(&failing), false)
        .unwrap_err();

    assert_matches!(err, AfDataError::Transfer { .. });
    assert!(!source.uncompressed_available(&root));
    assert!(!source.path(&root, Slot::Uncompressed).as_std_path().exists());
}

#[test]
fn rejected_artifact_is_never_published() {
    let (_temp, root) = temp_root();
    let source = params();
    let backend = MockTransfer::default();
    let verifier = MinimumSize(1024);
    let ctx = OperationContext::new(&backend).with_verifier(&verifier);

    let err = source.download(&root, ctx, false).unwrap_err();

    assert_matches!(err, AfDataError::Integrity(_));
    assert!(!source.compressed_available(&root));
}

#[test]
fn prune_keeps_archive_until_decompressed() {
    let (_temp, root) = temp_root();
    let source = params();
    let backend = MockTransfer::default();
    let ctx = OperationContext::new(&backend);

    assert_eq!(source.prune(&root).unwrap(), PruneAction::NothingToRemove);

    source.download(&root, ctx, false).unwrap();
    assert_eq!(source.prune(&root).unwrap(), PruneAction::Retained);
    assert!(source.compressed_available(&root));

    source.decompress(&root, ctx, false).unwrap();
    assert_eq!(source.prune(&root).unwrap(), PruneAction::Removed);
    assert!(!source.compressed_available(&root));
    assert!(source.uncompressed_available(&root));

    // Decompressed data keeps a later download from refetching the archive.
    assert_eq!(source.download(&root, ctx, false).unwrap(), Action::Skipped);
    assert_eq!(backend.downloads(), 1);
}

#[test]
fn mirror_source_reports_unsupported_operations() {
    let (_temp, root) = temp_root();
    let source = Source::new(SourceKind::PdbMmcif, "20240101").unwrap();
    let backend = MockTransfer::default();
    let ctx = OperationContext::new(&backend);

    source.download(&root, ctx, false).unwrap();
    assert!(source.path(&root, Slot::Compressed).as_std_path().is_dir());
    assert!(source.compressed_available(&root));

    let err = source.decompress(&root, ctx, false).unwrap_err();
    assert_matches!(
        err,
        AfDataError::UnsupportedFormat { kind: SourceKind::PdbMmcif, operation: "decompress" }
    );
    assert!(!err.is_retryable());

    let err = source.prune(&root).unwrap_err();
    assert!(err.is_unsupported());
    assert!(source.compressed_available(&root));
}

#[test]
fn concurrent_downloads_of_one_source_transfer_once() {
    let (_temp, root) = temp_root();
    let source = params();
    let backend = MockTransfer {
        delay: Some(Duration::from_millis(100)),
        ..MockTransfer::default()
    };

    thread::scope(|scope| {
        for _ in 0..2 {
            scope.spawn(|| {
                source
                    .download(&root, OperationContext::new(&backend), false)
                    .unwrap();
            });
        }
    });

    assert_eq!(backend.downloads(), 1);
    assert!(source.compressed_available(&root));
}

#[test]
fn interrupted_run_leftovers_are_swept_by_next_download() {
    let (_temp, root) = temp_root();
    let source = params();
    let archive = source.path(&root, Slot::Compressed);
    let dir = archive.parent().unwrap();
    fs::create_dir_all(dir.as_std_path()).unwrap();
    for stale in [".afdata-staging-hh9fHG.part", ".afdata-staging-mg7aKJ.part"] {
        fs::write(dir.join(stale).as_std_path(), vec![0u8; 1 << 20]).unwrap();
    }

    let backend = MockTransfer::default();
    source
        .download(&root, OperationContext::new(&backend), false)
        .unwrap();

    let names = fs::read_dir(dir.as_std_path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
        .collect::<Vec<_>>();
    assert_eq!(names, ["alphafold_params_2021-10-27.tar"]);
}

#[test]
fn failed_forced_download_keeps_published_archive() {
    let (_temp, root) = temp_root();
    let source = params();
    source
        .download(&root, OperationContext::new(&MockTransfer::default()), false)
        .unwrap();

    let failing = MockTransfer::failing_download();
    source
        .download(&root, OperationContext::new(&failing), true)
        .unwrap_err();

    let archive = source.path(&root, Slot::Compressed);
    assert_eq!(fs::read(archive.as_std_path()).unwrap(), b"archive bytes");
}

#[test]
fn forced_decompress_swaps_whole_tree() {
    let (_temp, root) = temp_root();
    let source = params();
    let backend = MockTransfer::default();
    let ctx = OperationContext::new(&backend);
    source.download(&root, ctx, false).unwrap();

    let installed = source.path(&root, Slot::Uncompressed);
    fs::create_dir_all(installed.as_std_path()).unwrap();
    for old in ["a_model_3.npz", "model_2.npz"] {
        fs::write(installed.join(old).as_std_path(), b"old").unwrap();
    }

    source.decompress(&root, ctx, true).unwrap();

    let names = fs::read_dir(installed.as_std_path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
        .collect::<Vec<_>>();
    assert_eq!(names, ["params_model_1.npz"]);
    let siblings = fs::read_dir(installed.parent().unwrap().as_std_path())
        .unwrap()
        .count();
    assert_eq!(siblings, 1);
}

#[test]
fn forced_resync_offers_published_mirror_for_reuse() {
    let (_temp, root) = temp_root();
    let source = Source::new(SourceKind::PdbMmcif, "20230102").unwrap();
    let backend = MockTransfer::default();
    let ctx = OperationContext::new(&backend);

    source.download(&root, ctx, false).unwrap();
    source.download(&root, ctx, true).unwrap();

    let published = source.path(&root, Slot::Compressed).into_std_path_buf();
    assert_eq!(
        *backend.previous.lock().unwrap(),
        vec![None, Some(published)]
    );
    assert!(source.compressed_available(&root));
}

#[cfg(unix)]
#[test]
fn real_tar_archive_is_installed() {
    let (_temp, root) = temp_root();
    let source = params();
    let archive = source.path(&root, Slot::Compressed);
    fs::create_dir_all(archive.parent().unwrap().as_std_path()).unwrap();

    let content = root.join("fixture");
    fs::create_dir_all(content.as_std_path()).unwrap();
    fs::write(content.join("params_model_1.npz").as_std_path(), b"weights").unwrap();
    let built = Command::new("tar")
        .arg("-cf")
        .arg(archive.as_std_path())
        .arg("-C")
        .arg(content.as_std_path())
        .arg(".")
        .status();
    if !matches!(built, Ok(status) if status.success()) {
        return;
    }

    let backend = SystemTransfer::with_tool(DownloadTool::Curl(PathBuf::from("curl")));
    source
        .decompress(&root, OperationContext::new(&backend), false)
        .unwrap();

    let extracted = source.path(&root, Slot::Uncompressed).join("params_model_1.npz");
    assert_eq!(fs::read(extracted.as_std_path()).unwrap(), b"weights");
}
