// backuptool/src/backup/logic.rs
use chrono::{DateTime, Local};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::archive;
use crate::config::{ArchiveMode, BackupConfig};
use crate::errors::{AppError, ArchiveError, CleanupError, Result};
use crate::history::{BackupStatus, HistoryStore};
use crate::upload::Uploader;

/// Name recorded when an attempt fails before an artifact name is known.
pub const UNKNOWN_ARTIFACT: &str = "N/A";
const MESSAGE_SEPARATOR: &str = " | ";

/// How a single call to [`BackupOrchestrator::perform_backup`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Uploaded and recorded as a success. The local artifact has been removed (best effort).
    Succeeded { artifact: String },
    /// Nothing was uploaded.
    ArchiveFailed { artifact: String },
    /// The artifact was kept on disk at `path`.
    UploadFailed { artifact: String, path: PathBuf },
    /// An unexpected error or panic, recorded under [`UNKNOWN_ARTIFACT`].
    Aborted,
    /// Another attempt was still running. Nothing was recorded.
    Skipped,
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Succeeded { .. })
    }
}

/// What to archive for one attempt and where the artifact goes.
#[derive(Debug, Clone)]
pub struct ArchiveJob {
    pub source_dir: PathBuf,
    pub archive_mode: ArchiveMode,
    /// Latest-file mode: the file the artifact is named after.
    pub selected_file: Option<PathBuf>,
    pub artifact_name: String,
    pub destination: PathBuf,
}

impl ArchiveJob {
    fn run(&self) -> std::result::Result<String, ArchiveError> {
        match self.archive_mode {
            ArchiveMode::Tree => archive::compress_tree(&self.source_dir, &self.destination),
            ArchiveMode::LatestFile => archive::compress_latest_file(&self.source_dir, &self.destination),
        }
    }
}

/// `backup_<label>_<YYYYMMDD_HHMMSS>.zip`
pub fn artifact_name(source_label: &str, started: DateTime<Local>) -> String {
    format!(
        "{}{}_{}{}",
        archive::ARTIFACT_PREFIX,
        source_label,
        started.format("%Y%m%d_%H%M%S"),
        archive::ARTIFACT_EXTENSION
    )
}

/// Runs compress → upload → record → cleanup for one attempt.
pub struct BackupOrchestrator<U> {
    config: BackupConfig,
    uploader: U,
    history: HistoryStore,
    in_flight: Mutex<()>,
}

impl<U: Uploader> BackupOrchestrator<U> {
    pub fn new(config: BackupConfig, uploader: U, history: HistoryStore) -> Self {
        BackupOrchestrator {
            config,
            uploader,
            history,
            in_flight: Mutex::new(()),
        }
    }

    #[cfg(test)]
    pub fn uploader(&self) -> &U {
        &self.uploader
    }

    /// Runs one backup attempt. Never returns an error: every outcome is recorded in history.
    pub async fn perform_backup(&self) -> AttemptOutcome {
        let Ok(_guard) = self.in_flight.try_lock() else {
            warn!("A backup is already running, skipping this trigger");
            return AttemptOutcome::Skipped;
        };

        let started = Local::now();
        match AssertUnwindSafe(self.run_attempt(started)).catch_unwind().await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => self.abort(e).await,
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                self.abort(AppError::Panicked(reason)).await
            }
        }
    }

    async fn abort(&self, e: AppError) -> AttemptOutcome {
        error!("Error in backup process: {}", e);
        self.history
            .record(UNKNOWN_ARTIFACT, BackupStatus::Failure, &e.to_string())
            .await;
        AttemptOutcome::Aborted
    }

    async fn run_attempt(&self, started: DateTime<Local>) -> Result<AttemptOutcome> {
        info!("Starting backup of {}", self.config.source_dir.display());

        let job = match self.plan(started)? {
            Ok(job) => job,
            Err((artifact, e)) => {
                error!("Failed to compress: {}", e);
                self.history
                    .record(&artifact, BackupStatus::Failure, &e.to_string())
                    .await;
                return Ok(AttemptOutcome::ArchiveFailed { artifact });
            }
        };

        let archive_message = match job.run() {
            Ok(message) => {
                info!("{}", message);
                message
            }
            Err(e) => {
                error!("Failed to compress: {}", e);
                self.history
                    .record(&job.artifact_name, BackupStatus::Failure, &e.to_string())
                    .await;
                return Ok(AttemptOutcome::ArchiveFailed {
                    artifact: job.artifact_name,
                });
            }
        };

        match self.uploader.upload(&job.destination).await {
            Ok(upload_message) => {
                info!("Backup completed and uploaded: {}", job.artifact_name);
                self.history
                    .record(
                        &job.artifact_name,
                        BackupStatus::Success,
                        &join_messages(&archive_message, &upload_message),
                    )
                    .await;
                match remove_artifact(&job.destination).await {
                    Ok(()) => info!("Local file {} removed after successful upload", job.artifact_name),
                    Err(e) => error!("{}", e),
                }
                Ok(AttemptOutcome::Succeeded {
                    artifact: job.artifact_name,
                })
            }
            Err(e) => {
                error!("Backup compressed but upload failed: {}", e);
                self.history
                    .record(
                        &job.artifact_name,
                        BackupStatus::Failure,
                        &join_messages(&archive_message, &e.to_string()),
                    )
                    .await;
                Ok(AttemptOutcome::UploadFailed {
                    artifact: job.artifact_name,
                    path: job.destination,
                })
            }
        }
    }

    /// Resolves the artifact name and, in latest-file mode, the file to archive.
    ///
    /// The inner error carries the name to record the archive failure under.
    fn plan(
        &self,
        started: DateTime<Local>,
    ) -> Result<std::result::Result<ArchiveJob, (String, ArchiveError)>> {
        let source_dir = &self.config.source_dir;
        let dir_label = source_label(source_dir)?;

        let selected_file = match self.config.archive_mode {
            ArchiveMode::Tree => None,
            ArchiveMode::LatestFile => match archive::select_latest_file(source_dir) {
                Ok(file) => Some(file),
                Err(e) => return Ok(Err((artifact_name(&dir_label, started), e))),
            },
        };

        let label = match &selected_file {
            Some(file) => file_label(file)?,
            None => dir_label,
        };
        let name = artifact_name(&label, started);

        Ok(Ok(ArchiveJob {
            source_dir: source_dir.clone(),
            archive_mode: self.config.archive_mode,
            selected_file,
            destination: self.config.output_dir.join(&name),
            artifact_name: name,
        }))
    }
}

/// Label for the source directory. Relative paths such as `.` or `..` are
/// resolved first; only a directory without a name (`/`) is rejected.
fn source_label(source_dir: &Path) -> Result<String> {
    match std::fs::canonicalize(source_dir).or_else(|_| std::path::absolute(source_dir)) {
        Ok(resolved) => file_label(&resolved),
        Err(_) => file_label(source_dir),
    }
}

fn file_label(path: &Path) -> Result<String> {
    path.components()
        .next_back()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .filter(|label| !label.is_empty() && label != "/" && label != "." && label != "..")
        .ok_or_else(|| AppError::InvalidInput(format!("Cannot derive a backup name from {}", path.display())))
}

fn join_messages(first: &str, second: &str) -> String {
    format!("{}{}{}", first, MESSAGE_SEPARATOR, second)
}

async fn remove_artifact(path: &Path) -> std::result::Result<(), CleanupError> {
    tokio::fs::remove_file(path).await.map_err(|source| CleanupError {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::UploadError;
    use crate::history::BackupRecord;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct FakeUploader {
        calls: AtomicUsize,
        fail_with: Option<String>,
    }

    impl FakeUploader {
        fn succeeding() -> Self {
            FakeUploader {
                calls: AtomicUsize::new(0),
                fail_with: None,
            }
        }

        fn failing(reason: &str) -> Self {
            FakeUploader {
                calls: AtomicUsize::new(0),
                fail_with: Some(reason.to_string()),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Uploader for FakeUploader {
        async fn upload(&self, artifact: &Path) -> std::result::Result<String, UploadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(artifact.exists(), "artifact must exist when uploading");
            match &self.fail_with {
                Some(reason) => Err(UploadError::Auth(reason.clone())),
                None => Ok("uploaded".to_string()),
            }
        }
    }

    struct PanickingUploader;

    impl Uploader for PanickingUploader {
        async fn upload(&self, _artifact: &Path) -> std::result::Result<String, UploadError> {
            panic!("remote client blew up");
        }
    }

    struct Fixture {
        _root: TempDir,
        source: PathBuf,
        output: PathBuf,
        history: HistoryStore,
    }

    impl Fixture {
        fn new() -> Self {
            let root = tempfile::tempdir().unwrap();
            let source = root.path().join("photos");
            let output = root.path().join("out");
            fs::create_dir_all(source.join("2024")).unwrap();
            fs::create_dir_all(&output).unwrap();
            fs::write(source.join("2024/beach.jpg"), b"jpeg bytes").unwrap();
            fs::write(source.join("notes.txt"), b"notes").unwrap();
            let history = HistoryStore::new(root.path().join("backups.db"));
            Fixture {
                _root: root,
                source,
                output,
                history,
            }
        }

        fn orchestrator<U: Uploader>(&self, mode: ArchiveMode, uploader: U) -> BackupOrchestrator<U> {
            BackupOrchestrator::new(
                BackupConfig {
                    source_dir: self.source.clone(),
                    archive_mode: mode,
                    output_dir: self.output.clone(),
                },
                uploader,
                self.history.clone(),
            )
        }

        async fn records(&self) -> Vec<BackupRecord> {
            self.history.recent(100).await.unwrap()
        }

        fn artifacts(&self) -> Vec<PathBuf> {
            fs::read_dir(&self.output)
                .unwrap()
                .map(|e| e.unwrap().path())
                .collect()
        }
    }

    #[test]
    fn test_artifact_name_format() {
        let started = Local::now();
        let name = artifact_name("photos", started);
        assert_eq!(
            name,
            format!("backup_photos_{}.zip", started.format("%Y%m%d_%H%M%S"))
        );
        assert_eq!(name.len(), "backup_photos_YYYYMMDD_HHMMSS.zip".len());
    }

    #[tokio::test]
    async fn test_upload_success_records_success_and_removes_artifact() {
        let fx = Fixture::new();
        let orchestrator = fx.orchestrator(ArchiveMode::Tree, FakeUploader::succeeding());

        let outcome = orchestrator.perform_backup().await;

        let AttemptOutcome::Succeeded { artifact } = outcome else {
            panic!("unexpected outcome {:?}", outcome);
        };
        assert!(artifact.starts_with("backup_photos_"));
        assert_eq!(orchestrator.uploader().calls(), 1);
        assert!(fx.artifacts().is_empty());

        let records = fx.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, BackupStatus::Success);
        assert_eq!(records[0].backup_name, artifact);
        assert!(records[0].message.ends_with(" | uploaded"));
    }

    #[tokio::test]
    async fn test_upload_failure_keeps_artifact_and_records_failure() {
        let fx = Fixture::new();
        let orchestrator = fx.orchestrator(ArchiveMode::Tree, FakeUploader::failing("token revoked"));

        let outcome = orchestrator.perform_backup().await;

        let AttemptOutcome::UploadFailed { artifact, path } = outcome else {
            panic!("unexpected outcome {:?}", outcome);
        };
        assert!(path.exists());
        assert_eq!(fx.artifacts(), vec![path.clone()]);

        let archive = zip::ZipArchive::new(fs::File::open(&path).unwrap()).unwrap();
        assert_eq!(archive.len(), 2);

        let records = fx.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, BackupStatus::Failure);
        assert_eq!(records[0].backup_name, artifact);
        assert!(records[0].message.contains(" | "));
        assert!(records[0].message.contains("token revoked"));
        assert_eq!(fx.history.last_success_timestamp().await, None);
    }

    #[tokio::test]
    async fn test_archive_failure_records_once_and_never_uploads() {
        let fx = Fixture::new();
        fs::remove_dir_all(&fx.source).unwrap();
        let orchestrator = fx.orchestrator(ArchiveMode::Tree, FakeUploader::succeeding());

        let outcome = orchestrator.perform_backup().await;

        assert!(matches!(outcome, AttemptOutcome::ArchiveFailed { .. }));
        assert_eq!(orchestrator.uploader().calls(), 0);
        let records = fx.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, BackupStatus::Failure);
        assert!(records[0].backup_name.starts_with("backup_photos_"));
    }

    #[tokio::test]
    async fn test_latest_file_mode_names_artifact_after_selected_file() {
        let fx = Fixture::new();
        fs::write(fx.source.join("dump-latest.sql"), b"select 1;").unwrap();
        let newest = fs::File::options()
            .write(true)
            .open(fx.source.join("dump-latest.sql"))
            .unwrap();
        newest
            .set_modified(std::time::SystemTime::now() + std::time::Duration::from_secs(60))
            .unwrap();
        let orchestrator = fx.orchestrator(ArchiveMode::LatestFile, FakeUploader::failing("offline"));

        let outcome = orchestrator.perform_backup().await;

        let AttemptOutcome::UploadFailed { artifact, path } = outcome else {
            panic!("unexpected outcome {:?}", outcome);
        };
        assert!(artifact.starts_with("backup_dump-latest.sql_"));
        let archive = zip::ZipArchive::new(fs::File::open(&path).unwrap()).unwrap();
        let names: Vec<&str> = archive.file_names().collect();
        assert_eq!(names, vec!["dump-latest.sql"]);
    }

    #[tokio::test]
    async fn test_latest_file_mode_without_files_is_an_archive_failure() {
        let fx = Fixture::new();
        fs::remove_file(fx.source.join("notes.txt")).unwrap();
        let orchestrator = fx.orchestrator(ArchiveMode::LatestFile, FakeUploader::succeeding());

        let outcome = orchestrator.perform_backup().await;

        assert!(matches!(outcome, AttemptOutcome::ArchiveFailed { .. }));
        assert_eq!(orchestrator.uploader().calls(), 0);
        assert!(fx.artifacts().is_empty());
        let records = fx.records().await;
        assert_eq!(records.len(), 1);
        assert!(records[0].message.contains("No eligible file"));
    }

    #[tokio::test]
    async fn test_panic_is_caught_and_recorded_as_unknown_artifact() {
        let fx = Fixture::new();
        let orchestrator = fx.orchestrator(ArchiveMode::Tree, PanickingUploader);

        let outcome = orchestrator.perform_backup().await;

        assert_eq!(outcome, AttemptOutcome::Aborted);
        let records = fx.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].backup_name, UNKNOWN_ARTIFACT);
        assert_eq!(records[0].status, BackupStatus::Failure);
        assert!(records[0].message.contains("remote client blew up"));
    }

    #[tokio::test]
    async fn test_unnameable_source_is_aborted() {
        let fx = Fixture::new();
        let orchestrator = BackupOrchestrator::new(
            BackupConfig {
                source_dir: PathBuf::from("/"),
                archive_mode: ArchiveMode::Tree,
                output_dir: fx.output.clone(),
            },
            FakeUploader::succeeding(),
            fx.history.clone(),
        );

        assert_eq!(orchestrator.perform_backup().await, AttemptOutcome::Aborted);
        assert_eq!(orchestrator.uploader().calls(), 0);
        assert_eq!(fx.records().await[0].backup_name, UNKNOWN_ARTIFACT);
    }

    #[test]
    fn test_relative_source_is_labelled_by_resolved_name() -> anyhow::Result<()> {
        let cwd = std::env::current_dir()?;
        let expected = cwd.file_name().map(|n| n.to_string_lossy().into_owned());
        assert_eq!(source_label(Path::new(".")).ok(), expected);
        assert_eq!(
            source_label(Path::new("..")).ok(),
            cwd.parent()
                .and_then(Path::file_name)
                .map(|n| n.to_string_lossy().into_owned())
        );
        assert!(source_label(Path::new("/")).is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_source_ending_in_parent_component_is_backed_up() {
        let fx = Fixture::new();
        let orchestrator = BackupOrchestrator::new(
            BackupConfig {
                source_dir: fx.source.join("2024").join(".."),
                archive_mode: ArchiveMode::Tree,
                output_dir: fx.output.clone(),
            },
            FakeUploader::succeeding(),
            fx.history.clone(),
        );

        let outcome = orchestrator.perform_backup().await;

        let AttemptOutcome::Succeeded { artifact } = outcome else {
            panic!("unexpected outcome {:?}", outcome);
        };
        assert!(artifact.starts_with("backup_photos_"), "{}", artifact);
        assert_eq!(orchestrator.uploader().calls(), 1);
    }

    #[tokio::test]
    async fn test_latest_file_mode_never_rearchives_kept_artifacts() {
        let fx = Fixture::new();
        fs::write(fx.source.join("db.sql"), b"select 1;").unwrap();
        // Artifacts land next to the data, as with the default output directory.
        let orchestrator = BackupOrchestrator::new(
            BackupConfig {
                source_dir: fx.source.clone(),
                archive_mode: ArchiveMode::LatestFile,
                output_dir: fx.source.clone(),
            },
            FakeUploader::failing("offline"),
            fx.history.clone(),
        );
        let db = fs::File::options().write(true).open(fx.source.join("db.sql")).unwrap();
        db.set_modified(std::time::SystemTime::now() - std::time::Duration::from_secs(60))
            .unwrap();
        fs::File::options()
            .write(true)
            .open(fx.source.join("notes.txt"))
            .unwrap()
            .set_modified(std::time::SystemTime::now() - std::time::Duration::from_secs(120))
            .unwrap();

        for _ in 0..2 {
            let outcome = orchestrator.perform_backup().await;
            let AttemptOutcome::UploadFailed { artifact, path } = outcome else {
                panic!("unexpected outcome {:?}", outcome);
            };
            assert!(artifact.starts_with("backup_db.sql_"), "{}", artifact);
            let archive = zip::ZipArchive::new(fs::File::open(&path).unwrap()).unwrap();
            let names: Vec<&str> = archive.file_names().collect();
            assert_eq!(names, vec!["db.sql"]);
        }
        assert_eq!(orchestrator.uploader().calls(), 2);
    }

    #[tokio::test]
    async fn test_overlapping_attempt_is_skipped() {
        let fx = Fixture::new();
        let orchestrator = fx.orchestrator(ArchiveMode::Tree, FakeUploader::succeeding());

        let _held = orchestrator.in_flight.try_lock().unwrap();
        assert_eq!(orchestrator.perform_backup().await, AttemptOutcome::Skipped);
        assert_eq!(orchestrator.uploader().calls(), 0);
        assert!(fx.records().await.is_empty());
    }
}
