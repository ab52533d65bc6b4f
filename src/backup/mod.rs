pub(crate) mod archive;
mod logic;

use tracing::info;

use crate::config::AppConfig;
use crate::history::HistoryStore;
use crate::upload::RemoteUploader;

pub use logic::{AttemptOutcome, BackupOrchestrator};

/// Builds the orchestrator for the configured source and upload backend.
pub fn build_orchestrator(app_config: &AppConfig, history: HistoryStore) -> BackupOrchestrator<RemoteUploader> {
    let uploader = RemoteUploader::from_config(&app_config.upload);
    info!(
        "Backing up {} ({:?} mode) with {} backend",
        app_config.backup.source_dir.display(),
        app_config.backup.archive_mode,
        match uploader {
            RemoteUploader::Drive(_) => "Google Drive",
            RemoteUploader::S3(_) => "S3",
        }
    );
    BackupOrchestrator::new(app_config.backup.clone(), uploader, history)
}
