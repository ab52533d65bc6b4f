use std::path::PathBuf;
use thiserror::Error;

/// Problems with the environment-sourced configuration. Fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Required configuration {0} is not set")]
    Missing(&'static str),

    #[error("Invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("Conflicting configuration: {0}")]
    Conflict(String),
}

/// Failures while producing the backup artifact.
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Source for archival is not a directory: {}", .0.display())]
    SourceNotDirectory(PathBuf),

    #[error("No eligible file found in {}", .0.display())]
    NoEligibleFile(PathBuf),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to walk directory: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl ArchiveError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ArchiveError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failures while authenticating against or transferring to the remote store.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Credentials error: {0}")]
    Credentials(String),

    #[error("Authorization failed: {0}")]
    Auth(String),

    #[error("HTTP request error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Remote API returned {status}: {body}")]
    Remote { status: u16, body: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("AWS SDK S3 error: {0}")]
    S3Sdk(String),
}

/// Removing the local artifact after a successful upload failed.
#[derive(Error, Debug)]
#[error("Failed to remove local artifact {}: {source}", path.display())]
pub struct CleanupError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// History store read/write failures.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Stored timestamp {value:?} is not in YYYY-MM-DD HH:MM:SS format: {source}")]
    Timestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("Unknown backup status {0:?}")]
    Status(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Backup attempt panicked: {0}")]
    Panicked(String),
}

pub type Result<T> = std::result::Result<T, AppError>;
