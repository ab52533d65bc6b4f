// backuptool/src/upload/mod.rs
pub(crate) mod credentials;
pub(crate) mod drive;
pub(crate) mod s3_upload;

use std::future::Future;
use std::path::Path;

use crate::config::UploadConfig;
use crate::errors::UploadError;

pub use drive::DriveUploader;
pub use s3_upload::S3Uploader;

/// Transfers one local artifact into the configured remote container.
///
/// Implementations authenticate, make sure the container exists and upload the
/// file in a single call. `Ok` carries a human-readable message.
pub trait Uploader {
    fn upload(&self, artifact: &Path) -> impl Future<Output = Result<String, UploadError>>;
}

/// The backend selected by configuration. Exactly one is active per process.
#[derive(Debug)]
pub enum RemoteUploader {
    Drive(DriveUploader),
    S3(S3Uploader),
}

impl RemoteUploader {
    pub fn from_config(config: &UploadConfig) -> Self {
        match config {
            UploadConfig::Drive(drive) => RemoteUploader::Drive(DriveUploader::new(drive.clone())),
            UploadConfig::S3(spaces) => RemoteUploader::S3(S3Uploader::new(spaces.clone())),
        }
    }
}

impl Uploader for RemoteUploader {
    async fn upload(&self, artifact: &Path) -> Result<String, UploadError> {
        match self {
            RemoteUploader::Drive(drive) => drive.upload(artifact).await,
            RemoteUploader::S3(s3) => s3.upload(artifact).await,
        }
    }
}
