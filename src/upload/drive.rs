// backuptool/src/upload/drive.rs
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use reqwest::{Body, Client, Response};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use super::Uploader;
use super::credentials::{self, StoredCredentials};
use crate::config::DriveConfig;
use crate::errors::UploadError;

const FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";
const UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3/files";
const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
const ZIP_MIME_TYPE: &str = "application/zip";

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Debug, Deserialize)]
struct DriveFile {
    id: String,
    #[serde(default)]
    name: String,
}

/// Uploads artifacts into a Google Drive folder, creating the folder on first use.
#[derive(Debug)]
pub struct DriveUploader {
    config: DriveConfig,
    client: Client,
}

impl DriveUploader {
    pub fn new(config: DriveConfig) -> Self {
        DriveUploader {
            config,
            client: Client::new(),
        }
    }

    /// Returns the id of the folder named `folder_name`, creating it when absent.
    async fn get_or_create_folder(&self, creds: &StoredCredentials, folder_name: &str) -> Result<String, UploadError> {
        let response = self
            .client
            .get(FILES_URL)
            .bearer_auth(&creds.access_token)
            .query(&[
                ("q", folder_query(folder_name).as_str()),
                ("fields", "files(id,name)"),
                ("spaces", "drive"),
            ])
            .send()
            .await?;
        let list: FileList = check_status(response).await?.json().await?;

        if let Some(folder) = list.files.into_iter().find(|f| f.name == folder_name) {
            debug!("Found Drive folder {} ({})", folder_name, folder.id);
            return Ok(folder.id);
        }

        info!("Drive folder {} not found, creating it", folder_name);
        let response = self
            .client
            .post(FILES_URL)
            .bearer_auth(&creds.access_token)
            .query(&[("fields", "id,name")])
            .json(&json!({ "name": folder_name, "mimeType": FOLDER_MIME_TYPE }))
            .send()
            .await?;
        let folder: DriveFile = check_status(response).await?.json().await?;
        Ok(folder.id)
    }

    /// Resumable upload: one request opens the session, a second streams the bytes.
    async fn upload_file(&self, creds: &StoredCredentials, folder_id: &str, artifact: &Path) -> Result<String, UploadError> {
        let name = artifact
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| UploadError::Io(std::io::Error::other(format!("{} has no file name", artifact.display()))))?;
        let file = File::open(artifact).await?;
        let size = file.metadata().await?.len();

        let response = self
            .client
            .post(UPLOAD_URL)
            .bearer_auth(&creds.access_token)
            .query(&[("uploadType", "resumable")])
            .header("X-Upload-Content-Type", ZIP_MIME_TYPE)
            .header("X-Upload-Content-Length", size)
            .json(&json!({ "name": name, "parents": [folder_id] }))
            .send()
            .await?;
        let response = check_status(response).await?;
        let session_url = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| UploadError::Remote {
                status: response.status().as_u16(),
                body: "resumable upload session has no Location header".to_string(),
            })?;

        let response = self
            .client
            .put(session_url)
            .header(CONTENT_TYPE, ZIP_MIME_TYPE)
            .header(CONTENT_LENGTH, size)
            .body(Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await?;
        let uploaded: DriveFile = check_status(response).await?.json().await?;
        debug!("Uploaded {} as Drive file {}", name, uploaded.id);
        Ok(name)
    }
}

impl Uploader for DriveUploader {
    async fn upload(&self, artifact: &Path) -> Result<String, UploadError> {
        info!("Uploading {} to Google Drive folder {}", artifact.display(), self.config.folder_name);
        let creds = credentials::authorize(
            &self.client,
            &self.config.client_secrets_file,
            &self.config.credentials_file,
        )
        .await?;

        let folder_id = self.get_or_create_folder(&creds, &self.config.folder_name).await?;
        let name = self.upload_file(&creds, &folder_id, artifact).await?;

        Ok(format!(
            "Backup {} uploaded to Google Drive folder {}",
            name, self.config.folder_name
        ))
    }
}

/// Drive search query for a non-trashed folder with exactly this name.
fn folder_query(folder_name: &str) -> String {
    let escaped = folder_name.replace('\\', "\\\\").replace('\'', "\\'");
    format!(
        "name = '{}' and mimeType = '{}' and trashed = false",
        escaped, FOLDER_MIME_TYPE
    )
}

async fn check_status(response: Response) -> Result<Response, UploadError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(UploadError::Remote {
        status: status.as_u16(),
        body,
    })
}
