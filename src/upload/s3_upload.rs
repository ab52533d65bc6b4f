// backuptool/src/upload/s3_upload.rs
use aws_sdk_s3 as s3;
use s3::config::Region;
use s3::primitives::ByteStream;
use s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use std::path::Path;
use tracing::{info, warn};

use super::Uploader;
use crate::config::SpacesConfig;
use crate::errors::UploadError;

/// Uploads artifacts to an S3-compatible bucket (AWS, DigitalOcean Spaces, MinIO...).
#[derive(Debug)]
pub struct S3Uploader {
    config: SpacesConfig,
}

impl S3Uploader {
    pub fn new(config: SpacesConfig) -> Self {
        S3Uploader { config }
    }

    async fn client(&self) -> s3::Client {
        let mut loader = aws_config::defaults(s3::config::BehaviorVersion::latest())
            .region(Region::new(self.config.region.clone()));
        if let Some(endpoint) = &self.config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        if let (Some(key_id), Some(secret)) = (&self.config.access_key_id, &self.config.secret_access_key) {
            loader = loader.credentials_provider(s3::config::Credentials::new(
                key_id,
                secret,
                None,     // session_token
                None,     // expiry
                "Static", // provider_name
            ));
        }
        let sdk_config = loader.load().await;

        // Custom endpoints rarely support virtual-hosted bucket addressing.
        let s3_config = s3::config::Builder::from(&sdk_config)
            .force_path_style(self.config.endpoint_url.is_some())
            .build();
        s3::Client::from_conf(s3_config)
    }

    /// Makes sure the bucket exists, creating it when the service reports it missing.
    async fn ensure_bucket(&self, client: &s3::Client) -> Result<(), UploadError> {
        let bucket = &self.config.bucket_name;
        match client.head_bucket().bucket(bucket).send().await {
            Ok(_) => return Ok(()),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => {
                info!("Bucket {} not found, creating it", bucket);
            }
            Err(e) => {
                return Err(UploadError::S3Sdk(format!(
                    "Could not access bucket {}: {}",
                    bucket,
                    s3::error::DisplayErrorContext(&e)
                )));
            }
        }

        let mut request = client.create_bucket().bucket(bucket);
        // us-east-1 is the implicit default and rejects an explicit constraint.
        if self.config.endpoint_url.is_none() && self.config.region != "us-east-1" {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.config.region.as_str()))
                    .build(),
            );
        }
        if let Err(e) = request.send().await {
            let already_ours = e
                .as_service_error()
                .is_some_and(|se| se.is_bucket_already_owned_by_you());
            if !already_ours {
                return Err(UploadError::S3Sdk(format!(
                    "Failed to create bucket {}: {}",
                    bucket,
                    s3::error::DisplayErrorContext(&e)
                )));
            }
            warn!("Bucket {} already exists and is owned by this account", bucket);
        }
        Ok(())
    }
}

impl Uploader for S3Uploader {
    async fn upload(&self, artifact: &Path) -> Result<String, UploadError> {
        let file_name = artifact
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| UploadError::Io(std::io::Error::other(format!("{} has no file name", artifact.display()))))?;
        let key = object_key(self.config.folder_prefix.as_deref(), &file_name);

        info!(
            "Uploading {} to S3 bucket {} with key {}",
            artifact.display(),
            self.config.bucket_name,
            key
        );

        let client = self.client().await;
        self.ensure_bucket(&client).await?;

        let body = ByteStream::from_path(artifact).await.map_err(|e| {
            UploadError::S3Sdk(format!("Failed to read {}: {}", artifact.display(), e))
        })?;

        client
            .put_object()
            .bucket(&self.config.bucket_name)
            .key(&key)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                UploadError::S3Sdk(format!(
                    "Failed to upload {} to bucket {} with key {}: {}",
                    artifact.display(),
                    self.config.bucket_name,
                    key,
                    s3::error::DisplayErrorContext(&e)
                ))
            })?;

        Ok(format!(
            "Backup uploaded to S3 bucket {} as {}",
            self.config.bucket_name, key
        ))
    }
}

fn object_key(prefix: Option<&str>, file_name: &str) -> String {
    match prefix.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty()) {
        Some(prefix) => format!("{}/{}", prefix, file_name),
        None => file_name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_with_and_without_prefix() {
        assert_eq!(object_key(None, "backup_a.zip"), "backup_a.zip");
        assert_eq!(object_key(Some(""), "backup_a.zip"), "backup_a.zip");
        assert_eq!(object_key(Some("/nightly/"), "backup_a.zip"), "nightly/backup_a.zip");
        assert_eq!(object_key(Some("hosts/web1"), "backup_a.zip"), "hosts/web1/backup_a.zip");
    }
}
