// backuptool/src/upload/credentials.rs
//! OAuth2 credentials for the Google Drive backend.
//!
//! Cached credentials are read from a JSON file, refreshed when they are about
//! to expire and written back after every successful authentication. Without a
//! cache the user is walked through the installed-app flow on the terminal once.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use url::Url;

use crate::errors::UploadError;

const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";
const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const OOB_REDIRECT_URI: &str = "urn:ietf:wg:oauth:2.0:oob";
const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

/// The `installed` (or `web`) section of a Google `client_secrets.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

fn default_auth_uri() -> String {
    DEFAULT_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ClientSecrets {
    pub fn parse(json: &str) -> Result<Self, UploadError> {
        let file: ClientSecretsFile = serde_json::from_str(json)?;
        file.installed.or(file.web).ok_or_else(|| {
            UploadError::Credentials(
                "client secrets file has neither an 'installed' nor a 'web' section".to_string(),
            )
        })
    }

    pub async fn load(path: &Path) -> Result<Self, UploadError> {
        let json = tokio::fs::read_to_string(path).await.map_err(|e| {
            UploadError::Credentials(format!(
                "Failed to read client secrets {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::parse(&json)
    }

    fn redirect_uri(&self) -> &str {
        self.redirect_uris
            .first()
            .map(String::as_str)
            .unwrap_or(OOB_REDIRECT_URI)
    }

    /// Consent page the user opens to obtain an authorization code.
    pub fn authorization_url(&self) -> Result<Url, UploadError> {
        Url::parse_with_params(
            &self.auth_uri,
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.redirect_uri()),
                ("scope", DRIVE_SCOPE),
                ("response_type", "code"),
                ("access_type", "offline"),
                ("prompt", "consent"),
            ],
        )
        .map_err(|e| UploadError::Credentials(format!("Invalid auth_uri {}: {}", self.auth_uri, e)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredentials {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl StoredCredentials {
    /// Treats tokens within a minute of expiry as already expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= now + Duration::seconds(EXPIRY_MARGIN_SECS),
            None => false,
        }
    }

    fn from_response(response: TokenResponse, previous_refresh: Option<String>) -> Self {
        StoredCredentials {
            access_token: response.access_token,
            // Refresh responses usually omit the refresh token; keep the old one.
            refresh_token: response.refresh_token.or(previous_refresh),
            token_type: response.token_type.unwrap_or_else(default_token_type),
            expires_at: response
                .expires_in
                .map(|secs| Utc::now() + Duration::seconds(secs)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
    token_type: Option<String>,
}

/// Loads cached credentials. A missing file is not an error.
pub async fn load_credentials(path: &Path) -> Result<Option<StoredCredentials>, UploadError> {
    match tokio::fs::read_to_string(path).await {
        Ok(json) => {
            let creds = serde_json::from_str(&json).map_err(|e| {
                UploadError::Credentials(format!(
                    "Credentials file {} is not valid: {}",
                    path.display(),
                    e
                ))
            })?;
            Ok(Some(creds))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(UploadError::Io(e)),
    }
}

pub async fn save_credentials(path: &Path, creds: &StoredCredentials) -> Result<(), UploadError> {
    let json = serde_json::to_string_pretty(creds)?;
    tokio::fs::write(path, json).await?;
    Ok(())
}

/// Returns usable credentials: cached, refreshed or freshly authorized, and persists them.
pub async fn authorize(
    client: &reqwest::Client,
    client_secrets_file: &Path,
    credentials_file: &Path,
) -> Result<StoredCredentials, UploadError> {
    let secrets = ClientSecrets::load(client_secrets_file).await?;

    let creds = match load_credentials(credentials_file).await? {
        None => {
            info!("No stored credentials in {}, starting command-line authorization", credentials_file.display());
            command_line_auth(client, &secrets).await?
        }
        Some(creds) if creds.is_expired(Utc::now()) => {
            info!("Access token expired, refreshing");
            refresh(client, &secrets, &creds).await?
        }
        Some(creds) => creds,
    };

    if let Err(e) = save_credentials(credentials_file, &creds).await {
        warn!("Failed to save credentials to {}: {}", credentials_file.display(), e);
    }
    Ok(creds)
}

pub async fn refresh(
    client: &reqwest::Client,
    secrets: &ClientSecrets,
    creds: &StoredCredentials,
) -> Result<StoredCredentials, UploadError> {
    let refresh_token = creds
        .refresh_token
        .clone()
        .ok_or_else(|| UploadError::Auth("access token expired and no refresh token is stored".to_string()))?;

    let response = request_token(
        client,
        secrets,
        &[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
            ("client_id", secrets.client_id.as_str()),
            ("client_secret", secrets.client_secret.as_str()),
        ],
    )
    .await?;
    Ok(StoredCredentials::from_response(response, Some(refresh_token)))
}

async fn command_line_auth(
    client: &reqwest::Client,
    secrets: &ClientSecrets,
) -> Result<StoredCredentials, UploadError> {
    let url = secrets.authorization_url()?;
    println!("Go to the following link in your browser:\n\n    {}\n", url);
    println!("Enter verification code: ");

    let mut code = String::new();
    BufReader::new(tokio::io::stdin()).read_line(&mut code).await?;
    let code = code.trim();
    if code.is_empty() {
        return Err(UploadError::Auth("no verification code entered".to_string()));
    }

    let response = request_token(
        client,
        secrets,
        &[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", secrets.redirect_uri()),
            ("client_id", secrets.client_id.as_str()),
            ("client_secret", secrets.client_secret.as_str()),
        ],
    )
    .await?;
    info!("Authorization successful");
    Ok(StoredCredentials::from_response(response, None))
}

async fn request_token(
    client: &reqwest::Client,
    secrets: &ClientSecrets,
    form: &[(&str, &str)],
) -> Result<TokenResponse, UploadError> {
    let response = client.post(secrets.token_uri.as_str()).form(form).send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(UploadError::Auth(format!("token endpoint returned {}: {}", status, body)));
    }
    Ok(response.json::<TokenResponse>().await?)
}
