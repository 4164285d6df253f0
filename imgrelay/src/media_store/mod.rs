//! Media store abstraction layer
//!
//! This module defines the `MediaStore` trait which abstracts the remote image host the relay
//! forwards uploads to. The handler only ever talks to a `dyn MediaStore`; which provider sits
//! behind it is decided once at startup from configuration.

use async_trait::async_trait;
use std::sync::Arc;

use crate::{
    config::{MediaStoreConfig, UploadConfig},
    upload::StagedUpload,
};

pub mod cloudinary;
pub mod dummy;

/// Create a media store from configuration
///
/// This is the single point where we convert config into store instances.
/// Adding a new provider requires adding a match arm here.
pub fn create_store(config: &MediaStoreConfig) -> anyhow::Result<Arc<dyn MediaStore>> {
    match config {
        MediaStoreConfig::Cloudinary(cloudinary_config) => Ok(Arc::new(cloudinary::CloudinaryStore::new(cloudinary_config)?)),
        MediaStoreConfig::Dummy(dummy_config) => Ok(Arc::new(dummy::DummyStore::from(dummy_config.clone()))),
    }
}

/// Result type for media store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur while talking to the media store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Media store request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Media store rejected the request with status {status}: {message}")]
    Provider { status: u16, message: String },

    #[error("Unexpected media store response: {0}")]
    InvalidResponse(String),

    #[error("Failed to read staged upload: {0}")]
    Io(#[from] std::io::Error),

    #[error("File format '{format}' is not allowed")]
    DisallowedFormat { format: String },
}

/// Where an upload is placed and which formats the store should accept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOptions {
    /// Folder (namespace) the asset is stored under
    pub folder: String,
    /// Lowercase file extensions the store accepts
    pub allowed_formats: Vec<String>,
}

impl UploadOptions {
    /// Whether `format` (a file extension) is on the allow-list, ignoring case
    pub fn allows(&self, format: &str) -> bool {
        self.allowed_formats.iter().any(|allowed| allowed.eq_ignore_ascii_case(format))
    }
}

impl From<&UploadConfig> for UploadOptions {
    fn from(config: &UploadConfig) -> Self {
        Self {
            folder: config.folder.trim_matches('/').to_string(),
            allowed_formats: config.allowed_formats.iter().map(|f| f.to_ascii_lowercase()).collect(),
        }
    }
}

/// An asset stored by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAsset {
    /// Provider-side identifier, including the folder prefix
    pub public_id: String,
    /// HTTPS URL the asset is served from
    pub secure_url: String,
}

/// What the provider said when asked to remove an asset
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Provider confirmed the asset is gone
    Removed,
    /// Provider answered, but not with a confirmation (e.g. `"not found"`)
    NotConfirmed { result: String },
}

impl DeleteOutcome {
    /// Interpret a provider `result` string; only `"ok"` counts as removal
    pub fn from_result(result: &str) -> Self {
        if result == "ok" {
            DeleteOutcome::Removed
        } else {
            DeleteOutcome::NotConfirmed {
                result: result.to_string(),
            }
        }
    }
}

/// Abstract media store interface
///
/// Implementors must be safe to share between concurrent requests; any connection pooling lives
/// inside the implementation.
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Store the staged file under `options.folder`
    ///
    /// Fails if the provider is unreachable, rejects the credentials, or refuses the content
    /// (including formats outside `options.allowed_formats`).
    async fn upload(&self, file: &StagedUpload, options: &UploadOptions) -> Result<RemoteAsset>;

    /// Remove a previously stored asset
    ///
    /// An unknown ID is not an error: it comes back as [`DeleteOutcome::NotConfirmed`].
    async fn destroy(&self, public_id: &str) -> Result<DeleteOutcome>;
}
