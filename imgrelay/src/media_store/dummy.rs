//! Dummy media store implementation
//!
//! Keeps asset IDs in memory and never touches the network. Useful for local development and
//! for exercising the relay without provider credentials.

use async_trait::async_trait;
use dashmap::DashMap;
use url::Url;
use uuid::Uuid;

use crate::{
    config::DummyConfig,
    media_store::{DeleteOutcome, MediaStore, RemoteAsset, Result, StoreError, UploadOptions},
    upload::StagedUpload,
};

/// In-memory store that hands out a fresh public ID for every upload
pub struct DummyStore {
    base_url: Url,
    /// public ID -> secure URL
    assets: DashMap<String, String>,
}

impl DummyStore {
    /// Create a new Dummy store
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            assets: DashMap::new(),
        }
    }

    /// Whether an asset with this ID is currently stored
    pub fn contains(&self, public_id: &str) -> bool {
        self.assets.contains_key(public_id)
    }
}

impl From<DummyConfig> for DummyStore {
    fn from(config: DummyConfig) -> Self {
        Self::new(config.base_url)
    }
}

#[async_trait]
impl MediaStore for DummyStore {
    async fn upload(&self, file: &StagedUpload, options: &UploadOptions) -> Result<RemoteAsset> {
        let format = file.format().unwrap_or_default();
        if !options.allows(&format) {
            return Err(StoreError::DisallowedFormat { format });
        }

        // Make sure the staged file is really there, as a real upload would read it
        tokio::fs::metadata(file.path()).await?;

        // No content addressing: identical bytes still get a new ID
        let public_id = format!("{}/{}", options.folder, Uuid::new_v4().simple());
        let secure_url = self
            .base_url
            .join(&format!("{public_id}.{format}"))
            .map_err(|e| StoreError::InvalidResponse(format!("Failed to build asset URL: {e}")))?
            .to_string();

        self.assets.insert(public_id.clone(), secure_url.clone());
        tracing::info!("Dummy store saved {} ({} bytes)", public_id, file.size());

        Ok(RemoteAsset { public_id, secure_url })
    }

    async fn destroy(&self, public_id: &str) -> Result<DeleteOutcome> {
        match self.assets.remove(public_id) {
            Some(_) => Ok(DeleteOutcome::Removed),
            None => Ok(DeleteOutcome::from_result("not found")),
        }
    }
}
