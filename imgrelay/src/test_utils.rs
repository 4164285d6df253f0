//! Test utilities for integration testing (available with `test-utils` feature).

use crate::config::{Config, DummyConfig, MediaStoreConfig};
use crate::media_store::{DeleteOutcome, MediaStore, RemoteAsset, Result, StoreError, UploadOptions};
use crate::upload::StagedUpload;
use crate::{AppState, ReplacePolicy, build_router};
use async_trait::async_trait;
use axum_test::TestServer;
use axum_test::multipart::{MultipartForm, Part};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Install the process-wide rustls provider; safe to call from every test.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// Config for tests: defaults everywhere, with the in-memory store so nothing needs credentials.
pub fn create_test_config() -> Config {
    Config {
        media_store: MediaStoreConfig::Dummy(DummyConfig::default()),
        ..Default::default()
    }
}

/// Router for `store` wrapped in a test server, using [`create_test_config`] for everything else.
pub fn create_test_server(store: Arc<dyn MediaStore>) -> TestServer {
    create_test_server_with_config(store, create_test_config())
}

/// Like [`create_test_server`], with the caller's config (the media store section is ignored).
pub fn create_test_server_with_config(store: Arc<dyn MediaStore>, config: Config) -> TestServer {
    let state = AppState::builder()
        .replace_policy(ReplacePolicy::from(&config.upload))
        .config(config)
        .media_store(store)
        .build();

    let router = build_router(&state).expect("Failed to build router");
    TestServer::new(router).expect("Failed to create test server")
}

/// Multipart body with a small JPEG-ish `file` part and, if given, `oldPublicId`.
pub fn image_form(file_name: &str, old_public_id: Option<&str>) -> MultipartForm {
    let form = MultipartForm::new().add_part(
        "file",
        Part::bytes(b"\xFF\xD8\xFF\xE0 not really a jpeg".as_slice())
            .file_name(file_name.to_string())
            .mime_type("image/jpeg"),
    );

    match old_public_id {
        Some(id) => form.add_text("oldPublicId", id.to_string()),
        None => form,
    }
}

/// A media store call as seen by [`RecordingStore`]
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    Upload { path: PathBuf, asset: RemoteAsset },
    Destroy(String),
}

/// Media store double that records calls in order and can be told to fail.
pub struct RecordingStore {
    calls: Mutex<Vec<StoreCall>>,
    staged_paths: Mutex<Vec<PathBuf>>,
    fail_uploads: bool,
    fail_destroys: bool,
    destroy_result: String,
}

impl Default for RecordingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingStore {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            staged_paths: Mutex::new(Vec::new()),
            fail_uploads: false,
            fail_destroys: false,
            destroy_result: "ok".to_string(),
        }
    }

    /// Every upload is rejected by the provider
    pub fn failing_uploads() -> Self {
        Self {
            fail_uploads: true,
            ..Self::new()
        }
    }

    /// Every destroy fails with a provider error
    pub fn failing_destroys() -> Self {
        Self {
            fail_destroys: true,
            ..Self::new()
        }
    }

    /// Destroys answer with this provider result string
    pub fn with_destroy_result(result: &str) -> Self {
        Self {
            destroy_result: result.to_string(),
            ..Self::new()
        }
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().expect("calls lock poisoned").clone()
    }

    pub fn destroy_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, StoreCall::Destroy(_)))
            .count()
    }

    /// Paths of every staged file handed to `upload`, failed attempts included
    pub fn staged_paths(&self) -> Vec<PathBuf> {
        self.staged_paths.lock().expect("staged paths lock poisoned").clone()
    }
}

#[async_trait]
impl MediaStore for RecordingStore {
    async fn upload(&self, file: &StagedUpload, options: &UploadOptions) -> Result<RemoteAsset> {
        let path = file.path().to_path_buf();
        assert!(path.exists(), "staged file should exist while uploading");
        self.staged_paths.lock().expect("staged paths lock poisoned").push(path.clone());

        if self.fail_uploads {
            return Err(StoreError::Provider {
                status: 500,
                message: "simulated upload failure".to_string(),
            });
        }

        let public_id = format!("{}/{}", options.folder, Uuid::new_v4().simple());
        let asset = RemoteAsset {
            secure_url: format!("https://media.test/{public_id}.{}", file.format().unwrap_or_default()),
            public_id,
        };
        self.calls.lock().expect("calls lock poisoned").push(StoreCall::Upload {
            path,
            asset: asset.clone(),
        });
        Ok(asset)
    }

    async fn destroy(&self, public_id: &str) -> Result<DeleteOutcome> {
        self.calls
            .lock()
            .expect("calls lock poisoned")
            .push(StoreCall::Destroy(public_id.to_string()));

        if self.fail_destroys {
            return Err(StoreError::Provider {
                status: 500,
                message: "simulated destroy failure".to_string(),
            });
        }
        Ok(DeleteOutcome::from_result(&self.destroy_result))
    }
}
