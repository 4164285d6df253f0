//! Cloudinary media store implementation
//!
//! Talks to the Cloudinary upload API with signed requests:
//!
//! - `POST {api_base_url}/{cloud_name}/image/upload`
//! - `POST {api_base_url}/{cloud_name}/image/destroy`
//!
//! A signature is the hex digest of every signed parameter, sorted by name and joined as
//! `name=value` pairs with `&`, with the API secret appended. `file`, `api_key`, `cloud_name` and
//! `resource_type` are never part of the signed string.

use async_trait::async_trait;
use reqwest::{
    Client,
    multipart::{Form, Part},
};
use serde::{Deserialize, de::DeserializeOwned};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use url::Url;

use crate::{
    config::{CloudinaryConfig, SignatureAlgorithm},
    media_store::{DeleteOutcome, MediaStore, RemoteAsset, Result, StoreError, UploadOptions},
    upload::StagedUpload,
};

const UNSIGNED_PARAMS: [&str; 4] = ["file", "api_key", "cloud_name", "resource_type"];

/// Cloudinary media store
pub struct CloudinaryStore {
    client: Client,
    base_url: Url,
    cloud_name: String,
    api_key: String,
    api_secret: String,
    signature_algorithm: SignatureAlgorithm,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    public_id: String,
    secure_url: String,
}

#[derive(Debug, Deserialize)]
struct DestroyResponse {
    result: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

impl CloudinaryStore {
    /// Create a new Cloudinary store with its own pooled HTTP client
    pub fn new(config: &CloudinaryConfig) -> std::result::Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            base_url: config.api_base_url.clone(),
            cloud_name: config.cloud_name.clone(),
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            signature_algorithm: config.signature_algorithm,
        })
    }

    fn endpoint(&self, action: &str) -> String {
        format!("{}/{}/image/{}", self.base_url.as_str().trim_end_matches('/'), self.cloud_name, action)
    }

    /// Build a multipart form carrying `params` plus timestamp, API key and signature
    fn signed_form(&self, mut params: BTreeMap<&'static str, String>) -> Form {
        params.insert("timestamp", chrono::Utc::now().timestamp().to_string());
        let signature = sign(&string_to_sign(&params), &self.api_secret, self.signature_algorithm);

        params
            .into_iter()
            .fold(Form::new(), |form, (name, value)| form.text(name, value))
            .text("api_key", self.api_key.clone())
            .text("signature", signature)
    }
}

/// The canonical `a=1&b=2` string a signature is computed over
pub fn string_to_sign(params: &BTreeMap<&str, String>) -> String {
    params
        .iter()
        .filter(|(name, value)| !value.is_empty() && !UNSIGNED_PARAMS.contains(*name))
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Hex digest of `to_sign` followed by the API secret
pub fn sign(to_sign: &str, api_secret: &str, algorithm: SignatureAlgorithm) -> String {
    let payload = format!("{to_sign}{api_secret}");
    match algorithm {
        SignatureAlgorithm::Sha1 => hex::encode(Sha1::digest(payload.as_bytes())),
        SignatureAlgorithm::Sha256 => hex::encode(Sha256::digest(payload.as_bytes())),
    }
}

/// Decode a Cloudinary response, turning non-2xx answers into [`StoreError::Provider`]
async fn parse_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        let message = serde_json::from_str::<ErrorResponse>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);
        return Err(StoreError::Provider {
            status: status.as_u16(),
            message,
        });
    }

    serde_json::from_str(&body).map_err(|e| StoreError::InvalidResponse(format!("{e}: {body}")))
}

#[async_trait]
impl MediaStore for CloudinaryStore {
    async fn upload(&self, file: &StagedUpload, options: &UploadOptions) -> Result<RemoteAsset> {
        let bytes = file.read().await?;
        let part = Part::bytes(bytes)
            .file_name(file.file_name().unwrap_or("upload").to_string())
            .mime_str(&file.content_type())?;

        let mut params = BTreeMap::new();
        params.insert("folder", options.folder.clone());
        params.insert("allowed_formats", options.allowed_formats.join(","));
        let form = self.signed_form(params).part("file", part);

        tracing::debug!(cloud_name = %self.cloud_name, folder = %options.folder, bytes = file.size(), "Uploading to Cloudinary");

        let response = self.client.post(self.endpoint("upload")).multipart(form).send().await?;
        let uploaded: UploadResponse = parse_response(response).await?;

        Ok(RemoteAsset {
            public_id: uploaded.public_id,
            secure_url: uploaded.secure_url,
        })
    }

    async fn destroy(&self, public_id: &str) -> Result<DeleteOutcome> {
        let mut params = BTreeMap::new();
        params.insert("public_id", public_id.to_string());
        let form = self.signed_form(params);

        tracing::debug!(cloud_name = %self.cloud_name, public_id, "Destroying Cloudinary asset");

        let response = self.client.post(self.endpoint("destroy")).multipart(form).send().await?;
        let destroyed: DestroyResponse = parse_response(response).await?;

        Ok(DeleteOutcome::from_result(&destroyed.result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::install_crypto_provider;
    use std::time::Duration;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store_for(server: &MockServer) -> CloudinaryStore {
        install_crypto_provider();
        CloudinaryStore::new(&CloudinaryConfig {
            cloud_name: "demo".to_string(),
            api_key: "123456".to_string(),
            api_secret: "abcd".to_string(),
            api_base_url: Url::parse(&server.uri()).unwrap(),
            timeout: Duration::from_secs(5),
            signature_algorithm: SignatureAlgorithm::Sha1,
        })
        .unwrap()
    }

    fn options() -> UploadOptions {
        UploadOptions {
            folder: "foodie/products".to_string(),
            allowed_formats: vec!["jpg".to_string(), "png".to_string(), "jpeg".to_string()],
        }
    }

    #[test]
    fn test_string_to_sign_sorts_and_skips_unsigned() {
        let mut params = BTreeMap::new();
        params.insert("timestamp", "1315060510".to_string());
        params.insert("public_id", "sample_image".to_string());
        params.insert("eager", "w_400,h_300,c_pad|w_260,h_200,c_crop".to_string());
        params.insert("api_key", "123456".to_string());
        params.insert("file", "ignored".to_string());
        params.insert("invalidate", String::new());

        assert_eq!(
            string_to_sign(&params),
            "eager=w_400,h_300,c_pad|w_260,h_200,c_crop&public_id=sample_image&timestamp=1315060510"
        );
    }

    #[test]
    fn test_sign_appends_secret_before_hashing() {
        // "ab" + "c" hashes like the standard "abc" test vectors
        assert_eq!(sign("ab", "c", SignatureAlgorithm::Sha1), "a9993e364706816aba3e25717850c26c9cd0d89d");
        assert_eq!(
            sign("ab", "c", SignatureAlgorithm::Sha256),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_upload_sends_signed_multipart() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/demo/image/upload"))
            .and(body_string_contains("foodie/products"))
            .and(body_string_contains("jpg,png,jpeg"))
            .and(body_string_contains("name=\"signature\""))
            .and(body_string_contains("name=\"api_key\""))
            .and(body_string_contains("pretend-jpeg-bytes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "public_id": "foodie/products/abc123",
                "secure_url": "https://res.cloudinary.com/demo/image/upload/v1/foodie/products/abc123.jpg",
                "format": "jpg"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let store = store_for(&server);
        let file = StagedUpload::from_bytes(b"pretend-jpeg-bytes", Some("cake.jpg")).unwrap();

        let asset = store.upload(&file, &options()).await.unwrap();
        assert_eq!(asset.public_id, "foodie/products/abc123");
        assert_eq!(
            asset.secure_url,
            "https://res.cloudinary.com/demo/image/upload/v1/foodie/products/abc123.jpg"
        );
    }

    #[tokio::test]
    async fn test_upload_provider_error_carries_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/demo/image/upload"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": { "message": "Image file format gif not allowed" }
            })))
            .mount(&server)
            .await;

        let store = store_for(&server);
        let file = StagedUpload::from_bytes(b"GIF89a", Some("anim.gif")).unwrap();

        match store.upload(&file, &options()).await {
            Err(StoreError::Provider { status, message }) => {
                assert_eq!(status, 400);
                assert_eq!(message, "Image file format gif not allowed");
            }
            other => panic!("expected provider error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_upload_unparseable_success_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .mount(&server)
            .await;

        let store = store_for(&server);
        let file = StagedUpload::from_bytes(b"bytes", Some("a.png")).unwrap();

        let err = store.upload(&file, &options()).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_destroy_ok_and_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/demo/image/destroy"))
            .and(body_string_contains("foodie/products/old"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "result": "ok" })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/demo/image/destroy"))
            .and(body_string_contains("foodie/products/ghost"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "result": "not found" })))
            .expect(1)
            .mount(&server)
            .await;

        let store = store_for(&server);

        assert_eq!(store.destroy("foodie/products/old").await.unwrap(), DeleteOutcome::Removed);
        assert_eq!(
            store.destroy("foodie/products/ghost").await.unwrap(),
            DeleteOutcome::NotConfirmed {
                result: "not found".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_transport_error_when_unreachable() {
        let server = MockServer::builder().start().await;
        let store = store_for(&server);
        drop(server);

        let err = store.destroy("foodie/products/old").await.unwrap_err();
        assert!(matches!(err, StoreError::Transport(_)));
    }
}
