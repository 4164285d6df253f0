use crate::api::models::images::{ReplaceImageForm, ReplaceImageResponse};
use crate::errors::{Error, ErrorBody, Result};
use crate::media_store::{DeleteOutcome, MediaStore, RemoteAsset};
use crate::upload::{StagedUpload, multipart_error};
use crate::{AppState, ReplacePolicy};
use axum::{
    Json,
    extract::{Multipart, State, multipart::MultipartRejection},
};
use std::time::Instant;
use tracing::instrument;

#[utoipa::path(
    post,
    path = "/upload-new-image",
    tag = "images",
    summary = "Replace image",
    description = "Upload a new image to the media store, then delete the image it replaces (if `oldPublicId` is given). \
                   The old image is deleted on a best-effort basis: a failed delete does not fail the request.",
    request_body(
        content = ReplaceImageForm,
        content_type = "multipart/form-data",
        description = "The new image and, optionally, the public ID of the image it replaces"
    ),
    responses(
        (status = 200, description = "New image stored", body = ReplaceImageResponse),
        (status = 400, description = "No file in the request, or malformed multipart body", body = ErrorBody),
        (status = 413, description = "Payload too large", body = ErrorBody),
        (status = 500, description = "The media store did not accept the upload", body = ErrorBody)
    )
)]
#[instrument(skip_all, fields(old_public_id = tracing::field::Empty))]
pub async fn upload_new_image(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<ReplaceImageResponse>> {
    let request_started = Instant::now();

    // A body that is not multipart at all simply carries no file
    let mut multipart = match multipart {
        Ok(multipart) => multipart,
        Err(rejection) => {
            tracing::info!(reason = %rejection, "Request received for /upload-new-image without a multipart body");
            metrics::counter!("imgrelay_replace_requests_total", "outcome" => "missing_file").increment(1);
            return Err(Error::MissingFile);
        }
    };

    let mut staged: Option<StagedUpload> = None;
    let mut old_public_id: Option<String> = None;

    // Process multipart fields as they stream in
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let field_name = field.name().unwrap_or("").to_string();

        match field_name.as_str() {
            "file" if field.file_name().is_none() => {
                // A text part named `file` is not an upload
                tracing::debug!("Ignoring `file` field without a filename");
            }
            "file" => {
                if staged.is_some() {
                    return Err(Error::BadRequest {
                        message: "Only one file may be uploaded".to_string(),
                    });
                }
                staged = Some(StagedUpload::from_field(field).await?);
            }
            "oldPublicId" => {
                old_public_id = Some(field.text().await.map_err(multipart_error)?);
            }
            _ => {
                tracing::debug!(field = %field_name, "Ignoring unknown multipart field");
            }
        }
    }

    tracing::Span::current().record("old_public_id", tracing::field::debug(&old_public_id));
    tracing::info!(
        has_file = staged.is_some(),
        old_public_id = ?old_public_id,
        "Request received for /upload-new-image"
    );

    let Some(staged) = staged else {
        metrics::counter!("imgrelay_replace_requests_total", "outcome" => "missing_file").increment(1);
        return Err(Error::MissingFile);
    };

    let asset = replace_image(state.media_store.as_ref(), &state.replace_policy, &staged, old_public_id.as_deref()).await?;

    // The staged file is no longer needed once the store has answered
    drop(staged);

    metrics::counter!("imgrelay_replace_requests_total", "outcome" => "success").increment(1);
    tracing::info!(
        elapsed_ms = request_started.elapsed().as_millis() as u64,
        "Response sent for /upload-new-image"
    );

    Ok(Json(ReplaceImageResponse::new(asset.secure_url, asset.public_id)))
}

/// Upload `file`, then (only once the upload has succeeded) retire `old_public_id`.
///
/// The upload result decides the outcome. Whatever happens to the old asset is logged and
/// counted, never returned.
pub async fn replace_image(
    store: &dyn MediaStore,
    policy: &ReplacePolicy,
    file: &StagedUpload,
    old_public_id: Option<&str>,
) -> Result<RemoteAsset> {
    let upload_started = Instant::now();
    let asset = store.upload(file, &policy.options).await.map_err(|e| {
        metrics::counter!("imgrelay_replace_requests_total", "outcome" => "upload_failed").increment(1);
        Error::Upload(e)
    })?;

    tracing::info!(
        secure_url = %asset.secure_url,
        public_id = %asset.public_id,
        elapsed_ms = upload_started.elapsed().as_millis() as u64,
        "New image uploaded to media store"
    );

    if let Some(old_public_id) = old_public_id.filter(|id| !id.is_empty()) {
        retire_old_image(store, policy, old_public_id).await;
    }

    Ok(asset)
}

/// Best-effort delete of the asset being replaced.
async fn retire_old_image(store: &dyn MediaStore, policy: &ReplacePolicy, public_id: &str) {
    if policy.restrict_delete_to_folder && !policy.in_upload_folder(public_id) {
        metrics::counter!("imgrelay_old_image_deletes_total", "outcome" => "refused").increment(1);
        tracing::warn!(
            public_id,
            folder = %policy.options.folder,
            "Refusing to delete old image outside the upload folder"
        );
        return;
    }

    let delete_started = Instant::now();
    let outcome = store.destroy(public_id).await;
    let elapsed_ms = delete_started.elapsed().as_millis() as u64;

    match outcome {
        Ok(DeleteOutcome::Removed) => {
            metrics::counter!("imgrelay_old_image_deletes_total", "outcome" => "removed").increment(1);
            tracing::info!(public_id, elapsed_ms, "Old image deleted from media store");
        }
        Ok(DeleteOutcome::NotConfirmed { result }) => {
            metrics::counter!("imgrelay_old_image_deletes_total", "outcome" => "not_confirmed").increment(1);
            tracing::warn!(public_id, elapsed_ms, result = %result, "Media store did not confirm deletion of old image");
        }
        Err(e) => {
            metrics::counter!("imgrelay_old_image_deletes_total", "outcome" => "error").increment(1);
            tracing::error!(public_id, elapsed_ms, error = %e, "Error deleting old image from media store");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::images::REPLACE_SUCCESS_MESSAGE;
    use crate::config::UploadConfig;
    use crate::test_utils::{
        RecordingStore, StoreCall, create_test_config, create_test_server, create_test_server_with_config, image_form,
    };
    use axum::http::StatusCode;
    use axum_test::multipart::{MultipartForm, Part};
    use std::sync::Arc;

    fn policy() -> ReplacePolicy {
        ReplacePolicy::from(&UploadConfig::default())
    }

    #[tokio::test]
    async fn test_missing_file_is_rejected_without_remote_calls() {
        let store = Arc::new(RecordingStore::new());
        let server = create_test_server(store.clone());

        let response = server
            .post("/upload-new-image")
            .multipart(MultipartForm::new().add_text("oldPublicId", "foodie/products/old"))
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
        response.assert_json(&serde_json::json!({ "error": "No file uploaded" }));
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_non_multipart_body_counts_as_missing_file() {
        let store = Arc::new(RecordingStore::new());
        let server = create_test_server(store.clone());

        let response = server
            .post("/upload-new-image")
            .json(&serde_json::json!({ "oldPublicId": "foodie/products/old" }))
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
        response.assert_json(&serde_json::json!({ "error": "No file uploaded" }));
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_upload_without_old_id_never_destroys() {
        let store = Arc::new(RecordingStore::new());
        let server = create_test_server(store.clone());

        let response = server.post("/upload-new-image").multipart(image_form("cake.jpg", None)).await;

        response.assert_status_ok();
        let body: ReplaceImageResponse = response.json();
        let calls = store.calls();
        assert_eq!(calls.len(), 1);
        let StoreCall::Upload { asset, .. } = &calls[0] else {
            panic!("expected an upload, got {:?}", calls[0]);
        };
        assert_eq!(body.message, REPLACE_SUCCESS_MESSAGE);
        assert_eq!(body.image_url, asset.secure_url);
        assert_eq!(body.public_id, asset.public_id);
    }

    #[tokio::test]
    async fn test_upload_precedes_single_destroy() {
        let store = Arc::new(RecordingStore::new());
        let server = create_test_server(store.clone());

        let response = server
            .post("/upload-new-image")
            .multipart(image_form("cake.png", Some("foodie/products/old-cake")))
            .await;

        response.assert_status_ok();
        let calls = store.calls();
        assert_eq!(calls.len(), 2);
        assert!(matches!(calls[0], StoreCall::Upload { .. }));
        assert_eq!(calls[1], StoreCall::Destroy("foodie/products/old-cake".to_string()));
    }

    #[tokio::test]
    async fn test_empty_old_id_skips_destroy() {
        let store = Arc::new(RecordingStore::new());
        let server = create_test_server(store.clone());

        let response = server.post("/upload-new-image").multipart(image_form("cake.jpg", Some(""))).await;

        response.assert_status_ok();
        assert_eq!(store.destroy_count(), 0);
    }

    #[test_log::test(tokio::test)]
    async fn test_upload_failure_returns_500_and_skips_destroy() {
        let store = Arc::new(RecordingStore::failing_uploads());
        let server = create_test_server(store.clone());

        let response = server
            .post("/upload-new-image")
            .multipart(image_form("cake.jpg", Some("foodie/products/old-cake")))
            .await;

        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        response.assert_json(&serde_json::json!({ "error": "Failed to upload new image" }));
        assert_eq!(store.destroy_count(), 0);
    }

    #[test_log::test(tokio::test)]
    async fn test_unconfirmed_delete_still_succeeds() {
        let store = Arc::new(RecordingStore::with_destroy_result("not found"));
        let server = create_test_server(store.clone());

        let response = server
            .post("/upload-new-image")
            .multipart(image_form("cake.jpg", Some("foodie/products/already-gone")))
            .await;

        response.assert_status_ok();
        let body: ReplaceImageResponse = response.json();
        assert!(body.public_id.starts_with("foodie/products/"));
        assert_eq!(store.destroy_count(), 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_destroy_error_still_succeeds() {
        let store = Arc::new(RecordingStore::failing_destroys());
        let server = create_test_server(store.clone());

        let response = server
            .post("/upload-new-image")
            .multipart(image_form("cake.jpg", Some("foodie/products/old-cake")))
            .await;

        response.assert_status_ok();
        assert_eq!(store.destroy_count(), 1);
    }

    #[tokio::test]
    async fn test_old_id_outside_folder_is_deleted_by_default() {
        let store = Arc::new(RecordingStore::new());
        let server = create_test_server(store.clone());

        let response = server
            .post("/upload-new-image")
            .multipart(image_form("cake.jpg", Some("legacy_root_image")))
            .await;

        response.assert_status_ok();
        assert_eq!(store.destroy_count(), 1);
        assert_eq!(store.calls()[1], StoreCall::Destroy("legacy_root_image".to_string()));
    }

    #[test_log::test(tokio::test)]
    async fn test_old_id_outside_folder_is_not_deleted_when_restricted() {
        let store = Arc::new(RecordingStore::new());
        let mut config = create_test_config();
        config.upload.restrict_delete_to_folder = true;
        let server = create_test_server_with_config(store.clone(), config);

        let response = server
            .post("/upload-new-image")
            .multipart(image_form("cake.jpg", Some("invoices/2024/receipt")))
            .await;

        response.assert_status_ok();
        assert_eq!(store.destroy_count(), 0);
    }

    #[tokio::test]
    async fn test_disallowed_format_is_upload_failure() {
        let server = create_test_server(Arc::new(crate::media_store::dummy::DummyStore::from(
            crate::config::DummyConfig::default(),
        )));

        let response = server.post("/upload-new-image").multipart(image_form("anim.gif", None)).await;

        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        response.assert_json(&serde_json::json!({ "error": "Failed to upload new image" }));
    }

    #[tokio::test]
    async fn test_text_field_named_file_is_not_an_upload() {
        let store = Arc::new(RecordingStore::new());
        let server = create_test_server(store.clone());

        let form = MultipartForm::new()
            .add_text("file", "not a file")
            .add_text("oldPublicId", "foodie/products/old");
        let response = server.post("/upload-new-image").multipart(form).await;

        response.assert_status(StatusCode::BAD_REQUEST);
        response.assert_json(&serde_json::json!({ "error": "No file uploaded" }));
        assert!(store.calls().is_empty());
        assert!(store.staged_paths().is_empty());
    }

    #[tokio::test]
    async fn test_second_file_rejected() {
        let store = Arc::new(RecordingStore::new());
        let server = create_test_server(store.clone());

        let form = MultipartForm::new()
            .add_part("file", Part::bytes(b"one".as_slice()).file_name("a.jpg"))
            .add_part("file", Part::bytes(b"two".as_slice()).file_name("b.jpg"));
        let response = server.post("/upload-new-image").multipart(form).await;

        response.assert_status(StatusCode::BAD_REQUEST);
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_repeated_uploads_get_distinct_ids() {
        let store = Arc::new(RecordingStore::new());
        let server = create_test_server(store.clone());

        let first: ReplaceImageResponse = server.post("/upload-new-image").multipart(image_form("cake.jpg", None)).await.json();
        let second: ReplaceImageResponse = server.post("/upload-new-image").multipart(image_form("cake.jpg", None)).await.json();

        assert_ne!(first.public_id, second.public_id);
    }

    #[tokio::test]
    async fn test_staged_file_removed_after_success_and_failure() {
        for store in [RecordingStore::new(), RecordingStore::failing_uploads()] {
            let store = Arc::new(store);
            let server = create_test_server(store.clone());

            let _ = server
                .post("/upload-new-image")
                .multipart(image_form("cake.jpg", Some("foodie/products/old")))
                .await;

            let paths = store.staged_paths();
            assert_eq!(paths.len(), 1);
            assert!(!paths[0].exists(), "staged file {} was left behind", paths[0].display());
        }
    }

    #[tokio::test]
    async fn test_replace_image_orders_calls() {
        let store = RecordingStore::new();
        let file = StagedUpload::from_bytes(b"bytes", Some("a.jpg")).unwrap();

        let asset = replace_image(&store, &policy(), &file, Some("foodie/products/old")).await.unwrap();

        let calls = store.calls();
        assert_eq!(calls.len(), 2);
        assert!(matches!(&calls[0], StoreCall::Upload { asset: uploaded, .. } if *uploaded == asset));
        assert_eq!(calls[1], StoreCall::Destroy("foodie/products/old".to_string()));
    }

    #[tokio::test]
    async fn test_replace_image_unrestricted_policy_deletes_anywhere() {
        let store = RecordingStore::new();
        let file = StagedUpload::from_bytes(b"bytes", Some("a.jpg")).unwrap();
        let policy = ReplacePolicy::from(&UploadConfig {
            restrict_delete_to_folder: false,
            ..Default::default()
        });

        replace_image(&store, &policy, &file, Some("elsewhere/asset")).await.unwrap();

        assert_eq!(store.destroy_count(), 1);
    }
}
