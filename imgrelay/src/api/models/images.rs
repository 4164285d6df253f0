use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub const REPLACE_SUCCESS_MESSAGE: &str = "New image uploaded successfully";

/// Multipart form accepted by `POST /upload-new-image`
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
#[allow(dead_code)] // documentation only; the handler reads the multipart stream directly
pub struct ReplaceImageForm {
    /// Image to store (jpg, jpeg or png)
    #[schema(value_type = String, format = Binary)]
    pub file: Vec<u8>,
    /// Public ID of the image this one replaces; deleted after the upload succeeds
    pub old_public_id: Option<String>,
}

/// Response for a successful image replacement
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceImageResponse {
    pub message: String,
    /// HTTPS URL of the new image
    pub image_url: String,
    /// ID to send as `oldPublicId` the next time this image is replaced
    pub public_id: String,
}

impl ReplaceImageResponse {
    pub fn new(image_url: String, public_id: String) -> Self {
        Self {
            message: REPLACE_SUCCESS_MESSAGE.to_string(),
            image_url,
            public_id,
        }
    }
}
