use crate::media_store::StoreError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;
use utoipa::ToSchema;

#[derive(ThisError, Debug)]
pub enum Error {
    /// The multipart body carried no `file` part
    #[error("No file uploaded")]
    MissingFile,

    /// Invalid request data
    #[error("{message}")]
    BadRequest { message: String },

    /// Request body exceeded the configured upload limit
    #[error("{message}")]
    PayloadTooLarge { message: String },

    /// The media store could not store the new image
    #[error("Upload to media store failed")]
    Upload(#[source] StoreError),

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// JSON body of every error response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::MissingFile | Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::Upload(_) | Error::Internal { .. } | Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a user-safe error message, without leaking provider or implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::MissingFile => "No file uploaded".to_string(),
            Error::BadRequest { message } | Error::PayloadTooLarge { message } => message.clone(),
            Error::Upload(_) => "Failed to upload new image".to_string(),
            Error::Internal { .. } | Error::Other(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        match &self {
            Error::Upload(_) | Error::Internal { .. } | Error::Other(_) => {
                tracing::error!("Internal service error: {}", error_chain(&self));
            }
            Error::MissingFile | Error::PayloadTooLarge { .. } => {
                tracing::warn!("Rejected upload: {}", self);
            }
            Error::BadRequest { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let status = self.status_code();
        let body = ErrorBody {
            error: self.user_message(),
        };
        (status, Json(body)).into_response()
    }
}

/// Render an error together with its `source()` chain on one line.
fn error_chain(err: &Error) -> String {
    let mut rendered = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        rendered.push_str(": ");
        rendered.push_str(&inner.to_string());
        source = std::error::Error::source(inner);
    }
    rendered
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        Error::Upload(err)
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;
