//! Staging of uploaded files.
//!
//! The `file` part of a multipart request is streamed into a temporary file before it is handed
//! to the media store. [`StagedUpload`] owns that file: dropping it deletes the file, so every
//! way out of a request (success, provider failure, a bad field after the file) cleans up.

use axum::extract::multipart::{Field, MultipartError};
use std::path::Path;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;

use crate::errors::{Error, Result};

const TEMP_PREFIX: &str = "imgrelay-upload-";

/// A received file, held on local disk for the duration of one request.
#[derive(Debug)]
pub struct StagedUpload {
    file: NamedTempFile,
    file_name: Option<String>,
    content_type: Option<String>,
    size: u64,
}

impl StagedUpload {
    /// Stream a multipart field into a fresh temporary file.
    pub async fn from_field(mut field: Field<'_>) -> Result<Self> {
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);

        let file = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile()
            .map_err(|e| Error::Other(anyhow::Error::new(e).context("create temporary upload file")))?;
        let mut writer = tokio::fs::File::from_std(
            file.as_file()
                .try_clone()
                .map_err(|e| Error::Other(anyhow::Error::new(e).context("open temporary upload file")))?,
        );

        let mut size = 0u64;
        let mut chunk_number = 0u64;
        while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
            chunk_number += 1;
            size += chunk.len() as u64;
            tracing::trace!(chunk_number, chunk_size = chunk.len(), total_size = size, "Staging upload chunk");

            writer
                .write_all(&chunk)
                .await
                .map_err(|e| Error::Other(anyhow::Error::new(e).context("write temporary upload file")))?;
        }
        writer
            .flush()
            .await
            .map_err(|e| Error::Other(anyhow::Error::new(e).context("flush temporary upload file")))?;

        tracing::debug!(
            path = %file.path().display(),
            filename = ?file_name,
            total_bytes = size,
            "Staged uploaded file"
        );

        Ok(Self {
            file,
            file_name,
            content_type,
            size,
        })
    }

    /// Stage bytes that are already in memory.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn from_bytes(bytes: &[u8], file_name: Option<&str>) -> std::io::Result<Self> {
        use std::io::Write;

        let mut file = tempfile::Builder::new().prefix(TEMP_PREFIX).tempfile()?;
        file.write_all(bytes)?;
        file.flush()?;
        Ok(Self {
            file,
            file_name: file_name.map(str::to_string),
            content_type: None,
            size: bytes.len() as u64,
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Name the client gave the file, if any
    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    /// Content type sent by the client, or guessed from the file name
    pub fn content_type(&self) -> String {
        match &self.content_type {
            Some(content_type) => content_type.clone(),
            None => mime_guess::from_path(self.file_name.as_deref().unwrap_or_default())
                .first_or_octet_stream()
                .to_string(),
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Lowercase extension of the client's file name
    pub fn format(&self) -> Option<String> {
        let name = self.file_name.as_deref()?;
        Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
    }

    /// Read the staged bytes back.
    pub async fn read(&self) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(self.path()).await
    }
}

/// Map a multipart parsing failure onto a client error, keeping the body-limit status.
pub fn multipart_error(err: MultipartError) -> Error {
    let message = err.body_text();
    if err.status() == axum::http::StatusCode::PAYLOAD_TOO_LARGE {
        Error::PayloadTooLarge { message }
    } else {
        Error::BadRequest {
            message: format!("Failed to parse multipart data: {message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_staged_bytes_round_trip() {
        let staged = StagedUpload::from_bytes(b"\x89PNG fake", Some("photo.PNG")).unwrap();

        assert_eq!(staged.size(), 9);
        assert_eq!(staged.format().as_deref(), Some("png"));
        assert_eq!(staged.content_type(), "image/png");
        assert_eq!(staged.read().await.unwrap(), b"\x89PNG fake");
    }

    #[test]
    fn test_temp_file_removed_on_drop() {
        let staged = StagedUpload::from_bytes(b"abc", Some("a.jpg")).unwrap();
        let path = staged.path().to_path_buf();
        assert!(path.exists());

        drop(staged);
        assert!(!path.exists());
    }

    #[test]
    fn test_format_without_extension() {
        let staged = StagedUpload::from_bytes(b"abc", Some("README")).unwrap();
        assert_eq!(staged.format(), None);
        assert_eq!(staged.content_type(), "application/octet-stream");

        let unnamed = StagedUpload::from_bytes(b"abc", None).unwrap();
        assert_eq!(unnamed.format(), None);
    }
}
