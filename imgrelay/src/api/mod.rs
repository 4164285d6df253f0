//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers
//! - **[`models`]**: Request/response data structures
//!
//! # API Structure
//!
//! - `POST /upload-new-image`: store a new image and retire the one it replaces
//! - `GET /ping`, `GET /healthz`: liveness probes
//!
//! All endpoints are documented with OpenAPI annotations using `utoipa`; the document is served
//! at `/api-docs/openapi.json`.

pub mod handlers;
pub mod models;
