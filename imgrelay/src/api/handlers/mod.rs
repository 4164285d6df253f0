//! HTTP request handlers for all API endpoints.
//!
//! - [`images`]: image replacement (upload new, delete old)
//! - [`probes`]: liveness endpoints
//!
//! # Error Handling
//!
//! Handlers return [`crate::errors::Error`] which converts to the matching HTTP status code and
//! a `{"error": ...}` JSON body.

pub mod images;
pub mod probes;
