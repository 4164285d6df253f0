//! Request and response shapes for the HTTP API.

pub mod images;
