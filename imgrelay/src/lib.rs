//! # imgrelay: Image Replace Relay
//!
//! `imgrelay` is a small HTTP service that sits between a storefront client and a hosted media
//! service. A client sends it a new product image together with the public ID of the image it
//! replaces; the relay stores the new image, hands back its URL and ID, and deletes the old one.
//!
//! ## Overview
//!
//! Clients never hold media store credentials. The relay owns them, signs every request to the
//! provider, and decides where uploads land (a single configured folder) and which formats are
//! accepted. Deleting the replaced image is best effort: the client asked for a new image, so the
//! response reflects the upload alone and a failed delete is only logged.
//!
//! ### Request Flow
//!
//! A `POST /upload-new-image` request is handled in four steps:
//!
//! 1. The multipart body is streamed; the `file` part is staged in a temporary file
//!    ([`upload::StagedUpload`]) and `oldPublicId` is read as text.
//! 2. The staged file is uploaded through the configured [`media_store::MediaStore`].
//! 3. Only after the upload succeeded, the old image is deleted if an ID was given. With
//!    `upload.restrict_delete_to_folder` set, IDs outside the upload folder are left alone.
//! 4. The staged file is removed when the request finishes, whatever the outcome.
//!
//! ### Core Components
//!
//! The **API layer** ([`api`]) holds the handlers and their request/response models.
//!
//! The **media store layer** ([`media_store`]) abstracts the provider behind a trait. Cloudinary is
//! the production implementation; a dummy in-memory store is available for development.
//!
//! [`config`], [`errors`] and [`telemetry`] provide configuration loading, the HTTP error mapping,
//! and logging/tracing setup.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use imgrelay::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Parse CLI arguments and load configuration
//!     let args = imgrelay::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     // Initialize telemetry (structured logging and optional OpenTelemetry)
//!     imgrelay::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     // Create and start the application
//!     let app = Application::new(config)?;
//!
//!     // Run with graceful shutdown on Ctrl+C
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!     })
//!     .await?;
//!
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod errors;
pub mod media_store;
mod openapi;
pub mod telemetry;
pub mod upload;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

use crate::config::{CorsOrigin, UploadConfig};
use crate::media_store::{MediaStore, UploadOptions};
use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::{
    Json, Router,
    routing::{get, post},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
pub use config::Config;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa::OpenApi;

use crate::openapi::ApiDoc;

/// Where new images go and which old images may be deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplacePolicy {
    pub options: UploadOptions,
    /// Only delete old images whose ID lies inside `options.folder`
    pub restrict_delete_to_folder: bool,
}

impl ReplacePolicy {
    /// Whether `public_id` names an asset inside the upload folder
    pub fn in_upload_folder(&self, public_id: &str) -> bool {
        public_id
            .strip_prefix(self.options.folder.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .is_some_and(|rest| !rest.is_empty())
    }
}

impl From<&UploadConfig> for ReplacePolicy {
    fn from(config: &UploadConfig) -> Self {
        Self {
            options: UploadOptions::from(config),
            restrict_delete_to_folder: config.restrict_delete_to_folder,
        }
    }
}

/// Application state shared across all request handlers.
///
/// Cloned per request; the media store is behind an `Arc` so every clone shares one HTTP client.
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config.clone())
///     .media_store(media_store::create_store(&config.media_store)?)
///     .replace_policy(ReplacePolicy::from(&config.upload))
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub media_store: Arc<dyn MediaStore>,
    pub replace_policy: ReplacePolicy,
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    // tower-http refuses `*` inside an origin list, so a wildcard anywhere means any origin
    let allow_origin = if config.cors.allowed_origins.iter().any(|o| matches!(o, CorsOrigin::Wildcard)) {
        AllowOrigin::any()
    } else {
        let mut origins = Vec::new();
        for origin in &config.cors.allowed_origins {
            if let CorsOrigin::Url(url) = origin {
                origins.push(url.as_str().trim_end_matches('/').parse::<HeaderValue>()?);
            }
        }
        AllowOrigin::list(origins)
    };

    let mut cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers([axum::http::header::CONTENT_TYPE]);

    if let Some(max_age) = config.cors.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router with all endpoints and middleware.
///
/// - `POST /upload-new-image` with the configured body limit
/// - `GET /ping` and `GET /healthz`
/// - `GET /api-docs/openapi.json`
/// - `GET /internal/metrics` when `enable_metrics` is set
///
/// CORS and request tracing wrap every route.
///
/// # Errors
///
/// Returns an error if the CORS configuration is invalid.
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let upload_limit = state.config.limits.max_upload_size;

    let router = Router::new()
        .route(
            "/upload-new-image",
            post(api::handlers::images::upload_new_image).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/ping", get(api::handlers::probes::ping))
        .route("/healthz", get(api::handlers::probes::healthz))
        .route("/api-docs/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .with_state(state.clone());

    let cors_layer = create_cors_layer(&state.config)?;
    let mut router = router.layer(cors_layer);

    // Add Prometheus metrics if enabled
    if state.config.enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    // Add tracing layer
    let router = router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

pub struct Application {
    router: Router,
    config: Config,
}

impl Application {
    /// Create a new application instance with the media store initialized
    pub fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting image relay with configuration: {:#?}", config);

        let media_store = media_store::create_store(&config.media_store)?;
        let app_state = AppState::builder()
            .config(config.clone())
            .media_store(media_store)
            .replace_policy(ReplacePolicy::from(&config.upload))
            .build();

        let router = build_router(&app_state)?;

        Ok(Self { router, config })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "Image relay listening on http://{}, available at http://localhost:{}",
            bind_addr, self.config.port
        );

        // Run the server with graceful shutdown
        axum::serve(listener, self.router).with_graceful_shutdown(shutdown).await?;

        // Shutdown telemetry
        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
