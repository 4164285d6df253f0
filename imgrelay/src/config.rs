//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `IMGRELAY_CONFIG`
//! environment variable. A missing file is not an error: defaults and environment still apply.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `IMGRELAY_` override YAML values
//! 3. **Plain variables** - `PORT`, `CLOUD_NAME`, `API_KEY` and `API_SECRET`, the names used by
//!    the usual `.env` file for this service
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `IMGRELAY_UPLOAD__FOLDER=shop/items` sets the `upload.folder` field.
//!
//! ## Usage
//!
//! ```no_run
//! use clap::Parser;
//! use imgrelay::config::{Args, Config};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let args = Args::parse();
//! let config = Config::load(&args)?;
//!
//! println!("Server will bind to {}:{}", config.host, config.port);
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration Structure
//!
//! - **Server**: `host`, `port` - HTTP server binding configuration
//! - **Media store**: `media_store.type` (`cloudinary` or `dummy`) plus provider settings
//! - **Upload**: `upload.folder`, `upload.allowed_formats`, `upload.restrict_delete_to_folder`
//! - **Limits**: `limits.max_upload_size` - request body cap in bytes
//! - **CORS**: `cors.allowed_origins`, `cors.max_age`
//! - **Features**: `enable_metrics`, `enable_otel_export`
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! # Same variables the service has always read
//! PORT=3000
//! CLOUD_NAME=my-cloud
//! API_KEY=123456789012345
//! API_SECRET=abcdefghijklmnopqrstuvwxyz0
//!
//! # Override nested values
//! IMGRELAY_MEDIA_STORE__TIMEOUT=30s
//! IMGRELAY_ENABLE_METRICS=true
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::errors::Error;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "IMGRELAY_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// Loaded once at startup and handed to [`crate::Application`]; request handlers only ever see the
/// pieces copied into [`crate::AppState`].
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Remote media store the relay forwards uploads to
    pub media_store: MediaStoreConfig,
    /// Where uploads land and what they may be
    pub upload: UploadConfig,
    /// Request size limits
    pub limits: LimitsConfig,
    /// CORS configuration for browser clients
    pub cors: CorsConfig,
    /// Enable Prometheus metrics endpoint at `/internal/metrics`
    pub enable_metrics: bool,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
    /// Plain `CLOUD_NAME` override, folded into `media_store` during [`Config::load`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud_name: Option<String>,
    /// Plain `API_KEY` override, folded into `media_store` during [`Config::load`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Plain `API_SECRET` override, folded into `media_store` during [`Config::load`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_secret: Option<String>,
}

/// Media store provider configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MediaStoreConfig {
    /// Cloudinary upload API.
    /// Set credentials via:
    /// - `CLOUD_NAME` / `IMGRELAY_MEDIA_STORE__CLOUD_NAME`
    /// - `API_KEY` / `IMGRELAY_MEDIA_STORE__API_KEY`
    /// - `API_SECRET` / `IMGRELAY_MEDIA_STORE__API_SECRET`
    Cloudinary(CloudinaryConfig),
    /// In-memory store for development and testing
    Dummy(DummyConfig),
}

impl Default for MediaStoreConfig {
    fn default() -> Self {
        MediaStoreConfig::Cloudinary(CloudinaryConfig::default())
    }
}

/// Cloudinary credentials and client settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CloudinaryConfig {
    /// Cloud (account) name, part of every API path
    pub cloud_name: String,
    /// API key sent with each signed request
    pub api_key: String,
    /// API secret used for signing, never sent over the wire
    #[serde(skip_serializing)]
    pub api_secret: String,
    /// Base URL of the upload API (default: `https://api.cloudinary.com/v1_1`)
    pub api_base_url: Url,
    /// Timeout for a single upload or destroy call
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Digest used for request signatures; must match the account setting
    pub signature_algorithm: SignatureAlgorithm,
}

impl Default for CloudinaryConfig {
    fn default() -> Self {
        Self {
            cloud_name: String::new(),
            api_key: String::new(),
            api_secret: String::new(),
            api_base_url: Url::parse("https://api.cloudinary.com/v1_1").expect("static URL is valid"),
            timeout: Duration::from_secs(60),
            signature_algorithm: SignatureAlgorithm::default(),
        }
    }
}

/// Request signature digest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureAlgorithm {
    #[default]
    Sha1,
    Sha256,
}

/// Dummy media store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DummyConfig {
    /// Base URL that generated asset URLs are placed under
    pub base_url: Url,
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse("https://media.invalid/dummy/").expect("static URL is valid"),
        }
    }
}

/// Upload destination and policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct UploadConfig {
    /// Folder (namespace) in the media store that every upload is placed in
    pub folder: String,
    /// File formats the media store will accept
    pub allowed_formats: Vec<String>,
    /// Only delete replaced assets whose public ID lies inside `folder` (off by default).
    ///
    /// Callers name the asset to delete, and nothing ties that ID to the image being replaced.
    /// Turning this on stops a caller from removing unrelated assets stored elsewhere in the
    /// same account, at the cost of never cleaning up images stored outside the folder.
    pub restrict_delete_to_folder: bool,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            folder: "foodie/products".to_string(),
            allowed_formats: vec!["jpg".to_string(), "png".to_string(), "jpeg".to_string()],
            restrict_delete_to_folder: false,
        }
    }
}

/// Resource limits for protecting system capacity.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    /// Maximum request body size in bytes for uploads (default: 10MB)
    pub max_upload_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_upload_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// CORS (Cross-Origin Resource Sharing) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins for CORS requests
    pub allowed_origins: Vec<CorsOrigin>,
    /// Cache preflight requests for this many seconds
    pub max_age: Option<u64>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![CorsOrigin::Wildcard],
            max_age: None,
        }
    }
}

/// CORS origin specification.
///
/// Can be either a wildcard (`*`) to allow all origins, or a specific URL.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CorsOrigin {
    /// Allow all origins (`*`)
    #[serde(deserialize_with = "parse_wildcard")]
    Wildcard,
    /// Specific origin URL (e.g., `https://app.example.com`)
    #[serde(deserialize_with = "parse_url")]
    Url(Url),
}

fn parse_wildcard<'de, D>(deserializer: D) -> Result<(), D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    if s == "*" {
        Ok(())
    } else {
        Err(serde::de::Error::custom("Expected '*'"))
    }
}

fn parse_url<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Url::parse(&s).map_err(serde::de::Error::custom)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            media_store: MediaStoreConfig::default(),
            upload: UploadConfig::default(),
            limits: LimitsConfig::default(),
            cors: CorsConfig::default(),
            enable_metrics: false,
            enable_otel_export: false,
            cloud_name: None,
            api_key: None,
            api_secret: None,
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let mut config: Self = Self::figment(args).extract()?;
        config.apply_credential_overrides();
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Fold the plain `CLOUD_NAME`/`API_KEY`/`API_SECRET` values into the media store section.
    ///
    /// Setting any of them selects the Cloudinary store, keeping whatever Cloudinary settings the
    /// file already had.
    fn apply_credential_overrides(&mut self) {
        let cloud_name = self.cloud_name.take();
        let api_key = self.api_key.take();
        let api_secret = self.api_secret.take();

        if cloud_name.is_none() && api_key.is_none() && api_secret.is_none() {
            return;
        }

        let mut cloudinary = match &self.media_store {
            MediaStoreConfig::Cloudinary(existing) => existing.clone(),
            MediaStoreConfig::Dummy(_) => CloudinaryConfig::default(),
        };
        if let Some(cloud_name) = cloud_name {
            cloudinary.cloud_name = cloud_name;
        }
        if let Some(api_key) = api_key {
            cloudinary.api_key = api_key;
        }
        if let Some(api_secret) = api_secret {
            cloudinary.api_secret = api_secret;
        }
        self.media_store = MediaStoreConfig::Cloudinary(cloudinary);
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        if let MediaStoreConfig::Cloudinary(cloudinary) = &self.media_store {
            let missing: Vec<&str> = [
                ("cloud_name (CLOUD_NAME)", cloudinary.cloud_name.is_empty()),
                ("api_key (API_KEY)", cloudinary.api_key.is_empty()),
                ("api_secret (API_SECRET)", cloudinary.api_secret.is_empty()),
            ]
            .into_iter()
            .filter_map(|(name, is_missing)| is_missing.then_some(name))
            .collect();

            if !missing.is_empty() {
                return Err(Error::Internal {
                    operation: format!(
                        "Config validation: Cloudinary media store is missing credentials: {}",
                        missing.join(", ")
                    ),
                });
            }

            if cloudinary.timeout.is_zero() {
                return Err(Error::Internal {
                    operation: "Config validation: media_store.timeout must be greater than zero".to_string(),
                });
            }
        }

        if self.upload.folder.trim_matches('/').is_empty() {
            return Err(Error::Internal {
                operation: "Config validation: upload.folder cannot be empty".to_string(),
            });
        }

        if self.upload.allowed_formats.is_empty() {
            return Err(Error::Internal {
                operation: "Config validation: upload.allowed_formats cannot be empty. Add at least one format (e.g. jpg)."
                    .to_string(),
            });
        }

        if self.limits.max_upload_size == 0 {
            return Err(Error::Internal {
                operation: "Config validation: limits.max_upload_size cannot be 0".to_string(),
            });
        }

        if self.cors.allowed_origins.is_empty() {
            return Err(Error::Internal {
                operation: "Config validation: CORS allowed_origins cannot be empty. Add at least one allowed origin.".to_string(),
            });
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables can still override specific values
            .merge(Env::prefixed("IMGRELAY_").ignore(&["config"]).split("__"))
            // The plain names the service has always been deployed with
            .merge(Env::raw().only(&["PORT", "CLOUD_NAME", "API_KEY", "API_SECRET"]))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
