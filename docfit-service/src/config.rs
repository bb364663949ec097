use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ServiceError, ServiceResult};

/// Configuration loaded once at startup
#[derive(Debug, Clone, Deserialize)]
pub struct StaticConfig {
    #[serde(default = "default_server")]
    pub server: ServerConfig,

    #[serde(default = "default_storage")]
    pub storage: StorageConfig,

    #[serde(default)]
    pub render: RenderConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Upper bound for JSON request bodies
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        default_server()
    }
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory the upload front end writes `<file_id>.<ext>` files into.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Output geometry and byte-budget policy
#[derive(Debug, Clone, Deserialize)]
pub struct RenderConfig {
    /// Print resolution embedded in JPEG output and used to derive pixel boxes
    #[serde(default = "default_dpi")]
    pub dpi: u16,

    #[serde(default = "default_photo_width_cm")]
    pub photo_width_cm: f64,

    #[serde(default = "default_photo_height_cm")]
    pub photo_height_cm: f64,

    #[serde(default = "default_signature_width_cm")]
    pub signature_width_cm: f64,

    #[serde(default = "default_signature_height_cm")]
    pub signature_height_cm: f64,

    /// KB ceilings a photo render may request; anything else is coerced
    /// to `photo_fallback_kb`.
    #[serde(default = "default_photo_allowed_kb")]
    pub photo_allowed_kb: Vec<u32>,

    #[serde(default = "default_photo_fallback_kb")]
    pub photo_fallback_kb: u32,

    #[serde(default = "default_signature_max_kb")]
    pub signature_max_kb: u32,

    #[serde(default = "default_exact_kb_default")]
    pub exact_kb_default: u32,

    #[serde(default = "default_exact_kb_min")]
    pub exact_kb_min: u32,

    #[serde(default = "default_exact_kb_max")]
    pub exact_kb_max: u32,

    #[serde(default = "default_document_kb_default")]
    pub document_kb_default: u32,

    #[serde(default = "default_document_kb_min")]
    pub document_kb_min: u32,

    #[serde(default = "default_document_kb_max")]
    pub document_kb_max: u32,

    /// Budget for the non-rasterizing document endpoint
    #[serde(default = "default_document_fixed_budget_bytes")]
    pub document_fixed_budget_bytes: usize,

    #[serde(default = "default_probe_cache_ttl_secs")]
    pub probe_cache_ttl_secs: u64,

    #[serde(default = "default_preview_cache_ttl_secs")]
    pub preview_cache_ttl_secs: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            dpi: default_dpi(),
            photo_width_cm: default_photo_width_cm(),
            photo_height_cm: default_photo_height_cm(),
            signature_width_cm: default_signature_width_cm(),
            signature_height_cm: default_signature_height_cm(),
            photo_allowed_kb: default_photo_allowed_kb(),
            photo_fallback_kb: default_photo_fallback_kb(),
            signature_max_kb: default_signature_max_kb(),
            exact_kb_default: default_exact_kb_default(),
            exact_kb_min: default_exact_kb_min(),
            exact_kb_max: default_exact_kb_max(),
            document_kb_default: default_document_kb_default(),
            document_kb_min: default_document_kb_min(),
            document_kb_max: default_document_kb_max(),
            document_fixed_budget_bytes: default_document_fixed_budget_bytes(),
            probe_cache_ttl_secs: default_probe_cache_ttl_secs(),
            preview_cache_ttl_secs: default_preview_cache_ttl_secs(),
        }
    }
}

impl RenderConfig {
    /// Photo pixel box at the configured DPI
    pub fn photo_box(&self) -> (u32, u32) {
        (
            cm_to_px(self.photo_width_cm, self.dpi),
            cm_to_px(self.photo_height_cm, self.dpi),
        )
    }

    /// Signature pixel box at the configured DPI
    pub fn signature_box(&self) -> (u32, u32) {
        (
            cm_to_px(self.signature_width_cm, self.dpi),
            cm_to_px(self.signature_height_cm, self.dpi),
        )
    }

    pub fn probe_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.probe_cache_ttl_secs)
    }

    pub fn preview_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.preview_cache_ttl_secs)
    }

    /// Resolve the KB ceiling for a photo render. Zero or negative means
    /// "use the fallback"; values outside the allow-list are coerced to it.
    pub fn photo_ceiling_kb(&self, requested: i64) -> u32 {
        if requested <= 0 {
            return self.photo_fallback_kb;
        }
        match u32::try_from(requested) {
            Ok(kb) if self.photo_allowed_kb.contains(&kb) => kb,
            _ => self.photo_fallback_kb,
        }
    }

    pub fn exact_kb(&self, requested: i64) -> u32 {
        clamp_kb(
            requested,
            self.exact_kb_default,
            self.exact_kb_min,
            self.exact_kb_max,
        )
    }

    pub fn document_kb(&self, requested: i64) -> u32 {
        clamp_kb(
            requested,
            self.document_kb_default,
            self.document_kb_min,
            self.document_kb_max,
        )
    }
}

fn clamp_kb(requested: i64, default: u32, min: u32, max: u32) -> u32 {
    if requested <= 0 {
        return default.clamp(min, max);
    }
    requested.clamp(i64::from(min), i64::from(max)) as u32
}

fn cm_to_px(cm: f64, dpi: u16) -> u32 {
    (cm / 2.54 * f64::from(dpi)).round().max(1.0) as u32
}

/// Load configuration from the optional `config` file and `DOCFIT__*` env vars
pub fn load_static_config() -> ServiceResult<StaticConfig> {
    Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(
            Environment::with_prefix("DOCFIT")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .map_err(|e| ServiceError::Config {
            message: format!("Failed to build config: {}", e),
        })?
        .try_deserialize()
        .map_err(|e| ServiceError::Config {
            message: format!("Failed to deserialize config: {}", e),
        })
}

// ==================== Default value functions ====================

fn default_server() -> ServerConfig {
    ServerConfig {
        host: default_host(),
        port: default_port(),
        max_body_bytes: default_max_body_bytes(),
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_body_bytes() -> usize {
    64 * 1024
}

fn default_storage() -> StorageConfig {
    StorageConfig {
        data_dir: default_data_dir(),
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_dpi() -> u16 {
    200
}

fn default_photo_width_cm() -> f64 {
    2.5
}

fn default_photo_height_cm() -> f64 {
    3.5
}

fn default_signature_width_cm() -> f64 {
    4.5
}

fn default_signature_height_cm() -> f64 {
    2.0
}

fn default_photo_allowed_kb() -> Vec<u32> {
    vec![30, 50]
}

fn default_photo_fallback_kb() -> u32 {
    50
}

fn default_signature_max_kb() -> u32 {
    50
}

fn default_exact_kb_default() -> u32 {
    100
}

fn default_exact_kb_min() -> u32 {
    10
}

fn default_exact_kb_max() -> u32 {
    500
}

fn default_document_kb_default() -> u32 {
    250
}

fn default_document_kb_min() -> u32 {
    50
}

fn default_document_kb_max() -> u32 {
    2048
}

fn default_document_fixed_budget_bytes() -> usize {
    2 * 1024 * 1024 // 2MB
}

fn default_probe_cache_ttl_secs() -> u64 {
    10 * 60 // 10 minutes
}

fn default_preview_cache_ttl_secs() -> u64 {
    10 * 60
}
