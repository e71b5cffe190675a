//! Request and response bodies.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Query parameters of the media endpoint.
///
/// Everything is optional at this level; validation and defaults live in the
/// handler so malformed values never surface as extractor rejections.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaQuery {
    pub url: Option<String>,
    /// `stream` (inline) or `download` (attachment).
    pub mode: Option<String>,
    /// `video` or `audio`.
    #[serde(rename = "type")]
    pub media_type: Option<String>,
    /// `highest`, `lowest` or an itag.
    pub quality: Option<String>,
    /// `response` or `disk`.
    pub download_target: Option<String>,
    pub filename: Option<String>,
    pub enable_external_mux: Option<String>,
    /// Audio output format, e.g. `mp3`.
    pub format: Option<String>,
}

/// Query parameters of the info endpoint.
#[derive(Debug, Deserialize)]
pub struct InfoQuery {
    pub url: Option<String>,
}

/// Successful disk delivery.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskDeliveryResponse {
    pub ok: bool,
    pub filename: String,
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub components: Vec<ComponentHealth>,
}

/// Health of one component.
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateLogFilterRequest {
    pub filter: String,
}

/// Response for logging configuration.
#[derive(Debug, Serialize)]
pub struct LoggingConfigResponse {
    pub filter: String,
    pub available_modules: Vec<ModuleInfo>,
}

/// Information about an available logging module.
#[derive(Debug, Serialize)]
pub struct ModuleInfo {
    pub name: String,
    pub description: String,
}
