//! Media delivery route.
//!
//! `GET /api/media` selects a variant, negotiates the range, opens the
//! pipeline and delivers to the client or to disk.

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{HeaderMap, header},
    response::{IntoResponse, Response},
    routing::get,
};
use tracing::{Instrument, debug, info, info_span};
use url::Url;

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::{DiskDeliveryResponse, MediaQuery};
use crate::api::server::AppState;
use crate::config::parse_flag;
use crate::delivery::{
    DeliveryHeaders, DeliveryResult, DeliveryTarget, FormatSelection, LifecycleGuard, MediaKind,
    QualityRequest, deliver, negotiate, select,
};
use crate::transform::AudioTarget;
use crate::utils::filename::build_filename;
use crate::{Error, Result};

/// Create the media router.
pub fn router() -> Router<AppState> {
    Router::new().route("/", get(get_media))
}

/// Presentation of a streamed response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Stream,
    Download,
}

/// Validated media request.
#[derive(Debug, Clone)]
struct MediaRequest {
    url: String,
    mode: Mode,
    kind: MediaKind,
    quality: QualityRequest,
    to_disk: bool,
    filename: Option<String>,
    enable_external_mux: bool,
    format: Option<String>,
}

impl MediaRequest {
    fn from_query(query: MediaQuery) -> Result<Self> {
        let url = query
            .url
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| Error::invalid_request("Missing url parameter"))?;

        let mode = match query.mode.as_deref().map(str::trim) {
            None | Some("") | Some("stream") => Mode::Stream,
            Some("download") => Mode::Download,
            Some(other) => {
                return Err(Error::invalid_request(format!(
                    "Invalid mode '{}', expected stream or download",
                    other
                )));
            }
        };

        let to_disk = match query.download_target.as_deref().map(str::trim) {
            None | Some("") | Some("response") => false,
            Some("disk") => true,
            Some(other) => {
                return Err(Error::invalid_request(format!(
                    "Invalid downloadTarget '{}', expected response or disk",
                    other
                )));
            }
        };

        let format = query
            .format
            .map(|f| f.trim().to_ascii_lowercase())
            .filter(|f| !f.is_empty());

        Ok(Self {
            url: url.trim().to_string(),
            mode,
            kind: MediaKind::parse(query.media_type.as_deref()),
            quality: QualityRequest::parse(query.quality.as_deref()),
            to_disk,
            filename: query.filename,
            enable_external_mux: query
                .enable_external_mux
                .as_deref()
                .and_then(parse_flag)
                .unwrap_or(false),
            format,
        })
    }

    /// Audio conversion target, when the requested format differs from the
    /// chosen container.
    fn reencode_target(&self, selection: &FormatSelection) -> Result<Option<AudioTarget>> {
        if self.kind != MediaKind::Audio {
            return Ok(None);
        }
        let Some(format) = self.format.as_deref() else {
            return Ok(None);
        };
        let target = AudioTarget::parse(format).ok_or_else(|| {
            Error::invalid_request(format!(
                "Unsupported format '{}', expected one of mp3, aac, m4a, opus, flac, wav, webm",
                format
            ))
        })?;
        match selection {
            FormatSelection::Single(variant) if variant.container.eq_ignore_ascii_case(format) => {
                Ok(None)
            }
            _ => Ok(Some(target)),
        }
    }
}

/// Reject missing, non-http(s) and unsupported source URLs before any work.
pub(crate) fn validate_url<'a>(state: &AppState, url: Option<&'a str>) -> Result<&'a str> {
    let url = url
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| Error::invalid_request("Missing url parameter"))?;
    let parsed =
        Url::parse(url).map_err(|e| Error::invalid_request(format!("Invalid url: {}", e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::invalid_request("Only http(s) URLs are supported"));
    }
    if !state.extractor.validate(url) {
        return Err(Error::invalid_request(format!("Unsupported source URL: {}", url)));
    }
    Ok(url)
}

async fn get_media(
    State(state): State<AppState>,
    Query(query): Query<MediaQuery>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let request = MediaRequest::from_query(query)?;
    let request_id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
    let span = info_span!("media", request_id = %request_id);

    serve(state, request, headers, request_id)
        .instrument(span)
        .await
        .map_err(ApiError::from)
}

async fn serve(
    state: AppState,
    request: MediaRequest,
    headers: HeaderMap,
    request_id: String,
) -> Result<Response> {
    let url = validate_url(&state, Some(request.url.as_str()))?;
    let media = state.extractor.fetch_variants(url).await?;

    let allow_mux = request.enable_external_mux && state.config.allow_external_mux;
    let selection = select(&media.variants, request.kind, request.quality, allow_mux);
    let reencode = request.reencode_target(&selection)?;

    let passthrough_length = match (&selection, reencode) {
        (FormatSelection::Single(variant), None) => variant.content_length,
        (FormatSelection::None, _) => {
            let reason = if request.kind == MediaKind::Video && !allow_mux {
                "only separate video and audio streams are available"
            } else {
                "no stream matches the request"
            };
            return Err(Error::no_viable_format(reason));
        }
        _ => None,
    };

    info!(
        title = %media.title,
        kind = ?request.kind,
        quality = ?request.quality,
        itags = ?selection.itags(),
        reencode = ?reencode,
        to_disk = request.to_disk,
        "Serving media"
    );

    let range = if request.to_disk {
        None
    } else {
        let header = headers.get(header::RANGE).and_then(|v| v.to_str().ok());
        negotiate(header, passthrough_length)
    };
    if range.is_some() {
        debug!(?range, "Serving partial content");
    }

    let guard = LifecycleGuard::new(request_id);
    let output = state
        .pipeline()
        .open(&selection, range, reencode, &guard)
        .await?;

    let filename = build_filename(
        request.filename.as_deref(),
        &media.title,
        &output.container,
        output.transformed,
    );

    let target = if request.to_disk {
        DeliveryTarget::File {
            dir: state.config.download_dir.clone(),
        }
    } else {
        DeliveryTarget::Response
    };
    let delivery_headers = DeliveryHeaders {
        filename,
        mime_type: output.mime_type.clone(),
        total_length: output.content_length,
        range,
        inline: request.mode == Mode::Stream,
    };

    match deliver(output.stream, target, delivery_headers).await? {
        DeliveryResult::Response(response) => Ok(response),
        DeliveryResult::File(saved) => Ok(Json(DiskDeliveryResponse {
            ok: true,
            filename: saved.filename,
            path: saved.path,
            size_bytes: saved.size_bytes,
        })
        .into_response()),
    }
}
