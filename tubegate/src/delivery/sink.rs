//! Delivery sinks: HTTP response or file on disk.

use std::path::{Path, PathBuf};

use axum::body::Body;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::Response;
use media_extractor::ByteStream;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio_util::io::StreamReader;
use tracing::{info, warn};

use super::range::RangeWindow;
use crate::utils::filename::content_disposition;
use crate::utils::fs;
use crate::{Error, Result};

/// Where the output goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryTarget {
    /// Stream to the HTTP client.
    Response,
    /// Persist under a directory.
    File { dir: PathBuf },
}

/// Metadata describing the delivered body.
#[derive(Debug, Clone)]
pub struct DeliveryHeaders {
    pub filename: String,
    pub mime_type: String,
    /// Total length of the full body, when known.
    pub total_length: Option<u64>,
    /// Negotiated window; only honored with a known total length.
    pub range: Option<RangeWindow>,
    /// `inline` disposition instead of `attachment`.
    pub inline: bool,
}

/// Result of a file delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDelivery {
    pub filename: String,
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Outcome of [`deliver`].
#[derive(Debug)]
pub enum DeliveryResult {
    Response(Response),
    File(FileDelivery),
}

/// Send `output` to `target`.
pub async fn deliver(
    output: ByteStream,
    target: DeliveryTarget,
    headers: DeliveryHeaders,
) -> Result<DeliveryResult> {
    match target {
        DeliveryTarget::Response => build_response(output, &headers).map(DeliveryResult::Response),
        DeliveryTarget::File { dir } => write_file(output, &dir, &headers.filename)
            .await
            .map(DeliveryResult::File),
    }
}

/// Build a streaming response.
///
/// 206 with `Content-Range` for a negotiated window, 200 with
/// `Content-Length` for a known length, chunked 200 otherwise.
pub fn build_response(output: ByteStream, headers: &DeliveryHeaders) -> Result<Response> {
    let disposition = HeaderValue::from_str(&content_disposition(headers.inline, &headers.filename))
        .map_err(|e| Error::Other(format!("Invalid Content-Disposition: {}", e)))?;
    let content_type = HeaderValue::from_str(&headers.mime_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));

    let mut builder = Response::builder()
        .header(header::CONTENT_DISPOSITION, disposition)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "no-store");

    builder = match (headers.range, headers.total_length) {
        (Some(window), Some(total)) => builder
            .status(StatusCode::PARTIAL_CONTENT)
            .header(header::ACCEPT_RANGES, "bytes")
            .header(header::CONTENT_RANGE, window.content_range(total))
            .header(header::CONTENT_LENGTH, window.length()),
        (_, Some(total)) => builder
            .status(StatusCode::OK)
            .header(header::ACCEPT_RANGES, "bytes")
            .header(header::CONTENT_LENGTH, total),
        (_, None) => builder.status(StatusCode::OK),
    };

    builder
        .body(Body::from_stream(output))
        .map_err(|e| Error::Other(format!("Failed to build response: {}", e)))
}

/// Copy `output` into `dir/filename` and report the size on disk.
///
/// A failed copy leaves the partial file in place and reports its path.
pub async fn write_file(output: ByteStream, dir: &Path, filename: &str) -> Result<FileDelivery> {
    let path = dir.join(filename);
    fs::ensure_parent_dir(&path).await?;

    let mut file = tokio::fs::File::create(&path)
        .await
        .map_err(|e| fs::io_error("creating", &path, e))?;

    let mut reader = StreamReader::new(output);
    let copied = match tokio::io::copy(&mut reader, &mut file).await {
        Ok(copied) => copied,
        Err(e) => {
            let _ = file.flush().await;
            warn!(path = %path.display(), error = %e, "Download failed, partial file left on disk");
            return Err(Error::delivery_at(format!("writing {}: {}", filename, e), path));
        }
    };
    file.flush()
        .await
        .map_err(|e| Error::delivery_at(format!("flushing {}: {}", filename, e), &path))?;
    drop(file);

    let size_bytes = fs::file_size(&path).await?;
    info!(path = %path.display(), copied, size_bytes, "Saved download");

    Ok(FileDelivery {
        filename: filename.to_string(),
        path,
        size_bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::StreamExt;

    fn body(chunks: &[&'static [u8]]) -> ByteStream {
        futures::stream::iter(
            chunks
                .iter()
                .map(|c| Ok(Bytes::from_static(c)))
                .collect::<Vec<_>>(),
        )
        .boxed()
    }

    fn headers(total: Option<u64>, range: Option<RangeWindow>) -> DeliveryHeaders {
        DeliveryHeaders {
            filename: "clip.mp4".to_string(),
            mime_type: "video/mp4".to_string(),
            total_length: total,
            range,
            inline: true,
        }
    }

    #[test]
    fn test_partial_content_headers() {
        let window = RangeWindow { start: 0, end: 499 };
        let response = build_response(body(&[b"x"]), &headers(Some(1000), Some(window))).unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        let h = response.headers();
        assert_eq!(h[header::CONTENT_RANGE], "bytes 0-499/1000");
        assert_eq!(h[header::CONTENT_LENGTH], "500");
        assert_eq!(h[header::CACHE_CONTROL], "no-store");
        assert!(h[header::CONTENT_DISPOSITION].to_str().unwrap().starts_with("inline;"));
    }

    #[test]
    fn test_full_body_with_known_length() {
        let response = build_response(body(&[b"x"]), &headers(Some(1000), None)).unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "1000");
        assert_eq!(response.headers()[header::ACCEPT_RANGES], "bytes");
    }

    #[test]
    fn test_unknown_length_is_chunked() {
        let window = RangeWindow { start: 0, end: 9 };
        let response = build_response(body(&[b"x"]), &headers(None, Some(window))).unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(header::CONTENT_LENGTH).is_none());
        assert!(response.headers().get(header::CONTENT_RANGE).is_none());
        assert!(response.headers().get(header::ACCEPT_RANGES).is_none());
    }

    #[tokio::test]
    async fn test_write_file_reports_size() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested");
        let saved = write_file(body(&[b"hello ", b"world"]), &target, "out.mp4")
            .await
            .unwrap();
        assert_eq!(saved.size_bytes, 11);
        assert_eq!(saved.path, target.join("out.mp4"));
        assert_eq!(tokio::fs::read(&saved.path).await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_write_file_failure_keeps_partial() {
        let dir = tempfile::tempdir().unwrap();
        let failing = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"part")),
            Err(std::io::Error::other("upstream reset")),
        ])
        .boxed();

        let err = write_file(failing, dir.path(), "broken.mp4").await.unwrap_err();
        match err {
            Error::DeliveryFailure { path: Some(path), reason } => {
                assert!(reason.contains("upstream reset"));
                assert_eq!(tokio::fs::read(&path).await.unwrap(), b"part");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
