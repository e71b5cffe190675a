use crate::ByteStream;
use crate::error::ExtractionError;
use crate::extractor::Extractor;
use crate::media_info::MediaInfo;
use crate::variant::{
    ByteRange, QualityRank, VariantDescriptor, VariantSet, default_mime_type,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt, future};
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};
use url::Url;

static DEFAULT_YTDLP_PATH: &str = "yt-dlp";

static YOUTUBE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^https?://(?:(?:www|m|music)\.)?(?:youtube\.com/(?:watch\?(?:[^#]*&)?v=|shorts/|embed/|live/|v/)|youtu\.be/)([A-Za-z0-9_-]{11})(?:[?&#/].*)?$",
    )
    .expect("youtube url pattern is valid")
});

/// Configuration for [`YtDlpExtractor`].
#[derive(Debug, Clone)]
pub struct YtDlpConfig {
    pub binary_path: String,
    /// Cookies file passed through `--cookies`.
    pub cookies_file: Option<PathBuf>,
    pub extra_args: Vec<String>,
}

impl Default for YtDlpConfig {
    fn default() -> Self {
        Self {
            binary_path: DEFAULT_YTDLP_PATH.to_string(),
            cookies_file: None,
            extra_args: Vec::new(),
        }
    }
}

/// Extractor backed by the `yt-dlp` command line tool.
///
/// Metadata comes from `yt-dlp -J`; bytes are fetched directly from the
/// resolved format URLs with `reqwest`, so ranged requests reach upstream.
#[derive(Debug, Clone)]
pub struct YtDlpExtractor {
    config: YtDlpConfig,
    client: Client,
}

impl YtDlpExtractor {
    pub fn new(config: YtDlpConfig, client: Client) -> Self {
        Self { config, client }
    }

    /// Version string of the configured binary, if it can be executed.
    pub fn version(&self) -> Option<String> {
        process_utils::probe_version(&self.config.binary_path, "--version")
    }

    /// Extract the video id from a supported URL.
    pub fn video_id(url: &str) -> Option<&str> {
        YOUTUBE_URL
            .captures(url.trim())
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
    }

    async fn run_json(&self, url: &str) -> Result<YtDlpJson, ExtractionError> {
        let mut cmd = process_utils::tokio_command(&self.config.binary_path);
        cmd.args(["-J", "--no-playlist", "--no-warnings"]);
        if let Some(ref cookies) = self.config.cookies_file {
            cmd.arg("--cookies").arg(cookies);
        }
        cmd.args(&self.config.extra_args);
        cmd.arg("--").arg(url);

        let out = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ExtractionError::Unavailable(format!("failed to spawn yt-dlp: {e}")))?;

        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            debug!(status = %out.status, stderr = %stderr.trim(), "yt-dlp failed");
            return Err(map_ytdlp_error(&stderr));
        }

        Ok(serde_json::from_slice(&out.stdout)?)
    }
}

#[async_trait]
impl Extractor for YtDlpExtractor {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    fn validate(&self, url: &str) -> bool {
        Self::video_id(url).is_some()
    }

    async fn fetch_variants(&self, url: &str) -> Result<MediaInfo, ExtractionError> {
        if !self.validate(url) {
            return Err(ExtractionError::InvalidUrl(url.to_string()));
        }
        let json = self.run_json(url).await?;
        let info = parse_media_info(json)?;
        debug!(id = %info.id, variants = info.variants.len(), "Extracted variants");
        Ok(info)
    }

    async fn open_stream(
        &self,
        variant: &VariantDescriptor,
        range: Option<ByteRange>,
    ) -> Result<ByteStream, ExtractionError> {
        let upstream = Url::parse(&variant.url)
            .map_err(|e| ExtractionError::Other(format!("{variant} has a bad upstream url: {e}")))?;

        let mut request = self.client.get(upstream);
        if let Some(headers) = &variant.headers {
            for (key, value) in headers.iter() {
                request = request.header(key.as_str(), value.as_str());
            }
        }
        if let Some(range) = range {
            request = request.header(reqwest::header::RANGE, range.header_value());
        }

        let response = request.send().await?;
        let status = response.status();
        match status {
            StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => {
                return Err(ExtractionError::Forbidden);
            }
            StatusCode::NOT_FOUND | StatusCode::GONE => return Err(ExtractionError::Removed),
            s if !s.is_success() => {
                return Err(ExtractionError::Other(format!("upstream returned {s}")));
            }
            _ => {}
        }

        let stream = response
            .bytes_stream()
            .map_err(std::io::Error::other)
            .boxed();

        match range {
            Some(range) if status != StatusCode::PARTIAL_CONTENT => {
                warn!(itag = variant.itag, "Upstream ignored range request, slicing locally");
                Ok(slice_stream(stream, range))
            }
            _ => Ok(stream),
        }
    }
}

/// Cut `range` out of a stream that starts at byte 0.
fn slice_stream(stream: ByteStream, range: ByteRange) -> ByteStream {
    stream
        .scan(
            (range.start, range.length()),
            |(skip, remaining), item| {
                let out = match item {
                    Err(e) => Some(Err(e)),
                    Ok(_) if *remaining == 0 => None,
                    Ok(mut chunk) => {
                        if *skip > 0 {
                            let n = (*skip).min(chunk.len() as u64);
                            chunk = chunk.slice(n as usize..);
                            *skip -= n;
                        }
                        let take = (*remaining).min(chunk.len() as u64);
                        chunk.truncate(take as usize);
                        *remaining -= take;
                        Some(Ok(chunk))
                    }
                };
                future::ready(out)
            },
        )
        .try_filter(|chunk: &Bytes| future::ready(!chunk.is_empty()))
        .boxed()
}

fn parse_media_info(json: YtDlpJson) -> Result<MediaInfo, ExtractionError> {
    let live = json.is_live.unwrap_or(false)
        || matches!(json.live_status.as_deref(), Some("is_live" | "is_upcoming"));
    if live {
        return Err(ExtractionError::Live);
    }

    let variants: Vec<VariantDescriptor> = json
        .formats
        .into_iter()
        .filter_map(YtDlpFormat::into_variant)
        .collect();

    if variants.is_empty() {
        return Err(ExtractionError::NoStreamsFound);
    }

    let mut info = MediaInfo::new(
        json.id,
        json.title.unwrap_or_default(),
        VariantSet::new(variants),
    );
    if let Some(uploader) = json.uploader {
        info = info.with_author(uploader);
    }
    if let Some(duration) = json.duration {
        info = info.with_duration(duration);
    }
    Ok(info)
}

fn map_ytdlp_error(msg: &str) -> ExtractionError {
    let lower = msg.to_lowercase();
    if lower.contains("private video") || lower.contains("video is private") {
        return ExtractionError::Private;
    }
    if lower.contains("confirm your age")
        || lower.contains("age-restricted")
        || lower.contains("age restricted")
    {
        return ExtractionError::AgeRestricted;
    }
    if lower.contains("live event") || lower.contains("is live") || lower.contains("premieres in")
    {
        return ExtractionError::Live;
    }
    if lower.contains("has been removed")
        || lower.contains("video unavailable")
        || lower.contains("no longer available")
        || lower.contains("account associated with this video has been terminated")
    {
        return ExtractionError::Removed;
    }
    if lower.contains("http error 403")
        || lower.contains("forbidden")
        || lower.contains("not available in your country")
    {
        return ExtractionError::Forbidden;
    }
    if lower.contains("unsupported url") {
        return ExtractionError::InvalidUrl(msg.trim().to_string());
    }
    let last_line = msg.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("");
    ExtractionError::Other(last_line.trim().to_string())
}

#[derive(Debug, Clone, Deserialize)]
struct YtDlpJson {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    uploader: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    is_live: Option<bool>,
    #[serde(default)]
    live_status: Option<String>,
    #[serde(default)]
    formats: Vec<YtDlpFormat>,
}

#[derive(Debug, Clone, Deserialize)]
struct YtDlpFormat {
    format_id: String,
    #[serde(default)]
    ext: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    protocol: Option<String>,
    #[serde(default)]
    vcodec: Option<String>,
    #[serde(default)]
    acodec: Option<String>,
    #[serde(default)]
    filesize: Option<u64>,
    #[serde(default)]
    height: Option<u32>,
    /// Total bitrate in kbit/s.
    #[serde(default)]
    tbr: Option<f64>,
    /// Audio bitrate in kbit/s.
    #[serde(default)]
    abr: Option<f64>,
    #[serde(default)]
    format_note: Option<String>,
    #[serde(default)]
    http_headers: Option<HashMap<String, String>>,
}

impl YtDlpFormat {
    /// Progressive HTTP formats only; manifests and storyboards are skipped.
    fn into_variant(self) -> Option<VariantDescriptor> {
        let url = self.url?;
        let protocol = self.protocol.as_deref().unwrap_or("https");
        if protocol != "https" && protocol != "http" {
            return None;
        }
        let container = self.ext?;
        if container == "mhtml" {
            return None;
        }
        let itag: u32 = self.format_id.parse().ok()?;

        let vcodec = self.vcodec.filter(|c| c != "none");
        let acodec = self.acodec.filter(|c| c != "none");
        let has_video = vcodec.is_some();
        let has_audio = acodec.is_some();
        if !has_video && !has_audio {
            return None;
        }

        let codecs: Vec<&str> = vcodec.iter().chain(acodec.iter()).map(String::as_str).collect();
        let mime_type = format!(
            "{}; codecs=\"{}\"",
            default_mime_type(&container, has_video),
            codecs.join(", ")
        );

        let kbps = if has_video { self.tbr } else { self.abr.or(self.tbr) };
        let bitrate = kbps.map(|k| (k * 1000.0).round() as u64).unwrap_or(0);
        let height = if has_video { self.height.unwrap_or(0) } else { 0 };

        let label = self.format_note.filter(|n| !n.is_empty()).or_else(|| {
            if has_video {
                self.height.map(|h| format!("{h}p"))
            } else {
                kbps.map(|k| format!("{}k", k.round() as u64))
            }
        });

        let mut builder = VariantDescriptor::builder(itag, container)
            .video(has_video)
            .audio(has_audio)
            .mime_type(mime_type)
            .content_length_opt(self.filesize)
            .quality_rank(QualityRank::new(height, bitrate))
            .url(url)
            .headers_opt(self.http_headers.map(Arc::new));
        if let Some(label) = label {
            builder = builder.quality_label(label);
        }
        Some(builder.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    const SAMPLE: &str = r#"{
        "id": "dQw4w9WgXcQ",
        "title": "Sample",
        "uploader": "Someone",
        "duration": 212.0,
        "is_live": false,
        "formats": [
            {"format_id": "sb0", "ext": "mhtml", "protocol": "mhtml", "url": "https://i.ytimg.com/sb", "vcodec": "none", "acodec": "none"},
            {"format_id": "249", "ext": "webm", "protocol": "https", "url": "https://rr.example/249", "vcodec": "none", "acodec": "opus", "abr": 50.5, "filesize": 1200000},
            {"format_id": "140", "ext": "m4a", "protocol": "https", "url": "https://rr.example/140", "vcodec": "none", "acodec": "mp4a.40.2", "abr": 129.5, "filesize": 3400000, "http_headers": {"User-Agent": "UA"}},
            {"format_id": "18", "ext": "mp4", "protocol": "https", "url": "https://rr.example/18", "vcodec": "avc1.42001E", "acodec": "mp4a.40.2", "height": 360, "tbr": 500.0, "format_note": "360p"},
            {"format_id": "137", "ext": "mp4", "protocol": "https", "url": "https://rr.example/137", "vcodec": "avc1.640028", "acodec": "none", "height": 1080, "tbr": 4000.0},
            {"format_id": "96", "ext": "mp4", "protocol": "m3u8_native", "url": "https://manifest.example/96", "vcodec": "avc1", "acodec": "mp4a.40.2", "height": 1080},
            {"format_id": "251-drc", "ext": "webm", "protocol": "https", "url": "https://rr.example/251", "vcodec": "none", "acodec": "opus"}
        ]
    }"#;

    #[test]
    fn test_parse_formats() {
        let json: YtDlpJson = serde_json::from_str(SAMPLE).unwrap();
        let info = parse_media_info(json).unwrap();

        assert_eq!(info.id, "dQw4w9WgXcQ");
        assert_eq!(info.title, "Sample");
        assert_eq!(info.author.as_deref(), Some("Someone"));

        let itags: Vec<u32> = info.variants.iter().map(|v| v.itag).collect();
        assert_eq!(itags, vec![249, 140, 18, 137]);

        let audio = info.variants.by_itag(140).unwrap();
        assert!(audio.is_audio_only());
        assert_eq!(audio.container, "m4a");
        assert_eq!(audio.content_length, Some(3_400_000));
        assert_eq!(audio.quality_rank, QualityRank::audio(129_500));
        assert_eq!(audio.mime_type, "audio/mp4; codecs=\"mp4a.40.2\"");
        assert!(audio.headers.is_some());

        let muxed = info.variants.by_itag(18).unwrap();
        assert!(muxed.is_muxed());
        assert_eq!(muxed.quality_label.as_deref(), Some("360p"));
        assert_eq!(muxed.content_length, None);

        let video = info.variants.by_itag(137).unwrap();
        assert!(video.is_video_only());
        assert_eq!(video.quality_rank, QualityRank::new(1080, 4_000_000));
        assert_eq!(video.quality_label.as_deref(), Some("1080p"));
    }

    #[test]
    fn test_live_source_rejected() {
        let json: YtDlpJson = serde_json::from_str(
            r#"{"id": "x", "live_status": "is_live", "formats": []}"#,
        )
        .unwrap();
        assert!(matches!(parse_media_info(json), Err(ExtractionError::Live)));
    }

    #[test]
    fn test_no_usable_formats() {
        let json: YtDlpJson = serde_json::from_str(r#"{"id": "x", "formats": []}"#).unwrap();
        assert!(matches!(
            parse_media_info(json),
            Err(ExtractionError::NoStreamsFound)
        ));
    }

    #[test]
    fn test_map_errors() {
        assert!(matches!(
            map_ytdlp_error("ERROR: [youtube] abc: Video unavailable. This video is private"),
            ExtractionError::Private
        ));
        assert!(matches!(
            map_ytdlp_error("ERROR: [youtube] abc: Sign in to confirm your age."),
            ExtractionError::AgeRestricted
        ));
        assert!(matches!(
            map_ytdlp_error("ERROR: [youtube] abc: Video unavailable. This video has been removed by the uploader"),
            ExtractionError::Removed
        ));
        assert!(matches!(
            map_ytdlp_error("ERROR: [youtube] abc: This live event will begin in 3 hours."),
            ExtractionError::Live
        ));
        assert!(matches!(
            map_ytdlp_error("ERROR: unable to download video data: HTTP Error 403: Forbidden"),
            ExtractionError::Forbidden
        ));
        match map_ytdlp_error("WARNING: x\nERROR: something odd\n") {
            ExtractionError::Other(msg) => assert_eq!(msg, "ERROR: something odd"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_validate_urls() {
        let extractor = YtDlpExtractor::new(YtDlpConfig::default(), Client::new());
        assert!(extractor.validate("https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
        assert!(extractor.validate("https://youtube.com/watch?feature=share&v=dQw4w9WgXcQ"));
        assert!(extractor.validate("https://youtu.be/dQw4w9WgXcQ?t=10"));
        assert!(extractor.validate("https://m.youtube.com/shorts/dQw4w9WgXcQ"));
        assert!(!extractor.validate("https://example.com/watch?v=dQw4w9WgXcQ"));
        assert!(!extractor.validate("https://www.youtube.com/watch?v=short"));
        assert!(!extractor.validate("not a url"));
        assert_eq!(
            YtDlpExtractor::video_id("https://youtu.be/dQw4w9WgXcQ"),
            Some("dQw4w9WgXcQ")
        );
    }

    #[tokio::test]
    async fn test_slice_stream_cuts_window() {
        let chunks: Vec<std::io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"0123")),
            Ok(Bytes::from_static(b"4567")),
            Ok(Bytes::from_static(b"89ab")),
        ];
        let sliced = slice_stream(stream::iter(chunks).boxed(), ByteRange { start: 2, end: 8 });
        let out: Vec<Bytes> = sliced.try_collect().await.unwrap();
        assert_eq!(out.concat(), b"2345678".to_vec());
    }
}
