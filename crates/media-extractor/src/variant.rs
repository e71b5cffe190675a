use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, sync::Arc};

/// Ordering key used to pick the highest or lowest variant.
///
/// Compares by vertical resolution first, then by bitrate, so audio-only
/// variants (height 0) are ranked by bitrate alone.
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub struct QualityRank {
    pub height: u32,
    /// Bits per second.
    pub bitrate: u64,
}

impl QualityRank {
    pub fn new(height: u32, bitrate: u64) -> Self {
        Self { height, bitrate }
    }

    pub fn audio(bitrate: u64) -> Self {
        Self { height: 0, bitrate }
    }
}

/// Inclusive byte window requested from upstream.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes covered by the window.
    pub fn length(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Value for an upstream `Range` request header.
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

/// One encoded representation of a remote media item.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VariantDescriptor {
    /// Stable identifier that pins this exact variant.
    pub itag: u32,
    pub has_video: bool,
    pub has_audio: bool,
    /// Container short name, e.g. "mp4", "webm", "m4a".
    pub container: String,
    pub mime_type: String,
    /// Absent for live or unknown-length sources.
    pub content_length: Option<u64>,
    pub quality_rank: QualityRank,
    /// Human readable label such as "1080p" or "128k".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_label: Option<String>,
    /// Upstream location, only meaningful to the extractor that produced it.
    #[serde(skip)]
    pub url: String,
    /// Headers the upstream expects when fetching `url`.
    #[serde(skip)]
    pub headers: Option<Arc<HashMap<String, String>>>,
}

impl VariantDescriptor {
    pub fn builder(itag: u32, container: impl Into<String>) -> VariantDescriptorBuilder {
        VariantDescriptorBuilder::new(itag, container)
    }

    pub fn is_muxed(&self) -> bool {
        self.has_video && self.has_audio
    }

    pub fn is_video_only(&self) -> bool {
        self.has_video && !self.has_audio
    }

    pub fn is_audio_only(&self) -> bool {
        self.has_audio && !self.has_video
    }
}

impl fmt::Display for VariantDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match (self.has_video, self.has_audio) {
            (true, true) => "muxed",
            (true, false) => "video",
            (false, true) => "audio",
            (false, false) => "empty",
        };
        match &self.quality_label {
            Some(label) => write!(f, "itag {} ({} {} {})", self.itag, kind, self.container, label),
            None => write!(f, "itag {} ({} {})", self.itag, kind, self.container),
        }
    }
}

#[derive(Debug, Clone)]
pub struct VariantDescriptorBuilder {
    inner: VariantDescriptor,
}

impl VariantDescriptorBuilder {
    fn new(itag: u32, container: impl Into<String>) -> Self {
        Self {
            inner: VariantDescriptor {
                itag,
                has_video: false,
                has_audio: false,
                container: container.into(),
                mime_type: String::new(),
                content_length: None,
                quality_rank: QualityRank::default(),
                quality_label: None,
                url: String::new(),
                headers: None,
            },
        }
    }

    pub fn video(mut self, has_video: bool) -> Self {
        self.inner.has_video = has_video;
        self
    }

    pub fn audio(mut self, has_audio: bool) -> Self {
        self.inner.has_audio = has_audio;
        self
    }

    pub fn mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.inner.mime_type = mime_type.into();
        self
    }

    pub fn content_length(mut self, length: u64) -> Self {
        self.inner.content_length = Some(length);
        self
    }

    pub fn content_length_opt(mut self, length: Option<u64>) -> Self {
        self.inner.content_length = length;
        self
    }

    pub fn quality_rank(mut self, rank: QualityRank) -> Self {
        self.inner.quality_rank = rank;
        self
    }

    pub fn quality_label(mut self, label: impl Into<String>) -> Self {
        self.inner.quality_label = Some(label.into());
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.inner.url = url.into();
        self
    }

    pub fn headers_opt(mut self, headers: Option<Arc<HashMap<String, String>>>) -> Self {
        self.inner.headers = headers;
        self
    }

    pub fn build(self) -> VariantDescriptor {
        let mut variant = self.inner;
        if variant.mime_type.is_empty() {
            variant.mime_type = default_mime_type(&variant.container, variant.has_video);
        }
        variant
    }
}

/// Best-effort MIME type for a container.
pub fn default_mime_type(container: &str, has_video: bool) -> String {
    let mime = match (container.to_ascii_lowercase().as_str(), has_video) {
        ("mp4", true) => "video/mp4",
        ("mp4" | "m4a", false) => "audio/mp4",
        ("webm", true) => "video/webm",
        ("webm", false) => "audio/webm",
        ("3gp", _) => "video/3gpp",
        ("mkv", _) => "video/x-matroska",
        ("mp3", _) => "audio/mpeg",
        ("aac", _) => "audio/aac",
        ("opus" | "ogg", _) => "audio/ogg",
        ("flac", _) => "audio/flac",
        ("wav", _) => "audio/wav",
        _ => "application/octet-stream",
    };
    mime.to_string()
}

/// All variants offered for one remote item, in the order the extractor
/// listed them. The order is significant: it breaks ties during selection.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(transparent)]
pub struct VariantSet {
    variants: Vec<VariantDescriptor>,
}

impl VariantSet {
    pub fn new(variants: Vec<VariantDescriptor>) -> Self {
        Self { variants }
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &VariantDescriptor> {
        self.variants.iter()
    }

    pub fn as_slice(&self) -> &[VariantDescriptor] {
        &self.variants
    }

    /// Variants matching `predicate`, preserving listing order.
    pub fn filter<F>(&self, predicate: F) -> Vec<&VariantDescriptor>
    where
        F: Fn(&VariantDescriptor) -> bool,
    {
        self.variants.iter().filter(|v| predicate(v)).collect()
    }

    pub fn by_itag(&self, itag: u32) -> Option<&VariantDescriptor> {
        self.variants.iter().find(|v| v.itag == itag)
    }
}

impl From<Vec<VariantDescriptor>> for VariantSet {
    fn from(variants: Vec<VariantDescriptor>) -> Self {
        Self::new(variants)
    }
}

impl<'a> IntoIterator for &'a VariantSet {
    type Item = &'a VariantDescriptor;
    type IntoIter = std::slice::Iter<'a, VariantDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.variants.iter()
    }
}
