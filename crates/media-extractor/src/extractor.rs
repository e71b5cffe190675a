use async_trait::async_trait;

use crate::error::ExtractionError;
use crate::media_info::MediaInfo;
use crate::variant::{ByteRange, VariantDescriptor};
use crate::ByteStream;

/// Source of variant listings and upstream bytes for remote media items.
///
/// Implementations are shared across requests and must not keep per-request
/// state: every call is independent.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Whether `url` is a source this extractor can handle.
    ///
    /// Cheap and synchronous; no network access.
    fn validate(&self, url: &str) -> bool;

    /// List the variants available for `url`.
    async fn fetch_variants(&self, url: &str) -> Result<MediaInfo, ExtractionError>;

    /// Open the upstream byte stream of `variant`.
    ///
    /// When `range` is given only that window is requested upstream.
    async fn open_stream(
        &self,
        variant: &VariantDescriptor,
        range: Option<ByteRange>,
    ) -> Result<ByteStream, ExtractionError>;
}
