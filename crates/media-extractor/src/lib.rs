//! Extraction layer for the gateway.
//!
//! An [`Extractor`] lists the encoded variants of a remote media item and
//! opens upstream byte streams for them. [`YtDlpExtractor`] is the production
//! implementation, delegating metadata extraction to the `yt-dlp` tool and
//! fetching bytes over HTTP.

pub mod client;
pub mod error;
pub mod extractor;
pub mod media_info;
pub mod variant;
pub mod ytdlp;

use bytes::Bytes;
use futures::stream::BoxStream;

pub use error::ExtractionError;
pub use extractor::Extractor;
pub use media_info::MediaInfo;
pub use variant::{ByteRange, QualityRank, VariantDescriptor, VariantSet};
pub use ytdlp::{YtDlpConfig, YtDlpExtractor};

/// Owned stream of upstream bytes.
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;
