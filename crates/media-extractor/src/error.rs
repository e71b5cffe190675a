use thiserror::Error;

/// Failure reported by an extractor.
///
/// The content reasons (`Private` .. `Forbidden`) describe why a source cannot
/// be served; everything else is an operational failure.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("private content")]
    Private,
    #[error("age-restricted content")]
    AgeRestricted,
    #[error("content removed or unavailable")]
    Removed,
    #[error("live stream not supported")]
    Live,
    #[error("access forbidden")]
    Forbidden,
    #[error("no streams found")]
    NoStreamsFound,
    #[error("extractor unavailable: {0}")]
    Unavailable(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("other: {0}")]
    Other(String),
}

impl ExtractionError {
    /// Short machine-readable reason, used in API error codes and logs.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidUrl(_) => "invalid_url",
            Self::Private => "private",
            Self::AgeRestricted => "age_restricted",
            Self::Removed => "removed",
            Self::Live => "live",
            Self::Forbidden => "forbidden",
            Self::NoStreamsFound => "no_streams",
            Self::Unavailable(_) => "unavailable",
            Self::Http(_) => "http",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::Other(_) => "other",
        }
    }
}
