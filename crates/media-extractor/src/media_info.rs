use serde::{Deserialize, Serialize};

use crate::variant::VariantSet;

/// Metadata and available variants for one remote media item.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MediaInfo {
    /// Source-specific identifier (e.g. the video id).
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    pub is_live: bool,
    pub variants: VariantSet,
}

impl MediaInfo {
    pub fn new(id: impl Into<String>, title: impl Into<String>, variants: VariantSet) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            author: None,
            duration_secs: None,
            is_live: false,
            variants,
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_duration(mut self, secs: f64) -> Self {
        self.duration_secs = Some(secs);
        self
    }
}
