//! Variant selection.
//!
//! Pure decision logic: picks the variant (or video/audio pair) that satisfies
//! a media type and quality request, and decides whether external muxing is
//! needed.

use media_extractor::{VariantDescriptor, VariantSet};
use serde::Serialize;

/// Requested quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityRequest {
    #[default]
    Highest,
    Lowest,
    /// Pin an exact variant by itag.
    Exact(u32),
}

impl QualityRequest {
    /// Parse a query value. Anything unrecognized means `Highest`.
    pub fn parse(value: Option<&str>) -> Self {
        let Some(value) = value.map(str::trim) else {
            return Self::Highest;
        };
        if value.eq_ignore_ascii_case("lowest") {
            Self::Lowest
        } else if let Ok(itag) = value.parse::<u32>() {
            Self::Exact(itag)
        } else {
            Self::Highest
        }
    }
}

/// Requested media type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    #[default]
    Video,
    Audio,
}

impl MediaKind {
    /// Parse a query value. Only `audio` selects audio.
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.trim().eq_ignore_ascii_case("audio") => Self::Audio,
            _ => Self::Video,
        }
    }
}

/// Outcome of [`select`].
#[derive(Debug, Clone, PartialEq)]
pub enum FormatSelection {
    /// Serve one variant as-is (muxed, or audio for audio requests).
    Single(VariantDescriptor),
    /// Split elementary streams that must be muxed externally.
    Mux {
        video: VariantDescriptor,
        audio: VariantDescriptor,
    },
    /// Nothing viable with the current mux policy.
    None,
}

impl FormatSelection {
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Itags involved, video first.
    pub fn itags(&self) -> Vec<u32> {
        match self {
            Self::Single(v) => vec![v.itag],
            Self::Mux { video, audio } => vec![video.itag, audio.itag],
            Self::None => Vec::new(),
        }
    }
}

/// Choose the variant(s) for a request.
pub fn select(
    variants: &VariantSet,
    kind: MediaKind,
    quality: QualityRequest,
    allow_external_mux: bool,
) -> FormatSelection {
    match kind {
        MediaKind::Audio => {
            let mut candidates = variants.filter(VariantDescriptor::is_audio_only);
            if candidates.is_empty() {
                candidates = variants.filter(|v| v.has_audio);
            }
            pick(&candidates, quality)
                .map(|v| FormatSelection::Single(v.clone()))
                .unwrap_or(FormatSelection::None)
        }
        MediaKind::Video => {
            let muxed = variants.filter(VariantDescriptor::is_muxed);
            if !muxed.is_empty() {
                return pick(&muxed, quality)
                    .map(|v| FormatSelection::Single(v.clone()))
                    .unwrap_or(FormatSelection::None);
            }
            if !allow_external_mux {
                return FormatSelection::None;
            }

            let video = pick(&variants.filter(VariantDescriptor::is_video_only), quality);
            // Audio quality does not follow a lowered video quality.
            let audio = pick(
                &variants.filter(VariantDescriptor::is_audio_only),
                QualityRequest::Highest,
            );
            match (video, audio) {
                (Some(video), Some(audio)) => FormatSelection::Mux {
                    video: video.clone(),
                    audio: audio.clone(),
                },
                _ => FormatSelection::None,
            }
        }
    }
}

/// Apply the quality rule to a candidate list.
///
/// An unmatched `Exact` behaves as `Highest`. Ties keep the earliest candidate.
fn pick<'a>(
    candidates: &[&'a VariantDescriptor],
    quality: QualityRequest,
) -> Option<&'a VariantDescriptor> {
    if let QualityRequest::Exact(itag) = quality
        && let Some(found) = candidates.iter().find(|v| v.itag == itag)
    {
        return Some(*found);
    }

    let lowest = matches!(quality, QualityRequest::Lowest);
    let mut best: Option<&'a VariantDescriptor> = None;
    for &candidate in candidates {
        best = match best {
            None => Some(candidate),
            Some(current) => {
                let better = if lowest {
                    candidate.quality_rank < current.quality_rank
                } else {
                    candidate.quality_rank > current.quality_rank
                };
                Some(if better { candidate } else { current })
            }
        };
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use media_extractor::QualityRank;

    fn audio(itag: u32, kbps: u64) -> VariantDescriptor {
        VariantDescriptor::builder(itag, "m4a")
            .audio(true)
            .quality_rank(QualityRank::audio(kbps * 1000))
            .build()
    }

    fn video(itag: u32, height: u32) -> VariantDescriptor {
        VariantDescriptor::builder(itag, "mp4")
            .video(true)
            .quality_rank(QualityRank::new(height, height as u64 * 1000))
            .build()
    }

    fn muxed(itag: u32, height: u32) -> VariantDescriptor {
        VariantDescriptor::builder(itag, "mp4")
            .video(true)
            .audio(true)
            .quality_rank(QualityRank::new(height, height as u64 * 1000))
            .build()
    }

    #[test]
    fn test_quality_request_parse_falls_back() {
        assert_eq!(QualityRequest::parse(None), QualityRequest::Highest);
        assert_eq!(QualityRequest::parse(Some("highest")), QualityRequest::Highest);
        assert_eq!(QualityRequest::parse(Some("LOWEST")), QualityRequest::Lowest);
        assert_eq!(QualityRequest::parse(Some("137")), QualityRequest::Exact(137));
        assert_eq!(QualityRequest::parse(Some("best-ish")), QualityRequest::Highest);
        assert_eq!(QualityRequest::parse(Some("-1")), QualityRequest::Highest);
        assert_eq!(QualityRequest::parse(Some("")), QualityRequest::Highest);
    }

    #[test]
    fn test_media_kind_parse() {
        assert_eq!(MediaKind::parse(Some("audio")), MediaKind::Audio);
        assert_eq!(MediaKind::parse(Some("video")), MediaKind::Video);
        assert_eq!(MediaKind::parse(Some("podcast")), MediaKind::Video);
        assert_eq!(MediaKind::parse(None), MediaKind::Video);
    }

    #[test]
    fn test_audio_lowest_and_highest() {
        let set = VariantSet::from(vec![audio(1, 128), audio(2, 64), audio(3, 256)]);
        assert_eq!(
            select(&set, MediaKind::Audio, QualityRequest::Lowest, false).itags(),
            vec![2]
        );
        assert_eq!(
            select(&set, MediaKind::Audio, QualityRequest::Highest, false).itags(),
            vec![3]
        );
    }

    #[test]
    fn test_audio_falls_back_to_muxed() {
        let set = VariantSet::from(vec![video(10, 1080), muxed(18, 360), muxed(22, 720)]);
        assert_eq!(
            select(&set, MediaKind::Audio, QualityRequest::Highest, false).itags(),
            vec![22]
        );
    }

    #[test]
    fn test_audio_without_any_audio_is_none() {
        let set = VariantSet::from(vec![video(10, 1080)]);
        assert!(select(&set, MediaKind::Audio, QualityRequest::Highest, true).is_none());
    }

    #[test]
    fn test_video_prefers_muxed_even_when_mux_allowed() {
        let set = VariantSet::from(vec![video(137, 1080), audio(140, 128), muxed(18, 360)]);
        for quality in [
            QualityRequest::Highest,
            QualityRequest::Lowest,
            QualityRequest::Exact(137),
        ] {
            let selection = select(&set, MediaKind::Video, quality, true);
            assert!(matches!(selection, FormatSelection::Single(_)), "{quality:?}");
        }
    }

    #[test]
    fn test_video_split_without_mux_is_none() {
        let set = VariantSet::from(vec![video(137, 1080), audio(140, 128)]);
        assert!(select(&set, MediaKind::Video, QualityRequest::Highest, false).is_none());
    }

    #[test]
    fn test_video_split_with_mux_keeps_highest_audio() {
        let set = VariantSet::from(vec![
            video(137, 1080),
            video(134, 360),
            audio(139, 48),
            audio(140, 128),
        ]);
        let selection = select(&set, MediaKind::Video, QualityRequest::Lowest, true);
        assert_eq!(selection.itags(), vec![134, 140]);
    }

    #[test]
    fn test_video_split_missing_audio_is_none() {
        let set = VariantSet::from(vec![video(137, 1080)]);
        assert!(select(&set, MediaKind::Video, QualityRequest::Highest, true).is_none());
    }

    #[test]
    fn test_exact_match_and_unmatched_fallback() {
        let set = VariantSet::from(vec![muxed(18, 360), muxed(22, 720)]);
        assert_eq!(
            select(&set, MediaKind::Video, QualityRequest::Exact(18), false).itags(),
            vec![18]
        );
        assert_eq!(
            select(&set, MediaKind::Video, QualityRequest::Exact(999), false),
            select(&set, MediaKind::Video, QualityRequest::Highest, false)
        );
    }

    #[test]
    fn test_ties_prefer_first_listed() {
        let set = VariantSet::from(vec![audio(5, 128), audio(6, 128), audio(7, 128)]);
        assert_eq!(
            select(&set, MediaKind::Audio, QualityRequest::Highest, false).itags(),
            vec![5]
        );
        assert_eq!(
            select(&set, MediaKind::Audio, QualityRequest::Lowest, false).itags(),
            vec![5]
        );
    }

    #[test]
    fn test_empty_set() {
        let set = VariantSet::default();
        assert!(select(&set, MediaKind::Video, QualityRequest::Highest, true).is_none());
        assert!(select(&set, MediaKind::Audio, QualityRequest::Lowest, true).is_none());
    }
}
