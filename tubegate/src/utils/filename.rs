//! Filename sanitization and download naming.
//!
//! Sanitization removes or replaces characters that are invalid on Windows,
//! Linux, or macOS while preserving valid Unicode text.

/// Characters that are invalid in Windows filenames
const WINDOWS_INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Windows reserved filenames (case-insensitive)
const WINDOWS_RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Longest base name kept, in characters.
const MAX_BASE_LEN: usize = 180;

/// Sanitize a string for use in filenames across all platforms.
///
/// Control characters and Windows-invalid characters become `_` (runs are
/// collapsed), leading/trailing spaces and dots are trimmed, reserved device
/// names are prefixed with `_`, and an empty result becomes `"unnamed"`.
///
/// ```
/// use tubegate::utils::filename::sanitize_filename;
///
/// assert_eq!(sanitize_filename("hello?world"), "hello_world");
/// assert_eq!(sanitize_filename(""), "unnamed");
/// assert_eq!(sanitize_filename("CON"), "_CON");
/// ```
pub fn sanitize_filename(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut last_was_replacement = false;

    for c in input.chars().take(MAX_BASE_LEN) {
        if c.is_control() || WINDOWS_INVALID_CHARS.contains(&c) {
            if !last_was_replacement {
                result.push('_');
                last_was_replacement = true;
            }
        } else {
            result.push(c);
            last_was_replacement = false;
        }
    }

    let trimmed = result.trim_matches(|c| c == ' ' || c == '.');
    if trimmed.is_empty() {
        return "unnamed".to_string();
    }

    let upper = trimmed.to_uppercase();
    for reserved in WINDOWS_RESERVED_NAMES {
        if upper == *reserved || upper.starts_with(&format!("{}.", reserved)) {
            return format!("_{}", trimmed);
        }
    }

    trimmed.to_string()
}

/// Split a trailing `.ext` off a name when it looks like a media extension.
fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && (1..=5).contains(&ext.len())
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            (stem, Some(ext))
        }
        _ => (name, None),
    }
}

/// Final filename for a delivery.
///
/// `override_name` wins over `title`. With `force_extension` the output
/// container replaces whatever extension the caller supplied; otherwise an
/// extension already present in the override is kept.
pub fn build_filename(
    override_name: Option<&str>,
    title: &str,
    extension: &str,
    force_extension: bool,
) -> String {
    let requested = override_name.map(str::trim).filter(|s| !s.is_empty());

    match requested {
        Some(name) => {
            let sanitized = sanitize_filename(name);
            let (stem, ext) = split_extension(&sanitized);
            match ext {
                Some(_) if !force_extension => sanitized.clone(),
                _ => format!("{stem}.{extension}"),
            }
        }
        None => format!("{}.{extension}", sanitize_filename(title)),
    }
}

/// `Content-Disposition` value with an ASCII fallback and an RFC 5987 name.
pub fn content_disposition(inline: bool, filename: &str) -> String {
    let kind = if inline { "inline" } else { "attachment" };
    let fallback: String = filename
        .chars()
        .map(|c| {
            if c.is_ascii() && !c.is_ascii_control() && c != '"' && c != '\\' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "{kind}; filename=\"{fallback}\"; filename*=UTF-8''{}",
        urlencoding::encode(filename)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_string() {
        assert_eq!(sanitize_filename(""), "unnamed");
    }

    #[test]
    fn test_only_invalid_characters() {
        assert_eq!(sanitize_filename("???"), "_");
    }

    #[test]
    fn test_windows_reserved_names() {
        assert_eq!(sanitize_filename("con"), "_con");
        assert_eq!(sanitize_filename("LPT1"), "_LPT1");
        assert_eq!(sanitize_filename("nul.mp4"), "_nul.mp4");
    }

    #[test]
    fn test_unicode_and_invalid_mix() {
        assert_eq!(sanitize_filename("观看一只青蛙?"), "观看一只青蛙_");
        assert_eq!(sanitize_filename("a<>:\"b"), "a_b");
        assert_eq!(sanitize_filename("AC/DC: Live"), "AC_DC_ Live");
    }

    #[test]
    fn test_long_titles_truncated() {
        let long = "x".repeat(500);
        assert_eq!(sanitize_filename(&long).chars().count(), MAX_BASE_LEN);
    }

    #[test]
    fn test_build_filename_from_title() {
        assert_eq!(build_filename(None, "My Video?", "mp4", false), "My Video_.mp4");
        assert_eq!(build_filename(Some("  "), "Song", "m4a", false), "Song.m4a");
    }

    #[test]
    fn test_build_filename_keeps_override_extension_for_passthrough() {
        assert_eq!(build_filename(Some("clip.webm"), "t", "mp4", false), "clip.webm");
        assert_eq!(build_filename(Some("clip"), "t", "mp4", false), "clip.mp4");
    }

    #[test]
    fn test_build_filename_forces_transformed_extension() {
        assert_eq!(build_filename(Some("song.m4a"), "t", "mp3", true), "song.mp3");
        assert_eq!(build_filename(Some("movie.mp4"), "t", "mkv", true), "movie.mkv");
        assert_eq!(build_filename(Some("v1.2 final"), "t", "mp4", true), "v1.2 final.mp4");
    }

    #[test]
    fn test_content_disposition_encodes_unicode() {
        let value = content_disposition(false, "青蛙.mp4");
        assert!(value.starts_with("attachment; filename=\"__.mp4\""));
        assert!(value.contains("filename*=UTF-8''%E9%9D%92%E8%9B%99.mp4"));
        assert!(content_disposition(true, "a.mp4").starts_with("inline;"));
    }
}
