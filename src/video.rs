//! Video reference parsing.
//!
//! The task key space is the YouTube video ID. Callers may hand us a full
//! watch/share/embed URL or a bare 11-character ID.

use regex::Regex;
use std::sync::OnceLock;

const URL_PATTERNS: [&str; 2] = [
    r"(?:youtube\.com/watch\?v=|youtu\.be/|youtube\.com/embed/)([^&\n?#]+)",
    r"youtube\.com/watch\?.*v=([^&\n?#]+)",
];

fn url_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        URL_PATTERNS
            .iter()
            .map(|p| Regex::new(p).expect("invalid video URL pattern"))
            .collect()
    })
}

fn bare_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").expect("invalid bare ID pattern"))
}

/// Extract the video ID from a URL or a bare ID. Returns `None` when the
/// input matches neither form.
pub fn extract_video_id(input: &str) -> Option<String> {
    let input = input.trim();

    for pattern in url_patterns() {
        if let Some(caps) = pattern.captures(input) {
            return Some(caps[1].to_string());
        }
    }

    if bare_id_pattern().is_match(input) {
        return Some(input.to_string());
    }

    None
}

/// Fallback display title when the caller gives no hint and the page
/// scraper (an external collaborator) has nothing either.
pub fn default_title(video_id: &str) -> String {
    format!("Video {}", video_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_from_watch_url() {
        assert_eq!(
            extract_video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ"),
            Some("dQw4w9WgXcQ".to_string())
        );
    }

    #[test]
    fn extracts_from_short_url() {
        assert_eq!(
            extract_video_id("https://youtu.be/dQw4w9WgXcQ"),
            Some("dQw4w9WgXcQ".to_string())
        );
    }

    #[test]
    fn extracts_from_embed_url() {
        assert_eq!(
            extract_video_id("https://www.youtube.com/embed/dQw4w9WgXcQ"),
            Some("dQw4w9WgXcQ".to_string())
        );
    }

    #[test]
    fn extracts_when_v_is_not_first_param() {
        assert_eq!(
            extract_video_id("https://www.youtube.com/watch?feature=share&v=dQw4w9WgXcQ"),
            Some("dQw4w9WgXcQ".to_string())
        );
    }

    #[test]
    fn strips_trailing_params() {
        assert_eq!(
            extract_video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=42s"),
            Some("dQw4w9WgXcQ".to_string())
        );
    }

    #[test]
    fn accepts_bare_id() {
        assert_eq!(
            extract_video_id("dQw4w9WgXcQ"),
            Some("dQw4w9WgXcQ".to_string())
        );
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(extract_video_id("not a video"), None);
        assert_eq!(extract_video_id("https://example.com/watch?v=abc"), None);
        assert_eq!(extract_video_id(""), None);
    }
}
