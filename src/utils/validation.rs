//! URL and input validation utilities

use regex::Regex;
use std::sync::OnceLock;
use url::Url;

/// Recognized YouTube video and playlist URL shapes
const YOUTUBE_URL_PATTERNS: [&str; 4] = [
    r"^https?://(?:www\.|m\.)?youtube\.com/watch\?(?:.*&)?v=[\w-]+",
    r"^https?://(?:www\.|m\.)?youtube\.com/playlist\?(?:.*&)?list=[\w-]+",
    r"^https?://youtu\.be/[\w-]+",
    r"^https?://(?:www\.|m\.)?youtube\.com/embed/[\w-]+",
];

fn youtube_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        YOUTUBE_URL_PATTERNS
            .iter()
            .filter_map(|pattern| Regex::new(pattern).ok())
            .collect()
    })
}

/// Check if URL is a valid video URL
pub fn is_valid_video_url(url: &str) -> bool {
    if let Ok(parsed) = Url::parse(url) {
        let scheme = parsed.scheme();
        scheme == "http" || scheme == "https"
    } else {
        false
    }
}

/// Check if URL matches one of the supported YouTube shapes
pub fn is_youtube_url(url: &str) -> bool {
    let url = url.trim();
    is_valid_video_url(url) && youtube_patterns().iter().any(|re| re.is_match(url))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_youtube_url_validation() {
        assert!(is_youtube_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
        assert!(is_youtube_url("https://youtube.com/watch?feature=share&v=dQw4w9WgXcQ"));
        assert!(is_youtube_url("https://youtu.be/dQw4w9WgXcQ"));
        assert!(is_youtube_url("https://m.youtube.com/watch?v=dQw4w9WgXcQ"));
        assert!(is_youtube_url("http://youtube.com/embed/abc_123"));
        assert!(is_youtube_url(
            "https://www.youtube.com/playlist?list=PLrAXtmErZgOeiKm4sgNOknGvNjby9efdf"
        ));

        assert!(!is_youtube_url("https://example.com/video"));
        assert!(!is_youtube_url("https://vimeo.com/123456"));
        assert!(!is_youtube_url("https://www.youtube.com/feed/trending"));
        assert!(!is_youtube_url("not_a_url"));
        assert!(!is_youtube_url(""));
    }
}
