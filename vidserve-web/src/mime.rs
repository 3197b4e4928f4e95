//! Content types by file extension.

use std::path::Path;

/// HLS and container types that `mime_guess` gets wrong or does not know.
const OVERRIDES: &[(&str, &str)] = &[
    ("m3u8", "application/vnd.apple.mpegurl"),
    ("ts", "video/mp2t"),
    ("vtt", "text/vtt"),
    ("mkv", "video/x-matroska"),
];

/// Content type for `path`, `application/octet-stream` when unknown.
pub fn content_type_for(path: &Path) -> String {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    let known = extension.as_deref().and_then(|extension| {
        OVERRIDES
            .iter()
            .find(|(ext, _)| *ext == extension)
            .map(|(_, mime)| *mime)
    });
    if let Some(mime) = known {
        return mime.to_string();
    }

    let guess = mime_guess::from_path(path).first_or_octet_stream();
    if guess.type_() == mime_guess::mime::TEXT {
        format!("{guess}; charset=utf-8")
    } else {
        guess.to_string()
    }
}

pub fn is_video(content_type: &str) -> bool {
    content_type.starts_with("video/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides() {
        assert_eq!(content_type_for(Path::new("a.mkv")), "video/x-matroska");
        assert_eq!(content_type_for(Path::new("A.MKV")), "video/x-matroska");
        assert_eq!(
            content_type_for(Path::new("x.hls/master.m3u8")),
            "application/vnd.apple.mpegurl"
        );
        assert_eq!(content_type_for(Path::new("segment_0_001.ts")), "video/mp2t");
        assert_eq!(content_type_for(Path::new("subs.vtt")), "text/vtt");
    }

    #[test]
    fn test_guessed_types() {
        assert_eq!(content_type_for(Path::new("a.mp4")), "video/mp4");
        assert_eq!(content_type_for(Path::new("index.html")), "text/html; charset=utf-8");
        assert_eq!(content_type_for(Path::new("README")), "application/octet-stream");
    }

    #[test]
    fn test_is_video() {
        assert!(is_video("video/x-matroska"));
        assert!(!is_video("application/vnd.apple.mpegurl"));
    }
}
