//! URL path decoding, normalization and encoding.

use std::path::{Path, PathBuf};

/// Collapse `.`, `..` and empty segments of a decoded URL path.
///
/// The result is relative to the serving root and has no leading or
/// trailing `/`; the root itself is the empty string. `..` above the root
/// is dropped, so the result never escapes it.
///
/// # Examples
/// ```
/// use vidserve_web::paths::normalize;
///
/// assert_eq!(normalize("/a/../b/./c"), "b/c");
/// assert_eq!(normalize("/"), "");
/// ```
pub fn normalize(decoded: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

/// Filesystem path of a normalized name under `root`.
pub fn resolve(root: &Path, relative: &str) -> PathBuf {
    if relative.is_empty() {
        root.to_path_buf()
    } else {
        root.join(relative)
    }
}

/// Percent-encode a relative name as an absolute URL path.
///
/// Separators are kept; everything outside `A-Za-z0-9-_.~` in a segment is
/// encoded.
pub fn encode_url_path(relative: &str) -> String {
    let encoded: Vec<String> = relative
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect();
    format!("/{}", encoded.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("/a/../b/./c"), "b/c");
        assert_eq!(normalize("/"), "");
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("//x///y/"), "x/y");
        assert_eq!(normalize("/../../etc/passwd"), "etc/passwd");
        assert_eq!(normalize("/a/b/../../.."), "");
        assert_eq!(normalize("/a/..b/c"), "a/..b/c");
    }

    #[test]
    fn test_resolve() {
        let root = Path::new("/srv/media");
        assert_eq!(resolve(root, ""), PathBuf::from("/srv/media"));
        assert_eq!(resolve(root, "b/c"), PathBuf::from("/srv/media/b/c"));
    }

    #[test]
    fn test_encode_url_path() {
        assert_eq!(encode_url_path("My Movies/a&b.mkv"), "/My%20Movies/a%26b.mkv");
        assert_eq!(encode_url_path("x/y.mkv.hls/master.m3u8"), "/x/y.mkv.hls/master.m3u8");
        assert_eq!(encode_url_path(""), "/");
        assert_eq!(encode_url_path("sub/"), "/sub/");
    }
}
