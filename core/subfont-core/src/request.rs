//! Request descriptor parsing (made by FontLab https://www.fontlab.com/)
//!
//! Every incoming path + query pair becomes a [`FontRequest`]. Parsing is pure:
//! no storage is touched here, and malformed input never fails outright. An
//! unsupported format or an unsafe path is reported through
//! [`FontRequest::is_supported`] instead.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Component, Path, PathBuf};

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::form_urlencoded;

/// Hex digits of the text digest kept in the content hash.
const HASH_HEX_LEN: usize = 32;

/// Formats the middleware can produce for a source font.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FontFormat {
    Css,
    Ttf,
    Woff,
    Eot,
    Svg,
}

impl FontFormat {
    pub const ALL: [FontFormat; 5] = [
        FontFormat::Css,
        FontFormat::Ttf,
        FontFormat::Woff,
        FontFormat::Eot,
        FontFormat::Svg,
    ];

    /// Look up a format by file extension (without the dot). Case-sensitive.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "css" => Some(Self::Css),
            "ttf" => Some(Self::Ttf),
            "woff" => Some(Self::Woff),
            "eot" => Some(Self::Eot),
            "svg" => Some(Self::Svg),
            _ => None,
        }
    }

    /// File extension without the dot, as used in request paths and cache keys.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Css => "css",
            Self::Ttf => "ttf",
            Self::Woff => "woff",
            Self::Eot => "eot",
            Self::Svg => "svg",
        }
    }

    /// MIME type sent alongside the artifact.
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Css => "text/css; charset=utf-8",
            Self::Ttf => "font/ttf",
            Self::Woff => "font/woff",
            Self::Eot => "application/vnd.ms-fontobject",
            Self::Svg => "image/svg+xml",
        }
    }
}

impl fmt::Display for FontFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// A parsed font request.
///
/// Only `pathname`, `extension`, `text` and `family` are meaningful when the
/// request is unsupported; the derived fields stay empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FontRequest {
    /// Request path without its leading slash.
    pub pathname: String,
    /// Extension as requested, without the dot.
    pub extension: String,
    /// Characters to keep, exactly as sent in `text=`.
    pub text: String,
    /// CSS font-family override from `name=`.
    pub family: Option<String>,
    /// File stem of `pathname`.
    pub basename: String,
    /// `<basename>-<digest of the character set>`; names every cache artifact.
    pub hash: String,
    /// Un-subset TrueType source, relative to the storage root.
    pub source_path: PathBuf,
    format: Option<FontFormat>,
}

impl FontRequest {
    /// Parse a raw (percent-encoded) request path and optional query string.
    ///
    /// ```
    /// use subfont_core::request::{FontFormat, FontRequest};
    ///
    /// let req = FontRequest::parse("/fonts/SentyBrush.woff", Some("text=hello&name=Brush"));
    /// assert_eq!(req.format(), Some(FontFormat::Woff));
    /// assert_eq!(req.source_path.to_str(), Some("fonts/SentyBrush.ttf"));
    /// assert_eq!(req.family.as_deref(), Some("Brush"));
    /// ```
    pub fn parse(path: &str, query: Option<&str>) -> Self {
        let mut text = None;
        let mut family = None;

        for (key, value) in form_urlencoded::parse(query.unwrap_or_default().as_bytes()) {
            match key.as_ref() {
                "text" if text.is_none() => text = Some(value.into_owned()),
                "name" if family.is_none() => family = Some(value.into_owned()),
                _ => {}
            }
        }

        let path = percent_decode_str(path).decode_utf8_lossy();
        Self::new(&path, text.unwrap_or_default(), family)
    }

    /// Build a request from already-decoded parts.
    pub fn new(path: &str, text: impl Into<String>, family: Option<String>) -> Self {
        let pathname = path.strip_prefix('/').unwrap_or(path).to_string();
        let extension = Path::new(&pathname)
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_string();

        let mut request = Self {
            text: text.into(),
            family: family.filter(|name| !name.trim().is_empty()),
            ..Self::default()
        };

        let format = FontFormat::from_extension(&extension).filter(|_| is_safe_path(&pathname));
        request.pathname = pathname;
        request.extension = extension;

        let Some(format) = format else {
            return request;
        };

        let path = Path::new(&request.pathname);
        request.basename = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        request.hash = content_hash(&request.basename, &request.text);
        request.source_path = path.with_extension("ttf");
        request.format = Some(format);
        request
    }

    pub fn format(&self) -> Option<FontFormat> {
        self.format
    }

    pub fn is_supported(&self) -> bool {
        self.format.is_some()
    }

    /// The distinct characters requested, in code point order.
    pub fn chars(&self) -> BTreeSet<char> {
        self.text.chars().collect()
    }

    /// Family name for generated CSS: the override if present, else the basename.
    pub fn family_name(&self) -> &str {
        self.family.as_deref().unwrap_or(&self.basename)
    }
}

/// Stable identity of a subset: `<basename>-<hex digest>`.
///
/// The digest covers the distinct characters of `text` in code point order,
/// so `"abc"`, `"cba"` and `"aabbc"` all name the same subset.
pub fn content_hash(basename: &str, text: &str) -> String {
    let glyph_set: String = text.chars().collect::<BTreeSet<_>>().into_iter().collect();
    let digest = format!("{:x}", Sha256::digest(glyph_set.as_bytes()));
    format!("{basename}-{}", &digest[..HASH_HEX_LEN])
}

/// Relative, non-empty, free of `..` and of control characters such as NUL.
fn is_safe_path(pathname: &str) -> bool {
    let path = Path::new(pathname);
    path.file_stem().is_some()
        && !pathname.contains('\\')
        && !pathname.chars().any(char::is_control)
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn supported(path: &str) -> bool {
        FontRequest::parse(path, None).is_supported()
    }

    #[test]
    fn parses_css_request_with_text_and_name() {
        let req = FontRequest::parse("/SentyBrush.css", Some("text=abc&name=target-font-family"));

        assert!(req.is_supported());
        assert_eq!(req.format(), Some(FontFormat::Css));
        assert_eq!(req.pathname, "SentyBrush.css");
        assert_eq!(req.basename, "SentyBrush");
        assert_eq!(req.text, "abc");
        assert_eq!(req.family.as_deref(), Some("target-font-family"));
        assert_eq!(req.source_path, PathBuf::from("SentyBrush.ttf"));
        assert!(req.hash.starts_with("SentyBrush-"));
        assert_eq!(req.hash.len(), "SentyBrush-".len() + HASH_HEX_LEN);
    }

    #[test]
    fn unsupported_extension_stops_parsing() {
        let req = FontRequest::parse("/SentyBrush.woff2", Some("text=abc"));

        assert!(!req.is_supported());
        assert_eq!(req.extension, "woff2");
        assert!(req.hash.is_empty());
        assert!(req.basename.is_empty());
        assert_eq!(req.source_path, PathBuf::new());
    }

    #[test]
    fn extension_match_is_case_sensitive() {
        assert!(!supported("/SentyBrush.CSS"));
    }

    #[test]
    fn rejects_traversal_and_empty_paths() {
        assert!(!supported("/../secret.ttf"));
        assert!(!supported("/fonts/../../x.css"));
        assert!(!supported("/"));
        assert!(!supported("/.css"));
        assert!(!supported("//etc/font.ttf"));
        assert!(!supported("/a\\..\\b.ttf"));
    }

    #[test]
    fn rejects_nul_and_control_characters() {
        for path in ["/a%00b.css", "/a%0Ab.woff", "/fonts/%7F.ttf", "/tab%09.svg"] {
            let req = FontRequest::parse(path, Some("text=a"));
            assert!(!req.is_supported(), "{path}");
            assert_eq!(req.source_path, PathBuf::new(), "{path}");
        }
    }

    #[test]
    fn missing_text_means_empty_glyph_set() {
        let req = FontRequest::parse("/SentyBrush.ttf", None);
        assert_eq!(req.text, "");
        assert!(req.chars().is_empty());
        assert_eq!(req.hash, content_hash("SentyBrush", ""));
    }

    #[test]
    fn decodes_percent_encoded_text() {
        let req = FontRequest::parse("/SentyBrush.css", Some("text=%E4%BD%A0%E5%A5%BD+!"));
        assert_eq!(req.text, "你好 !");
    }

    #[test]
    fn decodes_percent_encoded_path_before_checking_it() {
        let req = FontRequest::parse("/Senty%20Brush.css", None);
        assert_eq!(req.basename, "Senty Brush");
        assert_eq!(req.source_path, PathBuf::from("Senty Brush.ttf"));

        assert!(!supported("/%2E%2E/secret.css"));
    }

    #[test]
    fn keeps_nested_directories_in_source_path() {
        let req = FontRequest::parse("/brush/SentyBrush.svg", Some("text=x"));
        assert_eq!(req.source_path, PathBuf::from("brush/SentyBrush.ttf"));
        assert_eq!(req.basename, "SentyBrush");
    }

    #[test]
    fn blank_family_is_ignored() {
        let req = FontRequest::parse("/SentyBrush.css", Some("text=a&name=%20"));
        assert_eq!(req.family, None);
        assert_eq!(req.family_name(), "SentyBrush");
    }

    #[test]
    fn different_text_yields_different_hash() {
        let abc = FontRequest::parse("/SentyBrush.css", Some("text=abc"));
        let abd = FontRequest::parse("/SentyBrush.css", Some("text=abd"));
        assert_ne!(abc.hash, abd.hash);
    }

    #[test]
    fn formats_roundtrip_through_extensions() {
        for format in FontFormat::ALL {
            assert_eq!(FontFormat::from_extension(format.extension()), Some(format));
        }
    }

    proptest! {
        #[test]
        fn hash_ignores_order_and_repeats(text in "\\PC{0,24}") {
            let mut reversed: Vec<char> = text.chars().collect();
            reversed.reverse();
            let doubled: String = reversed.iter().flat_map(|c| [*c, *c]).collect();

            prop_assert_eq!(content_hash("Brush", &text), content_hash("Brush", &doubled));
        }

        #[test]
        fn hash_depends_on_basename(text in "[a-z]{0,8}") {
            prop_assert_ne!(content_hash("A", &text), content_hash("B", &text));
        }
    }
}
