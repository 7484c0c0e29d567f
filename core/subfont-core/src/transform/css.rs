//! `@font-face` generation.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

use crate::request::FontFormat;

const TTF_DATA_URI_PREFIX: &str = "data:application/x-font-ttf;charset=utf-8;base64,";

/// Bytes that would end a quoted `url("...")` or change what the url means.
const URL_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'\'')
    .add(b'(')
    .add(b')')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'\\')
    .add(b'`')
    .add(b'{')
    .add(b'}');

#[derive(Debug, Clone)]
pub struct CssOptions<'a> {
    pub family: &'a str,
    /// Prefix every url gets, usually ending in `/`.
    pub font_path: String,
    /// When set, the TrueType source is inlined instead of linked.
    pub inline_ttf: Option<&'a [u8]>,
}

/// CSS string literal contents: quotes, backslashes and line breaks escaped.
fn escape_css_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\a "),
            '\r' => out.push_str("\\d "),
            ch => out.push(ch),
        }
    }
    out
}

/// Stylesheet for the files named `<stem>.<ext>` among `formats`.
///
/// The stem is percent-encoded inside every url; the server decodes request
/// paths before looking files up, so the links still resolve.
pub fn font_face(stem: &str, formats: &[FontFormat], options: &CssOptions<'_>) -> String {
    let has = |format| formats.contains(&format);
    let stem = utf8_percent_encode(stem, URL_SEGMENT).to_string();
    let url = |ext: &str| format!("{}{stem}.{ext}", options.font_path);

    let mut sources = Vec::new();
    if has(FontFormat::Eot) {
        let eot = url("eot");
        let iefix = format!("url(\"{eot}?#iefix\") format(\"embedded-opentype\")");
        sources.push(iefix);
    }
    if has(FontFormat::Woff) {
        sources.push(format!("url(\"{}\") format(\"woff\")", url("woff")));
    }
    match options.inline_ttf {
        Some(bytes) => sources.push(format!(
            "url(\"{TTF_DATA_URI_PREFIX}{}\") format(\"truetype\")",
            STANDARD.encode(bytes)
        )),
        None if has(FontFormat::Ttf) => {
            sources.push(format!("url(\"{}\") format(\"truetype\")", url("ttf")));
        }
        None => {}
    }
    if has(FontFormat::Svg) {
        sources.push(format!("url(\"{}#{stem}\") format(\"svg\")", url("svg")));
    }

    let mut css = String::from("@font-face {\n");
    css.push_str(&format!(
        "    font-family: \"{}\";\n",
        escape_css_string(options.family)
    ));
    if has(FontFormat::Eot) {
        css.push_str(&format!("    src: url(\"{}\");\n", url("eot")));
    }
    if !sources.is_empty() {
        css.push_str("    src: ");
        css.push_str(&sources.join(",\n        "));
        css.push_str(";\n");
    }
    css.push_str("    font-style: normal;\n    font-weight: normal;\n}\n");
    css
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(inline_ttf: Option<&[u8]>) -> CssOptions<'_> {
        CssOptions {
            family: "SentyBrush",
            font_path: "./dest/".to_string(),
            inline_ttf,
        }
    }

    #[test]
    fn links_every_sibling_format() {
        let css = font_face("H-1", &FontFormat::ALL, &options(None));

        assert!(css.starts_with("@font-face {"));
        assert!(css.contains("font-family: \"SentyBrush\";"));
        assert!(css.contains("src: url(\"./dest/H-1.eot\");"));
        let iefix = "url(\"./dest/H-1.eot?#iefix\") format(\"embedded-opentype\")";
        assert!(css.contains(iefix));
        assert!(css.contains("url(\"./dest/H-1.woff\") format(\"woff\")"));
        assert!(css.contains("url(\"./dest/H-1.ttf\") format(\"truetype\")"));
        assert!(css.contains("url(\"./dest/H-1.svg#H-1\") format(\"svg\")"));
    }

    #[test]
    fn inlines_ttf_when_asked() {
        let css = font_face("H-1", &FontFormat::ALL, &options(Some(b"ttf")));
        assert!(css.contains(&format!("{TTF_DATA_URI_PREFIX}dHRm")));
        assert!(!css.contains("H-1.ttf"));
    }

    #[test]
    fn skips_missing_formats() {
        let css = font_face("H-1", &[FontFormat::Ttf], &options(None));
        assert!(!css.contains(".eot"));
        assert!(!css.contains(".woff"));
        assert!(css.contains("H-1.ttf"));
    }

    #[test]
    fn family_name_cannot_break_out_of_the_string() {
        let opts = CssOptions {
            family: "Evil\"; } body { color: red",
            ..options(None)
        };
        let css = font_face("H-1", &[FontFormat::Ttf], &opts);
        let escaped = "font-family: \"Evil\\\"; } body { color: red\";";
        assert!(css.contains(escaped), "{css}");
    }

    #[test]
    fn stem_cannot_break_out_of_the_url() {
        let css = font_face("a\") x?#-1", &FontFormat::ALL, &options(None));

        assert!(!css.contains("a\")"), "{css}");
        let stem = "a%22%29%20x%3F%23-1";
        let woff = format!("url(\"./dest/{stem}.woff\")");
        assert!(css.contains(&woff), "{css}");
        assert!(css.contains(&format!("{stem}.svg#{stem}")), "{css}");
    }
}
