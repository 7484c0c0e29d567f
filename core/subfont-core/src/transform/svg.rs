//! SVG font output.

use std::fmt::Write as _;

use anyhow::{Context, Result};
use skrifa::instance::{LocationRef, Size};
use skrifa::outline::{DrawSettings, OutlinePen};
use skrifa::{FontRef, GlyphId, MetadataProvider};

/// Collects glyph outlines as SVG path data, in font units (y up).
#[derive(Debug, Default)]
struct PathPen {
    d: String,
}

impl PathPen {
    fn push(&mut self, command: char, coords: &[f32]) {
        self.d.push(command);
        for (idx, value) in coords.iter().enumerate() {
            if idx > 0 {
                self.d.push(' ');
            }
            self.d.push_str(&number(*value));
        }
    }
}

impl OutlinePen for PathPen {
    fn move_to(&mut self, x: f32, y: f32) {
        self.push('M', &[x, y]);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        self.push('L', &[x, y]);
    }

    fn quad_to(&mut self, cx0: f32, cy0: f32, x: f32, y: f32) {
        self.push('Q', &[cx0, cy0, x, y]);
    }

    fn curve_to(&mut self, cx0: f32, cy0: f32, cx1: f32, cy1: f32, x: f32, y: f32) {
        self.push('C', &[cx0, cy0, cx1, cy1, x, y]);
    }

    fn close(&mut self) {
        self.d.push('Z');
    }
}

/// Shortest decimal form with at most two fractional digits.
fn number(value: f32) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    let text = format!("{rounded:.2}");
    let text = text.trim_end_matches('0').trim_end_matches('.');
    match text {
        "-0" | "" => "0".to_string(),
        other => other.to_string(),
    }
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            ch if ch.is_control() => {
                let _ = write!(out, "&#x{:x};", u32::from(ch));
            }
            ch => out.push(ch),
        }
    }
    out
}

/// Render every mapped glyph of `ttf` as an SVG `<font>` with the given `id`.
pub fn ttf_to_svg(ttf: &[u8], id: &str, family: &str) -> Result<String> {
    let font = FontRef::new(ttf).context("parsing TrueType font")?;
    let metrics = font.metrics(Size::unscaled(), LocationRef::default());
    let glyph_metrics = font.glyph_metrics(Size::unscaled(), LocationRef::default());
    let outlines = font.outline_glyphs();

    let draw = |gid: GlyphId| -> Result<String> {
        let mut pen = PathPen::default();
        if let Some(glyph) = outlines.get(gid) {
            glyph
                .draw(
                    DrawSettings::unhinted(Size::unscaled(), LocationRef::default()),
                    &mut pen,
                )
                .map_err(|err| anyhow::anyhow!("drawing glyph {}: {err}", gid.to_u32()))?;
        }
        Ok(pen.d)
    };
    let advance = |gid: GlyphId| number(glyph_metrics.advance_width(gid).unwrap_or_default());

    let notdef = GlyphId::new(0);
    let mut svg = String::new();
    svg.push_str("<?xml version=\"1.0\" standalone=\"no\"?>\n");
    svg.push_str(
        "<!DOCTYPE svg PUBLIC \"-//W3C//DTD SVG 1.1//EN\" \"http://www.w3.org/Graphics/SVG/1.1/DTD/svg11.dtd\" >\n",
    );
    svg.push_str("<svg xmlns=\"http://www.w3.org/2000/svg\">\n<defs>\n");
    let _ = writeln!(
        svg,
        "  <font id=\"{}\" horiz-adv-x=\"{}\">",
        escape_xml(id),
        advance(notdef)
    );
    let _ = writeln!(
        svg,
        "    <font-face font-family=\"{}\" units-per-em=\"{}\" ascent=\"{}\" descent=\"{}\" />",
        escape_xml(family),
        metrics.units_per_em,
        number(metrics.ascent),
        number(metrics.descent)
    );
    let _ = writeln!(
        svg,
        "    <missing-glyph horiz-adv-x=\"{}\" d=\"{}\" />",
        advance(notdef),
        draw(notdef)?
    );

    for (codepoint, gid) in font.charmap().mappings() {
        let Some(ch) = char::from_u32(codepoint) else {
            continue;
        };
        let _ = writeln!(
            svg,
            "    <glyph glyph-name=\"uni{codepoint:04X}\" unicode=\"{}\" horiz-adv-x=\"{}\" d=\"{}\" />",
            escape_xml(&ch.to_string()),
            advance(gid),
            draw(gid)?
        );
    }

    svg.push_str("  </font>\n</defs>\n</svg>\n");
    Ok(svg)
}
