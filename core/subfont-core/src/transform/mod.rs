//! Default pipeline stages (made by FontLab https://www.fontlab.com/)
//!
//! Each stage is a thin adapter: it finds the file it cares about in the batch,
//! hands the bytes to a converter in one of the submodules, and appends the
//! result. The converters themselves are plain functions over byte slices.

use anyhow::{anyhow, Result};
use read_fonts::tables::name::NameId;
use read_fonts::{FontRef, TableProvider};

use crate::pipeline::{FontFile, Stage, StageContext};
use crate::request::FontFormat;

pub mod css;
pub mod eot;
pub(crate) mod sfnt;
pub mod subset;
pub mod svg;
pub mod woff;

fn find_ttf(files: &[FontFile]) -> Result<&FontFile> {
    files
        .iter()
        .find(|file| file.format == FontFormat::Ttf)
        .ok_or_else(|| anyhow!("no TrueType file in the batch"))
}

/// First Unicode-platform `name` record with the given id.
pub(crate) fn font_name(font: &FontRef, id: NameId) -> Option<String> {
    let name_table = font.name().ok()?;
    let data = name_table.string_data();

    name_table
        .name_record()
        .iter()
        .filter(|record| record.is_unicode() && record.name_id() == id)
        .filter_map(|record| record.string(data).ok())
        .map(|entry| entry.to_string())
        .find(|rendered| !rendered.trim().is_empty())
}

/// Keeps only the glyphs the requested text needs.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlyphStage;

impl Stage for GlyphStage {
    fn name(&self) -> &'static str {
        "glyph"
    }

    fn apply(&self, files: Vec<FontFile>, ctx: &StageContext<'_>) -> Result<Vec<FontFile>> {
        let chars = ctx.request.chars();
        files
            .into_iter()
            .map(|file| {
                if file.format != FontFormat::Ttf {
                    return Ok(file);
                }
                let bytes = subset::subset_ttf(&file.bytes, &chars)?;
                Ok(FontFile { bytes, ..file })
            })
            .collect()
    }
}

/// Renames every file to the request's content hash.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenameStage;

impl Stage for RenameStage {
    fn name(&self) -> &'static str {
        "rename"
    }

    fn apply(&self, files: Vec<FontFile>, ctx: &StageContext<'_>) -> Result<Vec<FontFile>> {
        Ok(files
            .into_iter()
            .map(|file| FontFile {
                stem: ctx.request.hash.clone(),
                ..file
            })
            .collect())
    }
}

/// Adds an `.eot` copy of the TrueType subset for old Internet Explorer.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ttf2EotStage;

impl Stage for Ttf2EotStage {
    fn name(&self) -> &'static str {
        "ttf2eot"
    }

    fn apply(&self, mut files: Vec<FontFile>, _ctx: &StageContext<'_>) -> Result<Vec<FontFile>> {
        let ttf = find_ttf(&files)?;
        let eot = eot::ttf_to_eot(&ttf.bytes)?;
        files.push(FontFile::new(ttf.stem.clone(), FontFormat::Eot, eot));
        Ok(files)
    }
}

/// Adds a zlib-compressed `.woff` copy of the TrueType subset.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ttf2WoffStage;

impl Stage for Ttf2WoffStage {
    fn name(&self) -> &'static str {
        "ttf2woff"
    }

    fn apply(&self, mut files: Vec<FontFile>, _ctx: &StageContext<'_>) -> Result<Vec<FontFile>> {
        let ttf = find_ttf(&files)?;
        let woff = woff::ttf_to_woff(&ttf.bytes)?;
        files.push(FontFile::new(ttf.stem.clone(), FontFormat::Woff, woff));
        Ok(files)
    }
}

/// Adds an SVG font for legacy iOS Safari.
///
/// The font's id is the file stem, which is what the `#fragment` in the
/// generated CSS points at.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ttf2SvgStage;

impl Stage for Ttf2SvgStage {
    fn name(&self) -> &'static str {
        "ttf2svg"
    }

    fn apply(&self, mut files: Vec<FontFile>, ctx: &StageContext<'_>) -> Result<Vec<FontFile>> {
        let ttf = find_ttf(&files)?;
        let svg = svg::ttf_to_svg(&ttf.bytes, &ttf.stem, ctx.request.family_name())?;
        let svg = svg.into_bytes();
        files.push(FontFile::new(ttf.stem.clone(), FontFormat::Svg, svg));
        Ok(files)
    }
}

/// Writes the `@font-face` stylesheet pointing at its sibling files.
#[derive(Debug, Clone, Copy, Default)]
pub struct CssStage;

impl Stage for CssStage {
    fn name(&self) -> &'static str {
        "css"
    }

    fn apply(&self, mut files: Vec<FontFile>, ctx: &StageContext<'_>) -> Result<Vec<FontFile>> {
        let ttf = find_ttf(&files)?;
        let stem = ttf.stem.clone();
        let options = css::CssOptions {
            family: ctx.request.family_name(),
            font_path: ctx.config.font_url_prefix(&ctx.request.hash),
            inline_ttf: ctx.config.base64.then_some(ttf.bytes.as_slice()),
        };
        let formats: Vec<FontFormat> = files.iter().map(|file| file.format).collect();
        let stylesheet = css::font_face(&stem, &formats, &options).into_bytes();
        files.push(FontFile::new(stem, FontFormat::Css, stylesheet));
        Ok(files)
    }
}
