//! TrueType glyph subsetting (made by FontLab https://www.fontlab.com/)
//!
//! Keeps glyph 0, every glyph the requested characters map to, and the
//! components those glyphs are assembled from. Glyphs are renumbered in the
//! order they are first reached; a composite's components always get smaller
//! ids than the composite itself.
//!
//! Tables that reference glyph ids are rebuilt (`glyf`, `loca`, `hmtx`,
//! `cmap`); layout tables are dropped, and `post` loses its glyph names.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{bail, ensure, Context, Result};
use read_fonts::FontRef;
use skrifa::{FontRef as SkrifaFontRef, MetadataProvider};

use super::sfnt::{
    binary_search_params, optional_table, pad4, read_i16, read_u16, read_u32, required_table,
    write_u16, write_u32, SfntBuilder,
};

const ARG_1_AND_2_ARE_WORDS: u16 = 0x0001;
const WE_HAVE_A_SCALE: u16 = 0x0008;
const MORE_COMPONENTS: u16 = 0x0020;
const WE_HAVE_AN_X_AND_Y_SCALE: u16 = 0x0040;
const WE_HAVE_A_TWO_BY_TWO: u16 = 0x0080;

/// Composites nested deeper than this are treated as corrupt (or cyclic).
const MAX_COMPONENT_DEPTH: usize = 16;

const HEAD_INDEX_TO_LOC_FORMAT: usize = 50;
const HHEA_NUMBER_OF_H_METRICS: usize = 34;
const MAXP_NUM_GLYPHS: usize = 4;
const OS2_FIRST_CHAR_INDEX: usize = 64;
const OS2_LAST_CHAR_INDEX: usize = 66;

/// Tables copied verbatim into the subset.
const PASSTHROUGH_TABLES: [&[u8; 4]; 5] = [b"name", b"cvt ", b"fpgm", b"prep", b"gasp"];

/// Cut `font` down to the glyphs needed for `chars`.
///
/// Characters the font does not map are silently skipped. An empty set still
/// yields a valid font holding only `.notdef`.
pub fn subset_ttf(font: &[u8], chars: &BTreeSet<char>) -> Result<Vec<u8>> {
    let parsed = FontRef::new(font).context("parsing TrueType font")?;
    let source = SourceFont::new(&parsed)?;
    let charmap = SkrifaFontRef::new(font)
        .context("parsing TrueType font")?
        .charmap();

    let mut subset = Subset::new(&source)?;
    for &ch in chars {
        let Some(gid) = charmap.map(ch) else {
            continue;
        };
        let gid = u16::try_from(gid.to_u32()).context("glyph id out of range")?;
        if gid == 0 {
            continue;
        }
        let new_gid = subset.ensure_glyph(gid, 0)?;
        subset.char_map.push((ch, new_gid));
    }

    subset.write(&parsed)
}

struct SourceFont<'a> {
    glyf: &'a [u8],
    loca: &'a [u8],
    long_loca: bool,
    hmtx: &'a [u8],
    num_glyphs: u16,
    num_h_metrics: u16,
}

impl<'a> SourceFont<'a> {
    fn new(font: &FontRef<'a>) -> Result<Self> {
        let Some(glyf) = optional_table(font, b"glyf") else {
            if optional_table(font, b"CFF ").is_some() || optional_table(font, b"CFF2").is_some() {
                bail!("CFF-flavoured fonts cannot be subset");
            }
            bail!("missing `glyf` table");
        };

        let head = required_table(font, b"head")?;
        let hhea = required_table(font, b"hhea")?;
        let maxp = required_table(font, b"maxp")?;
        let long_loca = match read_i16(head, HEAD_INDEX_TO_LOC_FORMAT)? {
            0 => false,
            1 => true,
            other => bail!("unknown indexToLocFormat {other}"),
        };

        let this = Self {
            glyf,
            loca: required_table(font, b"loca")?,
            long_loca,
            hmtx: required_table(font, b"hmtx")?,
            num_glyphs: read_u16(maxp, MAXP_NUM_GLYPHS)?,
            num_h_metrics: read_u16(hhea, HHEA_NUMBER_OF_H_METRICS)?,
        };
        ensure!(this.num_glyphs > 0, "font has no glyphs");
        ensure!(this.num_h_metrics > 0, "hhea.numberOfHMetrics is zero");
        Ok(this)
    }

    fn glyph_data(&self, gid: u16) -> Result<&'a [u8]> {
        ensure!(
            gid < self.num_glyphs,
            "glyph {gid} is beyond numGlyphs {}",
            self.num_glyphs
        );
        let idx = usize::from(gid);
        let (start, end) = if self.long_loca {
            (
                read_u32(self.loca, idx * 4)? as usize,
                read_u32(self.loca, idx * 4 + 4)? as usize,
            )
        } else {
            (
                usize::from(read_u16(self.loca, idx * 2)?) * 2,
                usize::from(read_u16(self.loca, idx * 2 + 2)?) * 2,
            )
        };
        self.glyf
            .get(start..end)
            .with_context(|| format!("glyph {gid} spans {start}..{end} outside `glyf`"))
    }

    /// `(advance, lsb)` from `hmtx`, repeating the last advance past the long metrics.
    fn metrics(&self, gid: u16) -> Result<(u16, i16)> {
        let long = self.num_h_metrics;
        if gid < long {
            let offset = usize::from(gid) * 4;
            let advance = read_u16(self.hmtx, offset)?;
            Ok((advance, read_i16(self.hmtx, offset + 2)?))
        } else {
            let advance = read_u16(self.hmtx, usize::from(long - 1) * 4)?;
            let offset = usize::from(long) * 4 + usize::from(gid - long) * 2;
            Ok((advance, read_i16(self.hmtx, offset)?))
        }
    }
}

struct SubsetGlyph {
    data: Vec<u8>,
    advance: u16,
    lsb: i16,
}

struct Subset<'s, 'a> {
    source: &'s SourceFont<'a>,
    old_to_new: BTreeMap<u16, u16>,
    glyphs: Vec<SubsetGlyph>,
    char_map: Vec<(char, u16)>,
}

impl<'s, 'a> Subset<'s, 'a> {
    fn new(source: &'s SourceFont<'a>) -> Result<Self> {
        let mut this = Self {
            source,
            old_to_new: BTreeMap::new(),
            glyphs: Vec::new(),
            char_map: Vec::new(),
        };
        // .notdef keeps id 0
        this.ensure_glyph(0, 0)?;
        Ok(this)
    }

    fn ensure_glyph(&mut self, old: u16, depth: usize) -> Result<u16> {
        if let Some(&new) = self.old_to_new.get(&old) {
            return Ok(new);
        }
        ensure!(
            depth <= MAX_COMPONENT_DEPTH,
            "composite glyph {old} nests too deeply"
        );

        let mut data = self.source.glyph_data(old)?.to_vec();
        if data.len() >= 2 && read_i16(&data, 0)? < 0 {
            for (offset, component) in composite_components(&data)? {
                let remapped = self.ensure_glyph(component, depth + 1)?;
                data[offset..offset + 2].copy_from_slice(&remapped.to_be_bytes());
            }
        }

        let (advance, lsb) = self.source.metrics(old)?;
        let new = u16::try_from(self.glyphs.len()).context("too many glyphs")?;
        self.glyphs.push(SubsetGlyph { data, advance, lsb });
        self.old_to_new.insert(old, new);
        Ok(new)
    }

    fn write(&self, font: &FontRef<'_>) -> Result<Vec<u8>> {
        let num_glyphs = u16::try_from(self.glyphs.len()).context("too many glyphs")?;
        let mut builder = SfntBuilder::new();

        let mut glyf = Vec::new();
        let mut loca = Vec::with_capacity((self.glyphs.len() + 1) * 4);
        for glyph in &self.glyphs {
            write_u32(&mut loca, glyf_offset(&glyf)?);
            glyf.extend_from_slice(&glyph.data);
            pad4(&mut glyf);
        }
        write_u32(&mut loca, glyf_offset(&glyf)?);
        builder.table(b"glyf", glyf).table(b"loca", loca);

        let (hmtx, num_h_metrics) = self.hmtx();
        builder.table(b"hmtx", hmtx);

        let mut hhea = required_table(font, b"hhea")?.to_vec();
        patch_u16(&mut hhea, HHEA_NUMBER_OF_H_METRICS, num_h_metrics)?;
        builder.table(b"hhea", hhea);

        let mut maxp = required_table(font, b"maxp")?.to_vec();
        patch_u16(&mut maxp, MAXP_NUM_GLYPHS, num_glyphs)?;
        builder.table(b"maxp", maxp);

        let mut head = required_table(font, b"head")?.to_vec();
        patch_u16(&mut head, HEAD_INDEX_TO_LOC_FORMAT, 1)?;
        builder.table(b"head", head);

        builder.table(b"cmap", build_cmap(&self.char_map)?);

        if let Some(post) = optional_table(font, b"post").filter(|post| post.len() >= 32) {
            let mut table = Vec::with_capacity(32);
            write_u32(&mut table, 0x0003_0000);
            table.extend_from_slice(&post[4..32]);
            builder.table(b"post", table);
        }

        for tag in PASSTHROUGH_TABLES {
            if let Some(data) = optional_table(font, tag) {
                builder.table(tag, data.to_vec());
            }
        }
        if let Some(os2) = subset_os2(font, &self.char_map)? {
            builder.table(b"OS/2", os2);
        }

        builder.build()
    }

    /// Trailing glyphs sharing the last advance are written as bare lsb values.
    fn hmtx(&self) -> (Vec<u8>, u16) {
        let mut long = self.glyphs.len();
        while long > 1 && self.glyphs[long - 1].advance == self.glyphs[long - 2].advance {
            long -= 1;
        }

        let mut hmtx = Vec::with_capacity(long * 4 + (self.glyphs.len() - long) * 2);
        for (idx, glyph) in self.glyphs.iter().enumerate() {
            if idx < long {
                write_u16(&mut hmtx, glyph.advance);
            }
            write_u16(&mut hmtx, glyph.lsb as u16);
        }
        // long <= glyphs.len(), which already fits in u16
        (hmtx, long as u16)
    }
}

/// `OS/2` with the first/last character index narrowed to the subset.
fn subset_os2(font: &FontRef<'_>, char_map: &[(char, u16)]) -> Result<Option<Vec<u8>>> {
    let Some(os2) = optional_table(font, b"OS/2") else {
        return Ok(None);
    };
    let mut os2 = os2.to_vec();
    if os2.len() >= OS2_LAST_CHAR_INDEX + 2 {
        let clamp = |ch: char| u32::from(ch).min(0xFFFF) as u16;
        let first = char_map.first().map(|&(ch, _)| clamp(ch)).unwrap_or(0xFFFF);
        let last = char_map.last().map(|&(ch, _)| clamp(ch)).unwrap_or(0);
        patch_u16(&mut os2, OS2_FIRST_CHAR_INDEX, first)?;
        patch_u16(&mut os2, OS2_LAST_CHAR_INDEX, last)?;
    }
    Ok(Some(os2))
}

fn patch_u16(table: &mut [u8], offset: usize, value: u16) -> Result<()> {
    let field = table
        .get_mut(offset..offset + 2)
        .with_context(|| format!("table too short to patch offset {offset}"))?;
    field.copy_from_slice(&value.to_be_bytes());
    Ok(())
}

fn glyf_offset(glyf: &[u8]) -> Result<u32> {
    u32::try_from(glyf.len()).context("glyf too large")
}

/// Byte offset and glyph id of every component reference in a composite glyph.
fn composite_components(glyph: &[u8]) -> Result<Vec<(usize, u16)>> {
    let mut components = Vec::new();
    // numberOfContours + bounding box
    let mut offset = 10;
    loop {
        let flags = read_u16(glyph, offset)?;
        let gid = read_u16(glyph, offset + 2)?;
        components.push((offset + 2, gid));

        offset += 4;
        offset += if flags & ARG_1_AND_2_ARE_WORDS != 0 { 4 } else { 2 };
        if flags & WE_HAVE_A_SCALE != 0 {
            offset += 2;
        } else if flags & WE_HAVE_AN_X_AND_Y_SCALE != 0 {
            offset += 4;
        } else if flags & WE_HAVE_A_TWO_BY_TWO != 0 {
            offset += 8;
        }
        ensure!(offset <= glyph.len(), "composite glyph is truncated");

        if flags & MORE_COMPONENTS == 0 {
            return Ok(components);
        }
    }
}

/// Consecutive characters mapped to consecutive glyph ids: `(start, end, start_gid)`.
fn sequential_groups(map: &[(char, u16)]) -> Vec<(u32, u32, u32)> {
    let mut groups: Vec<(u32, u32, u32)> = Vec::new();
    for &(ch, gid) in map {
        let (code, gid) = (u32::from(ch), u32::from(gid));
        match groups.last_mut() {
            Some((start, end, start_gid))
                if code == *end + 1 && gid == *start_gid + (code - *start) =>
            {
                *end = code;
            }
            _ => groups.push((code, code, gid)),
        }
    }
    groups
}

/// `cmap` with a (3,1) format 4 subtable, plus (3,10) format 12 when the
/// subset reaches beyond the BMP.
fn build_cmap(map: &[(char, u16)]) -> Result<Vec<u8>> {
    let bmp: Vec<(char, u16)> = map
        .iter()
        .copied()
        .filter(|&(ch, _)| u32::from(ch) < 0xFFFF)
        .collect();
    let format4 = cmap_format4(&sequential_groups(&bmp))?;
    let format12 = map
        .iter()
        .any(|&(ch, _)| u32::from(ch) > 0xFFFF)
        .then(|| cmap_format12(&sequential_groups(map)))
        .transpose()?;

    let num_tables: u16 = if format12.is_some() { 2 } else { 1 };
    let mut offset = 4 + 8 * u32::from(num_tables);

    let mut cmap = Vec::new();
    write_u16(&mut cmap, 0);
    write_u16(&mut cmap, num_tables);
    write_u16(&mut cmap, 3);
    write_u16(&mut cmap, 1);
    write_u32(&mut cmap, offset);
    if let Some(format12) = &format12 {
        offset += u32::try_from(format4.len()).context("cmap too large")?;
        write_u16(&mut cmap, 3);
        write_u16(&mut cmap, 10);
        write_u32(&mut cmap, offset);
        cmap.extend_from_slice(&format4);
        cmap.extend_from_slice(format12);
    } else {
        cmap.extend_from_slice(&format4);
    }
    Ok(cmap)
}

fn cmap_format4(groups: &[(u32, u32, u32)]) -> Result<Vec<u8>> {
    let mut segments: Vec<(u16, u16, u16)> = groups
        .iter()
        .map(|&(start, end, start_gid)| {
            let start = start as u16;
            (start, end as u16, (start_gid as u16).wrapping_sub(start))
        })
        .collect();
    // terminator maps 0xFFFF to glyph 0
    segments.push((0xFFFF, 0xFFFF, 1));

    let seg_count = u16::try_from(segments.len()).context("too many cmap segments")?;
    let length = u16::try_from(16 + 8 * segments.len()).context("cmap format 4 overflow")?;
    let (search_range, entry_selector, range_shift) = binary_search_params(seg_count, 2);

    let mut table = Vec::with_capacity(usize::from(length));
    write_u16(&mut table, 4);
    write_u16(&mut table, length);
    write_u16(&mut table, 0);
    write_u16(&mut table, seg_count * 2);
    write_u16(&mut table, search_range);
    write_u16(&mut table, entry_selector);
    write_u16(&mut table, range_shift);
    for &(_, end, _) in &segments {
        write_u16(&mut table, end);
    }
    write_u16(&mut table, 0);
    for &(start, _, _) in &segments {
        write_u16(&mut table, start);
    }
    for &(_, _, delta) in &segments {
        write_u16(&mut table, delta);
    }
    for _ in &segments {
        write_u16(&mut table, 0);
    }
    Ok(table)
}

fn cmap_format12(groups: &[(u32, u32, u32)]) -> Result<Vec<u8>> {
    let count = u32::try_from(groups.len()).context("too many cmap groups")?;
    let mut table = Vec::with_capacity(16 + 12 * groups.len());
    write_u16(&mut table, 12);
    write_u16(&mut table, 0);
    write_u32(&mut table, 16 + 12 * count);
    write_u32(&mut table, 0);
    write_u32(&mut table, count);
    for &(start, end, start_gid) in groups {
        write_u32(&mut table, start);
        write_u32(&mut table, end);
        write_u32(&mut table, start_gid);
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fonts::SENTY_BRUSH;
    use crate::transform::sfnt::{checksum, SFNT_CHECKSUM};
    use skrifa::instance::{LocationRef, Size};

    fn chars(text: &str) -> BTreeSet<char> {
        text.chars().collect()
    }

    fn num_glyphs(font: &[u8]) -> u16 {
        let parsed = FontRef::new(font).expect("subset parses");
        let maxp = required_table(&parsed, b"maxp").expect("maxp");
        read_u16(maxp, MAXP_NUM_GLYPHS).expect("numGlyphs")
    }

    #[test]
    fn keeps_only_requested_characters() {
        let subset = subset_ttf(SENTY_BRUSH, &chars("abc")).expect("subset");

        assert_eq!(num_glyphs(&subset), 4);
        assert_eq!(checksum(&subset), SFNT_CHECKSUM);

        let font = SkrifaFontRef::new(&subset).expect("parses");
        let charmap = font.charmap();
        assert!(charmap.map('a').is_some());
        assert!(charmap.map('c').is_some());
        assert!(charmap.map('d').is_none());
        assert!(charmap.map(' ').is_none());

        let metrics = font.glyph_metrics(Size::unscaled(), LocationRef::default());
        let c = charmap.map('c').expect("c mapped");
        assert_eq!(metrics.advance_width(c), Some(600.0));
    }

    #[test]
    fn pulls_in_composite_components() {
        let subset = subset_ttf(SENTY_BRUSH, &chars("de")).expect("subset");
        // notdef, b (for d), d, a (for e), e
        assert_eq!(num_glyphs(&subset), 5);

        let parsed = FontRef::new(&subset).expect("parses");
        let source = SourceFont::new(&parsed).expect("source");
        let d = source.glyph_data(2).expect("d glyph");
        let components: Vec<u16> = composite_components(d)
            .expect("components")
            .into_iter()
            .map(|(_, gid)| gid)
            .collect();
        assert_eq!(components, vec![1]);

        let original = FontRef::new(SENTY_BRUSH).expect("fixture");
        let original_b = SourceFont::new(&original)
            .expect("source")
            .glyph_data(3)
            .expect("b glyph");
        // glyphs are re-padded to 4 bytes in the subset
        let subset_b = source.glyph_data(1).expect("b glyph");
        assert!(subset_b.starts_with(original_b));
    }

    #[test]
    fn empty_text_keeps_notdef_only() {
        let subset = subset_ttf(SENTY_BRUSH, &BTreeSet::new()).expect("subset");
        assert_eq!(num_glyphs(&subset), 1);
        let font = SkrifaFontRef::new(&subset).expect("parses");
        assert_eq!(font.charmap().mappings().count(), 0);
    }

    #[test]
    fn unmapped_characters_are_skipped() {
        let subset = subset_ttf(SENTY_BRUSH, &chars("a你")).expect("subset");
        assert_eq!(num_glyphs(&subset), 2);
    }

    #[test]
    fn garbage_input_is_an_error() {
        assert!(subset_ttf(b"nope", &chars("a")).is_err());
    }

    #[test]
    fn groups_split_on_gaps_and_glyph_jumps() {
        let map = [('a', 1), ('b', 2), ('c', 4), ('e', 5)];
        assert_eq!(
            sequential_groups(&map),
            vec![(0x61, 0x62, 1), (0x63, 0x63, 4), (0x65, 0x65, 5)]
        );
    }

    #[test]
    fn supplementary_characters_get_a_format_12_subtable() {
        let cmap = build_cmap(&[('a', 1), ('\u{1F600}', 2)]).expect("cmap");
        assert_eq!(read_u16(&cmap, 2).expect("numTables"), 2);
        assert_eq!(read_u16(&cmap, 14).expect("encoding"), 10);
        let offset = read_u32(&cmap, 16).expect("offset") as usize;
        assert_eq!(read_u16(&cmap, offset).expect("format"), 12);
    }
}
