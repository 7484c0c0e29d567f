//! Byte-level helpers shared by the converters.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use read_fonts::types::Tag;
use read_fonts::FontRef;

pub(crate) const TRUETYPE_VERSION: u32 = 0x0001_0000;
/// The whole-font checksum every `head.checkSumAdjustment` aims for.
pub(crate) const SFNT_CHECKSUM: u32 = 0xB1B0_AFBA;
pub(crate) const HEAD_CHECKSUM_OFFSET: usize = 8;

const SFNT_HEADER_LEN: usize = 12;
const TABLE_RECORD_LEN: usize = 16;

pub(crate) fn read_u16(data: &[u8], offset: usize) -> Result<u16> {
    let bytes = data
        .get(offset..offset + 2)
        .with_context(|| format!("u16 at {offset} is out of bounds ({} bytes)", data.len()))?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

pub(crate) fn read_i16(data: &[u8], offset: usize) -> Result<i16> {
    read_u16(data, offset).map(|value| value as i16)
}

pub(crate) fn read_u32(data: &[u8], offset: usize) -> Result<u32> {
    let bytes = data
        .get(offset..offset + 4)
        .with_context(|| format!("u32 at {offset} is out of bounds ({} bytes)", data.len()))?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

pub(crate) fn write_u16(buffer: &mut Vec<u8>, value: u16) {
    buffer.extend_from_slice(&value.to_be_bytes());
}

pub(crate) fn write_u32(buffer: &mut Vec<u8>, value: u32) {
    buffer.extend_from_slice(&value.to_be_bytes());
}

pub(crate) fn pad4(buffer: &mut Vec<u8>) {
    while buffer.len() % 4 != 0 {
        buffer.push(0);
    }
}

/// Sum of big-endian u32 words, the last one zero-padded.
pub(crate) fn checksum(data: &[u8]) -> u32 {
    data.chunks(4).fold(0u32, |sum, chunk| {
        let mut word = [0u8; 4];
        word[..chunk.len()].copy_from_slice(chunk);
        sum.wrapping_add(u32::from_be_bytes(word))
    })
}

/// `(searchRange, entrySelector, rangeShift)` for `count` items of `unit` bytes.
pub(crate) fn binary_search_params(count: u16, unit: u16) -> (u16, u16, u16) {
    if count == 0 {
        return (0, 0, 0);
    }
    let entry_selector = count.ilog2() as u16;
    let search_range = (1u16 << entry_selector) * unit;
    (search_range, entry_selector, count * unit - search_range)
}

/// Every table of `font`, keyed (and therefore sorted) by tag.
pub(crate) fn tables<'a>(font: &FontRef<'a>) -> BTreeMap<Tag, &'a [u8]> {
    font.table_directory
        .table_records()
        .iter()
        .filter_map(|record| {
            let tag = record.tag();
            font.table_data(tag).map(|data| (tag, data.as_bytes()))
        })
        .collect()
}

pub(crate) fn required_table<'a>(font: &FontRef<'a>, tag: &[u8; 4]) -> Result<&'a [u8]> {
    match font.table_data(Tag::new(tag)) {
        Some(data) => Ok(data.as_bytes()),
        None => bail!("missing `{}` table", String::from_utf8_lossy(tag)),
    }
}

pub(crate) fn optional_table<'a>(font: &FontRef<'a>, tag: &[u8; 4]) -> Option<&'a [u8]> {
    font.table_data(Tag::new(tag)).map(|data| data.as_bytes())
}

/// Assembles a TrueType file table by table.
#[derive(Debug, Default)]
pub(crate) struct SfntBuilder {
    tables: BTreeMap<[u8; 4], Vec<u8>>,
}

impl SfntBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn table(&mut self, tag: &[u8; 4], mut data: Vec<u8>) -> &mut Self {
        // head's checksum is taken with checkSumAdjustment zeroed
        if tag == b"head" && data.len() >= HEAD_CHECKSUM_OFFSET + 4 {
            data[HEAD_CHECKSUM_OFFSET..HEAD_CHECKSUM_OFFSET + 4].fill(0);
        }
        self.tables.insert(*tag, data);
        self
    }

    /// Serialise with records sorted by tag and `head.checkSumAdjustment` patched.
    pub(crate) fn build(&self) -> Result<Vec<u8>> {
        let count = u16::try_from(self.tables.len()).context("too many tables")?;
        let (search_range, entry_selector, range_shift) =
            binary_search_params(count, TABLE_RECORD_LEN as u16);

        let mut out = Vec::new();
        write_u32(&mut out, TRUETYPE_VERSION);
        write_u16(&mut out, count);
        write_u16(&mut out, search_range);
        write_u16(&mut out, entry_selector);
        write_u16(&mut out, range_shift);

        let mut offset = SFNT_HEADER_LEN + TABLE_RECORD_LEN * self.tables.len();
        let mut head_offset = None;
        for (tag, data) in &self.tables {
            if tag == b"head" {
                head_offset = Some(offset);
            }
            out.extend_from_slice(tag);
            write_u32(&mut out, checksum(data));
            write_u32(&mut out, u32::try_from(offset).context("font too large")?);
            let length = u32::try_from(data.len()).context("table too large")?;
            write_u32(&mut out, length);
            offset += data.len().next_multiple_of(4);
        }

        for data in self.tables.values() {
            out.extend_from_slice(data);
            pad4(&mut out);
        }

        if let Some(head) = head_offset {
            let field = head + HEAD_CHECKSUM_OFFSET;
            let adjustment = SFNT_CHECKSUM.wrapping_sub(checksum(&out));
            out[field..field + 4].copy_from_slice(&adjustment.to_be_bytes());
        }
        Ok(out)
    }
}
