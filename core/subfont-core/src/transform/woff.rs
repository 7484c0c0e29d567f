//! WOFF 1.0 wrapping.

use std::io::Write;

use anyhow::{Context, Result};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use read_fonts::FontRef;

use super::sfnt::{pad4, read_u32, write_u16, write_u32};

const WOFF_SIGNATURE: u32 = 0x774F_4646;
const WOFF_HEADER_LEN: usize = 44;
const WOFF_ENTRY_LEN: usize = 20;
const SFNT_HEADER_LEN: usize = 12;
const SFNT_ENTRY_LEN: usize = 16;

struct Entry<'a> {
    tag: [u8; 4],
    checksum: u32,
    original: &'a [u8],
    stored: Vec<u8>,
}

/// Wrap a TrueType font as WOFF, zlib-compressing each table that shrinks.
pub fn ttf_to_woff(ttf: &[u8]) -> Result<Vec<u8>> {
    let font = FontRef::new(ttf).context("parsing TrueType font")?;
    let flavor = read_u32(ttf, 0)?;

    let mut records: Vec<_> = font.table_directory.table_records().iter().collect();
    records.sort_by_key(|record| record.tag());

    let mut entries = Vec::with_capacity(records.len());
    for record in records {
        let tag = record.tag();
        let Some(data) = font.table_data(tag) else {
            continue;
        };
        let original = data.as_bytes();
        let compressed = deflate(original).with_context(|| format!("compressing `{tag}`"))?;
        let stored = if compressed.len() < original.len() {
            compressed
        } else {
            original.to_vec()
        };
        entries.push(Entry {
            tag: tag.to_be_bytes(),
            checksum: record.checksum(),
            original,
            stored,
        });
    }

    let num_tables = u16::try_from(entries.len()).context("too many tables")?;
    let total_sfnt_size = SFNT_HEADER_LEN
        + SFNT_ENTRY_LEN * entries.len()
        + entries
            .iter()
            .map(|entry| entry.original.len().next_multiple_of(4))
            .sum::<usize>();

    let data_start = WOFF_HEADER_LEN + WOFF_ENTRY_LEN * entries.len();
    let mut directory = Vec::with_capacity(WOFF_ENTRY_LEN * entries.len());
    let mut data = Vec::new();
    for entry in &entries {
        directory.extend_from_slice(&entry.tag);
        write_u32(&mut directory, to_u32(data_start + data.len())?);
        write_u32(&mut directory, to_u32(entry.stored.len())?);
        write_u32(&mut directory, to_u32(entry.original.len())?);
        write_u32(&mut directory, entry.checksum);

        data.extend_from_slice(&entry.stored);
        pad4(&mut data);
    }

    let length = WOFF_HEADER_LEN + directory.len() + data.len();
    let mut woff = Vec::with_capacity(length);
    write_u32(&mut woff, WOFF_SIGNATURE);
    write_u32(&mut woff, flavor);
    write_u32(&mut woff, to_u32(length)?);
    write_u16(&mut woff, num_tables);
    write_u16(&mut woff, 0);
    write_u32(&mut woff, to_u32(total_sfnt_size)?);
    // font version 1.0
    write_u16(&mut woff, 1);
    write_u16(&mut woff, 0);
    // no metadata, no private block
    for _ in 0..5 {
        write_u32(&mut woff, 0);
    }
    woff.extend_from_slice(&directory);
    woff.extend_from_slice(&data);
    Ok(woff)
}

fn deflate(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}

fn to_u32(value: usize) -> Result<u32> {
    u32::try_from(value).context("WOFF file too large")
}
