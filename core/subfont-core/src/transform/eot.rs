//! Embedded OpenType for legacy Internet Explorer.
//!
//! The header is little-endian and mostly mirrors `OS/2`, `head` and `name`;
//! the TrueType data follows it unchanged (no MTX compression, no XOR).

use anyhow::{Context, Result};
use read_fonts::tables::name::NameId;
use read_fonts::FontRef;

use super::font_name;
use super::sfnt::{read_u16, read_u32, required_table, HEAD_CHECKSUM_OFFSET};

const EOT_VERSION: u32 = 0x0002_0001;
const EOT_MAGIC: u16 = 0x504C;
const DEFAULT_CHARSET: u8 = 1;

const OS2_WEIGHT_CLASS: usize = 4;
const OS2_FS_TYPE: usize = 8;
const OS2_PANOSE: usize = 32;
const OS2_UNICODE_RANGE: usize = 42;
const OS2_FS_SELECTION: usize = 62;
const OS2_CODE_PAGE_RANGE: usize = 78;

/// Wrap a TrueType font in an Embedded OpenType container.
///
/// The header is filled from `OS/2` (weight, panose, unicode and code page
/// ranges), `head` (checksum adjustment) and the family, style, version and
/// full names. The font data follows uncompressed.
pub fn ttf_to_eot(ttf: &[u8]) -> Result<Vec<u8>> {
    let font = FontRef::new(ttf).context("parsing TrueType font")?;
    let os2 = required_table(&font, b"OS/2")?;
    let head = required_table(&font, b"head")?;

    let panose = os2
        .get(OS2_PANOSE..OS2_PANOSE + 10)
        .context("OS/2 table too short for PANOSE")?;
    let mut unicode_ranges = [0u32; 4];
    for (idx, range) in unicode_ranges.iter_mut().enumerate() {
        *range = read_u32(os2, OS2_UNICODE_RANGE + idx * 4)?;
    }
    // version 0 OS/2 tables have no code page ranges
    let code_pages = if read_u16(os2, 0)? >= 1 {
        [
            read_u32(os2, OS2_CODE_PAGE_RANGE)?,
            read_u32(os2, OS2_CODE_PAGE_RANGE + 4)?,
        ]
    } else {
        [0, 0]
    };
    let italic = read_u16(os2, OS2_FS_SELECTION)? & 1;

    let names = [
        NameId::FAMILY_NAME,
        NameId::SUBFAMILY_NAME,
        NameId::VERSION_STRING,
        NameId::FULL_NAME,
    ]
    .map(|id| utf16le(&font_name(&font, id).unwrap_or_default()));

    let mut eot = Vec::with_capacity(ttf.len() + 256);
    put_u32(&mut eot, 0); // EOTSize, patched below
    let font_len = u32::try_from(ttf.len()).context("font too large")?;
    put_u32(&mut eot, font_len);
    put_u32(&mut eot, EOT_VERSION);
    put_u32(&mut eot, 0); // flags
    eot.extend_from_slice(panose);
    eot.push(DEFAULT_CHARSET);
    eot.push(italic as u8);
    put_u32(&mut eot, u32::from(read_u16(os2, OS2_WEIGHT_CLASS)?));
    put_u16(&mut eot, read_u16(os2, OS2_FS_TYPE)?);
    put_u16(&mut eot, EOT_MAGIC);
    for range in unicode_ranges {
        put_u32(&mut eot, range);
    }
    for page in code_pages {
        put_u32(&mut eot, page);
    }
    put_u32(&mut eot, read_u32(head, HEAD_CHECKSUM_OFFSET)?);
    for _ in 0..4 {
        put_u32(&mut eot, 0);
    }

    for name in &names {
        put_u16(&mut eot, 0); // padding
        let name_len = u16::try_from(name.len()).context("name too long")?;
        put_u16(&mut eot, name_len);
        eot.extend_from_slice(name);
    }
    put_u16(&mut eot, 0);
    put_u16(&mut eot, 0); // RootStringSize

    eot.extend_from_slice(ttf);
    let size = u32::try_from(eot.len()).context("font too large")?;
    eot[..4].copy_from_slice(&size.to_le_bytes());
    Ok(eot)
}

fn utf16le(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

fn put_u16(buffer: &mut Vec<u8>, value: u16) {
    buffer.extend_from_slice(&value.to_le_bytes());
}

fn put_u32(buffer: &mut Vec<u8>, value: u32) {
    buffer.extend_from_slice(&value.to_le_bytes());
}
