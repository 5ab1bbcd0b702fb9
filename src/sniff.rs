//! Header sniffing: image format and pixel dimensions from a byte prefix.
//!
//! `detect` is a pure function over an in-memory buffer; it performs no I/O
//! and never fails. Indeterminate input simply yields
//! `ImageFormat::Unknown`, which tells the fetcher to try a larger prefix.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;

/// Minimum buffer size worth sniffing. Smaller prefixes cannot hold the
/// header of even a 1x1 GIF.
pub const MIN_HEADER_BYTES: usize = 80;

/// Image container formats recognized by the sniffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Unknown,
    Avif,
    Bmp,
    Gif,
    Jpeg,
    Mng,
    Pbm,
    Pcx,
    Pgm,
    Png,
    Ppm,
    Psd,
    Ras,
    Rgb,
    Tiff,
    Webp,
    Xbm,
    Xpm,
    Xv,
}

impl ImageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageFormat::Unknown => "unknown",
            ImageFormat::Avif => "avif",
            ImageFormat::Bmp => "bmp",
            ImageFormat::Gif => "gif",
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Mng => "mng",
            ImageFormat::Pbm => "pbm",
            ImageFormat::Pcx => "pcx",
            ImageFormat::Pgm => "pgm",
            ImageFormat::Png => "png",
            ImageFormat::Ppm => "ppm",
            ImageFormat::Psd => "psd",
            ImageFormat::Ras => "ras",
            ImageFormat::Rgb => "rgb",
            ImageFormat::Tiff => "tiff",
            ImageFormat::Webp => "webp",
            ImageFormat::Xbm => "xbm",
            ImageFormat::Xpm => "xpm",
            ImageFormat::Xv => "xv",
        }
    }

    pub fn mime(&self) -> Option<&'static str> {
        match self {
            ImageFormat::Unknown => None,
            ImageFormat::Avif => Some("image/avif"),
            ImageFormat::Bmp => Some("image/bmp"),
            ImageFormat::Gif => Some("image/gif"),
            ImageFormat::Jpeg => Some("image/jpeg"),
            ImageFormat::Mng => Some("video/x-mng"),
            ImageFormat::Pbm => Some("image/x-portable-bitmap"),
            ImageFormat::Pcx => Some("image/x-pcx"),
            ImageFormat::Pgm => Some("image/x-portable-graymap"),
            ImageFormat::Png => Some("image/png"),
            ImageFormat::Ppm => Some("image/x-portable-pixmap"),
            ImageFormat::Psd => Some("image/vnd.adobe.photoshop"),
            ImageFormat::Ras => Some("image/x-cmu-raster"),
            ImageFormat::Rgb => Some("image/x-rgb"),
            ImageFormat::Tiff => Some("image/tiff"),
            ImageFormat::Webp => Some("image/webp"),
            ImageFormat::Xbm => Some("image/x-xbitmap"),
            ImageFormat::Xpm => Some("image/x-xpixmap"),
            ImageFormat::Xv => Some("image/x-portable-pixmap"),
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detected format and pixel dimensions.
///
/// A concrete format is only ever assigned together with nonzero width and
/// height, so `format != Unknown` implies both dimensions are usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct ImageInfo {
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
}

impl ImageInfo {
    pub fn is_resolved(&self) -> bool {
        self.format != ImageFormat::Unknown && self.width > 0 && self.height > 0
    }
}

/// Sniffs format and dimensions from the first bytes of an image.
///
/// Requires at least [`MIN_HEADER_BYTES`]; anything the buffer cannot prove
/// comes back as `Unknown` with zero dimensions.
pub fn detect(data: &[u8]) -> ImageInfo {
    if data.len() < MIN_HEADER_BYTES {
        return ImageInfo::default();
    }

    if data.starts_with(&[0xff, 0xd8]) {
        resolved(ImageFormat::Jpeg, jpeg_dimensions(data))
    } else if data.starts_with(b"\x89PNG\r\n\x1a\n") {
        resolved(ImageFormat::Png, png_dimensions(data))
    } else if data.starts_with(b"RIFF") && data.get(8..12) == Some(b"WEBP") {
        resolved(ImageFormat::Webp, webp_dimensions(data))
    } else if is_gif(data) {
        resolved(ImageFormat::Gif, gif_dimensions(data))
    } else if data.starts_with(b"BM") {
        resolved(ImageFormat::Bmp, bmp_dimensions(data))
    } else if is_pnm(data) {
        pnm_info(data)
    } else if data.starts_with(b"#define") && matches!(data.get(7).copied(), Some(b' ' | b'\t')) {
        resolved(ImageFormat::Xbm, xbm_dimensions(data))
    } else if data.starts_with(b"/* XPM */") {
        resolved(ImageFormat::Xpm, xpm_dimensions(data))
    } else if data.starts_with(b"MM\x00\x2a") {
        resolved(ImageFormat::Tiff, tiff_dimensions(data, true))
    } else if data.starts_with(b"II\x2a\x00") {
        resolved(ImageFormat::Tiff, tiff_dimensions(data, false))
    } else if data.starts_with(b"8BPS") {
        resolved(ImageFormat::Psd, psd_dimensions(data))
    } else if data.starts_with(b"\x8aMNG\r\n\x1a\n") {
        resolved(ImageFormat::Mng, mng_dimensions(data))
    } else if data.starts_with(b"\x01\xda[\x01\x00]") {
        resolved(ImageFormat::Rgb, rgb_dimensions(data))
    } else if data.starts_with(b"\x59\xa6\x6a\x95") {
        resolved(ImageFormat::Ras, ras_dimensions(data))
    } else if data.first() == Some(&0x0a) && data.get(2) == Some(&0x01) {
        resolved(ImageFormat::Pcx, pcx_dimensions(data))
    } else if has_avif_ftyp(data) {
        resolved(ImageFormat::Avif, avif_dimensions(data))
    } else {
        ImageInfo::default()
    }
}

/// Reads from `r` until the format and dimensions resolve or EOF.
///
/// The buffer grows in 4 KiB steps and is re-sniffed after every read, so
/// no more input is consumed than the header actually needs.
pub fn detect_reader<R: Read>(mut r: R) -> std::io::Result<ImageInfo> {
    let mut buf = Vec::with_capacity(4096);
    let mut tmp = [0u8; 4096];

    loop {
        let n = r.read(&mut tmp)?;
        if n == 0 {
            return Ok(detect(&buf));
        }
        buf.extend_from_slice(&tmp[..n]);
        let info = detect(&buf);
        if info.is_resolved() {
            return Ok(info);
        }
    }
}

fn resolved(format: ImageFormat, dimensions: Option<(u32, u32)>) -> ImageInfo {
    match dimensions {
        Some((width, height)) if width > 0 && height > 0 => ImageInfo {
            format,
            width,
            height,
        },
        _ => ImageInfo::default(),
    }
}

fn is_gif(data: &[u8]) -> bool {
    data.starts_with(b"GIF8")
        && matches!(data.get(4).copied(), Some(b'7' | b'9'))
        && data.get(5) == Some(&b'a')
}

fn is_pnm(data: &[u8]) -> bool {
    data.first() == Some(&b'P') && matches!(data.get(1).copied(), Some(b'1'..=b'7'))
}

fn be16(data: &[u8], at: usize) -> Option<u16> {
    let bytes: &[u8; 2] = data.get(at..at + 2)?.try_into().ok()?;
    Some(u16::from_be_bytes(*bytes))
}

fn le16(data: &[u8], at: usize) -> Option<u16> {
    let bytes: &[u8; 2] = data.get(at..at + 2)?.try_into().ok()?;
    Some(u16::from_le_bytes(*bytes))
}

fn be32(data: &[u8], at: usize) -> Option<u32> {
    let bytes: &[u8; 4] = data.get(at..at + 4)?.try_into().ok()?;
    Some(u32::from_be_bytes(*bytes))
}

fn le32(data: &[u8], at: usize) -> Option<u32> {
    let bytes: &[u8; 4] = data.get(at..at + 4)?.try_into().ok()?;
    Some(u32::from_le_bytes(*bytes))
}

fn be64(data: &[u8], at: usize) -> Option<u64> {
    let bytes: &[u8; 8] = data.get(at..at + 8)?.try_into().ok()?;
    Some(u64::from_be_bytes(*bytes))
}

fn jpeg_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    // Walk the marker segments until a start-of-frame carries the size.
    let mut i = 2usize;
    loop {
        let marker = *data.get(i)?;
        let code = *data.get(i + 1)?;
        let length = be16(data, i + 2)? as usize;
        i += 4;

        if marker != 0xff {
            return None;
        }
        if (0xc0..=0xc3).contains(&code) {
            let height = be16(data, i + 1)? as u32;
            let width = be16(data, i + 3)? as u32;
            return Some((width, height));
        }

        let advance = length.checked_sub(2)?;
        if advance == 0 {
            return None;
        }
        i += advance;
    }
}

fn png_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    if data.get(12..16)? != b"IHDR" {
        return None;
    }
    Some((be32(data, 16)?, be32(data, 20)?))
}

fn webp_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    if data.get(12..15)? != b"VP8" {
        return None;
    }
    match *data.get(15)? {
        b' ' => {
            // Lossy VP8: 14-bit dimensions in the frame header.
            let width = ((*data.get(27)? as u32 & 0x3f) << 8) | *data.get(26)? as u32;
            let height = ((*data.get(29)? as u32 & 0x3f) << 8) | *data.get(28)? as u32;
            Some((width, height))
        }
        b'L' => {
            let b21 = *data.get(21)? as u32;
            let b22 = *data.get(22)? as u32;
            let b23 = *data.get(23)? as u32;
            let width = ((b22 << 8 | b21) & 16383) + 1;
            let height = ((b23 << 2 | b22 >> 6) & 16383) + 1;
            Some((width, height))
        }
        b'X' => {
            let width = (*data.get(24)? as u32
                | (*data.get(25)? as u32) << 8
                | (*data.get(26)? as u32) << 16)
                + 1;
            let height = (*data.get(27)? as u32
                | (*data.get(28)? as u32) << 8
                | (*data.get(29)? as u32) << 16)
                + 1;
            Some((width, height))
        }
        _ => None,
    }
}

fn gif_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    Some((le16(data, 6)? as u32, le16(data, 8)? as u32))
}

fn bmp_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    Some((le32(data, 18)?, le32(data, 22)?))
}

fn pnm_info(data: &[u8]) -> ImageInfo {
    let format = match data.get(1).copied() {
        Some(b'1' | b'4') => ImageFormat::Pbm,
        Some(b'2' | b'5') => ImageFormat::Pgm,
        Some(b'3' | b'6') => ImageFormat::Ppm,
        Some(b'7') => ImageFormat::Xv,
        _ => return ImageInfo::default(),
    };

    let i = skip_space(data, 2);
    let (width, i) = parse_u32(data, i);
    let i = skip_space(data, i);
    let (height, _) = parse_u32(data, i);

    resolved(format, Some((width, height)))
}

fn xbm_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    // "#define <name>_width N" then "#define <name>_height M".
    let (_, i) = read_non_space(data, 0);
    let i = skip_space(data, i);
    let (_, i) = read_non_space(data, i);
    let i = skip_space(data, i);
    let (width, i) = parse_u32(data, i);

    let i = skip_space(data, i);
    let (token, i) = read_non_space(data, i);
    if token != b"#define" {
        return None;
    }
    let i = skip_space(data, i);
    let (_, i) = read_non_space(data, i);
    let i = skip_space(data, i);
    let (height, _) = parse_u32(data, i);

    Some((width, height))
}

fn xpm_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    // First quoted line is "<width> <height> <colors> <chars-per-pixel>".
    let mut i = 0usize;
    while i < data.len() {
        let (line, next) = read_line(data, i);
        if line.is_empty() {
            break;
        }
        i = next;
        let j = skip_space(line, 0);
        if line.get(j) != Some(&b'"') {
            continue;
        }
        let (width, j) = parse_u32(line, j + 1);
        let j = skip_space(line, j);
        let (height, _) = parse_u32(line, j);
        return Some((width, height));
    }
    None
}

fn tiff_dimensions(data: &[u8], big_endian: bool) -> Option<(u32, u32)> {
    let read16 = |at: usize| {
        if big_endian {
            be16(data, at)
        } else {
            le16(data, at)
        }
    };
    let read32 = |at: usize| {
        if big_endian {
            be32(data, at)
        } else {
            le32(data, at)
        }
    };

    let ifd = read32(4)? as usize;
    let count = read16(ifd)? as usize;
    let mut width = 0u32;
    let mut height = 0u32;

    for entry in 0..count {
        let at = ifd.checked_add(2)?.checked_add(entry.checked_mul(12)?)?;
        let tag = read16(at)?;
        let datatype = read16(at + 2)?;

        // The value is left-justified inside the 4-byte value field.
        let value = match datatype {
            1 | 6 => *data.get(at + 8)? as u32,
            3 | 8 => read16(at + 8)? as u32,
            4 | 9 => read32(at + 8)?,
            _ => return None,
        };

        match tag {
            256 => width = value,
            257 => height = value,
            _ => {}
        }
        if width > 0 && height > 0 {
            return Some((width, height));
        }
    }
    None
}

fn psd_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    Some((be32(data, 18)?, be32(data, 14)?))
}

fn mng_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    if data.get(12..16)? != b"MHDR" {
        return None;
    }
    Some((be32(data, 16)?, be32(data, 20)?))
}

fn rgb_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    Some((be16(data, 6)? as u32, be16(data, 8)? as u32))
}

fn ras_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    Some((be32(data, 4)?, be32(data, 8)?))
}

fn pcx_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    let width = (le16(data, 8)? as u32 + 1).checked_sub(le16(data, 4)? as u32)?;
    let height = (le16(data, 10)? as u32 + 1).checked_sub(le16(data, 6)? as u32)?;
    Some((width, height))
}

fn has_avif_ftyp(data: &[u8]) -> bool {
    let mut i = 0usize;
    while i + 8 <= data.len() {
        let size32 = match be32(data, i) {
            Some(s) => s,
            None => return false,
        };
        let mut size = size32 as usize;
        let mut header = 8usize;
        match size32 {
            1 => {
                let size64 = match be64(data, i + 8) {
                    Some(s) => s,
                    None => return false,
                };
                if size64 < 16 || size64 > (data.len() - i) as u64 {
                    return false;
                }
                size = size64 as usize;
                header = 16;
            }
            0 => size = data.len() - i,
            _ => {}
        }
        if size < header || i + size > data.len() {
            return false;
        }
        if data.get(i + 4..i + 8) == Some(b"ftyp") {
            return ftyp_has_avif_brand(&data[i..i + size], header);
        }
        i += size;
    }
    false
}

fn ftyp_has_avif_brand(data: &[u8], header: usize) -> bool {
    if data.len() < header + 8 {
        return false;
    }
    if is_avif_brand(&data[header..header + 4]) {
        return true;
    }
    // Compatible brands follow the 4-byte minor version.
    let mut i = header + 8;
    while i + 4 <= data.len() {
        if is_avif_brand(&data[i..i + 4]) {
            return true;
        }
        i += 4;
    }
    false
}

fn is_avif_brand(brand: &[u8]) -> bool {
    brand.len() >= 4
        && brand[0] == b'a'
        && brand[1] == b'v'
        && brand[2] == b'i'
        && (brand[3] == b'f' || brand[3] == b's')
}

fn avif_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    // Scan for an ispe (image spatial extents) property box.
    let mut i = 4usize;
    while i + 16 <= data.len() {
        if data.get(i..i + 4) == Some(b"ispe") {
            let size = be32(data, i - 4)? as usize;
            if size >= 20 && i - 4 + size <= data.len() {
                let width = be32(data, i + 8)?;
                let height = be32(data, i + 12)?;
                if width != 0 && height != 0 {
                    return Some((width, height));
                }
            }
        }
        i += 1;
    }
    None
}

fn skip_space(data: &[u8], mut i: usize) -> usize {
    while i < data.len() && matches!(data[i], b' ' | b'\t' | b'\r' | b'\n') {
        i += 1;
    }
    i
}

fn read_non_space(data: &[u8], i: usize) -> (&[u8], usize) {
    let mut j = i;
    while j < data.len() && !matches!(data[j], b' ' | b'\t' | b'\r' | b'\n') {
        j += 1;
    }
    (&data[i..j], j)
}

fn read_line(data: &[u8], i: usize) -> (&[u8], usize) {
    let mut j = i;
    while j < data.len() && data[j] != b'\n' {
        j += 1;
    }
    j = (j + 1).min(data.len());
    (&data[i..j], j)
}

fn parse_u32(data: &[u8], mut i: usize) -> (u32, usize) {
    let mut n = 0u64;
    while i < data.len() && data[i].is_ascii_digit() {
        n = n * 10 + (data[i] - b'0') as u64;
        if n > u32::MAX as u64 {
            return (0, i);
        }
        i += 1;
    }
    (n as u32, i)
}
