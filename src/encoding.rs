//! Byte-level text handling shared by the snippet reader and the patcher.
//!
//! Files are read as raw bytes, decoded according to their BOM, and written
//! back in the same encoding so a patch never changes how a file is stored.

/// Text encodings we recognize by BOM. Anything without a BOM is treated
/// as UTF-8.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    Utf16Le,
    Utf16Be,
    Utf32Be,
}

/// Dominant line ending of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    Lf,
    CrLf,
}

impl LineEnding {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineEnding::Lf => "\n",
            LineEnding::CrLf => "\r\n",
        }
    }
}

/// A file decoded to text, remembering enough to re-encode it byte-compatibly.
#[derive(Debug, Clone)]
pub struct DecodedText {
    pub text: String,
    pub encoding: Encoding,
    pub had_bom: bool,
}

const BOM_UTF8: &[u8] = &[0xEF, 0xBB, 0xBF];
const BOM_UTF16_LE: &[u8] = &[0xFF, 0xFE];
const BOM_UTF16_BE: &[u8] = &[0xFE, 0xFF];
const BOM_UTF32_BE: &[u8] = &[0x00, 0x00, 0xFE, 0xFF];

/// Detect the encoding of `bytes` by BOM. Returns the encoding, the BOM
/// length to skip, and whether a BOM was present.
pub fn detect_bom(bytes: &[u8]) -> (Encoding, usize, bool) {
    // 4-byte BOMs first: UTF-32BE starts with the UTF-16BE sequence shifted.
    if bytes.starts_with(BOM_UTF32_BE) {
        return (Encoding::Utf32Be, 4, true);
    }
    if bytes.starts_with(BOM_UTF8) {
        return (Encoding::Utf8, 3, true);
    }
    if bytes.starts_with(BOM_UTF16_BE) {
        return (Encoding::Utf16Be, 2, true);
    }
    if bytes.starts_with(BOM_UTF16_LE) {
        return (Encoding::Utf16Le, 2, true);
    }
    (Encoding::Utf8, 0, false)
}

/// Decode raw file bytes into text, stripping any BOM. Returns `None` when
/// the bytes are not valid in the detected encoding.
pub fn decode(bytes: &[u8]) -> Option<DecodedText> {
    let (encoding, bom_len, had_bom) = detect_bom(bytes);
    let body = &bytes[bom_len..];

    let text = match encoding {
        Encoding::Utf8 => String::from_utf8(body.to_vec()).ok()?,
        Encoding::Utf16Le => decode_utf16(body, u16::from_le_bytes)?,
        Encoding::Utf16Be => decode_utf16(body, u16::from_be_bytes)?,
        Encoding::Utf32Be => decode_utf32_be(body)?,
    };

    Some(DecodedText {
        text,
        encoding,
        had_bom,
    })
}

fn decode_utf16(body: &[u8], from_bytes: fn([u8; 2]) -> u16) -> Option<String> {
    if body.len() % 2 != 0 {
        return None;
    }
    let units: Vec<u16> = body
        .chunks_exact(2)
        .map(|c| from_bytes([c[0], c[1]]))
        .collect();
    char::decode_utf16(units.into_iter())
        .collect::<Result<String, _>>()
        .ok()
}

fn decode_utf32_be(body: &[u8]) -> Option<String> {
    if body.len() % 4 != 0 {
        return None;
    }
    body.chunks_exact(4)
        .map(|c| {
            let code = u32::from_be_bytes([c[0], c[1], c[2], c[3]]);
            char::from_u32(code)
        })
        .collect()
}

/// Encode `text` back to bytes in `encoding`, emitting a BOM when
/// `with_bom` is set.
pub fn encode(text: &str, encoding: Encoding, with_bom: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() + 4);
    if with_bom {
        match encoding {
            Encoding::Utf8 => out.extend_from_slice(BOM_UTF8),
            Encoding::Utf16Le => out.extend_from_slice(BOM_UTF16_LE),
            Encoding::Utf16Be => out.extend_from_slice(BOM_UTF16_BE),
            Encoding::Utf32Be => out.extend_from_slice(BOM_UTF32_BE),
        }
    }
    match encoding {
        Encoding::Utf8 => out.extend_from_slice(text.as_bytes()),
        Encoding::Utf16Le => {
            for unit in text.encode_utf16() {
                out.extend_from_slice(&unit.to_le_bytes());
            }
        }
        Encoding::Utf16Be => {
            for unit in text.encode_utf16() {
                out.extend_from_slice(&unit.to_be_bytes());
            }
        }
        Encoding::Utf32Be => {
            for ch in text.chars() {
                out.extend_from_slice(&(ch as u32).to_be_bytes());
            }
        }
    }
    out
}

/// Detect the dominant line ending: CRLF wins on majority-or-tie against
/// bare LF; a file with no CRLF at all is LF.
pub fn detect_line_ending(text: &str) -> LineEnding {
    let crlf = text.matches("\r\n").count();
    if crlf == 0 {
        return LineEnding::Lf;
    }
    let total_lf = text.matches('\n').count();
    let bare_lf = total_lf - crlf;
    if crlf >= bare_lf {
        LineEnding::CrLf
    } else {
        LineEnding::Lf
    }
}

/// Split text on `\r\n`, `\r`, or `\n`. The final fragment after the last
/// terminator is kept, so `"a\n"` splits to `["a", ""]`.
pub fn split_lines(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\n' => {
                out.push(&text[start..i]);
                i += 1;
                start = i;
            }
            b'\r' => {
                out.push(&text[start..i]);
                i += if bytes.get(i + 1) == Some(&b'\n') { 2 } else { 1 };
                start = i;
            }
            _ => i += 1,
        }
    }
    out.push(&text[start..]);
    out
}
