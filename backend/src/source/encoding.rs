//! Character encoding detection, strict decoding and header repair.

use encoding_rs::{Encoding, ISO_8859_15, UTF_8, WINDOWS_1252, WINDOWS_874};
use std::fmt;
use std::str::FromStr;

use crate::error::{SourceError, SourceResult};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Below this chardet confidence a Western guess is not trusted over Thai.
const WESTERN_CONFIDENCE: f32 = 0.8;

/// Text encodings a source file may be declared in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    /// Legacy Thai code page (TIS-620 superset).
    Windows874,
    /// ISO-8859-1, one byte per code point.
    Latin1,
    /// ISO-8859-15 (Latin-1 with the euro sign).
    Latin9,
    Windows1252,
}

impl TextEncoding {
    pub fn label(&self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "utf-8",
            TextEncoding::Windows874 => "windows-874",
            TextEncoding::Latin1 => "iso-8859-1",
            TextEncoding::Latin9 => "iso-8859-15",
            TextEncoding::Windows1252 => "windows-1252",
        }
    }

    /// `encoding_rs` codec. Latin-1 has none of its own there (the WHATWG
    /// label maps to windows-1252), so it is decoded byte by byte.
    fn codec(&self) -> Option<&'static Encoding> {
        match self {
            TextEncoding::Utf8 => Some(UTF_8),
            TextEncoding::Windows874 => Some(WINDOWS_874),
            TextEncoding::Latin1 => None,
            TextEncoding::Latin9 => Some(ISO_8859_15),
            TextEncoding::Windows1252 => Some(WINDOWS_1252),
        }
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for TextEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "utf-8" | "utf8" | "ascii" => Ok(TextEncoding::Utf8),
            "windows-874" | "cp874" | "tis-620" | "tis620" | "iso-8859-11" | "thai" => {
                Ok(TextEncoding::Windows874)
            }
            "iso-8859-1" | "latin-1" | "latin1" => Ok(TextEncoding::Latin1),
            "iso-8859-15" | "latin-9" | "latin9" => Ok(TextEncoding::Latin9),
            "windows-1252" | "cp1252" => Ok(TextEncoding::Windows1252),
            other => Err(format!("unsupported encoding '{}'", other)),
        }
    }
}

/// Guess the encoding of raw file bytes.
///
/// Valid UTF-8 wins outright. Otherwise chardet decides, and anything it
/// does not confidently call Western is read as windows-874.
pub fn detect_encoding(bytes: &[u8]) -> TextEncoding {
    if std::str::from_utf8(strip_utf8_bom(bytes)).is_ok() {
        return TextEncoding::Utf8;
    }

    let (charset, confidence, _language) = chardet::detect(bytes);
    match charset.to_lowercase().as_str() {
        "windows-1252" | "cp1252" if confidence >= WESTERN_CONFIDENCE => {
            TextEncoding::Windows1252
        }
        "iso-8859-1" | "latin-1" | "latin1" if confidence >= WESTERN_CONFIDENCE => TextEncoding::Latin1,
        "iso-8859-15" if confidence >= WESTERN_CONFIDENCE => TextEncoding::Latin9,
        _ => TextEncoding::Windows874,
    }
}

/// Decode bytes strictly; a single unmappable byte fails the whole file.
pub fn decode_content(bytes: &[u8], encoding: TextEncoding) -> SourceResult<String> {
    let bytes = match encoding {
        TextEncoding::Utf8 => strip_utf8_bom(bytes),
        _ => bytes,
    };

    let Some(codec) = encoding.codec() else {
        return Ok(bytes.iter().map(|&b| char::from(b)).collect());
    };

    codec
        .decode_without_bom_handling_and_without_replacement(bytes)
        .map(|text| text.into_owned())
        .ok_or_else(|| SourceError::EncodingDecodeFailure {
            encoding: encoding.label().to_string(),
        })
}

fn strip_utf8_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes)
}

/// Undo UTF-8 text that was mis-decoded as windows-1252.
///
/// Returns `None` when the text is not such mojibake (plain ASCII, real Thai,
/// real Latin-1 text).
pub fn repair_mojibake(text: &str) -> Option<String> {
    if text.is_ascii() {
        return None;
    }

    let (bytes, _, unmappable) = WINDOWS_1252.encode(text);
    if unmappable {
        return None;
    }

    String::from_utf8(bytes.into_owned())
        .ok()
        .filter(|repaired| repaired != text)
}
