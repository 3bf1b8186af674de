//! Raw upload bytes to clean UTF-8 text.
//!
//! Spreadsheet exports reach us with a BOM, in Latin-1, or as UTF-8 that was
//! already mis-read as Latin-1 once ("Ã©" for "é"). Decoding strips the BOM,
//! decodes leniently, then repairs mojibake or falls back to Latin-1.

use log::{debug, warn};
use regex::Regex;

/// More lossy replacements than this means the file was not UTF-8.
const REPLACEMENT_THRESHOLD: usize = 10;
const PREVIEW_BYTES: usize = 150;

/// `Ã` or `Â` followed by a character a UTF-8 continuation byte turns into
/// when read as Latin-1 / CP-1252.
const MOJIBAKE_PATTERN: &str =
    "Ã[\u{80}-\u{BF}€‚ƒ„…†‡ˆ‰Š‹ŒŽ‘’“”•–—˜™š›œžŸ]|Â[\u{A0}-\u{BF}]";

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("The uploaded file is empty")]
    EmptyFile,
    #[error("Regex error: {0}")]
    Pattern(#[from] regex::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Bom {
    Utf8,
    Utf16Be,
    Utf16Le,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    /// UTF-8 that had been through a Latin-1 round trip, repaired.
    Utf8Repaired,
    Latin1,
    Utf16Be,
    Utf16Le,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodeDiagnostics {
    pub bom: Option<Bom>,
    /// Replacement characters produced by the lenient decode itself.
    pub replacements: usize,
    pub mojibake: usize,
}

#[derive(Clone, Debug)]
pub struct DecodedText {
    pub text: String,
    pub encoding: Encoding,
    pub diagnostics: DecodeDiagnostics,
}

fn detect_bom(bytes: &[u8]) -> Option<Bom> {
    match bytes {
        [0xEF, 0xBB, 0xBF, ..] => Some(Bom::Utf8),
        [0xFE, 0xFF, ..] => Some(Bom::Utf16Be),
        [0xFF, 0xFE, ..] => Some(Bom::Utf16Le),
        _ => None,
    }
}

fn bom_len(bom: Bom) -> usize {
    match bom {
        Bom::Utf8 => 3,
        Bom::Utf16Be | Bom::Utf16Le => 2,
    }
}

/// Lossy UTF-8 decode, returning how many invalid sequences were replaced.
fn decode_utf8_lossy(bytes: &[u8]) -> (String, usize) {
    let mut text = String::with_capacity(bytes.len());
    let mut replacements = 0;
    for chunk in bytes.utf8_chunks() {
        text.push_str(chunk.valid());
        if !chunk.invalid().is_empty() {
            text.push(char::REPLACEMENT_CHARACTER);
            replacements += 1;
        }
    }
    (text, replacements)
}

fn decode_utf16(bytes: &[u8], big_endian: bool) -> String {
    let units = bytes.chunks(2).map(|pair| match (pair, big_endian) {
        ([hi, lo], true) => u16::from_be_bytes([*hi, *lo]),
        ([lo, hi], false) => u16::from_le_bytes([*lo, *hi]),
        _ => 0xFFFD,
    });
    char::decode_utf16(units)
        .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// CP-1252 assigns printable characters to 0x80..=0x9F; map them back.
fn cp1252_byte(c: char) -> Option<u8> {
    let b = match c {
        '€' => 0x80,
        '‚' => 0x82,
        'ƒ' => 0x83,
        '„' => 0x84,
        '…' => 0x85,
        '†' => 0x86,
        '‡' => 0x87,
        'ˆ' => 0x88,
        '‰' => 0x89,
        'Š' => 0x8A,
        '‹' => 0x8B,
        'Œ' => 0x8C,
        'Ž' => 0x8E,
        '‘' => 0x91,
        '’' => 0x92,
        '“' => 0x93,
        '”' => 0x94,
        '•' => 0x95,
        '–' => 0x96,
        '—' => 0x97,
        '˜' => 0x98,
        '™' => 0x99,
        'š' => 0x9A,
        '›' => 0x9B,
        'œ' => 0x9C,
        'ž' => 0x9E,
        'Ÿ' => 0x9F,
        _ => return None,
    };
    Some(b)
}

/// Undoes one UTF-8 → Latin-1 mis-decode.
fn repair_mojibake(text: &str) -> String {
    let bytes: Vec<u8> = text
        .chars()
        .map(|c| cp1252_byte(c).unwrap_or((c as u32 & 0xFF) as u8))
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

fn hex_preview(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take(PREVIEW_BYTES)
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn decode(bytes: &[u8]) -> Result<DecodedText, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::EmptyFile);
    }
    debug!("Raw preview (hex): {}", hex_preview(bytes));

    let bom = detect_bom(bytes);
    let body = &bytes[bom.map(bom_len).unwrap_or(0)..];
    if let Some(bom) = bom {
        debug!("Stripped {:?} byte-order mark", bom);
    }

    let mut decoded = match bom {
        Some(Bom::Utf16Be) => DecodedText {
            text: decode_utf16(body, true),
            encoding: Encoding::Utf16Be,
            diagnostics: DecodeDiagnostics { bom, replacements: 0, mojibake: 0 },
        },
        Some(Bom::Utf16Le) => DecodedText {
            text: decode_utf16(body, false),
            encoding: Encoding::Utf16Le,
            diagnostics: DecodeDiagnostics { bom, replacements: 0, mojibake: 0 },
        },
        _ => decode_utf8_family(body, bom)?,
    };

    // Repair can resurrect a BOM that had been mis-decoded as "ï»¿".
    if let Some(rest) = decoded.text.strip_prefix('\u{FEFF}') {
        decoded.text = rest.to_string();
    }
    if decoded.text.trim().is_empty() {
        return Err(DecodeError::EmptyFile);
    }
    Ok(decoded)
}

fn decode_utf8_family(body: &[u8], bom: Option<Bom>) -> Result<DecodedText, DecodeError> {
    let mojibake_re = Regex::new(MOJIBAKE_PATTERN)?;
    let (text, replacements) = decode_utf8_lossy(body);
    let mojibake = mojibake_re.find_iter(&text).count();
    debug!(
        "UTF-8 decode: {} replacement(s), {} mojibake sequence(s)",
        replacements, mojibake
    );
    let diagnostics = DecodeDiagnostics {
        bom,
        replacements,
        mojibake,
    };

    let decoded = if mojibake > 0 {
        warn!("Detected {} mojibake sequence(s), repairing double-encoded UTF-8", mojibake);
        DecodedText {
            text: repair_mojibake(&text),
            encoding: Encoding::Utf8Repaired,
            diagnostics,
        }
    } else if replacements > REPLACEMENT_THRESHOLD {
        warn!(
            "{} invalid UTF-8 sequences, decoding as ISO-8859-1 instead",
            replacements
        );
        DecodedText {
            text: decode_latin1(body),
            encoding: Encoding::Latin1,
            diagnostics,
        }
    } else {
        DecodedText {
            text,
            encoding: Encoding::Utf8,
            diagnostics,
        }
    };
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_an_error() {
        assert!(matches!(decode(b""), Err(DecodeError::EmptyFile)));
        assert!(matches!(decode(b"\xEF\xBB\xBF \r\n"), Err(DecodeError::EmptyFile)));
    }

    #[test]
    fn clean_utf8_is_lossless() {
        let input = "date,course\n2024-03-05,1ro Básico\n";
        let decoded = decode(input.as_bytes()).unwrap();
        assert_eq!(decoded.text, input);
        assert_eq!(decoded.text.as_bytes(), input.as_bytes());
        assert_eq!(decoded.encoding, Encoding::Utf8);
    }

    #[test]
    fn utf8_bom_is_stripped() {
        let decoded = decode(b"\xEF\xBB\xBFdate,course\n").unwrap();
        assert_eq!(decoded.text, "date,course\n");
        assert_eq!(decoded.diagnostics.bom, Some(Bom::Utf8));
    }

    #[test]
    fn utf16_le_with_bom_is_decoded() {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in "fecha,curso\né".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.text, "fecha,curso\né");
        assert_eq!(decoded.encoding, Encoding::Utf16Le);
    }

    #[test]
    fn mojibake_is_repaired() {
        // "é" encoded as UTF-8, read as Latin-1, written back as UTF-8.
        let decoded = decode("Ã©xito,1ro BÃ¡sico".as_bytes()).unwrap();
        assert_eq!(decoded.text, "éxito,1ro Básico");
        assert_eq!(decoded.encoding, Encoding::Utf8Repaired);
        assert_eq!(decoded.diagnostics.mojibake, 2);
    }

    #[test]
    fn bom_restored_by_repair_is_stripped() {
        // A BOM-prefixed UTF-8 file that went through one Latin-1 round trip.
        let decoded = decode("ï»¿fecha,secciÃ³n\n".as_bytes()).unwrap();
        assert_eq!(decoded.encoding, Encoding::Utf8Repaired);
        assert_eq!(decoded.text, "fecha,sección\n");
        assert!(!decoded.text.starts_with('\u{FEFF}'));
    }

    #[test]
    fn latin1_fallback_after_many_invalid_sequences() {
        let mut bytes = b"name\n".to_vec();
        for _ in 0..11 {
            bytes.extend_from_slice(b"Jos\xE9 ");
        }
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.encoding, Encoding::Latin1);
        assert!(decoded.text.contains("José"));
        assert!(!decoded.text.contains(char::REPLACEMENT_CHARACTER));
    }

    #[test]
    fn few_invalid_sequences_stay_utf8() {
        let decoded = decode(b"Jos\xE9,ok\n").unwrap();
        assert_eq!(decoded.encoding, Encoding::Utf8);
        assert_eq!(decoded.diagnostics.replacements, 1);
    }

    #[test]
    fn existing_replacement_characters_are_not_counted() {
        let input = "a\u{FFFD}b".repeat(20);
        let decoded = decode(input.as_bytes()).unwrap();
        assert_eq!(decoded.diagnostics.replacements, 0);
        assert_eq!(decoded.encoding, Encoding::Utf8);
        assert_eq!(decoded.text, input);
    }
}
