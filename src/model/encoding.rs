//! Text encodings for large-file chunk decoding.
//!
//! Text inside the core is always Rust `str`; bytes from a backing source are decoded
//! through `encoding_rs` one chunk at a time. Only encodings whose character boundaries
//! can be recovered locally are offered, since chunks are decoded independently.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Supported source encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub enum Encoding {
    /// UTF-8 (default, most common)
    #[default]
    Utf8,
    /// UTF-16 Little Endian
    Utf16Le,
    /// UTF-16 Big Endian
    Utf16Be,
    /// Latin-1 / ISO-8859-1, decoded as Windows-1252 per WHATWG
    Latin1,
    /// Windows-1252 / CP-1252
    Windows1252,
    /// Windows-1250 / CP-1250
    Windows1250,
}

impl Encoding {
    /// Get the display name for status output
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Utf8 => "UTF-8",
            Self::Utf16Le => "UTF-16 LE",
            Self::Utf16Be => "UTF-16 BE",
            Self::Latin1 => "Latin-1",
            Self::Windows1252 => "Windows-1252",
            Self::Windows1250 => "Windows-1250",
        }
    }

    /// Get the encoding_rs Encoding for this type
    pub fn to_encoding_rs(&self) -> &'static encoding_rs::Encoding {
        match self {
            Self::Utf8 => encoding_rs::UTF_8,
            Self::Utf16Le => encoding_rs::UTF_16LE,
            Self::Utf16Be => encoding_rs::UTF_16BE,
            Self::Latin1 | Self::Windows1252 => encoding_rs::WINDOWS_1252,
            Self::Windows1250 => encoding_rs::WINDOWS_1250,
        }
    }

    /// Bytes per code unit; chunk boundaries must be multiples of this
    pub fn unit_size(&self) -> usize {
        match self {
            Self::Utf16Le | Self::Utf16Be => 2,
            _ => 1,
        }
    }

    /// Encoded form of `\n`
    pub fn line_feed(&self) -> &'static [u8] {
        match self {
            Self::Utf16Le => &[0x0A, 0x00],
            Self::Utf16Be => &[0x00, 0x0A],
            _ => b"\n",
        }
    }

    /// Encoded form of `\r`
    pub fn carriage_return(&self) -> &'static [u8] {
        match self {
            Self::Utf16Le => &[0x0D, 0x00],
            Self::Utf16Be => &[0x00, 0x0D],
            _ => b"\r",
        }
    }

    /// Byte order mark to skip at the very start of a source
    pub fn bom_bytes(&self) -> &'static [u8] {
        match self {
            Self::Utf8 => &[0xEF, 0xBB, 0xBF],
            Self::Utf16Le => &[0xFF, 0xFE],
            Self::Utf16Be => &[0xFE, 0xFF],
            _ => &[],
        }
    }

    /// Number of leading bytes of `bytes` that belong to a character started before it
    pub fn leading_partial(&self, bytes: &[u8]) -> usize {
        match self {
            Self::Utf8 => bytes
                .iter()
                .take(3)
                .take_while(|&&b| is_utf8_continuation(b))
                .count(),
            Self::Utf16Le | Self::Utf16Be => match self.unit_at(bytes, 0) {
                Some(unit) if is_low_surrogate(unit) => 2,
                _ => 0,
            },
            _ => 0,
        }
    }

    /// Number of bytes past the end of `bytes` needed to finish its last character,
    /// judged from the bytes themselves
    pub fn trailing_partial(&self, bytes: &[u8]) -> usize {
        match self {
            Self::Utf8 => {
                // Walk back over continuation bytes to the lead byte
                let tail = bytes.len().saturating_sub(4);
                for (i, &b) in bytes.iter().enumerate().skip(tail).rev() {
                    if is_utf8_continuation(b) {
                        continue;
                    }
                    let expected = utf8_sequence_len(b);
                    let have = bytes.len() - i;
                    return expected.saturating_sub(have);
                }
                0
            }
            Self::Utf16Le | Self::Utf16Be => {
                if bytes.len() < 2 {
                    return 0;
                }
                match self.unit_at(bytes, bytes.len() - 2) {
                    Some(unit) if is_high_surrogate(unit) => 2,
                    _ => 0,
                }
            }
            _ => 0,
        }
    }

    fn unit_at(&self, bytes: &[u8], at: usize) -> Option<u16> {
        let pair = [*bytes.get(at)?, *bytes.get(at + 1)?];
        Some(match self {
            Self::Utf16Be => u16::from_be_bytes(pair),
            _ => u16::from_le_bytes(pair),
        })
    }

    /// Decode a run of bytes that starts and ends on character boundaries
    pub fn decode(&self, bytes: &[u8]) -> String {
        let (text, had_errors) = self.to_encoding_rs().decode_without_bom_handling(bytes);
        if had_errors {
            tracing::trace!(
                encoding = self.display_name(),
                bytes = bytes.len(),
                "malformed input replaced while decoding"
            );
        }
        text.into_owned()
    }
}

fn is_utf8_continuation(b: u8) -> bool {
    b & 0xC0 == 0x80
}

fn utf8_sequence_len(lead: u8) -> usize {
    match lead {
        0x00..=0x7F => 1,
        0xC0..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF7 => 4,
        _ => 1,
    }
}

fn is_high_surrogate(unit: u16) -> bool {
    (0xD800..0xDC00).contains(&unit)
}

fn is_low_surrogate(unit: u16) -> bool {
    (0xDC00..0xE000).contains(&unit)
}

/// Replace every `\r\n` and lone `\r` with `\n` in one left-to-right pass
pub fn normalize_line_endings(text: &str) -> String {
    if !text.contains('\r') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\r' {
            if chars.peek() == Some(&'\n') {
                chars.next();
            }
            out.push('\n');
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_line_endings() {
        assert_eq!(normalize_line_endings("a\r\nb\rc\n"), "a\nb\nc\n");
        assert_eq!(normalize_line_endings("\r\r\n"), "\n\n");
        assert_eq!(normalize_line_endings("plain"), "plain");
    }

    #[test]
    fn test_utf8_partials() {
        let bytes = "aé€".as_bytes(); // 61 C3 A9 E2 82 AC
        assert_eq!(Encoding::Utf8.leading_partial(&bytes[2..]), 1);
        assert_eq!(Encoding::Utf8.leading_partial(&bytes[4..]), 2);
        assert_eq!(Encoding::Utf8.trailing_partial(&bytes[..2]), 1);
        assert_eq!(Encoding::Utf8.trailing_partial(&bytes[..4]), 2);
        assert_eq!(Encoding::Utf8.trailing_partial(bytes), 0);
    }

    #[test]
    fn test_utf16_surrogate_partials() {
        let units: Vec<u16> = "a😀".encode_utf16().collect();
        let bytes: Vec<u8> = units.iter().flat_map(|u| u.to_le_bytes()).collect();
        assert_eq!(Encoding::Utf16Le.trailing_partial(&bytes[..4]), 2);
        assert_eq!(Encoding::Utf16Le.leading_partial(&bytes[4..]), 2);
        assert_eq!(Encoding::Utf16Le.decode(&bytes), "a😀");
    }

    #[test]
    fn test_single_byte_decode() {
        assert_eq!(Encoding::Windows1252.decode(&[0x63, 0x61, 0x66, 0xE9]), "café");
        assert_eq!(Encoding::Latin1.unit_size(), 1);
        assert_eq!(Encoding::Utf16Be.carriage_return(), &[0x00, 0x0D]);
    }
}
