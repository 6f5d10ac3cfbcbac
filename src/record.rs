//! Abstract record model.
//!
//! A *record* is one serialized line of a hex format: a tag naming its
//! nature, an address, payload bytes, and the format's consistency fields
//! (count, checksum). Each format module provides a concrete record type;
//! this module holds the traits they share, the three-state field
//! initializer, and the token model used for colorized printing.

use std::fmt::Debug;
use std::io::Write;

use crate::error::{HexError, Result};

/// Record tag: the enumerated nature of a record within its format.
pub trait Tag: Copy + Eq + Debug {
    /// Tells whether this tag marks a record carrying plain payload data.
    fn is_data(self) -> bool;

    /// Tells whether this tag terminates a record file (End Of File or
    /// start address records, depending on the format).
    fn is_file_termination(self) -> bool {
        false
    }
}

/// Three-state initializer for the count and checksum fields.
///
/// `Auto` recomputes the field from the record content, `Absent` stores no
/// value, `Value` stores the given number verbatim (useful to reproduce
/// wire content, valid or not).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldInit {
    /// Recompute the field from the record content.
    Auto,
    /// Store no field value.
    Absent,
    /// Store the given value verbatim.
    Value(u32),
}

impl FieldInit {
    /// Resolves the initializer against a computed value.
    pub fn resolve(self, computed: impl FnOnce() -> Option<u32>) -> Option<u32> {
        match self {
            FieldInit::Auto => computed(),
            FieldInit::Absent => None,
            FieldInit::Value(value) => Some(value),
        }
    }
}

/// Common record behavior shared by every format.
pub trait Record: Clone + PartialEq + Debug {
    /// Tag type of the owning format.
    type Tag: Tag;

    /// Record tag.
    fn tag(&self) -> Self::Tag;

    /// Record address (meaning depends on the tag).
    fn address(&self) -> u64;

    /// Payload bytes.
    fn data(&self) -> &[u8];

    /// Stored count field, if any.
    fn count(&self) -> Option<u32>;

    /// Stored checksum field, if any.
    fn checksum(&self) -> Option<u32>;

    /// `(line, column)` where the record was parsed, `(-1, -1)` otherwise.
    fn coords(&self) -> (isize, isize);

    /// Overwrites the parse coordinates.
    fn set_coords(&mut self, coords: (isize, isize));

    /// Parses one record from a serialized line.
    fn parse(line: &[u8]) -> Result<Self>;

    /// Serializes the record into bytes, with the given line terminator.
    fn to_bytestr(&self, end: &[u8]) -> Result<Vec<u8>>;

    /// Serializes the record into labeled tokens, for colorized printing.
    fn to_tokens(&self, end: &[u8]) -> Result<Tokens>;

    /// Computes the format-specific checksum value, if the format has one.
    fn compute_checksum(&self) -> Option<u32>;

    /// Computes the format-specific count value, if the format has one.
    fn compute_count(&self) -> Option<u32>;

    /// Validates field consistency; `checksum`/`count` also verify the
    /// stored fields against recomputation.
    fn validate(&self, checksum: bool, count: bool) -> Result<()>;

    /// Writes the serialized record onto a stream.
    fn serialize<W: Write>(&self, stream: &mut W, end: &[u8]) -> Result<()> {
        stream.write_all(&self.to_bytestr(end)?)?;
        Ok(())
    }

    /// Writes the record tokens onto a stream, optionally colorized.
    fn print<W: Write>(&self, stream: &mut W, color: bool, end: &[u8]) -> Result<()> {
        let tokens = self.to_tokens(end)?;
        if color {
            stream.write_all(&colorize_tokens(&tokens, true))?;
        } else {
            for (_, text) in &tokens {
                stream.write_all(text)?;
            }
        }
        Ok(())
    }

    /// Interprets the payload bytes as a big-endian unsigned integer.
    fn data_to_int(&self) -> u64 {
        self.data()
            .iter()
            .fold(0u64, |value, &byte| (value << 8) | u64::from(byte))
    }
}

/// Default coordinates for records not produced by a parser.
pub const NO_COORDS: (isize, isize) = (-1, -1);

/// Shared validation for the stored count and checksum fields.
pub(crate) fn validate_fields<R: Record>(record: &R, checksum: bool, count: bool) -> Result<()> {
    if count {
        if let (Some(stored), Some(computed)) = (record.count(), record.compute_count()) {
            if stored != computed {
                return Err(HexError::CountMismatch {
                    expected: computed,
                    actual: stored,
                });
            }
        }
    }

    if checksum {
        if let (Some(stored), Some(computed)) = (record.checksum(), record.compute_checksum()) {
            if stored != computed {
                return Err(HexError::ChecksumMismatch {
                    expected: computed,
                    actual: stored,
                });
            }
        }
    }

    Ok(())
}

/// Kind of a serialized record token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// Trivia before the canonical syntax.
    Before,
    /// Record start marker (`:`, `S`, `%`, `;`, ...).
    Begin,
    /// Count field digits.
    Count,
    /// Address field digits.
    Address,
    /// Address length nibble (Tektronix).
    AddrLen,
    /// Tag digits.
    Tag,
    /// Payload digits.
    Data,
    /// Checksum field digits.
    Checksum,
    /// Trivia after the canonical syntax.
    After,
    /// Line terminator.
    End,
    /// Trailing NUL padding (MOS Technology).
    Nuls,
}

/// Labeled slices of a serialized record, in serialization order.
pub type Tokens = Vec<(TokenKind, Vec<u8>)>;

const ANSI_RESET: &[u8] = b"\x1b[0m";

fn token_color(kind: TokenKind) -> &'static [u8] {
    match kind {
        TokenKind::Address => b"\x1b[31m",  // red
        TokenKind::AddrLen => b"\x1b[33m",  // yellow
        TokenKind::Begin => b"\x1b[33m",    // yellow
        TokenKind::Checksum => b"\x1b[35m", // magenta
        TokenKind::Count => b"\x1b[34m",    // blue
        TokenKind::Data => b"\x1b[36m",     // cyan
        TokenKind::Tag => b"\x1b[32m",      // green
        TokenKind::Before | TokenKind::After | TokenKind::End | TokenKind::Nuls => ANSI_RESET,
    }
}

const ANSI_DATA_ALT: &[u8] = b"\x1b[96m"; // bright cyan

/// Prepends ANSI color codes to record tokens and joins them.
///
/// With `altdata`, each payload byte (two hex digits) alternates between the
/// base and bright data colors.
pub fn colorize_tokens(tokens: &Tokens, altdata: bool) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(ANSI_RESET);

    for &(kind, ref text) in tokens {
        if text.is_empty() {
            continue;
        }
        if kind == TokenKind::Data && altdata {
            for (index, pair) in text.chunks(2).enumerate() {
                out.extend_from_slice(if index & 1 == 0 {
                    token_color(TokenKind::Data)
                } else {
                    ANSI_DATA_ALT
                });
                out.extend_from_slice(pair);
            }
        } else {
            out.extend_from_slice(token_color(kind));
            out.extend_from_slice(text);
        }
    }

    out.extend_from_slice(ANSI_RESET);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_init_resolve() {
        assert_eq!(FieldInit::Auto.resolve(|| Some(3)), Some(3));
        assert_eq!(FieldInit::Auto.resolve(|| None), None);
        assert_eq!(FieldInit::Absent.resolve(|| Some(3)), None);
        assert_eq!(FieldInit::Value(7).resolve(|| Some(3)), Some(7));
    }

    #[test]
    fn test_colorize_tokens_plain() {
        let tokens: Tokens = vec![
            (TokenKind::Begin, b":".to_vec()),
            (TokenKind::Count, b"00".to_vec()),
            (TokenKind::Data, Vec::new()),
            (TokenKind::End, b"\r\n".to_vec()),
        ];
        let out = colorize_tokens(&tokens, true);
        assert!(out.starts_with(ANSI_RESET));
        assert!(out.ends_with(ANSI_RESET));
        let text = String::from_utf8_lossy(&out);
        assert!(text.contains(":"));
        assert!(text.contains("00"));
    }

    #[test]
    fn test_colorize_tokens_altdata() {
        let tokens: Tokens = vec![(TokenKind::Data, b"616263".to_vec())];
        let out = colorize_tokens(&tokens, true);
        let text = String::from_utf8_lossy(&out);
        // Bytes alternate base and bright colors: 61 cyan, 62 bright, 63 cyan.
        assert_eq!(text.matches("\x1b[36m").count(), 2);
        assert_eq!(text.matches("\x1b[96m").count(), 1);
    }
}
