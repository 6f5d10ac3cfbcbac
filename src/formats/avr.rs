//! Atmel generic (AVR) format.
//!
//! Line grammar: `AAAAAA:DDDD` — a 24-bit word address, a colon, and
//! exactly one 16-bit data word. The effective byte address is twice the
//! word address; both decoding and encoding enforce word alignment.

use crate::codec::{self, hexlify};
use crate::error::{HexError, Result};
use crate::file::{Meta, RecordFile};
use crate::memory::SparseMemory;
use crate::record::{validate_fields, Record, Tag, TokenKind, Tokens, NO_COORDS};

/// Atmel generic record tags; data is the only record nature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AvrTag {
    /// One 16-bit word at a 24-bit word address.
    Data,
}

impl Tag for AvrTag {
    fn is_data(self) -> bool {
        true
    }
}

/// One Atmel generic record.
#[derive(Debug, Clone)]
pub struct AvrRecord {
    /// Record nature.
    pub tag: AvrTag,
    /// 24-bit word address.
    pub address: u64,
    /// Exactly one 16-bit word.
    pub data: Vec<u8>,
    /// Atmel generic has no count field.
    pub count: Option<u32>,
    /// Atmel generic has no checksum field.
    pub checksum: Option<u32>,
    /// Trivia before the address; whitespace only.
    pub before: Vec<u8>,
    /// Trivia after the data; whitespace only.
    pub after: Vec<u8>,
    /// `(line, column)` parse coordinates.
    pub coords: (isize, isize),
}

impl PartialEq for AvrRecord {
    fn eq(&self, other: &Self) -> bool {
        self.tag == other.tag
            && self.address == other.address
            && self.data == other.data
            && self.count == other.count
            && self.checksum == other.checksum
    }
}

impl AvrRecord {
    /// Builds a record; count and checksum are always absent.
    pub fn new(address: u64, data: Vec<u8>) -> Result<Self> {
        let record = Self {
            tag: AvrTag::Data,
            address,
            data,
            count: None,
            checksum: None,
            before: Vec::new(),
            after: Vec::new(),
            coords: NO_COORDS,
        };
        record.validate(true, true)?;
        Ok(record)
    }

    /// Creates a data record holding one word.
    pub fn create_data(address: u64, data: &[u8]) -> Result<Self> {
        if address > 0xFF_FFFF {
            return Err(HexError::FieldOverflow { field: "address" });
        }
        if data.len() != 2 {
            return Err(HexError::FieldOverflow { field: "data size" });
        }
        Self::new(address, data.to_vec())
    }
}

impl Record for AvrRecord {
    type Tag = AvrTag;

    fn tag(&self) -> AvrTag {
        self.tag
    }

    fn address(&self) -> u64 {
        self.address
    }

    fn data(&self) -> &[u8] {
        &self.data
    }

    fn count(&self) -> Option<u32> {
        self.count
    }

    fn checksum(&self) -> Option<u32> {
        self.checksum
    }

    fn coords(&self) -> (isize, isize) {
        self.coords
    }

    fn set_coords(&mut self, coords: (isize, isize)) {
        self.coords = coords;
    }

    fn parse(line: &[u8]) -> Result<Self> {
        let start = line
            .iter()
            .position(|&byte| byte != b' ' && byte != b'\t')
            .ok_or(HexError::Syntax { line: 0 })?;
        let before = line[..start].to_vec();
        let rest = &line[start..];

        if rest.len() < 7 || codec::hex_run_len(rest) < 6 {
            return Err(HexError::Syntax { line: 0 });
        }
        let address = codec::hex_value(&rest[..6])?;

        let mut cursor = 6;
        while rest.get(cursor) == Some(&b' ') || rest.get(cursor) == Some(&b'\t') {
            cursor += 1;
        }
        if rest.get(cursor) != Some(&b':') {
            return Err(HexError::Syntax { line: 0 });
        }
        cursor += 1;
        while rest.get(cursor) == Some(&b' ') || rest.get(cursor) == Some(&b'\t') {
            cursor += 1;
        }

        let digits = &rest[cursor..];
        if codec::hex_run_len(digits) < 4 {
            return Err(HexError::Syntax { line: 0 });
        }
        let data = codec::unhexlify(&digits[..4])?;
        cursor += 4;

        let mut after = &rest[cursor..];
        if let Some(position) = memchr::memchr2(b'\r', b'\n', after) {
            let terminator = &after[position..];
            if !matches!(terminator, b"\r" | b"\n" | b"\r\n") {
                return Err(HexError::Syntax { line: 0 });
            }
            after = &after[..position];
        }
        if !after.iter().all(|&byte| byte == b' ' || byte == b'\t') {
            return Err(HexError::Syntax { line: 0 });
        }

        let record = Self {
            tag: AvrTag::Data,
            address,
            data,
            count: None,
            checksum: None,
            before,
            after: after.to_vec(),
            coords: NO_COORDS,
        };
        record.validate(true, true)?;
        Ok(record)
    }

    fn to_bytestr(&self, end: &[u8]) -> Result<Vec<u8>> {
        self.validate(true, true)?;

        let mut out = Vec::with_capacity(self.before.len() + 11);
        out.extend_from_slice(&self.before);
        codec::push_hex_digits(&mut out, self.address, 6);
        out.push(b':');
        out.extend_from_slice(&hexlify(&self.data, None, true));
        out.extend_from_slice(&self.after);
        out.extend_from_slice(end);
        Ok(out)
    }

    fn to_tokens(&self, end: &[u8]) -> Result<Tokens> {
        self.validate(true, true)?;

        let mut address = Vec::new();
        codec::push_hex_digits(&mut address, self.address, 6);

        Ok(vec![
            (TokenKind::Before, self.before.clone()),
            (TokenKind::Address, address),
            (TokenKind::Begin, b":".to_vec()),
            (TokenKind::Data, hexlify(&self.data, None, true)),
            (TokenKind::After, self.after.clone()),
            (TokenKind::End, end.to_vec()),
        ])
    }

    fn compute_checksum(&self) -> Option<u32> {
        None
    }

    fn compute_count(&self) -> Option<u32> {
        None
    }

    fn validate(&self, checksum: bool, count: bool) -> Result<()> {
        validate_fields(self, checksum, count)?;

        if !self.after.is_empty() && !self.after.iter().all(u8::is_ascii_whitespace) {
            return Err(HexError::Trivia {
                message: "junk after is not whitespace",
            });
        }
        if !self.before.is_empty() && !self.before.iter().all(u8::is_ascii_whitespace) {
            return Err(HexError::Trivia {
                message: "junk before is not whitespace",
            });
        }
        if self.data.len() != 2 {
            return Err(HexError::FieldOverflow { field: "data size" });
        }
        if self.address > 0xFF_FFFF {
            return Err(HexError::FieldOverflow { field: "address" });
        }

        Ok(())
    }
}

/// Atmel generic record file.
#[derive(Debug, Clone)]
pub struct AvrFile {
    records: Option<Vec<AvrRecord>>,
    memory: Option<SparseMemory>,
    maxdatalen: usize,
}

impl Default for AvrFile {
    fn default() -> Self {
        Self {
            records: None,
            memory: Some(SparseMemory::new()),
            maxdatalen: Self::DEFAULT_DATALEN,
        }
    }
}

impl PartialEq for AvrFile {
    fn eq(&self, other: &Self) -> bool {
        self.file_eq(other)
    }
}

impl AvrFile {
    /// Structural validation with explicit data ordering.
    pub fn validate_records_with(&mut self, data_ordering: bool) -> Result<()> {
        let records = self.records.as_ref().ok_or(HexError::Role {
            message: "records required",
        })?;

        let mut last_data_endex = 0u64;
        for record in records {
            record.validate(true, true)?;

            if data_ordering {
                let byte_address = record.address * 2;
                if byte_address < last_data_endex {
                    return Err(HexError::structural("unordered data record"));
                }
                last_data_endex = byte_address + record.data.len() as u64;
            }
        }

        Ok(())
    }
}

impl RecordFile for AvrFile {
    type Record = AvrRecord;

    const DEFAULT_DATALEN: usize = 2;

    const FILE_EXT: &'static [&'static str] = &[".rom"];

    fn records_ref(&self) -> Option<&Vec<AvrRecord>> {
        self.records.as_ref()
    }

    fn records_slot(&mut self) -> &mut Option<Vec<AvrRecord>> {
        &mut self.records
    }

    fn memory_ref(&self) -> Option<&SparseMemory> {
        self.memory.as_ref()
    }

    fn memory_slot(&mut self) -> &mut Option<SparseMemory> {
        &mut self.memory
    }

    fn maxdatalen(&self) -> usize {
        self.maxdatalen
    }

    fn maxdatalen_slot(&mut self) -> &mut usize {
        &mut self.maxdatalen
    }

    fn meta(&self) -> Meta {
        Meta {
            maxdatalen: self.maxdatalen,
            startaddr: None,
            header: None,
            linear: None,
        }
    }

    fn set_meta(&mut self, meta: &Meta) -> Result<()> {
        if meta.maxdatalen != 2 {
            return Err(HexError::meta("invalid maximum data length"));
        }
        Ok(())
    }

    fn apply_records(&mut self) -> Result<()> {
        let records = self.records.as_ref().ok_or(HexError::Role {
            message: "records required",
        })?;

        let mut memory = SparseMemory::new();
        for record in records {
            memory.write(record.address * 2, &record.data);
        }

        self.memory = Some(memory);
        Ok(())
    }

    fn update_records(&mut self) -> Result<()> {
        let memory = self.memory.as_ref().ok_or(HexError::Role {
            message: "memory instance required",
        })?;
        if self.maxdatalen != 2 {
            return Err(HexError::meta("invalid maximum data length"));
        }

        let chunks: Vec<(u64, Vec<u8>)> = memory
            .chop(2, false)
            .map(|(address, chunk)| (address, chunk.to_vec()))
            .collect();

        let mut records = Vec::new();
        for (chunk_start, chunk_data) in chunks {
            if chunk_start & 1 != 0 {
                return Err(HexError::structural("invalid word alignment"));
            }
            if chunk_data.len() != 2 {
                return Err(HexError::structural("invalid word size"));
            }
            records.push(AvrRecord::create_data(chunk_start / 2, &chunk_data)?);
        }

        self.records = Some(records);
        Ok(())
    }

    fn validate_records(&mut self) -> Result<()> {
        self.validate_records_with(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::ParseOpts;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_word_alignment_encoding() {
        let mut file = AvrFile::from_bytes(b"abcd", 124);
        let mut buffer = Vec::new();
        file.serialize(&mut buffer, b"\r\n").unwrap();
        assert_eq!(buffer, b"00003E:6162\r\n00003F:6364\r\n".to_vec());
    }

    #[test]
    fn test_odd_start_rejected() {
        let mut file = AvrFile::from_bytes(b"ab", 125);
        assert!(matches!(
            file.update_records(),
            Err(HexError::Structural { .. })
        ));
    }

    #[test]
    fn test_odd_size_rejected() {
        let mut file = AvrFile::from_bytes(b"abc", 124);
        assert!(file.update_records().is_err());
    }

    #[test]
    fn test_parse_roundtrip() {
        let buffer = b"00003E:6162\r\n00003F:6364\r\n";
        let mut file = AvrFile::parse(buffer, ParseOpts::default()).unwrap();
        assert_eq!(file.memory().unwrap().to_blocks(), [(124, b"abcd".to_vec())]);
    }

    #[test]
    fn test_parse_spacing_variants() {
        let record = AvrRecord::parse(b"  00003E : 6162 \r\n").unwrap();
        assert_eq!(record.address, 0x3E);
        assert_eq!(record.data, b"ab");
    }

    #[test]
    fn test_parse_rejects() {
        assert!(AvrRecord::parse(b"00003E:61\r\n").is_err());
        assert!(AvrRecord::parse(b"003E:6162\r\n").is_err());
        assert!(AvrRecord::parse(b"00003E 6162\r\n").is_err());
    }

    #[test]
    fn test_create_data_bounds() {
        assert!(AvrRecord::create_data(0x100_0000, b"ab").is_err());
        assert!(AvrRecord::create_data(0, b"abc").is_err());
    }

    #[test]
    fn test_validate_ordering() {
        let records = vec![
            AvrRecord::create_data(2, b"ab").unwrap(),
            AvrRecord::create_data(1, b"cd").unwrap(),
        ];
        let mut file = AvrFile::from_records(records, Some(2)).unwrap();
        file.validate_records().unwrap();
        assert!(file.validate_records_with(true).is_err());
    }
}
