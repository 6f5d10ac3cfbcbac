//! TI-TXT format.
//!
//! Three record kinds on separate lines: `@<hex>` address markers,
//! whitespace-separated data byte pairs, and a final `q` terminator. Data
//! addresses are implicit: a cursor starts at zero, address markers move
//! it, data lines advance it.

use crate::codec::{self, hexlify};
use crate::error::{HexError, Result};
use crate::file::{parse_lines, Meta, ParseOpts, RecordFile};
use crate::memory::SparseMemory;
use crate::record::{
    validate_fields, FieldInit, Record, Tag, TokenKind, Tokens, NO_COORDS,
};

/// TI-TXT record tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TiTxtTag {
    /// Run of payload bytes at the stream cursor.
    Data = 0,
    /// `@` record setting the stream cursor.
    Address = 1,
    /// `q` terminator.
    Eof = 2,
}

impl TiTxtTag {
    /// Tells whether this is an address record tag.
    pub fn is_address(self) -> bool {
        self == TiTxtTag::Address
    }

    /// Tells whether this is the terminator tag.
    pub fn is_eof(self) -> bool {
        self == TiTxtTag::Eof
    }
}

impl Tag for TiTxtTag {
    fn is_data(self) -> bool {
        self == TiTxtTag::Data
    }

    fn is_file_termination(self) -> bool {
        self.is_eof()
    }
}

/// One TI-TXT record.
#[derive(Debug, Clone)]
pub struct TiTxtRecord {
    /// Record nature.
    pub tag: TiTxtTag,
    /// Effective address (stream cursor for data records).
    pub address: u64,
    /// Payload bytes.
    pub data: Vec<u8>,
    /// Address digit count for address records.
    pub count: Option<u32>,
    /// TI-TXT has no checksum field.
    pub checksum: Option<u32>,
    /// Trivia before the record; whitespace only.
    pub before: Vec<u8>,
    /// Trivia after the record; whitespace only.
    pub after: Vec<u8>,
    /// `(line, column)` parse coordinates.
    pub coords: (isize, isize),
}

impl PartialEq for TiTxtRecord {
    fn eq(&self, other: &Self) -> bool {
        self.tag == other.tag
            && self.address == other.address
            && self.data == other.data
            && self.count == other.count
            && self.checksum == other.checksum
    }
}

impl TiTxtRecord {
    /// Builds a record with explicit control over the count field.
    pub fn new(tag: TiTxtTag, address: u64, data: Vec<u8>, count: FieldInit) -> Result<Self> {
        let mut record = Self {
            tag,
            address,
            data,
            count: None,
            checksum: None,
            before: Vec::new(),
            after: Vec::new(),
            coords: NO_COORDS,
        };
        let count_value = count.resolve(|| record.compute_count());
        record.count = count_value;
        record.validate(false, count != FieldInit::Absent)?;
        Ok(record)
    }

    /// Creates an address record rendered with `addrlen` digits.
    pub fn create_address(address: u64, addrlen: u32) -> Result<Self> {
        Self::new(
            TiTxtTag::Address,
            address,
            Vec::new(),
            FieldInit::Value(addrlen),
        )
    }

    /// Creates a data record at an explicit stream address.
    pub fn create_data(address: u64, data: &[u8]) -> Result<Self> {
        Self::new(TiTxtTag::Data, address, data.to_vec(), FieldInit::Absent)
    }

    /// Creates the `q` terminator record.
    pub fn create_eof() -> Self {
        Self {
            tag: TiTxtTag::Eof,
            address: 0,
            data: Vec::new(),
            count: None,
            checksum: None,
            before: Vec::new(),
            after: Vec::new(),
            coords: NO_COORDS,
        }
    }
}

impl Record for TiTxtRecord {
    type Tag = TiTxtTag;

    fn tag(&self) -> TiTxtTag {
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
            .position(|byte| !byte.is_ascii_whitespace())
            .ok_or(HexError::Syntax { line: 0 })?;
        let before = line[..start].to_vec();
        let rest = &line[start..];

        let (record, consumed) = match rest[0] {
            b'@' => {
                let digits = codec::hex_run_len(&rest[1..]);
                if digits == 0 {
                    return Err(HexError::Syntax { line: 0 });
                }
                let address = codec::hex_value(&rest[1..1 + digits])?;
                let record = Self {
                    tag: TiTxtTag::Address,
                    address,
                    data: Vec::new(),
                    count: Some(digits as u32),
                    checksum: None,
                    before,
                    after: Vec::new(),
                    coords: NO_COORDS,
                };
                (record, 1 + digits)
            }
            b'q' => {
                let record = Self {
                    tag: TiTxtTag::Eof,
                    address: 0,
                    data: Vec::new(),
                    count: None,
                    checksum: None,
                    before,
                    after: Vec::new(),
                    coords: NO_COORDS,
                };
                (record, 1)
            }
            _ => {
                let mut data = Vec::new();
                let mut cursor = 0usize;
                loop {
                    let pair = &rest[cursor..];
                    if pair.len() < 2
                        || !pair[0].is_ascii_hexdigit()
                        || !pair[1].is_ascii_hexdigit()
                    {
                        break;
                    }
                    data.push(codec::hex_value(&pair[..2])? as u8);
                    cursor += 2;
                    if let Some(&separator) = rest.get(cursor) {
                        if separator == b' ' || separator == b'\t' {
                            cursor += 1;
                        }
                    }
                }
                if data.is_empty() {
                    return Err(HexError::Syntax { line: 0 });
                }
                let record = Self {
                    tag: TiTxtTag::Data,
                    address: 0,
                    data,
                    count: None,
                    checksum: None,
                    before,
                    after: Vec::new(),
                    coords: NO_COORDS,
                };
                (record, cursor)
            }
        };

        let tail = &rest[consumed..];
        if !tail.iter().all(|byte| byte.is_ascii_whitespace()) {
            return Err(HexError::Syntax { line: 0 });
        }

        record.validate(true, true)?;
        Ok(record)
    }

    fn to_bytestr(&self, end: &[u8]) -> Result<Vec<u8>> {
        self.validate(false, false)?;

        let mut out = Vec::new();
        out.extend_from_slice(&self.before);

        match self.tag {
            TiTxtTag::Address => {
                let digits = self.count.unwrap_or(1) as usize;
                let mask = if digits >= 16 {
                    u64::MAX
                } else {
                    (1u64 << (digits * 4)) - 1
                };
                out.push(b'@');
                codec::push_hex_digits(&mut out, self.address & mask, digits);
            }
            TiTxtTag::Eof => out.push(b'q'),
            TiTxtTag::Data => {
                if !self.data.is_empty() {
                    out.extend_from_slice(&hexlify(&self.data, Some(b' '), true));
                }
            }
        }

        out.extend_from_slice(&self.after);
        out.extend_from_slice(end);
        Ok(out)
    }

    fn to_tokens(&self, end: &[u8]) -> Result<Tokens> {
        self.validate(false, false)?;

        let mut begin = Vec::new();
        let mut address = Vec::new();
        let mut data = Vec::new();

        match self.tag {
            TiTxtTag::Address => {
                let digits = self.count.unwrap_or(1) as usize;
                let mask = if digits >= 16 {
                    u64::MAX
                } else {
                    (1u64 << (digits * 4)) - 1
                };
                address.push(b'@');
                codec::push_hex_digits(&mut address, self.address & mask, digits);
            }
            TiTxtTag::Eof => begin.push(b'q'),
            TiTxtTag::Data => {
                if !self.data.is_empty() {
                    data = hexlify(&self.data, Some(b' '), true);
                }
            }
        }

        Ok(vec![
            (TokenKind::Before, self.before.clone()),
            (TokenKind::Begin, begin),
            (TokenKind::Address, address),
            (TokenKind::Data, data),
            (TokenKind::After, self.after.clone()),
            (TokenKind::End, end.to_vec()),
        ])
    }

    fn compute_checksum(&self) -> Option<u32> {
        None
    }

    fn compute_count(&self) -> Option<u32> {
        // The count is the source digit width of the address field.
        if self.tag == TiTxtTag::Address {
            self.count
        } else {
            None
        }
    }

    fn validate(&self, checksum: bool, count: bool) -> Result<()> {
        validate_fields(self, checksum, count)?;

        if !self.after.is_empty() && !self.after.iter().all(u8::is_ascii_whitespace) {
            return Err(HexError::Trivia {
                message: "junk after",
            });
        }
        if !self.before.is_empty() && !self.before.iter().all(u8::is_ascii_whitespace) {
            return Err(HexError::Trivia {
                message: "junk before",
            });
        }

        if count {
            match self.count {
                None => {
                    if self.tag == TiTxtTag::Address {
                        return Err(HexError::MissingField { field: "count" });
                    }
                }
                Some(value) => {
                    let digits = 16 - (self.address.leading_zeros() / 4).min(15);
                    if value < digits {
                        return Err(HexError::FieldOverflow { field: "count" });
                    }
                }
            }
        }

        if !self.data.is_empty() && self.tag != TiTxtTag::Data {
            return Err(HexError::structural("unexpected data"));
        }

        Ok(())
    }
}

/// Structural validation knobs for [`TiTxtFile::validate_records_with`].
#[derive(Debug, Clone, Copy)]
pub struct TiTxtValidateOpts {
    /// Address records must not move the cursor backwards.
    pub data_ordering: bool,
    /// Addresses must be even (MSP430 flash rows are word aligned).
    pub address_even: bool,
}

impl Default for TiTxtValidateOpts {
    fn default() -> Self {
        Self {
            data_ordering: false,
            address_even: true,
        }
    }
}

/// TI-TXT record file.
#[derive(Debug, Clone)]
pub struct TiTxtFile {
    records: Option<Vec<TiTxtRecord>>,
    memory: Option<SparseMemory>,
    maxdatalen: usize,
}

impl Default for TiTxtFile {
    fn default() -> Self {
        Self {
            records: None,
            memory: Some(SparseMemory::new()),
            maxdatalen: Self::DEFAULT_DATALEN,
        }
    }
}

impl PartialEq for TiTxtFile {
    fn eq(&self, other: &Self) -> bool {
        self.file_eq(other)
    }
}

impl TiTxtFile {
    /// Rebuilds records from memory.
    ///
    /// An address record precedes every chunk that does not abut the
    /// previous data; the `q` terminator always comes last.
    pub fn build_records(&mut self, align: bool, addrlen: u32) -> Result<()> {
        if addrlen < 1 {
            return Err(HexError::meta("invalid address length"));
        }
        let memory = self.memory.as_ref().ok_or(HexError::Role {
            message: "memory instance required",
        })?;

        let chunks: Vec<(u64, Vec<u8>)> = memory
            .chop(self.maxdatalen, align)
            .map(|(address, chunk)| (address, chunk.to_vec()))
            .collect();

        let mut records = Vec::new();
        let mut last_data_endex = 0u64;

        for (chunk_start, chunk_data) in chunks {
            if chunk_start != last_data_endex {
                records.push(TiTxtRecord::create_address(chunk_start, addrlen)?);
            }
            last_data_endex = chunk_start + chunk_data.len() as u64;
            records.push(TiTxtRecord::create_data(chunk_start, &chunk_data)?);
        }

        records.push(TiTxtRecord::create_eof());

        self.records = Some(records);
        Ok(())
    }

    /// Structural validation with explicit knobs.
    pub fn validate_records_with(&mut self, opts: TiTxtValidateOpts) -> Result<()> {
        let records = self.records.as_ref().ok_or(HexError::Role {
            message: "records required",
        })?;

        let mut last_data_endex = 0u64;
        let mut eof_seen = false;

        for (index, record) in records.iter().enumerate() {
            record.validate(true, true)?;

            match record.tag {
                TiTxtTag::Address => {
                    if opts.address_even && record.address & 1 != 0 {
                        return Err(HexError::structural("address not even"));
                    }
                    if opts.data_ordering && record.address < last_data_endex {
                        return Err(HexError::structural("unordered data record"));
                    }
                    last_data_endex = record.address;
                }
                TiTxtTag::Eof => {
                    if index != records.len() - 1 {
                        return Err(HexError::structural("end of file record not last"));
                    }
                    eof_seen = true;
                }
                TiTxtTag::Data => last_data_endex += record.data.len() as u64,
            }
        }

        if !eof_seen {
            return Err(HexError::structural("missing end of file record"));
        }

        Ok(())
    }
}

impl RecordFile for TiTxtFile {
    type Record = TiTxtRecord;

    const FILE_EXT: &'static [&'static str] = &[".txt"];

    fn records_ref(&self) -> Option<&Vec<TiTxtRecord>> {
        self.records.as_ref()
    }

    fn records_slot(&mut self) -> &mut Option<Vec<TiTxtRecord>> {
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
        self.set_maxdatalen(meta.maxdatalen)
    }

    fn parse(data: &[u8], opts: ParseOpts) -> Result<Self> {
        let mut file: Self = parse_lines(data, opts)?;

        // Data addresses are implicit: replay the cursor over the records.
        if let Some(records) = &mut file.records {
            let mut cursor = 0u64;
            for record in records {
                match record.tag {
                    TiTxtTag::Data => {
                        record.address = cursor;
                        cursor += record.data.len() as u64;
                    }
                    TiTxtTag::Address => cursor = record.address,
                    TiTxtTag::Eof => {}
                }
            }
        }

        Ok(file)
    }

    fn apply_records(&mut self) -> Result<()> {
        let records = self.records.as_ref().ok_or(HexError::Role {
            message: "records required",
        })?;

        let mut memory = SparseMemory::new();
        for record in records {
            if Tag::is_data(record.tag) {
                memory.write(record.address, &record.data);
            }
        }

        self.memory = Some(memory);
        Ok(())
    }

    fn update_records(&mut self) -> Result<()> {
        self.build_records(false, 4)
    }

    fn validate_records(&mut self) -> Result<()> {
        self.validate_records_with(TiTxtValidateOpts::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_serialize_exact() {
        let mut file = TiTxtFile::from_blocks([(0x1C8_u64, b"abc".to_vec())]);
        file.set_maxdatalen(8).unwrap();

        let mut buffer = Vec::new();
        file.serialize(&mut buffer, b"\r\n").unwrap();
        assert_eq!(buffer, b"@01C8\r\n61 62 63\r\nq\r\n".to_vec());
    }

    #[test]
    fn test_parse_roundtrip() {
        let buffer = b"@01C8\r\n61 62 63\r\nq\r\n";
        let mut file = TiTxtFile::parse(buffer, ParseOpts::default()).unwrap();
        assert_eq!(
            file.memory().unwrap().to_blocks(),
            [(0x1C8, b"abc".to_vec())]
        );
    }

    #[test]
    fn test_parse_implicit_cursor() {
        let buffer = b"@1000\r\n01 02 03 04\r\n05 06\r\n@2000\r\n11 12\r\nq\r\n";
        let mut file = TiTxtFile::parse(buffer, ParseOpts::default()).unwrap();
        assert_eq!(
            file.memory().unwrap().to_blocks(),
            [
                (0x1000, b"\x01\x02\x03\x04\x05\x06".to_vec()),
                (0x2000, b"\x11\x12".to_vec()),
            ]
        );
    }

    #[test]
    fn test_terminator_required() {
        let buffer = b"@1000\r\n01 02\r\n";
        let mut file = TiTxtFile::parse(buffer, ParseOpts::default()).unwrap();
        assert!(matches!(
            file.validate_records(),
            Err(HexError::Structural { .. })
        ));
    }

    #[test]
    fn test_terminator_stops_parse() {
        let buffer = b"@1000\r\n01 02\r\nq\r\n03 04\r\n";
        let mut file = TiTxtFile::parse(buffer, ParseOpts::default()).unwrap();
        assert_eq!(file.records().unwrap().len(), 3);
    }

    #[test]
    fn test_validate_address_even() {
        let buffer = b"@1001\r\n01 02\r\nq\r\n";
        let mut file = TiTxtFile::parse(buffer, ParseOpts::default()).unwrap();
        assert!(file.validate_records().is_err());

        file.validate_records_with(TiTxtValidateOpts {
            address_even: false,
            ..Default::default()
        })
        .unwrap();
    }

    #[test]
    fn test_parse_syntax_error() {
        assert!(TiTxtRecord::parse(b"@\r\n").is_err());
        assert!(TiTxtRecord::parse(b"zz\r\n").is_err());
        assert!(TiTxtRecord::parse(b"61 xx\r\n").is_err());
    }

    #[test]
    fn test_update_records_address_only_when_needed() {
        let mut file = TiTxtFile::from_blocks([(0_u64, b"ab".to_vec()), (0x10, b"cd".to_vec())]);
        let records = file.records().unwrap();
        let kinds: Vec<TiTxtTag> = records.iter().map(|record| record.tag).collect();
        assert_eq!(
            kinds,
            [
                TiTxtTag::Data,
                TiTxtTag::Address,
                TiTxtTag::Data,
                TiTxtTag::Eof,
            ]
        );
    }
}
