//! ASCII-HEX format.
//!
//! The stream is a run of 2-digit data bytes with optional execution
//! characters between them, interleaved with `$A<hex>,` address records and
//! `$S<hex>,` running-checksum records, the whole framed between STX (0x02)
//! and ETX (0x03) bytes. Data addresses are implicit: a stream cursor
//! starts at zero, address records move it, data records advance it.

use crate::codec::{self, hexlify};
use crate::error::{HexError, Result};
use crate::file::{Meta, ParseOpts, RecordFile};
use crate::memory::SparseMemory;
use crate::record::{
    validate_fields, FieldInit, Record, Tag, TokenKind, Tokens, NO_COORDS,
};

/// ASCII-HEX record tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AsciiHexTag {
    /// Run of payload bytes at the stream cursor.
    Data = 0,
    /// `$A` record setting the stream cursor.
    Address = 1,
    /// `$S` record carrying the running 16-bit data checksum.
    Checksum = 2,
}

impl AsciiHexTag {
    /// Tells whether this is an address record tag.
    pub fn is_address(self) -> bool {
        self == AsciiHexTag::Address
    }

    /// Tells whether this is a checksum record tag.
    pub fn is_checksum(self) -> bool {
        self == AsciiHexTag::Checksum
    }
}

impl Tag for AsciiHexTag {
    fn is_data(self) -> bool {
        self == AsciiHexTag::Data
    }
}

/// Execution characters tolerated between serialized data bytes.
pub const DATA_EXECHARS: &[u8] = b" \t\x0B\x0C\r%',";

/// One ASCII-HEX record.
#[derive(Debug, Clone)]
pub struct AsciiHexRecord {
    /// Record nature.
    pub tag: AsciiHexTag,
    /// Effective address (stream cursor for data records).
    pub address: u64,
    /// Payload bytes.
    pub data: Vec<u8>,
    /// Address digit count for address records.
    pub count: Option<u32>,
    /// Running 16-bit checksum for checksum records.
    pub checksum: Option<u32>,
    /// Trivia before the record; whitespace only.
    pub before: Vec<u8>,
    /// Trivia after the record; whitespace only.
    pub after: Vec<u8>,
    /// `(start, end)` byte offsets of the record within the stream.
    pub coords: (isize, isize),
}

impl PartialEq for AsciiHexRecord {
    fn eq(&self, other: &Self) -> bool {
        self.tag == other.tag
            && self.address == other.address
            && self.data == other.data
            && self.count == other.count
            && self.checksum == other.checksum
    }
}

impl AsciiHexRecord {
    /// Builds a record with explicit control over the consistency fields.
    pub fn new(
        tag: AsciiHexTag,
        address: u64,
        data: Vec<u8>,
        count: FieldInit,
        checksum: FieldInit,
    ) -> Result<Self> {
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
        let checksum_value = checksum.resolve(|| record.compute_checksum());
        record.checksum = checksum_value;

        let check_count = count != FieldInit::Absent;
        let check_checksum = checksum != FieldInit::Absent && check_count;
        record.validate(check_checksum, check_count)?;
        Ok(record)
    }

    /// Creates an address record rendered with `addrlen` digits.
    pub fn create_address(address: u64, addrlen: u32) -> Result<Self> {
        Self::new(
            AsciiHexTag::Address,
            address,
            Vec::new(),
            FieldInit::Value(addrlen),
            FieldInit::Absent,
        )
    }

    /// Creates a checksum record.
    pub fn create_checksum(checksum: u16) -> Result<Self> {
        Self::new(
            AsciiHexTag::Checksum,
            0,
            Vec::new(),
            FieldInit::Absent,
            FieldInit::Value(u32::from(checksum)),
        )
    }

    /// Creates a data record at an explicit stream address.
    pub fn create_data(address: u64, data: &[u8]) -> Result<Self> {
        Self::new(
            AsciiHexTag::Data,
            address,
            data.to_vec(),
            FieldInit::Absent,
            FieldInit::Absent,
        )
    }

    /// Parses one record from the head of `chunk`, the stream cursor being
    /// at `address`. Returns the record and the consumed byte count.
    pub fn parse_at(chunk: &[u8], address: u64) -> Result<(Self, usize)> {
        let mut offset = 0usize;
        while offset < chunk.len() && chunk[offset].is_ascii_whitespace() {
            offset += 1;
        }
        let rest = &chunk[offset..];

        let (record, consumed) = if rest.first() == Some(&b'$') {
            let kind = *rest.get(1).ok_or(HexError::Syntax { line: 0 })?;
            let digits = codec::hex_run_len(&rest[2..]);
            if digits == 0 {
                return Err(HexError::Syntax { line: 0 });
            }
            let value = codec::hex_value(&rest[2..2 + digits])?;
            match rest.get(2 + digits) {
                Some(&b',') | Some(&b'.') => {}
                _ => return Err(HexError::Syntax { line: 0 }),
            }
            let consumed = 2 + digits + 1;

            match kind {
                b'A' | b'a' => {
                    let record = Self {
                        tag: AsciiHexTag::Address,
                        address: value,
                        data: Vec::new(),
                        count: Some(digits as u32),
                        checksum: None,
                        before: Vec::new(),
                        after: Vec::new(),
                        coords: NO_COORDS,
                    };
                    (record, consumed)
                }
                b'S' | b's' => {
                    let record = Self {
                        tag: AsciiHexTag::Checksum,
                        address,
                        data: Vec::new(),
                        count: None,
                        checksum: Some(value as u32),
                        before: Vec::new(),
                        after: Vec::new(),
                        coords: NO_COORDS,
                    };
                    (record, consumed)
                }
                _ => return Err(HexError::Syntax { line: 0 }),
            }
        } else {
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
                if let Some(&exechar) = rest.get(cursor) {
                    if DATA_EXECHARS.contains(&exechar) {
                        cursor += 1;
                    }
                }
            }
            if data.is_empty() {
                return Err(HexError::Syntax { line: 0 });
            }

            let record = Self {
                tag: AsciiHexTag::Data,
                address,
                data,
                count: None,
                checksum: None,
                before: Vec::new(),
                after: Vec::new(),
                coords: NO_COORDS,
            };
            (record, cursor)
        };

        let mut end = offset + consumed;
        while end < chunk.len() && chunk[end].is_ascii_whitespace() {
            end += 1;
        }

        record.validate(true, true)?;
        let mut record = record;
        record.coords = (offset as isize, end as isize);
        Ok((record, end))
    }

    /// Serializes with explicit control over execution characters and the
    /// `$` record terminator.
    pub fn to_bytestr_opts(
        &self,
        exechar: u8,
        exelast: bool,
        dollarend: u8,
        end: &[u8],
    ) -> Result<Vec<u8>> {
        self.validate(false, false)?;

        let mut out = Vec::new();
        out.extend_from_slice(&self.before);

        match self.tag {
            AsciiHexTag::Address => {
                let digits = self.count.unwrap_or(1) as usize;
                let mask = if digits >= 16 {
                    u64::MAX
                } else {
                    (1u64 << (digits * 4)) - 1
                };
                out.extend_from_slice(b"$A");
                codec::push_hex_digits(&mut out, self.address & mask, digits);
                out.push(dollarend);
            }
            AsciiHexTag::Checksum => {
                out.extend_from_slice(b"$S");
                codec::push_hex_u16(&mut out, self.checksum.unwrap_or(0) as u16);
                out.push(dollarend);
            }
            AsciiHexTag::Data => {
                if !self.data.is_empty() {
                    out.extend_from_slice(&hexlify(&self.data, Some(exechar), true));
                    if exelast {
                        out.push(exechar);
                    }
                }
            }
        }

        out.extend_from_slice(&self.after);
        out.extend_from_slice(end);
        Ok(out)
    }
}

impl Record for AsciiHexRecord {
    type Tag = AsciiHexTag;

    fn tag(&self) -> AsciiHexTag {
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
        let (record, _) = Self::parse_at(line, 0)?;
        Ok(record)
    }

    fn to_bytestr(&self, end: &[u8]) -> Result<Vec<u8>> {
        self.to_bytestr_opts(b' ', true, b',', end)
    }

    fn to_tokens(&self, end: &[u8]) -> Result<Tokens> {
        self.validate(false, false)?;

        let mut address = Vec::new();
        let mut checksum = Vec::new();
        let mut data = Vec::new();

        match self.tag {
            AsciiHexTag::Address => {
                let digits = self.count.unwrap_or(1) as usize;
                let mask = if digits >= 16 {
                    u64::MAX
                } else {
                    (1u64 << (digits * 4)) - 1
                };
                address.extend_from_slice(b"$A");
                codec::push_hex_digits(&mut address, self.address & mask, digits);
                address.push(b',');
            }
            AsciiHexTag::Checksum => {
                checksum.extend_from_slice(b"$S");
                codec::push_hex_u16(&mut checksum, self.checksum.unwrap_or(0) as u16);
                checksum.push(b',');
            }
            AsciiHexTag::Data => {
                if !self.data.is_empty() {
                    data = hexlify(&self.data, Some(b' '), true);
                    data.push(b' ');
                }
            }
        }

        Ok(vec![
            (TokenKind::Before, self.before.clone()),
            (TokenKind::Address, address),
            (TokenKind::Data, data),
            (TokenKind::Checksum, checksum),
            (TokenKind::After, self.after.clone()),
            (TokenKind::End, end.to_vec()),
        ])
    }

    fn compute_checksum(&self) -> Option<u32> {
        // The $S value is a whole-stream property, not derivable from one
        // record; it is kept as stored.
        if self.tag == AsciiHexTag::Checksum {
            self.checksum
        } else {
            None
        }
    }

    fn compute_count(&self) -> Option<u32> {
        // The count is the source digit width of the address field.
        if self.tag == AsciiHexTag::Address {
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

        if checksum {
            match self.checksum {
                None => {
                    if self.tag == AsciiHexTag::Checksum {
                        return Err(HexError::MissingField { field: "checksum" });
                    }
                }
                Some(value) => {
                    if value > 0xFFFF {
                        return Err(HexError::FieldOverflow { field: "checksum" });
                    }
                }
            }
        }

        if count {
            match self.count {
                None => {
                    if self.tag == AsciiHexTag::Address {
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

        if !self.data.is_empty() && self.tag != AsciiHexTag::Data {
            return Err(HexError::structural("unexpected data"));
        }

        Ok(())
    }
}

/// Structural validation knobs for
/// [`AsciiHexFile::validate_records_with`].
#[derive(Debug, Clone, Copy)]
pub struct AsciiHexValidateOpts {
    /// Address records must not move the cursor backwards.
    pub data_ordering: bool,
    /// `$S` records must match the running data checksum.
    pub checksum_values: bool,
}

impl Default for AsciiHexValidateOpts {
    fn default() -> Self {
        Self {
            data_ordering: false,
            checksum_values: true,
        }
    }
}

/// ASCII-HEX record file.
#[derive(Debug, Clone)]
pub struct AsciiHexFile {
    records: Option<Vec<AsciiHexRecord>>,
    memory: Option<SparseMemory>,
    maxdatalen: usize,
}

impl Default for AsciiHexFile {
    fn default() -> Self {
        Self {
            records: None,
            memory: Some(SparseMemory::new()),
            maxdatalen: Self::DEFAULT_DATALEN,
        }
    }
}

impl PartialEq for AsciiHexFile {
    fn eq(&self, other: &Self) -> bool {
        self.file_eq(other)
    }
}

impl AsciiHexFile {
    /// Parses the stream with explicit framing control.
    ///
    /// With `stxetx`, the records live between the first STX byte and the
    /// following ETX byte; both must be present. Without it, the whole
    /// stream is scanned.
    pub fn parse_opts(data: &[u8], ignore_errors: bool, stxetx: bool) -> Result<Self> {
        let (start, endex) = if stxetx {
            let stx = memchr::memchr(0x02, data)
                .ok_or_else(|| HexError::structural("missing STX character"))?;
            let etx = memchr::memchr(0x03, &data[stx + 1..])
                .map(|position| stx + 1 + position)
                .ok_or_else(|| HexError::structural("missing ETX character"))?;
            (stx + 1, etx)
        } else {
            (0, data.len())
        };

        let mut records = Vec::new();
        let mut offset = start;
        let mut address = 0u64;

        while offset < endex {
            let chunk = &data[offset..endex];
            if chunk.iter().all(|byte| byte.is_ascii_whitespace()) {
                break;
            }
            let (mut record, consumed) = match AsciiHexRecord::parse_at(chunk, address) {
                Ok(parsed) => parsed,
                Err(error) => {
                    if ignore_errors {
                        offset += 1;
                        continue;
                    }
                    return Err(error);
                }
            };
            let (pos, endpos) = record.coords;
            record.coords = (pos + offset as isize, endpos + offset as isize);
            address = record.address + record.data.len() as u64;
            records.push(record);
            offset += consumed;
        }

        Self::from_records(records, None)
    }

    /// Serializes with explicit framing and separator control.
    pub fn serialize_opts<W: std::io::Write>(
        &mut self,
        stream: &mut W,
        exechar: u8,
        exelast: bool,
        dollarend: u8,
        end: &[u8],
        stxetx: bool,
    ) -> Result<()> {
        if stxetx {
            stream.write_all(b"\x02")?;
        }
        for record in self.records()? {
            stream.write_all(&record.to_bytestr_opts(exechar, exelast, dollarend, end)?)?;
        }
        if stxetx {
            stream.write_all(b"\x03")?;
        }
        Ok(())
    }

    /// Rebuilds records from memory.
    ///
    /// An address record precedes every chunk that does not abut the
    /// previous data; with `checksum`, a final `$S` record carries the
    /// running 16-bit sum of all data bytes.
    pub fn build_records(&mut self, align: bool, checksum: bool, addrlen: u32) -> Result<()> {
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
        let mut file_checksum = 0u32;

        for (chunk_start, chunk_data) in chunks {
            if checksum {
                let sum: u32 = chunk_data.iter().map(|&byte| u32::from(byte)).sum();
                file_checksum = (file_checksum + sum) & 0xFFFF;
            }

            if chunk_start != last_data_endex {
                records.push(AsciiHexRecord::create_address(chunk_start, addrlen)?);
            }
            last_data_endex = chunk_start + chunk_data.len() as u64;
            records.push(AsciiHexRecord::create_data(chunk_start, &chunk_data)?);
        }

        if checksum {
            records.push(AsciiHexRecord::create_checksum(file_checksum as u16)?);
        }

        self.records = Some(records);
        Ok(())
    }

    /// Structural validation with explicit knobs.
    pub fn validate_records_with(&mut self, opts: AsciiHexValidateOpts) -> Result<()> {
        let records = self.records.as_ref().ok_or(HexError::Role {
            message: "records required",
        })?;

        let mut last_data_endex = 0u64;
        let mut file_checksum = 0u32;

        for record in records {
            record.validate(true, true)?;

            match record.tag {
                AsciiHexTag::Address => {
                    if opts.data_ordering && record.address < last_data_endex {
                        return Err(HexError::structural("unordered data record"));
                    }
                    last_data_endex = record.address;
                }
                AsciiHexTag::Checksum => {
                    if opts.checksum_values && record.checksum != Some(file_checksum) {
                        return Err(HexError::structural("wrong checksum"));
                    }
                }
                AsciiHexTag::Data => {
                    last_data_endex += record.data.len() as u64;
                    let sum: u32 = record.data.iter().map(|&byte| u32::from(byte)).sum();
                    file_checksum = (file_checksum + sum) & 0xFFFF;
                }
            }
        }

        Ok(())
    }
}

impl RecordFile for AsciiHexFile {
    type Record = AsciiHexRecord;

    const FILE_EXT: &'static [&'static str] = &[];

    fn records_ref(&self) -> Option<&Vec<AsciiHexRecord>> {
        self.records.as_ref()
    }

    fn records_slot(&mut self) -> &mut Option<Vec<AsciiHexRecord>> {
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
        Self::parse_opts(data, opts.ignore_errors, true)
    }

    fn serialize<W: std::io::Write>(&mut self, stream: &mut W, end: &[u8]) -> Result<()> {
        self.serialize_opts(stream, b' ', true, b',', end, true)
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
        self.build_records(false, false, 8)
    }

    fn validate_records(&mut self) -> Result<()> {
        self.validate_records_with(AsciiHexValidateOpts::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_framed_stream() {
        let buffer = b"\x02 61 62 63 \r\n$A1234,\r\n78 79 7A \r\n\x03";
        let mut file = AsciiHexFile::parse(buffer, ParseOpts::default()).unwrap();
        assert_eq!(
            file.memory().unwrap().to_blocks(),
            [(0, b"abc".to_vec()), (0x1234, b"xyz".to_vec())]
        );
    }

    #[test]
    fn test_parse_missing_stx() {
        let buffer = b"61 62 63";
        assert!(AsciiHexFile::parse(buffer, ParseOpts::default()).is_err());

        let file = AsciiHexFile::parse_opts(buffer, false, false).unwrap();
        assert_eq!(file.records_ref().unwrap().len(), 1);
    }

    #[test]
    fn test_parse_checksum_record() {
        let buffer = b"\x0261 62 63 $S0126,\x03";
        let mut file = AsciiHexFile::parse(buffer, ParseOpts::default()).unwrap();
        file.validate_records().unwrap();
        let records = file.records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].tag, AsciiHexTag::Checksum);
        assert_eq!(records[1].checksum, Some(0x126));
    }

    #[test]
    fn test_validate_wrong_checksum() {
        let buffer = b"\x0261 62 63 $S0127,\x03";
        let mut file = AsciiHexFile::parse(buffer, ParseOpts::default()).unwrap();
        assert!(matches!(
            file.validate_records(),
            Err(HexError::Structural { .. })
        ));
    }

    #[test]
    fn test_serialize_roundtrip() {
        let mut file =
            AsciiHexFile::from_blocks([(0_u64, b"abc".to_vec()), (0x1234, b"xyz".to_vec())]);
        let mut buffer = Vec::new();
        file.serialize(&mut buffer, b"\r\n").unwrap();
        assert!(buffer.starts_with(b"\x02"));
        assert!(buffer.ends_with(b"\x03"));

        let mut parsed = AsciiHexFile::parse(&buffer, ParseOpts::default()).unwrap();
        assert_eq!(parsed.memory().unwrap(), file.memory().unwrap());
    }

    #[test]
    fn test_update_records_with_checksum() {
        let mut file = AsciiHexFile::from_bytes(b"abc", 0);
        file.build_records(false, true, 4).unwrap();
        let records = file.records_ref().unwrap();
        assert_eq!(records.last().unwrap().tag, AsciiHexTag::Checksum);
        assert_eq!(records.last().unwrap().checksum, Some(0x126));
    }

    #[test]
    fn test_update_records_address_only_when_needed() {
        let mut file =
            AsciiHexFile::from_blocks([(0_u64, b"ab".to_vec()), (2, b"cd".to_vec()), (10, b"e".to_vec())]);
        let records = file.records().unwrap();
        // Blocks 0 and 2 merge into one contiguous chunk; only the block at
        // 10 needs an address record.
        let addresses: Vec<u64> = records
            .iter()
            .filter(|record| record.tag == AsciiHexTag::Address)
            .map(|record| record.address)
            .collect();
        assert_eq!(addresses, [10]);
    }

    #[test]
    fn test_separator_variants() {
        let buffer = b"\x0261'62'63 \x03";
        let mut file = AsciiHexFile::parse(buffer, ParseOpts::default()).unwrap();
        assert_eq!(file.memory().unwrap().to_blocks(), [(0, b"abc".to_vec())]);
    }

    #[test]
    fn test_address_record_digit_count() {
        let record = AsciiHexRecord::create_address(0x1234, 8).unwrap();
        assert_eq!(record.to_bytestr(b"\r\n").unwrap(), b"$A00001234,\r\n");
        assert_eq!(record.count, Some(8));
    }

    #[test]
    fn test_address_count_too_small() {
        assert!(AsciiHexRecord::create_address(0x1234, 2).is_err());
    }

    #[test]
    fn test_ignore_errors_resyncs() {
        let buffer = b"\x02$Zoops,61 62 \x03";
        assert!(AsciiHexFile::parse(buffer, ParseOpts::default()).is_err());

        let opts = ParseOpts {
            ignore_errors: true,
            ..Default::default()
        };
        let mut file = AsciiHexFile::parse(buffer, opts).unwrap();
        assert!(!file.memory().unwrap().is_empty());
    }
}
