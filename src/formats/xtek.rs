//! Tektronix extended HEX format.
//!
//! Line grammar: `%CC T KK L AA..AA DD..DD` — a percent marker, the count
//! of hex digits after the marker, the tag digit, a nibble-sum checksum,
//! the address length in nibbles (1..15), the address rendered with exactly
//! that many digits, and the payload. The EOF record carries the start
//! address and no data.

use crate::codec::{self, hexlify};
use crate::error::{HexError, Result};
use crate::file::{Meta, RecordFile};
use crate::memory::SparseMemory;
use crate::record::{
    validate_fields, FieldInit, Record, Tag, TokenKind, Tokens, NO_COORDS,
};

/// Tektronix extended HEX record tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum XtekTag {
    /// Payload bytes at the record address.
    Data = 6,
    /// Trailing record carrying the start address.
    Eof = 8,
}

impl XtekTag {
    /// Tag for a serialized tag digit.
    pub fn from_value(value: u8) -> Result<Self> {
        Ok(match value {
            6 => XtekTag::Data,
            8 => XtekTag::Eof,
            _ => return Err(HexError::Syntax { line: 0 }),
        })
    }

    /// Serialized tag digit.
    pub fn value(self) -> u8 {
        self as u8
    }

    /// Tells whether this is the EOF tag.
    pub fn is_eof(self) -> bool {
        self == XtekTag::Eof
    }
}

impl Tag for XtekTag {
    fn is_data(self) -> bool {
        self == XtekTag::Data
    }

    fn is_file_termination(self) -> bool {
        self.is_eof()
    }
}

/// One Tektronix extended HEX record.
#[derive(Debug, Clone)]
pub struct XtekRecord {
    /// Record nature.
    pub tag: XtekTag,
    /// Address field, rendered with exactly `addrlen` digits.
    pub address: u64,
    /// Payload bytes.
    pub data: Vec<u8>,
    /// Count of hex digits after the `%` marker.
    pub count: Option<u32>,
    /// Nibble-sum checksum field.
    pub checksum: Option<u32>,
    /// Address length in nibbles (1..15).
    pub addrlen: u8,
    /// Trivia before the `%` marker; must not contain a percent sign.
    pub before: Vec<u8>,
    /// Trivia after the payload, before the line terminator.
    pub after: Vec<u8>,
    /// `(line, column)` parse coordinates.
    pub coords: (isize, isize),
}

impl PartialEq for XtekRecord {
    fn eq(&self, other: &Self) -> bool {
        self.tag == other.tag
            && self.address == other.address
            && self.data == other.data
            && self.count == other.count
            && self.checksum == other.checksum
            && self.addrlen == other.addrlen
    }
}

impl XtekRecord {
    /// Maximum address for an address length in nibbles.
    pub fn address_max(addrlen: u8) -> Result<u64> {
        if !(1..=15).contains(&addrlen) {
            return Err(HexError::meta("invalid address length"));
        }
        Ok((1u64 << (u32::from(addrlen) * 4)) - 1)
    }

    /// Maximum data size for an address length in nibbles.
    pub fn data_max(addrlen: u8) -> Result<usize> {
        if !(1..=15).contains(&addrlen) {
            return Err(HexError::meta("invalid address length"));
        }
        Ok((249 - addrlen as usize) / 2)
    }

    /// Builds a record with explicit control over the consistency fields.
    pub fn new(
        tag: XtekTag,
        address: u64,
        data: Vec<u8>,
        addrlen: u8,
        count: FieldInit,
        checksum: FieldInit,
    ) -> Result<Self> {
        if !(1..=15).contains(&addrlen) {
            return Err(HexError::meta("invalid address length"));
        }

        let mut record = Self {
            tag,
            address,
            data,
            count: None,
            checksum: None,
            addrlen,
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

    /// Creates a data record.
    pub fn create_data(address: u64, data: &[u8], addrlen: u8) -> Result<Self> {
        if address > Self::address_max(addrlen)? {
            return Err(HexError::FieldOverflow { field: "address" });
        }
        if data.len() > Self::data_max(addrlen)? {
            return Err(HexError::FieldOverflow { field: "data size" });
        }
        Self::new(
            XtekTag::Data,
            address,
            data.to_vec(),
            addrlen,
            FieldInit::Auto,
            FieldInit::Auto,
        )
    }

    /// Creates the EOF record carrying the start address.
    pub fn create_eof(start: u64, addrlen: u8) -> Result<Self> {
        if start > Self::address_max(addrlen)? {
            return Err(HexError::FieldOverflow {
                field: "start address",
            });
        }
        Self::new(
            XtekTag::Eof,
            start,
            Vec::new(),
            addrlen,
            FieldInit::Auto,
            FieldInit::Auto,
        )
    }
}

impl Record for XtekRecord {
    type Tag = XtekTag;

    fn tag(&self) -> XtekTag {
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
        let marker = memchr::memchr(b'%', line).ok_or(HexError::Syntax { line: 0 })?;
        let before = line[..marker].to_vec();
        let rest = &line[marker + 1..];

        if rest.len() < 6 {
            return Err(HexError::Syntax { line: 0 });
        }
        let count = codec::hex_value(&rest[0..2])? as u32;
        let tag = XtekTag::from_value(codec::hex_value(&rest[2..3])? as u8)?;
        let checksum = codec::hex_value(&rest[3..5])? as u32;
        let addrlen = codec::hex_value(&rest[5..6])? as u8;
        if addrlen == 0 {
            return Err(HexError::Syntax { line: 0 });
        }

        let rest = &rest[6..];
        let addr_digits = addrlen as usize;
        if rest.len() < addr_digits {
            return Err(HexError::Syntax { line: 0 });
        }
        let address = codec::hex_value(&rest[..addr_digits])?;

        let rest = &rest[addr_digits..];
        let mut run = codec::hex_run_len(rest);
        if run % 2 != 0 {
            run -= 1;
        }
        let data = codec::unhexlify(&rest[..run])?;

        let mut after = &rest[run..];
        if let Some(position) = memchr::memchr2(b'\r', b'\n', after) {
            let terminator = &after[position..];
            if !matches!(terminator, b"\r" | b"\n" | b"\r\n") {
                return Err(HexError::Syntax { line: 0 });
            }
            after = &after[..position];
        }

        let record = Self {
            tag,
            address,
            data,
            count: Some(count),
            checksum: Some(checksum),
            addrlen,
            before,
            after: after.to_vec(),
            coords: NO_COORDS,
        };
        record.validate(true, true)?;
        Ok(record)
    }

    fn to_bytestr(&self, end: &[u8]) -> Result<Vec<u8>> {
        self.validate(false, false)?;

        let mut out = Vec::with_capacity(self.before.len() + 8 + self.addrlen as usize);
        out.extend_from_slice(&self.before);
        out.push(b'%');
        codec::push_hex_u8(&mut out, self.count.unwrap_or(0) as u8);
        codec::push_hex_digits(&mut out, u64::from(self.tag.value()), 1);
        codec::push_hex_u8(&mut out, self.checksum.unwrap_or(0) as u8);
        codec::push_hex_digits(&mut out, u64::from(self.addrlen), 1);
        codec::push_hex_digits(&mut out, self.address, self.addrlen as usize);
        out.extend_from_slice(&hexlify(&self.data, None, true));
        out.extend_from_slice(&self.after);
        out.extend_from_slice(end);
        Ok(out)
    }

    fn to_tokens(&self, end: &[u8]) -> Result<Tokens> {
        self.validate(false, false)?;

        let mut count = Vec::new();
        codec::push_hex_u8(&mut count, self.count.unwrap_or(0) as u8);
        let mut tag = Vec::new();
        codec::push_hex_digits(&mut tag, u64::from(self.tag.value()), 1);
        let mut checksum = Vec::new();
        codec::push_hex_u8(&mut checksum, self.checksum.unwrap_or(0) as u8);
        let mut addrlen = Vec::new();
        codec::push_hex_digits(&mut addrlen, u64::from(self.addrlen), 1);
        let mut address = Vec::new();
        codec::push_hex_digits(&mut address, self.address, self.addrlen as usize);

        Ok(vec![
            (TokenKind::Before, self.before.clone()),
            (TokenKind::Begin, b"%".to_vec()),
            (TokenKind::Count, count),
            (TokenKind::Tag, tag),
            (TokenKind::Checksum, checksum),
            (TokenKind::AddrLen, addrlen),
            (TokenKind::Address, address),
            (TokenKind::Data, hexlify(&self.data, None, true)),
            (TokenKind::After, self.after.clone()),
            (TokenKind::End, end.to_vec()),
        ])
    }

    fn compute_checksum(&self) -> Option<u32> {
        let count = self.count?;
        let mut sum = (count >> 4) + (count & 0xF);

        let mut address = self.address;
        while address > 0 {
            sum += (address & 0xF) as u32;
            address >>= 4;
        }

        for &byte in &self.data {
            sum += u32::from(byte >> 4) + u32::from(byte & 0xF);
        }

        sum += u32::from(self.tag.value()) + u32::from(self.addrlen);
        Some(sum & 0xFF)
    }

    fn compute_count(&self) -> Option<u32> {
        Some(6 + u32::from(self.addrlen) + (self.data.len() as u32) * 2)
    }

    fn validate(&self, checksum: bool, count: bool) -> Result<()> {
        validate_fields(self, checksum, count)?;

        if !self.after.is_empty() && !self.after.iter().all(u8::is_ascii_whitespace) {
            return Err(HexError::Trivia {
                message: "junk after is not whitespace",
            });
        }
        if self.before.contains(&b'%') {
            return Err(HexError::Trivia {
                message: "junk before contains \"%\"",
            });
        }
        if let Some(checksum) = self.checksum {
            if checksum > 0xFF {
                return Err(HexError::FieldOverflow { field: "checksum" });
            }
        }
        if let Some(count) = self.count {
            if count > 0xFF {
                return Err(HexError::FieldOverflow { field: "count" });
            }
        }

        let addrlen = self.addrlen;
        if !(1..=15).contains(&addrlen) {
            return Err(HexError::meta("invalid address length"));
        }
        if self.address > Self::address_max(addrlen)? {
            return Err(HexError::FieldOverflow { field: "address" });
        }

        let datamax = (0xFA - addrlen as usize) / 2;
        if self.data.len() > datamax {
            return Err(HexError::FieldOverflow { field: "data size" });
        }
        if self.tag == XtekTag::Eof && !self.data.is_empty() {
            return Err(HexError::structural("unexpected data"));
        }

        Ok(())
    }
}

/// Structural validation knobs for [`XtekFile::validate_records_with`].
#[derive(Debug, Clone, Copy, Default)]
pub struct XtekValidateOpts {
    /// Data records must be ordered and non-overlapping.
    pub data_ordering: bool,
    /// The start address must fall within programmed memory.
    pub start_within_data: bool,
}

/// Tektronix extended HEX file.
#[derive(Debug, Clone)]
pub struct XtekFile {
    records: Option<Vec<XtekRecord>>,
    memory: Option<SparseMemory>,
    maxdatalen: usize,
    startaddr: u64,
}

impl Default for XtekFile {
    fn default() -> Self {
        Self {
            records: None,
            memory: Some(SparseMemory::new()),
            maxdatalen: Self::DEFAULT_DATALEN,
            startaddr: 0,
        }
    }
}

impl PartialEq for XtekFile {
    fn eq(&self, other: &Self) -> bool {
        self.file_eq(other)
    }
}

impl XtekFile {
    /// Start address, deriving meta from records first when needed.
    pub fn startaddr(&mut self) -> Result<u64> {
        if self.memory.is_none() {
            self.apply_records()?;
        }
        Ok(self.startaddr)
    }

    /// Sets the start address, discarding records on change.
    pub fn set_startaddr(&mut self, address: u64) -> Result<()> {
        if address > 0xFFFF_FFFF {
            return Err(HexError::meta("invalid start address"));
        }
        if self.startaddr != address {
            self.discard_records();
        }
        self.startaddr = address;
        Ok(())
    }

    /// Rebuilds records from memory and meta; every record shares the same
    /// address length.
    pub fn build_records(&mut self, align: bool, addrlen: u8) -> Result<()> {
        if !(1..=15).contains(&addrlen) {
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
        for (chunk_start, chunk_data) in chunks {
            records.push(XtekRecord::create_data(chunk_start, &chunk_data, addrlen)?);
        }
        records.push(XtekRecord::create_eof(self.startaddr, addrlen)?);

        self.records = Some(records);
        Ok(())
    }

    /// Structural validation with explicit knobs.
    pub fn validate_records_with(&mut self, opts: XtekValidateOpts) -> Result<()> {
        let records = self.records.as_ref().ok_or(HexError::Role {
            message: "records required",
        })?;

        let mut eof_address = None;
        let mut last_data_endex = 0u64;

        for (index, record) in records.iter().enumerate() {
            record.validate(true, true)?;

            match record.tag {
                XtekTag::Data => {
                    if opts.data_ordering {
                        if record.address < last_data_endex {
                            return Err(HexError::structural("unordered data record"));
                        }
                        last_data_endex = record.address + record.data.len() as u64;
                    }
                }
                XtekTag::Eof => {
                    if index != records.len() - 1 {
                        return Err(HexError::structural("end of file record not last"));
                    }
                    eof_address = Some(record.address);
                }
            }
        }

        let eof_address =
            eof_address.ok_or_else(|| HexError::structural("missing end of file record"))?;

        if opts.start_within_data && self.memory()?.peek(eof_address).is_none() {
            return Err(HexError::structural("no data at start address"));
        }

        Ok(())
    }
}

impl RecordFile for XtekFile {
    type Record = XtekRecord;

    const FILE_EXT: &'static [&'static str] = &[".tek", ".xtek"];

    fn records_ref(&self) -> Option<&Vec<XtekRecord>> {
        self.records.as_ref()
    }

    fn records_slot(&mut self) -> &mut Option<Vec<XtekRecord>> {
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
            startaddr: Some(self.startaddr),
            header: None,
            linear: None,
        }
    }

    fn set_meta(&mut self, meta: &Meta) -> Result<()> {
        self.set_maxdatalen(meta.maxdatalen)?;
        if let Some(startaddr) = meta.startaddr {
            self.set_startaddr(startaddr)?;
        }
        Ok(())
    }

    fn apply_records(&mut self) -> Result<()> {
        let records = match &self.records {
            Some(records) if !records.is_empty() => records,
            _ => {
                return Err(HexError::Role {
                    message: "records required",
                })
            }
        };

        let mut memory = SparseMemory::new();
        let mut startaddr = 0u64;

        for record in records {
            match record.tag {
                XtekTag::Data => memory.write(record.address, &record.data),
                XtekTag::Eof => startaddr = record.address,
            }
        }

        self.memory = Some(memory);
        self.startaddr = startaddr;
        Ok(())
    }

    fn update_records(&mut self) -> Result<()> {
        self.build_records(false, 8)
    }

    fn validate_records(&mut self) -> Result<()> {
        self.validate_records_with(XtekValidateOpts::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::ParseOpts;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_create_data() {
        let record = XtekRecord::create_data(0x1234_5678, b"abc", 8).unwrap();
        assert_eq!(record.count, Some(6 + 8 + 6));
        // Nibble sum: count 0x14 -> 1+4, tag 6, addrlen 8,
        // address 1+2+3+4+5+6+7+8, data nibbles of "abc".
        let nibbles: u32 = 1 + 4 + 6 + 8 + 36 + (6 + 1) + (6 + 2) + (6 + 3);
        assert_eq!(record.checksum, Some(nibbles & 0xFF));
    }

    #[test]
    fn test_roundtrip_bytes() {
        let record = XtekRecord::create_data(0x12, b"ab", 2).unwrap();
        let line = record.to_bytestr(b"\r\n").unwrap();
        let parsed = XtekRecord::parse(&line).unwrap();
        assert_eq!(parsed, record);
        assert_eq!(parsed.addrlen, 2);
    }

    #[test]
    fn test_eof_carries_start_address() {
        let record = XtekRecord::create_eof(0xCAFE, 4).unwrap();
        let line = record.to_bytestr(b"\r\n").unwrap();
        let parsed = XtekRecord::parse(&line).unwrap();
        assert_eq!(parsed.tag, XtekTag::Eof);
        assert_eq!(parsed.address, 0xCAFE);
        assert!(parsed.data.is_empty());
    }

    #[test]
    fn test_addrlen_bounds() {
        assert!(XtekRecord::create_data(0, b"a", 0).is_err());
        assert!(XtekRecord::create_data(0, b"a", 16).is_err());
        assert!(XtekRecord::create_data(0x100, b"a", 2).is_err());
    }

    #[test]
    fn test_data_max() {
        assert_eq!(XtekRecord::data_max(8).unwrap(), (249 - 8) / 2);
        let too_big = vec![0u8; XtekRecord::data_max(8).unwrap() + 1];
        assert!(XtekRecord::create_data(0, &too_big, 8).is_err());
    }

    #[test]
    fn test_file_roundtrip() {
        let mut file = XtekFile::from_blocks([
            (0x1000_u64, b"Hello".to_vec()),
            (0x2000, b"World".to_vec()),
        ]);
        file.set_startaddr(0x1000).unwrap();

        let mut buffer = Vec::new();
        file.serialize(&mut buffer, b"\r\n").unwrap();

        let mut parsed = XtekFile::parse(&buffer, ParseOpts::default()).unwrap();
        assert_eq!(parsed.memory().unwrap(), file.memory().unwrap());
        assert_eq!(parsed.startaddr().unwrap(), 0x1000);
    }

    #[test]
    fn test_validate_eof_last() {
        let records = vec![
            XtekRecord::create_eof(0, 8).unwrap(),
            XtekRecord::create_data(0, b"ab", 8).unwrap(),
        ];
        let mut file = XtekFile::from_records(records, None).unwrap();
        assert!(matches!(
            file.validate_records(),
            Err(HexError::Structural { .. })
        ));
    }

    #[test]
    fn test_validate_missing_eof() {
        let records = vec![XtekRecord::create_data(0, b"ab", 8).unwrap()];
        let mut file = XtekFile::from_records(records, None).unwrap();
        assert!(file.validate_records().is_err());
    }

    #[test]
    fn test_parse_bad_checksum() {
        let record = XtekRecord::create_data(0x12, b"ab", 2).unwrap();
        let mut line = record.to_bytestr(b"\r\n").unwrap();
        // Corrupt the checksum digits (offset 4..6 after '%CC6').
        line[4] = b'0';
        line[5] = b'0';
        assert!(matches!(
            XtekRecord::parse(&line),
            Err(HexError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_update_records_uniform_addrlen() {
        let mut file = XtekFile::from_bytes(&[0u8; 40], 0x100);
        let records = file.records().unwrap();
        assert!(records.iter().all(|record| record.addrlen == 8));
        assert_eq!(records.last().unwrap().tag, XtekTag::Eof);
    }
}
