//! MOS Technology format.
//!
//! Line grammar: `;CCAAAADD..DDKKKK` — a semicolon, the data byte count, a
//! 16-bit address, the payload, and a 16-bit checksum summing count,
//! address bytes and data. Lines may carry NUL padding; the stream ends at
//! an ETB byte (0x17). The last record is the terminator: its count is
//! zero and its address field holds the number of preceding data records.

use std::io::Write;

use crate::codec::{self, hexlify};
use crate::error::{HexError, Result};
use crate::file::{parse_lines, Meta, ParseOpts, RecordFile};
use crate::memory::SparseMemory;
use crate::record::{
    validate_fields, FieldInit, Record, Tag, TokenKind, Tokens, NO_COORDS,
};

/// Stream terminator byte.
pub const ETB: u8 = 0x17;

/// MOS Technology record tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MosTag {
    /// Payload bytes at a 16-bit address.
    Data = 0,
    /// Terminator record; the address field counts the data records.
    Eof = 1,
}

impl MosTag {
    /// Tells whether this is the terminator tag.
    pub fn is_eof(self) -> bool {
        self == MosTag::Eof
    }
}

impl Tag for MosTag {
    fn is_data(self) -> bool {
        self == MosTag::Data
    }

    fn is_file_termination(self) -> bool {
        self.is_eof()
    }
}

/// One MOS Technology record.
#[derive(Debug, Clone)]
pub struct MosRecord {
    /// Record nature.
    pub tag: MosTag,
    /// 16-bit address field (record count for the terminator).
    pub address: u64,
    /// Payload bytes.
    pub data: Vec<u8>,
    /// Data byte count field.
    pub count: Option<u32>,
    /// 16-bit checksum field.
    pub checksum: Option<u32>,
    /// Trivia before the `;` marker; must not contain a semicolon.
    pub before: Vec<u8>,
    /// Trivia after the checksum, before the line terminator.
    pub after: Vec<u8>,
    /// `(line, column)` parse coordinates.
    pub coords: (isize, isize),
}

impl PartialEq for MosRecord {
    fn eq(&self, other: &Self) -> bool {
        self.tag == other.tag
            && self.address == other.address
            && self.data == other.data
            && self.count == other.count
            && self.checksum == other.checksum
    }
}

impl MosRecord {
    /// Builds a record with explicit control over the consistency fields.
    pub fn new(
        tag: MosTag,
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

    /// Creates a data record.
    pub fn create_data(address: u64, data: &[u8]) -> Result<Self> {
        if address > 0xFFFF {
            return Err(HexError::FieldOverflow { field: "address" });
        }
        if data.len() > 0xFF {
            return Err(HexError::FieldOverflow { field: "data size" });
        }
        Self::new(
            MosTag::Data,
            address,
            data.to_vec(),
            FieldInit::Auto,
            FieldInit::Auto,
        )
    }

    /// Creates the terminator record for `record_count` data records.
    pub fn create_eof(record_count: u64) -> Result<Self> {
        if record_count > 0xFFFF {
            return Err(HexError::FieldOverflow {
                field: "record count",
            });
        }
        Self::new(
            MosTag::Eof,
            record_count,
            Vec::new(),
            FieldInit::Auto,
            FieldInit::Auto,
        )
    }

    /// Serializes with control over the trailing NUL padding.
    pub fn to_bytestr_opts(&self, end: &[u8], nuls: bool) -> Result<Vec<u8>> {
        self.validate(false, false)?;

        let mut out = Vec::with_capacity(self.before.len() + 12 + self.data.len() * 2);
        out.extend_from_slice(&self.before);
        out.push(b';');
        codec::push_hex_u8(&mut out, self.count.unwrap_or(0) as u8);
        codec::push_hex_u16(&mut out, self.address as u16);
        out.extend_from_slice(&hexlify(&self.data, None, true));
        codec::push_hex_u16(&mut out, self.checksum.unwrap_or(0) as u16);
        out.extend_from_slice(&self.after);
        out.extend_from_slice(end);
        if nuls {
            out.extend_from_slice(&[0u8; 6]);
        }
        Ok(out)
    }
}

impl Record for MosRecord {
    type Tag = MosTag;

    fn tag(&self) -> MosTag {
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
        // NUL padding around the canonical syntax is tolerated.
        let line: Vec<u8> = line.iter().copied().filter(|&byte| byte != 0).collect();

        let marker = memchr::memchr(b';', &line).ok_or(HexError::Syntax { line: 0 })?;
        let before = line[..marker].to_vec();
        let rest = &line[marker + 1..];

        let mut run = codec::hex_run_len(rest);
        if run < 10 {
            return Err(HexError::Syntax { line: 0 });
        }
        if (run - 10) % 2 != 0 {
            run -= 1;
        }

        let count = codec::hex_value(&rest[0..2])? as u32;
        let address = codec::hex_value(&rest[2..6])?;
        let data = codec::unhexlify(&rest[6..run - 4])?;
        let checksum = codec::hex_value(&rest[run - 4..run])? as u32;

        let mut after = &rest[run..];
        if let Some(position) = memchr::memchr2(b'\r', b'\n', after) {
            let terminator = &after[position..];
            if !matches!(terminator, b"\r" | b"\n" | b"\r\n") {
                return Err(HexError::Syntax { line: 0 });
            }
            after = &after[..position];
        }

        let record = Self {
            tag: MosTag::Data,
            address,
            data,
            count: Some(count),
            checksum: Some(checksum),
            before,
            after: after.to_vec(),
            coords: NO_COORDS,
        };
        record.validate(true, true)?;
        Ok(record)
    }

    fn to_bytestr(&self, end: &[u8]) -> Result<Vec<u8>> {
        self.to_bytestr_opts(end, true)
    }

    fn to_tokens(&self, end: &[u8]) -> Result<Tokens> {
        self.validate(false, false)?;

        let mut count = Vec::new();
        codec::push_hex_u8(&mut count, self.count.unwrap_or(0) as u8);
        let mut address = Vec::new();
        codec::push_hex_u16(&mut address, self.address as u16);
        let mut checksum = Vec::new();
        codec::push_hex_u16(&mut checksum, self.checksum.unwrap_or(0) as u16);

        Ok(vec![
            (TokenKind::Before, self.before.clone()),
            (TokenKind::Begin, b";".to_vec()),
            (TokenKind::Count, count),
            (TokenKind::Address, address),
            (TokenKind::Data, hexlify(&self.data, None, true)),
            (TokenKind::Checksum, checksum),
            (TokenKind::After, self.after.clone()),
            (TokenKind::End, end.to_vec()),
            (TokenKind::Nuls, vec![0u8; 6]),
        ])
    }

    fn compute_checksum(&self) -> Option<u32> {
        let count = self.count?;
        let address = self.address as u16;
        let sum = u32::from(count as u8)
            + u32::from((address >> 8) as u8)
            + u32::from(address as u8)
            + self.data.iter().map(|&byte| u32::from(byte)).sum::<u32>();
        Some(sum & 0xFFFF)
    }

    fn compute_count(&self) -> Option<u32> {
        Some(self.data.len() as u32)
    }

    fn validate(&self, checksum: bool, count: bool) -> Result<()> {
        validate_fields(self, checksum, count)?;

        if !self.after.is_empty() && !self.after.iter().all(u8::is_ascii_whitespace) {
            return Err(HexError::Trivia {
                message: "junk after is not whitespace",
            });
        }
        if self.before.contains(&b';') {
            return Err(HexError::Trivia {
                message: "junk before contains \";\"",
            });
        }
        if let Some(checksum) = self.checksum {
            if checksum > 0xFFFF {
                return Err(HexError::FieldOverflow { field: "checksum" });
            }
        }
        if let Some(count) = self.count {
            if count > 0xFF {
                return Err(HexError::FieldOverflow { field: "count" });
            }
        }
        if self.data.len() > 0xFF {
            return Err(HexError::FieldOverflow { field: "data size" });
        }
        if self.address > 0xFFFF {
            return Err(HexError::FieldOverflow { field: "address" });
        }

        Ok(())
    }
}

/// Structural validation knobs for [`MosFile::validate_records_with`].
#[derive(Debug, Clone, Copy)]
pub struct MosValidateOpts {
    /// Data records must be ordered and non-overlapping.
    pub data_ordering: bool,
    /// A terminator record must be present.
    pub eof_record_required: bool,
}

impl Default for MosValidateOpts {
    fn default() -> Self {
        Self {
            data_ordering: false,
            eof_record_required: true,
        }
    }
}

/// MOS Technology record file.
#[derive(Debug, Clone)]
pub struct MosFile {
    records: Option<Vec<MosRecord>>,
    memory: Option<SparseMemory>,
    maxdatalen: usize,
}

impl Default for MosFile {
    fn default() -> Self {
        Self {
            records: None,
            memory: Some(SparseMemory::new()),
            maxdatalen: Self::DEFAULT_DATALEN,
        }
    }
}

impl PartialEq for MosFile {
    fn eq(&self, other: &Self) -> bool {
        self.file_eq(other)
    }
}

impl MosFile {
    /// Serializes with control over NUL padding and the ETB terminator.
    pub fn serialize_opts<W: Write>(
        &mut self,
        stream: &mut W,
        end: &[u8],
        nuls: bool,
        etb: bool,
    ) -> Result<()> {
        for record in self.records()? {
            stream.write_all(&record.to_bytestr_opts(end, nuls)?)?;
        }
        if etb {
            stream.write_all(&[ETB])?;
        }
        Ok(())
    }

    /// Rebuilds records from memory; the terminator's address field equals
    /// the number of data records.
    pub fn build_records(&mut self, align: bool) -> Result<()> {
        let memory = self.memory.as_ref().ok_or(HexError::Role {
            message: "memory instance required",
        })?;

        let chunks: Vec<(u64, Vec<u8>)> = memory
            .chop(self.maxdatalen, align)
            .map(|(address, chunk)| (address, chunk.to_vec()))
            .collect();

        let mut records = Vec::new();
        for (chunk_start, chunk_data) in chunks {
            records.push(MosRecord::create_data(chunk_start, &chunk_data)?);
        }
        records.push(MosRecord::create_eof(records.len() as u64)?);

        self.records = Some(records);
        Ok(())
    }

    /// Structural validation with explicit knobs.
    pub fn validate_records_with(&mut self, opts: MosValidateOpts) -> Result<()> {
        let records = self.records.as_ref().ok_or(HexError::Role {
            message: "records required",
        })?;

        let mut eof_seen = false;
        let mut last_data_endex = 0u64;

        for (index, record) in records.iter().enumerate() {
            record.validate(true, true)?;

            match record.tag {
                MosTag::Data => {
                    if opts.data_ordering {
                        if record.address < last_data_endex {
                            return Err(HexError::structural("unordered data record"));
                        }
                        last_data_endex = record.address + record.data.len() as u64;
                    }
                }
                MosTag::Eof => {
                    eof_seen = true;
                    if index != records.len() - 1 {
                        return Err(HexError::structural("end of file record not last"));
                    }
                    if record.address != index as u64 {
                        return Err(HexError::structural("wrong record count as address"));
                    }
                }
            }
        }

        if opts.eof_record_required && !eof_seen {
            return Err(HexError::structural("missing end of file record"));
        }

        Ok(())
    }
}

impl RecordFile for MosFile {
    type Record = MosRecord;

    const DEFAULT_DATALEN: usize = 24;

    const FILE_EXT: &'static [&'static str] = &[];

    fn records_ref(&self) -> Option<&Vec<MosRecord>> {
        self.records.as_ref()
    }

    fn records_slot(&mut self) -> &mut Option<Vec<MosRecord>> {
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

    fn is_line_empty(line: &[u8]) -> bool {
        line.iter()
            .all(|&byte| byte == 0 || byte.is_ascii_whitespace())
    }

    fn parse(data: &[u8], opts: ParseOpts) -> Result<Self> {
        // Clip the stream between the first record marker and the ETB byte.
        let start = memchr::memchr(b';', data).unwrap_or(data.len());
        let endex = memchr::memchr(ETB, data).unwrap_or(data.len());
        let clipped = &data[start.min(endex)..endex];

        let mut file: Self = parse_lines(clipped, opts)?;

        // The trailing record is the terminator.
        match file.records.as_mut().and_then(|records| records.last_mut()) {
            Some(last) => last.tag = MosTag::Eof,
            None => {
                if !opts.ignore_errors {
                    return Err(HexError::structural("missing end of file record"));
                }
            }
        }

        Ok(file)
    }

    fn serialize<W: Write>(&mut self, stream: &mut W, end: &[u8]) -> Result<()> {
        self.serialize_opts(stream, end, true, true)
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
        self.build_records(false)
    }

    fn validate_records(&mut self) -> Result<()> {
        self.validate_records_with(MosValidateOpts::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_create_data() {
        let record = MosRecord::create_data(0x0010, b"abc").unwrap();
        // Checksum: count + address bytes + data, 16-bit.
        assert_eq!(record.checksum, Some((3 + 0x10 + 0x61 + 0x62 + 0x63) & 0xFFFF));
        assert_eq!(
            record.to_bytestr_opts(b"\r\n", false).unwrap(),
            b";0300106162630139\r\n"
        );
    }

    #[test]
    fn test_terminator_address_is_record_count() {
        let mut file = MosFile::from_bytes(&[0u8; 48], 0);
        let records = file.records().unwrap();
        // 48 bytes at 24 per record: two data records plus the terminator.
        assert_eq!(records.len(), 3);
        let last = records.last().unwrap();
        assert_eq!(last.tag, MosTag::Eof);
        assert_eq!(last.address, 2);
        assert_eq!(last.count, Some(0));
    }

    #[test]
    fn test_serialize_ends_with_etb() {
        let mut file = MosFile::from_bytes(b"abc", 0);
        let mut buffer = Vec::new();
        file.serialize(&mut buffer, b"\r\n").unwrap();
        assert_eq!(buffer.last(), Some(&ETB));
        // Six NULs pad each record line.
        assert!(buffer.windows(6).any(|window| window == [0u8; 6]));
    }

    #[test]
    fn test_parse_roundtrip() {
        let mut file = MosFile::from_blocks([(0x10_u64, b"abc".to_vec()), (0x40, b"xyz".to_vec())]);
        let mut buffer = Vec::new();
        file.serialize(&mut buffer, b"\r\n").unwrap();

        let mut parsed = MosFile::parse(&buffer, ParseOpts::default()).unwrap();
        assert_eq!(parsed.memory().unwrap(), file.memory().unwrap());
        parsed.validate_records().unwrap();
    }

    #[test]
    fn test_parse_stops_at_etb() {
        let buffer = b";0000000000\x17;0300106162630139\r\n";
        let mut file = MosFile::parse(buffer, ParseOpts::default()).unwrap();
        let records = file.records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].tag, MosTag::Eof);
    }

    #[test]
    fn test_parse_nul_padding() {
        let buffer = b"\x00\x00;0300106162630139\r\n\x00\x00\x00;0000000000\r\n\x17";
        let mut file = MosFile::parse(buffer, ParseOpts::default()).unwrap();
        assert_eq!(file.memory().unwrap().to_blocks(), [(0x10, b"abc".to_vec())]);
    }

    #[test]
    fn test_missing_terminator() {
        assert!(matches!(
            MosFile::parse(b"\x17", ParseOpts::default()),
            Err(HexError::Structural { .. })
        ));
    }

    #[test]
    fn test_validate_wrong_terminator_count() {
        let records = vec![
            MosRecord::create_data(0, b"ab").unwrap(),
            MosRecord::create_eof(2).unwrap(),
        ];
        let mut file = MosFile::from_records(records, None).unwrap();
        assert!(matches!(
            file.validate_records(),
            Err(HexError::Structural { .. })
        ));
    }

    #[test]
    fn test_checksum_is_16_bit() {
        let data = vec![0xFF; 255];
        let record = MosRecord::create_data(0xFFFF, &data).unwrap();
        let sum = 255 + 0xFF + 0xFF + 255 * 0xFF;
        assert_eq!(record.checksum, Some(sum & 0xFFFF));
    }
}
