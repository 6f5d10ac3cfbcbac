//! Intel HEX format.
//!
//! Line grammar: `:CCAAAATTDD..DDKK` — a colon, the data byte count, a
//! 16-bit address, the record tag, the payload, and a two's-complement
//! checksum, all as uppercase hex pairs. Extended segment/linear address
//! records widen the effective address space beyond 64 KiB; start address
//! records carry the program entry point.

use byteorder::{BigEndian, ByteOrder};

use crate::codec::{self, hexlify};
use crate::error::{HexError, Result};
use crate::file::{Meta, RecordFile};
use crate::memory::SparseMemory;
use crate::record::{
    validate_fields, FieldInit, Record, Tag, TokenKind, Tokens, NO_COORDS,
};

/// Intel HEX record tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IhexTag {
    /// Payload bytes at a 16-bit address (plus any active extension).
    Data = 0,
    /// Mandatory trailing record.
    EndOfFile = 1,
    /// Sets the segment extension: `data_u16 << 4`.
    ExtendedSegmentAddress = 2,
    /// Program entry point as CS:IP.
    StartSegmentAddress = 3,
    /// Sets the linear extension: `data_u16 << 16`.
    ExtendedLinearAddress = 4,
    /// Program entry point as EIP.
    StartLinearAddress = 5,
}

impl IhexTag {
    /// Tag for a serialized tag byte.
    pub fn from_value(value: u8) -> Result<Self> {
        Ok(match value {
            0 => IhexTag::Data,
            1 => IhexTag::EndOfFile,
            2 => IhexTag::ExtendedSegmentAddress,
            3 => IhexTag::StartSegmentAddress,
            4 => IhexTag::ExtendedLinearAddress,
            5 => IhexTag::StartLinearAddress,
            _ => return Err(HexError::Syntax { line: 0 }),
        })
    }

    /// Serialized tag byte.
    pub fn value(self) -> u8 {
        self as u8
    }

    /// Tells whether this is the End Of File tag.
    pub fn is_eof(self) -> bool {
        self == IhexTag::EndOfFile
    }

    /// Tells whether this tag modifies the address extension.
    pub fn is_extension(self) -> bool {
        matches!(
            self,
            IhexTag::ExtendedSegmentAddress | IhexTag::ExtendedLinearAddress
        )
    }

    /// Tells whether this tag carries a start address.
    pub fn is_start(self) -> bool {
        matches!(
            self,
            IhexTag::StartSegmentAddress | IhexTag::StartLinearAddress
        )
    }
}

impl Tag for IhexTag {
    fn is_data(self) -> bool {
        self == IhexTag::Data
    }

    fn is_file_termination(self) -> bool {
        self.is_eof()
    }
}

/// One Intel HEX record.
#[derive(Debug, Clone)]
pub struct IhexRecord {
    /// Record nature.
    pub tag: IhexTag,
    /// 16-bit address field.
    pub address: u64,
    /// Payload bytes.
    pub data: Vec<u8>,
    /// Data byte count field.
    pub count: Option<u32>,
    /// Two's-complement checksum field.
    pub checksum: Option<u32>,
    /// Trivia before the `:` marker; must not contain a colon.
    pub before: Vec<u8>,
    /// Trivia after the checksum, before the line terminator.
    pub after: Vec<u8>,
    /// `(line, column)` parse coordinates.
    pub coords: (isize, isize),
}

impl PartialEq for IhexRecord {
    fn eq(&self, other: &Self) -> bool {
        self.tag == other.tag
            && self.address == other.address
            && self.data == other.data
            && self.count == other.count
            && self.checksum == other.checksum
    }
}

impl IhexRecord {
    /// Builds a record with explicit control over the consistency fields.
    pub fn new(
        tag: IhexTag,
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
            IhexTag::Data,
            address,
            data.to_vec(),
            FieldInit::Auto,
            FieldInit::Auto,
        )
    }

    /// Creates the End Of File record.
    pub fn create_end_of_file() -> Self {
        let mut record = Self {
            tag: IhexTag::EndOfFile,
            address: 0,
            data: Vec::new(),
            count: None,
            checksum: None,
            before: Vec::new(),
            after: Vec::new(),
            coords: NO_COORDS,
        };
        record.count = record.compute_count();
        record.checksum = record.compute_checksum();
        record
    }

    /// Creates an extended segment address record (`extension << 4`).
    pub fn create_extended_segment_address(extension: u16) -> Result<Self> {
        let mut data = vec![0u8; 2];
        BigEndian::write_u16(&mut data, extension);
        Self::new(
            IhexTag::ExtendedSegmentAddress,
            0,
            data,
            FieldInit::Auto,
            FieldInit::Auto,
        )
    }

    /// Creates an extended linear address record (`extension << 16`).
    pub fn create_extended_linear_address(extension: u16) -> Result<Self> {
        let mut data = vec![0u8; 2];
        BigEndian::write_u16(&mut data, extension);
        Self::new(
            IhexTag::ExtendedLinearAddress,
            0,
            data,
            FieldInit::Auto,
            FieldInit::Auto,
        )
    }

    /// Creates a start segment address record (CS:IP).
    pub fn create_start_segment_address(address: u32) -> Result<Self> {
        let mut data = vec![0u8; 4];
        BigEndian::write_u32(&mut data, address);
        Self::new(
            IhexTag::StartSegmentAddress,
            0,
            data,
            FieldInit::Auto,
            FieldInit::Auto,
        )
    }

    /// Creates a start linear address record (EIP).
    pub fn create_start_linear_address(address: u32) -> Result<Self> {
        let mut data = vec![0u8; 4];
        BigEndian::write_u32(&mut data, address);
        Self::new(
            IhexTag::StartLinearAddress,
            0,
            data,
            FieldInit::Auto,
            FieldInit::Auto,
        )
    }
}

impl Record for IhexRecord {
    type Tag = IhexTag;

    fn tag(&self) -> IhexTag {
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
        let colon = memchr::memchr(b':', line).ok_or(HexError::Syntax { line: 0 })?;
        let before = line[..colon].to_vec();
        let rest = &line[colon + 1..];

        let mut run = codec::hex_run_len(rest);
        if run < 10 {
            return Err(HexError::Syntax { line: 0 });
        }
        if (run - 10) % 2 != 0 {
            // An odd trailing hex digit belongs to the after trivia.
            run -= 1;
        }

        let count = codec::hex_value(&rest[0..2])? as u32;
        let address = codec::hex_value(&rest[2..6])?;
        let tag = IhexTag::from_value(codec::hex_value(&rest[6..8])? as u8)?;
        let data = codec::unhexlify(&rest[8..run - 2])?;
        let checksum = codec::hex_value(&rest[run - 2..run])? as u32;

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
            before,
            after: after.to_vec(),
            coords: NO_COORDS,
        };
        record.validate(true, true)?;
        Ok(record)
    }

    fn to_bytestr(&self, end: &[u8]) -> Result<Vec<u8>> {
        self.validate(false, false)?;

        let mut out = Vec::with_capacity(self.before.len() + 13 + self.data.len() * 2);
        out.extend_from_slice(&self.before);
        out.push(b':');
        codec::push_hex_u8(&mut out, self.count.unwrap_or(0) as u8);
        codec::push_hex_u16(&mut out, self.address as u16);
        codec::push_hex_u8(&mut out, self.tag.value());
        out.extend_from_slice(&hexlify(&self.data, None, true));
        codec::push_hex_u8(&mut out, self.checksum.unwrap_or(0) as u8);
        out.extend_from_slice(&self.after);
        out.extend_from_slice(end);
        Ok(out)
    }

    fn to_tokens(&self, end: &[u8]) -> Result<Tokens> {
        self.validate(false, false)?;

        let mut count = Vec::new();
        codec::push_hex_u8(&mut count, self.count.unwrap_or(0) as u8);
        let mut address = Vec::new();
        codec::push_hex_u16(&mut address, self.address as u16);
        let mut tag = Vec::new();
        codec::push_hex_u8(&mut tag, self.tag.value());
        let mut checksum = Vec::new();
        codec::push_hex_u8(&mut checksum, self.checksum.unwrap_or(0) as u8);

        Ok(vec![
            (TokenKind::Before, self.before.clone()),
            (TokenKind::Begin, b":".to_vec()),
            (TokenKind::Count, count),
            (TokenKind::Address, address),
            (TokenKind::Tag, tag),
            (TokenKind::Data, hexlify(&self.data, None, true)),
            (TokenKind::Checksum, checksum),
            (TokenKind::After, self.after.clone()),
            (TokenKind::End, end.to_vec()),
        ])
    }

    fn compute_checksum(&self) -> Option<u32> {
        let count = self.count?;
        let address = self.address as u16;
        let sum = u32::from(count as u8)
            + u32::from((address >> 8) as u8)
            + u32::from(address as u8)
            + u32::from(self.tag.value())
            + self.data.iter().map(|&byte| u32::from(byte)).sum::<u32>();
        Some((0x100 - (sum & 0xFF)) & 0xFF)
    }

    fn compute_count(&self) -> Option<u32> {
        Some(self.data.len() as u32)
    }

    fn validate(&self, checksum: bool, count: bool) -> Result<()> {
        validate_fields(self, checksum, count)?;

        if self.before.contains(&b':') {
            return Err(HexError::Trivia {
                message: "junk before contains \":\"",
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
        if self.data.len() > 0xFF {
            return Err(HexError::FieldOverflow { field: "data size" });
        }
        if self.address > 0xFFFF {
            return Err(HexError::FieldOverflow { field: "address" });
        }

        match self.tag {
            IhexTag::Data => {}
            IhexTag::StartSegmentAddress | IhexTag::StartLinearAddress => {
                if self.data.len() != 4 {
                    return Err(HexError::FieldOverflow {
                        field: "start address data size",
                    });
                }
            }
            IhexTag::ExtendedSegmentAddress | IhexTag::ExtendedLinearAddress => {
                if self.data.len() != 2 {
                    return Err(HexError::FieldOverflow {
                        field: "extension data size",
                    });
                }
            }
            IhexTag::EndOfFile => {
                if !self.data.is_empty() {
                    return Err(HexError::structural("unexpected data"));
                }
            }
        }

        Ok(())
    }
}

/// Structural validation knobs for [`IhexFile::validate_records_with`].
#[derive(Debug, Clone, Copy)]
pub struct IhexValidateOpts {
    /// Data records must be ordered and non-overlapping after applying the
    /// extension state.
    pub data_ordering: bool,
    /// A start address record must be present.
    pub start_required: bool,
    /// The start address record must be penultimate.
    pub start_penultimate: bool,
    /// The start address must fall within programmed memory.
    pub start_within_data: bool,
}

impl Default for IhexValidateOpts {
    fn default() -> Self {
        Self {
            data_ordering: false,
            start_required: false,
            start_penultimate: true,
            start_within_data: false,
        }
    }
}

/// Intel HEX record file.
#[derive(Debug, Clone)]
pub struct IhexFile {
    records: Option<Vec<IhexRecord>>,
    memory: Option<SparseMemory>,
    maxdatalen: usize,
    linear: bool,
    startaddr: Option<u64>,
}

impl Default for IhexFile {
    fn default() -> Self {
        Self {
            records: None,
            memory: Some(SparseMemory::new()),
            maxdatalen: Self::DEFAULT_DATALEN,
            linear: true,
            startaddr: None,
        }
    }
}

impl PartialEq for IhexFile {
    fn eq(&self, other: &Self) -> bool {
        self.file_eq(other)
    }
}

impl IhexFile {
    /// Linear (vs segmented) extension addressing, deriving meta from
    /// records first when needed.
    ///
    /// A file whose records carry no extension record at all reports
    /// `true`: the flag means "no segmented extension was used", not
    /// "a linear extension was present".
    pub fn linear(&mut self) -> Result<bool> {
        if self.memory.is_none() {
            self.apply_records()?;
        }
        Ok(self.linear)
    }

    /// Sets the extension addressing mode, discarding records on change.
    pub fn set_linear(&mut self, linear: bool) {
        if linear != self.linear {
            self.discard_records();
        }
        self.linear = linear;
    }

    /// Start address, deriving meta from records first when needed.
    pub fn startaddr(&mut self) -> Result<Option<u64>> {
        if self.memory.is_none() {
            self.apply_records()?;
        }
        Ok(self.startaddr)
    }

    /// Sets the start address, discarding records on change.
    pub fn set_startaddr(&mut self, address: Option<u64>) -> Result<()> {
        if let Some(address) = address {
            if address > 0xFFFF_FFFF {
                return Err(HexError::meta("invalid start address"));
            }
        }
        if self.startaddr != address {
            self.discard_records();
        }
        self.startaddr = address;
        Ok(())
    }

    /// Rebuilds records from memory and meta.
    ///
    /// Between chunks whose upper 16 address bits (linear mode) or segment
    /// window (segmented mode) differ from the running extension, the
    /// matching extension record is emitted first. The start address record
    /// lands after the data when `start` is set, the EOF record always
    /// comes last.
    pub fn build_records(&mut self, align: bool, start: bool) -> Result<()> {
        let memory = self.memory.as_ref().ok_or(HexError::Role {
            message: "memory instance required",
        })?;

        let chunks: Vec<(u64, Vec<u8>)> = memory
            .chop(self.maxdatalen, align)
            .map(|(address, chunk)| (address, chunk.to_vec()))
            .collect();

        let mut records = Vec::new();
        let mut last_start = 0u64;
        let linear = self.linear;

        for (chunk_start, chunk_data) in chunks {
            if linear {
                if (chunk_start ^ last_start) & 0xFFFF_0000 != 0 {
                    let extension = (chunk_start >> 16) as u16;
                    records.push(IhexRecord::create_extended_linear_address(extension)?);
                }
            } else {
                if chunk_start > 0x000F_FFFF {
                    return Err(HexError::FieldOverflow { field: "segment" });
                }
                if (chunk_start ^ last_start) & 0x000F_0000 != 0 {
                    let extension = ((chunk_start & 0x000F_0000) >> 4) as u16;
                    records.push(IhexRecord::create_extended_segment_address(extension)?);
                }
            }

            records.push(IhexRecord::create_data(chunk_start & 0xFFFF, &chunk_data)?);
            last_start = chunk_start;
        }

        if start {
            if let Some(startaddr) = self.startaddr {
                records.push(if linear {
                    IhexRecord::create_start_linear_address(startaddr as u32)?
                } else {
                    IhexRecord::create_start_segment_address(startaddr as u32)?
                });
            }
        }

        records.push(IhexRecord::create_end_of_file());

        self.records = Some(records);
        Ok(())
    }

    /// Structural validation with explicit knobs.
    pub fn validate_records_with(&mut self, opts: IhexValidateOpts) -> Result<()> {
        let records = self.records.as_ref().ok_or(HexError::Role {
            message: "records required",
        })?;

        let mut start_record = None;
        let mut eof_seen = false;
        let mut last_data_endex = 0u64;
        let mut extension = 0u64;

        for (index, record) in records.iter().enumerate() {
            record.validate(true, true)?;
            let tag = record.tag;

            if opts.data_ordering {
                match tag {
                    IhexTag::Data => {
                        let extended = record.address + extension;
                        if extended < last_data_endex {
                            return Err(HexError::structural("unordered data record"));
                        }
                        last_data_endex = extended + record.data.len() as u64;
                    }
                    IhexTag::ExtendedLinearAddress => extension = record.data_to_int() << 16,
                    IhexTag::ExtendedSegmentAddress => extension = record.data_to_int() << 4,
                    _ => {}
                }
            }

            if tag == IhexTag::EndOfFile {
                if index != records.len() - 1 {
                    return Err(HexError::structural("end of file record not last"));
                }
                eof_seen = true;
            }

            if tag.is_start() {
                if opts.start_penultimate && index != records.len().wrapping_sub(2) {
                    return Err(HexError::structural("start record not penultimate"));
                }
                start_record = Some(record.clone());
            }
        }

        if !eof_seen {
            return Err(HexError::structural("missing end of file record"));
        }
        if opts.start_required && start_record.is_none() {
            return Err(HexError::structural("missing start record"));
        }

        if opts.start_within_data {
            if let Some(start_record) = start_record {
                let startaddr = start_record.data_to_int();
                if self.memory()?.peek(startaddr).is_none() {
                    return Err(HexError::structural("no data at start address"));
                }
            }
        }

        Ok(())
    }
}

impl RecordFile for IhexFile {
    type Record = IhexRecord;

    const FILE_EXT: &'static [&'static str] = &[
        ".hex", ".mcs", ".int", ".ihex", ".ihe", ".ihx", ".h80", ".h86", ".a43", ".a90", ".obj",
        ".obl", ".obh", ".rom", ".eep",
    ];

    fn records_ref(&self) -> Option<&Vec<IhexRecord>> {
        self.records.as_ref()
    }

    fn records_slot(&mut self) -> &mut Option<Vec<IhexRecord>> {
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
            startaddr: self.startaddr,
            header: None,
            linear: Some(self.linear),
        }
    }

    fn set_meta(&mut self, meta: &Meta) -> Result<()> {
        self.set_maxdatalen(meta.maxdatalen)?;
        self.set_startaddr(meta.startaddr)?;
        if let Some(linear) = meta.linear {
            self.set_linear(linear);
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
        let mut extension = 0u64;
        let mut startaddr = None;
        let mut has_ela = false;
        let mut has_esa = false;

        for record in records {
            match record.tag {
                IhexTag::Data => memory.write(record.address + extension, &record.data),
                IhexTag::ExtendedLinearAddress => {
                    has_ela = true;
                    extension = record.data_to_int() << 16;
                }
                IhexTag::ExtendedSegmentAddress => {
                    has_esa = true;
                    extension = record.data_to_int() << 4;
                }
                IhexTag::StartSegmentAddress | IhexTag::StartLinearAddress => {
                    startaddr = Some(record.data_to_int());
                }
                IhexTag::EndOfFile => {}
            }
        }

        self.memory = Some(memory);
        self.startaddr = startaddr;
        self.linear = has_ela || !has_esa;
        Ok(())
    }

    fn update_records(&mut self) -> Result<()> {
        self.build_records(false, true)
    }

    fn validate_records(&mut self) -> Result<()> {
        self.validate_records_with(IhexValidateOpts::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::ParseOpts;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_create_end_of_file() {
        let record = IhexRecord::create_end_of_file();
        assert_eq!(record.to_bytestr(b"\r\n").unwrap(), b":00000001FF\r\n");
        assert_eq!(record.count, Some(0));
        assert_eq!(record.checksum, Some(0xFF));
    }

    #[test]
    fn test_parse_end_of_file() {
        let record = IhexRecord::parse(b":00000001FF\r\n").unwrap();
        assert_eq!(record.tag, IhexTag::EndOfFile);
        assert_eq!(record.address, 0);
        assert!(record.data.is_empty());
        assert_eq!(record.count, Some(0));
        assert_eq!(record.checksum, Some(0xFF));
    }

    #[test]
    fn test_create_data() {
        let record = IhexRecord::create_data(0x1234, b"abc").unwrap();
        assert_eq!(record.to_bytestr(b"\r\n").unwrap(), b":0312340061626391\r\n");
        assert_eq!(record.compute_checksum(), Some(0x91));
    }

    #[test]
    fn test_create_data_overflow() {
        assert!(matches!(
            IhexRecord::create_data(0x1_0000, b"abc"),
            Err(HexError::FieldOverflow { field: "address" })
        ));
        assert!(matches!(
            IhexRecord::create_data(0, &[0u8; 256]),
            Err(HexError::FieldOverflow { field: "data size" })
        ));
    }

    #[test]
    fn test_parse_trivia() {
        let record = IhexRecord::parse(b"  :0312340061626391 \r\n").unwrap();
        assert_eq!(record.before, b"  ");
        assert_eq!(record.after, b" ");
        assert_eq!(record.data, b"abc");

        let copy = IhexRecord::parse(&record.to_bytestr(b"\r\n").unwrap()).unwrap();
        assert_eq!(copy, record);
    }

    #[test]
    fn test_parse_syntax_error() {
        assert!(IhexRecord::parse(b"S0030000FC\r\n").is_err());
        assert!(IhexRecord::parse(b":0312").is_err());
    }

    #[test]
    fn test_parse_checksum_mismatch() {
        assert!(matches!(
            IhexRecord::parse(b":0312340061626392\r\n"),
            Err(HexError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_parse_count_mismatch() {
        assert!(matches!(
            IhexRecord::parse(b":04123400616263F0\r\n"),
            Err(HexError::CountMismatch { .. })
        ));
    }

    #[test]
    fn test_verbatim_fields_roundtrip() {
        // Explicit values are stored without recomputation checks.
        let record = IhexRecord::new(
            IhexTag::Data,
            0x10,
            b"a".to_vec(),
            FieldInit::Value(1),
            FieldInit::Absent,
        )
        .unwrap();
        assert_eq!(record.count, Some(1));
        assert_eq!(record.checksum, None);
    }

    #[test]
    fn test_linear_extension_parse() {
        let buffer = b":020000040ABC34\r\n:0356780078797AC4\r\n:00000001FF\r\n";
        let mut file = IhexFile::parse(buffer, ParseOpts::default()).unwrap();
        let memory = file.memory().unwrap();
        assert_eq!(memory.to_blocks(), [(0x0ABC_5678, b"xyz".to_vec())]);
        assert!(file.linear().unwrap());
    }

    #[test]
    fn test_segment_extension_parse() {
        let buffer = b":020000021000EC\r\n:0312340061626391\r\n:00000001FF\r\n";
        let mut file = IhexFile::parse(buffer, ParseOpts::default()).unwrap();
        let memory = file.memory().unwrap();
        assert_eq!(memory.to_blocks(), [(0x10000 + 0x1234, b"abc".to_vec())]);
        assert!(!file.linear().unwrap());
    }

    #[test]
    fn test_start_linear_address_meta() {
        let buffer = b":03DA7A0061626383\r\n:040000050000CAFE2F\r\n:00000001FF\r\n";
        let mut file = IhexFile::parse(buffer, ParseOpts::default()).unwrap();
        assert_eq!(file.startaddr().unwrap(), Some(0xCAFE));
        assert_eq!(
            file.memory().unwrap().to_blocks(),
            [(0xDA7A, b"abc".to_vec())]
        );
    }

    #[test]
    fn test_update_records_linear() {
        let mut file = IhexFile::from_blocks([(0xDA7A_u64, b"abc".to_vec())]);
        file.set_startaddr(Some(0xCAFE)).unwrap();

        let mut buffer = Vec::new();
        file.serialize(&mut buffer, b"\n").unwrap();
        assert_eq!(
            buffer,
            b":03DA7A0061626383\n:040000050000CAFE2F\n:00000001FF\n"
        );
    }

    #[test]
    fn test_update_records_extension_boundary() {
        let mut file = IhexFile::from_blocks([
            (0x0001_FFF0_u64, vec![0xAA; 16]),
            (0x0002_0010, vec![0xBB; 4]),
        ]);
        let records = file.records().unwrap();
        // ELA 0x0001, data, ELA 0x0002, data, EOF.
        assert_eq!(records.len(), 5);
        assert_eq!(records[0].tag, IhexTag::ExtendedLinearAddress);
        assert_eq!(records[0].data_to_int(), 1);
        assert_eq!(records[1].tag, IhexTag::Data);
        assert_eq!(records[1].address, 0xFFF0);
        assert_eq!(records[2].tag, IhexTag::ExtendedLinearAddress);
        assert_eq!(records[2].data_to_int(), 2);
        assert_eq!(records[3].address, 0x0010);
        assert_eq!(records[4].tag, IhexTag::EndOfFile);
    }

    #[test]
    fn test_update_records_segmented_overflow() {
        let mut file = IhexFile::from_blocks([(0x0010_0000_u64, b"a".to_vec())]);
        file.set_linear(false);
        assert!(matches!(
            file.update_records(),
            Err(HexError::FieldOverflow { field: "segment" })
        ));
    }

    #[test]
    fn test_update_records_segmented() {
        let mut file = IhexFile::from_blocks([(0x0001_2345_u64, b"abc".to_vec())]);
        file.set_linear(false);
        let records = file.records().unwrap();
        assert_eq!(records[0].tag, IhexTag::ExtendedSegmentAddress);
        assert_eq!(records[0].data_to_int(), 0x1000);
        assert_eq!(records[1].address, 0x2345);
    }

    #[test]
    fn test_memory_roundtrip() {
        let blocks = [(0x1234_u64, b"abc".to_vec()), (0xABCD_EF00, b"xyz".to_vec())];
        let mut file = IhexFile::from_blocks(blocks.clone());
        file.update_records().unwrap();
        let original = file.memory().unwrap().clone();

        file.discard_memory();
        file.apply_records().unwrap();
        assert_eq!(file.memory().unwrap(), &original);
    }

    #[test]
    fn test_validate_missing_eof() {
        let records = vec![IhexRecord::create_data(123, b"abc").unwrap()];
        let mut file = IhexFile::from_records(records, None).unwrap();
        assert!(matches!(
            file.validate_records(),
            Err(HexError::Structural { .. })
        ));
    }

    #[test]
    fn test_validate_start_penultimate() {
        let records = vec![
            IhexRecord::create_start_linear_address(0x1234).unwrap(),
            IhexRecord::create_data(123, b"abc").unwrap(),
            IhexRecord::create_end_of_file(),
        ];
        let mut file = IhexFile::from_records(records, None).unwrap();
        assert!(file.validate_records().is_err());

        let records = vec![
            IhexRecord::create_data(123, b"abc").unwrap(),
            IhexRecord::create_start_linear_address(0x1234).unwrap(),
            IhexRecord::create_end_of_file(),
        ];
        let mut file = IhexFile::from_records(records, None).unwrap();
        file.validate_records().unwrap();
    }

    #[test]
    fn test_validate_start_within_data() {
        let records = vec![
            IhexRecord::create_data(0x7B, b"abc").unwrap(),
            IhexRecord::create_start_linear_address(0x7C).unwrap(),
            IhexRecord::create_end_of_file(),
        ];
        let mut file = IhexFile::from_records(records, None).unwrap();
        file.validate_records_with(IhexValidateOpts {
            start_within_data: true,
            ..Default::default()
        })
        .unwrap();

        let records = vec![
            IhexRecord::create_data(0x7B, b"abc").unwrap(),
            IhexRecord::create_start_linear_address(0x1000).unwrap(),
            IhexRecord::create_end_of_file(),
        ];
        let mut file = IhexFile::from_records(records, None).unwrap();
        assert!(file
            .validate_records_with(IhexValidateOpts {
                start_within_data: true,
                ..Default::default()
            })
            .is_err());
    }

    #[test]
    fn test_invalidation_on_write() {
        let mut file = IhexFile::from_bytes(b"abc", 0);
        file.update_records().unwrap();
        assert!(file.records_ref().is_some());
        file.write(0x10, b"xyz").unwrap();
        assert!(file.records_ref().is_none());
    }

    #[test]
    fn test_ignore_errors() {
        let buffer = b":0312340061626391\r\njunk line\r\n:00000001FF\r\n";
        assert!(IhexFile::parse(buffer, ParseOpts::default()).is_err());

        let opts = ParseOpts {
            ignore_errors: true,
            ..Default::default()
        };
        let mut file = IhexFile::parse(buffer, opts).unwrap();
        assert_eq!(file.records().unwrap().len(), 2);
    }

    #[test]
    fn test_ignore_after_termination() {
        let buffer = b":00000001FF\r\n:0312340061626391\r\n";
        let mut file = IhexFile::parse(buffer, ParseOpts::default()).unwrap();
        assert_eq!(file.records().unwrap().len(), 1);

        let opts = ParseOpts {
            ignore_after_termination: false,
            ..Default::default()
        };
        let mut file = IhexFile::parse(buffer, opts).unwrap();
        assert_eq!(file.records().unwrap().len(), 2);
    }

    #[test]
    fn test_file_equality() {
        let file1 = IhexFile::from_bytes(b"abc", 123);
        let file2 = IhexFile::from_bytes(b"abc", 123);
        assert_eq!(file1, file2);

        let file3 = IhexFile::from_bytes(b"xyz", 123);
        assert_ne!(file1, file3);

        let mut file4 = IhexFile::from_bytes(b"abc", 123);
        file4.set_startaddr(Some(1)).unwrap();
        assert_ne!(file1, file4);
    }

    #[test]
    fn test_coords_from_parse() {
        let buffer = b"\r\n:0312340061626391\r\n:00000001FF\r\n";
        let mut file = IhexFile::parse(buffer, ParseOpts::default()).unwrap();
        let records = file.records().unwrap();
        assert_eq!(records[0].coords, (2, 0));
        assert_eq!(records[1].coords, (3, 0));
    }
}
