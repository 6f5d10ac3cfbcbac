//! Raw binary passthrough.
//!
//! No framing at all: the stream content is the payload. Parsing reads the
//! whole input as sequential data records; serialization writes the data
//! verbatim, which requires the memory image to be contiguous.

use crate::error::{HexError, Result};
use crate::file::{Meta, ParseOpts, RecordFile};
use crate::memory::SparseMemory;
use crate::record::{Record, Tag, TokenKind, Tokens, NO_COORDS};

/// Raw binary record tags; data is the only record nature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawTag {
    /// An arbitrary chunk of payload bytes.
    Data,
}

impl Tag for RawTag {
    fn is_data(self) -> bool {
        true
    }
}

/// One raw binary record.
#[derive(Debug, Clone)]
pub struct RawRecord {
    /// Record nature.
    pub tag: RawTag,
    /// Stream offset of the chunk.
    pub address: u64,
    /// Payload bytes.
    pub data: Vec<u8>,
    /// Trivia kept for interface parity; always empty.
    pub before: Vec<u8>,
    /// Trivia kept for interface parity; always empty.
    pub after: Vec<u8>,
    /// `(line, column)` parse coordinates.
    pub coords: (isize, isize),
}

impl PartialEq for RawRecord {
    fn eq(&self, other: &Self) -> bool {
        self.tag == other.tag && self.address == other.address && self.data == other.data
    }
}

impl RawRecord {
    /// Creates a data record.
    pub fn create_data(address: u64, data: &[u8]) -> Self {
        Self {
            tag: RawTag::Data,
            address,
            data: data.to_vec(),
            before: Vec::new(),
            after: Vec::new(),
            coords: NO_COORDS,
        }
    }
}

impl Record for RawRecord {
    type Tag = RawTag;

    fn tag(&self) -> RawTag {
        self.tag
    }

    fn address(&self) -> u64 {
        self.address
    }

    fn data(&self) -> &[u8] {
        &self.data
    }

    fn count(&self) -> Option<u32> {
        None
    }

    fn checksum(&self) -> Option<u32> {
        None
    }

    fn coords(&self) -> (isize, isize) {
        self.coords
    }

    fn set_coords(&mut self, coords: (isize, isize)) {
        self.coords = coords;
    }

    fn parse(line: &[u8]) -> Result<Self> {
        Ok(Self::create_data(0, line))
    }

    fn to_bytestr(&self, _end: &[u8]) -> Result<Vec<u8>> {
        Ok(self.data.clone())
    }

    fn to_tokens(&self, _end: &[u8]) -> Result<Tokens> {
        Ok(vec![(TokenKind::Data, self.data.clone())])
    }

    fn compute_checksum(&self) -> Option<u32> {
        None
    }

    fn compute_count(&self) -> Option<u32> {
        None
    }

    fn validate(&self, _checksum: bool, _count: bool) -> Result<()> {
        Ok(())
    }
}

/// Structural validation knobs for [`RawFile::validate_records_with`].
#[derive(Debug, Clone, Copy)]
pub struct RawValidateOpts {
    /// The first record must start at address zero.
    pub data_start: bool,
    /// Records must abut each other with no gaps.
    pub data_contiguity: bool,
    /// Records must be ordered.
    pub data_ordering: bool,
}

impl Default for RawValidateOpts {
    fn default() -> Self {
        Self {
            data_start: true,
            data_contiguity: true,
            data_ordering: true,
        }
    }
}

/// Raw binary file.
#[derive(Debug, Clone)]
pub struct RawFile {
    records: Option<Vec<RawRecord>>,
    memory: Option<SparseMemory>,
    maxdatalen: usize,
}

impl Default for RawFile {
    fn default() -> Self {
        Self {
            records: None,
            memory: Some(SparseMemory::new()),
            maxdatalen: Self::DEFAULT_DATALEN,
        }
    }
}

impl PartialEq for RawFile {
    fn eq(&self, other: &Self) -> bool {
        self.file_eq(other)
    }
}

impl RawFile {
    /// Parses the stream into chunks of `maxdatalen` starting at `address`.
    pub fn parse_at(data: &[u8], maxdatalen: usize, address: u64) -> Result<Self> {
        if maxdatalen < 1 {
            return Err(HexError::meta("invalid maximum data length"));
        }

        let mut records = Vec::new();
        let mut offset = 0usize;
        while offset < data.len() {
            let end = offset.saturating_add(maxdatalen).min(data.len());
            let chunk_address = address + offset as u64;
            let mut record = RawRecord::create_data(chunk_address, &data[offset..end]);
            record.coords = (0, chunk_address as isize);
            records.push(record);
            offset = end;
        }

        let mut file = Self::default();
        file.records = Some(records);
        file.memory = None;
        file.maxdatalen = maxdatalen;
        Ok(file)
    }

    /// Structural validation with explicit knobs.
    pub fn validate_records_with(&mut self, opts: RawValidateOpts) -> Result<()> {
        let records = self.records.as_ref().ok_or(HexError::Role {
            message: "records required",
        })?;

        if opts.data_start {
            if let Some(first) = records.first() {
                if first.address != 0 {
                    return Err(HexError::structural("first record address not zero"));
                }
            }
        }

        let mut last_data_end: Option<u64> = None;
        for record in records {
            record.validate(true, true)?;
            let address = record.address;
            let expected = last_data_end.unwrap_or(address);

            if opts.data_contiguity && address != expected {
                return Err(HexError::structural("data not contiguous"));
            }
            if opts.data_ordering && address < expected {
                return Err(HexError::structural("unordered data record"));
            }

            last_data_end = Some(address + record.data.len() as u64);
        }

        Ok(())
    }
}

impl RecordFile for RawFile {
    type Record = RawRecord;

    const DEFAULT_DATALEN: usize = usize::MAX;

    const FILE_EXT: &'static [&'static str] = &[".bin", ".dat", ".eep", ".raw"];

    fn records_ref(&self) -> Option<&Vec<RawRecord>> {
        self.records.as_ref()
    }

    fn records_slot(&mut self) -> &mut Option<Vec<RawRecord>> {
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
        line.is_empty()
    }

    fn parse(data: &[u8], _opts: ParseOpts) -> Result<Self> {
        Self::parse_at(data, usize::MAX, 0)
    }

    fn apply_records(&mut self) -> Result<()> {
        let records = self.records.as_ref().ok_or(HexError::Role {
            message: "records required",
        })?;

        let mut memory = SparseMemory::new();
        for record in records {
            memory.write(record.address, &record.data);
        }

        self.memory = Some(memory);
        Ok(())
    }

    fn update_records(&mut self) -> Result<()> {
        let memory = self.memory.as_ref().ok_or(HexError::Role {
            message: "memory instance required",
        })?;
        // Serialization has no framing to encode holes.
        memory.view(None, None)?;

        let chunks: Vec<(u64, Vec<u8>)> = memory
            .chop(self.maxdatalen, false)
            .map(|(address, chunk)| (address, chunk.to_vec()))
            .collect();

        let mut records = Vec::new();
        for (chunk_start, chunk_data) in chunks {
            records.push(RawRecord::create_data(chunk_start, &chunk_data));
        }

        self.records = Some(records);
        Ok(())
    }

    fn validate_records(&mut self) -> Result<()> {
        self.validate_records_with(RawValidateOpts::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_whole_stream() {
        let mut file = RawFile::parse(b"Hello, World!", ParseOpts::default()).unwrap();
        let records = file.records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].address, 0);
        assert_eq!(records[0].data, b"Hello, World!");
    }

    #[test]
    fn test_parse_chunked() {
        let mut file = RawFile::parse_at(b"Hello, World!", 4, 0x100).unwrap();
        let records = file.records().unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(records[0].address, 0x100);
        assert_eq!(records[3].data, b"!");
        assert_eq!(
            file.memory().unwrap().to_blocks(),
            [(0x100, b"Hello, World!".to_vec())]
        );
    }

    #[test]
    fn test_serialize_verbatim() {
        let mut file = RawFile::from_bytes(b"Hello", 0);
        let mut buffer = Vec::new();
        file.serialize(&mut buffer, b"\r\n").unwrap();
        assert_eq!(buffer, b"Hello".to_vec());
    }

    #[test]
    fn test_update_records_requires_contiguity() {
        let mut file = RawFile::from_blocks([(0_u64, b"ab".to_vec()), (10, b"cd".to_vec())]);
        assert!(matches!(
            file.update_records(),
            Err(HexError::NonContiguous)
        ));
    }

    #[test]
    fn test_validate_data_start() {
        let mut file = RawFile::from_bytes(b"ab", 4);
        file.update_records().unwrap();
        assert!(matches!(
            file.validate_records(),
            Err(HexError::Structural { .. })
        ));

        file.validate_records_with(RawValidateOpts {
            data_start: false,
            ..Default::default()
        })
        .unwrap();
    }

    #[test]
    fn test_validate_contiguity() {
        let records = vec![
            RawRecord::create_data(0, b"ab"),
            RawRecord::create_data(5, b"cd"),
        ];
        let mut file = RawFile::from_records(records, None).unwrap();
        assert!(file.validate_records().is_err());
    }

    #[test]
    fn test_roundtrip() {
        let mut file = RawFile::from_bytes(b"Hello, World!", 0);
        let mut buffer = Vec::new();
        file.serialize(&mut buffer, b"\r\n").unwrap();

        let mut parsed = RawFile::parse(&buffer, ParseOpts::default()).unwrap();
        assert_eq!(parsed.memory().unwrap(), file.memory().unwrap());
    }
}
