//! Motorola S-record format.
//!
//! Line grammar: `S T CC AAAA[AA[AA]] DD..DD KK` — the `S` marker, a tag
//! digit selecting the record nature and address width (16/24/32-bit
//! tiers), a count of the remaining bytes, the address, the payload, and a
//! one's-complement checksum. `S4` is reserved and rejected.

use crate::codec::{self, hexlify};
use crate::error::{HexError, Result};
use crate::file::{Meta, RecordFile};
use crate::memory::SparseMemory;
use crate::record::{
    validate_fields, FieldInit, Record, Tag, TokenKind, Tokens, NO_COORDS,
};

/// S-record tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SrecTag {
    /// Header record (`S0`).
    Header = 0,
    /// Data record with a 16-bit address (`S1`).
    Data16 = 1,
    /// Data record with a 24-bit address (`S2`).
    Data24 = 2,
    /// Data record with a 32-bit address (`S3`).
    Data32 = 3,
    /// Reserved tag (`S4`), rejected by validation.
    Reserved = 4,
    /// 16-bit record count (`S5`).
    Count16 = 5,
    /// 24-bit record count (`S6`).
    Count24 = 6,
    /// Start address, 32-bit (`S7`).
    Start32 = 7,
    /// Start address, 24-bit (`S8`).
    Start24 = 8,
    /// Start address, 16-bit (`S9`).
    Start16 = 9,
}

impl SrecTag {
    /// Tag for a serialized tag digit.
    pub fn from_value(value: u8) -> Result<Self> {
        Ok(match value {
            0 => SrecTag::Header,
            1 => SrecTag::Data16,
            2 => SrecTag::Data24,
            3 => SrecTag::Data32,
            4 => SrecTag::Reserved,
            5 => SrecTag::Count16,
            6 => SrecTag::Count24,
            7 => SrecTag::Start32,
            8 => SrecTag::Start24,
            9 => SrecTag::Start16,
            _ => return Err(HexError::Syntax { line: 0 }),
        })
    }

    /// Serialized tag digit.
    pub fn value(self) -> u8 {
        self as u8
    }

    /// Smallest count tag fitting a record count.
    pub fn fit_count_tag(count: u64) -> Result<Self> {
        if count <= 0xFFFF {
            Ok(SrecTag::Count16)
        } else if count <= 0xFF_FFFF {
            Ok(SrecTag::Count24)
        } else {
            Err(HexError::FieldOverflow { field: "count" })
        }
    }

    /// Smallest data tag fitting a maximum data address.
    pub fn fit_data_tag(address_max: u64) -> Result<Self> {
        if address_max <= 0xFFFF {
            Ok(SrecTag::Data16)
        } else if address_max <= 0xFF_FFFF {
            Ok(SrecTag::Data24)
        } else if address_max <= 0xFFFF_FFFF {
            Ok(SrecTag::Data32)
        } else {
            Err(HexError::FieldOverflow { field: "address" })
        }
    }

    /// Smallest start tag fitting a start address.
    pub fn fit_start_tag(address: u64) -> Result<Self> {
        if address <= 0xFFFF {
            Ok(SrecTag::Start16)
        } else if address <= 0xFF_FFFF {
            Ok(SrecTag::Start24)
        } else if address <= 0xFFFF_FFFF {
            Ok(SrecTag::Start32)
        } else {
            Err(HexError::FieldOverflow { field: "address" })
        }
    }

    /// Serialized address size in bytes (0 for the reserved tag).
    pub fn address_size(self) -> usize {
        match self {
            SrecTag::Header | SrecTag::Data16 | SrecTag::Count16 | SrecTag::Start16 => 2,
            SrecTag::Data24 | SrecTag::Count24 | SrecTag::Start24 => 3,
            SrecTag::Data32 | SrecTag::Start32 => 4,
            SrecTag::Reserved => 0,
        }
    }

    /// Maximum address field value.
    pub fn address_max(self) -> u64 {
        let size = self.address_size();
        if size == 0 {
            0
        } else {
            (1 << (size * 8)) - 1
        }
    }

    /// Maximum data field size (0 for tags carrying no data).
    pub fn data_max(self) -> usize {
        match self {
            SrecTag::Header | SrecTag::Data16 => 0xFE - 2,
            SrecTag::Data24 => 0xFE - 3,
            SrecTag::Data32 => 0xFE - 4,
            _ => 0,
        }
    }

    /// Start tag matching a data tag and vice versa.
    pub fn tag_match(self) -> Option<Self> {
        match self {
            SrecTag::Data16 => Some(SrecTag::Start16),
            SrecTag::Data24 => Some(SrecTag::Start24),
            SrecTag::Data32 => Some(SrecTag::Start32),
            SrecTag::Start16 => Some(SrecTag::Data16),
            SrecTag::Start24 => Some(SrecTag::Data24),
            SrecTag::Start32 => Some(SrecTag::Data32),
            _ => None,
        }
    }

    /// Tells whether this is a count tag.
    pub fn is_count(self) -> bool {
        matches!(self, SrecTag::Count16 | SrecTag::Count24)
    }

    /// Tells whether this is the header tag.
    pub fn is_header(self) -> bool {
        self == SrecTag::Header
    }

    /// Tells whether this is a start address tag.
    pub fn is_start(self) -> bool {
        matches!(self, SrecTag::Start16 | SrecTag::Start24 | SrecTag::Start32)
    }
}

impl Tag for SrecTag {
    fn is_data(self) -> bool {
        matches!(self, SrecTag::Data16 | SrecTag::Data24 | SrecTag::Data32)
    }

    fn is_file_termination(self) -> bool {
        self.is_start()
    }
}

/// One S-record.
#[derive(Debug, Clone)]
pub struct SrecRecord {
    /// Record nature and address width.
    pub tag: SrecTag,
    /// Address field (record count for count tags).
    pub address: u64,
    /// Payload bytes.
    pub data: Vec<u8>,
    /// Count of address + data + checksum bytes.
    pub count: Option<u32>,
    /// One's-complement checksum field.
    pub checksum: Option<u32>,
    /// Trivia before the `S` marker; whitespace only.
    pub before: Vec<u8>,
    /// Trivia after the checksum, before the line terminator.
    pub after: Vec<u8>,
    /// `(line, column)` parse coordinates.
    pub coords: (isize, isize),
}

impl PartialEq for SrecRecord {
    fn eq(&self, other: &Self) -> bool {
        self.tag == other.tag
            && self.address == other.address
            && self.data == other.data
            && self.count == other.count
            && self.checksum == other.checksum
    }
}

impl SrecRecord {
    /// Builds a record with explicit control over the consistency fields.
    pub fn new(
        tag: SrecTag,
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

    /// Creates a header record (`S0`).
    pub fn create_header(data: &[u8]) -> Result<Self> {
        if data.len() > 0xFC {
            return Err(HexError::FieldOverflow { field: "data size" });
        }
        Self::new(
            SrecTag::Header,
            0,
            data.to_vec(),
            FieldInit::Auto,
            FieldInit::Auto,
        )
    }

    /// Creates a data record, fitting the tag to the address when not
    /// supplied.
    pub fn create_data(address: u64, data: &[u8], tag: Option<SrecTag>) -> Result<Self> {
        let tag = match tag {
            Some(tag) => {
                if !Tag::is_data(tag) {
                    return Err(HexError::meta("invalid data tag"));
                }
                tag
            }
            None => SrecTag::fit_data_tag(address)?,
        };

        if address > tag.address_max() {
            return Err(HexError::FieldOverflow { field: "address" });
        }
        if data.len() > tag.data_max() {
            return Err(HexError::FieldOverflow { field: "data size" });
        }
        Self::new(tag, address, data.to_vec(), FieldInit::Auto, FieldInit::Auto)
    }

    /// Creates a count record, fitting the tag to the count when not
    /// supplied.
    pub fn create_count(count: u64, tag: Option<SrecTag>) -> Result<Self> {
        let tag = match tag {
            Some(tag) => {
                if !tag.is_count() {
                    return Err(HexError::meta("invalid count tag"));
                }
                tag
            }
            None => SrecTag::fit_count_tag(count)?,
        };

        if count > tag.address_max() {
            return Err(HexError::FieldOverflow { field: "count" });
        }
        Self::new(tag, count, Vec::new(), FieldInit::Auto, FieldInit::Auto)
    }

    /// Creates a start address record, fitting the tag to the address when
    /// not supplied.
    pub fn create_start(address: u64, tag: Option<SrecTag>) -> Result<Self> {
        let tag = match tag {
            Some(tag) => {
                if !tag.is_start() {
                    return Err(HexError::meta("invalid start tag"));
                }
                tag
            }
            None => SrecTag::fit_start_tag(address)?,
        };

        if address > tag.address_max() {
            return Err(HexError::FieldOverflow { field: "address" });
        }
        Self::new(tag, address, Vec::new(), FieldInit::Auto, FieldInit::Auto)
    }
}

impl Record for SrecRecord {
    type Tag = SrecTag;

    fn tag(&self) -> SrecTag {
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
        let marker = line
            .iter()
            .position(|&byte| byte == b'S' || byte == b's')
            .ok_or(HexError::Syntax { line: 0 })?;
        let before = line[..marker].to_vec();
        let rest = &line[marker + 1..];

        if rest.len() < 3 {
            return Err(HexError::Syntax { line: 0 });
        }
        let tag = SrecTag::from_value(codec::hex_value(&rest[0..1])? as u8)?;
        let count = codec::hex_value(&rest[1..3])? as u32;

        let addr_digits = tag.address_size() * 2;
        if addr_digits == 0 {
            return Err(HexError::structural("reserved tag"));
        }
        let rest = &rest[3..];
        if rest.len() < addr_digits {
            return Err(HexError::Syntax { line: 0 });
        }
        let address = codec::hex_value(&rest[..addr_digits])?;

        let rest = &rest[addr_digits..];
        let mut run = codec::hex_run_len(rest);
        if run < 2 {
            return Err(HexError::Syntax { line: 0 });
        }
        if run % 2 != 0 {
            run -= 1;
        }
        let data = codec::unhexlify(&rest[..run - 2])?;
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

        let mut out = Vec::with_capacity(self.before.len() + 14 + self.data.len() * 2);
        out.extend_from_slice(&self.before);
        out.push(b'S');
        codec::push_hex_digits(&mut out, u64::from(self.tag.value()), 1);
        codec::push_hex_u8(&mut out, self.count.unwrap_or(0) as u8);
        codec::push_hex_digits(&mut out, self.address, self.tag.address_size() * 2);
        out.extend_from_slice(&hexlify(&self.data, None, true));
        codec::push_hex_u8(&mut out, self.checksum.unwrap_or(0) as u8);
        out.extend_from_slice(&self.after);
        out.extend_from_slice(end);
        Ok(out)
    }

    fn to_tokens(&self, end: &[u8]) -> Result<Tokens> {
        self.validate(false, false)?;

        let mut tag = Vec::new();
        codec::push_hex_digits(&mut tag, u64::from(self.tag.value()), 1);
        let mut count = Vec::new();
        codec::push_hex_u8(&mut count, self.count.unwrap_or(0) as u8);
        let mut address = Vec::new();
        codec::push_hex_digits(&mut address, self.address, self.tag.address_size() * 2);
        let mut checksum = Vec::new();
        codec::push_hex_u8(&mut checksum, self.checksum.unwrap_or(0) as u8);

        Ok(vec![
            (TokenKind::Before, self.before.clone()),
            (TokenKind::Begin, b"S".to_vec()),
            (TokenKind::Tag, tag),
            (TokenKind::Count, count),
            (TokenKind::Address, address),
            (TokenKind::Data, hexlify(&self.data, None, true)),
            (TokenKind::Checksum, checksum),
            (TokenKind::After, self.after.clone()),
            (TokenKind::End, end.to_vec()),
        ])
    }

    fn compute_checksum(&self) -> Option<u32> {
        let count = self.count?;
        let mut sum = u32::from(count as u8);
        let mut address = self.address;
        while address > 0 {
            sum += (address & 0xFF) as u32;
            address >>= 8;
        }
        sum += self.data.iter().map(|&byte| u32::from(byte)).sum::<u32>();
        Some((sum & 0xFF) ^ 0xFF)
    }

    fn compute_count(&self) -> Option<u32> {
        Some((self.tag.address_size() + self.data.len() + 1) as u32)
    }

    fn validate(&self, checksum: bool, count: bool) -> Result<()> {
        validate_fields(self, checksum, count)?;

        if !self.before.is_empty() && !self.before.iter().all(u8::is_ascii_whitespace) {
            return Err(HexError::Trivia {
                message: "junk before",
            });
        }
        if let Some(checksum) = self.checksum {
            if checksum > 0xFF {
                return Err(HexError::FieldOverflow { field: "checksum" });
            }
        }
        if let Some(count) = self.count {
            if !(3..=0xFF).contains(&count) {
                return Err(HexError::FieldOverflow { field: "count" });
            }
        }
        if self.tag == SrecTag::Reserved {
            return Err(HexError::structural("reserved tag"));
        }

        if !Tag::is_data(self.tag) && !self.tag.is_header() && !self.data.is_empty() {
            return Err(HexError::structural("unexpected data"));
        }
        if self.data.len() > self.tag.data_max() && (Tag::is_data(self.tag) || self.tag.is_header())
        {
            return Err(HexError::FieldOverflow { field: "data size" });
        }
        if self.address > self.tag.address_max() {
            return Err(HexError::FieldOverflow { field: "address" });
        }

        Ok(())
    }
}

/// Structural validation knobs for [`SrecFile::validate_records_with`].
#[derive(Debug, Clone, Copy)]
pub struct SrecValidateOpts {
    /// A header record must be present.
    pub header_required: bool,
    /// The header record, when present, must come first.
    pub header_first: bool,
    /// Data records must be ordered and non-overlapping.
    pub data_ordering: bool,
    /// Every data record must use one same tag, matched by the start tag.
    pub data_uniform: bool,
    /// A count record must be present.
    pub count_required: bool,
    /// The count record, when present, must be penultimate.
    pub count_penultimate: bool,
    /// The start record must come last.
    pub start_last: bool,
    /// The start address must fall within programmed memory.
    pub start_within_data: bool,
}

impl Default for SrecValidateOpts {
    fn default() -> Self {
        Self {
            header_required: false,
            header_first: true,
            data_ordering: false,
            data_uniform: true,
            count_required: false,
            count_penultimate: true,
            start_last: true,
            start_within_data: false,
        }
    }
}

/// Motorola S-record file.
#[derive(Debug, Clone)]
pub struct SrecFile {
    records: Option<Vec<SrecRecord>>,
    memory: Option<SparseMemory>,
    maxdatalen: usize,
    header: Option<Vec<u8>>,
    startaddr: u64,
}

impl Default for SrecFile {
    fn default() -> Self {
        Self {
            records: None,
            memory: Some(SparseMemory::new()),
            maxdatalen: Self::DEFAULT_DATALEN,
            header: Some(Vec::new()),
            startaddr: 0,
        }
    }
}

impl PartialEq for SrecFile {
    fn eq(&self, other: &Self) -> bool {
        self.file_eq(other)
    }
}

impl SrecFile {
    /// Header record payload, deriving meta from records first when needed.
    pub fn header(&mut self) -> Result<Option<&[u8]>> {
        if self.memory.is_none() {
            self.apply_records()?;
        }
        Ok(self.header.as_deref())
    }

    /// Sets the header payload, discarding records on change.
    pub fn set_header(&mut self, header: Option<Vec<u8>>) -> Result<()> {
        if let Some(header) = &header {
            if header.len() > SrecTag::Header.data_max() {
                return Err(HexError::meta("header data size overflow"));
            }
        }
        if self.header != header {
            self.discard_records();
        }
        self.header = header;
        Ok(())
    }

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

    /// Rebuilds records from memory and meta.
    ///
    /// One data tag covers the whole file, fitted to the maximum data
    /// address unless supplied. Emits header (when set), data records,
    /// exactly one count record, and the matching start record last.
    pub fn build_records(&mut self, align: bool, data_tag: Option<SrecTag>) -> Result<()> {
        let memory = self.memory.as_ref().ok_or(HexError::Role {
            message: "memory instance required",
        })?;

        let data_tag = match data_tag {
            Some(tag) if Tag::is_data(tag) => tag,
            Some(_) => return Err(HexError::meta("invalid data tag")),
            None => {
                let address_max = if memory.is_empty() {
                    self.startaddr
                } else {
                    memory.endin()
                };
                SrecTag::fit_data_tag(address_max)?
            }
        };

        let chunks: Vec<(u64, Vec<u8>)> = memory
            .chop(self.maxdatalen, align)
            .map(|(address, chunk)| (address, chunk.to_vec()))
            .collect();

        let mut records = Vec::new();
        if let Some(header) = &self.header {
            records.push(SrecRecord::create_header(header)?);
        }

        let mut data_record_count = 0u64;
        for (chunk_start, chunk_data) in chunks {
            records.push(SrecRecord::create_data(
                chunk_start,
                &chunk_data,
                Some(data_tag),
            )?);
            data_record_count += 1;
        }

        records.push(SrecRecord::create_count(data_record_count, None)?);

        let start_tag = data_tag.tag_match();
        records.push(SrecRecord::create_start(self.startaddr, start_tag)?);

        self.records = Some(records);
        Ok(())
    }

    /// Structural validation with explicit knobs.
    pub fn validate_records_with(&mut self, opts: SrecValidateOpts) -> Result<()> {
        let records = self.records.as_ref().ok_or(HexError::Role {
            message: "records required",
        })?;

        let mut header_seen = false;
        let mut count_seen = false;
        let mut start_record = None;
        let mut last_data_endex = 0u64;
        let mut data_tag_sample: Option<SrecTag> = None;
        let mut data_count = 0u64;

        for (index, record) in records.iter().enumerate() {
            record.validate(true, true)?;
            let tag = record.tag;

            if Tag::is_data(tag) {
                data_count += 1;

                if opts.data_uniform {
                    match data_tag_sample {
                        None => data_tag_sample = Some(tag),
                        Some(sample) if tag != sample => {
                            return Err(HexError::structural("data record tags not uniform"));
                        }
                        _ => {}
                    }
                }

                if opts.data_ordering {
                    if record.address < last_data_endex {
                        return Err(HexError::structural("unordered data record"));
                    }
                    last_data_endex = record.address + record.data.len() as u64;
                }
            } else if tag.is_count() {
                if count_seen {
                    return Err(HexError::structural("multiple count records"));
                }
                count_seen = true;

                if record.address != data_count {
                    return Err(HexError::structural("wrong data record count"));
                }
                if opts.count_penultimate && index != records.len().wrapping_sub(2) {
                    return Err(HexError::structural("count record not penultimate"));
                }
            } else if tag.is_start() {
                if start_record.is_some() {
                    return Err(HexError::structural("multiple start records"));
                }
                start_record = Some(record.clone());

                if opts.start_last && index != records.len() - 1 {
                    return Err(HexError::structural("start record not last"));
                }
            } else {
                if opts.header_first && index != 0 {
                    return Err(HexError::structural("header record not first"));
                }
                header_seen = true;
            }
        }

        if opts.header_required && !header_seen {
            return Err(HexError::structural("missing header record"));
        }
        if opts.count_required && !count_seen {
            return Err(HexError::structural("missing count record"));
        }
        let start_record = start_record
            .ok_or_else(|| HexError::structural("missing start record"))?;

        if opts.start_within_data && self.memory()?.peek(start_record.address).is_none() {
            return Err(HexError::structural("no data at start address"));
        }

        if opts.data_uniform {
            if let Some(sample) = data_tag_sample {
                if Some(start_record.tag) != sample.tag_match() {
                    return Err(HexError::structural("start record tag not uniform"));
                }
            }
        }

        Ok(())
    }
}

impl RecordFile for SrecFile {
    type Record = SrecRecord;

    const FILE_EXT: &'static [&'static str] = &[
        ".s19", ".s28", ".s37", ".s", ".s1", ".s2", ".s3", ".sx", ".srec", ".exo", ".mot", ".mxt",
    ];

    fn records_ref(&self) -> Option<&Vec<SrecRecord>> {
        self.records.as_ref()
    }

    fn records_slot(&mut self) -> &mut Option<Vec<SrecRecord>> {
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
            header: self.header.clone(),
            linear: None,
        }
    }

    fn set_meta(&mut self, meta: &Meta) -> Result<()> {
        self.set_maxdatalen(meta.maxdatalen)?;
        if let Some(startaddr) = meta.startaddr {
            self.set_startaddr(startaddr)?;
        }
        if meta.header.is_some() {
            self.set_header(meta.header.clone())?;
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
        let mut header = None;

        for record in records {
            let tag = record.tag;
            if Tag::is_data(tag) {
                memory.write(record.address, &record.data);
            } else if tag.is_start() {
                startaddr = record.address;
            } else if tag.is_header() {
                header = Some(record.data.clone());
            }
        }

        self.memory = Some(memory);
        self.startaddr = startaddr;
        self.header = header;
        Ok(())
    }

    fn update_records(&mut self) -> Result<()> {
        self.build_records(false, None)
    }

    fn validate_records(&mut self) -> Result<()> {
        self.validate_records_with(SrecValidateOpts::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::ParseOpts;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_fit_data_tag() {
        assert_eq!(SrecTag::fit_data_tag(0xFFFF).unwrap(), SrecTag::Data16);
        assert_eq!(SrecTag::fit_data_tag(0x10000).unwrap(), SrecTag::Data24);
        assert_eq!(SrecTag::fit_data_tag(0x1000000).unwrap(), SrecTag::Data32);
        assert!(matches!(
            SrecTag::fit_data_tag(0x1_0000_0000),
            Err(HexError::FieldOverflow { .. })
        ));
    }

    #[test]
    fn test_fit_count_and_start_tags() {
        assert_eq!(SrecTag::fit_count_tag(0xFFFF).unwrap(), SrecTag::Count16);
        assert_eq!(SrecTag::fit_count_tag(0x10000).unwrap(), SrecTag::Count24);
        assert!(SrecTag::fit_count_tag(0x1000000).is_err());

        assert_eq!(SrecTag::fit_start_tag(0xFFFF).unwrap(), SrecTag::Start16);
        assert_eq!(SrecTag::fit_start_tag(0x10000).unwrap(), SrecTag::Start24);
        assert_eq!(
            SrecTag::fit_start_tag(0xFFFF_FFFF).unwrap(),
            SrecTag::Start32
        );
    }

    #[test]
    fn test_tag_match() {
        assert_eq!(SrecTag::Data16.tag_match(), Some(SrecTag::Start16));
        assert_eq!(SrecTag::Start32.tag_match(), Some(SrecTag::Data32));
        assert_eq!(SrecTag::Header.tag_match(), None);
    }

    #[test]
    fn test_create_header() {
        let record = SrecRecord::create_header(b"HDR\x00").unwrap();
        assert_eq!(record.to_bytestr(b"\r\n").unwrap(), b"S0070000484452001A\r\n");
    }

    #[test]
    fn test_create_data_32() {
        let record = SrecRecord::create_data(0x1234_5678, b"abc", None).unwrap();
        assert_eq!(record.tag, SrecTag::Data32);
        assert_eq!(
            record.to_bytestr(b"\r\n").unwrap(),
            b"S30812345678616263BD\r\n"
        );
    }

    #[test]
    fn test_serialize_file_exact() {
        let mut file = SrecFile::from_blocks([(0x1234_5678_u64, b"abc".to_vec())]);
        file.set_header(Some(b"HDR\x00".to_vec())).unwrap();
        file.set_startaddr(0x89AB_CDEF).unwrap();

        let mut buffer = Vec::new();
        file.serialize(&mut buffer, b"\r\n").unwrap();
        assert_eq!(
            buffer,
            b"S0070000484452001A\r\nS30812345678616263BD\r\nS5030001FB\r\nS70589ABCDEF0A\r\n"
                .to_vec()
        );
    }

    #[test]
    fn test_parse_roundtrip() {
        let buffer =
            b"S0070000484452001A\r\nS30812345678616263BD\r\nS5030001FB\r\nS70589ABCDEF0A\r\n";
        let mut file = SrecFile::parse(buffer, ParseOpts::default()).unwrap();
        assert_eq!(
            file.memory().unwrap().to_blocks(),
            [(0x1234_5678, b"abc".to_vec())]
        );
        assert_eq!(file.startaddr().unwrap(), 0x89AB_CDEF);
        assert_eq!(file.header().unwrap(), Some(&b"HDR\x00"[..]));
    }

    #[test]
    fn test_parse_lowercase_marker() {
        let record = SrecRecord::parse(b"s10500000102f7\r\n").unwrap();
        assert_eq!(record.tag, SrecTag::Data16);
        assert_eq!(record.data, b"\x01\x02");
    }

    #[test]
    fn test_parse_bad_checksum() {
        assert!(matches!(
            SrecRecord::parse(b"S1130000285F245F2212226A000424290008237C2B\r\n"),
            Err(HexError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_parse_reserved_tag() {
        assert!(SrecRecord::parse(b"S4030000FC\r\n").is_err());
    }

    #[test]
    fn test_count_range() {
        // A count below 3 cannot cover address and checksum bytes.
        let record = SrecRecord::new(
            SrecTag::Data16,
            0,
            Vec::new(),
            FieldInit::Value(2),
            FieldInit::Absent,
        );
        assert!(record.is_err());
    }

    #[test]
    fn test_empty_file_still_emits_count() {
        let mut file = SrecFile::default();
        let records = file.records().unwrap().to_vec();
        // Header, count (zero data records), start.
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].tag, SrecTag::Header);
        assert_eq!(records[1].tag, SrecTag::Count16);
        assert_eq!(records[1].address, 0);
        assert_eq!(records[2].tag, SrecTag::Start16);
    }

    #[test]
    fn test_update_records_uniform_tag() {
        let mut file = SrecFile::from_blocks([
            (0x0000_1000_u64, b"ab".to_vec()),
            (0x0012_0000, b"cd".to_vec()),
        ]);
        let records = file.records().unwrap();
        // All data records share the tag fitted to the maximum address.
        assert!(records
            .iter()
            .filter(|record| Tag::is_data(record.tag))
            .all(|record| record.tag == SrecTag::Data24));
        assert_eq!(records.last().unwrap().tag, SrecTag::Start24);
    }

    #[test]
    fn test_validate_count_address() {
        let records = vec![
            SrecRecord::create_header(b"").unwrap(),
            SrecRecord::create_data(0, b"ab", Some(SrecTag::Data16)).unwrap(),
            SrecRecord::create_count(2, None).unwrap(),
            SrecRecord::create_start(0, Some(SrecTag::Start16)).unwrap(),
        ];
        let mut file = SrecFile::from_records(records, None).unwrap();
        assert!(matches!(
            file.validate_records(),
            Err(HexError::Structural { .. })
        ));
    }

    #[test]
    fn test_validate_uniformity() {
        let records = vec![
            SrecRecord::create_data(0, b"ab", Some(SrecTag::Data16)).unwrap(),
            SrecRecord::create_data(0x10, b"cd", Some(SrecTag::Data24)).unwrap(),
            SrecRecord::create_count(2, None).unwrap(),
            SrecRecord::create_start(0, Some(SrecTag::Start16)).unwrap(),
        ];
        let mut file = SrecFile::from_records(records, None).unwrap();
        assert!(file.validate_records().is_err());
    }

    #[test]
    fn test_validate_default_ok() {
        let mut file = SrecFile::from_bytes(b"abc", 0x1000);
        file.update_records().unwrap();
        file.validate_records().unwrap();
    }

    #[test]
    fn test_maxdatalen_rechunks() {
        let buffer: Vec<u8> = (0u8..64).collect();
        let mut file = SrecFile::from_bytes(&buffer, 0);
        assert_eq!(
            file.records()
                .unwrap()
                .iter()
                .filter(|record| Tag::is_data(record.tag))
                .count(),
            4
        );

        file.set_maxdatalen(8).unwrap();
        assert_eq!(
            file.records()
                .unwrap()
                .iter()
                .filter(|record| Tag::is_data(record.tag))
                .count(),
            8
        );
    }

    #[test]
    fn test_convert_meta_from_ihex() {
        use crate::formats::ihex::IhexFile;

        let mut source = IhexFile::from_blocks([(123_u64, b"abc".to_vec())]);
        source.set_startaddr(Some(789)).unwrap();
        let mut target = SrecFile::convert_from(&mut source).unwrap();
        assert_eq!(target.startaddr().unwrap(), 789);
        assert_eq!(
            target.memory().unwrap().to_blocks(),
            [(123, b"abc".to_vec())]
        );
    }
}
