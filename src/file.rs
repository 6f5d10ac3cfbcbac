//! Abstract record file.
//!
//! A record file is a dual-role container. In *records role* it hosts the
//! parsed record sequence; in *memory role* it hosts the equivalent sparse
//! memory image plus format meta information. Either side can be derived
//! from the other: [`RecordFile::apply_records`] mirrors records into
//! memory and meta, [`RecordFile::update_records`] mirrors memory and meta
//! back into records. Reading the missing side through
//! [`RecordFile::memory`] or [`RecordFile::records`] derives it lazily;
//! every memory editing operation invalidates the stored records.

use std::io::{Read, Write};
use std::path::Path;

use serde::Serialize;

use crate::error::{HexError, Result};
use crate::memory::SparseMemory;
use crate::record::{Record, Tag};

/// Default line terminator for serialized records.
pub const CRLF: &[u8] = b"\r\n";

/// Options for [`RecordFile::parse`].
#[derive(Debug, Clone, Copy)]
pub struct ParseOpts {
    /// Silently skip lines the record parser rejects.
    pub ignore_errors: bool,
    /// Stop reading once a file-termination record was parsed.
    pub ignore_after_termination: bool,
}

impl Default for ParseOpts {
    fn default() -> Self {
        Self {
            ignore_errors: false,
            ignore_after_termination: true,
        }
    }
}

/// Snapshot of the meta information a format may carry.
///
/// Every format uses `maxdatalen`; the other keys apply only where the
/// format supports them (`None` otherwise).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Meta {
    /// Target chunk size for data records.
    pub maxdatalen: usize,
    /// Program entry point, where the format records one.
    pub startaddr: Option<u64>,
    /// Header record payload (S-record).
    pub header: Option<Vec<u8>>,
    /// Intel HEX linear (vs segmented) extension addressing.
    pub linear: Option<bool>,
}

/// Dual-role record file: a record sequence and/or a sparse memory image
/// with meta information.
///
/// Implementations provide the storage plumbing and the three per-format
/// role conversions ([`apply_records`](Self::apply_records),
/// [`update_records`](Self::update_records),
/// [`validate_records`](Self::validate_records)); everything else is
/// provided here.
pub trait RecordFile: Default {
    /// Record type of this format.
    type Record: Record;

    /// Default maximum data field size for new files.
    const DEFAULT_DATALEN: usize = 16;

    /// File name extensions this format claims, in priority order.
    const FILE_EXT: &'static [&'static str];

    /// Stored record sequence, if the records role is active.
    fn records_ref(&self) -> Option<&Vec<Self::Record>>;

    /// Mutable record slot.
    fn records_slot(&mut self) -> &mut Option<Vec<Self::Record>>;

    /// Stored memory image, if the memory role is active.
    fn memory_ref(&self) -> Option<&SparseMemory>;

    /// Mutable memory slot.
    fn memory_slot(&mut self) -> &mut Option<SparseMemory>;

    /// Maximum data field size used when chunking memory into records.
    fn maxdatalen(&self) -> usize;

    /// Mutable maxdatalen slot.
    fn maxdatalen_slot(&mut self) -> &mut usize;

    /// Snapshot of the currently stored meta values.
    ///
    /// This does not derive the memory role first; after `parse`, call
    /// [`apply_records`](Self::apply_records) to refresh meta from records.
    fn meta(&self) -> Meta;

    /// Applies the supported subset of `meta`, validating values and
    /// discarding records on change.
    fn set_meta(&mut self, meta: &Meta) -> Result<()>;

    /// Mirrors the stored records into memory and meta (records role must
    /// be active).
    fn apply_records(&mut self) -> Result<()>;

    /// Mirrors memory and meta into a fresh record sequence (memory role
    /// must be active).
    fn update_records(&mut self) -> Result<()>;

    /// Performs the format's structural checks on the stored records, with
    /// default strictness.
    fn validate_records(&mut self) -> Result<()>;

    /// Tells whether a line has no meaningful content for this format.
    fn is_line_empty(line: &[u8]) -> bool {
        line.iter()
            .all(|&byte| matches!(byte, b' ' | b'\t' | b'\n' | b'\r' | 0x0B | 0x0C))
    }

    /// Parses records from serialized bytes, entering records role.
    ///
    /// Each non-empty line goes through [`Record::parse`]; records keep
    /// their `(line, 0)` coordinates. Parsing stops after a
    /// file-termination record unless configured otherwise.
    fn parse(data: &[u8], opts: ParseOpts) -> Result<Self> {
        parse_lines(data, opts)
    }

    /// Serializes every record onto a stream.
    fn serialize<W: Write>(&mut self, stream: &mut W, end: &[u8]) -> Result<()> {
        for record in self.records()? {
            record.serialize(stream, end)?;
        }
        Ok(())
    }

    /// Writes record tokens onto a stream, optionally ANSI-colorized.
    fn print<W: Write>(&mut self, stream: &mut W, color: bool, end: &[u8]) -> Result<()> {
        for record in self.records()? {
            record.print(stream, color, end)?;
        }
        Ok(())
    }

    /// Creates a file in memory role from an existing memory image.
    fn from_memory(memory: SparseMemory) -> Self {
        let mut file = Self::default();
        *file.memory_slot() = Some(memory);
        file
    }

    /// Creates a file in memory role holding one block at `offset`.
    fn from_bytes(data: &[u8], offset: u64) -> Self {
        Self::from_memory(SparseMemory::from_bytes(data, offset))
    }

    /// Creates a file in memory role from `(address, bytes)` blocks.
    fn from_blocks<I, B>(blocks: I) -> Self
    where
        I: IntoIterator<Item = (u64, B)>,
        B: AsRef<[u8]>,
    {
        Self::from_memory(SparseMemory::from_blocks(blocks))
    }

    /// Creates a file in records role from an existing record sequence.
    ///
    /// Without an explicit `maxdatalen`, the largest data record payload is
    /// used, falling back to [`DEFAULT_DATALEN`](Self::DEFAULT_DATALEN)
    /// when every data record is empty.
    fn from_records(records: Vec<Self::Record>, maxdatalen: Option<usize>) -> Result<Self> {
        let maxdatalen = match maxdatalen {
            Some(value) if value >= 1 => value,
            Some(_) => return Err(HexError::meta("invalid maximum data length")),
            None => {
                let largest = records
                    .iter()
                    .filter(|record| record.tag().is_data())
                    .map(|record| record.data().len())
                    .max()
                    .unwrap_or(0);
                if largest < 1 {
                    Self::DEFAULT_DATALEN
                } else {
                    largest
                }
            }
        };

        let mut file = Self::default();
        *file.records_slot() = Some(records);
        *file.memory_slot() = None;
        *file.maxdatalen_slot() = maxdatalen;
        Ok(file)
    }

    /// Drops the records role; the memory role is materialized empty if it
    /// was inactive.
    fn discard_records(&mut self) {
        *self.records_slot() = None;
        if self.memory_ref().is_none() {
            *self.memory_slot() = Some(SparseMemory::new());
        }
    }

    /// Drops the memory role; the memory role is materialized empty if the
    /// records role was inactive too.
    fn discard_memory(&mut self) {
        *self.memory_slot() = None;
        if self.records_ref().is_none() {
            *self.memory_slot() = Some(SparseMemory::new());
        }
    }

    /// Memory image, deriving it from records when inactive.
    fn memory(&mut self) -> Result<&SparseMemory> {
        if self.memory_ref().is_none() {
            self.apply_records()?;
        }
        self.memory_ref().ok_or(HexError::Role {
            message: "memory instance required",
        })
    }

    /// Mutable memory image, deriving it from records when inactive.
    ///
    /// Mutations through this reference do not invalidate records by
    /// themselves; use the editing operations below, or discard records
    /// explicitly.
    fn memory_mut(&mut self) -> Result<&mut SparseMemory> {
        if self.memory_ref().is_none() {
            self.apply_records()?;
        }
        self.memory_slot().as_mut().ok_or(HexError::Role {
            message: "memory instance required",
        })
    }

    /// Record sequence, deriving it from memory when inactive.
    fn records(&mut self) -> Result<&[Self::Record]> {
        if self.records_ref().is_none() {
            self.update_records()?;
        }
        self.records_ref()
            .map(Vec::as_slice)
            .ok_or(HexError::Role {
                message: "records required",
            })
    }

    /// Mutable record sequence; the memory role is dropped, since record
    /// edits invalidate it.
    fn records_mut(&mut self) -> Result<&mut Vec<Self::Record>> {
        if self.records_ref().is_none() {
            self.update_records()?;
        }
        *self.memory_slot() = None;
        self.records_slot().as_mut().ok_or(HexError::Role {
            message: "records required",
        })
    }

    /// Sets the maximum data field size, discarding records on change.
    fn set_maxdatalen(&mut self, maxdatalen: usize) -> Result<()> {
        if maxdatalen < 1 {
            return Err(HexError::meta("invalid maximum data length"));
        }
        if maxdatalen != self.maxdatalen() {
            self.discard_records();
        }
        *self.maxdatalen_slot() = maxdatalen;
        Ok(())
    }

    /// Writes bytes at an address, overwriting and merging.
    fn write(&mut self, address: u64, data: &[u8]) -> Result<()> {
        self.memory_mut()?.write(address, data);
        self.discard_records();
        Ok(())
    }

    /// Clears a range, making a memory hole.
    fn clear(&mut self, start: Option<u64>, endex: Option<u64>) -> Result<()> {
        self.memory_mut()?.clear(start, endex);
        self.discard_records();
        Ok(())
    }

    /// Clears everything outside a range.
    fn crop(&mut self, start: Option<u64>, endex: Option<u64>) -> Result<()> {
        self.memory_mut()?.crop(start, endex);
        self.discard_records();
        Ok(())
    }

    /// Deletes a range, shifting higher addresses down.
    fn delete(&mut self, start: Option<u64>, endex: Option<u64>) -> Result<()> {
        self.memory_mut()?.delete(start, endex);
        self.discard_records();
        Ok(())
    }

    /// Overwrites a range with a byte pattern.
    fn fill(&mut self, start: Option<u64>, endex: Option<u64>, pattern: &[u8]) -> Result<()> {
        self.memory_mut()?.fill(start, endex, pattern);
        self.discard_records();
        Ok(())
    }

    /// Fills only memory holes within a range with a byte pattern.
    fn flood(&mut self, start: Option<u64>, endex: Option<u64>, pattern: &[u8]) -> Result<()> {
        self.memory_mut()?.flood(start, endex, pattern);
        self.discard_records();
        Ok(())
    }

    /// Pads blocks so their boundaries align to a modulo.
    fn align(
        &mut self,
        modulo: u64,
        start: Option<u64>,
        endex: Option<u64>,
        pattern: &[u8],
    ) -> Result<()> {
        self.memory_mut()?.align(modulo, start, endex, pattern);
        self.discard_records();
        Ok(())
    }

    /// Shifts every block address by a signed offset.
    fn shift(&mut self, offset: i64) -> Result<()> {
        self.memory_mut()?.shift(offset)?;
        self.discard_records();
        Ok(())
    }

    /// Appends a single byte after the content end.
    fn append(&mut self, byte: u8) -> Result<()> {
        self.memory_mut()?.append(byte);
        self.discard_records();
        Ok(())
    }

    /// Concatenates another file's content after the content end.
    fn extend(&mut self, other: &mut Self) -> Result<()> {
        let other_memory = other.memory()?.clone();
        self.memory_mut()?.extend(&other_memory);
        self.discard_records();
        Ok(())
    }

    /// Concatenates raw bytes after the content end.
    fn extend_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.memory_mut()?.extend_bytes(data);
        self.discard_records();
        Ok(())
    }

    /// Writes another file's blocks at their own addresses.
    fn merge(&mut self, other: &mut Self) -> Result<()> {
        let other_memory = other.memory()?.clone();
        self.merge_memory(&other_memory)
    }

    /// Writes a memory image's blocks at their own addresses.
    fn merge_memory(&mut self, other: &SparseMemory) -> Result<()> {
        self.memory_mut()?.merge(other);
        self.discard_records();
        Ok(())
    }

    /// First address of a byte pattern within a range, if present.
    fn find(&mut self, item: &[u8], start: Option<u64>, endex: Option<u64>) -> Result<Option<u64>> {
        Ok(self.memory()?.find(item, start, endex))
    }

    /// First address of a byte pattern within a range; errors when absent.
    fn index(&mut self, item: &[u8], start: Option<u64>, endex: Option<u64>) -> Result<u64> {
        self.memory()?.index(item, start, endex)
    }

    /// Materializes a range as bytes, flooding holes with `fill`.
    fn read(&mut self, start: Option<u64>, endex: Option<u64>, fill: &[u8]) -> Result<Vec<u8>> {
        Ok(self.memory()?.to_bytes(start, endex, Some(fill)))
    }

    /// Borrowed view over a contiguous range.
    fn view(&mut self, start: Option<u64>, endex: Option<u64>) -> Result<&[u8]> {
        self.memory_mut()?;
        self.memory_ref()
            .ok_or(HexError::Role {
                message: "memory instance required",
            })?
            .view(start, endex)
    }

    /// Minimum programmed address.
    fn address_min(&mut self) -> Result<u64> {
        Ok(self.memory()?.start())
    }

    /// Maximum programmed address.
    fn address_max(&mut self) -> Result<u64> {
        Ok(self.memory()?.endin())
    }

    /// Memory holes between blocks.
    fn holes(&mut self) -> Result<Vec<(u64, u64)>> {
        Ok(self.memory()?.gaps(None, None))
    }

    /// Memory block spans.
    fn spans(&mut self) -> Result<Vec<(u64, u64)>> {
        Ok(self.memory()?.intervals(None, None))
    }

    /// Copies a range into a new file, optionally inheriting meta.
    fn copy_range(&mut self, start: Option<u64>, endex: Option<u64>, meta: bool) -> Result<Self> {
        let extracted = self.memory()?.extract(start, endex, None);
        let mut copied = Self::from_memory(extracted);
        if meta {
            let snapshot = self.meta();
            copied.set_meta(&snapshot)?;
        }
        Ok(copied)
    }

    /// Splits off a range into a new file, clearing it from `self`.
    fn cut(&mut self, start: Option<u64>, endex: Option<u64>, meta: bool) -> Result<Self> {
        let inner = self.memory_mut()?.cut(start, endex);
        self.discard_records();
        let mut file = Self::from_memory(inner);
        if meta {
            let snapshot = self.meta();
            file.set_meta(&snapshot)?;
        }
        Ok(file)
    }

    /// Splits into parts at the given pivot addresses.
    ///
    /// Pivots are sorted first; the endpoints are implicit, so `n` pivots
    /// yield `n + 1` parts.
    fn split(&mut self, pivots: &[u64], meta: bool) -> Result<Vec<Self>> {
        let mut pivots = pivots.to_vec();
        pivots.sort_unstable();

        let mut parts = Vec::with_capacity(pivots.len() + 1);
        let mut previous = None;
        for pivot in pivots {
            parts.push(self.copy_range(previous, Some(pivot), meta)?);
            previous = Some(pivot);
        }
        parts.push(self.copy_range(previous, None, meta)?);
        Ok(parts)
    }

    /// Converts another format's file into this format, copying memory and
    /// the supported subset of meta.
    fn convert_from<S: RecordFile>(source: &mut S) -> Result<Self> {
        let memory = source.memory()?.clone();
        let snapshot = source.meta();
        let mut target = Self::from_memory(memory);
        target.set_meta(&snapshot)?;
        Ok(target)
    }

    /// Loads a file from the filesystem (`-` reads stdin).
    fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = read_input(path.as_ref())?;
        Self::parse(&data, ParseOpts::default())
    }

    /// Saves the serialized records to the filesystem (`-` writes stdout).
    fn save(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let mut buffer = Vec::new();
        self.serialize(&mut buffer, CRLF)?;
        write_output(path.as_ref(), &buffer)
    }

    /// Role-aware equality: same role, equal contents, equal meta.
    ///
    /// Files in different roles compare unequal; derive the missing side
    /// first for a content-level comparison.
    fn file_eq(&self, other: &Self) -> bool {
        let contents_equal = match (self.memory_ref(), other.memory_ref()) {
            (Some(this), Some(that)) => this == that,
            _ => match (self.records_ref(), other.records_ref()) {
                (Some(this), Some(that)) => this == that,
                _ => false,
            },
        };
        contents_equal && self.meta() == other.meta()
    }
}

/// Splits serialized bytes into lines, keeping the terminator.
pub(crate) fn split_lines(data: &[u8]) -> impl Iterator<Item = &[u8]> {
    let mut rest = data;
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        match memchr::memchr(b'\n', rest) {
            Some(position) => {
                let (line, tail) = rest.split_at(position + 1);
                rest = tail;
                Some(line)
            }
            None => {
                let line = rest;
                rest = &[];
                Some(line)
            }
        }
    })
}

/// Generic line-oriented parse loop shared by most formats.
pub(crate) fn parse_lines<F: RecordFile>(data: &[u8], opts: ParseOpts) -> Result<F> {
    let mut records = Vec::new();

    for (index, line) in split_lines(data).enumerate() {
        let row = index + 1;

        if F::is_line_empty(line) {
            continue;
        }

        let mut record = match <F::Record as Record>::parse(line) {
            Ok(record) => record,
            Err(error) => {
                if opts.ignore_errors {
                    continue;
                }
                return Err(error.at_line(row));
            }
        };

        record.set_coords((row as isize, 0));
        let terminated = record.tag().is_file_termination();
        records.push(record);

        if opts.ignore_after_termination && terminated {
            break;
        }
    }

    F::from_records(records, None)
}

/// Reads a whole input file, `-` standing for stdin.
pub(crate) fn read_input(path: &Path) -> Result<Vec<u8>> {
    if path.as_os_str() == "-" {
        let mut data = Vec::new();
        std::io::stdin().lock().read_to_end(&mut data)?;
        Ok(data)
    } else {
        Ok(std::fs::read(path)?)
    }
}

/// Writes a whole output file, `-` standing for stdout.
pub(crate) fn write_output(path: &Path, data: &[u8]) -> Result<()> {
    if path.as_os_str() == "-" {
        std::io::stdout().lock().write_all(data)?;
        Ok(())
    } else {
        std::fs::write(path, data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_lines() {
        let lines: Vec<&[u8]> = split_lines(b"ab\r\ncd\nef").collect();
        assert_eq!(lines, [&b"ab\r\n"[..], b"cd\n", b"ef"]);

        let lines: Vec<&[u8]> = split_lines(b"").collect();
        assert!(lines.is_empty());

        let lines: Vec<&[u8]> = split_lines(b"\n\n").collect();
        assert_eq!(lines, [&b"\n"[..], b"\n"]);
    }

    #[test]
    fn test_parse_opts_default() {
        let opts = ParseOpts::default();
        assert!(!opts.ignore_errors);
        assert!(opts.ignore_after_termination);
    }
}
