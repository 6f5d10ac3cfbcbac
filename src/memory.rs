//! Sparse memory substrate.
//!
//! A [`SparseMemory`] is a totally-ordered set of non-overlapping,
//! non-adjacent byte blocks over a 64-bit address space. It backs the
//! *memory role* of every record file: decoded payload bytes live here,
//! with holes between blocks standing for unprogrammed addresses.
//!
//! Ordering and adjacency invariants are restored after every mutation:
//! writing across block boundaries merges, deleting shifts higher addresses
//! down, clearing punches holes.

use std::collections::BTreeMap;
use std::ops::Bound;

use memchr::memmem;

use crate::codec;
use crate::error::{HexError, Result};

/// Sparse memory image: disjoint byte blocks keyed by start address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SparseMemory {
    blocks: BTreeMap<u64, Vec<u8>>,
}

impl SparseMemory {
    /// Creates an empty memory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a memory from `(address, bytes)` blocks.
    ///
    /// Blocks may overlap or touch; they are written in order, later blocks
    /// overwriting earlier ones.
    pub fn from_blocks<I, B>(blocks: I) -> Self
    where
        I: IntoIterator<Item = (u64, B)>,
        B: AsRef<[u8]>,
    {
        let mut memory = Self::new();
        for (address, data) in blocks {
            memory.write(address, data.as_ref());
        }
        memory
    }

    /// Creates a memory holding a single block at `offset`.
    pub fn from_bytes(data: &[u8], offset: u64) -> Self {
        let mut memory = Self::new();
        memory.write(offset, data);
        memory
    }

    /// Exports the blocks as owned `(address, bytes)` pairs.
    pub fn to_blocks(&self) -> Vec<(u64, Vec<u8>)> {
        self.blocks
            .iter()
            .map(|(&address, data)| (address, data.clone()))
            .collect()
    }

    /// Inclusive start address of the content; 0 when empty.
    pub fn start(&self) -> u64 {
        self.blocks.keys().next().copied().unwrap_or(0)
    }

    /// Exclusive end address of the content; 0 when empty.
    pub fn endex(&self) -> u64 {
        self.blocks
            .iter()
            .next_back()
            .map(|(&address, data)| address + data.len() as u64)
            .unwrap_or(0)
    }

    /// Inclusive end address of the content; 0 when empty.
    pub fn endin(&self) -> u64 {
        self.endex().saturating_sub(1)
    }

    /// Number of content bytes (holes excluded).
    pub fn len(&self) -> usize {
        self.blocks.values().map(Vec::len).sum()
    }

    /// Tells whether no content byte is stored.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Number of stored blocks.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Reads the byte at `address`, if programmed.
    pub fn peek(&self, address: u64) -> Option<u8> {
        let (&start, data) = self
            .blocks
            .range((Bound::Unbounded, Bound::Included(address)))
            .next_back()?;
        data.get((address - start) as usize).copied()
    }

    /// Writes `data` at `address`, overwriting existing content and merging
    /// any block it overlaps or touches.
    pub fn write(&mut self, address: u64, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let endex = address + data.len() as u64;

        // Collect blocks overlapping or adjacent to [address, endex).
        let mut merged_start = address;
        let mut merged: Vec<(u64, Vec<u8>)> = Vec::new();
        let keys: Vec<u64> = self
            .blocks
            .range((Bound::Unbounded, Bound::Included(endex)))
            .rev()
            .take_while(|&(&start, block)| start + block.len() as u64 >= address)
            .map(|(&start, _)| start)
            .collect();
        for key in keys {
            if let Some(block) = self.blocks.remove(&key) {
                merged_start = merged_start.min(key);
                merged.push((key, block));
            }
        }

        let merged_endex = merged
            .iter()
            .map(|(start, block)| start + block.len() as u64)
            .max()
            .unwrap_or(endex)
            .max(endex);

        let mut buffer = vec![0u8; (merged_endex - merged_start) as usize];
        for (start, block) in &merged {
            let offset = (start - merged_start) as usize;
            buffer[offset..offset + block.len()].copy_from_slice(block);
        }
        let offset = (address - merged_start) as usize;
        buffer[offset..offset + data.len()].copy_from_slice(data);

        self.blocks.insert(merged_start, buffer);
    }

    /// Appends a single byte at [`endex`](Self::endex).
    pub fn append(&mut self, byte: u8) {
        self.write(self.endex(), &[byte]);
    }

    /// Appends `data` at [`endex`](Self::endex).
    pub fn extend_bytes(&mut self, data: &[u8]) {
        self.write(self.endex(), data);
    }

    /// Concatenates another memory: each block of `other` lands at
    /// `self.endex() + block_address`.
    pub fn extend(&mut self, other: &SparseMemory) {
        let offset = self.endex();
        for (&address, data) in &other.blocks {
            self.write(offset + address, data);
        }
    }

    /// Writes every block of `other` at its own address.
    pub fn merge(&mut self, other: &SparseMemory) {
        for (&address, data) in &other.blocks {
            self.write(address, data);
        }
    }

    fn bounds(&self, start: Option<u64>, endex: Option<u64>) -> (u64, u64) {
        let start = start.unwrap_or_else(|| self.start());
        let endex = endex.unwrap_or_else(|| self.endex()).max(start);
        (start, endex)
    }

    /// Clears the range, making a memory hole.
    pub fn clear(&mut self, start: Option<u64>, endex: Option<u64>) {
        let (start, endex) = self.bounds(start, endex);
        if start >= endex {
            return;
        }

        let mut rebuilt = BTreeMap::new();
        for (address, data) in std::mem::take(&mut self.blocks) {
            let block_endex = address + data.len() as u64;
            if block_endex <= start || address >= endex {
                rebuilt.insert(address, data);
                continue;
            }
            if address < start {
                let head = data[..(start - address) as usize].to_vec();
                rebuilt.insert(address, head);
            }
            if block_endex > endex {
                let tail = data[(endex - address) as usize..].to_vec();
                rebuilt.insert(endex, tail);
            }
        }
        self.blocks = rebuilt;
    }

    /// Clears everything outside the range.
    pub fn crop(&mut self, start: Option<u64>, endex: Option<u64>) {
        let (start, endex) = self.bounds(start, endex);
        let content_endex = self.endex();
        if start > 0 {
            self.clear(Some(0), Some(start));
        }
        if endex < content_endex {
            self.clear(Some(endex), Some(content_endex));
        }
    }

    /// Deletes the range, shifting all higher addresses down to close it.
    pub fn delete(&mut self, start: Option<u64>, endex: Option<u64>) {
        let (start, endex) = self.bounds(start, endex);
        if start >= endex {
            return;
        }
        let length = endex - start;

        self.clear(Some(start), Some(endex));
        let mut rebuilt = SparseMemory::new();
        for (address, data) in std::mem::take(&mut self.blocks) {
            if address >= endex {
                rebuilt.write(address - length, &data);
            } else {
                rebuilt.write(address, &data);
            }
        }
        self.blocks = rebuilt.blocks;
    }

    /// Splits off the range into a new memory, clearing it from `self`.
    pub fn cut(&mut self, start: Option<u64>, endex: Option<u64>) -> SparseMemory {
        let (start, endex) = self.bounds(start, endex);
        let inner = self.extract(Some(start), Some(endex), None);
        self.clear(Some(start), Some(endex));
        inner
    }

    /// Copies the range into a new memory, keeping absolute addresses.
    ///
    /// With a `pattern`, the holes within the range are flooded in the copy.
    pub fn extract(
        &self,
        start: Option<u64>,
        endex: Option<u64>,
        pattern: Option<&[u8]>,
    ) -> SparseMemory {
        let (start, endex) = self.bounds(start, endex);
        let mut inner = SparseMemory::new();
        for (&address, data) in &self.blocks {
            let block_endex = address + data.len() as u64;
            if block_endex <= start || address >= endex {
                continue;
            }
            let from = start.max(address);
            let to = endex.min(block_endex);
            let slice = &data[(from - address) as usize..(to - address) as usize];
            inner.write(from, slice);
        }
        if let Some(pattern) = pattern {
            inner.flood(Some(start), Some(endex), pattern);
        }
        inner
    }

    /// Shifts every block by a signed offset.
    pub fn shift(&mut self, offset: i64) -> Result<()> {
        if offset == 0 || self.blocks.is_empty() {
            return Ok(());
        }
        if offset < 0 && self.start() < offset.unsigned_abs() {
            return Err(HexError::FieldOverflow { field: "address" });
        }

        let blocks = std::mem::take(&mut self.blocks);
        for (address, data) in blocks {
            let shifted = if offset < 0 {
                address - offset.unsigned_abs()
            } else {
                address
                    .checked_add(offset as u64)
                    .ok_or(HexError::FieldOverflow { field: "address" })?
            };
            self.blocks.insert(shifted, data);
        }
        Ok(())
    }

    fn repeat_pattern(pattern: &[u8], length: usize) -> Vec<u8> {
        assert!(!pattern.is_empty(), "empty pattern");
        pattern.iter().copied().cycle().take(length).collect()
    }

    /// Overwrites the whole range with a repeating byte pattern.
    ///
    /// # Panics
    ///
    /// Panics when `pattern` is empty.
    pub fn fill(&mut self, start: Option<u64>, endex: Option<u64>, pattern: &[u8]) {
        let (start, endex) = self.bounds(start, endex);
        if start >= endex {
            return;
        }
        let buffer = Self::repeat_pattern(pattern, (endex - start) as usize);
        self.write(start, &buffer);
    }

    /// Fills only the holes within the range with a repeating byte pattern.
    ///
    /// # Panics
    ///
    /// Panics when `pattern` is empty.
    pub fn flood(&mut self, start: Option<u64>, endex: Option<u64>, pattern: &[u8]) {
        let (start, endex) = self.bounds(start, endex);
        for (gap_start, gap_endex) in self.gaps(Some(start), Some(endex)) {
            let buffer = Self::repeat_pattern(pattern, (gap_endex - gap_start) as usize);
            self.write(gap_start, &buffer);
        }
    }

    /// Pads block boundaries so each block starts and ends on a multiple of
    /// `modulo`, flooding the created margins with `pattern`.
    ///
    /// # Panics
    ///
    /// Panics when `modulo` is zero or `pattern` is empty.
    pub fn align(
        &mut self,
        modulo: u64,
        start: Option<u64>,
        endex: Option<u64>,
        pattern: &[u8],
    ) {
        assert!(modulo > 0, "non-positive modulo");
        let (start, endex) = self.bounds(start, endex);
        let spans = self.intervals(Some(start), Some(endex));
        for (span_start, span_endex) in spans {
            let aligned_start = span_start - (span_start % modulo);
            let rem = span_endex % modulo;
            let aligned_endex = if rem == 0 {
                span_endex
            } else {
                span_endex + (modulo - rem)
            };
            self.flood(Some(aligned_start), Some(aligned_endex), pattern);
        }
    }

    /// First address where `item` occurs within the range, if any.
    ///
    /// The match must lie within a single block; content cannot straddle a
    /// memory hole.
    pub fn find(&self, item: &[u8], start: Option<u64>, endex: Option<u64>) -> Option<u64> {
        if item.is_empty() {
            return None;
        }
        let (start, endex) = self.bounds(start, endex);
        let finder = memmem::Finder::new(item);
        for (&address, data) in &self.blocks {
            let block_endex = address + data.len() as u64;
            if block_endex <= start || address >= endex {
                continue;
            }
            let from = start.max(address);
            let to = endex.min(block_endex);
            let slice = &data[(from - address) as usize..(to - address) as usize];
            if let Some(offset) = finder.find(slice) {
                return Some(from + offset as u64);
            }
        }
        None
    }

    /// Like [`find`](Self::find), but errors when `item` is absent.
    pub fn index(&self, item: &[u8], start: Option<u64>, endex: Option<u64>) -> Result<u64> {
        self.find(item, start, endex).ok_or(HexError::NotFound)
    }

    /// Borrowed view over a contiguous range.
    ///
    /// Errors with [`HexError::NonContiguous`] when the range spans a hole
    /// or reaches outside the content.
    pub fn view(&self, start: Option<u64>, endex: Option<u64>) -> Result<&[u8]> {
        let (start, endex) = self.bounds(start, endex);
        if start >= endex {
            return Ok(&[]);
        }
        let (&block_start, data) = self
            .blocks
            .range((Bound::Unbounded, Bound::Included(start)))
            .next_back()
            .ok_or(HexError::NonContiguous)?;
        let block_endex = block_start + data.len() as u64;
        if endex > block_endex {
            return Err(HexError::NonContiguous);
        }
        Ok(&data[(start - block_start) as usize..(endex - block_start) as usize])
    }

    /// Materializes the range as bytes, flooding holes with `pattern`
    /// (a zero byte when `None`).
    pub fn to_bytes(
        &self,
        start: Option<u64>,
        endex: Option<u64>,
        pattern: Option<&[u8]>,
    ) -> Vec<u8> {
        let (start, endex) = self.bounds(start, endex);
        if start >= endex {
            return Vec::new();
        }
        let pattern = pattern.unwrap_or(b"\x00");
        let mut buffer = Self::repeat_pattern(pattern, (endex - start) as usize);
        for (&address, data) in &self.blocks {
            let block_endex = address + data.len() as u64;
            if block_endex <= start || address >= endex {
                continue;
            }
            let from = start.max(address);
            let to = endex.min(block_endex);
            let offset = (from - start) as usize;
            buffer[offset..offset + (to - from) as usize]
                .copy_from_slice(&data[(from - address) as usize..(to - address) as usize]);
        }
        buffer
    }

    /// Holes between blocks within the range.
    pub fn gaps(&self, start: Option<u64>, endex: Option<u64>) -> Vec<(u64, u64)> {
        let (start, endex) = self.bounds(start, endex);
        let mut gaps = Vec::new();
        let mut cursor = start;
        for (span_start, span_endex) in self.intervals(Some(start), Some(endex)) {
            if span_start > cursor {
                gaps.push((cursor, span_start));
            }
            cursor = cursor.max(span_endex);
        }
        if cursor < endex {
            gaps.push((cursor, endex));
        }
        gaps
    }

    /// Block spans clipped to the range.
    pub fn intervals(&self, start: Option<u64>, endex: Option<u64>) -> Vec<(u64, u64)> {
        let (start, endex) = self.bounds(start, endex);
        self.blocks
            .iter()
            .filter_map(|(&address, data)| {
                let block_endex = address + data.len() as u64;
                if block_endex <= start || address >= endex {
                    None
                } else {
                    Some((start.max(address), endex.min(block_endex)))
                }
            })
            .collect()
    }

    /// Yields `(address, chunk)` pairs of at most `window` bytes per block.
    ///
    /// With `align`, the first chunk of each block is truncated so following
    /// chunks start on `window` boundaries in the absolute address space.
    ///
    /// # Panics
    ///
    /// Panics when `window` is zero.
    pub fn chop(&self, window: usize, align: bool) -> impl Iterator<Item = (u64, &[u8])> {
        assert!(window > 0, "non-positive window");
        self.blocks.iter().flat_map(move |(&address, data)| {
            let align_base = if align { address } else { 0 };
            let mut offset = 0u64;
            codec::chop(data, window, align_base).map(move |chunk| {
                let chunk_address = address + offset;
                offset += chunk.len() as u64;
                (chunk_address, chunk)
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn blocks(memory: &SparseMemory) -> Vec<(u64, Vec<u8>)> {
        memory.to_blocks()
    }

    #[test]
    fn test_empty() {
        let memory = SparseMemory::new();
        assert!(memory.is_empty());
        assert_eq!(memory.start(), 0);
        assert_eq!(memory.endex(), 0);
        assert_eq!(memory.len(), 0);
        assert_eq!(memory.to_bytes(None, None, None), b"");
    }

    #[test]
    fn test_write_disjoint() {
        let memory = SparseMemory::from_blocks([(123, b"abc".to_vec()), (456, b"xyz".to_vec())]);
        assert_eq!(
            blocks(&memory),
            [(123, b"abc".to_vec()), (456, b"xyz".to_vec())]
        );
        assert_eq!(memory.start(), 123);
        assert_eq!(memory.endex(), 459);
        assert_eq!(memory.endin(), 458);
        assert_eq!(memory.len(), 6);
    }

    #[test]
    fn test_write_overlap_merges() {
        let mut memory = SparseMemory::from_bytes(b"abc", 10);
        memory.write(12, b"XY");
        assert_eq!(blocks(&memory), [(10, b"abXY".to_vec())]);
    }

    #[test]
    fn test_write_adjacent_merges() {
        let mut memory = SparseMemory::from_bytes(b"abc", 10);
        memory.write(13, b"def");
        memory.write(7, b"xyz");
        assert_eq!(blocks(&memory), [(7, b"xyzabcdef".to_vec())]);
    }

    #[test]
    fn test_write_bridges_blocks() {
        let mut memory = SparseMemory::from_blocks([(10, b"abc".to_vec()), (20, b"xyz".to_vec())]);
        memory.write(12, &[b'?'; 9]);
        assert_eq!(blocks(&memory), [(10, b"ab?????????yz".to_vec())]);
    }

    #[test]
    fn test_peek() {
        let memory = SparseMemory::from_blocks([(123, b"abc".to_vec()), (456, b"xyz".to_vec())]);
        assert_eq!(memory.peek(124), Some(b'b'));
        assert_eq!(memory.peek(457), Some(b'y'));
        assert_eq!(memory.peek(200), None);
        assert_eq!(memory.peek(0), None);
    }

    #[test]
    fn test_clear_hole() {
        let mut memory =
            SparseMemory::from_blocks([(123, b"abc".to_vec()), (130, b"xyz".to_vec())]);
        memory.clear(Some(124), Some(132));
        assert_eq!(blocks(&memory), [(123, b"a".to_vec()), (132, b"z".to_vec())]);
    }

    #[test]
    fn test_crop() {
        let mut memory =
            SparseMemory::from_blocks([(123, b"abc".to_vec()), (130, b"xyz".to_vec())]);
        memory.crop(Some(124), Some(132));
        assert_eq!(
            blocks(&memory),
            [(124, b"bc".to_vec()), (130, b"xy".to_vec())]
        );
    }

    #[test]
    fn test_delete_shifts_down() {
        let mut memory =
            SparseMemory::from_blocks([(123, b"abc".to_vec()), (130, b"xyz".to_vec())]);
        memory.delete(Some(124), Some(132));
        assert_eq!(blocks(&memory), [(123, b"az".to_vec())]);
    }

    #[test]
    fn test_cut() {
        let mut memory =
            SparseMemory::from_blocks([(123, b"abc".to_vec()), (130, b"xyz".to_vec())]);
        let inner = memory.cut(Some(124), Some(132));
        assert_eq!(
            blocks(&inner),
            [(124, b"bc".to_vec()), (130, b"xy".to_vec())]
        );
        assert_eq!(blocks(&memory), [(123, b"a".to_vec()), (132, b"z".to_vec())]);
    }

    #[test]
    fn test_extend() {
        let mut first = SparseMemory::from_bytes(b"abc", 123);
        let second = SparseMemory::from_bytes(b"xyz", 456);
        first.extend(&second);
        assert_eq!(
            blocks(&first),
            [(123, b"abc".to_vec()), (582, b"xyz".to_vec())]
        );
        first.extend_bytes(b"789");
        assert_eq!(
            blocks(&first),
            [(123, b"abc".to_vec()), (582, b"xyz789".to_vec())]
        );
    }

    #[test]
    fn test_shift() {
        let mut memory =
            SparseMemory::from_blocks([(123, b"abc".to_vec()), (456, b"xyz".to_vec())]);
        memory.shift(1000).unwrap();
        assert_eq!(
            blocks(&memory),
            [(1123, b"abc".to_vec()), (1456, b"xyz".to_vec())]
        );
        memory.shift(-1000).unwrap();
        assert_eq!(memory.start(), 123);
        assert!(memory.shift(-124).is_err());
    }

    #[test]
    fn test_fill() {
        let mut memory =
            SparseMemory::from_blocks([(123, b"abc".to_vec()), (130, b"xyz".to_vec())]);
        memory.fill(Some(124), Some(132), b".");
        assert_eq!(blocks(&memory), [(123, b"a........z".to_vec())]);
    }

    #[test]
    fn test_flood() {
        let mut memory =
            SparseMemory::from_blocks([(123, b"abc".to_vec()), (130, b"xyz".to_vec())]);
        memory.flood(Some(124), Some(132), b".");
        assert_eq!(blocks(&memory), [(123, b"abc....xyz".to_vec())]);
    }

    #[test]
    fn test_align() {
        let mut memory =
            SparseMemory::from_blocks([(123, b"abc".to_vec()), (134, b"xyz".to_vec())]);
        memory.align(4, None, None, b".");
        assert_eq!(
            blocks(&memory),
            [(120, b"...abc..".to_vec()), (132, b"..xyz...".to_vec())]
        );
    }

    #[test]
    fn test_find_index() {
        let memory = SparseMemory::from_blocks([(123, b"abc".to_vec()), (456, b"xyz".to_vec())]);
        assert_eq!(memory.find(b"yz", None, None), Some(457));
        assert_eq!(memory.find(b"b", None, None), Some(124));
        assert_eq!(memory.find(b"?", None, None), None);
        assert_eq!(memory.index(b"yz", None, None).unwrap(), 457);
        assert!(matches!(
            memory.index(b"?", None, None),
            Err(HexError::NotFound)
        ));
    }

    #[test]
    fn test_find_does_not_straddle_holes() {
        let memory = SparseMemory::from_blocks([(10, b"ab".to_vec()), (12, b"cd".to_vec())]);
        // Adjacent blocks merge, so this *is* found.
        assert_eq!(memory.find(b"bc", None, None), Some(11));

        let memory = SparseMemory::from_blocks([(10, b"ab".to_vec()), (13, b"cd".to_vec())]);
        assert_eq!(memory.find(b"bc", None, None), None);
    }

    #[test]
    fn test_view() {
        let memory = SparseMemory::from_blocks([(123, b"abc".to_vec()), (456, b"xyz".to_vec())]);
        assert_eq!(memory.view(Some(456), Some(458)).unwrap(), b"xy");
        assert!(matches!(
            memory.view(None, None),
            Err(HexError::NonContiguous)
        ));
        assert!(matches!(
            memory.view(Some(100), Some(124)),
            Err(HexError::NonContiguous)
        ));
    }

    #[test]
    fn test_to_bytes_patterns() {
        let memory = SparseMemory::from_blocks([(123, b"abc".to_vec()), (130, b"xyz".to_vec())]);
        assert_eq!(
            memory.to_bytes(Some(124), Some(132), None),
            b"bc\x00\x00\x00\x00xy"
        );
        assert_eq!(memory.to_bytes(Some(124), Some(132), Some(b".")), b"bc....xy");
    }

    #[test]
    fn test_gaps_and_intervals() {
        let memory = SparseMemory::from_blocks([
            (123, b"abc".to_vec()),
            (456, b"xyz".to_vec()),
            (789, b"?!".to_vec()),
        ]);
        assert_eq!(memory.gaps(None, None), [(126, 456), (459, 789)]);
        assert_eq!(
            memory.intervals(None, None),
            [(123, 126), (456, 459), (789, 791)]
        );
    }

    #[test]
    fn test_extract_with_pattern() {
        let memory = SparseMemory::from_blocks([(123, b"abc".to_vec()), (130, b"xyz".to_vec())]);
        let copy = memory.extract(Some(124), Some(132), Some(b"."));
        assert_eq!(blocks(&copy), [(124, b"bc....xy".to_vec())]);
        // Source untouched.
        assert_eq!(memory.block_count(), 2);
    }

    #[test]
    fn test_chop_plain() {
        let memory = SparseMemory::from_bytes(&[0u8; 40], 0);
        let chunks: Vec<(u64, usize)> = memory
            .chop(16, false)
            .map(|(address, chunk)| (address, chunk.len()))
            .collect();
        assert_eq!(chunks, [(0, 16), (16, 16), (32, 8)]);
    }

    #[test]
    fn test_chop_aligned() {
        let memory = SparseMemory::from_bytes(&[0u8; 20], 10);
        let chunks: Vec<(u64, usize)> = memory
            .chop(16, true)
            .map(|(address, chunk)| (address, chunk.len()))
            .collect();
        assert_eq!(chunks, [(10, 6), (16, 14)]);
    }

    #[test]
    fn test_chop_multiple_blocks() {
        let memory = SparseMemory::from_blocks([(0, vec![0u8; 3]), (100, vec![0u8; 5])]);
        let chunks: Vec<(u64, usize)> = memory
            .chop(4, false)
            .map(|(address, chunk)| (address, chunk.len()))
            .collect();
        assert_eq!(chunks, [(0, 3), (100, 4), (104, 1)]);
    }

    #[test]
    fn test_merge() {
        let mut memory = SparseMemory::from_bytes(b"<<<?????>>>", 450);
        memory.merge(&SparseMemory::from_bytes(b"xyz", 456));
        assert_eq!(blocks(&memory), [(450, b"<<<???xyz>>".to_vec())]);
    }
}
