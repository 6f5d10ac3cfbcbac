//! hexcast - Hex Record File Library and Toolkit
//!
//! This library reads, writes, converts, edits and validates *hex record
//! files*: the line-oriented text formats used to carry binary payloads
//! (firmware, EEPROM images, configuration) between tools.
//!
//! # Features
//!
//! - **Eight formats**: Intel HEX, Motorola S-record, Tektronix extended
//!   HEX, ASCII-HEX, TI-TXT, MOS Technology, Atmel generic (AVR), and a
//!   raw-binary passthrough
//! - **Byte-exact round-trip**: records keep their consistency fields and
//!   surrounding trivia through parse and re-serialization
//! - **Dual-role files**: every file is a record sequence and/or a sparse
//!   memory image with meta information, converted lazily on demand
//! - **Sparse memory editing**: write/clear/crop/cut/fill/flood/shift and
//!   friends over a 64-bit address space with holes
//! - **Strict validation**: per-record checksum/count/range checks plus
//!   per-format structural checks with tunable strictness
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use hexcast::{load, IhexFile, RecordFile};
//!
//! fn main() -> hexcast::Result<()> {
//!     // Load any registered format, guessing by extension or content.
//!     let mut file = load("firmware.hex", None)?;
//!     println!("spans: {:?}", file.memory()?.intervals(None, None));
//!
//!     // Or work with a concrete format directly.
//!     let mut ihex = IhexFile::from_bytes(b"\x12\x34", 0x8000);
//!     ihex.save("patch.hex")?;
//!     Ok(())
//! }
//! ```
//!
//! # Format registry
//!
//! Formats are registered under short lowercase names, in priority order:
//! `ihex`, `srec`, `asciihex`, `titxt`, `xtek`, `mos`, `avr`, `raw`. The
//! raw format parses anything, so it always comes last. [`load`] binds the
//! input format by name, file extension, or brute force; [`convert`] and
//! [`merge`] do the same for their outputs.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod codec;
pub mod error;
pub mod file;
pub mod formats;
pub mod memory;
pub mod record;

pub use error::{HexError, Result};
pub use file::{Meta, ParseOpts, RecordFile, CRLF};
pub use formats::asciihex::AsciiHexFile;
pub use formats::avr::AvrFile;
pub use formats::ihex::IhexFile;
pub use formats::mos::MosFile;
pub use formats::raw::RawFile;
pub use formats::srec::SrecFile;
pub use formats::titxt::TiTxtFile;
pub use formats::xtek::XtekFile;
pub use memory::SparseMemory;
pub use record::{colorize_tokens, FieldInit, Record, Tag, TokenKind, Tokens};

use std::io::Write;
use std::path::Path;

/// Registered format names, in priority order.
///
/// The raw format parses any input, so it stays last for brute-force
/// format binding.
pub const FORMAT_NAMES: &[&str] = &[
    "ihex", "srec", "asciihex", "titxt", "xtek", "mos", "avr", "raw",
];

/// A record file of any registered format.
#[derive(Debug, Clone, PartialEq)]
pub enum AnyFile {
    /// Intel HEX.
    Ihex(IhexFile),
    /// Motorola S-record.
    Srec(SrecFile),
    /// ASCII-HEX.
    AsciiHex(AsciiHexFile),
    /// TI-TXT.
    TiTxt(TiTxtFile),
    /// Tektronix extended HEX.
    Xtek(XtekFile),
    /// MOS Technology.
    Mos(MosFile),
    /// Atmel generic (AVR).
    Avr(AvrFile),
    /// Raw binary.
    Raw(RawFile),
}

impl AnyFile {
    /// Registered name of the wrapped format.
    pub fn format_name(&self) -> &'static str {
        match self {
            AnyFile::Ihex(_) => "ihex",
            AnyFile::Srec(_) => "srec",
            AnyFile::AsciiHex(_) => "asciihex",
            AnyFile::TiTxt(_) => "titxt",
            AnyFile::Xtek(_) => "xtek",
            AnyFile::Mos(_) => "mos",
            AnyFile::Avr(_) => "avr",
            AnyFile::Raw(_) => "raw",
        }
    }

    /// Parses serialized bytes as the named format.
    pub fn parse_as(name: &str, data: &[u8], opts: ParseOpts) -> Result<Self> {
        match name {
            "ihex" => Ok(AnyFile::Ihex(IhexFile::parse(data, opts)?)),
            "srec" => Ok(AnyFile::Srec(SrecFile::parse(data, opts)?)),
            "asciihex" => Ok(AnyFile::AsciiHex(AsciiHexFile::parse(data, opts)?)),
            "titxt" => Ok(AnyFile::TiTxt(TiTxtFile::parse(data, opts)?)),
            "xtek" => Ok(AnyFile::Xtek(XtekFile::parse(data, opts)?)),
            "mos" => Ok(AnyFile::Mos(MosFile::parse(data, opts)?)),
            "avr" => Ok(AnyFile::Avr(AvrFile::parse(data, opts)?)),
            "raw" => Ok(AnyFile::Raw(RawFile::parse(data, opts)?)),
            _ => Err(HexError::UnknownFormat {
                name: name.to_string(),
            }),
        }
    }

    /// Builds an empty file of the named format in memory role, applying
    /// the supported subset of `meta`.
    pub fn build_as(name: &str, memory: SparseMemory, meta: &Meta) -> Result<Self> {
        match name {
            "ihex" => {
                let mut file = IhexFile::from_memory(memory);
                file.set_meta(meta)?;
                Ok(AnyFile::Ihex(file))
            }
            "srec" => {
                let mut file = SrecFile::from_memory(memory);
                file.set_meta(meta)?;
                Ok(AnyFile::Srec(file))
            }
            "asciihex" => {
                let mut file = AsciiHexFile::from_memory(memory);
                file.set_meta(meta)?;
                Ok(AnyFile::AsciiHex(file))
            }
            "titxt" => {
                let mut file = TiTxtFile::from_memory(memory);
                file.set_meta(meta)?;
                Ok(AnyFile::TiTxt(file))
            }
            "xtek" => {
                let mut file = XtekFile::from_memory(memory);
                file.set_meta(meta)?;
                Ok(AnyFile::Xtek(file))
            }
            "mos" => {
                let mut file = MosFile::from_memory(memory);
                file.set_meta(meta)?;
                Ok(AnyFile::Mos(file))
            }
            "avr" => Ok(AnyFile::Avr(AvrFile::from_memory(memory))),
            "raw" => {
                let mut file = RawFile::from_memory(memory);
                file.set_meta(meta)?;
                Ok(AnyFile::Raw(file))
            }
            _ => Err(HexError::UnknownFormat {
                name: name.to_string(),
            }),
        }
    }

    /// Memory image, deriving it from records when inactive.
    pub fn memory(&mut self) -> Result<&SparseMemory> {
        match self {
            AnyFile::Ihex(file) => file.memory(),
            AnyFile::Srec(file) => file.memory(),
            AnyFile::AsciiHex(file) => file.memory(),
            AnyFile::TiTxt(file) => file.memory(),
            AnyFile::Xtek(file) => file.memory(),
            AnyFile::Mos(file) => file.memory(),
            AnyFile::Avr(file) => file.memory(),
            AnyFile::Raw(file) => file.memory(),
        }
    }

    /// Snapshot of the stored meta values.
    pub fn meta(&self) -> Meta {
        match self {
            AnyFile::Ihex(file) => file.meta(),
            AnyFile::Srec(file) => file.meta(),
            AnyFile::AsciiHex(file) => file.meta(),
            AnyFile::TiTxt(file) => file.meta(),
            AnyFile::Xtek(file) => file.meta(),
            AnyFile::Mos(file) => file.meta(),
            AnyFile::Avr(file) => file.meta(),
            AnyFile::Raw(file) => file.meta(),
        }
    }

    /// Writes a memory image's blocks over this file's memory.
    pub fn merge_memory(&mut self, other: &SparseMemory) -> Result<()> {
        match self {
            AnyFile::Ihex(file) => file.merge_memory(other),
            AnyFile::Srec(file) => file.merge_memory(other),
            AnyFile::AsciiHex(file) => file.merge_memory(other),
            AnyFile::TiTxt(file) => file.merge_memory(other),
            AnyFile::Xtek(file) => file.merge_memory(other),
            AnyFile::Mos(file) => file.merge_memory(other),
            AnyFile::Avr(file) => file.merge_memory(other),
            AnyFile::Raw(file) => file.merge_memory(other),
        }
    }

    /// Shifts every block address by a signed offset.
    pub fn shift(&mut self, offset: i64) -> Result<()> {
        match self {
            AnyFile::Ihex(file) => file.shift(offset),
            AnyFile::Srec(file) => file.shift(offset),
            AnyFile::AsciiHex(file) => file.shift(offset),
            AnyFile::TiTxt(file) => file.shift(offset),
            AnyFile::Xtek(file) => file.shift(offset),
            AnyFile::Mos(file) => file.shift(offset),
            AnyFile::Avr(file) => file.shift(offset),
            AnyFile::Raw(file) => file.shift(offset),
        }
    }

    /// Clears everything outside a range.
    pub fn crop(&mut self, start: Option<u64>, endex: Option<u64>) -> Result<()> {
        match self {
            AnyFile::Ihex(file) => file.crop(start, endex),
            AnyFile::Srec(file) => file.crop(start, endex),
            AnyFile::AsciiHex(file) => file.crop(start, endex),
            AnyFile::TiTxt(file) => file.crop(start, endex),
            AnyFile::Xtek(file) => file.crop(start, endex),
            AnyFile::Mos(file) => file.crop(start, endex),
            AnyFile::Avr(file) => file.crop(start, endex),
            AnyFile::Raw(file) => file.crop(start, endex),
        }
    }

    /// Serializes every record onto a stream.
    pub fn serialize<W: Write>(&mut self, stream: &mut W, end: &[u8]) -> Result<()> {
        match self {
            AnyFile::Ihex(file) => file.serialize(stream, end),
            AnyFile::Srec(file) => file.serialize(stream, end),
            AnyFile::AsciiHex(file) => file.serialize(stream, end),
            AnyFile::TiTxt(file) => file.serialize(stream, end),
            AnyFile::Xtek(file) => file.serialize(stream, end),
            AnyFile::Mos(file) => file.serialize(stream, end),
            AnyFile::Avr(file) => file.serialize(stream, end),
            AnyFile::Raw(file) => file.serialize(stream, end),
        }
    }

    /// Writes record tokens onto a stream, optionally ANSI-colorized.
    pub fn print<W: Write>(&mut self, stream: &mut W, color: bool, end: &[u8]) -> Result<()> {
        match self {
            AnyFile::Ihex(file) => file.print(stream, color, end),
            AnyFile::Srec(file) => file.print(stream, color, end),
            AnyFile::AsciiHex(file) => file.print(stream, color, end),
            AnyFile::TiTxt(file) => file.print(stream, color, end),
            AnyFile::Xtek(file) => file.print(stream, color, end),
            AnyFile::Mos(file) => file.print(stream, color, end),
            AnyFile::Avr(file) => file.print(stream, color, end),
            AnyFile::Raw(file) => file.print(stream, color, end),
        }
    }

    /// Runs the format's structural record checks with default strictness.
    pub fn validate_records(&mut self) -> Result<()> {
        match self {
            AnyFile::Ihex(file) => file.validate_records(),
            AnyFile::Srec(file) => file.validate_records(),
            AnyFile::AsciiHex(file) => file.validate_records(),
            AnyFile::TiTxt(file) => file.validate_records(),
            AnyFile::Xtek(file) => file.validate_records(),
            AnyFile::Mos(file) => file.validate_records(),
            AnyFile::Avr(file) => file.validate_records(),
            AnyFile::Raw(file) => file.validate_records(),
        }
    }

    /// Saves the serialized records to the filesystem (`-` for stdout).
    pub fn save(&mut self, path: impl AsRef<Path>) -> Result<()> {
        match self {
            AnyFile::Ihex(file) => file.save(path),
            AnyFile::Srec(file) => file.save(path),
            AnyFile::AsciiHex(file) => file.save(path),
            AnyFile::TiTxt(file) => file.save(path),
            AnyFile::Xtek(file) => file.save(path),
            AnyFile::Mos(file) => file.save(path),
            AnyFile::Avr(file) => file.save(path),
            AnyFile::Raw(file) => file.save(path),
        }
    }

    /// Converts this file into another registered format, carrying memory
    /// and the shared subset of meta.
    pub fn convert_to(&mut self, name: &str) -> Result<Self> {
        let memory = self.memory()?.clone();
        let meta = self.meta();
        Self::build_as(name, memory, &meta)
    }

    /// Creates an empty file of the named format with its own defaults.
    pub fn empty(name: &str) -> Result<Self> {
        match name {
            "ihex" => Ok(AnyFile::Ihex(IhexFile::default())),
            "srec" => Ok(AnyFile::Srec(SrecFile::default())),
            "asciihex" => Ok(AnyFile::AsciiHex(AsciiHexFile::default())),
            "titxt" => Ok(AnyFile::TiTxt(TiTxtFile::default())),
            "xtek" => Ok(AnyFile::Xtek(XtekFile::default())),
            "mos" => Ok(AnyFile::Mos(MosFile::default())),
            "avr" => Ok(AnyFile::Avr(AvrFile::default())),
            "raw" => Ok(AnyFile::Raw(RawFile::default())),
            _ => Err(HexError::UnknownFormat {
                name: name.to_string(),
            }),
        }
    }
}

fn extensions_of(name: &str) -> &'static [&'static str] {
    match name {
        "ihex" => IhexFile::FILE_EXT,
        "srec" => SrecFile::FILE_EXT,
        "asciihex" => AsciiHexFile::FILE_EXT,
        "titxt" => TiTxtFile::FILE_EXT,
        "xtek" => XtekFile::FILE_EXT,
        "mos" => MosFile::FILE_EXT,
        "avr" => AvrFile::FILE_EXT,
        "raw" => RawFile::FILE_EXT,
        _ => &[],
    }
}

/// Guesses the record format name from a file extension.
///
/// The first registered format claiming the extension wins.
///
/// # Examples
///
/// ```
/// assert_eq!(hexcast::guess_format_name("simple.hex").unwrap(), "ihex");
/// assert_eq!(hexcast::guess_format_name("simple.s19").unwrap(), "srec");
/// assert_eq!(hexcast::guess_format_name("data.dat").unwrap(), "raw");
/// ```
pub fn guess_format_name(path: &str) -> Result<&'static str> {
    let extension = match path.rfind('.') {
        Some(position) => path[position..].to_ascii_lowercase(),
        None => String::new(),
    };

    for &name in FORMAT_NAMES {
        if extensions_of(name).contains(&extension.as_str()) {
            return Ok(name);
        }
    }
    Err(HexError::UnknownExtension { extension })
}

/// Loads a record file from the filesystem (`-` reads stdin).
///
/// With an explicit `format` name, only that parser runs. Otherwise the
/// format is guessed from the file extension; if that fails (or the input
/// is stdin), every registered parser is tried in priority order.
pub fn load(path: &str, format: Option<&str>) -> Result<AnyFile> {
    let data = file::read_input(Path::new(path))?;
    let opts = ParseOpts::default();

    if let Some(name) = format {
        return AnyFile::parse_as(name, &data, opts);
    }

    if path != "-" {
        if let Ok(name) = guess_format_name(path) {
            if let Ok(parsed) = AnyFile::parse_as(name, &data, opts) {
                return Ok(parsed);
            }
        }
    }

    let mut last_error = HexError::UnknownFormat {
        name: String::new(),
    };
    for &name in FORMAT_NAMES {
        match AnyFile::parse_as(name, &data, opts) {
            Ok(parsed) => return Ok(parsed),
            Err(error) => last_error = error,
        }
    }
    Err(last_error)
}

/// Converts a file on the filesystem into another record format.
///
/// Returns the input and output file objects for further processing.
pub fn convert(
    in_path: &str,
    out_path: &str,
    in_format: Option<&str>,
    out_format: Option<&str>,
) -> Result<(AnyFile, AnyFile)> {
    let out_name = match out_format {
        Some(name) => name,
        None => guess_format_name(out_path)?,
    };

    let mut in_file = load(in_path, in_format)?;
    let mut out_file = in_file.convert_to(out_name)?;
    out_file.save(out_path)?;
    Ok((in_file, out_file))
}

/// Merges multiple files into one, in the given order.
///
/// Overlapping ranges are overwritten by later inputs. With an output
/// path, the merged file is saved there. Returns the input file objects
/// and the merged output.
pub fn merge(
    in_paths: &[&str],
    out_path: Option<&str>,
    in_formats: &[Option<&str>],
    out_format: Option<&str>,
) -> Result<(Vec<AnyFile>, AnyFile)> {
    let out_name = match out_format {
        Some(name) => name,
        None => match out_path {
            Some(path) => guess_format_name(path)?,
            None => return Err(HexError::meta("output format required")),
        },
    };

    let mut in_files = Vec::with_capacity(in_paths.len());
    for (index, in_path) in in_paths.iter().enumerate() {
        let in_format = in_formats.get(index).copied().flatten();
        in_files.push(load(in_path, in_format)?);
    }

    let mut out_file = AnyFile::empty(out_name)?;
    for in_file in &mut in_files {
        let memory = in_file.memory()?.clone();
        out_file.merge_memory(&memory)?;
    }

    if let Some(out_path) = out_path {
        out_file.save(out_path)?;
    }
    Ok((in_files, out_file))
}

/// Library version string.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }

    #[test]
    fn test_guess_format_name() {
        assert_eq!(guess_format_name("simple.hex").unwrap(), "ihex");
        assert_eq!(guess_format_name("simple.srec").unwrap(), "srec");
        assert_eq!(guess_format_name("simple.s19").unwrap(), "srec");
        assert_eq!(guess_format_name("simple.mot").unwrap(), "srec");
        assert_eq!(guess_format_name("simple.TEK").unwrap(), "xtek");
        assert_eq!(guess_format_name("simple.txt").unwrap(), "titxt");
        assert_eq!(guess_format_name("simple.rom").unwrap(), "ihex");
        assert_eq!(guess_format_name("data.dat").unwrap(), "raw");
        assert!(matches!(
            guess_format_name("weird.zzz"),
            Err(HexError::UnknownExtension { .. })
        ));
    }

    #[test]
    fn test_load_explicit_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.hex");
        std::fs::write(&path, b":0312340061626391\r\n:00000001FF\r\n").unwrap();

        let mut file = load(path.to_str().unwrap(), Some("ihex")).unwrap();
        assert_eq!(file.format_name(), "ihex");
        assert_eq!(
            file.memory().unwrap().to_blocks(),
            [(0x1234, b"abc".to_vec())]
        );
    }

    #[test]
    fn test_load_brute_force() {
        let dir = tempfile::tempdir().unwrap();
        // An S-record stream behind an unknown extension.
        let path = dir.path().join("data.zzz");
        std::fs::write(&path, b"S0030000FC\r\nS10500000102F7\r\nS9030000FC\r\n").unwrap();

        let mut file = load(path.to_str().unwrap(), None).unwrap();
        assert_eq!(file.format_name(), "srec");
        assert_eq!(
            file.memory().unwrap().to_blocks(),
            [(0, b"\x01\x02".to_vec())]
        );
    }

    #[test]
    fn test_load_falls_back_to_raw() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.zzz");
        std::fs::write(&path, b"not a record stream at all").unwrap();

        let file = load(path.to_str().unwrap(), None).unwrap();
        assert_eq!(file.format_name(), "raw");
    }

    #[test]
    fn test_convert_ihex_to_srec() {
        let dir = tempfile::tempdir().unwrap();
        let in_path = dir.path().join("data.hex");
        let out_path = dir.path().join("data.srec");
        std::fs::write(&in_path, b":0312340061626391\r\n:00000001FF\r\n").unwrap();

        let (_, mut out_file) = convert(
            in_path.to_str().unwrap(),
            out_path.to_str().unwrap(),
            None,
            None,
        )
        .unwrap();
        assert_eq!(out_file.format_name(), "srec");
        assert_eq!(
            out_file.memory().unwrap().to_blocks(),
            [(0x1234, b"abc".to_vec())]
        );

        let mut reloaded = load(out_path.to_str().unwrap(), None).unwrap();
        assert_eq!(reloaded.memory().unwrap().to_blocks(), [(0x1234, b"abc".to_vec())]);
    }

    #[test]
    fn test_merge_files() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.hex");
        let second = dir.path().join("second.srec");
        let merged = dir.path().join("merged.tek");

        let mut file1 = IhexFile::from_bytes(b"abc", 0x100);
        file1.save(&first).unwrap();
        let mut file2 = SrecFile::from_bytes(b"xyz", 0x200);
        file2.save(&second).unwrap();

        let (inputs, mut out_file) = merge(
            &[first.to_str().unwrap(), second.to_str().unwrap()],
            Some(merged.to_str().unwrap()),
            &[],
            None,
        )
        .unwrap();
        assert_eq!(inputs.len(), 2);
        assert_eq!(out_file.format_name(), "xtek");
        assert_eq!(
            out_file.memory().unwrap().to_blocks(),
            [(0x100, b"abc".to_vec()), (0x200, b"xyz".to_vec())]
        );
    }

    #[test]
    fn test_split_merge_identity() {
        let mut file = SrecFile::from_bytes(b"Hello, World!", 123);
        let original = file.memory().unwrap().clone();

        let mut parts = file.split(&[130, 128], true).unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(
            parts[0].memory().unwrap().to_blocks(),
            [(123, b"Hello".to_vec())]
        );

        let mut rebuilt = SrecFile::default();
        for part in &mut parts {
            rebuilt.merge(part).unwrap();
        }
        assert_eq!(rebuilt.memory().unwrap(), &original);
    }

    #[test]
    fn test_convert_preserves_startaddr() {
        let mut source = AnyFile::Srec({
            let mut file = SrecFile::from_bytes(b"abc", 0x1000);
            file.set_startaddr(0x1000).unwrap();
            file
        });
        let target = source.convert_to("ihex").unwrap();
        match target {
            AnyFile::Ihex(mut ihex) => {
                assert_eq!(ihex.startaddr().unwrap(), Some(0x1000));
            }
            _ => panic!("expected ihex"),
        }
    }
}
