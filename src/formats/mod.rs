//! Hex record file formats.
//!
//! This module provides one submodule per supported wire format:
//! - Intel HEX (`:` records with segment/linear extensions)
//! - Motorola S-record (S0..S9 with 16/24/32-bit address tiers)
//! - Tektronix extended HEX (`%` records with variable address length)
//! - ASCII-HEX (STX/ETX framed byte runs with `$A`/`$S` records)
//! - TI-TXT (`@` address markers, `q` terminator)
//! - MOS Technology (`;` records with 16-bit checksum)
//! - Atmel generic / AVR (word-addressed `AAAAAA:DDDD` lines)
//! - Raw binary passthrough
//!
//! Each submodule defines the format's tag enumeration, its record type
//! with parser/serializer and checksum rules, and its file type with the
//! records⇄memory conversions.

pub mod asciihex;
pub mod avr;
pub mod ihex;
pub mod mos;
pub mod raw;
pub mod srec;
pub mod titxt;
pub mod xtek;
