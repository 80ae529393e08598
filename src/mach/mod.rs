//! Mach-O on-disk structures and constants: the 64-bit header, fat/universal
//! container slicing, load commands, nlist symbol tables, and the export
//! trie. `input::macho_object` and `input::dylib` build on these to produce
//! the crate's `Object`/`DylibDescriptor` types; `mach::linkedit`/`uuid`/
//! `codesign` build on them in the other direction, to emit a linked image.

pub mod codesign;
pub mod constants;
pub mod exports;
pub mod fat;
pub mod header;
pub mod linkedit;
pub mod load_command;
pub mod relocation;
pub mod symbols;
pub mod utils;
pub mod uuid;

pub use self::constants::cputype;
