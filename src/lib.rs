//! `zld` — the shared core of a multi-format native linker.
//!
//! This crate implements the symbol resolver, atom-based layout engine, and
//! relocation writer common to the ELF, Mach-O, and WebAssembly backends,
//! plus each format's finalizer. A thin driver (`src/driver.rs`, `src/bin/
//! zld.rs`) selects a backend by invocation name; everything else lives
//! here so the three backends can share S1-S6 of the pipeline described in
//! `DESIGN.md`.

pub mod error;
pub mod container;
pub mod options;
pub mod diagnostics;
pub mod strtab;

pub mod archive;
pub mod input;
pub mod symbol;
pub mod atom;
pub mod layout;
pub mod reloc;

pub mod elf;
pub mod mach;
pub mod wasm;

pub mod backend;
pub mod linker;
pub mod driver;

pub use error::{Error, Result};
pub use linker::Linker;
pub use options::Options;
