//! Backend polymorphism (§9 "Backend polymorphism"): ELF, Mach-O, and Wasm
//! are a closed set, selected once from `Options.target.format` and never
//! extended at runtime. The teacher's `pe`/`elf`/`mach` modules each expose
//! their own writer entry point rather than going through a shared trait
//! object; here the three formats *do* share S1-S5 (the resolver and atom
//! engine live in `Linker` itself), so the trait below is deliberately thin
//! — one method, no associated state — rather than a vtable for a plugin
//! system. `dispatch` is the only place a new `Format` variant would need
//! a matching arm.

use crate::error::Result;
use crate::linker::Linker;
use crate::options::Format;

/// One implementation per output format. No dynamic plugin loading: every
/// impl below is a zero-sized unit struct resolved at compile time by
/// `dispatch`.
pub trait Backend {
    fn name(&self) -> &'static str;

    /// Runs S1-S7 for this format against `linker`'s already-validated
    /// `Options`, returning the finished image's bytes.
    fn link(&self, linker: &mut Linker) -> Result<Vec<u8>>;
}

pub struct ElfBackend;
pub struct MachOBackend;
pub struct WasmBackend;

impl Backend for ElfBackend {
    fn name(&self) -> &'static str {
        "elf"
    }

    fn link(&self, linker: &mut Linker) -> Result<Vec<u8>> {
        linker.link_elf()
    }
}

impl Backend for MachOBackend {
    fn name(&self) -> &'static str {
        "mach-o"
    }

    fn link(&self, linker: &mut Linker) -> Result<Vec<u8>> {
        linker.link_macho()
    }
}

impl Backend for WasmBackend {
    fn name(&self) -> &'static str {
        "wasm"
    }

    fn link(&self, linker: &mut Linker) -> Result<Vec<u8>> {
        linker.link_wasm()
    }
}

/// Resolves the format named by `Options.target.format` to its backend.
/// The sole call site is `Linker::link`; `driver.rs` never calls this
/// directly; it only resolves an invocation name to a `Format`.
pub fn dispatch(format: Format) -> &'static dyn Backend {
    match format {
        Format::Elf => &ElfBackend,
        Format::MachO => &MachOBackend,
        Format::Wasm => &WasmBackend,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_picks_matching_backend() {
        assert_eq!(dispatch(Format::Elf).name(), "elf");
        assert_eq!(dispatch(Format::MachO).name(), "mach-o");
        assert_eq!(dispatch(Format::Wasm).name(), "wasm");
    }
}
