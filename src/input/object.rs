//! Shared object-parsing scaffolding: the pre-`InputId` `RawObject`/
//! `RawSection`/`RawReloc` shapes every format parser produces, and the
//! `finalize` step that binds them to a concrete `InputId` once one is
//! known (immediately for a positional input, lazily for an archive member
//! pulled in mid-resolution; see `symbol::resolver::resolve`).

use crate::atom::SectionKind;
use crate::input::InputId;
use crate::options::{CpuArch, Format};
use crate::reloc::{RelocKind, Relocation};
use crate::symbol::{Symbol, SymbolRef};

/// A relocation as read from an input container, still keyed by a local
/// symbol-table index rather than a `SymbolRef`.
#[derive(Debug, Clone)]
pub struct RawReloc {
    pub offset: u32,
    pub sym_index: u32,
    pub kind: RelocKind,
    pub addend: i64,
    pub pcrel: bool,
    pub length: u8,
}

#[derive(Debug, Clone)]
pub struct RawSection {
    pub name: String,
    pub segment: Option<String>,
    pub kind: SectionKind,
    pub subsections_via_symbols: bool,
    pub data: Vec<u8>,
    pub size: u64,
    pub align_log2: u8,
    pub relocations: Vec<RawReloc>,
}

#[derive(Debug, Clone)]
pub struct RawObject {
    pub format: Format,
    pub cpu_arch: CpuArch,
    pub sections: Vec<RawSection>,
    pub symbols: Vec<Symbol>,
    /// Wasm module structure that doesn't fit the byte-addressed section
    /// model (types, non-function imports, globals, exports, memory
    /// limits): `None` for ELF/Mach-O.
    pub wasm_extra: Option<crate::wasm::WasmExtra>,
}

/// One input section, finalized against a concrete `InputId`: every
/// relocation's target is now an opaque `SymbolRef` (§3).
#[derive(Debug, Clone)]
pub struct InputSection {
    pub name: String,
    pub segment: Option<String>,
    pub kind: SectionKind,
    pub subsections_via_symbols: bool,
    pub data: Vec<u8>,
    pub size: u64,
    pub align_log2: u8,
    pub relocations: Vec<Relocation>,
}

/// A fully parsed relocatable object (§3 "Input": the `Object` variant),
/// bound to its `InputId`.
#[derive(Debug, Clone)]
pub struct Object {
    pub format: Format,
    pub cpu_arch: CpuArch,
    pub sections: Vec<InputSection>,
    pub symbols: Vec<Symbol>,
    pub wasm_extra: Option<crate::wasm::WasmExtra>,
}

impl RawObject {
    pub fn finalize(self, id: InputId) -> Object {
        let sections = self
            .sections
            .into_iter()
            .map(|s| InputSection {
                name: s.name,
                segment: s.segment,
                kind: s.kind,
                subsections_via_symbols: s.subsections_via_symbols,
                data: s.data,
                size: s.size,
                align_log2: s.align_log2,
                relocations: s
                    .relocations
                    .into_iter()
                    .map(|r| Relocation {
                        offset: r.offset,
                        kind: r.kind,
                        target: SymbolRef::from_input(id, r.sym_index),
                        addend: r.addend,
                        pcrel: r.pcrel,
                        length: r.length,
                    })
                    .collect(),
            })
            .collect();
        Object { format: self.format, cpu_arch: self.cpu_arch, sections, symbols: self.symbols, wasm_extra: self.wasm_extra }
    }
}

impl Object {
    /// Symbols eligible to participate in resolution (§4.2): every non-local
    /// binding, paired with its local table index for `SymbolTable::merge`.
    pub fn external_symbols(&self) -> impl Iterator<Item = (u32, &Symbol)> {
        self.symbols.iter().enumerate().map(|(i, s)| (i as u32, s))
    }
}
