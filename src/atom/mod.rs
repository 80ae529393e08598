//! Atom decomposition (S3, §4.3) and the atom arena (§3 "Atom", §9 "Atom
//! graphs without cycles").
//!
//! Atoms are stored in a single growable pool and referenced by index so
//! that thunk insertion (§4.5 step 5) can append new atoms mid-pipeline
//! without invalidating anything already pointing at an existing one.

pub mod synthetic;

use crate::options::{CpuArch, Format};
use crate::reloc::Relocation;
use crate::symbol::SymbolRef;

/// Index into an `AtomPool`. Index 0 is the reserved null atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AtomIndex(pub u32);

impl AtomIndex {
    pub const NULL: AtomIndex = AtomIndex(0);

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

/// What kind of input content an atom was sliced from (§4.3): content
/// sections get split into real atoms; everything else (debug info, unknown
/// sections) is either passed through verbatim or dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Code,
    Data,
    Rodata,
    Zerofill,
    /// Debug info or another section the linker doesn't interpret; kept
    /// verbatim unless stripping is requested.
    Other,
}

/// A symbol's offset within an atom that isn't the atom's primary symbol
/// (§3 "contained_inner_symbols"): produced when an input section isn't
/// subsections-via-symbols, so every symbol in it becomes an inner symbol of
/// the section's single atom.
#[derive(Debug, Clone, Copy)]
pub struct InnerSymbol {
    pub symbol: SymbolRef,
    pub offset_in_atom: u32,
}

/// One atomic relocatable unit (§3 "Atom").
#[derive(Debug, Clone)]
pub struct Atom {
    pub owner: Owner,
    pub primary_symbol: SymbolRef,
    pub size: u32,
    /// Alignment as a log2 exponent.
    pub align_log2: u8,
    pub kind: SectionKind,
    pub payload_bytes: Vec<u8>,
    pub relocations: Vec<Relocation>,
    pub inner_symbols: Vec<InnerSymbol>,
    pub prev: AtomIndex,
    pub next: AtomIndex,
    /// Name of the output section this atom has been mapped to (§4.3);
    /// resolved to an index once `layout` groups atoms into sections.
    pub output_section: String,
    /// Final virtual address, assigned during S5's size pass and fixed up
    /// afterwards; `0` (and meaningless) before that.
    pub address: u64,
}

impl Atom {
    pub fn is_synthetic(&self) -> bool {
        matches!(self.owner, Owner::Synthetic)
    }
}

/// Who an atom's bytes came from: a parsed input, or the linker itself
/// (§3: "An atom whose owning_input_or_synth is 'synth' contains code or
/// data generated by the linker itself").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    Input(crate::input::InputId),
    Synthetic,
}

/// The atom arena (§9 "Represent atoms as indices into a single growable
/// pool ... never as raw pointers").
#[derive(Debug, Default)]
pub struct AtomPool {
    atoms: Vec<Atom>,
}

impl AtomPool {
    pub fn new() -> Self {
        // index 0 is the reserved null atom.
        AtomPool {
            atoms: vec![Atom {
                owner: Owner::Synthetic,
                primary_symbol: SymbolRef::synthetic(0),
                size: 0,
                align_log2: 0,
                kind: SectionKind::Other,
                payload_bytes: Vec::new(),
                relocations: Vec::new(),
                inner_symbols: Vec::new(),
                prev: AtomIndex::NULL,
                next: AtomIndex::NULL,
                output_section: String::new(),
                address: 0,
            }],
        }
    }

    pub fn push(&mut self, atom: Atom) -> AtomIndex {
        let idx = AtomIndex(self.atoms.len() as u32);
        self.atoms.push(atom);
        idx
    }

    pub fn get(&self, idx: AtomIndex) -> &Atom {
        &self.atoms[idx.0 as usize]
    }

    pub fn get_mut(&mut self, idx: AtomIndex) -> &mut Atom {
        &mut self.atoms[idx.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.len() <= 1
    }

    /// Walks a section's atom chain in address order (§8 "Atom chain
    /// integrity").
    pub fn chain(&self, first: AtomIndex) -> Vec<AtomIndex> {
        let mut out = Vec::new();
        let mut cur = first;
        while !cur.is_null() {
            out.push(cur);
            cur = self.get(cur).next;
        }
        out
    }
}

/// One symbol visible inside an input section during splitting: its local
/// index (for `SymbolRef`), its offset, and whether it's externally
/// addressable (only external symbols start new atoms).
pub struct SplitSymbol {
    pub symbol_ref: SymbolRef,
    pub offset: u32,
    pub external: bool,
}

/// Splits one input section's bytes into atoms per the subsections-via-
/// symbols rule (§4.3): if `subsections_via_symbols` is set, every external
/// symbol starts a new atom running to the next symbol's offset or section
/// end; otherwise the whole section is one atom, and every symbol in it
/// becomes an inner symbol.
pub fn split_section_into_atoms(
    owner: Owner,
    section_name: &str,
    kind: SectionKind,
    data: &[u8],
    align_log2: u8,
    subsections_via_symbols: bool,
    symbols: &[SplitSymbol],
    relocations: &[Relocation],
    section_primary_symbol: SymbolRef,
) -> Vec<Atom> {
    if !subsections_via_symbols || symbols.iter().all(|s| !s.external) {
        let inner_symbols = symbols
            .iter()
            .map(|s| InnerSymbol { symbol: s.symbol_ref, offset_in_atom: s.offset })
            .collect();
        return vec![Atom {
            owner,
            primary_symbol: section_primary_symbol,
            size: data.len() as u32,
            align_log2,
            kind,
            payload_bytes: data.to_vec(),
            relocations: relocations.to_vec(),
            inner_symbols,
            prev: AtomIndex::NULL,
            next: AtomIndex::NULL,
            output_section: section_name.to_string(),
            address: 0,
        }];
    }

    let mut starts: Vec<(u32, SymbolRef)> =
        symbols.iter().filter(|s| s.external).map(|s| (s.offset, s.symbol_ref)).collect();
    starts.sort_by_key(|&(off, _)| off);
    starts.dedup_by_key(|&mut (off, _)| off);

    let mut atoms = Vec::with_capacity(starts.len());
    for (i, &(start, primary)) in starts.iter().enumerate() {
        let end = starts.get(i + 1).map(|&(o, _)| o).unwrap_or(data.len() as u32);
        let slice = &data[start as usize..end as usize];
        let relocs: Vec<Relocation> = relocations
            .iter()
            .filter(|r| r.offset >= start && r.offset < end)
            .map(|r| Relocation { offset: r.offset - start, ..r.clone() })
            .collect();
        atoms.push(Atom {
            owner,
            primary_symbol: primary,
            size: slice.len() as u32,
            align_log2: if i == 0 { align_log2 } else { 0 },
            kind,
            payload_bytes: slice.to_vec(),
            relocations: relocs,
            inner_symbols: Vec::new(),
            prev: AtomIndex::NULL,
            next: AtomIndex::NULL,
            output_section: section_name.to_string(),
            address: 0,
        });
    }
    atoms
}

/// Maps `(segment, section, kind)` to the canonical output section name
/// (§4.3), collapsing known synonyms. Unknown sections pass through
/// verbatim (callers decide whether to drop them when stripping).
pub fn map_output_section(format: Format, segment: Option<&str>, section: &str, kind: SectionKind) -> String {
    match format {
        Format::Elf => {
            if let Some(base) = section.split('.').nth(1) {
                let collapsed = match base {
                    "text" => "text",
                    "rodata" => "rodata",
                    "data" => "data",
                    "bss" => "bss",
                    other => other,
                };
                format!(".{}", collapsed)
            } else {
                section.to_string()
            }
        }
        Format::MachO => {
            let seg = segment.unwrap_or("__TEXT");
            match (seg, section) {
                ("__DATA", "__const") => "__DATA_CONST,__const".to_string(),
                ("__DATA", "__cfstring") => "__DATA_CONST,__cfstring".to_string(),
                _ => format!("{},{}", seg, section),
            }
        }
        Format::Wasm => {
            match kind {
                SectionKind::Code => "code".to_string(),
                SectionKind::Data | SectionKind::Rodata | SectionKind::Zerofill => "data".to_string(),
                SectionKind::Other => section.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::InputId;

    fn sref(i: u32) -> SymbolRef {
        SymbolRef::from_input(InputId(0), i)
    }

    #[test]
    fn splits_on_external_symbol_boundaries() {
        let data = vec![0u8; 32];
        let symbols = vec![
            SplitSymbol { symbol_ref: sref(0), offset: 0, external: true },
            SplitSymbol { symbol_ref: sref(1), offset: 16, external: true },
        ];
        let atoms = split_section_into_atoms(
            Owner::Input(InputId(0)),
            ".text",
            SectionKind::Code,
            &data,
            4,
            true,
            &symbols,
            &[],
            sref(0),
        );
        assert_eq!(atoms.len(), 2);
        assert_eq!(atoms[0].size, 16);
        assert_eq!(atoms[1].size, 16);
    }

    #[test]
    fn non_subdividable_section_is_one_atom_with_inner_symbols() {
        let data = vec![0u8; 16];
        let symbols = vec![SplitSymbol { symbol_ref: sref(0), offset: 4, external: true }];
        let atoms = split_section_into_atoms(
            Owner::Input(InputId(0)),
            ".text",
            SectionKind::Code,
            &data,
            4,
            false,
            &symbols,
            &[],
            sref(99),
        );
        assert_eq!(atoms.len(), 1);
        assert_eq!(atoms[0].inner_symbols.len(), 1);
    }

    #[test]
    fn elf_collapses_text_dot_suffix() {
        assert_eq!(map_output_section(Format::Elf, None, ".text.cold", SectionKind::Code), ".text");
    }

    #[test]
    fn macho_collapses_data_const() {
        assert_eq!(
            map_output_section(Format::MachO, Some("__DATA"), "__const", SectionKind::Rodata),
            "__DATA_CONST,__const"
        );
    }
}
