//! Synthetic atom creation (S4, §4.4): GOT entries, stubs, lazy pointers,
//! stub helpers, TLV slots, aarch64 jump thunks, tentative-definition
//! placeholders, and format header padding. Each kind is deduplicated by a
//! `(SyntheticKind, target) -> AtomIndex` map so a given symbol never gets
//! two GOT entries (§3 "A GOT entry, stub, or thunk for a given target
//! symbol is unique").

use std::collections::HashMap;

use crate::atom::{Atom, AtomIndex, AtomPool, Owner, SectionKind};
use crate::options::CpuArch;
use crate::reloc::aarch64::thunk_body;
use crate::symbol::SymbolRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyntheticKind {
    Got,
    Stub,
    LazyPointer,
    StubHelper,
    Tlv,
    Thunk,
    Tentative,
}

/// Stub body size per §4.4: 6 bytes on x86-64 (`jmp *lazy_ptr(%rip)`), 12
/// bytes (3 `x 4`) on aarch64.
pub fn stub_size(arch: CpuArch) -> u32 {
    match arch {
        CpuArch::X86_64 => 6,
        CpuArch::Aarch64 => 12,
        CpuArch::Wasm32 => 0,
    }
}

fn stub_body(arch: CpuArch) -> Vec<u8> {
    match arch {
        // ff 25 00 00 00 00 : jmp *0(%rip) -- the rip-relative operand is
        // patched by the reloc targeting the stub's lazy pointer.
        CpuArch::X86_64 => vec![0xff, 0x25, 0x00, 0x00, 0x00, 0x00],
        CpuArch::Aarch64 => thunk_body().to_vec(),
        CpuArch::Wasm32 => Vec::new(),
    }
}

/// The per-target dedup tables for every synthetic kind, plus the ordered
/// list of tentative globals that still need a bss atom (so layout can drop
/// them into one place without re-scanning the symbol table).
#[derive(Debug, Default)]
pub struct SyntheticAtoms {
    by_kind: HashMap<(SyntheticKind, SymbolRef), AtomIndex>,
}

impl SyntheticAtoms {
    pub fn new() -> Self {
        SyntheticAtoms::default()
    }

    pub fn get(&self, kind: SyntheticKind, target: SymbolRef) -> Option<AtomIndex> {
        self.by_kind.get(&(kind, target)).copied()
    }

    fn insert_new(
        &mut self,
        pool: &mut AtomPool,
        kind: SyntheticKind,
        target: SymbolRef,
        section: &str,
        size: u32,
        align_log2: u8,
    ) -> AtomIndex {
        if let Some(existing) = self.get(kind, target) {
            return existing;
        }
        let idx = pool.push(Atom {
            owner: Owner::Synthetic,
            primary_symbol: SymbolRef::synthetic(pool.len() as u32),
            size,
            align_log2,
            kind: SectionKind::Data,
            payload_bytes: vec![0u8; size as usize],
            relocations: Vec::new(),
            inner_symbols: Vec::new(),
            prev: AtomIndex::NULL,
            next: AtomIndex::NULL,
            output_section: section.to_string(),
            address: 0,
        });
        self.by_kind.insert((kind, target), idx);
        idx
    }

    /// An 8-byte GOT pointer slot (§4.4 "GOT entry"): `.got` (ELF) or
    /// `__DATA_CONST,__got` (Mach-O).
    pub fn got_entry(&mut self, pool: &mut AtomPool, target: SymbolRef, section: &str) -> AtomIndex {
        self.insert_new(pool, SyntheticKind::Got, target, section, 8, 3)
    }

    /// A TLV (thread-local variable) indirection slot, Mach-O only.
    pub fn tlv_entry(&mut self, pool: &mut AtomPool, target: SymbolRef) -> AtomIndex {
        self.insert_new(pool, SyntheticKind::Tlv, target, "__DATA,__thread_ptrs", 8, 3)
    }

    /// A Mach-O lazy pointer (§4.4 "Lazy pointer"), `__DATA,__la_symbol_ptr`.
    pub fn lazy_pointer(&mut self, pool: &mut AtomPool, target: SymbolRef) -> AtomIndex {
        self.insert_new(pool, SyntheticKind::LazyPointer, target, "__DATA,__la_symbol_ptr", 8, 3)
    }

    /// A stub (§4.4 "Stub"): tiny code atom jumping through a lazy pointer.
    pub fn stub(&mut self, pool: &mut AtomPool, target: SymbolRef, arch: CpuArch, section: &str) -> AtomIndex {
        if let Some(existing) = self.get(SyntheticKind::Stub, target) {
            return existing;
        }
        let body = stub_body(arch);
        let idx = pool.push(Atom {
            owner: Owner::Synthetic,
            primary_symbol: SymbolRef::synthetic(pool.len() as u32),
            size: body.len() as u32,
            align_log2: 2,
            kind: SectionKind::Code,
            payload_bytes: body,
            relocations: Vec::new(),
            inner_symbols: Vec::new(),
            prev: AtomIndex::NULL,
            next: AtomIndex::NULL,
            output_section: section.to_string(),
            address: 0,
        });
        self.by_kind.insert((SyntheticKind::Stub, target), idx);
        idx
    }

    /// A per-symbol stub-helper entry (§4.4 "Stub helper"): pushes a lazy-
    /// bind stream index and jumps to the shared preamble. 10 bytes on
    /// x86-64 (`push $imm32; jmp rel32`).
    pub fn stub_helper(&mut self, pool: &mut AtomPool, target: SymbolRef) -> AtomIndex {
        let body = vec![0x68, 0, 0, 0, 0, 0xe9, 0, 0, 0, 0];
        if let Some(existing) = self.get(SyntheticKind::StubHelper, target) {
            return existing;
        }
        let idx = pool.push(Atom {
            owner: Owner::Synthetic,
            primary_symbol: SymbolRef::synthetic(pool.len() as u32),
            size: body.len() as u32,
            align_log2: 1,
            kind: SectionKind::Code,
            payload_bytes: body,
            relocations: Vec::new(),
            inner_symbols: Vec::new(),
            prev: AtomIndex::NULL,
            next: AtomIndex::NULL,
            output_section: "__TEXT,__stub_helper".to_string(),
            address: 0,
        });
        self.by_kind.insert((SyntheticKind::StubHelper, target), idx);
        idx
    }

    /// An aarch64 jump thunk (§4.4 "Jump thunk"), keyed by the branch's
    /// *target* symbol so repeated out-of-range calls to the same function
    /// share one thunk, grouped per code section by the caller.
    pub fn thunk(&mut self, pool: &mut AtomPool, target: SymbolRef, section: &str) -> AtomIndex {
        if let Some(existing) = self.get(SyntheticKind::Thunk, target) {
            return existing;
        }
        let body = thunk_body().to_vec();
        let idx = pool.push(Atom {
            owner: Owner::Synthetic,
            primary_symbol: SymbolRef::synthetic(pool.len() as u32),
            size: body.len() as u32,
            align_log2: 2,
            kind: SectionKind::Code,
            payload_bytes: body,
            relocations: Vec::new(),
            inner_symbols: Vec::new(),
            prev: AtomIndex::NULL,
            next: AtomIndex::NULL,
            output_section: section.to_string(),
            address: 0,
        });
        self.by_kind.insert((SyntheticKind::Thunk, target), idx);
        idx
    }

    /// A zerofill atom for a surviving tentative (COMMON) global, placed in
    /// bss (§4.4 "Tentative definition atom").
    pub fn tentative(&mut self, pool: &mut AtomPool, target: SymbolRef, size: u64, align_log2: u8, bss_section: &str) -> AtomIndex {
        if let Some(existing) = self.get(SyntheticKind::Tentative, target) {
            return existing;
        }
        let idx = pool.push(Atom {
            owner: Owner::Synthetic,
            primary_symbol: target,
            size: size as u32,
            align_log2,
            kind: SectionKind::Zerofill,
            payload_bytes: Vec::new(),
            relocations: Vec::new(),
            inner_symbols: Vec::new(),
            prev: AtomIndex::NULL,
            next: AtomIndex::NULL,
            output_section: bss_section.to_string(),
            address: 0,
        });
        self.by_kind.insert((SyntheticKind::Tentative, target), idx);
        idx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::InputId;

    #[test]
    fn got_entries_are_deduped_per_target() {
        let mut pool = AtomPool::new();
        let mut synth = SyntheticAtoms::new();
        let target = SymbolRef::from_input(InputId(0), 0);
        let a = synth.got_entry(&mut pool, target, ".got");
        let b = synth.got_entry(&mut pool, target, ".got");
        assert_eq!(a, b);
        assert_eq!(pool.len(), 2); // null atom + one GOT entry
    }

    #[test]
    fn stub_sizes_match_arch() {
        assert_eq!(stub_size(CpuArch::X86_64), 6);
        assert_eq!(stub_size(CpuArch::Aarch64), 12);
    }
}
