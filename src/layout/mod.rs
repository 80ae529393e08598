//! Section/segment assembly, size, and address allocation (S5, §4.5).
//!
//! Wasm has no segments (§3 "Segment: ... Wasm has no segments and this
//! entity is omitted for that format") and no virtual-address space either;
//! its own module lays its atoms out linearly inside `wasm::finalize`
//! instead of going through this one. This module is shared by the ELF and
//! Mach-O backends only.

use crate::atom::{AtomIndex, AtomPool};
use crate::options::{CpuArch, Format, OutputMode};
use crate::reloc::aarch64;

/// Section-level read/write/execute bits, derived from the segment a
/// section belongs to (§4.5 step 3 "Derive segment protection from segment
/// name").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Protection {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
}

impl Protection {
    pub const RX: Protection = Protection { read: true, write: false, execute: true };
    pub const RW: Protection = Protection { read: true, write: true, execute: false };
    pub const R: Protection = Protection { read: true, write: false, execute: false };
    pub const NONE: Protection = Protection { read: false, write: false, execute: false };
}

/// One output section (§3 "Section"): a contiguous run of an output
/// segment's bytes, backed by an atom chain.
#[derive(Debug, Clone)]
pub struct Section {
    pub name: String,
    pub segment_name: String,
    pub kind: crate::atom::SectionKind,
    pub first_atom: AtomIndex,
    pub last_atom: AtomIndex,
    pub size: u64,
    pub align_log2: u8,
    pub address: u64,
    pub file_offset: u64,
    /// Zerofill sections (bss) occupy no file range; `is_nobits` tells the
    /// finalizer not to write their (absent) payload.
    pub is_nobits: bool,
}

/// One output segment (§3 "Segment"). Omitted entirely for Wasm.
#[derive(Debug, Clone)]
pub struct Segment {
    pub name: String,
    pub vm_addr: u64,
    pub vm_size: u64,
    pub file_offset: u64,
    pub file_size: u64,
    pub protection: Protection,
    pub section_indexes: Vec<usize>,
}

/// The fixed total order segments are sorted into (§4.5 step 2): lower
/// number sorts earlier. `__PAGEZERO`/no-segment first, `__LINKEDIT`/
/// symtab-adjacent regions last.
fn segment_precedence(format: Format, segment_name: &str) -> u32 {
    match format {
        Format::MachO => match segment_name {
            "__PAGEZERO" => 0,
            "__TEXT" => 10,
            "__DATA_CONST" => 20,
            "__DATA" => 30,
            "__LINKEDIT" => 90,
            _ => 50,
        },
        Format::Elf => match segment_name {
            "text" => 10,
            "rodata" => 15,
            "data" => 20,
            "bss" => 21,
            _ => 50,
        },
        Format::Wasm => 0,
    }
}

/// Precedence of a section name within its segment (§4.5 step 2: "within
/// `__TEXT`, `__text` < `__stubs` < others"). Lower sorts earlier.
///
/// Open question: whether unwind/exception-handling sections should sort to
/// the tail of `__TEXT` ahead of padding rather than falling into the
/// generic `("__TEXT", _) => 10` bucket. Left as the generic bucket for now;
/// a dedicated precedence would hook in right here if that ever matters.
///
/// The source's other unfinished idea — shifting whole `__TEXT` sections to
/// the end of their segment to shorten inter-segment jump distances — is
/// left out entirely rather than half-done; it would hook in as a resort of
/// this table's output, not a change to the table itself.
fn section_precedence(format: Format, segment_name: &str, section_name: &str) -> u32 {
    match format {
        Format::MachO => match (segment_name, section_name) {
            ("__TEXT", "__text") => 0,
            ("__TEXT", "__stub_helper") => 1,
            ("__TEXT", "__stubs") => 2,
            ("__TEXT", _) => 10,
            ("__DATA_CONST", "__got") => 0,
            ("__DATA_CONST", _) => 10,
            ("__DATA", "__la_symbol_ptr") => 0,
            ("__DATA", "__data") => 1,
            ("__DATA", "__thread_ptrs") => 2,
            ("__DATA", "__common") | ("__DATA", "__bss") => 20,
            _ => 50,
        },
        Format::Elf => match section_name {
            // `.ehdr` is the synthetic `Ehdr`+`Phdr` padding atom `Linker`
            // reserves ahead of `.text` (§4.7 "ELF"); it must be the very
            // first byte of the first `PT_LOAD` segment.
            ".ehdr" => 0,
            ".text" => 1,
            ".rodata" => 2,
            ".got" => 3,
            ".data" => 4,
            ".bss" => 10,
            _ => 50,
        },
        Format::Wasm => 0,
    }
}

/// Which output segment a mapped section name belongs to (the other half
/// of `atom::map_output_section`'s job).
pub fn segment_for_section(format: Format, section_name: &str) -> String {
    match format {
        Format::MachO => section_name.split(',').next().unwrap_or("__TEXT").to_string(),
        Format::Elf => match section_name {
            ".ehdr" | ".text" => "text",
            ".rodata" => "rodata",
            ".data" => "data",
            ".bss" => "bss",
            _ => "rodata",
        }
        .to_string(),
        Format::Wasm => String::new(),
    }
}

fn align_up(value: u64, align: u64) -> u64 {
    if align <= 1 {
        value
    } else {
        (value + align - 1) & !(align - 1)
    }
}

/// Builds one `Section` per distinct `output_section` name seen among
/// non-null, non-empty atoms, in first-seen order, then chains each
/// section's atoms together in the pool (§4.5 step 1 "Prune empty
/// sections", step 2 "Sort sections by precedence").
///
/// `pool`'s atom `.next`/`.prev` fields are mutated here to link each
/// section's members into the doubly-linked chain §3 requires ("the
/// section's linked-list traversal yields every atom in address order with
/// no gaps except inter-atom alignment padding").
pub fn build_sections(pool: &mut AtomPool, format: Format, atom_order: &[AtomIndex]) -> Vec<Section> {
    use std::collections::HashMap;

    let mut by_name: HashMap<String, Vec<AtomIndex>> = HashMap::new();
    let mut first_seen = Vec::new();
    for &idx in atom_order {
        if idx.is_null() {
            continue;
        }
        let name = pool.get(idx).output_section.clone();
        if !by_name.contains_key(&name) {
            first_seen.push(name.clone());
        }
        by_name.entry(name).or_default().push(idx);
    }

    let mut sections: Vec<Section> = Vec::new();
    for name in first_seen {
        let members = by_name.remove(&name).unwrap_or_default();
        if members.is_empty() {
            continue;
        }
        for w in members.windows(2) {
            pool.get_mut(w[0]).next = w[1];
            pool.get_mut(w[1]).prev = w[0];
        }
        pool.get_mut(*members.first().unwrap()).prev = AtomIndex::NULL;
        pool.get_mut(*members.last().unwrap()).next = AtomIndex::NULL;

        let kind = pool.get(members[0]).kind;
        let segment_name = segment_for_section(format, &name);
        sections.push(Section {
            name,
            segment_name,
            kind,
            first_atom: members[0],
            last_atom: *members.last().unwrap(),
            size: 0,
            align_log2: 0,
            address: 0,
            file_offset: 0,
            is_nobits: false,
        });
    }

    sections.sort_by_key(|s| {
        (
            segment_precedence(format, &s.segment_name),
            section_precedence(format, &s.segment_name, &s.name),
        )
    });
    sections
}

/// The S5 size pass (§4.5 step 4): walks `section`'s atom chain, assigning
/// each atom a section-relative address and growing `section.size` to the
/// final running total. Idempotent — safe to re-run after thunk insertion
/// grows a section (§4.5 step 5).
pub fn size_pass(pool: &mut AtomPool, section: &mut Section) {
    let mut offset: u64 = 0;
    let mut max_align = 0u8;
    let mut is_nobits = true;
    let mut cur = section.first_atom;
    while !cur.is_null() {
        let atom = pool.get_mut(cur);
        let align = 1u64 << atom.align_log2;
        offset = align_up(offset, align);
        atom.address = offset;
        offset += atom.size as u64;
        max_align = max_align.max(atom.align_log2);
        is_nobits = is_nobits && matches!(atom.kind, crate::atom::SectionKind::Zerofill);
        cur = atom.next;
    }
    section.size = offset;
    section.align_log2 = max_align;
    section.is_nobits = is_nobits;
}

/// Re-runs the size pass on every section (§4.5 step 4), used both for the
/// initial pass and for step 5's affected-section re-layout.
pub fn size_all(pool: &mut AtomPool, sections: &mut [Section]) {
    for section in sections.iter_mut() {
        size_pass(pool, section);
    }
}

fn protection_for(format: Format, segment_name: &str) -> Protection {
    match format {
        Format::MachO => match segment_name {
            "__PAGEZERO" => Protection::NONE,
            "__TEXT" => Protection::RX,
            "__LINKEDIT" => Protection::R,
            _ => Protection::RW,
        },
        Format::Elf => match segment_name {
            "text" => Protection::RX,
            "rodata" => Protection::R,
            _ => Protection::RW,
        },
        Format::Wasm => Protection::NONE,
    }
}

const PAGE_SIZE: u64 = 0x1000;

/// Groups sorted sections into segments and assigns every section and
/// segment its final virtual address and file offset (§4.5 steps 6-7).
///
/// `base_addr` is the platform base (§4.5 step 6: "page-zero size for exe,
/// 0 for lib"); sections sharing a segment are packed contiguously, with
/// each section's own alignment honored within the segment.
pub fn allocate(
    format: Format,
    output_mode: OutputMode,
    sections: &mut [Section],
    base_addr: u64,
) -> Vec<Segment> {
    let mut segments: Vec<Segment> = Vec::new();
    let mut vm_cursor = base_addr;
    let mut file_cursor: u64 = 0;

    let mut idx = 0;
    while idx < sections.len() {
        let seg_name = sections[idx].segment_name.clone();
        let mut section_indexes = Vec::new();
        let seg_start_vm = align_up(vm_cursor, PAGE_SIZE);
        let seg_start_file = if format == Format::MachO && seg_name == "__PAGEZERO" {
            file_cursor
        } else if format == Format::Elf {
            // ELF's congruence rule (`p_vaddr ≡ p_offset mod p_align`, with
            // `p_align == PAGE_SIZE` per `elf/finalize.rs`) only holds for
            // free if both sides are page-aligned, since `seg_start_vm` is
            // always a multiple of `PAGE_SIZE`.
            align_up(file_cursor, PAGE_SIZE)
        } else {
            align_up(file_cursor, PAGE_SIZE.min(0x10))
        };
        let mut local_vm = seg_start_vm;
        let mut local_file = seg_start_file;
        let is_pagezero = format == Format::MachO && seg_name == "__PAGEZERO" && output_mode == OutputMode::Exe;

        while idx < sections.len() && sections[idx].segment_name == seg_name {
            let align = 1u64 << sections[idx].align_log2.max(0);
            local_vm = align_up(local_vm, align.max(1));
            sections[idx].address = local_vm;
            if is_pagezero {
                local_vm += sections[idx].size;
            } else if sections[idx].is_nobits {
                sections[idx].file_offset = local_file;
                local_vm += sections[idx].size;
            } else {
                local_file = align_up(local_file, align.max(1));
                sections[idx].file_offset = local_file;
                local_vm += sections[idx].size;
                local_file += sections[idx].size;
            }
            section_indexes.push(idx);
            idx += 1;
        }

        let vm_size = local_vm - seg_start_vm;
        let file_size = if is_pagezero { 0 } else { local_file - seg_start_file };
        segments.push(Segment {
            name: seg_name.clone(),
            vm_addr: seg_start_vm,
            vm_size,
            file_offset: seg_start_file,
            file_size,
            protection: protection_for(format, &seg_name),
            section_indexes,
        });
        vm_cursor = seg_start_vm + vm_size;
        file_cursor = seg_start_file + file_size;
    }

    segments
}

/// Adds each atom's owning section's base address to its section-relative
/// address, turning it into a final virtual address (§4.5 step 7).
pub fn relocate_atom_addresses(pool: &mut AtomPool, sections: &[Section]) {
    for section in sections {
        let mut cur = section.first_atom;
        while !cur.is_null() {
            let atom = pool.get_mut(cur);
            atom.address += section.address;
            cur = atom.next;
        }
    }
}

/// aarch64-only thunk scan (§4.5 step 5): returns the `(atom, reloc_index,
/// target)` triples whose `Branch26` relocation's final displacement would
/// overflow, so the caller can synthesize thunks and re-run `size_pass` on
/// the affected section. Addresses must already be relative-to-section
/// (post `size_pass`, pre `relocate_atom_addresses`) or final; either way
/// works since only the *difference* matters and both ends move together
/// within one section-relative pass, so this is typically called right
/// after `relocate_atom_addresses` once initial addresses are known.
pub fn scan_branch26_overflow(
    pool: &AtomPool,
    section: &Section,
    arch: CpuArch,
    resolve: impl Fn(crate::symbol::SymbolRef) -> Option<u64>,
) -> Vec<(AtomIndex, usize, crate::symbol::SymbolRef)> {
    if !matches!(arch, CpuArch::Aarch64) {
        return Vec::new();
    }
    let mut out = Vec::new();
    let mut cur = section.first_atom;
    while !cur.is_null() {
        let atom = pool.get(cur);
        for (i, reloc) in atom.relocations.iter().enumerate() {
            if !matches!(reloc.kind, crate::reloc::RelocKind::Branch26) {
                continue;
            }
            let Some(target_addr) = resolve(reloc.target) else { continue };
            let source_addr = atom.address + reloc.offset as u64;
            if aarch64::needs_thunk(source_addr, target_addr) {
                out.push((cur, i, reloc.target));
            }
        }
        cur = atom.next;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::{Atom, AtomPool, Owner, SectionKind};
    use crate::input::InputId;
    use crate::symbol::SymbolRef;

    fn push_atom(pool: &mut AtomPool, section: &str, size: u32, align_log2: u8) -> AtomIndex {
        pool.push(Atom {
            owner: Owner::Input(InputId(0)),
            primary_symbol: SymbolRef::from_input(InputId(0), 0),
            size,
            align_log2,
            kind: SectionKind::Code,
            payload_bytes: vec![0; size as usize],
            relocations: Vec::new(),
            inner_symbols: Vec::new(),
            prev: AtomIndex::NULL,
            next: AtomIndex::NULL,
            output_section: section.to_string(),
            address: 0,
        })
    }

    #[test]
    fn size_pass_aligns_and_sums() {
        let mut pool = AtomPool::new();
        let a = push_atom(&mut pool, ".text", 3, 0);
        let b = push_atom(&mut pool, ".text", 8, 3);
        let order = vec![a, b];
        let mut sections = build_sections(&mut pool, Format::Elf, &order);
        assert_eq!(sections.len(), 1);
        size_pass(&mut pool, &mut sections[0]);
        // a at 0 (size 3), b aligned up to 8, size 8 -> total 16
        assert_eq!(pool.get(b).address, 8);
        assert_eq!(sections[0].size, 16);
    }

    #[test]
    fn allocate_packs_segments_contiguously() {
        let mut pool = AtomPool::new();
        let a = push_atom(&mut pool, ".text", 4096, 0);
        let order = vec![a];
        let mut sections = build_sections(&mut pool, Format::Elf, &order);
        size_all(&mut pool, &mut sections);
        let segments = allocate(Format::Elf, OutputMode::Exe, &mut sections, 0x400000);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].vm_addr, 0x400000);
        assert_eq!(sections[0].address, 0x400000);
    }

    #[test]
    fn sections_sorted_by_precedence() {
        let mut pool = AtomPool::new();
        let bss = push_atom(&mut pool, ".bss", 4, 0);
        let text = push_atom(&mut pool, ".text", 4, 0);
        let order = vec![bss, text];
        let sections = build_sections(&mut pool, Format::Elf, &order);
        assert_eq!(sections[0].name, ".text");
        assert_eq!(sections[1].name, ".bss");
    }
}
