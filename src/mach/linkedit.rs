//! Mach-O S7 finalizer: assembles segment/section content, the `__LINKEDIT`
//! streams (rebase, bind, lazy bind, export trie, function starts,
//! data-in-code, symtab, dysymtab), the load command list, and (optionally)
//! a UUID and ad-hoc code signature, into a complete `MH_MAGIC_64` image.
//! Mirrors `elf::finalize`'s shape: a `FinalizeInput` gathered by `Linker`,
//! a single `finalize` entry point, byte vector out.
//!
//! Bind and rebase streams are emitted one opcode group per entry rather
//! than run-length compressed across adjacent entries; dyld accepts either
//! form, this one is just larger. The dylib table of contents, module
//! table, and reference table (`DysymtabCommand`'s `tocoff`/`modtaboff`/
//! `extrefsymoff`) are left empty, matching the single-module-per-image
//! shape every linked output has by the time it reaches this stage.

use scroll::Pwrite;

use crate::atom::synthetic::stub_size;
use crate::atom::AtomPool;
use crate::container::Ctx;
use crate::error::Result;
use crate::layout::{self, Protection};
use crate::options::{CpuArch, OutputMode};

use super::codesign;
use super::constants;
use super::header::{self, Header, SIZEOF_MACH_HEADER_64};
use super::load_command::{
    Dylib, DylibCommand, DyldInfoCommand, DysymtabCommand, EntryPointCommand, LcStr,
    LinkeditDataCommand, Section64, SegmentCommand64, SymtabCommand, UuidCommand, VersionMinCommand,
    LC_CODE_SIGNATURE, LC_DATA_IN_CODE, LC_DYLD_INFO_ONLY, LC_DYSYMTAB, LC_FUNCTION_STARTS,
    LC_LOAD_DYLIB, LC_LOAD_WEAK_DYLIB, LC_MAIN, LC_SEGMENT_64, LC_SYMTAB, LC_UUID,
    LC_VERSION_MIN_MACOSX, SIZEOF_DYLIB_COMMAND, SIZEOF_DYLIB_INFO_COMMAND, SIZEOF_DYSYMTAB_COMMAND,
    SIZEOF_ENTRY_POINT_COMMAND, SIZEOF_LINKEDIT_DATA_COMMAND, SIZEOF_SEGMENT_COMMAND_64,
    SIZEOF_SYMTAB_COMMAND, SIZEOF_UUID_COMMAND, SIZEOF_VERSION_MIN_COMMAND,
};
use super::symbols::Nlist64;
use super::uuid as mach_uuid;

/// One finalized output symbol, already classified into the nlist shape
/// dysymtab sorting needs (locals, then defined externals, then undefined).
#[derive(Debug, Clone)]
pub struct OutputSymbol {
    pub name: String,
    pub value: u64,
    pub section_index: u8,
    pub global: bool,
    pub undefined: bool,
    pub weak: bool,
}

/// An entry in the rebase stream: a local (non-imported) pointer at
/// `segment_index`/`segment_offset` whose payload must slide with the
/// image base.
#[derive(Debug, Clone, Copy)]
pub struct RebaseEntry {
    pub segment_index: u8,
    pub segment_offset: u64,
}

/// An entry in the bind stream: an external pointer bound against a dylib
/// ordinal at load time. Used for both the eager bind stream and (with
/// independent, self-terminated opcode runs) the lazy bind stream.
#[derive(Debug, Clone)]
pub struct BindEntry {
    pub segment_index: u8,
    pub segment_offset: u64,
    pub symbol_name: String,
    pub dylib_ordinal: i64,
    pub weak: bool,
    pub addend: i64,
}

/// An export trie entry: one externally visible defined symbol.
#[derive(Debug, Clone)]
pub struct ExportEntry {
    pub name: String,
    pub address: u64,
    pub weak: bool,
}

/// One `LC_LOAD_DYLIB`/`LC_LOAD_WEAK_DYLIB` dependency.
#[derive(Debug, Clone)]
pub struct DylibEntry {
    pub install_name: String,
    pub current_version: u32,
    pub compatibility_version: u32,
    pub weak: bool,
}

/// A function-entrypoint address for the `__LINKEDIT` `function_starts`
/// stream (delta-encoded against the previous entry).
#[derive(Debug, Clone, Copy)]
pub struct FunctionStart(pub u64);

pub struct FinalizeInput<'a> {
    pub pool: &'a AtomPool,
    pub sections: &'a [layout::Section],
    pub segments: &'a [layout::Segment],
    pub cpu_arch: CpuArch,
    pub output_mode: OutputMode,
    pub entry_address: u64,
    pub symbols: Vec<OutputSymbol>,
    pub dylibs: Vec<DylibEntry>,
    pub rebases: Vec<RebaseEntry>,
    pub binds: Vec<BindEntry>,
    pub lazy_binds: Vec<BindEntry>,
    pub exports: Vec<ExportEntry>,
    pub function_starts: Vec<FunctionStart>,
    pub has_tlv: bool,
    pub uuid: bool,
    pub codesign: bool,
    pub identifier: String,
}

fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) / align * align
}

// ---- rebase/bind opcode encoders (dyld's loader.h convention) ----

const REBASE_TYPE_POINTER: u8 = 1;
const REBASE_OPCODE_DONE: u8 = 0x00;
const REBASE_OPCODE_SET_TYPE_IMM: u8 = 0x10;
const REBASE_OPCODE_SET_SEGMENT_AND_OFFSET_ULEB: u8 = 0x20;
const REBASE_OPCODE_DO_REBASE_IMM_TIMES: u8 = 0x50;

const BIND_TYPE_POINTER: u8 = 1;
const BIND_OPCODE_DONE: u8 = 0x00;
const BIND_OPCODE_SET_DYLIB_ORDINAL_IMM: u8 = 0x10;
const BIND_OPCODE_SET_DYLIB_ORDINAL_ULEB: u8 = 0x20;
const BIND_OPCODE_SET_SYMBOL_TRAILING_FLAGS_IMM: u8 = 0x40;
const BIND_OPCODE_SET_TYPE_IMM: u8 = 0x50;
const BIND_OPCODE_SET_ADDEND_SLEB: u8 = 0x60;
const BIND_OPCODE_SET_SEGMENT_AND_OFFSET_ULEB: u8 = 0x70;
const BIND_OPCODE_DO_BIND: u8 = 0x90;
const BIND_SYMBOL_FLAGS_WEAK_IMPORT: u8 = 0x1;

fn write_uleb(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            out.push(byte | 0x80);
        } else {
            out.push(byte);
            break;
        }
    }
}

fn write_sleb(out: &mut Vec<u8>, mut value: i64) {
    loop {
        let byte = (value & 0x7f) as i64;
        value >>= 7;
        let done = (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0);
        out.push(if done { byte as u8 } else { byte as u8 | 0x80 });
        if done {
            break;
        }
    }
}

fn build_rebase_stream(entries: &[RebaseEntry]) -> Vec<u8> {
    let mut out = Vec::new();
    if entries.is_empty() {
        return out;
    }
    out.push(REBASE_OPCODE_SET_TYPE_IMM | REBASE_TYPE_POINTER);
    for entry in entries {
        out.push(REBASE_OPCODE_SET_SEGMENT_AND_OFFSET_ULEB | (entry.segment_index & 0xf));
        write_uleb(&mut out, entry.segment_offset);
        out.push(REBASE_OPCODE_DO_REBASE_IMM_TIMES | 1);
    }
    out.push(REBASE_OPCODE_DONE);
    out
}

fn write_bind_entry(out: &mut Vec<u8>, entry: &BindEntry) {
    if (0..=0xf).contains(&entry.dylib_ordinal) {
        out.push(BIND_OPCODE_SET_DYLIB_ORDINAL_IMM | (entry.dylib_ordinal as u8 & 0xf));
    } else {
        out.push(BIND_OPCODE_SET_DYLIB_ORDINAL_ULEB);
        write_uleb(out, entry.dylib_ordinal as u64);
    }
    let flags = if entry.weak { BIND_SYMBOL_FLAGS_WEAK_IMPORT } else { 0 };
    out.push(BIND_OPCODE_SET_SYMBOL_TRAILING_FLAGS_IMM | flags);
    out.extend_from_slice(entry.symbol_name.as_bytes());
    out.push(0);
    out.push(BIND_OPCODE_SET_TYPE_IMM | BIND_TYPE_POINTER);
    if entry.addend != 0 {
        out.push(BIND_OPCODE_SET_ADDEND_SLEB);
        write_sleb(out, entry.addend);
    }
    out.push(BIND_OPCODE_SET_SEGMENT_AND_OFFSET_ULEB | (entry.segment_index & 0xf));
    write_uleb(out, entry.segment_offset);
    out.push(BIND_OPCODE_DO_BIND);
}

fn build_bind_stream(entries: &[BindEntry]) -> Vec<u8> {
    let mut out = Vec::new();
    for entry in entries {
        write_bind_entry(&mut out, entry);
    }
    if !entries.is_empty() {
        out.push(BIND_OPCODE_DONE);
    }
    out
}

/// Builds a lazy-bind stream where every entry is independent (its own
/// `do_bind` terminated by `done`), and returns the byte offset of each
/// entry's opcode run relative to the stream start, for back-patching into
/// the matching `__stub_helper` entry's displacement word.
fn build_lazy_bind_stream(entries: &[BindEntry]) -> (Vec<u8>, Vec<u32>) {
    let mut out = Vec::new();
    let mut offsets = Vec::with_capacity(entries.len());
    for entry in entries {
        offsets.push(out.len() as u32);
        write_bind_entry(&mut out, entry);
        out.push(BIND_OPCODE_DONE);
    }
    (out, offsets)
}

// ---- export trie writer (complement of `mach::exports::parse`) ----

struct TrieNode {
    terminal: Option<(u64, u32)>,
    children: Vec<(String, TrieNode)>,
}

fn insert(node: &mut TrieNode, name: &str, flags: u64, address: u32) {
    if name.is_empty() {
        node.terminal = Some((flags, address));
        return;
    }
    for (edge, child) in node.children.iter_mut() {
        let common = edge.chars().zip(name.chars()).take_while(|(a, b)| a == b).count();
        if common == 0 {
            continue;
        }
        if common == edge.len() {
            insert(child, &name[common..], flags, address);
            return;
        }
        let (prefix, edge_rest) = edge.split_at(common);
        let mut mid = TrieNode { terminal: None, children: Vec::new() };
        let old_child = std::mem::replace(child, TrieNode { terminal: None, children: Vec::new() });
        mid.children.push((edge_rest.to_string(), old_child));
        let prefix = prefix.to_string();
        insert(&mut mid, &name[common..], flags, address);
        *edge = prefix;
        *child = mid;
        return;
    }
    let mut leaf = TrieNode { terminal: None, children: Vec::new() };
    insert(&mut leaf, "", flags, address);
    node.children.push((name.to_string(), leaf));
}

fn terminal_payload_size(flags: u64, address: u32) -> usize {
    let mut buf = Vec::new();
    write_uleb(&mut buf, flags);
    write_uleb(&mut buf, address as u64);
    buf.len()
}

fn uleb_len(mut value: u64) -> usize {
    let mut len = 1;
    value >>= 7;
    while value != 0 {
        len += 1;
        value >>= 7;
    }
    len
}

fn compute_size(
    node: &TrieNode,
    child_width: &std::collections::HashMap<*const TrieNode, usize>,
) -> usize {
    let mut size = if let Some((flags, address)) = node.terminal {
        let payload = terminal_payload_size(flags, address);
        uleb_len(payload as u64) + payload
    } else {
        1
    };
    size += 1;
    for (edge, child) in &node.children {
        size += edge.len() + 1;
        size += *child_width.get(&(child as *const TrieNode)).unwrap_or(&1);
    }
    size
}

/// Fixed-point layout: repeatedly recomputes node sizes and preorder
/// offsets until the encoded child-edge uleb widths stop changing. A
/// handful of passes suffice for any realistically sized export set.
fn layout_trie(root: &TrieNode) -> (std::collections::HashMap<*const TrieNode, usize>, Vec<*const TrieNode>) {
    fn collect<'a>(node: &'a TrieNode, order: &mut Vec<*const TrieNode>) {
        order.push(node as *const TrieNode);
        for (_, child) in &node.children {
            collect(child, order);
        }
    }
    let mut order = Vec::new();
    collect(root, &mut order);

    let mut offsets: std::collections::HashMap<*const TrieNode, usize> = std::collections::HashMap::new();
    let mut child_width: std::collections::HashMap<*const TrieNode, usize> = std::collections::HashMap::new();

    for _ in 0..4 {
        let mut sizes = std::collections::HashMap::new();
        for ptr in order.iter().rev() {
            // SAFETY: `order` was collected from `root`, which outlives this
            // function and is not mutated during layout.
            let node = unsafe { &**ptr };
            sizes.insert(*ptr, compute_size(node, &child_width));
        }

        offsets.clear();
        let mut cursor = 0usize;
        fn assign(
            node: &TrieNode,
            sizes: &std::collections::HashMap<*const TrieNode, usize>,
            offsets: &mut std::collections::HashMap<*const TrieNode, usize>,
            cursor: &mut usize,
        ) {
            offsets.insert(node as *const TrieNode, *cursor);
            *cursor += *sizes.get(&(node as *const TrieNode)).unwrap_or(&0);
            for (_, child) in &node.children {
                assign(child, sizes, offsets, cursor);
            }
        }
        assign(root, &sizes, &mut offsets, &mut cursor);

        let mut new_width = std::collections::HashMap::new();
        let mut changed = false;
        for ptr in &order {
            let off = *offsets.get(ptr).unwrap_or(&0);
            let width = uleb_len(off as u64).max(1);
            if child_width.get(ptr).copied() != Some(width) {
                changed = true;
            }
            new_width.insert(*ptr, width);
        }
        child_width = new_width;
        if !changed {
            break;
        }
    }
    (offsets, order)
}

fn write_trie(root: &TrieNode, offsets: &std::collections::HashMap<*const TrieNode, usize>, order: &[*const TrieNode], out: &mut Vec<u8>) {
    fn index<'a>(node: &'a TrieNode, map: &mut std::collections::HashMap<*const TrieNode, &'a TrieNode>) {
        map.insert(node as *const TrieNode, node);
        for (_, child) in &node.children {
            index(child, map);
        }
    }
    let mut by_ptr = std::collections::HashMap::new();
    index(root, &mut by_ptr);

    for ptr in order {
        let node = by_ptr[ptr];
        if let Some((flags, address)) = node.terminal {
            let mut payload = Vec::new();
            write_uleb(&mut payload, flags);
            write_uleb(&mut payload, address as u64);
            write_uleb(out, payload.len() as u64);
            out.extend_from_slice(&payload);
        } else {
            out.push(0);
        }
        out.push(node.children.len() as u8);
        for (edge, child) in &node.children {
            out.extend_from_slice(edge.as_bytes());
            out.push(0);
            write_uleb(out, offsets[&(child as *const TrieNode)] as u64);
        }
    }
}

/// Builds a complete export-trie blob from a flat export list, the write
/// side of `mach::exports::parse`/`walk`.
fn build_export_trie(exports: &[ExportEntry]) -> Vec<u8> {
    if exports.is_empty() {
        return Vec::new();
    }
    let mut root = TrieNode { terminal: None, children: Vec::new() };
    for export in exports {
        let flags = if export.weak { super::exports::EXPORT_SYMBOL_FLAGS_WEAK_DEFINITION } else { 0 };
        insert(&mut root, &export.name, flags, export.address as u32);
    }
    let (offsets, order) = layout_trie(&root);
    let mut out = Vec::new();
    write_trie(&root, &offsets, &order, &mut out);
    out
}

fn build_function_starts(starts: &[FunctionStart]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut prev = 0u64;
    for start in starts {
        write_uleb(&mut out, start.0 - prev);
        prev = start.0;
    }
    out
}

fn section_flags(section_name: &str) -> u32 {
    match section_name {
        "__text" => constants::S_REGULAR | constants::S_ATTR_PURE_INSTRUCTIONS | constants::S_ATTR_SOME_INSTRUCTIONS,
        "__stubs" => constants::S_SYMBOL_STUBS | constants::S_ATTR_PURE_INSTRUCTIONS | constants::S_ATTR_SOME_INSTRUCTIONS,
        "__stub_helper" => constants::S_REGULAR | constants::S_ATTR_PURE_INSTRUCTIONS | constants::S_ATTR_SOME_INSTRUCTIONS,
        "__got" => constants::S_NON_LAZY_SYMBOL_POINTERS,
        "__la_symbol_ptr" => constants::S_LAZY_SYMBOL_POINTERS,
        "__thread_ptrs" => constants::S_THREAD_LOCAL_VARIABLE_POINTERS,
        "__bss" | "__common" => constants::S_ZEROFILL,
        _ => constants::S_REGULAR,
    }
}

fn protection_bits(p: Protection) -> u32 {
    let mut bits = 0;
    if p.read {
        bits |= 0x1;
    }
    if p.write {
        bits |= 0x2;
    }
    if p.execute {
        bits |= 0x4;
    }
    bits
}

fn fixed16(name: &str) -> [u8; 16] {
    let mut buf = [0u8; 16];
    let bytes = name.as_bytes();
    let n = bytes.len().min(16);
    buf[..n].copy_from_slice(&bytes[..n]);
    buf
}

/// Runs the Mach-O S7 finalizer: writes segment content, assembles every
/// `__LINKEDIT` stream, builds the load command list in the order Apple's
/// static linker uses, and returns the complete image bytes.
pub fn finalize(input: &FinalizeInput) -> Result<Vec<u8>> {
    let ctx = Ctx::new(crate::container::Width::Bits64, scroll::LE);

    let image_end = input.segments.iter().map(|s| s.file_offset + s.file_size).max().unwrap_or(0);
    let mut out = vec![0u8; image_end as usize];

    for section in input.sections {
        if section.is_nobits || section.first_atom.is_null() {
            continue;
        }
        let mut atom_idx = section.first_atom;
        while !atom_idx.is_null() {
            let atom = input.pool.get(atom_idx);
            let file_off = section.file_offset + (atom.address - section.address);
            out.pwrite_with(atom.payload_bytes.as_slice(), file_off as usize, ())?;
            atom_idx = atom.next;
        }
    }

    let linkedit_base = input.segments.iter().find(|s| s.name == constants::SEG_LINKEDIT).map(|s| s.file_offset).unwrap_or(image_end);

    let mut linkedit = Vec::new();

    let rebase = build_rebase_stream(&input.rebases);
    let bind = build_bind_stream(&input.binds);
    let (lazy_bind, _lazy_offsets) = build_lazy_bind_stream(&input.lazy_binds);
    let export_trie = build_export_trie(&input.exports);

    let rebase_off = linkedit_base as u32 + linkedit.len() as u32;
    linkedit.extend_from_slice(&rebase);
    let bind_off = linkedit_base as u32 + linkedit.len() as u32;
    linkedit.extend_from_slice(&bind);
    let lazy_bind_off = linkedit_base as u32 + linkedit.len() as u32;
    linkedit.extend_from_slice(&lazy_bind);
    let export_off = linkedit_base as u32 + linkedit.len() as u32;
    linkedit.extend_from_slice(&export_trie);

    let function_starts = build_function_starts(&input.function_starts);
    let function_starts_off = linkedit_base as u32 + linkedit.len() as u32;
    linkedit.extend_from_slice(&function_starts);
    while linkedit.len() % 8 != 0 {
        linkedit.push(0);
    }

    // This linker never marks any input bytes as non-machine data inside a
    // code section, so the data-in-code stream is always empty; the load
    // command is still emitted (zero size) so tools that expect it present
    // find it.
    let data_in_code_off = linkedit_base as u32 + linkedit.len() as u32;

    let mut locals: Vec<&OutputSymbol> = input.symbols.iter().filter(|s| !s.global).collect();
    let mut defined_externals: Vec<&OutputSymbol> = input.symbols.iter().filter(|s| s.global && !s.undefined).collect();
    let mut undefined_externals: Vec<&OutputSymbol> = input.symbols.iter().filter(|s| s.global && s.undefined).collect();
    locals.sort_by(|a, b| a.name.cmp(&b.name));
    defined_externals.sort_by(|a, b| a.name.cmp(&b.name));
    undefined_externals.sort_by(|a, b| a.name.cmp(&b.name));
    let n_locals = locals.len();
    let n_defined_externals = defined_externals.len();
    let n_undefined_externals = undefined_externals.len();

    let mut strtab = vec![0u8];
    let mut str_offset_for = |name: &str, strtab: &mut Vec<u8>| -> u32 {
        let off = strtab.len() as u32;
        strtab.extend_from_slice(name.as_bytes());
        strtab.push(0);
        off
    };

    let symtab_off = linkedit_base as u32 + linkedit.len() as u32;
    let mut nlist_bytes = Vec::new();
    let ordered: Vec<&OutputSymbol> = locals.into_iter().chain(defined_externals).chain(undefined_externals).collect();
    for sym in &ordered {
        let n_strx = str_offset_for(&sym.name, &mut strtab);
        let n_type = if sym.undefined {
            0x01 // N_EXT, N_UNDF
        } else if sym.global {
            0x0e | 0x01 // N_SECT | N_EXT
        } else {
            0x0e // N_SECT
        };
        let nlist = Nlist64 {
            n_strx,
            n_type,
            n_sect: if sym.undefined { 0 } else { sym.section_index },
            n_desc: if sym.weak { 0x0080 } else { 0 },
            n_value: if sym.undefined { 0 } else { sym.value },
        };
        nlist_bytes.pwrite_with(nlist, nlist_bytes.len(), ctx.le)?;
    }
    linkedit.extend_from_slice(&nlist_bytes);

    let strtab_off = linkedit_base as u32 + linkedit.len() as u32;
    linkedit.extend_from_slice(&strtab);
    while linkedit.len() % 8 != 0 {
        linkedit.push(0);
    }

    let dysymtab = DysymtabCommand {
        cmd: LC_DYSYMTAB,
        cmdsize: SIZEOF_DYSYMTAB_COMMAND as u32,
        ilocalsym: 0,
        nlocalsym: n_locals as u32,
        iextdefsym: n_locals as u32,
        nextdefsym: n_defined_externals as u32,
        iundefsym: (n_locals + n_defined_externals) as u32,
        nundefsym: n_undefined_externals as u32,
        tocoff: 0,
        ntoc: 0,
        modtaboff: 0,
        nmodtab: 0,
        extrefsymoff: 0,
        nextrefsyms: 0,
        indirectsymoff: 0,
        nindirectsyms: 0,
        extreloff: 0,
        nextrel: 0,
        locreloff: 0,
        nlocrel: 0,
    };

    // ---- assemble load commands in Apple's static-linker order:
    // segments, dyld_info, function_starts, data_in_code, symtab, dysymtab,
    // main, version_min, uuid, load_dylib(s), code_signature. ----
    let mut commands: Vec<u8> = Vec::new();
    let mut ncmds: u32 = 0;

    for seg in input.segments {
        let mut sect_bytes = Vec::new();
        for &si in &seg.section_indexes {
            let section = &input.sections[si];
            let (segname, sectname) = match section.name.split_once(',') {
                Some((s, n)) => (s.to_string(), n.to_string()),
                None => (seg.name.clone(), section.name.clone()),
            };
            let sh = Section64 {
                sectname: fixed16(&sectname),
                segname: fixed16(&segname),
                addr: section.address,
                size: section.size,
                offset: section.file_offset as u32,
                align: section.align_log2 as u32,
                reloff: 0,
                nreloc: 0,
                flags: section_flags(&sectname),
                reserved1: 0,
                reserved2: if sectname == "__stubs" { stub_size(input.cpu_arch) } else { 0 },
                reserved3: 0,
            };
            sect_bytes.pwrite_with(sh, sect_bytes.len(), ctx.le)?;
        }
        let segcmd = SegmentCommand64 {
            cmd: LC_SEGMENT_64,
            cmdsize: (SIZEOF_SEGMENT_COMMAND_64 + sect_bytes.len()) as u32,
            segname: fixed16(&seg.name),
            vmaddr: seg.vm_addr,
            vmsize: seg.vm_size,
            fileoff: seg.file_offset,
            filesize: seg.file_size,
            maxprot: protection_bits(seg.protection),
            initprot: protection_bits(seg.protection),
            nsects: seg.section_indexes.len() as u32,
            flags: 0,
        };
        commands.pwrite_with(segcmd, commands.len(), ctx.le)?;
        commands.extend_from_slice(&sect_bytes);
        ncmds += 1;
    }

    let dyld_info = DyldInfoCommand {
        cmd: LC_DYLD_INFO_ONLY,
        cmdsize: SIZEOF_DYLIB_INFO_COMMAND as u32,
        rebase_off,
        rebase_size: rebase.len() as u32,
        bind_off,
        bind_size: bind.len() as u32,
        weak_bind_off: 0,
        weak_bind_size: 0,
        lazy_bind_off,
        lazy_bind_size: lazy_bind.len() as u32,
        export_off,
        export_size: export_trie.len() as u32,
    };
    commands.pwrite_with(dyld_info, commands.len(), ctx.le)?;
    ncmds += 1;

    let func_starts_cmd = LinkeditDataCommand {
        cmd: LC_FUNCTION_STARTS,
        cmdsize: SIZEOF_LINKEDIT_DATA_COMMAND as u32,
        dataoff: function_starts_off,
        datasize: function_starts.len() as u32,
    };
    commands.pwrite_with(func_starts_cmd, commands.len(), ctx.le)?;
    ncmds += 1;

    let data_in_code_cmd = LinkeditDataCommand { cmd: LC_DATA_IN_CODE, cmdsize: SIZEOF_LINKEDIT_DATA_COMMAND as u32, dataoff: data_in_code_off, datasize: 0 };
    commands.pwrite_with(data_in_code_cmd, commands.len(), ctx.le)?;
    ncmds += 1;

    let symtab_cmd =
        SymtabCommand { cmd: LC_SYMTAB, cmdsize: SIZEOF_SYMTAB_COMMAND as u32, symoff: symtab_off, nsyms: ordered.len() as u32, stroff: strtab_off, strsize: strtab.len() as u32 };
    commands.pwrite_with(symtab_cmd, commands.len(), ctx.le)?;
    ncmds += 1;

    commands.pwrite_with(dysymtab, commands.len(), ctx.le)?;
    ncmds += 1;

    if matches!(input.output_mode, OutputMode::Exe) {
        let entry_point = EntryPointCommand { cmd: LC_MAIN, cmdsize: SIZEOF_ENTRY_POINT_COMMAND as u32, entryoff: input.entry_address, stacksize: 0 };
        commands.pwrite_with(entry_point, commands.len(), ctx.le)?;
        ncmds += 1;
    }

    let version_min = VersionMinCommand { cmd: LC_VERSION_MIN_MACOSX, cmdsize: SIZEOF_VERSION_MIN_COMMAND as u32, version: 0x000a_0f00, sdk: 0x000a_0f00 };
    commands.pwrite_with(version_min, commands.len(), ctx.le)?;
    ncmds += 1;

    let uuid_cmd_offset = commands.len();
    if input.uuid {
        let placeholder = UuidCommand { cmd: LC_UUID, cmdsize: SIZEOF_UUID_COMMAND as u32, uuid: [0u8; 16] };
        commands.pwrite_with(placeholder, commands.len(), ctx.le)?;
        ncmds += 1;
    }

    for dylib in &input.dylibs {
        let mut padded = dylib.install_name.clone();
        padded.push('\0');
        while padded.len() % 8 != 0 {
            padded.push('\0');
        }
        let cmdsize = SIZEOF_DYLIB_COMMAND as u32 + padded.len() as u32;
        let cmd_kind = if dylib.weak { LC_LOAD_WEAK_DYLIB } else { LC_LOAD_DYLIB };
        let dylib_cmd = DylibCommand {
            cmd: cmd_kind,
            cmdsize,
            dylib: Dylib { name: SIZEOF_DYLIB_COMMAND as LcStr, timestamp: 0, current_version: dylib.current_version, compatibility_version: dylib.compatibility_version },
        };
        commands.pwrite_with(dylib_cmd, commands.len(), ctx.le)?;
        commands.extend_from_slice(padded.as_bytes());
        ncmds += 1;
    }

    let codesign_cmd_offset = commands.len();
    if input.codesign {
        let placeholder = LinkeditDataCommand { cmd: LC_CODE_SIGNATURE, cmdsize: SIZEOF_LINKEDIT_DATA_COMMAND as u32, dataoff: 0, datasize: 0 };
        commands.pwrite_with(placeholder, commands.len(), ctx.le)?;
        ncmds += 1;
    }

    let mut flags = header::MH_NOUNDEFS | header::MH_DYLDLINK | header::MH_TWOLEVEL;
    if matches!(input.output_mode, OutputMode::Exe) {
        flags |= header::MH_PIE;
    }
    if !input.dylibs.is_empty() {
        flags |= header::MH_NO_REEXPORTED_DYLIBS;
    }
    if input.has_tlv {
        flags |= header::MH_HAS_TLV_DESCRIPTORS;
    }

    let filetype = if matches!(input.output_mode, OutputMode::Exe) { header::MH_EXECUTE } else { header::MH_DYLIB };
    let mut mh = Header::new(input.cpu_arch, filetype);
    mh.ncmds = ncmds;
    mh.sizeofcmds = commands.len() as u32;
    mh.flags = flags;

    out.resize(out.len().max(linkedit_base as usize + linkedit.len()), 0);
    out.pwrite_with(mh, 0, ctx.le)?;
    out.pwrite_with(commands.as_slice(), SIZEOF_MACH_HEADER_64, ())?;
    out.pwrite_with(linkedit.as_slice(), linkedit_base as usize, ())?;

    if input.uuid {
        let digest = mach_uuid::compute(&out);
        out.pwrite_with(&digest[..], SIZEOF_MACH_HEADER_64 + uuid_cmd_offset + 8, ())?;
    }

    if input.codesign {
        let sig_off = align_up(out.len(), 16);
        let signature = codesign::build(&out, &input.identifier);
        out.resize(sig_off + signature.len(), 0);
        out.pwrite_with(signature.as_slice(), sig_off, ())?;
        let cs_cmd = LinkeditDataCommand {
            cmd: LC_CODE_SIGNATURE,
            cmdsize: SIZEOF_LINKEDIT_DATA_COMMAND as u32,
            dataoff: sig_off as u32,
            datasize: (out.len() - sig_off) as u32,
        };
        out.pwrite_with(cs_cmd, SIZEOF_MACH_HEADER_64 + codesign_cmd_offset, ctx.le)?;
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rebase_stream_empty_for_no_entries() {
        assert!(build_rebase_stream(&[]).is_empty());
    }

    #[test]
    fn bind_stream_contains_symbol_name() {
        let entries = vec![BindEntry { segment_index: 1, segment_offset: 8, symbol_name: "_printf".into(), dylib_ordinal: 1, weak: false, addend: 0 }];
        let stream = build_bind_stream(&entries);
        let name_bytes = b"_printf";
        assert!(stream.windows(name_bytes.len()).any(|w| w == name_bytes));
    }

    #[test]
    fn lazy_bind_entries_are_independently_offset() {
        let entries = vec![
            BindEntry { segment_index: 1, segment_offset: 0, symbol_name: "_a".into(), dylib_ordinal: 1, weak: false, addend: 0 },
            BindEntry { segment_index: 1, segment_offset: 8, symbol_name: "_b".into(), dylib_ordinal: 1, weak: false, addend: 0 },
        ];
        let (_stream, offsets) = build_lazy_bind_stream(&entries);
        assert_eq!(offsets.len(), 2);
        assert_eq!(offsets[0], 0);
        assert!(offsets[1] > 0);
    }

    #[test]
    fn export_trie_roundtrips_through_reader() {
        let exports = vec![
            ExportEntry { name: "_main".into(), address: 0x1000, weak: false },
            ExportEntry { name: "_main_helper".into(), address: 0x1010, weak: false },
        ];
        let trie = build_export_trie(&exports);
        let parsed = super::super::exports::parse(&trie).unwrap();
        let names: Vec<&str> = parsed.iter().map(|e| e.name.as_str()).collect();
        assert!(names.contains(&"_main"));
        assert!(names.contains(&"_main_helper"));
    }

    #[test]
    fn function_starts_are_delta_encoded() {
        let starts = vec![FunctionStart(0x1000), FunctionStart(0x1010)];
        let encoded = build_function_starts(&starts);
        assert!(!encoded.is_empty());
    }
}
