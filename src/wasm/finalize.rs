//! Wasm module writer (S7, §4.7 "Wasm"): assembles the merged type/import/
//! global/export tables `Linker` built during S2-S4 and the code/data atom
//! chains S6 already patched in place, into one `\0asm` binary module.
//!
//! Wasm has no segments (`layout` is ELF/Mach-O only) and no byte-addressed
//! virtual memory space for code — a function's "address" is its index in
//! the function index space, not an offset `layout::size_pass` could ever
//! assign. So unlike `elf::finalize`/`mach::linkedit`, this module lays its
//! own atoms out linearly: concatenation order *is* the index-space order,
//! decided by `Linker` before calling in (imports first, then local
//! definitions in atom order).

use crate::atom::{AtomIndex, AtomPool};
use crate::error::Result;
use crate::wasm::leb128::{write_i64, write_u32};
use crate::wasm::sections::{write_custom_section, write_section, SectionId};
use crate::wasm::{ExportKind, FuncType, GlobalDef, Import, ImportKind, ValType};

/// One local function body ready for the code section: its type index (into
/// `FinalizeInput::types`), local-variable decls, and instruction bytes
/// (relocations already patched by `reloc::wasm::write` during S6).
pub struct FinalizeInput<'a> {
    pub pool: &'a AtomPool,
    pub types: Vec<FuncType>,
    pub imports: Vec<Import>,
    pub function_type_indices: Vec<u32>,
    pub function_locals: Vec<Vec<(u32, ValType)>>,
    pub code_atoms: Vec<AtomIndex>,
    pub globals: Vec<GlobalDef>,
    pub exports: Vec<(String, ExportKind, u32)>,
    pub data_segment_names: Vec<Option<String>>,
    pub data_segment_offsets: Vec<i64>,
    pub data_atoms: Vec<AtomIndex>,
    pub memory_min: u32,
    pub memory_max: Option<u32>,
    pub shared_memory: bool,
    pub memory_imported: bool,
    pub producers_languages: Vec<(String, String)>,
    pub producers_processed_by: Vec<(String, String)>,
    /// `(function index, name)` pairs for the `name` custom section's
    /// function-names subsection; empty skips the section entirely.
    pub function_names: Vec<(u32, String)>,
}

fn write_val_type(out: &mut Vec<u8>, v: ValType) {
    out.push(v.to_byte());
}

fn write_func_type(out: &mut Vec<u8>, ft: &FuncType) {
    out.push(0x60);
    out.extend_from_slice(&write_u32(ft.params.len() as u32));
    for p in &ft.params {
        write_val_type(out, *p);
    }
    out.extend_from_slice(&write_u32(ft.results.len() as u32));
    for r in &ft.results {
        write_val_type(out, *r);
    }
}

fn write_name(out: &mut Vec<u8>, name: &str) {
    out.extend_from_slice(&write_u32(name.len() as u32));
    out.extend_from_slice(name.as_bytes());
}

fn write_limits(out: &mut Vec<u8>, min: u32, max: Option<u32>, shared: bool) {
    let flags = (if max.is_some() { 0x1 } else { 0 }) | (if shared { 0x2 } else { 0 });
    out.push(flags);
    out.extend_from_slice(&write_u32(min));
    if let Some(max) = max {
        out.extend_from_slice(&write_u32(max));
    }
}

fn write_import(out: &mut Vec<u8>, import: &Import) {
    write_name(out, &import.module);
    write_name(out, &import.name);
    match &import.kind {
        ImportKind::Func { type_index } => {
            out.push(0);
            out.extend_from_slice(&write_u32(*type_index));
        }
        ImportKind::Table => {
            out.push(1);
            out.push(ValType::FuncRef.to_byte());
            write_limits(out, 0, None, false);
        }
        ImportKind::Memory { min, max } => {
            out.push(2);
            write_limits(out, *min, *max, false);
        }
        ImportKind::Global { val_type, mutable } => {
            out.push(3);
            write_val_type(out, *val_type);
            out.push(*mutable as u8);
        }
    }
}

fn write_const_i32_expr(out: &mut Vec<u8>, value: i64) {
    out.push(0x41); // i32.const
    out.extend_from_slice(&write_u32(value as u32));
    out.push(0x0b); // end
}

fn write_global_init(out: &mut Vec<u8>, global: &GlobalDef) {
    match global.val_type {
        ValType::I64 => {
            out.push(0x42); // i64.const
            out.extend_from_slice(&write_i64(global.init));
            out.push(0x0b);
        }
        _ => write_const_i32_expr(out, global.init),
    }
}

fn write_export_kind(kind: ExportKind) -> u8 {
    match kind {
        ExportKind::Func => 0,
        ExportKind::Table => 1,
        ExportKind::Memory => 2,
        ExportKind::Global => 3,
    }
}

/// Runs S7 for the Wasm backend: emits every section in
/// `wasm::sections::CANONICAL_ORDER`, skipping empty ones, then trailing
/// `producers`/`name` custom sections.
pub fn finalize(input: &FinalizeInput) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    out.extend_from_slice(b"\x00asm");
    out.extend_from_slice(&1u32.to_le_bytes());

    if !input.types.is_empty() {
        let mut payload = write_u32(input.types.len() as u32);
        for ft in &input.types {
            write_func_type(&mut payload, ft);
        }
        out.extend_from_slice(&write_section(SectionId::Type, &payload));
    }

    if !input.imports.is_empty() {
        let mut payload = write_u32(input.imports.len() as u32);
        for import in &input.imports {
            write_import(&mut payload, import);
        }
        out.extend_from_slice(&write_section(SectionId::Import, &payload));
    }

    if !input.function_type_indices.is_empty() {
        let mut payload = write_u32(input.function_type_indices.len() as u32);
        for &ty in &input.function_type_indices {
            payload.extend_from_slice(&write_u32(ty));
        }
        out.extend_from_slice(&write_section(SectionId::Function, &payload));
    }

    if !input.memory_imported {
        let mut payload = write_u32(1);
        write_limits(&mut payload, input.memory_min, input.memory_max, input.shared_memory);
        out.extend_from_slice(&write_section(SectionId::Memory, &payload));
    }

    if !input.globals.is_empty() {
        let mut payload = write_u32(input.globals.len() as u32);
        for global in &input.globals {
            write_val_type(&mut payload, global.val_type);
            payload.push(global.mutable as u8);
            write_global_init(&mut payload, global);
        }
        out.extend_from_slice(&write_section(SectionId::Global, &payload));
    }

    if !input.exports.is_empty() {
        let mut payload = write_u32(input.exports.len() as u32);
        for (name, kind, index) in &input.exports {
            write_name(&mut payload, name);
            payload.push(write_export_kind(*kind));
            payload.extend_from_slice(&write_u32(*index));
        }
        out.extend_from_slice(&write_section(SectionId::Export, &payload));
    }

    // Bulk-memory `data.drop`/`memory.init` support is the only reason a
    // module needs `data_count`; this linker doesn't model those ops, so
    // emit it iff the module is shared-memory (§8 scenario 6), a reasonable
    // stand-in for "built with bulk-memory features enabled" (see DESIGN.md).
    if input.shared_memory && !input.data_atoms.is_empty() {
        out.extend_from_slice(&write_section(SectionId::DataCount, &write_u32(input.data_atoms.len() as u32)));
    }

    if !input.code_atoms.is_empty() {
        let mut payload = write_u32(input.code_atoms.len() as u32);
        for (i, &atom_idx) in input.code_atoms.iter().enumerate() {
            let atom = input.pool.get(atom_idx);
            let locals = input.function_locals.get(i).map(Vec::as_slice).unwrap_or(&[]);
            let mut body = write_u32(locals.len() as u32);
            for (count, val_type) in locals {
                body.extend_from_slice(&write_u32(*count));
                write_val_type(&mut body, *val_type);
            }
            body.extend_from_slice(&atom.payload_bytes);
            payload.extend_from_slice(&write_u32(body.len() as u32));
            payload.extend_from_slice(&body);
        }
        out.extend_from_slice(&write_section(SectionId::Code, &payload));
    }

    if !input.data_atoms.is_empty() {
        let mut payload = write_u32(input.data_atoms.len() as u32);
        for (i, &atom_idx) in input.data_atoms.iter().enumerate() {
            let atom = input.pool.get(atom_idx);
            let offset = input.data_segment_offsets.get(i).copied().unwrap_or(0);
            payload.push(0); // flags: active, memory index 0
            write_const_i32_expr(&mut payload, offset);
            payload.extend_from_slice(&write_u32(atom.payload_bytes.len() as u32));
            payload.extend_from_slice(&atom.payload_bytes);
        }
        out.extend_from_slice(&write_section(SectionId::Data, &payload));
    }

    if !input.producers_languages.is_empty() || !input.producers_processed_by.is_empty() {
        let mut payload = Vec::new();
        let field_count = (!input.producers_languages.is_empty() as u32) + (!input.producers_processed_by.is_empty() as u32);
        payload.extend_from_slice(&write_u32(field_count));
        for (field_name, values) in
            [("language", &input.producers_languages), ("processed-by", &input.producers_processed_by)]
        {
            if values.is_empty() {
                continue;
            }
            write_name(&mut payload, field_name);
            payload.extend_from_slice(&write_u32(values.len() as u32));
            for (name, version) in values {
                write_name(&mut payload, name);
                write_name(&mut payload, version);
            }
        }
        out.extend_from_slice(&write_custom_section("producers", &payload));
    }

    if !input.function_names.is_empty() {
        let mut names_subsection = write_u32(input.function_names.len() as u32);
        for (index, name) in &input.function_names {
            names_subsection.extend_from_slice(&write_u32(*index));
            write_name(&mut names_subsection, name);
        }
        let mut payload = vec![1u8]; // subsection 1: function names
        payload.extend_from_slice(&write_u32(names_subsection.len() as u32));
        payload.extend_from_slice(&names_subsection);
        out.extend_from_slice(&write_custom_section("name", &payload));
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::{Atom, AtomPool, Owner, SectionKind};
    use crate::input::InputId;
    use crate::symbol::SymbolRef;

    fn push_atom(pool: &mut AtomPool, payload: Vec<u8>) -> AtomIndex {
        pool.push(Atom {
            owner: Owner::Input(InputId(0)),
            primary_symbol: SymbolRef::from_input(InputId(0), 0),
            size: payload.len() as u32,
            align_log2: 0,
            kind: SectionKind::Code,
            payload_bytes: payload,
            relocations: Vec::new(),
            inner_symbols: Vec::new(),
            prev: AtomIndex::NULL,
            next: AtomIndex::NULL,
            output_section: "code".to_string(),
            address: 0,
        })
    }

    #[test]
    fn emits_magic_and_version() {
        let pool = AtomPool::new();
        let input = FinalizeInput {
            pool: &pool,
            types: vec![],
            imports: vec![],
            function_type_indices: vec![],
            function_locals: vec![],
            code_atoms: vec![],
            globals: vec![],
            exports: vec![],
            data_segment_names: vec![],
            data_segment_offsets: vec![],
            data_atoms: vec![],
            memory_min: 1,
            memory_max: None,
            shared_memory: false,
            memory_imported: false,
            producers_languages: vec![],
            producers_processed_by: vec![],
            function_names: vec![],
        };
        let bytes = finalize(&input).unwrap();
        assert_eq!(&bytes[0..4], b"\x00asm");
        assert_eq!(&bytes[4..8], &1u32.to_le_bytes());
    }

    #[test]
    fn emits_one_function_body_with_locals_prefix() {
        let mut pool = AtomPool::new();
        let func = push_atom(&mut pool, vec![0x41, 0x00, 0x0b]); // i32.const 0; end
        let input = FinalizeInput {
            pool: &pool,
            types: vec![FuncType { params: vec![], results: vec![ValType::I32] }],
            imports: vec![],
            function_type_indices: vec![0],
            function_locals: vec![vec![(1, ValType::I32)]],
            code_atoms: vec![func],
            globals: vec![],
            exports: vec![("main".to_string(), ExportKind::Func, 0)],
            data_segment_names: vec![],
            data_segment_offsets: vec![],
            data_atoms: vec![],
            memory_min: 1,
            memory_max: None,
            shared_memory: false,
            memory_imported: false,
            producers_languages: vec![],
            producers_processed_by: vec![],
            function_names: vec![],
        };
        let bytes = finalize(&input).unwrap();
        assert_eq!(bytes[0..4], *b"\x00asm");
        // type, function, memory, export, code sections should all be present
        let mut ids = Vec::new();
        let mut pos = 8;
        while pos < bytes.len() {
            ids.push(bytes[pos]);
            let mut len_pos = pos + 1;
            let section_len = crate::wasm::leb128::read_u32(&bytes, &mut len_pos).unwrap() as usize;
            pos = len_pos + section_len;
        }
        assert!(ids.contains(&(SectionId::Type as u8)));
        assert!(ids.contains(&(SectionId::Code as u8)));
        assert!(ids.contains(&(SectionId::Export as u8)));
    }

    #[test]
    fn emits_data_count_only_when_shared_memory() {
        let mut pool = AtomPool::new();
        let seg = push_atom(&mut pool, vec![1, 2, 3, 4]);
        let mut input = FinalizeInput {
            pool: &pool,
            types: vec![],
            imports: vec![],
            function_type_indices: vec![],
            function_locals: vec![],
            code_atoms: vec![],
            globals: vec![],
            exports: vec![],
            data_segment_names: vec![None],
            data_segment_offsets: vec![0],
            data_atoms: vec![seg],
            memory_min: 1,
            memory_max: Some(1),
            shared_memory: true,
            memory_imported: false,
            producers_languages: vec![],
            producers_processed_by: vec![],
            function_names: vec![],
        };
        let with_count = finalize(&input).unwrap();
        assert!(with_count.windows(1).any(|w| w[0] == SectionId::DataCount as u8));

        input.shared_memory = false;
        let without_count = finalize(&input).unwrap();
        assert!(without_count.len() < with_count.len());
    }
}
