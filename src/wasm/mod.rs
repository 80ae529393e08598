//! Wasm object model, shared by `input::wasm_object` (the S1 parser) and
//! `wasm::finalize` (the S7 emitter). Unlike ELF/Mach-O, a Wasm module's
//! "addresses" are index-space positions (function index, global index,
//! ...) rather than byte offsets, so this module carries its own small
//! value-type/section vocabulary instead of reusing `elf`/`mach`'s.
//!
//! Relocatable values use the "fixed 5-byte LEB128" convention real Wasm
//! object producers rely on (§6 "Wasm: ... section headers written with
//! fixed-width 5-byte LEBs for back-patching length fields" — the same
//! trick applies to relocatable operands, which is what lets
//! `reloc::wasm::write` patch them in place without resizing the function
//! body).

pub mod finalize;
pub mod sections;

use crate::error::{Error, Result};

pub mod leb128 {
    use super::*;

    pub fn read_u32(data: &[u8], offset: &mut usize) -> Result<u32> {
        Ok(read_u64(data, offset)? as u32)
    }

    pub fn read_u64(data: &[u8], offset: &mut usize) -> Result<u64> {
        let mut result: u64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = *data
                .get(*offset)
                .ok_or_else(|| Error::Malformed("wasm: truncated leb128".into()))?;
            *offset += 1;
            result |= ((byte & 0x7f) as u64) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
            if shift >= 64 {
                return Err(Error::Malformed("wasm: leb128 overflow".into()));
            }
        }
        Ok(result)
    }

    pub fn read_i64(data: &[u8], offset: &mut usize) -> Result<i64> {
        let mut result: i64 = 0;
        let mut shift = 0u32;
        let mut byte;
        loop {
            byte = *data
                .get(*offset)
                .ok_or_else(|| Error::Malformed("wasm: truncated sleb128".into()))?;
            *offset += 1;
            result |= ((byte & 0x7f) as i64) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                break;
            }
        }
        if shift < 64 && (byte & 0x40) != 0 {
            result |= -(1i64 << shift);
        }
        Ok(result)
    }

    /// Encodes `value` as a non-minimal unsigned LEB128 exactly 5 bytes
    /// wide, continuation bits set on every byte but the last — the
    /// relocatable-operand convention §6 calls out.
    pub fn write_u32_fixed5(value: u32) -> [u8; 5] {
        let mut out = [0x80u8; 5];
        let mut v = value as u64;
        for i in 0..5 {
            out[i] = (v & 0x7f) as u8 | if i < 4 { 0x80 } else { 0 };
            v >>= 7;
        }
        out
    }

    /// Minimal unsigned LEB128 encoding, used for section/vector lengths
    /// that are never back-patched.
    pub fn write_u32(value: u32) -> Vec<u8> {
        let mut out = Vec::new();
        let mut v = value;
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v != 0 {
                out.push(byte | 0x80);
            } else {
                out.push(byte);
                break;
            }
        }
        out
    }

    pub fn write_i64(value: i64) -> Vec<u8> {
        let mut out = Vec::new();
        let mut v = value;
        loop {
            let byte = (v & 0x7f) as i64;
            v >>= 7;
            let done = (v == 0 && byte & 0x40 == 0) || (v == -1 && byte & 0x40 != 0);
            out.push(if done { byte as u8 } else { byte as u8 | 0x80 });
            if done {
                break;
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValType {
    I32,
    I64,
    F32,
    F64,
    V128,
    FuncRef,
    ExternRef,
}

impl ValType {
    pub fn from_byte(b: u8) -> Result<ValType> {
        Ok(match b {
            0x7f => ValType::I32,
            0x7e => ValType::I64,
            0x7d => ValType::F32,
            0x7c => ValType::F64,
            0x7b => ValType::V128,
            0x70 => ValType::FuncRef,
            0x6f => ValType::ExternRef,
            other => return Err(Error::Malformed(format!("wasm: unknown valtype 0x{:x}", other))),
        })
    }

    pub fn to_byte(self) -> u8 {
        match self {
            ValType::I32 => 0x7f,
            ValType::I64 => 0x7e,
            ValType::F32 => 0x7d,
            ValType::F64 => 0x7c,
            ValType::V128 => 0x7b,
            ValType::FuncRef => 0x70,
            ValType::ExternRef => 0x6f,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FuncType {
    pub params: Vec<ValType>,
    pub results: Vec<ValType>,
}

#[derive(Debug, Clone)]
pub enum ImportKind {
    Func { type_index: u32 },
    Table,
    Memory { min: u32, max: Option<u32> },
    Global { val_type: ValType, mutable: bool },
}

#[derive(Debug, Clone)]
pub struct Import {
    pub module: String,
    pub name: String,
    pub kind: ImportKind,
}

/// A Wasm linking-relocation kind (§4.1 custom sections "`reloc.*`"). Only
/// the index-space and memory-address kinds this linker actually merges
/// are represented; unrecognized types fail the object parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WasmRelocKind {
    FunctionIndexLeb,
    TableIndexSleb,
    MemoryAddrLeb,
    TypeIndexLeb,
    GlobalIndexLeb,
}

impl WasmRelocKind {
    /// Maps a `reloc.CODE`/`reloc.DATA` entry's `R_WASM_*` type byte (the
    /// tool-conventions numbering) to the subset this crate understands:
    /// the plain unsigned-LEB index/address forms. The absolute (`_I32`),
    /// signed (`_SLEB`), and section/function-relative offset forms are
    /// unsupported — real-world output from `clang -c` without PIC doesn't
    /// need them.
    pub fn from_type_byte(b: u8) -> Result<WasmRelocKind> {
        Ok(match b {
            0 => WasmRelocKind::FunctionIndexLeb,
            1 => WasmRelocKind::TableIndexSleb,
            3 => WasmRelocKind::MemoryAddrLeb,
            6 => WasmRelocKind::TypeIndexLeb,
            7 => WasmRelocKind::GlobalIndexLeb,
            other => return Err(Error::Malformed(format!("wasm: unsupported R_WASM_* type {}", other))),
        })
    }

    pub fn to_type_byte(self) -> u8 {
        match self {
            WasmRelocKind::FunctionIndexLeb => 0,
            WasmRelocKind::TableIndexSleb => 1,
            WasmRelocKind::MemoryAddrLeb => 3,
            WasmRelocKind::TypeIndexLeb => 6,
            WasmRelocKind::GlobalIndexLeb => 7,
        }
    }
}

/// One relocation entry from a `reloc.CODE`/`reloc.DATA` custom section,
/// still indexed by the producing object's own symbol-table index; resolved
/// to a global/atom during S2/S6 the same way `input::object::RawReloc`
/// is, just against the Wasm symbol-table index space instead of an ELF/
/// Mach-O symbol table.
#[derive(Debug, Clone)]
pub struct WasmReloc {
    pub offset: u32,
    pub kind: WasmRelocKind,
    pub symbol_index: u32,
    /// Only `MemoryAddrLeb` carries a nonzero addend in practice (`&global +
    /// N`-style data references); every other kind parses to 0.
    pub addend: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WasmSymbolKind {
    Function,
    Data,
    Global,
    Table,
}

/// One entry of the `linking` custom section's symbol table: the bridge
/// between a Wasm index-space slot and the externally-visible name this
/// crate's generic resolver merges on.
#[derive(Debug, Clone)]
pub struct WasmSymbol {
    pub name: String,
    pub kind: WasmSymbolKind,
    /// Index into the relevant space: function index (imports + locals),
    /// global index, or `data_segment_index` for `Data` symbols.
    pub index: u32,
    pub undefined: bool,
    pub weak: bool,
    pub exported: bool,
}

#[derive(Debug, Clone)]
pub struct FunctionBody {
    pub type_index: u32,
    pub locals: Vec<(u32, ValType)>,
    pub code: Vec<u8>,
    pub relocs: Vec<WasmReloc>,
}

#[derive(Debug, Clone)]
pub struct DataSegment {
    pub name: Option<String>,
    pub offset: i64,
    pub data: Vec<u8>,
    pub relocs: Vec<WasmReloc>,
}

#[derive(Debug, Clone)]
pub struct GlobalDef {
    pub val_type: ValType,
    pub mutable: bool,
    pub init: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Func,
    Table,
    Memory,
    Global,
}

/// One parsed Wasm relocatable object (§4.1 "Object (Wasm)").
#[derive(Debug, Clone, Default)]
pub struct WasmModule {
    pub types: Vec<FuncType>,
    pub imports: Vec<Import>,
    /// Local function bodies; type indices are into `types`. The function
    /// index space a relocation's `FunctionIndexLeb` refers to is
    /// `imports.len() + position in this vec`.
    pub functions: Vec<FunctionBody>,
    pub globals: Vec<GlobalDef>,
    pub data_segments: Vec<DataSegment>,
    pub exports: Vec<(String, ExportKind, u32)>,
    pub symbols: Vec<WasmSymbol>,
    pub memory_min: u32,
    pub memory_max: Option<u32>,
    pub shared_memory: bool,
    /// `(language, version)` pairs merged from every input's `producers`
    /// custom section (§4.7 "producers (merge languages and
    /// processed-by fields across inputs)").
    pub producers_languages: Vec<(String, String)>,
    pub producers_processed_by: Vec<(String, String)>,
}

/// The parts of a parsed Wasm module that don't fit `input::object::RawObject`'s
/// byte-addressed section model, carried alongside it so S1 still produces a
/// uniform `RawObject` for every format (§4.1 "Object (Wasm)" maps function
/// bodies onto a `code` section and data segments onto a `data` section, same
/// as ELF/Mach-O; everything else rides along here for `wasm::finalize` to
/// merge at S7).
#[derive(Debug, Clone, Default)]
pub struct WasmExtra {
    pub types: Vec<FuncType>,
    pub imports: Vec<Import>,
    pub globals: Vec<GlobalDef>,
    pub exports: Vec<(String, ExportKind, u32)>,
    pub memory_min: u32,
    pub memory_max: Option<u32>,
    pub shared_memory: bool,
    pub producers_languages: Vec<(String, String)>,
    pub producers_processed_by: Vec<(String, String)>,
    /// Type index of each local function, parallel to the `code` section's
    /// atom order (one entry per function body, in declaration order).
    pub function_type_indices: Vec<u32>,
    /// Local-variable declarations for each local function, parallel to
    /// `function_type_indices`: the `code` section's byte blob carries only
    /// instruction bytes (see `input::wasm_object`), so the decl prefix
    /// `finalize` re-emits per body has to ride along here instead.
    pub function_locals: Vec<Vec<(u32, ValType)>>,
    /// Name of each data segment in declaration order, when the producing
    /// object's `linking` section named it (`SEGMENT_INFO` subsection isn't
    /// modeled, so this is always `None` in practice today).
    pub data_segment_names: Vec<Option<String>>,
}
