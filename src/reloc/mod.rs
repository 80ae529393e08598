//! The unified relocation type (§3 "Relocation") and the S6 relocation
//! writer (§4.6): `resolve_target` dereferences GOT/stub/thunk indirection,
//! `x86_64`/`aarch64` hold the architecture-specific bit encodings and the
//! ELF peephole rewrites.

pub mod aarch64;
pub mod wasm;
pub mod x86_64;

use crate::atom::{Atom, AtomIndex, AtomPool};
use crate::error::{Error, Result};
use crate::options::CpuArch;
use crate::symbol::SymbolRef;

/// The architecture-agnostic relocation kind an input relocation was
/// translated into during S1/S3 (§4.3 "Atoms' relocations are translated
/// from input format to a unified internal form").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelocKind {
    /// A plain absolute pointer-sized (64-bit) value.
    Abs64,
    /// A zero- or sign-extended 32-bit absolute value.
    Abs32,
    /// A PC-relative 32-bit displacement.
    Pc32,
    /// A PC-relative 64-bit displacement.
    Pc64,
    /// x86-64 `R_X86_64_GOTPCREL`: PC-relative displacement to a GOT slot.
    GotPcrel,
    /// x86-64 `R_X86_64_{REX_,}GOTPCRELX`: like `GotPcrel`, but the linker
    /// may rewrite the instruction to avoid the GOT indirection entirely
    /// when the target is locally defined (§4.6 peephole rewrites).
    GotPcrelLoad,
    /// x86-64 `R_X86_64_PLT32`.
    Plt32,
    /// x86-64 `R_X86_64_GOTTPOFF`: PC-relative offset to a GOT slot holding
    /// the target's initial-exec TLS offset.
    GotTpOff,
    /// x86-64 `R_X86_64_TPOFF32`: direct initial-exec TLS offset.
    TpOff32,
    /// x86-64 `R_X86_64_DTPOFF64`: module-relative TLS offset, 64-bit.
    DtpOff64,
    /// aarch64 `ADRP` page delta, `PAGE21`.
    Page21,
    /// aarch64 `ADD`/`LDR` immediate page offset, `PAGEOFF12`.
    PageOff12,
    /// aarch64 `ADRP` to a GOT slot's page.
    GotLdPage21,
    /// aarch64 `LDR` offset within a GOT slot's page.
    GotLdPageOff12,
    /// aarch64 26-bit branch displacement (`B`/`BL`).
    Branch26,
    /// Wasm `R_WASM_FUNCTION_INDEX_LEB`: the target's final function index,
    /// fixed-5-byte LEB128 encoded.
    WasmFunctionIndexLeb,
    /// Wasm `R_WASM_TABLE_INDEX_SLEB`: the target's final table slot.
    WasmTableIndexSleb,
    /// Wasm `R_WASM_MEMORY_ADDR_LEB`: the target data symbol's final linear
    /// memory address.
    WasmMemoryAddrLeb,
    /// Wasm `R_WASM_TYPE_INDEX_LEB`: a merged function-type index.
    WasmTypeIndexLeb,
    /// Wasm `R_WASM_GLOBAL_INDEX_LEB`: the target's final global index.
    WasmGlobalIndexLeb,
}

impl RelocKind {
    /// Whether this kind requires an indirection (GOT/TLV slot) to be
    /// synthesized for its target before it can be resolved (§4.4).
    pub fn needs_got(&self) -> bool {
        matches!(
            self,
            RelocKind::GotPcrel
                | RelocKind::GotPcrelLoad
                | RelocKind::GotTpOff
                | RelocKind::GotLdPage21
                | RelocKind::GotLdPageOff12
        )
    }
}

/// One relocation attached to an atom (§3 "Relocation"). `offset` is
/// relative to the owning atom's start, not the original input section's.
#[derive(Debug, Clone)]
pub struct Relocation {
    pub offset: u32,
    pub kind: RelocKind,
    pub target: SymbolRef,
    pub addend: i64,
    pub pcrel: bool,
    /// Field width in bytes (4 or 8), used for overflow checks.
    pub length: u8,
}

/// Where a relocation's target symbol ultimately lives, once the resolver
/// (S2) and synthetic-atom creation (S4) have run.
pub enum Target {
    /// Resolves directly to an atom's final address (+ addend).
    Direct(u64),
    /// Resolves through a synthesized indirection atom (GOT/stub/TLV slot);
    /// the relocation should target *that* atom's address instead.
    Indirect(u64),
}

/// Computes the final bytes for `reloc` (attached at `source_addr =
/// atom_addr + reloc.offset`) and writes them into `atom.payload_bytes`.
/// `target_addr` is the resolved indirection-or-direct address (§4.6).
pub fn write_relocation(
    arch: CpuArch,
    atom: &mut Atom,
    reloc: &Relocation,
    source_addr: u64,
    target_addr: u64,
) -> Result<()> {
    match arch {
        CpuArch::X86_64 => x86_64::write(atom, reloc, source_addr, target_addr),
        CpuArch::Aarch64 => aarch64::write(atom, reloc, source_addr, target_addr),
        CpuArch::Wasm32 => wasm::write(atom, reloc, target_addr),
    }
}

/// Resolves `sym` to a concrete address: either the defining atom's final
/// address, or (if `reloc.kind.needs_got()`) the address of its synthesized
/// GOT/TLV slot, looked up through `pool`'s dedup map (§4.4 "uniquely keyed
/// target_symbol -> atom_index").
pub fn resolve_target(
    pool: &AtomPool,
    reloc: &Relocation,
    definition: AtomIndex,
    got_entry: Option<AtomIndex>,
) -> Result<u64> {
    if reloc.kind.needs_got() {
        let got = got_entry.ok_or_else(|| {
            Error::UnsupportedRelocation(format!("missing GOT entry for relocation {:?}", reloc.kind))
        })?;
        Ok(pool.get(got).address)
    } else {
        Ok(pool.get(definition).address)
    }
}
