//! Wasm relocation patching (§4.6, Wasm variant): unlike x86-64/aarch64,
//! every kind this crate supports resolves to a plain index or linear-memory
//! address, written as the fixed-5-byte back-patchable LEB128 the object
//! producer reserved space for (`wasm::leb128::write_u32_fixed5`).

use crate::atom::Atom;
use crate::error::{Error, Result};
use crate::reloc::{Relocation, RelocKind};
use crate::wasm::leb128::write_u32_fixed5;

/// Patches `atom.payload_bytes[reloc.offset..][..5]` with `value`'s
/// fixed-5-byte LEB128 encoding. `value` is whatever index/address space
/// `reloc.kind` calls for (function index, global index, table slot, or
/// linear memory address) — `wasm::finalize` resolves that before calling in.
pub fn write(atom: &mut Atom, reloc: &Relocation, value: u64) -> Result<()> {
    if !matches!(
        reloc.kind,
        RelocKind::WasmFunctionIndexLeb
            | RelocKind::WasmTableIndexSleb
            | RelocKind::WasmMemoryAddrLeb
            | RelocKind::WasmTypeIndexLeb
            | RelocKind::WasmGlobalIndexLeb
    ) {
        return Err(Error::UnsupportedRelocation(format!("not a wasm relocation kind: {:?}", reloc.kind)));
    }
    let offset = reloc.offset as usize;
    let end = offset + 5;
    if end > atom.payload_bytes.len() {
        return Err(Error::UnsupportedRelocation("wasm relocation offset out of bounds".into()));
    }
    let bytes = write_u32_fixed5(value as u32);
    atom.payload_bytes[offset..end].copy_from_slice(&bytes);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::{AtomIndex, Owner, SectionKind};
    use crate::input::InputId;
    use crate::symbol::SymbolRef;

    #[test]
    fn patches_fixed_width_leb_in_place() {
        let mut atom = Atom {
            owner: Owner::Input(InputId(0)),
            primary_symbol: SymbolRef::from_input(InputId(0), 0),
            size: 10,
            align_log2: 0,
            kind: SectionKind::Code,
            payload_bytes: vec![0u8; 10],
            relocations: Vec::new(),
            inner_symbols: Vec::new(),
            prev: AtomIndex::NULL,
            next: AtomIndex::NULL,
            output_section: "code".to_string(),
            address: 0,
        };
        let reloc = Relocation {
            offset: 2,
            kind: RelocKind::WasmFunctionIndexLeb,
            target: SymbolRef::from_input(InputId(0), 0),
            addend: 0,
            pcrel: false,
            length: 5,
        };
        write(&mut atom, &reloc, 300).unwrap();
        assert_eq!(&atom.payload_bytes[2..7], &write_u32_fixed5(300));
    }
}
