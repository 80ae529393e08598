//! x86-64 relocation encodings (§4.6) and the ELF-only peephole rewrites.
//!
//! `calc_pc_rel_displacement_x86` is the one arithmetic step every PC-
//! relative kind shares: `target - (source + 4)`, since the CPU's RIP has
//! already advanced past the 4-byte displacement field by the time it's
//! added.

use crate::atom::Atom;
use crate::error::{Error, Result};
use crate::reloc::{RelocKind, Relocation};

/// `target - (source_of_next_insn)`, the displacement x86-64 PC-relative
/// operands encode. `source_addr` is the address of the relocation's field,
/// not the instruction start; the field itself is always 4 bytes here.
pub fn calc_pc_rel_displacement_x86(source_addr: u64, target_addr: u64, addend: i64) -> Result<i32> {
    let disp = (target_addr as i64 + addend) - (source_addr as i64 + 4);
    i32::try_from(disp).map_err(|_| {
        Error::UnsupportedRelocation(format!(
            "pc-relative displacement 0x{:x} overflows 32 bits",
            disp
        ))
    })
}

pub fn write(atom: &mut Atom, reloc: &Relocation, source_addr: u64, target_addr: u64) -> Result<()> {
    let off = reloc.offset as usize;
    match reloc.kind {
        RelocKind::Abs64 => {
            let value = (target_addr as i64 + reloc.addend) as u64;
            atom.payload_bytes[off..off + 8].copy_from_slice(&value.to_le_bytes());
        }
        RelocKind::Abs32 => {
            let value = (target_addr as i64 + reloc.addend) as u32;
            atom.payload_bytes[off..off + 4].copy_from_slice(&value.to_le_bytes());
        }
        RelocKind::Pc32 | RelocKind::GotPcrel | RelocKind::GotPcrelLoad | RelocKind::Plt32 | RelocKind::GotTpOff => {
            let disp = calc_pc_rel_displacement_x86(source_addr, target_addr, reloc.addend)?;
            atom.payload_bytes[off..off + 4].copy_from_slice(&disp.to_le_bytes());
        }
        RelocKind::Pc64 => {
            let value = (target_addr as i64 + reloc.addend) - source_addr as i64;
            atom.payload_bytes[off..off + 8].copy_from_slice(&value.to_le_bytes());
        }
        RelocKind::TpOff32 => {
            let value = (target_addr as i64 + reloc.addend) as u32;
            atom.payload_bytes[off..off + 4].copy_from_slice(&value.to_le_bytes());
        }
        RelocKind::DtpOff64 => {
            let value = (target_addr as i64 + reloc.addend) as u64;
            atom.payload_bytes[off..off + 8].copy_from_slice(&value.to_le_bytes());
        }
        RelocKind::Page21 | RelocKind::PageOff12 | RelocKind::GotLdPage21 | RelocKind::GotLdPageOff12 | RelocKind::Branch26 => {
            return Err(Error::UnsupportedRelocation(
                "aarch64-only relocation kind seen by the x86-64 writer".into(),
            ));
        }
    }
    Ok(())
}

/// What kind of peephole substitution, if any, a `GOTPCRELX`-family
/// relocation on a locally-defined target can be rewritten to (§4.6). The
/// caller is expected to have already matched the instruction's opcode
/// bytes immediately preceding `reloc.offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Peephole {
    /// `mov r64, [rip+got]` -> `lea r64, [rip+target]`, reloc becomes `Pc32`.
    MovToLea,
    /// `cmp r64, [rip+got]` -> `cmp r/m64, imm32`, reloc becomes `Abs32`.
    CmpToImm,
    /// `mov r64, [rip+got]` (TLS IE) -> `mov r64, imm32`, reloc becomes a
    /// direct `TpOff32`.
    GotTpOffToTpOff,
}

/// Inspects the 3 bytes preceding a GOTPCRELX-family relocation's field and
/// decides which peephole (if any) applies, per the rewrite table in §4.6.
/// Returns `None` when the instruction doesn't match a known shape, in which
/// case the GOT indirection must be kept.
pub fn classify_peephole(kind: RelocKind, prefix: &[u8]) -> Option<Peephole> {
    // prefix is the (REX, opcode, modrm) bytes immediately before the
    // 4-byte rip-relative displacement field.
    if prefix.len() < 3 {
        return None;
    }
    let opcode = prefix[prefix.len() - 2];
    match kind {
        RelocKind::GotPcrelLoad => match opcode {
            0x8b => Some(Peephole::MovToLea), // mov r64, [rip+got]
            0x3b => Some(Peephole::CmpToImm), // cmp r64, [rip+got]
            _ => None,
        },
        RelocKind::GotTpOff => match opcode {
            0x8b => Some(Peephole::GotTpOffToTpOff),
            _ => None,
        },
        _ => None,
    }
}

/// Applies a peephole rewrite in place: patches the opcode byte(s) and
/// returns the relocation kind + zeroed addend the rewritten instruction
/// should carry (§4.6 "After rewrite the reloc addend is zeroed").
pub fn apply_peephole(bytes: &mut [u8], reloc_offset: usize, peephole: Peephole) -> RelocKind {
    match peephole {
        Peephole::MovToLea => {
            // mov (0x8b) -> lea (0x8d); ModRM/REX/displacement are untouched.
            bytes[reloc_offset - 1] = 0x8d;
            RelocKind::Pc32
        }
        Peephole::CmpToImm => {
            // cmp r64, r/m64 (0x3b) -> cmp r/m64, imm32 (0x81 /7); same
            // operand-size REX prefix, ModRM reg field becomes the /7
            // opcode extension.
            bytes[reloc_offset - 1] = 0x81;
            let modrm = bytes[reloc_offset];
            bytes[reloc_offset] = (modrm & 0xc7) | (7 << 3);
            RelocKind::Abs32
        }
        Peephole::GotTpOffToTpOff => {
            // mov r64, [rip+got] (0x8b) -> mov r64, imm32 (0xc7 /0).
            bytes[reloc_offset - 1] = 0xc7;
            let modrm = bytes[reloc_offset];
            bytes[reloc_offset] = (modrm & 0xc7) | (0 << 3);
            RelocKind::TpOff32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pc_rel_displacement_is_relative_to_next_instruction() {
        let disp = calc_pc_rel_displacement_x86(0x1000, 0x2000, 0).unwrap();
        assert_eq!(disp, 0x2000 - 0x1004);
    }

    #[test]
    fn overflowing_displacement_is_rejected() {
        let err = calc_pc_rel_displacement_x86(0, 0x1_0000_0000, 0);
        assert!(err.is_err());
    }

    #[test]
    fn classifies_mov_gotpcrelx_as_lea() {
        // REX.W(48) 8b modrm
        let prefix = [0x48, 0x8b, 0x05];
        assert_eq!(classify_peephole(RelocKind::GotPcrelLoad, &prefix), Some(Peephole::MovToLea));
    }

    #[test]
    fn fixed_point_on_already_rewritten_pc32() {
        // After a MovToLea rewrite the kind is Pc32, which classify_peephole
        // never maps to a peephole: rewriting is a fixed point.
        let prefix = [0x48, 0x8d, 0x05];
        assert_eq!(classify_peephole(RelocKind::Pc32, &prefix), None);
    }
}
