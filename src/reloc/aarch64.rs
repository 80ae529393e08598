//! aarch64 relocation encodings (§4.6): `ADRP`/`ADD`/`LDR` page+offset
//! pairs, and the 26-bit branch displacement used by `B`/`BL`.
//!
//! Page-offset relocations are written assuming an unscaled immediate field
//! (as `ADD` uses); `LDR`'s scaled-by-access-size encoding is not special-
//! cased, matching the simplification recorded in `DESIGN.md`.

use crate::atom::Atom;
use crate::error::{Error, Result};
use crate::reloc::{RelocKind, Relocation};

const BRANCH26_RANGE: i64 = 128 * 1024 * 1024;

fn page_of(addr: u64) -> u64 {
    addr & !0xfff
}

/// `ADRP`'s 21-bit signed page-count immediate, split as `immlo` (bits
/// 30:29) + `immhi` (bits 23:5) per the AArch64 instruction encoding.
fn encode_adrp(insn: u32, page_delta_in_pages: i32) -> Result<u32> {
    if !(-(1 << 20)..(1 << 20)).contains(&page_delta_in_pages) {
        return Err(Error::UnsupportedRelocation(format!(
            "ADRP page delta {} out of range",
            page_delta_in_pages
        )));
    }
    let imm = page_delta_in_pages as u32 & 0x1f_ffff;
    let immlo = imm & 0x3;
    let immhi = (imm >> 2) & 0x7ffff;
    let insn = insn & !((0x3 << 29) | (0x7ffff << 5));
    Ok(insn | (immlo << 29) | (immhi << 5))
}

fn encode_pageoff12(insn: u32, offset_in_page: u32) -> Result<u32> {
    if offset_in_page > 0xfff {
        return Err(Error::UnsupportedRelocation("page offset does not fit in 12 bits".into()));
    }
    let insn = insn & !(0xfff << 10);
    Ok(insn | (offset_in_page << 10))
}

fn encode_branch26(insn: u32, disp_bytes: i64) -> Result<u32> {
    if disp_bytes % 4 != 0 {
        return Err(Error::UnsupportedRelocation("branch displacement is not 4-byte aligned".into()));
    }
    if !(-BRANCH26_RANGE..BRANCH26_RANGE).contains(&disp_bytes) {
        return Err(Error::UnsupportedRelocation(format!(
            "branch displacement {} exceeds +/-128MiB even after thunk insertion",
            disp_bytes
        )));
    }
    let imm26 = ((disp_bytes / 4) as u32) & 0x3ff_ffff;
    Ok((insn & !0x3ff_ffff) | imm26)
}

pub fn write(atom: &mut Atom, reloc: &Relocation, source_addr: u64, target_addr: u64) -> Result<()> {
    let off = reloc.offset as usize;
    let insn = u32::from_le_bytes(atom.payload_bytes[off..off + 4].try_into().unwrap());
    let value = (target_addr as i64 + reloc.addend) as u64;

    let new_insn = match reloc.kind {
        RelocKind::Page21 | RelocKind::GotLdPage21 => {
            let page_delta = (page_of(value) as i64 - page_of(source_addr) as i64) / 4096;
            encode_adrp(insn, page_delta as i32)?
        }
        RelocKind::PageOff12 | RelocKind::GotLdPageOff12 => encode_pageoff12(insn, (value & 0xfff) as u32)?,
        RelocKind::Branch26 => {
            let disp = value as i64 - source_addr as i64;
            encode_branch26(insn, disp)?
        }
        RelocKind::Abs64 => {
            atom.payload_bytes[off..off + 8].copy_from_slice(&value.to_le_bytes());
            return Ok(());
        }
        RelocKind::Abs32 | RelocKind::Pc32 | RelocKind::Pc64 | RelocKind::GotPcrel | RelocKind::GotPcrelLoad
        | RelocKind::Plt32 | RelocKind::GotTpOff | RelocKind::TpOff32 | RelocKind::DtpOff64 => {
            return Err(Error::UnsupportedRelocation(
                "x86-64-only relocation kind seen by the aarch64 writer".into(),
            ));
        }
    };
    atom.payload_bytes[off..off + 4].copy_from_slice(&new_insn.to_le_bytes());
    Ok(())
}

/// A 3-instruction jump thunk: `ADRP x16, page(target)`; `ADD x16, x16,
/// #offset(target)`; `BR x16` (§4.4 "Jump thunk (aarch64 only)").
pub fn thunk_body() -> [u8; 12] {
    // adrp x16, #0
    let adrp: u32 = 0x9000_0010;
    // add x16, x16, #0
    let add: u32 = 0x9100_0210;
    // br x16
    let br: u32 = 0xd61f_0200;
    let mut bytes = [0u8; 12];
    bytes[0..4].copy_from_slice(&adrp.to_le_bytes());
    bytes[4..8].copy_from_slice(&add.to_le_bytes());
    bytes[8..12].copy_from_slice(&br.to_le_bytes());
    bytes
}

/// Patches a thunk's `ADRP`/`ADD` pair to target `target_addr` from a thunk
/// placed at `thunk_addr`.
pub fn patch_thunk(bytes: &mut [u8; 12], thunk_addr: u64, target_addr: u64) -> Result<()> {
    let adrp = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
    let page_delta = (page_of(target_addr) as i64 - page_of(thunk_addr) as i64) / 4096;
    let adrp = encode_adrp(adrp, page_delta as i32)?;
    bytes[0..4].copy_from_slice(&adrp.to_le_bytes());

    let add = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
    let add = encode_pageoff12(add, (target_addr & 0xfff) as u32)?;
    bytes[4..8].copy_from_slice(&add.to_le_bytes());
    Ok(())
}

/// Whether a `Branch26` relocation from `source_addr` to `target_addr`
/// needs a thunk inserted (§4.5 step 5).
pub fn needs_thunk(source_addr: u64, target_addr: u64) -> bool {
    let disp = target_addr as i64 - source_addr as i64;
    !(-BRANCH26_RANGE..BRANCH26_RANGE).contains(&disp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch26_in_range_encodes() {
        let insn = encode_branch26(0x9400_0000, 16).unwrap();
        assert_eq!(insn & 0x3ff_ffff, 4);
    }

    #[test]
    fn branch26_out_of_range_errors() {
        assert!(encode_branch26(0x9400_0000, BRANCH26_RANGE + 4).is_err());
    }

    #[test]
    fn needs_thunk_detects_out_of_range_call() {
        assert!(needs_thunk(0, 300 * 1024 * 1024));
        assert!(!needs_thunk(0, 4));
    }

    #[test]
    fn thunk_roundtrips_page_and_offset() {
        let mut body = thunk_body();
        patch_thunk(&mut body, 0x1000, 0x1_0000_1234).unwrap();
        let adrp = u32::from_le_bytes(body[0..4].try_into().unwrap());
        let add = u32::from_le_bytes(body[4..8].try_into().unwrap());
        assert_ne!(adrp, 0x9000_0010);
        assert_eq!((add >> 10) & 0xfff, 0x234);
    }
}
