//! Mach-O `relocation_info` entries (the non-scattered form; this crate
//! never emits or reads scattered relocations, which only ever appear in
//! 32-bit Mach-O object files — out of scope per §1).

use scroll::Pread;

use crate::error::Result;

pub const GENERIC_RELOC_VANILLA: u8 = 0;
pub const GENERIC_RELOC_TLV: u8 = 9;

pub const X86_64_RELOC_UNSIGNED: u8 = 0;
pub const X86_64_RELOC_SIGNED: u8 = 1;
pub const X86_64_RELOC_BRANCH: u8 = 2;
pub const X86_64_RELOC_GOT_LOAD: u8 = 3;
pub const X86_64_RELOC_GOT: u8 = 4;
pub const X86_64_RELOC_SUBTRACTOR: u8 = 5;
pub const X86_64_RELOC_SIGNED_1: u8 = 6;
pub const X86_64_RELOC_SIGNED_2: u8 = 7;
pub const X86_64_RELOC_SIGNED_4: u8 = 8;
pub const X86_64_RELOC_TLV: u8 = 9;

pub const ARM64_RELOC_UNSIGNED: u8 = 0;
pub const ARM64_RELOC_BRANCH26: u8 = 2;
pub const ARM64_RELOC_PAGE21: u8 = 3;
pub const ARM64_RELOC_PAGEOFF12: u8 = 4;
pub const ARM64_RELOC_GOT_LOAD_PAGE21: u8 = 5;
pub const ARM64_RELOC_GOT_LOAD_PAGEOFF12: u8 = 6;
pub const ARM64_RELOC_TLVP_LOAD_PAGE21: u8 = 9;
pub const ARM64_RELOC_TLVP_LOAD_PAGEOFF12: u8 = 10;

/// One decoded `relocation_info`/`scattered_relocation_info` entry. This
/// crate only supports the non-scattered form: `r_address` is a plain
/// section-relative byte offset and `r_symbolnum` indexes the nlist table
/// when `r_extern` is set (otherwise it names a 1-based section index,
/// which this linker doesn't support as a relocation target — see
/// `input::macho_object`).
#[derive(Debug, Clone, Copy)]
pub struct RelocationInfo {
    pub r_address: i32,
    pub r_symbolnum: u32,
    pub r_pcrel: bool,
    pub r_length: u8,
    pub r_extern: bool,
    pub r_type: u8,
}

pub const SIZEOF_RELOCATION_INFO: usize = 8;

impl RelocationInfo {
    pub fn parse(bytes: &[u8], offset: usize, le: scroll::Endian) -> Result<RelocationInfo> {
        let r_address: i32 = bytes.pread_with(offset, le)?;
        let packed: u32 = bytes.pread_with(offset + 4, le)?;
        Ok(RelocationInfo {
            r_address,
            r_symbolnum: packed & 0x00ff_ffff,
            r_pcrel: (packed >> 24) & 0x1 != 0,
            r_length: ((packed >> 25) & 0x3) as u8,
            r_extern: (packed >> 27) & 0x1 != 0,
            r_type: ((packed >> 28) & 0xf) as u8,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_packed_bitfield() {
        let mut bytes = vec![0u8; 8];
        bytes[0..4].copy_from_slice(&0x10i32.to_le_bytes());
        // symbolnum=5, pcrel=1, length=2(->4 bytes), extern=1, type=1
        let packed: u32 = 5 | (1 << 24) | (2 << 25) | (1 << 27) | (1 << 28);
        bytes[4..8].copy_from_slice(&packed.to_le_bytes());
        let info = RelocationInfo::parse(&bytes, 0, scroll::LE).unwrap();
        assert_eq!(info.r_address, 0x10);
        assert_eq!(info.r_symbolnum, 5);
        assert!(info.r_pcrel);
        assert_eq!(info.r_length, 2);
        assert!(info.r_extern);
        assert_eq!(info.r_type, 1);
    }
}
