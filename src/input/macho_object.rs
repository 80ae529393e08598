//! Parses a Mach-O `MH_OBJECT` relocatable object into a `RawObject` (§4.1),
//! the Mach-O counterpart to `elf_object`.
//!
//! Only external relocations (`r_extern`) are read; a non-extern
//! `relocation_info` names a 1-based section ordinal rather than a symbol,
//! and resolving those would mean tracking section-relative addends baked
//! into the instruction stream the way ELF's `SHT_REL` does — out of scope
//! for the same reason `elf_object` rejects `SHT_REL` outright. Object files
//! built with `-fno-common` and without `-mdynamic-no-pic` overwhelmingly
//! emit extern relocations for anything a linker needs to see, so this
//! covers the common case; anything else is skipped with a warning.

use scroll::Pread;

use crate::atom::SectionKind;
use crate::container::Ctx;
use crate::error::{Error, Result};
use crate::mach::constants::{self, cputype};
use crate::mach::header::{self, Header};
use crate::mach::load_command::{self, CommandVariant, LoadCommand, Section64, SegmentCommand64, SIZEOF_SEGMENT_COMMAND_64};
use crate::mach::relocation::{self, RelocationInfo};
use crate::mach::symbols::Symbols;
use crate::options::CpuArch;
use crate::reloc::RelocKind;
use crate::symbol::{Binding, Symbol, SymbolFlags, SymbolType, Visibility};

use super::object::{RawObject, RawReloc, RawSection};

const N_STAB: u8 = 0xe0;
const N_PEXT: u8 = 0x10;
const N_TYPE: u8 = 0x0e;
const N_EXT: u8 = 0x01;
const N_UNDF: u8 = 0x0;
const N_ABS: u8 = 0x2;
const N_SECT: u8 = 0xe;
const N_DESC_WEAK_DEF: u16 = 0x0080;

/// `MH_SUBSECTIONS_VIA_SYMBOLS`: every section in this object can be split
/// at external symbol boundaries (§4.3 "atom decomposition").
const MH_SUBSECTIONS_VIA_SYMBOLS: u32 = 0x2000;

fn read_header(bytes: &[u8]) -> Result<(Header, scroll::Endian)> {
    for endian in [scroll::LE, scroll::BE] {
        if let Ok(header) = bytes.pread_with::<Header>(0, endian) {
            if header.magic == header::MH_MAGIC_64 {
                return Ok((header, endian));
            }
        }
    }
    Err(Error::NotObject)
}

fn cpu_arch_of(cputype: u32) -> Result<CpuArch> {
    match cputype {
        cputype::CPU_TYPE_X86_64 => Ok(CpuArch::X86_64),
        cputype::CPU_TYPE_ARM64 => Ok(CpuArch::Aarch64),
        other => Err(Error::UnsupportedCpuArchitecture(format!("Mach-O cputype {:#x}", other))),
    }
}

fn cstr16(raw: &[u8; 16]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(16);
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

fn classify_section(segname: &str, flags: u32) -> SectionKind {
    let sec_type = flags & constants::SECTION_TYPE;
    if sec_type == constants::S_ZEROFILL || sec_type == constants::S_THREAD_LOCAL_ZEROFILL {
        SectionKind::Zerofill
    } else if flags & constants::S_ATTR_PURE_INSTRUCTIONS != 0 || flags & constants::S_ATTR_SOME_INSTRUCTIONS != 0 {
        SectionKind::Code
    } else if segname == "__TEXT" || segname == "__DATA_CONST" {
        SectionKind::Rodata
    } else {
        SectionKind::Data
    }
}

fn reloc_kind(arch: CpuArch, r_type: u8) -> Result<(RelocKind, bool, u8)> {
    use RelocKind::*;
    let triple = match arch {
        CpuArch::X86_64 => match r_type {
            relocation::X86_64_RELOC_UNSIGNED => (Abs64, false, 8),
            relocation::X86_64_RELOC_SIGNED
            | relocation::X86_64_RELOC_SIGNED_1
            | relocation::X86_64_RELOC_SIGNED_2
            | relocation::X86_64_RELOC_SIGNED_4 => (Pc32, true, 4),
            relocation::X86_64_RELOC_BRANCH => (Plt32, true, 4),
            relocation::X86_64_RELOC_GOT_LOAD => (GotPcrelLoad, true, 4),
            relocation::X86_64_RELOC_GOT => (GotPcrel, true, 4),
            relocation::X86_64_RELOC_TLV => (GotTpOff, true, 4),
            other => return Err(Error::UnsupportedRelocation(format!("X86_64_RELOC type {}", other))),
        },
        CpuArch::Aarch64 => match r_type {
            relocation::ARM64_RELOC_UNSIGNED => (Abs64, false, 8),
            relocation::ARM64_RELOC_BRANCH26 => (Branch26, true, 4),
            relocation::ARM64_RELOC_PAGE21 => (Page21, false, 4),
            relocation::ARM64_RELOC_PAGEOFF12 => (PageOff12, false, 4),
            relocation::ARM64_RELOC_GOT_LOAD_PAGE21 => (GotLdPage21, false, 4),
            relocation::ARM64_RELOC_GOT_LOAD_PAGEOFF12 => (GotLdPageOff12, false, 4),
            relocation::ARM64_RELOC_TLVP_LOAD_PAGE21 => (GotLdPage21, false, 4),
            relocation::ARM64_RELOC_TLVP_LOAD_PAGEOFF12 => (GotLdPageOff12, false, 4),
            other => return Err(Error::UnsupportedRelocation(format!("ARM64_RELOC type {}", other))),
        },
        CpuArch::Wasm32 => return Err(Error::UnsupportedRelocation("wasm has no Mach-O relocation types".into())),
    };
    Ok(triple)
}

/// One flattened `section_64` record plus the segment it came from, indexed
/// in load-command order to match `nlist.n_sect`'s global 1-based ordinal.
struct FlatSection {
    segname: String,
    sect: Section64,
}

fn read_sections(bytes: &[u8], seg_offset: usize, seg: &SegmentCommand64, le: scroll::Endian) -> Result<Vec<FlatSection>> {
    let segname = cstr16(&seg.segname);
    let mut out = Vec::with_capacity(seg.nsects as usize);
    for i in 0..seg.nsects as usize {
        let off = seg_offset + SIZEOF_SEGMENT_COMMAND_64 + i * load_command::SIZEOF_SECTION_64;
        let sect: Section64 = bytes.pread_with(off, le)?;
        out.push(FlatSection { segname: segname.clone(), sect });
    }
    Ok(out)
}

fn symbol_from_nlist(name: String, n_type: u8, n_sect: usize, n_desc: u16, n_value: u64, section_kind: Option<SectionKind>) -> Symbol {
    if n_type & N_STAB != 0 {
        // Debugging symbol; kept as an inert placeholder so symbol-table
        // indices stay aligned with `n_sect`/relocation `r_symbolnum`.
        return Symbol {
            name,
            value: 0,
            size: 0,
            section_index: None,
            binding: Binding::Local,
            sym_type: SymbolType::NoType,
            visibility: Visibility::Default,
            flags: SymbolFlags::Defined,
            common_align: 0,
        };
    }

    let ext = n_type & N_EXT != 0;
    let binding = if !ext {
        Binding::Local
    } else if n_desc & N_DESC_WEAK_DEF != 0 {
        Binding::Weak
    } else {
        Binding::Global
    };
    let visibility = if n_type & N_PEXT != 0 { Visibility::PrivateExtern } else { Visibility::Default };

    let (flags, section_index, value, size, common_align) = match n_type & N_TYPE {
        N_UNDF if n_value == 0 => (SymbolFlags::Undefined, None, 0, 0, 0),
        N_UNDF => (SymbolFlags::Tentative, None, 0, n_value, ((n_desc >> 8) & 0x0f) as u32),
        N_ABS => (SymbolFlags::Absolute, None, n_value, 0, 0),
        N_SECT => (SymbolFlags::Defined, n_sect.checked_sub(1).map(|i| i as u32), n_value, 0, 0),
        _ => (SymbolFlags::Undefined, None, 0, 0, 0),
    };

    let sym_type = match section_kind {
        Some(SectionKind::Code) if flags == SymbolFlags::Defined => SymbolType::Func,
        Some(SectionKind::Data) | Some(SectionKind::Rodata) if flags == SymbolFlags::Defined => SymbolType::Object,
        _ if flags == SymbolFlags::Tentative => SymbolType::Object,
        _ => SymbolType::NoType,
    };

    Symbol { name, value, size, section_index, binding, sym_type, visibility, flags, common_align }
}

/// Parses `bytes` as a little-endian 64-bit Mach-O `MH_OBJECT`. Fails with
/// `NotObject` for anything else, so S1's format probing moves on.
pub fn parse(bytes: &[u8]) -> Result<RawObject> {
    let (mh, le) = read_header(bytes)?;
    if mh.filetype != header::MH_OBJECT {
        return Err(Error::NotObject);
    }
    let arch = cpu_arch_of(mh.cputype)?;
    let subsections_via_symbols = mh.flags & MH_SUBSECTIONS_VIA_SYMBOLS != 0;

    let mut offset = header::SIZEOF_MACH_HEADER_64;
    let mut flat_sections: Vec<FlatSection> = Vec::new();
    let mut symtab_cmd = None;

    for _ in 0..mh.ncmds {
        let lc = LoadCommand::parse(&bytes, &mut offset, le)?;
        match lc.command {
            CommandVariant::Segment64(seg) => {
                flat_sections.extend(read_sections(bytes, lc.offset, &seg, le)?);
            }
            CommandVariant::Symtab(cmd) => symtab_cmd = Some(cmd),
            _ => {}
        }
    }

    let symbols = if let Some(cmd) = symtab_cmd {
        let ctx = Ctx::new(crate::container::Width::Bits64, le);
        let table = Symbols::parse(bytes, &cmd, ctx)?;
        let mut symbols = Vec::with_capacity(table.nsyms);
        for (name, nlist) in table.iter() {
            let section_kind = nlist
                .n_sect
                .checked_sub(1)
                .and_then(|i| flat_sections.get(i))
                .map(|s| classify_section(&s.segname, s.sect.flags));
            symbols.push(symbol_from_nlist(name.to_string(), nlist.n_type, nlist.n_sect, nlist.n_desc, nlist.n_value, section_kind));
        }
        symbols
    } else {
        Vec::new()
    };

    let mut sections = Vec::with_capacity(flat_sections.len());
    for flat in &flat_sections {
        let sect = &flat.sect;
        let sectname = cstr16(&sect.sectname);
        let kind = classify_section(&flat.segname, sect.flags);
        let is_zerofill = matches!(kind, SectionKind::Zerofill);
        let data = if is_zerofill {
            Vec::new()
        } else {
            bytes
                .get(sect.offset as usize..sect.offset as usize + sect.size as usize)
                .ok_or_else(|| Error::Malformed(format!("section '{}' data out of bounds", sectname)))?
                .to_vec()
        };

        let mut relocations = Vec::with_capacity(sect.nreloc as usize);
        for i in 0..sect.nreloc as usize {
            let off = sect.reloff as usize + i * relocation::SIZEOF_RELOCATION_INFO;
            let info = RelocationInfo::parse(bytes, off, le)?;
            if !info.r_extern {
                log::warn!("skipping non-extern relocation in section '{}' at offset {:#x}", sectname, info.r_address);
                continue;
            }
            let (kind, pcrel, length) = reloc_kind(arch, info.r_type)?;
            relocations.push(RawReloc {
                offset: info.r_address as u32,
                sym_index: info.r_symbolnum,
                kind,
                addend: 0,
                pcrel,
                length,
            });
        }

        sections.push(RawSection {
            name: sectname,
            segment: Some(flat.segname.clone()),
            kind,
            subsections_via_symbols,
            data,
            size: sect.size,
            align_log2: sect.align as u8,
            relocations,
        });
    }

    Ok(RawObject { format: crate::options::Format::MachO, cpu_arch: arch, sections, symbols, wasm_extra: None })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_macho_bytes() {
        assert!(matches!(parse(b"not a mach-o object, padding for length").unwrap_err(), Error::NotObject));
    }

    #[test]
    fn rejects_truncated_header() {
        assert!(matches!(parse(&[0xcf, 0xfa, 0xed, 0xfe]).unwrap_err(), Error::NotObject));
    }
}
