//! Parses an ELF64 relocatable object (`ET_REL`) into a `RawObject` (§4.1).
//!
//! Only `ET_REL` is accepted: executables, shared objects, and core files
//! aren't inputs to this linker. `SHT_REL` sections (implicit-addend
//! relocations) are rejected as malformed rather than read — see
//! `elf::reloc`'s module doc for why.

use scroll::Pread;

use crate::atom::SectionKind;
use crate::elf::header::{self, Header};
use crate::elf::reloc::{aarch64 as elf_aarch64, x86_64 as elf_x86_64, Rela, SIZEOF_RELA};
use crate::elf::section_header::{self, SectionHeader, SIZEOF_SHDR};
use crate::elf::sym::{self, Sym, SIZEOF_SYM};
use crate::error::{Error, Result};
use crate::options::CpuArch;
use crate::reloc::RelocKind;
use crate::strtab::Strtab;
use crate::symbol::{Binding, Symbol, SymbolFlags, SymbolType, Visibility};

use super::object::{RawObject, RawReloc, RawSection};

fn cpu_arch(e_machine: u16) -> Result<CpuArch> {
    match e_machine {
        header::EM_X86_64 => Ok(CpuArch::X86_64),
        header::EM_AARCH64 => Ok(CpuArch::Aarch64),
        other => Err(Error::UnsupportedCpuArchitecture(format!("ELF e_machine {}", other))),
    }
}

fn reloc_kind(arch: CpuArch, r_type: u32) -> Result<(RelocKind, bool, u8)> {
    use RelocKind::*;
    let triple = match arch {
        CpuArch::X86_64 => match r_type {
            elf_x86_64::R_X86_64_64 => (Abs64, false, 8),
            elf_x86_64::R_X86_64_32 | elf_x86_64::R_X86_64_32S => (Abs32, false, 4),
            elf_x86_64::R_X86_64_PC32 => (Pc32, true, 4),
            elf_x86_64::R_X86_64_PC64 => (Pc64, true, 8),
            elf_x86_64::R_X86_64_PLT32 => (Plt32, true, 4),
            elf_x86_64::R_X86_64_GOTPCREL => (GotPcrel, true, 4),
            elf_x86_64::R_X86_64_GOTPCRELX | elf_x86_64::R_X86_64_REX_GOTPCRELX => (GotPcrelLoad, true, 4),
            elf_x86_64::R_X86_64_GOTTPOFF => (GotTpOff, true, 4),
            elf_x86_64::R_X86_64_TPOFF32 => (TpOff32, false, 4),
            elf_x86_64::R_X86_64_DTPOFF64 => (DtpOff64, false, 8),
            other => return Err(Error::UnsupportedRelocation(format!("R_X86_64 type {}", other))),
        },
        CpuArch::Aarch64 => match r_type {
            elf_aarch64::R_AARCH64_ABS64 => (Abs64, false, 8),
            elf_aarch64::R_AARCH64_ABS32 => (Abs32, false, 4),
            elf_aarch64::R_AARCH64_PREL32 => (Pc32, true, 4),
            elf_aarch64::R_AARCH64_ADR_PREL_PG_HI21 => (Page21, false, 4),
            elf_aarch64::R_AARCH64_ADD_ABS_LO12_NC | elf_aarch64::R_AARCH64_LDST64_ABS_LO12_NC => (PageOff12, false, 4),
            elf_aarch64::R_AARCH64_JUMP26 | elf_aarch64::R_AARCH64_CALL26 => (Branch26, true, 4),
            elf_aarch64::R_AARCH64_ADR_GOT_PAGE => (GotLdPage21, false, 4),
            elf_aarch64::R_AARCH64_LD64_GOT_LO12_NC => (GotLdPageOff12, false, 4),
            elf_aarch64::R_AARCH64_TLSIE_ADR_GOTTPREL_PAGE21 => (GotLdPage21, false, 4),
            elf_aarch64::R_AARCH64_TLSIE_LD64_GOTTPREL_LO12_NC => (GotLdPageOff12, false, 4),
            other => return Err(Error::UnsupportedRelocation(format!("R_AARCH64 type {}", other))),
        },
        CpuArch::Wasm32 => return Err(Error::UnsupportedRelocation("wasm has no ELF relocation types".into())),
    };
    Ok(triple)
}

fn classify_section(shdr: &SectionHeader) -> SectionKind {
    if shdr.sh_type == section_header::SHT_NOBITS {
        SectionKind::Zerofill
    } else if shdr.sh_flags & section_header::SHF_EXECINSTR != 0 {
        SectionKind::Code
    } else if !shdr.is_alloc() {
        SectionKind::Other
    } else if shdr.is_writable() {
        SectionKind::Data
    } else {
        SectionKind::Rodata
    }
}

fn align_log2(sh_addralign: u64) -> u8 {
    if sh_addralign <= 1 {
        0
    } else {
        sh_addralign.trailing_zeros() as u8
    }
}

fn symbol_from_sym(name: String, sym: &Sym) -> Symbol {
    let bind = sym::st_bind(sym.st_info);
    let sym_type = sym::st_type(sym.st_info);
    let binding = match bind {
        sym::STB_LOCAL => Binding::Local,
        sym::STB_WEAK => Binding::Weak,
        _ => Binding::Global,
    };
    let visibility = match sym::st_visibility(sym.st_other) {
        sym::STV_HIDDEN => Visibility::Hidden,
        _ => Visibility::Default,
    };
    let sym_type = match sym_type {
        sym::STT_FUNC => SymbolType::Func,
        sym::STT_SECTION => SymbolType::Section,
        sym::STT_FILE => SymbolType::File,
        sym::STT_TLS => SymbolType::Tls,
        sym::STT_OBJECT | sym::STT_COMMON => SymbolType::Object,
        _ => SymbolType::NoType,
    };

    let (flags, section_index, common_align) = if sym.st_shndx == sym::SHN_UNDEF {
        (SymbolFlags::Undefined, None, 0)
    } else if sym.st_shndx == sym::SHN_COMMON {
        (SymbolFlags::Tentative, None, align_log2(sym.st_value))
    } else if sym.st_shndx == sym::SHN_ABS {
        (SymbolFlags::Absolute, None, 0)
    } else {
        (SymbolFlags::Defined, Some(sym.st_shndx as u32), 0)
    };

    Symbol {
        name,
        value: if flags == SymbolFlags::Tentative { 0 } else { sym.st_value },
        size: sym.st_size,
        section_index,
        binding,
        sym_type,
        visibility,
        flags,
        common_align,
    }
}

/// Parses `bytes` as an ELF64 `ET_REL` object. Fails with `NotObject` for
/// anything that isn't a little-endian ELF64 file, so S1's format probing
/// can move on to the next candidate parser.
pub fn parse(bytes: &[u8]) -> Result<RawObject> {
    if !Header::is_magic(bytes) {
        return Err(Error::NotObject);
    }
    if bytes.len() < header::SIZEOF_EHDR || bytes[header::EI_CLASS] != header::ELFCLASS64 {
        return Err(Error::NotObject);
    }
    let le = match bytes[header::EI_DATA] {
        header::ELFDATA2LSB => scroll::LE,
        header::ELFDATA2MSB => scroll::BE,
        _ => return Err(Error::NotObject),
    };
    let ehdr: Header = bytes.pread_with(0, le)?;
    if ehdr.e_type != header::ET_REL {
        return Err(Error::NotObject);
    }
    let arch = cpu_arch(ehdr.e_machine)?;

    let shnum = ehdr.e_shnum as usize;
    let mut shdrs = Vec::with_capacity(shnum);
    for i in 0..shnum {
        let off = ehdr.e_shoff as usize + i * SIZEOF_SHDR;
        shdrs.push(bytes.pread_with::<SectionHeader>(off, le)?);
    }

    let shstrtab = if (ehdr.e_shstrndx as usize) < shdrs.len() {
        let s = &shdrs[ehdr.e_shstrndx as usize];
        Strtab::parse(bytes, s.sh_offset as usize, s.sh_size as usize, 0)?
    } else {
        Strtab::default()
    };

    let symtab_idx = shdrs.iter().position(|s| s.sh_type == section_header::SHT_SYMTAB);
    let symbols = if let Some(idx) = symtab_idx {
        let symtab_shdr = &shdrs[idx];
        let strtab_shdr = &shdrs[symtab_shdr.sh_link as usize];
        let strtab = Strtab::parse(bytes, strtab_shdr.sh_offset as usize, strtab_shdr.sh_size as usize, 0)?;
        let count = symtab_shdr.sh_size as usize / SIZEOF_SYM;
        let mut symbols = Vec::with_capacity(count);
        for i in 0..count {
            let off = symtab_shdr.sh_offset as usize + i * SIZEOF_SYM;
            let sym: Sym = bytes.pread_with(off, le)?;
            let name = strtab.get(sym.st_name as usize).to_string();
            symbols.push(symbol_from_sym(name, &sym));
        }
        symbols
    } else {
        Vec::new()
    };

    // Map each content section index to its `RawSection`, then fold in
    // every `SHT_RELA` section's entries by its `sh_info` target index.
    let mut section_for: Vec<Option<usize>> = vec![None; shdrs.len()];
    let mut sections = Vec::new();
    for (i, shdr) in shdrs.iter().enumerate() {
        if matches!(
            shdr.sh_type,
            section_header::SHT_NULL
                | section_header::SHT_SYMTAB
                | section_header::SHT_STRTAB
                | section_header::SHT_RELA
                | section_header::SHT_REL
                | section_header::SHT_DYNSYM
        ) {
            continue;
        }
        let name = shstrtab.get(shdr.sh_name as usize).to_string();
        let data = if shdr.sh_type == section_header::SHT_NOBITS {
            Vec::new()
        } else {
            bytes
                .get(shdr.sh_offset as usize..(shdr.sh_offset + shdr.sh_size) as usize)
                .ok_or_else(|| Error::Malformed(format!("section '{}' data out of bounds", name)))?
                .to_vec()
        };
        section_for[i] = Some(sections.len());
        sections.push(RawSection {
            name,
            segment: None,
            kind: classify_section(shdr),
            subsections_via_symbols: false,
            data,
            size: shdr.sh_size,
            align_log2: align_log2(shdr.sh_addralign),
            relocations: Vec::new(),
        });
    }

    for shdr in shdrs.iter().filter(|s| s.sh_type == section_header::SHT_REL) {
        let _ = shdr;
        return Err(Error::Malformed("SHT_REL (implicit-addend relocations) is not supported".into()));
    }

    for shdr in shdrs.iter().filter(|s| s.sh_type == section_header::SHT_RELA) {
        let target = shdr.sh_info as usize;
        let Some(&Some(section_idx)) = section_for.get(target) else {
            continue;
        };
        let count = shdr.sh_size as usize / SIZEOF_RELA;
        for i in 0..count {
            let off = shdr.sh_offset as usize + i * SIZEOF_RELA;
            let rela: Rela = bytes.pread_with(off, le)?;
            let (kind, pcrel, length) = reloc_kind(arch, rela.r_type())?;
            sections[section_idx].relocations.push(RawReloc {
                offset: rela.r_offset as u32,
                sym_index: rela.r_sym(),
                kind,
                addend: rela.r_addend,
                pcrel,
                length,
            });
        }
    }

    // `symbol_from_sym` stamped `section_index` with the raw ELF section
    // header index; remap it through `section_for` so it instead indexes
    // `sections` (which dropped SHT_NULL/SYMTAB/STRTAB/REL/RELA/DYNSYM
    // entries), matching what `Object::sections` looks like by the time S3
    // associates symbols with atoms.
    let symbols = symbols
        .into_iter()
        .map(|mut sym| {
            sym.section_index = sym.section_index.and_then(|shndx| {
                section_for.get(shndx as usize).copied().flatten().map(|i| i as u32)
            });
            sym
        })
        .collect();

    Ok(RawObject { format: crate::options::Format::Elf, cpu_arch: arch, sections, symbols, wasm_extra: None })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_elf_bytes() {
        assert!(matches!(parse(b"not elf at all, padding to be safe").unwrap_err(), Error::NotObject));
    }

    #[test]
    fn rejects_truncated_elf_magic() {
        assert!(matches!(parse(b"\x7fELF").unwrap_err(), Error::NotObject));
    }
}
