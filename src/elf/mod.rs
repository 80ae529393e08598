//! ELF64 constants and on-disk structures.
//!
//! `header`, `sym`, `program_header::flags`, and `dyn` hold the bitfield
//! constants and `_to_str` debug helpers; `header`, `program_header`,
//! `section_header`, `sym`, `reloc` hold the `#[derive(Pread, Pwrite,
//! SizeWith)]` on-disk structs used by both the object parser (`object.rs`,
//! via `crate::input::elf_object`) and the finalizer (`finalize.rs`).

pub mod header;
pub mod program_header;
pub mod section_header;
pub mod sym;
pub mod reloc;
pub mod finalize;

pub mod dynamic {
    use scroll::{Pread, Pwrite};

    #[repr(C)]
    #[derive(Debug, Clone, Copy, Default, Pread, Pwrite)]
    pub struct Dyn {
        pub d_tag: i64,
        pub d_val: u64,
    }

    pub const SIZEOF_DYN: usize = 16;

    pub const DT_NULL: u64 = 0;
    pub const DT_NEEDED: u64 = 1;
    pub const DT_PLTRELSZ: u64 = 2;
    pub const DT_PLTGOT: u64 = 3;
    pub const DT_HASH: u64 = 4;
    pub const DT_STRTAB: u64 = 5;
    pub const DT_SYMTAB: u64 = 6;
    pub const DT_RELA: u64 = 7;
    pub const DT_RELASZ: u64 = 8;
    pub const DT_RELAENT: u64 = 9;
    pub const DT_STRSZ: u64 = 10;
    pub const DT_SYMENT: u64 = 11;
    pub const DT_INIT: u64 = 12;
    pub const DT_FINI: u64 = 13;
    pub const DT_SONAME: u64 = 14;
    pub const DT_RPATH: u64 = 15;
    pub const DT_SYMBOLIC: u64 = 16;
    pub const DT_REL: u64 = 17;
    pub const DT_RELSZ: u64 = 18;
    pub const DT_RELENT: u64 = 19;
    pub const DT_PLTREL: u64 = 20;
    pub const DT_DEBUG: u64 = 21;
    pub const DT_TEXTREL: u64 = 22;
    pub const DT_JMPREL: u64 = 23;
    pub const DT_BIND_NOW: u64 = 24;
    pub const DT_INIT_ARRAY: u64 = 25;
    pub const DT_FINI_ARRAY: u64 = 26;
    pub const DT_INIT_ARRAYSZ: u64 = 27;
    pub const DT_FINI_ARRAYSZ: u64 = 28;
    pub const DT_RUNPATH: u64 = 29;
    pub const DT_FLAGS: u64 = 30;
    pub const DT_FLAGS_1: u64 = 0x6ffffffb;

    pub const DF_ORIGIN: u64 = 0x1;
    pub const DF_SYMBOLIC: u64 = 0x2;
    pub const DF_TEXTREL: u64 = 0x4;
    pub const DF_BIND_NOW: u64 = 0x8;
    pub const DF_STATIC_TLS: u64 = 0x10;

    pub const DF_1_NOW: u64 = 0x1;
    pub const DF_1_GLOBAL: u64 = 0x2;
    pub const DF_1_PIE: u64 = 0x08000000;

    #[inline]
    pub fn tag_to_str(tag: u64) -> &'static str {
        match tag {
            DT_NULL => "DT_NULL",
            DT_NEEDED => "DT_NEEDED",
            DT_PLTRELSZ => "DT_PLTRELSZ",
            DT_PLTGOT => "DT_PLTGOT",
            DT_HASH => "DT_HASH",
            DT_STRTAB => "DT_STRTAB",
            DT_SYMTAB => "DT_SYMTAB",
            DT_RELA => "DT_RELA",
            DT_RELASZ => "DT_RELASZ",
            DT_RELAENT => "DT_RELAENT",
            DT_STRSZ => "DT_STRSZ",
            DT_SYMENT => "DT_SYMENT",
            DT_INIT => "DT_INIT",
            DT_FINI => "DT_FINI",
            DT_SONAME => "DT_SONAME",
            DT_RPATH => "DT_RPATH",
            DT_RUNPATH => "DT_RUNPATH",
            DT_FLAGS => "DT_FLAGS",
            DT_FLAGS_1 => "DT_FLAGS_1",
            _ => "UNKNOWN_TAG",
        }
    }
}
