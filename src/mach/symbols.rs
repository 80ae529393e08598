//! "Nlist" style symbols: a type/section/value triple plus a string-table
//! offset for the name. Strippable, so the resolver treats these as a
//! convenience index rather than the sole source of symbol truth — dylib
//! exports additionally come from the export trie (`super::exports`).

use core::fmt::{self, Debug};
use scroll::ctx::SizeWith;
use scroll::{self, ctx, Pread, Pwrite};

use crate::container::{Ctx, Width};
use crate::error::Result;

use super::load_command;

pub const NLIST_TYPE_MASK: u8 = 0xe;
pub const NLIST_TYPE_GLOBAL: u8 = 0x1;
pub const NLIST_TYPE_LOCAL: u8 = 0x0;

#[repr(C)]
#[derive(Clone, Copy, Pread, Pwrite, SizeWith)]
pub struct Nlist32 {
    pub n_strx: u32,
    pub n_type: u8,
    pub n_sect: u8,
    pub n_desc: u16,
    pub n_value: u32,
}

pub const SIZEOF_NLIST_32: usize = 12;

#[repr(C)]
#[derive(Clone, Copy, Pread, Pwrite, SizeWith)]
pub struct Nlist64 {
    pub n_strx: u32,
    pub n_type: u8,
    pub n_sect: u8,
    pub n_desc: u16,
    pub n_value: u64,
}

pub const SIZEOF_NLIST_64: usize = 16;

#[derive(Debug, Clone)]
pub struct Nlist {
    pub n_strx: usize,
    pub n_type: u8,
    pub n_sect: usize,
    pub n_desc: u16,
    pub n_value: u64,
}

impl Nlist {
    pub fn is_global(&self) -> bool {
        self.n_type & NLIST_TYPE_MASK != NLIST_TYPE_LOCAL
    }
}

impl ctx::SizeWith<Ctx> for Nlist {
    fn size_with(ctx: &Ctx) -> usize {
        match ctx.width {
            Width::Bits32 => SIZEOF_NLIST_32,
            Width::Bits64 => SIZEOF_NLIST_64,
        }
    }
}

impl From<Nlist32> for Nlist {
    fn from(n: Nlist32) -> Self {
        Nlist { n_strx: n.n_strx as usize, n_type: n.n_type, n_sect: n.n_sect as usize, n_desc: n.n_desc, n_value: n.n_value as u64 }
    }
}

impl From<Nlist64> for Nlist {
    fn from(n: Nlist64) -> Self {
        Nlist { n_strx: n.n_strx as usize, n_type: n.n_type, n_sect: n.n_sect as usize, n_desc: n.n_desc, n_value: n.n_value }
    }
}

impl<'a> ctx::TryFromCtx<'a, (usize, Ctx)> for Nlist {
    type Error = scroll::Error;
    fn try_from_ctx(bytes: &'a [u8], (offset, ctx): (usize, Ctx)) -> scroll::Result<(Self, usize)> {
        match ctx.width {
            Width::Bits32 => {
                let n = bytes.pread_with::<Nlist32>(offset, ctx.le)?;
                Ok((n.into(), SIZEOF_NLIST_32))
            }
            Width::Bits64 => {
                let n = bytes.pread_with::<Nlist64>(offset, ctx.le)?;
                Ok((n.into(), SIZEOF_NLIST_64))
            }
        }
    }
}

/// A zero-copy "nlist" style symbol table, including the string table.
pub struct Symbols<'a> {
    data: &'a [u8],
    start: usize,
    pub nsyms: usize,
    strtab: usize,
    ctx: Ctx,
}

impl<'a> Symbols<'a> {
    pub fn parse(bytes: &'a [u8], symtab: &load_command::SymtabCommand, ctx: Ctx) -> Result<Symbols<'a>> {
        Ok(Symbols { data: bytes, start: symtab.symoff as usize, nsyms: symtab.nsyms as usize, strtab: symtab.stroff as usize, ctx })
    }

    pub fn get(&self, index: usize) -> scroll::Result<(&'a str, Nlist)> {
        let entry_size = Nlist::size_with(&self.ctx);
        let sym: Nlist = self.data.pread_with(self.start + index * entry_size, self.ctx)?;
        let name = self.data.pread(self.strtab + sym.n_strx)?;
        Ok((name, sym))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'a str, Nlist)> + '_ {
        (0..self.nsyms).filter_map(move |i| self.get(i).ok())
    }
}

impl<'a> Debug for Symbols<'a> {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        writeln!(fmt, "Symbols: {{")?;
        for (name, nlist) in self.iter() {
            writeln!(fmt, "{: >10x} {} sect: {:#x} type: {:#02x} desc: {:#03x}", nlist.n_value, name, nlist.n_sect, nlist.n_type, nlist.n_desc)?;
        }
        writeln!(fmt, "}}")
    }
}
