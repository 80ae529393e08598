//! Endianness + word width context, threaded through every `scroll`
//! read/write call that touches an on-disk struct whose layout depends on
//! either.

use scroll::{Endian, Pread, Pwrite, ctx};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Little,
    Big,
}

impl Container {
    pub fn is_big(&self) -> bool {
        matches!(self, Container::Big)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    Bits32,
    Bits64,
}

impl Width {
    pub fn size(&self) -> usize {
        match self {
            Width::Bits32 => 4,
            Width::Bits64 => 8,
        }
    }

    pub fn is_big(&self) -> bool {
        matches!(self, Width::Bits64)
    }
}

/// Bundles the two axes of variation scroll needs to read or write a
/// container-dependent struct: byte order, and native word width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ctx {
    pub le: scroll::Endian,
    pub width: Width,
}

impl Ctx {
    pub fn new(width: Width, endian: Endian) -> Self {
        Ctx { le: endian, width }
    }

    pub fn is_64(&self) -> bool {
        matches!(self.width, Width::Bits64)
    }

    pub fn is_little_endian(&self) -> bool {
        self.le.is_little()
    }
}

impl Default for Ctx {
    fn default() -> Self {
        Ctx { le: scroll::LE, width: Width::Bits64 }
    }
}

impl From<Ctx> for scroll::Endian {
    fn from(ctx: Ctx) -> Self {
        ctx.le
    }
}

/// Helper for reading a native-width unsigned integer (32 or 64 bit) out of
/// a byte buffer at a known scroll context.
pub fn pread_width(bytes: &[u8], offset: usize, ctx: Ctx) -> scroll::Result<u64> {
    match ctx.width {
        Width::Bits32 => bytes.pread_with::<u32>(offset, ctx.le).map(u64::from),
        Width::Bits64 => bytes.pread_with::<u64>(offset, ctx.le),
    }
}

pub fn pwrite_width(bytes: &mut [u8], offset: usize, value: u64, ctx: Ctx) -> scroll::Result<usize> {
    match ctx.width {
        Width::Bits32 => bytes.pwrite_with::<u32>(value as u32, offset, ctx.le),
        Width::Bits64 => bytes.pwrite_with::<u64>(value, offset, ctx.le),
    }
}

impl ctx::SizeWith<Ctx> for u64 {
    fn size_with(ctx: &Ctx) -> usize {
        ctx.width.size()
    }
}
