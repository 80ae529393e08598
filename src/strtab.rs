//! A byte-offset based string table, plus a write-side interning builder.
//!
//! Read side is used for ELF `.strtab`/`.dynstr`, Mach-O string tables, and
//! archive long-name tables. Write side is shared by every format's
//! finalizer to avoid emitting the same string twice (`ElfWriter`'s
//! `DynStrBuilder` upstream does the same trick for dynamic-section
//! strings; this generalizes it to every strtab this crate emits).

use core::fmt;
use core::ops::Index;
use core::str;
use scroll::{ctx, Pread};

pub struct Strtab<'a> {
    bytes: &'a [u8],
    delim: ctx::StrCtx,
}

#[inline(always)]
fn get_str(idx: usize, bytes: &[u8], delim: ctx::StrCtx) -> &str {
    if idx >= bytes.len() {
        return "";
    }
    bytes.pread_with::<&str>(idx, delim).unwrap_or("")
}

impl<'a> Strtab<'a> {
    pub fn new(bytes: &'a [u8], delim: u8) -> Self {
        Strtab { delim: ctx::StrCtx::from(delim), bytes }
    }

    pub fn parse(bytes: &'a [u8], offset: usize, len: usize, delim: u8) -> crate::error::Result<Strtab<'a>> {
        let bytes: &'a [u8] = bytes.pread_with(offset, len)?;
        Ok(Strtab { bytes, delim: ctx::StrCtx::from(delim) })
    }

    pub fn to_vec(&self) -> Vec<String> {
        let len = self.bytes.len();
        let mut strings = Vec::new();
        let mut i = 0;
        while i < len {
            let string = self.get(i);
            i += string.len() + 1;
            strings.push(string.to_string());
        }
        strings
    }

    pub fn get(&self, idx: usize) -> &str {
        get_str(idx, self.bytes, self.delim)
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.bytes
    }
}

impl<'a> fmt::Debug for Strtab<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Strtab {{ delim: {:?}, len: {} }}", self.delim, self.bytes.len())
    }
}

impl<'a> Default for Strtab<'a> {
    fn default() -> Strtab<'a> {
        Strtab { bytes: &[], delim: ctx::StrCtx::default() }
    }
}

impl<'a> Index<usize> for Strtab<'a> {
    type Output = str;

    fn index(&self, index: usize) -> &Self::Output {
        get_str(index, self.bytes, self.delim)
    }
}

/// Write-side string table: interns strings, deduping exact suffix matches
/// the way `ElfWriter::DynStrBuilder` does for `.dynstr`, but shared across
/// every format's finalizer (ELF `.strtab`/`.shstrtab`, Mach-O string table,
/// Wasm `name` section don't use this, since the Wasm name section encodes
/// length-prefixed strings rather than a NUL-delimited blob).
#[derive(Debug, Default)]
pub struct StrtabBuilder {
    data: Vec<u8>,
}

impl StrtabBuilder {
    /// A builder always starts with a leading NUL so offset 0 means "no name".
    pub fn new() -> Self {
        StrtabBuilder { data: vec![0] }
    }

    /// Interns `s`, returning its byte offset. Reuses an existing entry if
    /// `s` already appears as a NUL-terminated suffix of some prior entry.
    pub fn add(&mut self, s: &str) -> u32 {
        if s.is_empty() {
            return 0;
        }
        let needle = s.as_bytes();
        if let Some(pos) = find_suffix(&self.data, needle) {
            return pos as u32;
        }
        let offset = self.data.len() as u32;
        self.data.extend_from_slice(needle);
        self.data.push(0);
        offset
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.len() <= 1
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

/// Finds `needle\0` occurring at a NUL-or-start boundary inside `haystack`,
/// returning the offset of the match. Matches `DynStrBuilder`'s dedup-by-
/// substring-scan behavior.
fn find_suffix(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    let mut i = 0;
    while i + needle.len() < haystack.len() {
        let at_boundary = i == 0 || haystack[i - 1] == 0;
        if at_boundary && &haystack[i..i + needle.len()] == needle && haystack[i + needle.len()] == 0 {
            return Some(i);
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn as_vec_no_final_null() {
        let bytes = b"\0printf\0memmove\0busta";
        let strtab = Strtab::new(bytes, 0x0);
        let vec = strtab.to_vec();
        assert_eq!(vec, vec!["", "printf", "memmove", "busta"]);
    }

    #[test]
    fn to_vec_newline_delim() {
        let bytes = b"\nprintf\nmemmove\nbusta\n";
        let strtab = Strtab::new(bytes, b'\n');
        let vec = strtab.to_vec();
        assert_eq!(vec, vec!["", "printf", "memmove", "busta"]);
    }

    #[test]
    fn builder_dedups_exact_strings() {
        let mut b = StrtabBuilder::new();
        let a1 = b.add("hello");
        let a2 = b.add("hello");
        assert_eq!(a1, a2);
        let c = b.add("world");
        assert_ne!(a1, c);
    }

    #[test]
    fn builder_dedups_suffix() {
        let mut b = StrtabBuilder::new();
        let full = b.add("libfoo.so");
        let suffix = b.add("foo.so");
        assert_eq!(suffix, full + 3);
    }

    #[test]
    fn builder_empty_string_is_offset_zero() {
        let mut b = StrtabBuilder::new();
        assert_eq!(b.add(""), 0);
    }
}
