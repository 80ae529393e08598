//! SysV Unix archive (`.a`) parsing (§4.1 "Archive").
//!
//! Only the common-subset layout is implemented: `!<arch>\n` magic, a run of
//! fixed 60-byte file headers each followed by right-padded-to-even member
//! data, and a SysV symbol-table member (name `/`) that maps every exported
//! name to the byte offset of the member header that defines it. The long-
//! filename table (name `//`) is parsed to resolve `/<offset>`-style member
//! names but is not otherwise exposed.

use std::collections::HashMap;

use scroll::Pread;

use crate::error::{Error, Result};

pub const MAGIC: &[u8; 8] = b"!<arch>\n";
const HEADER_LEN: usize = 60;
const END_CHARS: [u8; 2] = [0x60, 0x0a];

/// One archive member's file header, as laid out on disk (ASCII fields,
/// right-padded with spaces).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberHeader {
    pub name: String,
    pub size: usize,
    /// Byte offset of this member's header within the archive; this is what
    /// the SysV symbol table records for each exported name.
    pub header_offset: usize,
    /// Byte offset of this member's data (`header_offset + HEADER_LEN`).
    pub data_offset: usize,
}

fn field(bytes: &[u8], start: usize, len: usize) -> Result<&str> {
    let raw = bytes
        .get(start..start + len)
        .ok_or_else(|| Error::MalformedArchive("truncated member header".into()))?;
    Ok(std::str::from_utf8(raw)
        .map_err(|_| Error::MalformedArchive("non-utf8 member header field".into()))?
        .trim_end())
}

impl MemberHeader {
    fn parse_raw(bytes: &[u8], offset: usize) -> Result<(MemberHeader, usize)> {
        let header: &[u8] = bytes
            .get(offset..offset + HEADER_LEN)
            .ok_or_else(|| Error::MalformedArchive("truncated member header".into()))?;
        if header[58..60] != END_CHARS {
            return Err(Error::MalformedArchive("bad member header terminator".into()));
        }
        let raw_name = field(header, 0, 16)?.to_string();
        let size: usize = field(header, 48, 10)?
            .parse()
            .map_err(|_| Error::MalformedArchive("bad member size field".into()))?;
        Ok((
            MemberHeader {
                name: raw_name,
                size,
                header_offset: offset,
                data_offset: offset + HEADER_LEN,
            },
            offset + HEADER_LEN,
        ))
    }
}

/// Resolves a SysV-style `name/` or `/<offset>` member name against the
/// long-name table, stripping the SysV trailing `/` sigil otherwise.
fn resolve_name(raw: &str, longnames: &str) -> String {
    if let Some(off) = raw.strip_prefix('/') {
        if let Ok(off) = off.parse::<usize>() {
            if let Some(rest) = longnames.get(off..) {
                let end = rest.find('\n').unwrap_or(rest.len());
                return rest[..end].trim_end_matches('/').to_string();
            }
        }
        return raw.to_string();
    }
    raw.trim_end_matches('/').to_string()
}

/// A parsed archive: member directory plus a symbol-name -> member TOC, the
/// shape §4.1 calls out so the resolver (§4.2) can pull members in without
/// eagerly parsing every member as an `Object`.
#[derive(Debug, Clone)]
pub struct Archive {
    pub members: Vec<MemberHeader>,
    /// `symbol name -> defining member's header_offset`.
    pub symbol_table: HashMap<String, usize>,
}

impl Archive {
    pub fn is_magic(bytes: &[u8]) -> bool {
        bytes.len() >= MAGIC.len() && &bytes[..MAGIC.len()] == MAGIC
    }

    /// Parses the archive's member directory and symbol TOC. Fails with
    /// `NotArchive` when the magic doesn't match, so S1's format probing can
    /// try the next candidate; any other structural problem is fatal.
    pub fn parse(bytes: &[u8]) -> Result<Archive> {
        if !Self::is_magic(bytes) {
            return Err(Error::NotArchive);
        }
        let mut offset = MAGIC.len();
        let mut symbol_table = HashMap::new();
        let mut longnames = String::new();
        let mut members = Vec::new();

        while offset + HEADER_LEN <= bytes.len() {
            let (header, data_start) = MemberHeader::parse_raw(bytes, offset)?;
            let data_end = data_start
                .checked_add(header.size)
                .ok_or_else(|| Error::MalformedArchive("member size overflow".into()))?;
            if data_end > bytes.len() {
                return Err(Error::MalformedArchive("member data runs past end of file".into()));
            }
            let data = &bytes[data_start..data_end];

            match header.name.as_str() {
                "/" | "/SYM64/" => parse_symbol_table(data, &mut symbol_table)?,
                "//" => {
                    longnames = String::from_utf8_lossy(data).into_owned();
                }
                _ => {
                    let name = resolve_name(&header.name, &longnames);
                    members.push(MemberHeader { name, ..header });
                }
            }

            offset = if data_end % 2 == 1 { data_end + 1 } else { data_end };
        }

        Ok(Archive { members, symbol_table })
    }

    /// Looks up the member that defines `name`, if any, returning its raw
    /// bytes so the caller can parse it as an `Object`.
    pub fn extract<'a>(&self, bytes: &'a [u8], name: &str) -> Option<&'a [u8]> {
        let &header_offset = self.symbol_table.get(name)?;
        let member = self.members.iter().find(|m| m.header_offset == header_offset)?;
        self.member_bytes(bytes, member)
    }

    pub fn member_for(&self, name: &str) -> Option<&MemberHeader> {
        let &header_offset = self.symbol_table.get(name)?;
        self.members.iter().find(|m| m.header_offset == header_offset)
    }

    pub fn member_bytes<'a>(&self, bytes: &'a [u8], member: &MemberHeader) -> Option<&'a [u8]> {
        bytes.get(member.data_offset..member.data_offset + member.size)
    }
}

/// Parses the ranlib-style (`count: u32be`, `count * (header_offset: u32be)`,
/// NUL-delimited names) symbol table member into `name -> header_offset`.
fn parse_symbol_table(data: &[u8], out: &mut HashMap<String, usize>) -> Result<()> {
    if data.len() < 4 {
        return Ok(());
    }
    let count = data.pread_with::<u32>(0, scroll::BE)? as usize;
    let mut offsets = Vec::with_capacity(count);
    let mut cursor = 4usize;
    for _ in 0..count {
        let off = data
            .pread_with::<u32>(cursor, scroll::BE)
            .map_err(|_| Error::MalformedArchive("truncated symbol table offsets".into()))?;
        offsets.push(off as usize);
        cursor += 4;
    }
    let strings = &data[cursor..];
    let mut name_start = 0usize;
    for &header_offset in &offsets {
        let end = strings[name_start..]
            .iter()
            .position(|&b| b == 0)
            .map(|p| name_start + p)
            .unwrap_or(strings.len());
        let name = String::from_utf8_lossy(&strings[name_start..end]).into_owned();
        name_start = end + 1;
        out.entry(name).or_insert(header_offset);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pad_field(s: &str, width: usize) -> Vec<u8> {
        let mut v = s.as_bytes().to_vec();
        v.resize(width, b' ');
        v
    }

    fn build_header(name: &str, size: usize) -> Vec<u8> {
        let mut h = Vec::new();
        h.extend(pad_field(name, 16));
        h.extend(pad_field("0", 12));
        h.extend(pad_field("0", 6));
        h.extend(pad_field("0", 6));
        h.extend(pad_field("0", 8));
        h.extend(pad_field(&size.to_string(), 10));
        h.extend_from_slice(&END_CHARS);
        assert_eq!(h.len(), HEADER_LEN);
        h
    }

    #[test]
    fn parses_magic_only_archive() {
        let archive = Archive::parse(MAGIC).unwrap();
        assert!(archive.members.is_empty());
    }

    #[test]
    fn rejects_bad_magic() {
        let err = Archive::parse(b"not an archive..").unwrap_err();
        assert!(matches!(err, Error::NotArchive));
    }

    #[test]
    fn parses_single_member() {
        let mut bytes = MAGIC.to_vec();
        let data = b"hello!!!"; // 8 bytes, already even
        bytes.extend(build_header("foo.o/", data.len()));
        bytes.extend_from_slice(data);
        let archive = Archive::parse(&bytes).unwrap();
        assert_eq!(archive.members.len(), 1);
        assert_eq!(archive.members[0].name, "foo.o");
        assert_eq!(archive.member_bytes(&bytes, &archive.members[0]).unwrap(), data);
    }

    #[test]
    fn pads_odd_sized_members_to_even_boundary() {
        let mut bytes = MAGIC.to_vec();
        let data = b"odd"; // 3 bytes: member data is padded with one byte to stay even
        bytes.extend(build_header("a.o/", data.len()));
        bytes.extend_from_slice(data);
        bytes.push(b'\n');
        bytes.extend(build_header("b.o/", 2));
        bytes.extend_from_slice(b"ok");
        let archive = Archive::parse(&bytes).unwrap();
        assert_eq!(archive.members.len(), 2);
        assert_eq!(archive.members[1].name, "b.o");
    }

    #[test]
    fn symbol_table_resolves_to_member() {
        let mut bytes = MAGIC.to_vec();
        let sym_data_placeholder_offset = bytes.len() + HEADER_LEN;
        // The member we want the symbol to point at starts right after the
        // symbol-table member's header+data (computed below once we know its size).
        let member_data = b"payload!"; // 8 bytes
        let member_header_offset_guess = sym_data_placeholder_offset + 4 + 4 + b"foo\0".len();
        let member_header_offset = if member_header_offset_guess % 2 == 0 {
            member_header_offset_guess
        } else {
            member_header_offset_guess + 1
        };

        let mut sym_data = Vec::new();
        sym_data.extend(&1u32.to_be_bytes());
        sym_data.extend(&(member_header_offset as u32).to_be_bytes());
        sym_data.extend_from_slice(b"foo\0");
        bytes.extend(build_header("/", sym_data.len()));
        bytes.extend(&sym_data);
        if bytes.len() % 2 == 1 {
            bytes.push(b'\n');
        }
        assert_eq!(bytes.len(), member_header_offset);
        bytes.extend(build_header("bar.o/", member_data.len()));
        bytes.extend_from_slice(member_data);

        let archive = Archive::parse(&bytes).unwrap();
        assert_eq!(archive.extract(&bytes, "foo").unwrap(), member_data);
        assert_eq!(archive.member_for("foo").unwrap().name, "bar.o");
    }
}
