//! The Mach-O export trie: a radix tree over exported symbol names, each
//! edge a byte string and each terminal node a uleb128-encoded
//! `(flags, address)` (or, for a re-exported symbol, `(flags, dylib_ordinal,
//! import_name)`). Lives inside `LC_DYLD_INFO(_ONLY)`'s `export_off`/
//! `export_size` region; read here for `input::dylib`, written by
//! `mach::linkedit` for S7.

use crate::error::{Error, Result};

pub const EXPORT_SYMBOL_FLAGS_KIND_MASK: u64 = 0x03;
pub const EXPORT_SYMBOL_FLAGS_KIND_REGULAR: u64 = 0x00;
pub const EXPORT_SYMBOL_FLAGS_KIND_THREAD_LOCAL: u64 = 0x01;
pub const EXPORT_SYMBOL_FLAGS_KIND_ABSOLUTE: u64 = 0x02;
pub const EXPORT_SYMBOL_FLAGS_WEAK_DEFINITION: u64 = 0x04;
pub const EXPORT_SYMBOL_FLAGS_REEXPORT: u64 = 0x08;
pub const EXPORT_SYMBOL_FLAGS_STUB_AND_RESOLVER: u64 = 0x10;

#[derive(Debug, Clone)]
pub struct Export {
    pub name: String,
    pub flags: u64,
    pub address: u64,
    pub reexport: Option<(u64, Option<String>)>,
}

impl Export {
    pub fn is_weak(&self) -> bool {
        self.flags & EXPORT_SYMBOL_FLAGS_WEAK_DEFINITION != 0
    }
}

fn read_uleb128(data: &[u8], offset: &mut usize) -> Result<u64> {
    let mut result: u64 = 0;
    let mut shift = 0u32;
    loop {
        let byte = *data
            .get(*offset)
            .ok_or_else(|| Error::Malformed("export trie: truncated uleb128".into()))?;
        *offset += 1;
        result |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift >= 64 {
            return Err(Error::Malformed("export trie: uleb128 overflow".into()));
        }
    }
    Ok(result)
}

fn read_cstr<'a>(data: &'a [u8], offset: &mut usize) -> Result<&'a str> {
    let start = *offset;
    let end = data[start..]
        .iter()
        .position(|&b| b == 0)
        .map(|p| start + p)
        .ok_or_else(|| Error::Malformed("export trie: unterminated edge label".into()))?;
    *offset = end + 1;
    std::str::from_utf8(&data[start..end]).map_err(|_| Error::Malformed("export trie: non-utf8 edge label".into()))
}

/// Walks every node of the trie reachable from `node_offset`, appending
/// `prefix` to each edge label as it descends, and recording a terminal
/// `Export` whenever a node's terminal-size byte is non-zero.
fn walk(data: &[u8], node_offset: usize, prefix: &str, out: &mut Vec<Export>) -> Result<()> {
    let mut offset = node_offset;
    let terminal_size = read_uleb128(data, &mut offset)? as usize;
    if terminal_size > 0 {
        let terminal_start = offset;
        let flags = read_uleb128(data, &mut offset)?;
        let reexport = flags & EXPORT_SYMBOL_FLAGS_REEXPORT != 0;
        if reexport {
            let ordinal = read_uleb128(data, &mut offset)?;
            let import_name = if data.get(offset) == Some(&0) {
                offset += 1;
                None
            } else {
                Some(read_cstr(data, &mut offset)?.to_string())
            };
            out.push(Export { name: prefix.to_string(), flags, address: 0, reexport: Some((ordinal, import_name)) });
        } else {
            let address = read_uleb128(data, &mut offset)?;
            if flags & EXPORT_SYMBOL_FLAGS_STUB_AND_RESOLVER != 0 {
                let _resolver = read_uleb128(data, &mut offset)?;
            }
            out.push(Export { name: prefix.to_string(), flags, address, reexport: None });
        }
        offset = terminal_start + terminal_size;
    }

    let child_count = *data
        .get(offset)
        .ok_or_else(|| Error::Malformed("export trie: truncated child count".into()))?;
    offset += 1;

    for _ in 0..child_count {
        let edge = read_cstr(data, &mut offset)?;
        let child_offset = read_uleb128(data, &mut offset)? as usize;
        let mut child_name = String::with_capacity(prefix.len() + edge.len());
        child_name.push_str(prefix);
        child_name.push_str(edge);
        walk(data, child_offset, &child_name, out)?;
    }
    Ok(())
}

/// Parses the export trie occupying `data` (already sliced to
/// `[export_off, export_off + export_size)`) into a flat list of exports.
pub fn parse(data: &[u8]) -> Result<Vec<Export>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    walk(data, 0, "", &mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A trie with a single root child edge `"_foo"` leading to a terminal
    /// node at address 0x1000, built by hand in the on-disk byte format.
    #[test]
    fn parses_single_export() {
        // Root: terminal_size=0, child_count=1, edge="_foo"\0, child_offset=6
        let mut data = vec![0x00, 0x01];
        data.extend_from_slice(b"_foo\0");
        data.push(8); // child_offset uleb128 (fits in one byte): root header is 8 bytes
        // Child node at offset 6: terminal_size, flags, address, child_count=0
        data.push(2); // terminal_size: 1 flags byte + 1 address byte
        data.push(0x00); // flags = regular
        data.push(0x10); // address = 0x10 (single uleb128 byte)
        data.push(0); // child_count = 0
        let exports = parse(&data).unwrap();
        assert_eq!(exports.len(), 1);
        assert_eq!(exports[0].name, "_foo");
        assert_eq!(exports[0].address, 0x10);
    }

    #[test]
    fn empty_trie_has_no_exports() {
        assert!(parse(&[]).unwrap().is_empty());
    }
}
