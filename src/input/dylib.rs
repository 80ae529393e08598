//! Mach-O dylib/stub descriptors (§3 "Dylib/Stub descriptor", §4.1
//! "Dylib/Stub (Mach-O)"): two on-disk shapes — a real `MH_DYLIB` binary and
//! a text stub — parse into the one record shape the resolver binds
//! undefined symbols against.
//!
//! Real Apple `.tbd` stub files are YAML (`tapi`-format); this crate has no
//! YAML dependency in its stack (nor does the teacher), so stub files here
//! use a small line-oriented format of our own instead of reimplementing a
//! YAML subset by hand. `dylib::parse` still returns `NotDylib` for anything
//! that's neither a binary dylib nor this stub format, so S1's probing order
//! (`dylib` before `archive` before `object`) is unaffected either way.

use std::collections::HashSet;

use scroll::Pread;

use crate::error::{Error, Result};
use crate::mach::exports::{self, Export};
use crate::mach::header::{self, Header};
use crate::mach::load_command::{CommandVariant, LoadCommand};

const STUB_MAGIC: &str = "# zld-dylib-stub";

#[derive(Debug, Clone)]
pub struct DylibDescriptor {
    pub install_name: String,
    pub current_version: u32,
    pub compatibility_version: u32,
    pub exported_symbols: HashSet<String>,
    pub weak_exports: HashSet<String>,
    pub dependent_install_names: Vec<String>,
    pub weak: bool,
}

fn read_header(bytes: &[u8]) -> Option<(Header, scroll::Endian)> {
    for endian in [scroll::LE, scroll::BE] {
        if let Ok(header) = bytes.pread_with::<Header>(0, endian) {
            if header.magic == header::MH_MAGIC_64 {
                return Some((header, endian));
            }
        }
    }
    None
}

fn lc_str(bytes: &[u8], command_offset: usize, lc_str_offset: u32) -> Result<String> {
    Ok(bytes.pread::<&str>(command_offset + lc_str_offset as usize)?.to_string())
}

fn parse_binary(bytes: &[u8]) -> Result<DylibDescriptor> {
    let (mh, le) = read_header(bytes).ok_or(Error::NotDylib)?;
    if mh.filetype != header::MH_DYLIB && mh.filetype != header::MH_DYLIB_STUB {
        return Err(Error::NotDylib);
    }
    let mut offset = header::SIZEOF_MACH_HEADER_64;
    let mut install_name = None;
    let mut current_version = 0u32;
    let mut compatibility_version = 0u32;
    let mut dependent_install_names = Vec::new();
    let mut export_off = None;
    let mut export_size = 0usize;

    for _ in 0..mh.ncmds {
        let lc = LoadCommand::parse(&bytes, &mut offset, le)?;
        match lc.command {
            CommandVariant::IdDylib(cmd) => {
                install_name = Some(lc_str(bytes, lc.offset, cmd.dylib.name)?);
                current_version = cmd.dylib.current_version;
                compatibility_version = cmd.dylib.compatibility_version;
            }
            CommandVariant::LoadDylib(cmd) | CommandVariant::LoadWeakDylib(cmd) | CommandVariant::ReexportDylib(cmd) => {
                dependent_install_names.push(lc_str(bytes, lc.offset, cmd.dylib.name)?);
            }
            CommandVariant::DyldInfo(cmd) | CommandVariant::DyldInfoOnly(cmd) => {
                if cmd.export_size > 0 {
                    export_off = Some(cmd.export_off as usize);
                    export_size = cmd.export_size as usize;
                }
            }
            _ => {}
        }
    }

    let install_name = install_name.ok_or_else(|| Error::Malformed("dylib missing LC_ID_DYLIB".into()))?;

    let exports: Vec<Export> = match export_off {
        Some(off) => {
            let data = bytes.get(off..off + export_size).ok_or_else(|| Error::Malformed("export trie out of bounds".into()))?;
            exports::parse(data)?
        }
        None => Vec::new(),
    };

    if mh.filetype == header::MH_DYLIB_STUB && exports.is_empty() {
        return Err(Error::EmptyStubFile);
    }

    let mut exported_symbols = HashSet::with_capacity(exports.len());
    let mut weak_exports = HashSet::new();
    for export in exports {
        if export.is_weak() {
            weak_exports.insert(export.name.clone());
        }
        exported_symbols.insert(export.name);
    }

    Ok(DylibDescriptor {
        install_name,
        current_version,
        compatibility_version,
        exported_symbols,
        weak_exports,
        dependent_install_names,
        weak: false,
    })
}

/// Parses the crate's own line-oriented stub format:
///
/// ```text
/// # zld-dylib-stub
/// install_name: /usr/lib/libSystem.B.dylib
/// current_version: 88453001
/// compatibility_version: 65536
/// weak: false
/// exports:
///   printf
///   malloc
/// weak_exports:
///   __ZdlPv
/// dependents:
///   /usr/lib/libc++.dylib
/// ```
///
/// Blank lines and lines starting with `#` (after the magic) are ignored;
/// a `key:` line with no trailing value starts a list section that runs
/// until the next non-indented line.
fn parse_stub_text(text: &str) -> Result<DylibDescriptor> {
    let mut lines = text.lines();
    match lines.next() {
        Some(first) if first.trim() == STUB_MAGIC => {}
        _ => return Err(Error::NotDylib),
    }

    let mut install_name = None;
    let mut current_version = 0u32;
    let mut compatibility_version = 0u32;
    let mut weak = false;
    let mut exported_symbols = HashSet::new();
    let mut weak_exports = HashSet::new();
    let mut dependent_install_names = Vec::new();

    enum Section {
        None,
        Exports,
        WeakExports,
        Dependents,
    }
    let mut section = Section::None;

    for raw_line in lines {
        if raw_line.trim().is_empty() || raw_line.trim_start().starts_with('#') {
            continue;
        }
        if raw_line.starts_with(char::is_whitespace) {
            let item = raw_line.trim().to_string();
            match section {
                Section::Exports => {
                    exported_symbols.insert(item);
                }
                Section::WeakExports => {
                    weak_exports.insert(item.clone());
                    exported_symbols.insert(item);
                }
                Section::Dependents => dependent_install_names.push(item),
                Section::None => return Err(Error::Malformed(format!("stub: indented line outside a list section: {}", raw_line))),
            }
            continue;
        }

        let Some((key, value)) = raw_line.split_once(':') else {
            return Err(Error::Malformed(format!("stub: malformed line: {}", raw_line)));
        };
        let value = value.trim();
        match key.trim() {
            "install_name" => install_name = Some(value.to_string()),
            "current_version" => current_version = value.parse().unwrap_or(0),
            "compatibility_version" => compatibility_version = value.parse().unwrap_or(0),
            "weak" => weak = value == "true",
            "exports" => section = Section::Exports,
            "weak_exports" => section = Section::WeakExports,
            "dependents" => section = Section::Dependents,
            other => return Err(Error::Malformed(format!("stub: unknown key '{}'", other))),
        }
    }

    let install_name = install_name.ok_or_else(|| Error::Malformed("stub missing install_name".into()))?;
    if exported_symbols.is_empty() {
        return Err(Error::EmptyStubFile);
    }

    Ok(DylibDescriptor { install_name, current_version, compatibility_version, exported_symbols, weak_exports, dependent_install_names, weak })
}

/// Probes `bytes` as either a binary Mach-O dylib/stub or this crate's text
/// stub format, in that order. Fails with `NotDylib` so S1 moves on to
/// archive then object probing.
pub fn parse(bytes: &[u8]) -> Result<DylibDescriptor> {
    if let Ok(text) = core::str::from_utf8(bytes) {
        if text.trim_start().starts_with(STUB_MAGIC) {
            return parse_stub_text(text);
        }
    }
    parse_binary(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_dylib_bytes() {
        assert!(matches!(parse(b"definitely not a dylib").unwrap_err(), Error::NotDylib));
    }

    #[test]
    fn parses_text_stub() {
        let stub = "# zld-dylib-stub\ninstall_name: /usr/lib/libfoo.dylib\ncurrent_version: 1\ncompatibility_version: 1\nexports:\n  foo\n  bar\n";
        let desc = parse(stub.as_bytes()).unwrap();
        assert_eq!(desc.install_name, "/usr/lib/libfoo.dylib");
        assert!(desc.exported_symbols.contains("foo"));
        assert!(desc.exported_symbols.contains("bar"));
        assert!(!desc.weak);
    }

    #[test]
    fn empty_stub_is_rejected() {
        let stub = "# zld-dylib-stub\ninstall_name: /usr/lib/libfoo.dylib\n";
        assert!(matches!(parse(stub.as_bytes()).unwrap_err(), Error::EmptyStubFile));
    }
}
