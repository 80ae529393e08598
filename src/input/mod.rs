//! Inputs (§3 "Input"): the tagged `{Object, Archive, Dylib}` variant S1
//! produces from a positional file path, plus the `InputId` every atom,
//! relocation target, and resolved `Global` is ultimately addressed
//! through.

pub mod dylib;
pub mod elf_object;
pub mod fat;
pub mod macho_object;
pub mod object;
pub mod wasm_object;

use crate::archive::Archive;
use crate::error::{is_recoverable_probe_error, Error, Result};
use crate::options::{CpuArch, Format};
use crate::symbol::Symbol;

pub use dylib::DylibDescriptor;
pub use object::{InputSection, Object, RawObject};

/// Identifies one input in the link (§3: "created in S1, destroyed at link
/// completion"). Index `0..positional_count` are positional inputs in
/// command-line order; archive-pulled members get an id assigned lazily by
/// `symbol::resolver::resolve` as they're pulled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InputId(pub u32);

/// The parsed form of one input file (§3 "Input"): an object ready for atom
/// decomposition, an archive directory S2 can pull members from, or a
/// Mach-O dylib/stub S2 can bind undefined symbols against.
#[derive(Debug)]
pub enum Input {
    Object(Object),
    Archive { archive: Archive, bytes: Vec<u8> },
    Dylib(DylibDescriptor),
}

/// One archive member, read from its containing `Archive` on demand (§4.1:
/// "Archive pull-in" reads and parses exactly the members the resolver
/// needs, not the whole archive eagerly).
#[derive(Debug, Clone)]
pub struct ArchiveMember {
    pub name: String,
    /// Externally-visible symbols this member defines or references,
    /// exposed directly since `symbol::resolver::resolve` indexes them by
    /// position before an `InputId` is known.
    pub symbols: Vec<Symbol>,
    raw: RawObject,
}

impl ArchiveMember {
    pub fn into_object(self, id: InputId) -> Object {
        self.raw.finalize(id)
    }
}

/// Probes `bytes` against every object-file format this crate understands,
/// in turn, treating `NotObject` as "try the next format" (§4.1 "Contract").
pub fn parse_object(bytes: &[u8]) -> Result<RawObject> {
    match elf_object::parse(bytes) {
        Ok(obj) => return Ok(obj),
        Err(e) if is_recoverable_probe_error(&e) => {}
        Err(e) => return Err(e),
    }
    match macho_object::parse(bytes) {
        Ok(obj) => return Ok(obj),
        Err(e) if is_recoverable_probe_error(&e) => {}
        Err(e) => return Err(e),
    }
    match wasm_object::parse(bytes) {
        Ok(obj) => return Ok(obj),
        Err(e) if is_recoverable_probe_error(&e) => {}
        Err(e) => return Err(e),
    }
    Err(Error::NotObject)
}

/// Parses a positional input (§4.1): slices a fat Mach-O container down to
/// `target`'s architecture first, then probes dylib, archive, and object in
/// turn (dylibs and archives have cheap, specific magics to rule out;
/// object parsing is tried last since it's the expensive, ambiguous case).
pub fn parse_positional(bytes: &[u8], id: InputId, target: CpuArch) -> Result<Input> {
    let bytes = fat::select_slice(bytes, target)?;

    match dylib::parse(bytes) {
        Ok(desc) => return Ok(Input::Dylib(desc)),
        Err(e) if is_recoverable_probe_error(&e) => {}
        Err(e) => return Err(e),
    }

    if Archive::is_magic(bytes) {
        let archive = Archive::parse(bytes)?;
        return Ok(Input::Archive { archive, bytes: bytes.to_vec() });
    }

    let raw = parse_object(bytes)?;
    Ok(Input::Object(raw.finalize(id)))
}

/// Parses the archive member defining `name`, if any (§4.2 step 2 "archive
/// pull-in"). Returns `Ok(None)` rather than an error when the archive
/// simply doesn't define `name`.
pub fn archive_member_for(archive: &Archive, bytes: &[u8], name: &str) -> Result<Option<ArchiveMember>> {
    let Some(header) = archive.member_for(name) else {
        return Ok(None);
    };
    let data = archive
        .member_bytes(bytes, header)
        .ok_or_else(|| Error::MalformedArchive(format!("member '{}' data out of bounds", header.name)))?;
    let raw = parse_object(data)?;
    Ok(Some(ArchiveMember { name: header.name.clone(), symbols: raw.symbols.clone(), raw }))
}

/// The on-disk format a `RawObject`/`Object` was parsed from, duplicated
/// here for callers that only have an `Input` (not yet finalized) and need
/// to pick a backend before S2 completes.
pub fn format_of(input: &Input) -> Option<Format> {
    match input {
        Input::Object(obj) => Some(obj.format),
        Input::Archive { .. } => None,
        Input::Dylib(_) => Some(Format::MachO),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unrecognized_bytes() {
        let err = parse_object(b"not a real object file at all").unwrap_err();
        assert!(matches!(err, Error::NotObject));
    }
}
