//! Canonical Wasm section ids and the fixed-width section-header writer
//! `wasm::finalize` emits every section through (§6 "section headers written
//! with fixed-width 5-byte LEBs for back-patching length fields").

use super::leb128::write_u32_fixed5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SectionId {
    Custom = 0,
    Type = 1,
    Import = 2,
    Function = 3,
    Table = 4,
    Memory = 5,
    Global = 6,
    Export = 7,
    Start = 8,
    Element = 9,
    DataCount = 12,
    Code = 10,
    Data = 11,
}

/// The binary module's mandatory section order (§2.5 of the Wasm core spec):
/// every section id must appear at most once, and in this relative order.
pub const CANONICAL_ORDER: [SectionId; 12] = [
    SectionId::Type,
    SectionId::Import,
    SectionId::Function,
    SectionId::Table,
    SectionId::Memory,
    SectionId::Global,
    SectionId::Export,
    SectionId::Start,
    SectionId::Element,
    SectionId::DataCount,
    SectionId::Code,
    SectionId::Data,
];

/// Wraps `payload` in a section header: a one-byte id, then `payload.len()`
/// as a fixed-5-byte LEB128 (never minimal — callers that need to patch the
/// length after writing the body in place rely on this fixed width; everyone
/// else just accepts the four wasted bytes for a uniform writer).
pub fn write_section(id: SectionId, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 6);
    out.push(id as u8);
    out.extend_from_slice(&write_u32_fixed5(payload.len() as u32));
    out.extend_from_slice(payload);
    out
}

/// A named custom section (id 0): `name` length-prefixed with a minimal
/// LEB128 (never back-patched, so no need for the fixed-width form), then
/// `payload` verbatim.
pub fn write_custom_section(name: &str, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&super::leb128::write_u32(name.len() as u32));
    body.extend_from_slice(name.as_bytes());
    body.extend_from_slice(payload);
    write_section(SectionId::Custom, &body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn section_header_is_six_bytes_plus_payload() {
        let s = write_section(SectionId::Type, &[1, 2, 3]);
        assert_eq!(s.len(), 1 + 5 + 3);
        assert_eq!(s[0], SectionId::Type as u8);
    }

    #[test]
    fn custom_section_embeds_name() {
        let s = write_custom_section("name", &[0xaa]);
        assert_eq!(s[0], SectionId::Custom as u8);
        // header(6) + name-len(1) + "name"(4) + payload(1)
        assert_eq!(s.len(), 6 + 1 + 4 + 1);
    }
}
