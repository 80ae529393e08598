//! Ad-hoc code signature (`LC_CODE_SIGNATURE`), gated behind the `codesign`
//! feature. This is the "unsigned but blessed" signature `ld` emits by
//! default on Apple Silicon: a `SuperBlob` holding one `CodeDirectory`
//! blob, SHA-256 page hashes over the signed range, no certificate and no
//! `CMS` blob (no `-dylib_or_bundle` entitlements embedding here either;
//! see `Options::entitlements` for the one case this crate does embed a
//! requirements-style blob).

use sha2::{Digest, Sha256};

const CSMAGIC_CODEDIRECTORY: u32 = 0xfade0c02;
const CSMAGIC_EMBEDDED_SIGNATURE: u32 = 0xfade0cc0;
const CSSLOT_CODEDIRECTORY: u32 = 0;
const CS_HASHTYPE_SHA256: u8 = 2;
const CS_ADHOC: u32 = 0x0000_0002;
const CS_PAGE_SIZE_LOG2: u8 = 12;
const CS_PAGE_SIZE: usize = 1 << CS_PAGE_SIZE_LOG2;

fn be32(v: u32) -> [u8; 4] {
    v.to_be_bytes()
}

/// Builds the `CodeDirectory` blob for `signed_range` (the file bytes from
/// the start of the image up to, but not including, where this signature
/// itself will be written), identified by `identifier` (conventionally the
/// output file's basename).
fn code_directory(signed_range: &[u8], identifier: &str) -> Vec<u8> {
    let page_count = (signed_range.len() + CS_PAGE_SIZE - 1) / CS_PAGE_SIZE;
    let hashes: Vec<[u8; 32]> = (0..page_count)
        .map(|i| {
            let start = i * CS_PAGE_SIZE;
            let end = (start + CS_PAGE_SIZE).min(signed_range.len());
            let mut hasher = Sha256::new();
            hasher.update(&signed_range[start..end]);
            hasher.finalize().into()
        })
        .collect();

    let ident_bytes = {
        let mut v = identifier.as_bytes().to_vec();
        v.push(0);
        v
    };

    // CodeDirectory header (version 0x20400, the "hash ranking" format ld
    // emits; no scatter/teamId/linkage fields since this is ad-hoc).
    const HEADER_LEN: usize = 44;
    let ident_offset = HEADER_LEN as u32;
    let hashes_offset = ident_offset + ident_bytes.len() as u32;
    let total_len = hashes_offset as usize + hashes.len() * 32;

    let mut out = Vec::with_capacity(total_len);
    out.extend_from_slice(&be32(CSMAGIC_CODEDIRECTORY));
    out.extend_from_slice(&be32(total_len as u32));
    out.extend_from_slice(&be32(0x0002_0400)); // version
    out.extend_from_slice(&be32(0)); // flags (adhoc flag lives on the superblob's own signature, not here)
    out.extend_from_slice(&be32(hashes_offset));
    out.extend_from_slice(&be32(ident_offset));
    out.extend_from_slice(&be32(0)); // nSpecialSlots
    out.extend_from_slice(&be32(page_count as u32)); // nCodeSlots
    out.extend_from_slice(&be32(signed_range.len() as u32)); // codeLimit
    out.push(32); // hashSize
    out.push(CS_HASHTYPE_SHA256);
    out.push(0); // platform
    out.push(CS_PAGE_SIZE_LOG2);
    out.extend_from_slice(&be32(0)); // spare2
    debug_assert_eq!(out.len(), HEADER_LEN);
    out.extend_from_slice(&ident_bytes);
    for h in &hashes {
        out.extend_from_slice(h);
    }
    out
}

/// Builds the full `EmbeddedSignatureBlob` (`SuperBlob` wrapping a single
/// `CodeDirectory`) for `signed_range`, the file bytes preceding where this
/// blob will itself be placed.
pub fn build(signed_range: &[u8], identifier: &str) -> Vec<u8> {
    let cd = code_directory(signed_range, identifier);

    const BLOB_INDEX_LEN: usize = 8;
    const SUPERBLOB_HEADER_LEN: usize = 12;
    let cd_offset = (SUPERBLOB_HEADER_LEN + BLOB_INDEX_LEN) as u32;
    let total_len = cd_offset as usize + cd.len();

    let mut out = Vec::with_capacity(total_len);
    out.extend_from_slice(&be32(CSMAGIC_EMBEDDED_SIGNATURE));
    out.extend_from_slice(&be32(total_len as u32));
    out.extend_from_slice(&be32(1)); // count of embedded blobs
    out.extend_from_slice(&be32(CSSLOT_CODEDIRECTORY));
    out.extend_from_slice(&be32(cd_offset));
    out.extend_from_slice(&cd);
    out
}

/// The `LC_CODE_SIGNATURE` flags this crate's ad-hoc signatures imply on
/// `mach_header_64.flags`; no corresponding constant is needed since ad-hoc
/// signing doesn't set `MH_FLAGS` bits, only the directory's own `CS_ADHOC`
/// bit, surfaced here so callers don't have to import `CS_ADHOC` by hand.
pub const ADHOC_FLAG: u32 = CS_ADHOC;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_to_whole_pages() {
        let data = vec![0xAAu8; CS_PAGE_SIZE + 10];
        let blob = build(&data, "a.out");
        assert_eq!(&blob[0..4], &be32(CSMAGIC_EMBEDDED_SIGNATURE));
        // Two code slots: one full page, one partial trailing page.
        let cd_offset = u32::from_be_bytes([blob[16], blob[17], blob[18], blob[19]]) as usize;
        let n_code_slots = u32::from_be_bytes([
            blob[cd_offset + 28],
            blob[cd_offset + 29],
            blob[cd_offset + 30],
            blob[cd_offset + 31],
        ]);
        assert_eq!(n_code_slots, 2);
    }

    #[test]
    fn empty_input_still_produces_valid_directory() {
        let blob = build(&[], "empty");
        assert_eq!(&blob[0..4], &be32(CSMAGIC_EMBEDDED_SIGNATURE));
    }
}
