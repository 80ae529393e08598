//! `LC_UUID` computation. ld64 hashes the load commands and section
//! contents with MD5 and stamps the RFC 4122 version/variant bits over the
//! result; the `md-5` crate (the sibling of `codesign.rs`'s `sha2`, same
//! RustCrypto `Digest` trait) provides the digest itself.

use md5::{Digest, Md5};

/// Computes the 16-byte `LC_UUID` payload over `content` (the header,
/// load commands, and section bytes of the image being produced), then
/// stamps the RFC 4122 "version 3" (name-based) bit pattern over the
/// result the way ld64 does.
pub fn compute(content: &[u8]) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(content);
    let mut digest: [u8; 16] = hasher.finalize().into();
    digest[6] = (digest[6] & 0x0f) | 0x30;
    digest[8] = (digest[8] & 0x3f) | 0x80;
    digest
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_known_vector() {
        // MD5("abc") = 900150983cd24fb0d6963f7d28e17f72
        let mut hasher = Md5::new();
        hasher.update(b"abc");
        let digest: [u8; 16] = hasher.finalize().into();
        assert_eq!(digest, [
            0x90, 0x01, 0x50, 0x98, 0x3c, 0xd2, 0x4f, 0xb0,
            0xd6, 0x96, 0x3f, 0x7d, 0x28, 0xe1, 0x7f, 0x72,
        ]);
    }

    #[test]
    fn stamps_version_and_variant_bits() {
        let uuid = compute(b"hello world");
        assert_eq!(uuid[6] & 0xf0, 0x30);
        assert_eq!(uuid[8] & 0xc0, 0x80);
    }

    #[test]
    fn is_deterministic() {
        assert_eq!(compute(b"same input"), compute(b"same input"));
    }
}
