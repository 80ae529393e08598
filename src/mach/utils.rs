use scroll::Pread;

use crate::error::Result;

/// Reads the big-endian magic number at `offset` (fat headers and Mach-O
/// headers are both BE-or-LE self-describing via their magic constant, so
/// callers try both orders as needed).
pub fn peek_magic_at<S: AsRef<[u8]>>(buffer: &S, offset: usize) -> Result<u32> {
    Ok(buffer.as_ref().pread_with::<u32>(offset, scroll::BE)?)
}

pub fn peek_magic<S: AsRef<[u8]>>(buffer: &S) -> Result<u32> {
    peek_magic_at(buffer, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_be_magic() {
        let bytes = [0xca, 0xfe, 0xba, 0xbe];
        assert_eq!(peek_magic(&bytes).unwrap(), 0xcafebabe);
    }
}
