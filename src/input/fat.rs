//! Fat/universal container handling for positional inputs (§4.1 "Fat/
//! universal containers: seek to the per-architecture slice before format
//! detection"). Delegates the actual arch-table walk to `mach::fat`; this
//! module's only job is to no-op for the (common) non-fat case.

use crate::error::Result;
use crate::mach::fat;
use crate::options::CpuArch;

/// Returns the byte slice to probe for format: `bytes` unchanged if it
/// isn't a fat Mach-O container, or the sub-slice for `target`'s
/// architecture if it is.
pub fn select_slice<'a>(bytes: &'a [u8], target: CpuArch) -> Result<&'a [u8]> {
    if fat::is_magic(bytes) {
        fat::select_slice(bytes, target)
    } else {
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_through_non_fat_bytes() {
        let bytes = b"\x7fELF....................";
        let slice = select_slice(bytes, CpuArch::X86_64).unwrap();
        assert_eq!(slice, &bytes[..]);
    }
}
