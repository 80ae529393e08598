//! Crate-wide error type (§7 "Error Handling Design").
//!
//! Input errors (`NotObject`/`NotArchive`/`NotDylib`) are recoverable: S1's
//! format probing catches them and tries the next candidate container type.
//! Every other variant is fatal for the link.

use core::fmt;
use core::result;

/// The unified error type returned by every parsing, resolution, layout, and
/// emission routine in this crate.
#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Scroll(scroll::Error),

    // --- Input errors (§7): recoverable during format probing ---
    /// Not a relocatable/object file this backend recognizes.
    NotObject,
    /// Not a SysV archive (`!<arch>\n` magic didn't match).
    NotArchive,
    /// Not a Mach-O dylib or stub file.
    NotDylib,
    /// An archive's structure (header, TOC, member bounds) is invalid.
    MalformedArchive(String),
    /// A Mach-O `.tbd`/stub file parsed but described zero symbols.
    EmptyStubFile,
    /// A fat/universal container has no slice for the requested CPU.
    MismatchedCpuArchitecture { wanted: String, found: Vec<String> },

    /// The input's magic number didn't match any supported format.
    BadMagic(u64),
    /// The input is structurally invalid in a way specific enough to name.
    Malformed(String),

    // --- Symbol errors (§4.2, §7) ---
    /// Undefined after archive pull-in and dylib binding, and `allow_undef`
    /// was not set.
    UndefinedSymbolReference(String),
    /// Two non-weak, non-private-extern definitions of the same name.
    MultipleSymbolDefinitions(String),
    /// No definition was found for the configured entry-point symbol.
    MissingMainEntrypoint(String),

    // --- Resource errors (§7): deferred until after resolution ---
    LibraryNotFound(String),
    FrameworkNotFound(String),

    // --- Encoding errors (§7) ---
    UnsupportedCpuArchitecture(String),
    /// A relocation referenced a target this backend cannot encode, or its
    /// computed displacement/addend overflowed its field even after thunk
    /// insertion.
    UnsupportedRelocation(String),

    /// The `Options` record itself is self-contradictory (SPEC_FULL §4).
    InvalidOptions(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "io error: {}", err),
            Error::Scroll(err) => write!(f, "parse error: {}", err),
            Error::NotObject => write!(f, "not a recognized object file"),
            Error::NotArchive => write!(f, "not a SysV archive"),
            Error::NotDylib => write!(f, "not a Mach-O dylib or stub"),
            Error::MalformedArchive(msg) => write!(f, "malformed archive: {}", msg),
            Error::EmptyStubFile => write!(f, "stub file describes no symbols"),
            Error::MismatchedCpuArchitecture { wanted, found } => write!(
                f,
                "no slice for cpu {} in fat container (have: {})",
                wanted,
                found.join(", ")
            ),
            Error::BadMagic(magic) => write!(f, "invalid magic number: 0x{:x}", magic),
            Error::Malformed(msg) => write!(f, "malformed input: {}", msg),
            Error::UndefinedSymbolReference(name) => write!(f, "undefined symbol: {}", name),
            Error::MultipleSymbolDefinitions(name) => write!(f, "duplicate symbol: {}", name),
            Error::MissingMainEntrypoint(name) => write!(f, "undefined entry point: {}", name),
            Error::LibraryNotFound(name) => write!(f, "library not found: {}", name),
            Error::FrameworkNotFound(name) => write!(f, "framework not found: {}", name),
            Error::UnsupportedCpuArchitecture(arch) => write!(f, "unsupported cpu architecture: {}", arch),
            Error::UnsupportedRelocation(msg) => write!(f, "unsupported relocation: {}", msg),
            Error::InvalidOptions(msg) => write!(f, "invalid options: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Scroll(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::Io(err)
    }
}

impl From<scroll::Error> for Error {
    fn from(err: scroll::Error) -> Error {
        Error::Scroll(err)
    }
}

/// An input-format probe failed recoverably (§4.1 "Errors"): the caller
/// should try the next candidate format rather than aborting the link.
pub fn is_recoverable_probe_error(err: &Error) -> bool {
    matches!(err, Error::NotObject | Error::NotArchive | Error::NotDylib)
}

pub type Result<T> = result::Result<T, Error>;
