//! Warning collection (§7 "Warnings ... are emitted to stderr and do not
//! stop the link"). `log::debug!`/`log::trace!` cover the ambient tracing
//! the teacher's `pe/writer.rs` emits during finalization; this module
//! covers the other half — diagnostics a caller (or a test) might want to
//! inspect rather than just see scroll past on stderr, namely the deferred
//! `LibraryNotFound`/`FrameworkNotFound` class (§7: "deferred until after
//! resolution so all missing names are reported together").

use core::fmt;

/// One non-fatal diagnostic raised during a link. Distinct from `Error`:
/// nothing in this enum stops the link by itself (§7 "do not stop the link
/// unless the corresponding resource was actually required for
/// resolution" — that escalation, when it happens, is reported as an
/// `Error::LibraryNotFound`/`FrameworkNotFound` instead, not a `Warning`).
#[derive(Debug, Clone)]
pub enum Warning {
    /// A `-L`/`-F` search directory doesn't exist or isn't readable.
    MissingSearchDir(String),
    /// A library/framework named on the command line was never needed by
    /// any undefined reference, so its absence was never escalated.
    UnneededLibraryNotFound(String),
    /// A positional input's extension/magic didn't match any backend this
    /// invocation's target understands; skipped rather than failing.
    UnknownFileType(String),
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Warning::MissingSearchDir(dir) => write!(f, "directory not found: {}", dir),
            Warning::UnneededLibraryNotFound(name) => {
                write!(f, "library not found, but also never referenced: {}", name)
            }
            Warning::UnknownFileType(path) => write!(f, "unknown file type, skipping: {}", path),
        }
    }
}

/// Collects `Warning`s over one link rather than printing them as they're
/// discovered, so a caller driving the `Linker` programmatically (a test,
/// or a future non-CLI embedder) can inspect them instead of scraping
/// stderr.
#[derive(Debug, Default)]
pub struct Diagnostics {
    warnings: Vec<Warning>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Diagnostics::default()
    }

    pub fn push(&mut self, warning: Warning) {
        log::warn!("{}", warning);
        self.warnings.push(warning);
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }

    /// Prints every collected warning to stderr, prefixed the way a linker
    /// conventionally tags its own diagnostics.
    pub fn flush_to_stderr(&self) {
        for warning in &self.warnings {
            eprintln!("zld: warning: {}", warning);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_in_order() {
        let mut diag = Diagnostics::new();
        diag.push(Warning::MissingSearchDir("/nope".into()));
        diag.push(Warning::UnknownFileType("a.xyz".into()));
        assert_eq!(diag.warnings().len(), 2);
    }
}
