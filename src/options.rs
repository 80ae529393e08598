//! The `Options` record consumed by every backend (§6). A driver builds one
//! of these from argv and environment; this crate never parses a full CLI
//! grammar, since that's named out of scope, but it does validate the
//! record for self-contradiction before S1 begins.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Elf,
    MachO,
    Wasm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuArch {
    X86_64,
    Aarch64,
    Wasm32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsTag {
    Linux,
    MacOs,
    IOs,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub cpu_arch: CpuArch,
    pub os_tag: OsTag,
    pub format: Format,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Exe,
    Lib,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStrategy {
    PathsFirst,
    DylibsFirst,
}

#[derive(Debug, Clone)]
pub struct Positional {
    pub path: PathBuf,
    pub must_link: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LibFlags {
    pub needed: bool,
    pub weak: bool,
}

#[derive(Debug, Clone)]
pub struct Emit {
    pub directory: PathBuf,
    pub sub_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Options {
    pub positionals: Vec<Positional>,
    pub lib_dirs: Vec<PathBuf>,
    pub framework_dirs: Vec<PathBuf>,
    pub libs: HashMap<String, LibFlags>,
    pub frameworks: HashMap<String, LibFlags>,
    pub search_strategy: SearchStrategy,
    pub output_mode: OutputMode,
    pub emit: Emit,
    pub target: Target,
    pub syslibroot: Option<PathBuf>,
    pub entry: Option<String>,
    pub stack_size: Option<u64>,
    pub pagezero_size: Option<u64>,
    pub entitlements: Option<PathBuf>,
    pub dead_strip: bool,
    pub dead_strip_dylibs: bool,
    pub strip: bool,
    pub import_memory: bool,
    pub shared_memory: bool,
    pub allow_undef: bool,
}

impl Options {
    /// Rejects combinations that are self-contradictory regardless of what
    /// values the driver filled in (§4 "Options validation pass" in
    /// SPEC_FULL.md); spec.md treats `Options` as already well-formed, but
    /// a populated record can still contradict itself.
    pub fn validate(&self) -> Result<()> {
        if self.target.format != Format::Wasm && (self.import_memory || self.shared_memory) {
            return Err(Error::InvalidOptions(
                "import_memory/shared_memory only apply to a Wasm target".into(),
            ));
        }
        if self.target.format != Format::MachO && self.entitlements.is_some() {
            return Err(Error::InvalidOptions(
                "entitlements only apply to a Mach-O target".into(),
            ));
        }
        if self.target.format != Format::MachO && !self.frameworks.is_empty() {
            return Err(Error::InvalidOptions(
                "frameworks only apply to a Mach-O target".into(),
            ));
        }
        if self.positionals.is_empty() {
            return Err(Error::InvalidOptions("no input files given".into()));
        }
        if self.output_mode == OutputMode::Exe && self.entry.is_none() && self.target.format != Format::Wasm {
            return Err(Error::InvalidOptions(
                "an executable output needs an entry point".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_options(format: Format) -> Options {
        Options {
            positionals: vec![Positional { path: "a.o".into(), must_link: false }],
            lib_dirs: vec![],
            framework_dirs: vec![],
            libs: HashMap::new(),
            frameworks: HashMap::new(),
            search_strategy: SearchStrategy::PathsFirst,
            output_mode: OutputMode::Exe,
            emit: Emit { directory: ".".into(), sub_path: "a.out".into() },
            target: Target { cpu_arch: CpuArch::X86_64, os_tag: OsTag::Linux, format },
            syslibroot: None,
            entry: Some("_start".into()),
            stack_size: None,
            pagezero_size: None,
            entitlements: None,
            dead_strip: false,
            dead_strip_dylibs: false,
            strip: false,
            import_memory: false,
            shared_memory: false,
            allow_undef: false,
        }
    }

    #[test]
    fn rejects_import_memory_on_elf() {
        let mut opts = base_options(Format::Elf);
        opts.import_memory = true;
        assert!(opts.validate().is_err());
    }

    #[test]
    fn rejects_entitlements_on_elf() {
        let mut opts = base_options(Format::Elf);
        opts.entitlements = Some("a.entitlements".into());
        assert!(opts.validate().is_err());
    }

    #[test]
    fn accepts_well_formed_elf_exe() {
        let opts = base_options(Format::Elf);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn rejects_exe_without_entry() {
        let mut opts = base_options(Format::Elf);
        opts.entry = None;
        assert!(opts.validate().is_err());
    }
}
