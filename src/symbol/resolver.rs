//! The symbol resolver (§4.2): merges every input's symbol table into a
//! flat array of `Global`s, pulling in archive members and binding dylib
//! exports as needed.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::input::{ArchiveMember, Input, InputId};
use crate::symbol::{Binding, Global, Resolution, Symbol, SymbolFlags, SymbolRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MergeAction {
    Keep,
    Replace,
    /// Tentative-vs-tentative: keep whichever carries the larger size.
    KeepLarger,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Strong,
    Weak,
    Tentative,
    Undef,
}

fn kind_of(sym: &Symbol) -> Kind {
    if sym.is_tentative() {
        Kind::Tentative
    } else if sym.is_undefined() {
        Kind::Undef
    } else if sym.is_weak() {
        Kind::Weak
    } else {
        Kind::Strong
    }
}

fn merge_action(existing: Kind, new: Kind) -> MergeAction {
    use Kind::*;
    use MergeAction::*;
    match (existing, new) {
        (Strong, Strong) => Error,
        (Strong, _) => Keep,
        (Weak, Strong) => Replace,
        (Weak, _) => Keep,
        (Tentative, Strong) => Replace,
        (Tentative, Weak) => Keep,
        (Tentative, Tentative) => KeepLarger,
        (Tentative, Undef) => Keep,
        (Undef, Undef) => Keep,
        (Undef, _) => Replace,
    }
}

/// Symbol resolution state threaded through S2. `Linker` owns one of these;
/// it is kept separate so tests can exercise the merge logic without a full
/// `Linker`.
#[derive(Debug, Default)]
pub struct SymbolTable {
    pub globals: Vec<Global>,
    by_name: HashMap<String, u32>,
    /// `(input, local_index) -> global_index`, for remapping local
    /// references during atom/relocation translation.
    pub local_to_global: HashMap<(InputId, u32), u32>,
    /// Size of the current tentative definition, if the global's
    /// resolution kind is tentative. Tracked out of band since
    /// `Resolution::Defined` doesn't itself carry a size.
    tentative_sizes: HashMap<u32, u64>,
    kinds: HashMap<u32, Kind>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable::default()
    }

    fn global_index_for(&mut self, name: &str) -> u32 {
        if let Some(&idx) = self.by_name.get(name) {
            return idx;
        }
        let idx = self.globals.len() as u32;
        self.globals.push(Global { name: name.to_string(), resolution: Resolution::Unresolved });
        self.by_name.insert(name.to_string(), idx);
        idx
    }

    /// Merges one symbol from `input` (index `local_index` in its table)
    /// into the table, following the precedence rules in §4.2. Only
    /// externally-visible symbols (non-local binding) participate; local
    /// symbols never contend for a `Global`.
    pub fn merge(&mut self, input: InputId, local_index: u32, sym: &Symbol) -> Result<()> {
        if sym.binding == Binding::Local {
            return Ok(());
        }
        let global_idx = self.global_index_for(&sym.name);
        let symref = SymbolRef::from_input(input, local_index);
        self.local_to_global.insert((input, local_index), global_idx);

        let new_kind = kind_of(sym);
        let existing_kind = self.kinds.get(&global_idx).copied().unwrap_or(Kind::Undef);

        let action = if matches!(self.globals[global_idx as usize].resolution, Resolution::Unresolved) {
            MergeAction::Replace
        } else {
            merge_action(existing_kind, new_kind)
        };

        match action {
            MergeAction::Keep => Ok(()),
            MergeAction::Replace => {
                self.set_resolution(global_idx, new_kind, symref, sym);
                Ok(())
            }
            MergeAction::KeepLarger => {
                if sym.size > self.tentative_sizes.get(&global_idx).copied().unwrap_or(0) {
                    self.set_resolution(global_idx, new_kind, symref, sym);
                }
                Ok(())
            }
            MergeAction::Error => Err(Error::MultipleSymbolDefinitions(sym.name.clone())),
        }
    }

    pub fn tentative_size(&self, global_idx: u32) -> u64 {
        self.tentative_sizes.get(&global_idx).copied().unwrap_or(0)
    }

    fn set_resolution(&mut self, global_idx: u32, kind: Kind, symref: SymbolRef, sym: &Symbol) {
        self.kinds.insert(global_idx, kind);
        if kind == Kind::Tentative {
            self.tentative_sizes.insert(global_idx, sym.size);
        }
        let resolution = if matches!(kind, Kind::Undef) {
            Resolution::Unresolved
        } else {
            Resolution::Defined(symref)
        };
        self.globals[global_idx as usize].resolution = resolution;
    }

    pub fn unresolved_names(&self) -> Vec<String> {
        self.globals
            .iter()
            .filter(|g| matches!(g.resolution, Resolution::Unresolved))
            .map(|g| g.name.clone())
            .collect()
    }

    pub fn bind_dylib(&mut self, name: &str, ordinal: u32, weak: bool) {
        let idx = self.global_index_for(name);
        self.globals[idx as usize].resolution = Resolution::Dylib { ordinal, weak };
    }

    pub fn mark_flat_lookup(&mut self, name: &str) {
        let idx = self.global_index_for(name);
        self.globals[idx as usize].resolution = Resolution::FlatLookup;
    }
}

/// Runs S2 to completion: merges every positional input's symbols, then
/// repeatedly scans `archives` for members that satisfy a currently
/// unresolved name, pulling each matching member in and recursing on its
/// symbols until a full pass finds nothing new (archive pull-in, §4.2 step
/// 2). Dylib binding (step 3) and Mach-O synthetic-symbol injection (step
/// 4) are driven by the caller, which knows the target format; this
/// function only performs the format-agnostic merge + archive loop.
pub fn resolve(
    table: &mut SymbolTable,
    objects: &[(InputId, &[Symbol])],
    archives: &mut dyn FnMut(&str) -> Option<ArchiveMember>,
) -> Result<Vec<Input>> {
    for (input_id, syms) in objects {
        for (i, sym) in syms.iter().enumerate() {
            table.merge(*input_id, i as u32, sym)?;
        }
    }

    let mut pulled_in = Vec::new();
    loop {
        let undefined = table.unresolved_names();
        if undefined.is_empty() {
            break;
        }
        let mut progressed = false;
        for name in undefined {
            if let Some(member) = archives(&name) {
                progressed = true;
                let input_id = InputId(pulled_in.len() as u32 + 1_000_000);
                for (i, sym) in member.symbols.iter().enumerate() {
                    table.merge(input_id, i as u32, sym)?;
                }
                pulled_in.push(Input::Object(member.into_object(input_id)));
            }
        }
        if !progressed {
            break;
        }
    }
    Ok(pulled_in)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::{SymbolType, Visibility};

    fn sym(name: &str, binding: Binding, flags: SymbolFlags, size: u64) -> Symbol {
        Symbol {
            name: name.to_string(),
            value: 0,
            size,
            section_index: if matches!(flags, SymbolFlags::Defined | SymbolFlags::Tentative) {
                Some(1)
            } else {
                None
            },
            binding,
            sym_type: SymbolType::Object,
            visibility: Visibility::Default,
            flags,
            common_align: 0,
        }
    }

    #[test]
    fn weak_then_strong_keeps_strong() {
        let mut table = SymbolTable::new();
        table.merge(InputId(0), 0, &sym("foo", Binding::Weak, SymbolFlags::Defined, 0)).unwrap();
        table.merge(InputId(1), 0, &sym("foo", Binding::Global, SymbolFlags::Defined, 0)).unwrap();
        let g = &table.globals[0];
        assert!(matches!(g.resolution, Resolution::Defined(r) if r.input_id() == Some(InputId(1))));
    }

    #[test]
    fn two_strong_definitions_error() {
        let mut table = SymbolTable::new();
        table.merge(InputId(0), 0, &sym("foo", Binding::Global, SymbolFlags::Defined, 0)).unwrap();
        let err = table.merge(InputId(1), 0, &sym("foo", Binding::Global, SymbolFlags::Defined, 0));
        assert!(matches!(err, Err(Error::MultipleSymbolDefinitions(_))));
    }

    #[test]
    fn tentative_keeps_larger_size() {
        let mut table = SymbolTable::new();
        table.merge(InputId(0), 0, &sym("buf", Binding::Global, SymbolFlags::Tentative, 8)).unwrap();
        table.merge(InputId(1), 0, &sym("buf", Binding::Global, SymbolFlags::Tentative, 64)).unwrap();
        assert_eq!(table.tentative_size(0), 64);
    }

    #[test]
    fn undef_does_not_override_defined() {
        let mut table = SymbolTable::new();
        table.merge(InputId(0), 0, &sym("foo", Binding::Global, SymbolFlags::Defined, 0)).unwrap();
        table.merge(InputId(1), 0, &sym("foo", Binding::Global, SymbolFlags::Undefined, 0)).unwrap();
        let g = &table.globals[0];
        assert!(matches!(g.resolution, Resolution::Defined(r) if r.input_id() == Some(InputId(0))));
    }
}
