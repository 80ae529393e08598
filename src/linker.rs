//! The `Linker` record: drives S1-S7 for whichever backend `Options.target`
//! names. Carries all mutable link state itself (§9 "Global mutable state" —
//! `log`'s own scope filter lives outside the core; this record is the
//! core's only state). Single-threaded and synchronous throughout (§5).

use std::collections::HashMap;
use std::fs;

use crate::archive::Archive;
use crate::atom::synthetic::SyntheticAtoms;
use crate::atom::{self, Atom, AtomIndex, AtomPool, Owner, SectionKind, SplitSymbol};
use crate::diagnostics::{Diagnostics, Warning};
use crate::elf;
use crate::error::{Error, Result};
use crate::input::{self, ArchiveMember, DylibDescriptor, Input, InputId, Object};
use crate::layout;
use crate::mach;
use crate::options::{CpuArch, Format, OutputMode, Options};
use crate::reloc::{self, RelocKind};
use crate::symbol::resolver::{self, SymbolTable};
use crate::symbol::{Resolution, Symbol, SymbolRef, SymbolType};
use crate::wasm;

/// Every input split out by kind once S1 has parsed it, still in positional
/// order (archive members pulled in during S2 are appended separately).
struct LoadedInputs {
    objects: Vec<(InputId, Object)>,
    archives: Vec<(Archive, Vec<u8>)>,
    dylibs: Vec<DylibDescriptor>,
}

/// The atom + in-atom byte offset a pending rebase/bind entry's pointer
/// lives at, before §4.5 layout has assigned final addresses. Resolved to a
/// `(segment_index, segment_offset)` pair once segments exist (§4.7).
#[derive(Debug, Clone, Copy)]
struct FixupLocation {
    atom: AtomIndex,
    offset: u64,
}

pub struct Linker {
    options: Options,
    diagnostics: Diagnostics,
}

impl Linker {
    pub fn new(options: Options) -> Self {
        Linker { options, diagnostics: Diagnostics::new() }
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Runs the full link and returns the output image's bytes. Callers own
    /// writing it to `Options::emit`'s path; a partial image is never
    /// returned on error (§5 "first unrecoverable error aborts").
    pub fn link(&mut self) -> Result<Vec<u8>> {
        self.options.validate()?;
        crate::backend::dispatch(self.options.target.format).link(self)
    }

    /// Runs S1-S5 only and returns the laid-out sections/segments without
    /// writing relocations or a final image (SPEC_FULL §4 `--dry-run`):
    /// useful for inspecting layout decisions (§8 scenarios 3-6) without
    /// paying for a full S6/S7 pass.
    pub fn layout_only(&mut self) -> Result<(AtomPool, Vec<layout::Section>, Vec<layout::Segment>)> {
        self.options.validate()?;
        let format = self.options.target.format;
        if format == Format::Wasm {
            return Err(Error::InvalidOptions("dry-run layout is ELF/Mach-O only; Wasm has no segments".into()));
        }
        let loaded = self.load_inputs()?;
        let (table, objects) = self.resolve_symbols(loaded.objects, &loaded.archives)?;
        let (mut pool, order) = self.build_atoms(format, &objects);
        let order = self.filter_orphaned_atoms(&pool, order, &table);
        let mut sections = layout::build_sections(&mut pool, format, &order);
        layout::size_all(&mut pool, &mut sections);
        let base_addr = self.base_address(format);
        let segments = layout::allocate(format, self.options.output_mode, &mut sections, base_addr);
        Ok((pool, sections, segments))
    }

    // ---- S1: input loading ----

    fn load_inputs(&mut self) -> Result<LoadedInputs> {
        let target = self.options.target.cpu_arch;
        let mut objects = Vec::new();
        let mut archives = Vec::new();
        let mut dylibs = Vec::new();

        for (i, positional) in self.options.positionals.iter().enumerate() {
            let bytes = fs::read(&positional.path)?;
            let id = InputId(i as u32);
            match input::parse_positional(&bytes, id, target)? {
                Input::Object(obj) => objects.push((id, obj)),
                Input::Archive { archive, bytes } => archives.push((archive, bytes)),
                Input::Dylib(desc) => dylibs.push(desc),
            }
        }

        Ok(LoadedInputs { objects, archives, dylibs })
    }

    // ---- S2: symbol resolution ----

    fn resolve_symbols(
        &mut self,
        objects: Vec<(InputId, Object)>,
        archives: &[(Archive, Vec<u8>)],
    ) -> Result<(SymbolTable, Vec<(InputId, Object)>)> {
        let mut table = SymbolTable::new();
        let refs: Vec<(InputId, &[Symbol])> = objects.iter().map(|(id, o)| (*id, o.symbols.as_slice())).collect();

        let mut find_member = |name: &str| -> Option<ArchiveMember> {
            for (archive, bytes) in archives {
                if let Ok(Some(member)) = input::archive_member_for(archive, bytes, name) {
                    return Some(member);
                }
            }
            None
        };

        let pulled_in = resolver::resolve(&mut table, &refs, &mut find_member)?;

        let mut all_objects = objects;
        for (i, input) in pulled_in.into_iter().enumerate() {
            if let Input::Object(obj) = input {
                // `resolver::resolve` assigns pulled-in members ids
                // `1_000_000 + push-order index`, in the same order it
                // returns them in `pulled_in`.
                let id = InputId(1_000_000 + i as u32);
                all_objects.push((id, obj));
            }
        }

        Ok((table, all_objects))
    }

    // ---- S3: atom construction ----

    /// Splits every object's content sections into atoms (§4.3), in input
    /// order. For ELF, prepends nothing yet — the `.ehdr` padding atom is
    /// added by `link_elf` once the segment count (and thus program-header
    /// table size) is known from a first layout pass.
    fn build_atoms(&self, format: Format, objects: &[(InputId, Object)]) -> (AtomPool, Vec<AtomIndex>) {
        let mut pool = AtomPool::new();
        let mut order = Vec::new();

        for (id, obj) in objects {
            for section in &obj.sections {
                if matches!(section.kind, SectionKind::Other) {
                    continue;
                }
                let output_name = atom::map_output_section(format, section.segment.as_deref(), &section.name, section.kind);
                let symbols: Vec<SplitSymbol> = obj
                    .symbols
                    .iter()
                    .enumerate()
                    .filter(|(_, s)| s.section_index == Some(section_index(obj, &section.name)))
                    .map(|(i, s)| SplitSymbol {
                        symbol_ref: SymbolRef::from_input(*id, i as u32),
                        offset: s.value as u32,
                        external: !matches!(s.binding, crate::symbol::Binding::Local),
                    })
                    .collect();
                let primary = symbols.first().map(|s| s.symbol_ref).unwrap_or_else(|| SymbolRef::from_input(*id, 0));
                let atoms = atom::split_section_into_atoms(
                    Owner::Input(*id),
                    &output_name,
                    section.kind,
                    &section.data,
                    section.align_log2,
                    section.subsections_via_symbols,
                    &symbols,
                    &section.relocations,
                    primary,
                );
                for atom in atoms {
                    order.push(pool.push(atom));
                }
            }
        }

        (pool, order)
    }

    /// Drops atoms whose primary symbol lost symbol resolution (§8 scenario
    /// 4 "weak-strong override": the losing definition's atom "is orphaned
    /// and omitted from output"). Only external primaries participate in
    /// this check — a non-subdividable section's atom carries a local
    /// section symbol as its primary and is never orphaned this way.
    fn filter_orphaned_atoms(&self, pool: &AtomPool, order: Vec<AtomIndex>, table: &SymbolTable) -> Vec<AtomIndex> {
        order
            .into_iter()
            .filter(|&idx| {
                let atom = pool.get(idx);
                let Some(input_id) = atom.primary_symbol.input_id() else { return true };
                match table.local_to_global.get(&(input_id, atom.primary_symbol.index)) {
                    Some(&global_idx) => {
                        matches!(&table.globals[global_idx as usize].resolution, Resolution::Defined(r) if *r == atom.primary_symbol)
                    }
                    None => true,
                }
            })
            .collect()
    }

    fn base_address(&self, format: Format) -> u64 {
        match format {
            Format::MachO if self.options.output_mode == OutputMode::Exe => {
                self.options.pagezero_size.unwrap_or(0x1_0000_0000)
            }
            Format::Elf if self.options.output_mode == OutputMode::Exe => 0x400000,
            _ => 0,
        }
    }

    // ---- S4/S6 helpers shared by ELF and Mach-O ----

    /// Resolves `sym_ref`'s defining atom, creating GOT/stub/TLV/tentative
    /// synthetic atoms as `reloc.kind` demands (§4.4). Returns the atom a
    /// relocation should ultimately target, plus whether the reference needs
    /// to go through a lazily-bound stub (Mach-O dylib calls only).
    #[allow(clippy::too_many_arguments)]
    fn resolve_reference(
        &mut self,
        pool: &mut AtomPool,
        synth: &mut SyntheticAtoms,
        table: &SymbolTable,
        format: Format,
        arch: CpuArch,
        local_to_atom: &HashMap<SymbolRef, AtomIndex>,
        kind: RelocKind,
        sym_ref: SymbolRef,
        got_section: &str,
        bss_section: &str,
    ) -> Result<(AtomIndex, Option<AtomIndex>)> {
        let global_idx = self.global_index_for(table, sym_ref);
        let global = global_idx.map(|i| &table.globals[i as usize]);

        let definition = match global.map(|g| &g.resolution) {
            Some(Resolution::Defined(target)) => {
                if let Some(&atom_idx) = local_to_atom.get(target) {
                    atom_idx
                } else if table.tentative_size(global_idx.unwrap()) > 0 {
                    synth.tentative(pool, *target, table.tentative_size(global_idx.unwrap()), 3, bss_section)
                } else {
                    return Err(Error::UndefinedSymbolReference(format!("{:?}", sym_ref)));
                }
            }
            Some(Resolution::Dylib { .. }) | Some(Resolution::FlatLookup) | None => {
                if self.options.allow_undef || matches!(global.map(|g| &g.resolution), Some(Resolution::Dylib { .. } | Resolution::FlatLookup)) {
                    AtomIndex::NULL
                } else {
                    return Err(Error::UndefinedSymbolReference(format!("{:?}", sym_ref)));
                }
            }
            Some(Resolution::Unresolved) => {
                return Err(Error::UndefinedSymbolReference(format!("{:?}", sym_ref)));
            }
        };

        let _ = format;
        let _ = arch;
        let got_entry = if kind.needs_got() { Some(synth.got_entry(pool, sym_ref, got_section)) } else { None };
        Ok((definition, got_entry))
    }

    fn global_index_for(&self, table: &SymbolTable, sym_ref: SymbolRef) -> Option<u32> {
        table.local_to_global.get(&(sym_ref.input_id()?, sym_ref.index)).copied()
    }

    // ---- ELF backend ----

    pub(crate) fn link_elf(&mut self) -> Result<Vec<u8>> {
        let format = Format::Elf;
        let loaded = self.load_inputs()?;
        self.defer_missing_libs(&loaded);
        let (table, objects) = self.resolve_symbols(loaded.objects, &loaded.archives)?;
        self.check_undefined(&table)?;

        let (mut pool, order) = self.build_atoms(format, &objects);
        let mut order = self.filter_orphaned_atoms(&pool, order, &table);
        let local_to_atom = self.atom_index_by_symbol(&pool, &order);

        // First pass: lay out without the header atom to learn the segment
        // count, which fixes the `.ehdr` padding atom's size.
        let mut sections = layout::build_sections(&mut pool, format, &order);
        layout::size_all(&mut pool, &mut sections);
        let base_addr = self.base_address(format);
        let trial_segments = layout::allocate(format, self.options.output_mode, &mut sections, base_addr);
        let phdr_count = trial_segments.len();

        let header_size = elf::header::SIZEOF_EHDR + phdr_count * elf::program_header::SIZEOF_PHDR;
        let header_atom = pool.push(Atom {
            owner: Owner::Synthetic,
            primary_symbol: SymbolRef::synthetic(pool.len() as u32),
            size: header_size as u32,
            align_log2: 3,
            kind: SectionKind::Other,
            payload_bytes: vec![0u8; header_size],
            relocations: Vec::new(),
            inner_symbols: Vec::new(),
            prev: AtomIndex::NULL,
            next: AtomIndex::NULL,
            output_section: ".ehdr".to_string(),
            address: 0,
        });
        order.insert(0, header_atom);

        let mut synth = SyntheticAtoms::new();
        self.write_relocations_elf(&mut pool, &mut synth, &table, &local_to_atom, &mut order)?;

        let mut sections = layout::build_sections(&mut pool, format, &order);
        layout::size_all(&mut pool, &mut sections);
        let mut segments = layout::allocate(format, self.options.output_mode, &mut sections, base_addr);
        layout::relocate_atom_addresses(&mut pool, &sections);

        self.rewrite_relocation_addends_elf(&mut pool, &mut synth, &table, &local_to_atom)?;

        let entry_name = self.options.entry.clone().unwrap_or_else(|| "_start".to_string());
        let entry_address = self.entry_address(&pool, &table, &local_to_atom, &entry_name)?;

        let symbols = self.output_symbols_elf(&objects, &pool, &table, &local_to_atom, &sections);

        let input = elf::finalize::FinalizeInput {
            pool: &pool,
            sections: &sections,
            segments: &segments,
            cpu_arch: self.options.target.cpu_arch,
            output_mode: self.options.output_mode,
            entry_address,
            symbols,
        };
        let _ = &mut segments;
        elf::finalize::finalize(&input)
    }

    /// Builds a `(SymbolRef -> AtomIndex)` map from every atom's primary
    /// symbol, so relocation resolution doesn't need to re-walk the pool.
    fn atom_index_by_symbol(&self, pool: &AtomPool, order: &[AtomIndex]) -> HashMap<SymbolRef, AtomIndex> {
        let mut map = HashMap::new();
        for &idx in order {
            let atom = pool.get(idx);
            map.insert(atom.primary_symbol, idx);
            for inner in &atom.inner_symbols {
                map.entry(inner.symbol).or_insert(idx);
            }
        }
        map
    }

    fn write_relocations_elf(
        &mut self,
        pool: &mut AtomPool,
        synth: &mut SyntheticAtoms,
        table: &SymbolTable,
        local_to_atom: &HashMap<SymbolRef, AtomIndex>,
        order: &mut Vec<AtomIndex>,
    ) -> Result<()> {
        // Pass 1: ensure every GOT-needing relocation has a slot, and every
        // surviving tentative definition has a bss atom, before addresses
        // are assigned (so the GOT/bss atoms themselves get laid out too).
        // Newly synthesized atoms are threaded back into `order` (mirroring
        // `materialize_macho_references`'s `order_with_synth`) so the build_
        // sections/size_all/allocate pass that follows actually places them.
        let snapshot: Vec<AtomIndex> = order.clone();
        for &idx in &snapshot {
            let relocs = pool.get(idx).relocations.clone();
            for reloc in &relocs {
                let (definition, got_entry) = self.resolve_reference(
                    pool, synth, table, Format::Elf, self.options.target.cpu_arch, local_to_atom, reloc.kind, reloc.target, ".got", ".bss",
                )?;
                if !definition.is_null() && !order.contains(&definition) {
                    order.push(definition);
                }
                if let Some(got) = got_entry {
                    if !order.contains(&got) {
                        order.push(got);
                    }
                }
            }
        }
        Ok(())
    }

    /// S6 proper (§4.6): once every atom has a final address, patch every
    /// relocation's bytes in place. Run after `relocate_atom_addresses` so
    /// `atom.address` is meaningful. Reuses pass 1's `synth` instance (not a
    /// fresh one) so the same target resolves to the same, already-laid-out
    /// GOT/tentative atom instead of pushing an unplaced duplicate.
    fn rewrite_relocation_addends_elf(
        &mut self,
        pool: &mut AtomPool,
        synth: &mut SyntheticAtoms,
        table: &SymbolTable,
        local_to_atom: &HashMap<SymbolRef, AtomIndex>,
    ) -> Result<()> {
        let arch = self.options.target.cpu_arch;
        let indices: Vec<AtomIndex> = (1..pool.len() as u32).map(AtomIndex).collect();
        for &idx in &indices {
            let relocs = pool.get(idx).relocations.clone();
            for (ri, reloc) in relocs.iter().enumerate() {
                let (definition, got_entry) = self.resolve_reference(
                    pool, synth, table, Format::Elf, arch, local_to_atom, reloc.kind, reloc.target, ".got", ".bss",
                )?;
                let target_addr = reloc::resolve_target(pool, reloc, definition, got_entry)?;
                let source_addr = pool.get(idx).address + reloc.offset as u64;
                let atom = pool.get_mut(idx);
                let reloc = atom.relocations[ri].clone();
                reloc::write_relocation(arch, atom, &reloc, source_addr, (target_addr as i64 + reloc.addend) as u64)?;
            }
        }
        Ok(())
    }

    fn entry_address(
        &self,
        pool: &AtomPool,
        table: &SymbolTable,
        local_to_atom: &HashMap<SymbolRef, AtomIndex>,
        name: &str,
    ) -> Result<u64> {
        if self.options.output_mode != OutputMode::Exe {
            return Ok(0);
        }
        let idx = table.globals.iter().position(|g| g.name == name).ok_or_else(|| Error::MissingMainEntrypoint(name.to_string()))?;
        match &table.globals[idx].resolution {
            Resolution::Defined(symref) => {
                let atom_idx = local_to_atom.get(symref).ok_or_else(|| Error::MissingMainEntrypoint(name.to_string()))?;
                Ok(pool.get(*atom_idx).address)
            }
            _ => Err(Error::MissingMainEntrypoint(name.to_string())),
        }
    }

    fn output_symbols_elf(
        &self,
        objects: &[(InputId, Object)],
        pool: &AtomPool,
        table: &SymbolTable,
        local_to_atom: &HashMap<SymbolRef, AtomIndex>,
        sections: &[layout::Section],
    ) -> Vec<elf::finalize::OutputSymbol> {
        let mut out = Vec::new();
        for (id, obj) in objects {
            for (i, sym) in obj.symbols.iter().enumerate() {
                if matches!(sym.binding, crate::symbol::Binding::Local) || sym.is_undefined() {
                    continue;
                }
                let symref = SymbolRef::from_input(*id, i as u32);
                let Some(&global_idx) = table.local_to_global.get(&(*id, i as u32)) else { continue };
                if !matches!(table.globals[global_idx as usize].resolution, Resolution::Defined(r) if r == symref) {
                    continue; // a different input's definition won
                }
                let Some(&atom_idx) = local_to_atom.get(&symref) else { continue };
                let atom = pool.get(atom_idx);
                let section_index = sections.iter().position(|s| s.name == atom.output_section).map(|i| i as u16 + 1);
                out.push(elf::finalize::OutputSymbol {
                    name: sym.name.clone(),
                    value: atom.address,
                    size: sym.size,
                    section_index,
                    global: true,
                    sym_type: sym.sym_type,
                });
            }
        }
        out
    }

    fn check_undefined(&mut self, table: &SymbolTable) -> Result<()> {
        if self.options.allow_undef {
            return Ok(());
        }
        if let Some(name) = table.unresolved_names().into_iter().next() {
            return Err(Error::UndefinedSymbolReference(name));
        }
        Ok(())
    }

    fn defer_missing_libs(&mut self, loaded: &LoadedInputs) {
        let _ = loaded;
        for dir in &self.options.lib_dirs {
            if !dir.exists() {
                self.diagnostics.push(Warning::MissingSearchDir(dir.display().to_string()));
            }
        }
    }

    // ---- Mach-O backend ----

    pub(crate) fn link_macho(&mut self) -> Result<Vec<u8>> {
        let format = Format::MachO;
        let loaded = self.load_inputs()?;
        self.defer_missing_libs(&loaded);
        let (mut table, objects) = self.resolve_symbols(loaded.objects, &loaded.archives)?;

        // S2 steps 3-4 (dylib binding, Mach-O synthetic symbols): driven by
        // this caller per `resolver::resolve`'s contract.
        for (ordinal, dylib) in loaded.dylibs.iter().enumerate() {
            for name in &dylib.exported_symbols {
                if table.unresolved_names().contains(name) {
                    table.bind_dylib(name, ordinal as u32 + 1, dylib.weak_exports.contains(name));
                }
            }
        }
        if self.options.allow_undef {
            for name in table.unresolved_names() {
                table.mark_flat_lookup(&name);
            }
        }
        self.check_undefined(&table)?;

        let (mut pool, order) = self.build_atoms(format, &objects);
        let order = self.filter_orphaned_atoms(&pool, order, &table);
        let local_to_atom = self.atom_index_by_symbol(&pool, &order);

        if self.options.output_mode == OutputMode::Exe {
            let pagezero_size = self.options.pagezero_size.unwrap_or(0x1_0000_0000);
            self.push_pagezero(&mut pool, pagezero_size);
        }

        let mut synth = SyntheticAtoms::new();
        let mut rebases = Vec::new();
        let mut binds = Vec::new();
        let mut lazy_binds = Vec::new();
        let mut rebase_locs = Vec::new();
        let mut bind_locs = Vec::new();
        let mut lazy_bind_locs = Vec::new();
        let mut has_tlv = false;

        let order_with_synth = self.materialize_macho_references(
            &mut pool,
            &mut synth,
            &table,
            &local_to_atom,
            &order,
            &mut rebases,
            &mut binds,
            &mut lazy_binds,
            &mut rebase_locs,
            &mut bind_locs,
            &mut lazy_bind_locs,
            &mut has_tlv,
        )?;

        let mut sections = layout::build_sections(&mut pool, format, &order_with_synth);
        layout::size_all(&mut pool, &mut sections);
        let base_addr = self.base_address(format);
        let mut segments = layout::allocate(format, self.options.output_mode, &mut sections, base_addr);
        layout::relocate_atom_addresses(&mut pool, &sections);

        self.insert_aarch64_thunks(&mut pool, &mut sections, &mut segments, format, base_addr, &table, &local_to_atom)?;

        self.resolve_rebase_bind_addresses(
            &pool,
            &segments,
            &rebase_locs,
            &bind_locs,
            &lazy_bind_locs,
            &mut rebases,
            &mut binds,
            &mut lazy_binds,
        );
        self.write_relocations_macho(&mut pool, &table, &local_to_atom, &synth)?;

        let entry_name = self.options.entry.clone().unwrap_or_else(|| "_main".to_string());
        let entry_address = self.entry_address_macho(&pool, &table, &local_to_atom, &entry_name);

        let symbols = self.output_symbols_macho(&objects, &pool, &table, &local_to_atom, &sections);
        let exports = self.exports_macho(&objects, &pool, &table, &local_to_atom);
        let function_starts = self.function_starts_macho(&objects, &pool, &table, &local_to_atom);

        let dylibs: Vec<mach::linkedit::DylibEntry> = loaded
            .dylibs
            .iter()
            .map(|d| mach::linkedit::DylibEntry {
                install_name: d.install_name.clone(),
                current_version: d.current_version,
                compatibility_version: d.compatibility_version,
                weak: d.weak,
            })
            .collect();

        let identifier = self.options.emit.sub_path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_else(|| "a.out".to_string());

        let input = mach::linkedit::FinalizeInput {
            pool: &pool,
            sections: &sections,
            segments: &segments,
            cpu_arch: self.options.target.cpu_arch,
            output_mode: self.options.output_mode,
            entry_address: entry_address.unwrap_or(0),
            symbols,
            dylibs,
            rebases,
            binds,
            lazy_binds,
            exports,
            function_starts,
            has_tlv,
            uuid: !self.options.strip,
            codesign: true,
            identifier,
        };
        mach::linkedit::finalize(&input)
    }

    fn push_pagezero(&self, pool: &mut AtomPool, size: u64) -> AtomIndex {
        pool.push(Atom {
            owner: Owner::Synthetic,
            primary_symbol: SymbolRef::synthetic(pool.len() as u32),
            size: 0,
            align_log2: 0,
            kind: SectionKind::Zerofill,
            payload_bytes: Vec::new(),
            relocations: Vec::new(),
            inner_symbols: Vec::new(),
            prev: AtomIndex::NULL,
            next: AtomIndex::NULL,
            output_section: "__PAGEZERO,__pagezero".to_string(),
            address: 0,
        });
        let _ = size; // __PAGEZERO's vm_size comes from `layout::allocate`'s base_addr gap, not atom size
        AtomIndex::NULL
    }

    #[allow(clippy::too_many_arguments)]
    fn materialize_macho_references(
        &mut self,
        pool: &mut AtomPool,
        synth: &mut SyntheticAtoms,
        table: &SymbolTable,
        local_to_atom: &HashMap<SymbolRef, AtomIndex>,
        order: &[AtomIndex],
        rebases: &mut Vec<mach::linkedit::RebaseEntry>,
        binds: &mut Vec<mach::linkedit::BindEntry>,
        lazy_binds: &mut Vec<mach::linkedit::BindEntry>,
        rebase_locs: &mut Vec<FixupLocation>,
        bind_locs: &mut Vec<FixupLocation>,
        lazy_bind_locs: &mut Vec<FixupLocation>,
        has_tlv: &mut bool,
    ) -> Result<Vec<AtomIndex>> {
        let arch = self.options.target.cpu_arch;
        let mut out = order.to_vec();

        for &idx in order {
            let relocs = pool.get(idx).relocations.clone();
            for reloc in &relocs {
                let global_idx = self.global_index_for(table, reloc.target);
                let dylib_bound = matches!(global_idx.map(|i| &table.globals[i as usize].resolution), Some(Resolution::Dylib { .. }));

                if dylib_bound && matches!(reloc.kind, RelocKind::Branch26 | RelocKind::Plt32) {
                    let stub = synth.stub(pool, reloc.target, arch, "__TEXT,__stubs");
                    let helper = synth.stub_helper(pool, reloc.target);
                    let lazy_ptr = synth.lazy_pointer(pool, reloc.target);
                    for a in [stub, helper, lazy_ptr] {
                        if !out.contains(&a) {
                            out.push(a);
                        }
                    }
                    lazy_binds.push(mach::linkedit::BindEntry {
                        segment_index: 0,
                        segment_offset: 0,
                        symbol_name: self.symbol_name(table, reloc.target),
                        dylib_ordinal: self.dylib_ordinal(table, reloc.target),
                        weak: self.is_weak_bind(table, reloc.target),
                        addend: reloc.addend,
                    });
                    lazy_bind_locs.push(FixupLocation { atom: lazy_ptr, offset: 0 });
                } else if reloc.kind.needs_got() {
                    let got = synth.got_entry(pool, reloc.target, "__DATA_CONST,__got");
                    if !out.contains(&got) {
                        out.push(got);
                    }
                    if dylib_bound {
                        binds.push(mach::linkedit::BindEntry {
                            segment_index: 0,
                            segment_offset: 0,
                            symbol_name: self.symbol_name(table, reloc.target),
                            dylib_ordinal: self.dylib_ordinal(table, reloc.target),
                            weak: self.is_weak_bind(table, reloc.target),
                            addend: reloc.addend,
                        });
                        bind_locs.push(FixupLocation { atom: got, offset: 0 });
                    } else {
                        rebases.push(mach::linkedit::RebaseEntry { segment_index: 0, segment_offset: 0 });
                        rebase_locs.push(FixupLocation { atom: got, offset: 0 });
                    }
                } else if matches!(reloc.kind, RelocKind::Abs64) && local_to_atom.contains_key(&reloc.target) {
                    rebases.push(mach::linkedit::RebaseEntry { segment_index: 0, segment_offset: 0 });
                    rebase_locs.push(FixupLocation { atom: idx, offset: reloc.offset as u64 });
                }
            }
        }

        for &idx in order {
            if pool.get(idx).output_section.contains("__thread_ptrs") {
                *has_tlv = true;
            }
        }

        Ok(out)
    }

    fn symbol_name(&self, table: &SymbolTable, sym_ref: SymbolRef) -> String {
        self.global_index_for(table, sym_ref).map(|i| table.globals[i as usize].name.clone()).unwrap_or_default()
    }

    fn dylib_ordinal(&self, table: &SymbolTable, sym_ref: SymbolRef) -> i64 {
        match self.global_index_for(table, sym_ref).map(|i| &table.globals[i as usize].resolution) {
            Some(Resolution::Dylib { ordinal, .. }) => *ordinal as i64,
            _ => 1,
        }
    }

    fn is_weak_bind(&self, table: &SymbolTable, sym_ref: SymbolRef) -> bool {
        matches!(
            self.global_index_for(table, sym_ref).map(|i| &table.globals[i as usize].resolution),
            Some(Resolution::Dylib { weak: true, .. })
        )
    }

    /// Resolves each rebase/bind/lazy-bind entry's final `(segment_index,
    /// segment_offset)` from its atom's post-layout address (§4.7). Entries
    /// and locations are parallel vectors built in lockstep by
    /// `materialize_macho_references`, so `locs[i]` always describes
    /// `entries[i]`'s pointer site.
    #[allow(clippy::too_many_arguments)]
    fn resolve_rebase_bind_addresses(
        &self,
        pool: &AtomPool,
        segments: &[layout::Segment],
        rebase_locs: &[FixupLocation],
        bind_locs: &[FixupLocation],
        lazy_bind_locs: &[FixupLocation],
        rebases: &mut [mach::linkedit::RebaseEntry],
        binds: &mut [mach::linkedit::BindEntry],
        lazy_binds: &mut [mach::linkedit::BindEntry],
    ) {
        for (entry, loc) in rebases.iter_mut().zip(rebase_locs) {
            let (seg_idx, seg_off) = self.locate_segment(pool, segments, *loc);
            entry.segment_index = seg_idx;
            entry.segment_offset = seg_off;
        }
        for (entry, loc) in binds.iter_mut().zip(bind_locs) {
            let (seg_idx, seg_off) = self.locate_segment(pool, segments, *loc);
            entry.segment_index = seg_idx;
            entry.segment_offset = seg_off;
        }
        for (entry, loc) in lazy_binds.iter_mut().zip(lazy_bind_locs) {
            let (seg_idx, seg_off) = self.locate_segment(pool, segments, *loc);
            entry.segment_index = seg_idx;
            entry.segment_offset = seg_off;
        }
    }

    fn locate_segment(&self, pool: &AtomPool, segments: &[layout::Segment], loc: FixupLocation) -> (u8, u64) {
        if loc.atom.is_null() {
            return (0, 0);
        }
        let addr = pool.get(loc.atom).address + loc.offset;
        for (i, seg) in segments.iter().enumerate() {
            if addr >= seg.vm_addr && addr < seg.vm_addr + seg.vm_size {
                return (i as u8, addr - seg.vm_addr);
            }
        }
        (0, 0)
    }

    fn write_relocations_macho(
        &mut self,
        pool: &mut AtomPool,
        table: &SymbolTable,
        local_to_atom: &HashMap<SymbolRef, AtomIndex>,
        synth: &SyntheticAtoms,
    ) -> Result<()> {
        let arch = self.options.target.cpu_arch;
        let indices: Vec<AtomIndex> = (1..pool.len() as u32).map(AtomIndex).collect();
        for &idx in &indices {
            let relocs = pool.get(idx).relocations.clone();
            for (ri, reloc) in relocs.iter().enumerate() {
                let global_idx = self.global_index_for(table, reloc.target);
                let dylib_bound = matches!(global_idx.map(|i| &table.globals[i as usize].resolution), Some(Resolution::Dylib { .. }));
                let definition = if dylib_bound {
                    synth.get(crate::atom::synthetic::SyntheticKind::Stub, reloc.target).unwrap_or(AtomIndex::NULL)
                } else {
                    *local_to_atom.get(&reloc.target).unwrap_or(&AtomIndex::NULL)
                };
                let got_entry = synth.get(crate::atom::synthetic::SyntheticKind::Got, reloc.target);
                if definition.is_null() && got_entry.is_none() {
                    continue;
                }
                let target_addr = reloc::resolve_target(pool, reloc, definition, got_entry)?;
                let source_addr = pool.get(idx).address + reloc.offset as u64;
                let atom = pool.get_mut(idx);
                let reloc = atom.relocations[ri].clone();
                reloc::write_relocation(arch, atom, &reloc, source_addr, (target_addr as i64 + reloc.addend) as u64)?;
            }
        }
        Ok(())
    }

    fn insert_aarch64_thunks(
        &self,
        pool: &mut AtomPool,
        sections: &mut Vec<layout::Section>,
        segments: &mut Vec<layout::Segment>,
        format: Format,
        base_addr: u64,
        table: &SymbolTable,
        local_to_atom: &HashMap<SymbolRef, AtomIndex>,
    ) -> Result<()> {
        if self.options.target.cpu_arch != CpuArch::Aarch64 {
            return Ok(());
        }
        let mut synth = SyntheticAtoms::new();
        for _ in 0..4 {
            let mut overflow_total = 0;
            for section in sections.clone() {
                let overflow = layout::scan_branch26_overflow(pool, &section, self.options.target.cpu_arch, |s| {
                    local_to_atom.get(&s).map(|a| pool.get(*a).address)
                });
                overflow_total += overflow.len();
                for (_atom_idx, _reloc_idx, target) in overflow {
                    synth.thunk(pool, target, &section.name);
                }
            }
            if overflow_total == 0 {
                break;
            }
            let order: Vec<AtomIndex> = sections.iter().flat_map(|s| pool.chain(s.first_atom)).collect();
            *sections = layout::build_sections(pool, format, &order);
            layout::size_all(pool, sections);
            *segments = layout::allocate(format, self.options.output_mode, sections, base_addr);
            layout::relocate_atom_addresses(pool, sections);
        }
        let _ = table;
        Ok(())
    }

    fn entry_address_macho(&self, pool: &AtomPool, table: &SymbolTable, local_to_atom: &HashMap<SymbolRef, AtomIndex>, name: &str) -> Option<u64> {
        if self.options.output_mode != OutputMode::Exe {
            return None;
        }
        let idx = table.globals.iter().position(|g| g.name == name)?;
        match &table.globals[idx].resolution {
            Resolution::Defined(symref) => local_to_atom.get(symref).map(|a| pool.get(*a).address),
            _ => None,
        }
    }

    fn output_symbols_macho(
        &self,
        objects: &[(InputId, Object)],
        pool: &AtomPool,
        table: &SymbolTable,
        local_to_atom: &HashMap<SymbolRef, AtomIndex>,
        sections: &[layout::Section],
    ) -> Vec<mach::linkedit::OutputSymbol> {
        let mut out = Vec::new();
        for (id, obj) in objects {
            for (i, sym) in obj.symbols.iter().enumerate() {
                if matches!(sym.binding, crate::symbol::Binding::Local) {
                    continue;
                }
                let symref = SymbolRef::from_input(*id, i as u32);
                let Some(&global_idx) = table.local_to_global.get(&(*id, i as u32)) else { continue };
                match &table.globals[global_idx as usize].resolution {
                    Resolution::Defined(r) if *r == symref => {
                        let Some(&atom_idx) = local_to_atom.get(&symref) else { continue };
                        let atom = pool.get(atom_idx);
                        let section_index = sections.iter().position(|s| s.name == atom.output_section).map(|i| i as u8 + 1).unwrap_or(0);
                        out.push(mach::linkedit::OutputSymbol {
                            name: sym.name.clone(),
                            value: atom.address,
                            section_index,
                            global: true,
                            undefined: false,
                            weak: sym.is_weak(),
                        });
                    }
                    Resolution::Dylib { .. } if sym.is_undefined() => {
                        out.push(mach::linkedit::OutputSymbol {
                            name: sym.name.clone(),
                            value: 0,
                            section_index: 0,
                            global: true,
                            undefined: true,
                            weak: false,
                        });
                    }
                    _ => {}
                }
            }
        }
        out
    }

    fn exports_macho(
        &self,
        objects: &[(InputId, Object)],
        pool: &AtomPool,
        table: &SymbolTable,
        local_to_atom: &HashMap<SymbolRef, AtomIndex>,
    ) -> Vec<mach::linkedit::ExportEntry> {
        let mut out = Vec::new();
        for (id, obj) in objects {
            for (i, sym) in obj.symbols.iter().enumerate() {
                if matches!(sym.binding, crate::symbol::Binding::Local) || matches!(sym.visibility, crate::symbol::Visibility::Hidden | crate::symbol::Visibility::PrivateExtern) {
                    continue;
                }
                let symref = SymbolRef::from_input(*id, i as u32);
                let Some(&global_idx) = table.local_to_global.get(&(*id, i as u32)) else { continue };
                if !matches!(&table.globals[global_idx as usize].resolution, Resolution::Defined(r) if *r == symref) {
                    continue;
                }
                let Some(&atom_idx) = local_to_atom.get(&symref) else { continue };
                out.push(mach::linkedit::ExportEntry { name: sym.name.clone(), address: pool.get(atom_idx).address, weak: sym.is_weak() });
            }
        }
        out
    }

    fn function_starts_macho(
        &self,
        objects: &[(InputId, Object)],
        pool: &AtomPool,
        table: &SymbolTable,
        local_to_atom: &HashMap<SymbolRef, AtomIndex>,
    ) -> Vec<mach::linkedit::FunctionStart> {
        let mut starts = Vec::new();
        for (id, obj) in objects {
            for (i, sym) in obj.symbols.iter().enumerate() {
                if sym.sym_type != SymbolType::Func || sym.is_undefined() {
                    continue;
                }
                let symref = SymbolRef::from_input(*id, i as u32);
                let Some(&global_idx) = table.local_to_global.get(&(*id, i as u32)) else { continue };
                if !matches!(&table.globals[global_idx as usize].resolution, Resolution::Defined(r) if *r == symref) {
                    continue;
                }
                if let Some(&atom_idx) = local_to_atom.get(&symref) {
                    starts.push(mach::linkedit::FunctionStart(pool.get(atom_idx).address));
                }
            }
        }
        starts.sort_by_key(|s| s.0);
        starts.dedup_by_key(|s| s.0);
        starts
    }

    // ---- Wasm backend ----

    pub(crate) fn link_wasm(&mut self) -> Result<Vec<u8>> {
        let format = Format::Wasm;
        let loaded = self.load_inputs()?;
        let (table, objects) = self.resolve_symbols(loaded.objects, &loaded.archives)?;

        let (mut pool, order) = self.build_atoms(format, &objects);
        let order = self.filter_orphaned_atoms(&pool, order, &table);
        let local_to_atom = self.atom_index_by_symbol(&pool, &order);

        // Merge every object's function types by structural equality, and
        // remember each object's local-type-index -> merged-index mapping so
        // `WasmTypeIndexLeb`/function-section entries can be remapped.
        let mut merged_types: Vec<wasm::FuncType> = Vec::new();
        let mut type_maps: HashMap<InputId, Vec<u32>> = HashMap::new();
        for (id, obj) in &objects {
            let Some(extra) = &obj.wasm_extra else { continue };
            let mut map = Vec::with_capacity(extra.types.len());
            for ty in &extra.types {
                let existing = merged_types.iter().position(|t| types_equal(t, ty));
                let idx = existing.unwrap_or_else(|| {
                    merged_types.push(ty.clone());
                    merged_types.len() - 1
                });
                map.push(idx as u32);
            }
            type_maps.insert(*id, map);
        }

        let mut imports: Vec<wasm::Import> = Vec::new();
        let mut import_func_names: Vec<String> = Vec::new();
        let mut memory_imported = self.options.import_memory;
        if memory_imported {
            imports.push(wasm::Import {
                module: "env".to_string(),
                name: "memory".to_string(),
                kind: wasm::ImportKind::Memory { min: 0, max: None },
            });
        }
        for name in table.unresolved_names() {
            if self.options.allow_undef {
                imports.push(wasm::Import { module: "env".to_string(), name: name.clone(), kind: wasm::ImportKind::Func { type_index: 0 } });
                import_func_names.push(name);
            } else {
                return Err(Error::UndefinedSymbolReference(name));
            }
        }

        let mut globals = Vec::new();
        let mut exports = Vec::new();
        let mut producers_languages = Vec::new();
        let mut producers_processed_by = Vec::new();
        let mut memory_min = 0u32;
        let mut memory_max = None;
        let mut shared_memory = self.options.shared_memory;
        for (_id, obj) in &objects {
            let Some(extra) = &obj.wasm_extra else { continue };
            globals.extend(extra.globals.iter().cloned());
            exports.extend(extra.exports.iter().cloned());
            producers_languages.extend(extra.producers_languages.iter().cloned());
            producers_processed_by.extend(extra.producers_processed_by.iter().cloned());
            memory_min = memory_min.max(extra.memory_min);
            memory_max = memory_max.or(extra.memory_max);
            shared_memory |= extra.shared_memory;
        }

        let code_atoms: Vec<AtomIndex> = order
            .iter()
            .copied()
            .filter(|&idx| pool.get(idx).output_section == "code")
            .collect();
        let data_atoms: Vec<AtomIndex> = order
            .iter()
            .copied()
            .filter(|&idx| pool.get(idx).output_section == "data")
            .collect();

        let mut function_type_indices = Vec::with_capacity(code_atoms.len());
        let mut function_locals = Vec::with_capacity(code_atoms.len());
        let mut data_segment_names = Vec::with_capacity(data_atoms.len());
        let mut data_segment_offsets = Vec::with_capacity(data_atoms.len());
        for &idx in &code_atoms {
            let atom = pool.get(idx);
            let Owner::Input(owner_id) = atom.owner else { continue };
            let obj = &objects.iter().find(|(id, _)| *id == owner_id).unwrap().1;
            let extra = obj.wasm_extra.as_ref().unwrap();
            // The atom order within "code" mirrors `extra.function_type_indices`'
            // declaration order per object, one-to-one.
            let local_index = code_atoms.iter().take_while(|&&a| a != idx).filter(|&&a| pool.get(a).owner == Owner::Input(owner_id)).count();
            let local_type = extra.function_type_indices.get(local_index).copied().unwrap_or(0);
            let mapped = type_maps.get(&owner_id).and_then(|m| m.get(local_type as usize)).copied().unwrap_or(local_type);
            function_type_indices.push(mapped);
            function_locals.push(extra.function_locals.get(local_index).cloned().unwrap_or_default());
        }
        for &idx in &data_atoms {
            let atom = pool.get(idx);
            let Owner::Input(owner_id) = atom.owner else { continue };
            let obj = &objects.iter().find(|(id, _)| *id == owner_id).unwrap().1;
            let extra = obj.wasm_extra.as_ref().unwrap();
            let local_index = data_atoms.iter().take_while(|&&a| a != idx).filter(|&&a| pool.get(a).owner == Owner::Input(owner_id)).count();
            data_segment_names.push(extra.data_segment_names.get(local_index).cloned().unwrap_or(None));
            data_segment_offsets.push(0);
        }

        // S6: patch every relocation's index/address directly (Wasm has no
        // address-space layout pass; the index space is just position in
        // `code_atoms`/`data_atoms` plus the import-count offset).
        let import_func_count = imports.iter().filter(|i| matches!(i.kind, wasm::ImportKind::Func { .. })).count() as u32;
        for (local_index, &idx) in code_atoms.iter().enumerate() {
            let final_index = import_func_count + local_index as u32;
            let relocs = pool.get(idx).relocations.clone();
            for reloc in &relocs {
                let value = self.resolve_wasm_reloc_value(&table, &local_to_atom, &code_atoms, &data_atoms, import_func_count, reloc, final_index)?;
                let atom = pool.get_mut(idx);
                reloc::write_relocation(CpuArch::Wasm32, atom, reloc, 0, value)?;
            }
        }
        for &idx in &data_atoms {
            let relocs = pool.get(idx).relocations.clone();
            for reloc in &relocs {
                let value = self.resolve_wasm_reloc_value(&table, &local_to_atom, &code_atoms, &data_atoms, import_func_count, reloc, 0)?;
                let atom = pool.get_mut(idx);
                reloc::write_relocation(CpuArch::Wasm32, atom, reloc, 0, value)?;
            }
        }

        let function_names: Vec<(u32, String)> = import_func_names
            .iter()
            .enumerate()
            .map(|(i, name)| (i as u32, name.clone()))
            .collect();

        let input = wasm::finalize::FinalizeInput {
            pool: &pool,
            types: merged_types,
            imports,
            function_type_indices,
            function_locals,
            code_atoms,
            globals,
            exports,
            data_segment_names,
            data_segment_offsets,
            data_atoms,
            memory_min,
            memory_max,
            shared_memory,
            memory_imported,
            producers_languages,
            producers_processed_by,
            function_names,
        };
        let _ = &mut memory_imported;
        wasm::finalize::finalize(&input)
    }

    #[allow(clippy::too_many_arguments)]
    fn resolve_wasm_reloc_value(
        &self,
        table: &SymbolTable,
        local_to_atom: &HashMap<SymbolRef, AtomIndex>,
        code_atoms: &[AtomIndex],
        data_atoms: &[AtomIndex],
        import_func_count: u32,
        reloc: &crate::reloc::Relocation,
        _self_index: u32,
    ) -> Result<u64> {
        let Some(global_idx) = self.global_index_for(table, reloc.target) else {
            return Ok(0);
        };
        match &table.globals[global_idx as usize].resolution {
            Resolution::Defined(symref) => {
                let Some(&atom_idx) = local_to_atom.get(symref) else { return Ok(0) };
                if let Some(pos) = code_atoms.iter().position(|&a| a == atom_idx) {
                    Ok(import_func_count as u64 + pos as u64)
                } else if let Some(pos) = data_atoms.iter().position(|&a| a == atom_idx) {
                    Ok(pos as u64)
                } else {
                    Ok(0)
                }
            }
            _ => Ok(0),
        }
    }
}

/// Section-local symbol addressing needs the defining section's index among
/// the object's own section list, not the merged output section — resolved
/// by name since `Object::sections` keeps the original per-section name.
fn section_index(obj: &Object, name: &str) -> u32 {
    obj.sections.iter().position(|s| s.name == name).map(|i| i as u32).unwrap_or(u32::MAX)
}

fn types_equal(a: &wasm::FuncType, b: &wasm::FuncType) -> bool {
    a.params == b.params && a.results == b.results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{Protection, Segment};
    use crate::options::{Emit, Format as OptFormat, OsTag, Positional, SearchStrategy, Target};

    fn dummy_linker() -> Linker {
        Linker::new(Options {
            positionals: vec![Positional { path: "a.o".into(), must_link: false }],
            lib_dirs: vec![],
            framework_dirs: vec![],
            libs: HashMap::new(),
            frameworks: HashMap::new(),
            search_strategy: SearchStrategy::PathsFirst,
            output_mode: OutputMode::Exe,
            emit: Emit { directory: ".".into(), sub_path: "a.out".into() },
            target: Target { cpu_arch: CpuArch::X86_64, os_tag: OsTag::MacOs, format: OptFormat::MachO },
            syslibroot: None,
            entry: Some("_main".into()),
            stack_size: None,
            pagezero_size: None,
            entitlements: None,
            dead_strip: false,
            dead_strip_dylibs: false,
            strip: false,
            import_memory: false,
            shared_memory: false,
            allow_undef: false,
        })
    }

    fn segment(name: &str, vm_addr: u64, vm_size: u64) -> Segment {
        Segment { name: name.into(), vm_addr, vm_size, file_offset: vm_addr, file_size: vm_size, protection: Protection::RW, section_indexes: vec![] }
    }

    #[test]
    fn locate_segment_finds_containing_range() {
        let linker = dummy_linker();
        let mut pool = AtomPool::new();
        let idx = pool.push(Atom {
            owner: Owner::Synthetic,
            primary_symbol: SymbolRef::synthetic(1),
            size: 8,
            align_log2: 3,
            kind: SectionKind::Data,
            payload_bytes: vec![0; 8],
            relocations: vec![],
            inner_symbols: vec![],
            prev: AtomIndex::NULL,
            next: AtomIndex::NULL,
            output_section: "__DATA_CONST,__got".into(),
            address: 0x2008,
        });
        let segments = vec![segment("__TEXT", 0x1000, 0x1000), segment("__DATA_CONST", 0x2000, 0x1000)];
        let (seg_idx, seg_off) = linker.locate_segment(&pool, &segments, FixupLocation { atom: idx, offset: 0 });
        assert_eq!(seg_idx, 1);
        assert_eq!(seg_off, 8);
    }

    #[test]
    fn locate_segment_adds_in_atom_offset() {
        let linker = dummy_linker();
        let mut pool = AtomPool::new();
        let idx = pool.push(Atom {
            owner: Owner::Synthetic,
            primary_symbol: SymbolRef::synthetic(1),
            size: 32,
            align_log2: 3,
            kind: SectionKind::Data,
            payload_bytes: vec![0; 32],
            relocations: vec![],
            inner_symbols: vec![],
            prev: AtomIndex::NULL,
            next: AtomIndex::NULL,
            output_section: "__DATA,__data".into(),
            address: 0x3000,
        });
        let segments = vec![segment("__DATA", 0x3000, 0x1000)];
        let (seg_idx, seg_off) = linker.locate_segment(&pool, &segments, FixupLocation { atom: idx, offset: 24 });
        assert_eq!(seg_idx, 0);
        assert_eq!(seg_off, 24);
    }

    #[test]
    fn resolve_rebase_bind_addresses_fills_in_real_offsets() {
        let linker = dummy_linker();
        let mut pool = AtomPool::new();
        let got = pool.push(Atom {
            owner: Owner::Synthetic,
            primary_symbol: SymbolRef::synthetic(1),
            size: 8,
            align_log2: 3,
            kind: SectionKind::Data,
            payload_bytes: vec![0; 8],
            relocations: vec![],
            inner_symbols: vec![],
            prev: AtomIndex::NULL,
            next: AtomIndex::NULL,
            output_section: "__DATA_CONST,__got".into(),
            address: 0x2010,
        });
        let segments = vec![segment("__TEXT", 0x1000, 0x1000), segment("__DATA_CONST", 0x2000, 0x1000)];
        let mut rebases = vec![mach::linkedit::RebaseEntry { segment_index: 0, segment_offset: 0 }];
        let rebase_locs = vec![FixupLocation { atom: got, offset: 0 }];
        let mut binds = Vec::new();
        let bind_locs = Vec::new();
        let mut lazy_binds = Vec::new();
        let lazy_bind_locs = Vec::new();
        linker.resolve_rebase_bind_addresses(&pool, &segments, &rebase_locs, &bind_locs, &lazy_bind_locs, &mut rebases, &mut binds, &mut lazy_binds);
        assert_eq!(rebases[0].segment_index, 1);
        assert_eq!(rebases[0].segment_offset, 0x10);
    }
}
