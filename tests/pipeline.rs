//! Crate-level integration tests exercising the concrete scenarios of
//! spec.md §8 against inputs built directly through the public `Symbol`/
//! `Atom`/`Object` constructors, the same way the teacher's own
//! `tests/archive.rs` builds a fixture from an `include!`d byte array
//! rather than invoking a toolchain (SPEC_FULL §2 "tests/").

use zld::atom::synthetic::SyntheticAtoms;
use zld::atom::{self, Atom, AtomIndex, AtomPool, Owner, SectionKind, SplitSymbol};
use zld::driver;
use zld::input::InputId;
use zld::layout;
use zld::options::{CpuArch, Format, OutputMode};
use zld::reloc::{aarch64, RelocKind, Relocation};
use zld::symbol::resolver::SymbolTable;
use zld::symbol::{Binding, Resolution, Symbol, SymbolFlags, SymbolRef, SymbolType, Visibility};

fn external_sym(name: &str, binding: Binding, flags: SymbolFlags, size: u64) -> Symbol {
    Symbol {
        name: name.to_string(),
        value: 0,
        size,
        section_index: Some(0),
        binding,
        sym_type: SymbolType::Func,
        visibility: Visibility::Default,
        flags,
        common_align: 0,
    }
}

fn text_atom(input: InputId, local_index: u32, size: u32) -> Atom {
    Atom {
        owner: Owner::Input(input),
        primary_symbol: SymbolRef::from_input(input, local_index),
        size,
        align_log2: 0,
        kind: SectionKind::Code,
        payload_bytes: vec![0u8; size as usize],
        relocations: Vec::new(),
        inner_symbols: Vec::new(),
        prev: AtomIndex::NULL,
        next: AtomIndex::NULL,
        output_section: ".text".to_string(),
        address: 0,
    }
}

/// §8 "Atom chain integrity": walking `first_atom.next*` yields exactly the
/// section's atoms once each, in ascending address order, with the sum of
/// atom sizes plus alignment padding equal to the section's final size.
#[test]
fn atom_chain_integrity_and_address_monotonicity() {
    let mut pool = AtomPool::new();
    let a = pool.push(text_atom(InputId(0), 0, 5));
    let b = pool.push(text_atom(InputId(0), 1, 3));
    let c = pool.push(text_atom(InputId(0), 2, 16));
    let order = vec![a, b, c];

    let mut sections = layout::build_sections(&mut pool, Format::Elf, &order);
    layout::size_all(&mut pool, &mut sections);
    let segments = layout::allocate(Format::Elf, OutputMode::Exe, &mut sections, 0x1000);
    layout::relocate_atom_addresses(&mut pool, &sections);

    assert_eq!(sections.len(), 1);
    let section = &sections[0];
    let chain = pool.chain(section.first_atom);
    assert_eq!(chain, order, "chain traversal must yield every atom once, in order");

    let mut prev_end = section.address;
    for &idx in &chain {
        let atom = pool.get(idx);
        assert!(atom.address >= prev_end, "atom addresses must be monotonic");
        prev_end = atom.address + atom.size as u64;
    }
    assert!(prev_end <= section.address + section.size, "atoms must fit inside their section");

    // Segments must be non-overlapping and sorted by virtual address.
    for w in segments.windows(2) {
        assert!(w[0].vm_addr + w[0].vm_size <= w[1].vm_addr);
    }
}

/// §8 scenario 4 "weak-strong override": object A provides weak `foo`,
/// object B provides strong `foo`. The global must resolve to B's
/// definition regardless of declaration order, and A's atom is orphaned —
/// the same filter `Linker::filter_orphaned_atoms` applies internally is
/// replicated here at the public-API level to check the invariant holds.
#[test]
fn weak_strong_override_orphans_losing_atom() {
    let input_a = InputId(0);
    let input_b = InputId(1);

    let mut table = SymbolTable::new();
    table.merge(input_a, 0, &external_sym("foo", Binding::Weak, SymbolFlags::Defined, 0)).unwrap();
    table.merge(input_b, 0, &external_sym("foo", Binding::Global, SymbolFlags::Defined, 0)).unwrap();

    let mut pool = AtomPool::new();
    let atom_a = pool.push(text_atom(input_a, 0, 4));
    let atom_b = pool.push(text_atom(input_b, 0, 4));
    let order = vec![atom_a, atom_b];

    let surviving: Vec<AtomIndex> = order
        .into_iter()
        .filter(|&idx| {
            let atom = pool.get(idx);
            let Some(input_id) = atom.primary_symbol.input_id() else { return true };
            match table.local_to_global.get(&(input_id, atom.primary_symbol.index)) {
                Some(&g) => matches!(&table.globals[g as usize].resolution, Resolution::Defined(r) if *r == atom.primary_symbol),
                None => true,
            }
        })
        .collect();

    assert_eq!(surviving, vec![atom_b], "only B's atom for `foo` should survive resolution");
}

/// §8 scenario 3 "tentative merge": two objects both declare `buf` as
/// COMMON with sizes 8 and 64; the resolver keeps the larger size, and a
/// single bss atom of that size is synthesized once (§4.4 "unique ... by a
/// target -> atom map").
#[test]
fn tentative_merge_keeps_larger_and_synthesizes_one_bss_atom() {
    let input_a = InputId(0);
    let input_b = InputId(1);

    let mut table = SymbolTable::new();
    table.merge(input_a, 0, &external_sym("buf", Binding::Global, SymbolFlags::Tentative, 8)).unwrap();
    table.merge(input_b, 0, &external_sym("buf", Binding::Global, SymbolFlags::Tentative, 64)).unwrap();
    assert_eq!(table.tentative_size(0), 64);

    let winning_ref = match &table.globals[0].resolution {
        Resolution::Defined(r) => *r,
        other => panic!("expected a defined tentative winner, got {other:?}"),
    };
    assert_eq!(winning_ref, SymbolRef::from_input(input_b, 0));

    let mut pool = AtomPool::new();
    let mut synth = SyntheticAtoms::new();
    let first = synth.tentative(&mut pool, winning_ref, table.tentative_size(0), 3, ".bss");
    let second = synth.tentative(&mut pool, winning_ref, table.tentative_size(0), 3, ".bss");
    assert_eq!(first, second, "a repeated request for the same target must dedup to one atom");
    assert_eq!(pool.get(first).size, 64);
    assert_eq!(pool.get(first).kind, SectionKind::Zerofill);
}

/// §8 scenario 5 "aarch64 thunk": a `BL` whose source-target distance
/// exceeds the 26-bit branch's ±128 MiB range must be flagged by the
/// overflow scanner so the caller can insert a thunk.
#[test]
fn aarch64_branch_overflow_is_detected_past_128_mib() {
    let input = InputId(0);
    let target_sym = SymbolRef::from_input(input, 1);

    let mut caller = text_atom(input, 0, 4);
    caller.relocations.push(Relocation { offset: 0, kind: RelocKind::Branch26, target: target_sym, addend: 0, pcrel: true, length: 4 });

    let mut pool = AtomPool::new();
    let caller_idx = pool.push(caller);
    pool.get_mut(caller_idx).address = 0;

    let mut section = layout::build_sections(&mut pool, Format::MachO, &[caller_idx]).remove(0);
    section.address = 0;
    let far_target = 300 * 1024 * 1024; // 300 MiB away, past the +-128 MiB range

    let overflow = layout::scan_branch26_overflow(&pool, &section, CpuArch::Aarch64, |s| {
        if s == target_sym {
            Some(far_target)
        } else {
            None
        }
    });
    assert_eq!(overflow.len(), 1);
    assert!(aarch64::needs_thunk(0, far_target));
    assert!(!aarch64::needs_thunk(0, 4096));
}

/// §6 "CLI (driver multiplexer)": invocation name alone decides the
/// backend, and the flags spec.md §6 names round-trip into a valid,
/// `Options::validate`-passing record.
#[test]
fn driver_dispatches_and_parses_a_full_invocation() {
    assert_eq!(driver::dispatch_backend("/usr/local/bin/ld64.zld"), driver::Dispatch::Run(Format::MachO));

    let args: Vec<String> = [
        "-o", "app", "-e", "_main", "-L", "/usr/lib", "-l", "System", "-arch", "arm64", "-dead_strip", "main.o",
    ]
    .into_iter()
    .map(String::from)
    .collect();

    let (options, verbosity) = driver::parse_options(Format::MachO, &args).unwrap();
    assert!(options.validate().is_ok());
    assert_eq!(options.target.cpu_arch, CpuArch::Aarch64);
    assert_eq!(options.entry.as_deref(), Some("_main"));
    assert!(options.dead_strip);
    assert_eq!(verbosity, 0);
}

/// §3 "Symbol uniqueness": two strong definitions of the same name must be
/// rejected with `MultipleSymbolDefinitions`, never silently resolved.
#[test]
fn duplicate_strong_definitions_are_rejected() {
    let mut table = SymbolTable::new();
    table.merge(InputId(0), 0, &external_sym("main", Binding::Global, SymbolFlags::Defined, 0)).unwrap();
    let err = table.merge(InputId(1), 0, &external_sym("main", Binding::Global, SymbolFlags::Defined, 0));
    assert!(err.is_err());
}

/// §4.3 "subsections via symbols": a section with two external symbols
/// splits into two atoms at the second symbol's offset; a non-subdividable
/// section stays as one atom carrying inner symbols instead.
#[test]
fn split_section_respects_subsections_via_symbols_flag() {
    let input = InputId(0);
    let symbols = vec![
        SplitSymbol { symbol_ref: SymbolRef::from_input(input, 0), offset: 0, external: true },
        SplitSymbol { symbol_ref: SymbolRef::from_input(input, 1), offset: 8, external: true },
    ];
    let data = vec![0u8; 16];

    let split = atom::split_section_into_atoms(
        Owner::Input(input),
        ".text",
        SectionKind::Code,
        &data,
        0,
        true,
        &symbols,
        &[],
        SymbolRef::from_input(input, 0),
    );
    assert_eq!(split.len(), 2);
    assert_eq!(split[0].size, 8);
    assert_eq!(split[1].size, 8);

    let unsplit = atom::split_section_into_atoms(
        Owner::Input(input),
        ".text",
        SectionKind::Code,
        &data,
        0,
        false,
        &symbols,
        &[],
        SymbolRef::from_input(input, 0),
    );
    assert_eq!(unsplit.len(), 1);
    assert_eq!(unsplit[0].inner_symbols.len(), 2);
}
