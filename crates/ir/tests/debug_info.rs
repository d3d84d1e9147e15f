mod common;

use std::{collections::BTreeMap, sync::Arc};

use dexopt_ir::{
    debug::{DexDebugEntryBuilder, DexDebugEventBuilder, DexDebugInfo},
    value::LocalInterner,
    DebugLocal, DebugLocalInfo, DexApplication, DexItemFactory, DexString, ObjectToOffsetMapping,
};
use proptest::prelude::*;

fn empty_mapping(factory: &Arc<DexItemFactory>) -> ObjectToOffsetMapping {
    let app = DexApplication::builder(factory.clone()).build();
    ObjectToOffsetMapping::new(
        0,
        factory,
        &app,
        vec![],
        vec![],
        vec![],
        vec![],
        vec![],
        vec![],
    )
}

/// Positions with increasing pcs where consecutive lines differ.
fn positions(steps: &[(u32, u32)]) -> Vec<(u32, u32)> {
    let mut pc = 0;
    let mut result: Vec<(u32, u32)> = Vec::new();
    for &(pc_delta, line) in steps {
        if result.last().is_some_and(|&(_, last)| last == line) {
            pc += pc_delta;
            continue;
        }
        result.push((pc, line));
        pc += pc_delta;
    }
    result
}

fn decode(info: &DexDebugInfo) -> Vec<(u32, u32)> {
    let mut decoder = DexDebugEntryBuilder::new(info.start_line);
    for &event in &info.events {
        decoder.apply(event);
    }
    decoder
        .build()
        .iter()
        .map(|entry| (entry.address, entry.line))
        .collect()
}

/// Registers 0 to 2, each empty or holding one of three pooled locals.
type Slots = [Option<usize>; 3];

/// A decoded position: address, line, file and the visible locals.
type State = (u32, u32, Option<DexString>, BTreeMap<u32, DebugLocalInfo>);

fn visible(slots: &Slots, pool: &[DebugLocal]) -> BTreeMap<u32, DebugLocal> {
    slots
        .iter()
        .enumerate()
        .filter_map(|(register, slot)| Some((register as u32, pool[(*slot)?].clone())))
        .collect()
}

fn decode_states(info: &DexDebugInfo) -> Vec<State> {
    let mut decoder = DexDebugEntryBuilder::new(info.start_line);
    for &event in &info.events {
        decoder.apply(event);
    }
    decoder
        .build()
        .into_iter()
        .map(|entry| {
            let locals = entry
                .locals
                .iter()
                .map(|(&register, local)| (register, *local.info()))
                .collect();
            (entry.address, entry.line, entry.source_file, locals)
        })
        .collect()
}

proptest! {
    #[test]
    fn positions_files_and_locals_survive_encoding(
        steps in prop::collection::vec(
            (1u32..50, 1u32..40, 0usize..3, prop::array::uniform3(prop::option::of(0usize..3))),
            1..48,
        )
    ) {
        let factory = DexItemFactory::new();
        let files = [
            None,
            Some(factory.create_string("A.java")),
            Some(factory.create_string("B.java")),
        ];
        let mut interner = LocalInterner::new();
        let pool: Vec<DebugLocal> = ["a", "b", "c"]
            .into_iter()
            .map(|name| interner.local(factory.create_string(name), factory.int_type, None))
            .collect();

        let mut builder = DexDebugEventBuilder::new(0);
        let mut expected: Vec<State> = Vec::new();
        let mut pc = 0;
        for (pc_delta, line, file, slots) in steps {
            let file = files[file];
            let locals = visible(&slots, &pool);
            builder.set_position(pc, line, file, Some(&locals));

            let infos: BTreeMap<_, _> = locals
                .iter()
                .map(|(&register, local)| (register, *local.info()))
                .collect();
            let repeated = expected
                .last()
                .is_some_and(|(_, l, f, i)| (*l, *f, i) == (line, file, &infos));
            if !repeated {
                expected.push((pc, line, file, infos));
            }
            pc += pc_delta;
        }
        let info = builder.build().unwrap();
        prop_assert_eq!(decode_states(&info), expected);
    }

    #[test]
    fn positions_survive_encoding(steps in prop::collection::vec((1u32..200, 1u32..5000), 1..64)) {
        let factory = Arc::new(DexItemFactory::new());
        let expected = positions(&steps);

        let mut builder = DexDebugEventBuilder::new(0);
        for &(pc, line) in &expected {
            builder.set_position(pc, line, None, None);
        }
        let info = builder.build().unwrap();
        prop_assert_eq!(decode(&info), expected);

        let mut bytes = Vec::new();
        info.write(&empty_mapping(&factory), &mut bytes);
        prop_assert_eq!(bytes.last().copied(), Some(0));
        let read = DexDebugInfo::read(&bytes, &|_| None, &|_| None).unwrap();
        prop_assert_eq!(read, info);
    }
}

#[test]
fn encoded_bytes() {
    common::init_tracing();
    let factory = Arc::new(DexItemFactory::new());
    let mut builder = DexDebugEventBuilder::new(0);
    builder.set_position(0, 10, None, None);
    builder.set_position(2, 11, None, None);
    builder.set_position(50, 100, None, None);
    let info = builder.build().unwrap();

    let mut bytes = Vec::new();
    info.write(&empty_mapping(&factory), &mut bytes);
    // start line, no parameters, two specials, advance line 89, advance pc 48,
    // special, end of sequence.
    assert_eq!(
        bytes,
        vec![10, 0, 0x0e, 0x2d, 0x02, 0xd9, 0x00, 0x01, 0x30, 0x0e, 0x00]
    );
}
