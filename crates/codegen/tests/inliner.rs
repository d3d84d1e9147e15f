mod common;

use std::sync::Arc;

use common::*;
use dexopt_codegen::optim::{Constraint, DeadCodeRemover, Inliner, InlinerConfig};
use dexopt_ir::{
    builder::test_util::dump_code,
    inst::{BinopKind, MemberType, NumericType},
    AccessFlags, AppInfo, ClassKind, DexApplication, DexClass, DexCode, DexEncodedField,
    DexEncodedMethod, DexItemFactory, DexMethod, DexType, InstKind, InvokeType, IrCode, MoveType,
};
use insta::assert_snapshot;

const ADD: InstKind = InstKind::Binop {
    op: BinopKind::Add,
    ty: NumericType::Int,
};

struct Program {
    factory: Arc<DexItemFactory>,
    caller: DexType,
    /// `Util.twice(I)I`: returns its argument added to itself.
    twice: DexMethod,
    /// `Util.peek(I)I`: returns a private static field.
    peek: DexMethod,
    secret: DexEncodedField,
    info: AppInfo,
}

fn small_body() -> DexCode {
    DexCode::new(2, 1, 0, vec![0x0090, 0x0000, 0x000f])
}

fn program() -> Program {
    program_with("Lp/Util;", AccessFlags::PUBLIC | AccessFlags::STATIC)
}

/// Like [`program`], with `Util` named `util` and `twice` declared with
/// `twice_flags`.
fn program_with(util: &str, twice_flags: AccessFlags) -> Program {
    let factory = Arc::new(DexItemFactory::new());
    let caller = factory.create_type("Lp/Caller;");
    let util = factory.create_type(util);
    let twice = int_to_int(&factory, util, "twice");
    let peek = int_to_int(&factory, util, "peek");
    let secret = factory.create_field(util, factory.int_type, "secret");
    let secret = DexEncodedField::new(secret, AccessFlags::PRIVATE | AccessFlags::STATIC);

    let statics = AccessFlags::PUBLIC | AccessFlags::STATIC;
    let mut twice_def = DexEncodedMethod::new(twice, twice_flags, Some(small_body()));
    twice_def.mark_processed(Constraint::Always);
    let mut peek_def = DexEncodedMethod::new(peek, statics, Some(small_body()));
    peek_def.mark_processed(Constraint::Private);

    let mut builder = DexApplication::builder(factory.clone());
    builder.add_class(program_class(&factory, util).with_members(
        vec![secret.clone()],
        vec![],
        vec![twice_def, peek_def],
        vec![],
    ));
    builder.add_class(program_class(&factory, caller));
    let info = AppInfo::new(builder.build());

    Program {
        factory,
        caller,
        twice,
        peek,
        secret,
        info,
    }
}

fn twice_body(method: DexMethod) -> IrCode {
    let mut builder = builder_for(method);
    let entry = builder.append_block();
    builder.switch_to_block(entry);
    let arg = builder.add_argument(0, MoveType::Single, None, false);
    let sum = builder.add_inst(ADD, &[arg, arg], Some(MoveType::Single));
    let sum = builder.code().inst_result(sum).unwrap();
    builder.add_inst(InstKind::Return(Some(MoveType::Single)), &[sum], None);
    builder.set_normal_exit(entry);
    builder.build().unwrap()
}

fn peek_body(method: DexMethod, p: &Program) -> IrCode {
    let mut builder = builder_for(method);
    let entry = builder.append_block();
    builder.switch_to_block(entry);
    builder.add_argument(0, MoveType::Single, None, false);
    let get = InstKind::StaticGet {
        field: p.secret.field,
        ty: MemberType::Single,
    };
    let value = builder.add_inst(get, &[], Some(MoveType::Single));
    let value = builder.code().inst_result(value).unwrap();
    builder.add_inst(InstKind::Return(Some(MoveType::Single)), &[value], None);
    builder.set_normal_exit(entry);
    builder.build().unwrap()
}

/// A static `run(I)` in `Caller` that passes its argument on to `target`.
/// The call result is returned if `use_result` is set.
fn caller_of(p: &Program, target: DexMethod, use_result: bool) -> (DexMethod, IrCode) {
    let ret = if use_result {
        p.factory.int_type
    } else {
        p.factory.void_type
    };
    let proto = p.factory.create_proto(ret, &[p.factory.int_type]);
    let method = p.factory.create_method(p.caller, proto, "run");

    let mut builder = builder_for(method);
    let entry = builder.append_block();
    builder.switch_to_block(entry);
    let arg = builder.add_argument(0, MoveType::Single, None, false);
    let call = InstKind::Invoke {
        ty: InvokeType::Static,
        method: target,
    };
    let result = builder.add_inst(call, &[arg], Some(MoveType::Single));
    if use_result {
        let result = builder.code().inst_result(result).unwrap();
        builder.add_inst(InstKind::Return(Some(MoveType::Single)), &[result], None);
    } else {
        builder.add_inst(InstKind::Return(None), &[], None);
    }
    builder.set_normal_exit(entry);
    (method, builder.build().unwrap())
}

#[test]
fn simple_static_call_is_inlined() {
    init_tracing();
    let p = program();
    let inliner = Inliner::new(&p.info, InlinerConfig::default());
    let (run, mut code) = caller_of(&p, p.twice, true);
    let flags = AccessFlags::PUBLIC | AccessFlags::STATIC | AccessFlags::BRIDGE | AccessFlags::SYNTHETIC;
    let mut method = DexEncodedMethod::new(run, flags, None);

    let mut bodies = Bodies::default();
    bodies.bodies.insert(p.twice, twice_body(p.twice));
    let stats = inliner.perform_inlining(&mut method, &mut code, &CallGraph::default(), &mut bodies);

    assert_eq!(stats.calls_inlined, 1);
    assert_eq!(bodies.requests, vec![p.twice]);
    assert!(!method.access_flags.is_bridge());
    assert!(!method.access_flags.is_synthetic());
    assert_snapshot!(dump_code(&code), @r"
    block0: succs(block3)
        v0 = argument
        goto
    block1: preds(block3) succs(block2)
        goto
    block3: preds(block0) succs(block1)
        v3 = add v0, v0
        goto
    block2: preds(block1)
        return v3
    ");
}

#[test]
fn unused_result_leaves_dead_code() {
    init_tracing();
    let p = program();
    let inliner = Inliner::new(&p.info, InlinerConfig::default());
    let (run, mut code) = caller_of(&p, p.twice, false);
    let mut method = DexEncodedMethod::new(run, AccessFlags::PUBLIC | AccessFlags::STATIC, None);

    let mut bodies = Bodies::default();
    bodies.bodies.insert(p.twice, twice_body(p.twice));
    let stats = inliner.perform_inlining(&mut method, &mut code, &CallGraph::default(), &mut bodies);
    assert_eq!(stats.calls_inlined, 1);

    let before = code.inst_count();
    assert_eq!(DeadCodeRemover::new().run(&mut code), 1);
    assert_eq!(code.inst_count(), before - 1);
    assert!(code
        .blocks()
        .flat_map(|block| code.insts(block))
        .all(|inst| !matches!(code.dfg.inst_kind(inst), InstKind::Binop { .. })));
}

#[test]
fn private_body_stays_in_its_class() {
    init_tracing();
    let p = program();
    let inliner = Inliner::new(&p.info, InlinerConfig::default());
    let peek_ir = peek_body(p.peek, &p);
    let peek_def = p.info.definition_for_method(p.peek).unwrap();
    assert_eq!(inliner.identify_simple_methods(&peek_ir, peek_def), Constraint::Private);

    let (run, mut code) = caller_of(&p, p.peek, true);
    let mut method = DexEncodedMethod::new(run, AccessFlags::PUBLIC | AccessFlags::STATIC, None);
    let mut bodies = Bodies::default();
    bodies.bodies.insert(p.peek, peek_ir);
    let stats = inliner.perform_inlining(&mut method, &mut code, &CallGraph::default(), &mut bodies);

    assert_eq!(stats.calls_inlined, 0);
    assert!(bodies.requests.is_empty());
    assert_eq!(code.inst_count(), 3);
}

#[test]
fn breaker_edges_are_skipped() {
    init_tracing();
    let p = program();
    let inliner = Inliner::new(&p.info, InlinerConfig::default());
    let (run, mut code) = caller_of(&p, p.twice, true);
    let mut method = DexEncodedMethod::new(run, AccessFlags::PUBLIC | AccessFlags::STATIC, None);

    let mut call_graph = CallGraph::default();
    call_graph.breakers.insert((run, p.twice));
    let mut bodies = Bodies::default();
    bodies.bodies.insert(p.twice, twice_body(p.twice));
    let stats = inliner.perform_inlining(&mut method, &mut code, &call_graph, &mut bodies);

    assert_eq!(stats.calls_inlined, 0);
    assert_eq!(bodies.requests, vec![p.twice]);
    assert_eq!(code.inst_count(), 3);
}

#[test]
fn synchronized_target_is_not_inlined() {
    init_tracing();
    let flags = AccessFlags::PUBLIC | AccessFlags::STATIC | AccessFlags::SYNCHRONIZED;
    let p = program_with("Lp/Util;", flags);
    let inliner = Inliner::new(&p.info, InlinerConfig::default());
    let (run, mut code) = caller_of(&p, p.twice, true);
    let mut method = DexEncodedMethod::new(run, AccessFlags::PUBLIC | AccessFlags::STATIC, None);

    let mut bodies = Bodies::default();
    bodies.bodies.insert(p.twice, twice_body(p.twice));
    let stats = inliner.perform_inlining(&mut method, &mut code, &CallGraph::default(), &mut bodies);

    assert_eq!(stats.calls_inlined, 0);
    assert!(bodies.requests.is_empty());
    assert_eq!(code.inst_count(), 3);
}

#[test]
fn package_private_target_in_other_package_is_not_inlined() {
    init_tracing();
    let p = program_with("Lq/Util;", AccessFlags::STATIC);
    let inliner = Inliner::new(&p.info, InlinerConfig::default());
    let (run, mut code) = caller_of(&p, p.twice, true);
    let caller_def = DexEncodedMethod::new(run, AccessFlags::PUBLIC | AccessFlags::STATIC, None);
    let twice_def = p.info.definition_for_method(p.twice).unwrap();
    assert!(!inliner.has_inlining_access(&caller_def, twice_def));

    let mut method = caller_def.clone();
    let mut bodies = Bodies::default();
    bodies.bodies.insert(p.twice, twice_body(p.twice));
    let stats = inliner.perform_inlining(&mut method, &mut code, &CallGraph::default(), &mut bodies);

    assert_eq!(stats.calls_inlined, 0);
    assert!(bodies.requests.is_empty());
    assert_eq!(code.inst_count(), 3);
}

#[test]
fn default_method_call_is_not_inlined() {
    init_tracing();
    let factory = Arc::new(DexItemFactory::new());
    let caller = factory.create_type("Lp/Caller;");
    let shape = factory.create_type("Lp/Shape;");
    let area = int_to_int(&factory, shape, "area");
    let mut area_def = DexEncodedMethod::new(area, AccessFlags::PUBLIC, Some(small_body()));
    area_def.mark_processed(Constraint::Always);

    let interface_flags = AccessFlags::PUBLIC | AccessFlags::INTERFACE | AccessFlags::ABSTRACT;
    let interface = DexClass::new(
        &factory,
        ClassKind::Program,
        shape,
        interface_flags,
        Some(factory.object_type),
        vec![],
    )
    .unwrap()
    .with_members(vec![], vec![], vec![], vec![area_def]);
    let mut builder = DexApplication::builder(factory.clone());
    builder.add_class(interface);
    builder.add_class(program_class(&factory, caller));
    let info = AppInfo::new(builder.build());

    let run = int_to_int(&factory, caller, "run");
    let mut ir = builder_for(run);
    let entry = ir.append_block();
    ir.switch_to_block(entry);
    let this = ir.add_argument(0, MoveType::Object, None, true);
    let arg = ir.add_argument(1, MoveType::Single, None, false);
    let call = InstKind::Invoke {
        ty: InvokeType::Interface,
        method: area,
    };
    let result = ir.add_inst(call, &[this, arg], Some(MoveType::Single));
    let result = ir.code().inst_result(result).unwrap();
    ir.add_inst(InstKind::Return(Some(MoveType::Single)), &[result], None);
    ir.set_normal_exit(entry);
    let mut code = ir.build().unwrap();

    let inliner = Inliner::new(&info, InlinerConfig::default());
    let mut method = DexEncodedMethod::new(run, AccessFlags::PUBLIC, None);
    let mut bodies = Bodies::default();
    bodies.bodies.insert(area, twice_body(area));
    let stats = inliner.perform_inlining(&mut method, &mut code, &CallGraph::default(), &mut bodies);

    assert_eq!(stats.calls_inlined, 0);
    assert!(bodies.requests.is_empty());
    assert_eq!(code.inst_count(), 4);
}
