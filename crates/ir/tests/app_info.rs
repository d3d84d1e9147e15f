mod common;

use std::sync::Arc;

use common::*;
use dexopt_ir::{
    AccessFlags, AppInfo, CompilationError, DexApplication, DexClass, DexItemFactory, InvokeType,
};
use rayon::prelude::*;

fn app_info(factory: &Arc<DexItemFactory>, classes: Vec<DexClass>) -> AppInfo {
    let mut builder = DexApplication::builder(factory.clone());
    builder.add_classes(classes);
    AppInfo::new(builder.build())
}

#[test]
fn override_in_subclass() {
    init_tracing();
    let factory = Arc::new(DexItemFactory::new());
    let sup = factory.create_type("La/Super;");
    let sub = factory.create_type("La/Sub;");
    let super_m = void_method(&factory, sup, "m");
    let sub_m = void_method(&factory, sub, "m");

    let info = app_info(
        &factory,
        vec![
            program_class(&factory, sup, AccessFlags::PUBLIC, Some(factory.object_type), vec![])
                .with_members(vec![], vec![], vec![], vec![with_body(super_m, AccessFlags::PUBLIC)]),
            program_class(&factory, sub, AccessFlags::PUBLIC, Some(sup), vec![])
                .with_members(vec![], vec![], vec![], vec![with_body(sub_m, AccessFlags::PUBLIC)]),
        ],
    );

    let target = info.lookup_virtual_target(sub, super_m).unwrap().unwrap();
    assert_eq!(target.method, sub_m);
    let target = info.lookup(InvokeType::Virtual, super_m).unwrap().unwrap();
    assert_eq!(target.method, super_m);

    // Not declared anywhere.
    let sup_only = void_method(&factory, sup, "other");
    assert!(info.lookup_virtual_target(sub, sup_only).unwrap().is_none());
    assert!(info.is_subtype(sub, sup));
    assert!(!info.is_subtype(sup, sub));
}

#[test]
fn default_method_from_interface() {
    init_tracing();
    let factory = Arc::new(DexItemFactory::new());
    let iface = factory.create_type("La/I;");
    let class = factory.create_type("La/C;");
    let i_m = void_method(&factory, iface, "m");
    let i_n = void_method(&factory, iface, "n");
    let c_m = void_method(&factory, class, "m");
    let c_n = void_method(&factory, class, "n");

    let info = app_info(
        &factory,
        vec![
            interface(&factory, iface, vec![]).with_members(
                vec![],
                vec![],
                vec![],
                vec![with_body(i_m, AccessFlags::PUBLIC), abstract_method(i_n)],
            ),
            program_class(&factory, class, AccessFlags::PUBLIC, Some(factory.object_type), vec![iface]),
        ],
    );

    let target = info.lookup_virtual_target(class, c_m).unwrap().unwrap();
    assert_eq!(target.method, i_m);

    // Abstract interface methods are definitions but not targets.
    assert!(info.lookup_virtual_target(class, c_n).unwrap().is_none());
    let definition = info.lookup_virtual_definition(class, c_n).unwrap().unwrap();
    assert_eq!(definition.method, i_n);
    assert_eq!(
        info.lookup(InvokeType::Interface, i_n).unwrap().map(|m| m.method),
        Some(i_n)
    );
}

#[test]
fn duplicate_default_methods() {
    init_tracing();
    let factory = Arc::new(DexItemFactory::new());
    let i = factory.create_type("La/I;");
    let j = factory.create_type("La/J;");
    let class = factory.create_type("La/C;");
    let i_m = void_method(&factory, i, "m");
    let j_m = void_method(&factory, j, "m");

    let info = app_info(
        &factory,
        vec![
            interface(&factory, i, vec![])
                .with_members(vec![], vec![], vec![], vec![with_body(i_m, AccessFlags::PUBLIC)]),
            interface(&factory, j, vec![])
                .with_members(vec![], vec![], vec![], vec![with_body(j_m, AccessFlags::PUBLIC)]),
            program_class(&factory, class, AccessFlags::PUBLIC, Some(factory.object_type), vec![i, j]),
        ],
    );

    let err = info
        .lookup_virtual_target(class, void_method(&factory, class, "m"))
        .unwrap_err();
    assert_eq!(
        err,
        CompilationError::DuplicateDefaultMethods {
            method: "a.I.m".into(),
            first: "a.I".into(),
            second: "a.J".into(),
        }
    );
    assert_eq!(
        err.to_string(),
        "Duplicate default methods named a.I.m are inherited from the types a.I and a.J"
    );
}

#[test]
fn diamond_reaches_one_method() {
    let factory = Arc::new(DexItemFactory::new());
    let top = factory.create_type("La/Top;");
    let left = factory.create_type("La/Left;");
    let right = factory.create_type("La/Right;");
    let class = factory.create_type("La/C;");
    let top_m = void_method(&factory, top, "m");

    let info = app_info(
        &factory,
        vec![
            interface(&factory, top, vec![])
                .with_members(vec![], vec![], vec![], vec![with_body(top_m, AccessFlags::PUBLIC)]),
            interface(&factory, left, vec![top]),
            interface(&factory, right, vec![top]),
            program_class(
                &factory,
                class,
                AccessFlags::PUBLIC,
                Some(factory.object_type),
                vec![left, right],
            ),
        ],
    );

    let target = info
        .lookup_virtual_target(class, void_method(&factory, class, "m"))
        .unwrap()
        .unwrap();
    assert_eq!(target.method, top_m);

    let supers: Vec<_> = info.super_type_classes(class).iter().map(|c| c.ty).collect();
    assert_eq!(supers, vec![class, left, right, top]);
}

#[test]
fn cyclic_interfaces_terminate() {
    let factory = Arc::new(DexItemFactory::new());
    let i = factory.create_type("La/I;");
    let j = factory.create_type("La/J;");
    let class = factory.create_type("La/C;");

    let info = app_info(
        &factory,
        vec![
            interface(&factory, i, vec![j]),
            interface(&factory, j, vec![i]),
            program_class(&factory, class, AccessFlags::PUBLIC, Some(factory.object_type), vec![i]),
        ],
    );
    let m = void_method(&factory, class, "m");
    assert!(info.lookup_virtual_definition(class, m).unwrap().is_none());
    assert!(info.is_subtype(class, j));
}

#[test]
fn static_and_direct_targets() {
    let factory = Arc::new(DexItemFactory::new());
    let sup = factory.create_type("La/Super;");
    let sub = factory.create_type("La/Sub;");
    let s = void_method(&factory, sup, "s");
    let init = void_method(&factory, sup, "<init>");

    let info = app_info(
        &factory,
        vec![
            program_class(&factory, sup, AccessFlags::PUBLIC, Some(factory.object_type), vec![])
                .with_members(
                    vec![],
                    vec![],
                    vec![
                        with_body(s, AccessFlags::PUBLIC | AccessFlags::STATIC),
                        with_body(init, AccessFlags::PUBLIC | AccessFlags::CONSTRUCTOR),
                    ],
                    vec![],
                ),
            program_class(&factory, sub, AccessFlags::PUBLIC, Some(sup), vec![]),
        ],
    );

    let sub_s = void_method(&factory, sub, "s");
    assert_eq!(info.lookup_static_target(sub_s).map(|m| m.method), Some(s));
    assert!(info.lookup_direct_target(sub_s).is_none());
    assert_eq!(
        info.lookup(InvokeType::Direct, init).unwrap().map(|m| m.method),
        Some(init)
    );
    assert!(info.lookup(InvokeType::Static, init).unwrap().is_none());
    assert!(info.lookup(InvokeType::Polymorphic, s).unwrap().is_none());
}

#[test]
fn field_lookups() {
    let factory = Arc::new(DexItemFactory::new());
    let iface = factory.create_type("La/I;");
    let sup = factory.create_type("La/Super;");
    let sub = factory.create_type("La/Sub;");
    let constant = factory.create_field(iface, factory.int_type, "CONSTANT");
    let value = factory.create_field(sup, factory.int_type, "value");

    let info = app_info(
        &factory,
        vec![
            interface(&factory, iface, vec![]).with_members(
                vec![dexopt_ir::DexEncodedField::new(
                    constant,
                    AccessFlags::PUBLIC | AccessFlags::STATIC | AccessFlags::FINAL,
                )],
                vec![],
                vec![],
                vec![],
            ),
            program_class(&factory, sup, AccessFlags::PUBLIC, Some(factory.object_type), vec![])
                .with_members(
                    vec![],
                    vec![dexopt_ir::DexEncodedField::new(value, AccessFlags::PRIVATE)],
                    vec![],
                    vec![],
                ),
            program_class(&factory, sub, AccessFlags::PUBLIC, Some(sup), vec![iface]),
        ],
    );

    let sub_value = factory.create_field(sub, factory.int_type, "value");
    assert_eq!(info.lookup_instance_target(sub, sub_value).map(|f| f.field), Some(value));
    let sub_constant = factory.create_field(sub, factory.int_type, "CONSTANT");
    assert_eq!(
        info.lookup_static_target_field(sub, sub_constant).map(|f| f.field),
        Some(constant)
    );
    assert!(info.lookup_instance_target(sub, sub_constant).is_none());
}

#[test]
fn array_holders_do_not_resolve() {
    let factory = Arc::new(DexItemFactory::new());
    let array = factory.create_type("[I");
    let info = app_info(&factory, vec![]);
    let clone = void_method(&factory, array, "clone");
    assert!(info.lookup(InvokeType::Virtual, clone).unwrap().is_none());
}

#[test]
fn concurrent_definitions() {
    let factory = Arc::new(DexItemFactory::new());
    let classes: Vec<_> = (0..16)
        .map(|idx| {
            let ty = factory.create_type(&format!("La/C{idx};"));
            let m = void_method(&factory, ty, "m");
            program_class(&factory, ty, AccessFlags::PUBLIC, Some(factory.object_type), vec![])
                .with_members(vec![], vec![], vec![], vec![with_body(m, AccessFlags::PUBLIC)])
        })
        .collect();
    let methods: Vec<_> = classes
        .iter()
        .flat_map(|class| class.virtual_methods().iter().map(|m| m.method))
        .collect();
    let info = app_info(&factory, classes);

    let found = (0..64)
        .into_par_iter()
        .flat_map(|_| methods.par_iter())
        .filter(|&&m| info.definition_for_method(m).map(|d| d.method) == Some(m))
        .count();
    assert_eq!(found, 64 * methods.len());
}
