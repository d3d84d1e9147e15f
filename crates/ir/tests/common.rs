#![allow(dead_code)]

use std::sync::Arc;

use dexopt_ir::{
    AccessFlags, ClassKind, DexClass, DexCode, DexEncodedMethod, DexItemFactory, DexMethod,
    DexType,
};
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// `()V` method `name` on `holder`.
pub fn void_method(factory: &DexItemFactory, holder: DexType, name: &str) -> DexMethod {
    let proto = factory.create_proto(factory.void_type, &[]);
    factory.create_method(holder, proto, name)
}

/// An encoded method whose body is a bare `return-void`.
pub fn with_body(method: DexMethod, flags: AccessFlags) -> DexEncodedMethod {
    DexEncodedMethod::new(method, flags, Some(DexCode::new(1, 1, 0, vec![0x000e])))
}

pub fn abstract_method(method: DexMethod) -> DexEncodedMethod {
    DexEncodedMethod::new(method, AccessFlags::PUBLIC | AccessFlags::ABSTRACT, None)
}

pub fn program_class(
    factory: &Arc<DexItemFactory>,
    ty: DexType,
    flags: AccessFlags,
    super_type: Option<DexType>,
    interfaces: Vec<DexType>,
) -> DexClass {
    DexClass::new(factory, ClassKind::Program, ty, flags, super_type, interfaces).unwrap()
}

pub fn interface(factory: &Arc<DexItemFactory>, ty: DexType, interfaces: Vec<DexType>) -> DexClass {
    program_class(
        factory,
        ty,
        AccessFlags::PUBLIC | AccessFlags::INTERFACE | AccessFlags::ABSTRACT,
        Some(factory.object_type),
        interfaces,
    )
}
