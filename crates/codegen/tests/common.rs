#![allow(dead_code)]

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};

use dexopt_codegen::optim::{CallGraphInfo, InlineeProvider};
use dexopt_ir::{
    AccessFlags, ClassKind, DexClass, DexEncodedMethod, DexItemFactory, DexMethod, DexType,
    IrBuilder, IrCode,
};
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn program_class(factory: &Arc<DexItemFactory>, ty: DexType) -> DexClass {
    DexClass::new(
        factory,
        ClassKind::Program,
        ty,
        AccessFlags::PUBLIC,
        Some(factory.object_type),
        vec![],
    )
    .unwrap()
}

/// `(I)I` method `name` on `holder`.
pub fn int_to_int(factory: &DexItemFactory, holder: DexType, name: &str) -> DexMethod {
    let proto = factory.create_proto(factory.int_type, &[factory.int_type]);
    factory.create_method(holder, proto, name)
}

pub fn builder_for(method: DexMethod) -> IrBuilder {
    IrBuilder::new(method)
}

/// Call graph without breakers in which every method has many callers.
#[derive(Default)]
pub struct CallGraph {
    pub single: FxHashSet<DexMethod>,
    pub breakers: FxHashSet<(DexMethod, DexMethod)>,
}

impl CallGraphInfo for CallGraph {
    fn is_breaker(&self, caller: DexMethod, callee: DexMethod) -> bool {
        self.breakers.contains(&(caller, callee))
    }

    fn has_single_call_site(&self, method: DexMethod) -> bool {
        self.single.contains(&method)
    }

    fn has_double_call_site(&self, _: DexMethod) -> bool {
        false
    }
}

/// Hands out copies of prebuilt bodies.
#[derive(Default)]
pub struct Bodies {
    pub bodies: FxHashMap<DexMethod, IrCode>,
    pub requests: Vec<DexMethod>,
}

impl InlineeProvider for Bodies {
    fn build_ir(&mut self, target: &DexEncodedMethod) -> Option<IrCode> {
        self.requests.push(target.method);
        self.bodies.get(&target.method).cloned()
    }
}
