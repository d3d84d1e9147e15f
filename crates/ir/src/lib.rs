pub mod access;
pub mod app_info;
pub mod application;
pub mod block;
pub mod builder;
pub mod class;
pub mod code;
pub mod cursor;
pub mod debug;
pub mod dfg;
pub mod error;
pub mod factory;
pub mod indexed;
pub mod inst;
pub mod ir_writer;
pub mod layout;
pub mod leb128;
pub mod offset;
pub mod publicizer;
pub mod regalloc;
pub mod value;

pub use access::AccessFlags;
pub use app_info::AppInfo;
pub use application::{DexApplication, DexApplicationBuilder};
pub use block::{BlockData, BlockId, CatchGuard, CatchHandlers};
pub use builder::IrBuilder;
pub use class::{
    ClassKind, CompilationState, Constraint, DexClass, DexCode, DexEncodedField,
    DexEncodedMethod, OptimizationInfo,
};
pub use code::IrCode;
pub use cursor::InstCursor;
pub use dfg::DataFlowGraph;
pub use error::{CompilationError, CompilationResult};
pub use factory::{
    DexField, DexItemFactory, DexMethod, DexProto, DexString, DexType, IndexedItemRef,
};
pub use inst::{InstData, InstId, InstKind, InvokeType};
pub use layout::Layout;
pub use offset::ObjectToOffsetMapping;
pub use regalloc::RegisterAllocator;
pub use value::{DebugLocal, DebugLocalInfo, MoveType, ValueData, ValueId};
