pub mod dead_code;
pub mod inliner;
pub mod inlining_oracle;

pub use dead_code::DeadCodeRemover;
pub use inliner::{
    CallGraphInfo, Constraint, InlineStats, Inliner, InlinerConfig, InlineeProvider,
};
pub use inlining_oracle::{InlineAction, InliningOracle, Reason};
