pub mod cfg_edit;
pub mod domtree;
pub mod optim;

pub use cfg_edit::{inline_invoke, split_block};
pub use domtree::DomTree;
