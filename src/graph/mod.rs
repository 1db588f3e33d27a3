mod compaction;
mod dot;
mod edges;
mod graph_impl;
mod grouping;
mod node;
mod process;
mod references;
mod reorder;
mod subgroup;
mod transfer;
pub mod types;

#[cfg(test)]
mod tests;

pub use edges::{EdgeArena, EdgeSpan};
pub use graph_impl::Graph;
pub use node::{Node, NodeFlags, NodeRef};
pub use references::{NodeSlot, ReferenceKey, References, RewriteListener};
pub use subgroup::Subgroup;
pub use transfer::Subtree;
pub use types::{GraphConfig, NodeId, DEFAULT_OUTPUT_CAPACITY, USER_FLAG_BITS};
