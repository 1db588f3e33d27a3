use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::dimensions::Dimensions;
use crate::error::{GraphError, Result};
use crate::hash::StructuralHash;
use crate::operation::{OperationId, Registry};
use crate::value::Value;

use super::graph_impl::Graph;
use super::types::NodeId;

#[derive(Clone, Debug)]
struct DetachedNode {
    operation: OperationId,
    dims: Dimensions,
    hash: StructuralHash,
    arity: usize,
    value: Option<Value>,
    /// Positions in `Subtree::nodes`
    inputs: Vec<usize>,
}

/// A node and the part of its graph it still depends on, lifted out of the
/// graph so it can be re-inserted elsewhere without holding both graphs.
///
/// Traversal stops at nodes that already carry a value.
#[derive(Clone, Debug)]
pub struct Subtree {
    registry: Arc<Registry>,
    /// In execution order; the root is last
    nodes: Vec<DetachedNode>,
}

impl Subtree {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn root_hash(&self) -> Option<StructuralHash> {
        self.nodes.last().map(|n| n.hash)
    }
}

impl Graph {
    /// Captures `root` and its unvalued ancestry.
    pub fn snapshot(&self, root: NodeId) -> Result<Subtree> {
        self.live_node(root)?;

        let mut needed = vec![root];
        let mut seen = HashSet::from([root]);
        let mut cursor = 0;
        while cursor < needed.len() {
            let id = needed[cursor];
            cursor += 1;
            let node = self.live_node(id)?;
            if node.has_value() {
                continue;
            }
            for &input in self.edges.inputs(&node.edges) {
                if seen.insert(input) {
                    needed.push(input);
                }
            }
        }
        needed.sort_unstable();

        let position: HashMap<NodeId, usize> =
            needed.iter().enumerate().map(|(i, &id)| (id, i)).collect();
        let mut nodes = Vec::with_capacity(needed.len());
        for &id in &needed {
            let node = self.live_node(id)?;
            let inputs = if node.has_value() {
                Vec::new()
            } else {
                self.edges
                    .inputs(&node.edges)
                    .iter()
                    .map(|input| position[input])
                    .collect()
            };
            nodes.push(DetachedNode {
                operation: node.operation,
                dims: node.dims,
                hash: node.hash,
                arity: node.arity(),
                value: node.value.clone(),
                inputs,
            });
        }

        Ok(Subtree {
            registry: Arc::clone(&self.registry),
            nodes,
        })
    }

    /// Inserts a captured subtree, reusing every node this graph already has
    /// under the same hash. Returns the id of the subtree's root.
    pub fn insert_subtree(&mut self, subtree: &Subtree) -> Result<NodeId> {
        if !Arc::ptr_eq(&self.registry, &subtree.registry) {
            return Err(GraphError::RegistryMismatch);
        }

        let mut placed: Vec<NodeId> = Vec::with_capacity(subtree.nodes.len());
        for node in &subtree.nodes {
            let inputs: Vec<NodeId> = node.inputs.iter().map(|&i| placed[i]).collect();
            let id = self.intern(
                node.operation,
                node.dims,
                node.hash,
                node.arity,
                &inputs,
                node.value.clone(),
            )?;
            placed.push(id);
        }
        placed.last().copied().ok_or(GraphError::InvalidNode(NodeId::INVALID))
    }

    /// Copies `node` of `source`, with what it depends on, into this graph.
    /// The source is left untouched.
    pub fn copy_node(&mut self, source: &Graph, node: NodeId) -> Result<NodeId> {
        if !Arc::ptr_eq(&self.registry, &source.registry) {
            return Err(GraphError::RegistryMismatch);
        }
        let subtree = source.snapshot(node)?;
        let copied = self.insert_subtree(&subtree)?;
        log::debug!("copied {} ({} nodes) to {}", node, subtree.len(), copied);
        Ok(copied)
    }

    /// Moves a node nobody else in `source` uses into this graph, then
    /// compacts `source`, which drops the original unless it is still
    /// referenced. The copy becomes an rvalue at the next
    /// [`Graph::optimize`] once it has a single consumer and no reference.
    pub fn move_node(&mut self, source: &mut Graph, node: NodeId) -> Result<NodeId> {
        if source.live_node(node)?.output_count() > 0 {
            return Err(GraphError::NodeHasOutputs(node));
        }
        let moved = self.copy_node(source, node)?;
        let removed = source.clean_graph()?;
        log::debug!("moved {} to {}, source dropped {} nodes", node, moved, removed);
        Ok(moved)
    }

    /// A structural copy of this graph without references or grouping.
    pub fn duplicate(&self) -> Graph {
        let mut nodes = self.nodes.clone();
        for node in &mut nodes {
            let mut flags = node.flags;
            flags.set_external_ref(false);
            flags.set_in_subgroup(false);
            node.flags = flags;
        }
        let mut copy = Graph::with_config(Arc::clone(&self.registry), self.config.clone());
        copy.nodes = nodes;
        copy.edges = self.edges.clone();
        copy.hash_to_node = self.hash_to_node.clone();
        copy
    }
}
