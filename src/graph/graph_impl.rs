use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Weak};

use crate::dimensions::Dimensions;
use crate::error::{GraphError, Result};
use crate::hash::StructuralHash;
use crate::operation::{Operation, OperationId, ProcessingStyle, Registry};
use crate::value::Value;

use super::edges::EdgeArena;
use super::node::{Node, NodeRef};
use super::references::{ReferenceKey, References, RewriteListener};
use super::subgroup::Subgroup;
use super::types::{GraphConfig, NodeId};

/// A lazily evaluated DAG of operations.
///
/// Nodes are kept in topological order at all times: every input of a node
/// has a smaller id and every output a larger one, so the table itself is an
/// execution order.
pub struct Graph {
    pub(crate) registry: Arc<Registry>,
    pub(crate) config: GraphConfig,
    pub(crate) nodes: Vec<Node>,
    pub(crate) edges: EdgeArena,
    pub(crate) hash_to_node: HashMap<StructuralHash, NodeId>,
    pub(crate) references: References,
    pub(crate) subgroups: Vec<Subgroup>,
    pub(crate) node_to_subgroup: HashMap<NodeId, usize>,
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("nodes", &self.nodes.len())
            .field("edge_slots", &self.edges.len())
            .field("references", &self.references.len())
            .field("subgroups", &self.subgroups.len())
            .finish()
    }
}

impl Graph {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self::with_config(registry, GraphConfig::default())
    }

    pub fn with_config(registry: Arc<Registry>, config: GraphConfig) -> Self {
        Self {
            registry,
            config,
            nodes: Vec::new(),
            edges: EdgeArena::new(),
            hash_to_node: HashMap::new(),
            references: References::new(),
            subgroups: Vec::new(),
            node_to_subgroup: HashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// Number of slots in the node table, cleared placeholders included.
    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Result<NodeRef<'_>> {
        let node = self.nodes.get(id.index()).ok_or(GraphError::InvalidNode(id))?;
        Ok(NodeRef::new(id, node, &self.edges))
    }

    pub fn iter(&self) -> impl Iterator<Item = NodeRef<'_>> {
        self.nodes
            .iter()
            .enumerate()
            .map(move |(i, node)| NodeRef::new(NodeId::from(i), node, &self.edges))
    }

    pub fn inputs(&self, id: NodeId) -> Result<&[NodeId]> {
        let node = self.nodes.get(id.index()).ok_or(GraphError::InvalidNode(id))?;
        Ok(self.edges.inputs(&node.edges))
    }

    pub fn outputs(&self, id: NodeId) -> Result<&[NodeId]> {
        let node = self.nodes.get(id.index()).ok_or(GraphError::InvalidNode(id))?;
        Ok(self.edges.outputs(&node.edges))
    }

    pub fn operation_of(&self, id: NodeId) -> Result<&Arc<Operation>> {
        let node = self.live_node(id)?;
        self.registry.get(node.operation)
    }

    pub fn find_hash(&self, hash: StructuralHash) -> Option<NodeId> {
        self.hash_to_node.get(&hash).copied()
    }

    /// Builds (or finds) the node applying `name` to `inputs`.
    pub fn add_node(&mut self, name: &str, dims: Dimensions, inputs: &[NodeId]) -> Result<NodeId> {
        let op_id = self.registry.find(name)?;
        let op = Arc::clone(self.registry.get(op_id)?);

        if inputs.len() != op.arity() {
            return Err(GraphError::ArityMismatch {
                operation: op.name().to_string(),
                expected: op.arity(),
                got: inputs.len(),
            });
        }

        let mut input_hashes = Vec::with_capacity(inputs.len());
        for (index, (&input, &expected)) in inputs.iter().zip(op.input_types()).enumerate() {
            let input_node = self.live_node(input)?;
            let got = self.registry.get(input_node.operation)?.result_type();
            if got != expected {
                return Err(GraphError::InputTypeMismatch {
                    operation: op.name().to_string(),
                    index,
                    expected,
                    got,
                });
            }
            input_hashes.push(input_node.hash);
        }

        let hash = StructuralHash::of_node(op_id, &dims, input_hashes);
        self.intern(op_id, dims, hash, inputs.len(), inputs, None)
    }

    /// Lifts `value` into the graph as a constant node.
    pub fn add_constant(&mut self, value: Value) -> Result<NodeId> {
        let op_id = self.registry.find_constant(value.value_type())?;
        let dims = value.dimensions();
        let hash = StructuralHash::of_constant(op_id, &dims, &value);
        self.intern(op_id, dims, hash, 0, &[], Some(value))
    }

    /// Returns the node already registered under `hash`, or appends a new one.
    ///
    /// `arity` is the input count the computation was built with; it differs
    /// from `inputs.len()` for a computed node whose inputs were cut.
    pub(crate) fn intern(
        &mut self,
        operation: OperationId,
        dims: Dimensions,
        hash: StructuralHash,
        arity: usize,
        inputs: &[NodeId],
        value: Option<Value>,
    ) -> Result<NodeId> {
        if let Some(&existing) = self.hash_to_node.get(&hash) {
            let node = &self.nodes[existing.index()];
            if node.operation != operation || node.dims != dims || node.arity() != arity {
                return Err(GraphError::HashCollision {
                    hash,
                    existing,
                    existing_dims: node.dims,
                    requested_dims: dims,
                });
            }
            log::trace!("interned {} for {:?}", existing, hash);
            if node.value.is_none() && value.is_some() {
                self.nodes[existing.index()].value = value;
            }
            return Ok(existing);
        }

        for &input in inputs {
            self.live_node(input)?;
        }

        let id = NodeId::from(self.nodes.len());
        let span = self.edges.allocate(inputs, self.config.output_capacity);
        self.nodes.push(Node::new(
            operation,
            dims,
            hash,
            arity as u16,
            value,
            span,
        ));
        for &input in inputs {
            self.add_output(input, id);
        }
        self.hash_to_node.insert(hash, id);
        log::trace!("created {} ({:?}) with inputs {:?}", id, operation, inputs);
        Ok(id)
    }

    /// Returns the stored value, evaluating the node first if it has none.
    pub fn get_value(&mut self, id: NodeId) -> Result<Value> {
        if let Some(value) = self.live_node(id)?.value.clone() {
            return Ok(value);
        }
        self.process(id)
    }

    pub fn tag_rvalue(&mut self, id: NodeId) -> Result<()> {
        self.live_node(id)?;
        self.nodes[id.index()].flags.set_rvalue(true);
        Ok(())
    }

    pub fn set_user_bit(&mut self, id: NodeId, bit: u8, on: bool) -> Result<()> {
        self.live_node(id)?;
        self.nodes[id.index()].flags.set_user_bit(bit, on);
        Ok(())
    }

    /// Turns an unused node into a cleared placeholder; the next compaction
    /// drops it.
    pub fn remove_node(&mut self, id: NodeId) -> Result<()> {
        let node = self.live_node(id)?;
        if node.output_count() > 0 {
            return Err(GraphError::NodeHasOutputs(id));
        }
        if node.flags.has_external_ref() {
            return Err(GraphError::ReferencedNode(id));
        }
        let hash = node.hash;

        self.sever_inputs(id)?;
        if self.hash_to_node.get(&hash) == Some(&id) {
            self.hash_to_node.remove(&hash);
        }
        if let Some(group) = self.node_to_subgroup.remove(&id) {
            self.subgroups[group].members.retain(|&m| m != id);
        }

        let node = &mut self.nodes[id.index()];
        self.edges.release(&mut node.edges);
        node.operation = OperationId::NONE;
        node.value = None;
        node.flags = Default::default();
        log::debug!("cleared {}", id);
        Ok(())
    }

    /// Holds `id` alive across compaction. The listener, if any, is told
    /// about every id change.
    pub fn reference(
        &mut self,
        id: NodeId,
        listener: Option<Weak<dyn RewriteListener>>,
    ) -> Result<ReferenceKey> {
        self.live_node(id)?;
        let key = self.references.insert(id, listener);
        self.nodes[id.index()].flags.set_external_ref(true);
        Ok(key)
    }

    pub fn unreference(&mut self, key: ReferenceKey) -> Result<()> {
        let node = self.references.remove(key)?;
        if self.references.count(node) == 0 {
            if let Some(node) = self.nodes.get_mut(node.index()) {
                node.flags.set_external_ref(false);
            }
        }
        Ok(())
    }

    pub fn reference_count(&self, id: NodeId) -> usize {
        self.references.count(id)
    }

    /// Current id of the node a reference is held on.
    pub fn referenced_node(&self, key: ReferenceKey) -> Option<NodeId> {
        self.references.node_of(key)
    }

    /// True when `ancestor` is reachable from `node` through input edges.
    pub fn has_ancestor(&self, node: NodeId, ancestor: NodeId) -> Result<bool> {
        let target = HashSet::from([ancestor]);
        self.has_ancestor_in(node, &target)
    }

    /// True when any node of `ancestors` is reachable from `node` through
    /// input edges. `node` itself does not count.
    pub fn has_ancestor_in(&self, node: NodeId, ancestors: &HashSet<NodeId>) -> Result<bool> {
        self.live_node(node)?;
        let Some(&lowest) = ancestors.iter().min() else {
            return Ok(false);
        };

        let mut visited = vec![false; self.nodes.len()];
        let mut worklist = vec![node];
        while let Some(current) = worklist.pop() {
            for &input in self.edges.inputs(&self.nodes[current.index()].edges) {
                if ancestors.contains(&input) {
                    return Ok(true);
                }
                // inputs only ever point at smaller ids
                if input > lowest && !visited[input.index()] {
                    visited[input.index()] = true;
                    worklist.push(input);
                }
            }
        }
        Ok(false)
    }

    /// Checks the structural invariants: topological order, symmetric edges,
    /// hash table and flag consistency.
    pub fn validate(&self) -> Result<()> {
        for (index, node) in self.nodes.iter().enumerate() {
            let id = NodeId::from(index);
            if node.is_cleared() {
                continue;
            }
            for &input in self.edges.inputs(&node.edges) {
                if input >= id {
                    return Err(GraphError::InvalidNode(input));
                }
                let producer = self.live_node(input)?;
                if !self.edges.outputs(&producer.edges).contains(&id) {
                    return Err(GraphError::MissingOutputEdge {
                        node: input,
                        output: id,
                    });
                }
            }
            for &output in self.edges.outputs(&node.edges) {
                if output <= id {
                    return Err(GraphError::InvalidNode(output));
                }
                let consumer = self.live_node(output)?;
                if !self.edges.inputs(&consumer.edges).contains(&id) {
                    return Err(GraphError::MissingOutputEdge { node: id, output });
                }
            }
            if self.hash_to_node.get(&node.hash) != Some(&id) {
                return Err(GraphError::InvalidNode(id));
            }
            if node.flags.has_external_ref() != (self.references.count(id) > 0) {
                return Err(GraphError::ReferencedNode(id));
            }
        }
        Ok(())
    }

    pub(crate) fn live_node(&self, id: NodeId) -> Result<&Node> {
        match self.nodes.get(id.index()) {
            Some(node) if !node.is_cleared() => Ok(node),
            _ => Err(GraphError::InvalidNode(id)),
        }
    }

    pub(crate) fn style_of(&self, id: NodeId) -> Result<ProcessingStyle> {
        Ok(self.operation_of(id)?.style())
    }

    pub(crate) fn add_output(&mut self, node: NodeId, output: NodeId) {
        let span = &mut self.nodes[node.index()].edges;
        self.edges.push_output(span, output);
    }

    pub(crate) fn remove_output(&mut self, node: NodeId, output: NodeId) -> Result<()> {
        let span = &mut self
            .nodes
            .get_mut(node.index())
            .ok_or(GraphError::InvalidNode(node))?
            .edges;
        if !self.edges.remove_output(span, output) {
            return Err(GraphError::MissingOutputEdge { node, output });
        }
        Ok(())
    }

    /// Disconnects `id` from all of its inputs.
    pub(crate) fn sever_inputs(&mut self, id: NodeId) -> Result<()> {
        let inputs = self.edges.inputs(&self.nodes[id.index()].edges).to_vec();
        for input in inputs {
            self.remove_output(input, id)?;
        }
        let span = &mut self.nodes[id.index()].edges;
        self.edges.clear_inputs(span);
        Ok(())
    }

    pub(crate) fn rebuild_hash_map(&mut self) {
        self.hash_to_node.clear();
        for (index, node) in self.nodes.iter().enumerate() {
            if !node.is_cleared() {
                self.hash_to_node.insert(node.hash, NodeId::from(index));
            }
        }
    }
}
