use std::ops::Deref;

use crate::dimensions::Dimensions;
use crate::hash::StructuralHash;
use crate::operation::OperationId;
use crate::value::Value;

use super::edges::{EdgeArena, EdgeSpan};
use super::types::{NodeId, USER_FLAG_BITS};

/// Status bits of a node: three engine flags followed by seven user bits.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct NodeFlags(u16);

impl NodeFlags {
    const RVALUE: u16 = 1 << 0;
    const EXTERNAL_REF: u16 = 1 << 1;
    const IN_SUBGROUP: u16 = 1 << 2;
    const USER_SHIFT: u8 = 3;

    /// Single consumer and no external holder; the value may be dropped once used.
    pub fn is_rvalue(&self) -> bool {
        self.0 & Self::RVALUE != 0
    }

    pub fn has_external_ref(&self) -> bool {
        self.0 & Self::EXTERNAL_REF != 0
    }

    pub fn in_subgroup(&self) -> bool {
        self.0 & Self::IN_SUBGROUP != 0
    }

    pub fn set_rvalue(&mut self, on: bool) {
        self.set(Self::RVALUE, on);
    }

    pub fn set_external_ref(&mut self, on: bool) {
        self.set(Self::EXTERNAL_REF, on);
    }

    pub fn set_in_subgroup(&mut self, on: bool) {
        self.set(Self::IN_SUBGROUP, on);
    }

    /// Returns `false` for bits outside `0..USER_FLAG_BITS`.
    pub fn user_bit(&self, bit: u8) -> bool {
        bit < USER_FLAG_BITS && self.0 & (1 << (bit + Self::USER_SHIFT)) != 0
    }

    /// Bits outside `0..USER_FLAG_BITS` are ignored.
    pub fn set_user_bit(&mut self, bit: u8, on: bool) {
        if bit < USER_FLAG_BITS {
            self.set(1 << (bit + Self::USER_SHIFT), on);
        }
    }

    fn set(&mut self, mask: u16, on: bool) {
        if on {
            self.0 |= mask;
        } else {
            self.0 &= !mask;
        }
    }
}

/// One vertex of the graph: an operation applied to earlier nodes.
///
/// Edges live in the graph's [`EdgeArena`]; use [`NodeRef`] to read them.
#[derive(Clone, Debug)]
pub struct Node {
    pub(crate) operation: OperationId,
    pub(crate) dims: Dimensions,
    pub(crate) hash: StructuralHash,
    /// Input count the node was built with, kept after its inputs are severed
    pub(crate) arity: u16,
    pub(crate) value: Option<Value>,
    pub(crate) edges: EdgeSpan,
    pub(crate) flags: NodeFlags,
}

impl Node {
    pub(crate) fn new(
        operation: OperationId,
        dims: Dimensions,
        hash: StructuralHash,
        arity: u16,
        value: Option<Value>,
        edges: EdgeSpan,
    ) -> Self {
        Self {
            operation,
            dims,
            hash,
            arity,
            value,
            edges,
            flags: NodeFlags::default(),
        }
    }

    pub fn operation(&self) -> OperationId {
        self.operation
    }

    pub fn dims(&self) -> &Dimensions {
        &self.dims
    }

    pub fn hash(&self) -> StructuralHash {
        self.hash
    }

    pub fn arity(&self) -> usize {
        self.arity as usize
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }

    pub fn flags(&self) -> NodeFlags {
        self.flags
    }

    /// A removed node waiting for the next compaction.
    pub fn is_cleared(&self) -> bool {
        self.operation.is_none()
    }

    pub fn input_count(&self) -> usize {
        self.edges.input_count()
    }

    pub fn output_count(&self) -> usize {
        self.edges.output_count()
    }
}

/// Read-only view of a node together with its edges.
#[derive(Copy, Clone)]
pub struct NodeRef<'a> {
    id: NodeId,
    node: &'a Node,
    edges: &'a EdgeArena,
}

impl<'a> NodeRef<'a> {
    pub(crate) fn new(id: NodeId, node: &'a Node, edges: &'a EdgeArena) -> Self {
        Self { id, node, edges }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn inputs(&self) -> &'a [NodeId] {
        self.edges.inputs(&self.node.edges)
    }

    pub fn outputs(&self) -> &'a [NodeId] {
        self.edges.outputs(&self.node.edges)
    }

    pub fn input(&self, index: usize) -> Option<NodeId> {
        self.inputs().get(index).copied()
    }

    pub fn output(&self, index: usize) -> Option<NodeId> {
        self.outputs().get(index).copied()
    }
}

impl Deref for NodeRef<'_> {
    type Target = Node;

    fn deref(&self) -> &Node {
        self.node
    }
}
