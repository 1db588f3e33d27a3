use thiserror::Error;

use crate::dimensions::Dimensions;
use crate::graph::NodeId;
use crate::hash::StructuralHash;
use crate::operation::OperationId;
use crate::value::{TypeError, ValueType};

/// Every failure the engine reports.
///
/// All of these are programmer errors. A graph that returned one should be
/// treated as invalid past its last completed compaction.
#[derive(Debug, Clone, Error)]
pub enum GraphError {
    #[error("node {0} is not a live node of this graph")]
    InvalidNode(NodeId),

    #[error("operation id {0:?} is not registered")]
    InvalidOperation(OperationId),

    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    #[error("no constant operation registered for {0}")]
    UnknownConstant(ValueType),

    #[error("operation already registered: {0}")]
    DuplicateOperation(String),

    #[error("operation id space exhausted")]
    OperationSpaceExhausted,

    #[error("operation {operation} declares {count} inputs, at most {max} are supported")]
    TooManyInputs {
        operation: String,
        count: usize,
        max: usize,
    },

    #[error("operation {operation} takes {expected} inputs, got {got}")]
    ArityMismatch {
        operation: String,
        expected: usize,
        got: usize,
    },

    #[error("input {index} of {operation}: expected {expected}, got {got}")]
    InputTypeMismatch {
        operation: String,
        index: usize,
        expected: ValueType,
        got: ValueType,
    },

    #[error("{operation} returned {got}, declared {expected}")]
    ResultTypeMismatch {
        operation: String,
        expected: ValueType,
        got: ValueType,
    },

    #[error("structural hash collision on {hash:?} with node {existing} ({existing_dims} vs {requested_dims})")]
    HashCollision {
        hash: StructuralHash,
        existing: NodeId,
        existing_dims: Dimensions,
        requested_dims: Dimensions,
    },

    #[error("killed node which has a reference: {0}")]
    DanglingReference(NodeId),

    #[error("node {output} is not an output of node {node}")]
    MissingOutputEdge { node: NodeId, output: NodeId },

    #[error("cannot move node {node} to {target}: it would cross {blocker}")]
    RotateViolation {
        node: NodeId,
        target: NodeId,
        blocker: NodeId,
    },

    #[error("no subgroup with index {0}")]
    InvalidSubgroup(usize),

    #[error("handle has no graph attached")]
    NoGraph,

    #[error("node {0} still has outputs")]
    NodeHasOutputs(NodeId),

    #[error("node {0} is still referenced")]
    ReferencedNode(NodeId),

    #[error("reference is not registered with this graph")]
    UnknownReference,

    #[error("graphs use different operation registries")]
    RegistryMismatch,

    #[error("a global registry is already installed")]
    RegistryAlreadyInstalled,

    #[error("node {0} has no value")]
    ValueMissing(NodeId),

    #[error(transparent)]
    Type(#[from] TypeError),

    #[error("{operation} failed: {message}")]
    Operation { operation: String, message: String },
}

pub type Result<T, E = GraphError> = std::result::Result<T, E>;
