pub mod adjacency;
pub mod dimensions;
pub mod error;
pub mod graph;
pub mod handle;
pub mod hash;
pub mod operation;
pub mod shared;
pub mod value;

pub use adjacency::Adjacency;
pub use dimensions::Dimensions;
pub use error::{GraphError, Result};
pub use graph::*;
pub use handle::{ComputedBase, ComputedValue, Operand};
pub use hash::StructuralHash;
pub use operation::{
    GroupDispatchFn, GroupFactory, GroupInput, GroupMember, GroupPlan, Operation,
    OperationFunction, OperationId, ProcessingStyle, Registry, MAX_OPERATION_INPUTS,
};
pub use shared::SharedGraph;
pub use value::{Buffer, TypeError, Value, ValueKind, ValueType};
