use std::fmt;
use std::sync::Arc;

use arrayvec::ArrayVec;

use crate::dimensions::Dimensions;
use crate::error::Result;
use crate::value::Value;

use super::{Operation, MAX_OPERATION_INPUTS};

/// Where a member of a fused group reads one of its inputs from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GroupInput {
    /// Position in the group's boundary inputs.
    Boundary(usize),
    /// Position of an earlier member of the same group.
    Member(usize),
}

#[derive(Clone, Debug)]
pub struct GroupMember {
    pub operation: Arc<Operation>,
    pub dims: Dimensions,
    pub inputs: ArrayVec<GroupInput, MAX_OPERATION_INPUTS>,
}

/// Shape of a subgroup as handed to a [`GroupFactory`]. Members are in
/// execution order.
#[derive(Clone, Debug)]
pub struct GroupPlan {
    pub members: Vec<GroupMember>,
    pub input_count: usize,
    /// Member positions whose values leave the group, ascending.
    pub outputs: Vec<usize>,
}

impl GroupPlan {
    /// True if every member runs the operation named `name`.
    pub fn is_uniform(&self, name: &str) -> bool {
        self.members.iter().all(|m| m.operation.name() == name)
    }
}

/// Fused dispatch for one group: boundary input values in, one value per
/// entry of [`GroupPlan::outputs`] out.
pub type GroupDispatchFn = Box<dyn Fn(&[Value]) -> Result<Vec<Value>> + Send + Sync>;

/// Builds the fused dispatch for a group seeded by the owning operation, or
/// declines with `None` so the members run one by one.
pub type GroupFactory = Arc<dyn Fn(&GroupPlan) -> Option<GroupDispatchFn> + Send + Sync>;

/// A dispatch returned by a factory, with the name of the seeding operation
/// for error reports.
pub(crate) struct GroupFunction {
    pub(crate) operation: String,
    pub(crate) dispatch: GroupDispatchFn,
}

impl fmt::Debug for GroupFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GroupFunction({}, <fn>)", self.operation)
    }
}
