use std::fmt;

pub const DEFAULT_OUTPUT_CAPACITY: u32 = 2;
pub const USER_FLAG_BITS: u8 = 7;

/// Index into a graph's dense node table.
///
/// Ids are only valid until the next compaction or reordering. Hold a
/// reference (see [`super::NodeSlot`]) to follow a node across renumbering.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    pub const INVALID: NodeId = NodeId(u32::MAX);
    /// Stands in for a node while it is being swapped with a neighbour.
    pub const TEMPORARY: NodeId = NodeId(u32::MAX - 1);

    pub fn index(&self) -> usize {
        self.0 as usize
    }

    pub fn is_valid(&self) -> bool {
        self.0 < Self::TEMPORARY.0
    }
}

impl From<usize> for NodeId {
    fn from(index: usize) -> Self {
        NodeId(index as u32)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::INVALID => f.write_str("NodeId(INVALID)"),
            Self::TEMPORARY => f.write_str("NodeId(TEMPORARY)"),
            NodeId(id) => write!(f, "NodeId({})", id),
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Tuning knobs for the optimisation passes.
#[derive(Clone, Debug, PartialEq)]
pub struct GraphConfig {
    /// Run the subgroup clustering pass in `optimize`.
    pub grouping: bool,
    /// Rotate nodes joining a subgroup so members sit next to each other.
    pub colocate_subgroups: bool,
    /// Let a one-to-one node with several pending inputs merge their subgroups.
    pub fuse_multi_input: bool,
    /// Output slots reserved for a freshly created node.
    pub output_capacity: u32,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            grouping: true,
            colocate_subgroups: true,
            fuse_multi_input: false,
            output_capacity: DEFAULT_OUTPUT_CAPACITY,
        }
    }
}

impl GraphConfig {
    pub fn with_grouping(mut self, grouping: bool) -> Self {
        self.grouping = grouping;
        self
    }

    pub fn with_colocation(mut self, colocate: bool) -> Self {
        self.colocate_subgroups = colocate;
        self
    }

    pub fn with_multi_input_fusion(mut self, fuse: bool) -> Self {
        self.fuse_multi_input = fuse;
        self
    }

    pub fn with_output_capacity(mut self, capacity: u32) -> Self {
        self.output_capacity = capacity;
        self
    }
}
