use std::collections::HashMap;
use std::sync::Arc;

use arrayvec::ArrayVec;
use indexmap::IndexSet;

use crate::adjacency::Adjacency;
use crate::error::{GraphError, Result};
use crate::operation::{GroupFunction, GroupInput, GroupMember, GroupPlan, MAX_OPERATION_INPUTS};
use crate::value::Value;

use super::graph_impl::Graph;
use super::types::NodeId;

/// A cluster of fusable nodes evaluated as one unit.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Subgroup {
    /// Sorted ascending
    pub(crate) members: Vec<NodeId>,
    /// Inputs of members that live outside the group, in discovery order
    pub(crate) inputs: IndexSet<NodeId>,
    /// Members whose value is needed outside the group
    pub(crate) outputs: Vec<NodeId>,
}

impl Subgroup {
    pub(crate) fn seeded(node: NodeId) -> Self {
        Self {
            members: vec![node],
            ..Self::default()
        }
    }

    pub fn members(&self) -> &[NodeId] {
        &self.members
    }

    pub fn inputs(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.inputs.iter().copied()
    }

    pub fn outputs(&self) -> &[NodeId] {
        &self.outputs
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.members.binary_search(&node).is_ok()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub(crate) fn renumber(&mut self, mapping: &[NodeId]) {
        for member in &mut self.members {
            *member = mapping[member.index()];
        }
        self.members.sort_unstable();
        self.inputs = self.inputs.iter().map(|i| mapping[i.index()]).collect();
        for output in &mut self.outputs {
            *output = mapping[output.index()];
        }
    }
}

impl Graph {
    /// Describes subgroup `group` the way a group factory sees it.
    pub fn group_plan(&self, group: usize) -> Result<GroupPlan> {
        let subgroup = self
            .subgroups
            .get(group)
            .ok_or(GraphError::InvalidSubgroup(group))?;
        Ok(describe(self, &subgroup.members)?.0)
    }
}

/// Plan of `members` plus its boundary: inputs read from outside, then the
/// members whose values escape.
fn describe(graph: &Graph, members: &[NodeId]) -> Result<(GroupPlan, Adjacency<NodeId>)> {
    let mut boundary: IndexSet<NodeId> = IndexSet::new();
    let mut described = Vec::with_capacity(members.len());
    let mut outputs = Vec::new();

    for (position, &member) in members.iter().enumerate() {
        let operation = Arc::clone(graph.operation_of(member)?);
        let edges = graph.inputs(member)?;
        let mut inputs = ArrayVec::new();
        for &input in edges {
            let source = match members.binary_search(&input) {
                Ok(index) => GroupInput::Member(index),
                Err(_) => GroupInput::Boundary(boundary.insert_full(input).0),
            };
            inputs
                .try_push(source)
                .map_err(|_| GraphError::TooManyInputs {
                    operation: operation.name().to_string(),
                    count: edges.len(),
                    max: MAX_OPERATION_INPUTS,
                })?;
        }

        let node = graph.live_node(member)?;
        let escapes = node.flags.has_external_ref()
            || graph
                .outputs(member)?
                .iter()
                .any(|o| members.binary_search(o).is_err());
        if escapes {
            outputs.push(position);
        }
        described.push(GroupMember {
            operation,
            dims: node.dims,
            inputs,
        });
    }

    let inputs: Vec<NodeId> = boundary.into_iter().collect();
    let mut adjacency = Adjacency::with_output_capacity(&inputs, outputs.len());
    for &position in &outputs {
        adjacency.push_output(members[position]);
    }
    let plan = GroupPlan {
        members: described,
        input_count: inputs.len(),
        outputs,
    };
    Ok((plan, adjacency))
}

/// Runs a whole subgroup in one go, keeping intermediate values out of the
/// graph. Uses the seeding operation's fused dispatch when its factory
/// provides one.
#[derive(Debug)]
pub(crate) struct SubgroupFunction {
    members: Vec<NodeId>,
    boundary: Adjacency<NodeId>,
    fused: Option<GroupFunction>,
}

impl SubgroupFunction {
    pub(crate) fn new(graph: &Graph, group: &Subgroup) -> Result<Self> {
        let (plan, boundary) = describe(graph, &group.members)?;
        let fused = match group.members.first() {
            Some(&seed) => {
                let operation = graph.operation_of(seed)?;
                operation
                    .function()
                    .group_factory()
                    .and_then(|factory| factory(&plan))
                    .map(|dispatch| GroupFunction {
                        operation: operation.name().to_string(),
                        dispatch,
                    })
            }
            None => None,
        };
        Ok(Self {
            members: group.members.clone(),
            boundary,
            fused,
        })
    }

    pub(crate) fn is_fused(&self) -> bool {
        self.fused.is_some()
    }

    pub(crate) fn is_ready(&self, graph: &Graph) -> Result<bool> {
        for &input in self.boundary.inputs() {
            if !graph.live_node(input)?.has_value() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Evaluates the group and stores the escaping values. Returns the
    /// number of dispatches made.
    pub(crate) fn run(&self, graph: &mut Graph) -> Result<usize> {
        let dispatches = match &self.fused {
            Some(fused) => {
                self.run_fused(graph, fused)?;
                1
            }
            None => self.run_members(graph)?,
        };

        graph.release_consumed(self.boundary.inputs())?;
        log::trace!(
            "ran subgroup of {} members in {} dispatches, {} escaping",
            self.members.len(),
            dispatches,
            self.boundary.output_count()
        );
        Ok(dispatches)
    }

    fn run_fused(&self, graph: &mut Graph, fused: &GroupFunction) -> Result<()> {
        let mut values = Vec::with_capacity(self.boundary.input_count());
        for &input in self.boundary.inputs() {
            let value = graph
                .live_node(input)?
                .value
                .clone()
                .ok_or(GraphError::ValueMissing(input))?;
            values.push(value);
        }

        let results = (fused.dispatch)(&values)?;
        if results.len() != self.boundary.output_count() {
            return Err(GraphError::Operation {
                operation: fused.operation.clone(),
                message: format!(
                    "group dispatch returned {} values for {} outputs",
                    results.len(),
                    self.boundary.output_count()
                ),
            });
        }
        for (&output, value) in self.boundary.outputs().iter().zip(results) {
            graph.operation_of(output)?.check_result(&value)?;
            graph.nodes[output.index()].value = Some(value);
        }
        Ok(())
    }

    fn run_members(&self, graph: &mut Graph) -> Result<usize> {
        let mut scratch: HashMap<NodeId, Value> = HashMap::with_capacity(self.members.len());

        for &member in &self.members {
            let operation = Arc::clone(graph.operation_of(member)?);
            let inputs = graph.inputs(member)?.to_vec();
            let mut values: ArrayVec<Value, MAX_OPERATION_INPUTS> = ArrayVec::new();
            for &input in &inputs {
                let value = match scratch.get(&input) {
                    Some(value) => value.clone(),
                    None => graph
                        .live_node(input)?
                        .value
                        .clone()
                        .ok_or(GraphError::ValueMissing(input))?,
                };
                values
                    .try_push(value)
                    .map_err(|_| GraphError::TooManyInputs {
                        operation: operation.name().to_string(),
                        count: inputs.len(),
                        max: MAX_OPERATION_INPUTS,
                    })?;
            }

            let dims = graph.nodes[member.index()].dims;
            let value = operation.invoke(&values, &dims)?;

            for input in &inputs {
                if graph.nodes[input.index()].flags.is_rvalue() {
                    scratch.remove(input);
                }
            }
            if self.boundary.contains_output(member) {
                graph.nodes[member.index()].value = Some(value);
            } else {
                scratch.insert(member, value);
            }
        }
        Ok(self.members.len())
    }
}
