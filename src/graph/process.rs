use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use arrayvec::ArrayVec;

use crate::error::{GraphError, Result};
use crate::operation::{ProcessingStyle, MAX_OPERATION_INPUTS};
use crate::value::Value;

use super::graph_impl::Graph;
use super::references::{NodeSlot, RewriteListener};
use super::subgroup::SubgroupFunction;
use super::types::NodeId;

impl Graph {
    /// Evaluates `target` and everything it needs that has no value yet.
    ///
    /// The graph is optimised first and compacted afterwards, so node ids
    /// held across this call must go through a reference.
    pub fn process(&mut self, target: NodeId) -> Result<Value> {
        self.live_node(target)?;
        let slot = NodeSlot::new(target);
        let listener: Arc<dyn RewriteListener> = slot.clone();
        let key = self.reference(target, Some(Arc::downgrade(&listener)))?;

        let outcome = self
            .optimize()
            .and_then(|()| self.evaluate(slot.get()))
            .and_then(|()| self.clean_graph().map(|_| ()));
        self.clear_grouping();

        let id = slot.get();
        let value = outcome.and_then(|()| {
            self.live_node(id)?
                .value
                .clone()
                .ok_or(GraphError::ValueMissing(id))
        });
        self.unreference(key)?;
        value
    }

    /// Runs every pending ancestor of `target` in ascending order. A
    /// subgroup whose boundary is not ready is deferred to its next pending
    /// member; past its last one it is left unevaluated.
    pub(crate) fn evaluate(&mut self, target: NodeId) -> Result<()> {
        let pending = self.pending_ancestors(target)?;
        let mut done = vec![false; self.subgroups.len()];

        for &id in &pending {
            if self.live_node(id)?.has_value() {
                continue;
            }
            let Some(group) = self.subgroup_of(id) else {
                self.evaluate_node(id)?;
                continue;
            };
            if done[group] {
                continue;
            }

            let function = SubgroupFunction::new(self, &self.subgroups[group])?;
            if function.is_ready(self)? {
                log::trace!("subgroup {} runs at {}, fused: {}", group, id, function.is_fused());
                function.run(self)?;
                done[group] = true;
            } else if pending
                .range(NodeId(id.0 + 1)..)
                .any(|&later| self.subgroup_of(later) == Some(group))
            {
                log::trace!("subgroup {} deferred past {}", group, id);
            } else {
                log::warn!(
                    "subgroup {} deferred at {}: boundary inputs not ready in this pass",
                    group,
                    id
                );
            }
        }
        Ok(())
    }

    /// Unvalued nodes `target` depends on, itself included.
    fn pending_ancestors(&self, target: NodeId) -> Result<BTreeSet<NodeId>> {
        let mut pending = BTreeSet::new();
        let mut queue = VecDeque::from([target]);
        while let Some(id) = queue.pop_front() {
            let node = self.live_node(id)?;
            if node.has_value() || !pending.insert(id) {
                continue;
            }
            queue.extend(self.edges.inputs(&node.edges).iter().copied());
        }
        Ok(pending)
    }

    fn evaluate_node(&mut self, id: NodeId) -> Result<()> {
        let operation = Arc::clone(self.operation_of(id)?);
        let inputs = self.inputs(id)?.to_vec();
        let mut values: ArrayVec<Value, MAX_OPERATION_INPUTS> = ArrayVec::new();
        for &input in &inputs {
            let value = self
                .live_node(input)?
                .value
                .clone()
                .ok_or(GraphError::ValueMissing(input))?;
            values
                .try_push(value)
                .map_err(|_| GraphError::TooManyInputs {
                    operation: operation.name().to_string(),
                    count: inputs.len(),
                    max: MAX_OPERATION_INPUTS,
                })?;
        }

        let dims = self.nodes[id.index()].dims;
        let value = operation.invoke(&values, &dims)?;
        self.nodes[id.index()].value = Some(value);

        self.release_consumed(&inputs)
    }

    /// Drops the value of every computed rvalue among `inputs`; its only
    /// consumer has run.
    pub(crate) fn release_consumed(&mut self, inputs: &[NodeId]) -> Result<()> {
        for &input in inputs {
            if !self.nodes[input.index()].flags.is_rvalue() {
                continue;
            }
            if self.style_of(input)? != ProcessingStyle::Value {
                self.nodes[input.index()].value = None;
            }
        }
        Ok(())
    }
}
