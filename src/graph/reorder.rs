use crate::error::{GraphError, Result};

use super::graph_impl::Graph;
use super::types::NodeId;

impl Graph {
    /// Moves the node at `old` to `new`, shifting everything in between by
    /// one. Fails without touching the graph if the move would put the node
    /// before one of its inputs or after one of its outputs.
    pub fn rotate_node(&mut self, old: NodeId, new: NodeId) -> Result<()> {
        self.live_node(old)?;
        if new.index() >= self.nodes.len() {
            return Err(GraphError::InvalidNode(new));
        }
        if old == new {
            return Ok(());
        }
        if let Some(blocker) = self.rotation_blocker(old, new)? {
            return Err(GraphError::RotateViolation {
                node: old,
                target: new,
                blocker,
            });
        }

        let mut mapping: Vec<NodeId> = (0..self.nodes.len()).map(NodeId::from).collect();
        if new < old {
            for pos in (new.index()..old.index()).rev() {
                self.swap_adjacent(pos);
            }
            for (index, slot) in mapping.iter_mut().enumerate().take(old.index()).skip(new.index()) {
                *slot = NodeId::from(index + 1);
            }
        } else {
            for pos in old.index()..new.index() {
                self.swap_adjacent(pos);
            }
            for (index, slot) in mapping.iter_mut().enumerate().take(new.index() + 1).skip(old.index() + 1) {
                *slot = NodeId::from(index - 1);
            }
        }
        mapping[old.index()] = new;

        log::debug!("rotated {} to {}", old, new);
        self.finish_renumbering(&mapping)
    }

    /// The first input (moving left) or output (moving right) that keeps
    /// `node` from reaching `target`.
    pub fn rotation_blocker(&self, node: NodeId, target: NodeId) -> Result<Option<NodeId>> {
        let view = self.node(node)?;
        let blocker = if target < node {
            view.inputs().iter().copied().filter(|&i| i >= target).max()
        } else {
            view.outputs().iter().copied().filter(|&o| o <= target).min()
        };
        Ok(blocker)
    }

    /// Moves every valued node without inputs to the front of the table,
    /// keeping the relative order of both partitions.
    pub fn move_constants(&mut self) -> Result<()> {
        let is_constant: Vec<bool> = self
            .nodes
            .iter()
            .map(|n| !n.is_cleared() && n.has_value() && n.input_count() == 0)
            .collect();

        let order: Vec<usize> = (0..self.nodes.len())
            .filter(|&i| is_constant[i])
            .chain((0..self.nodes.len()).filter(|&i| !is_constant[i]))
            .collect();
        if order.iter().enumerate().all(|(new, &old)| new == old) {
            return Ok(());
        }

        let mut mapping = vec![NodeId::INVALID; order.len()];
        for (new, &old) in order.iter().enumerate() {
            mapping[old] = NodeId::from(new);
        }

        for node in &self.nodes {
            for index in 0..node.input_count() {
                let input = self.edges.inputs(&node.edges)[index];
                self.edges.set_input(&node.edges, index, mapping[input.index()]);
            }
            for index in 0..node.output_count() {
                let output = self.edges.outputs(&node.edges)[index];
                self.edges.set_output(&node.edges, index, mapping[output.index()]);
            }
        }

        let mut old_nodes: Vec<Option<_>> = std::mem::take(&mut self.nodes)
            .into_iter()
            .map(Some)
            .collect();
        self.nodes = order
            .iter()
            .filter_map(|&old| old_nodes[old].take())
            .collect();

        log::debug!(
            "moved {} constants to the front",
            is_constant.iter().filter(|&&c| c).count()
        );
        self.finish_renumbering(&mapping)
    }

    /// Points every neighbour of the nodes at `pos` and `pos + 1` at their
    /// swapped positions, then swaps the two.
    fn swap_adjacent(&mut self, pos: usize) {
        let low = NodeId::from(pos);
        let high = NodeId::from(pos + 1);
        self.retarget_neighbours(pos, low, NodeId::TEMPORARY);
        self.retarget_neighbours(pos + 1, high, low);
        self.retarget_neighbours(pos, NodeId::TEMPORARY, high);
        self.nodes.swap(pos, pos + 1);
    }

    fn retarget_neighbours(&mut self, at: usize, from: NodeId, to: NodeId) {
        let span = self.nodes[at].edges;
        let inputs = self.edges.inputs(&span).to_vec();
        let outputs = self.edges.outputs(&span).to_vec();
        for input in inputs {
            let neighbour = self.nodes[input.index()].edges;
            self.edges.replace_output(&neighbour, from, to);
        }
        for output in outputs {
            let neighbour = self.nodes[output.index()].edges;
            self.edges.replace_input(&neighbour, from, to);
        }
    }

    /// Brings everything keyed by node id in line with `mapping` (old index
    /// to new id) after the node table was permuted.
    pub(crate) fn finish_renumbering(&mut self, mapping: &[NodeId]) -> Result<()> {
        self.rebuild_hash_map();
        self.references.renumber(mapping)?;

        for group in &mut self.subgroups {
            group.renumber(mapping);
        }
        self.node_to_subgroup = self
            .node_to_subgroup
            .iter()
            .map(|(&node, &group)| (mapping[node.index()], group))
            .collect();
        Ok(())
    }
}
