use crate::error::Result;

use super::edges::EdgeArena;
use super::graph_impl::Graph;
use super::types::NodeId;

impl Graph {
    /// Drops every node that is neither referenced nor feeding a surviving
    /// node, then renumbers the rest densely. Returns the number removed.
    ///
    /// A node that already holds a value no longer needs its inputs, so those
    /// edges are cut first; that is what lets finished intermediates die.
    pub fn clean_graph(&mut self) -> Result<usize> {
        self.clear_grouping();

        let count = self.nodes.len();
        let mut dead = vec![false; count];
        // outputs always sit above their producer, so a single descending
        // sweep sees the final state of every consumer
        for index in (0..count).rev() {
            if self.nodes[index].is_cleared() {
                dead[index] = true;
                continue;
            }
            if self.nodes[index].has_value() && self.nodes[index].input_count() > 0 {
                self.sever_inputs(NodeId::from(index))?;
            }
            let node = &self.nodes[index];
            let feeds_live = self
                .edges
                .outputs(&node.edges)
                .iter()
                .any(|output| !dead[output.index()]);
            dead[index] = !node.flags.has_external_ref() && !feeds_live;
        }

        let removed = dead.iter().filter(|&&d| d).count();
        if removed == 0 {
            return Ok(0);
        }

        let mut mapping = vec![NodeId::INVALID; count];
        let mut next = 0;
        for (index, &is_dead) in dead.iter().enumerate() {
            if !is_dead {
                mapping[index] = NodeId::from(next);
                next += 1;
            }
        }
        self.references.check_mapping(&mapping)?;

        let live_slots = self.edges.len() - self.edges.garbage();
        let old_nodes = std::mem::take(&mut self.nodes);
        let old_edges = std::mem::replace(&mut self.edges, EdgeArena::with_capacity(live_slots));
        self.nodes.reserve(next);
        for (index, mut node) in old_nodes.into_iter().enumerate() {
            if dead[index] {
                continue;
            }
            let inputs: Vec<NodeId> = old_edges
                .inputs(&node.edges)
                .iter()
                .map(|input| mapping[input.index()])
                .collect();
            let outputs: Vec<NodeId> = old_edges
                .outputs(&node.edges)
                .iter()
                .map(|output| mapping[output.index()])
                .filter(NodeId::is_valid)
                .collect();

            let capacity = (outputs.len() as u32).max(self.config.output_capacity);
            let mut span = self.edges.allocate(&inputs, capacity);
            for output in outputs {
                self.edges.push_output(&mut span, output);
            }
            node.edges = span;
            self.nodes.push(node);
        }

        self.rebuild_hash_map();
        self.references.renumber(&mapping)?;
        log::debug!("compaction removed {} of {} nodes", removed, count);
        Ok(removed)
    }
}
