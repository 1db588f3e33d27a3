use std::collections::HashSet;

use indexmap::IndexSet;

use crate::error::{GraphError, Result};
use crate::operation::ProcessingStyle;

use super::graph_impl::Graph;
use super::subgroup::Subgroup;
use super::types::NodeId;

impl Graph {
    /// Prepares the graph for evaluation: compaction, constants to the
    /// front, rvalue tagging and, if enabled, subgroup clustering.
    pub fn optimize(&mut self) -> Result<()> {
        self.clean_graph()?;
        self.move_constants()?;
        self.tag_rvalues();
        if self.config.grouping {
            self.apply_grouping()?;
        }
        Ok(())
    }

    /// Flags every node with exactly one consumer and no external holder.
    pub fn tag_rvalues(&mut self) {
        for node in &mut self.nodes {
            let rvalue = node.output_count() == 1 && !node.flags.has_external_ref();
            node.flags.set_rvalue(rvalue);
        }
    }

    pub fn subgroups(&self) -> &[Subgroup] {
        &self.subgroups
    }

    pub fn subgroup_of(&self, node: NodeId) -> Option<usize> {
        self.node_to_subgroup.get(&node).copied()
    }

    pub fn clear_grouping(&mut self) {
        self.subgroups.clear();
        self.node_to_subgroup.clear();
        for node in &mut self.nodes {
            node.flags.set_in_subgroup(false);
        }
    }

    /// Clusters unvalued fusable nodes into subgroups, visiting nodes in
    /// execution order.
    pub fn apply_grouping(&mut self) -> Result<()> {
        self.clear_grouping();

        // joining a subgroup may rotate the current node down, but only past
        // nodes already visited, so a plain index walk stays correct
        let mut index = 0;
        while index < self.nodes.len() {
            let id = NodeId::from(index);
            index += 1;

            let node = &self.nodes[id.index()];
            if node.is_cleared() || node.has_value() {
                continue;
            }
            match self.style_of(id)? {
                ProcessingStyle::OneToOne => self.group_one_to_one(id)?,
                ProcessingStyle::NToOne => {
                    self.seed_subgroup(id);
                }
                _ => {
                    let mut inputs = self.inputs(id)?.to_vec();
                    inputs.dedup();
                    for input in inputs {
                        if let Some(group) = self.subgroup_of(input) {
                            self.split_subgroup(group, input)?;
                        }
                    }
                }
            }
        }

        self.finish_grouping()?;
        log::debug!(
            "grouped {} nodes into {} subgroups",
            self.node_to_subgroup.len(),
            self.subgroups.len()
        );
        Ok(())
    }

    /// Moves the members of `group` that come after `at` into a new
    /// subgroup, returning its index.
    pub fn split_subgroup(&mut self, group: usize, at: NodeId) -> Result<Option<usize>> {
        if self.subgroup_of(at) != Some(group) {
            return Err(GraphError::InvalidNode(at));
        }
        let members = &mut self.subgroups[group].members;
        let cut = members.partition_point(|&m| m <= at);
        if cut == members.len() {
            return Ok(None);
        }
        let tail = members.split_off(cut);

        let split = self.subgroups.len();
        for &member in &tail {
            self.node_to_subgroup.insert(member, split);
        }
        log::debug!("split subgroup {} after {} ({} members moved)", group, at, tail.len());
        self.subgroups.push(Subgroup {
            members: tail,
            ..Subgroup::default()
        });
        Ok(Some(split))
    }

    /// Whether the two subgroups can run as one. Fusion is refused when an
    /// `NToOne` member of either group depends on the other group, since
    /// it reads neighbouring items that would not be ready yet.
    pub fn can_merge(&self, a: usize, b: usize) -> Result<bool> {
        let first = self.subgroup_members(a)?;
        let second = self.subgroup_members(b)?;
        Ok(!self.n_to_one_depends_on(first, second)?
            && !self.n_to_one_depends_on(second, first)?)
    }

    /// Folds `b` into `a`. Returns `false`, leaving both intact, when
    /// [`Graph::can_merge`] refuses.
    pub fn merge_subgroups(&mut self, a: usize, b: usize) -> Result<bool> {
        if a == b {
            self.subgroup_members(a)?;
            return Ok(true);
        }
        if !self.can_merge(a, b)? {
            return Ok(false);
        }
        let moved = std::mem::take(&mut self.subgroups[b].members);
        for &member in &moved {
            self.node_to_subgroup.insert(member, a);
        }
        let members = &mut self.subgroups[a].members;
        members.extend(moved);
        members.sort_unstable();
        log::debug!("merged subgroup {} into {}", b, a);
        Ok(true)
    }

    fn subgroup_members(&self, group: usize) -> Result<&[NodeId]> {
        self.subgroups
            .get(group)
            .map(|g| g.members.as_slice())
            .ok_or(GraphError::InvalidSubgroup(group))
    }

    fn n_to_one_depends_on(&self, members: &[NodeId], other: &[NodeId]) -> Result<bool> {
        let other: HashSet<NodeId> = other.iter().copied().collect();
        for &member in members {
            if self.style_of(member)? != ProcessingStyle::NToOne {
                continue;
            }
            for &input in self.inputs(member)? {
                if other.contains(&input) || self.has_ancestor_in(input, &other)? {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn seed_subgroup(&mut self, node: NodeId) -> usize {
        let group = self.subgroups.len();
        self.subgroups.push(Subgroup::seeded(node));
        self.node_to_subgroup.insert(node, group);
        group
    }

    fn group_one_to_one(&mut self, node: NodeId) -> Result<()> {
        let mut pending: Vec<NodeId> = Vec::new();
        for &input in self.inputs(node)? {
            if !self.nodes[input.index()].has_value() && !pending.contains(&input) {
                pending.push(input);
            }
        }

        match pending.as_slice() {
            [] => {
                self.seed_subgroup(node);
            }
            [input] => match self.joinable_group(node, *input)? {
                Some(group) => self.join_subgroup(group, node)?,
                None => {
                    self.seed_subgroup(node);
                }
            },
            _ if self.config.fuse_multi_input => {
                if !self.fuse_inputs(node, &pending)? {
                    self.seed_subgroup(node);
                }
            }
            _ => {
                self.seed_subgroup(node);
            }
        }
        Ok(())
    }

    /// Merges the groups of all `inputs` and adds `node` to the result.
    fn fuse_inputs(&mut self, node: NodeId, inputs: &[NodeId]) -> Result<bool> {
        let mut groups = Vec::with_capacity(inputs.len());
        for &input in inputs {
            match self.joinable_group(node, input)? {
                Some(group) => groups.push(group),
                None => return Ok(false),
            }
        }
        groups.sort_unstable();
        groups.dedup();

        let target = groups[0];
        for &other in &groups[1..] {
            if !self.merge_subgroups(target, other)? {
                return Ok(false);
            }
        }
        self.subgroups[target].members.push(node);
        self.node_to_subgroup.insert(node, target);
        Ok(true)
    }

    /// The subgroup `node` may join through `input`, if any.
    fn joinable_group(&self, node: NodeId, input: NodeId) -> Result<Option<usize>> {
        let Some(group) = self.subgroup_of(input) else {
            return Ok(None);
        };
        let producer = &self.nodes[input.index()];
        let consumer = &self.nodes[node.index()];
        if producer.output_count() != 1
            || producer.flags.has_external_ref()
            || producer.dims != consumer.dims
        {
            return Ok(None);
        }
        if self.operation_of(input)?.result_type() != self.operation_of(node)?.result_type() {
            return Ok(None);
        }
        Ok(Some(group))
    }

    fn join_subgroup(&mut self, group: usize, node: NodeId) -> Result<()> {
        let mut node = node;
        if let Some(&tail) = self.subgroups[group].members.last() {
            let target = NodeId(tail.0 + 1);
            if self.config.colocate_subgroups && target < node {
                match self.rotation_blocker(node, target)? {
                    None => {
                        self.rotate_node(node, target)?;
                        node = target;
                    }
                    Some(blocker) => {
                        log::trace!("{} stays apart from its subgroup, blocked by {}", node, blocker)
                    }
                }
            }
        }
        self.subgroups[group].members.push(node);
        self.node_to_subgroup.insert(node, group);
        Ok(())
    }

    /// Drops emptied groups and computes boundary inputs and escaping
    /// outputs of the rest.
    fn finish_grouping(&mut self) -> Result<()> {
        self.subgroups.retain(|g| !g.is_empty());
        self.node_to_subgroup.clear();
        for (index, group) in self.subgroups.iter().enumerate() {
            for &member in &group.members {
                self.node_to_subgroup.insert(member, index);
            }
        }

        for index in 0..self.subgroups.len() {
            let mut inputs = IndexSet::new();
            let mut outputs = Vec::new();
            for &member in &self.subgroups[index].members {
                for &input in self.inputs(member)? {
                    if self.subgroup_of(input) != Some(index) {
                        inputs.insert(input);
                    }
                }
                let escapes = self.nodes[member.index()].flags.has_external_ref()
                    || self
                        .outputs(member)?
                        .iter()
                        .any(|&o| self.subgroup_of(o) != Some(index));
                if escapes {
                    outputs.push(member);
                }
            }
            let group = &mut self.subgroups[index];
            group.inputs = inputs;
            group.outputs = outputs;
            for &member in &group.members {
                self.nodes[member.index()].flags.set_in_subgroup(true);
            }
        }
        Ok(())
    }
}
