use super::types::NodeId;

/// Location of one node's edges inside an [`EdgeArena`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct EdgeSpan {
    offset: u32,
    inputs: u32,
    outputs: u32,
    /// Output slots reserved after the inputs
    capacity: u32,
}

impl EdgeSpan {
    pub fn input_count(&self) -> usize {
        self.inputs as usize
    }

    pub fn output_count(&self) -> usize {
        self.outputs as usize
    }

    pub fn output_capacity(&self) -> usize {
        self.capacity as usize
    }

    fn start(&self) -> usize {
        self.offset as usize
    }

    fn outputs_start(&self) -> usize {
        self.start() + self.input_count()
    }

    fn len(&self) -> usize {
        self.input_count() + self.output_capacity()
    }
}

/// Edge slots of every node in a graph, stored back to back.
///
/// Each node owns a contiguous segment: its inputs followed by its output
/// slots. A node whose outputs overflow is moved to the end of the arena with
/// twice the output capacity; the abandoned segment is counted as garbage
/// until the graph is compacted and the arena rebuilt.
#[derive(Clone, Debug, Default)]
pub struct EdgeArena {
    slots: Vec<NodeId>,
    garbage: usize,
}

impl EdgeArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            garbage: 0,
        }
    }

    pub fn allocate(&mut self, inputs: &[NodeId], output_capacity: u32) -> EdgeSpan {
        let span = EdgeSpan {
            offset: self.slots.len() as u32,
            inputs: inputs.len() as u32,
            outputs: 0,
            capacity: output_capacity,
        };
        self.slots.extend_from_slice(inputs);
        self.slots
            .extend(std::iter::repeat(NodeId::INVALID).take(output_capacity as usize));
        span
    }

    pub fn inputs(&self, span: &EdgeSpan) -> &[NodeId] {
        &self.slots[span.start()..span.outputs_start()]
    }

    pub fn outputs(&self, span: &EdgeSpan) -> &[NodeId] {
        let start = span.outputs_start();
        &self.slots[start..start + span.output_count()]
    }

    pub fn set_input(&mut self, span: &EdgeSpan, index: usize, id: NodeId) {
        debug_assert!(index < span.input_count());
        self.slots[span.start() + index] = id;
    }

    pub fn set_output(&mut self, span: &EdgeSpan, index: usize, id: NodeId) {
        debug_assert!(index < span.output_count());
        self.slots[span.outputs_start() + index] = id;
    }

    pub fn push_output(&mut self, span: &mut EdgeSpan, id: NodeId) {
        if span.outputs == span.capacity {
            self.relocate(span, (span.capacity * 2).max(1));
        }
        let slot = span.outputs_start() + span.output_count();
        self.slots[slot] = id;
        span.outputs += 1;
    }

    /// Removes the first occurrence of `id` from the outputs, shifting the
    /// rest down. Returns `false` when `id` is not an output.
    pub fn remove_output(&mut self, span: &mut EdgeSpan, id: NodeId) -> bool {
        let Some(position) = self.outputs(span).iter().position(|&o| o == id) else {
            return false;
        };
        let start = span.outputs_start();
        let end = start + span.output_count();
        self.slots.copy_within(start + position + 1..end, start + position);
        self.slots[end - 1] = NodeId::INVALID;
        span.outputs -= 1;
        true
    }

    /// Replaces every occurrence of `from` among the inputs.
    pub fn replace_input(&mut self, span: &EdgeSpan, from: NodeId, to: NodeId) {
        let start = span.start();
        for slot in &mut self.slots[start..start + span.input_count()] {
            if *slot == from {
                *slot = to;
            }
        }
    }

    /// Replaces every occurrence of `from` among the outputs.
    pub fn replace_output(&mut self, span: &EdgeSpan, from: NodeId, to: NodeId) {
        let start = span.outputs_start();
        for slot in &mut self.slots[start..start + span.output_count()] {
            if *slot == from {
                *slot = to;
            }
        }
    }

    /// Drops all inputs of a node, turning their slots into output capacity.
    pub fn clear_inputs(&mut self, span: &mut EdgeSpan) {
        if span.inputs == 0 {
            return;
        }
        let start = span.start();
        let outputs_start = span.outputs_start();
        let outputs = span.output_count();
        self.slots
            .copy_within(outputs_start..outputs_start + outputs, start);
        for slot in &mut self.slots[start + outputs..start + span.len()] {
            *slot = NodeId::INVALID;
        }
        span.capacity += span.inputs;
        span.inputs = 0;
    }

    /// Gives up a node's segment entirely.
    pub fn release(&mut self, span: &mut EdgeSpan) {
        self.garbage += span.len();
        *span = EdgeSpan {
            offset: self.slots.len() as u32,
            ..EdgeSpan::default()
        };
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slots no live node points at any more.
    pub fn garbage(&self) -> usize {
        self.garbage
    }

    fn relocate(&mut self, span: &mut EdgeSpan, capacity: u32) {
        let start = span.start();
        let used = span.input_count() + span.output_count();
        let offset = self.slots.len();
        self.slots.extend_from_within(start..start + used);
        self.slots
            .extend(std::iter::repeat(NodeId::INVALID).take(capacity as usize - span.output_count()));
        self.garbage += span.len();
        span.offset = offset as u32;
        span.capacity = capacity;
    }
}
