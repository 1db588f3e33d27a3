
/// Input and output edges packed into a single allocation.
///
/// Inputs are fixed at construction and stored first. Output slots follow
/// them; when they run out, the output capacity doubles.
#[derive(Clone, Debug, PartialEq)]
pub struct Adjacency<T: Copy> {
    /// Inputs, then `output_capacity` output slots
    slots: Vec<T>,
    input_count: usize,
    output_count: usize,
}

impl<T: Copy + PartialEq> Adjacency<T> {
    pub fn new(inputs: &[T]) -> Self {
        Self::with_output_capacity(inputs, 0)
    }

    pub fn with_output_capacity(inputs: &[T], capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(inputs.len() + capacity);
        slots.extend_from_slice(inputs);
        Self {
            slots,
            input_count: inputs.len(),
            output_count: 0,
        }
    }

    pub fn input_count(&self) -> usize {
        self.input_count
    }

    pub fn output_count(&self) -> usize {
        self.output_count
    }

    pub fn output_capacity(&self) -> usize {
        self.slots.capacity() - self.input_count
    }

    pub fn inputs(&self) -> &[T] {
        &self.slots[..self.input_count]
    }

    pub fn outputs(&self) -> &[T] {
        &self.slots[self.input_count..self.input_count + self.output_count]
    }

    pub fn input(&self, index: usize) -> Option<T> {
        self.inputs().get(index).copied()
    }

    pub fn output(&self, index: usize) -> Option<T> {
        self.outputs().get(index).copied()
    }

    /// Returns `false` when `index` is out of range.
    pub fn set_input(&mut self, index: usize, value: T) -> bool {
        if index >= self.input_count {
            return false;
        }
        self.slots[index] = value;
        true
    }

    /// Returns `false` when `index` is out of range.
    pub fn set_output(&mut self, index: usize, value: T) -> bool {
        if index >= self.output_count {
            return false;
        }
        self.slots[self.input_count + index] = value;
        true
    }

    pub fn push_output(&mut self, value: T) {
        if self.slots.len() == self.slots.capacity() {
            let grow = self.output_capacity().max(1);
            self.slots.reserve_exact(grow);
        }
        self.slots.push(value);
        self.output_count += 1;
    }

    /// Removes the first occurrence of `value` from the outputs, keeping the
    /// order of the rest. Returns `false` if it was not an output.
    pub fn remove_output(&mut self, value: T) -> bool {
        let Some(position) = self.outputs().iter().position(|&o| o == value) else {
            return false;
        };
        self.slots.remove(self.input_count + position);
        self.output_count -= 1;
        true
    }

    pub fn contains_output(&self, value: T) -> bool {
        self.outputs().contains(&value)
    }
}
