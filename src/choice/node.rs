//! ChoiceNode - one recorded choice

use super::{choice_key, ChoiceKey, ChoiceType, ChoiceValue, Constraints};

/// A single choice made during test generation: the value, the constraints
/// it was drawn under, and whether it was forced by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct ChoiceNode {
    pub value: ChoiceValue,
    pub constraints: Constraints,
    pub was_forced: bool,
    /// Position of this node in its choice sequence.
    pub index: usize,
}

impl ChoiceNode {
    pub fn new(value: ChoiceValue, constraints: Constraints, was_forced: bool, index: usize) -> Self {
        Self {
            value,
            constraints,
            was_forced,
            index,
        }
    }

    pub fn choice_type(&self) -> ChoiceType {
        self.value.choice_type()
    }

    /// A node is trivial if it cannot be simplified any further in
    /// isolation. Replacing it may still simplify the sequence as a whole.
    pub fn trivial(&self) -> bool {
        self.was_forced || self.value == self.constraints.simplest()
    }

    pub fn key(&self) -> ChoiceKey {
        choice_key(&self.value, &self.constraints)
    }
}
