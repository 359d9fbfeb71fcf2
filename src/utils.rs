//! Helpers for building values out of choices
//!
//! These sit on top of the draw and span primitives the way a strategy
//! layer would: collections are a run of boolean-gated elements, each
//! element in its own span, so the shrinker can delete and reorder them.

use crate::data::{calc_label_from_name, ConjectureData, DrawError};

use once_cell::sync::Lazy;

/// Label of every element span opened by [`Many`].
pub static MANY_ELEMENT_LABEL: Lazy<u64> = Lazy::new(|| calc_label_from_name("many element"));

/// Label of the span wrapping a [`sampled_from`] draw.
pub static ONE_FROM_MANY_LABEL: Lazy<u64> = Lazy::new(|| calc_label_from_name("one from many"));

/// Probabilities this close to 0 or 1 would make the continue flag
/// unforceable.
const MIN_P_CONTINUE: f64 = 1e-3;

/// Rejections tolerated before a collection stops growing.
const MIN_REJECTIONS: usize = 3;

/// The average size a collection between `min_size` and `max_size` aims for
/// when the caller does not say.
pub fn default_average_size(min_size: usize, max_size: usize) -> f64 {
    let wanted = (2 * min_size).max(min_size + 5) as f64;
    wanted.min(0.5 * (min_size as f64 + max_size as f64))
}

/// Continuation probability giving collections an expected `average` size
/// beyond their minimum.
fn p_continue(average: f64) -> f64 {
    let average = average.max(0.0);
    (average / (1.0 + average)).clamp(MIN_P_CONTINUE, 1.0 - MIN_P_CONTINUE)
}

/// Repetition control for variable-size collections.
///
/// Call [`Many::more`] before drawing each element. Every call opens an
/// element span which the next call closes, so the continue flag and the
/// element's own draws share a span.
#[derive(Debug, Clone)]
pub struct Many {
    min_size: usize,
    max_size: usize,
    p_continue: f64,
    count: usize,
    rejections: usize,
    drawn: bool,
    rejected: bool,
    force_stop: bool,
}

impl Many {
    pub fn new(min_size: usize, max_size: usize, average_size: f64) -> Self {
        Self {
            min_size,
            max_size,
            p_continue: p_continue(average_size - min_size as f64),
            count: 0,
            rejections: 0,
            drawn: false,
            rejected: false,
            force_stop: false,
        }
    }

    /// Elements accepted so far.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Decides whether to draw another element.
    pub fn more(&mut self, data: &mut ConjectureData) -> Result<bool, DrawError> {
        if self.drawn {
            data.stop_span_with(self.rejected)?;
        }
        self.drawn = true;
        self.rejected = false;

        data.start_span(*MANY_ELEMENT_LABEL)?;
        let should_continue = if self.min_size == self.max_size {
            self.count < self.min_size
        } else {
            let forced = if self.force_stop || self.count >= self.max_size {
                Some(false)
            } else if self.count < self.min_size {
                Some(true)
            } else {
                None
            };
            data.draw_boolean_with(self.p_continue, forced)?
        };

        if should_continue {
            self.count += 1;
        } else {
            data.stop_span()?;
        }
        Ok(should_continue)
    }

    /// Throws away the element just drawn. Its span is marked discarded.
    /// Too many rejections stop the collection, which makes the test case
    /// invalid if it is still below its minimum size.
    pub fn reject(&mut self, data: &mut ConjectureData) -> Result<(), DrawError> {
        debug_assert!(self.count > 0, "reject called before any element was drawn");
        self.count = self.count.saturating_sub(1);
        self.rejections += 1;
        self.rejected = true;
        if self.rejections > MIN_REJECTIONS.max(2 * self.count) {
            if self.count < self.min_size {
                data.stop_span_with(true)?;
                self.drawn = false;
                return Err(DrawError::Invalid(format!(
                    "too many rejected elements for a collection of at least {}",
                    self.min_size
                )));
            }
            self.force_stop = true;
        }
        Ok(())
    }
}

/// Draws a list of `min_size..=max_size` elements with `element`.
pub fn lists<T, F>(
    data: &mut ConjectureData,
    min_size: usize,
    max_size: usize,
    average_size: Option<f64>,
    mut element: F,
) -> Result<Vec<T>, DrawError>
where
    F: FnMut(&mut ConjectureData) -> Result<T, DrawError>,
{
    let average = average_size.unwrap_or_else(|| default_average_size(min_size, max_size));
    let mut many = Many::new(min_size, max_size, average);
    let mut out = Vec::new();
    while many.more(data)? {
        out.push(element(data)?);
    }
    Ok(out)
}

/// Picks one of `items`, shrinking towards the first. An empty slice is a
/// usage error.
pub fn sampled_from<'a, T>(data: &mut ConjectureData, items: &'a [T]) -> Result<&'a T, DrawError> {
    let last = i128::try_from(items.len()).unwrap_or(i128::MAX) - 1;
    let index = data.span(*ONE_FROM_MANY_LABEL, |data| data.draw_integer(Some(0), Some(last)))?;
    usize::try_from(index)
        .ok()
        .and_then(|index| items.get(index))
        .ok_or_else(|| DrawError::Invalid(format!("index {} out of range", index)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::choice::ChoiceValue;
    use crate::data::{Outcome, Status, UsageError};

    fn replay(choices: Vec<ChoiceValue>) -> ConjectureData {
        ConjectureData::for_choices(choices, 100)
    }

    #[test]
    fn average_size_is_capped_by_the_midpoint() {
        assert_eq!(default_average_size(0, 100), 5.0);
        assert_eq!(default_average_size(10, 100), 20.0);
        assert_eq!(default_average_size(0, 4), 2.0);
    }

    #[test]
    fn elements_and_flags_share_spans() {
        let mut data = replay(vec![
            ChoiceValue::Boolean(true),
            ChoiceValue::Integer(3),
            ChoiceValue::Boolean(true),
            ChoiceValue::Integer(4),
            ChoiceValue::Boolean(false),
        ]);
        let values = lists(&mut data, 0, 10, None, |data| data.draw_integer(Some(0), Some(10))).unwrap();
        assert_eq!(values, vec![3, 4]);
        let result = data.conclude(Outcome::Valid).unwrap();
        let elements: Vec<(usize, usize)> = result
            .spans
            .iter()
            .filter(|span| span.label == *MANY_ELEMENT_LABEL)
            .map(|span| (span.start, span.end))
            .collect();
        assert_eq!(elements, vec![(0, 2), (2, 4), (4, 5)]);
    }

    #[test]
    fn minimum_size_forces_continuation() {
        let mut data = replay(vec![]);
        let values = lists(&mut data, 2, 5, None, |data| data.draw_boolean(0.5)).unwrap();
        assert_eq!(values.len(), 2);
        let result = data.conclude(Outcome::Valid).unwrap();
        assert!(result.nodes[0].was_forced);
        assert!(result.nodes[2].was_forced);
    }

    #[test]
    fn fixed_size_draws_no_flags() {
        let mut data = replay(vec![]);
        let values = lists(&mut data, 3, 3, None, |data| data.draw_integer(Some(0), Some(9))).unwrap();
        assert_eq!(values, vec![0, 0, 0]);
        assert_eq!(data.len(), 3);
    }

    #[test]
    fn rejected_elements_are_discarded() {
        let mut data = replay(vec![
            ChoiceValue::Boolean(true),
            ChoiceValue::Integer(7),
            ChoiceValue::Boolean(true),
            ChoiceValue::Integer(2),
            ChoiceValue::Boolean(false),
        ]);
        let mut many = Many::new(0, 10, 2.0);
        let mut kept = Vec::new();
        while many.more(&mut data).unwrap() {
            let v = data.draw_integer(Some(0), Some(10)).unwrap();
            if v % 2 == 1 {
                many.reject(&mut data).unwrap();
            } else {
                kept.push(v);
            }
        }
        assert_eq!(kept, vec![2]);
        let result = data.conclude(Outcome::Valid).unwrap();
        let discarded: Vec<bool> = result
            .spans
            .iter()
            .filter(|span| span.label == *MANY_ELEMENT_LABEL)
            .map(|span| span.discarded)
            .collect();
        assert_eq!(discarded, vec![true, false, false]);
    }

    #[test]
    fn sampled_from_indexes_the_slice() {
        let mut data = replay(vec![ChoiceValue::Integer(2)]);
        assert_eq!(sampled_from(&mut data, &["a", "b", "c"]), Ok(&"c"));
        assert_eq!(data.conclude(Outcome::Valid).unwrap().status, Status::Valid);
    }

    #[test]
    fn sampled_from_nothing_is_a_usage_error() {
        let mut data = replay(vec![]);
        let empty: [u8; 0] = [];
        match sampled_from(&mut data, &empty) {
            Err(DrawError::Usage(UsageError::InvalidConstraints { .. })) => {}
            other => panic!("unexpected {:?}", other),
        }
    }
}
