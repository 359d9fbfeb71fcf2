//! Complexity ordering of choices
//!
//! Every choice has a complexity index under its constraints, with 0 the
//! simplest value. Integers zigzag around `shrink_towards`
//! (`a, a+1, a-1, a+2, ...`) until a bound is reached and then continue
//! monotonically on the open side. Booleans order `false < true`. Floats
//! order by sign then by [`float_to_lex`]. Collections order by size and
//! then element-wise.
//!
//! Sequences of choices are compared shortlex through [`SortKey`]: fewer
//! choices is simpler, ties broken by comparing [`ChoiceKey`]s in order.

use super::{ChoiceNode, ChoiceValue, Constraints, IntegerConstraints};
use crate::floats::{float_to_lex, lex_to_float};

const LOW_64: u128 = (1 << 64) - 1;

pub fn zigzag_index(value: i128, shrink_towards: i128) -> u128 {
    let index = value.abs_diff(shrink_towards).saturating_mul(2);
    if value > shrink_towards {
        index - 1
    } else {
        index
    }
}

pub fn zigzag_value(index: u128, shrink_towards: i128) -> Option<i128> {
    let distance = index / 2 + index % 2;
    if index % 2 == 1 {
        shrink_towards.checked_add_unsigned(distance)
    } else {
        shrink_towards.checked_sub_unsigned(distance)
    }
}

fn integer_index(value: i128, constraints: &IntegerConstraints) -> u128 {
    let shrink_towards = constraints.effective_shrink_towards();
    let below = |min: i128| {
        if value.abs_diff(shrink_towards) <= shrink_towards.abs_diff(min) {
            zigzag_index(value, shrink_towards)
        } else {
            value.abs_diff(min)
        }
    };
    let above = |max: i128| {
        if value.abs_diff(shrink_towards) <= max.abs_diff(shrink_towards) {
            zigzag_index(value, shrink_towards)
        } else {
            max.abs_diff(value)
        }
    };
    match (constraints.min_value, constraints.max_value) {
        (None, None) => zigzag_index(value, shrink_towards),
        (Some(min), None) => below(min),
        (None, Some(max)) => above(max),
        (Some(min), Some(max)) => {
            // Whichever side runs out first decides the tail order.
            if shrink_towards.abs_diff(min) < max.abs_diff(shrink_towards) {
                below(min)
            } else {
                above(max)
            }
        }
    }
}

fn integer_from_index(index: u128, constraints: &IntegerConstraints) -> Option<i128> {
    let shrink_towards = constraints.effective_shrink_towards();
    let below = |min: i128| {
        if index <= zigzag_index(min, shrink_towards) {
            zigzag_value(index, shrink_towards)
        } else {
            min.checked_add_unsigned(index)
        }
    };
    let above = |max: i128| {
        if index <= zigzag_index(max, shrink_towards) {
            zigzag_value(index, shrink_towards)
        } else {
            max.checked_sub_unsigned(index)
        }
    };
    let value = match (constraints.min_value, constraints.max_value) {
        (None, None) => zigzag_value(index, shrink_towards),
        (Some(min), None) => below(min),
        (None, Some(max)) => above(max),
        (Some(min), Some(max)) => {
            if shrink_towards.abs_diff(min) < max.abs_diff(shrink_towards) {
                below(min)
            } else {
                above(max)
            }
        }
    }?;
    Some(value).filter(|&v| constraints.permits(v))
}

/// Sign bit used by the float index; NaN always counts as positive.
fn float_sign(value: f64) -> u128 {
    u128::from(value.is_sign_negative() && !value.is_nan())
}

/// The complexity index of a scalar choice. `None` for collections and for
/// values whose kind does not match the constraints.
pub fn choice_to_index(value: &ChoiceValue, constraints: &Constraints) -> Option<u128> {
    match (value, constraints) {
        (ChoiceValue::Integer(v), Constraints::Integer(c)) => Some(integer_index(*v, c)),
        (ChoiceValue::Boolean(v), Constraints::Boolean(c)) => {
            if c.only_value().is_some() {
                Some(0)
            } else {
                Some(u128::from(*v))
            }
        }
        (ChoiceValue::Float(v), Constraints::Float(_)) => {
            Some((float_sign(*v) << 64) | u128::from(float_to_lex(v.abs())))
        }
        _ => None,
    }
}

/// Inverse of [`choice_to_index`] for scalar choices. Returns `None` when the
/// index names no value the constraints permit.
pub fn choice_from_index(index: u128, constraints: &Constraints) -> Option<ChoiceValue> {
    match constraints {
        Constraints::Integer(c) => integer_from_index(index, c).map(ChoiceValue::Integer),
        Constraints::Boolean(c) => match (c.only_value(), index) {
            (Some(only), 0) => Some(ChoiceValue::Boolean(only)),
            (None, 0) => Some(ChoiceValue::Boolean(false)),
            (None, 1) => Some(ChoiceValue::Boolean(true)),
            _ => None,
        },
        Constraints::Float(c) => {
            if index >> 65 != 0 {
                return None;
            }
            let magnitude = lex_to_float((index & LOW_64) as u64);
            let value = if index >> 64 == 1 { -magnitude } else { magnitude };
            Some(value).filter(|&v| c.permits(v)).map(ChoiceValue::Float)
        }
        Constraints::String(_) | Constraints::Bytes(_) => None,
    }
}

/// Per-choice ordering key. Scalars use their complexity index as `primary`;
/// collections use their size above the minimum plus the element orders.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChoiceKey {
    pub primary: u128,
    pub elements: Vec<u32>,
}

pub fn choice_key(value: &ChoiceValue, constraints: &Constraints) -> ChoiceKey {
    if let Some(primary) = choice_to_index(value, constraints) {
        return ChoiceKey {
            primary,
            elements: Vec::new(),
        };
    }
    match (value, constraints) {
        (ChoiceValue::Bytes(bytes), Constraints::Bytes(c)) => ChoiceKey {
            primary: bytes.len().saturating_sub(c.min_size) as u128,
            elements: bytes.iter().map(|&b| u32::from(b)).collect(),
        },
        (ChoiceValue::String(s), Constraints::String(c)) => ChoiceKey {
            primary: s.chars().count().saturating_sub(c.min_size) as u128,
            elements: s
                .chars()
                .map(|ch| c.intervals.index_of(ch).map_or(u32::MAX, |i| i as u32))
                .collect(),
        },
        // Kind mismatches only arise from corrupt nodes; order them last.
        _ => ChoiceKey {
            primary: u128::MAX,
            elements: Vec::new(),
        },
    }
}

/// Shortlex key of a whole choice sequence.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SortKey {
    pub length: usize,
    pub keys: Vec<ChoiceKey>,
}

pub fn sort_key(nodes: &[ChoiceNode]) -> SortKey {
    SortKey {
        length: nodes.len(),
        keys: nodes.iter().map(ChoiceNode::key).collect(),
    }
}
