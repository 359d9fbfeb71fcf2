//! Primitive providers
//!
//! A provider turns constraints into values whenever [`ConjectureData`] has
//! no recorded choice to replay. [`RandomProvider`] is the generation
//! backend: a seeded ChaCha stream biased towards small and edge-case
//! values. [`SimplestProvider`] always answers with the simplest permitted
//! value and backs replay.
//!
//! [`ConjectureData`]: crate::data::ConjectureData

use crate::choice::{
    BooleanConstraints, BytesConstraints, ChoiceValue, Constraints, FloatConstraints, IntegerConstraints,
    StringConstraints,
};
use crate::floats::lex_to_float;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Probability of answering with an edge-case constant instead of a
/// random value.
const CONSTANT_PROBABILITY: f64 = 0.05;

/// Bit widths for unbounded integers, with their relative weights.
const INTEGER_SIZES: [(u32, f64); 5] = [(8, 4.0), (16, 8.0), (32, 1.0), (64, 1.0), (128, 0.5)];

/// Bounded integer ranges wider than this draw near `shrink_towards` most
/// of the time rather than uniformly.
const WIDE_RANGE: u128 = 1 << 24;

/// Strings mostly draw from the first few members of their alphabet.
const SMALL_ALPHABET: usize = 128;

const NASTY_FLOATS: [f64; 16] = [
    0.0,
    0.5,
    1.1,
    1.5,
    1.9,
    1.0 / 3.0,
    10e6,
    10e-6,
    1.175494351e-38,
    2.2250738585072014e-308,
    1.7976931348623157e308,
    3.402823466e38,
    9007199254740992.0,
    1.0 - 10e-6,
    2.0 + 10e-6,
    f64::MIN_POSITIVE,
];

pub trait PrimitiveProvider: std::fmt::Debug + Send {
    fn draw_boolean(&mut self, constraints: &BooleanConstraints) -> bool;
    fn draw_integer(&mut self, constraints: &IntegerConstraints) -> i128;
    fn draw_float(&mut self, constraints: &FloatConstraints) -> f64;
    fn draw_string(&mut self, constraints: &StringConstraints) -> String;
    fn draw_bytes(&mut self, constraints: &BytesConstraints) -> Vec<u8>;

    fn draw(&mut self, constraints: &Constraints) -> ChoiceValue {
        match constraints {
            Constraints::Boolean(c) => ChoiceValue::Boolean(self.draw_boolean(c)),
            Constraints::Integer(c) => ChoiceValue::Integer(self.draw_integer(c)),
            Constraints::Float(c) => ChoiceValue::Float(self.draw_float(c)),
            Constraints::String(c) => ChoiceValue::String(self.draw_string(c)),
            Constraints::Bytes(c) => ChoiceValue::Bytes(self.draw_bytes(c)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RandomProvider {
    rng: ChaCha8Rng,
}

impl RandomProvider {
    pub fn new(seed: u64) -> Self {
        Self::from_rng(ChaCha8Rng::seed_from_u64(seed))
    }

    pub fn from_rng(rng: ChaCha8Rng) -> Self {
        Self { rng }
    }

    fn use_constant(&mut self) -> bool {
        self.rng.gen_bool(CONSTANT_PROBABILITY)
    }

    fn pick<T: Copy>(&mut self, options: &[T]) -> Option<T> {
        if options.is_empty() {
            None
        } else {
            Some(options[self.rng.gen_range(0..options.len())])
        }
    }

    /// A random magnitude whose bit width follows [`INTEGER_SIZES`].
    fn magnitude(&mut self) -> u128 {
        let total: f64 = INTEGER_SIZES.iter().map(|&(_, weight)| weight).sum();
        let mut roll = self.rng.gen::<f64>() * total;
        let mut bits = INTEGER_SIZES[INTEGER_SIZES.len() - 1].0;
        for &(size, weight) in &INTEGER_SIZES {
            if roll < weight {
                bits = size;
                break;
            }
            roll -= weight;
        }
        self.rng.gen::<u128>() >> (128 - bits)
    }

    /// Geometric size with an average a few elements above `min_size`.
    fn collection_size(&mut self, min_size: usize, max_size: usize) -> usize {
        let min = min_size as f64;
        let average = (min * 2.0).max(min + 5.0).min((min + max_size as f64) / 2.0);
        let extra = (average - min).max(0.0);
        let p_continue = extra / (extra + 1.0);
        let mut size = min_size;
        while size < max_size && self.rng.gen_bool(p_continue) {
            size += 1;
        }
        size
    }

    fn integer_constant(&mut self, constraints: &IntegerConstraints) -> Option<i128> {
        let shrink_towards = constraints.effective_shrink_towards();
        let mut candidates = vec![shrink_towards, 0, 1, -1, i128::MAX, i128::MIN];
        if let Some(min) = constraints.min_value {
            candidates.extend([min, min.saturating_add(1)]);
        }
        if let Some(max) = constraints.max_value {
            candidates.extend([max, max.saturating_sub(1)]);
        }
        candidates.retain(|&v| constraints.permits(v));
        self.pick(&candidates)
    }
}

impl PrimitiveProvider for RandomProvider {
    fn draw_boolean(&mut self, constraints: &BooleanConstraints) -> bool {
        match constraints.only_value() {
            Some(value) => value,
            None => self.rng.gen_bool(constraints.p.clamp(0.0, 1.0)),
        }
    }

    fn draw_integer(&mut self, constraints: &IntegerConstraints) -> i128 {
        if self.use_constant() {
            if let Some(value) = self.integer_constant(constraints) {
                return value;
            }
        }
        let shrink_towards = constraints.effective_shrink_towards();
        let value = match (constraints.min_value, constraints.max_value) {
            (Some(min), Some(max)) => {
                if max.abs_diff(min) <= WIDE_RANGE || self.rng.gen_bool(0.125) {
                    return self.rng.gen_range(min..=max);
                }
                let magnitude = self.magnitude();
                if self.rng.gen() {
                    shrink_towards.saturating_add_unsigned(magnitude)
                } else {
                    shrink_towards.saturating_sub_unsigned(magnitude)
                }
            }
            (Some(min), None) => min.saturating_add_unsigned(self.magnitude()),
            (None, Some(max)) => max.saturating_sub_unsigned(self.magnitude()),
            (None, None) => {
                let magnitude = self.magnitude();
                if self.rng.gen() {
                    shrink_towards.saturating_add_unsigned(magnitude)
                } else {
                    shrink_towards.saturating_sub_unsigned(magnitude)
                }
            }
        };
        let value = constraints.min_value.map_or(value, |min| value.max(min));
        constraints.max_value.map_or(value, |max| value.min(max))
    }

    fn draw_float(&mut self, constraints: &FloatConstraints) -> f64 {
        let raw = match self.rng.gen_range(0..8) {
            0 => {
                let mut candidates: Vec<f64> = NASTY_FLOATS.iter().flat_map(|&v| [v, -v]).collect();
                candidates.extend([
                    f64::INFINITY,
                    f64::NEG_INFINITY,
                    f64::NAN,
                    constraints.min_value,
                    constraints.max_value,
                ]);
                candidates.retain(|&v| constraints.permits(v));
                self.pick(&candidates).unwrap_or_else(|| constraints.simplest())
            }
            1 | 2 => self.rng.gen_range(-100i32..=100) as f64,
            3 => {
                let magnitude = lex_to_float(self.rng.gen());
                if self.rng.gen() {
                    -magnitude
                } else {
                    magnitude
                }
            }
            _ => {
                let (min, max) = (constraints.min_value, constraints.max_value);
                if min.is_finite() && max.is_finite() {
                    let t: f64 = self.rng.gen();
                    min * (1.0 - t) + max * t
                } else {
                    f64::from_bits(self.rng.gen())
                }
            }
        };
        constraints.clamp(raw)
    }

    fn draw_string(&mut self, constraints: &StringConstraints) -> String {
        let alphabet = constraints.intervals.len();
        if alphabet == 0 {
            return String::new();
        }
        let size = self.collection_size(constraints.min_size, constraints.max_size);
        let mut value = String::with_capacity(size);
        for _ in 0..size {
            let limit = if self.rng.gen_bool(0.8) {
                alphabet.min(SMALL_ALPHABET)
            } else {
                alphabet
            };
            let index = self.rng.gen_range(0..limit);
            if let Some(c) = constraints.intervals.char_at(index) {
                value.push(c);
            }
        }
        value
    }

    fn draw_bytes(&mut self, constraints: &BytesConstraints) -> Vec<u8> {
        let size = self.collection_size(constraints.min_size, constraints.max_size);
        (0..size).map(|_| self.rng.gen()).collect()
    }
}

/// Always draws the simplest permitted value.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimplestProvider;

impl PrimitiveProvider for SimplestProvider {
    fn draw_boolean(&mut self, constraints: &BooleanConstraints) -> bool {
        constraints.simplest()
    }

    fn draw_integer(&mut self, constraints: &IntegerConstraints) -> i128 {
        constraints.simplest()
    }

    fn draw_float(&mut self, constraints: &FloatConstraints) -> f64 {
        constraints.simplest()
    }

    fn draw_string(&mut self, constraints: &StringConstraints) -> String {
        constraints.simplest()
    }

    fn draw_bytes(&mut self, constraints: &BytesConstraints) -> Vec<u8> {
        constraints.simplest()
    }
}
