//! Per-kind constraints
//!
//! A constraint decides which values a draw may produce, which value is the
//! simplest, and whether the space of values is small enough to enumerate.
//! Invalid constraints are reported by `validate` and surface as usage
//! errors at the draw site.

use super::IntervalSet;
use crate::floats::simplest_in_range;

use serde::{Deserialize, Serialize};

/// Default upper bound on collection sizes.
pub const DEFAULT_MAX_SIZE: usize = usize::MAX;

/// Probability below which a boolean is considered always false (and above
/// `1 - P_EPSILON` always true).
fn p_epsilon() -> f64 {
    2f64.powi(-64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntegerConstraints {
    pub min_value: Option<i128>,
    pub max_value: Option<i128>,
    pub shrink_towards: i128,
}

impl Default for IntegerConstraints {
    fn default() -> Self {
        Self {
            min_value: None,
            max_value: None,
            shrink_towards: 0,
        }
    }
}

impl IntegerConstraints {
    pub fn new(min_value: Option<i128>, max_value: Option<i128>) -> Self {
        Self {
            min_value,
            max_value,
            shrink_towards: 0,
        }
    }

    pub fn bounded(min_value: i128, max_value: i128) -> Self {
        Self::new(Some(min_value), Some(max_value))
    }

    pub fn with_shrink_towards(mut self, shrink_towards: i128) -> Self {
        self.shrink_towards = shrink_towards;
        self
    }

    /// `shrink_towards` clamped into the permitted range.
    pub fn effective_shrink_towards(&self) -> i128 {
        let mut target = self.shrink_towards;
        if let Some(min) = self.min_value {
            target = target.max(min);
        }
        if let Some(max) = self.max_value {
            target = target.min(max);
        }
        target
    }

    pub fn permits(&self, value: i128) -> bool {
        self.min_value.map_or(true, |min| value >= min) && self.max_value.map_or(true, |max| value <= max)
    }

    pub fn simplest(&self) -> i128 {
        self.effective_shrink_towards()
    }

    pub fn validate(&self) -> Result<(), String> {
        match (self.min_value, self.max_value) {
            (Some(min), Some(max)) if min > max => {
                Err(format!("integer bounds are inverted: min_value={} > max_value={}", min, max))
            }
            _ => Ok(()),
        }
    }

    pub fn cardinality(&self) -> Option<u128> {
        let (min, max) = (self.min_value?, self.max_value?);
        max.abs_diff(min).checked_add(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BooleanConstraints {
    pub p: f64,
}

impl Default for BooleanConstraints {
    fn default() -> Self {
        Self { p: 0.5 }
    }
}

impl BooleanConstraints {
    pub fn new(p: f64) -> Self {
        Self { p }
    }

    /// The only possible value when `p` is effectively 0 or 1.
    pub fn only_value(&self) -> Option<bool> {
        if self.p <= p_epsilon() {
            Some(false)
        } else if self.p >= 1.0 - p_epsilon() {
            Some(true)
        } else {
            None
        }
    }

    pub fn permits(&self, value: bool) -> bool {
        self.only_value().map_or(true, |only| only == value)
    }

    pub fn simplest(&self) -> bool {
        self.only_value().unwrap_or(false)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.p) {
            return Err(format!("boolean probability must lie in [0, 1], got {}", self.p));
        }
        Ok(())
    }

    pub fn cardinality(&self) -> u128 {
        if self.only_value().is_some() {
            1
        } else {
            2
        }
    }
}

/// `a <= b`, except that `-0.0` sorts strictly below `0.0`.
pub fn sign_aware_lte(a: f64, b: f64) -> bool {
    if a == 0.0 && b == 0.0 {
        a.is_sign_negative() || !b.is_sign_negative()
    } else {
        a <= b
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FloatConstraints {
    pub min_value: f64,
    pub max_value: f64,
    pub allow_nan: bool,
    pub smallest_nonzero_magnitude: f64,
}

impl Default for FloatConstraints {
    fn default() -> Self {
        Self {
            min_value: f64::NEG_INFINITY,
            max_value: f64::INFINITY,
            allow_nan: true,
            smallest_nonzero_magnitude: f64::from_bits(1),
        }
    }
}

impl FloatConstraints {
    pub fn bounded(min_value: f64, max_value: f64) -> Self {
        Self {
            min_value,
            max_value,
            allow_nan: false,
            ..Self::default()
        }
    }

    pub fn finite() -> Self {
        Self::bounded(f64::MIN, f64::MAX)
    }

    pub fn permits(&self, value: f64) -> bool {
        if value.is_nan() {
            return self.allow_nan;
        }
        sign_aware_lte(self.min_value, value)
            && sign_aware_lte(value, self.max_value)
            && (value == 0.0 || value.abs() >= self.smallest_nonzero_magnitude)
    }

    /// The permitted value with the smallest complexity index: positive
    /// values come before negative ones, and within a sign the simplest
    /// magnitude by [`float_to_lex`](crate::floats::float_to_lex) wins. NaN only when nothing else is
    /// permitted.
    pub fn simplest(&self) -> f64 {
        if self.permits(0.0) {
            return 0.0;
        }
        let magnitude = self.smallest_nonzero_magnitude;
        if self.max_value > 0.0 {
            let low = self.min_value.max(magnitude);
            if low <= self.max_value {
                return simplest_in_range(low, self.max_value);
            }
        }
        if self.permits(-0.0) {
            return -0.0;
        }
        if self.min_value < 0.0 {
            let low = (-self.max_value).max(magnitude);
            if low <= -self.min_value {
                return -simplest_in_range(low, -self.min_value);
            }
        }
        if self.allow_nan {
            f64::NAN
        } else {
            self.max_value
        }
    }

    /// Maps an arbitrary float onto a permitted one, preferring the nearest.
    pub fn clamp(&self, value: f64) -> f64 {
        if self.permits(value) {
            return value;
        }
        if value.is_nan() {
            return self.simplest();
        }
        let mut clamped = value.max(self.min_value).min(self.max_value);
        if clamped != 0.0 && clamped.abs() < self.smallest_nonzero_magnitude {
            clamped = self.smallest_nonzero_magnitude.copysign(clamped);
        }
        if self.permits(clamped) {
            clamped
        } else {
            self.simplest()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.min_value.is_nan() || self.max_value.is_nan() {
            return Err("float bounds must not be NaN".to_string());
        }
        if !sign_aware_lte(self.min_value, self.max_value) {
            return Err(format!(
                "float bounds are inverted: min_value={:?} > max_value={:?}",
                self.min_value, self.max_value
            ));
        }
        if !(self.smallest_nonzero_magnitude > 0.0) {
            return Err(format!(
                "smallest_nonzero_magnitude must be positive, got {:?}",
                self.smallest_nonzero_magnitude
            ));
        }
        if !self.permits(self.simplest()) {
            return Err(format!(
                "no float in [{:?}, {:?}] has magnitude at least {:?}",
                self.min_value, self.max_value, self.smallest_nonzero_magnitude
            ));
        }
        Ok(())
    }

    pub fn cardinality(&self) -> Option<u128> {
        if !self.allow_nan && self.min_value.to_bits() == self.max_value.to_bits() {
            Some(1)
        } else {
            None
        }
    }
}

/// Number of sequences over `alphabet` symbols with length in `[min, max]`.
fn collection_cardinality(alphabet: u128, min_size: usize, max_size: usize) -> Option<u128> {
    if alphabet == 0 {
        return if min_size == 0 { Some(1) } else { Some(0) };
    }
    if alphabet == 1 {
        return u128::try_from(max_size - min_size).ok()?.checked_add(1);
    }
    if max_size - min_size > 128 {
        return None;
    }
    let mut total: u128 = 0;
    for size in min_size..=max_size {
        let count = alphabet.checked_pow(u32::try_from(size).ok()?)?;
        total = total.checked_add(count)?;
    }
    Some(total)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StringConstraints {
    pub intervals: IntervalSet,
    pub min_size: usize,
    pub max_size: usize,
}

impl Default for StringConstraints {
    fn default() -> Self {
        Self {
            intervals: IntervalSet::all(),
            min_size: 0,
            max_size: DEFAULT_MAX_SIZE,
        }
    }
}

impl StringConstraints {
    pub fn new(intervals: IntervalSet, min_size: usize, max_size: usize) -> Self {
        Self {
            intervals,
            min_size,
            max_size,
        }
    }

    pub fn permits(&self, value: &str) -> bool {
        let size = value.chars().count();
        size >= self.min_size && size <= self.max_size && value.chars().all(|c| self.intervals.contains(c))
    }

    pub fn simplest(&self) -> String {
        match self.intervals.char_at(0) {
            Some(c) => std::iter::repeat(c).take(self.min_size).collect(),
            None => String::new(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.min_size > self.max_size {
            return Err(format!(
                "string sizes are inverted: min_size={} > max_size={}",
                self.min_size, self.max_size
            ));
        }
        if self.intervals.is_empty() && self.min_size > 0 {
            return Err("cannot draw a non-empty string from an empty alphabet".to_string());
        }
        Ok(())
    }

    pub fn cardinality(&self) -> Option<u128> {
        collection_cardinality(self.intervals.len() as u128, self.min_size, self.max_size)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BytesConstraints {
    pub min_size: usize,
    pub max_size: usize,
}

impl Default for BytesConstraints {
    fn default() -> Self {
        Self {
            min_size: 0,
            max_size: DEFAULT_MAX_SIZE,
        }
    }
}

impl BytesConstraints {
    pub fn new(min_size: usize, max_size: usize) -> Self {
        Self { min_size, max_size }
    }

    pub fn permits(&self, value: &[u8]) -> bool {
        value.len() >= self.min_size && value.len() <= self.max_size
    }

    pub fn simplest(&self) -> Vec<u8> {
        vec![0; self.min_size]
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.min_size > self.max_size {
            return Err(format!(
                "bytes sizes are inverted: min_size={} > max_size={}",
                self.min_size, self.max_size
            ));
        }
        Ok(())
    }

    pub fn cardinality(&self) -> Option<u128> {
        collection_cardinality(256, self.min_size, self.max_size)
    }
}
