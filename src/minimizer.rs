//! Sequence minimization
//!
//! Given a sequence of non-negative integers `X` and a predicate `P` with
//! `P(X)` true, [`Minimizer`] searches for a lexicographically smaller
//! sequence of the same length that still satisfies `P`. It only ever moves
//! to candidates that satisfied the predicate, so the result is always valid
//! and never larger than the input.
//!
//! The predicate may fail with its own error type; the first error aborts
//! the search. [`minimize`] wraps the infallible case.

use crate::floats::{float_to_lex, is_simple, lex_to_float};

use std::collections::HashSet;
use std::convert::Infallible;

/// Sequences longer than this only rebalance adjacent pairs.
const ALL_PAIRS_LIMIT: usize = 16;

/// Finds (roughly) the largest `n` with `f(n)` true, assuming `f(0)` holds.
/// Probes small values linearly, then gallops and bisects, so it costs
/// `O(log n)` calls.
pub fn find_integer<E, F>(mut f: F) -> Result<u128, E>
where
    F: FnMut(u128) -> Result<bool, E>,
{
    for i in 1..5 {
        if !f(i)? {
            return Ok(i - 1);
        }
    }
    let mut lo: u128 = 4;
    let mut hi: u128 = 5;
    while f(hi)? {
        lo = hi;
        if hi == u128::MAX {
            return Ok(lo);
        }
        hi = hi.saturating_mul(2);
    }
    while lo + 1 < hi {
        let mid = lo + (hi - lo) / 2;
        if f(mid)? {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    Ok(lo)
}

/// Shrinks `start` towards zero, calling `f(v)` only for `v < start` and
/// moving to `v` whenever it returns true. Returns the smallest value
/// reached.
pub fn minimize_integer<E, F>(start: u128, mut f: F) -> Result<u128, E>
where
    F: FnMut(u128) -> Result<bool, E>,
{
    if start == 0 {
        return Ok(0);
    }
    for small in [0, 1] {
        if small >= start {
            return Ok(start);
        }
        if f(small)? {
            return Ok(small);
        }
    }

    let mut current = start;
    let mut try_value = |current: &mut u128, candidate: u128| -> Result<bool, E> {
        if candidate < *current && f(candidate)? {
            *current = candidate;
            Ok(true)
        } else {
            Ok(false)
        }
    };

    // Drop low bits while that keeps working.
    loop {
        let shifted = current >> 1;
        if shifted == current || !try_value(&mut current, shifted)? {
            break;
        }
    }

    // Clear the high bits one at a time.
    for bit in (0..128).rev() {
        let mask = 1u128 << bit;
        if current & mask != 0 {
            let cleared = current & !mask;
            try_value(&mut current, cleared)?;
        }
    }

    // Walk down by a growing amount.
    let base = current;
    find_integer(|k| {
        if k > base {
            return Ok(false);
        }
        let candidate = base - k;
        if candidate == current {
            return Ok(true);
        }
        try_value(&mut current, candidate)
    })?;

    // Finally bisect between what we know fails and what works.
    let mut lo = 0u128;
    let mut hi = current;
    while lo + 1 < hi {
        let mid = lo + (hi - lo) / 2;
        if try_value(&mut current, mid)? {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    Ok(current)
}

/// Whether `value` is the lexicographic encoding of a non-simple float.
fn is_encoded_float(value: u128) -> bool {
    value >> 64 == 0 && value & (1 << 63) != 0
}

pub struct Minimizer<F> {
    current: Vec<u128>,
    predicate: F,
    seen: HashSet<Vec<u128>>,
    calls: usize,
}

impl<E, F> Minimizer<F>
where
    F: FnMut(&[u128]) -> Result<bool, E>,
{
    /// `predicate(&initial)` is assumed to be true.
    pub fn new(initial: Vec<u128>, predicate: F) -> Self {
        let mut seen = HashSet::new();
        seen.insert(initial.clone());
        Self {
            current: initial,
            predicate,
            seen,
            calls: 0,
        }
    }

    pub fn current(&self) -> &[u128] {
        &self.current
    }

    /// Predicate evaluations so far.
    pub fn calls(&self) -> usize {
        self.calls
    }

    /// Moves to `candidate` if it is strictly smaller and satisfies the
    /// predicate.
    fn incorporate(&mut self, candidate: Vec<u128>) -> Result<bool, E> {
        if candidate.len() != self.current.len() || candidate >= self.current {
            return Ok(false);
        }
        if !self.seen.insert(candidate.clone()) {
            return Ok(false);
        }
        self.calls += 1;
        if (self.predicate)(&candidate)? {
            self.current = candidate;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Like `incorporate`, but the current sequence itself counts as a
    /// success. Used as the predicate for `find_integer`.
    fn accepts(&mut self, candidate: Vec<u128>) -> Result<bool, E> {
        if candidate == self.current {
            return Ok(true);
        }
        self.incorporate(candidate)
    }

    fn replace(&mut self, index: usize, value: u128) -> Result<bool, E> {
        let mut candidate = self.current.clone();
        candidate[index] = value;
        self.incorporate(candidate)
    }

    pub fn run(mut self) -> Result<Vec<u128>, E> {
        let n = self.current.len();
        if self.current.iter().all(|&v| v == 0) {
            return Ok(self.current);
        }
        if n == 1 {
            self.float_hack(0)?;
            self.minimize_index(0)?;
            return Ok(self.current);
        }
        if self.incorporate(vec![0; n])? {
            return Ok(self.current);
        }
        let mut last_one = vec![0; n];
        last_one[n - 1] = 1;
        if self.incorporate(last_one)? {
            return Ok(self.current);
        }
        self.zero_prefix()?;

        loop {
            let before = self.current.clone();
            let mut sorted = self.current.clone();
            sorted.sort_unstable();
            self.incorporate(sorted)?;
            for i in 0..n {
                self.float_hack(i)?;
            }
            for i in 0..n {
                self.minimize_index(i)?;
            }
            self.rebalance_pairs()?;
            self.partial_sort()?;
            if self.current == before {
                return Ok(self.current);
            }
        }
    }

    /// Zeroes the longest prefix that can be zeroed.
    fn zero_prefix(&mut self) -> Result<(), E> {
        let base = self.current.clone();
        find_integer(|k| {
            let k = match usize::try_from(k) {
                Ok(k) if k <= base.len() => k,
                _ => return Ok(false),
            };
            let mut candidate = base.clone();
            candidate[..k].iter_mut().for_each(|v| *v = 0);
            self.accepts(candidate)
        })?;
        Ok(())
    }

    fn minimize_index(&mut self, index: usize) -> Result<(), E> {
        let start = self.current[index];
        minimize_integer(start, |v| self.replace(index, v))?;
        Ok(())
    }

    /// Floats with a fractional part encode as large values. Jumping to a
    /// nearby integral float gets them onto the cheap integral branch.
    fn float_hack(&mut self, index: usize) -> Result<(), E> {
        let value = self.current[index];
        if !is_encoded_float(value) {
            return Ok(());
        }
        let float = lex_to_float(value as u64);
        if !float.is_finite() {
            return Ok(());
        }
        for candidate in [float.floor(), float.ceil()] {
            if is_simple(candidate) {
                let encoded = u128::from(float_to_lex(candidate));
                if self.replace(index, encoded)? {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Moves weight from an earlier element to a later one.
    fn rebalance_pairs(&mut self) -> Result<(), E> {
        let n = self.current.len();
        for i in 0..n {
            let limit = if n <= ALL_PAIRS_LIMIT { n } else { (i + 2).min(n) };
            for j in (i + 1)..limit {
                let base = self.current.clone();
                let (a, b) = (base[i], base[j]);
                if a == 0 {
                    break;
                }
                find_integer(|k| {
                    if k > a {
                        return Ok(false);
                    }
                    let moved = match b.checked_add(k) {
                        Some(moved) => moved,
                        None => return Ok(false),
                    };
                    let mut candidate = base.clone();
                    candidate[i] = a - k;
                    candidate[j] = moved;
                    self.accepts(candidate)
                })?;
            }
        }
        Ok(())
    }

    /// Swaps out-of-order pairs one at a time.
    fn partial_sort(&mut self) -> Result<(), E> {
        let n = self.current.len();
        for i in 0..n {
            for j in (i + 1)..n {
                if self.current[i] > self.current[j] {
                    let mut candidate = self.current.clone();
                    candidate.swap(i, j);
                    self.incorporate(candidate)?;
                }
            }
        }
        Ok(())
    }
}

/// Minimizes `initial` under an infallible predicate.
pub fn minimize<P>(initial: Vec<u128>, mut predicate: P) -> Vec<u128>
where
    P: FnMut(&[u128]) -> bool,
{
    let minimizer = Minimizer::new(initial, |candidate: &[u128]| Ok::<bool, Infallible>(predicate(candidate)));
    match minimizer.run() {
        Ok(result) => result,
        Err(never) => match never {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_integer_finds_the_boundary() {
        for limit in [0u128, 1, 3, 4, 5, 17, 1000, 1 << 40] {
            let found = find_integer::<Infallible, _>(|n| Ok(n <= limit)).unwrap();
            assert_eq!(found, limit);
        }
    }

    #[test]
    fn find_integer_is_logarithmic() {
        let mut calls = 0;
        let found = find_integer::<Infallible, _>(|n| {
            calls += 1;
            Ok(n <= 1_000_000)
        })
        .unwrap();
        assert_eq!(found, 1_000_000);
        assert!(calls < 60, "{} calls", calls);
    }

    #[test]
    fn minimize_integer_reaches_threshold() {
        let result = minimize_integer::<Infallible, _>(1_000_000, |v| Ok(v >= 100)).unwrap();
        assert_eq!(result, 100);
        let result = minimize_integer::<Infallible, _>(u128::MAX, |v| Ok(v >= 12345)).unwrap();
        assert_eq!(result, 12345);
    }

    #[test]
    fn minimize_integer_only_asks_smaller_values() {
        let start = 500;
        minimize_integer::<Infallible, _>(start, |v| {
            assert!(v < start);
            Ok(v % 7 == 3)
        })
        .unwrap();
    }

    #[test]
    fn minimize_integer_propagates_errors() {
        let result = minimize_integer(10, |_| Err("stop"));
        assert_eq!(result, Err("stop"));
    }

    #[test]
    fn zero_is_found_first() {
        assert_eq!(minimize(vec![5, 6, 7], |_| true), vec![0, 0, 0]);
    }

    #[test]
    fn sum_constraint_is_rebalanced() {
        let result = minimize(vec![10, 10], |s| s[0] + s[1] >= 20);
        assert_eq!(result, vec![0, 20]);
    }

    #[test]
    fn sorting_is_used() {
        let result = minimize(vec![9, 1, 5], |s| s.contains(&9) && s.contains(&5));
        assert_eq!(result, vec![0, 5, 9]);
    }

    #[test]
    fn float_hack_reaches_integral_values() {
        let start = u128::from(float_to_lex(2.75));
        let result = minimize(vec![start], |s| s[0] >> 64 == 0 && lex_to_float(s[0] as u64) >= 2.5);
        assert_eq!(lex_to_float(result[0] as u64), 3.0);
    }

    #[test]
    fn result_never_grows_or_breaks_the_predicate() {
        let predicate = |s: &[u128]| s.iter().sum::<u128>() % 5 == 2 && s[2] > 3;
        let initial = vec![13, 8, 21, 4];
        assert!(predicate(&initial));
        let result = minimize(initial.clone(), predicate);
        assert!(predicate(&result));
        assert!(result <= initial);
        assert_eq!(result.len(), initial.len());
    }
}
