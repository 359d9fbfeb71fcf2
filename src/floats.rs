//! Lexicographic float encoding
//!
//! Maps non-negative `f64` values onto `u64` so that smaller encodings are
//! simpler floats. Two branches are distinguished by the top bit:
//!
//! - tag 0: integral values below 2^56, encoded as themselves, so `0.0 < 1.0 < 2.0`;
//! - tag 1: everything else, with the exponent reordered (non-negative
//!   exponents first, then negative ones, then inf/NaN) and the fractional
//!   mantissa bits reversed so fewer fractional bits sort earlier.
//!
//! The sign is not part of the encoding; callers handle it separately.

use once_cell::sync::Lazy;

const MANTISSA_BITS: u32 = 52;
const EXPONENT_BITS: u32 = 11;
const MAX_EXPONENT: u32 = (1 << EXPONENT_BITS) - 1;
const BIAS: i32 = 1023;
const MANTISSA_MASK: u64 = (1 << MANTISSA_BITS) - 1;
const SIMPLE_BITS: u32 = 56;
const TAG: u64 = 1 << 63;

/// `(encoding, decoding)` tables: `encoding[i]` is the exponent stored at
/// sorted position `i`, `decoding[e]` the sorted position of exponent `e`.
static EXPONENT_TABLES: Lazy<(Vec<u32>, Vec<u32>)> = Lazy::new(|| {
    let mut exponents: Vec<u32> = (0..=MAX_EXPONENT).collect();
    exponents.sort_by_key(|&e| exponent_key(e));
    let mut decoding = vec![0u32; exponents.len()];
    for (position, &exponent) in exponents.iter().enumerate() {
        decoding[exponent as usize] = position as u32;
    }
    (exponents, decoding)
});

fn exponent_key(exponent: u32) -> u64 {
    if exponent == MAX_EXPONENT {
        return u64::MAX;
    }
    let unbiased = exponent as i32 - BIAS;
    if unbiased < 0 {
        (10_000 - unbiased as i64) as u64
    } else {
        unbiased as u64
    }
}

fn reverse_bits(value: u64, width: u32) -> u64 {
    if width == 0 {
        0
    } else {
        value.reverse_bits() >> (64 - width)
    }
}

/// Reverses the fractional part of the mantissa. Self-inverse for a fixed
/// exponent, so the same function encodes and decodes.
fn update_mantissa(unbiased_exponent: i32, mantissa: u64) -> u64 {
    if unbiased_exponent <= 0 {
        reverse_bits(mantissa, MANTISSA_BITS)
    } else if unbiased_exponent <= MANTISSA_BITS as i32 {
        let fractional_bits = MANTISSA_BITS - unbiased_exponent as u32;
        let fractional_mask = (1u64 << fractional_bits) - 1;
        (mantissa & !fractional_mask) | reverse_bits(mantissa & fractional_mask, fractional_bits)
    } else {
        mantissa
    }
}

/// Whether `value` takes the integral branch of the encoding.
pub fn is_simple(value: f64) -> bool {
    if !value.is_finite() || value < 0.0 || value.is_sign_negative() {
        return false;
    }
    let integral = value as u64;
    if integral as f64 != value {
        return false;
    }
    64 - integral.leading_zeros() <= SIMPLE_BITS
}

pub fn float_to_lex(value: f64) -> u64 {
    let value = value.abs();
    if is_simple(value) {
        return value as u64;
    }
    let bits = value.to_bits() & !(1 << 63);
    let exponent = (bits >> MANTISSA_BITS) as u32;
    let mantissa = update_mantissa(exponent as i32 - BIAS, bits & MANTISSA_MASK);
    let position = EXPONENT_TABLES.1[exponent as usize] as u64;
    TAG | (position << MANTISSA_BITS) | mantissa
}

pub fn lex_to_float(encoded: u64) -> f64 {
    if encoded & TAG == 0 {
        return (encoded & ((1 << SIMPLE_BITS) - 1)) as f64;
    }
    let position = ((encoded >> MANTISSA_BITS) & MAX_EXPONENT as u64) as usize;
    let exponent = EXPONENT_TABLES.0[position];
    let mantissa = update_mantissa(exponent as i32 - BIAS, encoded & MANTISSA_MASK);
    f64::from_bits(((exponent as u64) << MANTISSA_BITS) | mantissa)
}

/// The member of `[low, high]` divisible by the largest power of two. It
/// has the smallest bit reversal.
fn most_trailing_zeros(low: u64, high: u64) -> u64 {
    if low == 0 {
        return 0;
    }
    for shift in (0..MANTISSA_BITS + 1).rev() {
        let step = 1u64 << shift;
        let candidate = ((low + step - 1) / step) * step;
        if candidate <= high {
            return candidate;
        }
    }
    low
}

/// The float in `[low, high]` with the smallest [`float_to_lex`]. Both
/// bounds are non-negative.
pub fn simplest_in_range(low: f64, high: f64) -> f64 {
    if low <= 0.0 {
        return 0.0;
    }
    if low.is_infinite() {
        return low;
    }
    let high = high.min(f64::MAX);
    let integral = low.ceil();
    if integral <= high && is_simple(integral) {
        return integral;
    }

    let (low_bits, high_bits) = (low.to_bits(), high.to_bits());
    let low_exponent = (low_bits >> MANTISSA_BITS) as u32;
    let high_exponent = (high_bits >> MANTISSA_BITS) as u32;
    let exponent = (low_exponent..=high_exponent)
        .min_by_key(|&e| exponent_key(e))
        .unwrap_or(low_exponent);

    let base = u64::from(exponent) << MANTISSA_BITS;
    let low_mantissa = low_bits.max(base) & MANTISSA_MASK;
    let high_mantissa = high_bits.min(base | MANTISSA_MASK) & MANTISSA_MASK;
    let unbiased = exponent as i32 - BIAS;
    let fractional_bits = if unbiased <= 0 {
        MANTISSA_BITS
    } else {
        MANTISSA_BITS.saturating_sub(unbiased as u32)
    };
    let fractional_mask = (1u64 << fractional_bits) - 1;
    // Integral mantissa bits compare as they are, so keep the smallest and
    // pick the simplest fraction under it.
    let integral_bits = low_mantissa & !fractional_mask;
    let fraction_high = if high_mantissa & !fractional_mask == integral_bits {
        high_mantissa & fractional_mask
    } else {
        fractional_mask
    };
    let fraction = most_trailing_zeros(low_mantissa & fractional_mask, fraction_high);
    f64::from_bits(base | integral_bits | fraction)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integral_floats_encode_as_themselves() {
        assert_eq!(float_to_lex(0.0), 0);
        assert_eq!(float_to_lex(1.0), 1);
        assert_eq!(float_to_lex(17.0), 17);
        assert_eq!(lex_to_float(17), 17.0);
    }

    #[test]
    fn fractional_values_sort_after_integers() {
        assert!(float_to_lex(1.5) > float_to_lex(1_000_000.0));
        assert!(float_to_lex(0.5) > float_to_lex(2.5));
    }

    #[test]
    fn fewer_fractional_bits_are_simpler() {
        assert!(float_to_lex(1.5) < float_to_lex(1.25));
        assert!(float_to_lex(2.5) < float_to_lex(2.75));
    }

    #[test]
    fn specials_sort_last() {
        let inf = float_to_lex(f64::INFINITY);
        assert!(inf > float_to_lex(f64::MAX));
        assert!(float_to_lex(f64::NAN) >= inf);
    }

    #[test]
    fn round_trips() {
        let samples = [
            0.0,
            0.5,
            1.0,
            1.5,
            3.25,
            1e-300,
            f64::from_bits(1),
            f64::MIN_POSITIVE,
            2f64.powi(60),
            123_456.789,
            f64::MAX,
            f64::INFINITY,
        ];
        for &value in &samples {
            assert_eq!(lex_to_float(float_to_lex(value)).to_bits(), value.to_bits(), "{:?}", value);
        }
        assert!(lex_to_float(float_to_lex(f64::NAN)).is_nan());
    }

    #[test]
    fn sign_is_ignored() {
        assert_eq!(float_to_lex(-3.5), float_to_lex(3.5));
        assert!(!is_simple(-0.0));
        assert!(is_simple(0.0));
    }

    #[test]
    fn simplest_in_range_prefers_integers_then_short_fractions() {
        assert_eq!(simplest_in_range(0.0, 3.0), 0.0);
        assert_eq!(simplest_in_range(2.5, 7.25), 3.0);
        assert_eq!(simplest_in_range(1.25, 1.75), 1.5);
        assert_eq!(simplest_in_range(0.3, 0.4), 0.375);
        assert_eq!(simplest_in_range(0.3, 0.6), 0.5);
        assert_eq!(simplest_in_range(f64::INFINITY, f64::INFINITY), f64::INFINITY);
        assert_eq!(simplest_in_range(2f64.powi(60), 2f64.powi(61)), 2f64.powi(60));
    }

    #[test]
    fn simplest_in_range_beats_every_member() {
        let ranges = [(1.25, 1.75), (0.01, 0.02), (3.1, 3.9), (1e-310, 1e-309), (100.1, 100.2)];
        for &(low, high) in &ranges {
            let best = simplest_in_range(low, high);
            assert!(low <= best && best <= high, "{} outside [{}, {}]", best, low, high);
            for step in 0..=1_000 {
                let value = low + (high - low) * f64::from(step) / 1_000.0;
                assert!(float_to_lex(best) <= float_to_lex(value), "{} beats {}", value, best);
            }
        }
    }

    #[test]
    fn large_integers_are_not_simple() {
        assert!(!is_simple(2f64.powi(57)));
        assert!(is_simple(2f64.powi(55)));
    }
}
