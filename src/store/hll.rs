//! Bounded-error distinct-count registers.
//!
//! A bank is `m = 2^p` small-integer registers for precision `p ∈ [4, 16]`.
//! Adding an element hashes it to 64 bits, selects a register with the low
//! `p` bits and stores the max of the register and the leading-zero run of
//! the remaining bits (+1). The estimate is the standard harmonic mean
//! scaled by α(m), with linear counting at the low end and the large-range
//! correction at the top. Standard error is `1.04 / sqrt(m)`.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::shared::hash::mixed64;

const PRECISION_MIN: u8 = 4;
const PRECISION_MAX: u8 = 16;
const TWO_POW_32: f64 = 4_294_967_296.0;

/// A cardinality register bank.
///
/// # Examples
///
/// ```rust
/// use fincache::store::RegisterBank;
///
/// let mut bank = RegisterBank::new(14).unwrap();
/// for tx in ["tx1", "tx2", "tx3", "tx1"] {
///     bank.add(tx.as_bytes());
/// }
/// assert_eq!(bank.estimate(), 3);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterBank {
    precision: u8,
    registers: Vec<u8>,
}

impl RegisterBank {
    /// Create a bank with `2^precision` registers.
    pub fn new(precision: u8) -> Result<Self> {
        if !(PRECISION_MIN..=PRECISION_MAX).contains(&precision) {
            return Err(Error::Constraint(format!(
                "precision {precision} outside [{PRECISION_MIN}, {PRECISION_MAX}]"
            )));
        }
        Ok(Self {
            precision,
            registers: vec![0; 1 << precision],
        })
    }

    /// The bank's precision `p`.
    pub fn precision(&self) -> u8 {
        self.precision
    }

    /// Number of registers (`m`).
    pub fn register_count(&self) -> usize {
        self.registers.len()
    }

    /// Observe one element. Returns `true` when a register grew, which is
    /// the signal `PFADD` uses for its 0/1 reply.
    pub fn add(&mut self, element: &[u8]) -> bool {
        let hash = mixed64(element);
        let index = (hash & ((1 << self.precision) - 1)) as usize;
        let remainder = hash >> self.precision;
        // Leading-zero run of the remaining 64-p bits, +1 convention.
        let width = 64 - u32::from(self.precision);
        let rank = if remainder == 0 {
            (width + 1) as u8
        } else {
            (remainder.leading_zeros() - u32::from(self.precision) + 1) as u8
        };
        if rank > self.registers[index] {
            self.registers[index] = rank;
            true
        } else {
            false
        }
    }

    /// Harmonic-mean cardinality estimate with the standard corrections.
    pub fn estimate(&self) -> u64 {
        let m = self.registers.len() as f64;
        let sum: f64 = self
            .registers
            .iter()
            .map(|&r| 2f64.powi(-i32::from(r)))
            .sum();
        let raw = alpha(self.registers.len()) * m * m / sum;

        let zeros = self.registers.iter().filter(|&&r| r == 0).count();
        let corrected = if raw <= 2.5 * m && zeros > 0 {
            // Linear counting regime.
            m * (m / zeros as f64).ln()
        } else if raw > TWO_POW_32 / 30.0 {
            // Large-range correction.
            -TWO_POW_32 * (1.0 - raw / TWO_POW_32).ln()
        } else {
            raw
        };
        corrected.round() as u64
    }

    /// Merge another bank into this one. Both banks must share a
    /// precision; the merge is an element-wise register maximum.
    pub fn merge(&mut self, other: &RegisterBank) -> Result<()> {
        if self.precision != other.precision {
            return Err(Error::Constraint(format!(
                "cannot merge precision {} into {}",
                other.precision, self.precision
            )));
        }
        for (mine, theirs) in self.registers.iter_mut().zip(&other.registers) {
            if *theirs > *mine {
                *mine = *theirs;
            }
        }
        Ok(())
    }

    /// Theoretical standard error for this precision.
    pub fn standard_error(&self) -> f64 {
        1.04 / (self.registers.len() as f64).sqrt()
    }
}

fn alpha(m: usize) -> f64 {
    match m {
        16 => 0.673,
        32 => 0.697,
        64 => 0.709,
        _ => 0.7213 / (1.0 + 1.079 / m as f64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_precision() {
        assert!(RegisterBank::new(3).is_err());
        assert!(RegisterBank::new(17).is_err());
        assert!(RegisterBank::new(4).is_ok());
        assert!(RegisterBank::new(16).is_ok());
    }

    #[test]
    fn small_counts_are_exact_under_linear_counting() {
        let mut bank = RegisterBank::new(14).unwrap();
        assert!(bank.add(b"tx1"));
        bank.add(b"tx2");
        bank.add(b"tx3");
        // Re-adding must not grow any register.
        assert!(!bank.add(b"tx1"));
        assert_eq!(bank.estimate(), 3);
    }

    #[test]
    fn empty_bank_estimates_zero() {
        let bank = RegisterBank::new(10).unwrap();
        assert_eq!(bank.estimate(), 0);
    }

    #[test]
    fn estimate_within_error_bound() {
        let p = 12;
        let mut bank = RegisterBank::new(p).unwrap();
        let n = 100_000u64;
        for i in 0..n {
            bank.add(format!("element-{i}").as_bytes());
        }
        let estimate = bank.estimate() as f64;
        let bound = 3.0 * 1.04 / f64::from(1u32 << p).sqrt();
        let relative = (estimate - n as f64).abs() / n as f64;
        assert!(
            relative <= bound,
            "relative error {relative} exceeds {bound} (estimate {estimate})"
        );
    }

    #[test]
    fn merge_approximates_union() {
        let mut a = RegisterBank::new(12).unwrap();
        let mut b = RegisterBank::new(12).unwrap();
        for i in 0..30_000 {
            a.add(format!("left-{i}").as_bytes());
        }
        for i in 0..30_000 {
            b.add(format!("right-{i}").as_bytes());
        }
        // 10k shared elements.
        for i in 0..10_000 {
            a.add(format!("shared-{i}").as_bytes());
            b.add(format!("shared-{i}").as_bytes());
        }
        a.merge(&b).unwrap();
        let union = 70_000f64;
        let bound = 3.0 * 1.04 / f64::from(1u32 << 12).sqrt();
        let relative = (a.estimate() as f64 - union).abs() / union;
        assert!(relative <= bound, "relative error {relative} exceeds {bound}");
    }

    #[test]
    fn merge_requires_equal_precision() {
        let mut a = RegisterBank::new(12).unwrap();
        let b = RegisterBank::new(13).unwrap();
        assert!(a.merge(&b).is_err());
    }

    #[test]
    fn merge_is_idempotent() {
        let mut a = RegisterBank::new(10).unwrap();
        for i in 0..1000 {
            a.add(format!("e{i}").as_bytes());
        }
        let before = a.estimate();
        let copy = a.clone();
        a.merge(&copy).unwrap();
        assert_eq!(a.estimate(), before);
    }
}
