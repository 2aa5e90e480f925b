//! U256 arithmetic helpers for on-chain amounts.
//!
//! All wei-denominated values exceed 64-bit range and are carried as `U256`
//! end to end; decimal strings are the lossless interchange format at the
//! HTTP and subgraph boundaries.

use alloy::primitives::U256;
use thiserror::Error;

/// WAD constant: 1e18 for 18-decimal fixed-point arithmetic
pub const WAD: U256 = U256::from_limbs([1_000_000_000_000_000_000u64, 0, 0, 0]);

/// Basis points denominator (10000 = 100%)
pub const BPS_DENOMINATOR: U256 = U256::from_limbs([10000u64, 0, 0, 0]);

/// Pre-computed powers of 10 for fast decimal conversion
const POW10: [u128; 39] = [
    1,
    10,
    100,
    1_000,
    10_000,
    100_000,
    1_000_000,
    10_000_000,
    100_000_000,
    1_000_000_000,
    10_000_000_000,
    100_000_000_000,
    1_000_000_000_000,
    10_000_000_000_000,
    100_000_000_000_000,
    1_000_000_000_000_000,
    10_000_000_000_000_000,
    100_000_000_000_000_000,
    1_000_000_000_000_000_000,
    10_000_000_000_000_000_000,
    100_000_000_000_000_000_000,
    1_000_000_000_000_000_000_000,
    10_000_000_000_000_000_000_000,
    100_000_000_000_000_000_000_000,
    1_000_000_000_000_000_000_000_000,
    10_000_000_000_000_000_000_000_000,
    100_000_000_000_000_000_000_000_000,
    1_000_000_000_000_000_000_000_000_000,
    10_000_000_000_000_000_000_000_000_000,
    100_000_000_000_000_000_000_000_000_000,
    1_000_000_000_000_000_000_000_000_000_000,
    10_000_000_000_000_000_000_000_000_000_000,
    100_000_000_000_000_000_000_000_000_000_000,
    1_000_000_000_000_000_000_000_000_000_000_000,
    10_000_000_000_000_000_000_000_000_000_000_000,
    100_000_000_000_000_000_000_000_000_000_000_000,
    1_000_000_000_000_000_000_000_000_000_000_000_000,
    10_000_000_000_000_000_000_000_000_000_000_000_000,
    100_000_000_000_000_000_000_000_000_000_000_000_000,
];

/// Decimal string conversion failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MathError {
    #[error("invalid decimal string: {0:?}")]
    InvalidDecimal(String),
    #[error("too many fractional digits (max {max})")]
    TooManyFractionDigits { max: u8 },
    #[error("value out of range")]
    Overflow,
}

/// Fast power of 10 lookup (up to 10^38)
#[inline(always)]
pub fn pow10(exp: u8) -> U256 {
    if exp < 39 {
        U256::from(POW10[exp as usize])
    } else {
        U256::from(10u64).pow(U256::from(exp))
    }
}

/// Parse a non-negative decimal string into base units with `decimals`
/// fractional digits. `"1.5"` at 18 decimals becomes `1_500…000` (18 zeros).
pub fn to_base_unit(value: &str, decimals: u8) -> Result<U256, MathError> {
    let value = value.trim();
    let (int_part, frac_part) = match value.split_once('.') {
        Some((i, f)) => (i, f),
        None => (value, ""),
    };

    if int_part.is_empty() && frac_part.is_empty() {
        return Err(MathError::InvalidDecimal(value.to_string()));
    }
    if !int_part.bytes().all(|b| b.is_ascii_digit()) || !frac_part.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(MathError::InvalidDecimal(value.to_string()));
    }
    if frac_part.len() > decimals as usize {
        return Err(MathError::TooManyFractionDigits { max: decimals });
    }

    let int_units = if int_part.is_empty() {
        U256::ZERO
    } else {
        U256::from_str_radix(int_part, 10).map_err(|_| MathError::Overflow)?
    };
    let int_units = int_units
        .checked_mul(pow10(decimals))
        .ok_or(MathError::Overflow)?;

    let frac_units = if frac_part.is_empty() {
        U256::ZERO
    } else {
        let padded = format!("{frac_part:0<width$}", width = decimals as usize);
        U256::from_str_radix(&padded, 10).map_err(|_| MathError::Overflow)?
    };

    int_units.checked_add(frac_units).ok_or(MathError::Overflow)
}

/// Render base units back into a canonical decimal string (no trailing
/// fractional zeros). Inverse of [`to_base_unit`] for canonical inputs.
pub fn from_base_unit(value: U256, decimals: u8) -> String {
    if decimals == 0 {
        return value.to_string();
    }

    let scale = pow10(decimals);
    let quotient = value / scale;
    let remainder = value % scale;
    if remainder.is_zero() {
        return quotient.to_string();
    }

    let mut frac = remainder.to_string();
    while frac.len() < decimals as usize {
        frac.insert(0, '0');
    }
    while frac.ends_with('0') {
        frac.pop();
    }
    format!("{quotient}.{frac}")
}

/// Absolute relative difference in basis points: `|new − old| · 10000 / old`.
/// Saturates at `u64::MAX`; returns `u64::MAX` when `old` is zero and the
/// values differ.
pub fn diff_bps(old: U256, new: U256) -> u64 {
    if old == new {
        return 0;
    }
    if old.is_zero() {
        return u64::MAX;
    }
    let diff = if new > old { new - old } else { old - new };
    let bps = (diff * BPS_DENOMINATOR) / old;
    if bps > U256::from(u64::MAX) {
        u64::MAX
    } else {
        bps.to::<u64>()
    }
}

/// Whether a new value differs from the on-chain value by at least
/// `threshold_bps`. An unset (zero) on-chain value always justifies a write.
#[inline]
pub fn change_exceeds_bps(on_chain: U256, new_value: U256, threshold_bps: u64) -> bool {
    if on_chain.is_zero() {
        return true;
    }
    let diff = if new_value > on_chain {
        new_value - on_chain
    } else {
        on_chain - new_value
    };
    diff * BPS_DENOMINATOR >= on_chain * U256::from(threshold_bps)
}
