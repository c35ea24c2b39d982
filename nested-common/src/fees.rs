//! Protocol fee accounting on raw integer amounts.
//!
//! Fees are expressed as a rate out of [`FEE_BASE`] (basis points). The contract computes them as
//! `floor(amount * rate / 10_000)`, so removing fees from an amount is not a plain division: the
//! naive inverse drifts by a unit on some amounts and breaks the "no dust" totals of a batch.

use alloy_primitives::U256;

/// Fee rate, out of [`FEE_BASE`].
pub type FeeRate = u32;

pub const FEE_BASE: u32 = 10_000;

/// Fees the protocol takes on `amount`.
pub fn fees_for(amount: U256, rate: FeeRate) -> U256 {
    let base = U256::from(FEE_BASE);
    let rate = U256::from(rate);
    // floor(amount * rate / base) without overflowing the product
    (amount / base)
        .saturating_mul(rate)
        .saturating_add((amount % base) * rate / base)
}

/// `amount` plus the fees the protocol takes on it.
pub fn add_fees(amount: U256, rate: FeeRate) -> U256 {
    amount.saturating_add(fees_for(amount, rate))
}

/// Largest amount `x` such that `add_fees(x, rate) <= amount_with_fees`.
///
/// Some amounts have no exact preimage (e.g. `9953` at 80 bps); the smaller candidate is returned
/// so that the caller under-spends by one unit rather than overshooting.
pub fn remove_fees(amount_with_fees: U256, rate: FeeRate) -> U256 {
    if rate == 0 || amount_with_fees.is_zero() {
        return amount_with_fees;
    }
    let base = U256::from(FEE_BASE);
    let divisor = base + U256::from(rate);
    // floor(amount_with_fees * base / divisor), a unit or two away from the result
    let (quotient, remainder) = amount_with_fees.div_rem(divisor);
    let mut amount = quotient * base + remainder * base / divisor;

    let fits = |amount: U256| {
        amount
            .checked_add(fees_for(amount, rate))
            .is_some_and(|with_fees| with_fees <= amount_with_fees)
    };
    while amount < amount_with_fees && fits(amount + U256::from(1)) {
        amount += U256::from(1);
    }
    while !amount.is_zero() && !fits(amount) {
        amount -= U256::from(1);
    }
    amount
}

/// Multiplies an integer amount by a non integer ratio.
///
/// The ratio keeps ten significant digits (and at least two decimals when it is large), so that
/// `mul_ratio(1000e18, 1.00002)` is `1000.02e18` up to float representation. A non-positive or
/// vanishingly small ratio gives zero. The result saturates at `U256::MAX` when the product
/// overflows.
pub fn mul_ratio(amount: U256, ratio: f64) -> U256 {
    if ratio <= 0.0 || !ratio.is_finite() {
        return U256::ZERO;
    }
    let precision = (10 - ratio.log10().round() as i32).max(2);
    if precision > 70 {
        return U256::ZERO;
    }
    let scaled = (ratio * 10f64.powi(precision)).floor();
    if scaled < 1.0 {
        return U256::ZERO;
    }
    let factor = U256::from(10u64).pow(U256::from(precision as u32));
    let Some(scaled) = integral_to_u256(scaled) else {
        return U256::MAX;
    };
    match amount.checked_mul(scaled) {
        Some(product) => product / factor,
        None => U256::MAX,
    }
}

/// Exact value of a finite, integral, non-negative float. `None` if it does not fit.
fn integral_to_u256(value: f64) -> Option<U256> {
    let bits = value.to_bits();
    let exponent = ((bits >> 52) & 0x7ff) as i32 - 1075;
    let mantissa = (bits & ((1u64 << 52) - 1)) | (1u64 << 52);
    if exponent < 0 {
        return Some(U256::from(mantissa >> exponent.unsigned_abs().min(63)));
    }
    if exponent > 256 - 53 {
        return None;
    }
    Some(U256::from(mantissa) << exponent as usize)
}
