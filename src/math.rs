// 2.0: fixed-point helpers. every multiply happens in a type at least twice the operand width,
// every division names its rounding. nothing here wraps silently.
//
// rounding used by the engine:
//   Ceil  → margin requirements (never under-collect)
//   Floor → weighted entry price, proportional margin release
//   Exact → notional and pnl (integer products, no division)

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rounding {
    /// Toward negative infinity.
    Floor,
    /// Toward positive infinity.
    Ceil,
    /// Division must leave no remainder.
    Exact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MathError {
    #[error("arithmetic overflow")]
    Overflow,

    #[error("division by zero")]
    DivisionByZero,

    #[error("inexact division, remainder {remainder}")]
    Inexact { remainder: u128 },
}

pub type MathResult<T> = Result<T, MathError>;

// 2.1: a * b / divisor on u128 with a 256-bit intermediate product.
pub fn mul_div(a: u128, b: u128, divisor: u128, rounding: Rounding) -> MathResult<u128> {
    if divisor == 0 {
        return Err(MathError::DivisionByZero);
    }
    let (quotient, remainder) = wide_mul_div_rem(a, b, divisor)?;
    round_magnitude(quotient, remainder, rounding, false)
}

// 2.2: signed variant. works on magnitudes, then applies the sign and the rounding direction.
pub fn mul_div_signed(a: i128, b: i128, divisor: i128, rounding: Rounding) -> MathResult<i128> {
    if divisor == 0 {
        return Err(MathError::DivisionByZero);
    }
    let negative = (a < 0) ^ (b < 0) ^ (divisor < 0);
    let (quotient, remainder) =
        wide_mul_div_rem(a.unsigned_abs(), b.unsigned_abs(), divisor.unsigned_abs())?;
    let magnitude = round_magnitude(quotient, remainder, rounding, negative)?;
    apply_sign(magnitude, negative)
}

pub fn floor_div(a: i128, b: i128) -> MathResult<i128> {
    mul_div_signed(a, 1, b, Rounding::Floor)
}

pub fn ceil_div(a: i128, b: i128) -> MathResult<i128> {
    mul_div_signed(a, 1, b, Rounding::Ceil)
}

pub fn checked_mul(a: i128, b: i128) -> MathResult<i128> {
    a.checked_mul(b).ok_or(MathError::Overflow)
}

pub fn checked_add(a: i128, b: i128) -> MathResult<i128> {
    a.checked_add(b).ok_or(MathError::Overflow)
}

pub fn checked_sub(a: i128, b: i128) -> MathResult<i128> {
    a.checked_sub(b).ok_or(MathError::Overflow)
}

pub fn to_u64(value: i128) -> MathResult<u64> {
    u64::try_from(value).map_err(|_| MathError::Overflow)
}

pub fn to_i64(value: i128) -> MathResult<i64> {
    i64::try_from(value).map_err(|_| MathError::Overflow)
}

// magnitude rounding. for a negative result, Floor moves the magnitude up and Ceil truncates.
fn round_magnitude(
    quotient: u128,
    remainder: u128,
    rounding: Rounding,
    negative: bool,
) -> MathResult<u128> {
    if remainder == 0 {
        return Ok(quotient);
    }
    let round_away = match rounding {
        Rounding::Exact => return Err(MathError::Inexact { remainder }),
        Rounding::Floor => negative,
        Rounding::Ceil => !negative,
    };
    if round_away {
        quotient.checked_add(1).ok_or(MathError::Overflow)
    } else {
        Ok(quotient)
    }
}

fn apply_sign(magnitude: u128, negative: bool) -> MathResult<i128> {
    if negative {
        // i128::MIN has no positive counterpart
        if magnitude == i128::MIN.unsigned_abs() {
            return Ok(i128::MIN);
        }
        i128::try_from(magnitude)
            .map(|m| -m)
            .map_err(|_| MathError::Overflow)
    } else {
        i128::try_from(magnitude).map_err(|_| MathError::Overflow)
    }
}

fn wide_mul_div_rem(a: u128, b: u128, divisor: u128) -> MathResult<(u128, u128)> {
    if divisor == 0 {
        return Err(MathError::DivisionByZero);
    }
    if a == 0 || b == 0 {
        return Ok((0, 0));
    }
    if let Some(product) = a.checked_mul(b) {
        return Ok((product / divisor, product % divisor));
    }
    let (hi, lo) = full_mul(a, b);
    div_256_by_128(hi, lo, divisor)
}

// 128 x 128 → 256 as (high, low) limbs
fn full_mul(a: u128, b: u128) -> (u128, u128) {
    const MASK: u128 = u64::MAX as u128;
    let (a_lo, a_hi) = (a & MASK, a >> 64);
    let (b_lo, b_hi) = (b & MASK, b >> 64);

    let ll = a_lo * b_lo;
    let lh = a_lo * b_hi;
    let hl = a_hi * b_lo;
    let hh = a_hi * b_hi;

    let mid = (ll >> 64) + (lh & MASK) + (hl & MASK);
    let lo = (ll & MASK) | (mid << 64);
    let hi = hh + (lh >> 64) + (hl >> 64) + (mid >> 64);
    (hi, lo)
}

// restoring long division. quotient must fit u128, so hi < divisor.
fn div_256_by_128(hi: u128, lo: u128, divisor: u128) -> MathResult<(u128, u128)> {
    if hi >= divisor {
        return Err(MathError::Overflow);
    }
    let mut remainder = hi;
    let mut quotient: u128 = 0;
    for bit in (0..128).rev() {
        let carry = remainder >> 127;
        remainder = (remainder << 1) | ((lo >> bit) & 1);
        quotient <<= 1;
        // carry set means the true remainder is >= 2^128 > divisor
        if carry == 1 || remainder >= divisor {
            remainder = remainder.wrapping_sub(divisor);
            quotient |= 1;
        }
    }
    Ok((quotient, remainder))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mul_div_rounding_modes() {
        assert_eq!(mul_div(7, 3, 2, Rounding::Floor).unwrap(), 10);
        assert_eq!(mul_div(7, 3, 2, Rounding::Ceil).unwrap(), 11);
        assert_eq!(mul_div(8, 3, 2, Rounding::Exact).unwrap(), 12);
        assert_eq!(
            mul_div(7, 3, 2, Rounding::Exact),
            Err(MathError::Inexact { remainder: 1 })
        );
    }

    #[test]
    fn mul_div_zero_divisor() {
        assert_eq!(mul_div(1, 1, 0, Rounding::Floor), Err(MathError::DivisionByZero));
        assert_eq!(mul_div_signed(1, 1, 0, Rounding::Ceil), Err(MathError::DivisionByZero));
    }

    #[test]
    fn mul_div_product_wider_than_u128() {
        // (2^127) * 6 / 3 = 2^128 → does not fit
        let a = 1u128 << 127;
        assert_eq!(mul_div(a, 6, 3, Rounding::Floor), Err(MathError::Overflow));

        // (2^127) * 6 / 12 = 2^126, product overflows u128 but the quotient does not
        assert_eq!(mul_div(a, 6, 12, Rounding::Exact).unwrap(), 1u128 << 126);

        // u128::MAX * u128::MAX / u128::MAX
        assert_eq!(mul_div(u128::MAX, u128::MAX, u128::MAX, Rounding::Exact).unwrap(), u128::MAX);
    }

    #[test]
    fn wide_division_with_high_remainder() {
        // divisor close to 2^128 exercises the carry path of the long division
        let d = u128::MAX - 1;
        let q = mul_div(u128::MAX, u128::MAX - 2, d, Rounding::Floor).unwrap();
        // (M)(M-2) / (M-1) = M - 1 - 1/(M-1) → floor = M - 2
        assert_eq!(q, u128::MAX - 2);
        let q_ceil = mul_div(u128::MAX, u128::MAX - 2, d, Rounding::Ceil).unwrap();
        assert_eq!(q_ceil, u128::MAX - 1);
    }

    #[test]
    fn signed_floor_and_ceil() {
        assert_eq!(mul_div_signed(-7, 1, 2, Rounding::Floor).unwrap(), -4);
        assert_eq!(mul_div_signed(-7, 1, 2, Rounding::Ceil).unwrap(), -3);
        assert_eq!(mul_div_signed(7, 1, 2, Rounding::Floor).unwrap(), 3);
        assert_eq!(mul_div_signed(7, 1, 2, Rounding::Ceil).unwrap(), 4);
        assert_eq!(mul_div_signed(-100, -200, 50, Rounding::Exact).unwrap(), 400);
        assert_eq!(mul_div_signed(100, 200, -50, Rounding::Exact).unwrap(), -400);
    }

    #[test]
    fn signed_extremes() {
        assert_eq!(mul_div_signed(i128::MIN, 1, 1, Rounding::Exact).unwrap(), i128::MIN);
        assert_eq!(mul_div_signed(i128::MIN, -1, 1, Rounding::Exact), Err(MathError::Overflow));
        assert_eq!(mul_div_signed(0, -5, 3, Rounding::Floor).unwrap(), 0);
    }

    #[test]
    fn floor_and_ceil_div() {
        assert_eq!(floor_div(7, 2).unwrap(), 3);
        assert_eq!(floor_div(-7, 2).unwrap(), -4);
        assert_eq!(floor_div(-8, 2).unwrap(), -4);
        assert_eq!(ceil_div(7, 2).unwrap(), 4);
        assert_eq!(ceil_div(-7, 2).unwrap(), -3);
        assert_eq!(ceil_div(1_001, 10).unwrap(), 101);
    }

    #[test]
    fn narrowing_checks() {
        assert_eq!(to_u64(-1), Err(MathError::Overflow));
        assert_eq!(to_u64(u64::MAX as i128).unwrap(), u64::MAX);
        assert_eq!(to_i64(i64::MAX as i128 + 1), Err(MathError::Overflow));
        assert_eq!(checked_mul(i128::MAX, 2), Err(MathError::Overflow));
        assert_eq!(checked_sub(i128::MIN, 1), Err(MathError::Overflow));
        assert_eq!(checked_add(2, 3).unwrap(), 5);
    }
}
