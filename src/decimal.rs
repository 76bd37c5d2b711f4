//! Arbitrary precision decimals and the conversion to fixed-point integers.
//!
//! All monetary values are [Decimal]s in human units (e.g. `1.5` USDC). They
//! are only turned into integers scaled by the token's decimals when they are
//! abi encoded, and this module is the only place doing so. Conversions are
//! exact: a value with more fractional digits than the token supports is an
//! error, never rounded.

use core::{
    cmp::Ordering,
    fmt,
    ops::{Add, Neg, Sub},
    str::FromStr,
};

use num_bigint::{BigInt, Sign};
use num_traits::{Signed, Zero};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::abiencode::types::{I256, U256};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecimalError {
    #[error("invalid decimal {0:?}")]
    Parse(String),
    #[error("{amount} has {scale} fractional digits, but the token only supports {decimals}")]
    PrecisionExceeded {
        amount: Decimal,
        scale: u32,
        decimals: u8,
    },
    #[error("{0} is negative")]
    Negative(Decimal),
    #[error("{0} does not fit into 256 bits")]
    Overflow(Decimal),
}

/// A decimal number `mantissa * 10^-scale`.
///
/// Always kept in canonical form: no trailing zeros in the fractional part
/// and zero has scale 0. Equality and hashing therefore don't depend on how a
/// value was written (`1.50 == 1.5`).
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Decimal {
    mantissa: BigInt,
    scale: u32,
}

fn pow10(exp: u32) -> BigInt {
    num_traits::pow(BigInt::from(10u8), exp as usize)
}

impl Decimal {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn new(mantissa: BigInt, scale: u32) -> Self {
        let ten = BigInt::from(10u8);
        let mut mantissa = mantissa;
        let mut scale = scale;
        while scale > 0 && !mantissa.is_zero() && (&mantissa % &ten).is_zero() {
            mantissa /= &ten;
            scale -= 1;
        }
        if mantissa.is_zero() {
            scale = 0;
        }
        Decimal { mantissa, scale }
    }

    /// Number of fractional digits.
    pub fn scale(&self) -> u32 {
        self.scale
    }

    pub fn is_zero(&self) -> bool {
        self.mantissa.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.mantissa.is_negative()
    }

    pub fn is_positive(&self) -> bool {
        self.mantissa.is_positive()
    }

    pub fn abs(&self) -> Self {
        Decimal {
            mantissa: self.mantissa.abs(),
            scale: self.scale,
        }
    }

    /// Fails if the value can't be represented with `decimals` fractional
    /// digits.
    pub fn validate_precision(&self, decimals: u8) -> Result<(), DecimalError> {
        if self.scale > u32::from(decimals) {
            return Err(DecimalError::PrecisionExceeded {
                amount: self.clone(),
                scale: self.scale,
                decimals,
            });
        }
        Ok(())
    }

    /// `self * 10^decimals`, exact.
    pub fn to_fixed_point(&self, decimals: u8) -> Result<BigInt, DecimalError> {
        self.validate_precision(decimals)?;
        Ok(&self.mantissa * pow10(u32::from(decimals) - self.scale))
    }

    /// Inverse of [Decimal::to_fixed_point].
    pub fn from_fixed_point(value: BigInt, decimals: u8) -> Self {
        Decimal::new(value, u32::from(decimals))
    }

    /// Fixed-point value as `uint256`.
    pub fn to_u256(&self, decimals: u8) -> Result<U256, DecimalError> {
        let (sign, bytes) = self.to_fixed_point(decimals)?.to_bytes_be();
        if sign == Sign::Minus {
            return Err(DecimalError::Negative(self.clone()));
        }
        if bytes.len() > 32 {
            return Err(DecimalError::Overflow(self.clone()));
        }
        Ok(U256::from_big_endian(&bytes))
    }

    /// Fixed-point value as `int256`.
    pub fn to_i256(&self, decimals: u8) -> Result<I256, DecimalError> {
        let fixed = self.to_fixed_point(decimals)?;
        let bytes = fixed.to_signed_bytes_be();
        if bytes.len() > 32 {
            return Err(DecimalError::Overflow(self.clone()));
        }
        let mut out = [if fixed.is_negative() { 0xff } else { 0x00 }; 32];
        out[32 - bytes.len()..].copy_from_slice(&bytes);
        Ok(I256(out))
    }

    pub fn from_u256(value: U256, decimals: u8) -> Self {
        let mut bytes = [0u8; 32];
        value.to_big_endian(&mut bytes);
        Self::from_fixed_point(BigInt::from_bytes_be(Sign::Plus, &bytes), decimals)
    }

    fn aligned(&self, other: &Self) -> (BigInt, BigInt, u32) {
        let scale = self.scale.max(other.scale);
        (
            &self.mantissa * pow10(scale - self.scale),
            &other.mantissa * pow10(scale - other.scale),
            scale,
        )
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.mantissa.abs().to_string();
        if self.is_negative() {
            f.write_str("-")?;
        }
        let scale = self.scale as usize;
        if scale == 0 {
            return f.write_str(&digits);
        }
        if digits.len() > scale {
            let (int, frac) = digits.split_at(digits.len() - scale);
            write!(f, "{}.{}", int, frac)
        } else {
            write!(f, "0.{:0>width$}", digits, width = scale)
        }
    }
}

impl fmt::Debug for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for Decimal {
    type Err = DecimalError;

    /// Accepts `-?[0-9]+(\.[0-9]+)?`. No exponents, no whitespace.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || DecimalError::Parse(s.to_string());
        let (negative, unsigned) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (int, frac) = match unsigned.split_once('.') {
            Some((int, frac)) => (int, frac),
            None => (unsigned, ""),
        };
        let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if int.is_empty() || !all_digits(int) || !all_digits(frac) {
            return Err(err());
        }
        if unsigned.contains('.') && frac.is_empty() {
            return Err(err());
        }

        let mut mantissa: BigInt = format!("{}{}", int, frac).parse().map_err(|_| err())?;
        if negative {
            mantissa = -mantissa;
        }
        let scale = u32::try_from(frac.len()).map_err(|_| err())?;
        Ok(Decimal::new(mantissa, scale))
    }
}

impl From<u64> for Decimal {
    fn from(v: u64) -> Self {
        Decimal::new(BigInt::from(v), 0)
    }
}

impl From<i64> for Decimal {
    fn from(v: i64) -> Self {
        Decimal::new(BigInt::from(v), 0)
    }
}

impl Ord for Decimal {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a, b, _) = self.aligned(other);
        a.cmp(&b)
    }
}

impl PartialOrd for Decimal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<'a> Add<&'a Decimal> for &'a Decimal {
    type Output = Decimal;

    fn add(self, rhs: &'a Decimal) -> Decimal {
        let (a, b, scale) = self.aligned(rhs);
        Decimal::new(a + b, scale)
    }
}

impl<'a> Sub<&'a Decimal> for &'a Decimal {
    type Output = Decimal;

    fn sub(self, rhs: &'a Decimal) -> Decimal {
        let (a, b, scale) = self.aligned(rhs);
        Decimal::new(a - b, scale)
    }
}

impl Add for Decimal {
    type Output = Decimal;

    fn add(self, rhs: Decimal) -> Decimal {
        &self + &rhs
    }
}

impl Sub for Decimal {
    type Output = Decimal;

    fn sub(self, rhs: Decimal) -> Decimal {
        &self - &rhs
    }
}

impl Neg for Decimal {
    type Output = Decimal;

    fn neg(self) -> Decimal {
        Decimal {
            mantissa: -self.mantissa,
            scale: self.scale,
        }
    }
}

impl<'a> core::iter::Sum<&'a Decimal> for Decimal {
    fn sum<I: Iterator<Item = &'a Decimal>>(iter: I) -> Self {
        iter.fold(Decimal::zero(), |acc, x| &acc + x)
    }
}

// Always a string, on the wire and in abi encodings, so no precision is lost
// to floating point parsers.
impl Serialize for Decimal {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Decimal {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
