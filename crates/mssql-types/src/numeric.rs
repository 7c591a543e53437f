//! Exact DECIMAL and NUMERIC values wider than `rust_decimal`.
//!
//! SQL Server stores up to 38 significant digits with a scale of up to 38;
//! [`Decimal`] holds 28. Decoding produces [`Numeric`] only for values that
//! do not fit a [`Decimal`].

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;

use crate::error::TypeError;
use crate::type_info::MAX_PRECISION;

/// 10^38, one past the largest mantissa magnitude.
const MANTISSA_LIMIT: u128 = 100_000_000_000_000_000_000_000_000_000_000_000_000;

/// A decimal number as a signed integer mantissa and a scale.
///
/// The value is `mantissa / 10^scale`. Two values with different scales are
/// not equal even when they denote the same number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Numeric {
    mantissa: i128,
    scale: u8,
}

impl Numeric {
    /// Build a value, rejecting more than 38 digits or a scale above 38.
    pub fn new(mantissa: i128, scale: u8) -> Result<Self, TypeError> {
        if scale > MAX_PRECISION || mantissa.unsigned_abs() >= MANTISSA_LIMIT {
            return Err(TypeError::OutOfRange { target_type: "numeric" });
        }
        Ok(Self { mantissa, scale })
    }

    /// The unscaled integer.
    #[must_use]
    pub fn mantissa(&self) -> i128 {
        self.mantissa
    }

    /// Digits after the decimal point.
    #[must_use]
    pub fn scale(&self) -> u8 {
        self.scale
    }

    /// The same value as a [`Decimal`], if it fits one.
    #[must_use]
    pub fn to_decimal(&self) -> Option<Decimal> {
        Decimal::try_from_i128_with_scale(self.mantissa, u32::from(self.scale)).ok()
    }

    /// The mantissa at exactly `scale` decimal places.
    ///
    /// Scaling up fails on overflow; scaling down fails rather than drop a
    /// non-zero digit.
    pub fn mantissa_at_scale(&self, scale: u8) -> Result<i128, TypeError> {
        let (from, to) = (u32::from(self.scale), u32::from(scale));
        if from <= to {
            return 10i128
                .checked_pow(to - from)
                .and_then(|factor| self.mantissa.checked_mul(factor))
                .ok_or(TypeError::OutOfRange { target_type: "numeric" });
        }
        let factor = 10i128
            .checked_pow(from - to)
            .ok_or(TypeError::OutOfRange { target_type: "numeric" })?;
        if self.mantissa % factor != 0 {
            return Err(TypeError::Truncation(format!(
                "{self} has more than {scale} decimal places"
            )));
        }
        Ok(self.mantissa / factor)
    }
}

impl From<Decimal> for Numeric {
    fn from(value: Decimal) -> Self {
        // 96-bit mantissa and scale <= 28 are always in range.
        Self {
            mantissa: value.mantissa(),
            scale: value.scale() as u8,
        }
    }
}

impl fmt::Display for Numeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.mantissa.unsigned_abs().to_string();
        if self.mantissa < 0 {
            f.write_str("-")?;
        }
        let scale = usize::from(self.scale);
        if scale == 0 {
            return f.write_str(&digits);
        }
        let padded = format!("{digits:0>width$}", width = scale + 1);
        let (whole, fraction) = padded.split_at(padded.len() - scale);
        write!(f, "{whole}.{fraction}")
    }
}

impl FromStr for Numeric {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TypeError::UnsupportedConversion {
            from: format!("{s:?}"),
            to: "numeric",
        };
        let (negative, body) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s.strip_prefix('+').unwrap_or(s)),
        };
        let (whole, fraction) = body.split_once('.').unwrap_or((body, ""));
        if (whole.is_empty() && fraction.is_empty())
            || !whole.bytes().chain(fraction.bytes()).all(|b| b.is_ascii_digit())
        {
            return Err(invalid());
        }
        let scale = u8::try_from(fraction.len())
            .map_err(|_| TypeError::OutOfRange { target_type: "numeric" })?;
        let magnitude: u128 = format!("{whole}{fraction}")
            .parse()
            .map_err(|_| TypeError::OutOfRange { target_type: "numeric" })?;
        let magnitude = i128::try_from(magnitude)
            .map_err(|_| TypeError::OutOfRange { target_type: "numeric" })?;
        Self::new(if negative { -magnitude } else { magnitude }, scale)
    }
}
