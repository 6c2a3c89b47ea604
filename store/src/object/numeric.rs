use super::ObjectValueError;
use num::{BigInt, Signed, ToPrimitive, Zero};
use std::{fmt::Display, str::FromStr};

/// Decimal number stored as `mantissa * 10^-scale`.
///
/// Kept normalized: `scale` is zero or the mantissa has no trailing zero digit,
/// so `4.0` and `4` compare equal and write back the same.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Default)]
pub struct Numeric {
    mantissa: BigInt,
    scale: u32,
}

impl Numeric {
    pub fn new(mantissa: impl Into<BigInt>, scale: u32) -> Self {
        let mut r = Self {
            mantissa: mantissa.into(),
            scale,
        };
        r.normalize();
        r
    }

    fn normalize(&mut self) {
        if self.mantissa.is_zero() {
            self.scale = 0;
            return;
        }
        let ten = BigInt::from(10);
        while self.scale > 0 && (&self.mantissa % &ten).is_zero() {
            self.mantissa /= &ten;
            self.scale -= 1;
        }
    }

    pub fn is_integer(&self) -> bool {
        self.scale == 0
    }

    /// Return None if not integer or out of range.
    pub fn as_i64(&self) -> Option<i64> {
        if self.is_integer() {
            self.mantissa.to_i64()
        } else {
            None
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        if self.is_integer() {
            self.mantissa.to_u32()
        } else {
            None
        }
    }

    pub fn as_f64(&self) -> f64 {
        // `Display` form parses back exactly into f64 nearest value
        self.to_string().parse().unwrap_or(f64::NAN)
    }

    /// Parse number in PDF syntax: optional sign, digits, optional `.` and
    /// digits, no exponent. At least one digit required.
    pub fn parse(s: &[u8]) -> Result<Self, ObjectValueError> {
        let (negative, digits) = match s.first() {
            Some(b'-') => (true, &s[1..]),
            Some(b'+') => (false, &s[1..]),
            _ => (false, s),
        };
        let mut mantissa = Vec::with_capacity(digits.len());
        let mut scale = None::<u32>;
        for &c in digits {
            match c {
                b'0'..=b'9' => {
                    mantissa.push(c);
                    if let Some(s) = scale.as_mut() {
                        *s += 1;
                    }
                }
                b'.' if scale.is_none() => scale = Some(0),
                _ => return Err(ObjectValueError::InvalidNumber),
            }
        }
        if mantissa.is_empty() {
            return Err(ObjectValueError::InvalidNumber);
        }
        let mut v =
            BigInt::parse_bytes(&mantissa, 10).ok_or(ObjectValueError::InvalidNumber)?;
        if negative {
            v = -v;
        }
        Ok(Self::new(v, scale.unwrap_or(0)))
    }
}

impl FromStr for Numeric {
    type Err = ObjectValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s.as_bytes())
    }
}

impl Display for Numeric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.scale == 0 {
            return write!(f, "{}", self.mantissa);
        }

        let scale = self.scale as usize;
        let mut digits = self.mantissa.abs().to_string();
        if digits.len() <= scale {
            digits.insert_str(0, &"0".repeat(scale + 1 - digits.len()));
        }
        let point = digits.len() - scale;
        if self.mantissa.is_negative() {
            f.write_str("-")?;
        }
        write!(f, "{}.{}", &digits[..point], &digits[point..])
    }
}

macro_rules! from_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Numeric {
                fn from(v: $t) -> Self {
                    Self::new(v, 0)
                }
            }
        )*
    };
}

from_int!(i32, i64, u32, u64, usize);
