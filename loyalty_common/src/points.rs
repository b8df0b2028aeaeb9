use std::{
    fmt::Display,
    iter::Sum,
    ops::{Add, AddAssign, Neg, Sub, SubAssign},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use sqlx::Type;
use thiserror::Error;

use crate::op;

const SCALE: i64 = 100;

//--------------------------------------       Points        ---------------------------------------------------------
/// Loyalty points, stored as an integer number of hundredths of a point.
///
/// The accrual service and the REST API speak in decimal numbers (e.g. `729.98`), so the serde representation is a
/// JSON number, while the database and all arithmetic use the exact integer representation.
#[derive(Debug, Clone, Copy, Default, Type, PartialEq, Eq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[sqlx(transparent)]
#[serde(try_from = "f64", into = "f64")]
pub struct Points(i64);

op!(binary Points, Add, add);
op!(binary Points, Sub, sub);
op!(inplace Points, AddAssign, add_assign);
op!(inplace Points, SubAssign, sub_assign);
op!(unary Points, Neg, neg);

impl Sum for Points {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

#[derive(Debug, Clone, Error)]
#[error("Value cannot be represented in points: {0}")]
pub struct PointsConversionError(String);

impl From<i64> for Points {
    /// Interprets the value as hundredths of a point.
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl TryFrom<f64> for Points {
    type Error = PointsConversionError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        let scaled = (value * SCALE as f64).round();
        if !scaled.is_finite() || scaled.abs() > i64::MAX as f64 {
            return Err(PointsConversionError(format!("{value} is out of range")));
        }
        #[allow(clippy::cast_possible_truncation)]
        Ok(Self(scaled as i64))
    }
}

impl From<Points> for f64 {
    fn from(value: Points) -> Self {
        value.0 as f64 / SCALE as f64
    }
}

impl FromStr for Points {
    type Err = PointsConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim().parse::<f64>().map_err(|e| PointsConversionError(format!("{s}: {e}")))?;
        Self::try_from(value)
    }
}

impl Display for Points {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / SCALE as u64, abs % SCALE as u64)
    }
}

impl Points {
    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn from_points(points: i64) -> Self {
        Self(points * SCALE)
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

#[cfg(test)]
mod test {
    use super::Points;

    #[test]
    fn display() {
        assert_eq!(Points::from_points(150).to_string(), "150.00");
        assert_eq!(Points::from(72998).to_string(), "729.98");
        assert_eq!(Points::from(-5).to_string(), "-0.05");
    }

    #[test]
    fn parse_decimal_strings() {
        assert_eq!("729.98".parse::<Points>().unwrap(), Points::from(72998));
        assert_eq!(" 50 ".parse::<Points>().unwrap(), Points::from_points(50));
        assert!("fifty".parse::<Points>().is_err());
    }

    #[test]
    fn json_numbers() {
        let p: Points = serde_json::from_str("500").unwrap();
        assert_eq!(p, Points::from_points(500));
        let p: Points = serde_json::from_str("0.1").unwrap();
        assert_eq!(p.value(), 10);
        assert_eq!(serde_json::to_string(&Points::from(72998)).unwrap(), "729.98");
    }

    #[test]
    fn arithmetic() {
        let mut balance = Points::from_points(100);
        balance += Points::from_points(50);
        assert_eq!(balance, Points::from_points(150));
        balance -= Points::from(1);
        assert_eq!(balance.value(), 14999);
        let total: Points = [Points::from(1), Points::from(2)].into_iter().sum();
        assert_eq!(total, Points::from(3));
        assert!(!(-total).is_positive());
    }
}
