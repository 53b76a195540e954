use std::{fmt, ops::Add, ops::Sub, str::FromStr};

use serde::{Deserialize, Serialize};

/// Temperature in millidegrees Celsius (`18500` is 18.5°C).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Temperature(i32);

impl Temperature {
    pub const fn from_millis(millis: i32) -> Self {
        Self(millis)
    }

    pub fn from_celsius(celsius: f64) -> Option<Self> {
        if !celsius.is_finite() {
            return None;
        }
        let millis = (celsius * 1000.0).round();
        if millis < f64::from(i32::MIN) || millis > f64::from(i32::MAX) {
            return None;
        }
        Some(Self(millis as i32))
    }

    pub const fn millis(self) -> i32 {
        self.0
    }

    pub fn celsius(self) -> f64 {
        f64::from(self.0) / 1000.0
    }
}

impl Add for Temperature {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl Sub for Temperature {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl fmt::Display for Temperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let whole = abs / 1000;
        let frac = abs % 1000;

        if frac == 0 {
            return write!(f, "{sign}{whole}°C");
        }

        let digits = format!("{frac:03}");
        write!(f, "{sign}{whole}.{}°C", digits.trim_end_matches('0'))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid temperature value: {0:?}")]
pub struct ParseTemperatureError(String);

impl FromStr for Temperature {
    type Err = ParseTemperatureError;

    /// Parses a decimal Celsius reading such as `"18.5"` or `"21"`.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim().trim_end_matches("°C").trim();
        trimmed
            .parse::<f64>()
            .ok()
            .and_then(Self::from_celsius)
            .ok_or_else(|| ParseTemperatureError(value.to_string()))
    }
}
