//! Memory and disk sizes

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A size expressed in megabytes.
///
/// Accepts `256M`, `256MB`, `1G`, `1GB`, `1T` or a bare number of
/// megabytes, case-insensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawSize", into = "String")]
pub struct Megabytes(u64);

impl Megabytes {
    pub const fn new(mb: u64) -> Self {
        Self(mb)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl FromStr for Megabytes {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidSize {
            value: s.to_string(),
        };

        let upper = s.trim().to_ascii_uppercase();
        let digits_end = upper
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(upper.len());
        let (number, unit) = upper.split_at(digits_end);
        if number.is_empty() {
            return Err(invalid());
        }
        let value: u64 = number.parse().map_err(|_| invalid())?;

        let factor = match unit.trim() {
            "" | "M" | "MB" => 1,
            "G" | "GB" => 1024,
            "T" | "TB" => 1024 * 1024,
            _ => return Err(invalid()),
        };

        value.checked_mul(factor).map(Self).ok_or_else(invalid)
    }
}

impl fmt::Display for Megabytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 != 0 && self.0 % 1024 == 0 {
            write!(f, "{}G", self.0 / 1024)
        } else {
            write!(f, "{}M", self.0)
        }
    }
}

impl From<Megabytes> for String {
    fn from(value: Megabytes) -> Self {
        value.to_string()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSize {
    Number(u64),
    Text(String),
}

impl TryFrom<RawSize> for Megabytes {
    type Error = ValidationError;

    fn try_from(raw: RawSize) -> Result<Self, Self::Error> {
        match raw {
            RawSize::Number(mb) => Ok(Self(mb)),
            RawSize::Text(text) => text.parse(),
        }
    }
}
