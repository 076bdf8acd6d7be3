//! Base types an aspect's scalar values must conform to.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BaseType {
    Integer,
    Long,
    Decimal,
    Boolean,
    Text,
    Binary,
}

impl BaseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BaseType::Integer => "Integer",
            BaseType::Long => "Long",
            BaseType::Decimal => "Decimal",
            BaseType::Boolean => "Boolean",
            BaseType::Text => "String",
            BaseType::Binary => "Binary",
        }
    }

    /// Check that `scalar` is a literal of this type.
    pub fn check(&self, scalar: &str) -> Result<()> {
        let s = scalar.trim();
        let ok = match self {
            BaseType::Integer => s.parse::<i32>().is_ok(),
            BaseType::Long => s.parse::<i64>().is_ok(),
            BaseType::Decimal => is_decimal(s),
            BaseType::Boolean => matches!(s, "true" | "false"),
            BaseType::Text => true,
            BaseType::Binary => s.len() % 2 == 0 && s.chars().all(|c| c.is_ascii_hexdigit()),
        };
        if ok {
            Ok(())
        } else {
            Err(Error::InvalidValue(format!("'{scalar}' is not a valid {self} value")))
        }
    }
}

/// `[+-]digits[.digits]`, without exponent or NaN/inf.
fn is_decimal(s: &str) -> bool {
    let body = s.strip_prefix(['-', '+']).unwrap_or(s);
    let (int_part, frac_part) = match body.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (body, None),
    };
    let digits = |p: &str| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit());
    match frac_part {
        Some(frac) => (int_part.is_empty() || digits(int_part)) && digits(frac),
        None => digits(int_part),
    }
}

impl fmt::Display for BaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BaseType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "Integer" => Ok(BaseType::Integer),
            "Long" => Ok(BaseType::Long),
            "Decimal" => Ok(BaseType::Decimal),
            "Boolean" => Ok(BaseType::Boolean),
            "String" | "Text" => Ok(BaseType::Text),
            "Binary" => Ok(BaseType::Binary),
            other => Err(Error::InvalidValue(format!("unknown base type '{other}'"))),
        }
    }
}
