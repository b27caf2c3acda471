//! Semantic units attached to every calculated number.
//!
//! Units are grouped into dimensions. Values may only be combined within a
//! dimension; crossing dimensions is an error rather than a silent coercion.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::value::CalculatedValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Currency,
    CurrencyPerTime,
    CurrencyPerHour,
    Time,
    Rate,
    Count,
    Score,
    Tokens,
    TokensPerTime,
    CurrencyPerMillionTokens,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    Usd,
    UsdPerMonth,
    UsdPerYear,
    UsdPerHour,
    Hours,
    Days,
    Months,
    Years,
    Ratio,
    Percent,
    Count,
    Score,
    Tokens,
    TokensPerMonth,
    UsdPerMillionTokens,
}

impl Unit {
    pub const ALL: [Unit; 15] = [
        Unit::Usd,
        Unit::UsdPerMonth,
        Unit::UsdPerYear,
        Unit::UsdPerHour,
        Unit::Hours,
        Unit::Days,
        Unit::Months,
        Unit::Years,
        Unit::Ratio,
        Unit::Percent,
        Unit::Count,
        Unit::Score,
        Unit::Tokens,
        Unit::TokensPerMonth,
        Unit::UsdPerMillionTokens,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Unit::Usd => "usd",
            Unit::UsdPerMonth => "usd_per_month",
            Unit::UsdPerYear => "usd_per_year",
            Unit::UsdPerHour => "usd_per_hour",
            Unit::Hours => "hours",
            Unit::Days => "days",
            Unit::Months => "months",
            Unit::Years => "years",
            Unit::Ratio => "ratio",
            Unit::Percent => "percent",
            Unit::Count => "count",
            Unit::Score => "score",
            Unit::Tokens => "tokens",
            Unit::TokensPerMonth => "tokens_per_month",
            Unit::UsdPerMillionTokens => "usd_per_million_tokens",
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Unit::Usd => "$",
            Unit::UsdPerMonth => "$/mo",
            Unit::UsdPerYear => "$/yr",
            Unit::UsdPerHour => "$/h",
            Unit::Hours => "h",
            Unit::Days => "d",
            Unit::Months => "mo",
            Unit::Years => "yr",
            Unit::Ratio => "",
            Unit::Percent => "%",
            Unit::Count => "#",
            Unit::Score => "pts",
            Unit::Tokens => "tok",
            Unit::TokensPerMonth => "tok/mo",
            Unit::UsdPerMillionTokens => "$/1M tok",
        }
    }

    pub fn dimension(&self) -> Dimension {
        match self {
            Unit::Usd => Dimension::Currency,
            Unit::UsdPerMonth | Unit::UsdPerYear => Dimension::CurrencyPerTime,
            // labor rates never convert into run-rate money
            Unit::UsdPerHour => Dimension::CurrencyPerHour,
            Unit::Hours | Unit::Days | Unit::Months | Unit::Years => Dimension::Time,
            Unit::Ratio | Unit::Percent => Dimension::Rate,
            Unit::Count => Dimension::Count,
            Unit::Score => Dimension::Score,
            Unit::Tokens => Dimension::Tokens,
            Unit::TokensPerMonth => Dimension::TokensPerTime,
            Unit::UsdPerMillionTokens => Dimension::CurrencyPerMillionTokens,
        }
    }

    /// Multiplier into the dimension's base unit (per-year for money rates,
    /// hours for time, ratio for rates).
    fn scale(&self) -> f64 {
        match self {
            Unit::UsdPerMonth => 12.0,
            Unit::Days => 24.0,
            Unit::Months => 730.0,
            Unit::Years => 8_760.0,
            Unit::Percent => 0.01,
            _ => 1.0,
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Dimension::Currency => "currency",
            Dimension::CurrencyPerTime => "currency_per_time",
            Dimension::CurrencyPerHour => "currency_per_hour",
            Dimension::Time => "time",
            Dimension::Rate => "rate",
            Dimension::Count => "count",
            Dimension::Score => "score",
            Dimension::Tokens => "tokens",
            Dimension::TokensPerTime => "tokens_per_time",
            Dimension::CurrencyPerMillionTokens => "currency_per_million_tokens",
        };
        f.write_str(s)
    }
}

pub fn unit_of(value: &CalculatedValue) -> Unit {
    value.unit()
}

pub fn assert_compatible(a: Unit, b: Unit) -> Result<(), EngineError> {
    if a.dimension() == b.dimension() {
        Ok(())
    } else {
        Err(EngineError::DimensionMismatch {
            left: a,
            left_dimension: a.dimension().to_string(),
            right: b,
            right_dimension: b.dimension().to_string(),
        })
    }
}

/// Convert between units of one dimension.
pub fn convert(value: f64, from: Unit, to: Unit) -> Result<f64, EngineError> {
    assert_compatible(from, to)?;
    if from == to {
        return Ok(value);
    }
    Ok(value * from.scale() / to.scale())
}
