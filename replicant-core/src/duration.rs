//! Duration strings
//!
//! Transaction timeouts and sleep steps are written as duration strings such as
//! `"5s"`, `"250ms"`, `"1m30s"` or `"1.5h"`: a sequence of decimal numbers each
//! followed by a unit (`ns`, `us`, `µs`, `ms`, `s`, `m`, `h`).

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationError {
    #[error("empty duration")]
    Empty,
    #[error("invalid duration '{0}'")]
    Invalid(String),
    #[error("missing unit in duration '{0}'")]
    MissingUnit(String),
    #[error("unknown unit '{unit}' in duration '{input}'")]
    UnknownUnit { unit: String, input: String },
    #[error("duration '{0}' must be positive")]
    NotPositive(String),
}

/// Parses a duration string
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(DurationError::Empty);
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = 0f64;
    let mut rest = s;

    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(DurationError::Invalid(input.to_string()));
        }

        let value: f64 = rest[..number_len]
            .parse()
            .map_err(|_| DurationError::Invalid(input.to_string()))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        if unit_len == 0 {
            return Err(DurationError::MissingUnit(input.to_string()));
        }

        let nanos_per_unit = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            unit => {
                return Err(DurationError::UnknownUnit {
                    unit: unit.to_string(),
                    input: input.to_string(),
                });
            }
        };
        rest = &rest[unit_len..];

        total += value * nanos_per_unit;
    }

    Ok(Duration::from_nanos(total.round() as u64))
}

/// Parses a duration string that must be strictly positive
pub fn parse_positive_duration(input: &str) -> Result<Duration, DurationError> {
    let duration = parse_duration(input)?;
    if duration.is_zero() {
        return Err(DurationError::NotPositive(input.to_string()));
    }
    Ok(duration)
}
