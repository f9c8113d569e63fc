//! Duration literals
//!
//! Parses InfluxQL-style duration literals (`10s`, `1h30m`, `500ms`, `-5m`)
//! into nanoseconds, and formats nanoseconds back into the shortest exact
//! literal.

use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{char, digit1},
    combinator::{all_consuming, map_res, opt, value},
    multi::many1,
    sequence::{pair, tuple},
    IResult,
};
use thiserror::Error;

pub const NANOSECOND: i64 = 1;
pub const MICROSECOND: i64 = 1_000 * NANOSECOND;
pub const MILLISECOND: i64 = 1_000 * MICROSECOND;
pub const SECOND: i64 = 1_000 * MILLISECOND;
pub const MINUTE: i64 = 60 * SECOND;
pub const HOUR: i64 = 60 * MINUTE;
pub const DAY: i64 = 24 * HOUR;
pub const WEEK: i64 = 7 * DAY;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DurationError {
    #[error("invalid duration: {0}")]
    Invalid(String),

    #[error("overflowed duration {0}")]
    Overflow(String),
}

fn unit(input: &str) -> IResult<&str, i64> {
    alt((
        value(NANOSECOND, tag("ns")),
        value(MILLISECOND, tag("ms")),
        value(MICROSECOND, alt((tag("us"), tag("µs"), tag("u"), tag("µ")))),
        value(SECOND, tag("s")),
        value(MINUTE, tag("m")),
        value(HOUR, tag("h")),
        value(DAY, tag("d")),
        value(WEEK, tag("w")),
    ))(input)
}

fn component(input: &str) -> IResult<&str, (i64, i64)> {
    pair(map_res(digit1, str::parse::<i64>), unit)(input)
}

fn duration(input: &str) -> IResult<&str, (Option<char>, Vec<(i64, i64)>)> {
    tuple((opt(char('-')), many1(component)))(input)
}

/// Parse a duration literal into nanoseconds
///
/// A bare `0` is accepted; every other literal needs a unit on each
/// component.
pub fn parse_duration(input: &str) -> Result<i64, DurationError> {
    let input = input.trim();
    if input == "0" {
        return Ok(0);
    }

    let (_, (sign, components)) = all_consuming(duration)(input)
        .map_err(|_| DurationError::Invalid(input.to_string()))?;

    let mut total: i64 = 0;
    for (n, unit) in components {
        total = n
            .checked_mul(unit)
            .and_then(|v| total.checked_add(v))
            .ok_or_else(|| DurationError::Overflow(input.to_string()))?;
    }

    Ok(if sign.is_some() { -total } else { total })
}

/// Format nanoseconds as the largest exact unit literal
pub fn format_duration(ns: i64) -> String {
    if ns == 0 {
        return "0s".to_string();
    }
    let units = [
        (WEEK, "w"),
        (DAY, "d"),
        (HOUR, "h"),
        (MINUTE, "m"),
        (SECOND, "s"),
        (MILLISECOND, "ms"),
        (MICROSECOND, "u"),
    ];
    for (unit, suffix) in units {
        if ns % unit == 0 {
            return format!("{}{}", ns / unit, suffix);
        }
    }
    format!("{}ns", ns)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_units() {
        assert_eq!(parse_duration("5ns"), Ok(5));
        assert_eq!(parse_duration("3u"), Ok(3 * MICROSECOND));
        assert_eq!(parse_duration("3µ"), Ok(3 * MICROSECOND));
        assert_eq!(parse_duration("500ms"), Ok(500 * MILLISECOND));
        assert_eq!(parse_duration("10s"), Ok(10 * SECOND));
        assert_eq!(parse_duration("2m"), Ok(2 * MINUTE));
        assert_eq!(parse_duration("1h"), Ok(HOUR));
        assert_eq!(parse_duration("2d"), Ok(2 * DAY));
        assert_eq!(parse_duration("1w"), Ok(WEEK));
        assert_eq!(parse_duration("0"), Ok(0));
    }

    #[test]
    fn test_parse_compound_and_negative() {
        assert_eq!(parse_duration("1h30m"), Ok(HOUR + 30 * MINUTE));
        assert_eq!(parse_duration("-5m"), Ok(-5 * MINUTE));
    }

    #[test]
    fn test_parse_invalid() {
        assert!(matches!(parse_duration("10"), Err(DurationError::Invalid(_))));
        assert!(matches!(parse_duration("s"), Err(DurationError::Invalid(_))));
        assert!(matches!(parse_duration("10x"), Err(DurationError::Invalid(_))));
        assert!(matches!(
            parse_duration("9999999999w"),
            Err(DurationError::Overflow(_))
        ));
    }

    #[test]
    fn test_format() {
        assert_eq!(format_duration(0), "0s");
        assert_eq!(format_duration(10 * SECOND), "10s");
        assert_eq!(format_duration(90 * MINUTE), "90m");
        assert_eq!(format_duration(1500 * MICROSECOND), "1500u");
        assert_eq!(format_duration(7), "7ns");
        assert_eq!(format_duration(-2 * HOUR), "-2h");
    }
}
