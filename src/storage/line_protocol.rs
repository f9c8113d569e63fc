//! Line protocol parsing
//!
//! ```text
//! measurement[,tag=value...] field=value[,field=value...] [timestamp]
//! ```
//!
//! Integers carry an `i` (or `u`) suffix, strings are double quoted, and
//! booleans are `t`/`f`/`true`/`false` in any of the usual casings.
//! Commas, spaces and equals signs in identifiers are backslash escaped.

use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, tag},
    character::complete::{char, digit1, none_of, one_of, space0},
    combinator::{all_consuming, map, map_res, opt, recognize, value, verify},
    multi::{many0, separated_list1},
    number::complete::double,
    sequence::{delimited, pair, preceded, separated_pair, terminated, tuple},
    IResult,
};

use crate::model::{Tags, Value};
use crate::storage::error::{StorageError, StorageResult};

const MEASUREMENT_SPECIALS: &str = "\\, ";
const KEY_SPECIALS: &str = "\\,= ";
const ESCAPABLE: &str = "\\,= \"";

/// One parsed line
#[derive(Debug, Clone, PartialEq)]
pub struct LinePoint {
    pub measurement: String,
    pub tags: Tags,
    pub fields: Vec<(String, Value)>,
    /// Nanosecond timestamp, `None` to use the write time
    pub timestamp: Option<i64>,
}

impl LinePoint {
    /// A single-field point
    pub fn new(
        measurement: impl Into<String>,
        tags: Tags,
        field: impl Into<String>,
        value: impl Into<Value>,
        timestamp: i64,
    ) -> Self {
        Self {
            measurement: measurement.into(),
            tags,
            fields: vec![(field.into(), value.into())],
            timestamp: Some(timestamp),
        }
    }
}

fn ident<'a>(specials: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, String> {
    verify(
        map(
            opt(escaped_transform(none_of(specials), '\\', one_of(ESCAPABLE))),
            Option::unwrap_or_default,
        ),
        |s: &str| !s.is_empty(),
    )
}

fn integer(input: &str) -> IResult<&str, i64> {
    map_res(recognize(pair(opt(char('-')), digit1)), str::parse::<i64>)(input)
}

fn boolean(input: &str) -> IResult<&str, bool> {
    alt((
        value(
            true,
            alt((tag("true"), tag("True"), tag("TRUE"), tag("t"), tag("T"))),
        ),
        value(
            false,
            alt((tag("false"), tag("False"), tag("FALSE"), tag("f"), tag("F"))),
        ),
    ))(input)
}

fn string_value(input: &str) -> IResult<&str, String> {
    delimited(
        char('"'),
        map(
            opt(escaped_transform(none_of("\\\""), '\\', one_of("\\\""))),
            Option::unwrap_or_default,
        ),
        char('"'),
    )(input)
}

fn field_value(input: &str) -> IResult<&str, Value> {
    alt((
        map(string_value, Value::String),
        map(terminated(integer, one_of("iu")), Value::Integer),
        map(boolean, Value::Boolean),
        map(double, Value::Float),
    ))(input)
}

fn tag_pair(input: &str) -> IResult<&str, (String, String)> {
    separated_pair(ident(KEY_SPECIALS), char('='), ident(KEY_SPECIALS))(input)
}

fn field(input: &str) -> IResult<&str, (String, Value)> {
    separated_pair(ident(KEY_SPECIALS), char('='), field_value)(input)
}

fn line(input: &str) -> IResult<&str, LinePoint> {
    map(
        tuple((
            ident(MEASUREMENT_SPECIALS),
            many0(preceded(char(','), tag_pair)),
            preceded(char(' '), separated_list1(char(','), field)),
            opt(preceded(char(' '), integer)),
            space0,
        )),
        |(measurement, tags, fields, timestamp, _)| LinePoint {
            measurement,
            tags: Tags::from_pairs(tags),
            fields,
            timestamp,
        },
    )(input)
}

/// Parse a single line
pub fn parse_line(input: &str) -> Result<LinePoint, String> {
    all_consuming(line)(input.trim_end_matches('\r'))
        .map(|(_, point)| point)
        .map_err(|e| match e {
            nom::Err::Error(e) | nom::Err::Failure(e) => {
                format!("unexpected input at {:?}", truncate(e.input))
            }
            nom::Err::Incomplete(_) => "incomplete input".to_string(),
        })
}

/// Parse a block of lines, skipping blanks and `#` comments
pub fn parse_lines(input: &str) -> StorageResult<Vec<LinePoint>> {
    input
        .lines()
        .enumerate()
        .filter(|(_, l)| {
            let l = l.trim();
            !l.is_empty() && !l.starts_with('#')
        })
        .map(|(i, l)| {
            parse_line(l.trim_start()).map_err(|message| StorageError::LineProtocol {
                line: i + 1,
                message,
            })
        })
        .collect()
}

fn truncate(s: &str) -> &str {
    match s.char_indices().nth(20) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_line() {
        let p = parse_line("cpu,host=a,region=west value=1.5,count=3i,ok=t,msg=\"hi there\" 1000")
            .unwrap();
        assert_eq!(p.measurement, "cpu");
        assert_eq!(p.tags, Tags::from_pairs([("host", "a"), ("region", "west")]));
        assert_eq!(
            p.fields,
            vec![
                ("value".to_string(), Value::Float(1.5)),
                ("count".to_string(), Value::Integer(3)),
                ("ok".to_string(), Value::Boolean(true)),
                ("msg".to_string(), Value::String("hi there".into())),
            ]
        );
        assert_eq!(p.timestamp, Some(1000));
    }

    #[test]
    fn test_parse_without_tags_or_timestamp() {
        let p = parse_line("mem free=-12i").unwrap();
        assert_eq!(p.measurement, "mem");
        assert!(p.tags.is_empty());
        assert_eq!(p.fields, vec![("free".to_string(), Value::Integer(-12))]);
        assert_eq!(p.timestamp, None);
    }

    #[test]
    fn test_parse_escapes() {
        let p = parse_line(r#"disk\ io,path=/var\,log value=FALSE,s="say \"x\"" -5"#).unwrap();
        assert_eq!(p.measurement, "disk io");
        assert_eq!(p.tags.get("path"), Some("/var,log"));
        assert_eq!(p.fields[0].1, Value::Boolean(false));
        assert_eq!(p.fields[1].1, Value::String("say \"x\"".into()));
        assert_eq!(p.timestamp, Some(-5));
    }

    #[test]
    fn test_parse_empty_string_field() {
        let p = parse_line("m s=\"\" 1").unwrap();
        assert_eq!(p.fields[0].1, Value::String(String::new()));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_line("cpu").is_err());
        assert!(parse_line("cpu value=").is_err());
        assert!(parse_line("cpu,host value=1").is_err());
        assert!(parse_line("cpu value=1 12x").is_err());
    }

    #[test]
    fn test_parse_lines_reports_line_number() {
        let input = "# header\ncpu value=1 1\n\ncpu value= 2\n";
        let err = parse_lines(input).unwrap_err();
        assert!(matches!(err, StorageError::LineProtocol { line: 4, .. }));

        let points = parse_lines("cpu value=1 1\ncpu value=2 2\n").unwrap();
        assert_eq!(points.len(), 2);
    }
}
