//! Default date-range parser
//!
//! # Supported Syntax
//!
//! ```text
//! start:1700000000000              epoch millis
//! start:2024-01-01T00:00:00Z       RFC 3339 instant
//! end:NOW                          evaluation time
//! start:NOW-7DAYS                  date math, chained: NOW-1MONTH+2HOURS
//! start:[* TO 100]                 already a range, left untouched
//! ```
//!
//! Units: `MILLI(S)`, `SECOND(S)`, `MINUTE(S)`, `HOUR(S)`, `DAY(S)`,
//! `WEEK(S)`, `MONTH(S)`, `YEAR(S)` (case-insensitive).
//!
//! `start:X` is rewritten to `<ts>:[X TO *]` and `end:Y` to `<ts>:[* TO Y]`,
//! where `<ts>` is the configured timestamp field and `X`/`Y` are epoch
//! millis.

use chrono::{DateTime, Duration as ChronoDuration, Months, Utc};
use nom::{
    branch::alt,
    bytes::complete::tag_no_case,
    character::complete::{char, digit1},
    combinator::{all_consuming, map_res, value},
    multi::many0,
    sequence::preceded,
    IResult, Parser,
};
use std::ops::Range;

use super::DateRangeParser;
use crate::error::ParseError;
use crate::types::UNBOUNDED;

const START_TERM: &str = "start:";
const END_TERM: &str = "end:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bound {
    Start,
    End,
}

/// A `start:`/`end:` term found in query text
#[derive(Debug, Clone, PartialEq)]
struct DateTerm {
    bound: Bound,
    span: Range<usize>,
    /// `None` when the value is already a bracketed range
    millis: Option<i64>,
}

// ============================================================================
// Date math
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Milli,
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Shift {
    amount: i64,
    unit: Unit,
}

fn parse_unit(input: &str) -> IResult<&str, Unit> {
    // Plural forms first so `DAYS` is not read as `DAY` + trailing `S`
    alt((
        value(Unit::Milli, alt((tag_no_case("MILLIS"), tag_no_case("MILLI")))),
        value(Unit::Second, alt((tag_no_case("SECONDS"), tag_no_case("SECOND")))),
        value(Unit::Minute, alt((tag_no_case("MINUTES"), tag_no_case("MINUTE")))),
        value(Unit::Hour, alt((tag_no_case("HOURS"), tag_no_case("HOUR")))),
        value(Unit::Day, alt((tag_no_case("DAYS"), tag_no_case("DAY")))),
        value(Unit::Week, alt((tag_no_case("WEEKS"), tag_no_case("WEEK")))),
        value(Unit::Month, alt((tag_no_case("MONTHS"), tag_no_case("MONTH")))),
        value(Unit::Year, alt((tag_no_case("YEARS"), tag_no_case("YEAR")))),
    ))
    .parse(input)
}

fn parse_shift(input: &str) -> IResult<&str, Shift> {
    let (input, sign) = alt((value(1i64, char('+')), value(-1i64, char('-')))).parse(input)?;
    let (input, amount) = map_res(digit1, str::parse::<i64>).parse(input)?;
    let (input, unit) = parse_unit(input)?;
    Ok((
        input,
        Shift {
            amount: sign * amount,
            unit,
        },
    ))
}

fn parse_now(input: &str) -> IResult<&str, Vec<Shift>> {
    preceded(tag_no_case("NOW"), many0(parse_shift)).parse(input)
}

fn parse_millis(input: &str) -> IResult<&str, i64> {
    map_res(digit1, str::parse::<i64>).parse(input)
}

fn apply_shift(at: DateTime<Utc>, shift: Shift) -> Option<DateTime<Utc>> {
    let n = shift.amount;
    let fixed = |d: ChronoDuration| at.checked_add_signed(d);
    let months = |m: i64| -> Option<DateTime<Utc>> {
        let m = u32::try_from(m.unsigned_abs()).ok()?;
        if n >= 0 {
            at.checked_add_months(Months::new(m))
        } else {
            at.checked_sub_months(Months::new(m))
        }
    };

    match shift.unit {
        Unit::Milli => fixed(ChronoDuration::try_milliseconds(n)?),
        Unit::Second => fixed(ChronoDuration::try_seconds(n)?),
        Unit::Minute => fixed(ChronoDuration::try_minutes(n)?),
        Unit::Hour => fixed(ChronoDuration::try_hours(n)?),
        Unit::Day => fixed(ChronoDuration::try_days(n)?),
        Unit::Week => fixed(ChronoDuration::try_weeks(n)?),
        Unit::Month => months(n),
        Unit::Year => months(n.checked_mul(12)?),
    }
}

// ============================================================================
// Parser
// ============================================================================

/// Parser for `start:`/`end:` terms with epoch, RFC 3339 and `NOW` values
#[derive(Debug, Clone)]
pub struct ChronixDateParser {
    timestamp_field: String,
    now: Option<i64>,
}

impl ChronixDateParser {
    /// Create a parser rewriting into ranges on `timestamp_field`
    pub fn new(timestamp_field: impl Into<String>) -> Self {
        Self {
            timestamp_field: timestamp_field.into(),
            now: None,
        }
    }

    /// Evaluate `NOW` at a fixed instant (epoch millis)
    pub fn with_now(mut self, now: i64) -> Self {
        self.now = Some(now);
        self
    }

    fn now(&self) -> i64 {
        self.now.unwrap_or_else(|| Utc::now().timestamp_millis())
    }

    /// Evaluate a single date expression to epoch millis
    pub fn evaluate(&self, expression: &str) -> Result<i64, ParseError> {
        self.evaluate_at(expression, self.now())
    }

    fn evaluate_at(&self, expression: &str, now: i64) -> Result<i64, ParseError> {
        let invalid = |reason: &str| ParseError::DateExpression {
            expression: expression.to_string(),
            reason: reason.to_string(),
        };

        if let Ok((_, millis)) = all_consuming(parse_millis).parse(expression) {
            return Ok(millis);
        }

        if let Ok((_, shifts)) = all_consuming(parse_now).parse(expression) {
            let now = DateTime::<Utc>::from_timestamp_millis(now)
                .ok_or_else(|| invalid("clock out of range"))?;
            return shifts
                .into_iter()
                .try_fold(now, apply_shift)
                .map(|t| t.timestamp_millis())
                .ok_or_else(|| invalid("date math out of range"));
        }

        DateTime::parse_from_rfc3339(expression)
            .map(|t| t.timestamp_millis())
            .map_err(|_| invalid("expected epoch millis, RFC 3339 instant or NOW[(+|-)<n><UNIT>]"))
    }

    /// Locate and evaluate every date term against one clock reading
    fn terms(&self, query: &str, now: i64) -> Result<Vec<DateTerm>, ParseError> {
        let bytes = query.as_bytes();
        let mut terms = Vec::new();
        let mut depth = 0usize;
        let mut quoted = false;
        let mut i = 0;

        while i < bytes.len() {
            match bytes[i] {
                b'"' => quoted = !quoted,
                b'[' | b'{' if !quoted => depth += 1,
                b']' | b'}' if !quoted => depth = depth.saturating_sub(1),
                _ if quoted || depth > 0 || !at_term_start(bytes, i) => {}
                _ => {
                    let rest = &query[i..];
                    let found = if rest.starts_with(START_TERM) {
                        Some((Bound::Start, START_TERM.len()))
                    } else if rest.starts_with(END_TERM) {
                        Some((Bound::End, END_TERM.len()))
                    } else {
                        None
                    };

                    if let Some((bound, prefix)) = found {
                        let value_start = i + prefix;
                        let value_end = value_start + value_len(&query[value_start..]);
                        let raw = &query[value_start..value_end];

                        if raw.is_empty() {
                            return Err(ParseError::DateExpression {
                                expression: query[i..value_end].to_string(),
                                reason: "missing value".to_string(),
                            });
                        }

                        let millis = if raw.starts_with('[') || raw.starts_with('{') {
                            None
                        } else {
                            Some(self.evaluate_at(raw, now)?)
                        };

                        terms.push(DateTerm {
                            bound,
                            span: i..value_end,
                            millis,
                        });
                        i = value_end;
                        continue;
                    }
                }
            }
            i += 1;
        }

        Ok(terms)
    }
}

impl Default for ChronixDateParser {
    fn default() -> Self {
        Self::new("start")
    }
}

/// Whether a field name may begin at `i`
fn at_term_start(bytes: &[u8], i: usize) -> bool {
    i == 0 || matches!(bytes[i - 1], b' ' | b'\t' | b'\n' | b'(' | b'-' | b'+')
}

/// Length of a term value: a bracketed range or a run of non-space text
fn value_len(rest: &str) -> usize {
    let close = match rest.as_bytes().first() {
        Some(b'[') => Some(']'),
        Some(b'{') => Some('}'),
        _ => None,
    };
    match close {
        Some(c) => rest.find(c).map_or(rest.len(), |p| p + 1),
        None => rest
            .find(|c: char| c.is_whitespace() || c == ')')
            .unwrap_or(rest.len()),
    }
}

fn bounds_of(query: &str, terms: &[DateTerm]) -> Result<(i64, i64), ParseError> {
    let mut start = UNBOUNDED;
    let mut end = UNBOUNDED;

    for term in terms {
        let Some(millis) = term.millis else {
            continue;
        };
        let slot = match term.bound {
            Bound::Start => &mut start,
            Bound::End => &mut end,
        };
        if *slot != UNBOUNDED {
            return Err(ParseError::DateExpression {
                expression: query[term.span.clone()].to_string(),
                reason: "bound given more than once".to_string(),
            });
        }
        *slot = millis;
    }

    Ok((start, end))
}

fn rewrite_terms(field: &str, query: &str, terms: &[DateTerm]) -> String {
    let mut out = String::with_capacity(query.len() + 16);
    let mut last = 0;

    for term in terms {
        let Some(millis) = term.millis else {
            continue;
        };
        out.push_str(&query[last..term.span.start]);
        match term.bound {
            Bound::Start => out.push_str(&format!("{}:[{} TO *]", field, millis)),
            Bound::End => out.push_str(&format!("{}:[* TO {}]", field, millis)),
        }
        last = term.span.end;
    }
    out.push_str(&query[last..]);
    out
}

impl DateRangeParser for ChronixDateParser {
    fn extract_bounds(&self, query: &str) -> Result<(i64, i64), ParseError> {
        bounds_of(query, &self.terms(query, self.now())?)
    }

    fn rewrite(&self, query: &str) -> Result<String, ParseError> {
        let terms = self.terms(query, self.now())?;
        Ok(rewrite_terms(&self.timestamp_field, query, &terms))
    }

    fn rewrite_with_bounds(&self, query: &str) -> Result<(String, i64, i64), ParseError> {
        let terms = self.terms(query, self.now())?;
        let (start, end) = bounds_of(query, &terms)?;
        Ok((rewrite_terms(&self.timestamp_field, query, &terms), start, end))
    }
}
