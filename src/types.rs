//! Core data types
//!
//! - **`DocId`**: index-assigned document identity
//! - **`FieldValue`** / **`Document`**: an immutable bag of named fields
//! - **`SortSpec`**: sort criterion for paged retrieval
//! - **`ScoredRef`**: continue-after handle returned by one page of search
//! - **`TimeWindow`**: inclusive time bounds for analysis input
//!
//! # Example
//!
//! ```rust
//! use chronix_query::types::{DocId, Document, TimeWindow};
//!
//! let doc = Document::builder(DocId(1))
//!     .field("metric", "cpu")
//!     .field("start", 1_500i64)
//!     .build();
//!
//! let window = TimeWindow::new(1_000, 2_000);
//! assert!(window.contains(doc.get_i64("start").unwrap()));
//! ```

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::ParseError;

/// Sentinel used on numeric time bounds to mean "no bound"
pub const UNBOUNDED: i64 = -1;

/// Identity of a document inside the index
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocId(pub u64);

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "doc#{}", self.0)
    }
}

// ============================================================================
// Field values
// ============================================================================

/// A single stored field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Boolean flag
    Bool(bool),
    /// Integer (timestamps are stored as epoch milliseconds)
    Int(i64),
    /// Floating point measurement
    Float(f64),
    /// Text value
    Text(String),
}

impl FieldValue {
    /// Integer view of the value (floats are truncated, text is parsed)
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(v) => Some(*v),
            FieldValue::Float(v) if v.is_finite() => Some(*v as i64),
            FieldValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Floating point view of the value
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(v) => Some(*v as f64),
            FieldValue::Float(v) => Some(*v),
            FieldValue::Text(s) => s.trim().parse().ok(),
            FieldValue::Bool(_) => None,
        }
    }

    /// Text view of the value, as used by join keys and term matching
    pub fn to_text(&self) -> String {
        match self {
            FieldValue::Bool(b) => b.to_string(),
            FieldValue::Int(v) => v.to_string(),
            FieldValue::Float(v) => v.to_string(),
            FieldValue::Text(s) => s.clone(),
        }
    }

    fn kind_rank(&self) -> u8 {
        match self {
            FieldValue::Bool(_) => 0,
            FieldValue::Int(_) | FieldValue::Float(_) => 1,
            FieldValue::Text(_) => 2,
        }
    }

    /// Total order over field values
    ///
    /// Numbers compare numerically regardless of representation; values of
    /// different kinds order by kind (bool < number < text).
    pub fn total_cmp(&self, other: &FieldValue) -> Ordering {
        match (self, other) {
            (FieldValue::Int(a), FieldValue::Int(b)) => a.cmp(b),
            (FieldValue::Bool(a), FieldValue::Bool(b)) => a.cmp(b),
            (FieldValue::Text(a), FieldValue::Text(b)) => a.cmp(b),
            (a, b) if a.kind_rank() == 1 && b.kind_rank() == 1 => {
                let (x, y) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
                x.total_cmp(&y)
            }
            (a, b) => a.kind_rank().cmp(&b.kind_rank()),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

// ============================================================================
// Document
// ============================================================================

/// A document materialized from the index
///
/// Immutable once retrieved; cloning is only done when a document has to be
/// handed to a worker thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Index identity
    pub id: DocId,

    /// Stored fields
    pub fields: BTreeMap<String, FieldValue>,
}

impl Document {
    /// Create a document from its fields
    pub fn new(id: DocId, fields: BTreeMap<String, FieldValue>) -> Self {
        Self { id, fields }
    }

    /// Start building a document
    pub fn builder(id: DocId) -> DocumentBuilder {
        DocumentBuilder {
            id,
            fields: BTreeMap::new(),
        }
    }

    /// Raw field access
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    /// Integer field access
    pub fn get_i64(&self, field: &str) -> Option<i64> {
        self.get(field).and_then(FieldValue::as_i64)
    }

    /// Float field access
    pub fn get_f64(&self, field: &str) -> Option<f64> {
        self.get(field).and_then(FieldValue::as_f64)
    }

    /// Textual field access
    pub fn get_text(&self, field: &str) -> Option<String> {
        self.get(field).map(FieldValue::to_text)
    }
}

/// Builder for [`Document`]
#[derive(Debug)]
pub struct DocumentBuilder {
    id: DocId,
    fields: BTreeMap<String, FieldValue>,
}

impl DocumentBuilder {
    /// Set a field
    pub fn field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Finish the document
    pub fn build(self) -> Document {
        Document::new(self.id, self.fields)
    }
}

// ============================================================================
// Sorting and paging
// ============================================================================

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    /// Ascending
    Asc,
    /// Descending
    Desc,
}

/// Sort criterion for paged retrieval
///
/// Engines must break ties by [`DocId`] ascending so the order is total and
/// continue-after paging neither skips nor repeats documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    /// Field to sort on
    pub field: String,
    /// Direction
    pub direction: SortDirection,
}

impl SortSpec {
    /// Ascending sort on a field
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    /// Descending sort on a field
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }

    /// Parse `"<field> asc|desc"` (direction defaults to ascending)
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let mut parts = input.split_whitespace();
        let field = parts
            .next()
            .ok_or_else(|| ParseError::InvalidSort(input.to_string()))?;
        let direction = match parts.next().map(str::to_ascii_lowercase).as_deref() {
            None | Some("asc") => SortDirection::Asc,
            Some("desc") => SortDirection::Desc,
            Some(_) => return Err(ParseError::InvalidSort(input.to_string())),
        };
        if parts.next().is_some() {
            return Err(ParseError::InvalidSort(input.to_string()));
        }
        Ok(Self {
            field: field.to_string(),
            direction,
        })
    }
}

impl fmt::Display for SortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = match self.direction {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        };
        write!(f, "{} {}", self.field, dir)
    }
}

/// Lightweight handle returned by one page of search
///
/// Only used as the continue-after marker for the next page; fields are read
/// through [`Document`] after a fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRef {
    /// Document identity
    pub doc: DocId,
    /// Value of the sort field (None when the document lacks it)
    pub sort_value: Option<FieldValue>,
}

// ============================================================================
// Time window
// ============================================================================

/// Inclusive `[start, end]` bound on document timestamps (epoch millis)
///
/// `start > end` is a valid, empty window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Start timestamp (inclusive)
    pub start: i64,
    /// End timestamp (inclusive)
    pub end: i64,
}

impl TimeWindow {
    /// Create a window; no validation, degenerate windows are allowed
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Window covering every non-negative timestamp
    pub fn unbounded() -> Self {
        Self::new(0, i64::MAX)
    }

    /// Resolve optional bounds, treating `None` and [`UNBOUNDED`] as defaults
    pub fn from_bounds(start: Option<i64>, end: Option<i64>) -> Self {
        let start = match start {
            Some(v) if v != UNBOUNDED => v,
            _ => 0,
        };
        let end = match end {
            Some(v) if v != UNBOUNDED => v,
            _ => i64::MAX,
        };
        Self::new(start, end)
    }

    /// Check whether `start <= timestamp <= end`
    #[inline]
    pub fn contains(&self, timestamp: i64) -> bool {
        self.start <= timestamp && timestamp <= self.end
    }

    /// Check a stored timestamp value against the window
    ///
    /// Floats are compared as floats, so `20.5` is outside `[0, 20]`.
    /// Non-numeric values are never inside.
    pub fn contains_value(&self, value: &FieldValue) -> bool {
        match value {
            FieldValue::Int(t) => self.contains(*t),
            FieldValue::Float(t) => self.contains_f64(*t),
            FieldValue::Text(s) => {
                let s = s.trim();
                match s.parse::<i64>() {
                    Ok(t) => self.contains(t),
                    Err(_) => s.parse::<f64>().is_ok_and(|t| self.contains_f64(t)),
                }
            }
            FieldValue::Bool(_) => false,
        }
    }

    fn contains_f64(&self, timestamp: f64) -> bool {
        timestamp.is_finite() && self.start as f64 <= timestamp && timestamp <= self.end as f64
    }

    /// True when no timestamp can fall inside the window
    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }
}

impl Default for TimeWindow {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_contains_is_inclusive() {
        let w = TimeWindow::new(10, 20);
        assert!(w.contains(10));
        assert!(w.contains(20));
        assert!(!w.contains(9));
        assert!(!w.contains(21));
    }

    #[test]
    fn test_window_sentinel_resolves_to_defaults() {
        assert_eq!(TimeWindow::from_bounds(None, None), TimeWindow::unbounded());
        assert_eq!(
            TimeWindow::from_bounds(Some(UNBOUNDED), Some(50)),
            TimeWindow::new(0, 50)
        );
        assert_eq!(
            TimeWindow::from_bounds(Some(5), Some(UNBOUNDED)),
            TimeWindow::new(5, i64::MAX)
        );
    }

    #[test]
    fn test_window_contains_value() {
        let window = TimeWindow::new(0, 20);
        assert!(window.contains_value(&FieldValue::Int(20)));
        assert!(window.contains_value(&FieldValue::Float(20.0)));
        assert!(!window.contains_value(&FieldValue::Float(20.5)));
        assert!(!window.contains_value(&FieldValue::Float(-0.5)));
        assert!(!window.contains_value(&FieldValue::Float(f64::NAN)));
        assert!(!window.contains_value(&FieldValue::Float(1e300)));
        assert!(window.contains_value(&FieldValue::Text("7".into())));
        assert!(!window.contains_value(&FieldValue::Text("20.5".into())));
        assert!(!window.contains_value(&FieldValue::Bool(true)));
    }

    #[test]
    fn test_degenerate_window() {
        let w = TimeWindow::new(30, 10);
        assert!(w.is_empty());
        assert!(!w.contains(20));
    }

    #[test]
    fn test_sort_parse() {
        assert_eq!(SortSpec::parse("start asc").unwrap(), SortSpec::asc("start"));
        assert_eq!(SortSpec::parse("start DESC").unwrap(), SortSpec::desc("start"));
        assert_eq!(SortSpec::parse("start").unwrap(), SortSpec::asc("start"));
        assert!(SortSpec::parse("").is_err());
        assert!(SortSpec::parse("start up").is_err());
        assert!(SortSpec::parse("start asc extra").is_err());
    }

    #[test]
    fn test_field_value_ordering() {
        assert_eq!(
            FieldValue::Int(2).total_cmp(&FieldValue::Float(2.5)),
            Ordering::Less
        );
        assert_eq!(
            FieldValue::Text("a".into()).total_cmp(&FieldValue::Int(100)),
            Ordering::Greater
        );
    }

    #[test]
    fn test_field_value_untagged_serde() {
        let v: FieldValue = serde_json::from_str("42").unwrap();
        assert_eq!(v, FieldValue::Int(42));
        let v: FieldValue = serde_json::from_str("1.5").unwrap();
        assert_eq!(v, FieldValue::Float(1.5));
        let v: FieldValue = serde_json::from_str("\"cpu\"").unwrap();
        assert_eq!(v, FieldValue::Text("cpu".into()));
    }
}
