//! Request parameters
//!
//! Requests arrive as a multimap of string parameters. Numeric parameters are
//! only interpreted when a component needs them, so a malformed value surfaces
//! as a [`ParseError`] naming the parameter.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ParseError;

/// Query text
pub const Q: &str = "q";
/// Filter queries (repeatable)
pub const FQ: &str = "fq";
/// Rows requested
pub const ROWS: &str = "rows";
/// Sort criterion
pub const SORT: &str = "sort";
/// Numeric window start set by the dispatcher
pub const QUERY_START_LONG: &str = "query_start_long";
/// Numeric window end set by the dispatcher
pub const QUERY_END_LONG: &str = "query_end_long";

/// Match-everything query used when `q` is absent
pub const MATCH_ALL: &str = "*:*";

/// Multi-valued request parameters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestParams {
    values: BTreeMap<String, Vec<String>>,
}

impl RequestParams {
    /// Empty parameter set
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style single value
    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.add(name, value);
        self
    }

    /// First value of a parameter
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .get(name)
            .and_then(|v| v.first())
            .map(String::as_str)
    }

    /// All values of a parameter
    pub fn get_all(&self, name: &str) -> &[String] {
        self.values.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Replace a parameter with a single value
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.values.insert(name.to_string(), vec![value.into()]);
    }

    /// Append a value to a parameter
    pub fn add(&mut self, name: &str, value: impl Into<String>) {
        self.values
            .entry(name.to_string())
            .or_default()
            .push(value.into());
    }

    /// Query text, defaulting to match-all
    pub fn query(&self) -> &str {
        self.get(Q).unwrap_or(MATCH_ALL)
    }

    /// Filter queries
    pub fn filters(&self) -> &[String] {
        self.get_all(FQ)
    }

    /// Parse an integer parameter; `Ok(None)` when absent
    pub fn get_i64(&self, name: &str) -> Result<Option<i64>, ParseError> {
        match self.get(name) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<i64>()
                .map(Some)
                .map_err(|_| ParseError::InvalidNumber {
                    param: name.to_string(),
                    value: raw.to_string(),
                }),
        }
    }

    /// Rows requested; negative values mean "not specified"
    pub fn rows(&self) -> Result<Option<usize>, ParseError> {
        Ok(self
            .get_i64(ROWS)?
            .and_then(|rows| usize::try_from(rows).ok()))
    }
}

/// Value of the first `name=value` directive in the filter queries
///
/// A filter may carry several directives separated by `;`, e.g.
/// `join=metric,host;ag=max`.
pub fn filter_directive<'a>(filters: &'a [String], name: &str) -> Option<&'a str> {
    filters
        .iter()
        .flat_map(|fq| fq.split(';'))
        .filter_map(|segment| segment.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multi_valued_filters() {
        let params = RequestParams::new()
            .with(FQ, "join=host")
            .with(FQ, "ag=max");
        assert_eq!(params.filters(), &["join=host".to_string(), "ag=max".to_string()]);
        assert_eq!(params.get(FQ), Some("join=host"));
    }

    #[test]
    fn test_set_replaces() {
        let mut params = RequestParams::new().with(Q, "metric:cpu");
        params.set(Q, "metric:mem");
        assert_eq!(params.get_all(Q).len(), 1);
        assert_eq!(params.query(), "metric:mem");
    }

    #[test]
    fn test_query_defaults_to_match_all() {
        assert_eq!(RequestParams::new().query(), MATCH_ALL);
    }

    #[test]
    fn test_filter_directive() {
        let filters = vec![
            "metric:cpu".to_string(),
            "join=metric,host; ag=p:0.5".to_string(),
        ];
        assert_eq!(filter_directive(&filters, "join"), Some("metric,host"));
        assert_eq!(filter_directive(&filters, "ag"), Some("p:0.5"));
        assert_eq!(filter_directive(&filters, "analysis"), None);
    }

    #[test]
    fn test_rows_parsing() {
        assert_eq!(RequestParams::new().rows().unwrap(), None);
        assert_eq!(RequestParams::new().with(ROWS, "0").rows().unwrap(), Some(0));
        assert_eq!(RequestParams::new().with(ROWS, "-1").rows().unwrap(), None);

        let err = RequestParams::new().with(ROWS, "ten").rows().unwrap_err();
        assert!(matches!(err, ParseError::InvalidNumber { ref param, .. } if param == ROWS));
    }
}
