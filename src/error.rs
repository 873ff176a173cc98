//! Error types for query handling
//!
//! A request either succeeds (possibly with some groups missing because their
//! analysis failed) or fails outright with a [`QueryError`]. Per-group analysis
//! failures are reported through [`AggregationError`] and never abort a request.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::types::DocId;

/// Main error type for a query request
#[derive(Error, Debug)]
pub enum QueryError {
    /// Index I/O failed while paging or materializing documents
    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    /// Request text or parameters could not be parsed
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl QueryError {
    /// Whether this error was raised before any retrieval started
    pub fn is_parse(&self) -> bool {
        matches!(self, QueryError::Parse(_))
    }

    /// Whether this error came from the index
    pub fn is_retrieval(&self) -> bool {
        matches!(self, QueryError::Retrieval(_))
    }
}

/// Retrieval errors
///
/// Raised by the search engine collaborator or by the cursor's fetch timeout.
/// A retrieval error terminates the document sequence that produced it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RetrievalError {
    /// The search engine reported a failure
    #[error("Search engine failure: {0}")]
    Engine(String),

    /// A page search or document fetch did not complete in time
    #[error("Fetch timed out after {0:?}")]
    Timeout(Duration),

    /// A scored reference pointed at a document the index no longer has
    #[error("Document not found: {0}")]
    DocumentNotFound(DocId),
}

/// Parse errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    /// Malformed `start:`/`end:` date expression in the query text
    #[error("Invalid date expression '{expression}': {reason}")]
    DateExpression {
        /// The offending expression
        expression: String,
        /// Why it was rejected
        reason: String,
    },

    /// A numeric request parameter was not a number
    #[error("Parameter '{param}' is not a valid number: '{value}'")]
    InvalidNumber {
        /// Parameter name
        param: String,
        /// Raw value
        value: String,
    },

    /// Sort criterion not of the form `<field> asc|desc`
    #[error("Invalid sort criterion: '{0}'")]
    InvalidSort(String),

    /// Analysis identifier not present in the registry
    #[error("Unknown analysis: '{0}'")]
    UnknownAnalysis(String),

    /// Analysis parameters rejected by the analysis factory
    #[error("Invalid parameters for analysis '{name}': {reason}")]
    InvalidAnalysisParams {
        /// Analysis identifier
        name: String,
        /// Why the parameters were rejected
        reason: String,
    },

    /// Query text the index cannot interpret
    #[error("Invalid query '{query}': {reason}")]
    InvalidQuery {
        /// Query text
        query: String,
        /// Why it was rejected
        reason: String,
    },
}

/// Failure of a single group's analysis
///
/// Localized to its group: the group is omitted from the response and the
/// failure is logged and counted.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum AggregationError {
    /// The analysis function returned an error
    #[error("Analysis failed: {0}")]
    Failed(String),

    /// The analysis did not finish within the group timeout
    #[error("Analysis timed out after {0:?}")]
    Timeout(Duration),

    /// The analysis panicked or its worker was cancelled
    #[error("Analysis worker aborted: {0}")]
    Panicked(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, QueryError>;
