//! Date-range expressions embedded in query text
//!
//! Query text may carry `start:<expr>` / `end:<expr>` terms. Before any
//! retrieval the dispatcher asks a [`DateRangeParser`] for the numeric bounds
//! of those terms and for a rewritten query the search engine understands
//! natively.

pub mod chronix;

pub use chronix::ChronixDateParser;

use crate::error::ParseError;

/// Extracts and rewrites date-range terms
pub trait DateRangeParser: Send + Sync {
    /// Numeric `(start, end)` bounds in epoch millis, `-1` for an absent bound
    fn extract_bounds(&self, query: &str) -> Result<(i64, i64), ParseError>;

    /// Query text with every date term replaced by a native range term
    fn rewrite(&self, query: &str) -> Result<String, ParseError>;

    /// Rewritten query and its `(start, end)` bounds from one evaluation
    ///
    /// Relative expressions such as `NOW` resolve to the same instant in the
    /// text and in the bounds.
    fn rewrite_with_bounds(&self, query: &str) -> Result<(String, i64, i64), ParseError> {
        let (start, end) = self.extract_bounds(query)?;
        Ok((self.rewrite(query)?, start, end))
    }
}
