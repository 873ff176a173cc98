//! Analysis functions
//!
//! An analysis turns the in-window documents of one group into at most one
//! value. The core treats analyses as opaque: it resolves an
//! [`AnalysisSpec`] (identifier + parameters, taken from the request's filter
//! queries) through an [`AnalysisRegistry`] and calls [`Analysis::compute`]
//! once per group.
//!
//! # Filter syntax
//!
//! ```text
//! ag=max
//! ag=p:0.95
//! analysis=avg
//! ```
//!
//! # Example
//!
//! ```rust
//! use chronix_query::analysis::{AnalysisRegistry, AnalysisSpec};
//!
//! let registry = AnalysisRegistry::with_builtins("value");
//! let spec = AnalysisSpec::parse("p:0.5").unwrap();
//! let analysis = registry.resolve(&spec).unwrap();
//! assert_eq!(analysis.name(), "p");
//! ```

pub mod functions;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::error::{AggregationError, ParseError};
use crate::params;
use crate::types::{Document, FieldValue, TimeWindow};

pub use functions::{Reducer, ValueAnalysis};

/// Filter directives that mark a request as an analysis request
pub const ANALYSIS_DIRECTIVES: [&str; 2] = ["ag", "analysis"];

// ============================================================================
// Analysis trait
// ============================================================================

/// A per-group analysis function
///
/// Implementations must be pure with respect to their input: groups are
/// computed concurrently on separate workers.
pub trait Analysis: Send + Sync {
    /// Identifier the analysis was resolved from
    fn name(&self) -> &str;

    /// Compute the group's value from its in-window documents
    ///
    /// `Ok(None)` means "no result" for this group.
    fn compute(
        &self,
        documents: &[Document],
        window: TimeWindow,
    ) -> Result<Option<f64>, AggregationError>;
}

// ============================================================================
// Analysis specification
// ============================================================================

/// Analysis identifier plus its parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisSpec {
    /// Lower-cased identifier
    pub name: String,
    /// Raw parameters
    pub params: Vec<String>,
}

impl AnalysisSpec {
    /// Parse `<name>[:<p1>,<p2>,...]`
    pub fn parse(expression: &str) -> Result<Self, ParseError> {
        let expression = expression.trim();
        let (name, params) = match expression.split_once(':') {
            Some((name, params)) => (
                name.trim(),
                params
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
            None => (expression, Vec::new()),
        };

        if name.is_empty() {
            return Err(ParseError::UnknownAnalysis(expression.to_string()));
        }

        Ok(Self {
            name: name.to_ascii_lowercase(),
            params,
        })
    }

    /// The analysis a request asks for, if any
    pub fn from_filters(filters: &[String]) -> Option<Result<Self, ParseError>> {
        ANALYSIS_DIRECTIVES
            .iter()
            .find_map(|d| params::filter_directive(filters, d))
            .map(Self::parse)
    }
}

impl fmt::Display for AnalysisSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.params.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}:{}", self.name, self.params.join(","))
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Builds an analysis from its parameters
pub type AnalysisFactory = dyn Fn(&[String]) -> Result<Arc<dyn Analysis>, ParseError> + Send + Sync;

/// Name -> analysis factory
///
/// Resolution validates parameters, so bad parameters are rejected before any
/// retrieval starts.
#[derive(Default)]
pub struct AnalysisRegistry {
    factories: RwLock<HashMap<String, Arc<AnalysisFactory>>>,
}

impl AnalysisRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in reducers over `value_field`
    pub fn with_builtins(value_field: impl Into<String>) -> Self {
        let registry = Self::new();
        functions::register_builtins(&registry, &value_field.into());
        registry
    }

    /// Register (or replace) a factory
    pub fn register<F>(&self, name: &str, factory: F)
    where
        F: Fn(&[String]) -> Result<Arc<dyn Analysis>, ParseError> + Send + Sync + 'static,
    {
        self.factories
            .write()
            .insert(name.to_ascii_lowercase(), Arc::new(factory));
    }

    /// Instantiate the analysis a spec names
    pub fn resolve(&self, spec: &AnalysisSpec) -> Result<Arc<dyn Analysis>, ParseError> {
        let factory = self
            .factories
            .read()
            .get(&spec.name)
            .cloned()
            .ok_or_else(|| ParseError::UnknownAnalysis(spec.name.clone()))?;
        factory(&spec.params)
    }

    /// Registered identifiers, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for AnalysisRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisRegistry")
            .field("analyses", &self.names())
            .finish()
    }
}

// ============================================================================
// Result
// ============================================================================

/// One group's analysis value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Join key of the group
    pub key: String,
    /// Analysis that produced the value
    pub analysis: String,
    /// Computed value
    pub value: f64,
    /// Window the input was restricted to
    pub window: TimeWindow,
    /// Number of in-window documents analyzed
    pub documents: usize,
    /// Join fields copied from the group's first document
    pub attributes: BTreeMap<String, FieldValue>,
}
