//! Built-in analysis functions
//!
//! Reducers over a numeric value field of the in-window documents:
//!
//! | name    | parameters   | value                                   |
//! |---------|--------------|-----------------------------------------|
//! | `min`   |              | smallest value                          |
//! | `max`   |              | largest value                           |
//! | `avg`   |              | arithmetic mean                         |
//! | `sum`   |              | sum                                     |
//! | `count` |              | number of in-window documents           |
//! | `dev`   |              | population standard deviation           |
//! | `first` |              | value of the first document in order    |
//! | `last`  |              | value of the last document in order     |
//! | `p`     | `q` in (0,1] | nearest-rank percentile                 |
//!
//! Documents without the value field are skipped; a value field that is
//! present but not numeric fails the group.

use std::sync::Arc;

use super::{Analysis, AnalysisRegistry};
use crate::error::{AggregationError, ParseError};
use crate::types::{Document, TimeWindow};

/// Reduction applied to a group's values
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reducer {
    /// Minimum
    Min,
    /// Maximum
    Max,
    /// Mean
    Avg,
    /// Sum
    Sum,
    /// Document count
    Count,
    /// Population standard deviation
    Dev,
    /// First value in retrieval order
    First,
    /// Last value in retrieval order
    Last,
    /// Nearest-rank percentile, quantile in (0, 1]
    Percentile(f64),
}

impl Reducer {
    /// Identifier the reducer is registered under
    pub fn name(&self) -> &'static str {
        match self {
            Reducer::Min => "min",
            Reducer::Max => "max",
            Reducer::Avg => "avg",
            Reducer::Sum => "sum",
            Reducer::Count => "count",
            Reducer::Dev => "dev",
            Reducer::First => "first",
            Reducer::Last => "last",
            Reducer::Percentile(_) => "p",
        }
    }

    /// Reduce values; `None` for an empty input
    pub fn reduce(&self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;

        let value = match self {
            Reducer::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            Reducer::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Reducer::Avg => values.iter().sum::<f64>() / n,
            Reducer::Sum => values.iter().sum(),
            Reducer::Count => n,
            Reducer::Dev => {
                let mean = values.iter().sum::<f64>() / n;
                let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
                variance.sqrt()
            }
            Reducer::First => values[0],
            Reducer::Last => values[values.len() - 1],
            Reducer::Percentile(q) => {
                let mut sorted = values.to_vec();
                sorted.sort_by(f64::total_cmp);
                let rank = (q * n).ceil() as usize;
                sorted[rank.clamp(1, sorted.len()) - 1]
            }
        };
        Some(value)
    }
}

/// Reducer bound to a value field
#[derive(Debug, Clone)]
pub struct ValueAnalysis {
    field: String,
    reducer: Reducer,
}

impl ValueAnalysis {
    /// Create an analysis reducing `field`
    pub fn new(field: impl Into<String>, reducer: Reducer) -> Self {
        Self {
            field: field.into(),
            reducer,
        }
    }

    fn values(&self, documents: &[Document]) -> Result<Vec<f64>, AggregationError> {
        let mut values = Vec::with_capacity(documents.len());
        for doc in documents {
            let Some(raw) = doc.get(&self.field) else {
                continue;
            };
            match raw.as_f64() {
                Some(v) if v.is_nan() => {}
                Some(v) => values.push(v),
                None => {
                    return Err(AggregationError::Failed(format!(
                        "field '{}' of {} is not numeric: {}",
                        self.field, doc.id, raw
                    )))
                }
            }
        }
        Ok(values)
    }
}

impl Analysis for ValueAnalysis {
    fn name(&self) -> &str {
        self.reducer.name()
    }

    fn compute(
        &self,
        documents: &[Document],
        _window: TimeWindow,
    ) -> Result<Option<f64>, AggregationError> {
        if documents.is_empty() {
            return Ok(None);
        }
        if self.reducer == Reducer::Count {
            return Ok(Some(documents.len() as f64));
        }
        let values = self.values(documents)?;
        Ok(self.reducer.reduce(&values))
    }
}

fn no_params(name: &str, params: &[String]) -> Result<(), ParseError> {
    if params.is_empty() {
        Ok(())
    } else {
        Err(ParseError::InvalidAnalysisParams {
            name: name.to_string(),
            reason: format!("expected no parameters, got {}", params.len()),
        })
    }
}

fn parse_quantile(params: &[String]) -> Result<f64, ParseError> {
    let invalid = |reason: String| ParseError::InvalidAnalysisParams {
        name: "p".to_string(),
        reason,
    };

    let [raw] = params else {
        return Err(invalid(format!(
            "expected exactly one quantile, got {}",
            params.len()
        )));
    };
    let q: f64 = raw
        .parse()
        .map_err(|_| invalid(format!("'{}' is not a number", raw)))?;
    if !(q > 0.0 && q <= 1.0) {
        return Err(invalid(format!("quantile {} outside (0, 1]", q)));
    }
    Ok(q)
}

/// Register every built-in reducer over `value_field`
pub fn register_builtins(registry: &AnalysisRegistry, value_field: &str) {
    let simple = [
        Reducer::Min,
        Reducer::Max,
        Reducer::Avg,
        Reducer::Sum,
        Reducer::Count,
        Reducer::Dev,
        Reducer::First,
        Reducer::Last,
    ];

    for reducer in simple {
        let field = value_field.to_string();
        registry.register(reducer.name(), move |params| {
            no_params(reducer.name(), params)?;
            Ok(Arc::new(ValueAnalysis::new(field.clone(), reducer)) as Arc<dyn Analysis>)
        });
    }

    let field = value_field.to_string();
    registry.register("p", move |params| {
        let q = parse_quantile(params)?;
        Ok(Arc::new(ValueAnalysis::new(field.clone(), Reducer::Percentile(q))) as Arc<dyn Analysis>)
    });
}
