//! Chronix query - time-series aware query handling over a search index
//!
//! This library routes search requests either to plain retrieval or to a
//! grouped, time-windowed analysis path:
//! - Date-range terms (`start:NOW-1DAY`) rewritten into native range queries
//! - Lazy, page-at-a-time retrieval through a continue-after cursor
//! - Grouping of matched documents into time series by join key
//! - Per-series analyses computed in parallel on a bounded worker pool
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use chronix_query::analysis::AnalysisRegistry;
//! use chronix_query::config::Config;
//! use chronix_query::date::ChronixDateParser;
//! use chronix_query::engine::InMemorySearchEngine;
//! use chronix_query::params::{RequestParams, FQ, Q};
//! use chronix_query::query::QueryDispatcher;
//! use chronix_query::types::{DocId, Document};
//!
//! # tokio_test_block_on(async {
//! let engine = InMemorySearchEngine::with_documents(vec![
//!     Document::builder(DocId(1)).field("metric", "cpu").field("start", 10i64).field("value", 0.5).build(),
//!     Document::builder(DocId(2)).field("metric", "cpu").field("start", 20i64).field("value", 0.9).build(),
//! ]);
//! let dispatcher = QueryDispatcher::new(
//!     Arc::new(engine),
//!     Arc::new(ChronixDateParser::new("start")),
//!     Arc::new(AnalysisRegistry::with_builtins("value")),
//!     Config::default(),
//! );
//!
//! let params = RequestParams::new().with(Q, "metric:cpu").with(FQ, "ag=max");
//! let response = dispatcher.handle(params).await.unwrap();
//! assert_eq!(response.hits(), Some(1));
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod params;
pub mod types;

/// Configuration management with TOML support
pub mod config;

/// Tracing subscriber setup
pub mod telemetry;

/// Search engine abstraction and the in-memory engine
pub mod engine;

/// Date-range term extraction and rewriting
pub mod date;

/// Per-group analysis functions and their registry
pub mod analysis;

/// Retrieval, grouping, aggregation and request dispatch
pub mod query;

// Re-export main types
pub use error::{AggregationError, ParseError, QueryError, Result, RetrievalError};
pub use query::{QueryDispatcher, QueryResponse};
pub use types::{DocId, Document, FieldValue, SortSpec, TimeWindow};
