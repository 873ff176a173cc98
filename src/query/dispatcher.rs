//! Request dispatcher
//!
//! Entry point for a query request:
//!
//! ```text
//! RequestParams
//!      │
//!      ▼
//! ┌──────────────┐
//! │ Date rewrite │  start:/end: terms → native range + numeric bounds
//! └──────────────┘
//!      │
//!      ▼
//! ┌──────────────┐
//! │ Route        │  Plain | Analysis, every parse error raised here
//! └──────────────┘
//!      │
//!      ├──────────────────────┐
//!      ▼                      ▼
//! ┌──────────────┐     ┌──────────────┐
//! │ Plain search │     │ Group        │──▶ rows == 0: count keys only
//! └──────────────┘     └──────────────┘
//!                             │
//!                             ▼
//!                      ┌──────────────┐
//!                      │ Aggregate    │
//!                      └──────────────┘
//! ```
//!
//! Nothing touches the search engine until routing has succeeded, so a
//! malformed request fails without any retrieval.

use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::analysis::{Analysis, AnalysisRegistry, AnalysisResult, AnalysisSpec};
use crate::config::Config;
use crate::date::DateRangeParser;
use crate::engine::SearchEngine;
use crate::error::{ParseError, QueryError};
use crate::params::{RequestParams, QUERY_END_LONG, QUERY_START_LONG, Q, SORT};
use crate::query::aggregation::{AggregationConfig, GroupFailure, WindowedAggregator};
use crate::query::cursor::{CursorConfig, DocumentCursor};
use crate::query::grouping::{DocumentGrouper, JoinFunction};
use crate::types::{Document, SortSpec, TimeWindow, UNBOUNDED};

// ============================================================================
// Routing
// ============================================================================

/// Plain search request
#[derive(Debug, Clone)]
pub struct PlainPlan {
    /// Rewritten query text
    pub query: String,
    /// Sort criterion
    pub sort: SortSpec,
    /// Maximum documents returned
    pub rows: usize,
}

/// Grouping/analysis request, fully validated
#[derive(Clone)]
pub struct AnalysisPlan {
    /// Rewritten query text
    pub query: String,
    /// Sort criterion for the full pass
    pub sort: SortSpec,
    /// Join key function
    pub join: JoinFunction,
    /// Window the analysis input is restricted to
    pub window: TimeWindow,
    /// `Some(0)` requests the count-only path
    pub rows: Option<usize>,
    /// Requested analysis
    pub spec: AnalysisSpec,
    /// Resolved analysis
    pub analysis: Arc<dyn Analysis>,
}

impl AnalysisPlan {
    /// Whether only the number of groups is wanted
    pub fn is_count_only(&self) -> bool {
        self.rows == Some(0)
    }
}

impl std::fmt::Debug for AnalysisPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisPlan")
            .field("query", &self.query)
            .field("sort", &self.sort)
            .field("join", &self.join)
            .field("window", &self.window)
            .field("rows", &self.rows)
            .field("analysis", &self.spec.to_string())
            .finish()
    }
}

/// How a request is served, decided once per request
#[derive(Debug, Clone)]
pub enum Route {
    /// Delegate to the search engine
    Plain(PlainPlan),
    /// Group, window and analyze
    Analysis(AnalysisPlan),
}

// ============================================================================
// Response
// ============================================================================

/// Response of a successful request
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryResponse {
    /// Plain search result
    Documents {
        /// Matching documents in sort order
        documents: Vec<Document>,
    },

    /// Analysis result
    Analysis {
        /// Per-group values, sorted by key
        results: Vec<AnalysisResult>,
        /// Number of results; distinct keys on the count-only path
        num_found: usize,
        /// Number of groups found
        hits: usize,
        /// Groups omitted because their analysis failed
        failed_groups: Vec<GroupFailure>,
    },
}

impl QueryResponse {
    /// Group count for analysis responses
    pub fn hits(&self) -> Option<usize> {
        match self {
            QueryResponse::Documents { .. } => None,
            QueryResponse::Analysis { hits, .. } => Some(*hits),
        }
    }

    /// Documents or results returned
    pub fn num_found(&self) -> usize {
        match self {
            QueryResponse::Documents { documents } => documents.len(),
            QueryResponse::Analysis { num_found, .. } => *num_found,
        }
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Dispatches requests between plain search and grouped analysis
pub struct QueryDispatcher {
    engine: Arc<dyn SearchEngine>,
    date_parser: Arc<dyn DateRangeParser>,
    registry: Arc<AnalysisRegistry>,
    config: Config,
}

impl QueryDispatcher {
    /// Create a dispatcher from its collaborators
    pub fn new(
        engine: Arc<dyn SearchEngine>,
        date_parser: Arc<dyn DateRangeParser>,
        registry: Arc<AnalysisRegistry>,
        config: Config,
    ) -> Self {
        Self {
            engine,
            date_parser,
            registry,
            config,
        }
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    fn cursor_config(&self) -> CursorConfig {
        self.config.retrieval.clone().into()
    }

    /// Serve one request
    pub async fn handle(&self, params: RequestParams) -> Result<QueryResponse, QueryError> {
        let started = Instant::now();
        let params = self.rewrite_params(&params)?;
        let route = self.route(&params)?;

        let response = match route {
            Route::Plain(plan) => self.search(plan).await?,
            Route::Analysis(plan) => self.analyze(plan).await?,
        };

        info!(
            num_found = response.num_found(),
            hits = response.hits(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Request complete"
        );
        Ok(response)
    }

    /// Replace date terms in `q` and record their numeric bounds
    ///
    /// Bounds found in the query text replace any caller-supplied
    /// `query_start_long`/`query_end_long`; a bound absent from the text keeps
    /// the caller's value, or `-1` when there is none. On error the input is
    /// left untouched.
    pub fn rewrite_params(&self, params: &RequestParams) -> Result<RequestParams, ParseError> {
        let original = params.query();
        let (rewritten, start, end) = self.date_parser.rewrite_with_bounds(original)?;

        let mut params = params.clone();
        if rewritten != original {
            debug!(original, rewritten = %rewritten, "Rewrote date terms");
        }
        params.set(Q, rewritten);

        for (name, bound) in [(QUERY_START_LONG, start), (QUERY_END_LONG, end)] {
            if bound != UNBOUNDED || params.get(name).is_none() {
                params.set(name, bound.to_string());
            }
        }
        Ok(params)
    }

    /// Decide how to serve already rewritten parameters
    pub fn route(&self, params: &RequestParams) -> Result<Route, ParseError> {
        let sort = match params.get(SORT) {
            Some(raw) => SortSpec::parse(raw)?,
            None => SortSpec::parse(&self.config.schema.default_sort)?,
        };
        let rows = params.rows()?;
        let query = params.query().to_string();

        let Some(spec) = AnalysisSpec::from_filters(params.filters()) else {
            return Ok(Route::Plain(PlainPlan {
                query,
                sort,
                rows: rows.unwrap_or(self.config.search.default_rows),
            }));
        };

        let spec = spec?;
        let analysis = self.registry.resolve(&spec)?;
        let window = TimeWindow::from_bounds(
            params.get_i64(QUERY_START_LONG)?,
            params.get_i64(QUERY_END_LONG)?,
        );
        let join = JoinFunction::from_filters(
            params.filters(),
            &self.config.schema.default_join_fields,
        );

        Ok(Route::Analysis(AnalysisPlan {
            query,
            sort,
            join,
            window,
            rows,
            spec,
            analysis,
        }))
    }

    async fn search(&self, plan: PlainPlan) -> Result<QueryResponse, QueryError> {
        info!(query = %plan.query, sort = %plan.sort, rows = plan.rows, "Plain search");

        let config = self
            .cursor_config()
            .with_page_size(plan.rows.min(self.config.retrieval.page_size));
        let mut cursor =
            DocumentCursor::new(Arc::clone(&self.engine), plan.query, plan.sort, config);

        let mut documents = Vec::with_capacity(plan.rows.min(1024));
        while documents.len() < plan.rows {
            match cursor.next().await? {
                Some(doc) => documents.push(doc),
                None => break,
            }
        }

        Ok(QueryResponse::Documents { documents })
    }

    async fn analyze(&self, plan: AnalysisPlan) -> Result<QueryResponse, QueryError> {
        info!(
            query = %plan.query,
            analysis = %plan.spec,
            join = ?plan.join,
            window = %plan.window,
            count_only = plan.is_count_only(),
            "Analysis request"
        );

        let grouper = DocumentGrouper::new(Arc::clone(&self.engine), self.cursor_config());

        if plan.is_count_only() {
            let keys = grouper.count_keys(&plan.query, &plan.sort, &plan.join).await?;
            return Ok(QueryResponse::Analysis {
                results: Vec::new(),
                num_found: keys,
                hits: keys,
                failed_groups: Vec::new(),
            });
        }

        let groups = grouper.group(&plan.query, &plan.sort, &plan.join).await?;
        let aggregator = WindowedAggregator::new(
            AggregationConfig::from(self.config.aggregation.clone()),
            self.config.schema.timestamp_field.clone(),
        );
        let outcome = aggregator
            .aggregate(groups, plan.window, plan.analysis, plan.join.fields())
            .await;

        let mut results = outcome.results;
        results.sort_by(|a, b| a.key.cmp(&b.key));

        Ok(QueryResponse::Analysis {
            num_found: results.len(),
            hits: outcome.hits,
            results,
            failed_groups: outcome.failures,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::date::ChronixDateParser;
    use crate::engine::InMemorySearchEngine;
    use crate::error::AggregationError;
    use crate::params::{FQ, ROWS};
    use crate::types::DocId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn doc(id: u64, metric: &str, start: i64, value: f64) -> Document {
        Document::builder(DocId(id))
            .field("metric", metric)
            .field("start", start)
            .field("value", value)
            .build()
    }

    fn engine() -> Arc<InMemorySearchEngine> {
        Arc::new(InMemorySearchEngine::with_documents(vec![
            doc(1, "A", 10, 1.0),
            doc(2, "B", 5, 2.0),
            doc(3, "A", 20, 3.0),
            doc(4, "A", 30, 4.0),
            doc(5, "B", 25, 5.0),
        ]))
    }

    struct Counting(Arc<AtomicUsize>);

    impl Analysis for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn compute(
            &self,
            docs: &[Document],
            _: TimeWindow,
        ) -> Result<Option<f64>, AggregationError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Some(docs.len() as f64))
        }
    }

    fn dispatcher(engine: Arc<InMemorySearchEngine>) -> (QueryDispatcher, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = AnalysisRegistry::with_builtins("value");
        let counter = Arc::clone(&calls);
        registry.register("counting", move |_| {
            Ok(Arc::new(Counting(Arc::clone(&counter))) as Arc<dyn Analysis>)
        });

        let dispatcher = QueryDispatcher::new(
            engine,
            Arc::new(ChronixDateParser::new("start").with_now(1_000)),
            Arc::new(registry),
            Config::default(),
        );
        (dispatcher, calls)
    }

    #[tokio::test]
    async fn test_windowed_analysis() {
        let (dispatcher, _) = dispatcher(engine());
        let params = RequestParams::new()
            .with(Q, "start:0 AND end:20")
            .with(FQ, "ag=counting");

        let response = dispatcher.handle(params).await.unwrap();
        let QueryResponse::Analysis {
            results,
            num_found,
            hits,
            failed_groups,
        } = response
        else {
            panic!("expected analysis response");
        };

        assert_eq!(hits, 2);
        assert_eq!(num_found, 2);
        assert!(failed_groups.is_empty());
        assert_eq!(results[0].key, "A");
        assert_eq!(results[0].value, 2.0);
        assert_eq!(results[1].key, "B");
        assert_eq!(results[1].value, 1.0);
        assert_eq!(results[0].window, TimeWindow::new(0, 20));
    }

    #[tokio::test]
    async fn test_count_only_skips_analysis() {
        let (dispatcher, calls) = dispatcher(engine());
        let params = RequestParams::new()
            .with(ROWS, "0")
            .with(FQ, "ag=counting");

        let response = dispatcher.handle(params).await.unwrap();
        assert_eq!(response.num_found(), 2);
        assert_eq!(response.hits(), Some(2));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_malformed_date_fails_before_retrieval() {
        let engine = engine();
        let (dispatcher, _) = dispatcher(Arc::clone(&engine));
        let params = RequestParams::new()
            .with(Q, "metric:A AND start:yesterday")
            .with(FQ, "ag=max");

        let err = dispatcher.handle(params).await.unwrap_err();
        assert!(err.is_parse());
        assert_eq!(engine.search_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_analysis_fails_before_retrieval() {
        let engine = engine();
        let (dispatcher, _) = dispatcher(Arc::clone(&engine));
        let params = RequestParams::new().with(FQ, "ag=fft");

        let err = dispatcher.handle(params).await.unwrap_err();
        assert!(matches!(
            err,
            QueryError::Parse(ParseError::UnknownAnalysis(ref name)) if name == "fft"
        ));
        assert_eq!(engine.search_count(), 0);
    }

    #[tokio::test]
    async fn test_plain_search() {
        let (dispatcher, _) = dispatcher(engine());
        let params = RequestParams::new()
            .with(Q, "metric:A")
            .with(SORT, "start desc")
            .with(ROWS, "2");

        let response = dispatcher.handle(params).await.unwrap();
        let QueryResponse::Documents { documents } = response else {
            panic!("expected documents");
        };
        let ids: Vec<u64> = documents.iter().map(|d| d.id.0).collect();
        assert_eq!(ids, vec![4, 3]);
    }

    #[tokio::test]
    async fn test_plain_search_default_rows() {
        let engine = Arc::new(InMemorySearchEngine::with_documents(
            (0..25).map(|i| doc(i, "A", i as i64, 0.0)),
        ));
        let (dispatcher, _) = dispatcher(engine);
        let response = dispatcher.handle(RequestParams::new()).await.unwrap();
        assert_eq!(response.num_found(), 10);
        assert_eq!(response.hits(), None);
    }

    #[test]
    fn test_rewrite_params_sets_bounds() {
        let (dispatcher, _) = dispatcher(engine());
        let params = RequestParams::new().with(Q, "metric:A AND end:NOW");

        let rewritten = dispatcher.rewrite_params(&params).unwrap();
        assert_eq!(rewritten.query(), "metric:A AND start:[* TO 1000]");
        assert_eq!(rewritten.get(QUERY_START_LONG), Some("-1"));
        assert_eq!(rewritten.get(QUERY_END_LONG), Some("1000"));
    }

    #[test]
    fn test_wall_clock_bound_matches_rewritten_text() {
        let dispatcher = QueryDispatcher::new(
            engine(),
            Arc::new(ChronixDateParser::new("start")),
            Arc::new(AnalysisRegistry::with_builtins("value")),
            Config::default(),
        );
        let params = RequestParams::new().with(Q, "end:NOW");

        for _ in 0..200 {
            let rewritten = dispatcher.rewrite_params(&params).unwrap();
            let end = rewritten.get(QUERY_END_LONG).unwrap().to_string();
            assert_eq!(rewritten.query(), format!("start:[* TO {}]", end));
        }
    }

    #[test]
    fn test_caller_bounds_survive_when_query_has_none() {
        let (dispatcher, _) = dispatcher(engine());
        let params = RequestParams::new()
            .with(Q, "metric:A")
            .with(QUERY_START_LONG, "15");

        let rewritten = dispatcher.rewrite_params(&params).unwrap();
        assert_eq!(rewritten.get(QUERY_START_LONG), Some("15"));
        assert_eq!(rewritten.get(QUERY_END_LONG), Some("-1"));
    }

    #[test]
    fn test_route_resolution() {
        let (dispatcher, _) = dispatcher(engine());

        let plain = RequestParams::new().with(FQ, "metric:A");
        assert!(matches!(dispatcher.route(&plain).unwrap(), Route::Plain(_)));

        let params = RequestParams::new()
            .with(FQ, "join=metric,host;analysis=p:0.9")
            .with(QUERY_START_LONG, "-1")
            .with(QUERY_END_LONG, "50");
        let Route::Analysis(plan) = dispatcher.route(&params).unwrap() else {
            panic!("expected analysis route");
        };
        assert_eq!(plan.spec.to_string(), "p:0.9");
        assert_eq!(plan.join.fields(), &["metric".to_string(), "host".to_string()]);
        assert_eq!(plan.window, TimeWindow::new(0, 50));
        assert!(!plan.is_count_only());

        let bad_rows = RequestParams::new().with(ROWS, "many");
        assert!(dispatcher.route(&bad_rows).is_err());

        let bad_bound = RequestParams::new()
            .with(FQ, "ag=max")
            .with(QUERY_END_LONG, "soon");
        assert!(matches!(
            dispatcher.route(&bad_bound).unwrap_err(),
            ParseError::InvalidNumber { .. }
        ));
    }
}
