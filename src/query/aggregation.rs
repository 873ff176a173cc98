//! Time-windowed parallel aggregation
//!
//! Computes one analysis value per group, restricted to the documents whose
//! timestamp falls inside the request's [`TimeWindow`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      WindowedAggregator                           │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐    ┌──────────────────────┐    ┌──────────────┐ │
//! │  │ window      │───▶│  Worker pool         │───▶│ merge after  │ │
//! │  │ filter      │    │  (Semaphore-bound)   │    │ join_all     │ │
//! │  └─────────────┘    └──────────────────────┘    └──────────────┘ │
//! │                              │                                    │
//! │                              ▼                                    │
//! │                     spawn_blocking()                              │
//! │                     + group timeout                               │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Groups never observe each other: each worker owns its group's documents
//! and returns its own outcome, and the collecting task alone builds the
//! result list. A failing, panicking or stalled analysis only removes its own
//! group from the results; the failure is logged and reported in
//! [`AggregationOutcome::failures`].

use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::analysis::{Analysis, AnalysisResult};
use crate::config::{AggregationSettings, MAX_WORKERS};
use crate::error::AggregationError;
use crate::query::grouping::Groups;
use crate::types::{Document, FieldValue, TimeWindow};

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the aggregation stage
#[derive(Debug, Clone)]
pub struct AggregationConfig {
    /// Maximum groups analyzed at the same time
    pub workers: usize,

    /// Bound on a single group's analysis
    pub group_timeout: Duration,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        AggregationSettings::default().into()
    }
}

impl From<AggregationSettings> for AggregationConfig {
    fn from(settings: AggregationSettings) -> Self {
        Self {
            workers: settings.workers.clamp(1, MAX_WORKERS),
            group_timeout: settings.group_timeout(),
        }
    }
}

impl AggregationConfig {
    /// Set worker count, clamped to `1..=MAX_WORKERS`
    pub fn with_workers(mut self, n: usize) -> Self {
        self.workers = n.clamp(1, MAX_WORKERS);
        self
    }

    /// Set group timeout
    pub fn with_group_timeout(mut self, timeout: Duration) -> Self {
        self.group_timeout = timeout;
        self
    }
}

// ============================================================================
// Outcome
// ============================================================================

/// A group whose analysis failed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupFailure {
    /// Join key of the group
    pub key: String,
    /// What went wrong
    pub error: AggregationError,
}

/// Result of aggregating all groups of one request
#[derive(Debug, Clone, Default)]
pub struct AggregationOutcome {
    /// One entry per group that produced a value, in no particular order
    pub results: Vec<AnalysisResult>,

    /// Number of groups found (independent of how many produced a value)
    pub hits: usize,

    /// Groups with no document inside the window
    pub empty_groups: usize,

    /// Groups whose analysis ran but returned no value
    pub no_value_groups: usize,

    /// Groups whose analysis failed, panicked or timed out
    pub failures: Vec<GroupFailure>,
}

struct GroupOutcome {
    key: String,
    documents: usize,
    attributes: BTreeMap<String, FieldValue>,
    result: Result<Option<f64>, AggregationError>,
}

// ============================================================================
// Aggregator
// ============================================================================

/// Keep the documents whose timestamp lies in `[window.start, window.end]`
///
/// Documents without a readable timestamp are dropped.
pub fn filter_window(
    documents: Vec<Document>,
    timestamp_field: &str,
    window: TimeWindow,
) -> Vec<Document> {
    documents
        .into_iter()
        .filter(|doc| {
            doc.get(timestamp_field)
                .is_some_and(|t| window.contains_value(t))
        })
        .collect()
}

/// Per-group analysis over a bounded worker pool
#[derive(Debug, Clone)]
pub struct WindowedAggregator {
    config: AggregationConfig,
    timestamp_field: String,
}

impl WindowedAggregator {
    /// Create an aggregator reading timestamps from `timestamp_field`
    pub fn new(config: AggregationConfig, timestamp_field: impl Into<String>) -> Self {
        Self {
            config,
            timestamp_field: timestamp_field.into(),
        }
    }

    /// Analyze every group inside `window`
    ///
    /// `attribute_fields` are copied from each group's first in-window
    /// document into its result.
    pub async fn aggregate(
        &self,
        groups: Groups,
        window: TimeWindow,
        analysis: Arc<dyn Analysis>,
        attribute_fields: &[String],
    ) -> AggregationOutcome {
        let started = Instant::now();
        let mut outcome = AggregationOutcome {
            hits: groups.len(),
            ..Default::default()
        };

        if window.is_empty() {
            debug!(%window, groups = outcome.hits, "Empty window, skipping analysis");
            outcome.empty_groups = outcome.hits;
            return outcome;
        }

        let semaphore = Arc::new(Semaphore::new(self.config.workers));
        let mut pending = Vec::with_capacity(groups.len());

        for (key, documents) in groups {
            let in_window = filter_window(documents, &self.timestamp_field, window);
            if in_window.is_empty() {
                outcome.empty_groups += 1;
                continue;
            }

            let attributes = attribute_fields
                .iter()
                .filter_map(|f| in_window[0].get(f).map(|v| (f.clone(), v.clone())))
                .collect();

            pending.push(Self::analyze_group(
                key,
                in_window,
                attributes,
                window,
                Arc::clone(&analysis),
                Arc::clone(&semaphore),
                self.config.group_timeout,
            ));
        }

        for group in join_all(pending).await {
            match group.result {
                Ok(Some(value)) => outcome.results.push(AnalysisResult {
                    key: group.key,
                    analysis: analysis.name().to_string(),
                    value,
                    window,
                    documents: group.documents,
                    attributes: group.attributes,
                }),
                Ok(None) => outcome.no_value_groups += 1,
                Err(error) => {
                    warn!(
                        key = %group.key,
                        analysis = analysis.name(),
                        documents = group.documents,
                        error = %error,
                        "Group analysis failed, omitting group"
                    );
                    outcome.failures.push(GroupFailure {
                        key: group.key,
                        error,
                    });
                }
            }
        }

        info!(
            analysis = analysis.name(),
            %window,
            groups = outcome.hits,
            results = outcome.results.len(),
            empty = outcome.empty_groups,
            failed = outcome.failures.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Aggregation complete"
        );
        outcome
    }

    async fn analyze_group(
        key: String,
        documents: Vec<Document>,
        attributes: BTreeMap<String, FieldValue>,
        window: TimeWindow,
        analysis: Arc<dyn Analysis>,
        semaphore: Arc<Semaphore>,
        timeout: Duration,
    ) -> GroupOutcome {
        let count = documents.len();

        // Held until this group finishes or times out
        let _permit = match semaphore.acquire().await {
            Ok(p) => p,
            Err(_) => {
                return GroupOutcome {
                    key,
                    documents: count,
                    attributes,
                    result: Err(AggregationError::Panicked("worker pool closed".to_string())),
                }
            }
        };

        let task = tokio::task::spawn_blocking(move || analysis.compute(&documents, window));

        let result = match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(AggregationError::Panicked(join_error.to_string())),
            Err(_) => Err(AggregationError::Timeout(timeout)),
        };

        GroupOutcome {
            key,
            documents: count,
            attributes,
            result,
        }
    }
}
