//! Document grouping (join) stage
//!
//! Drains the complete match set through a [`DocumentCursor`] and partitions
//! it into named groups with a [`JoinFunction`]. Every retrieved document ends
//! up in exactly one group, in retrieval order.
//!
//! When only the number of groups is needed, [`DocumentGrouper::count_keys`]
//! still visits every document but keeps nothing except the distinct keys.

use std::collections::hash_map::{self, HashMap};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::engine::SearchEngine;
use crate::error::QueryError;
use crate::params;
use crate::query::cursor::{CursorConfig, DocumentCursor};
use crate::types::{Document, SortSpec};

/// Filter directive naming the join fields: `join=metric,host`
pub const JOIN_DIRECTIVE: &str = "join";

/// Separator between field values in a join key
pub const KEY_SEPARATOR: &str = "-";

type KeyFn = dyn Fn(&Document) -> String + Send + Sync;

// ============================================================================
// Join function
// ============================================================================

/// Deterministic document -> join key mapping
#[derive(Clone)]
pub struct JoinFunction {
    kind: JoinKind,
}

#[derive(Clone)]
enum JoinKind {
    Fields(Vec<String>),
    Custom(Arc<KeyFn>),
}

impl JoinFunction {
    /// Join on the textual values of the given fields
    pub fn on_fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind: JoinKind::Fields(fields.into_iter().map(Into::into).collect()),
        }
    }

    /// Join with a caller-supplied key function (must be pure)
    pub fn custom(f: impl Fn(&Document) -> String + Send + Sync + 'static) -> Self {
        Self {
            kind: JoinKind::Custom(Arc::new(f)),
        }
    }

    /// Build the join function a request asks for
    ///
    /// Uses the first `join=` directive in the filter queries, falling back to
    /// `default_fields` when there is none or it names no fields.
    pub fn from_filters(filters: &[String], default_fields: &[String]) -> Self {
        let requested: Vec<String> = params::filter_directive(filters, JOIN_DIRECTIVE)
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|f| !f.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        if requested.is_empty() {
            Self::on_fields(default_fields.iter().cloned())
        } else {
            Self::on_fields(requested)
        }
    }

    /// Fields this function joins on (empty for custom functions)
    pub fn fields(&self) -> &[String] {
        match &self.kind {
            JoinKind::Fields(fields) => fields,
            JoinKind::Custom(_) => &[],
        }
    }

    /// Compute the key; a missing field contributes an empty string
    pub fn key(&self, doc: &Document) -> String {
        match &self.kind {
            JoinKind::Fields(fields) => fields
                .iter()
                .map(|f| doc.get_text(f).unwrap_or_default())
                .collect::<Vec<_>>()
                .join(KEY_SEPARATOR),
            JoinKind::Custom(f) => f(doc),
        }
    }
}

impl fmt::Debug for JoinFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            JoinKind::Fields(fields) => f.debug_tuple("JoinFunction").field(fields).finish(),
            JoinKind::Custom(_) => f.write_str("JoinFunction(<custom>)"),
        }
    }
}

// ============================================================================
// Groups
// ============================================================================

/// Join key -> documents, in retrieval order
#[derive(Debug, Clone, Default)]
pub struct Groups {
    groups: HashMap<String, Vec<Document>>,
    total: usize,
}

impl Groups {
    /// Empty grouping
    pub fn new() -> Self {
        Self::default()
    }

    /// Group an already materialized document sequence
    pub fn collect<I>(documents: I, join: &JoinFunction) -> Self
    where
        I: IntoIterator<Item = Document>,
    {
        let mut groups = Self::new();
        for doc in documents {
            groups.insert(join.key(&doc), doc);
        }
        groups
    }

    /// Append a document to its group
    pub fn insert(&mut self, key: String, doc: Document) {
        self.groups.entry(key).or_default().push(doc);
        self.total += 1;
    }

    /// Number of distinct keys
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Check if no documents were grouped
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Total documents across all groups
    pub fn total_documents(&self) -> usize {
        self.total
    }

    /// Documents of one group
    pub fn get(&self, key: &str) -> Option<&[Document]> {
        self.groups.get(key).map(Vec::as_slice)
    }

    /// Iterate over the distinct keys
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    /// Iterate over groups
    pub fn iter(&self) -> hash_map::Iter<'_, String, Vec<Document>> {
        self.groups.iter()
    }
}

impl IntoIterator for Groups {
    type Item = (String, Vec<Document>);
    type IntoIter = hash_map::IntoIter<String, Vec<Document>>;

    fn into_iter(self) -> Self::IntoIter {
        self.groups.into_iter()
    }
}

// ============================================================================
// Grouper
// ============================================================================

/// Sequentially drains the match set and groups it
pub struct DocumentGrouper {
    engine: Arc<dyn SearchEngine>,
    cursor_config: CursorConfig,
}

impl DocumentGrouper {
    /// Create a grouper over an engine
    pub fn new(engine: Arc<dyn SearchEngine>, cursor_config: CursorConfig) -> Self {
        Self {
            engine,
            cursor_config,
        }
    }

    fn cursor(&self, query: &str, sort: &SortSpec) -> DocumentCursor {
        DocumentCursor::new(
            Arc::clone(&self.engine),
            query,
            sort.clone(),
            self.cursor_config.clone(),
        )
    }

    /// Group the entire match set of `query`
    pub async fn group(
        &self,
        query: &str,
        sort: &SortSpec,
        join: &JoinFunction,
    ) -> Result<Groups, QueryError> {
        let started = Instant::now();
        let mut cursor = self.cursor(query, sort);
        let mut groups = Groups::new();

        while let Some(doc) = cursor.next().await? {
            groups.insert(join.key(&doc), doc);
        }

        info!(
            groups = groups.len(),
            documents = groups.total_documents(),
            pages = cursor.pages_fetched(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Grouped match set"
        );
        Ok(groups)
    }

    /// Count the distinct join keys of the match set
    pub async fn count_keys(
        &self,
        query: &str,
        sort: &SortSpec,
        join: &JoinFunction,
    ) -> Result<usize, QueryError> {
        let mut cursor = self.cursor(query, sort);
        let mut keys = HashSet::new();

        while let Some(doc) = cursor.next().await? {
            keys.insert(join.key(&doc));
        }

        debug!(
            keys = keys.len(),
            documents = cursor.documents_read(),
            "Counted join keys"
        );
        Ok(keys.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::InMemorySearchEngine;
    use crate::types::DocId;

    fn doc(id: u64, metric: &str, host: &str, start: i64) -> Document {
        Document::builder(DocId(id))
            .field("metric", metric)
            .field("host", host)
            .field("start", start)
            .build()
    }

    #[test]
    fn test_field_join_key() {
        let join = JoinFunction::on_fields(["metric", "host"]);
        assert_eq!(join.key(&doc(1, "cpu", "a", 0)), "cpu-a");

        let partial = Document::builder(DocId(2)).field("metric", "cpu").build();
        assert_eq!(join.key(&partial), "cpu-");
    }

    #[test]
    fn test_join_from_filters() {
        let defaults = vec!["metric".to_string()];

        let join = JoinFunction::from_filters(&["join=host,metric".to_string()], &defaults);
        assert_eq!(join.fields(), &["host".to_string(), "metric".to_string()]);

        let join = JoinFunction::from_filters(&["ag=max".to_string()], &defaults);
        assert_eq!(join.fields(), defaults.as_slice());

        let join = JoinFunction::from_filters(&["join= , ".to_string()], &defaults);
        assert_eq!(join.fields(), defaults.as_slice());
    }

    #[test]
    fn test_custom_join() {
        let join = JoinFunction::custom(|d| d.get_text("host").unwrap_or_default().to_uppercase());
        assert_eq!(join.key(&doc(1, "cpu", "a", 0)), "A");
        assert!(join.fields().is_empty());
    }

    #[test]
    fn test_groups_preserve_retrieval_order() {
        let join = JoinFunction::on_fields(["metric"]);
        let groups = Groups::collect(
            vec![
                doc(1, "cpu", "a", 10),
                doc(2, "mem", "a", 5),
                doc(3, "cpu", "b", 20),
            ],
            &join,
        );
        let cpu: Vec<u64> = groups.get("cpu").unwrap().iter().map(|d| d.id.0).collect();
        assert_eq!(cpu, vec![1, 3]);
        assert_eq!(groups.total_documents(), 3);
        assert_eq!(groups.len(), 2);
    }

    #[tokio::test]
    async fn test_group_drains_every_page() {
        let engine = Arc::new(InMemorySearchEngine::with_documents(
            (1..=25).map(|i| doc(i, if i % 3 == 0 { "mem" } else { "cpu" }, "a", i as i64)),
        ));
        let grouper = DocumentGrouper::new(engine, CursorConfig::default().with_page_size(4));

        let groups = grouper
            .group("*:*", &SortSpec::asc("start"), &JoinFunction::on_fields(["metric"]))
            .await
            .unwrap();
        assert_eq!(groups.total_documents(), 25);
        assert_eq!(groups.get("mem").unwrap().len(), 8);
        assert_eq!(groups.get("cpu").unwrap().len(), 17);
    }

    #[tokio::test]
    async fn test_count_keys_matches_group_count() {
        let engine = Arc::new(InMemorySearchEngine::with_documents(vec![
            doc(1, "cpu", "a", 1),
            doc(2, "cpu", "b", 2),
            doc(3, "mem", "a", 3),
        ]));
        let grouper = DocumentGrouper::new(engine, CursorConfig::default());
        let join = JoinFunction::on_fields(["metric", "host"]);
        let sort = SortSpec::asc("start");

        let count = grouper.count_keys("*:*", &sort, &join).await.unwrap();
        let groups = grouper.group("*:*", &sort, &join).await.unwrap();
        assert_eq!(count, 3);
        assert_eq!(count, groups.len());
    }

    #[tokio::test]
    async fn test_retrieval_failure_fails_grouping() {
        let engine = Arc::new(
            InMemorySearchEngine::with_documents((1..=6).map(|i| doc(i, "cpu", "a", i as i64)))
                .fail_on_search(2),
        );
        let grouper = DocumentGrouper::new(engine, CursorConfig::default().with_page_size(2));
        let result = grouper
            .group("*:*", &SortSpec::asc("start"), &JoinFunction::on_fields(["metric"]))
            .await;
        assert!(result.unwrap_err().is_retrieval());
    }
}
