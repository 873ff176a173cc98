//! Lazy retrieval cursor
//!
//! Pulls documents from a [`SearchEngine`] one page at a time. Only the
//! current page of [`ScoredRef`]s is held in memory; the last reference of an
//! exhausted page is the continue-after marker for the next one.
//!
//! ```text
//!  page 1            page 2            page 3
//! ┌──┬──┬──┐  after ┌──┬──┬──┐  after ┌──┐       empty page
//! │r1│r2│r3│ ─────▶ │r4│r5│r6│ ─────▶ │r7│ ────▶ (exhausted)
//! └──┴──┴──┘   r3   └──┴──┴──┘   r6   └──┘
//!       ▲ offset
//! ```
//!
//! The cursor is finite and non-restartable. A failed page search or document
//! fetch terminates it with an error that is returned again on every later
//! call, so a failure is never mistaken for exhaustion.

use futures::Stream;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::RetrievalConfig;
use crate::engine::SearchEngine;
use crate::error::{QueryError, RetrievalError};
use crate::types::{Document, ScoredRef, SortSpec};

/// Cursor tuning
#[derive(Debug, Clone)]
pub struct CursorConfig {
    /// References requested per page (at least 1)
    pub page_size: usize,

    /// Bound on each page search and document fetch
    pub fetch_timeout: Duration,
}

impl Default for CursorConfig {
    fn default() -> Self {
        RetrievalConfig::default().into()
    }
}

impl From<RetrievalConfig> for CursorConfig {
    fn from(config: RetrievalConfig) -> Self {
        Self {
            page_size: config.page_size.max(1),
            fetch_timeout: config.fetch_timeout(),
        }
    }
}

impl CursorConfig {
    /// Set page size
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size.max(1);
        self
    }

    /// Set fetch timeout
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
enum CursorState {
    /// No page fetched yet
    Fresh,
    /// A non-empty page has been fetched
    Paging,
    /// An empty page came back; no more fetches
    Exhausted,
    /// Retrieval failed; the error is replayed to every caller
    Failed(RetrievalError),
}

/// Pull-based lazy sequence of documents in sort order
pub struct DocumentCursor {
    engine: Arc<dyn SearchEngine>,
    query: String,
    sort: SortSpec,
    config: CursorConfig,

    /// Current page; `offset == page.len()` means a refill is due
    page: Vec<ScoredRef>,
    offset: usize,
    state: CursorState,

    pages_fetched: usize,
    documents_read: usize,
}

impl DocumentCursor {
    /// Create a cursor; nothing is fetched until the first read
    pub fn new(
        engine: Arc<dyn SearchEngine>,
        query: impl Into<String>,
        sort: SortSpec,
        config: CursorConfig,
    ) -> Self {
        Self {
            engine,
            query: query.into(),
            sort,
            config,
            page: Vec::new(),
            offset: 0,
            state: CursorState::Fresh,
            pages_fetched: 0,
            documents_read: 0,
        }
    }

    /// True iff another document can be read
    ///
    /// Refills the page when the current one is fully read.
    pub async fn has_next(&mut self) -> Result<bool, QueryError> {
        match &self.state {
            CursorState::Exhausted => return Ok(false),
            CursorState::Failed(err) => return Err(err.clone().into()),
            CursorState::Fresh | CursorState::Paging => {}
        }

        if self.offset < self.page.len() {
            return Ok(true);
        }

        self.fetch_page().await?;
        Ok(self.offset < self.page.len())
    }

    /// Next document in sort order, `Ok(None)` once exhausted
    pub async fn next(&mut self) -> Result<Option<Document>, QueryError> {
        if !self.has_next().await? {
            return Ok(None);
        }

        let doc_id = self.page[self.offset].doc;
        let doc = match timeout(self.config.fetch_timeout, self.engine.fetch(doc_id)).await {
            Ok(Ok(doc)) => doc,
            Ok(Err(e)) => return Err(self.fail(e)),
            Err(_) => return Err(self.fail(RetrievalError::Timeout(self.config.fetch_timeout))),
        };

        self.offset += 1;
        self.documents_read += 1;
        Ok(Some(doc))
    }

    /// Adapt the cursor into a stream that ends after the first error
    pub fn into_stream(self) -> impl Stream<Item = Result<Document, QueryError>> + Send {
        futures::stream::unfold(Some(self), |cursor| async move {
            let mut cursor = cursor?;
            match cursor.next().await {
                Ok(Some(doc)) => Some((Ok(doc), Some(cursor))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }

    /// Pages fetched from the engine so far (including the final empty page)
    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    /// Documents handed out so far
    pub fn documents_read(&self) -> usize {
        self.documents_read
    }

    /// Whether the sequence ended normally
    pub fn is_exhausted(&self) -> bool {
        self.state == CursorState::Exhausted
    }

    async fn fetch_page(&mut self) -> Result<(), QueryError> {
        let after = self.page.last().cloned();
        let result = timeout(
            self.config.fetch_timeout,
            self.engine
                .search(&self.query, after.as_ref(), self.config.page_size, &self.sort),
        )
        .await;

        let refs = match result {
            Ok(Ok(refs)) => refs,
            Ok(Err(e)) => return Err(self.fail(e)),
            Err(_) => return Err(self.fail(RetrievalError::Timeout(self.config.fetch_timeout))),
        };

        self.pages_fetched += 1;
        debug!(
            engine = self.engine.engine_id(),
            page = self.pages_fetched,
            hits = refs.len(),
            "Fetched result page"
        );

        self.state = if refs.is_empty() {
            CursorState::Exhausted
        } else {
            CursorState::Paging
        };
        self.page = refs;
        self.offset = 0;
        Ok(())
    }

    fn fail(&mut self, err: RetrievalError) -> QueryError {
        warn!(
            engine = self.engine.engine_id(),
            query = %self.query,
            pages = self.pages_fetched,
            documents = self.documents_read,
            error = %err,
            "Document retrieval failed"
        );
        self.state = CursorState::Failed(err.clone());
        err.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::InMemorySearchEngine;
    use crate::types::DocId;
    use futures::StreamExt;

    fn engine_with(n: u64) -> Arc<InMemorySearchEngine> {
        Arc::new(InMemorySearchEngine::with_documents((1..=n).map(|i| {
            Document::builder(DocId(i))
                .field("metric", "cpu")
                .field("start", (i * 10) as i64)
                .build()
        })))
    }

    fn cursor(engine: Arc<InMemorySearchEngine>, page_size: usize) -> DocumentCursor {
        DocumentCursor::new(
            engine,
            "*:*",
            SortSpec::asc("start"),
            CursorConfig::default().with_page_size(page_size),
        )
    }

    #[tokio::test]
    async fn test_reads_all_documents_in_order() {
        let engine = engine_with(7);
        let mut cursor = cursor(engine, 3);

        let mut ids = Vec::new();
        while let Some(doc) = cursor.next().await.unwrap() {
            ids.push(doc.id.0);
        }
        assert_eq!(ids, (1..=7).collect::<Vec<_>>());
        // 3 + 3 + 1 + final empty page
        assert_eq!(cursor.pages_fetched(), 4);
        assert!(cursor.is_exhausted());
    }

    #[tokio::test]
    async fn test_nothing_fetched_before_first_read() {
        let engine = engine_with(5);
        let cursor = cursor(Arc::clone(&engine), 2);
        assert_eq!(cursor.pages_fetched(), 0);
        assert_eq!(engine.search_count(), 0);
    }

    #[tokio::test]
    async fn test_fetches_only_pages_consumed() {
        let engine = engine_with(100);
        let mut cursor = cursor(Arc::clone(&engine), 10);

        for _ in 0..15 {
            cursor.next().await.unwrap().unwrap();
        }
        assert_eq!(engine.search_count(), 2);
        assert_eq!(engine.fetch_count(), 15);
    }

    #[tokio::test]
    async fn test_exhaustion_is_idempotent() {
        let engine = engine_with(2);
        let mut cursor = cursor(Arc::clone(&engine), 5);

        assert!(cursor.next().await.unwrap().is_some());
        assert!(cursor.next().await.unwrap().is_some());
        assert!(!cursor.has_next().await.unwrap());
        let searches = engine.search_count();

        for _ in 0..3 {
            assert!(!cursor.has_next().await.unwrap());
            assert!(cursor.next().await.unwrap().is_none());
        }
        assert_eq!(engine.search_count(), searches);
    }

    #[tokio::test]
    async fn test_empty_match_set() {
        let engine = Arc::new(InMemorySearchEngine::new());
        let mut cursor = cursor(engine, 4);
        assert!(!cursor.has_next().await.unwrap());
        assert!(cursor.is_exhausted());
    }

    #[tokio::test]
    async fn test_failure_is_not_exhaustion() {
        let engine = Arc::new(
            InMemorySearchEngine::with_documents((1..=4).map(|i| {
                Document::builder(DocId(i)).field("start", i as i64).build()
            }))
            .fail_on_search(2),
        );
        let mut cursor = cursor(engine, 2);

        assert!(cursor.next().await.unwrap().is_some());
        assert!(cursor.next().await.unwrap().is_some());

        let err = cursor.next().await.unwrap_err();
        assert!(err.is_retrieval());
        // The failure is replayed, never turned into end-of-sequence
        assert!(cursor.has_next().await.is_err());
        assert!(cursor.next().await.is_err());
        assert!(!cursor.is_exhausted());
    }

    #[tokio::test]
    async fn test_fetch_failure_terminates_sequence() {
        let engine = Arc::new(
            InMemorySearchEngine::with_documents((1..=4).map(|i| {
                Document::builder(DocId(i)).field("start", i as i64).build()
            }))
            .fail_on_fetch(3),
        );
        let mut cursor = cursor(engine, 10);

        assert!(cursor.next().await.unwrap().is_some());
        assert!(cursor.next().await.unwrap().is_some());
        assert!(cursor.next().await.is_err());
        assert_eq!(cursor.documents_read(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_page_fetch_timeout() {
        let engine = Arc::new(
            InMemorySearchEngine::with_documents(vec![Document::builder(DocId(1)).build()])
                .with_search_latency(Duration::from_secs(60)),
        );
        let mut cursor = DocumentCursor::new(
            engine,
            "*:*",
            SortSpec::asc("start"),
            CursorConfig::default().with_fetch_timeout(Duration::from_millis(100)),
        );

        match cursor.next().await {
            Err(QueryError::Retrieval(RetrievalError::Timeout(d))) => {
                assert_eq!(d, Duration::from_millis(100))
            }
            other => panic!("expected timeout, got {:?}", other.map(|d| d.map(|d| d.id))),
        }
    }

    #[tokio::test]
    async fn test_stream_adapter_stops_after_error() {
        let engine = Arc::new(
            InMemorySearchEngine::with_documents((1..=3).map(|i| {
                Document::builder(DocId(i)).field("start", i as i64).build()
            }))
            .fail_on_search(2),
        );
        let items: Vec<_> = cursor(engine, 1).into_stream().collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(items[1].is_err());
    }
}
