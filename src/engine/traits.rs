//! Core trait definitions for the search engine collaborator

use async_trait::async_trait;

use crate::error::RetrievalError;
use crate::types::{DocId, Document, ScoredRef, SortSpec};

// =============================================================================
// SearchEngine Trait
// =============================================================================

/// Ordered, pageable access to the document index
///
/// Implementations must produce a total order for a given [`SortSpec`]: ties
/// on the sort field are broken by [`DocId`] ascending. Combined with a static
/// snapshot for the lifetime of one query, this guarantees that continue-after
/// paging neither skips nor repeats documents.
#[async_trait]
pub trait SearchEngine: Send + Sync + 'static {
    /// Unique identifier for this engine
    fn engine_id(&self) -> &str;

    /// Return up to `limit` references ordered by `sort`
    ///
    /// With `after = Some(r)` only references strictly after `r` in sort order
    /// are returned. An empty result means the match set is exhausted.
    async fn search(
        &self,
        query: &str,
        after: Option<&ScoredRef>,
        limit: usize,
        sort: &SortSpec,
    ) -> Result<Vec<ScoredRef>, RetrievalError>;

    /// Materialize a document from its identity
    async fn fetch(&self, doc: DocId) -> Result<Document, RetrievalError>;
}
