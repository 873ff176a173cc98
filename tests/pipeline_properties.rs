//! Property tests for retrieval, grouping and window filtering
//!
//! Uses proptest to verify the pipeline invariants over random indexes:
//! - The cursor yields the same sequence as one unbounded search, for any page size
//! - Grouping places every matched document in exactly one group
//! - The analysis input is exactly the in-window documents

use proptest::prelude::*;
use std::sync::Arc;

use chronix_query::engine::{InMemorySearchEngine, SearchEngine};
use chronix_query::query::aggregation::filter_window;
use chronix_query::query::{CursorConfig, DocumentCursor, DocumentGrouper, JoinFunction};
use chronix_query::types::{DocId, Document, SortSpec, TimeWindow};

// ============================================================================
// Strategies
// ============================================================================

/// (metric index, timestamp) pairs
fn point_sequence(max_len: usize) -> impl Strategy<Value = Vec<(u8, i64)>> {
    prop::collection::vec((0u8..5, 0i64..1_000), 0..max_len)
}

fn build_documents(points: &[(u8, i64)]) -> Vec<Document> {
    points
        .iter()
        .enumerate()
        .map(|(i, (metric, start))| {
            Document::builder(DocId(i as u64))
                .field("metric", format!("m{}", metric))
                .field("start", *start)
                .build()
        })
        .collect()
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

// ============================================================================
// Cursor
// ============================================================================

proptest! {
    /// Paged retrieval equals a single unbounded search
    #[test]
    fn cursor_preserves_order_for_any_page_size(
        points in point_sequence(60),
        page_size in 1usize..20,
        descending in any::<bool>(),
    ) {
        let docs = build_documents(&points);
        let sort = if descending { SortSpec::desc("start") } else { SortSpec::asc("start") };

        let (paged, expected) = runtime().block_on(async {
            let engine = Arc::new(InMemorySearchEngine::with_documents(docs.clone()));
            let expected: Vec<u64> = engine
                .search("*:*", None, usize::MAX, &sort)
                .await
                .unwrap()
                .into_iter()
                .map(|r| r.doc.0)
                .collect();

            let mut cursor = DocumentCursor::new(
                engine,
                "*:*",
                sort.clone(),
                CursorConfig::default().with_page_size(page_size),
            );
            let mut paged = Vec::new();
            while let Some(doc) = cursor.next().await.unwrap() {
                paged.push(doc.id.0);
            }
            prop_assert!(!cursor.has_next().await.unwrap());
            prop_assert!(!cursor.has_next().await.unwrap());
            Ok((paged, expected))
        })?;

        prop_assert_eq!(paged.len(), docs.len());
        prop_assert_eq!(paged, expected);
    }
}

// ============================================================================
// Grouping
// ============================================================================

proptest! {
    /// Group sizes sum to the matched document count and keys are consistent
    #[test]
    fn grouping_is_complete(
        points in point_sequence(80),
        page_size in 1usize..16,
    ) {
        let docs = build_documents(&points);
        let join = JoinFunction::on_fields(["metric"]);

        let groups = runtime().block_on(async {
            let engine = Arc::new(InMemorySearchEngine::with_documents(docs.clone()));
            let config = CursorConfig::default().with_page_size(page_size);
            let grouper = DocumentGrouper::new(engine, config);
            grouper.group("*:*", &SortSpec::asc("start"), &join).await
        }).unwrap();

        let sizes: usize = groups.iter().map(|(_, members)| members.len()).sum();
        prop_assert_eq!(sizes, docs.len());
        prop_assert_eq!(groups.total_documents(), docs.len());

        for (key, members) in groups.iter() {
            for doc in members {
                prop_assert_eq!(&join.key(doc), key);
            }
        }
    }
}

// ============================================================================
// Window filtering
// ============================================================================

proptest! {
    /// A document is kept iff start <= t <= end
    #[test]
    fn window_filter_is_inclusive(
        points in point_sequence(100),
        start in -10i64..1_010,
        end in -10i64..1_010,
    ) {
        let docs = build_documents(&points);
        let window = TimeWindow::new(start, end);

        let kept: Vec<u64> = filter_window(docs.clone(), "start", window)
            .iter()
            .map(|d| d.id.0)
            .collect();
        let expected: Vec<u64> = points
            .iter()
            .enumerate()
            .filter(|(_, (_, t))| start <= *t && *t <= end)
            .map(|(i, _)| i as u64)
            .collect();

        prop_assert_eq!(kept, expected);
    }
}
