//! Query pipeline
//!
//! ```text
//! RequestParams
//!      │
//!      ▼
//! ┌─────────────┐
//! │ Dispatcher  │  date rewrite, Plain | Analysis route
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │ Cursor      │  lazy, paged, continue-after retrieval
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │ Grouping    │  join key -> documents
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │ Aggregation │  window filter, bounded parallel analysis
//! └─────────────┘
//! ```

pub mod aggregation;
pub mod cursor;
pub mod dispatcher;
pub mod grouping;

// Re-export main types
pub use aggregation::{AggregationConfig, AggregationOutcome, GroupFailure, WindowedAggregator};
pub use cursor::{CursorConfig, DocumentCursor};
pub use dispatcher::{AnalysisPlan, PlainPlan, QueryDispatcher, QueryResponse, Route};
pub use grouping::{DocumentGrouper, Groups, JoinFunction};
