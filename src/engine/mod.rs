//! Search engine collaborators
//!
//! The core never executes queries itself: it pages through ordered results
//! and materializes documents through [`SearchEngine`]. [`InMemorySearchEngine`]
//! is a reference index for tests, development and the command-line harness.

pub mod memory;
pub mod traits;

pub use memory::InMemorySearchEngine;
pub use traits::SearchEngine;
