//! scrollbulk-scroll
//!
//! Read path: bounded page fetches, the scroll cursor state machine, and the
//! collector that walks a cursor up to a page cap.

pub mod collector;
pub mod cursor;
pub mod executor;

pub use collector::{collect_all, PaginatedCollector};
pub use cursor::{CursorState, ScrollCursor};
pub use executor::PageExecutor;
