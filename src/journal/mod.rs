//! Failure journal
//!
//! Every failed step of every run is appended to `journal.jsonl` so an
//! operator can see after the fact what failed, where, and whether a
//! recovery rolled back.

pub mod entry;
pub mod logger;

pub use entry::{JournalEntry, Operation, RollbackOutcome};
pub use logger::Journal;
