// src/ledger/mod.rs

//! State ledger: per-task status, attempt history and quota state.
//!
//! - [`model`] is the persisted document.
//! - [`store`] owns the document, funnels every change through
//!   [`Ledger::record_transition`] and writes it synchronously.
//! - [`events`] is the append-only `events.jsonl` history beside it.

pub mod events;
pub mod model;
pub mod store;

pub use events::{EventKind, EventLog, RunEvent, read_events};
pub use model::{Attempt, AttemptOutcome, LedgerState, StatusReason, TaskRecord, TaskStatus};
pub use store::{AttemptResult, Ledger, Transition, read_snapshot};
