// src/manifest/mod.rs

//! Manifest loading and validation.
//!
//! Responsibilities:
//! - Define the JSON-backed manifest model (`model.rs`).
//! - Load a manifest document from disk (`loader.rs`).
//! - Validate referential integrity and acyclicity (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path};
pub use model::{Manifest, RawManifest, RawTask, Task, TaskId};
