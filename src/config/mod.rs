// src/config/mod.rs

//! Run controls for wavesched.
//!
//! Responsibilities:
//! - Define the TOML-backed settings model (`model.rs`).
//! - Load the settings file and layer CLI overrides on top (`loader.rs`).
//! - Validate numeric bounds and command templates (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_from_path, resolve};
pub use model::{ExecutorSettings, SchedulerSection, Settings, ValidationMode};
pub use validate::validate_settings;
