// src/dag/mod.rs

//! Task graph built from a validated manifest.
//!
//! [`graph`] keeps dependency and dependent adjacency in manifest order,
//! plus the advisory parallel hints, which only the dry-run output and
//! the reporter ever look at.

pub mod graph;

pub use graph::DagGraph;
