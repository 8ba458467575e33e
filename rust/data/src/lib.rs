//! Probe Data - work items and dataset loading
//!
//! This crate provides:
//! - `WorkItem` - a (subject, object) fact with name variants and frequencies
//! - `PairKey` - the identity key results are stored under
//! - `load_triples` / `select` - JSON-lines loading and frequency slicing

pub mod dataset;
pub mod item;

pub use dataset::{DataError, load_triples, select};
pub use item::{PairKey, WorkItem};
