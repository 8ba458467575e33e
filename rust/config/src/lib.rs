//! Configuration types shared between probe crates.

mod probe;
mod types;

pub use probe::*;
pub use types::*;
