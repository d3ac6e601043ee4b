// src/dag/mod.rs

//! DAG traversal and the target-driven executor.

mod executor;
mod traverse;

pub use executor::execute;
pub use traverse::{schedule_pass, targets_terminal};
