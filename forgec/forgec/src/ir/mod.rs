//! Read-only intermediate representations: the normalized model produced by
//! the normalizer and the execution plan produced by the planner.

pub mod model;
pub mod plan;
