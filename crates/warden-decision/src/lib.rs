//! Task recommendation generation, infrastructure-mapping expansion and
//! signed-token RBAC approval evaluation.

#![deny(unsafe_code)]

pub mod decision;
pub mod rbac;

pub use decision::{decide, DecisionCounts, DecisionOutcome};
