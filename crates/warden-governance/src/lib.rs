//! Declarative rule evaluation (`Rules`) and stateless policy filtering
//! (`Governance`).

#![deny(unsafe_code)]

pub mod governance;
pub mod rules;

pub use governance::{post_decision, pre_decision, ForbidDrop, GovernanceCounts};
pub use rules::{Condition, RuleDef, RuleFile, RulesEngine, Then, When};
