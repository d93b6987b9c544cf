//! Rule-based matching and fairness ranking.
//!
//! Every candidate is run through the fixed rule set; survivors form the
//! eligible pool, which the fairness planner re-ranks. The engine never
//! touches storage and never reads the clock.

mod fairness;
mod rules;
mod selection;

pub use fairness::{
    compare_base, fairness_key, jitter_key, FairnessError, FairnessPlanner, FairnessStrategy,
    RotationLedger, DEFAULT_BUCKET_SIZE, DEFAULT_FAIRNESS_KEY,
};
pub use rules::{evaluate, ReasonCode, Rule, RuleId, RuleTrace, TraceEntry, RULES, RULE_COUNT};
pub use selection::{AllocationEngine, SelectionFailure, SelectionResult};
