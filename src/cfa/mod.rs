//! Type/value abstract interpretation (control flow analysis).
//!
//! This is the analysis the speculative tier runs before code generation.
//! For every node and every live variable at every block boundary it
//! computes a sound over-approximation of the values that can flow there,
//! an [`AbstractValue`], and derives the three things the rest of the
//! tier consumes:
//!
//! - which nodes need a runtime guard (`Node::can_exit`),
//! - which nodes fold to compile-time constants
//!   (`AbstractValue::value` + the `found_constants` signal),
//! - which branches are provably one-directional
//!   (`BasicBlock::branch_direction`).
//!
//! The engine is a classic forward dataflow fixpoint: [`Cfa`] seeds the
//! entry block, then re-interprets blocks ([`AbstractInterpreter`]) and
//! merges their exit states into successor heads until nothing changes.
//! Soundness rests on the merge being monotone and on filters never being
//! applied to bottom values; both are asserted in debug builds.

pub mod abstract_value;
pub mod interpreter;
pub mod propagator;
pub mod state;

pub use abstract_value::AbstractValue;
pub use interpreter::{AbstractInterpreter, MergeMode};
pub use propagator::{merge_to_successors, Cfa, CfaConfig, CfaStats};
pub use state::{NodeValues, VariableState};
