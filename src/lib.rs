//! Speculative-tier front end for the Vesper VM.
//!
//! This crate holds the typed mid-level IR the optimizing tier compiles
//! from ([`ir`]) and the type/value abstract-interpretation engine that
//! runs over it before code generation ([`cfa`]). The analysis computes,
//! for every operation and every live variable at every program point, a
//! conservative description of the values that can flow there; the code
//! generator uses it to pick type-specialized instruction sequences, place
//! deoptimization guards, fold constants, and drop provably-dead branch
//! edges.

pub mod cfa;
pub mod ir;
pub mod shape;
pub mod speculation;
pub mod value;

pub use cfa::{AbstractValue, Cfa, CfaConfig, CfaStats};
pub use ir::{BasicBlock, BlockId, BranchDirection, Graph, GraphBuilder, GraphError, Node, NodeId, Op};
pub use shape::{PropertyId, ShapeId, ShapeInfo, ShapeKind, ShapeRegistry, ShapeSet};
pub use speculation::{ArrayKind, ArrayMode, ArrayModes, SpecType};
pub use value::JsValue;
