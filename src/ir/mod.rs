//! Mid-level IR for the speculative tier.
//!
//! The IR is block-structured and SSA-like: variable traffic goes through
//! explicit `GetLocal`/`SetLocal`/`Phi` nodes, every node carries a
//! profiling prediction, and blocks reference their successors by index so
//! loops need no special representation.

pub mod arena;
pub mod block;
pub mod builder;
pub mod graph;
pub mod node;
pub mod operand;

pub use arena::{Arena, Id, SecondaryMap};
pub use block::{BasicBlock, BlockId, BranchDirection};
pub use builder::GraphBuilder;
pub use graph::{Graph, GraphError, OsrEntry, VariableData};
pub use node::{Children, ConstantId, Node, NodeFlags, NodeId, Op, ShapeSetId};
pub use operand::{Operand, Operands};
