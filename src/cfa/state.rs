//! Engine-owned scratch state.
//!
//! The interpreter keeps two pieces of transient state while it works on a
//! block: the working [`VariableState`] (one abstract value per slot) and
//! the per-node value table. The node table is owned by the engine and its
//! entries for a block are reset by `begin_block`, so the "cache is only
//! valid for the block currently being interpreted" invariant is enforced
//! structurally instead of by convention.

use super::abstract_value::AbstractValue;
use crate::ir::arena::SecondaryMap;
use crate::ir::block::BasicBlock;
use crate::ir::node::{Node, NodeId};
use crate::ir::operand::Operands;

/// Abstract values for every variable slot at one program point.
pub type VariableState = Operands<AbstractValue>;

/// Per-node abstract values for the pass.
///
/// During interpretation of a block, only that block's entries are live.
/// Once the fixpoint is reached, each entry holds the node's final value
/// (the one computed by the last interpretation of its block), which is
/// what the code generator consumes.
#[derive(Debug, Default)]
pub struct NodeValues {
    values: SecondaryMap<Node, AbstractValue>,
}

impl NodeValues {
    /// Table sized for a graph of `num_nodes` nodes.
    pub fn with_len(num_nodes: usize) -> Self {
        NodeValues {
            values: SecondaryMap::with_len(num_nodes),
        }
    }

    /// Reset every entry belonging to `block` to bottom. Must run before
    /// interpreting the block, including re-interpretation in a later
    /// fixpoint iteration.
    pub fn clear_block(&mut self, block: &BasicBlock) {
        for &node in &block.nodes {
            self.values[node].clear();
        }
    }

    #[inline]
    pub fn value(&self, node: NodeId) -> &AbstractValue {
        &self.values[node]
    }

    #[inline]
    pub fn value_mut(&mut self, node: NodeId) -> &mut AbstractValue {
        &mut self.values[node]
    }

    /// Grow the table if the graph gained nodes since construction.
    pub fn resize(&mut self, num_nodes: usize) {
        self.values.resize(num_nodes);
    }
}
