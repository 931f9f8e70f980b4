//! Basic blocks.
//!
//! A block owns an ordered list of nodes plus the analysis state attached to
//! its boundaries: the `head`/`tail` abstract-value snapshots, the per-slot
//! defining nodes at each boundary, and the control-flow-analysis
//! bookkeeping flags. Successor edges are stored as block indices inside the
//! terminal opcode, so the (generally cyclic) block graph never holds
//! references.

use super::arena::Id;
use super::node::NodeId;
use super::operand::Operands;
use crate::cfa::AbstractValue;

/// Unique identifier of a basic block.
pub type BlockId = Id<BasicBlock>;

// =============================================================================
// Branch Direction
// =============================================================================

/// What the analysis concluded about a block's conditional terminal.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum BranchDirection {
    /// Not computed, or the terminal is not a branch.
    #[default]
    Invalid,
    /// Only the taken edge is reachable.
    TakeTrue,
    /// Only the not-taken edge is reachable.
    TakeFalse,
    /// Both edges remain possible.
    TakeBoth,
}

// =============================================================================
// Basic Block
// =============================================================================

/// One basic block and its analysis-boundary state.
#[derive(Clone, Debug)]
pub struct BasicBlock {
    /// Operations in execution order; the last one is the terminal.
    pub nodes: Vec<NodeId>,

    /// Abstract values per slot at block entry.
    pub head: Operands<AbstractValue>,
    /// Abstract values per slot at block exit.
    pub tail: Operands<AbstractValue>,

    /// The node defining each slot at entry (`Phi`/`SetArgument`), if any.
    pub variables_at_head: Operands<Option<NodeId>>,
    /// The node touching each slot last in the block, if any.
    pub variables_at_tail: Operands<Option<NodeId>>,

    /// The analysis has interpreted this block at least once.
    pub cfa_has_visited: bool,
    /// The block must be interpreted (again) before the fixpoint holds.
    pub cfa_should_revisit: bool,
    /// The last interpretation discovered at least one constant.
    pub cfa_found_constants: bool,
    /// The last interpretation reached the terminal (the block was not
    /// proven unreachable mid-way).
    pub cfa_did_finish: bool,
    /// Conclusion about the terminal branch, if any.
    pub branch_direction: BranchDirection,

    /// The graph builder proved this block reachable from the entry.
    pub is_reachable: bool,
    /// Optimized code may enter the function here via on-stack replacement.
    pub is_osr_target: bool,
}

impl BasicBlock {
    /// An empty block for a unit with the given slot counts.
    pub fn new(num_arguments: usize, num_locals: usize) -> Self {
        BasicBlock {
            nodes: Vec::new(),
            head: Operands::new(num_arguments, num_locals),
            tail: Operands::new(num_arguments, num_locals),
            variables_at_head: Operands::new(num_arguments, num_locals),
            variables_at_tail: Operands::new(num_arguments, num_locals),
            cfa_has_visited: false,
            cfa_should_revisit: false,
            cfa_found_constants: false,
            cfa_did_finish: false,
            branch_direction: BranchDirection::Invalid,
            is_reachable: true,
            is_osr_target: false,
        }
    }

    /// The block's terminal node, if the block is non-empty.
    #[inline]
    pub fn terminal(&self) -> Option<NodeId> {
        self.nodes.last().copied()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
