//! Graph construction.
//!
//! [`GraphBuilder`] is the surface the bytecode-to-IR lowering uses to
//! assemble a [`Graph`], and what the test suites use to build fixtures.
//! It appends nodes to the current block and keeps the per-slot
//! defining-node maps (`variables_at_head` / `variables_at_tail`) in sync
//! as variable traffic is added.

use super::block::{BasicBlock, BlockId};
use super::graph::Graph;
use super::node::{Children, Node, NodeFlags, NodeId, Op};
use crate::speculation::SpecType;
use crate::value::JsValue;

/// Incrementally builds a [`Graph`].
pub struct GraphBuilder {
    graph: Graph,
    current: Option<BlockId>,
}

impl GraphBuilder {
    pub fn new(num_arguments: usize, num_locals: usize) -> Self {
        GraphBuilder {
            graph: Graph::new(num_arguments, num_locals),
            current: None,
        }
    }

    /// The graph under construction, for registering shapes and metadata.
    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    /// Set the profiling prediction for an argument slot.
    pub fn predict_argument(&mut self, index: usize, prediction: SpecType) {
        self.graph.variables.argument_mut(index).prediction = prediction;
    }

    /// Set the profiling prediction for a local slot.
    pub fn predict_local(&mut self, index: usize, prediction: SpecType) {
        self.graph.variables.local_mut(index).prediction = prediction;
    }

    /// Mark a local slot as captured (observable from outside the unit).
    pub fn capture_local(&mut self, index: usize) {
        self.graph.variables.local_mut(index).is_captured = true;
    }

    /// Pin a local slot to unboxed double representation.
    pub fn use_double_format(&mut self, index: usize) {
        self.graph.variables.local_mut(index).uses_double_format = true;
    }

    /// Open a new block and make it current.
    pub fn begin_block(&mut self) -> BlockId {
        let id = self.graph.blocks.alloc(BasicBlock::new(
            self.graph.num_arguments(),
            self.graph.num_locals(),
        ));
        self.current = Some(id);
        id
    }

    /// Switch the append cursor to an already-created block.
    pub fn resume_block(&mut self, block: BlockId) {
        self.current = Some(block);
    }

    /// Append a node to the current block.
    pub fn add(&mut self, op: Op, children: &[NodeId]) -> NodeId {
        let block_id = self.current.expect("no block is under construction");
        let id = self.graph.nodes.alloc(Node::new(op, Children::from_slice(children)));

        let block = self.graph.block_mut(block_id);
        block.nodes.push(id);

        if let Some(operand) = Graph::operand_of(op) {
            *block.variables_at_tail.get_mut(operand) = Some(id);
            if matches!(op, Op::Phi(_) | Op::SetArgument(_))
                && block.variables_at_head.get(operand).is_none()
            {
                *block.variables_at_head.get_mut(operand) = Some(id);
            }
        }
        id
    }

    /// Append a node with an explicit prediction.
    pub fn add_predicted(&mut self, op: Op, children: &[NodeId], prediction: SpecType) -> NodeId {
        let id = self.add(op, children);
        self.graph.node_mut(id).prediction = prediction;
        id
    }

    /// Intern a constant and append a node materializing it. The node's
    /// prediction is the constant's own type.
    pub fn constant(&mut self, value: JsValue) -> NodeId {
        let prediction = value.speculation(&self.graph.shapes);
        let index = self.intern_constant(value);
        self.add_predicted(Op::Constant(index), &[], prediction)
    }

    /// Intern a constant for use by `Op::CheckValue`.
    pub fn intern_constant(&mut self, value: JsValue) -> u32 {
        if let Some(existing) = self.graph.constants.iter().position(|c| *c == value) {
            return existing as u32;
        }
        self.graph.constants.push(value);
        (self.graph.constants.len() - 1) as u32
    }

    /// Intern a shape-set literal for use by `Op::CheckShape`.
    pub fn intern_shape_set(&mut self, set: crate::shape::ShapeSet) -> u32 {
        self.graph.shape_sets.push(set);
        (self.graph.shape_sets.len() - 1) as u32
    }

    /// Append an unconditional jump terminal.
    pub fn jump(&mut self, target: BlockId) -> NodeId {
        self.add(Op::Jump(target), &[])
    }

    /// Append a conditional branch terminal.
    pub fn branch(&mut self, condition: NodeId, taken: BlockId, not_taken: BlockId) -> NodeId {
        self.add(Op::Branch { taken, not_taken }, &[condition])
    }

    /// Append a return terminal.
    pub fn ret(&mut self, value: NodeId) -> NodeId {
        self.add(Op::Return, &[value])
    }

    /// Set profiling flag bits (overflow, negative zero) on a node.
    pub fn set_profile_flags(&mut self, node: NodeId, flags: NodeFlags) {
        self.graph.node_mut(node).flags.insert(flags);
    }

    /// Mark a node dead, as the dead-code-elimination pass would.
    pub fn kill(&mut self, node: NodeId) {
        self.graph.node_mut(node).flags.remove(NodeFlags::LIVE);
    }

    /// Finish construction and hand over the graph.
    pub fn finish(self) -> Graph {
        self.graph
    }
}
