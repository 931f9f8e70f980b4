//! The compilation unit graph.
//!
//! A [`Graph`] owns everything one compilation attempt works on: the node
//! and block arenas, the constant pool, per-slot variable metadata, the
//! shape registry, and the OSR entry descriptors. The graph builder
//! produces it; the analysis treats the topology as immutable and writes
//! only the designated analysis-output fields.

use thiserror::Error;

use super::arena::Arena;
use super::block::{BasicBlock, BlockId};
use super::node::{ConstantId, Node, NodeId, Op, ShapeSetId};
use super::operand::{Operand, Operands};
use crate::shape::{ShapeRegistry, ShapeSet};
use crate::speculation::SpecType;
use crate::value::JsValue;

// =============================================================================
// Variable Metadata
// =============================================================================

/// Profiling-derived facts about one variable slot.
#[derive(Clone, Debug)]
pub struct VariableData {
    /// Types the profiler observed flowing through the slot.
    pub prediction: SpecType,
    /// The slot is observable from outside this compilation unit (closed
    /// over, or aliased by an arguments object). Captured slots widen to
    /// top whenever an arbitrary side effect can run.
    pub is_captured: bool,
    /// The slot is pinned to unboxed double representation.
    pub uses_double_format: bool,
}

impl Default for VariableData {
    fn default() -> Self {
        VariableData {
            prediction: SpecType::TOP,
            is_captured: false,
            uses_double_format: false,
        }
    }
}

// =============================================================================
// OSR Entry
// =============================================================================

/// Externally supplied value assumptions for one on-stack-replacement entry
/// point. The analysis must handle these values in addition to whatever
/// flows in through normal edges.
#[derive(Clone, Debug)]
pub struct OsrEntry {
    pub target: BlockId,
    /// Exact values live in each slot when execution enters here. `None`
    /// means the slot is dead at the entry point.
    pub must_handle: Operands<Option<JsValue>>,
}

// =============================================================================
// Graph Errors
// =============================================================================

/// Structural defects detected by [`Graph::validate`]. Any of these means
/// the builder handed over a malformed graph; the analysis refuses to run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("block #{0} is empty")]
    EmptyBlock(u32),
    #[error("block #{0} does not end in a terminal operation")]
    MissingTerminal(u32),
    #[error("block #{block} has terminal operation at interior index {index}")]
    InteriorTerminal { block: u32, index: usize },
    #[error("node #{node} has {actual} operands, opcode requires {expected}")]
    ArityMismatch {
        node: u32,
        expected: usize,
        actual: usize,
    },
    #[error("node #{node} references nonexistent operand node #{child}")]
    ChildOutOfRange { node: u32, child: u32 },
    #[error("node #{node} references nonexistent constant {constant}")]
    ConstantOutOfRange { node: u32, constant: ConstantId },
    #[error("node #{node} references nonexistent shape set {set}")]
    ShapeSetOutOfRange { node: u32, set: ShapeSetId },
    #[error("node #{node} references nonexistent block #{target}")]
    BlockTargetOutOfRange { node: u32, target: u32 },
    #[error("block #{block} lists nonexistent node #{node}")]
    NodeOutOfRange { block: u32, node: u32 },
    #[error("node #{node} appears in more than one block")]
    NodeInMultipleBlocks { node: u32 },
    #[error("node #{node} uses operand #{child} from another block; route the value through a variable")]
    CrossBlockOperand { node: u32, child: u32 },
    #[error("node #{node} addresses an out-of-range variable slot")]
    OperandOutOfRange { node: u32 },
    #[error("OSR entry targets nonexistent block #{0}")]
    OsrTargetOutOfRange(u32),
    #[error("OSR entry may not target the entry block")]
    OsrTargetsEntry,
}

// =============================================================================
// Graph
// =============================================================================

/// One compilation unit: nodes, blocks, and the tables their opcode
/// payloads index into.
#[derive(Debug)]
pub struct Graph {
    pub nodes: Arena<Node>,
    pub blocks: Arena<BasicBlock>,
    /// Constant pool referenced by `Op::Constant` / `Op::CheckValue`.
    pub constants: Vec<JsValue>,
    /// Shape-set literals referenced by `Op::CheckShape`.
    pub shape_sets: Vec<ShapeSet>,
    /// Per-slot variable metadata.
    pub variables: Operands<VariableData>,
    pub shapes: ShapeRegistry,
    pub osr_entries: Vec<OsrEntry>,
}

impl Graph {
    /// An empty graph for a unit with the given slot counts.
    pub fn new(num_arguments: usize, num_locals: usize) -> Self {
        Graph {
            nodes: Arena::new(),
            blocks: Arena::new(),
            constants: Vec::new(),
            shape_sets: Vec::new(),
            variables: Operands::new(num_arguments, num_locals),
            shapes: ShapeRegistry::new(),
            osr_entries: Vec::new(),
        }
    }

    /// The unique entry block. By construction this is block zero.
    #[inline]
    pub fn entry_block(&self) -> BlockId {
        BlockId::new(0)
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    #[inline]
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    #[inline]
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id]
    }

    #[inline]
    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id]
    }

    #[inline]
    pub fn constant(&self, id: ConstantId) -> &JsValue {
        &self.constants[id as usize]
    }

    #[inline]
    pub fn shape_set(&self, id: ShapeSetId) -> &ShapeSet {
        &self.shape_sets[id as usize]
    }

    #[inline]
    pub fn num_arguments(&self) -> usize {
        self.variables.num_arguments()
    }

    #[inline]
    pub fn num_locals(&self) -> usize {
        self.variables.num_locals()
    }

    /// The variable slot an opcode reads or writes, if any.
    pub fn operand_of(op: Op) -> Option<Operand> {
        match op {
            Op::GetLocal(operand)
            | Op::GetLocalUnlinked(operand)
            | Op::SetLocal(operand)
            | Op::SetArgument(operand)
            | Op::Phi(operand)
            | Op::Flush(operand)
            | Op::PhantomLocal(operand) => Some(operand),
            _ => None,
        }
    }

    /// Check the structural invariants the analysis relies on.
    ///
    /// Beyond arity and index-range checks, this enforces that every node
    /// belongs to exactly one block and that operand edges never cross
    /// block boundaries: the per-node value cache is only coherent within
    /// the block being interpreted, so cross-block dataflow must go
    /// through variable traffic.
    pub fn validate(&self) -> Result<(), GraphError> {
        let mut owner: Vec<Option<BlockId>> = vec![None; self.nodes.len()];
        for (block_id, block) in self.blocks.iter() {
            for &node_id in &block.nodes {
                if self.nodes.get(node_id).is_none() {
                    return Err(GraphError::NodeOutOfRange {
                        block: block_id.index(),
                        node: node_id.index(),
                    });
                }
                let slot = &mut owner[node_id.as_usize()];
                if slot.is_some() {
                    return Err(GraphError::NodeInMultipleBlocks {
                        node: node_id.index(),
                    });
                }
                *slot = Some(block_id);
            }
        }

        for (block_id, block) in self.blocks.iter() {
            if block.is_empty() {
                return Err(GraphError::EmptyBlock(block_id.index()));
            }
            let last = block.len() - 1;
            for (index, &node_id) in block.nodes.iter().enumerate() {
                let node = self.node(node_id);
                if node.op.is_terminal() && index != last {
                    return Err(GraphError::InteriorTerminal {
                        block: block_id.index(),
                        index,
                    });
                }
                if index == last && !node.op.is_terminal() {
                    return Err(GraphError::MissingTerminal(block_id.index()));
                }
                self.validate_node(node_id, node)?;
                for child in node.children.iter() {
                    if self.nodes.get(child).is_some()
                        && owner.get(child.as_usize()).copied().flatten() != Some(block_id)
                    {
                        return Err(GraphError::CrossBlockOperand {
                            node: node_id.index(),
                            child: child.index(),
                        });
                    }
                }
            }
        }
        for entry in &self.osr_entries {
            if self.blocks.get(entry.target).is_none() {
                return Err(GraphError::OsrTargetOutOfRange(entry.target.index()));
            }
            if entry.target == self.entry_block() {
                return Err(GraphError::OsrTargetsEntry);
            }
        }
        Ok(())
    }

    fn validate_node(&self, id: NodeId, node: &Node) -> Result<(), GraphError> {
        let expected = node.op.arity();
        if node.children.len() != expected {
            return Err(GraphError::ArityMismatch {
                node: id.index(),
                expected,
                actual: node.children.len(),
            });
        }
        for child in node.children.iter() {
            if self.nodes.get(child).is_none() {
                return Err(GraphError::ChildOutOfRange {
                    node: id.index(),
                    child: child.index(),
                });
            }
        }
        if let Some(operand) = Self::operand_of(node.op) {
            if !self.variables.is_in_bounds(operand) {
                return Err(GraphError::OperandOutOfRange { node: id.index() });
            }
        }
        match node.op {
            Op::Constant(c) | Op::CheckValue(c) => {
                if c as usize >= self.constants.len() {
                    return Err(GraphError::ConstantOutOfRange {
                        node: id.index(),
                        constant: c,
                    });
                }
            }
            Op::CheckShape(set) => {
                if set as usize >= self.shape_sets.len() {
                    return Err(GraphError::ShapeSetOutOfRange {
                        node: id.index(),
                        set,
                    });
                }
            }
            Op::Jump(target) => self.validate_target(id, target)?,
            Op::Branch { taken, not_taken } => {
                self.validate_target(id, taken)?;
                self.validate_target(id, not_taken)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn validate_target(&self, node: NodeId, target: BlockId) -> Result<(), GraphError> {
        if self.blocks.get(target).is_none() {
            return Err(GraphError::BlockTargetOutOfRange {
                node: node.index(),
                target: target.index(),
            });
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::GraphBuilder;

    #[test]
    fn validate_accepts_minimal_graph() {
        let mut b = GraphBuilder::new(0, 0);
        b.begin_block();
        let v = b.constant(JsValue::Undefined);
        b.ret(v);
        let graph = b.finish();
        assert_eq!(graph.validate(), Ok(()));
    }

    #[test]
    fn validate_rejects_missing_terminal() {
        let mut b = GraphBuilder::new(0, 0);
        b.begin_block();
        b.constant(JsValue::Int32(1));
        let graph = b.finish();
        assert_eq!(graph.validate(), Err(GraphError::MissingTerminal(0)));
    }

    #[test]
    fn validate_rejects_bad_branch_target() {
        let mut b = GraphBuilder::new(0, 0);
        b.begin_block();
        let v = b.constant(JsValue::Boolean(true));
        b.add(
            Op::Branch {
                taken: BlockId::new(7),
                not_taken: BlockId::new(8),
            },
            &[v],
        );
        let graph = b.finish();
        assert!(matches!(
            graph.validate(),
            Err(GraphError::BlockTargetOutOfRange { .. })
        ));
    }

    #[test]
    fn validate_rejects_out_of_range_slot() {
        let mut b = GraphBuilder::new(1, 0);
        b.begin_block();
        let v = b.add(Op::GetLocal(Operand::Local(3)), &[]);
        b.ret(v);
        let graph = b.finish();
        assert!(matches!(
            graph.validate(),
            Err(GraphError::OperandOutOfRange { .. })
        ));
    }
}
