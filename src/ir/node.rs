//! IR operations.
//!
//! The speculative tier works on a block-structured, SSA-like IR: each
//! [`Node`] is one operation with up to three operand references, a
//! profiling-derived type prediction, and the two outputs the abstract
//! interpreter computes for it (its abstract value, kept in an engine-side
//! table, and the `CAN_EXIT` flag below).
//!
//! [`Op`] is a closed tagged union. The abstract interpreter matches on it
//! exhaustively, so adding an opcode without teaching the analysis about it
//! is a compile-time error rather than a silent soundness hole. Payloads
//! that do not fit a `Copy` word (constants, shape sets) live in graph side
//! tables and are referenced by index.

use bitflags::bitflags;

use super::arena::Id;
use super::block::BlockId;
use super::operand::Operand;
use crate::shape::{PropertyId, ShapeId};
use crate::speculation::{ArrayMode, SpecType};

/// Unique identifier of a node.
pub type NodeId = Id<Node>;

/// Index into the graph's constant pool.
pub type ConstantId = u32;

/// Index into the graph's table of shape-set literals.
pub type ShapeSetId = u32;

// =============================================================================
// Opcodes
// =============================================================================

/// One IR operation kind.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Op {
    // --- Constants and plumbing ---------------------------------------------
    /// Materialize a baked-in constant.
    Constant(ConstantId),
    /// Pass the first child through unchanged.
    Identity,
    /// Keeps a value alive for deoptimization; computes nothing.
    Phantom,

    // --- Variable traffic ---------------------------------------------------
    /// Read a variable slot.
    GetLocal(Operand),
    /// Read a variable slot without profiling metadata (OSR plumbing).
    GetLocalUnlinked(Operand),
    /// Write the first child into a variable slot.
    SetLocal(Operand),
    /// Marks an argument slot as populated at entry.
    SetArgument(Operand),
    /// SSA merge point for a slot at a block head.
    Phi(Operand),
    /// Forces a slot to stay live across this point.
    Flush(Operand),
    /// Liveness-only reference to a slot.
    PhantomLocal(Operand),

    // --- Int32 bit operations -----------------------------------------------
    BitAnd,
    BitOr,
    BitXor,
    BitLShift,
    BitRShift,
    BitURShift,

    // --- Numeric conversions ------------------------------------------------
    /// Reinterpret an unsigned 32-bit result as a number.
    UInt32ToNumber,
    /// ToInt32 coercion.
    ValueToInt32,
    /// Exact widening of an int32 to double representation.
    Int32ToDouble,
    /// Narrow a double to int32, exiting unless the round trip is exact.
    DoubleAsInt32,

    // --- Arithmetic ---------------------------------------------------------
    /// The generic `+` operator: numeric addition or string concatenation.
    ValueAdd,
    /// `+` already known to be numeric.
    ArithAdd,
    ArithSub,
    ArithNegate,
    ArithMul,
    ArithDiv,
    ArithMod,
    ArithMin,
    ArithMax,
    ArithAbs,
    ArithSqrt,

    // --- Logic and comparison -----------------------------------------------
    LogicalNot,
    CompareLess,
    CompareLessEq,
    CompareGreater,
    CompareGreaterEq,
    /// Loose equality.
    CompareEq,
    /// Strict equality.
    CompareStrictEq,

    // --- Type introspection -------------------------------------------------
    IsUndefined,
    IsBoolean,
    IsNumber,
    IsString,
    IsObject,
    IsFunction,
    TypeOf,

    // --- Guards -------------------------------------------------------------
    /// Exit unless the first child is a number.
    CheckNumber,
    /// Exit unless the first child's shape is in the referenced set.
    CheckShape(ShapeSetId),
    /// Watchpoint-backed shape pin: valid only when the child's future
    /// shapes are already bounded by this shape.
    ShapeTransitionWatchpoint(ShapeId),
    /// Exit unless the first child's storage matches the mode.
    CheckArray(ArrayMode),
    /// Convert the first child's storage to match the mode, exiting on
    /// failure.
    Arrayify(ArrayMode),
    /// Exit unless the first child is exactly the referenced constant.
    CheckValue(ConstantId),

    // --- Property and element access ---------------------------------------
    /// Named property load.
    GetById(PropertyId),
    /// Named property store.
    PutById(PropertyId),
    /// Named property store that ignores setters on the prototype chain.
    PutByIdDirect(PropertyId),
    /// Install a new shape on the first child (property-add transition).
    PutShape(ShapeId),
    GetArrayLength,
    /// Indexed load, specialized per array mode.
    GetByVal(ArrayMode),
    /// Indexed store: children are base, index, value.
    PutByVal(ArrayMode),
    /// Append: children are base, value.
    ArrayPush(ArrayMode),
    ArrayPop,
    StringCharAt,
    StringCharCodeAt,
    StringConcat,

    // --- Allocation ---------------------------------------------------------
    NewObject(ShapeId),
    NewArray(ShapeId),
    /// Array allocation with a length operand.
    NewArrayWithSize(ShapeId),

    // --- Globals ------------------------------------------------------------
    GetGlobal(u32),
    PutGlobal(u32),

    // --- Calls --------------------------------------------------------------
    /// Call the first child; the payload is the argument count, which the
    /// builder has already flushed to the stack.
    Call(u8),
    Construct(u8),

    // --- Control ------------------------------------------------------------
    Jump(BlockId),
    Branch {
        taken: BlockId,
        not_taken: BlockId,
    },
    /// Return the first child. Nothing in the block executes past this.
    Return,
    /// Throw the first child.
    Throw,
    /// Unconditional deoptimization.
    ForceExit,
}

impl Op {
    /// Whether this opcode terminates its block.
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Op::Jump(_) | Op::Branch { .. } | Op::Return | Op::Throw | Op::ForceExit
        )
    }

    /// The number of operand references this opcode consumes.
    pub const fn arity(self) -> usize {
        match self {
            Op::Constant(_)
            | Op::Phantom
            | Op::GetLocal(_)
            | Op::GetLocalUnlinked(_)
            | Op::SetArgument(_)
            | Op::Phi(_)
            | Op::Flush(_)
            | Op::PhantomLocal(_)
            | Op::NewObject(_)
            | Op::NewArray(_)
            | Op::GetGlobal(_)
            | Op::Jump(_)
            | Op::ForceExit => 0,

            Op::Identity
            | Op::SetLocal(_)
            | Op::UInt32ToNumber
            | Op::ValueToInt32
            | Op::Int32ToDouble
            | Op::DoubleAsInt32
            | Op::ArithNegate
            | Op::ArithAbs
            | Op::ArithSqrt
            | Op::LogicalNot
            | Op::IsUndefined
            | Op::IsBoolean
            | Op::IsNumber
            | Op::IsString
            | Op::IsObject
            | Op::IsFunction
            | Op::TypeOf
            | Op::CheckNumber
            | Op::CheckShape(_)
            | Op::ShapeTransitionWatchpoint(_)
            | Op::CheckArray(_)
            | Op::Arrayify(_)
            | Op::CheckValue(_)
            | Op::GetById(_)
            | Op::PutShape(_)
            | Op::GetArrayLength
            | Op::ArrayPop
            | Op::NewArrayWithSize(_)
            | Op::PutGlobal(_)
            | Op::Call(_)
            | Op::Construct(_)
            | Op::Branch { .. }
            | Op::Return
            | Op::Throw => 1,

            Op::BitAnd
            | Op::BitOr
            | Op::BitXor
            | Op::BitLShift
            | Op::BitRShift
            | Op::BitURShift
            | Op::ValueAdd
            | Op::ArithAdd
            | Op::ArithSub
            | Op::ArithMul
            | Op::ArithDiv
            | Op::ArithMod
            | Op::ArithMin
            | Op::ArithMax
            | Op::CompareLess
            | Op::CompareLessEq
            | Op::CompareGreater
            | Op::CompareGreaterEq
            | Op::CompareEq
            | Op::CompareStrictEq
            | Op::PutById(_)
            | Op::PutByIdDirect(_)
            | Op::GetByVal(_)
            | Op::ArrayPush(_)
            | Op::StringCharAt
            | Op::StringCharCodeAt
            | Op::StringConcat => 2,

            Op::PutByVal(_) => 3,
        }
    }
}

// =============================================================================
// Operand References
// =============================================================================

/// Inline list of up to three operand references.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Children {
    ids: [NodeId; 3],
    len: u8,
}

impl Children {
    pub const fn none() -> Self {
        Children {
            ids: [NodeId::INVALID; 3],
            len: 0,
        }
    }

    pub const fn one(a: NodeId) -> Self {
        Children {
            ids: [a, NodeId::INVALID, NodeId::INVALID],
            len: 1,
        }
    }

    pub const fn two(a: NodeId, b: NodeId) -> Self {
        Children {
            ids: [a, b, NodeId::INVALID],
            len: 2,
        }
    }

    pub const fn three(a: NodeId, b: NodeId, c: NodeId) -> Self {
        Children {
            ids: [a, b, c],
            len: 3,
        }
    }

    /// Build from a slice of at most three IDs.
    pub fn from_slice(ids: &[NodeId]) -> Self {
        match *ids {
            [] => Children::none(),
            [a] => Children::one(a),
            [a, b] => Children::two(a, b),
            [a, b, c] => Children::three(a, b, c),
            _ => panic!("a node has at most three operands"),
        }
    }

    #[inline]
    pub const fn len(&self) -> usize {
        self.len as usize
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<NodeId> {
        if index < self.len as usize {
            Some(self.ids[index])
        } else {
            None
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.ids[..self.len as usize].iter().copied()
    }
}

impl Default for Children {
    fn default() -> Self {
        Children::none()
    }
}

// =============================================================================
// Node Flags
// =============================================================================

bitflags! {
    /// Per-node bits: builder-provided profiling facts and analysis outputs.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
    pub struct NodeFlags: u8 {
        /// The node generates code. Dead-code elimination clears this.
        const LIVE = 1 << 0;
        /// Analysis output: a runtime guard may exit at this node.
        const CAN_EXIT = 1 << 1;
        /// Profiling saw this arithmetic overflow int32 range.
        const MAY_OVERFLOW = 1 << 2;
        /// Profiling saw this arithmetic produce negative zero.
        const MAY_NEGATIVE_ZERO = 1 << 3;
    }
}

// =============================================================================
// Node
// =============================================================================

/// One IR operation. Topology is immutable during analysis; only the flag
/// bits reserved for analysis output are written.
#[derive(Clone, Debug)]
pub struct Node {
    pub op: Op,
    pub children: Children,
    /// Profiling-derived prediction of this node's result type.
    pub prediction: SpecType,
    pub flags: NodeFlags,
}

impl Node {
    pub fn new(op: Op, children: Children) -> Self {
        Node {
            op,
            children,
            prediction: SpecType::TOP,
            flags: NodeFlags::LIVE,
        }
    }

    /// Whether the node still generates code.
    #[inline]
    pub fn is_live(&self) -> bool {
        self.flags.contains(NodeFlags::LIVE)
    }

    /// Analysis output: whether a runtime guard may exit here.
    #[inline]
    pub fn can_exit(&self) -> bool {
        self.flags.contains(NodeFlags::CAN_EXIT)
    }

    #[inline]
    pub fn set_can_exit(&mut self, can_exit: bool) {
        self.flags.set(NodeFlags::CAN_EXIT, can_exit);
    }

    #[inline]
    pub fn child1(&self) -> NodeId {
        debug_assert!(self.children.len() >= 1);
        self.children.get(0).unwrap_or(NodeId::INVALID)
    }

    #[inline]
    pub fn child2(&self) -> NodeId {
        debug_assert!(self.children.len() >= 2);
        self.children.get(1).unwrap_or(NodeId::INVALID)
    }

    #[inline]
    pub fn child3(&self) -> NodeId {
        debug_assert!(self.children.len() >= 3);
        self.children.get(2).unwrap_or(NodeId::INVALID)
    }

    // --- Prediction-driven speculation choices ------------------------------

    /// Whether profiling says this value is reliably an int32.
    #[inline]
    pub fn should_speculate_int32(&self) -> bool {
        self.prediction.proves(SpecType::INT32)
    }

    #[inline]
    pub fn should_speculate_number(&self) -> bool {
        self.prediction.proves(SpecType::NUMBER)
    }

    #[inline]
    pub fn should_speculate_boolean(&self) -> bool {
        self.prediction.proves(SpecType::BOOLEAN)
    }

    #[inline]
    pub fn should_speculate_string(&self) -> bool {
        self.prediction.proves(SpecType::STRING)
    }

    #[inline]
    pub fn should_speculate_cell(&self) -> bool {
        self.prediction.proves(SpecType::CELL)
    }

    #[inline]
    pub fn should_speculate_non_string_cell(&self) -> bool {
        self.prediction.proves(SpecType::NON_STRING_CELL)
    }

    /// Object-or-nullish: the shape branch conditions usually take.
    #[inline]
    pub fn should_speculate_non_string_cell_or_other(&self) -> bool {
        self.prediction
            .proves(SpecType::NON_STRING_CELL | SpecType::OTHER)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn children_inline_list() {
        let a = NodeId::new(0);
        let b = NodeId::new(1);
        let list = Children::two(a, b);
        assert_eq!(list.len(), 2);
        assert_eq!(list.get(0), Some(a));
        assert_eq!(list.get(1), Some(b));
        assert_eq!(list.get(2), None);
        assert_eq!(list.iter().collect::<Vec<_>>(), vec![a, b]);
    }

    #[test]
    fn arity_matches_payload_shape() {
        assert_eq!(Op::Constant(0).arity(), 0);
        assert_eq!(Op::ArithAdd.arity(), 2);
        assert_eq!(Op::PutByVal(ArrayMode::new(crate::speculation::ArrayKind::Int32)).arity(), 3);
        assert_eq!(Op::Return.arity(), 1);
        assert!(Op::Return.is_terminal());
        assert!(Op::Jump(BlockId::new(0)).is_terminal());
        assert!(!Op::ArithAdd.is_terminal());
    }

    #[test]
    fn can_exit_flag_round_trip() {
        let mut node = Node::new(Op::ArithAdd, Children::two(NodeId::new(0), NodeId::new(1)));
        assert!(node.is_live());
        assert!(!node.can_exit());
        node.set_can_exit(true);
        assert!(node.can_exit());
        node.set_can_exit(false);
        assert!(!node.can_exit());
    }

    #[test]
    fn speculation_choices_follow_prediction() {
        let mut node = Node::new(Op::GetLocal(Operand::Local(0)), Children::none());
        node.prediction = SpecType::INT32;
        assert!(node.should_speculate_int32());
        assert!(node.should_speculate_number());

        node.prediction = SpecType::NUMBER;
        assert!(!node.should_speculate_int32());
        assert!(node.should_speculate_number());

        node.prediction = SpecType::FINAL_OBJECT | SpecType::OTHER;
        assert!(node.should_speculate_non_string_cell_or_other());
        assert!(!node.should_speculate_cell());
    }
}
