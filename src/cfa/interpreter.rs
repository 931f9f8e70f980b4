//! The block interpreter.
//!
//! [`AbstractInterpreter`] executes one basic block abstractly: it loads the
//! block's head snapshot into a working variable state, visits each node in
//! order computing its abstract value and whether it needs a runtime guard,
//! and reconciles the result into the block's tail snapshot.
//!
//! Per node, the transfer function tries, in priority order:
//!
//! 1. bail out if an operand is proven unreachable (bottom);
//! 2. constant folding, when every needed operand is an exact constant;
//! 3. the most specific type specialization consistent with the operands'
//!    predictions, narrowing operands via filters and requesting a guard
//!    exactly when the precondition is not already proven;
//! 4. a world clobber when the opcode can run arbitrary user code;
//! 5. branch-direction recording for conditional terminals;
//! 6. block invalidation for unconditional exits.
//!
//! Cross-block dataflow must go through variable traffic
//! (`SetLocal`/`Phi`/`GetLocal`): the per-node value table is only
//! reconciled across blocks at variable granularity.

use tracing::trace;

use super::abstract_value::AbstractValue;
use super::propagator;
use super::state::{NodeValues, VariableState};
use crate::ir::block::{BlockId, BranchDirection};
use crate::ir::graph::Graph;
use crate::ir::node::{NodeFlags, NodeId, Op};
use crate::ir::operand::Operand;
use crate::shape::{ShapeBound, ShapeKind, ShapeSet};
use crate::speculation::{ArrayKind, ArrayMode, SpecType};
use crate::value::{js_max, js_min, to_int32, JsValue};

// =============================================================================
// Merge Mode
// =============================================================================

/// What [`AbstractInterpreter::end_block`] does after reconciling the tail.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MergeMode {
    /// Update the tail snapshot and report whether it changed.
    MergeToTail,
    /// Also merge the tail into the head of every live successor and report
    /// whether any successor changed.
    MergeToSuccessors,
}

/// Outcome of coercing an abstract value to boolean.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum BooleanResult {
    DefinitelyTrue,
    DefinitelyFalse,
    Unknown,
}

// =============================================================================
// Abstract Interpreter
// =============================================================================

/// Per-compilation abstract interpretation engine.
///
/// Owns all transient scratch state; one instance must not be shared
/// between concurrently running analyses.
pub struct AbstractInterpreter {
    node_values: NodeValues,
    variables: VariableState,
    current_block: Option<BlockId>,
    have_structures: bool,
    is_valid: bool,
    found_constants: bool,
    branch_direction: BranchDirection,
}

impl AbstractInterpreter {
    pub fn new(graph: &Graph) -> Self {
        AbstractInterpreter {
            node_values: NodeValues::with_len(graph.nodes.len()),
            variables: VariableState::new(graph.num_arguments(), graph.num_locals()),
            current_block: None,
            have_structures: false,
            is_valid: false,
            found_constants: false,
            branch_direction: BranchDirection::Invalid,
        }
    }

    /// The abstract value computed for a node. After the fixpoint this is
    /// the final value the code generator consumes.
    #[inline]
    pub fn value_of(&self, node: NodeId) -> &AbstractValue {
        self.node_values.value(node)
    }

    /// The working state of a variable slot, valid only between
    /// `begin_block` and `end_block`.
    #[inline]
    pub fn variable(&self, operand: Operand) -> &AbstractValue {
        self.variables.get(operand)
    }

    /// Whether the current interpretation discovered a constant.
    #[inline]
    pub fn found_constants(&self) -> bool {
        self.found_constants
    }

    /// Whether interpretation is still on a reachable path.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    // -------------------------------------------------------------------------
    // Block driver
    // -------------------------------------------------------------------------

    /// Attach to a block: reset its node-value cache, load its head
    /// snapshot, and rescan for shape knowledge.
    pub fn begin_block(&mut self, graph: &mut Graph, block_id: BlockId) {
        debug_assert!(
            self.current_block.is_none(),
            "engine is already attached to a block"
        );
        self.node_values.resize(graph.nodes.len());
        self.node_values.clear_block(graph.block(block_id));
        self.variables = graph.block(block_id).head.clone();
        self.have_structures = self
            .variables
            .iter()
            .any(|(_, value)| value.has_shape_knowledge());

        let block = graph.block_mut(block_id);
        block.cfa_should_revisit = false;
        block.cfa_has_visited = true;

        self.current_block = Some(block_id);
        self.is_valid = true;
        self.found_constants = false;
        self.branch_direction = BranchDirection::Invalid;
        trace!(block = block_id.index(), "begin block");
    }

    /// Interpret every node of the attached block in order, stopping early
    /// if the block is proven unreachable mid-way.
    pub fn run_block(&mut self, graph: &mut Graph) -> bool {
        let Some(block_id) = self.current_block else {
            debug_assert!(false, "run_block without begin_block");
            return false;
        };
        for index in 0..graph.block(block_id).len() {
            if !self.execute(graph, index) {
                break;
            }
        }
        self.is_valid
    }

    /// Reconcile the working state into the block's tail snapshot and
    /// detach. See [`MergeMode`] for the return value.
    pub fn end_block(&mut self, graph: &mut Graph, mode: MergeMode) -> bool {
        let Some(block_id) = self.current_block else {
            debug_assert!(false, "end_block without begin_block");
            return false;
        };

        {
            let block = graph.block_mut(block_id);
            block.cfa_found_constants = self.found_constants;
            block.cfa_did_finish = self.is_valid;
            block.branch_direction = self.branch_direction;
        }

        if !self.is_valid {
            trace!(block = block_id.index(), "end block (invalid)");
            self.reset();
            return false;
        }

        let mut changed = false;
        let operands: Vec<Operand> = graph.variables.operands().collect();
        for operand in operands {
            changed |= self.merge_state_at_tail(graph, block_id, operand);
        }
        trace!(block = block_id.index(), changed, "end block");

        self.reset();

        match mode {
            MergeMode::MergeToTail => changed,
            MergeMode::MergeToSuccessors => propagator::merge_to_successors(graph, block_id, true),
        }
    }

    fn reset(&mut self) {
        self.current_block = None;
        self.is_valid = false;
        self.branch_direction = BranchDirection::Invalid;
    }

    /// Compute the value of one variable slot as it exists at block exit.
    ///
    /// This is a three-way reconciliation, not a plain copy: a captured
    /// slot always publishes the working-state value; a dead `GetLocal` at
    /// tail defers to its head phi (the value flows through untouched); and
    /// a `SetLocal` on a double-pinned slot re-derives the double type
    /// instead of copying its child.
    fn merge_state_at_tail(&mut self, graph: &mut Graph, block_id: BlockId, operand: Operand) -> bool {
        let Some(def) = *graph.block(block_id).variables_at_tail.get(operand) else {
            return false;
        };
        let is_captured = graph.variables.get(operand).is_captured;
        let double_format = graph.variables.get(operand).uses_double_format;

        let source = if is_captured {
            // Whatever was stored last is what the outside world observes,
            // even if the node at tail is dead.
            self.variables.get(operand).clone()
        } else if !graph.node(def).is_live() {
            // A dead GetLocal at tail shadows the phi that may still be
            // live; the value then flows head-to-tail untouched.
            if !matches!(graph.node(def).op, Op::GetLocal(_)) {
                return false;
            }
            let Some(phi) = *graph.block(block_id).variables_at_head.get(operand) else {
                return false;
            };
            if !graph.node(phi).is_live() {
                return false;
            }
            self.variables.get(operand).clone()
        } else {
            match graph.node(def).op {
                Op::Phi(_) | Op::SetArgument(_) | Op::Flush(_) | Op::PhantomLocal(_) => {
                    self.variables.get(operand).clone()
                }
                Op::GetLocal(_) | Op::GetLocalUnlinked(_) => self.node_values.value(def).clone(),
                Op::SetLocal(_) => {
                    if double_format {
                        let mut value = AbstractValue::default();
                        value.set_type(SpecType::DOUBLE);
                        value
                    } else {
                        self.node_values.value(graph.node(def).child1()).clone()
                    }
                }
                _ => {
                    debug_assert!(false, "non-variable node recorded at tail");
                    return false;
                }
            }
        };

        let destination = graph.block_mut(block_id).tail.get_mut(operand);
        if *destination == source {
            false
        } else {
            *destination = source;
            true
        }
    }

    // -------------------------------------------------------------------------
    // Shared transfer-function helpers
    // -------------------------------------------------------------------------

    /// Narrow a node's value to `mask`, invalidating the block if the
    /// operand is already bottom or becomes bottom.
    fn filter(&mut self, node: NodeId, mask: SpecType) {
        let value = self.node_values.value_mut(node);
        if value.is_clear() {
            // The operand is proven unreachable under current predictions;
            // nothing past this point executes.
            self.is_valid = false;
            return;
        }
        if !value.filter_type(mask) {
            self.is_valid = false;
        }
    }

    /// Narrow a node's value to a shape set, invalidating on contradiction.
    fn filter_shapes(&mut self, graph: &Graph, node: NodeId, set: &ShapeSet) {
        let value = self.node_values.value_mut(node);
        if value.is_clear() {
            self.is_valid = false;
            return;
        }
        if !value.filter_shapes(set, &graph.shapes) {
            self.is_valid = false;
        }
    }

    fn speculate_int32_unary(&mut self, graph: &mut Graph, node_id: NodeId, force_exit: bool) {
        let child = graph.node(node_id).child1();
        let proven = self.node_values.value(child).spec.proves(SpecType::INT32);
        graph.node_mut(node_id).set_can_exit(force_exit || !proven);
        self.filter(child, SpecType::INT32);
    }

    fn speculate_int32_binary(&mut self, graph: &mut Graph, node_id: NodeId, force_exit: bool) {
        let (c1, c2) = (graph.node(node_id).child1(), graph.node(node_id).child2());
        let proven = self.node_values.value(c1).spec.proves(SpecType::INT32)
            && self.node_values.value(c2).spec.proves(SpecType::INT32);
        graph.node_mut(node_id).set_can_exit(force_exit || !proven);
        self.filter(c1, SpecType::INT32);
        self.filter(c2, SpecType::INT32);
    }

    fn speculate_number_unary(&mut self, graph: &mut Graph, node_id: NodeId) {
        let child = graph.node(node_id).child1();
        let proven = self.node_values.value(child).spec.proves(SpecType::NUMBER);
        graph.node_mut(node_id).set_can_exit(!proven);
        self.filter(child, SpecType::NUMBER);
    }

    fn speculate_number_binary(&mut self, graph: &mut Graph, node_id: NodeId) {
        let (c1, c2) = (graph.node(node_id).child1(), graph.node(node_id).child2());
        let proven = self.node_values.value(c1).spec.proves(SpecType::NUMBER)
            && self.node_values.value(c2).spec.proves(SpecType::NUMBER);
        graph.node_mut(node_id).set_can_exit(!proven);
        self.filter(c1, SpecType::NUMBER);
        self.filter(c2, SpecType::NUMBER);
    }

    fn speculate_boolean_unary(&mut self, graph: &mut Graph, node_id: NodeId) {
        let child = graph.node(node_id).child1();
        let proven = self.node_values.value(child).spec.proves(SpecType::BOOLEAN);
        graph.node_mut(node_id).set_can_exit(!proven);
        self.filter(child, SpecType::BOOLEAN);
    }

    /// Record a folded constant: the output becomes exactly `value`, no
    /// guard is needed, and the driver learns that another fixpoint pass
    /// may reveal more constants downstream.
    fn fold_constant(&mut self, graph: &mut Graph, node_id: NodeId, value: JsValue) {
        self.node_values
            .value_mut(node_id)
            .set_constant(&value, &graph.shapes);
        self.note_shapes(node_id);
        self.found_constants = true;
        graph.node_mut(node_id).set_can_exit(false);
    }

    fn note_shapes(&mut self, node: NodeId) {
        if self.node_values.value(node).has_shape_knowledge() {
            self.have_structures = true;
        }
    }

    /// Both operands as exact numbers, if both are known.
    fn constant_numbers(&self, c1: NodeId, c2: NodeId) -> Option<(f64, f64)> {
        let a = self.node_values.value(c1).value.as_ref()?.as_number()?;
        let b = self.node_values.value(c2).value.as_ref()?.as_number()?;
        Some((a, b))
    }

    /// Both operands as exact int32s, if both already have int32
    /// representation.
    fn constant_int32s(&self, c1: NodeId, c2: NodeId) -> Option<(i32, i32)> {
        let a = self.node_values.value(c1).value.as_ref()?.as_int32()?;
        let b = self.node_values.value(c2).value.as_ref()?.as_int32()?;
        Some((a, b))
    }

    /// Whether an abstract value is provably truthy or falsy: either it is
    /// an exact constant, or it is an object whose every possible shape is
    /// non-masquerading and not a string.
    fn boolean_result(&self, graph: &Graph, value: &AbstractValue) -> BooleanResult {
        if let Some(constant) = &value.value {
            return if constant.to_boolean() {
                BooleanResult::DefinitelyTrue
            } else {
                BooleanResult::DefinitelyFalse
            };
        }
        if value.spec.proves(SpecType::CELL) {
            if let ShapeBound::Known(set) = &value.current_shape {
                let all_truthy = set.iter().all(|id| {
                    let info = graph.shapes.get(id);
                    !info.masquerades_as_undefined && info.kind != ShapeKind::String
                });
                if !set.is_empty() && all_truthy {
                    return BooleanResult::DefinitelyTrue;
                }
            }
        }
        BooleanResult::Unknown
    }

    /// Whether a prior check already proved everything this array mode
    /// would check.
    fn array_mode_already_checked(&self, value: &AbstractValue, mode: ArrayMode) -> bool {
        !value.array_modes.is_empty()
            && mode.modes_that_pass().contains(value.array_modes)
            && value.spec.proves(mode.speculation_filter())
    }

    // -------------------------------------------------------------------------
    // World clobbering
    // -------------------------------------------------------------------------

    /// An operation with arbitrary side effects ran: captured variables can
    /// hold anything, and all previously proven shapes are suspect.
    fn clobber_world(&mut self, graph: &Graph, index_in_block: usize) {
        self.clobber_captured(graph);
        self.clobber_structures(graph, index_in_block);
    }

    fn clobber_captured(&mut self, graph: &Graph) {
        let operands: Vec<Operand> = graph.variables.operands().collect();
        for operand in operands {
            if graph.variables.get(operand).is_captured {
                self.variables.get_mut(operand).make_top();
            }
        }
    }

    /// Widen shape and storage-mode knowledge on every value cached so far
    /// in this block and on every variable slot. Primitive type knowledge
    /// survives; so does the watchpoint-backed future-shape bound.
    fn clobber_structures(&mut self, graph: &Graph, index_in_block: usize) {
        if !self.have_structures {
            return;
        }
        let Some(block_id) = self.current_block else {
            return;
        };
        for i in 0..=index_in_block {
            let node = graph.block(block_id).nodes[i];
            self.node_values.value_mut(node).clobber_structures();
        }
        self.variables
            .for_each_mut(|_, value| value.clobber_structures());
        self.have_structures = false;
    }

    // -------------------------------------------------------------------------
    // Per-node transfer functions
    // -------------------------------------------------------------------------

    /// Interpret the node at `index_in_block`. Returns whether the block is
    /// still valid; once invalid, remaining nodes keep their cleared cached
    /// values and must not be consumed.
    pub fn execute(&mut self, graph: &mut Graph, index_in_block: usize) -> bool {
        let Some(block_id) = self.current_block else {
            debug_assert!(false, "execute without begin_block");
            return false;
        };
        debug_assert!(self.is_valid);

        let node_id = graph.block(block_id).nodes[index_in_block];
        if !graph.node(node_id).is_live() {
            return true;
        }
        let op = graph.node(node_id).op;

        match op {
            // --- Constants and plumbing -------------------------------------
            Op::Constant(constant) => {
                let value = graph.constant(constant).clone();
                self.node_values
                    .value_mut(node_id)
                    .set_constant(&value, &graph.shapes);
                self.note_shapes(node_id);
                graph.node_mut(node_id).set_can_exit(false);
            }

            Op::Identity => {
                let value = self.node_values.value(graph.node(node_id).child1()).clone();
                *self.node_values.value_mut(node_id) = value;
                graph.node_mut(node_id).set_can_exit(false);
            }

            Op::Phantom | Op::Phi(_) | Op::Flush(_) | Op::PhantomLocal(_) => {
                graph.node_mut(node_id).set_can_exit(false);
            }

            // --- Variable traffic -------------------------------------------
            Op::GetLocal(operand) => {
                let meta_prediction = graph.variables.get(operand).prediction;
                if meta_prediction.is_empty() {
                    // The profiler never saw a value here; this read cannot
                    // be compiled.
                    self.is_valid = false;
                    graph.node_mut(node_id).set_can_exit(true);
                    return false;
                }
                let is_captured = graph.variables.get(operand).is_captured;
                let value = self.variables.get(operand).clone();
                let can_exit = !is_captured && value.is_clear();
                if value.value.is_some() {
                    self.found_constants = true;
                }
                *self.node_values.value_mut(node_id) = value;
                self.note_shapes(node_id);
                graph.node_mut(node_id).set_can_exit(can_exit);
            }

            Op::GetLocalUnlinked(operand) => {
                let value = self.variables.get(operand).clone();
                if value.value.is_some() {
                    self.found_constants = true;
                }
                *self.node_values.value_mut(node_id) = value;
                self.note_shapes(node_id);
                graph.node_mut(node_id).set_can_exit(false);
            }

            Op::SetLocal(operand) => {
                let child = graph.node(node_id).child1();
                let is_captured = graph.variables.get(operand).is_captured;
                let double_format = graph.variables.get(operand).uses_double_format;

                if is_captured {
                    *self.variables.get_mut(operand) = self.node_values.value(child).clone();
                    graph.node_mut(node_id).set_can_exit(false);
                    return self.is_valid;
                }
                if double_format {
                    self.speculate_number_unary(graph, node_id);
                    self.variables.get_mut(operand).set_type(SpecType::DOUBLE);
                    return self.is_valid;
                }

                let predicted = graph.variables.get(operand).prediction;
                if predicted.proves(SpecType::INT32) {
                    self.speculate_int32_unary(graph, node_id, false);
                } else if predicted.proves(SpecType::CELL) {
                    let proven = self.node_values.value(child).spec.proves(SpecType::CELL);
                    graph.node_mut(node_id).set_can_exit(!proven);
                    self.filter(child, SpecType::CELL);
                } else if predicted.proves(SpecType::BOOLEAN) {
                    self.speculate_boolean_unary(graph, node_id);
                } else {
                    graph.node_mut(node_id).set_can_exit(false);
                }
                *self.variables.get_mut(operand) = self.node_values.value(child).clone();
            }

            Op::SetArgument(operand) => {
                debug_assert!(
                    !graph.block(block_id).head.get(operand).is_clear(),
                    "argument state must be seeded before interpretation"
                );
                graph.node_mut(node_id).set_can_exit(false);
            }

            // --- Int32 bit operations ---------------------------------------
            Op::BitAnd | Op::BitOr | Op::BitXor | Op::BitLShift | Op::BitRShift
            | Op::BitURShift => {
                let (c1, c2) = (graph.node(node_id).child1(), graph.node(node_id).child2());
                if let Some((a, b)) = self.constant_int32s(c1, c2) {
                    let folded = match op {
                        Op::BitAnd => JsValue::Int32(a & b),
                        Op::BitOr => JsValue::Int32(a | b),
                        Op::BitXor => JsValue::Int32(a ^ b),
                        // Shift counts are masked to five bits.
                        Op::BitLShift => JsValue::Int32(a.wrapping_shl(b as u32)),
                        Op::BitRShift => JsValue::Int32(a.wrapping_shr(b as u32)),
                        Op::BitURShift => {
                            JsValue::number(((a as u32) >> ((b as u32) & 31)) as f64)
                        }
                        _ => unreachable!(),
                    };
                    self.fold_constant(graph, node_id, folded);
                    return self.is_valid;
                }
                self.speculate_int32_binary(graph, node_id, false);
                self.node_values.value_mut(node_id).set_type(SpecType::INT32);
            }

            // --- Numeric conversions ----------------------------------------
            Op::UInt32ToNumber => {
                let child = graph.node(node_id).child1();
                if let Some(v) = self
                    .node_values
                    .value(child)
                    .value
                    .as_ref()
                    .and_then(|c| c.as_int32())
                {
                    self.fold_constant(graph, node_id, JsValue::number(v as u32 as f64));
                    return self.is_valid;
                }
                if graph.node(node_id).should_speculate_int32() {
                    self.node_values.value_mut(node_id).set_type(SpecType::INT32);
                    graph.node_mut(node_id).set_can_exit(true);
                } else {
                    self.node_values
                        .value_mut(node_id)
                        .set_type(SpecType::DOUBLE);
                    graph.node_mut(node_id).set_can_exit(false);
                }
            }

            Op::ValueToInt32 => {
                let child = graph.node(node_id).child1();
                if let Some(constant) = self.node_values.value(child).value.clone() {
                    if let Some(n) = constant.as_number() {
                        let folded = match constant {
                            JsValue::Int32(v) => JsValue::Int32(v),
                            _ => JsValue::Int32(to_int32(n)),
                        };
                        self.fold_constant(graph, node_id, folded);
                        return self.is_valid;
                    }
                }
                let child_node = graph.node(child);
                if child_node.should_speculate_int32() {
                    self.speculate_int32_unary(graph, node_id, false);
                } else if child_node.should_speculate_number() {
                    self.speculate_number_unary(graph, node_id);
                } else if child_node.should_speculate_boolean() {
                    self.speculate_boolean_unary(graph, node_id);
                } else {
                    graph.node_mut(node_id).set_can_exit(false);
                }
                self.node_values.value_mut(node_id).set_type(SpecType::INT32);
            }

            Op::Int32ToDouble => {
                let child = graph.node(node_id).child1();
                if let Some(n) = self
                    .node_values
                    .value(child)
                    .value
                    .as_ref()
                    .and_then(|v| v.as_number())
                {
                    self.fold_constant(graph, node_id, JsValue::double(n));
                    return self.is_valid;
                }
                self.speculate_number_unary(graph, node_id);
                let child_is_int32 = self.node_values.value(child).spec.proves(SpecType::INT32);
                self.node_values.value_mut(node_id).set_type(if child_is_int32 {
                    SpecType::DOUBLE_REAL
                } else {
                    SpecType::DOUBLE
                });
            }

            Op::DoubleAsInt32 => {
                let child = graph.node(node_id).child1();
                if let Some(n) = self
                    .node_values
                    .value(child)
                    .value
                    .as_ref()
                    .and_then(|v| v.as_number())
                {
                    let as_int = to_int32(n);
                    if ((as_int as f64).to_bits()) == n.to_bits() {
                        self.fold_constant(graph, node_id, JsValue::Int32(as_int));
                        return self.is_valid;
                    }
                }
                graph.node_mut(node_id).set_can_exit(true);
                self.filter(child, SpecType::NUMBER);
                self.node_values.value_mut(node_id).set_type(SpecType::INT32);
            }

            // --- Arithmetic -------------------------------------------------
            Op::ValueAdd | Op::ArithAdd => {
                let (c1, c2) = (graph.node(node_id).child1(), graph.node(node_id).child2());
                if let Some((a, b)) = self.constant_numbers(c1, c2) {
                    self.fold_constant(graph, node_id, JsValue::number(a + b));
                    return self.is_valid;
                }
                if graph.node(c1).should_speculate_int32() && graph.node(c2).should_speculate_int32()
                {
                    let force = graph.node(node_id).flags.contains(NodeFlags::MAY_OVERFLOW);
                    self.speculate_int32_binary(graph, node_id, force);
                    self.node_values.value_mut(node_id).set_type(SpecType::INT32);
                    return self.is_valid;
                }
                if graph.node(c1).should_speculate_number()
                    && graph.node(c2).should_speculate_number()
                {
                    self.speculate_number_binary(graph, node_id);
                    let real = self.node_values.value(c1).spec.proves(SpecType::REAL_NUMBER)
                        && self.node_values.value(c2).spec.proves(SpecType::REAL_NUMBER);
                    self.node_values.value_mut(node_id).set_type(if real {
                        SpecType::DOUBLE_REAL
                    } else {
                        SpecType::DOUBLE
                    });
                    return self.is_valid;
                }
                if op == Op::ValueAdd {
                    // String concatenation or worse: implicit coercion can
                    // run arbitrary code.
                    self.clobber_world(graph, index_in_block);
                    self.node_values
                        .value_mut(node_id)
                        .set_type(SpecType::STRING | SpecType::NUMBER);
                    graph.node_mut(node_id).set_can_exit(false);
                    return self.is_valid;
                }
                // Typed add over something that is not a number; the
                // speculation is hopeless.
                self.is_valid = false;
                graph.node_mut(node_id).set_can_exit(true);
                return false;
            }

            Op::ArithSub => {
                let (c1, c2) = (graph.node(node_id).child1(), graph.node(node_id).child2());
                if let Some((a, b)) = self.constant_numbers(c1, c2) {
                    self.fold_constant(graph, node_id, JsValue::number(a - b));
                    return self.is_valid;
                }
                if graph.node(c1).should_speculate_int32() && graph.node(c2).should_speculate_int32()
                {
                    let force = graph.node(node_id).flags.contains(NodeFlags::MAY_OVERFLOW);
                    self.speculate_int32_binary(graph, node_id, force);
                    self.node_values.value_mut(node_id).set_type(SpecType::INT32);
                    return self.is_valid;
                }
                self.speculate_number_binary(graph, node_id);
                self.node_values
                    .value_mut(node_id)
                    .set_type(SpecType::DOUBLE);
            }

            Op::ArithNegate => {
                let child = graph.node(node_id).child1();
                if let Some(n) = self
                    .node_values
                    .value(child)
                    .value
                    .as_ref()
                    .and_then(|v| v.as_number())
                {
                    self.fold_constant(graph, node_id, JsValue::number(-n));
                    return self.is_valid;
                }
                if graph.node(child).should_speculate_int32() {
                    let force = graph
                        .node(node_id)
                        .flags
                        .intersects(NodeFlags::MAY_OVERFLOW | NodeFlags::MAY_NEGATIVE_ZERO);
                    self.speculate_int32_unary(graph, node_id, force);
                    self.node_values.value_mut(node_id).set_type(SpecType::INT32);
                    return self.is_valid;
                }
                self.speculate_number_unary(graph, node_id);
                self.node_values
                    .value_mut(node_id)
                    .set_type(SpecType::DOUBLE);
            }

            Op::ArithMul => {
                let (c1, c2) = (graph.node(node_id).child1(), graph.node(node_id).child2());
                if let Some((a, b)) = self.constant_numbers(c1, c2) {
                    self.fold_constant(graph, node_id, JsValue::number(a * b));
                    return self.is_valid;
                }
                if graph.node(c1).should_speculate_int32() && graph.node(c2).should_speculate_int32()
                {
                    let force = graph
                        .node(node_id)
                        .flags
                        .intersects(NodeFlags::MAY_OVERFLOW | NodeFlags::MAY_NEGATIVE_ZERO);
                    self.speculate_int32_binary(graph, node_id, force);
                    self.node_values.value_mut(node_id).set_type(SpecType::INT32);
                    return self.is_valid;
                }
                self.speculate_number_binary(graph, node_id);
                let real = self.node_values.value(c1).spec.proves(SpecType::REAL_NUMBER)
                    || self.node_values.value(c2).spec.proves(SpecType::REAL_NUMBER);
                self.node_values.value_mut(node_id).set_type(if real {
                    SpecType::DOUBLE_REAL
                } else {
                    SpecType::DOUBLE
                });
            }

            Op::ArithDiv | Op::ArithMod | Op::ArithMin | Op::ArithMax => {
                let (c1, c2) = (graph.node(node_id).child1(), graph.node(node_id).child2());
                if let Some((a, b)) = self.constant_numbers(c1, c2) {
                    let folded = match op {
                        Op::ArithDiv => a / b,
                        Op::ArithMod => a % b,
                        Op::ArithMin => js_min(a, b),
                        Op::ArithMax => js_max(a, b),
                        _ => unreachable!(),
                    };
                    self.fold_constant(graph, node_id, JsValue::number(folded));
                    return self.is_valid;
                }
                if graph.node(c1).should_speculate_int32()
                    && graph.node(c2).should_speculate_int32()
                    && graph.node(node_id).should_speculate_int32()
                {
                    // Division and friends can leave the int32 range even on
                    // int32 inputs, so the guard stays.
                    self.speculate_int32_binary(graph, node_id, true);
                    self.node_values.value_mut(node_id).set_type(SpecType::INT32);
                    return self.is_valid;
                }
                self.speculate_number_binary(graph, node_id);
                self.node_values
                    .value_mut(node_id)
                    .set_type(SpecType::DOUBLE);
            }

            Op::ArithAbs => {
                let child = graph.node(node_id).child1();
                if let Some(n) = self
                    .node_values
                    .value(child)
                    .value
                    .as_ref()
                    .and_then(|v| v.as_number())
                {
                    self.fold_constant(graph, node_id, JsValue::number(n.abs()));
                    return self.is_valid;
                }
                if graph.node(child).should_speculate_int32()
                    && graph.node(node_id).should_speculate_int32()
                {
                    self.speculate_int32_unary(graph, node_id, true);
                    self.node_values.value_mut(node_id).set_type(SpecType::INT32);
                    return self.is_valid;
                }
                self.speculate_number_unary(graph, node_id);
                self.node_values
                    .value_mut(node_id)
                    .set_type(SpecType::DOUBLE);
            }

            Op::ArithSqrt => {
                let child = graph.node(node_id).child1();
                if let Some(n) = self
                    .node_values
                    .value(child)
                    .value
                    .as_ref()
                    .and_then(|v| v.as_number())
                {
                    self.fold_constant(graph, node_id, JsValue::number(n.sqrt()));
                    return self.is_valid;
                }
                self.speculate_number_unary(graph, node_id);
                self.node_values
                    .value_mut(node_id)
                    .set_type(SpecType::DOUBLE);
            }

            // --- Logic and comparison ---------------------------------------
            Op::LogicalNot => {
                let child = graph.node(node_id).child1();
                let child_value = self.node_values.value(child).clone();
                match self.boolean_result(graph, &child_value) {
                    BooleanResult::DefinitelyTrue => {
                        self.fold_constant(graph, node_id, JsValue::Boolean(false));
                        return self.is_valid;
                    }
                    BooleanResult::DefinitelyFalse => {
                        self.fold_constant(graph, node_id, JsValue::Boolean(true));
                        return self.is_valid;
                    }
                    BooleanResult::Unknown => {}
                }
                let child_node = graph.node(child);
                if child_node.should_speculate_boolean() {
                    self.speculate_boolean_unary(graph, node_id);
                } else if child_node.should_speculate_non_string_cell_or_other() {
                    graph.node_mut(node_id).set_can_exit(true);
                    self.filter(child, SpecType::NON_STRING_CELL | SpecType::OTHER);
                } else if child_node.should_speculate_int32() {
                    self.speculate_int32_unary(graph, node_id, false);
                } else if child_node.should_speculate_number() {
                    self.speculate_number_unary(graph, node_id);
                } else {
                    graph.node_mut(node_id).set_can_exit(false);
                }
                self.node_values
                    .value_mut(node_id)
                    .set_type(SpecType::BOOLEAN);
            }

            Op::CompareLess
            | Op::CompareLessEq
            | Op::CompareGreater
            | Op::CompareGreaterEq
            | Op::CompareEq => {
                let (c1, c2) = (graph.node(node_id).child1(), graph.node(node_id).child2());
                if let Some((a, b)) = self.constant_numbers(c1, c2) {
                    let result = match op {
                        Op::CompareLess => a < b,
                        Op::CompareLessEq => a <= b,
                        Op::CompareGreater => a > b,
                        Op::CompareGreaterEq => a >= b,
                        Op::CompareEq => a == b,
                        _ => unreachable!(),
                    };
                    self.fold_constant(graph, node_id, JsValue::Boolean(result));
                    return self.is_valid;
                }

                if op == Op::CompareEq {
                    // An int32 never compares loosely equal to null or
                    // undefined.
                    let left = self.node_values.value(c1).spec;
                    let right = self.node_values.value(c2).spec;
                    if (left.proves(SpecType::INT32) && right.proves(SpecType::OTHER))
                        || (left.proves(SpecType::OTHER) && right.proves(SpecType::INT32))
                    {
                        self.fold_constant(graph, node_id, JsValue::Boolean(false));
                        return self.is_valid;
                    }
                }

                self.node_values
                    .value_mut(node_id)
                    .set_type(SpecType::BOOLEAN);

                let left_int32 = graph.node(c1).should_speculate_int32();
                let right_int32 = graph.node(c2).should_speculate_int32();
                let left_number = graph.node(c1).should_speculate_number();
                let right_number = graph.node(c2).should_speculate_number();

                let mask = if left_int32 && right_int32 {
                    SpecType::INT32
                } else if left_number && right_number {
                    SpecType::NUMBER
                } else if op == Op::CompareEq {
                    if graph.node(c1).should_speculate_string()
                        || graph.node(c2).should_speculate_string()
                    {
                        graph.node_mut(node_id).set_can_exit(false);
                        return self.is_valid;
                    }
                    let left_cell = graph.node(c1).should_speculate_non_string_cell();
                    let right_cell = graph.node(c2).should_speculate_non_string_cell();
                    let left_cellish = graph.node(c1).should_speculate_non_string_cell_or_other();
                    let right_cellish = graph.node(c2).should_speculate_non_string_cell_or_other();
                    if left_cell && right_cellish {
                        graph.node_mut(node_id).set_can_exit(true);
                        self.filter(c1, SpecType::NON_STRING_CELL);
                        self.filter(c2, SpecType::NON_STRING_CELL | SpecType::OTHER);
                        return self.is_valid;
                    }
                    if left_cellish && right_cell {
                        graph.node_mut(node_id).set_can_exit(true);
                        self.filter(c1, SpecType::NON_STRING_CELL | SpecType::OTHER);
                        self.filter(c2, SpecType::NON_STRING_CELL);
                        return self.is_valid;
                    }
                    if left_cell && right_cell {
                        graph.node_mut(node_id).set_can_exit(true);
                        self.filter(c1, SpecType::NON_STRING_CELL);
                        self.filter(c2, SpecType::NON_STRING_CELL);
                        return self.is_valid;
                    }
                    self.clobber_world(graph, index_in_block);
                    SpecType::TOP
                } else {
                    self.clobber_world(graph, index_in_block);
                    SpecType::TOP
                };

                let can_exit = !self.node_values.value(c1).spec.proves(mask)
                    || !self.node_values.value(c2).spec.proves(mask);
                graph.node_mut(node_id).set_can_exit(can_exit);
                self.filter(c1, mask);
                self.filter(c2, mask);
            }

            Op::CompareStrictEq => {
                let (c1, c2) = (graph.node(node_id).child1(), graph.node(node_id).child2());
                if let Some((a, b)) = self.constant_numbers(c1, c2) {
                    self.fold_constant(graph, node_id, JsValue::Boolean(a == b));
                    return self.is_valid;
                }
                self.node_values
                    .value_mut(node_id)
                    .set_type(SpecType::BOOLEAN);

                // Strict equality against a known non-number, non-string
                // constant is a cheap identity test.
                for child in [c1, c2] {
                    if let Some(constant) = &self.node_values.value(child).value {
                        if !constant.is_number() && !matches!(constant, JsValue::String(_)) {
                            graph.node_mut(node_id).set_can_exit(false);
                            return self.is_valid;
                        }
                    }
                }

                if graph.node(c1).should_speculate_int32() && graph.node(c2).should_speculate_int32()
                {
                    self.speculate_int32_binary(graph, node_id, false);
                    return self.is_valid;
                }
                if graph.node(c1).should_speculate_number()
                    && graph.node(c2).should_speculate_number()
                {
                    self.speculate_number_binary(graph, node_id);
                    return self.is_valid;
                }
                if graph.node(c1).should_speculate_string()
                    || graph.node(c2).should_speculate_string()
                {
                    graph.node_mut(node_id).set_can_exit(false);
                    return self.is_valid;
                }
                if graph.node(c1).should_speculate_non_string_cell()
                    && graph.node(c2).should_speculate_non_string_cell()
                {
                    graph.node_mut(node_id).set_can_exit(true);
                    self.filter(c1, SpecType::NON_STRING_CELL | SpecType::OTHER);
                    self.filter(c2, SpecType::NON_STRING_CELL | SpecType::OTHER);
                    return self.is_valid;
                }
                graph.node_mut(node_id).set_can_exit(false);
            }

            // --- Type introspection -----------------------------------------
            Op::IsUndefined
            | Op::IsBoolean
            | Op::IsNumber
            | Op::IsString
            | Op::IsObject
            | Op::IsFunction => {
                let child = graph.node(node_id).child1();
                graph.node_mut(node_id).set_can_exit(false);
                if let Some(constant) = self.node_values.value(child).value.clone() {
                    let folded = match op {
                        Op::IsUndefined => Some(match &constant {
                            JsValue::Undefined => true,
                            JsValue::Cell(cell) => {
                                graph.shapes.get(cell.shape).masquerades_as_undefined
                            }
                            _ => false,
                        }),
                        Op::IsBoolean => Some(matches!(constant, JsValue::Boolean(_))),
                        Op::IsNumber => Some(constant.is_number()),
                        Op::IsString => Some(match &constant {
                            JsValue::String(_) => true,
                            JsValue::Cell(cell) => {
                                graph.shapes.get(cell.shape).kind == ShapeKind::String
                            }
                            _ => false,
                        }),
                        Op::IsObject => match &constant {
                            JsValue::Null => Some(true),
                            JsValue::Cell(_) | JsValue::String(_) => None,
                            _ => Some(false),
                        },
                        Op::IsFunction => match &constant {
                            JsValue::Cell(_) | JsValue::String(_) => None,
                            _ => Some(false),
                        },
                        _ => unreachable!(),
                    };
                    if let Some(result) = folded {
                        self.fold_constant(graph, node_id, JsValue::Boolean(result));
                        return self.is_valid;
                    }
                }
                self.node_values
                    .value_mut(node_id)
                    .set_type(SpecType::BOOLEAN);
            }

            Op::TypeOf => {
                let child = graph.node(node_id).child1();
                let child_value = self.node_values.value(child).clone();
                if let Some(constant) = &child_value.value {
                    let name = match constant {
                        JsValue::Undefined => "undefined",
                        JsValue::Null => "object",
                        JsValue::Boolean(_) => "boolean",
                        JsValue::Int32(_) | JsValue::Double(_) => "number",
                        JsValue::String(_) => "string",
                        JsValue::Cell(cell) => {
                            if graph.shapes.get(cell.shape).kind == ShapeKind::Function {
                                "function"
                            } else {
                                "object"
                            }
                        }
                    };
                    self.fold_constant(graph, node_id, JsValue::string(name));
                    return self.is_valid;
                }
                let spec = child_value.spec;
                if spec.proves(SpecType::NUMBER) {
                    self.filter(child, SpecType::NUMBER);
                    self.fold_constant(graph, node_id, JsValue::string("number"));
                } else if spec.proves(SpecType::STRING) {
                    self.filter(child, SpecType::STRING);
                    self.fold_constant(graph, node_id, JsValue::string("string"));
                } else if spec.proves(SpecType::FINAL_OBJECT | SpecType::ARRAY | SpecType::TYPED_ARRAY)
                {
                    self.filter(
                        child,
                        SpecType::FINAL_OBJECT | SpecType::ARRAY | SpecType::TYPED_ARRAY,
                    );
                    self.fold_constant(graph, node_id, JsValue::string("object"));
                } else if spec.proves(SpecType::FUNCTION) {
                    self.filter(child, SpecType::FUNCTION);
                    self.fold_constant(graph, node_id, JsValue::string("function"));
                } else if spec.proves(SpecType::BOOLEAN) {
                    self.filter(child, SpecType::BOOLEAN);
                    self.fold_constant(graph, node_id, JsValue::string("boolean"));
                } else {
                    let child_node = graph.node(child);
                    if child_node.should_speculate_cell() {
                        let string_only = child_node.should_speculate_string();
                        graph.node_mut(node_id).set_can_exit(true);
                        self.filter(
                            child,
                            if string_only {
                                SpecType::STRING
                            } else {
                                SpecType::CELL
                            },
                        );
                    }
                    self.node_values
                        .value_mut(node_id)
                        .set_type(SpecType::STRING);
                }
            }

            // --- Guards -----------------------------------------------------
            Op::CheckNumber => {
                let child = graph.node(node_id).child1();
                let proven = self.node_values.value(child).spec.proves(SpecType::NUMBER);
                graph.node_mut(node_id).set_can_exit(!proven);
                self.filter(child, SpecType::NUMBER);
            }

            Op::CheckShape(set_id) => {
                let child = graph.node(node_id).child1();
                let set = graph.shape_set(set_id).clone();
                let value = self.node_values.value(child);
                if value.is_clear() {
                    self.is_valid = false;
                    graph.node_mut(node_id).set_can_exit(true);
                    return false;
                }
                let proven_now = value.current_shape.is_subset_of(&set);
                let proven_future = value.future_shape.is_subset_of(&set);
                if proven_now || proven_future {
                    // The constant-folding pass can replace this check with
                    // a watchpoint.
                    self.found_constants = true;
                }
                let can_exit = !proven_now || !value.spec.proves(SpecType::CELL);
                graph.node_mut(node_id).set_can_exit(can_exit);
                self.filter_shapes(graph, child, &set);
                self.have_structures = true;
            }

            Op::ShapeTransitionWatchpoint(shape) => {
                let child = graph.node(node_id).child1();
                let set = ShapeSet::singleton(shape);
                let value = self.node_values.value(child);
                // Value can be clear here if an earlier speculation was
                // statically refuted.
                debug_assert!(
                    value.is_clear() || value.future_shape.is_subset_of(&set),
                    "watchpoint issued without a future-shape bound"
                );
                if value.is_clear() {
                    self.is_valid = false;
                    graph.node_mut(node_id).set_can_exit(true);
                    return false;
                }
                graph.node_mut(node_id).set_can_exit(true);
                self.filter_shapes(graph, child, &set);
                if self.is_valid {
                    self.node_values.value_mut(child).future_shape = ShapeBound::exactly(shape);
                }
                self.have_structures = true;
            }

            Op::CheckArray(mode) => {
                let child = graph.node(node_id).child1();
                let value = self.node_values.value(child).clone();
                if value.is_clear() {
                    self.is_valid = false;
                    graph.node_mut(node_id).set_can_exit(true);
                    return false;
                }
                if self.array_mode_already_checked(&value, mode) {
                    self.found_constants = true;
                    graph.node_mut(node_id).set_can_exit(false);
                    return self.is_valid;
                }
                graph.node_mut(node_id).set_can_exit(true);
                self.filter(child, mode.speculation_filter());
                if !self.is_valid {
                    return false;
                }
                if !self
                    .node_values
                    .value_mut(child)
                    .filter_array_modes(mode.modes_that_pass())
                {
                    self.is_valid = false;
                    return false;
                }
                self.have_structures = true;
            }

            Op::Arrayify(mode) => {
                let child = graph.node(node_id).child1();
                let value = self.node_values.value(child).clone();
                if value.is_clear() {
                    self.is_valid = false;
                    graph.node_mut(node_id).set_can_exit(true);
                    return false;
                }
                if self.array_mode_already_checked(&value, mode) {
                    self.found_constants = true;
                    graph.node_mut(node_id).set_can_exit(false);
                    return self.is_valid;
                }
                graph.node_mut(node_id).set_can_exit(true);
                self.filter(child, SpecType::CELL);
                if !self.is_valid {
                    return false;
                }
                // Converting the storage invalidates every proven shape.
                self.clobber_structures(graph, index_in_block);
                if !self
                    .node_values
                    .value_mut(child)
                    .filter_array_modes(mode.modes_that_pass())
                {
                    self.is_valid = false;
                    return false;
                }
                self.have_structures = true;
            }

            Op::CheckValue(constant) => {
                let child = graph.node(node_id).child1();
                let expected = graph.constant(constant).clone();
                if self.node_values.value(child).value.as_ref() == Some(&expected) {
                    self.found_constants = true;
                    graph.node_mut(node_id).set_can_exit(false);
                    return self.is_valid;
                }
                graph.node_mut(node_id).set_can_exit(true);
                let value = self.node_values.value_mut(child);
                if value.is_clear() {
                    self.is_valid = false;
                    return false;
                }
                if !value.filter_by_value(&expected, &graph.shapes) {
                    // Current knowledge excludes the constant: the check
                    // would always fail at runtime.
                    self.is_valid = false;
                    return false;
                }
                self.note_shapes(child);
            }

            // --- Property and element access --------------------------------
            Op::GetById(property) => {
                graph.node_mut(node_id).set_can_exit(true);
                if graph.node(node_id).prediction.is_empty() {
                    self.is_valid = false;
                    return false;
                }
                let child = graph.node(node_id).child1();
                if graph.node(child).should_speculate_cell() {
                    self.filter(child, SpecType::CELL);
                    if !self.is_valid {
                        return false;
                    }
                    if let Some(shape) = self.node_values.value(child).best_proven_shape() {
                        if graph.shapes.slot_of(shape, property).is_some() {
                            // Simple inline-slot load: pin the shape, no
                            // side effects.
                            let set = ShapeSet::singleton(shape);
                            self.node_values.value_mut(node_id).make_top();
                            self.filter_shapes(graph, child, &set);
                            self.have_structures = true;
                            self.found_constants = true;
                            return self.is_valid;
                        }
                    }
                }
                self.clobber_world(graph, index_in_block);
                self.node_values.value_mut(node_id).make_top();
            }

            Op::PutById(property) | Op::PutByIdDirect(property) => {
                graph.node_mut(node_id).set_can_exit(true);
                let child = graph.node(node_id).child1();
                if let Some(shape) = self.node_values.value(child).best_proven_shape() {
                    if graph.shapes.slot_of(shape, property).is_some() {
                        // Simple replace of an existing slot.
                        let set = ShapeSet::singleton(shape);
                        self.filter_shapes(graph, child, &set);
                        self.have_structures = true;
                        self.found_constants = true;
                        return self.is_valid;
                    }
                    if let Some(next) = graph.shapes.transition_for(shape, property) {
                        // Simple add-property transition.
                        self.clobber_structures(graph, index_in_block);
                        self.node_values
                            .value_mut(child)
                            .set_shape(next, &graph.shapes);
                        self.have_structures = true;
                        self.found_constants = true;
                        return self.is_valid;
                    }
                }
                self.filter(child, SpecType::CELL);
                self.clobber_world(graph, index_in_block);
            }

            Op::PutShape(shape) => {
                let child = graph.node(node_id).child1();
                graph.node_mut(node_id).set_can_exit(false);
                if !self.node_values.value(child).current_shape.is_clear() {
                    self.clobber_structures(graph, index_in_block);
                    self.node_values
                        .value_mut(child)
                        .set_shape(shape, &graph.shapes);
                    self.have_structures = true;
                }
            }

            Op::GetArrayLength => {
                graph.node_mut(node_id).set_can_exit(true);
                self.node_values.value_mut(node_id).set_type(SpecType::INT32);
            }

            Op::GetByVal(mode) => {
                let (_, c2) = (graph.node(node_id).child1(), graph.node(node_id).child2());
                graph.node_mut(node_id).set_can_exit(true);
                match mode.kind {
                    ArrayKind::ForceExit => {
                        self.is_valid = false;
                        return false;
                    }
                    ArrayKind::Generic => {
                        self.clobber_world(graph, index_in_block);
                        self.node_values.value_mut(node_id).make_top();
                    }
                    ArrayKind::String => {
                        self.filter(c2, SpecType::INT32);
                        self.node_values
                            .value_mut(node_id)
                            .set_type(SpecType::STRING);
                    }
                    ArrayKind::Int32 => {
                        self.filter(c2, SpecType::INT32);
                        if mode.out_of_bounds {
                            self.clobber_world(graph, index_in_block);
                            self.node_values.value_mut(node_id).make_top();
                        } else {
                            self.node_values.value_mut(node_id).set_type(SpecType::INT32);
                        }
                    }
                    ArrayKind::Double => {
                        self.filter(c2, SpecType::INT32);
                        if mode.out_of_bounds {
                            self.clobber_world(graph, index_in_block);
                            self.node_values.value_mut(node_id).make_top();
                        } else {
                            // Holes read as NaN-boxed undefined on the slow
                            // path, but in-bounds packed doubles are real.
                            self.node_values
                                .value_mut(node_id)
                                .set_type(SpecType::DOUBLE_REAL);
                        }
                    }
                    ArrayKind::Contiguous
                    | ArrayKind::ArrayStorage
                    | ArrayKind::SlowPutArrayStorage => {
                        self.filter(c2, SpecType::INT32);
                        if mode.out_of_bounds {
                            self.clobber_world(graph, index_in_block);
                        }
                        self.node_values.value_mut(node_id).make_top();
                    }
                    ArrayKind::Int8Array
                    | ArrayKind::Int16Array
                    | ArrayKind::Int32Array
                    | ArrayKind::Uint8Array
                    | ArrayKind::Uint16Array => {
                        self.filter(c2, SpecType::INT32);
                        self.node_values.value_mut(node_id).set_type(SpecType::INT32);
                    }
                    ArrayKind::Uint32Array => {
                        self.filter(c2, SpecType::INT32);
                        let spec = if graph.node(node_id).should_speculate_int32() {
                            SpecType::INT32
                        } else {
                            SpecType::DOUBLE
                        };
                        self.node_values.value_mut(node_id).set_type(spec);
                    }
                    ArrayKind::Float32Array | ArrayKind::Float64Array => {
                        self.filter(c2, SpecType::INT32);
                        self.node_values
                            .value_mut(node_id)
                            .set_type(SpecType::DOUBLE);
                    }
                }
            }

            Op::PutByVal(mode) => {
                let node = graph.node(node_id);
                let (c1, c2, c3) = (node.child1(), node.child2(), node.child3());
                graph.node_mut(node_id).set_can_exit(true);
                match mode.kind {
                    ArrayKind::ForceExit => {
                        self.is_valid = false;
                        return false;
                    }
                    ArrayKind::Generic => {
                        self.clobber_world(graph, index_in_block);
                    }
                    ArrayKind::String => {
                        // Strings are immutable; the builder never emits
                        // this combination.
                        debug_assert!(false, "indexed store into a string");
                        self.clobber_world(graph, index_in_block);
                    }
                    ArrayKind::Int32 => {
                        self.filter(c1, SpecType::CELL);
                        self.filter(c2, SpecType::INT32);
                        self.filter(c3, SpecType::INT32);
                        if mode.out_of_bounds {
                            self.clobber_world(graph, index_in_block);
                        }
                    }
                    ArrayKind::Double => {
                        self.filter(c1, SpecType::CELL);
                        self.filter(c2, SpecType::INT32);
                        self.filter(c3, SpecType::REAL_NUMBER);
                        if mode.out_of_bounds {
                            self.clobber_world(graph, index_in_block);
                        }
                    }
                    ArrayKind::Contiguous | ArrayKind::ArrayStorage => {
                        self.filter(c1, SpecType::CELL);
                        self.filter(c2, SpecType::INT32);
                        if mode.out_of_bounds {
                            self.clobber_world(graph, index_in_block);
                        }
                    }
                    ArrayKind::SlowPutArrayStorage => {
                        self.filter(c1, SpecType::CELL);
                        self.filter(c2, SpecType::INT32);
                        // Storing into a hole can trigger setters on the
                        // prototype chain.
                        self.clobber_world(graph, index_in_block);
                    }
                    ArrayKind::Int8Array
                    | ArrayKind::Int16Array
                    | ArrayKind::Int32Array
                    | ArrayKind::Uint8Array
                    | ArrayKind::Uint16Array
                    | ArrayKind::Uint32Array => {
                        self.filter(c1, SpecType::CELL);
                        self.filter(c2, SpecType::INT32);
                        let value_spec = if graph.node(c3).should_speculate_int32() {
                            SpecType::INT32
                        } else {
                            SpecType::NUMBER
                        };
                        self.filter(c3, value_spec);
                    }
                    ArrayKind::Float32Array | ArrayKind::Float64Array => {
                        self.filter(c1, SpecType::CELL);
                        self.filter(c2, SpecType::INT32);
                        self.filter(c3, SpecType::NUMBER);
                    }
                }
            }

            Op::ArrayPush(mode) => {
                let c2 = graph.node(node_id).child2();
                graph.node_mut(node_id).set_can_exit(true);
                match mode.kind {
                    ArrayKind::Int32 => self.filter(c2, SpecType::INT32),
                    ArrayKind::Double => self.filter(c2, SpecType::REAL_NUMBER),
                    _ => {}
                }
                // Push can grow past the storage and take the generic path.
                self.clobber_world(graph, index_in_block);
                self.node_values
                    .value_mut(node_id)
                    .set_type(SpecType::NUMBER);
            }

            Op::ArrayPop => {
                graph.node_mut(node_id).set_can_exit(true);
                self.clobber_world(graph, index_in_block);
                self.node_values.value_mut(node_id).make_top();
            }

            Op::StringCharAt => {
                let (c1, c2) = (graph.node(node_id).child1(), graph.node(node_id).child2());
                graph.node_mut(node_id).set_can_exit(true);
                self.filter(c1, SpecType::STRING);
                self.filter(c2, SpecType::INT32);
                self.node_values
                    .value_mut(node_id)
                    .set_type(SpecType::STRING);
            }

            Op::StringCharCodeAt => {
                let (c1, c2) = (graph.node(node_id).child1(), graph.node(node_id).child2());
                graph.node_mut(node_id).set_can_exit(true);
                self.filter(c1, SpecType::STRING);
                self.filter(c2, SpecType::INT32);
                self.node_values.value_mut(node_id).set_type(SpecType::INT32);
            }

            Op::StringConcat => {
                // Children are pre-coerced to strings by the builder.
                graph.node_mut(node_id).set_can_exit(false);
                self.node_values
                    .value_mut(node_id)
                    .set_type(SpecType::STRING);
            }

            // --- Allocation -------------------------------------------------
            Op::NewObject(shape) => {
                graph.node_mut(node_id).set_can_exit(false);
                self.node_values
                    .value_mut(node_id)
                    .set_shape(shape, &graph.shapes);
                self.have_structures = true;
            }

            Op::NewArray(shape) => {
                graph.node_mut(node_id).set_can_exit(true);
                self.node_values
                    .value_mut(node_id)
                    .set_shape(shape, &graph.shapes);
                self.have_structures = true;
            }

            Op::NewArrayWithSize(shape) => {
                let child = graph.node(node_id).child1();
                graph.node_mut(node_id).set_can_exit(true);
                self.filter(child, SpecType::INT32);
                self.node_values
                    .value_mut(node_id)
                    .set_shape(shape, &graph.shapes);
                self.have_structures = true;
            }

            // --- Globals ----------------------------------------------------
            Op::GetGlobal(_) => {
                graph.node_mut(node_id).set_can_exit(false);
                self.node_values.value_mut(node_id).make_top();
            }

            Op::PutGlobal(_) => {
                graph.node_mut(node_id).set_can_exit(false);
                // A global write is observable; anything captured may now be
                // read and written out from under us.
                self.clobber_captured(graph);
            }

            // --- Calls ------------------------------------------------------
            Op::Call(_) | Op::Construct(_) => {
                graph.node_mut(node_id).set_can_exit(true);
                self.clobber_world(graph, index_in_block);
                self.node_values.value_mut(node_id).make_top();
            }

            // --- Control ----------------------------------------------------
            Op::Jump(_) => {
                graph.node_mut(node_id).set_can_exit(false);
            }

            Op::Branch { .. } => {
                let child = graph.node(node_id).child1();
                let condition = self.node_values.value(child).clone();
                match self.boolean_result(graph, &condition) {
                    BooleanResult::DefinitelyTrue => {
                        self.branch_direction = BranchDirection::TakeTrue;
                        graph.node_mut(node_id).set_can_exit(false);
                        return self.is_valid;
                    }
                    BooleanResult::DefinitelyFalse => {
                        self.branch_direction = BranchDirection::TakeFalse;
                        graph.node_mut(node_id).set_can_exit(false);
                        return self.is_valid;
                    }
                    BooleanResult::Unknown => {}
                }
                let child_node = graph.node(child);
                if child_node.should_speculate_boolean() {
                    self.speculate_boolean_unary(graph, node_id);
                } else if child_node.should_speculate_non_string_cell_or_other() {
                    graph.node_mut(node_id).set_can_exit(true);
                    self.filter(child, SpecType::NON_STRING_CELL | SpecType::OTHER);
                } else if child_node.should_speculate_int32() {
                    self.speculate_int32_unary(graph, node_id, false);
                } else if child_node.should_speculate_number() {
                    self.speculate_number_unary(graph, node_id);
                } else {
                    graph.node_mut(node_id).set_can_exit(false);
                }
                self.branch_direction = BranchDirection::TakeBoth;
            }

            Op::Return => {
                graph.node_mut(node_id).set_can_exit(false);
                self.is_valid = false;
                return false;
            }

            Op::Throw => {
                graph.node_mut(node_id).set_can_exit(true);
                self.is_valid = false;
                return false;
            }

            Op::ForceExit => {
                graph.node_mut(node_id).set_can_exit(true);
                self.is_valid = false;
                return false;
            }
        }

        self.is_valid
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::GraphBuilder;
    use crate::ir::node::NodeFlags;

    fn run_entry_block(graph: &mut Graph) -> AbstractInterpreterHarness {
        let mut interpreter = AbstractInterpreter::new(graph);
        let entry = graph.entry_block();
        // Seed arguments the way the propagator would for a plain run.
        for i in 0..graph.num_arguments() {
            let prediction = graph.variables.argument(i).prediction;
            let mut value = AbstractValue::default();
            if prediction.proves(SpecType::INT32) {
                value.set_type(SpecType::INT32);
            } else if prediction.proves(SpecType::BOOLEAN) {
                value.set_type(SpecType::BOOLEAN);
            } else if prediction.proves(SpecType::CELL) {
                value.set_type(SpecType::CELL);
            } else {
                value.make_top();
            }
            *graph.block_mut(entry).head.argument_mut(i) = value;
        }
        interpreter.begin_block(graph, entry);
        interpreter.run_block(graph);
        AbstractInterpreterHarness { interpreter }
    }

    struct AbstractInterpreterHarness {
        interpreter: AbstractInterpreter,
    }

    impl AbstractInterpreterHarness {
        fn value(&self, node: NodeId) -> &AbstractValue {
            self.interpreter.value_of(node)
        }
    }

    #[test]
    fn folds_int32_addition() {
        let mut b = GraphBuilder::new(0, 0);
        b.begin_block();
        let x = b.constant(JsValue::Int32(3));
        let y = b.constant(JsValue::Int32(4));
        let add = b.add(Op::ArithAdd, &[x, y]);
        b.ret(add);
        let mut graph = b.finish();

        let h = run_entry_block(&mut graph);
        assert_eq!(h.value(add).value, Some(JsValue::Int32(7)));
        assert!(!graph.node(add).can_exit());
        assert!(h.interpreter.found_constants());
    }

    #[test]
    fn folding_is_commutative() {
        for (lhs, rhs) in [(3.5, -2.0), (-2.0, 3.5)] {
            let mut b = GraphBuilder::new(0, 0);
            b.begin_block();
            let x = b.constant(JsValue::number(lhs));
            let y = b.constant(JsValue::number(rhs));
            let mul = b.add(Op::ArithMul, &[x, y]);
            b.ret(mul);
            let mut graph = b.finish();
            let h = run_entry_block(&mut graph);
            assert_eq!(h.value(mul).value, Some(JsValue::number(-7.0)));
        }
    }

    #[test]
    fn folds_bit_ops_with_wraparound() {
        let cases: [(Op, i32, i32, JsValue); 5] = [
            (Op::BitAnd, 0b1100, 0b1010, JsValue::Int32(0b1000)),
            (Op::BitLShift, 1, 31, JsValue::Int32(i32::MIN)),
            (Op::BitLShift, 1, 33, JsValue::Int32(2)),
            (Op::BitRShift, -8, 1, JsValue::Int32(-4)),
            (Op::BitURShift, -1, 0, JsValue::number(4294967295.0)),
        ];
        for (op, lhs, rhs, expected) in cases {
            let mut b = GraphBuilder::new(0, 0);
            b.begin_block();
            let x = b.constant(JsValue::Int32(lhs));
            let y = b.constant(JsValue::Int32(rhs));
            let node = b.add(op, &[x, y]);
            b.ret(node);
            let mut graph = b.finish();
            let h = run_entry_block(&mut graph);
            assert_eq!(h.value(node).value, Some(expected), "{op:?}");
        }
    }

    #[test]
    fn folds_min_max_with_nan_and_signed_zero() {
        let mut b = GraphBuilder::new(0, 0);
        b.begin_block();
        let nan = b.constant(JsValue::double(f64::NAN));
        let one = b.constant(JsValue::Int32(1));
        let min_nan = b.add(Op::ArithMin, &[nan, one]);
        let neg_zero = b.constant(JsValue::double(-0.0));
        let pos_zero = b.constant(JsValue::double(0.0));
        let min_zero = b.add(Op::ArithMin, &[neg_zero, pos_zero]);
        b.ret(min_zero);
        let mut graph = b.finish();

        let h = run_entry_block(&mut graph);
        match h.value(min_nan).value.as_ref().and_then(|v| v.as_number()) {
            Some(n) => assert!(n.is_nan()),
            None => panic!("min(NaN, 1) did not fold"),
        }
        assert_eq!(h.value(min_zero).value, Some(JsValue::double(-0.0)));
    }

    #[test]
    fn int32_add_with_proven_operands_needs_no_guard() {
        let mut b = GraphBuilder::new(1, 0);
        b.predict_argument(0, SpecType::INT32);
        b.begin_block();
        b.add(Op::SetArgument(Operand::Argument(0)), &[]);
        let x = b.add_predicted(Op::GetLocal(Operand::Argument(0)), &[], SpecType::INT32);
        let one = b.constant(JsValue::Int32(1));
        let add = b.add(Op::ArithAdd, &[x, one]);
        b.ret(add);
        let mut graph = b.finish();

        let h = run_entry_block(&mut graph);
        assert_eq!(h.value(add).spec, SpecType::INT32);
        assert!(!graph.node(add).can_exit());
    }

    #[test]
    fn int32_add_with_wider_prediction_needs_guard() {
        let mut b = GraphBuilder::new(1, 0);
        b.predict_argument(0, SpecType::NUMBER);
        b.begin_block();
        b.add(Op::SetArgument(Operand::Argument(0)), &[]);
        // The node itself is predicted int32, but the incoming value is only
        // known to be a number at best.
        let x = b.add_predicted(Op::GetLocal(Operand::Argument(0)), &[], SpecType::INT32);
        let one = b.constant(JsValue::Int32(1));
        let add = b.add(Op::ArithAdd, &[x, one]);
        b.ret(add);
        let mut graph = b.finish();

        let h = run_entry_block(&mut graph);
        assert_eq!(h.value(add).spec, SpecType::INT32);
        assert!(graph.node(add).can_exit());
    }

    #[test]
    fn overflow_profiling_forces_guard() {
        let mut b = GraphBuilder::new(0, 0);
        b.begin_block();
        let x = b.add_predicted(Op::GetGlobal(0), &[], SpecType::INT32);
        let check = b.add(Op::ValueToInt32, &[x]);
        let y = b.constant(JsValue::Int32(1));
        let add = b.add(Op::ArithAdd, &[check, y]);
        b.set_profile_flags(add, NodeFlags::MAY_OVERFLOW);
        b.ret(add);
        let mut graph = b.finish();
        graph.node_mut(check).prediction = SpecType::INT32;

        let h = run_entry_block(&mut graph);
        assert_eq!(h.value(add).spec, SpecType::INT32);
        assert!(graph.node(add).can_exit());
    }

    #[test]
    fn return_invalidates_rest_of_block() {
        let mut b = GraphBuilder::new(0, 0);
        b.begin_block();
        let x = b.constant(JsValue::Int32(1));
        b.ret(x);
        let mut graph = b.finish();

        let h = run_entry_block(&mut graph);
        assert!(!h.interpreter.is_valid());
    }

    #[test]
    fn branch_on_constant_false_takes_false_edge() {
        let mut b = GraphBuilder::new(0, 0);
        let entry = b.begin_block();
        let t1 = b.begin_block();
        let t2 = b.begin_block();
        b.resume_block(t1);
        let r1 = b.constant(JsValue::Undefined);
        b.ret(r1);
        b.resume_block(t2);
        let r2 = b.constant(JsValue::Undefined);
        b.ret(r2);
        b.resume_block(entry);
        let cond = b.constant(JsValue::Boolean(false));
        b.branch(cond, t1, t2);
        let mut graph = b.finish();

        let mut interpreter = AbstractInterpreter::new(&graph);
        interpreter.begin_block(&mut graph, entry);
        interpreter.run_block(&mut graph);
        assert!(interpreter.is_valid());
        interpreter.end_block(&mut graph, MergeMode::MergeToTail);
        assert_eq!(
            graph.block(entry).branch_direction,
            BranchDirection::TakeFalse
        );
    }

    #[test]
    fn world_clobber_widens_shapes_but_keeps_types() {
        use crate::shape::{ShapeInfo, ShapeKind};
        let mut b = GraphBuilder::new(0, 0);
        let shape = b.graph_mut().shapes.register(ShapeInfo::new(ShapeKind::Object));
        b.begin_block();
        let obj = b.add(Op::NewObject(shape), &[]);
        let callee = b.constant(JsValue::Undefined);
        b.add(Op::Call(0), &[callee]);
        b.ret(obj);
        let mut graph = b.finish();

        let h = run_entry_block(&mut graph);
        let value = h.value(obj);
        assert_eq!(value.spec, SpecType::FINAL_OBJECT);
        assert!(value.current_shape.is_top());
        // The watchpointed future bound survives the clobber.
        assert_eq!(value.future_shape.as_singleton(), Some(shape));
    }

    #[test]
    fn check_shape_folds_when_already_proven() {
        use crate::shape::{ShapeInfo, ShapeKind};
        let mut b = GraphBuilder::new(0, 0);
        let shape = b.graph_mut().shapes.register(ShapeInfo::new(ShapeKind::Object));
        let set = b.intern_shape_set(ShapeSet::singleton(shape));
        b.begin_block();
        let obj = b.add(Op::NewObject(shape), &[]);
        let check = b.add(Op::CheckShape(set), &[obj]);
        b.ret(obj);
        let mut graph = b.finish();

        let h = run_entry_block(&mut graph);
        assert!(h.interpreter.found_constants());
        assert!(!graph.node(check).can_exit());
        assert_eq!(h.value(obj).current_shape.as_singleton(), Some(shape));
    }

    #[test]
    fn check_value_against_excluded_constant_invalidates() {
        let mut b = GraphBuilder::new(0, 0);
        b.begin_block();
        let x = b.constant(JsValue::Int32(4));
        let expected = b.intern_constant(JsValue::Int32(5));
        b.add(Op::CheckValue(expected), &[x]);
        b.ret(x);
        let mut graph = b.finish();

        let h = run_entry_block(&mut graph);
        assert!(!h.interpreter.is_valid());
    }

    #[test]
    fn tail_reconciliation_set_local_publishes_child() {
        let mut b = GraphBuilder::new(0, 1);
        let entry = b.begin_block();
        let x = b.constant(JsValue::Int32(9));
        b.add(Op::SetLocal(Operand::Local(0)), &[x]);
        let r = b.constant(JsValue::Undefined);
        b.ret(r);
        let mut graph = b.finish();

        let mut interpreter = AbstractInterpreter::new(&graph);
        interpreter.begin_block(&mut graph, entry);
        // Walk only the non-terminal prefix so the block stays valid and the
        // tail actually gets reconciled.
        for index in 0..graph.block(entry).len() - 1 {
            assert!(interpreter.execute(&mut graph, index));
        }
        let changed = interpreter.end_block(&mut graph, MergeMode::MergeToTail);
        assert!(changed);
        assert_eq!(
            graph.block(entry).tail.get(Operand::Local(0)).value,
            Some(JsValue::Int32(9))
        );
    }

    #[test]
    fn tail_reconciliation_double_format_rederives() {
        let mut b = GraphBuilder::new(0, 1);
        b.use_double_format(0);
        let entry = b.begin_block();
        let x = b.constant(JsValue::Int32(3));
        b.add(Op::SetLocal(Operand::Local(0)), &[x]);
        let r = b.constant(JsValue::Undefined);
        b.ret(r);
        let mut graph = b.finish();

        let mut interpreter = AbstractInterpreter::new(&graph);
        interpreter.begin_block(&mut graph, entry);
        for index in 0..graph.block(entry).len() - 1 {
            assert!(interpreter.execute(&mut graph, index));
        }
        interpreter.end_block(&mut graph, MergeMode::MergeToTail);
        let slot = graph.block(entry).tail.get(Operand::Local(0));
        assert_eq!(slot.spec, SpecType::DOUBLE);
        assert_eq!(slot.value, None);
    }

    #[test]
    fn tail_reconciliation_dead_get_local_falls_through() {
        let mut b = GraphBuilder::new(0, 1);
        b.predict_local(0, SpecType::INT32);
        let entry = b.begin_block();
        let phi = b.add(Op::Phi(Operand::Local(0)), &[]);
        let get = b.add(Op::GetLocal(Operand::Local(0)), &[]);
        let r = b.constant(JsValue::Undefined);
        b.ret(r);
        b.kill(get);
        let mut graph = b.finish();
        let _ = phi;

        // Seed the head so the slot carries a value through the block.
        let mut seeded = AbstractValue::default();
        seeded.set_type(SpecType::INT32);
        *graph.block_mut(entry).head.get_mut(Operand::Local(0)) = seeded.clone();

        let mut interpreter = AbstractInterpreter::new(&graph);
        interpreter.begin_block(&mut graph, entry);
        for index in 0..graph.block(entry).len() - 1 {
            assert!(interpreter.execute(&mut graph, index));
        }
        interpreter.end_block(&mut graph, MergeMode::MergeToTail);
        assert_eq!(*graph.block(entry).tail.get(Operand::Local(0)), seeded);
    }
}
