//! The fixpoint propagator.
//!
//! [`Cfa`] drives the block interpreter over the whole graph: it seeds the
//! entry block from argument predictions (and OSR targets from their
//! must-handle values), then repeatedly re-interprets every block flagged
//! for revisit, pushing tail-snapshot changes into successor heads, until
//! nothing changes.
//!
//! Termination is guaranteed because every per-slot lattice has finite
//! height and [`AbstractValue::merge`] is monotone, so each head slot can
//! change only a bounded number of times. A debug backstop
//! ([`CfaConfig::max_block_visits`]) turns a monotonicity bug into a loud
//! assertion instead of a hang.

use tracing::{debug, trace};

use super::abstract_value::AbstractValue;
use super::interpreter::{AbstractInterpreter, MergeMode};
use crate::ir::block::{BlockId, BranchDirection};
use crate::ir::graph::{Graph, GraphError, OsrEntry};
use crate::ir::node::{NodeId, Op};
use crate::ir::operand::Operand;
use crate::speculation::SpecType;

// =============================================================================
// Configuration and Statistics
// =============================================================================

/// Knobs for one analysis run.
#[derive(Debug, Clone)]
pub struct CfaConfig {
    /// Debug backstop on total block interpretations. The fixpoint is
    /// bounded by construction; exceeding this indicates a lattice or
    /// monotonicity bug.
    pub max_block_visits: usize,
    /// Skip merging along statically-dead branch edges. Turning this off
    /// merges both edges regardless of the computed branch direction,
    /// which is occasionally useful when hunting miscompiles.
    pub prune_dead_branches: bool,
}

impl Default for CfaConfig {
    fn default() -> Self {
        CfaConfig {
            max_block_visits: 10_000,
            prune_dead_branches: true,
        }
    }
}

/// Counters from the last run.
#[derive(Debug, Clone, Copy, Default)]
pub struct CfaStats {
    /// Total block interpretations performed.
    pub blocks_visited: usize,
    /// Sweeps over the block list.
    pub passes: usize,
    /// Some block discovered a constant; the constant-folding pass should
    /// run and may request another fixpoint afterwards.
    pub found_constants: bool,
}

// =============================================================================
// The Pass
// =============================================================================

/// Whole-graph control flow analysis.
pub struct Cfa {
    config: CfaConfig,
    stats: CfaStats,
    interpreter: AbstractInterpreter,
}

impl Cfa {
    pub fn new(graph: &Graph) -> Self {
        Self::with_config(graph, CfaConfig::default())
    }

    pub fn with_config(graph: &Graph, config: CfaConfig) -> Self {
        Cfa {
            config,
            stats: CfaStats::default(),
            interpreter: AbstractInterpreter::new(graph),
        }
    }

    /// Counters from the last [`Cfa::run`].
    pub fn stats(&self) -> CfaStats {
        self.stats
    }

    /// The final abstract value of a node, valid after [`Cfa::run`].
    pub fn value_of(&self, node: NodeId) -> &AbstractValue {
        self.interpreter.value_of(node)
    }

    /// Whether any block discovered a constant.
    pub fn found_constants(&self) -> bool {
        self.stats.found_constants
    }

    /// Validate the graph, then run the analysis to its fixpoint.
    pub fn run(&mut self, graph: &mut Graph) -> Result<CfaStats, GraphError> {
        graph.validate()?;
        self.stats = CfaStats::default();
        self.initialize(graph);
        self.run_to_fixpoint(graph);
        Ok(self.stats)
    }

    /// Seed boundary snapshots: the entry block from argument predictions,
    /// OSR targets from their must-handle values, everything else to clear.
    fn initialize(&mut self, graph: &mut Graph) {
        let entry = graph.entry_block();

        for i in 0..graph.num_arguments() {
            let meta = graph.variables.argument(i).clone();
            let head_def = *graph
                .block(entry)
                .variables_at_head
                .get(Operand::Argument(i as u32));
            let dead = match head_def {
                Some(node) => !graph.node(node).is_live(),
                None => true,
            };

            let mut value = AbstractValue::default();
            if dead {
                // A dead argument is never checked, so for the analysis it
                // holds no value at all.
            } else if meta.is_captured {
                value.make_top();
            } else {
                let prediction = meta.prediction;
                if prediction.proves(SpecType::INT32) {
                    value.set_type(SpecType::INT32);
                } else if prediction.proves(SpecType::BOOLEAN) {
                    value.set_type(SpecType::BOOLEAN);
                } else if prediction.proves(SpecType::CELL) {
                    value.set_type(SpecType::CELL);
                } else {
                    value.make_top();
                }
            }
            *graph.block_mut(entry).head.argument_mut(i) = value;
            graph.block_mut(entry).tail.argument_mut(i).clear();
        }

        for i in 0..graph.num_locals() {
            let captured = graph.variables.local(i).is_captured;
            let mut value = AbstractValue::default();
            if captured {
                value.make_top();
            }
            *graph.block_mut(entry).head.local_mut(i) = value;
            graph.block_mut(entry).tail.local_mut(i).clear();
        }

        {
            let block = graph.block_mut(entry);
            block.cfa_should_revisit = true;
            block.cfa_has_visited = false;
            block.cfa_found_constants = false;
        }

        let block_ids: Vec<BlockId> = graph.blocks.ids().collect();
        for block_id in block_ids {
            if block_id == entry || !graph.block(block_id).is_reachable {
                continue;
            }
            let block = graph.block_mut(block_id);
            block.cfa_should_revisit = false;
            block.cfa_has_visited = false;
            block.cfa_found_constants = false;
            block.head.for_each_mut(|_, value| value.clear());
            block.tail.for_each_mut(|_, value| value.clear());
        }

        let entries: Vec<OsrEntry> = graph.osr_entries.clone();
        for osr in entries {
            debug_assert!(
                graph.block(osr.target).is_osr_target,
                "OSR values supplied for a block that is not an OSR target"
            );
            let operands: Vec<Operand> = osr.must_handle.operands().collect();
            for operand in operands {
                if let Some(must_handle) = osr.must_handle.get(operand) {
                    let mut value = AbstractValue::default();
                    value.set_constant(must_handle, &graph.shapes);
                    graph
                        .block_mut(osr.target)
                        .head
                        .get_mut(operand)
                        .merge(&value);
                    trace!(
                        block = osr.target.index(),
                        ?operand,
                        "seeded OSR must-handle value"
                    );
                }
            }
            graph.block_mut(osr.target).cfa_should_revisit = true;
        }
    }

    /// Sweep the block list, interpreting every block flagged for revisit,
    /// until a sweep finds nothing to do.
    fn run_to_fixpoint(&mut self, graph: &mut Graph) {
        loop {
            let mut visited_any = false;
            let block_ids: Vec<BlockId> = graph.blocks.ids().collect();
            for block_id in block_ids {
                if !graph.block(block_id).cfa_should_revisit {
                    continue;
                }
                visited_any = true;
                self.process_block(graph, block_id);
            }
            if !visited_any {
                break;
            }
            self.stats.passes += 1;
        }
        debug!(
            blocks_visited = self.stats.blocks_visited,
            passes = self.stats.passes,
            found_constants = self.stats.found_constants,
            "fixpoint reached"
        );
    }

    fn process_block(&mut self, graph: &mut Graph, block_id: BlockId) {
        self.stats.blocks_visited += 1;
        debug_assert!(
            self.stats.blocks_visited <= self.config.max_block_visits,
            "fixpoint failed to converge; a merge is not monotone"
        );

        self.interpreter.begin_block(graph, block_id);
        self.interpreter.run_block(graph);
        self.interpreter.end_block(graph, MergeMode::MergeToTail);

        // An invalid block's tail is meaningless; its successors learn
        // nothing from it this iteration.
        if graph.block(block_id).cfa_did_finish {
            merge_to_successors(graph, block_id, self.config.prune_dead_branches);
        }
        if graph.block(block_id).cfa_found_constants {
            self.stats.found_constants = true;
        }
    }
}

// =============================================================================
// Successor Merging
// =============================================================================

/// Merge a finished block's tail into the head of every successor the
/// recorded branch direction does not statically exclude. Returns whether
/// any successor changed (each changed successor is flagged for revisit).
pub fn merge_to_successors(graph: &mut Graph, block_id: BlockId, prune_dead_branches: bool) -> bool {
    let Some(terminal) = graph.block(block_id).terminal() else {
        debug_assert!(false, "merging successors of an empty block");
        return false;
    };

    match graph.node(terminal).op {
        Op::Jump(target) => {
            debug_assert_eq!(
                graph.block(block_id).branch_direction,
                BranchDirection::Invalid
            );
            merge(graph, block_id, target)
        }
        Op::Branch { taken, not_taken } => {
            let direction = graph.block(block_id).branch_direction;
            debug_assert_ne!(direction, BranchDirection::Invalid);
            let mut changed = false;
            if !prune_dead_branches || direction != BranchDirection::TakeFalse {
                changed |= merge(graph, block_id, taken);
            }
            if !prune_dead_branches || direction != BranchDirection::TakeTrue {
                changed |= merge(graph, block_id, not_taken);
            }
            changed
        }
        Op::Return | Op::Throw | Op::ForceExit => false,
        _ => {
            debug_assert!(false, "block does not end in a terminal");
            false
        }
    }
}

/// Merge `from`'s tail into `to`'s head, slot by slot. A slot with no
/// defining node at the successor's head is dead there and receives
/// nothing. A successor that changed, or that has never been visited, is
/// flagged for revisit.
fn merge(graph: &mut Graph, from: BlockId, to: BlockId) -> bool {
    let mut changed = false;
    let operands: Vec<Operand> = graph.variables.operands().collect();
    for operand in operands {
        if graph.block(to).variables_at_head.get(operand).is_none() {
            continue;
        }
        let source = graph.block(from).tail.get(operand).clone();
        changed |= graph.block_mut(to).head.get_mut(operand).merge(&source);
    }
    if !graph.block(to).cfa_has_visited {
        changed = true;
    }
    if changed {
        graph.block_mut(to).cfa_should_revisit = true;
        trace!(
            from = from.index(),
            to = to.index(),
            "successor head changed, flagged for revisit"
        );
    }
    changed
}
