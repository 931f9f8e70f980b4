//! End-to-end scenarios for the control flow analysis: whole-graph runs
//! exercising constant discovery, guard placement, merge widening, branch
//! pruning, clobbering, and OSR seeding.

use vesper_jit::ir::{Operand, OsrEntry};
use vesper_jit::shape::{ShapeInfo, ShapeKind};
use vesper_jit::{
    BranchDirection, Cfa, GraphBuilder, JsValue, Op, SpecType,
};

#[test]
fn constant_addition_folds_without_guard() {
    let mut b = GraphBuilder::new(0, 0);
    b.begin_block();
    let x = b.constant(JsValue::Int32(3));
    let y = b.constant(JsValue::Int32(4));
    let add = b.add(Op::ArithAdd, &[x, y]);
    b.ret(add);
    let mut graph = b.finish();

    let mut cfa = Cfa::new(&graph);
    let stats = cfa.run(&mut graph).expect("valid graph");

    assert_eq!(cfa.value_of(add).value, Some(JsValue::Int32(7)));
    assert_eq!(cfa.value_of(add).spec, SpecType::INT32);
    assert!(!graph.node(add).can_exit());
    assert!(stats.found_constants);
}

#[test]
fn proven_int32_operand_needs_no_guard() {
    let mut b = GraphBuilder::new(1, 0);
    b.predict_argument(0, SpecType::INT32);
    b.begin_block();
    b.add(Op::SetArgument(Operand::Argument(0)), &[]);
    let x = b.add_predicted(Op::GetLocal(Operand::Argument(0)), &[], SpecType::INT32);
    let one = b.constant(JsValue::Int32(1));
    let add = b.add(Op::ArithAdd, &[x, one]);
    b.ret(add);
    let mut graph = b.finish();

    let mut cfa = Cfa::new(&graph);
    cfa.run(&mut graph).expect("valid graph");

    assert_eq!(cfa.value_of(add).spec, SpecType::INT32);
    assert!(!graph.node(add).can_exit());
}

#[test]
fn wider_prediction_requires_guard() {
    let mut b = GraphBuilder::new(1, 0);
    // The profiler only promises "number", so the int32 specialization
    // must keep its check.
    b.predict_argument(0, SpecType::NUMBER);
    b.begin_block();
    b.add(Op::SetArgument(Operand::Argument(0)), &[]);
    let x = b.add_predicted(Op::GetLocal(Operand::Argument(0)), &[], SpecType::INT32);
    let one = b.constant(JsValue::Int32(1));
    let add = b.add(Op::ArithAdd, &[x, one]);
    b.ret(add);
    let mut graph = b.finish();

    let mut cfa = Cfa::new(&graph);
    cfa.run(&mut graph).expect("valid graph");

    assert_eq!(cfa.value_of(add).spec, SpecType::INT32);
    assert!(graph.node(add).can_exit());
}

#[test]
fn two_predecessor_merge_widens_to_number() {
    let mut b = GraphBuilder::new(1, 1);
    b.predict_argument(0, SpecType::BOOLEAN);
    b.predict_local(0, SpecType::NUMBER);

    let entry = b.begin_block();
    let left = b.begin_block();
    let right = b.begin_block();
    let join = b.begin_block();

    b.resume_block(entry);
    b.add(Op::SetArgument(Operand::Argument(0)), &[]);
    let cond = b.add_predicted(Op::GetLocal(Operand::Argument(0)), &[], SpecType::BOOLEAN);
    b.branch(cond, left, right);

    b.resume_block(left);
    let c1 = b.constant(JsValue::Int32(1));
    b.add(Op::SetLocal(Operand::Local(0)), &[c1]);
    b.jump(join);

    b.resume_block(right);
    let c2 = b.constant(JsValue::number(2.5));
    b.add(Op::SetLocal(Operand::Local(0)), &[c2]);
    b.jump(join);

    b.resume_block(join);
    b.add(Op::Phi(Operand::Local(0)), &[]);
    let merged = b.add_predicted(Op::GetLocal(Operand::Local(0)), &[], SpecType::NUMBER);
    b.ret(merged);
    let mut graph = b.finish();

    let mut cfa = Cfa::new(&graph);
    cfa.run(&mut graph).expect("valid graph");

    let head = graph.block(join).head.get(Operand::Local(0));
    assert_eq!(head.spec, SpecType::INT32 | SpecType::DOUBLE_REAL);
    assert!(head.spec.proves(SpecType::NUMBER));
    assert_eq!(head.value, None);
    assert_eq!(cfa.value_of(merged).spec, SpecType::INT32 | SpecType::DOUBLE_REAL);
}

#[test]
fn constant_false_branch_prunes_taken_edge() {
    let mut b = GraphBuilder::new(0, 1);
    b.predict_local(0, SpecType::INT32);

    let entry = b.begin_block();
    let taken = b.begin_block();
    let not_taken = b.begin_block();

    b.resume_block(entry);
    let v = b.constant(JsValue::Int32(42));
    b.add(Op::SetLocal(Operand::Local(0)), &[v]);
    let cond = b.constant(JsValue::Boolean(false));
    b.branch(cond, taken, not_taken);

    b.resume_block(taken);
    b.add(Op::Phi(Operand::Local(0)), &[]);
    let t = b.add_predicted(Op::GetLocal(Operand::Local(0)), &[], SpecType::INT32);
    b.ret(t);

    b.resume_block(not_taken);
    b.add(Op::Phi(Operand::Local(0)), &[]);
    let f = b.add_predicted(Op::GetLocal(Operand::Local(0)), &[], SpecType::INT32);
    b.ret(f);
    let mut graph = b.finish();

    let mut cfa = Cfa::new(&graph);
    cfa.run(&mut graph).expect("valid graph");

    assert_eq!(
        graph.block(entry).branch_direction,
        BranchDirection::TakeFalse
    );

    // The untaken successor saw the merged state.
    assert!(graph.block(not_taken).cfa_has_visited);
    assert_eq!(
        graph.block(not_taken).head.get(Operand::Local(0)).value,
        Some(JsValue::Int32(42))
    );
    assert_eq!(cfa.value_of(f).value, Some(JsValue::Int32(42)));

    // The statically-dead successor was never touched.
    assert!(!graph.block(taken).cfa_has_visited);
    assert!(graph.block(taken).head.get(Operand::Local(0)).is_clear());
}

#[test]
fn loop_reaches_fixpoint_with_bounded_visits() {
    let mut b = GraphBuilder::new(0, 1);
    b.predict_local(0, SpecType::INT32);

    let entry = b.begin_block();
    let header = b.begin_block();
    let body = b.begin_block();
    let exit = b.begin_block();

    b.resume_block(entry);
    let zero = b.constant(JsValue::Int32(0));
    b.add(Op::SetLocal(Operand::Local(0)), &[zero]);
    b.jump(header);

    b.resume_block(header);
    b.add(Op::Phi(Operand::Local(0)), &[]);
    let i = b.add_predicted(Op::GetLocal(Operand::Local(0)), &[], SpecType::INT32);
    let limit = b.constant(JsValue::Int32(10));
    let cmp = b.add_predicted(Op::CompareLess, &[i, limit], SpecType::BOOLEAN);
    b.branch(cmp, body, exit);

    b.resume_block(body);
    b.add(Op::Phi(Operand::Local(0)), &[]);
    let i2 = b.add_predicted(Op::GetLocal(Operand::Local(0)), &[], SpecType::INT32);
    let one = b.constant(JsValue::Int32(1));
    let next = b.add(Op::ArithAdd, &[i2, one]);
    b.add(Op::SetLocal(Operand::Local(0)), &[next]);
    b.jump(header);

    b.resume_block(exit);
    b.add(Op::Phi(Operand::Local(0)), &[]);
    let result = b.add_predicted(Op::GetLocal(Operand::Local(0)), &[], SpecType::INT32);
    b.ret(result);
    let mut graph = b.finish();

    let mut cfa = Cfa::new(&graph);
    let stats = cfa.run(&mut graph).expect("valid graph");

    // Four blocks, a lattice of small height: the fixpoint must arrive in
    // a handful of visits per block, not grow with iteration count.
    assert!(stats.blocks_visited <= 20, "visited {}", stats.blocks_visited);

    let head = graph.block(header).head.get(Operand::Local(0));
    assert_eq!(head.spec, SpecType::INT32);
    assert_eq!(head.value, None);
    assert_eq!(cfa.value_of(result).spec, SpecType::INT32);
    assert!(!graph.node(next).can_exit());
}

#[test]
fn call_clobbers_shapes_but_not_primitive_types() {
    let mut b = GraphBuilder::new(0, 1);
    let shape = b
        .graph_mut()
        .shapes
        .register(ShapeInfo::new(ShapeKind::Object));
    b.predict_local(0, SpecType::FINAL_OBJECT);

    b.begin_block();
    let obj = b.add(Op::NewObject(shape), &[]);
    b.add(Op::SetLocal(Operand::Local(0)), &[obj]);
    let callee = b.constant(JsValue::Undefined);
    b.add(Op::Call(0), &[callee]);
    let reread = b.add_predicted(Op::GetLocal(Operand::Local(0)), &[], SpecType::FINAL_OBJECT);
    b.ret(reread);
    let mut graph = b.finish();

    let mut cfa = Cfa::new(&graph);
    cfa.run(&mut graph).expect("valid graph");

    let value = cfa.value_of(reread);
    assert_eq!(value.spec, SpecType::FINAL_OBJECT);
    assert!(value.current_shape.is_top());
    assert_eq!(value.future_shape.as_singleton(), Some(shape));
}

#[test]
fn osr_must_handle_values_seed_the_target_block() {
    let mut b = GraphBuilder::new(0, 1);
    b.predict_local(0, SpecType::INT32);

    let entry = b.begin_block();
    let osr_block = b.begin_block();

    b.resume_block(entry);
    b.jump(osr_block);

    b.resume_block(osr_block);
    b.add(Op::Phi(Operand::Local(0)), &[]);
    let v = b.add_predicted(Op::GetLocal(Operand::Local(0)), &[], SpecType::INT32);
    b.ret(v);
    let mut graph = b.finish();

    graph.block_mut(osr_block).is_osr_target = true;
    let mut must_handle = vesper_jit::ir::Operands::new(0, 1);
    *must_handle.get_mut(Operand::Local(0)) = Some(JsValue::Int32(5));
    graph.osr_entries.push(OsrEntry {
        target: osr_block,
        must_handle,
    });

    let mut cfa = Cfa::new(&graph);
    let stats = cfa.run(&mut graph).expect("valid graph");

    assert_eq!(cfa.value_of(v).value, Some(JsValue::Int32(5)));
    assert!(stats.found_constants);
}

#[test]
fn unreachable_typed_arithmetic_invalidates_block_only() {
    // A typed add on a boolean-predicted operand cannot be compiled; the
    // block dies but the analysis still completes.
    let mut b = GraphBuilder::new(1, 0);
    b.predict_argument(0, SpecType::BOOLEAN);
    b.begin_block();
    b.add(Op::SetArgument(Operand::Argument(0)), &[]);
    let x = b.add_predicted(Op::GetLocal(Operand::Argument(0)), &[], SpecType::BOOLEAN);
    let one = b.constant(JsValue::Int32(1));
    let add = b.add(Op::ArithAdd, &[x, one]);
    b.ret(add);
    let mut graph = b.finish();

    let mut cfa = Cfa::new(&graph);
    cfa.run(&mut graph).expect("valid graph");

    let entry = graph.entry_block();
    assert!(graph.block(entry).cfa_has_visited);
    assert!(!graph.block(entry).cfa_did_finish);
    assert!(graph.node(add).can_exit());
}

#[test]
fn get_by_id_with_known_shape_folds_to_fast_path() {
    let mut b = GraphBuilder::new(0, 0);
    let shape = b
        .graph_mut()
        .shapes
        .register(ShapeInfo::new(ShapeKind::Object));
    b.graph_mut().shapes.define_slot(shape, 7, 0);

    b.begin_block();
    let obj = b.add(Op::NewObject(shape), &[]);
    let load = b.add_predicted(Op::GetById(7), &[obj], SpecType::TOP);
    b.ret(load);
    let mut graph = b.finish();
    graph.node_mut(obj).prediction = SpecType::FINAL_OBJECT;

    let mut cfa = Cfa::new(&graph);
    let stats = cfa.run(&mut graph).expect("valid graph");

    // The load stayed on the inline-slot fast path: the base kept its
    // proven shape instead of being clobbered.
    assert!(stats.found_constants);
    assert_eq!(cfa.value_of(obj).current_shape.as_singleton(), Some(shape));
}
