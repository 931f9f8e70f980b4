//! Fixpoint throughput over a loop-heavy graph.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use vesper_jit::ir::Operand;
use vesper_jit::{Cfa, GraphBuilder, JsValue, Op, SpecType};

/// A chain of `loops` counted loops, each feeding the next through a local.
fn build_loopy_graph(loops: usize) -> vesper_jit::Graph {
    let mut b = GraphBuilder::new(0, 1);
    b.predict_local(0, SpecType::INT32);

    let entry = b.begin_block();
    b.resume_block(entry);
    let zero = b.constant(JsValue::Int32(0));
    b.add(Op::SetLocal(Operand::Local(0)), &[zero]);

    let mut previous = entry;
    for _ in 0..loops {
        let header = b.begin_block();
        let body = b.begin_block();
        let exit = b.begin_block();

        b.resume_block(previous);
        b.jump(header);

        b.resume_block(header);
        b.add(Op::Phi(Operand::Local(0)), &[]);
        let i = b.add_predicted(Op::GetLocal(Operand::Local(0)), &[], SpecType::INT32);
        let limit = b.constant(JsValue::Int32(1000));
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
        previous = exit;
    }

    b.resume_block(previous);
    let result = b.add_predicted(Op::GetLocal(Operand::Local(0)), &[], SpecType::INT32);
    b.ret(result);
    b.finish()
}

fn bench_fixpoint(c: &mut Criterion) {
    let graph = build_loopy_graph(32);
    c.bench_function("cfa_fixpoint_32_loops", |bencher| {
        bencher.iter_batched(
            || {
                let mut fresh = build_loopy_graph(32);
                let cfa = Cfa::new(&fresh);
                fresh.validate().expect("valid graph");
                (fresh, cfa)
            },
            |(mut graph, mut cfa)| {
                let stats = cfa.run(&mut graph).expect("valid graph");
                black_box(stats);
            },
            criterion::BatchSize::SmallInput,
        );
    });
    black_box(&graph);
}

criterion_group!(benches, bench_fixpoint);
criterion_main!(benches);
