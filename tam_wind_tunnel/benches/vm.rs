// Copyright 2026 the MAVL Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use tam::asm::{Assembler, Comparison, FuncId};
use tam::image::Image;
use tam::interpreter::{Interpreter, RunOutcome};
use tam::primitive::Primitive;
use tam::register::Register;

fn bench_vm(c: &mut Criterion) {
    bench_add_chain(c);
    bench_branch_hot_loop(c);
    bench_call_overhead(c);
}

fn build_add_chain(chain_len: u32) -> Image {
    let mut asm = Assembler::new();
    asm.add_function(FuncId(0), "main", "function void main()");
    asm.load_int(0);
    for i in 0..chain_len {
        asm.load_int(i as i32);
        asm.call_primitive(Primitive::AddI);
    }
    asm.emit_pop(0, 1);
    asm.emit_return(0, 0);
    asm.finish().unwrap()
}

fn build_countdown_loop(iterations: i32) -> Image {
    let mut asm = Assembler::new();
    asm.add_function(FuncId(0), "main", "function void main()");
    asm.load_int(iterations);
    let loop_start = asm.next_instruction_address();
    // ..., counter
    asm.load_int(1);
    asm.call_primitive(Primitive::SubI);
    // ..., counter-1
    asm.load_value(Register::ST, 1, -1);
    asm.load_int(0);
    asm.emit_integer_comparison(Comparison::Greater);
    // ..., counter-1, bool
    asm.emit_conditional_jump(true, loop_start);
    asm.emit_pop(0, 1);
    asm.emit_return(0, 0);
    asm.finish().unwrap()
}

fn build_call_chain(calls: u32) -> Image {
    let mut asm = Assembler::new();
    let callee = FuncId(1);
    asm.add_function(FuncId(0), "main", "function void main()");
    for _ in 0..calls {
        asm.emit_function_call(callee, "leaf");
    }
    asm.emit_return(0, 0);
    asm.add_function(callee, "leaf", "function void leaf()");
    asm.emit_return(0, 0);
    asm.finish().unwrap()
}

fn bench_image(group: &mut criterion::BenchmarkGroup<'_, criterion::measurement::WallTime>, id: BenchmarkId, image: Image) {
    let mut interp = Interpreter::new(std::io::empty(), std::io::sink());
    interp.load_image(image);
    group.bench_function(id, |b| {
        b.iter(|| {
            interp.reset(false);
            assert_eq!(interp.run(), RunOutcome::Halted);
            black_box(interp.cycles);
        });
    });
}

fn bench_add_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("add_chain");
    for &chain_len in &[10_u32, 100, 1000] {
        let image = build_add_chain(chain_len);
        bench_image(&mut group, BenchmarkId::from_parameter(chain_len), image);
    }
    group.finish();
}

fn bench_branch_hot_loop(c: &mut Criterion) {
    let mut group = c.benchmark_group("branch_hot_loop");
    for &iterations in &[100_i32, 1000] {
        let image = build_countdown_loop(iterations);
        bench_image(&mut group, BenchmarkId::from_parameter(iterations), image);
    }
    group.finish();
}

fn bench_call_overhead(c: &mut Criterion) {
    let mut group = c.benchmark_group("call_overhead");
    for &calls in &[10_u32, 100] {
        let image = build_call_chain(calls);
        bench_image(&mut group, BenchmarkId::from_parameter(calls), image);
    }
    group.finish();
}

criterion_group!(benches, bench_vm);
criterion_main!(benches);
