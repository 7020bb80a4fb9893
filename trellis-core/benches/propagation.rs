//! Propagation Benchmarks
//!
//! Measures release passes over common graph shapes: a deep chain, a wide
//! fan-out and a diamond mesh.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::rc::Rc;
use trellis_core::{Cell, ChangeEvent, Runtime};

fn observe(cell: &Cell<u64>) {
    cell.on_change(Rc::new(|event: &ChangeEvent<u64>| {
        black_box(event.value);
    }));
}

/// `depth` computed cells, each reading the previous one.
fn chain(runtime: &Runtime, depth: usize) -> (Cell<u64>, Cell<u64>) {
    let source = Cell::new_in(runtime, 0u64);
    let mut tail = source.clone();
    for _ in 0..depth {
        let previous = tail.clone();
        tail = Cell::computed_in(runtime, move || previous.read() + 1);
    }
    observe(&tail);
    (source, tail)
}

/// `width` computed cells reading one source.
fn fan_out(runtime: &Runtime, width: usize) -> (Cell<u64>, Vec<Cell<u64>>) {
    let source = Cell::new_in(runtime, 0u64);
    let leaves = (0..width as u64)
        .map(|offset| {
            let source = source.clone();
            let leaf = Cell::computed_in(runtime, move || source.read() + offset);
            observe(&leaf);
            leaf
        })
        .collect();
    (source, leaves)
}

/// Layers of `width` cells where every cell reads two cells of the layer
/// below, so each cell is reachable along many paths.
fn mesh(runtime: &Runtime, layers: usize, width: usize) -> (Cell<u64>, Cell<u64>) {
    let source = Cell::new_in(runtime, 0u64);
    let mut layer: Vec<Cell<u64>> = vec![source.clone(); width];
    for _ in 0..layers {
        layer = (0..width)
            .map(|i| {
                let left = layer[i].clone();
                let right = layer[(i + 1) % width].clone();
                Cell::computed_in(runtime, move || left.read().wrapping_add(right.read()))
            })
            .collect();
    }
    let top = {
        let layer = layer.clone();
        Cell::computed_in(runtime, move || {
            layer.iter().fold(0u64, |sum, cell| sum.wrapping_add(cell.read()))
        })
    };
    observe(&top);
    (source, top)
}

fn bench_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain");
    for depth in [10, 100, 250] {
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            let runtime = Runtime::new();
            let (source, tail) = chain(&runtime, depth);
            let mut next = 0u64;
            b.iter(|| {
                next += 1;
                source.write(next).ok();
                runtime.end_turn();
                black_box(tail.read())
            });
        });
    }
    group.finish();
}

fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");
    for width in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, &width| {
            let runtime = Runtime::new();
            let (source, leaves) = fan_out(&runtime, width);
            let mut next = 0u64;
            b.iter(|| {
                next += 1;
                source.write(next).ok();
                runtime.end_turn();
                black_box(leaves.len())
            });
        });
    }
    group.finish();
}

fn bench_mesh(c: &mut Criterion) {
    let mut group = c.benchmark_group("mesh");
    for layers in [4, 16] {
        group.bench_with_input(BenchmarkId::from_parameter(layers), &layers, |b, &layers| {
            let runtime = Runtime::new();
            let (source, top) = mesh(&runtime, layers, 8);
            let mut next = 0u64;
            b.iter(|| {
                next += 1;
                source.write(next).ok();
                runtime.end_turn();
                black_box(top.read())
            });
        });
    }
    group.finish();
}

/// Batching: many writes in one turn, one release.
fn bench_batched_writes(c: &mut Criterion) {
    c.bench_function("batched_writes", |b| {
        let runtime = Runtime::new();
        let inputs: Vec<Cell<u64>> = (0..100).map(|_| Cell::new_in(&runtime, 0u64)).collect();
        let total = {
            let inputs = inputs.clone();
            Cell::computed_in(&runtime, move || inputs.iter().map(Cell::read).sum::<u64>())
        };
        observe(&total);
        let mut next = 0u64;
        b.iter(|| {
            next += 1;
            for input in &inputs {
                input.write(next).ok();
            }
            runtime.end_turn();
            black_box(total.read())
        });
    });
}

criterion_group!(
    benches,
    bench_chain,
    bench_fan_out,
    bench_mesh,
    bench_batched_writes
);
criterion_main!(benches);
