//! Benchmarks for histogram filling and chunk processing.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use eventflow::core::ObjectCollection;
use eventflow::histogram::{fill_histogram, Axis, Hist};
use eventflow::prelude::*;
use eventflow::testing::{scenario_batch, scenario_chunk, tutorial_analysis};

fn jets_batch(n_events: usize) -> EventBatch {
    let counts: Vec<usize> = (0..n_events).map(|i| i % 5).collect();
    let n_objects: usize = counts.iter().sum();
    let pt = (0..n_objects).map(|i| 20.0 + (i % 180) as f64).collect();
    let jets = ObjectCollection::from_counts(&counts).with_field("pt", pt).unwrap();
    EventBatch::new(n_events).with_collection("Jet", jets).unwrap()
}

fn fill_benchmark(c: &mut Criterion) {
    let batch = jets_batch(100_000);
    let axes = vec![Axis::regular("Jet", "pt", 50, 0.0, 200.0)];
    let mask = Mask::all(batch.n_events());
    let weights = vec![1.5; batch.n_events()];

    c.bench_function("fill_jet_pt_100k_events", |b| {
        b.iter(|| {
            let mut hist = Hist::new(vec![axes[0].binning().unwrap()]);
            fill_histogram(&mut hist, black_box(&batch), &axes, &mask, Some(weights.as_slice())).unwrap();
            black_box(hist.total())
        })
    });
}

fn process_benchmark(c: &mut Criterion) {
    let analysis = tutorial_analysis().unwrap();
    let batch = scenario_batch().unwrap();
    let chunk = scenario_chunk("a.root", 0, 10);

    c.bench_function("process_tutorial_chunk", |b| {
        b.iter(|| black_box(analysis.process_chunk(&chunk, black_box(&batch)).unwrap()))
    });
}

criterion_group!(benches, fill_benchmark, process_benchmark);
criterion_main!(benches);
