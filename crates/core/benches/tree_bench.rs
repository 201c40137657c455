//! Performance benchmarks for rcfg-core

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rcfg_core::{parse, Diff, Tree};

/// A tree with `n` ethernet interfaces, each with a few leaves
fn build_tree(n: usize, offset: usize) -> Tree {
    let mut text = String::from("interfaces {\n");
    for i in 0..n {
        text.push_str(&format!(
            "    ethernet eth{} {{\n        address 10.{}.{}.1/24\n        description \"uplink port\"\n        mtu 1500\n    }}\n",
            i,
            (i + offset) / 256 % 256,
            (i + offset) % 256
        ));
    }
    text.push_str("}\n");
    parse(&text).unwrap_or_default()
}

fn bench_parse_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("text");
    for size in [10usize, 1_000] {
        let text = build_tree(size, 0).to_string();
        group.bench_with_input(BenchmarkId::new("parse", size), &text, |b, text| {
            b.iter(|| parse(black_box(text)))
        });
        let tree = build_tree(size, 0);
        group.bench_with_input(BenchmarkId::new("render", size), &tree, |b, tree| {
            b.iter(|| black_box(tree).to_string())
        });
        group.bench_with_input(BenchmarkId::new("json", size), &tree, |b, tree| {
            b.iter(|| black_box(tree).to_json())
        });
    }
    group.finish();
}

fn bench_diff(c: &mut Criterion) {
    let mut group = c.benchmark_group("diff");
    // the widest case is a single tag node with 10k instances
    for size in [10usize, 1_000, 10_000] {
        let a = build_tree(size, 0);
        let b = build_tree(size, 1);
        group.bench_with_input(BenchmarkId::new("trees", size), &(a.clone(), b.clone()), |bench, (a, b)| {
            bench.iter(|| Diff::new(black_box(a), black_box(b)))
        });
        let diff = Diff::new(&a, &b);
        group.bench_with_input(BenchmarkId::new("commands", size), &diff, |bench, diff| {
            bench.iter(|| black_box(diff).commands())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_parse_render, bench_diff);
criterion_main!(benches);
