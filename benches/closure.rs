//! Benchmarks for reference-table operations and conflict resolution.
//!
//! Graphs are fabricated in memory (no filesystem probing) so the numbers
//! isolate the data-structure costs from I/O.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use refsolve::conflict::resolve_conflicts;
use refsolve::identity::AssemblyIdentity;
use refsolve::reference::{Reference, ReferenceTable};

/// A table of `libs` libraries, each requested at `versions` distinct
/// versions (so each library forms one conflict set).
fn conflicted_table(libs: usize, versions: usize) -> ReferenceTable {
    let mut table = ReferenceTable::new();
    for lib in 0..libs {
        let mut parents = Vec::new();
        for version in 0..versions {
            let identity: AssemblyIdentity =
                format!("Lib{lib}, Version={}.0.0.0", version + 1).parse().unwrap();
            let reference = Reference::new(identity, false);
            parents.push(table.insert(reference));
        }
        let dependency: AssemblyIdentity = format!("Shared{lib}").parse().unwrap();
        let mut shared = Reference::new(dependency.clone(), false);
        for parent in parents {
            shared.add_dependee(parent, dependency.clone());
        }
        table.insert(shared);
    }
    table
}

fn bench_table_inserts(c: &mut Criterion) {
    let mut group = c.benchmark_group("table_insert");
    for size in [100usize, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let mut table = ReferenceTable::new();
                for i in 0..size {
                    let identity: AssemblyIdentity =
                        format!("Lib{i}, Version=1.0.0.0").parse().unwrap();
                    table.insert(Reference::new(identity, false));
                }
                black_box(table.len())
            });
        });
    }
    group.finish();
}

fn bench_simple_lookup(c: &mut Criterion) {
    let table = conflicted_table(500, 2);
    let key: AssemblyIdentity = "Lib250, Version=1.0.0.0".parse().unwrap();
    c.bench_function("table_find_simple", |b| {
        b.iter(|| black_box(table.find_simple(&key.simple_key())));
    });
}

fn bench_conflict_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve_conflicts");
    for (libs, versions) in [(50usize, 2usize), (50, 5), (500, 2)] {
        let label = format!("{libs}x{versions}");
        group.bench_with_input(
            BenchmarkId::from_parameter(label),
            &(libs, versions),
            |b, &(libs, versions)| {
                b.iter_batched(
                    || conflicted_table(libs, versions),
                    |mut table| black_box(resolve_conflicts(&mut table)),
                    criterion::BatchSize::SmallInput,
                );
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_table_inserts,
    bench_simple_lookup,
    bench_conflict_resolution
);
criterion_main!(benches);
