use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use qesydb::clause::{batch_insert_clause, update_clause, where_clause};
use qesydb::{Binder, Condition, QueryState, Record};

/// `n` inferred-operator predicates: col0=$1 AND col1 >$2 ...
fn flat_condition(n: usize) -> Condition {
    Condition::from_map((0..n).map(|i| {
        let key = if i % 2 == 0 {
            format!("col{i}")
        } else {
            format!("col{i} >")
        };
        (key, i as i64)
    }))
}

fn bench_where(c: &mut Criterion) {
    let mut group = c.benchmark_group("clause/where");

    for n in [1, 5, 10, 50, 100] {
        let cond = flat_condition(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &cond, |b, cond| {
            b.iter(|| {
                let mut binder = Binder::new();
                black_box(where_clause(cond, &mut binder));
            });
        });
    }

    group.finish();
}

fn bench_in_list(c: &mut Criterion) {
    let mut group = c.benchmark_group("clause/in_list");

    for n in [5, 20, 100, 500] {
        let ids: Vec<i64> = (0..n).collect();
        let cond = Condition::from_typed([("id", ids)]);
        group.bench_with_input(BenchmarkId::from_parameter(n), &cond, |b, cond| {
            b.iter(|| {
                let mut binder = Binder::new();
                black_box(where_clause(cond, &mut binder));
            });
        });
    }

    group.finish();
}

fn bench_batch_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("clause/batch_insert");

    for rows in [1, 10, 100, 1000] {
        let records: Vec<Record> = (0..rows)
            .map(|i| {
                Record::new()
                    .with("id", i as i64)
                    .with("name", format!("user{i}"))
                    .with("score", i as f64 * 0.5)
            })
            .collect();
        group.bench_with_input(BenchmarkId::from_parameter(rows), &records, |b, records| {
            b.iter(|| {
                let mut binder = Binder::new();
                black_box(batch_insert_clause(records, &mut binder).ok());
            });
        });
    }

    group.finish();
}

fn bench_update_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("clause/update_plan");

    for n in [1, 5, 20] {
        let mut update = Record::new();
        for i in 0..n {
            update.set(format!("col{i}"), format!("v{i}"));
        }
        let state = QueryState {
            table: "t".to_string(),
            condition: flat_condition(n),
            update,
            ..QueryState::default()
        };
        group.bench_with_input(BenchmarkId::from_parameter(n), &state, |b, state| {
            b.iter(|| {
                let mut binder = Binder::new();
                black_box(update_clause(&state.update, &mut binder).ok());
                black_box(state.update_plan().ok());
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_where,
    bench_in_list,
    bench_batch_insert,
    bench_update_plan
);
criterion_main!(benches);
