use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use eavql::{Context, Define, parse};

const SIMPLE: &str = "SELECT value FROM fun";
const WIDE: &str = "SELECT value, num, str, multi, created FROM fun \
    WHERE num >= @low AND num < @high AND str like @pattern \
    ORDER BY num DESC, value LIMIT 50";

pub fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("parse simple", |b| b.iter(|| parse(black_box(SIMPLE))));
    c.bench_function("parse wide", |b| b.iter(|| parse(black_box(WIDE))));

    let runtime = tokio::runtime::Runtime::new().unwrap();
    let ctx = runtime.block_on(async {
        let ctx = Context::open_in_memory().await.unwrap();
        for i in 0..1000 {
            ctx.define(
                &Define::new("fun", format!("item {i}"))
                    .set("num", i)
                    .set("str", format!("text {}", i % 17))
                    .set("multi", "blet\nmonkey"),
            )
            .await
            .unwrap();
        }
        ctx
    });
    let mut wide = parse(WIDE).unwrap();
    wide.add_param("@low", 100);
    wide.add_param("@high", 900);
    wide.add_param("@pattern", "text 1%");

    c.bench_function("generate wide", |b| {
        b.iter(|| runtime.block_on(ctx.generate_sql(black_box(&wide))))
    });
    c.bench_function("exec wide 1k", |b| {
        b.iter(|| runtime.block_on(ctx.exec_select(black_box(&wide))))
    });
    c.bench_function("define 1 attribute", |b| {
        let upsert = Define::new("fun", "item 1").set("num", 1);
        b.iter(|| runtime.block_on(ctx.define(black_box(&upsert))))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
