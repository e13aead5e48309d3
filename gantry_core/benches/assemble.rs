use std::time::{Duration, Instant};

use chrono::Utc;
use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use gantry_core::mocks::{MemLogFile, ScriptedPort};
use gantry_core::{
    LogTarget, ReadMode, RecordAssembler, RowFormat, SensorPort, SensorValue, Timestamp,
};

fn ports(n: usize) -> Vec<Box<dyn SensorPort>> {
    (0..n)
        .map(|i| {
            Box::new(ScriptedPort::constant(
                format!("S{i}"),
                SensorValue::Number(i as f64 * 1.5),
            )) as Box<dyn SensorPort>
        })
        .collect()
}

pub fn bench_assemble(c: &mut Criterion) {
    let mut g = c.benchmark_group("assemble");
    if let Ok(ss) = std::env::var("BENCH_SAMPLE_SIZE") {
        if let Ok(n) = ss.parse::<usize>() {
            g.sample_size(n.max(10));
        }
    } else {
        g.sample_size(50);
    }

    for n in [6usize, 24] {
        let mut asm =
            RecordAssembler::new(ports(n), ReadMode::Sequential, Duration::from_millis(5));
        let _ = asm.open();
        let mut seq = 0u64;
        g.bench_function(format!("sequential_{n}"), |b| {
            b.iter(|| {
                seq += 1;
                black_box(asm.assemble(seq, Timestamp::new(Instant::now(), Utc::now())))
            });
        });
    }
    g.finish();
}

pub fn bench_encode(c: &mut Criterion) {
    let mut g = c.benchmark_group("encode");
    g.sample_size(50);
    let ids: Vec<String> = (0..6).map(|i| format!("S{i}")).collect();
    let mut asm = RecordAssembler::new(ports(6), ReadMode::Sequential, Duration::from_millis(5));
    let _ = asm.open();
    let record = asm
        .assemble(1, Timestamp::new(Instant::now(), Utc::now()))
        .record;
    g.bench_function("tick_rows", |b| {
        b.iter_batched(
            || {
                LogTarget::Writers {
                    sensor: Box::new(MemLogFile::new()),
                    image: Box::new(MemLogFile::new()),
                }
                .open(&ids, RowFormat::default())
            },
            |logs| match logs {
                Ok(logs) => {
                    let _ = black_box(logs.encode(&record));
                }
                Err(e) => panic!("open failed: {e}"),
            },
            BatchSize::SmallInput,
        );
    });
    g.finish();
}

criterion_group!(benches, bench_assemble, bench_encode);
criterion_main!(benches);
