//! Delta encode/apply throughput on synthetic buffers shaped like
//! neighboring file revisions: long shared runs separated by small edits.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use gitstore::{apply, diff};

fn revision_pair(len: usize) -> (Vec<u8>, Vec<u8>) {
    let base: Vec<u8> = (0..len as u32)
        .map(|i| (i.wrapping_mul(2654435761) >> 24) as u8)
        .collect();

    // Edit every ~4 KiB: overwrite a short span and splice a few bytes.
    let mut target = base.clone();
    let mut at = 512;
    while at + 64 < target.len() {
        for byte in &mut target[at..at + 16] {
            *byte = byte.wrapping_add(1);
        }
        target.splice(at + 32..at + 32, [0xAA, 0xBB, 0xCC].iter().copied());
        at += 4096;
    }
    (base, target)
}

fn bench_delta(c: &mut Criterion) {
    let (base, target) = revision_pair(256 * 1024);

    let mut group = c.benchmark_group("delta");
    group.throughput(Throughput::Bytes(target.len() as u64));

    group.bench_function("diff_256k", |b| {
        b.iter(|| diff(black_box(&base), black_box(&target)))
    });

    let delta = diff(&base, &target);
    group.bench_function("apply_256k", |b| {
        b.iter(|| apply(black_box(&base), black_box(&delta), target.len()).unwrap())
    });

    group.bench_function("round_trip_256k", |b| {
        b.iter(|| {
            let delta = diff(black_box(&base), black_box(&target));
            apply(&base, &delta, target.len()).unwrap()
        })
    });

    group.finish();
}

criterion_group!(benches, bench_delta);
criterion_main!(benches);
