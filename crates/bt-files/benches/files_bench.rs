//! Chunk store benchmarks

use bt_files::CHUNK_SIZE;
use bt_files::chunker::{chunk_hash, file_hash, read_chunk, write_chunk};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rand::RngCore;
use std::hint::black_box;
use std::io::Write;
use tempfile::NamedTempFile;

fn random_file(len: usize) -> NamedTempFile {
    let mut data = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut data);
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(&data).unwrap();
    file.flush().unwrap();
    file
}

fn bench_chunk_hash(c: &mut Criterion) {
    let data = vec![0x5Au8; CHUNK_SIZE];
    let mut group = c.benchmark_group("chunk_hash");
    group.throughput(Throughput::Bytes(CHUNK_SIZE as u64));
    group.bench_function("512KiB", |b| b.iter(|| chunk_hash(black_box(&data))));
    group.finish();
}

fn bench_file_hash(c: &mut Criterion) {
    let mut group = c.benchmark_group("file_hash");
    for size in [CHUNK_SIZE, 16 * CHUNK_SIZE] {
        let file = random_file(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &file, |b, file| {
            b.iter(|| file_hash(file.path()).unwrap());
        });
    }
    group.finish();
}

fn bench_chunk_io(c: &mut Criterion) {
    let source = random_file(8 * CHUNK_SIZE);
    let reader = source.reopen().unwrap();
    let sink = NamedTempFile::new().unwrap();
    let writer = sink.reopen().unwrap();
    writer.set_len(8 * CHUNK_SIZE as u64).unwrap();

    let mut group = c.benchmark_group("chunk_io");
    group.throughput(Throughput::Bytes(CHUNK_SIZE as u64));
    group.bench_function("read_chunk", |b| {
        let mut index = 0u64;
        b.iter(|| {
            let data = read_chunk(&reader, index % 8, CHUNK_SIZE).unwrap();
            index += 1;
            black_box(data)
        });
    });
    let payload = vec![0xA5u8; CHUNK_SIZE];
    group.bench_function("write_chunk", |b| {
        let mut index = 0u64;
        b.iter(|| {
            write_chunk(&writer, index % 8, CHUNK_SIZE, &payload).unwrap();
            index += 1;
        });
    });
    group.finish();
}

criterion_group!(benches, bench_chunk_hash, bench_file_hash, bench_chunk_io);
criterion_main!(benches);
