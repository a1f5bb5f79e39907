//! Bag write/read benchmarks
//!
//! - `bag_write`: messages/second through [`BagWriter`], per compression
//! - `bag_read`: open + read every chunk from memory through the cache
//! - `chunk_decode`: message extraction from one decompressed chunk
//!
//! ```bash
//! cargo bench -p baghouse-storage --bench bag_bench
//! cargo bench -p baghouse-storage -- --save-baseline main
//! ```

use baghouse_core::{CodecRegistry, Compression, Time};
use baghouse_storage::{BagReader, BagWriter, CacheConfig, CachedFilelike, MemoryReader};
use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::collections::BTreeSet;
use std::sync::Arc;

const COMPRESSIONS: [Compression; 3] = [Compression::None, Compression::Lz4, Compression::Bz2];

fn build_bag(messages: u32, compression: Compression) -> Bytes {
    let mut writer = BagWriter::new().with_compression(compression);
    let conn = writer.add_connection("/bench", "std_msgs/String", "992ce8a1", "string data\n");
    let payload = vec![b'x'; 512];
    for i in 0..messages {
        writer
            .write_message(conn, Time::new(1_000 + i / 100, (i % 100) * 10_000_000), &payload)
            .unwrap();
    }
    writer.finish().unwrap()
}

fn bench_bag_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("bag_write");

    for count in [1_000u32, 10_000] {
        for compression in COMPRESSIONS {
            group.throughput(Throughput::Elements(count as u64));
            group.bench_with_input(
                BenchmarkId::new(compression.as_str(), count),
                &count,
                |b, &count| b.iter(|| black_box(build_bag(count, compression))),
            );
        }
    }

    group.finish();
}

fn bench_bag_read(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("bag_read");
    let codecs = CodecRegistry::shared();

    for compression in COMPRESSIONS {
        let bag = build_bag(10_000, compression);
        group.throughput(Throughput::Bytes(bag.len() as u64));
        group.bench_with_input(
            BenchmarkId::new(compression.as_str(), bag.len()),
            &bag,
            |b, bag| {
                b.iter(|| {
                    runtime.block_on(async {
                        let cache = CachedFilelike::new(
                            Arc::new(MemoryReader::new(bag.clone())),
                            CacheConfig::default(),
                        );
                        let reader = BagReader::open(cache.clone(), codecs.clone()).await.unwrap();
                        for info in reader.chunk_infos() {
                            black_box(reader.read_chunk(info).await.unwrap());
                        }
                        cache.close().await;
                    })
                });
            },
        );
    }

    group.finish();
}

fn bench_chunk_decode(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let bag = build_bag(1_000, Compression::None);
    let chunk = runtime.block_on(async {
        let cache = CachedFilelike::new(Arc::new(MemoryReader::new(bag)), CacheConfig::default());
        let reader = BagReader::open(cache, CodecRegistry::shared()).await.unwrap();
        reader.read_chunk(&reader.chunk_infos()[0]).await.unwrap()
    });
    let conns = BTreeSet::from([0]);

    let mut group = c.benchmark_group("chunk_decode");
    group.throughput(Throughput::Bytes(chunk.len() as u64));
    group.bench_function("all_messages", |b| {
        b.iter(|| {
            black_box(
                BagReader::read_messages(chunk.clone(), &conns, Time::MIN, Time::MAX).unwrap(),
            )
        })
    });
    group.finish();
}

criterion_group!(benches, bench_bag_write, bench_bag_read, bench_chunk_decode);
criterion_main!(benches);
