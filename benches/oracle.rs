// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Benchmarks for timestamp allocation.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use percolate::config::Config;
use percolate::coord::{Coordinator, MemoryCoordinator};
use percolate::oracle::{LocalConnector, OracleClient, OracleServer};
use std::sync::Arc;
use std::thread;

fn start_oracle() -> (OracleClient, Arc<OracleServer>) {
    let coordinator: Arc<dyn Coordinator> = Arc::new(MemoryCoordinator::new());
    let config = Config::default();
    let server = Arc::new(OracleServer::start("oracle-1", Arc::clone(&coordinator), &config).unwrap());
    let connector = Arc::new(LocalConnector::new());
    connector.register(Arc::clone(&server));
    let client = OracleClient::start(&config, coordinator, connector).unwrap();
    (client, server)
}

fn bench_server_allocate(c: &mut Criterion) {
    let (_client, server) = start_oracle();

    let mut group = c.benchmark_group("oracle");
    group.throughput(Throughput::Elements(1));
    group.bench_function("server_allocate", |b| {
        b.iter(|| black_box(server.get_timestamps("bench", 1).unwrap()))
    });
    group.finish();
}

fn bench_client_get_timestamp(c: &mut Criterion) {
    let (client, _server) = start_oracle();

    c.bench_function("oracle::get_timestamp", |b| {
        b.iter(|| black_box(client.get_timestamp().unwrap()))
    });
}

fn bench_client_concurrent(c: &mut Criterion) {
    let (client, _server) = start_oracle();
    let client = Arc::new(client);

    let mut group = c.benchmark_group("oracle");
    group.throughput(Throughput::Elements(8 * 100));
    // Concurrent callers share batches.
    group.bench_function("get_timestamp_8_threads", |b| {
        b.iter(|| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let client = Arc::clone(&client);
                    thread::spawn(move || {
                        for _ in 0..100 {
                            black_box(client.get_timestamp().unwrap());
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }
        })
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_server_allocate,
    bench_client_get_timestamp,
    bench_client_concurrent,
);
criterion_main!(benches);
