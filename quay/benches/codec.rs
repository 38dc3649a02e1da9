//! Benchmarks for the message codec using criterion.
//!
//! These benchmarks measure the performance of:
//! - Encoding a message into its tag and JSON document
//! - Strict decoding, including the extra-field check

#![allow(missing_docs)]

use std::collections::BTreeMap;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use quay::{Message, MessageRegistry, MessageType};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Small {
    id: String,
}

impl MessageType for Small {
    const NAME: &'static str = "Small";
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Large {
    id: String,
    content: String,
    tags: Vec<String>,
    metadata: BTreeMap<String, String>,
}

impl MessageType for Large {
    const NAME: &'static str = "Large";
}

#[derive(Clone, Debug)]
enum BenchMessage {
    Small(Small),
    Large(Large),
}

impl From<Small> for BenchMessage {
    fn from(value: Small) -> Self {
        BenchMessage::Small(value)
    }
}

impl From<Large> for BenchMessage {
    fn from(value: Large) -> Self {
        BenchMessage::Large(value)
    }
}

impl Message for BenchMessage {
    fn message_type(&self) -> &'static str {
        match self {
            BenchMessage::Small(_) => Small::NAME,
            BenchMessage::Large(_) => Large::NAME,
        }
    }

    fn to_document(&self) -> serde_json::Result<Value> {
        match self {
            BenchMessage::Small(m) => serde_json::to_value(m),
            BenchMessage::Large(m) => serde_json::to_value(m),
        }
    }
}

fn registry() -> MessageRegistry<BenchMessage> {
    MessageRegistry::new().register::<Small>().register::<Large>()
}

fn small() -> BenchMessage {
    BenchMessage::Small(Small {
        id: "job-1".to_string(),
    })
}

fn large() -> BenchMessage {
    BenchMessage::Large(Large {
        id: "job-2".to_string(),
        content: "x".repeat(4096),
        tags: (0..32).map(|i| format!("tag-{i}")).collect(),
        metadata: (0..32)
            .map(|i| (format!("key-{i}"), format!("value-{i}")))
            .collect(),
    })
}

fn bench_encode(c: &mut Criterion) {
    let registry = registry();
    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Elements(1));

    for (name, message) in [("small", small()), ("large", large())] {
        group.bench_function(name, |b| {
            b.iter(|| registry.encode(black_box(&message)).expect("encode"));
        });
    }

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let registry = registry();
    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Elements(1));

    for (name, message) in [("small", small()), ("large", large())] {
        let (tag, document) = registry.encode(&message).expect("encode");
        group.bench_function(name, |b| {
            b.iter(|| {
                registry
                    .decode(black_box(tag), black_box(document.clone()))
                    .expect("decode")
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
