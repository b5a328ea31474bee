//! Helpers shared by the integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use datadog_tracing::collector::InMemoryCollector;
use datadog_tracing::id::TraceId;
use datadog_tracing::trace::{IdGenerator, Tracer, TracerBuilder};

/// Hands out 1, 2, 3, ... so tests can predict span IDs.
#[derive(Debug, Default)]
pub struct SequentialIdGenerator {
    next: AtomicU64,
}

impl IdGenerator for SequentialIdGenerator {
    fn new_trace_id(&self) -> TraceId {
        TraceId::from_u64(self.new_span_id())
    }

    fn new_span_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// A tracer builder wired with an in-memory collector and deterministic
/// IDs, plus the collector to observe what it sends.
pub fn test_tracer_builder() -> (TracerBuilder, InMemoryCollector) {
    let collector = InMemoryCollector::new();
    let builder = Tracer::builder()
        .with_service("test-service")
        .with_collector(Arc::new(collector.clone()))
        .with_id_generator(Arc::new(SequentialIdGenerator::default()));
    (builder, collector)
}

pub fn headers(pairs: &[(&str, &str)]) -> std::collections::HashMap<String, String> {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}
