//! The seam between finished trace segments and the agent.
//!
//! The core hands every finalized batch of spans to a [`Collector`] and
//! never looks back: delivery is at-most-once, and transport concerns
//! (HTTP, deadlines, retries) live entirely behind this trait.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Deserialize;

use crate::error::Error;
use crate::trace::{SpanData, TraceSampler};

/// Receives finished trace segments.
pub trait Collector: Send + Sync + fmt::Debug {
    /// Deliver a batch of spans that all belong to one trace segment.
    ///
    /// `response_handler` is where agent-provided sample rates from the
    /// response, if any, are delivered
    /// ([`TraceSampler::handle_collector_response`]).
    fn send(&self, spans: Vec<SpanData>, response_handler: &Arc<TraceSampler>)
        -> Result<(), Error>;
}

/// Sample rates returned by the agent in response to submitted traces,
/// keyed by service and environment.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CollectorResponse {
    /// `service:{service},env:{environment}` keys mapped to rates.
    #[serde(rename = "rate_by_service")]
    pub sample_rates: HashMap<String, f64>,
}

impl CollectorResponse {
    /// The key whose rate applies to services without an entry of their
    /// own.
    pub const KEY_OF_DEFAULT_RATE: &'static str = "service:,env:";

    /// The lookup key for a service in an environment.
    pub fn key(service: &str, environment: &str) -> String {
        format!("service:{service},env:{environment}")
    }
}

/// A collector that stores every batch in memory, for tests and local
/// debugging. Cloning yields a handle onto the same storage.
#[derive(Clone, Debug, Default)]
pub struct InMemoryCollector {
    spans: Arc<Mutex<Vec<SpanData>>>,
    send_count: Arc<AtomicUsize>,
    response: Option<CollectorResponse>,
}

impl InMemoryCollector {
    /// Create an empty collector.
    pub fn new() -> Self {
        InMemoryCollector::default()
    }

    /// Deliver `response` to the trace sampler after every send, as the
    /// agent would.
    pub fn with_response(mut self, response: CollectorResponse) -> Self {
        self.response = Some(response);
        self
    }

    /// All spans received so far, across batches.
    pub fn sent_spans(&self) -> Vec<SpanData> {
        self.spans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// How many times `send` was invoked.
    pub fn send_count(&self) -> usize {
        self.send_count.load(Ordering::SeqCst)
    }
}

impl Collector for InMemoryCollector {
    fn send(
        &self,
        mut spans: Vec<SpanData>,
        response_handler: &Arc<TraceSampler>,
    ) -> Result<(), Error> {
        self.send_count.fetch_add(1, Ordering::SeqCst);
        self.spans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .append(&mut spans);
        if let Some(response) = &self.response {
            response_handler.handle_collector_response(response);
        }
        Ok(())
    }
}
