//! # datadog-tracing
//!
//! A client library that instruments an application to produce distributed
//! traces for a local Datadog agent. Applications create [`Span`]s
//! describing units of work; spans compose into traces that cross process
//! boundaries through context propagation on request and response headers.
//! Finished spans are batched per trace segment and handed to a
//! [`Collector`](collector::Collector).
//!
//! ```no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! use datadog_tracing::collector::InMemoryCollector;
//! use datadog_tracing::trace::{SpanConfig, Tracer};
//!
//! # fn main() -> Result<(), datadog_tracing::Error> {
//! let tracer = Tracer::builder()
//!     .with_service("checkout")
//!     .with_environment("prod")
//!     .with_collector(Arc::new(InMemoryCollector::new()))
//!     .build()?;
//!
//! // Continue the trace from inbound headers, or start a new one.
//! let request_headers: HashMap<String, String> = HashMap::new();
//! let root = tracer
//!     .extract_or_create_span(&request_headers, SpanConfig::with_name("http.request"))?;
//!
//! let child = root.create_child(SpanConfig::with_name("db.query"));
//! child.set_tag("db.statement", "SELECT 1");
//!
//! // Propagate to a downstream service.
//! let mut outbound_headers = HashMap::new();
//! child.inject(&mut outbound_headers);
//! # Ok(())
//! # }
//! ```
//!
//! The wire formats understood on both sides of the boundary are Datadog's
//! `x-datadog-*` headers, B3 multi-header, and W3C Trace Context; see
//! [`propagation`]. Keep/drop decisions combine configured rules, agent
//! rate feedback and a token-bucket limiter; see
//! [`trace::TraceSamplerConfig`] and [`trace::SpanSamplerConfig`].

#![warn(missing_docs)]

pub mod clock;
pub mod collector;
pub mod error;
mod glob;
pub mod id;
pub mod propagation;
pub mod tags;
pub mod trace;

pub use error::{Error, Result};
pub use id::TraceId;
pub use trace::{Span, SpanConfig, Tracer};
