//! # Trace lifecycle
//!
//! The trace side of the crate: spans, the per-process [`TraceSegment`]
//! that owns them, the sampling engines, and the [`Tracer`] that ties them
//! together.

use std::sync::{Mutex, MutexGuard, PoisonError};

mod id_generator;
mod limiter;
mod matcher;
mod sampling;
mod segment;
mod span;
mod span_sampler;
mod trace_sampler;
mod tracer;

pub use id_generator::{IdGenerator, RandomIdGenerator};
pub use matcher::SpanMatcher;
pub use sampling::{priority, DecisionOrigin, Rate, SamplingDecision, SamplingMechanism};
pub use segment::TraceSegment;
pub use span::{Span, SpanConfig, SpanData, SpanDefaults};
pub use span_sampler::{SpanSampler, SpanSamplerConfig, SpanSamplingRule};
pub use trace_sampler::{TraceSampler, TraceSamplerConfig, TraceSamplingRule};
pub use tracer::{Tracer, TracerBuilder};

/// Locking never fails here; a poisoned mutex just means another thread
/// panicked mid-update, and the tag maps and counters it guards stay
/// usable.
pub(crate) fn lock_or_poisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
