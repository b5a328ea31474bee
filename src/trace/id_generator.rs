//! Id Generator

use std::cell::RefCell;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::{rngs, Rng, SeedableRng};

use crate::id::TraceId;

/// Interface for generating IDs.
pub trait IdGenerator: Send + Sync + fmt::Debug {
    /// Generate a new [`TraceId`].
    fn new_trace_id(&self) -> TraceId;

    /// Generate a new non-zero span ID.
    fn new_span_id(&self) -> u64;
}

/// Default [`IdGenerator`] implementation.
///
/// Span IDs and the low half of trace IDs are uniformly random. In 128-bit
/// mode the high half carries the unix time in seconds in its upper 32
/// bits, which is what the `_dd.p.tid` tag propagates.
#[derive(Clone, Debug)]
pub struct RandomIdGenerator {
    trace_id_128_bit: bool,
}

impl RandomIdGenerator {
    pub(crate) fn new(trace_id_128_bit: bool) -> Self {
        RandomIdGenerator { trace_id_128_bit }
    }
}

impl Default for RandomIdGenerator {
    fn default() -> Self {
        RandomIdGenerator::new(true)
    }
}

impl IdGenerator for RandomIdGenerator {
    fn new_trace_id(&self) -> TraceId {
        let low = self.new_span_id();
        if !self.trace_id_128_bit {
            return TraceId::from_u64(low);
        }
        let seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        TraceId::new(seconds << 32, low)
    }

    fn new_span_id(&self) -> u64 {
        CURRENT_RNG.with(|rng| {
            let mut rng = rng.borrow_mut();
            loop {
                let id = rng.gen::<u64>();
                if id != 0 {
                    return id;
                }
            }
        })
    }
}

thread_local! {
    /// Store random number generator for each thread
    static CURRENT_RNG: RefCell<rngs::SmallRng> = RefCell::new(rngs::SmallRng::from_entropy());
}
