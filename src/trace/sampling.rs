//! The sampling decision model.
//!
//! A decision classifies a trace (or an individual span) as kept or
//! dropped, and records which mechanism produced the classification so
//! that downstream services honor it.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Sampling priority values. Priorities are plain integers on the wire;
/// these are the buckets this library produces. Values greater than zero
/// mean "keep," everything else means "drop."
pub mod priority {
    /// The user explicitly dropped the trace.
    pub const USER_DROP: i32 = -1;
    /// Automatic sampling dropped the trace.
    pub const AUTO_DROP: i32 = 0;
    /// Automatic sampling kept the trace.
    pub const AUTO_KEEP: i32 = 1;
    /// The user explicitly kept the trace.
    pub const USER_KEEP: i32 = 2;
}

/// Which kind of rule or feedback produced a sampling decision. The
/// numeric values are wire-visible: they travel in the `_dd.p.dm` trace
/// tag and in span-sampling numeric tags.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum SamplingMechanism {
    /// No sampling configuration and no agent feedback yet.
    Default = 0,
    /// A per-service rate from the agent's response.
    AgentRate = 1,
    /// A rate pushed through remote configuration, automatic tier.
    RemoteAutoRate = 2,
    /// A locally configured trace sampling rule.
    Rule = 3,
    /// The application overrode the priority.
    Manual = 4,
    /// The application made the decision through app analytics.
    AppDecision = 5,
    /// A rate pushed through remote configuration, user tier.
    RemoteUserRate = 6,
    /// A span sampling rule rescued the span from a dropped trace.
    SpanRule = 8,
}

impl SamplingMechanism {
    /// The mechanism for a wire value, if it names one.
    pub fn from_value(value: i32) -> Option<SamplingMechanism> {
        use SamplingMechanism::*;
        match value {
            0 => Some(Default),
            1 => Some(AgentRate),
            2 => Some(RemoteAutoRate),
            3 => Some(Rule),
            4 => Some(Manual),
            5 => Some(AppDecision),
            6 => Some(RemoteUserRate),
            8 => Some(SpanRule),
            _ => None,
        }
    }

    /// The wire value.
    pub fn value(self) -> i32 {
        self as i32
    }
}

/// Whether a decision was made in this process or arrived with the
/// extracted trace context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecisionOrigin {
    /// Decided by this process.
    Local,
    /// Carried in on the inbound request.
    Extracted,
}

/// A trace sampling decision.
#[derive(Clone, Debug)]
pub struct SamplingDecision {
    /// See [`priority`].
    pub priority: i32,
    /// The mechanism that produced the decision. Extracted decisions only
    /// know their mechanism when the `_dd.p.dm` tag carried one.
    pub mechanism: Option<SamplingMechanism>,
    /// Who made the decision.
    pub origin: DecisionOrigin,
    /// The sample rate that was applied, for locally decided traces.
    pub configured_rate: Option<f64>,
    /// The effective rate of the trace sampling limiter, when it ran.
    pub limiter_effective_rate: Option<f64>,
    /// The limiter's configured maximum, when it ran.
    pub limiter_max_per_second: Option<f64>,
}

/// A sample rate, a probability in `[0.0, 1.0]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Rate(f64);

impl Rate {
    /// Keep every trace.
    pub const ALWAYS: Rate = Rate(1.0);

    /// The rate as a float.
    pub fn value(self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for Rate {
    type Error = Error;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        if (0.0..=1.0).contains(&value) {
            Ok(Rate(value))
        } else {
            Err(Error::InvalidRate(value))
        }
    }
}

impl From<Rate> for f64 {
    fn from(rate: Rate) -> f64 {
        rate.0
    }
}

/// Deterministic keep/drop for an ID against a rate: the Knuth
/// multiplicative hash of the ID is compared against the rate scaled to
/// the full 64-bit range, so every service holding the same ID and rate
/// agrees on the outcome.
pub(crate) fn sample_with_rate(id: u64, rate: Rate) -> bool {
    const KNUTH_FACTOR: u64 = 1111111111111111111;
    let max_allowed = (rate.value() * u64::MAX as f64) as u64;
    id.wrapping_mul(KNUTH_FACTOR) < max_allowed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mechanism_round_trips_wire_values() {
        for value in [0, 1, 2, 3, 4, 5, 6, 8] {
            let mechanism = SamplingMechanism::from_value(value).unwrap();
            assert_eq!(mechanism.value(), value);
        }
        assert_eq!(SamplingMechanism::from_value(7), None);
        assert_eq!(SamplingMechanism::from_value(-1), None);
    }

    #[test]
    fn rate_bounds_are_enforced() {
        assert!(Rate::try_from(0.0).is_ok());
        assert!(Rate::try_from(0.5).is_ok());
        assert!(Rate::try_from(1.0).is_ok());
        assert!(matches!(Rate::try_from(-0.1), Err(Error::InvalidRate(_))));
        assert!(matches!(Rate::try_from(1.1), Err(Error::InvalidRate(_))));
        assert!(Rate::try_from(f64::NAN).is_err());
    }

    #[test]
    fn sampling_is_deterministic_and_respects_extremes() {
        for id in [1u64, 42, u64::MAX, 0x123456789abcdef] {
            assert!(!sample_with_rate(id, Rate::try_from(0.0).unwrap()));
            assert_eq!(
                sample_with_rate(id, Rate::ALWAYS),
                sample_with_rate(id, Rate::ALWAYS)
            );
        }
        // Zero hashes to zero, which every positive rate keeps.
        assert!(sample_with_rate(0, Rate::try_from(0.001).unwrap()));
    }

    #[test]
    fn half_rate_keeps_roughly_half() {
        let rate = Rate::try_from(0.5).unwrap();
        let kept = (0..10_000u64).filter(|id| sample_with_rate(*id, rate)).count();
        assert!((4_000..6_000).contains(&kept), "kept {kept} of 10000");
    }
}
