//! # SpanSampler
//!
//! Rescues individual spans out of traces the trace sampler dropped. Each
//! rule carries its own rate and an optional per-second limit; spans kept
//! this way are tagged so the agent forwards them despite the dropped
//! trace.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::Error;
use crate::trace::limiter::Limiter;
use crate::trace::lock_or_poisoned;
use crate::trace::matcher::SpanMatcher;
use crate::trace::sampling::{sample_with_rate, Rate};
use crate::trace::span::SpanData;

/// A span sampling rule.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SpanSamplingRule {
    /// Which spans this rule applies to.
    #[serde(flatten)]
    pub matcher: SpanMatcher,
    /// Probability of keeping a matching span.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,
    /// Budget in spans per second; unlimited when absent.
    #[serde(default)]
    pub max_per_second: Option<f64>,
}

fn default_sample_rate() -> f64 {
    1.0
}

/// Configuration for [`SpanSampler`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SpanSamplerConfig {
    /// Rules examined in order; the first whose matcher accepts the span
    /// decides its fate.
    #[serde(default)]
    pub rules: Vec<SpanSamplingRule>,
}

/// What a span sampling rule decided about one span, for the
/// `_dd.span_sampling.*` numeric tags.
#[derive(Clone, Copy, Debug)]
pub(crate) struct SpanSamplingDecision {
    pub(crate) rule_rate: f64,
    pub(crate) max_per_second: Option<f64>,
}

struct Rule {
    matcher: SpanMatcher,
    rate: Rate,
    max_per_second: Option<f64>,
    limiter: Option<Mutex<Limiter>>,
}

/// The span sampling engine. Consulted only for traces that are being
/// dropped.
pub struct SpanSampler {
    rules: Vec<Rule>,
    clock: Clock,
}

impl std::fmt::Debug for SpanSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpanSampler")
            .field("rules", &self.rules.len())
            .finish_non_exhaustive()
    }
}

impl SpanSampler {
    /// Validate `config` and build the sampler.
    pub(crate) fn new(config: &SpanSamplerConfig, clock: Clock) -> Result<Self, Error> {
        let now = clock().tick;
        let mut rules = Vec::with_capacity(config.rules.len());
        for rule in &config.rules {
            if let Some(max_per_second) = rule.max_per_second {
                if !(max_per_second > 0.0) {
                    return Err(Error::InvalidConfig(format!(
                        "span sampling max_per_second must be positive, but got {max_per_second}"
                    )));
                }
            }
            rules.push(Rule {
                matcher: rule.matcher.clone(),
                rate: Rate::try_from(rule.sample_rate)?,
                max_per_second: rule.max_per_second,
                limiter: rule
                    .max_per_second
                    .map(|max| Mutex::new(Limiter::new(now, max))),
            });
        }
        Ok(SpanSampler { rules, clock })
    }

    /// Whether `span` should be kept despite its trace being dropped. The
    /// first matching rule decides; its rate and limiter both have to
    /// accept.
    pub(crate) fn decide(&self, span: &SpanData) -> Option<SpanSamplingDecision> {
        let rule = self.rules.iter().find(|rule| rule.matcher.matches(span))?;

        if !sample_with_rate(span.trace_id.low, rule.rate) {
            return None;
        }
        if let Some(limiter) = &rule.limiter {
            if !lock_or_poisoned(limiter).allow((self.clock)().tick) {
                return None;
            }
        }
        Some(SpanSamplingDecision {
            rule_rate: rule.rate.value(),
            max_per_second: rule.max_per_second,
        })
    }
}
