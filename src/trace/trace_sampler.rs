//! # TraceSampler
//!
//! Decides whether a locally rooted trace is kept, combining configured
//! rules, per-service rates fed back by the agent, and a token-bucket
//! limiter on rule-sampled traces.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::collector::CollectorResponse;
use crate::error::Error;
use crate::trace::limiter::Limiter;
use crate::trace::lock_or_poisoned;
use crate::trace::matcher::SpanMatcher;
use crate::trace::sampling::{
    priority, sample_with_rate, DecisionOrigin, Rate, SamplingDecision, SamplingMechanism,
};
use crate::trace::span::SpanData;

/// A trace sampling rule: a span pattern and the rate to apply when the
/// trace's local root matches it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TraceSamplingRule {
    /// Which local roots this rule applies to.
    #[serde(flatten)]
    pub matcher: SpanMatcher,
    /// Probability of keeping a matching trace.
    pub sample_rate: f64,
}

/// Configuration for [`TraceSampler`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TraceSamplerConfig {
    /// Rules examined in order; the first whose matcher accepts the local
    /// root applies.
    #[serde(default)]
    pub rules: Vec<TraceSamplingRule>,
    /// A global sample rate. Becomes a catch-all rule at the lowest
    /// precedence.
    #[serde(default)]
    pub sample_rate: Option<f64>,
    /// Budget for traces kept by rules, in traces per second.
    #[serde(default = "default_max_per_second")]
    pub max_per_second: f64,
}

fn default_max_per_second() -> f64 {
    200.0
}

impl Default for TraceSamplerConfig {
    fn default() -> Self {
        TraceSamplerConfig {
            rules: Vec::new(),
            sample_rate: None,
            max_per_second: default_max_per_second(),
        }
    }
}

struct Rule {
    matcher: SpanMatcher,
    rate: Rate,
}

struct Inner {
    rules: Vec<Rule>,
    limiter: Limiter,
    collector_default_sample_rate: Option<Rate>,
    collector_sample_rates: HashMap<String, Rate>,
}

/// The trace sampling engine. Shared between the tracer and the collector,
/// which delivers agent rate feedback to it.
pub struct TraceSampler {
    inner: Mutex<Inner>,
    limiter_max_per_second: f64,
    clock: Clock,
}

impl std::fmt::Debug for TraceSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceSampler")
            .field("limiter_max_per_second", &self.limiter_max_per_second)
            .finish_non_exhaustive()
    }
}

impl TraceSampler {
    /// Validate `config` and build the sampler.
    pub(crate) fn new(config: &TraceSamplerConfig, clock: Clock) -> Result<Self, Error> {
        let mut rules = Vec::with_capacity(config.rules.len() + 1);
        for rule in &config.rules {
            rules.push(Rule {
                matcher: rule.matcher.clone(),
                rate: Rate::try_from(rule.sample_rate)?,
            });
        }
        if let Some(sample_rate) = config.sample_rate {
            rules.push(Rule {
                matcher: SpanMatcher::default(),
                rate: Rate::try_from(sample_rate)?,
            });
        }
        if !(config.max_per_second > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "trace sampler max_per_second must be positive, but got {}",
                config.max_per_second
            )));
        }

        let now = clock().tick;
        Ok(TraceSampler {
            inner: Mutex::new(Inner {
                rules,
                limiter: Limiter::new(now, config.max_per_second),
                collector_default_sample_rate: None,
                collector_sample_rates: HashMap::new(),
            }),
            limiter_max_per_second: config.max_per_second,
            clock,
        })
    }

    /// Decide whether the trace rooted at `local_root` is kept.
    pub(crate) fn decide(&self, local_root: &SpanData) -> SamplingDecision {
        let now = (self.clock)().tick;
        let mut inner = lock_or_poisoned(&self.inner);
        let inner = &mut *inner;

        for rule in &inner.rules {
            if !rule.matcher.matches(local_root) {
                continue;
            }
            let mut decision = SamplingDecision {
                priority: priority::AUTO_DROP,
                mechanism: Some(SamplingMechanism::Rule),
                origin: DecisionOrigin::Local,
                configured_rate: Some(rule.rate.value()),
                limiter_effective_rate: None,
                limiter_max_per_second: None,
            };
            if sample_with_rate(local_root.trace_id.low, rule.rate) {
                let allowed = inner.limiter.allow(now);
                decision.limiter_effective_rate = Some(inner.limiter.effective_rate());
                decision.limiter_max_per_second = Some(self.limiter_max_per_second);
                if allowed {
                    decision.priority = priority::AUTO_KEEP;
                }
            }
            return decision;
        }

        let key = CollectorResponse::key(&local_root.service, local_root.environment());
        let (rate, mechanism) = match inner.collector_sample_rates.get(&key) {
            Some(rate) => (*rate, SamplingMechanism::AgentRate),
            None => match inner.collector_default_sample_rate {
                Some(rate) => (rate, SamplingMechanism::AgentRate),
                // No agent response yet.
                None => (Rate::ALWAYS, SamplingMechanism::Default),
            },
        };

        let keep = sample_with_rate(local_root.trace_id.low, rate);
        SamplingDecision {
            priority: if keep {
                priority::AUTO_KEEP
            } else {
                priority::AUTO_DROP
            },
            mechanism: Some(mechanism),
            origin: DecisionOrigin::Local,
            configured_rate: Some(rate.value()),
            limiter_effective_rate: None,
            limiter_max_per_second: None,
        }
    }

    /// Install per-service rates from an agent response. Invalid rates are
    /// logged and skipped.
    pub fn handle_collector_response(&self, response: &CollectorResponse) {
        let mut inner = lock_or_poisoned(&self.inner);
        for (key, value) in &response.sample_rates {
            let rate = match Rate::try_from(*value) {
                Ok(rate) => rate,
                Err(error) => {
                    tracing::warn!(%key, %error, "ignoring sample rate from agent response");
                    continue;
                }
            };
            if key == CollectorResponse::KEY_OF_DEFAULT_RATE {
                inner.collector_default_sample_rate = Some(rate);
            } else {
                inner.collector_sample_rates.insert(key.clone(), rate);
            }
        }
    }
}
