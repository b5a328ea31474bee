//! # TraceSegment
//!
//! A `TraceSegment` owns the portion of one trace that lives in this
//! process: the spans created here, the trace's sampling decision, and the
//! `_dd.p.*` trace tags that propagate with it. Every live [`Span`] handle
//! shares ownership of its segment; whichever thread finishes the last
//! span runs finalization and hands the batch to the collector, after
//! which the segment is inert.
//!
//! [`Span`]: crate::trace::Span

use std::sync::{Arc, Mutex, PoisonError};

use crate::collector::Collector;
use crate::id::{hex_padded, TraceId};
use crate::propagation::{tag_codec, InjectionSnapshot, Injector, PropagationStyle, TraceTags};
use crate::tags;
use crate::trace::lock_or_poisoned;
use crate::trace::sampling::{priority, DecisionOrigin, SamplingDecision, SamplingMechanism};
use crate::trace::span::{SpanData, SpanDefaults};
use crate::trace::span_sampler::SpanSampler;
use crate::trace::trace_sampler::TraceSampler;

/// Structural state shared by all of a segment's spans. One lock guards
/// all of it; span data itself is not here and is locked per span.
struct SegmentState {
    spans: Vec<Arc<Mutex<SpanData>>>,
    num_finished: usize,
    sampling_decision: Option<SamplingDecision>,
    trace_tags: TraceTags,
}

/// Everything a new segment is born with.
pub(crate) struct SegmentConfig {
    pub(crate) collector: Arc<dyn Collector>,
    pub(crate) trace_sampler: Arc<TraceSampler>,
    pub(crate) span_sampler: Arc<SpanSampler>,
    pub(crate) defaults: Arc<SpanDefaults>,
    pub(crate) injection_styles: Vec<PropagationStyle>,
    pub(crate) hostname: Option<String>,
    pub(crate) origin: Option<String>,
    pub(crate) tags_header_max_size: usize,
    pub(crate) trace_tags: TraceTags,
    pub(crate) sampling_decision: Option<SamplingDecision>,
    pub(crate) full_w3c_trace_id_hex: Option<String>,
    pub(crate) additional_w3c_tracestate: Option<String>,
    pub(crate) additional_datadog_w3c_tracestate: Option<String>,
}

/// The process-local portion of one trace.
pub struct TraceSegment {
    collector: Arc<dyn Collector>,
    trace_sampler: Arc<TraceSampler>,
    span_sampler: Arc<SpanSampler>,
    defaults: Arc<SpanDefaults>,
    injection_styles: Vec<PropagationStyle>,
    hostname: Option<String>,
    origin: Option<String>,
    tags_header_max_size: usize,
    full_w3c_trace_id_hex: Option<String>,
    additional_w3c_tracestate: Option<String>,
    additional_datadog_w3c_tracestate: Option<String>,
    inner: Mutex<SegmentState>,
}

impl std::fmt::Debug for TraceSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceSegment")
            .field("injection_styles", &self.injection_styles)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

impl TraceSegment {
    /// Create a segment around its local root span. Returns the segment
    /// and the registered root span data.
    pub(crate) fn new(
        config: SegmentConfig,
        local_root: SpanData,
    ) -> (Arc<TraceSegment>, Arc<Mutex<SpanData>>) {
        let mut trace_tags = config.trace_tags;

        // _dd.p.tid always mirrors the high half of the trace ID.
        if local_root.trace_id.high != 0 {
            trace_tags.insert(
                tags::internal::TRACE_ID_HIGH.to_string(),
                hex_padded(local_root.trace_id.high),
            );
        } else {
            trace_tags.shift_remove(tags::internal::TRACE_ID_HIGH);
        }
        if let Some(decision) = &config.sampling_decision {
            update_decision_maker_tag(&mut trace_tags, decision);
        }

        let segment = Arc::new(TraceSegment {
            collector: config.collector,
            trace_sampler: config.trace_sampler,
            span_sampler: config.span_sampler,
            defaults: config.defaults,
            injection_styles: config.injection_styles,
            hostname: config.hostname,
            origin: config.origin,
            tags_header_max_size: config.tags_header_max_size,
            full_w3c_trace_id_hex: config.full_w3c_trace_id_hex,
            additional_w3c_tracestate: config.additional_w3c_tracestate,
            additional_datadog_w3c_tracestate: config.additional_datadog_w3c_tracestate,
            inner: Mutex::new(SegmentState {
                spans: Vec::new(),
                num_finished: 0,
                sampling_decision: config.sampling_decision,
                trace_tags,
            }),
        });

        let root = Arc::new(Mutex::new(local_root));
        segment.register_span(Arc::clone(&root));
        (segment, root)
    }

    /// The tracer-wide span defaults.
    pub fn defaults(&self) -> &SpanDefaults {
        &self.defaults
    }

    /// The reporting hostname, when configured.
    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    /// Where the trace originated, when extracted context said so.
    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    /// The current sampling decision, if one has been made.
    pub fn sampling_decision(&self) -> Option<SamplingDecision> {
        lock_or_poisoned(&self.inner).sampling_decision.clone()
    }

    pub(crate) fn register_span(&self, span: Arc<Mutex<SpanData>>) {
        let mut state = lock_or_poisoned(&self.inner);
        debug_assert!(state.spans.is_empty() || state.num_finished < state.spans.len());
        state.spans.push(span);
    }

    /// Called by a span handle when its span finishes. The call that
    /// brings the finished count up to the span count finalizes the
    /// segment.
    pub(crate) fn span_finished(&self) {
        let (spans, decision, trace_tags) = {
            let mut state = lock_or_poisoned(&self.inner);
            state.num_finished += 1;
            debug_assert!(state.num_finished <= state.spans.len());
            if state.num_finished < state.spans.len() {
                return;
            }
            self.make_sampling_decision_if_null(&mut state);
            let Some(decision) = state.sampling_decision.clone() else {
                return;
            };
            (
                std::mem::take(&mut state.spans),
                decision,
                std::mem::take(&mut state.trace_tags),
            )
        };
        // The lock is no longer needed: every handle is gone, so nobody is
        // left to register spans or change the decision.

        if decision.priority <= 0 {
            // Span sampling happens when the trace is dropped.
            for span in &spans {
                let mut span = lock_or_poisoned(span);
                let Some(kept) = self.span_sampler.decide(&span) else {
                    continue;
                };
                span.numeric_tags.insert(
                    tags::internal::SPAN_SAMPLING_MECHANISM.to_string(),
                    f64::from(SamplingMechanism::SpanRule.value()),
                );
                span.numeric_tags.insert(
                    tags::internal::SPAN_SAMPLING_RULE_RATE.to_string(),
                    kept.rule_rate,
                );
                if let Some(max_per_second) = kept.max_per_second {
                    span.numeric_tags.insert(
                        tags::internal::SPAN_SAMPLING_LIMIT.to_string(),
                        max_per_second,
                    );
                }
            }
        }

        if let Some(local_root) = spans.first() {
            let mut root = lock_or_poisoned(local_root);
            for (key, value) in &trace_tags {
                root.tags.entry(key.clone()).or_insert_with(|| value.clone());
            }
            root.numeric_tags.insert(
                tags::internal::SAMPLING_PRIORITY.to_string(),
                f64::from(decision.priority),
            );
            if let Some(hostname) = &self.hostname {
                root.tags
                    .insert(tags::internal::HOSTNAME.to_string(), hostname.clone());
            }
            if decision.origin == DecisionOrigin::Local {
                match decision.mechanism {
                    Some(SamplingMechanism::AgentRate) | Some(SamplingMechanism::Default) => {
                        if let Some(rate) = decision.configured_rate {
                            root.numeric_tags
                                .insert(tags::internal::AGENT_SAMPLE_RATE.to_string(), rate);
                        }
                    }
                    Some(SamplingMechanism::Rule) => {
                        if let Some(rate) = decision.configured_rate {
                            root.numeric_tags
                                .insert(tags::internal::RULE_SAMPLE_RATE.to_string(), rate);
                        }
                        if let Some(rate) = decision.limiter_effective_rate {
                            root.numeric_tags.insert(
                                tags::internal::RULE_LIMITER_SAMPLE_RATE.to_string(),
                                rate,
                            );
                        }
                    }
                    _ => {}
                }
            }
        }

        // Origin is repeated on all spans.
        if let Some(origin) = &self.origin {
            for span in &spans {
                lock_or_poisoned(span)
                    .tags
                    .insert(tags::internal::ORIGIN.to_string(), origin.clone());
            }
        }

        let spans: Vec<SpanData> = spans
            .into_iter()
            .map(|span| match Arc::try_unwrap(span) {
                Ok(mutex) => mutex.into_inner().unwrap_or_else(PoisonError::into_inner),
                Err(span) => lock_or_poisoned(&span).clone(),
            })
            .collect();

        if let Err(error) = self.collector.send(spans, &self.trace_sampler) {
            tracing::error!(%error, "error sending spans to collector");
        }
    }

    /// Force the trace's sampling priority, replacing any previous
    /// decision. Observers after this call see the manual decision.
    pub fn override_sampling_priority(&self, priority: i32) {
        let decision = SamplingDecision {
            priority,
            mechanism: Some(SamplingMechanism::Manual),
            origin: DecisionOrigin::Local,
            configured_rate: None,
            limiter_effective_rate: None,
            limiter_max_per_second: None,
        };

        let mut state = lock_or_poisoned(&self.inner);
        update_decision_maker_tag(&mut state.trace_tags, &decision);
        state.sampling_decision = Some(decision);
    }

    fn make_sampling_decision_if_null(&self, state: &mut SegmentState) {
        if state.sampling_decision.is_some() {
            return;
        }
        let Some(local_root) = state.spans.first() else {
            return;
        };
        let decision = {
            let local_root = lock_or_poisoned(local_root);
            self.trace_sampler.decide(&local_root)
        };
        update_decision_maker_tag(&mut state.trace_tags, &decision);
        state.sampling_decision = Some(decision);
    }

    /// Write trace context for the span identified by `trace_id`/`span_id`
    /// into outbound request headers, one write per configured injection
    /// style.
    pub(crate) fn inject(&self, writer: &mut dyn Injector, trace_id: TraceId, span_id: u64) {
        // If the only injection style is `None`, don't do anything.
        if self.injection_styles == [PropagationStyle::None] {
            return;
        }

        // The priority can change (it can be overridden on another
        // thread), and trace tags change with it, so both are snapshotted
        // under the lock.
        let (sampling_priority, trace_tags, local_root) = {
            let mut state = lock_or_poisoned(&self.inner);
            self.make_sampling_decision_if_null(&mut state);
            let sampling_priority = state
                .sampling_decision
                .as_ref()
                .map_or(priority::AUTO_DROP, |decision| decision.priority);
            (
                sampling_priority,
                state.trace_tags.clone(),
                state.spans.first().cloned(),
            )
        };

        let wants_tag_header = self.injection_styles.iter().any(|style| {
            matches!(style, PropagationStyle::Datadog | PropagationStyle::B3)
        });
        let mut encoded_trace_tags = None;
        if wants_tag_header {
            let encoded = tag_codec::encode_tags(trace_tags.iter());
            if encoded.len() > self.tags_header_max_size {
                tracing::error!(
                    configured_maximum = self.tags_header_max_size,
                    encoded_size = encoded.len(),
                    "serialized x-datadog-tags header value is too large"
                );
                if let Some(local_root) = &local_root {
                    lock_or_poisoned(local_root).tags.insert(
                        tags::internal::PROPAGATION_ERROR.to_string(),
                        "inject_max_size".to_string(),
                    );
                }
            } else if !encoded.is_empty() {
                encoded_trace_tags = Some(encoded);
            }
        }

        let snapshot = InjectionSnapshot {
            trace_id,
            span_id,
            sampling_priority,
            origin: self.origin.as_deref(),
            trace_tags: &trace_tags,
            encoded_trace_tags: encoded_trace_tags.as_deref(),
            full_w3c_trace_id_hex: self.full_w3c_trace_id_hex.as_deref(),
            additional_w3c_tracestate: self.additional_w3c_tracestate.as_deref(),
            additional_datadog_w3c_tracestate: self.additional_datadog_w3c_tracestate.as_deref(),
        };

        for style in &self.injection_styles {
            match style {
                PropagationStyle::Datadog => crate::propagation::datadog::inject(writer, &snapshot),
                PropagationStyle::B3 => crate::propagation::b3::inject(writer, &snapshot),
                PropagationStyle::W3c => crate::propagation::w3c::inject(writer, &snapshot),
                PropagationStyle::None => {}
            }
        }
    }
}

/// Keep the `_dd.p.dm` trace tag consistent with the decision: present
/// with the `"-<mechanism>"` value for kept traces, absent for dropped
/// ones.
fn update_decision_maker_tag(trace_tags: &mut TraceTags, decision: &SamplingDecision) {
    if decision.priority <= 0 {
        trace_tags.shift_remove(tags::internal::DECISION_MAKER);
    } else if let Some(mechanism) = decision.mechanism {
        trace_tags.insert(
            tags::internal::DECISION_MAKER.to_string(),
            format!("-{}", mechanism.value()),
        );
    }
}
