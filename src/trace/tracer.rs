//! The application-facing entry point.

use std::collections::HashMap;
use std::sync::Arc;

use crate::clock::{default_clock, Clock};
use crate::collector::Collector;
use crate::error::Error;
use crate::propagation::{
    b3, datadog, extraction_error_prefix, merge::merge, w3c, AuditedExtractor, ExtractedContext,
    Extractor, PropagationStyle, TraceTags,
};
use crate::tags;
use crate::trace::id_generator::{IdGenerator, RandomIdGenerator};
use crate::trace::sampling::{DecisionOrigin, SamplingDecision, SamplingMechanism};
use crate::trace::segment::{SegmentConfig, TraceSegment};
use crate::trace::span::{Span, SpanConfig, SpanData, SpanDefaults};
use crate::trace::span_sampler::{SpanSampler, SpanSamplerConfig};
use crate::trace::trace_sampler::{TraceSampler, TraceSamplerConfig};

/// Creates spans, either as local roots of new traces or as continuations
/// of traces extracted from inbound request headers.
///
/// Build one with [`Tracer::builder`] and share it; all methods take
/// `&self`.
pub struct Tracer {
    collector: Arc<dyn Collector>,
    trace_sampler: Arc<TraceSampler>,
    span_sampler: Arc<SpanSampler>,
    defaults: Arc<SpanDefaults>,
    extraction_styles: Vec<PropagationStyle>,
    injection_styles: Vec<PropagationStyle>,
    hostname: Option<String>,
    tags_header_max_size: usize,
    id_generator: Arc<dyn IdGenerator>,
    clock: Clock,
}

impl std::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracer")
            .field("defaults", &self.defaults)
            .field("extraction_styles", &self.extraction_styles)
            .field("injection_styles", &self.injection_styles)
            .finish_non_exhaustive()
    }
}

/// Configures and builds a [`Tracer`].
pub struct TracerBuilder {
    service: String,
    service_type: String,
    environment: Option<String>,
    version: Option<String>,
    default_name: String,
    global_tags: HashMap<String, String>,
    collector: Option<Arc<dyn Collector>>,
    extraction_styles: Vec<PropagationStyle>,
    injection_styles: Vec<PropagationStyle>,
    hostname: Option<String>,
    tags_header_max_size: usize,
    trace_sampler: TraceSamplerConfig,
    span_sampler: SpanSamplerConfig,
    trace_id_128_bit: bool,
    id_generator: Option<Arc<dyn IdGenerator>>,
    clock: Option<Clock>,
}

/// The upper size limit of the `x-datadog-tags` header value, absent other
/// configuration.
const DEFAULT_TAGS_HEADER_MAX_SIZE: usize = 512;

impl Default for TracerBuilder {
    fn default() -> Self {
        TracerBuilder {
            service: String::new(),
            service_type: "web".to_string(),
            environment: None,
            version: None,
            default_name: String::new(),
            global_tags: HashMap::new(),
            collector: None,
            extraction_styles: vec![PropagationStyle::Datadog, PropagationStyle::W3c],
            injection_styles: vec![PropagationStyle::Datadog, PropagationStyle::W3c],
            hostname: None,
            tags_header_max_size: DEFAULT_TAGS_HEADER_MAX_SIZE,
            trace_sampler: TraceSamplerConfig::default(),
            span_sampler: SpanSamplerConfig::default(),
            trace_id_128_bit: true,
            id_generator: None,
            clock: None,
        }
    }
}

impl TracerBuilder {
    /// A builder with defaults: Datadog + W3C propagation in both
    /// directions, 128-bit trace IDs, no sampling rules.
    pub fn new() -> Self {
        TracerBuilder::default()
    }

    /// The service name. Required.
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }

    /// The service type, "web" by default.
    pub fn with_service_type(mut self, service_type: impl Into<String>) -> Self {
        self.service_type = service_type.into();
        self
    }

    /// Deployment environment, reported as the `env` tag on every span.
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    /// Application version, reported as the `version` tag on every span.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Operation name for spans created without one.
    pub fn with_default_name(mut self, name: impl Into<String>) -> Self {
        self.default_name = name.into();
        self
    }

    /// A tag applied to every span.
    pub fn with_global_tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.global_tags.insert(name.into(), value.into());
        self
    }

    /// Where finished trace segments go. Required.
    pub fn with_collector(mut self, collector: Arc<dyn Collector>) -> Self {
        self.collector = Some(collector);
        self
    }

    /// Which styles to attempt, in order, when extracting inbound context.
    pub fn with_extraction_styles(mut self, styles: Vec<PropagationStyle>) -> Self {
        self.extraction_styles = styles;
        self
    }

    /// Which styles to write when injecting outbound context.
    pub fn with_injection_styles(mut self, styles: Vec<PropagationStyle>) -> Self {
        self.injection_styles = styles;
        self
    }

    /// Use the same styles for extraction and injection.
    pub fn with_propagation_styles(mut self, styles: Vec<PropagationStyle>) -> Self {
        self.extraction_styles.clone_from(&styles);
        self.injection_styles = styles;
        self
    }

    /// Report this hostname on local root spans.
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Cap, in bytes, on the serialized `x-datadog-tags` header.
    pub fn with_tags_header_max_size(mut self, max_size: usize) -> Self {
        self.tags_header_max_size = max_size;
        self
    }

    /// Trace sampling rules and limits.
    pub fn with_trace_sampler(mut self, config: TraceSamplerConfig) -> Self {
        self.trace_sampler = config;
        self
    }

    /// Span sampling rules.
    pub fn with_span_sampler(mut self, config: SpanSamplerConfig) -> Self {
        self.span_sampler = config;
        self
    }

    /// Whether generated trace IDs use the full 128 bits. On by default.
    pub fn with_128_bit_trace_ids(mut self, enabled: bool) -> Self {
        self.trace_id_128_bit = enabled;
        self
    }

    /// Replace the ID source.
    pub fn with_id_generator(mut self, id_generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = Some(id_generator);
        self
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validate the configuration and build the tracer.
    pub fn build(self) -> Result<Tracer, Error> {
        if self.service.is_empty() {
            return Err(Error::InvalidConfig("a service name is required".to_string()));
        }
        let Some(collector) = self.collector else {
            return Err(Error::InvalidConfig("a collector is required".to_string()));
        };
        if self.extraction_styles.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one extraction style is required".to_string(),
            ));
        }
        if self.injection_styles.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one injection style is required".to_string(),
            ));
        }

        let clock = self.clock.unwrap_or_else(default_clock);
        let trace_sampler = Arc::new(TraceSampler::new(&self.trace_sampler, Arc::clone(&clock))?);
        let span_sampler = Arc::new(SpanSampler::new(&self.span_sampler, Arc::clone(&clock))?);
        let id_generator = self
            .id_generator
            .unwrap_or_else(|| Arc::new(RandomIdGenerator::new(self.trace_id_128_bit)));

        Ok(Tracer {
            collector,
            trace_sampler,
            span_sampler,
            defaults: Arc::new(SpanDefaults {
                service: self.service,
                service_type: self.service_type,
                environment: self.environment,
                version: self.version,
                name: self.default_name,
                tags: self.global_tags,
            }),
            extraction_styles: self.extraction_styles,
            injection_styles: self.injection_styles,
            hostname: self.hostname,
            tags_header_max_size: self.tags_header_max_size,
            id_generator,
            clock,
        })
    }
}

impl Tracer {
    /// Start configuring a tracer.
    pub fn builder() -> TracerBuilder {
        TracerBuilder::new()
    }

    /// The trace sampler, shared with the collector for agent rate
    /// feedback.
    pub fn trace_sampler(&self) -> &Arc<TraceSampler> {
        &self.trace_sampler
    }

    /// Create the root span of a new trace.
    pub fn create_span(&self, config: SpanConfig) -> Span {
        let mut local_root = SpanData::with_config(&self.defaults, config, &self.clock);
        local_root.trace_id = self.id_generator.new_trace_id();
        // The local root's span ID mirrors the low half of the trace ID.
        local_root.span_id = local_root.trace_id.low;
        local_root.parent_id = 0;

        let (segment, root) = TraceSegment::new(
            self.segment_config(None, TraceTags::default(), None, None, None, None),
            local_root,
        );
        Span::new(
            root,
            segment,
            Arc::clone(&self.id_generator),
            Arc::clone(&self.clock),
        )
    }

    /// Continue the trace described by inbound request headers, creating a
    /// span whose parent is on the other side of the boundary.
    ///
    /// Each enabled extraction style runs against the headers; a style
    /// that fails to parse is logged and skipped, and the remaining
    /// styles' results are merged. Returns [`Error::NoSpanToExtract`] when
    /// no style yields a trace ID.
    pub fn extract_span(
        &self,
        headers: &dyn Extractor,
        config: SpanConfig,
    ) -> Result<Span, Error> {
        let audited = AuditedExtractor::new(headers);
        let mut span_tags = HashMap::new();
        let mut contexts: HashMap<PropagationStyle, ExtractedContext> = HashMap::new();

        for style in &self.extraction_styles {
            if contexts.contains_key(style) {
                continue;
            }
            audited.reset();
            let result = match style {
                PropagationStyle::Datadog => datadog::extract(&audited, &mut span_tags),
                PropagationStyle::B3 => b3::extract(&audited, &mut span_tags),
                PropagationStyle::W3c => w3c::extract(&audited, &mut span_tags),
                PropagationStyle::None => Ok(ExtractedContext {
                    style: Some(PropagationStyle::None),
                    ..ExtractedContext::default()
                }),
            };
            match result {
                Ok(mut context) => {
                    context.headers_examined = audited.entries_found();
                    contexts.insert(*style, context);
                }
                Err(error) => {
                    let prefix = extraction_error_prefix(Some(*style), &audited.entries_found());
                    tracing::error!("{prefix}{error}");
                }
            }
        }

        let merged = merge(&self.extraction_styles, &contexts);
        let Some(trace_id) = merged.trace_id else {
            return Err(Error::NoSpanToExtract);
        };
        let parent_id = match merged.parent_id {
            Some(parent_id) => parent_id,
            // Origin-bearing contexts (e.g. RUM) may legitimately name
            // only the trace.
            None if merged.origin.is_some() => 0,
            None => return Err(Error::MissingParentSpanId),
        };

        let sampling_decision = merged.sampling_priority.map(|priority| SamplingDecision {
            priority,
            mechanism: mechanism_from_trace_tags(&merged.trace_tags),
            origin: DecisionOrigin::Extracted,
            configured_rate: None,
            limiter_effective_rate: None,
            limiter_max_per_second: None,
        });

        let mut local_root = SpanData::with_config(&self.defaults, config, &self.clock);
        local_root.trace_id = trace_id;
        local_root.parent_id = parent_id;
        local_root.span_id = self.id_generator.new_span_id();
        local_root.tags.extend(span_tags);
        if let Some(datadog_w3c_parent_id) = &merged.datadog_w3c_parent_id {
            local_root.tags.insert(
                tags::internal::W3C_PARENT_ID.to_string(),
                datadog_w3c_parent_id.clone(),
            );
        }

        let (segment, root) = TraceSegment::new(
            self.segment_config(
                merged.origin,
                merged.trace_tags,
                sampling_decision,
                merged.full_w3c_trace_id_hex,
                merged.additional_w3c_tracestate,
                merged.additional_datadog_w3c_tracestate,
            ),
            local_root,
        );
        Ok(Span::new(
            root,
            segment,
            Arc::clone(&self.id_generator),
            Arc::clone(&self.clock),
        ))
    }

    /// [`extract_span`](Tracer::extract_span), falling back to
    /// [`create_span`](Tracer::create_span) when the headers carry no
    /// trace context at all.
    pub fn extract_or_create_span(
        &self,
        headers: &dyn Extractor,
        config: SpanConfig,
    ) -> Result<Span, Error> {
        match self.extract_span(headers, config.clone()) {
            Err(Error::NoSpanToExtract) => Ok(self.create_span(config)),
            other => other,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn segment_config(
        &self,
        origin: Option<String>,
        trace_tags: TraceTags,
        sampling_decision: Option<SamplingDecision>,
        full_w3c_trace_id_hex: Option<String>,
        additional_w3c_tracestate: Option<String>,
        additional_datadog_w3c_tracestate: Option<String>,
    ) -> SegmentConfig {
        SegmentConfig {
            collector: Arc::clone(&self.collector),
            trace_sampler: Arc::clone(&self.trace_sampler),
            span_sampler: Arc::clone(&self.span_sampler),
            defaults: Arc::clone(&self.defaults),
            injection_styles: self.injection_styles.clone(),
            hostname: self.hostname.clone(),
            origin,
            tags_header_max_size: self.tags_header_max_size,
            trace_tags,
            sampling_decision,
            full_w3c_trace_id_hex,
            additional_w3c_tracestate,
            additional_datadog_w3c_tracestate,
        }
    }
}

/// The sampling mechanism recorded in an extracted `_dd.p.dm` tag, when
/// its `-<value>` form names one this library knows.
fn mechanism_from_trace_tags(trace_tags: &TraceTags) -> Option<SamplingMechanism> {
    let decision_maker = trace_tags.get(tags::internal::DECISION_MAKER)?;
    let value = decision_maker.strip_prefix('-')?.parse::<i32>().ok()?;
    SamplingMechanism::from_value(value)
}
