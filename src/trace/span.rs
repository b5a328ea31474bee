//! # Span
//!
//! A [`Span`] is a scoped handle onto one span's mutable state. The handle
//! finishes its span when dropped (or earlier, at an explicitly set end
//! time), and every live handle keeps the owning [`TraceSegment`] alive, so
//! the segment can finalize exactly when the last span of the trace's local
//! portion finishes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::clock::{Clock, TimePoint};
use crate::id::TraceId;
use crate::propagation::Injector;
use crate::tags;
use crate::trace::id_generator::IdGenerator;
use crate::trace::lock_or_poisoned;
use crate::trace::segment::TraceSegment;

/// The state of one span.
#[derive(Clone, Debug)]
pub struct SpanData {
    /// ID of the trace this span belongs to.
    pub trace_id: TraceId,
    /// This span's ID, unique within the trace.
    pub span_id: u64,
    /// ID of the parent span; zero for a root span.
    pub parent_id: u64,
    /// The service that performed the operation.
    pub service: String,
    /// Kind of service, e.g. "web" or "db".
    pub service_type: String,
    /// Name of the operation, e.g. "http.request".
    pub name: String,
    /// The specific resource operated on, e.g. an endpoint or a query.
    pub resource: String,
    /// When the operation began.
    pub start: TimePoint,
    /// How long the operation took. Written when the span finishes.
    pub duration: Duration,
    /// Whether the operation ended in error.
    pub error: bool,
    /// String tags.
    pub tags: HashMap<String, String>,
    /// Numeric tags. Maintained by the library, not writable directly.
    pub numeric_tags: HashMap<String, f64>,
}

impl SpanData {
    /// A span with `config` applied on top of `defaults`. IDs are zeroed;
    /// the caller assigns them.
    pub(crate) fn with_config(defaults: &SpanDefaults, config: SpanConfig, clock: &Clock) -> Self {
        let name = config.name.unwrap_or_else(|| defaults.name.clone());
        let resource = config.resource.unwrap_or_else(|| name.clone());

        let mut span_tags = defaults.tags.clone();
        span_tags.extend(config.tags);
        if let Some(environment) = config.environment.or_else(|| defaults.environment.clone()) {
            span_tags.insert(tags::ENVIRONMENT.to_string(), environment);
        }
        if let Some(version) = config.version.or_else(|| defaults.version.clone()) {
            span_tags.insert(tags::VERSION.to_string(), version);
        }

        SpanData {
            trace_id: TraceId::default(),
            span_id: 0,
            parent_id: 0,
            service: config.service.unwrap_or_else(|| defaults.service.clone()),
            service_type: config
                .service_type
                .unwrap_or_else(|| defaults.service_type.clone()),
            name,
            resource,
            start: config.start.unwrap_or_else(|| clock()),
            duration: Duration::ZERO,
            error: false,
            tags: span_tags,
            numeric_tags: HashMap::new(),
        }
    }

    /// The span's deployment environment, from its `env` tag.
    pub(crate) fn environment(&self) -> &str {
        self.tags.get(tags::ENVIRONMENT).map_or("", String::as_str)
    }

    #[cfg(test)]
    pub(crate) fn for_test() -> Self {
        SpanData {
            trace_id: TraceId::default(),
            span_id: 0,
            parent_id: 0,
            service: String::new(),
            service_type: String::new(),
            name: String::new(),
            resource: String::new(),
            start: TimePoint {
                wall: std::time::SystemTime::UNIX_EPOCH,
                tick: Instant::now(),
            },
            duration: Duration::ZERO,
            error: false,
            tags: HashMap::new(),
            numeric_tags: HashMap::new(),
        }
    }
}

/// Fallback values applied to every span a tracer creates.
#[derive(Clone, Debug, Default)]
pub struct SpanDefaults {
    /// The service name.
    pub service: String,
    /// The service type, e.g. "web".
    pub service_type: String,
    /// Deployment environment, materialized as the `env` tag.
    pub environment: Option<String>,
    /// Application version, materialized as the `version` tag.
    pub version: Option<String>,
    /// Default operation name.
    pub name: String,
    /// Tags applied to every span.
    pub tags: HashMap<String, String>,
}

/// Per-span overrides supplied when creating a span.
#[derive(Clone, Debug, Default)]
pub struct SpanConfig {
    /// Operation name; the tracer's default when absent.
    pub name: Option<String>,
    /// Service name override.
    pub service: Option<String>,
    /// Service type override.
    pub service_type: Option<String>,
    /// Resource name; defaults to the operation name.
    pub resource: Option<String>,
    /// Environment override.
    pub environment: Option<String>,
    /// Version override.
    pub version: Option<String>,
    /// Start time; the current time when absent.
    pub start: Option<TimePoint>,
    /// Initial tags; merged over the tracer's default tags.
    pub tags: HashMap<String, String>,
}

impl SpanConfig {
    /// A config that only sets the operation name.
    pub fn with_name(name: impl Into<String>) -> Self {
        SpanConfig {
            name: Some(name.into()),
            ..SpanConfig::default()
        }
    }
}

/// Scoped handle onto one span.
///
/// The span finishes when the handle is dropped; [`Span::set_end_time`]
/// backdates the finish. Handles are not clonable: each span is mutated
/// through exactly one handle, by one thread at a time.
pub struct Span {
    data: Arc<Mutex<SpanData>>,
    segment: Arc<TraceSegment>,
    id_generator: Arc<dyn IdGenerator>,
    clock: Clock,
    end_time: Option<Instant>,
}

impl std::fmt::Debug for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Span")
            .field("data", &self.data)
            .field("end_time", &self.end_time)
            .finish_non_exhaustive()
    }
}

impl Span {
    pub(crate) fn new(
        data: Arc<Mutex<SpanData>>,
        segment: Arc<TraceSegment>,
        id_generator: Arc<dyn IdGenerator>,
        clock: Clock,
    ) -> Self {
        Span {
            data,
            segment,
            id_generator,
            clock,
            end_time: None,
        }
    }

    /// Operate on the span's data.
    fn with_data<T>(&self, f: impl FnOnce(&mut SpanData) -> T) -> T {
        f(&mut lock_or_poisoned(&self.data))
    }

    /// Create a span that is a child of this one, registered with the same
    /// trace segment.
    pub fn create_child(&self, config: SpanConfig) -> Span {
        let mut child = SpanData::with_config(self.segment.defaults(), config, &self.clock);
        let (trace_id, parent_id) = self.with_data(|data| (data.trace_id, data.span_id));
        child.trace_id = trace_id;
        child.parent_id = parent_id;
        child.span_id = self.id_generator.new_span_id();

        let child = Arc::new(Mutex::new(child));
        self.segment.register_span(Arc::clone(&child));
        Span::new(
            child,
            Arc::clone(&self.segment),
            Arc::clone(&self.id_generator),
            Arc::clone(&self.clock),
        )
    }

    /// Write trace context for this span into outbound request headers.
    pub fn inject(&self, writer: &mut dyn Injector) {
        let (trace_id, span_id) = self.with_data(|data| (data.trace_id, data.span_id));
        self.segment.inject(writer, trace_id, span_id);
    }

    /// This span's ID.
    pub fn id(&self) -> u64 {
        self.with_data(|data| data.span_id)
    }

    /// The trace's ID.
    pub fn trace_id(&self) -> TraceId {
        self.with_data(|data| data.trace_id)
    }

    /// The parent span's ID, if this span has a parent.
    pub fn parent_id(&self) -> Option<u64> {
        self.with_data(|data| (data.parent_id != 0).then_some(data.parent_id))
    }

    /// When the span started.
    pub fn start_time(&self) -> TimePoint {
        self.with_data(|data| data.start)
    }

    /// Whether the span is marked as an error.
    pub fn error(&self) -> bool {
        self.with_data(|data| data.error)
    }

    /// Look up a tag. Names in the reserved internal namespace read as
    /// absent.
    pub fn lookup_tag(&self, name: &str) -> Option<String> {
        if tags::is_internal(name) {
            return None;
        }
        self.with_data(|data| data.tags.get(name).cloned())
    }

    /// Set a tag. A no-op for names in the reserved internal namespace.
    pub fn set_tag(&self, name: &str, value: impl Into<String>) {
        if !tags::is_internal(name) {
            let value = value.into();
            self.with_data(|data| data.tags.insert(name.to_string(), value));
        }
    }

    /// Remove a tag. A no-op for names in the reserved internal namespace.
    pub fn remove_tag(&self, name: &str) {
        if !tags::is_internal(name) {
            self.with_data(|data| data.tags.remove(name));
        }
    }

    /// Override the span's service name.
    pub fn set_service_name(&self, service: impl Into<String>) {
        let service = service.into();
        self.with_data(|data| data.service = service);
    }

    /// Override the span's service type.
    pub fn set_service_type(&self, service_type: impl Into<String>) {
        let service_type = service_type.into();
        self.with_data(|data| data.service_type = service_type);
    }

    /// Override the span's resource name.
    pub fn set_resource_name(&self, resource: impl Into<String>) {
        let resource = resource.into();
        self.with_data(|data| data.resource = resource);
    }

    /// Override the span's operation name.
    pub fn set_name(&self, name: impl Into<String>) {
        let name = name.into();
        self.with_data(|data| data.name = name);
    }

    /// Mark or unmark the span as an error. Unmarking clears the error
    /// message and type tags.
    pub fn set_error(&self, is_error: bool) {
        self.with_data(|data| {
            data.error = is_error;
            if !is_error {
                data.tags.remove(tags::ERROR_MESSAGE);
                data.tags.remove(tags::ERROR_TYPE);
            }
        });
    }

    /// Mark the span as an error with a message.
    pub fn set_error_message(&self, message: impl Into<String>) {
        let message = message.into();
        self.with_data(|data| {
            data.error = true;
            data.tags.insert(tags::ERROR_MESSAGE.to_string(), message);
        });
    }

    /// Mark the span as an error with a type name.
    pub fn set_error_type(&self, error_type: impl Into<String>) {
        let error_type = error_type.into();
        self.with_data(|data| {
            data.error = true;
            data.tags.insert(tags::ERROR_TYPE.to_string(), error_type);
        });
    }

    /// Mark the span as an error with a stack trace.
    pub fn set_error_stack(&self, stack: impl Into<String>) {
        let stack = stack.into();
        self.with_data(|data| {
            data.error = true;
            data.tags.insert(tags::ERROR_STACK.to_string(), stack);
        });
    }

    /// Override the trace's sampling priority. Applies to the whole
    /// segment; later injections and the finalized batch see the manual
    /// decision.
    pub fn set_sampling_priority(&self, priority: i32) {
        self.segment.override_sampling_priority(priority);
    }

    /// Finish the span at `end_time` instead of at handle drop time.
    pub fn set_end_time(&mut self, end_time: Instant) {
        self.end_time = Some(end_time);
    }

    /// The segment that owns this span.
    pub fn trace_segment(&self) -> &Arc<TraceSegment> {
        &self.segment
    }
}

impl Drop for Span {
    /// Record the duration and notify the segment.
    fn drop(&mut self) {
        let end_tick = self.end_time.unwrap_or_else(|| (self.clock)().tick);
        self.with_data(|data| {
            data.duration = end_tick.saturating_duration_since(data.start.tick);
        });
        self.segment.span_finished();
    }
}
