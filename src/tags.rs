//! Well-known span tag names.
//!
//! Tags in the internal namespace are maintained by the library itself and
//! are not writable through [`Span::set_tag`](crate::trace::Span::set_tag);
//! the `error.*` tags are writable only through the dedicated error
//! operations on `Span`.

/// The span tag that holds the deployment environment.
pub const ENVIRONMENT: &str = "env";
/// The span tag that holds the application version.
pub const VERSION: &str = "version";

/// Error description, set by `Span::set_error_message`.
pub const ERROR_MESSAGE: &str = "error.message";
/// Error type name, set by `Span::set_error_type`.
pub const ERROR_TYPE: &str = "error.type";
/// Error stack trace, set by `Span::set_error_stack`.
pub const ERROR_STACK: &str = "error.stack";

pub(crate) mod internal {
    //! Tags owned by the library. String tags unless noted otherwise.

    /// Which entity made the trace sampling decision, propagated as a
    /// `"-<mechanism>"` value.
    pub const DECISION_MAKER: &str = "_dd.p.dm";
    /// The high 64 bits of a 128-bit trace ID, as 16 hex characters.
    pub const TRACE_ID_HIGH: &str = "_dd.p.tid";
    /// The W3C parent span ID, as 16 hex characters, when it disagrees
    /// with the parent extracted from another style.
    pub const W3C_PARENT_ID: &str = "_dd.parent_id";
    /// Recorded on the local root when context propagation misbehaves.
    pub const PROPAGATION_ERROR: &str = "_dd.propagation_error";
    /// Recorded on the local root when `traceparent` extraction fails.
    pub const W3C_EXTRACTION_ERROR: &str = "_dd.w3c_extraction_error";
    /// Where the trace originated, e.g. "rum" or "synthetics".
    pub const ORIGIN: &str = "_dd.origin";
    /// Reporting host, when configured.
    pub const HOSTNAME: &str = "_dd.hostname";

    // Numeric tags.

    /// The sampling priority of the trace segment.
    pub const SAMPLING_PRIORITY: &str = "_sampling_priority_v1";
    /// Sample rate applied from the agent's response (or the default).
    pub const AGENT_SAMPLE_RATE: &str = "_dd.agent_psr";
    /// Sample rate configured by the matching trace sampling rule.
    pub const RULE_SAMPLE_RATE: &str = "_dd.rule_psr";
    /// Effective rate of the trace sampling limiter.
    pub const RULE_LIMITER_SAMPLE_RATE: &str = "_dd.limit_psr";
    /// Sampling mechanism of a span kept by span sampling.
    pub const SPAN_SAMPLING_MECHANISM: &str = "_dd.span_sampling.mechanism";
    /// Sample rate of the matching span sampling rule.
    pub const SPAN_SAMPLING_RULE_RATE: &str = "_dd.span_sampling.rule_rate";
    /// Per-second limit of the matching span sampling rule, if any.
    pub const SPAN_SAMPLING_LIMIT: &str = "_dd.span_sampling.max_per_second";
}

/// The prefix shared by trace tags that propagate across services.
pub(crate) const PROPAGATED_PREFIX: &str = "_dd.p.";

/// Whether `name` belongs to the reserved namespace that public tag
/// operations must not touch.
pub(crate) fn is_internal(name: &str) -> bool {
    name.starts_with("_dd.")
        || name == ERROR_MESSAGE
        || name == ERROR_TYPE
        || name == ERROR_STACK
}
