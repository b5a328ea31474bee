//! Errors returned by this crate.

use thiserror::Error;

/// Things that can go wrong while configuring the tracer, extracting trace
/// context, or talking to the collector.
///
/// Span operations themselves never fail: problems encountered while a trace
/// is in flight surface as diagnostic tags on the local root span
/// (`_dd.propagation_error`, `_dd.w3c_extraction_error`) or as log records,
/// so that trace continuity is preserved.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A header that should contain an ID or a sampling priority could not
    /// be parsed.
    #[error("could not extract {style}-style {what} from {header}: {value:?}")]
    InvalidHeader {
        /// Propagation style whose extractor rejected the header.
        style: &'static str,
        /// What the header was supposed to contain, e.g. "trace ID".
        what: &'static str,
        /// Name of the offending header.
        header: &'static str,
        /// The value as received.
        value: String,
    },

    /// An `x-datadog-tags` header value could not be decoded.
    #[error("malformed trace tags, expected comma-separated key=value pairs: {0:?}")]
    MalformedTraceTags(String),

    /// A configured sample rate falls outside of `[0.0, 1.0]`.
    #[error("sample rate must be between 0.0 and 1.0 inclusive, but got {0}")]
    InvalidRate(f64),

    /// A configuration value was rejected at build time.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Extraction ran but no enabled propagation style produced a trace ID.
    #[error("no trace context could be extracted from the request headers")]
    NoSpanToExtract,

    /// A trace ID was extracted without a parent span ID or an origin.
    #[error("extracted trace context has a trace ID but no parent span ID")]
    MissingParentSpanId,

    /// The collector rejected or failed to deliver a trace segment.
    #[error("collector error: {0}")]
    Collector(String),

    /// Any other error.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync + 'static>),
}

/// Shorthand for `Result` with this crate's [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;
