//! # Trace context propagation
//!
//! Propagation carries trace context across process boundaries on request
//! and response metadata. Extractors read inbound headers in each supported
//! wire format into an [`ExtractedContext`]; when several formats are
//! enabled at once, [`merge`](merge::merge) reconciles their results into
//! one authoritative context. On the outbound side, per-style injectors
//! serialize the current span identity and sampling decision back into
//! headers.
//!
//! Carriers are abstracted behind [`Extractor`] and [`Injector`], so any
//! string-keyed header map can participate. `HashMap<String, String>`
//! implementations are provided; they lowercase keys, which also gives the
//! case-insensitive lookups that HTTP headers require.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;

use indexmap::IndexMap;

use crate::id::TraceId;

pub(crate) mod b3;
pub(crate) mod datadog;
pub(crate) mod merge;
pub(crate) mod tag_codec;
pub(crate) mod w3c;

/// Injector provides an interface for adding fields to an underlying
/// carrier, such as a `HashMap` of outbound request headers.
pub trait Injector {
    /// Add a key and value to the underlying data.
    fn set(&mut self, key: &str, value: String);
}

/// Extractor provides an interface for reading fields from an underlying
/// carrier, such as a `HashMap` of inbound request headers. Lookups must be
/// case-insensitive with respect to the key.
pub trait Extractor {
    /// Get the value for a key from the underlying data.
    fn get(&self, key: &str) -> Option<&str>;

    /// Collect all the keys from the underlying data.
    fn keys(&self) -> Vec<&str>;
}

impl<S: std::hash::BuildHasher> Injector for HashMap<String, String, S> {
    /// Set a key and value in the HashMap.
    fn set(&mut self, key: &str, value: String) {
        self.insert(key.to_lowercase(), value);
    }
}

impl<S: std::hash::BuildHasher> Extractor for HashMap<String, String, S> {
    /// Get a value for a key from the HashMap.
    fn get(&self, key: &str) -> Option<&str> {
        self.get(&key.to_lowercase()).map(|v| v.as_str())
    }

    /// Collect all the keys from the HashMap.
    fn keys(&self) -> Vec<&str> {
        self.keys().map(|k| k.as_str()).collect::<Vec<_>>()
    }
}

/// The wire formats understood by this library.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PropagationStyle {
    /// `x-datadog-*` headers.
    Datadog,
    /// Zipkin B3 multi-header format (`x-b3-*`).
    B3,
    /// W3C Trace Context (`traceparent` / `tracestate`).
    W3c,
    /// Extract and inject nothing.
    None,
}

impl fmt::Display for PropagationStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PropagationStyle::Datadog => "Datadog",
            PropagationStyle::B3 => "B3",
            PropagationStyle::W3c => "W3C",
            PropagationStyle::None => "none",
        };
        f.write_str(name)
    }
}

/// Ordered map of propagated trace tags (`_dd.p.*` keys).
pub type TraceTags = IndexMap<String, String>;

/// What one propagation style extracted from inbound headers.
///
/// This is the intermediate form produced by each per-style extractor and
/// consumed by [`merge`](merge::merge). Fields other than `style` are
/// absent when the corresponding headers were missing or unusable.
#[derive(Clone, Debug, Default)]
pub struct ExtractedContext {
    /// Which format produced this context.
    pub style: Option<PropagationStyle>,
    /// The extracted trace ID, if any.
    pub trace_id: Option<TraceId>,
    /// ID of the span on the other side of the boundary.
    pub parent_id: Option<u64>,
    /// Sampling priority decided upstream.
    pub sampling_priority: Option<i32>,
    /// Where the trace originated, e.g. "rum".
    pub origin: Option<String>,
    /// Propagated `_dd.p.*` trace tags, in the order received.
    pub trace_tags: TraceTags,
    /// The exact 32-hex trace ID as it appeared in `traceparent`.
    pub full_w3c_trace_id_hex: Option<String>,
    /// `tracestate` entries of other vendors, preserved verbatim for
    /// re-emission.
    pub additional_w3c_tracestate: Option<String>,
    /// Unrecognized subkeys of the `dd` tracestate entry, preserved for
    /// re-emission.
    pub additional_datadog_w3c_tracestate: Option<String>,
    /// The `p:` subkey of the `dd` tracestate entry: the last Datadog span
    /// ID seen on the W3C path, as 16 hex characters.
    pub datadog_w3c_parent_id: Option<String>,
    /// Every header consulted while producing this context, for
    /// diagnostics.
    pub headers_examined: Vec<(String, String)>,
}

/// Everything an injector needs, copied out of the trace segment under its
/// lock so that headers reflect one consistent view of the decision and
/// trace tags.
#[derive(Debug)]
pub(crate) struct InjectionSnapshot<'a> {
    pub(crate) trace_id: TraceId,
    pub(crate) span_id: u64,
    pub(crate) sampling_priority: i32,
    pub(crate) origin: Option<&'a str>,
    pub(crate) trace_tags: &'a TraceTags,
    /// The encoded `x-datadog-tags` value, `None` when empty or over the
    /// configured size cap.
    pub(crate) encoded_trace_tags: Option<&'a str>,
    pub(crate) full_w3c_trace_id_hex: Option<&'a str>,
    pub(crate) additional_w3c_tracestate: Option<&'a str>,
    pub(crate) additional_datadog_w3c_tracestate: Option<&'a str>,
}

/// Records every successful header lookup made through it.
///
/// Extractors consume headers through this decorator so that diagnostics
/// can name exactly which headers contributed to a context.
pub(crate) struct AuditedExtractor<'a> {
    underlying: &'a dyn Extractor,
    entries_found: RefCell<Vec<(String, String)>>,
}

impl<'a> AuditedExtractor<'a> {
    pub(crate) fn new(underlying: &'a dyn Extractor) -> Self {
        AuditedExtractor {
            underlying,
            entries_found: RefCell::new(Vec::new()),
        }
    }

    /// The `(name, value)` pairs found so far, in lookup order.
    pub(crate) fn entries_found(&self) -> Vec<(String, String)> {
        self.entries_found.borrow().clone()
    }

    /// Forget previously recorded lookups.
    pub(crate) fn reset(&self) {
        self.entries_found.borrow_mut().clear();
    }
}

impl Extractor for AuditedExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        let value = self.underlying.get(key);
        if let Some(value) = value {
            self.entries_found
                .borrow_mut()
                .push((key.to_string(), value.to_string()));
        }
        value
    }

    fn keys(&self) -> Vec<&str> {
        self.underlying.keys()
    }
}

/// Diagnostic prefix naming the style and headers involved in a failed
/// extraction.
pub(crate) fn extraction_error_prefix(
    style: Option<PropagationStyle>,
    headers_examined: &[(String, String)],
) -> String {
    let mut message = String::from("While extracting trace context");
    if let Some(style) = style {
        message.push_str(&format!(" in the {style} propagation style"));
    }
    if let Some((first, rest)) = headers_examined.split_first() {
        message.push_str(&format!(" from the following headers: [{}: {}", first.0, first.1));
        for (name, value) in rest {
            message.push_str(&format!(", {name}: {value}"));
        }
        message.push(']');
    }
    message.push_str(", an error occurred: ");
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_map_get_is_case_insensitive() {
        let mut carrier = HashMap::new();
        carrier.set("headerName", "value".to_string());

        assert_eq!(Extractor::get(&carrier, "HEADERNAME"), Some("value"));
    }

    #[test]
    fn hash_map_keys() {
        let mut carrier = HashMap::new();
        carrier.set("headerName1", "value1".to_string());
        carrier.set("headerName2", "value2".to_string());

        let got = Extractor::keys(&carrier);
        assert_eq!(got.len(), 2);
        assert!(got.contains(&"headername1"));
        assert!(got.contains(&"headername2"));
    }

    #[test]
    fn audited_extractor_records_hits_only() {
        let mut carrier = HashMap::new();
        carrier.set("present", "yes".to_string());

        let audited = AuditedExtractor::new(&carrier);
        assert_eq!(audited.get("present"), Some("yes"));
        assert_eq!(audited.get("absent"), None);
        assert_eq!(audited.get("present"), Some("yes"));

        assert_eq!(
            audited.entries_found(),
            vec![
                ("present".to_string(), "yes".to_string()),
                ("present".to_string(), "yes".to_string()),
            ]
        );

        audited.reset();
        assert!(audited.entries_found().is_empty());
    }

    #[test]
    fn error_prefix_mentions_style_and_headers() {
        let headers = vec![
            ("x-datadog-trace-id".to_string(), "123".to_string()),
            ("x-datadog-parent-id".to_string(), "456".to_string()),
        ];
        let prefix = extraction_error_prefix(Some(PropagationStyle::Datadog), &headers);
        assert_eq!(
            prefix,
            "While extracting trace context in the Datadog propagation style \
             from the following headers: [x-datadog-trace-id: 123, \
             x-datadog-parent-id: 456], an error occurred: "
        );

        let prefix = extraction_error_prefix(None, &[]);
        assert_eq!(prefix, "While extracting trace context, an error occurred: ");
    }
}
