//! Datadog propagation style: the `x-datadog-*` headers.

use std::collections::HashMap;

use crate::error::Error;
use crate::id::TraceId;
use crate::propagation::tag_codec;
use crate::propagation::{ExtractedContext, Extractor, Injector, PropagationStyle};
use crate::tags;

const TRACE_ID_HEADER: &str = "x-datadog-trace-id";
const PARENT_ID_HEADER: &str = "x-datadog-parent-id";
const SAMPLING_PRIORITY_HEADER: &str = "x-datadog-sampling-priority";
const ORIGIN_HEADER: &str = "x-datadog-origin";
const TRACE_TAGS_HEADER: &str = "x-datadog-tags";

/// Parse the value of a `_dd.p.tid` tag: exactly 16 hex characters.
pub(crate) fn parse_trace_id_high(value: &str) -> Option<u64> {
    if value.len() != 16 {
        return None;
    }
    u64::from_str_radix(value, 16).ok()
}

/// Decode an `x-datadog-tags` value into `context.trace_tags`, integrating
/// `_dd.p.tid` into the trace ID's high half. Decoding problems are not
/// fatal: they set `_dd.propagation_error` on `span_tags` instead.
fn handle_trace_tags(
    header_value: &str,
    context: &mut ExtractedContext,
    span_tags: &mut HashMap<String, String>,
) {
    let pairs = match tag_codec::decode_tags(header_value) {
        Ok(pairs) => pairs,
        Err(error) => {
            tracing::error!(%error, "could not decode x-datadog-tags");
            span_tags.insert(
                tags::internal::PROPAGATION_ERROR.to_string(),
                "decoding_error".to_string(),
            );
            return;
        }
    };

    for (key, value) in pairs {
        if !key.starts_with(tags::PROPAGATED_PREFIX) {
            continue;
        }

        if key == tags::internal::TRACE_ID_HIGH {
            let Some(high) = parse_trace_id_high(&value) else {
                span_tags.insert(
                    tags::internal::PROPAGATION_ERROR.to_string(),
                    format!("malformed_tid {value}"),
                );
                continue;
            };

            // The lower 64 bits were already extracted from
            // x-datadog-trace-id, if present.
            if let Some(trace_id) = context.trace_id.as_mut() {
                trace_id.high = high;
            }
        }

        context.trace_tags.insert(key, value);
    }
}

/// Extract trace context from `x-datadog-*` headers.
pub(crate) fn extract(
    headers: &dyn Extractor,
    span_tags: &mut HashMap<String, String>,
) -> Result<ExtractedContext, Error> {
    let mut result = ExtractedContext {
        style: Some(PropagationStyle::Datadog),
        ..ExtractedContext::default()
    };

    if let Some(found) = headers.get(TRACE_ID_HEADER) {
        result.trace_id = Some(TraceId::parse_decimal(found.trim()).ok_or_else(|| {
            Error::InvalidHeader {
                style: "Datadog",
                what: "trace ID",
                header: TRACE_ID_HEADER,
                value: found.to_string(),
            }
        })?);
    }

    if let Some(found) = headers.get(PARENT_ID_HEADER) {
        result.parent_id =
            Some(found.trim().parse::<u64>().map_err(|_| Error::InvalidHeader {
                style: "Datadog",
                what: "parent span ID",
                header: PARENT_ID_HEADER,
                value: found.to_string(),
            })?);
    }

    if let Some(found) = headers.get(SAMPLING_PRIORITY_HEADER) {
        result.sampling_priority =
            Some(found.trim().parse::<i32>().map_err(|_| Error::InvalidHeader {
                style: "Datadog",
                what: "sampling priority",
                header: SAMPLING_PRIORITY_HEADER,
                value: found.to_string(),
            })?);
    }

    if let Some(origin) = headers.get(ORIGIN_HEADER) {
        result.origin = Some(origin.to_string());
    }

    if let Some(trace_tags) = headers.get(TRACE_TAGS_HEADER) {
        handle_trace_tags(trace_tags, &mut result, span_tags);
    }

    Ok(result)
}

/// Write `x-datadog-*` headers for the given snapshot.
pub(crate) fn inject(writer: &mut dyn Injector, snapshot: &super::InjectionSnapshot<'_>) {
    writer.set(TRACE_ID_HEADER, snapshot.trace_id.low.to_string());
    writer.set(PARENT_ID_HEADER, snapshot.span_id.to_string());
    writer.set(
        SAMPLING_PRIORITY_HEADER,
        snapshot.sampling_priority.to_string(),
    );
    if let Some(origin) = snapshot.origin {
        writer.set(ORIGIN_HEADER, origin.to_string());
    }
    if let Some(encoded_tags) = snapshot.encoded_trace_tags {
        writer.set(TRACE_TAGS_HEADER, encoded_tags.to_string());
    }
}

/// Emit the origin and trace-tag headers that ride along with non-Datadog
/// styles.
pub(crate) fn inject_bridged_headers(
    writer: &mut dyn Injector,
    snapshot: &super::InjectionSnapshot<'_>,
) {
    if let Some(origin) = snapshot.origin {
        writer.set(ORIGIN_HEADER, origin.to_string());
    }
    if let Some(encoded_tags) = snapshot.encoded_trace_tags {
        writer.set(TRACE_TAGS_HEADER, encoded_tags.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn extract_from(pairs: &[(&str, &str)]) -> (Result<ExtractedContext, Error>, HashMap<String, String>) {
        let mut headers = HashMap::new();
        for (name, value) in pairs {
            headers.insert(name.to_string(), value.to_string());
        }
        let mut span_tags = HashMap::new();
        let result = extract(&headers, &mut span_tags);
        (result, span_tags)
    }

    #[test]
    fn extracts_ids_priority_and_origin() {
        let (result, span_tags) = extract_from(&[
            ("x-datadog-trace-id", "11803532876627986230"),
            ("x-datadog-parent-id", "67667974448284343"),
            ("x-datadog-sampling-priority", "-1"),
            ("x-datadog-origin", "synthetics"),
        ]);
        let context = result.unwrap();
        assert_eq!(context.style, Some(PropagationStyle::Datadog));
        assert_eq!(context.trace_id, Some(TraceId::from_u64(11803532876627986230)));
        assert_eq!(context.parent_id, Some(67667974448284343));
        assert_eq!(context.sampling_priority, Some(-1));
        assert_eq!(context.origin.as_deref(), Some("synthetics"));
        assert!(span_tags.is_empty());
    }

    #[test]
    fn missing_headers_extract_nothing() {
        let (result, _) = extract_from(&[]);
        let context = result.unwrap();
        assert_eq!(context.trace_id, None);
        assert_eq!(context.parent_id, None);
        assert_eq!(context.sampling_priority, None);
    }

    #[test]
    fn unparseable_ids_are_errors() {
        let (result, _) = extract_from(&[("x-datadog-trace-id", "forty-two")]);
        let message = result.unwrap_err().to_string();
        assert!(message.contains("Datadog"), "{message}");
        assert!(message.contains("x-datadog-trace-id"), "{message}");

        let (result, _) = extract_from(&[
            ("x-datadog-trace-id", "1"),
            ("x-datadog-parent-id", "0x10"),
        ]);
        assert!(result.is_err());

        let (result, _) = extract_from(&[
            ("x-datadog-trace-id", "1"),
            ("x-datadog-sampling-priority", "one"),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn trace_tags_set_high_bits() {
        let (result, span_tags) = extract_from(&[
            ("x-datadog-trace-id", "1"),
            ("x-datadog-tags", "_dd.p.dm=-4,_dd.p.tid=640cfd8d00000000"),
        ]);
        let context = result.unwrap();
        assert_eq!(context.trace_id, Some(TraceId::new(0x640cfd8d00000000, 1)));
        assert_eq!(context.trace_tags.get("_dd.p.dm").map(String::as_str), Some("-4"));
        assert_eq!(
            context.trace_tags.get("_dd.p.tid").map(String::as_str),
            Some("640cfd8d00000000")
        );
        assert!(span_tags.is_empty());
    }

    #[test]
    fn non_propagated_tags_are_dropped() {
        let (result, _) = extract_from(&[
            ("x-datadog-trace-id", "1"),
            ("x-datadog-tags", "_dd.p.keep=yes,other=no,_dd.nope=no"),
        ]);
        let context = result.unwrap();
        assert_eq!(context.trace_tags.len(), 1);
        assert_eq!(context.trace_tags.get("_dd.p.keep").map(String::as_str), Some("yes"));
    }

    #[test]
    fn malformed_tid_sets_propagation_error() {
        let (result, span_tags) = extract_from(&[
            ("x-datadog-trace-id", "1"),
            ("x-datadog-tags", "_dd.p.tid=nothex"),
        ]);
        let context = result.unwrap();
        assert_eq!(context.trace_id, Some(TraceId::from_u64(1)));
        assert!(!context.trace_tags.contains_key("_dd.p.tid"));
        assert_eq!(
            span_tags.get("_dd.propagation_error").map(String::as_str),
            Some("malformed_tid nothex")
        );
    }

    #[test]
    fn tag_decode_failure_is_not_fatal() {
        let (result, span_tags) = extract_from(&[
            ("x-datadog-trace-id", "1"),
            ("x-datadog-tags", "missing-equals"),
        ]);
        let context = result.unwrap();
        assert_eq!(context.trace_id, Some(TraceId::from_u64(1)));
        assert!(context.trace_tags.is_empty());
        assert_eq!(
            span_tags.get("_dd.propagation_error").map(String::as_str),
            Some("decoding_error")
        );
    }
}
