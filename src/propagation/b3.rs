//! B3 propagation style, multi-header variant (`x-b3-*`).
//!
//! The single-header `b3` variant is not supported.

use std::collections::HashMap;

use crate::error::Error;
use crate::id::{hex, hex_padded, TraceId};
use crate::propagation::{ExtractedContext, Extractor, Injector, PropagationStyle};

const TRACE_ID_HEADER: &str = "x-b3-traceid";
const SPAN_ID_HEADER: &str = "x-b3-spanid";
const SAMPLED_HEADER: &str = "x-b3-sampled";

/// Extract trace context from `x-b3-*` headers.
pub(crate) fn extract(
    headers: &dyn Extractor,
    _span_tags: &mut HashMap<String, String>,
) -> Result<ExtractedContext, Error> {
    let mut result = ExtractedContext {
        style: Some(PropagationStyle::B3),
        ..ExtractedContext::default()
    };

    if let Some(found) = headers.get(TRACE_ID_HEADER) {
        result.trace_id = Some(TraceId::parse_hex(found.trim()).ok_or_else(|| {
            Error::InvalidHeader {
                style: "B3",
                what: "trace ID",
                header: TRACE_ID_HEADER,
                value: found.to_string(),
            }
        })?);
    }

    if let Some(found) = headers.get(SPAN_ID_HEADER) {
        result.parent_id = Some(
            u64::from_str_radix(found.trim(), 16).map_err(|_| Error::InvalidHeader {
                style: "B3",
                what: "parent span ID",
                header: SPAN_ID_HEADER,
                value: found.to_string(),
            })?,
        );
    }

    if let Some(found) = headers.get(SAMPLED_HEADER) {
        result.sampling_priority =
            Some(found.trim().parse::<i32>().map_err(|_| Error::InvalidHeader {
                style: "B3",
                what: "sampling priority",
                header: SAMPLED_HEADER,
                value: found.to_string(),
            })?);
    }

    Ok(result)
}

/// Write `x-b3-*` headers for the given snapshot, plus the Datadog origin
/// and trace-tag headers that bridge across B3-only intermediaries.
pub(crate) fn inject(writer: &mut dyn Injector, snapshot: &super::InjectionSnapshot<'_>) {
    let trace_id = if snapshot.trace_id.high == 0 {
        hex(snapshot.trace_id.low)
    } else {
        format!("{:x}{}", snapshot.trace_id.high, hex_padded(snapshot.trace_id.low))
    };
    writer.set(TRACE_ID_HEADER, trace_id);
    writer.set(SPAN_ID_HEADER, hex(snapshot.span_id));
    writer.set(
        SAMPLED_HEADER,
        if snapshot.sampling_priority > 0 { "1" } else { "0" }.to_string(),
    );
    super::datadog::inject_bridged_headers(writer, snapshot);
}
