//! W3C Trace Context propagation style: `traceparent` and `tracestate`.
//!
//! The library owns the `dd` entry within `tracestate`; entries belonging
//! to other vendors are preserved verbatim so they round-trip through this
//! process untouched.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::Error;
use crate::id::{hex_padded, TraceId};
use crate::propagation::{
    ExtractedContext, Extractor, InjectionSnapshot, Injector, PropagationStyle, TraceTags,
};
use crate::tags;

const TRACEPARENT_HEADER: &str = "traceparent";
const TRACESTATE_HEADER: &str = "tracestate";

/// Recommended maximum length of the `dd` tracestate entry. Subkeys are
/// shed, least important first, to stay under it.
const DATADOG_TRACESTATE_ENTRY_MAX_SIZE: usize = 256;

static TRACEPARENT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        "^([0-9a-f]{2})\
         -([0-9a-f]{32})\
         -([0-9a-f]{16})\
         -([0-9a-f]{2})\
         (?:-.*)?$",
    )
    .expect("traceparent pattern compiles")
});

/// Populate `result` from the `traceparent` header. Returns `None` on
/// success, or the value for the `_dd.w3c_extraction_error` tag.
fn extract_traceparent(result: &mut ExtractedContext, headers: &dyn Extractor) -> Option<String> {
    let traceparent = headers.get(TRACEPARENT_HEADER)?.trim().to_string();

    let captures = match TRACEPARENT_PATTERN.captures(&traceparent) {
        Some(captures) => captures,
        None => return Some("malformed_traceparent".to_string()),
    };

    let version = &captures[1];
    if version == "ff" {
        return Some("invalid_version".to_string());
    }

    let trace_id_hex = &captures[2];
    if trace_id_hex.bytes().all(|b| b == b'0') {
        return Some("trace_id_zero".to_string());
    }
    result.full_w3c_trace_id_hex = Some(trace_id_hex.to_string());
    // The pattern guarantees both halves parse.
    result.trace_id = TraceId::parse_hex(trace_id_hex);

    // The pattern guarantees 16 hex characters, which always fit.
    let parent_id = u64::from_str_radix(&captures[3], 16).unwrap_or(0);
    if parent_id == 0 {
        return Some("parent_id_zero".to_string());
    }
    result.parent_id = Some(parent_id);

    let flags = u32::from_str_radix(&captures[4], 16).unwrap_or(0);
    result.sampling_priority = Some((flags & 1) as i32);

    None
}

/// The `dd` entry's value and everything else in `tracestate`, rejoined
/// without the comma that separated them.
struct PartiallyParsedTracestate {
    datadog_value: String,
    other_entries: String,
}

/// Locate the first `dd=` entry among the comma-separated `tracestate`
/// entries. Entries are trimmed before inspection; entries without `=` and
/// all-whitespace entries are skipped. Returns `None` when there is no `dd`
/// entry.
fn parse_tracestate(tracestate: &str) -> Option<PartiallyParsedTracestate> {
    let end = tracestate.len();
    let mut pair_begin = 0;
    while pair_begin < end {
        let pair_end = tracestate[pair_begin..]
            .find(',')
            .map(|offset| pair_begin + offset)
            .unwrap_or(end);
        let pair = tracestate[pair_begin..pair_end].trim();

        let key_value = pair.split_once('=');
        match key_value {
            Some(("dd", value)) => {
                // Everything before and after the entry, minus the comma at
                // the seam, is preserved for re-emission.
                let mut other_entries = String::new();
                if pair_begin != 0 {
                    other_entries.push_str(&tracestate[..pair_begin - 1]);
                    if pair_end != end {
                        other_entries.push_str(&tracestate[pair_end..]);
                    }
                } else if pair_end != end {
                    other_entries.push_str(&tracestate[pair_end + 1..]);
                }
                return Some(PartiallyParsedTracestate {
                    datadog_value: value.to_string(),
                    other_entries,
                });
            }
            _ => {
                pair_begin = if pair_end == end { end } else { pair_end + 1 };
            }
        }
    }
    None
}

/// Interpret the `;`-separated `k:v` subkeys of the `dd` tracestate entry.
fn parse_datadog_tracestate(result: &mut ExtractedContext, datadog_value: &str) {
    for pair in datadog_value.split(';') {
        if pair.is_empty() {
            continue;
        }
        let Some((key, value)) = pair.split_once(':') else {
            continue;
        };

        if key == "o" {
            result.origin = Some(value.to_string());
        } else if key == "s" {
            let Ok(priority) = value.parse::<i32>() else {
                continue;
            };
            // The tracestate priority applies unless it disagrees in sign
            // with the one already parsed from traceparent.
            match result.sampling_priority {
                Some(existing) if (existing > 0) != (priority > 0) => {}
                _ => result.sampling_priority = Some(priority),
            }
        } else if key == "p" {
            result.datadog_w3c_parent_id = Some(value.to_string());
        } else if let Some(tag_suffix) = key.strip_prefix("t.") {
            let tag_name = format!("{}{tag_suffix}", tags::PROPAGATED_PREFIX);
            // Tag values encode '=' as '~' on the wire.
            let decoded_value = value.replace('~', "=");
            result.trace_tags.insert(tag_name, decoded_value);
        } else {
            let entries = result
                .additional_datadog_w3c_tracestate
                .get_or_insert_with(String::new);
            if !entries.is_empty() {
                entries.push(';');
            }
            entries.push_str(pair);
        }
    }
}

fn extract_tracestate(result: &mut ExtractedContext, headers: &dyn Extractor) {
    let Some(tracestate) = headers.get(TRACESTATE_HEADER) else {
        return;
    };
    let tracestate = tracestate.trim();

    match parse_tracestate(tracestate) {
        None => {
            // No "dd" entry; there is nothing to extract, but foreign
            // entries still round-trip.
            if !tracestate.is_empty() {
                result.additional_w3c_tracestate = Some(tracestate.to_string());
            }
        }
        Some(parsed) => {
            if !parsed.other_entries.is_empty() {
                result.additional_w3c_tracestate = Some(parsed.other_entries);
            }
            parse_datadog_tracestate(result, &parsed.datadog_value);
        }
    }
}

/// Extract trace context from `traceparent`/`tracestate` headers.
pub(crate) fn extract(
    headers: &dyn Extractor,
    span_tags: &mut HashMap<String, String>,
) -> Result<ExtractedContext, Error> {
    let mut result = ExtractedContext {
        style: Some(PropagationStyle::W3c),
        ..ExtractedContext::default()
    };

    if let Some(error_tag_value) = extract_traceparent(&mut result, headers) {
        span_tags.insert(
            tags::internal::W3C_EXTRACTION_ERROR.to_string(),
            error_tag_value,
        );
        return Ok(ExtractedContext {
            style: Some(PropagationStyle::W3c),
            ..ExtractedContext::default()
        });
    }

    // Without a trace ID from traceparent there is no point in tracestate.
    if result.trace_id.is_none() {
        return Ok(result);
    }

    extract_tracestate(&mut result, headers);

    Ok(result)
}

/// Render the `traceparent` header value.
pub(crate) fn encode_traceparent(
    trace_id: TraceId,
    full_w3c_trace_id_hex: Option<&str>,
    span_id: u64,
    sampling_priority: i32,
) -> String {
    let trace_id_hex = match full_w3c_trace_id_hex {
        Some(full) => full.to_string(),
        None => trace_id.padded_hex(),
    };
    format!(
        "00-{}-{}-{}",
        trace_id_hex,
        hex_padded(span_id),
        if sampling_priority > 0 { "01" } else { "00" }
    )
}

/// `tracestate` values may not contain `,`, `;` or `=`; `=` becomes `~` so
/// it survives the round trip, the separators are blanked out.
fn sanitize_tracestate_value(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            '=' => '~',
            ',' | ';' => '_',
            other => other,
        })
        .collect()
}

/// Render the `tracestate` header value.
///
/// The `dd` entry is capped at 256 bytes: unrecognized subkeys carried over
/// from extraction are shed first, then `t.*` tags from the back; `s:`,
/// `o:` and `p:` always survive.
pub(crate) fn encode_tracestate(
    sampling_priority: i32,
    origin: Option<&str>,
    span_id: u64,
    trace_tags: &TraceTags,
    additional_datadog_w3c_tracestate: Option<&str>,
    additional_w3c_tracestate: Option<&str>,
) -> String {
    let mut base = format!("dd=s:{sampling_priority}");
    if let Some(origin) = origin {
        base.push_str(";o:");
        base.push_str(&sanitize_tracestate_value(origin));
    }
    base.push_str(";p:");
    base.push_str(&hex_padded(span_id));

    let mut tag_parts: Vec<String> = trace_tags
        .iter()
        .filter_map(|(key, value)| {
            let suffix = key.strip_prefix(tags::PROPAGATED_PREFIX)?;
            Some(format!(";t.{suffix}:{}", sanitize_tracestate_value(value)))
        })
        .collect();
    let mut extra = additional_datadog_w3c_tracestate.map(|entries| format!(";{entries}"));

    let entry_size = |base: &str, parts: &[String], extra: &Option<String>| {
        base.len()
            + parts.iter().map(String::len).sum::<usize>()
            + extra.as_ref().map(String::len).unwrap_or(0)
    };
    while entry_size(&base, &tag_parts, &extra) > DATADOG_TRACESTATE_ENTRY_MAX_SIZE {
        if extra.take().is_none() && tag_parts.pop().is_none() {
            break;
        }
    }

    let mut result = base;
    for part in &tag_parts {
        result.push_str(part);
    }
    if let Some(extra) = extra {
        result.push_str(&extra);
    }
    if let Some(other_vendors) = additional_w3c_tracestate {
        result.push(',');
        result.push_str(other_vendors);
    }
    result
}

/// Write `traceparent` and `tracestate` headers for the given snapshot.
pub(crate) fn inject(writer: &mut dyn Injector, snapshot: &InjectionSnapshot<'_>) {
    writer.set(
        TRACEPARENT_HEADER,
        encode_traceparent(
            snapshot.trace_id,
            snapshot.full_w3c_trace_id_hex,
            snapshot.span_id,
            snapshot.sampling_priority,
        ),
    );
    writer.set(
        TRACESTATE_HEADER,
        encode_tracestate(
            snapshot.sampling_priority,
            snapshot.origin,
            snapshot.span_id,
            snapshot.trace_tags,
            snapshot.additional_datadog_w3c_tracestate,
            snapshot.additional_w3c_tracestate,
        ),
    );
}
