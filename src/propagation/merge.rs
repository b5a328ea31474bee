//! Reconciliation of contexts extracted by concurrently enabled styles.

use std::collections::HashMap;

use crate::id::hex_padded;
use crate::propagation::{ExtractedContext, PropagationStyle};

const ZERO_PARENT_ID_HEX: &str = "0000000000000000";

/// Merge the contexts produced by each enabled style into one authoritative
/// context.
///
/// The first style, in configured order, whose context carries a trace ID
/// becomes the primary. When the primary is not W3C but a W3C context for
/// the same trace exists, the W3C side wins the parent ID: `traceparent`
/// names the span that is actually in flight across intermediaries, while
/// the parent recorded by the primary style is preserved as the `p:`
/// tracestate subkey so the link is not lost.
pub(crate) fn merge(
    styles: &[PropagationStyle],
    contexts: &HashMap<PropagationStyle, ExtractedContext>,
) -> ExtractedContext {
    let primary = styles
        .iter()
        .filter_map(|style| contexts.get(style))
        .find(|context| context.trace_id.is_some());
    let Some(primary) = primary else {
        return ExtractedContext::default();
    };
    let mut result = primary.clone();

    if result.style == Some(PropagationStyle::W3c) {
        return result;
    }

    let w3c = contexts.get(&PropagationStyle::W3c);
    let datadog = contexts.get(&PropagationStyle::Datadog);

    if let Some(w3c) = w3c {
        if w3c.trace_id == result.trace_id {
            result.additional_w3c_tracestate = w3c.additional_w3c_tracestate.clone();
            result.additional_datadog_w3c_tracestate =
                w3c.additional_datadog_w3c_tracestate.clone();
            result
                .headers_examined
                .extend(w3c.headers_examined.iter().cloned());

            if result.parent_id != w3c.parent_id {
                if w3c
                    .datadog_w3c_parent_id
                    .as_deref()
                    .is_some_and(|parent| parent != ZERO_PARENT_ID_HEX)
                {
                    result.datadog_w3c_parent_id = w3c.datadog_w3c_parent_id.clone();
                } else if let Some(datadog) = datadog {
                    if datadog.trace_id == result.trace_id {
                        if let Some(parent_id) = datadog.parent_id {
                            result.datadog_w3c_parent_id = Some(hex_padded(parent_id));
                        }
                    }
                }

                result.parent_id = w3c.parent_id;
            }
        }
    }

    result
}
