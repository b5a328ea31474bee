//! Trace segment lifecycle: span counting, finalization, sampling, and the
//! handoff to the collector.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use datadog_tracing::collector::{CollectorResponse, InMemoryCollector};
use datadog_tracing::trace::{
    SamplingMechanism, SpanConfig, SpanMatcher, SpanSamplerConfig, SpanSamplingRule,
    TraceSamplerConfig, TraceSamplingRule,
};

use common::{headers, test_tracer_builder};

#[test]
fn finalization_sends_every_span_exactly_once() {
    let (builder, collector) = test_tracer_builder();
    let tracer = builder.build().unwrap();

    let root = tracer.create_span(SpanConfig::with_name("root"));
    let child = root.create_child(SpanConfig::with_name("child"));
    let grandchild = child.create_child(SpanConfig::with_name("grandchild"));

    // Finishing out of order is fine; the batch goes out only once the
    // last span finishes.
    drop(child);
    assert_eq!(collector.send_count(), 0);
    drop(root);
    assert_eq!(collector.send_count(), 0);
    drop(grandchild);
    assert_eq!(collector.send_count(), 1);

    let sent = collector.sent_spans();
    assert_eq!(sent.len(), 3);
    // All spans share the trace ID; parenting follows creation.
    let root_data = &sent[0];
    assert_eq!(root_data.name, "root");
    assert_eq!(root_data.parent_id, 0);
    for span in &sent {
        assert_eq!(span.trace_id, root_data.trace_id);
    }
    let child_data = sent.iter().find(|span| span.name == "child").unwrap();
    assert_eq!(child_data.parent_id, root_data.span_id);
    let grandchild_data = sent.iter().find(|span| span.name == "grandchild").unwrap();
    assert_eq!(grandchild_data.parent_id, child_data.span_id);

    // With no rules and no agent feedback, the default mechanism keeps the
    // trace and records its rate on the local root.
    assert_eq!(root_data.numeric_tags.get("_sampling_priority_v1"), Some(&1.0));
    assert_eq!(root_data.numeric_tags.get("_dd.agent_psr"), Some(&1.0));
    assert_eq!(
        root_data.tags.get("_dd.p.dm").map(String::as_str),
        Some("-0")
    );
}

#[test]
fn span_sampler_rescues_spans_from_dropped_traces() {
    let (builder, collector) = test_tracer_builder();
    let tracer = builder
        .with_span_sampler(SpanSamplerConfig {
            rules: vec![SpanSamplingRule {
                matcher: SpanMatcher {
                    name: "span-2".to_string(),
                    ..SpanMatcher::default()
                },
                sample_rate: 1.0,
                max_per_second: None,
            }],
        })
        .build()
        .unwrap();

    let root = tracer.create_span(SpanConfig::with_name("span-1"));
    let second = root.create_child(SpanConfig::with_name("span-2"));
    let third = root.create_child(SpanConfig::with_name("span-3"));
    root.set_sampling_priority(-1);
    drop(second);
    drop(third);
    drop(root);

    // The dropped trace still ships all of its spans; span sampling only
    // tags the rescued one.
    let sent = collector.sent_spans();
    assert_eq!(sent.len(), 3);
    let rescued = sent.iter().find(|span| span.name == "span-2").unwrap();
    assert_eq!(
        rescued.numeric_tags.get("_dd.span_sampling.mechanism"),
        Some(&f64::from(SamplingMechanism::SpanRule.value()))
    );
    assert_eq!(rescued.numeric_tags.get("_dd.span_sampling.rule_rate"), Some(&1.0));
    assert!(!rescued.numeric_tags.contains_key("_dd.span_sampling.max_per_second"));
    for name in ["span-1", "span-3"] {
        let other = sent.iter().find(|span| span.name == *name).unwrap();
        assert!(!other.numeric_tags.contains_key("_dd.span_sampling.mechanism"));
    }

    // The manual drop is recorded, and a dropped trace carries no
    // decision-maker tag.
    let root_data = sent.iter().find(|span| span.name == "span-1").unwrap();
    assert_eq!(root_data.numeric_tags.get("_sampling_priority_v1"), Some(&-1.0));
    assert!(!root_data.tags.contains_key("_dd.p.dm"));
}

#[test]
fn manual_override_wins_and_is_visible_to_observers() {
    let (builder, collector) = test_tracer_builder();
    let tracer = builder.build().unwrap();

    let root = tracer.create_span(SpanConfig::with_name("root"));
    root.set_sampling_priority(2);

    let decision = root.trace_segment().sampling_decision().unwrap();
    assert_eq!(decision.priority, 2);
    assert_eq!(decision.mechanism, Some(SamplingMechanism::Manual));

    // Injection after the override reflects the manual decision.
    let mut outbound = HashMap::new();
    root.inject(&mut outbound);
    assert_eq!(
        outbound.get("x-datadog-sampling-priority").map(String::as_str),
        Some("2")
    );
    assert_eq!(
        outbound.get("x-datadog-tags").map(String::as_str),
        Some("_dd.p.dm=-4")
    );

    drop(root);
    let sent = collector.sent_spans();
    assert_eq!(sent[0].numeric_tags.get("_sampling_priority_v1"), Some(&2.0));
    assert_eq!(sent[0].tags.get("_dd.p.dm").map(String::as_str), Some("-4"));
    // A manual decision has no configured rate, so no rate tags appear.
    assert!(!sent[0].numeric_tags.contains_key("_dd.agent_psr"));
    assert!(!sent[0].numeric_tags.contains_key("_dd.rule_psr"));
}

#[test]
fn rule_sampling_records_rule_and_limiter_rates() {
    let (builder, collector) = test_tracer_builder();
    let tracer = builder
        .with_trace_sampler(TraceSamplerConfig {
            rules: vec![TraceSamplingRule {
                matcher: SpanMatcher::default(),
                sample_rate: 1.0,
            }],
            ..TraceSamplerConfig::default()
        })
        .build()
        .unwrap();

    let root = tracer.create_span(SpanConfig::with_name("root"));
    drop(root);

    let sent = collector.sent_spans();
    assert_eq!(sent[0].numeric_tags.get("_sampling_priority_v1"), Some(&1.0));
    assert_eq!(sent[0].numeric_tags.get("_dd.rule_psr"), Some(&1.0));
    assert_eq!(sent[0].numeric_tags.get("_dd.limit_psr"), Some(&1.0));
    assert!(!sent[0].numeric_tags.contains_key("_dd.agent_psr"));
    assert_eq!(sent[0].tags.get("_dd.p.dm").map(String::as_str), Some("-3"));
}

#[test]
fn agent_rates_from_the_collector_response_apply_to_later_traces() {
    let (builder, _unused) = test_tracer_builder();
    let collector = InMemoryCollector::new().with_response(CollectorResponse {
        sample_rates: HashMap::from([(
            CollectorResponse::KEY_OF_DEFAULT_RATE.to_string(),
            0.0,
        )]),
    });
    let tracer = builder
        .with_collector(Arc::new(collector.clone()))
        .build()
        .unwrap();

    // First trace: no feedback yet, default mechanism.
    let first = tracer.create_span(SpanConfig::with_name("first"));
    let mut unused = HashMap::new();
    first.inject(&mut unused);
    let decision = first.trace_segment().sampling_decision().unwrap();
    assert_eq!(decision.mechanism, Some(SamplingMechanism::Default));
    drop(first);

    // The response delivered with the first send drops everything after.
    let second = tracer.create_span(SpanConfig::with_name("second"));
    second.inject(&mut unused);
    let decision = second.trace_segment().sampling_decision().unwrap();
    assert_eq!(decision.mechanism, Some(SamplingMechanism::AgentRate));
    assert_eq!(decision.priority, 0);
    assert_eq!(decision.configured_rate, Some(0.0));
    drop(second);

    let sent = collector.sent_spans();
    let second_root = sent.iter().find(|span| span.name == "second").unwrap();
    assert_eq!(second_root.numeric_tags.get("_dd.agent_psr"), Some(&0.0));
}

#[test]
fn origin_and_hostname_are_stamped_at_finalization() {
    let (builder, collector) = test_tracer_builder();
    let tracer = builder.with_hostname("app-host-1").build().unwrap();

    let inbound = headers(&[
        ("x-datadog-trace-id", "9"),
        ("x-datadog-parent-id", "10"),
        ("x-datadog-sampling-priority", "1"),
        ("x-datadog-origin", "synthetics"),
    ]);
    let root = tracer
        .extract_span(&inbound, SpanConfig::with_name("root"))
        .unwrap();
    let child = root.create_child(SpanConfig::with_name("child"));
    drop(root);
    drop(child);

    let sent = collector.sent_spans();
    assert_eq!(sent.len(), 2);
    for span in &sent {
        assert_eq!(span.tags.get("_dd.origin").map(String::as_str), Some("synthetics"));
    }
    let root_data = sent.iter().find(|span| span.name == "root").unwrap();
    assert_eq!(
        root_data.tags.get("_dd.hostname").map(String::as_str),
        Some("app-host-1")
    );
    let child_data = sent.iter().find(|span| span.name == "child").unwrap();
    assert!(!child_data.tags.contains_key("_dd.hostname"));
}

#[test]
fn reserved_tags_are_not_writable_through_the_public_surface() {
    let (builder, collector) = test_tracer_builder();
    let tracer = builder.build().unwrap();

    let root = tracer.create_span(SpanConfig::with_name("root"));
    root.set_tag("_dd.p.dm", "-99");
    root.set_tag("_dd.anything", "nope");
    root.set_tag("error.message", "nope");
    root.set_tag("kept", "yes");
    assert_eq!(root.lookup_tag("_dd.p.dm"), None);
    assert_eq!(root.lookup_tag("kept").as_deref(), Some("yes"));

    // remove_tag is equally guarded.
    root.set_error_message("boom");
    root.remove_tag("error.message");

    drop(root);
    let sent = collector.sent_spans();
    assert_eq!(sent[0].tags.get("kept").map(String::as_str), Some("yes"));
    assert_eq!(sent[0].tags.get("error.message").map(String::as_str), Some("boom"));
    assert!(sent[0].error);
    assert!(!sent[0].tags.contains_key("_dd.anything"));
    // The only _dd.p.dm value is the one the sampler wrote.
    assert_eq!(sent[0].tags.get("_dd.p.dm").map(String::as_str), Some("-0"));
}

#[test]
fn error_operations_maintain_the_error_tags() {
    let (builder, collector) = test_tracer_builder();
    let tracer = builder.build().unwrap();

    let root = tracer.create_span(SpanConfig::with_name("root"));
    root.set_error_message("connection reset");
    root.set_error_type("IOError");
    root.set_error_stack("frame 1\nframe 2");
    assert!(root.error());

    // Clearing the error drops the message and type, per the reporting
    // contract; the stack is left to the application.
    root.set_error(false);
    assert!(!root.error());

    drop(root);
    let sent = collector.sent_spans();
    assert!(!sent[0].tags.contains_key("error.message"));
    assert!(!sent[0].tags.contains_key("error.type"));
    assert_eq!(
        sent[0].tags.get("error.stack").map(String::as_str),
        Some("frame 1\nframe 2")
    );
}

#[test]
fn default_tags_environment_and_version_apply_to_spans() {
    let (builder, collector) = test_tracer_builder();
    let tracer = builder
        .with_environment("staging")
        .with_version("1.2.3")
        .with_global_tag("team", "platform")
        .build()
        .unwrap();

    let root = tracer.create_span(SpanConfig::with_name("root"));
    drop(root);

    let sent = collector.sent_spans();
    assert_eq!(sent[0].service, "test-service");
    assert_eq!(sent[0].service_type, "web");
    assert_eq!(sent[0].resource, "root");
    assert_eq!(sent[0].tags.get("env").map(String::as_str), Some("staging"));
    assert_eq!(sent[0].tags.get("version").map(String::as_str), Some("1.2.3"));
    assert_eq!(sent[0].tags.get("team").map(String::as_str), Some("platform"));
}

#[test]
fn concurrent_spans_finalize_once() {
    let (builder, collector) = test_tracer_builder();
    let tracer = builder.build().unwrap();

    let root = tracer.create_span(SpanConfig::with_name("root"));
    let workers: Vec<_> = (0..8)
        .map(|i| {
            let span = root.create_child(SpanConfig::with_name(format!("worker-{i}")));
            thread::spawn(move || {
                span.set_tag("worker", i.to_string());
                for j in 0..50 {
                    let inner = span.create_child(SpanConfig::with_name(format!("job-{i}-{j}")));
                    inner.set_tag("job", j.to_string());
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    drop(root);

    assert_eq!(collector.send_count(), 1);
    let sent = collector.sent_spans();
    assert_eq!(sent.len(), 1 + 8 + 8 * 50);
    let trace_id = sent[0].trace_id;
    for span in &sent {
        assert_eq!(span.trace_id, trace_id);
    }
}
