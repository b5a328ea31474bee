//! Patterns that sampling rules use to select spans.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::glob::glob_match;
use crate::trace::span::SpanData;

fn default_pattern() -> String {
    "*".to_string()
}

/// A pattern that a span either matches or doesn't, depending on its
/// service, operation name, resource name, and tags.
///
/// `service`, `name`, and `resource` are glob patterns (`*` and `?`). For
/// each entry of `tags`, the span must carry the key literally and its
/// value must match the entry's glob pattern.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpanMatcher {
    /// Glob over the span's service name.
    #[serde(default = "default_pattern")]
    pub service: String,
    /// Glob over the span's operation name.
    #[serde(default = "default_pattern")]
    pub name: String,
    /// Glob over the span's resource name.
    #[serde(default = "default_pattern")]
    pub resource: String,
    /// Literal tag keys mapped to glob patterns over their values.
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

impl Default for SpanMatcher {
    /// The catch-all matcher.
    fn default() -> Self {
        SpanMatcher {
            service: default_pattern(),
            name: default_pattern(),
            resource: default_pattern(),
            tags: HashMap::new(),
        }
    }
}

impl SpanMatcher {
    /// Whether `span` matches this pattern.
    pub(crate) fn matches(&self, span: &SpanData) -> bool {
        glob_match(&self.service, &span.service)
            && glob_match(&self.name, &span.name)
            && glob_match(&self.resource, &span.resource)
            && self.tags.iter().all(|(key, pattern)| {
                span.tags
                    .get(key)
                    .is_some_and(|value| glob_match(pattern, value))
            })
    }
}
