//! Codec for the `x-datadog-tags` header.
//!
//! The header value is a sequence of `key=value` pairs joined by commas.
//! Keys of interest all begin with `_dd.p.`; filtering is the caller's
//! concern, this module only handles the framing.

use crate::error::Error;

/// Decode a header value into `(key, value)` pairs, in order.
///
/// Pairs are split on the first `=`. A non-empty entry without `=` fails
/// the whole header.
pub(crate) fn decode_tags(header_value: &str) -> Result<Vec<(String, String)>, Error> {
    let mut pairs = Vec::new();
    let trimmed = header_value.trim();
    if trimmed.is_empty() {
        return Ok(pairs);
    }

    for entry in trimmed.split(',') {
        match entry.split_once('=') {
            Some((key, value)) => pairs.push((key.to_string(), value.to_string())),
            None => return Err(Error::MalformedTraceTags(header_value.to_string())),
        }
    }
    Ok(pairs)
}

/// Encode `(key, value)` pairs as a header value.
pub(crate) fn encode_tags<'a>(
    tags: impl IntoIterator<Item = (&'a String, &'a String)>,
) -> String {
    let mut result = String::new();
    for (key, value) in tags {
        if !result.is_empty() {
            result.push(',');
        }
        result.push_str(key);
        result.push('=');
        result.push_str(value);
    }
    result
}
