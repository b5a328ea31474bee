//! Trace and span identifiers.
//!
//! Datadog trace IDs are 128-bit values kept as two 64-bit halves. A trace
//! whose `high` half is zero is treated as a 64-bit trace for compatibility
//! with consumers that predate 128-bit IDs. Span IDs are plain `u64`s where
//! zero means "unset."

use std::fmt;

/// A 128-bit trace ID, as two 64-bit halves.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TraceId {
    /// The high 64 bits, zero for 64-bit traces.
    pub high: u64,
    /// The low 64 bits.
    pub low: u64,
}

impl TraceId {
    /// Create a 64-bit trace ID (`high` is zero).
    pub const fn from_u64(low: u64) -> Self {
        TraceId { high: 0, low }
    }

    /// Create a 128-bit trace ID from both halves.
    pub const fn new(high: u64, low: u64) -> Self {
        TraceId { high, low }
    }

    /// Parse up to 32 hex characters, most significant first. Shorter input
    /// is interpreted as if left-padded with zeroes.
    pub fn parse_hex(input: &str) -> Option<TraceId> {
        if input.is_empty() || input.len() > 32 {
            return None;
        }
        if input.len() <= 16 {
            let low = u64::from_str_radix(input, 16).ok()?;
            return Some(TraceId::from_u64(low));
        }
        let (head, tail) = input.split_at(input.len() - 16);
        let high = u64::from_str_radix(head, 16).ok()?;
        let low = u64::from_str_radix(tail, 16).ok()?;
        Some(TraceId { high, low })
    }

    /// Parse a decimal value as the low half of a trace ID.
    pub fn parse_decimal(input: &str) -> Option<TraceId> {
        input.parse::<u64>().ok().map(TraceId::from_u64)
    }

    /// Whether both halves are zero.
    pub fn is_zero(&self) -> bool {
        self.high == 0 && self.low == 0
    }

    /// The full 128-bit value as exactly 32 lowercase hex characters.
    pub fn padded_hex(&self) -> String {
        format!("{:016x}{:016x}", self.high, self.low)
    }
}

impl fmt::Display for TraceId {
    /// Unpadded lowercase hex; a zero high half is elided.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.high == 0 {
            write!(f, "{:x}", self.low)
        } else {
            write!(f, "{:x}{:016x}", self.high, self.low)
        }
    }
}

/// Unpadded lowercase hex of a 64-bit ID.
pub(crate) fn hex(value: u64) -> String {
    format!("{value:x}")
}

/// Lowercase hex of a 64-bit ID, left-zero-padded to 16 characters.
pub(crate) fn hex_padded(value: u64) -> String {
    format!("{value:016x}")
}
