//! Token-bucket rate limiting core.
//!
//! The module splits along the request path: `commands` is the wire command
//! table, `args` turns textual arguments into a typed request, `bucket`
//! holds the lazy-refill arithmetic, `codec` defines the stored byte layout,
//! `handler` ties them together over a key-value store with per-key write
//! exclusion, and `compaction` garbage-collects buckets that have refilled
//! back to full on their own.

pub mod codec;

mod args;
mod bucket;
mod commands;
mod compaction;
mod handler;

pub use args::{parse_rate_limit_args, ParseError, RateLimitArgs};
pub use bucket::adjust_amount;
pub use commands::Command;
pub use compaction::BucketGcFilter;
pub use handler::{CommandError, CommandOutcome, RateLimitHandler};

use std::time::{SystemTime, UNIX_EPOCH};

/// Current server wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
