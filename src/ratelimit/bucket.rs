//! Lazy-refill token bucket arithmetic.

use super::args::RateLimitArgs;

/// Refill a bucket as observed at the client's time.
///
/// Returns the refilled amount together with the advanced refill mark.
/// Refills land at whole multiples of `refill_time_ms` past
/// `last_refilled_at_ms`; the remainder of the elapsed span is not consumed,
/// so partial progress toward the next refill carries across calls. A client
/// time behind the refill mark adds nothing and leaves the mark in place.
pub fn adjust_amount(
    curr_amount: i64,
    last_refilled_at_ms: i64,
    args: &RateLimitArgs,
) -> (i64, i64) {
    let time_span = (args.client_time_ms - last_refilled_at_ms).max(0);
    let refills = time_span / args.refill_time_ms;
    // advance the refill mark to the latest whole refill
    let new_refilled_at_ms = last_refilled_at_ms + refills * args.refill_time_ms;
    // saturating: a bucket idle for eons must clamp at capacity, not wrap
    let new_amount = curr_amount
        .saturating_add(refills.saturating_mul(args.refill_amount))
        .min(args.max_amount);
    (new_amount, new_refilled_at_ms)
}
