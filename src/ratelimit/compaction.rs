//! Compaction-time garbage collection of idle buckets.

use crate::storage::CompactionFilter;

use super::codec;
use super::now_ms;

/// Evicts bucket entries idle long enough to be indistinguishable from
/// missing ones.
///
/// A missing entry reads as a full bucket, so an entry is reclaimable as
/// soon as a lazy refill performed now would be guaranteed to saturate it:
/// dropping the row changes nothing a client can observe. The decision uses
/// only the server clock and the stored `last_reduced_at_ms`.
#[derive(Debug, Default)]
pub struct BucketGcFilter;

impl CompactionFilter for BucketGcFilter {
    fn name(&self) -> &'static str {
        "bucket-gc"
    }

    fn evict(&self, key: &[u8], value: &[u8]) -> bool {
        let Some(key_params) = codec::decode_key(key) else {
            panic!("rate limit key in storage is corrupted");
        };
        let Some((value_params, _)) = codec::decode_value(value) else {
            panic!("rate limit value in storage is corrupted");
        };

        // negative idle time (clock skew) divides toward zero and retains
        let idle_ms = now_ms() - value_params.last_reduced_at_ms;
        idle_ms / key_params.refill_time_ms * key_params.refill_amount >= key_params.max_amount
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::codec::{KeyParams, ValueParams};
    use crate::ratelimit::{adjust_amount, RateLimitArgs};

    fn encode(key_params: &KeyParams, last_reduced_at_ms: i64) -> (Vec<u8>, Vec<u8>) {
        let key = codec::encode_key("abc", key_params);
        let value = codec::encode_value(&ValueParams {
            amount: 100,
            last_refilled_at_ms: 10_000,
            last_reduced_at_ms,
        });
        (key, value)
    }

    #[test]
    fn test_evicts_after_guaranteed_full_refill() {
        let filter = BucketGcFilter;
        // refills to max after 20 minutes; last touched 30 minutes ago
        let params = KeyParams {
            max_amount: 100,
            refill_amount: 5,
            refill_time_ms: 60_000,
        };
        let (key, value) = encode(&params, now_ms() - 1_800 * 1_000);
        assert!(filter.evict(&key, &value));
    }

    #[test]
    fn test_retains_while_refill_incomplete() {
        let filter = BucketGcFilter;
        // refills to max after 20 minutes; last touched 10 minutes ago
        let params = KeyParams {
            max_amount: 100,
            refill_amount: 5,
            refill_time_ms: 60_000,
        };
        let (key, value) = encode(&params, now_ms() - 600 * 1_000);
        assert!(!filter.evict(&key, &value));
    }

    #[test]
    fn test_retains_on_clock_skew() {
        let filter = BucketGcFilter;
        let params = KeyParams {
            max_amount: 100,
            refill_amount: 5,
            refill_time_ms: 60_000,
        };
        // last write stamped in our future
        let (key, value) = encode(&params, now_ms() + 3_600 * 1_000);
        assert!(!filter.evict(&key, &value));
    }

    #[test]
    fn test_eviction_is_invisible_to_refill_arithmetic() {
        let filter = BucketGcFilter;
        let params = KeyParams {
            max_amount: 100,
            refill_amount: 5,
            refill_time_ms: 60_000,
        };
        let now = now_ms();
        let last_reduced_at_ms = now - 2_400 * 1_000;
        let key = codec::encode_key("abc", &params);

        // any amount the bucket could legally hold
        for amount in [0, 1, 50, 100] {
            let value = codec::encode_value(&ValueParams {
                amount,
                last_refilled_at_ms: last_reduced_at_ms,
                last_reduced_at_ms,
            });
            if filter.evict(&key, &value) {
                // a dropped entry must already have been worth a full bucket
                let args = RateLimitArgs {
                    max_amount: params.max_amount,
                    refill_time_ms: params.refill_time_ms,
                    refill_amount: params.refill_amount,
                    token_amount: 0,
                    client_time_ms: now,
                };
                let (refilled, _) = adjust_amount(amount, last_reduced_at_ms, &args);
                assert_eq!(refilled, params.max_amount);
            }
        }
    }
}
