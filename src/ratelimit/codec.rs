//! Binary layout of stored bucket keys and values.
//!
//! A stored key is the client's key name followed by a fixed 24-byte suffix
//! holding the bucket configuration; a stored value is a 24-byte state
//! record, extended to 32 bytes when a session start time is tracked. All
//! fields are little-endian `i64`. The fixed-width suffix means no length
//! prefix is needed: the decoder peels the configuration off the tail and
//! whatever precedes it is the key name.

/// Bucket configuration encoded into the key suffix.
///
/// The configuration is part of bucket identity: the same key name with a
/// different configuration addresses a different bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyParams {
    /// Bucket capacity
    pub max_amount: i64,
    /// Tokens added per refill
    pub refill_amount: i64,
    /// Milliseconds between refills
    pub refill_time_ms: i64,
}

/// Bucket state encoded as the value record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueParams {
    /// Tokens remaining
    pub amount: i64,
    /// Client time of the latest refill mark
    pub last_refilled_at_ms: i64,
    /// Server wall-clock time of the latest write; read only by the GC filter
    pub last_reduced_at_ms: i64,
}

/// Session start time appended to the value for sessionized buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionParams {
    /// Client time at which the current session began
    pub session_started_at_ms: i64,
}

/// Length of the fixed key suffix.
pub const KEY_SUFFIX_LEN: usize = 24;

/// Length of a plain value record.
pub const VALUE_LEN: usize = 24;

/// Length of a value record with a session appended.
pub const VALUE_WITH_SESSION_LEN: usize = 32;

/// Encode a stored key: the key name followed by the configuration suffix.
pub fn encode_key(key_name: &str, params: &KeyParams) -> Vec<u8> {
    let mut buf = Vec::with_capacity(key_name.len() + KEY_SUFFIX_LEN);
    buf.extend_from_slice(key_name.as_bytes());
    buf.extend_from_slice(&params.max_amount.to_le_bytes());
    buf.extend_from_slice(&params.refill_amount.to_le_bytes());
    buf.extend_from_slice(&params.refill_time_ms.to_le_bytes());
    buf
}

/// Decode the configuration suffix of a stored key.
///
/// Returns `None` when the key is shorter than the suffix, which means the
/// bytes did not come from [`encode_key`].
pub fn decode_key(encoded: &[u8]) -> Option<KeyParams> {
    if encoded.len() < KEY_SUFFIX_LEN {
        return None;
    }
    let suffix = &encoded[encoded.len() - KEY_SUFFIX_LEN..];
    Some(KeyParams {
        max_amount: read_i64(&suffix[0..8]),
        refill_amount: read_i64(&suffix[8..16]),
        refill_time_ms: read_i64(&suffix[16..24]),
    })
}

/// Encode a plain 24-byte value record.
pub fn encode_value(params: &ValueParams) -> Vec<u8> {
    let mut buf = Vec::with_capacity(VALUE_WITH_SESSION_LEN);
    buf.extend_from_slice(&params.amount.to_le_bytes());
    buf.extend_from_slice(&params.last_refilled_at_ms.to_le_bytes());
    buf.extend_from_slice(&params.last_reduced_at_ms.to_le_bytes());
    buf
}

/// Extend an encoded value record with a session record.
pub fn append_session(buf: &mut Vec<u8>, session: &SessionParams) {
    buf.extend_from_slice(&session.session_started_at_ms.to_le_bytes());
}

/// Decode a stored value record and its optional session record.
///
/// A valid value is exactly 24 bytes (no session) or exactly 32 bytes
/// (session appended); any other length is corruption and returns `None`.
pub fn decode_value(encoded: &[u8]) -> Option<(ValueParams, Option<SessionParams>)> {
    if encoded.len() != VALUE_LEN && encoded.len() != VALUE_WITH_SESSION_LEN {
        return None;
    }
    let params = ValueParams {
        amount: read_i64(&encoded[0..8]),
        last_refilled_at_ms: read_i64(&encoded[8..16]),
        last_reduced_at_ms: read_i64(&encoded[16..24]),
    };
    let session = (encoded.len() == VALUE_WITH_SESSION_LEN).then(|| SessionParams {
        session_started_at_ms: read_i64(&encoded[24..32]),
    });
    Some((params, session))
}

fn read_i64(bytes: &[u8]) -> i64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    i64::from_le_bytes(raw)
}
