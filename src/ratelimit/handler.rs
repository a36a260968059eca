//! The rate limit command handler: per-key exclusion, storage
//! read-modify-write, and session assignment.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::storage::{StorageError, Store};

use super::args::{parse_rate_limit_args, ParseError, RateLimitArgs};
use super::bucket::adjust_amount;
use super::codec::{self, KeyParams, SessionParams, ValueParams};
use super::commands::Command;
use super::now_ms;

/// Number of writer lock stripes.
const WRITER_STRIPES: usize = 1024;

/// Successful command results, before wire encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Remaining tokens before the take
    Amount(i64),
    /// Remaining tokens plus the session start time, in milliseconds
    Sessionized {
        amount: i64,
        session_started_at_ms: i64,
    },
}

/// Command failures whose `Display` strings are the wire error payloads.
#[derive(Error, Debug)]
pub enum CommandError {
    /// Command name not in the table
    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    /// Argument count outside the command's arity bounds
    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(&'static str),

    /// Argument parsing failed
    #[error("{0}")]
    Parse(#[from] ParseError),

    /// The storage write failed; no state change is observable
    #[error("ERR storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Executes rate limit commands against a key-value store.
///
/// Writes to a single bucket are serialized by hashing the key name onto one
/// of 1024 lock stripes and holding that stripe for the whole
/// read-modify-write. Distinct keys that share a stripe contend with each
/// other; that false sharing is the accepted price of a flat lock table.
pub struct RateLimitHandler<S: Store> {
    /// The backing key-value store
    store: Arc<S>,
    /// Writer lock stripes indexed by key-name hash
    stripes: Vec<Mutex<()>>,
}

impl<S: Store> RateLimitHandler<S> {
    /// Create a handler over the given store.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            stripes: (0..WRITER_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Execute one command array (command name first).
    pub fn execute(&self, cmd: &[String]) -> Result<CommandOutcome, CommandError> {
        let name = cmd.first().ok_or(ParseError::Syntax)?;
        let command =
            Command::lookup(name).ok_or_else(|| CommandError::UnknownCommand(name.clone()))?;

        let argc = cmd.len() - 1;
        let (min_arity, max_arity) = command.arity();
        if argc < min_arity || argc > max_arity {
            return Err(CommandError::WrongArity(command.name()));
        }

        let (args, strict) = parse_rate_limit_args(cmd, command.use_ms(), command.is_reduce())?;
        let key_name = &cmd[1];

        if command.is_sessionize() {
            if !strict {
                warn!(
                    key = %key_name,
                    "sessionize command without explicit STRICT; forcing strict mode"
                );
            }
            // By default each request belongs to its own session, unless the
            // stored bucket says otherwise. Sessionization implies strict
            // mode regardless of what the command specifies.
            let mut session = SessionParams {
                session_started_at_ms: args.client_time_ms,
            };
            let amount = self.get_and_reduce_tokens(key_name, &args, true, Some(&mut session))?;
            Ok(CommandOutcome::Sessionized {
                amount,
                session_started_at_ms: session.session_started_at_ms,
            })
        } else {
            let amount = self.get_and_reduce_tokens(key_name, &args, strict, None)?;
            Ok(CommandOutcome::Amount(amount))
        }
    }

    /// Read the bucket, optionally take tokens, and persist the result.
    ///
    /// Returns the remaining tokens *before* the take. The stripe lock is
    /// released when this returns, before any reply bytes are written.
    fn get_and_reduce_tokens(
        &self,
        key_name: &str,
        args: &RateLimitArgs,
        strict: bool,
        mut session: Option<&mut SessionParams>,
    ) -> Result<i64, CommandError> {
        let _guard = self.stripes[stripe_index(key_name)].lock();

        let key = codec::encode_key(
            key_name,
            &KeyParams {
                max_amount: args.max_amount,
                refill_amount: args.refill_amount,
                refill_time_ms: args.refill_time_ms,
            },
        );

        let (adjusted_amount, new_refilled_at_ms) =
            self.adjusted_amount_from_store(key_name, &key, args, session.as_deref_mut());

        if args.token_amount > 0 {
            let new_amount = (adjusted_amount - args.token_amount).max(0);
            let value = ValueParams {
                amount: new_amount,
                // In strict mode an emptied bucket stalls: the refill mark is
                // pinned to the draining client's time, so no refill lands
                // until a full refill interval has passed from that moment.
                last_refilled_at_ms: if strict && new_amount == 0 {
                    args.client_time_ms
                } else {
                    new_refilled_at_ms
                },
                last_reduced_at_ms: now_ms(),
            };
            let mut buf = codec::encode_value(&value);
            if let Some(session) = session {
                if adjusted_amount >= args.token_amount {
                    // Enough tokens remain: this request opens a new session.
                    // Once the bucket is exhausted, subsequent requests keep
                    // the stored start time until a refill.
                    session.session_started_at_ms = args.client_time_ms;
                }
                codec::append_session(&mut buf, session);
            }
            self.store.put(&key, &buf)?;
            debug!(
                key = %key_name,
                before = adjusted_amount,
                after = new_amount,
                take = args.token_amount,
                "tokens reduced"
            );
        }

        Ok(adjusted_amount)
    }

    /// Fetch and lazily refill the stored bucket.
    ///
    /// A missing entry reads as a full bucket with the refill mark at the
    /// client's time. Read failures other than not-found are logged and
    /// treated the same way: availability wins over strict accounting, and
    /// the worst case is briefly over-admitting one bucket.
    fn adjusted_amount_from_store(
        &self,
        key_name: &str,
        key: &[u8],
        args: &RateLimitArgs,
        session: Option<&mut SessionParams>,
    ) -> (i64, i64) {
        match self.store.get(key) {
            Ok(Some(raw)) => {
                let Some((value, stored_session)) = codec::decode_value(&raw) else {
                    // A malformed record means the store is poisoned;
                    // carrying on would serve arbitrary quotas.
                    panic!("rate limit value in storage is corrupted for key {key_name:?}");
                };
                if let (Some(session), Some(stored)) = (session, stored_session) {
                    session.session_started_at_ms = stored.session_started_at_ms;
                }
                adjust_amount(value.amount, value.last_refilled_at_ms, args)
            }
            Ok(None) => (args.max_amount, args.client_time_ms),
            Err(e) => {
                error!(key = %key_name, error = %e, "storage read failed; treating bucket as full");
                (args.max_amount, args.client_time_ms)
            }
        }
    }
}

fn stripe_index(key_name: &str) -> usize {
    let mut hasher = DefaultHasher::new();
    key_name.hash(&mut hasher);
    (hasher.finish() % WRITER_STRIPES as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn handler() -> RateLimitHandler<MemoryStore> {
        RateLimitHandler::new(Arc::new(MemoryStore::new()))
    }

    fn cmd(line: &str) -> Vec<String> {
        line.split_whitespace().map(str::to_string).collect()
    }

    fn amount(handler: &RateLimitHandler<impl Store>, line: &str) -> i64 {
        match handler.execute(&cmd(line)).unwrap() {
            CommandOutcome::Amount(n) => n,
            other => panic!("expected plain amount, got {other:?}"),
        }
    }

    #[test]
    fn test_fresh_bucket_reads_full() {
        let handler = handler();
        assert_eq!(amount(&handler, "rl.pget a 10 5000 at 2000"), 10);
    }

    #[test]
    fn test_get_never_writes() {
        let store = Arc::new(MemoryStore::new());
        let handler = RateLimitHandler::new(Arc::clone(&store));
        assert_eq!(amount(&handler, "rl.pget a 10 5000 at 2000"), 10);
        assert!(store.is_empty());
    }

    #[test]
    fn test_reduce_creates_entry_and_returns_pre_take_amount() {
        let store = Arc::new(MemoryStore::new());
        let handler = RateLimitHandler::new(Arc::clone(&store));
        assert_eq!(amount(&handler, "rl.preduce a 10 5000 at 2000"), 10);
        assert_eq!(store.len(), 1);
        assert_eq!(amount(&handler, "rl.pget a 10 5000 at 2000"), 9);
    }

    #[test]
    fn test_take_zero_behaves_like_get() {
        let store = Arc::new(MemoryStore::new());
        let handler = RateLimitHandler::new(Arc::clone(&store));
        assert_eq!(amount(&handler, "rl.preduce a 10 5000 at 2000 take 0"), 10);
        assert!(store.is_empty());
    }

    #[test]
    fn test_different_config_is_a_different_bucket() {
        let handler = handler();
        assert_eq!(amount(&handler, "rl.preduce a 10 5000 at 2000 take 4"), 10);
        // same name, different capacity: untouched fresh bucket
        assert_eq!(amount(&handler, "rl.pget a 20 5000 at 2000"), 20);
        assert_eq!(amount(&handler, "rl.pget a 10 5000 at 2000"), 6);
    }

    #[test]
    fn test_unknown_command() {
        let handler = handler();
        let err = handler.execute(&cmd("rl.bogus a 10 5000")).unwrap_err();
        assert_eq!(err.to_string(), "ERR unknown command 'rl.bogus'");
    }

    #[test]
    fn test_arity_too_few_and_too_many() {
        let handler = handler();
        let err = handler.execute(&cmd("rl.get a 10")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "ERR wrong number of arguments for 'rl.get' command"
        );

        // over the 8-argument cap for the get family
        let err = handler
            .execute(&cmd("rl.get a 10 60 refill 3 at 2 strict strict strict"))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "ERR wrong number of arguments for 'rl.get' command"
        );
    }

    #[test]
    fn test_parse_error_strings_are_wire_payloads() {
        let handler = handler();
        let err = handler.execute(&cmd("rl.get a 10 60 take 2")).unwrap_err();
        assert_eq!(err.to_string(), "ERR syntax error");

        let err = handler.execute(&cmd("rl.get a 10 abc")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "ERR value is not an integer or out of range"
        );
    }

    #[test]
    fn test_sessionize_reply_carries_session_start() {
        let handler = handler();
        let outcome = handler
            .execute(&cmd("rl.psessionize s 3 5000 at 1000 strict"))
            .unwrap();
        assert_eq!(
            outcome,
            CommandOutcome::Sessionized {
                amount: 3,
                session_started_at_ms: 1000
            }
        );
    }

    #[test]
    fn test_sessionize_works_without_explicit_strict() {
        // strict is forced; only a warning is logged
        let handler = handler();
        let outcome = handler
            .execute(&cmd("rl.psessionize s 3 5000 at 1000"))
            .unwrap();
        assert_eq!(
            outcome,
            CommandOutcome::Sessionized {
                amount: 3,
                session_started_at_ms: 1000
            }
        );
    }

    /// Store stub whose reads fail with a non-not-found error.
    struct FailingReadStore;

    impl Store for FailingReadStore {
        fn get(&self, _key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
            Err(StorageError::Io(std::io::Error::other("disk on fire")))
        }

        fn put(&self, _key: &[u8], _value: &[u8]) -> Result<(), StorageError> {
            Ok(())
        }
    }

    /// Store stub whose writes fail.
    struct FailingWriteStore;

    impl Store for FailingWriteStore {
        fn get(&self, _key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
            Ok(None)
        }

        fn put(&self, _key: &[u8], _value: &[u8]) -> Result<(), StorageError> {
            Err(StorageError::Io(std::io::Error::other("disk full")))
        }
    }

    #[test]
    fn test_read_error_falls_through_to_full_bucket() {
        let handler = RateLimitHandler::new(Arc::new(FailingReadStore));
        assert_eq!(amount(&handler, "rl.pget a 10 5000 at 2000"), 10);
    }

    #[test]
    fn test_write_error_surfaces_to_client() {
        let handler = RateLimitHandler::new(Arc::new(FailingWriteStore));
        let err = handler
            .execute(&cmd("rl.preduce a 10 5000 at 2000"))
            .unwrap_err();
        assert!(err.to_string().starts_with("ERR storage error:"));
    }

    #[test]
    #[should_panic(expected = "corrupted")]
    fn test_corrupted_value_panics() {
        let store = Arc::new(MemoryStore::new());
        let handler = RateLimitHandler::new(Arc::clone(&store));
        // seed a value with an impossible length under the exact stored key
        let key = codec::encode_key(
            "a",
            &KeyParams {
                max_amount: 10,
                refill_amount: 10,
                refill_time_ms: 5000,
            },
        );
        store.put(&key, &[0u8; 17]).unwrap();
        let _ = handler.execute(&cmd("rl.pget a 10 5000 at 2000"));
    }
}
