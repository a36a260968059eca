//! Argument parsing for the rate limit command family.

use thiserror::Error;

use super::now_ms;

/// Wire-visible parse failures.
///
/// The `Display` strings are the exact error payloads sent to clients.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// Malformed command shape: unknown option, option without its value,
    /// or `TAKE` outside a reduce command
    #[error("ERR syntax error")]
    Syntax,

    /// A numeric argument failed to parse or is out of range
    #[error("ERR value is not an integer or out of range")]
    InvalidInteger,
}

/// Typed arguments for one rate limit command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitArgs {
    /// Bucket capacity
    pub max_amount: i64,
    /// Milliseconds between refills
    pub refill_time_ms: i64,
    /// Tokens added per refill
    pub refill_amount: i64,
    /// Tokens this command consumes
    pub token_amount: i64,
    /// Client-supplied time used for all bucket arithmetic, in ms
    pub client_time_ms: i64,
}

/// Parse a command array into typed arguments plus the strict flag.
///
/// `cmd` is the full command including the command name:
///
/// ```text
/// rl.X <key> <max-amount> <refill-time> [REFILL n] [TAKE n] [AT t] [STRICT]
/// ```
///
/// Option names are case-insensitive and may appear in any order; a repeated
/// option overwrites the earlier occurrence. For the second-precision
/// command family (`use_ms == false`) the refill time and `AT` value are
/// scaled to milliseconds on the way in; the engine works exclusively in
/// milliseconds.
pub fn parse_rate_limit_args(
    cmd: &[String],
    use_ms: bool,
    is_reduce: bool,
) -> Result<(RateLimitArgs, bool), ParseError> {
    if cmd.len() < 4 {
        return Err(ParseError::Syntax);
    }
    let ts_multiplier: i64 = if use_ms { 1 } else { 1000 };

    let max_amount = parse_int(&cmd[2])?;
    let refill_time_ms = parse_int(&cmd[3])?
        .checked_mul(ts_multiplier)
        .ok_or(ParseError::InvalidInteger)?;

    // optional arguments with default values
    let mut args = RateLimitArgs {
        max_amount,
        refill_time_ms,
        refill_amount: max_amount,
        token_amount: if is_reduce { 1 } else { 0 },
        client_time_ms: now_ms(),
    };
    // strict mode is a client-side toggle, not part of the bucket identity
    let mut strict = false;

    let mut i = 4;
    while i < cmd.len() {
        let opt = cmd[i].to_ascii_lowercase();
        // STRICT is a valueless flag
        if opt == "strict" {
            strict = true;
            i += 1;
            continue;
        }
        // all other options consume the next token as their value
        if i + 1 >= cmd.len() {
            return Err(ParseError::Syntax);
        }
        let value = parse_int(&cmd[i + 1])?;
        i += 2;
        match opt.as_str() {
            "refill" => args.refill_amount = value,
            "take" => {
                // TAKE only makes sense when tokens are being consumed
                if !is_reduce {
                    return Err(ParseError::Syntax);
                }
                args.token_amount = value;
            }
            "at" => {
                args.client_time_ms = value
                    .checked_mul(ts_multiplier)
                    .ok_or(ParseError::InvalidInteger)?;
            }
            _ => return Err(ParseError::Syntax),
        }
    }

    if args.max_amount < 1
        || args.refill_time_ms < 1
        || args.refill_amount < 1
        || args.token_amount < 0
        || args.client_time_ms < 0
    {
        return Err(ParseError::InvalidInteger);
    }

    Ok((args, strict))
}

fn parse_int(raw: &str) -> Result<i64, ParseError> {
    raw.parse::<i64>().map_err(|_| ParseError::InvalidInteger)
}
