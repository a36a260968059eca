//! The rate limit command table.

/// The six wire commands.
///
/// The `rl.p*` variants take times in milliseconds; the plain variants take
/// seconds and are scaled by 1000 at parse time. Sessionize commands are
/// reduces that additionally derive a session start time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `rl.get`: read the bucket without consuming
    Get,
    /// `rl.reduce`: consume tokens
    Reduce,
    /// `rl.sessionize`: consume tokens and derive a session
    Sessionize,
    /// `rl.pget`: millisecond-precision get
    PGet,
    /// `rl.preduce`: millisecond-precision reduce
    PReduce,
    /// `rl.psessionize`: millisecond-precision sessionize
    PSessionize,
}

impl Command {
    /// Look up a command by its wire name, case-insensitively.
    pub fn lookup(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "rl.get" => Some(Command::Get),
            "rl.reduce" => Some(Command::Reduce),
            "rl.sessionize" => Some(Command::Sessionize),
            "rl.pget" => Some(Command::PGet),
            "rl.preduce" => Some(Command::PReduce),
            "rl.psessionize" => Some(Command::PSessionize),
            _ => None,
        }
    }

    /// Canonical wire name.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Get => "rl.get",
            Command::Reduce => "rl.reduce",
            Command::Sessionize => "rl.sessionize",
            Command::PGet => "rl.pget",
            Command::PReduce => "rl.preduce",
            Command::PSessionize => "rl.psessionize",
        }
    }

    /// Whether client times are already milliseconds.
    pub fn use_ms(&self) -> bool {
        matches!(self, Command::PGet | Command::PReduce | Command::PSessionize)
    }

    /// Whether the command consumes tokens.
    pub fn is_reduce(&self) -> bool {
        !matches!(self, Command::Get | Command::PGet)
    }

    /// Whether the command derives a session identifier.
    pub fn is_sessionize(&self) -> bool {
        matches!(self, Command::Sessionize | Command::PSessionize)
    }

    /// Inclusive bounds on the argument count after the command name.
    ///
    /// Get commands top out at `REFILL n AT t STRICT`; reduce commands also
    /// carry `TAKE n`.
    pub fn arity(&self) -> (usize, usize) {
        if self.is_reduce() {
            (3, 10)
        } else {
            (3, 8)
        }
    }
}
