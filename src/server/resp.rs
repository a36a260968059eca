//! RESP wire encoding and command framing.
//!
//! Requests arrive as arrays of bulk strings (`*N\r\n$len\r\n...`); replies
//! are integers, simple strings, errors, and arrays. This covers the subset
//! of the protocol the rate limit command family needs.

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Upper bound on elements in one command array.
const MAX_COMMAND_FIELDS: usize = 1024;

/// Upper bound on a single bulk string, matching the conventional 512 MB cap.
const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Framing failures while reading a command.
#[derive(Error, Debug)]
pub enum FrameError {
    /// The byte stream is not valid RESP
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The connection failed mid-frame
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A single reply value, encodable to RESP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `:n\r\n`
    Integer(i64),
    /// `+s\r\n`
    Simple(&'static str),
    /// `-msg\r\n`
    Error(String),
    /// `*n\r\n` followed by the encoded elements
    Array(Vec<Reply>),
}

impl Reply {
    /// Encode into RESP bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf);
        buf
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            Reply::Integer(n) => {
                buf.extend_from_slice(format!(":{n}\r\n").as_bytes());
            }
            Reply::Simple(s) => {
                buf.extend_from_slice(format!("+{s}\r\n").as_bytes());
            }
            Reply::Error(msg) => {
                buf.extend_from_slice(format!("-{msg}\r\n").as_bytes());
            }
            Reply::Array(items) => {
                buf.extend_from_slice(format!("*{}\r\n", items.len()).as_bytes());
                for item in items {
                    item.encode_into(buf);
                }
            }
        }
    }
}

/// Read one command array from the connection.
///
/// Returns `Ok(None)` on a clean end-of-stream between commands; an EOF in
/// the middle of a frame is a protocol error.
pub async fn read_command<R>(reader: &mut R) -> Result<Option<Vec<String>>, FrameError>
where
    R: AsyncBufRead + Unpin,
{
    let Some(header) = read_line(reader).await? else {
        return Ok(None);
    };
    let count = header
        .strip_prefix('*')
        .and_then(|n| n.parse::<usize>().ok())
        .ok_or_else(|| FrameError::Protocol(format!("expected array header, got {header:?}")))?;
    if count > MAX_COMMAND_FIELDS {
        return Err(FrameError::Protocol(format!(
            "command array too large ({count} elements)"
        )));
    }

    let mut fields = Vec::with_capacity(count);
    for _ in 0..count {
        let Some(len_line) = read_line(reader).await? else {
            return Err(FrameError::Protocol("unexpected end of stream".to_string()));
        };
        let len = len_line
            .strip_prefix('$')
            .and_then(|n| n.parse::<usize>().ok())
            .ok_or_else(|| {
                FrameError::Protocol(format!("expected bulk string header, got {len_line:?}"))
            })?;
        if len > MAX_BULK_LEN {
            return Err(FrameError::Protocol(format!(
                "bulk string too large ({len} bytes)"
            )));
        }

        let mut raw = vec![0u8; len + 2];
        reader.read_exact(&mut raw).await?;
        if &raw[len..] != b"\r\n" {
            return Err(FrameError::Protocol(
                "bulk string missing CRLF terminator".to_string(),
            ));
        }
        raw.truncate(len);
        let field = String::from_utf8(raw)
            .map_err(|_| FrameError::Protocol("bulk string is not valid utf-8".to_string()))?;
        fields.push(field);
    }

    Ok(Some(fields))
}

async fn read_line<R>(reader: &mut R) -> Result<Option<String>, FrameError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Ok(None);
    }
    if !line.ends_with("\r\n") {
        return Err(FrameError::Protocol(
            "line missing CRLF terminator".to_string(),
        ));
    }
    line.truncate(line.len() - 2);
    Ok(Some(line))
}
