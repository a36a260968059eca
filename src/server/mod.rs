//! RESP server for the rate limit command surface.

mod resp;

pub use resp::{FrameError, Reply};

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::ratelimit::{CommandOutcome, RateLimitHandler};
use crate::storage::Store;

/// TCP server speaking the RESP command protocol.
pub struct RespServer<S: Store> {
    /// Address to bind to
    addr: SocketAddr,
    /// The command handler shared by all connections
    handler: Arc<RateLimitHandler<S>>,
}

impl<S: Store> RespServer<S> {
    /// Create a new server for the given handler.
    pub fn new(addr: SocketAddr, handler: Arc<RateLimitHandler<S>>) -> Self {
        Self { addr, handler }
    }

    /// Start the server with graceful shutdown.
    ///
    /// Accepts connections until the provided signal resolves; each
    /// connection is served on its own task.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> crate::error::Result<()>
    where
        F: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind(self.addr).await?;
        info!(addr = %listener.local_addr()?, "RESP server listening");

        tokio::pin!(signal);
        loop {
            tokio::select! {
                _ = &mut signal => {
                    info!("Shutdown signal received, closing listener");
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((socket, peer)) => {
                            let handler = Arc::clone(&self.handler);
                            tokio::spawn(async move {
                                if let Err(e) = serve_connection(socket, handler).await {
                                    debug!(peer = %peer, error = %e, "Connection closed with error");
                                }
                            });
                        }
                        Err(e) => {
                            warn!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Drive one client connection until end-of-stream or a protocol error.
async fn serve_connection<T, S>(stream: T, handler: Arc<RateLimitHandler<S>>) -> std::io::Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
    S: Store,
{
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);

    loop {
        let cmd = match resp::read_command(&mut reader).await {
            Ok(Some(cmd)) => cmd,
            Ok(None) => return Ok(()),
            Err(FrameError::Io(e)) => return Err(e),
            Err(e @ FrameError::Protocol(_)) => {
                // a malformed frame poisons the stream: report and hang up
                let reply = Reply::Error(format!("ERR {e}"));
                write_half.write_all(&reply.encode()).await?;
                return Ok(());
            }
        };
        if cmd.is_empty() {
            continue;
        }
        let reply = dispatch(&handler, &cmd);
        write_half.write_all(&reply.encode()).await?;
    }
}

/// Execute one command and shape the wire reply.
fn dispatch<S: Store>(handler: &RateLimitHandler<S>, cmd: &[String]) -> Reply {
    // connection-level liveness check, answered outside the command table
    if cmd.len() == 1 && cmd[0].eq_ignore_ascii_case("ping") {
        return Reply::Simple("PONG");
    }
    match handler.execute(cmd) {
        Ok(CommandOutcome::Amount(amount)) => Reply::Integer(amount),
        Ok(CommandOutcome::Sessionized {
            amount,
            session_started_at_ms,
        }) => Reply::Array(vec![
            Reply::Integer(amount),
            Reply::Integer(session_started_at_ms),
        ]),
        Err(e) => Reply::Error(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn cmd(line: &str) -> Vec<String> {
        line.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn test_dispatch_integer_reply() {
        let handler = RateLimitHandler::new(Arc::new(MemoryStore::new()));
        let reply = dispatch(&handler, &cmd("rl.pget a 10 5000 at 2000"));
        assert_eq!(reply, Reply::Integer(10));
    }

    #[test]
    fn test_dispatch_sessionize_array_reply() {
        let handler = RateLimitHandler::new(Arc::new(MemoryStore::new()));
        let reply = dispatch(&handler, &cmd("rl.psessionize a 10 5000 at 2000 strict"));
        assert_eq!(
            reply,
            Reply::Array(vec![Reply::Integer(10), Reply::Integer(2000)])
        );
    }

    #[test]
    fn test_dispatch_ping() {
        let handler = RateLimitHandler::new(Arc::new(MemoryStore::new()));
        assert_eq!(dispatch(&handler, &cmd("PING")), Reply::Simple("PONG"));
    }

    #[test]
    fn test_dispatch_error_reply() {
        let handler = RateLimitHandler::new(Arc::new(MemoryStore::new()));
        let reply = dispatch(&handler, &cmd("rl.pget a 10 5000 take 2"));
        assert_eq!(reply, Reply::Error("ERR syntax error".to_string()));
    }

    #[tokio::test]
    async fn test_connection_roundtrip_over_duplex() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let handler = Arc::new(RateLimitHandler::new(Arc::new(MemoryStore::new())));
        let (mut client, server_side) = tokio::io::duplex(4096);
        let task = tokio::spawn(serve_connection(server_side, handler));

        client
            .write_all(b"*7\r\n$10\r\nrl.preduce\r\n$1\r\na\r\n$2\r\n10\r\n$4\r\n5000\r\n$2\r\nat\r\n$4\r\n2000\r\n$6\r\nstrict\r\n")
            .await
            .unwrap();
        let mut buf = [0u8; 64];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b":10\r\n");

        drop(client);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_connection_reports_protocol_error_and_hangs_up() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let handler = Arc::new(RateLimitHandler::new(Arc::new(MemoryStore::new())));
        let (mut client, server_side) = tokio::io::duplex(4096);
        let task = tokio::spawn(serve_connection(server_side, handler));

        client.write_all(b"GARBAGE\r\n").await.unwrap();
        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert!(reply.starts_with(b"-ERR Protocol error:"));

        task.await.unwrap().unwrap();
    }
}
