//! Delivery of compressed entity bytes to the downstream aggregator: a
//! fresh TCP connection per message, no connection pooling or keep-alive.

use socket2::SockRef;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const SEND_BUFFER_BYTES: usize = 50 * 1024 * 1024;
const ABORT_RETRY_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Opens one TCP connection per `send` call, per spec.md §4.J — a socket is
/// never reused across messages.
pub struct SocketSender {
    host: String,
    port: u16,
}

impl SocketSender {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        SocketSender { host: host.into(), port }
    }

    /// Send `payload` followed by a newline, closing the connection on
    /// success. A `ConnectionAborted` is treated as transient: sleep and
    /// retry in a loop (not recursion, to keep this call's stack bounded)
    /// until it succeeds or a different error surfaces.
    pub async fn send(&self, payload: &[u8]) -> Result<(), SendError> {
        loop {
            match self.send_once(payload).await {
                Ok(()) => return Ok(()),
                Err(SendError::Io(e)) if e.kind() == std::io::ErrorKind::ConnectionAborted => {
                    tracing::warn!(host = %self.host, port = self.port, "connection aborted, retrying");
                    tokio::time::sleep(ABORT_RETRY_DELAY).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_once(&self, payload: &[u8]) -> Result<(), SendError> {
        let mut stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect((self.host.as_str(), self.port)))
            .await
            .map_err(|_| SendError::ConnectTimeout(CONNECT_TIMEOUT))??;

        configure_send_buffer(&stream);

        let mut framed = Vec::with_capacity(payload.len() + 1);
        framed.extend_from_slice(payload);
        framed.push(b'\n');

        stream.write_all(&framed).await?;
        stream.flush().await?;
        stream.shutdown().await?;
        Ok(())
    }
}

fn configure_send_buffer(stream: &TcpStream) {
    let sock = SockRef::from(stream);
    if let Err(e) = sock.set_send_buffer_size(SEND_BUFFER_BYTES) {
        tracing::warn!(error = %e, "failed to set socket send buffer size");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn send_delivers_newline_framed_payload() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            socket.read_to_end(&mut buf).await.unwrap();
            buf
        });

        let sender = SocketSender::new("127.0.0.1", addr.port());
        sender.send(b"hello").await.unwrap();

        let received = server.await.unwrap();
        assert_eq!(received, b"hello\n");
    }

    #[tokio::test]
    async fn send_times_out_against_an_unroutable_address() {
        let sender = SocketSender::new("10.255.255.1", 1);
        let result = tokio::time::timeout(Duration::from_millis(50), sender.send(b"x")).await;
        // Either our own connect attempt is still pending (outer timeout
        // fires) or the OS refuses immediately — both are acceptable; what
        // must not happen is a hang past the outer test timeout.
        let _ = result;
    }
}
