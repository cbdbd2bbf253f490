use crate::socket::stream::StreamSocket;
use futures::task::noop_waker_ref;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

/// Result of a non-blocking look at a socket's receive queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Peek {
    /// Nothing to read, peer still there.
    Idle,
    /// Bytes are waiting.
    Readable,
    /// FIN, RST or a socket error.
    Closed,
}

/// Represents a connected socket (TCP or SSL).
/// Mimics net::StreamSocket.
#[derive(Debug)]
pub enum SocketType {
    Tcp(TcpStream),
    #[cfg(feature = "boring-tls")]
    Ssl(tokio_boring::SslStream<TcpStream>),
}

impl SocketType {
    /// Peek without consuming and without registering a real waker.
    fn peek_tcp(stream: &TcpStream) -> Peek {
        if stream.peer_addr().is_err() {
            return Peek::Closed;
        }

        let mut cx = Context::from_waker(noop_waker_ref());
        let mut byte = [0u8; 1];
        let mut buf = ReadBuf::new(&mut byte);
        match stream.poll_peek(&mut cx, &mut buf) {
            Poll::Ready(Ok(0)) => Peek::Closed,
            Poll::Ready(Ok(_)) => Peek::Readable,
            Poll::Ready(Err(_)) => Peek::Closed,
            Poll::Pending => Peek::Idle,
        }
    }

    pub fn tcp(&self) -> &TcpStream {
        match self {
            SocketType::Tcp(s) => s,
            #[cfg(feature = "boring-tls")]
            SocketType::Ssl(s) => s.get_ref(),
        }
    }

    pub fn is_secure(&self) -> bool {
        !matches!(self, SocketType::Tcp(_))
    }
}

impl AsyncRead for SocketType {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SocketType::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(feature = "boring-tls")]
            SocketType::Ssl(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for SocketType {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            SocketType::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(feature = "boring-tls")]
            SocketType::Ssl(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SocketType::Tcp(s) => Pin::new(s).poll_flush(cx),
            #[cfg(feature = "boring-tls")]
            SocketType::Ssl(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SocketType::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(feature = "boring-tls")]
            SocketType::Ssl(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

impl StreamSocket for SocketType {
    fn is_connected(&self) -> bool {
        Self::peek_tcp(self.tcp()) != Peek::Closed
    }

    fn is_connected_and_idle(&self) -> bool {
        match self {
            SocketType::Tcp(s) => Self::peek_tcp(s) == Peek::Idle,
            // TLS 1.3 session tickets arrive after the handshake, so raw
            // bytes on the wire do not mean unread application data.
            #[cfg(feature = "boring-tls")]
            SocketType::Ssl(_) => self.is_connected(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    async fn pair() -> (SocketType, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) =
            tokio::join!(TcpStream::connect(addr), async { listener.accept().await.unwrap().0 });
        (SocketType::Tcp(client.unwrap()), accepted)
    }

    #[tokio::test]
    async fn test_fresh_socket_is_idle() {
        let (socket, _peer) = pair().await;
        assert!(socket.is_connected());
        assert!(socket.is_connected_and_idle());
        assert!(!socket.is_secure());
    }

    #[tokio::test]
    async fn test_unsolicited_bytes_not_idle() {
        let (socket, mut peer) = pair().await;
        peer.write_all(b"x").await.unwrap();
        peer.flush().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert!(socket.is_connected());
        assert!(!socket.is_connected_and_idle());
    }

    #[tokio::test]
    async fn test_peer_close_detected() {
        let (socket, peer) = pair().await;
        drop(peer);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!socket.is_connected());
    }
}
