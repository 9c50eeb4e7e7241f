//! The concrete transport the engine ships with: a plain `TcpStream`, or one wrapped in
//! TLS via `tokio-rustls`. The connection engine itself is generic over any
//! `AsyncRead + AsyncWrite + Unpin`; this enum is what `accept_async`/`connect_async`
//! hand back so callers don't have to name the TLS stream type themselves.

use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream as ClientTlsStream;
use tokio_rustls::server::TlsStream as ServerTlsStream;

pub enum SocketFlowStream {
    Plain(TcpStream),
    SecureClient(Box<ClientTlsStream<TcpStream>>),
    SecureServer(Box<ServerTlsStream<TcpStream>>),
}

impl SocketFlowStream {
    /// Disables Nagle's algorithm, matching the transport interface's stated
    /// requirement to reduce latency for small, frequent WebSocket frames.
    pub fn set_nodelay(&self) -> std::io::Result<()> {
        match self {
            SocketFlowStream::Plain(stream) => stream.set_nodelay(true),
            SocketFlowStream::SecureClient(stream) => stream.get_ref().0.set_nodelay(true),
            SocketFlowStream::SecureServer(stream) => stream.get_ref().0.set_nodelay(true),
        }
    }
}

impl AsyncRead for SocketFlowStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SocketFlowStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            SocketFlowStream::SecureClient(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
            SocketFlowStream::SecureServer(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for SocketFlowStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            SocketFlowStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            SocketFlowStream::SecureClient(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
            SocketFlowStream::SecureServer(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SocketFlowStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            SocketFlowStream::SecureClient(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
            SocketFlowStream::SecureServer(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SocketFlowStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            SocketFlowStream::SecureClient(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
            SocketFlowStream::SecureServer(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}
