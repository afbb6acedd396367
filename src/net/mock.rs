//! A deterministic in-memory [`NetworkBackend`] for tests, modeled on
//! `httpcore.backends.mock.AsyncMockBackend`: instead of opening a socket, each connection
//! attempt is handed the next canned byte stream from a fixed list, consumed in FIFO order.

use std::{
    collections::VecDeque,
    net::IpAddr,
    pin::Pin,
    sync::Mutex,
    task::{Context, Poll},
    time::Duration,
};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use super::{BoxedStream, NetworkBackend};
use crate::error::Result;

/// One scripted connection: bytes the peer "sends" back, read in order.
#[derive(Clone, Debug)]
pub(crate) enum ScriptedConnect {
    /// The connection succeeds and the given bytes are available to read.
    Ok(Vec<u8>),
    /// `connect_tcp` fails as though the backend could not reach the peer.
    ConnectError,
}

/// Replays a fixed queue of scripted connections. Each call to `connect_tcp` pops the next
/// entry; calling it more times than scripts were provided is a test bug and panics.
pub(crate) struct MockBackend {
    connects: Mutex<VecDeque<ScriptedConnect>>,
}

impl MockBackend {
    /// Builds a backend that hands out one scripted connection per call to `connect_tcp`, in
    /// order. Each connection's bytes are the full HTTP/1.1 response(s) it will ever need to
    /// serve, concatenated, mirroring how `AsyncMockBackend` is constructed with one flat byte
    /// list per test.
    pub(crate) fn new(connects: Vec<ScriptedConnect>) -> Self {
        Self {
            connects: Mutex::new(connects.into_iter().collect()),
        }
    }

    /// Convenience for the common case: every connection replays the same response bytes.
    pub(crate) fn repeating(chunks: &[&[u8]], connections: usize) -> Self {
        let bytes: Vec<u8> = chunks.iter().flat_map(|c| c.iter().copied()).collect();
        let connects = (0..connections)
            .map(|_| ScriptedConnect::Ok(bytes.clone()))
            .collect();
        Self::new(connects)
    }
}

#[async_trait]
impl NetworkBackend for MockBackend {
    async fn connect_tcp(
        &self,
        _host: &str,
        _port: u16,
        _timeout: Option<Duration>,
        _local_address: Option<IpAddr>,
    ) -> Result<BoxedStream> {
        let script = self
            .connects
            .lock()
            .unwrap()
            .pop_front()
            .expect("MockBackend ran out of scripted connections");
        match script {
            ScriptedConnect::Ok(bytes) => Ok(Box::pin(MockStream::new(bytes))),
            ScriptedConnect::ConnectError => Err(crate::error::Error::connect_error(
                placeholder_origin(),
                std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
            )),
        }
    }

    async fn start_tls(
        &self,
        stream: BoxedStream,
        _host: &str,
        _timeout: Option<Duration>,
    ) -> Result<BoxedStream> {
        // Tests exercise the pool's state machine, not a real TLS handshake; treat `start_tls`
        // as a no-op pass-through so https:// scenarios can still be scripted through the same
        // mock stream.
        Ok(stream)
    }
}

fn placeholder_origin() -> crate::origin::Origin {
    crate::origin::Origin {
        scheme: crate::origin::Scheme::Https,
        host: "mock".to_string(),
        port: 0,
    }
}

/// An in-memory duplex-ish stream: reads drain a fixed buffer, writes are discarded.
struct MockStream {
    buf: Vec<u8>,
    pos: usize,
}

impl MockStream {
    fn new(buf: Vec<u8>) -> Self {
        Self { buf, pos: 0 }
    }
}

impl AsyncRead for MockStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let remaining = &self.buf[self.pos..];
        let n = remaining.len().min(buf.remaining());
        buf.put_slice(&remaining[..n]);
        self.pos += n;
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MockStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
