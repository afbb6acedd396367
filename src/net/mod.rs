//! The socket/backend layer, abstracted behind [`NetworkBackend`] so the pool worker never
//! depends on a concrete transport. Production code uses [`TcpBackend`]; tests use
//! [`mock::MockBackend`].

#[cfg(test)]
pub(crate) mod mock;

use std::{net::IpAddr, pin::Pin, time::Duration};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

/// A connected byte stream, TCP or TLS-over-TCP, type-erased so the driver doesn't care which.
pub type BoxedStream = Pin<Box<dyn ReadWrite>>;

/// Blanket trait tying together the bounds a pooled connection's stream needs.
pub trait ReadWrite: AsyncRead + AsyncWrite + Send {}
impl<T: AsyncRead + AsyncWrite + Send + ?Sized> ReadWrite for T {}

/// The injected dependency described in the external interfaces: a pair of primitives for
/// opening a TCP socket and, separately, promoting it to TLS. Kept as a trait (rather than the
/// teacher's internal `AsyncStream` enum) because callers are expected to supply their own
/// backend in tests, and production users may supply their own (proxying, custom DNS, etc).
#[async_trait]
pub trait NetworkBackend: Send + Sync {
    /// Opens a TCP connection to `host:port`, honoring `timeout` and an optional bind address.
    async fn connect_tcp(
        &self,
        host: &str,
        port: u16,
        timeout: Option<Duration>,
        local_address: Option<IpAddr>,
    ) -> Result<BoxedStream>;

    /// Wraps an already-connected stream in a TLS session for `host`.
    async fn start_tls(
        &self,
        stream: BoxedStream,
        host: &str,
        timeout: Option<Duration>,
    ) -> Result<BoxedStream>;
}

#[cfg(feature = "rustls-tls")]
mod tcp {
    use std::{net::IpAddr, sync::Arc, time::Duration};

    use async_trait::async_trait;
    use rustls::pki_types::ServerName;
    use tokio::net::{TcpSocket, TcpStream};
    use tokio_rustls::TlsConnector;

    use super::{BoxedStream, NetworkBackend};
    use crate::{
        error::{Error, Result},
        origin::{Origin, Scheme},
    };

    const KEEPALIVE: Duration = Duration::from_secs(120);

    fn placeholder_origin(host: &str, port: u16) -> Origin {
        Origin {
            scheme: Scheme::Http,
            host: host.to_string(),
            port,
        }
    }

    /// Production [`NetworkBackend`]: real TCP sockets via `tokio`, TLS via `rustls`.
    pub struct TcpBackend {
        tls_config: Arc<rustls::ClientConfig>,
    }

    impl TcpBackend {
        pub fn new() -> Self {
            let mut roots = rustls::RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            let tls_config = rustls::ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth();
            Self {
                tls_config: Arc::new(tls_config),
            }
        }

        async fn connect(
            &self,
            host: &str,
            port: u16,
            local_address: Option<IpAddr>,
        ) -> std::io::Result<TcpStream> {
            let remote = tokio::net::lookup_host((host, port))
                .await?
                .next()
                .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::NotFound))?;

            let socket = match remote {
                std::net::SocketAddr::V4(_) => TcpSocket::new_v4()?,
                std::net::SocketAddr::V6(_) => TcpSocket::new_v6()?,
            };
            if let Some(addr) = local_address {
                socket.bind(std::net::SocketAddr::new(addr, 0))?;
            }
            let stream = socket.connect(remote).await?;
            stream.set_nodelay(true)?;

            #[cfg(not(windows))]
            let stream = {
                let socket = socket2::Socket::from(stream.into_std()?);
                let conf = socket2::TcpKeepalive::new().with_time(KEEPALIVE);
                let _ = socket.set_tcp_keepalive(&conf);
                TcpStream::from_std(std::net::TcpStream::from(socket))?
            };

            Ok(stream)
        }
    }

    #[async_trait]
    impl NetworkBackend for TcpBackend {
        async fn connect_tcp(
            &self,
            host: &str,
            port: u16,
            timeout: Option<Duration>,
            local_address: Option<IpAddr>,
        ) -> Result<BoxedStream> {
            let connect = self.connect(host, port, local_address);
            let stream = match timeout {
                Some(d) => crate::runtime::timeout(d, connect)
                    .await
                    .unwrap_or_else(|| Err(std::io::ErrorKind::TimedOut.into())),
                None => connect.await,
            }
            .map_err(|e| Error::connect_error(placeholder_origin(host, port), e))?;
            Ok(Box::pin(stream))
        }

        async fn start_tls(
            &self,
            stream: BoxedStream,
            host: &str,
            timeout: Option<Duration>,
        ) -> Result<BoxedStream> {
            let connector = TlsConnector::from(self.tls_config.clone());
            let server_name = ServerName::try_from(host.to_string())
                .map_err(|_| Error::unsupported_protocol(host))?;
            let connect = connector.connect(server_name, TokioCompat(stream));
            let session = match timeout {
                Some(d) => crate::runtime::timeout(d, connect)
                    .await
                    .unwrap_or_else(|| Err(std::io::ErrorKind::TimedOut.into())),
                None => connect.await,
            }
            .map_err(|e| Error::connect_error(placeholder_origin(host, 0), e))?;
            Ok(Box::pin(session))
        }
    }

    /// `tokio_rustls` wants a concrete, nameable `AsyncRead + AsyncWrite + Unpin` type; our
    /// already-boxed stream satisfies the bounds but needs a newtype to be nameable here.
    struct TokioCompat(BoxedStream);

    impl tokio::io::AsyncRead for TokioCompat {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::pin::Pin::new(&mut self.0).poll_read(cx, buf)
        }
    }

    impl tokio::io::AsyncWrite for TokioCompat {
        fn poll_write(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            std::pin::Pin::new(&mut self.0).poll_write(cx, buf)
        }

        fn poll_flush(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::pin::Pin::new(&mut self.0).poll_flush(cx)
        }

        fn poll_shutdown(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::pin::Pin::new(&mut self.0).poll_shutdown(cx)
        }
    }
}

#[cfg(feature = "rustls-tls")]
pub use tcp::TcpBackend;
