//! The public entry point: [`Pool`], a cheaply-cloneable handle onto the actor described by
//! [`worker::PoolWorker`]. Grounded on `cmap/mod.rs`'s top-level `ConnectionPool`, which is
//! likewise a thin handle wrapping a requester/manager pair plus a worker-keepalive token.

pub(crate) mod manager;
pub(crate) mod registry;
pub(crate) mod requester;
mod worker;

use std::sync::Arc;

use tracing::warn;

use crate::{
    conn::{self, driver::ExchangeResult, Connection},
    error::{Error, Result},
    event::ConnectionCloseWarning,
    net::NetworkBackend,
    options::PoolOptions,
    origin::Origin,
    request::PoolRequest,
    response::{Response, ResponseExtensions, ResponseHandle},
};

use manager::PoolManager;
use requester::{CheckoutResult, QueuedOutcome, Requester};

/// A pool of HTTP/1.1 connections to one or more origins, dispatched by a single background
/// worker task (see `worker::PoolWorker`). Cloning a `Pool` is cheap — it shares the same worker
/// — and the worker tears itself down once every clone has been dropped.
#[derive(Clone)]
pub struct Pool {
    requester: Requester,
    manager: PoolManager,
    network_backend: Arc<dyn NetworkBackend>,
    http2: bool,
}

impl Pool {
    /// Validates `options` and spawns the pool's worker task.
    pub fn new(options: PoolOptions) -> Result<Self> {
        let validated = options.validate()?;
        let (requester, manager, network_backend, http2) = worker::PoolWorker::spawn(validated);
        Ok(Self {
            requester,
            manager,
            network_backend,
            http2,
        })
    }

    /// Acquires a connection for `request`'s origin, drives the request across it, and returns
    /// the parsed response headers plus a handle to read the body and return the connection.
    ///
    /// This is where the dispatcher's "capacity bookkeeping happens under message-passing, I/O
    /// happens outside it" split (§5) is visible end to end: the worker only ever hands back a
    /// decision (`Reuse`, `Create`, or `Queued`); every socket read and write in this method runs
    /// entirely outside the worker's own task.
    pub async fn acquire(&self, request: PoolRequest) -> Result<Response> {
        let origin = Origin::from_url(&request.url)?;
        let trace = request.extensions.trace.clone();
        let timeouts = request.extensions.timeout;

        let mut conn = self
            .checkout(
                origin.clone(),
                request.extensions.conn_id,
                timeouts.pool,
                timeouts.connect,
                trace.clone(),
            )
            .await?;

        let target = request_target(&request.url);
        let headers = with_host_header(&origin, request.headers.clone());

        let exchange = crate::conn::driver::run_exchange(
            &mut conn,
            self.http2,
            &request.method,
            &target,
            &headers,
            &request.body,
            trace.as_ref(),
        );
        let exchange_timeout = longest(timeouts.write, timeouts.read);
        let exchange_result = match exchange_timeout {
            Some(d) => crate::runtime::timeout(d, exchange)
                .await
                .unwrap_or_else(|| Err(timed_out(conn.conn_id))),
            None => exchange.await,
        };

        let ExchangeResult {
            status,
            headers: response_headers,
            body_length,
        } = match exchange_result {
            Ok(result) => result,
            Err(e) => {
                // The exchange never produced a usable response: the connection cannot be
                // trusted to still be framed correctly, so it is force-removed rather than
                // returned to RESERVED or IDLE.
                self.manager.remove_active();
                return Err(e);
            }
        };

        conn.single_use = conn::driver::negotiates_close(&headers, &response_headers);
        if conn.single_use {
            warn!("{}", ConnectionCloseWarning { conn_id: conn.conn_id });
        }

        Ok(Response {
            status,
            extensions: ResponseExtensions { conn_id: conn.conn_id },
            headers: response_headers,
            handle: ResponseHandle::new(
                conn,
                body_length,
                self.manager.clone(),
                trace,
                timeouts.read,
                request.extensions.release_on_close,
            ),
        })
    }

    /// Performs the checkout half of `acquire`: asks the worker for a connection, then, if told
    /// to create one, dials the origin itself (outside the worker's task).
    async fn checkout(
        &self,
        origin: Origin,
        conn_id_hint: Option<crate::conn::ConnId>,
        pool_timeout: Option<std::time::Duration>,
        connect_timeout: Option<std::time::Duration>,
        trace: Option<crate::event::TraceHook>,
    ) -> Result<Connection> {
        let result = match pool_timeout {
            Some(d) => {
                crate::runtime::timeout(d, self.requester.checkout(origin.clone(), conn_id_hint))
                    .await
                    .ok_or_else(|| Error::pool_timeout(origin.clone()))??
            }
            None => self.requester.checkout(origin.clone(), conn_id_hint).await?,
        };

        match result {
            CheckoutResult::Reuse(conn) => Ok(conn),
            CheckoutResult::Create { conn_id, origin } => self.dial(conn_id, origin, connect_timeout, trace.as_ref()).await,
            CheckoutResult::Queued { waiter_id, receiver } => {
                let outcome = match pool_timeout {
                    Some(d) => match crate::runtime::timeout(d, receiver).await {
                        Some(Ok(outcome)) => outcome,
                        Some(Err(_)) => return Err(Error::runtime("pool is closed")),
                        None => {
                            self.manager.cancel_wait(waiter_id);
                            return Err(Error::pool_timeout(origin));
                        }
                    },
                    None => receiver.await.map_err(|_| Error::runtime("pool is closed"))?,
                };
                match outcome {
                    QueuedOutcome::Reuse(conn) => Ok(conn),
                    QueuedOutcome::Create { conn_id, origin } => {
                        self.dial(conn_id, origin, connect_timeout, trace.as_ref()).await
                    }
                    QueuedOutcome::Closed => Err(Error::runtime("pool is closed")),
                }
            }
        }
    }

    async fn dial(
        &self,
        conn_id: crate::conn::ConnId,
        origin: Origin,
        connect_timeout: Option<std::time::Duration>,
        trace: Option<&crate::event::TraceHook>,
    ) -> Result<Connection> {
        match conn::driver::establish(&origin, self.network_backend.as_ref(), connect_timeout, None, trace).await {
            Ok(stream) => Ok(Connection::new(conn_id, origin, stream)),
            Err(e) => {
                self.manager.create_failed();
                Err(e)
            }
        }
    }

    /// Closes the pool: every RESERVED and IDLE connection is closed and every queued waiter is
    /// failed. Rejected with `RuntimeError` if any connection is still ACTIVE, since there is no
    /// way to ask the caller holding it to stop (§4.6).
    pub async fn close(&self) -> Result<()> {
        self.manager.shutdown().await
    }
}

fn longest(a: Option<std::time::Duration>, b: Option<std::time::Duration>) -> Option<std::time::Duration> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

fn timed_out(conn_id: crate::conn::ConnId) -> Error {
    Error::io(std::io::Error::from(std::io::ErrorKind::TimedOut), Some(conn_id))
}

fn request_target(url: &url::Url) -> String {
    let target = &url[url::Position::AfterPort..url::Position::AfterQuery];
    if target.is_empty() {
        "/".to_string()
    } else {
        target.to_string()
    }
}

fn with_host_header(origin: &Origin, mut headers: Vec<(String, String)>) -> Vec<(String, String)> {
    let has_host = headers.iter().any(|(name, _)| name.eq_ignore_ascii_case("host"));
    if !has_host {
        let value = if origin.port == default_port_for(origin) {
            origin.host.clone()
        } else {
            format!("{}:{}", origin.host, origin.port)
        };
        headers.push(("Host".to_string(), value));
    }
    headers
}

fn default_port_for(origin: &Origin) -> u16 {
    if origin.scheme.is_tls() {
        443
    } else {
        80
    }
}

#[cfg(test)]
mod tests;
