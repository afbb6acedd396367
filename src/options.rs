//! Pool configuration, built with `typed-builder` following `cmap/options.rs`'s
//! `ConnectionPoolOptions`.

use std::{sync::Arc, time::Duration};

use typed_builder::TypedBuilder;

use crate::{
    error::{Error, Result},
    net::NetworkBackend,
};

/// Configuration accepted by [`crate::pool::Pool::new`].
///
/// Unlike the teacher's `ConnectionPoolOptions`, every numeric field here has a concrete
/// default rather than an `Option` the caller must unwrap, because this spec assigns each one
/// a specific default value (`max_connections = 10`, etc.) rather than leaving them to an
/// upstream layer to resolve.
#[derive(TypedBuilder)]
pub struct PoolOptions {
    /// Hard cap on the number of connections live in the registry at once (ACTIVE + RESERVED +
    /// IDLE). Must be greater than zero.
    #[builder(default = 10)]
    pub max_connections: u32,

    /// Cap on the number of connections allowed to sit IDLE at once. Must be greater than
    /// zero: a pool that can never hold an idle connection can also never hold a reserved one,
    /// since both draw from the same keep-alive budget.
    #[builder(default, setter(strip_option))]
    pub max_keepalive_connections: Option<u32>,

    /// How long a RESERVED or IDLE connection may sit unused before it is eligible for
    /// removal. Must be greater than zero for the same reason as `max_keepalive_connections`.
    #[builder(default = Duration::from_secs(5))]
    pub keepalive_expiry: Duration,

    /// If true, any connection that negotiates HTTP/2 raises `RuntimeError` on first use
    /// instead of being driven normally.
    #[builder(default = false)]
    pub http2: bool,

    /// The socket/TLS backend new connections are established through. Wrap a custom backend
    /// in `Arc::new(..)` before passing it here; production code typically passes
    /// `Arc::new(TcpBackend::new())`.
    pub network_backend: Arc<dyn NetworkBackend>,
}

impl PoolOptions {
    /// Resolves `max_keepalive_connections`'s default (`= max_connections`) and validates the
    /// construction-time invariants from the dispatcher's contract: a zero keepalive budget
    /// would make the RESERVED state unreachable, so it is rejected outright rather than
    /// silently accepted and observed as a pool that never reserves anything.
    pub(crate) fn validate(self) -> Result<ValidatedOptions> {
        let max_keepalive_connections = self.max_keepalive_connections.unwrap_or(self.max_connections);

        if self.max_connections == 0 {
            return Err(Error::invalid_config("max_connections must be greater than zero"));
        }
        if max_keepalive_connections == 0 {
            return Err(Error::invalid_config(
                "max_keepalive_connections must be greater than zero",
            ));
        }
        if self.keepalive_expiry.is_zero() {
            return Err(Error::invalid_config("keepalive_expiry must be greater than zero"));
        }

        Ok(ValidatedOptions {
            max_connections: self.max_connections,
            max_keepalive_connections,
            keepalive_expiry: self.keepalive_expiry,
            http2: self.http2,
            network_backend: self.network_backend,
        })
    }
}

/// `PoolOptions` after `validate()` has resolved defaults and rejected invalid configurations.
/// Kept distinct from `PoolOptions` so the worker never has to re-check what construction
/// already guaranteed.
pub(crate) struct ValidatedOptions {
    pub(crate) max_connections: u32,
    pub(crate) max_keepalive_connections: u32,
    pub(crate) keepalive_expiry: Duration,
    pub(crate) http2: bool,
    pub(crate) network_backend: Arc<dyn NetworkBackend>,
}
