//! `httpool`: an async HTTP/1.1 connection pool with reservation-based session stickiness.
//!
//! A [`pool::Pool`] hands out connections keyed by [`origin::Origin`] (scheme, host, port).
//! Every connection the pool knows about is in exactly one of three states — ACTIVE (driving an
//! exchange), RESERVED (finished, held for a specific follow-up request via
//! [`request::RequestExtensions::conn_id`]), or IDLE (finished, available to any request for the
//! same origin) — which is what lets a caller pin a sequence of requests to the same physical
//! connection without holding a lock across `await` points itself.
//!
//! All pool bookkeeping is owned by a single background task (the dispatcher); callers talk to
//! it over channels and perform their own connection I/O, so no mutex is ever shared between
//! callers. See `DESIGN.md` for the grounding behind each module.
//!
//! ```no_run
//! # async fn run() -> httpool::error::Result<()> {
//! use std::sync::Arc;
//! use httpool::{net::TcpBackend, options::PoolOptions, pool::Pool, request::PoolRequest};
//!
//! let pool = Pool::new(
//!     PoolOptions::builder()
//!         .network_backend(Arc::new(TcpBackend::new()))
//!         .build(),
//! )?;
//!
//! let mut response = pool
//!     .acquire(
//!         PoolRequest::builder()
//!             .url("https://example.com/".parse().unwrap())
//!             .build(),
//!     )
//!     .await?;
//! let body = response.handle.aread().await?;
//! # let _ = body;
//! # Ok(())
//! # }
//! ```

pub mod conn;
pub mod error;
pub mod event;
pub mod net;
pub mod options;
pub mod origin;
pub mod pool;
pub mod request;
pub mod response;
pub(crate) mod runtime;

pub use error::{Error, Result};
pub use options::PoolOptions;
pub use origin::{Origin, Scheme};
pub use pool::Pool;
pub use request::{PoolRequest, RequestExtensions, RequestTimeouts};
pub use response::{Response, ResponseExtensions, ResponseHandle};
