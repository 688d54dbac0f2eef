//! # sockmap
//!
//! Client-side connection registry for RPC frameworks: one shared,
//! reference-counted connection per logical peer.
//!
//! ## Features
//! - **Connection sharing**: concurrent callers asking for the same peer get
//!   the same socket; the entry lives exactly as long as the union of all
//!   interested callers
//! - **Deferred teardown**: a reloadable grace period keeps a connection
//!   around after its last user leaves
//! - **Health-check integration**: health-checked sockets survive transient
//!   failures; sockets without health checking are replaced once failed
//! - **Background reaping**: a cooperative task releases idle pooled
//!   sub-sockets and removes orphaned entries
//!
//! ## Quick Start
//! ```ignore
//! use std::sync::Arc;
//! use sockmap::{HealthCheckOption, SocketMap, SocketMapKey, SocketMapOptions};
//!
//! let map = Arc::new(SocketMap::new());
//! map.init(SocketMapOptions {
//!     socket_factory: Some(factory),
//!     ..Default::default()
//! })?;
//!
//! let key = SocketMapKey::new("10.0.0.1:8000".parse()?);
//! let id = map.insert(&key, None, false, &HealthCheckOption::default())?;
//! // ... issue RPCs over the socket ...
//! map.remove(&key, id);
//! ```
//!
//! Processes that want a single shared map use the free functions in
//! [`socket_map`] (`socket_map_insert` and friends) after installing a
//! factory with [`install_client_socket_factory`].

pub mod config;
pub mod metrics;
pub mod socket;
pub mod socket_map;

mod constants;
mod errors;

#[doc(hidden)]
pub use config::*;
pub use errors::*;
#[doc(hidden)]
pub use socket::*;
#[doc(hidden)]
pub use socket_map::*;

//-----------------------------------------------------------
// Test utils
#[cfg(test)]
#[doc(hidden)]
pub mod test_utils;
