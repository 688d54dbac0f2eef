//! Client-side socket registry.
//!
//! This module:
//! - Maintains at most one connection per logical peer, shared by all callers
//! - Ties each connection's lifetime to the union of interested callers
//! - Replaces permanently failed sockets on the next insert
//! - Runs a background reaper for idle pooled sockets and orphaned entries
//!
//! Callers obtain a [`SocketId`](crate::socket::SocketId) with
//! [`SocketMap::insert`] and give their interest back with
//! [`SocketMap::remove`]. The process-wide map is reached through the free
//! functions in this module.

mod global;
mod reaper;
mod registry;


pub use global::*;
pub use registry::SocketMap;

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::BoolFlag;
use crate::config::IntFlag;
use crate::constants::DEFAULT_SUGGESTED_MAP_SIZE;
use crate::socket::SocketFactory;

/// Identity of a logical peer: endpoint plus channel signature.
///
/// Channels with different authentication or grouping settings carry
/// different signatures and therefore own distinct sockets to the same
/// endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SocketMapKey {
    pub peer: SocketAddr,
    pub signature: u64,
}

impl SocketMapKey {
    pub fn new(peer: SocketAddr) -> Self {
        Self { peer, signature: 0 }
    }

    pub fn with_signature(
        peer: SocketAddr,
        signature: u64,
    ) -> Self {
        Self { peer, signature }
    }
}

impl fmt::Display for SocketMapKey {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}#{}", self.peer, self.signature)
    }
}

/// Options for [`SocketMap::init`].
#[derive(Clone)]
pub struct SocketMapOptions {
    /// Opens sockets and resolves socket ids. Required.
    pub socket_factory: Option<Arc<dyn SocketFactory>>,

    /// Pre-sized entry count of the map.
    pub suggested_map_size: usize,

    /// Threshold for closing idle pooled sub-sockets. Also decides whether
    /// the reaper task is started at all: a dynamic cell or a positive
    /// static value starts it.
    pub idle_timeout_second: IntFlag,

    /// Grace period before a zero-reference entry is removed.
    pub defer_close_second: IntFlag,

    /// Keep the first pooled sub-socket alive during idle sweeps.
    pub reserve_one_idle_socket: BoolFlag,
}

impl Default for SocketMapOptions {
    fn default() -> Self {
        Self {
            socket_factory: None,
            suggested_map_size: DEFAULT_SUGGESTED_MAP_SIZE,
            idle_timeout_second: IntFlag::default(),
            defer_close_second: IntFlag::default(),
            reserve_one_idle_socket: BoolFlag::default(),
        }
    }
}

impl SocketMapOptions {
    pub fn with_factory(socket_factory: Arc<dyn SocketFactory>) -> Self {
        Self {
            socket_factory: Some(socket_factory),
            ..Default::default()
        }
    }
}
