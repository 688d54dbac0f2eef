//! Abstract interfaces of the socket subsystem consumed by the registry.
//!
//! The registry never performs socket I/O itself. It opens sockets through a
//! [`SocketFactory`], addresses them by [`SocketId`] and drives the
//! reference-release protocol on [`SocketHandle`]s. The transport layer of
//! the embedding framework provides the implementations.

use std::net::SocketAddr;
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;

use crate::config::TlsConfig;
use crate::Result;

/// Opaque address of a socket inside the socket subsystem.
pub type SocketId = u64;

/// Sentinel meaning "do not compare" in removal paths.
pub const INVALID_SOCKET_ID: SocketId = u64::MAX;

/// Per-socket health checking parameters.
#[derive(Clone, Debug, Default)]
pub struct HealthCheckOption {
    /// Health service name probed by the checker; empty probes the server's
    /// overall serving status.
    pub probe_service: String,
}

/// Parameters for opening a socket.
#[derive(Clone, Debug)]
pub struct SocketOptions {
    pub remote_side: SocketAddr,
    pub initial_tls: Option<Arc<TlsConfig>>,
    pub use_rdma: bool,
    pub hc_option: HealthCheckOption,
    /// Seconds between health checks; non-positive disables checking.
    pub health_check_interval_s: i64,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            remote_side: SocketAddr::from(([0, 0, 0, 0], 0)),
            initial_tls: None,
            use_rdma: false,
            hc_option: HealthCheckOption::default(),
            health_check_interval_s: 0,
        }
    }
}

/// An addressable, reference-counted connection object.
///
/// Handles are shared. The socket subsystem keeps a socket addressable until
/// every named reference on it has been released; the named releases below
/// are protocol operations, not memory management.
#[cfg_attr(test, automock)]
pub trait SocketHandle: Send + Sync {
    fn id(&self) -> SocketId;

    fn remote_side(&self) -> SocketAddr;

    /// Whether the socket has observed a connection failure.
    fn failed(&self) -> bool;

    /// Whether the socket is under active health checking. A health-checked
    /// socket survives transient failures; one without is failed for good.
    fn hc_enabled(&self) -> bool;

    /// Releases the reference the socket keeps for itself at creation.
    fn release_additional_reference(&self);

    /// Asks the health-check subsystem to drop its keep-alive reference.
    fn release_hc_related_reference(&self);

    /// Writes the ids of the pooled sub-sockets into `out`, replacing its
    /// previous contents.
    fn list_pooled_sockets(&self, out: &mut Vec<SocketId>);

    /// Releases this socket's reference when it has been idle for at least
    /// `idle_seconds`. What counts as idle is the socket's own policy.
    fn release_reference_if_idle(&self, idle_seconds: i64);
}

/// Gateway to the socket subsystem: opens sockets and resolves ids.
///
/// A factory may be called while the registry holds its map mutex and must
/// not call back into the registry.
#[cfg_attr(test, automock)]
pub trait SocketFactory: Send + Sync {
    /// Opens a new socket and returns its id.
    fn create_socket(&self, opt: &SocketOptions) -> Result<SocketId>;

    /// Resolves a live, non-failed socket.
    fn address(&self, id: SocketId) -> Option<Arc<dyn SocketHandle>>;

    /// Resolves a socket even when it is already failed.
    fn address_failed_as_well(&self, id: SocketId) -> Option<Arc<dyn SocketHandle>>;
}
