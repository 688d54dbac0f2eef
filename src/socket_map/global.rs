//! Process-wide client socket map and the free functions forwarding to it.
//!
//! The map is built on first demand, behind a once-gate: readers observe
//! either nothing or a fully constructed map. Lookup-flavored helpers use
//! the read-only accessor and never trigger initialization.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::OnceLock;

use super::registry::lock_unpoisoned;
use super::registry::SocketMap;
use super::SocketMapKey;
use super::SocketMapOptions;
use crate::config::BoolFlag;
use crate::config::IntFlag;
use crate::config::TlsConfig;
use crate::socket::HealthCheckOption;
use crate::socket::SocketFactory;
use crate::socket::SocketId;
use crate::socket::SocketOptions;
use crate::socket::SocketHandle;
use crate::socket::INVALID_SOCKET_ID;
use crate::RegistryError;
use crate::Result;

static CLIENT_SOCKET_FACTORY: OnceLock<Arc<dyn SocketFactory>> = OnceLock::new();
static CLIENT_SOCKET_MAP: OnceLock<Arc<SocketMap>> = OnceLock::new();
static CLIENT_SOCKET_MAP_INIT: Mutex<()> = Mutex::new(());

/// Forces the globally configured health-check interval into every socket it
/// creates. Keeping the interval positive means registered sockets are never
/// replaced, which is what makes removal without an expected id safe.
struct GlobalSocketFactory {
    inner: Arc<dyn SocketFactory>,
}

impl SocketFactory for GlobalSocketFactory {
    fn create_socket(
        &self,
        opt: &SocketOptions,
    ) -> Result<SocketId> {
        let mut opt = opt.clone();
        opt.health_check_interval_s = crate::config::flags().health_check_interval();
        self.inner.create_socket(&opt)
    }

    fn address(
        &self,
        id: SocketId,
    ) -> Option<Arc<dyn SocketHandle>> {
        self.inner.address(id)
    }

    fn address_failed_as_well(
        &self,
        id: SocketId,
    ) -> Option<Arc<dyn SocketHandle>> {
        self.inner.address_failed_as_well(id)
    }
}

/// Installs the factory backing the process-wide client socket map.
///
/// Must run before the first [`socket_map_insert`]; fails the second time.
pub fn install_client_socket_factory(factory: Arc<dyn SocketFactory>) -> Result<()> {
    CLIENT_SOCKET_FACTORY
        .set(factory)
        .map_err(|_| RegistryError::AlreadyInitialized.into())
}

/// Read-only accessor: `None` until the map has been initialized.
pub fn client_side_socket_map() -> Option<Arc<SocketMap>> {
    CLIENT_SOCKET_MAP.get().cloned()
}

/// Returns the process-wide map, initializing it on first use.
///
/// Needs an installed factory and a running tokio runtime: the global map
/// always starts its reaper, with all sweep parameters live-reloadable
/// through [`flags`].
pub fn or_new_client_side_socket_map() -> Result<Arc<SocketMap>> {
    if let Some(map) = CLIENT_SOCKET_MAP.get() {
        return Ok(Arc::clone(map));
    }
    let _init = lock_unpoisoned(&CLIENT_SOCKET_MAP_INIT);
    if let Some(map) = CLIENT_SOCKET_MAP.get() {
        return Ok(Arc::clone(map));
    }
    let Some(inner) = CLIENT_SOCKET_FACTORY.get() else {
        return Err(RegistryError::MissingFactory.into());
    };
    let f = crate::config::flags();
    let map = Arc::new(SocketMap::new());
    map.init(SocketMapOptions {
        socket_factory: Some(Arc::new(GlobalSocketFactory {
            inner: Arc::clone(inner),
        })),
        suggested_map_size: f.suggested_map_size(),
        idle_timeout_second: IntFlag::Dynamic(f.idle_timeout_second_cell()),
        defer_close_second: IntFlag::Dynamic(f.defer_close_second_cell()),
        reserve_one_idle_socket: BoolFlag::Dynamic(f.reserve_one_idle_socket_cell()),
    })?;
    let _ = CLIENT_SOCKET_MAP.set(Arc::clone(&map));
    Ok(map)
}

/// Shares (or opens) the connection for `key` through the process-wide map.
pub fn socket_map_insert(
    key: &SocketMapKey,
    tls: Option<Arc<TlsConfig>>,
    use_rdma: bool,
    hc_option: &HealthCheckOption,
) -> Result<SocketId> {
    or_new_client_side_socket_map()?.insert(key, tls, use_rdma, hc_option)
}

/// Looks `key` up in the process-wide map without initializing it.
pub fn socket_map_find(key: &SocketMapKey) -> Option<SocketId> {
    client_side_socket_map().and_then(|map| map.find(key))
}

/// Gives back one reference on `key` in the process-wide map.
pub fn socket_map_remove(key: &SocketMapKey) {
    if let Some(map) = client_side_socket_map() {
        // The global factory keeps health checking on for every socket, so
        // entries are never replaced and the id comparison can be skipped.
        map.remove(key, INVALID_SOCKET_ID);
    }
}

/// Lists the socket ids registered in the process-wide map.
pub fn socket_map_list() -> Vec<SocketId> {
    client_side_socket_map()
        .map(|map| map.list())
        .unwrap_or_default()
}
