use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::OnceLock;
use std::sync::Weak;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;
use tracing::error;
use tracing::warn;

use super::reaper;
use super::reaper::ReaperHandle;
use super::SocketMapKey;
use super::SocketMapOptions;
use crate::config::TlsConfig;
use crate::metrics;
use crate::socket::HealthCheckOption;
use crate::socket::SocketHandle;
use crate::socket::SocketId;
use crate::socket::SocketOptions;
use crate::socket::INVALID_SOCKET_ID;
use crate::RegistryError;
use crate::Result;

static NEXT_MAP_ID: AtomicU64 = AtomicU64::new(0);

/// Locks a mutex, recovering the guard when a panicking holder poisoned it.
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// The registry's side of the socket's reference accounting.
///
/// Exactly one of the variants holds per entry. Health-checked sockets are
/// kept alive by the checker's own reference, so the map only needs shared
/// access; without health checking the map keeps the strong handle itself.
/// [`SocketRef::release`] consumes the variant, so the extra reference can
/// only ever be given back once, and only by its own path.
pub(crate) enum SocketRef {
    Owned(Arc<dyn SocketHandle>),
    HealthChecked(Weak<dyn SocketHandle>),
}

impl SocketRef {
    pub(crate) fn strong(&self) -> Option<Arc<dyn SocketHandle>> {
        match self {
            SocketRef::Owned(socket) => Some(Arc::clone(socket)),
            SocketRef::HealthChecked(socket) => socket.upgrade(),
        }
    }

    /// Releases the extra reference held for this entry.
    pub(crate) fn release(self) {
        match self {
            // Dropping the handle is the release.
            SocketRef::Owned(socket) => drop(socket),
            SocketRef::HealthChecked(socket) => {
                if let Some(socket) = socket.upgrade() {
                    socket.release_hc_related_reference();
                }
            }
        }
    }
}

/// One registry record per key.
pub(crate) struct SingleConnection {
    pub(crate) socket: SocketRef,
    pub(crate) ref_count: u32,
    /// When `ref_count` last dropped to zero; ignored while `ref_count > 0`.
    pub(crate) no_ref_at: Instant,
}

impl SingleConnection {
    fn socket_id(&self) -> SocketId {
        match self.socket.strong() {
            Some(socket) => socket.id(),
            None => INVALID_SOCKET_ID,
        }
    }
}

/// Shared map from logical peer identity to a reference-counted socket.
///
/// All foreground operations are guarded by a single mutex with short
/// critical sections; socket reference releases always happen after the
/// mutex is dropped. See the module documentation for the lifecycle.
pub struct SocketMap {
    inner: Arc<MapInner>,
    reaper: Mutex<Option<ReaperHandle>>,
    shut_down: AtomicBool,
}

pub(crate) struct MapInner {
    entries: Mutex<HashMap<SocketMapKey, SingleConnection>>,
    options: OnceLock<SocketMapOptions>,
    exposed_in_vars: AtomicBool,
    var_name: String,
}

impl Default for SocketMap {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SocketMap {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("SocketMap")
            .field("var_name", &self.inner.var_name)
            .finish()
    }
}

impl SocketMap {
    pub fn new() -> Self {
        let map_id = NEXT_MAP_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            inner: Arc::new(MapInner {
                entries: Mutex::new(HashMap::new()),
                options: OnceLock::new(),
                exposed_in_vars: AtomicBool::new(false),
                var_name: format!("rpc_socket_map_{map_id}"),
            }),
            reaper: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Prepares the map for use. Fails the second time.
    ///
    /// Starts the reaper task when an idle timeout is configured, either as
    /// a positive static value or through a dynamic cell; spawning needs a
    /// running tokio runtime.
    pub fn init(
        &self,
        options: SocketMapOptions,
    ) -> Result<()> {
        if self.inner.options.get().is_some() {
            error!("socket map already initialized");
            return Err(RegistryError::AlreadyInitialized.into());
        }
        if options.socket_factory.is_none() {
            error!("SocketMapOptions.socket_factory must be set");
            return Err(RegistryError::MissingFactory.into());
        }
        {
            let mut entries = lock_unpoisoned(&self.inner.entries);
            if entries.try_reserve(options.suggested_map_size).is_err() {
                error!(size = options.suggested_map_size, "fail to reserve socket map entries");
                return Err(RegistryError::MapInitFailed(options.suggested_map_size).into());
            }
        }
        let start_reaper =
            options.idle_timeout_second.is_dynamic() || options.idle_timeout_second.get() > 0;
        // Spawn before committing the options: a spawn failure must leave
        // the map uninitialized so init stays retryable.
        let reaper_handle = if start_reaper {
            Some(reaper::spawn(Arc::downgrade(&self.inner))?)
        } else {
            None
        };
        if self.inner.options.set(options).is_err() {
            // Lost an init race; dropping the handle closes the stop channel
            // and the freshly spawned task exits on its own.
            return Err(RegistryError::AlreadyInitialized.into());
        }
        if let Some(handle) = reaper_handle {
            *lock_unpoisoned(&self.reaper) = Some(handle);
        }
        Ok(())
    }

    /// Shares the connection registered under `key`, opening one if absent.
    ///
    /// An existing entry is reused unless its socket is permanently failed
    /// (failed without health checking), in which case a fresh socket
    /// replaces it. Each successful insert must be paired with one
    /// [`remove`](Self::remove).
    pub fn insert(
        &self,
        key: &SocketMapKey,
        tls: Option<Arc<TlsConfig>>,
        use_rdma: bool,
        hc_option: &HealthCheckOption,
    ) -> Result<SocketId> {
        self.inner.insert(key, tls, use_rdma, hc_option)
    }

    /// Returns the socket currently registered under `key` without touching
    /// its reference count.
    pub fn find(
        &self,
        key: &SocketMapKey,
    ) -> Option<SocketId> {
        self.inner.find(key)
    }

    /// Gives back one reference on `key`'s entry.
    ///
    /// `expected_id` guards against removing a successor: when the entry's
    /// socket has been replaced since the caller's insert, the call is a
    /// no-op. Pass [`INVALID_SOCKET_ID`] to skip the comparison — only safe
    /// when every registered socket keeps health checking on. Idempotent on
    /// absent keys.
    pub fn remove(
        &self,
        key: &SocketMapKey,
        expected_id: SocketId,
    ) {
        self.inner.remove_internal(key, expected_id, false)
    }

    /// Snapshot of all registered socket ids.
    pub fn list(&self) -> Vec<SocketId> {
        self.inner.list()
    }

    /// Snapshot of all registered peer endpoints.
    pub fn list_remote_sides(&self) -> Vec<SocketAddr> {
        self.inner.list_remote_sides()
    }

    /// Writes into `out` every key whose entry has had zero references for
    /// at least `defer`.
    pub fn list_orphans(
        &self,
        defer: Duration,
        out: &mut Vec<SocketMapKey>,
    ) {
        self.inner.list_orphans(defer, out)
    }

    /// Debug summary.
    pub fn print(
        &self,
        os: &mut dyn fmt::Write,
    ) -> fmt::Result {
        self.inner.print(os)
    }

    /// Stops and joins the reaper, then reports callers that never gave
    /// their references back.
    pub async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::Release);
        let handle = lock_unpoisoned(&self.reaper).take();
        if let Some(handle) = handle {
            handle.stop_and_join().await;
        }
        self.inner.log_left_entries();
    }
}

impl Drop for SocketMap {
    fn drop(&mut self) {
        debug!(map = %self.inner.var_name, "destroying socket map");
        // Dropping the reaper handle below closes the stop channel, which
        // wakes the task out of its sleep; it exits on its own.
        if !self.shut_down.load(Ordering::Acquire) {
            self.inner.log_left_entries();
        }
    }
}

impl MapInner {
    pub(crate) fn options(&self) -> Option<&SocketMapOptions> {
        self.options.get()
    }

    fn insert(
        &self,
        key: &SocketMapKey,
        tls: Option<Arc<TlsConfig>>,
        use_rdma: bool,
        hc_option: &HealthCheckOption,
    ) -> Result<SocketId> {
        self.expose_in_vars_if_needed();

        let mut dead_ref: Option<SocketRef> = None;
        let mut addressing_ref: Option<Arc<dyn SocketHandle>> = None;
        let result =
            self.insert_locked(key, tls, use_rdma, hc_option, &mut dead_ref, &mut addressing_ref);
        // Reference releases may run unbounded teardown; both the replaced
        // socket and the temporary addressing handle go only once the mutex
        // is gone.
        if let Some(stale) = dead_ref {
            stale.release();
        }
        drop(addressing_ref);
        result
    }

    fn insert_locked(
        &self,
        key: &SocketMapKey,
        tls: Option<Arc<TlsConfig>>,
        use_rdma: bool,
        hc_option: &HealthCheckOption,
        dead_ref: &mut Option<SocketRef>,
        addressing_ref: &mut Option<Arc<dyn SocketHandle>>,
    ) -> Result<SocketId> {
        let Some(options) = self.options.get() else {
            error!("socket map used before init");
            return Err(RegistryError::MissingFactory.into());
        };
        let Some(factory) = options.socket_factory.as_ref() else {
            return Err(RegistryError::MissingFactory.into());
        };

        let mut entries = lock_unpoisoned(&self.entries);
        if let Some(sc) = entries.get_mut(key) {
            let live = match sc.socket.strong() {
                Some(socket) if !socket.failed() || socket.hc_enabled() => Some(socket),
                _ => None,
            };
            if let Some(socket) = live {
                sc.ref_count += 1;
                let id = socket.id();
                self.update_vars(entries.len());
                return Ok(id);
            }
        }
        // A failed socket without health checking is failed for good:
        // replace it. Erase first and recreate below; overwriting in place
        // would force every error branch to unwind a half-written entry.
        if let Some(stale) = entries.remove(key) {
            debug!(key = %key, "replacing permanently failed socket");
            *dead_ref = Some(stale.socket);
        }

        let opt = SocketOptions {
            remote_side: key.peer,
            initial_tls: tls,
            use_rdma,
            hc_option: hc_option.clone(),
            ..SocketOptions::default()
        };
        let new_id = match factory.create_socket(&opt) {
            Ok(id) => id,
            Err(e) => {
                error!(peer = %key.peer, error = %e, "fail to create socket");
                return Err(RegistryError::CreateFailed(key.peer.to_string()).into());
            }
        };
        // Keep a handle of our own so the entry stays dereferenceable for as
        // long as it is in the map.
        let Some(socket) = factory.address_failed_as_well(new_id) else {
            error!(socket_id = new_id, "fail to address just-created socket");
            return Err(RegistryError::InternalInconsistency(format!(
                "fail to address SocketId={new_id}"
            ))
            .into());
        };
        if socket.failed() && !socket.hc_enabled() {
            error!(socket_id = new_id, "created socket already failed without health checking");
            *addressing_ref = Some(socket);
            return Err(RegistryError::InternalInconsistency(
                "failed socket is not health-check enabled".into(),
            )
            .into());
        }
        // With health checking the checker owns the keep-alive reference and
        // the map only needs shared access; otherwise the map keeps the
        // strong handle until the entry is removed.
        let socket_ref = if socket.hc_enabled() {
            let weak = Arc::downgrade(&socket);
            *addressing_ref = Some(socket);
            SocketRef::HealthChecked(weak)
        } else {
            SocketRef::Owned(socket)
        };
        entries.insert(
            key.clone(),
            SingleConnection {
                socket: socket_ref,
                ref_count: 1,
                no_ref_at: Instant::now(),
            },
        );
        self.update_vars(entries.len());
        Ok(new_id)
    }

    fn find(
        &self,
        key: &SocketMapKey,
    ) -> Option<SocketId> {
        let entries = lock_unpoisoned(&self.entries);
        entries
            .get(key)
            .and_then(|sc| sc.socket.strong())
            .map(|socket| socket.id())
    }

    pub(crate) fn remove_internal(
        &self,
        key: &SocketMapKey,
        expected_id: SocketId,
        remove_orphan: bool,
    ) {
        self.expose_in_vars_if_needed();

        let mut removed: Option<SingleConnection> = None;
        {
            let mut entries = lock_unpoisoned(&self.entries);
            let Some(sc) = entries.get_mut(key) else {
                return;
            };
            if !remove_orphan
                && (expected_id == INVALID_SOCKET_ID || expected_id == sc.socket_id())
            {
                if sc.ref_count > 0 {
                    sc.ref_count -= 1;
                } else {
                    warn!(key = %key, "remove on a socket map entry with zero references");
                }
            }
            if sc.ref_count == 0 {
                // Snapshot the reloadable flag once for this decision.
                let defer_close_second = self
                    .options
                    .get()
                    .map(|options| options.defer_close_second.get())
                    .unwrap_or(0);
                if !remove_orphan && defer_close_second > 0 {
                    // Start the count-down; the reaper picks the entry up
                    // once the window has passed.
                    sc.no_ref_at = Instant::now();
                } else {
                    removed = entries.remove(key);
                }
            }
            self.update_vars(entries.len());
        }
        // Releases can run arbitrary teardown; never do them under the mutex.
        if let Some(sc) = removed {
            if let Some(socket) = sc.socket.strong() {
                socket.release_additional_reference();
            }
            sc.socket.release();
        }
    }

    pub(crate) fn list(&self) -> Vec<SocketId> {
        let entries = lock_unpoisoned(&self.entries);
        entries
            .values()
            .filter_map(|sc| sc.socket.strong())
            .map(|socket| socket.id())
            .collect()
    }

    fn list_remote_sides(&self) -> Vec<SocketAddr> {
        let entries = lock_unpoisoned(&self.entries);
        entries
            .values()
            .filter_map(|sc| sc.socket.strong())
            .map(|socket| socket.remote_side())
            .collect()
    }

    pub(crate) fn list_orphans(
        &self,
        defer: Duration,
        out: &mut Vec<SocketMapKey>,
    ) {
        out.clear();
        let now = Instant::now();
        let entries = lock_unpoisoned(&self.entries);
        for (key, sc) in entries.iter() {
            if sc.ref_count == 0 && now.saturating_duration_since(sc.no_ref_at) >= defer {
                out.push(key.clone());
            }
        }
    }

    fn print(
        &self,
        os: &mut dyn fmt::Write,
    ) -> fmt::Result {
        let count = lock_unpoisoned(&self.entries).len();
        write!(os, "count={count}")
    }

    fn log_left_entries(&self) {
        let entries = lock_unpoisoned(&self.entries);
        let mut left = Vec::new();
        for (key, sc) in entries.iter() {
            let usable = match sc.socket.strong() {
                Some(socket) => !socket.failed() || socket.hc_enabled(),
                None => false,
            };
            if usable && sc.ref_count != 0 {
                left.push(format!("{key}(ref={})", sc.ref_count));
            }
        }
        if !left.is_empty() {
            error!(map = %self.var_name, sockets = %left.join(" "), "sockets left in socket map");
        }
    }

    fn expose_in_vars_if_needed(&self) {
        if crate::config::flags().show_socketmap_in_vars()
            && !self.exposed_in_vars.swap(true, Ordering::Release)
        {
            metrics::register_if_needed();
        }
    }

    fn update_vars(
        &self,
        count: usize,
    ) {
        if self.exposed_in_vars.load(Ordering::Acquire) {
            metrics::set_socket_map_entries(&self.var_name, count as i64);
        }
    }
}
