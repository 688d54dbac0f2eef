use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;

use crate::socket::SocketFactory;
use crate::socket::SocketHandle;
use crate::socket::SocketId;
use crate::socket::SocketOptions;
use crate::RegistryError;
use crate::Result;

/// In-memory socket subsystem: creates [`TestSocket`]s, keeps them
/// addressable, and records every reference release the registry issues.
pub struct TestSocketTable {
    sockets: Mutex<HashMap<SocketId, Arc<TestSocket>>>,
    next_id: AtomicU64,
    create_calls: AtomicUsize,
    hc_enabled_for_new: bool,
    fail_next_create: AtomicBool,
    new_sockets_start_failed: AtomicBool,
    last_options: Mutex<Option<SocketOptions>>,
}

impl TestSocketTable {
    pub fn new(hc_enabled: bool) -> Arc<Self> {
        Arc::new(Self {
            sockets: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            create_calls: AtomicUsize::new(0),
            hc_enabled_for_new: hc_enabled,
            fail_next_create: AtomicBool::new(false),
            new_sockets_start_failed: AtomicBool::new(false),
            last_options: Mutex::new(None),
        })
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::Relaxed)
    }

    pub fn socket(
        &self,
        id: SocketId,
    ) -> Option<Arc<TestSocket>> {
        self.sockets.lock().unwrap().get(&id).cloned()
    }

    pub fn fail_next_create(&self) {
        self.fail_next_create.store(true, Ordering::Relaxed);
    }

    pub fn new_sockets_start_failed(&self) {
        self.new_sockets_start_failed.store(true, Ordering::Relaxed);
    }

    pub fn last_options(&self) -> Option<SocketOptions> {
        self.last_options.lock().unwrap().clone()
    }

    /// Registers a standalone socket, e.g. a pooled sub-socket.
    pub fn add_socket(
        &self,
        remote: SocketAddr,
        hc_enabled: bool,
    ) -> Arc<TestSocket> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let socket = Arc::new(TestSocket::new(id, remote, hc_enabled, false));
        self.sockets.lock().unwrap().insert(id, Arc::clone(&socket));
        socket
    }
}

impl SocketFactory for TestSocketTable {
    fn create_socket(
        &self,
        opt: &SocketOptions,
    ) -> Result<SocketId> {
        *self.last_options.lock().unwrap() = Some(opt.clone());
        if self.fail_next_create.swap(false, Ordering::Relaxed) {
            return Err(RegistryError::CreateFailed(opt.remote_side.to_string()).into());
        }
        self.create_calls.fetch_add(1, Ordering::Relaxed);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let hc_enabled = self.hc_enabled_for_new || opt.health_check_interval_s > 0;
        let failed = self.new_sockets_start_failed.load(Ordering::Relaxed);
        let socket = Arc::new(TestSocket::new(id, opt.remote_side, hc_enabled, failed));
        self.sockets.lock().unwrap().insert(id, socket);
        Ok(id)
    }

    fn address(
        &self,
        id: SocketId,
    ) -> Option<Arc<dyn SocketHandle>> {
        self.socket(id)
            .filter(|socket| !socket.failed())
            .map(|socket| socket as Arc<dyn SocketHandle>)
    }

    fn address_failed_as_well(
        &self,
        id: SocketId,
    ) -> Option<Arc<dyn SocketHandle>> {
        self.socket(id).map(|socket| socket as Arc<dyn SocketHandle>)
    }
}

/// A fake connection recording the release calls it receives.
pub struct TestSocket {
    id: SocketId,
    remote: SocketAddr,
    hc_enabled: bool,
    failed: AtomicBool,
    pooled: Mutex<Vec<SocketId>>,
    additional_ref_releases: AtomicUsize,
    hc_ref_releases: AtomicUsize,
    idle_release_calls: Mutex<Vec<i64>>,
}

impl TestSocket {
    fn new(
        id: SocketId,
        remote: SocketAddr,
        hc_enabled: bool,
        failed: bool,
    ) -> Self {
        Self {
            id,
            remote,
            hc_enabled,
            failed: AtomicBool::new(failed),
            pooled: Mutex::new(Vec::new()),
            additional_ref_releases: AtomicUsize::new(0),
            hc_ref_releases: AtomicUsize::new(0),
            idle_release_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_failed(&self) {
        self.failed.store(true, Ordering::Relaxed);
    }

    pub fn set_pooled_sockets(
        &self,
        ids: Vec<SocketId>,
    ) {
        *self.pooled.lock().unwrap() = ids;
    }

    pub fn additional_ref_releases(&self) -> usize {
        self.additional_ref_releases.load(Ordering::Relaxed)
    }

    pub fn hc_ref_releases(&self) -> usize {
        self.hc_ref_releases.load(Ordering::Relaxed)
    }

    pub fn idle_release_calls(&self) -> Vec<i64> {
        self.idle_release_calls.lock().unwrap().clone()
    }
}

impl SocketHandle for TestSocket {
    fn id(&self) -> SocketId {
        self.id
    }

    fn remote_side(&self) -> SocketAddr {
        self.remote
    }

    fn failed(&self) -> bool {
        self.failed.load(Ordering::Relaxed)
    }

    fn hc_enabled(&self) -> bool {
        self.hc_enabled
    }

    fn release_additional_reference(&self) {
        self.additional_ref_releases.fetch_add(1, Ordering::Relaxed);
    }

    fn release_hc_related_reference(&self) {
        self.hc_ref_releases.fetch_add(1, Ordering::Relaxed);
    }

    fn list_pooled_sockets(
        &self,
        out: &mut Vec<SocketId>,
    ) {
        out.clear();
        out.extend(self.pooled.lock().unwrap().iter().copied());
    }

    fn release_reference_if_idle(
        &self,
        idle_seconds: i64,
    ) {
        self.idle_release_calls.lock().unwrap().push(idle_seconds);
    }
}
