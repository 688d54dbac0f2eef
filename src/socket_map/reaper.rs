//! Background sweeper of the socket map.
//!
//! One cooperative task per map, ticking every second. Each tick it releases
//! pooled sub-sockets that have been idle past the configured threshold and
//! removes orphaned entries whose defer window has passed. The task holds
//! only a weak handle on the map and exits promptly on the stop signal or
//! when the map is gone.

use std::sync::Weak;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::trace;
use tracing::warn;

use super::registry::MapInner;
use super::SocketMapKey;
use crate::constants::REAPER_CHECK_INTERVAL;
use crate::socket::SocketFactory;
use crate::socket::SocketId;
use crate::socket::INVALID_SOCKET_ID;
use crate::RegistryError;
use crate::Result;

pub(crate) struct ReaperHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    /// Wakes the reaper out of its sleep and waits for it to exit.
    pub(crate) async fn stop_and_join(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "reaper task did not stop cleanly");
        }
    }
}

pub(crate) fn spawn(map: Weak<MapInner>) -> Result<ReaperHandle> {
    let Ok(runtime) = Handle::try_current() else {
        error!("no tokio runtime available to run the socket map reaper");
        return Err(RegistryError::ReaperStartFailed.into());
    };
    let (stop_tx, stop_rx) = watch::channel(false);
    let task = runtime.spawn(watch_connections(map, stop_rx));
    Ok(ReaperHandle { stop_tx, task })
}

async fn watch_connections(
    map: Weak<MapInner>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut orphans: Vec<SocketMapKey> = Vec::new();
    let mut pooled: Vec<SocketId> = Vec::new();
    loop {
        tokio::select! {
            // Stop request or stop channel closed by map teardown; either
            // way exit without waiting for the full tick.
            _ = stop_rx.changed() => break,
            _ = tokio::time::sleep(REAPER_CHECK_INTERVAL) => {}
        }
        let Some(map) = map.upgrade() else { break };
        sweep(&map, &mut orphans, &mut pooled);
    }
    debug!("socket map reaper stopped");
}

fn sweep(
    map: &MapInner,
    orphans: &mut Vec<SocketMapKey>,
    pooled: &mut Vec<SocketId>,
) {
    let Some(options) = map.options() else { return };

    // Snapshot the reloadable flags once per tick.
    let idle_seconds = options.idle_timeout_second.get();
    if idle_seconds > 0 {
        if let Some(factory) = options.socket_factory.as_deref() {
            sweep_idle_pooled_sockets(
                map,
                factory,
                idle_seconds,
                options.reserve_one_idle_socket.get(),
                pooled,
            );
        }
    }

    // Runs even with defer disabled: entries stamped while defer was on are
    // then removed on the next tick.
    let defer_seconds = options.defer_close_second.get();
    sweep_orphans(map, Duration::from_secs(defer_seconds.max(0) as u64), orphans);
}

fn sweep_idle_pooled_sockets(
    map: &MapInner,
    factory: &dyn SocketFactory,
    idle_seconds: i64,
    reserve_one: bool,
    pooled: &mut Vec<SocketId>,
) {
    for main_id in map.list() {
        let Some(main_socket) = factory.address(main_id) else {
            continue;
        };
        main_socket.list_pooled_sockets(pooled);
        let reserved = if reserve_one { 1 } else { 0 };
        for pooled_id in pooled.iter().skip(reserved) {
            if let Some(socket) = factory.address(*pooled_id) {
                socket.release_reference_if_idle(idle_seconds);
            }
        }
    }
}

fn sweep_orphans(
    map: &MapInner,
    defer: Duration,
    orphans: &mut Vec<SocketMapKey>,
) {
    map.list_orphans(defer, orphans);
    for key in orphans.iter() {
        trace!(key = %key, "removing orphan socket map entry");
        map.remove_internal(key, INVALID_SOCKET_ID, true);
    }
}
