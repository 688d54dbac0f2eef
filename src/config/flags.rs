//! Live-reloadable parameters.
//!
//! Each parameter is either a fixed value or a pointer to a live cell that an
//! admin surface may rewrite at any time. Operations snapshot the value once
//! per decision and never re-read it mid-critical-section.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::OnceLock;

use config::ConfigError;
use tracing::warn;

use super::SocketMapConfig;
use crate::Error;
use crate::Result;

/// Integer parameter: fixed, or read through a shared live cell.
#[derive(Clone, Debug)]
pub enum IntFlag {
    Static(i64),
    Dynamic(Arc<AtomicI64>),
}

impl IntFlag {
    pub fn get(&self) -> i64 {
        match self {
            IntFlag::Static(value) => *value,
            IntFlag::Dynamic(cell) => cell.load(Ordering::Relaxed),
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, IntFlag::Dynamic(_))
    }
}

impl Default for IntFlag {
    fn default() -> Self {
        IntFlag::Static(0)
    }
}

/// Boolean parameter: fixed, or read through a shared live cell.
#[derive(Clone, Debug)]
pub enum BoolFlag {
    Static(bool),
    Dynamic(Arc<AtomicBool>),
}

impl BoolFlag {
    pub fn get(&self) -> bool {
        match self {
            BoolFlag::Static(value) => *value,
            BoolFlag::Dynamic(cell) => cell.load(Ordering::Relaxed),
        }
    }
}

impl Default for BoolFlag {
    fn default() -> Self {
        BoolFlag::Static(false)
    }
}

/// Process-wide reloadable flags backing the global socket map.
#[derive(Debug)]
pub struct RegistryFlags {
    health_check_interval: Arc<AtomicI64>,
    idle_timeout_second: Arc<AtomicI64>,
    defer_close_second: Arc<AtomicI64>,
    reserve_one_idle_socket: Arc<AtomicBool>,
    show_socketmap_in_vars: Arc<AtomicBool>,
    suggested_map_size: usize,
}

impl RegistryFlags {
    pub fn from_config(config: &SocketMapConfig) -> Self {
        Self {
            health_check_interval: Arc::new(AtomicI64::new(config.health_check_interval_s)),
            idle_timeout_second: Arc::new(AtomicI64::new(config.idle_timeout_second)),
            defer_close_second: Arc::new(AtomicI64::new(config.defer_close_second)),
            reserve_one_idle_socket: Arc::new(AtomicBool::new(config.reserve_one_idle_socket)),
            show_socketmap_in_vars: Arc::new(AtomicBool::new(config.show_socketmap_in_vars)),
            suggested_map_size: config.suggested_map_size,
        }
    }

    pub fn health_check_interval(&self) -> i64 {
        self.health_check_interval.load(Ordering::Relaxed)
    }

    /// Updates the health-check interval of newly created sockets.
    ///
    /// Rejects non-positive values: without health checking a failed socket
    /// gets replaced in place, and callers removing by key alone would then
    /// decrement the wrong entry.
    pub fn set_health_check_interval(&self, seconds: i64) -> Result<()> {
        if seconds <= 0 {
            return Err(Error::Config(ConfigError::Message(
                "health_check_interval_s must be positive".into(),
            )));
        }
        self.health_check_interval.store(seconds, Ordering::Relaxed);
        Ok(())
    }

    pub fn idle_timeout_second(&self) -> i64 {
        self.idle_timeout_second.load(Ordering::Relaxed)
    }

    pub fn set_idle_timeout_second(&self, seconds: i64) {
        self.idle_timeout_second.store(seconds, Ordering::Relaxed);
    }

    pub fn defer_close_second(&self) -> i64 {
        self.defer_close_second.load(Ordering::Relaxed)
    }

    pub fn set_defer_close_second(&self, seconds: i64) {
        self.defer_close_second.store(seconds, Ordering::Relaxed);
    }

    pub fn reserve_one_idle_socket(&self) -> bool {
        self.reserve_one_idle_socket.load(Ordering::Relaxed)
    }

    pub fn set_reserve_one_idle_socket(&self, reserve: bool) {
        self.reserve_one_idle_socket.store(reserve, Ordering::Relaxed);
    }

    pub fn show_socketmap_in_vars(&self) -> bool {
        self.show_socketmap_in_vars.load(Ordering::Relaxed)
    }

    pub fn set_show_socketmap_in_vars(&self, show: bool) {
        self.show_socketmap_in_vars.store(show, Ordering::Relaxed);
    }

    pub fn suggested_map_size(&self) -> usize {
        self.suggested_map_size
    }

    pub(crate) fn idle_timeout_second_cell(&self) -> Arc<AtomicI64> {
        Arc::clone(&self.idle_timeout_second)
    }

    pub(crate) fn defer_close_second_cell(&self) -> Arc<AtomicI64> {
        Arc::clone(&self.defer_close_second)
    }

    pub(crate) fn reserve_one_idle_socket_cell(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.reserve_one_idle_socket)
    }
}

static FLAGS: OnceLock<RegistryFlags> = OnceLock::new();

/// Global flag block, loaded from [`SocketMapConfig`] on first access.
pub fn flags() -> &'static RegistryFlags {
    FLAGS.get_or_init(|| {
        let config = SocketMapConfig::new().unwrap_or_else(|e| {
            warn!(error = %e, "fail to load socket map config, falling back to defaults");
            SocketMapConfig::default()
        });
        RegistryFlags::from_config(&config)
    })
}
