use std::time::Duration;

/// Tick of the background reaper task.
pub(crate) const REAPER_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Default pre-sized entry count of a socket map.
pub(crate) const DEFAULT_SUGGESTED_MAP_SIZE: usize = 1024;
