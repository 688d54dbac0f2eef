use std::sync::Once;

use lazy_static::lazy_static;
use prometheus::IntGaugeVec;
use prometheus::Opts;
use prometheus::Registry;

lazy_static! {
    pub static ref SOCKET_MAP_ENTRIES_METRIC: IntGaugeVec = IntGaugeVec::new(
        Opts::new("socket_map_entries", "Number of entries per client socket map"),
        &["map"]
    )
    .expect("metric can not be created");
    pub static ref CUSTOM_REGISTRY: Registry = Registry::new_custom(Some("sockmap".to_string()), None).unwrap();
}

static REGISTER_METRICS: Once = Once::new();

/// Registers the socket map collectors on first exposure.
pub(crate) fn register_if_needed() {
    REGISTER_METRICS.call_once(|| {
        CUSTOM_REGISTRY
            .register(Box::new(SOCKET_MAP_ENTRIES_METRIC.clone()))
            .expect("collector can be registered");
    });
}

pub(crate) fn set_socket_map_entries(
    map: &str,
    count: i64,
) {
    SOCKET_MAP_ENTRIES_METRIC.with_label_values(&[map]).set(count);
}
