//! System-wide constants for the GPX workspace.
//!
//! Single source of truth for retry bounds, timeouts, default paths and the
//! subject names spoken on the bus.

use std::time::Duration;

/// Attempts made for a single device read or write before giving up.
pub const GPIO_MAX_RETRY: u32 = 3;

/// Pause between two attempts on the same device file.
pub const GPIO_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Bound on every outbound request (capability negotiation, peer calls).
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Settle time after energizing a power-source output.
pub const POWER_SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Default interval between two status sweeps, in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;

/// Default base address of the GPIO chip.
pub const DEFAULT_GPIO_BASE_ADDRESS: i32 = 488;

/// Root of the kernel GPIO sysfs tree.
pub const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

/// Default GPO state file.
pub const DEFAULT_STATE_FILE: &str = "/var/lib/gpx/gpx_agent/state";

/// Default template directory.
pub const DEFAULT_TEMPLATE_DIR: &str = "/usr/share/gpx/templates";

/// Extension of template descriptor files.
pub const TEMPLATE_EXTENSION: &str = "tpl";

/// Default bus endpoint.
pub const DEFAULT_ENDPOINT: &str = "inproc://gpx-bus";

/// Mailbox name of the agent's protocol server.
pub const AGENT_ADDRESS: &str = "gpx-agent";

/// Mailbox name of the agent's asset tracker.
pub const ASSETS_ADDRESS: &str = "gpx-agent-assets";

/// Mailbox name of the inventory service answering capability requests.
pub const DEFAULT_INVENTORY_ADDRESS: &str = "inventory";

/// Stream carrying status metrics and alerts.
pub const DEFAULT_METRICS_STREAM: &str = "METRICS_SENSOR";

/// Stream carrying asset events.
pub const DEFAULT_ASSETS_STREAM: &str = "ASSETS";

/// Time-to-live of a published status metric, in seconds.
pub const METRIC_TTL_SECS: u32 = 300;

/// Asset subtype of GPIO sensors.
pub const SUBTYPE_SENSOR_GPIO: &str = "sensorgpio";

/// Asset subtype of GPIO outputs.
pub const SUBTYPE_GPO: &str = "gpo";

/// Peer subjects.
pub mod subject {
    /// Drive an output.
    pub const GPO_INTERACTION: &str = "GPO_INTERACTION";
    /// Full template descriptors.
    pub const GPIO_MANIFEST: &str = "GPIO_MANIFEST";
    /// Part number and manufacturer only.
    pub const GPIO_MANIFEST_SUMMARY: &str = "GPIO_MANIFEST_SUMMARY";
    /// Create a template file.
    pub const GPIO_TEMPLATE_ADD: &str = "GPIO_TEMPLATE_ADD";
    /// Output default-state configuration (no reply).
    pub const GPOSTATE: &str = "GPOSTATE";
    /// Capability handshake with the inventory service.
    pub const HW_CAP: &str = "HW_CAP";
}
