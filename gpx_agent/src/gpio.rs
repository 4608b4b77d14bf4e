//! Hardware access layer.
//!
//! Every GPIO read and write in the agent goes through [`GpioDevice`]. It
//! resolves channels through the shared [`HardwareConfig`] and talks to the
//! sysfs value files, retrying a bounded number of times.
//!
//! In test mode the sysfs root is replaced by a sandbox directory laid out
//! like `<root>/gpio<pin>/value`, and pins are never exported.

use gpx_common::consts::{GPIO_MAX_RETRY, GPIO_RETRY_DELAY, SYSFS_GPIO_ROOT};
use gpx_common::gpio::{Direction, GpioError, GpioState, HardwareConfig};
use parking_lot::RwLock;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

/// Access to GPIO value files.
#[derive(Debug, Clone)]
pub struct GpioDevice {
    hardware: Arc<RwLock<HardwareConfig>>,
    root: PathBuf,
    test_mode: bool,
}

impl GpioDevice {
    /// Device on the real sysfs tree.
    pub fn new(hardware: Arc<RwLock<HardwareConfig>>) -> Self {
        Self {
            hardware,
            root: PathBuf::from(SYSFS_GPIO_ROOT),
            test_mode: false,
        }
    }

    /// Redirect all I/O below `root`.
    pub fn enable_test_mode(&mut self, root: impl Into<PathBuf>) {
        self.root = root.into();
        self.test_mode = true;
        info!("GPIO test mode, device root {:?}", self.root);
    }

    /// Whether test mode is active.
    pub fn is_test_mode(&self) -> bool {
        self.test_mode
    }

    /// Current device root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Physical pin of a channel under the current configuration.
    pub fn resolve_pin(&self, channel: u32, direction: Direction) -> Result<u32, GpioError> {
        self.hardware.read().resolve_pin(channel, direction)
    }

    /// Value file of a pin.
    pub fn value_path(&self, pin: u32) -> PathBuf {
        self.root.join(format!("gpio{pin}")).join("value")
    }

    /// Read a channel.
    ///
    /// Never fails: an unresolvable channel or a file that stays unreadable
    /// after [`GPIO_MAX_RETRY`] attempts reads as `Unknown`.
    pub fn read(&self, channel: u32, direction: Direction) -> GpioState {
        let pin = match self.resolve_pin(channel, direction) {
            Ok(pin) => pin,
            Err(e) => {
                debug!("Cannot read {}: {}", direction.port_name(channel), e);
                return GpioState::Unknown;
            }
        };
        self.prepare(pin, direction);

        let path = self.value_path(pin);
        let mut last_error = String::new();
        for attempt in 1..=GPIO_MAX_RETRY {
            match fs::read(&path) {
                Ok(bytes) => {
                    let state = bytes
                        .first()
                        .map_or(GpioState::Unknown, |b| GpioState::from_value_byte(*b));
                    debug!("{} (pin {}) = {}", direction.port_name(channel), pin, state);
                    return state;
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt < GPIO_MAX_RETRY {
                        thread::sleep(GPIO_RETRY_DELAY);
                    }
                }
            }
        }
        debug!(
            "Read of {} (pin {}) failed after {} attempts: {}",
            direction.port_name(channel),
            pin,
            GPIO_MAX_RETRY,
            last_error
        );
        GpioState::Unknown
    }

    /// Drive an output channel.
    ///
    /// # Errors
    ///
    /// `ConfigurationError` for an unresolvable channel or an `Unknown`
    /// value, `IoError` when every attempt failed.
    pub fn write(&self, channel: u32, value: GpioState) -> Result<(), GpioError> {
        if !value.is_known() {
            return Err(GpioError::ConfigurationError(format!(
                "cannot write {value} to {}",
                Direction::Out.port_name(channel)
            )));
        }
        let pin = self.resolve_pin(channel, Direction::Out)?;
        self.prepare(pin, Direction::Out);

        let path = self.value_path(pin);
        let payload = value.code().to_string();
        let mut last_error = String::new();
        for attempt in 1..=GPIO_MAX_RETRY {
            match fs::write(&path, &payload) {
                Ok(()) => {
                    debug!("GPO{} (pin {}) <- {}", channel, pin, value);
                    return Ok(());
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt < GPIO_MAX_RETRY {
                        thread::sleep(GPIO_RETRY_DELAY);
                    }
                }
            }
        }
        warn!("Write of GPO{} (pin {}) failed: {}", channel, pin, last_error);
        Err(GpioError::IoError {
            pin,
            reason: last_error,
        })
    }

    /// Export the pin and set its direction when sysfs does not know it yet.
    fn prepare(&self, pin: u32, direction: Direction) {
        if self.test_mode {
            return;
        }
        let pin_dir = self.root.join(format!("gpio{pin}"));
        if pin_dir.exists() {
            return;
        }
        if let Err(e) = fs::write(self.root.join("export"), pin.to_string()) {
            debug!("Export of pin {} failed: {}", pin, e);
            return;
        }
        if let Err(e) = fs::write(pin_dir.join("direction"), direction.sysfs_direction()) {
            debug!("Setting direction of pin {} failed: {}", pin, e);
        }
    }
}
