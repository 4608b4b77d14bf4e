//! GPO state cache and persistence.
//!
//! One entry per output asset: channel, configured default, last applied
//! value and whether an operator override is active. The cache decides
//! which writes are needed under its lock and performs them after
//! releasing it.
//!
//! State file format, one line per output:
//!
//! ```text
//! <asset_name> <channel> <default_state> <last_action>
//! ```
//!
//! States are integer codes (`1` opened, `0` closed, `-1` unknown).

use crate::gpio::GpioDevice;
use gpx_common::gpio::{GpioError, GpioState};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// State file errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceError {
    /// The file exists but cannot be read.
    #[error("failed to read state file {path:?}: {reason}")]
    Read {
        /// File.
        path: PathBuf,
        /// Cause.
        reason: String,
    },

    /// The file cannot be written.
    #[error("failed to write state file {path:?}: {reason}")]
    Write {
        /// File.
        path: PathBuf,
        /// Cause.
        reason: String,
    },
}

/// Cached state of one output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpoState {
    /// Output channel.
    pub channel: u32,
    /// Configured default.
    pub default_state: GpioState,
    /// Last value applied.
    pub last_action: GpioState,
    /// An operator override is active; defaults are not re-applied.
    pub in_alert: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingWrite {
    channel: u32,
    value: GpioState,
}

/// Output states keyed by asset name.
#[derive(Default)]
pub struct GpoStateCache {
    entries: Mutex<BTreeMap<String, GpoState>>,
}

impl GpoStateCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an output default-state configuration.
    ///
    /// - new entry: the default is written and becomes `last_action`
    /// - channel changed: the old channel is closed, the default written on
    ///   the new one, the override cleared
    /// - default changed: re-applied unless an override is active
    ///
    /// The entry is updated even if a write fails; the first write error is
    /// returned after all writes were attempted.
    pub fn upsert_state(
        &self,
        device: &GpioDevice,
        asset_name: &str,
        channel: u32,
        default_state: GpioState,
    ) -> Result<(), GpioError> {
        let mut writes = Vec::new();
        {
            let mut entries = self.entries.lock();
            match entries.get_mut(asset_name) {
                None => {
                    writes.push(PendingWrite { channel, value: default_state });
                    entries.insert(
                        asset_name.to_string(),
                        GpoState {
                            channel,
                            default_state,
                            last_action: default_state,
                            in_alert: false,
                        },
                    );
                }
                Some(entry) if entry.channel != channel => {
                    writes.push(PendingWrite { channel: entry.channel, value: GpioState::Closed });
                    writes.push(PendingWrite { channel, value: default_state });
                    *entry = GpoState {
                        channel,
                        default_state,
                        last_action: default_state,
                        in_alert: false,
                    };
                }
                Some(entry) if entry.default_state != default_state => {
                    entry.default_state = default_state;
                    if !entry.in_alert {
                        writes.push(PendingWrite { channel, value: default_state });
                        entry.last_action = default_state;
                    }
                }
                Some(_) => {}
            }
        }
        debug!("GPO {} configured: GPO{} default {}", asset_name, channel, default_state);
        apply(device, &writes)
    }

    /// Drop an entry without touching hardware.
    pub fn delete_state(&self, asset_name: &str) -> Option<GpoState> {
        let removed = self.entries.lock().remove(asset_name);
        if removed.is_some() {
            debug!("GPO {} forgotten", asset_name);
        }
        removed
    }

    /// Record a value written on behalf of a peer.
    ///
    /// The entry enters override mode so later default changes leave the
    /// output alone.
    /// An unknown asset gets an entry with `default_state` as its default.
    pub fn record_interaction(
        &self,
        asset_name: &str,
        channel: u32,
        value: GpioState,
        default_state: GpioState,
    ) {
        let mut entries = self.entries.lock();
        let entry = entries.entry(asset_name.to_string()).or_insert(GpoState {
            channel,
            default_state,
            last_action: value,
            in_alert: false,
        });
        entry.channel = channel;
        entry.last_action = value;
        entry.in_alert = true;
    }

    /// Copy of one entry.
    pub fn get(&self, asset_name: &str) -> Option<GpoState> {
        self.entries.lock().get(asset_name).copied()
    }

    /// Last applied value of one output.
    pub fn last_action(&self, asset_name: &str) -> Option<GpioState> {
        self.get(asset_name).map(|e| e.last_action)
    }

    /// Copy of every entry, ordered by asset name.
    pub fn snapshot(&self) -> Vec<(String, GpoState)> {
        self.entries
            .lock()
            .iter()
            .map(|(name, state)| (name.clone(), *state))
            .collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Write every entry to `path` through a temporary sibling file.
    pub fn save(&self, path: &Path) -> Result<usize, PersistenceError> {
        let entries = self.snapshot();
        let write_err = |reason: String| PersistenceError::Write {
            path: path.to_path_buf(),
            reason,
        };

        let Some(file_name) = path.file_name() else {
            return Err(write_err("path has no file name".to_string()));
        };

        let mut content = String::new();
        for (name, state) in &entries {
            content.push_str(&format!(
                "{} {} {} {}\n",
                name,
                state.channel,
                state.default_state.code(),
                state.last_action.code()
            ));
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| write_err(e.to_string()))?;
        }
        let mut tmp_name = file_name.to_os_string();
        tmp_name.push(".tmp");
        let tmp = path.with_file_name(tmp_name);
        fs::write(&tmp, content).map_err(|e| write_err(e.to_string()))?;
        fs::rename(&tmp, path).map_err(|e| write_err(e.to_string()))?;

        info!("Saved {} GPO states to {:?}", entries.len(), path);
        Ok(entries.len())
    }

    /// Load entries from `path` and apply them to hardware.
    ///
    /// Assets already in the cache keep their live configuration. A missing
    /// file loads nothing. Malformed lines are skipped. Each loaded output
    /// is driven to its saved last action, or to its default when the last
    /// action is unknown. A last action differing from the default restores
    /// the operator override.
    pub fn load(&self, path: &Path, device: &GpioDevice) -> Result<usize, PersistenceError> {
        if !path.exists() {
            debug!("State file {:?} does not exist, starting fresh", path);
            return Ok(0);
        }
        let content = fs::read_to_string(path).map_err(|e| PersistenceError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut writes = Vec::new();
        let mut loaded = 0;
        {
            let mut entries = self.entries.lock();
            for (lineno, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let Some((name, state)) = parse_line(line) else {
                    warn!("Skipping malformed state line {}: {:?}", lineno + 1, line);
                    continue;
                };
                if entries.contains_key(&name) {
                    debug!("GPO {} already configured, file entry ignored", name);
                    continue;
                }
                let value = if state.last_action.is_known() {
                    state.last_action
                } else {
                    state.default_state
                };
                writes.push(PendingWrite { channel: state.channel, value });
                entries.insert(name, state);
                loaded += 1;
            }
        }

        info!("Loaded {} GPO states from {:?}", loaded, path);
        if let Err(e) = apply(device, &writes) {
            warn!("Restoring GPO states: {}", e);
        }
        Ok(loaded)
    }
}

fn parse_line(line: &str) -> Option<(String, GpoState)> {
    let mut fields = line.split_whitespace();
    let name = fields.next()?.to_string();
    let channel: u32 = fields.next()?.parse().ok()?;
    let default_state = GpioState::from_code(fields.next()?.parse().ok()?);
    let last_action = GpioState::from_code(fields.next()?.parse().ok()?);
    if fields.next().is_some() || channel == 0 {
        return None;
    }
    Some((
        name,
        GpoState {
            channel,
            default_state,
            last_action,
            in_alert: last_action.is_known() && last_action != default_state,
        },
    ))
}

fn apply(device: &GpioDevice, writes: &[PendingWrite]) -> Result<(), GpioError> {
    let mut first_error = None;
    for write in writes {
        if !write.value.is_known() {
            continue;
        }
        if let Err(e) = device.write(write.channel, write.value) {
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpx_common::gpio::{Direction, DirectionConfig, HardwareConfig};
    use parking_lot::RwLock;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tempfile::{TempDir, tempdir};

    fn sandbox() -> (TempDir, GpioDevice) {
        let tmp = tempdir().unwrap();
        let mut hw = HardwareConfig::new();
        hw.apply(
            Direction::Out,
            Some(488),
            DirectionConfig { count: 5, offset: 0, mapping: BTreeMap::new() },
        );
        for pin in 489..=493 {
            fs::create_dir_all(tmp.path().join(format!("gpio{pin}"))).unwrap();
        }
        let mut device = GpioDevice::new(Arc::new(RwLock::new(hw)));
        device.enable_test_mode(tmp.path());
        (tmp, device)
    }

    fn value(tmp: &TempDir, pin: u32) -> String {
        fs::read_to_string(tmp.path().join(format!("gpio{pin}/value"))).unwrap_or_default()
    }

    #[test]
    fn test_new_entry_applies_default() {
        let (tmp, device) = sandbox();
        let cache = GpoStateCache::new();
        cache.upsert_state(&device, "gpo-1", 2, GpioState::Open).unwrap();

        assert_eq!(value(&tmp, 490), "1");
        let entry = cache.get("gpo-1").unwrap();
        assert_eq!(entry.last_action, GpioState::Open);
        assert!(!entry.in_alert);
    }

    #[test]
    fn test_default_change_respects_override() {
        let (tmp, device) = sandbox();
        let cache = GpoStateCache::new();
        cache.upsert_state(&device, "gpo-1", 2, GpioState::Closed).unwrap();

        cache.upsert_state(&device, "gpo-1", 2, GpioState::Open).unwrap();
        assert_eq!(value(&tmp, 490), "1");

        device.write(2, GpioState::Closed).unwrap();
        cache.record_interaction("gpo-1", 2, GpioState::Closed, GpioState::Open);
        assert!(cache.get("gpo-1").unwrap().in_alert);

        cache.upsert_state(&device, "gpo-1", 2, GpioState::Open).unwrap();
        // Same default: nothing to do.
        assert_eq!(value(&tmp, 490), "0");
        cache.upsert_state(&device, "gpo-1", 2, GpioState::Closed).unwrap();
        let entry = cache.get("gpo-1").unwrap();
        assert_eq!(entry.default_state, GpioState::Closed);
        assert_eq!(entry.last_action, GpioState::Closed);
    }

    #[test]
    fn test_channel_change_moves_output() {
        let (tmp, device) = sandbox();
        let cache = GpoStateCache::new();
        cache.upsert_state(&device, "gpo-1", 2, GpioState::Open).unwrap();
        cache.record_interaction("gpo-1", 2, GpioState::Closed, GpioState::Open);

        cache.upsert_state(&device, "gpo-1", 3, GpioState::Open).unwrap();
        assert_eq!(value(&tmp, 490), "0");
        assert_eq!(value(&tmp, 491), "1");
        let entry = cache.get("gpo-1").unwrap();
        assert_eq!(entry.channel, 3);
        assert!(!entry.in_alert);
    }

    #[test]
    fn test_delete_leaves_hardware() {
        let (tmp, device) = sandbox();
        let cache = GpoStateCache::new();
        cache.upsert_state(&device, "gpo-1", 2, GpioState::Open).unwrap();
        assert!(cache.delete_state("gpo-1").is_some());
        assert!(cache.delete_state("gpo-1").is_none());
        assert_eq!(value(&tmp, 490), "1");
        assert!(cache.is_empty());
    }

    #[test]
    fn test_save_load_round_trip() {
        let (tmp, device) = sandbox();
        let path = tmp.path().join("state/gpo");
        let cache = GpoStateCache::new();
        cache.upsert_state(&device, "gpo-1", 1, GpioState::Closed).unwrap();
        cache.upsert_state(&device, "gpo-2", 4, GpioState::Open).unwrap();
        cache.record_interaction("gpo-2", 4, GpioState::Closed, GpioState::Open);
        assert_eq!(cache.save(&path).unwrap(), 2);

        device.write(4, GpioState::Open).unwrap();
        let fresh = GpoStateCache::new();
        assert_eq!(fresh.load(&path, &device).unwrap(), 2);
        for (name, saved) in cache.snapshot() {
            let loaded = fresh.get(&name).unwrap();
            assert_eq!(
                (loaded.channel, loaded.default_state, loaded.last_action),
                (saved.channel, saved.default_state, saved.last_action)
            );
        }
        let restored = fresh.get("gpo-2").unwrap();
        assert_eq!(restored.last_action, GpioState::Closed);
        assert!(restored.in_alert);
        assert_eq!(value(&tmp, 492), "0");
        assert!(!fresh.get("gpo-1").unwrap().in_alert);
    }

    #[test]
    fn test_save_rejects_path_without_file_name() {
        let (tmp, device) = sandbox();
        let cache = GpoStateCache::new();
        cache.upsert_state(&device, "gpo-1", 1, GpioState::Closed).unwrap();
        assert!(matches!(
            cache.save(&tmp.path().join("..")),
            Err(PersistenceError::Write { .. })
        ));
        assert!(matches!(cache.save(Path::new("/")), Err(PersistenceError::Write { .. })));
        assert!(!tmp.path().join(".tmp").exists());
    }

    #[test]
    fn test_load_keeps_live_entries() {
        let (tmp, device) = sandbox();
        let path = tmp.path().join("state");
        fs::write(&path, "gpo-1 3 1 1\ngpo-2 5 0 0\nbroken line\n").unwrap();

        let cache = GpoStateCache::new();
        cache.upsert_state(&device, "gpo-1", 2, GpioState::Closed).unwrap();
        assert_eq!(cache.load(&path, &device).unwrap(), 1);
        assert_eq!(cache.get("gpo-1").unwrap().channel, 2);
        assert_eq!(cache.get("gpo-2").unwrap().channel, 5);
        assert_eq!(value(&tmp, 491), "");
        assert_eq!(value(&tmp, 493), "0");
    }

    #[test]
    fn test_load_missing_file() {
        let (tmp, device) = sandbox();
        let cache = GpoStateCache::new();
        assert_eq!(cache.load(&tmp.path().join("absent"), &device).unwrap(), 0);
    }

    #[test]
    fn test_parse_line() {
        let (name, state) = parse_line("gpo 2 0 1").unwrap();
        assert_eq!(name, "gpo");
        assert_eq!(state.default_state, GpioState::Closed);
        assert_eq!(state.last_action, GpioState::Open);
        assert!(state.in_alert);
        let (_, state) = parse_line("gpo 2 1 -1").unwrap();
        assert_eq!(state.last_action, GpioState::Unknown);
        assert!(!state.in_alert);
        assert!(parse_line("gpo 2 0").is_none());
        assert!(parse_line("gpo x 0 1").is_none());
        assert!(parse_line("gpo 2 0 1 extra").is_none());
    }
}
