//! Supervisor-to-actor commands and the state actors share.

use crate::gpo_state::GpoStateCache;
use crate::registry::SensorRegistry;
use gpx_common::config::AgentConfig;
use gpx_common::gpio::{Direction, HardwareConfig};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Command sent by the supervisor. Never answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// Connect to the bus endpoint.
    Connect {
        /// Transport endpoint.
        endpoint: String,
    },
    /// Stream to publish on.
    Producer {
        /// Stream name.
        stream: String,
    },
    /// Stream to consume, filtered by a subject pattern.
    Consumer {
        /// Stream name.
        stream: String,
        /// Regular expression on subjects.
        pattern: String,
    },
    /// Redirect device I/O to a sandbox root.
    TestMode {
        /// Sandbox root.
        root: PathBuf,
    },
    /// Template directory.
    TemplateDir(PathBuf),
    /// Run capability negotiation now.
    NegotiateCapabilities,
    /// Override the base address.
    SetBaseAddress(i32),
    /// Override the offset of a direction.
    SetOffset(Direction, i32),
    /// Override the channel count of a direction.
    SetCount(Direction, u32),
    /// Load the GPO state file; it is also the save target at shutdown.
    LoadState(PathBuf),
    /// Run a status sweep now.
    Update,
    /// Stop the actor.
    Terminate,
}

/// State shared between the actors.
#[derive(Clone)]
pub struct SharedState {
    /// Channel addressing.
    pub hardware: Arc<RwLock<HardwareConfig>>,
    /// Monitored channels.
    pub registry: Arc<SensorRegistry>,
    /// Output states.
    pub gpo_states: Arc<GpoStateCache>,
}

impl SharedState {
    /// Fresh, unconfigured state.
    pub fn new() -> Self {
        let hardware = Arc::new(RwLock::new(HardwareConfig::new()));
        Self {
            registry: Arc::new(SensorRegistry::new(hardware.clone())),
            gpo_states: Arc::new(GpoStateCache::new()),
            hardware,
        }
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Start-up Sequences ─────────────────────────────────────────────

/// Commands bringing the protocol server up.
///
/// `test_root` wins over the configured test mode. Static overrides follow
/// negotiation so they replace whatever the inventory answered; the state
/// file is loaded last because restoring outputs needs their addressing.
pub fn server_startup(config: &AgentConfig, test_root: Option<&Path>) -> Vec<ControlCommand> {
    let mut commands = vec![
        ControlCommand::Connect { endpoint: config.bus.endpoint.clone() },
        ControlCommand::Producer { stream: config.bus.metrics_stream.clone() },
        ControlCommand::TemplateDir(config.agent.template_dir.clone()),
    ];
    match test_root {
        Some(root) => commands.push(ControlCommand::TestMode { root: root.to_path_buf() }),
        None if config.agent.test_mode => {
            commands.push(ControlCommand::TestMode { root: config.agent.test_root.clone() })
        }
        None => {}
    }
    commands.push(ControlCommand::NegotiateCapabilities);

    let hw = &config.hardware;
    if let Some(base) = hw.base_address {
        commands.push(ControlCommand::SetBaseAddress(base));
    }
    if let Some(offset) = hw.input_offset {
        commands.push(ControlCommand::SetOffset(Direction::In, offset));
    }
    if let Some(offset) = hw.output_offset {
        commands.push(ControlCommand::SetOffset(Direction::Out, offset));
    }
    if let Some(count) = hw.input_count {
        commands.push(ControlCommand::SetCount(Direction::In, count));
    }
    if let Some(count) = hw.output_count {
        commands.push(ControlCommand::SetCount(Direction::Out, count));
    }

    commands.push(ControlCommand::LoadState(config.agent.state_file.clone()));
    commands
}

/// Commands bringing the asset tracker up.
pub fn tracker_startup(config: &AgentConfig) -> Vec<ControlCommand> {
    vec![
        ControlCommand::Connect { endpoint: config.bus.endpoint.clone() },
        ControlCommand::TemplateDir(config.agent.template_dir.clone()),
        ControlCommand::Consumer {
            stream: config.bus.assets_stream.clone(),
            pattern: config.bus.assets_pattern.clone(),
        },
    ]
}
