//! Protocol server.
//!
//! The actor that owns hardware access. It waits on two channels, control
//! commands from the supervisor and peer requests from its mailbox, and
//! handles one message completely before taking the next.
//!
//! # Peer requests
//!
//! | Subject                 | Reply                                      |
//! |-------------------------|--------------------------------------------|
//! | `GPO_INTERACTION`       | `corr, OK` or `corr, ERROR, reason`        |
//! | `GPIO_MANIFEST`         | `corr, OK, (8 fields)*`                    |
//! | `GPIO_MANIFEST_SUMMARY` | `corr, OK, (part_number, manufacturer)*`   |
//! | `GPIO_TEMPLATE_ADD`     | `corr, OK`                                 |
//! | `GPOSTATE`              | none                                       |
//! | anything else           | `corr, ERROR, BAD_COMMAND`                 |

use crate::bus::{Mail, MessageBus};
use crate::capability;
use crate::control::{ControlCommand, SharedState};
use crate::gpio::GpioDevice;
use crate::registry::SensorRecord;
use crate::templates::{TemplateStore, TemplateStoreError};
use crossbeam::channel::{self, Receiver};
use gpx_common::config::AgentConfig;
use gpx_common::consts::{
    AGENT_ADDRESS, DEFAULT_INVENTORY_ADDRESS, POWER_SETTLE_DELAY, REQUEST_TIMEOUT,
};
use gpx_common::gpio::{Direction, GpioState};
use gpx_common::protocol::stream::unix_now;
use gpx_common::protocol::{
    AlertEvent, AlertState, ErrorReason, PeerRequest, Reply, RequestError, StatusMetric,
    StreamMessage,
};
use gpx_common::template::TemplateDescriptor;
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Server settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Mailbox name.
    pub address: String,
    /// Inventory service mailbox.
    pub inventory_address: String,
    /// Bound on capability requests.
    pub request_timeout: Duration,
    /// Wait after energizing a power source.
    pub power_settle: Duration,
}

impl ServerSettings {
    /// Settings from the agent configuration.
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            address: config.shared.service_name.clone(),
            inventory_address: config.bus.inventory_address.clone(),
            request_timeout: config.agent.request_timeout(),
            power_settle: config.agent.power_settle(),
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            address: AGENT_ADDRESS.to_string(),
            inventory_address: DEFAULT_INVENTORY_ADDRESS.to_string(),
            request_timeout: REQUEST_TIMEOUT,
            power_settle: POWER_SETTLE_DELAY,
        }
    }
}

/// Result of one status sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Status metrics published.
    pub published: usize,
    /// Sensors whose state stayed unknown.
    pub skipped: usize,
    /// Alert transitions published.
    pub alerts: usize,
}

/// The protocol server actor.
pub struct GpioServer {
    settings: ServerSettings,
    bus: Box<dyn MessageBus>,
    mailbox: Receiver<Mail>,
    device: GpioDevice,
    shared: SharedState,
    templates: Option<TemplateStore>,
    state_file: Option<PathBuf>,
}

impl GpioServer {
    /// Server over `bus`, not yet connected.
    pub fn new(settings: ServerSettings, bus: Box<dyn MessageBus>, shared: SharedState) -> Self {
        let device = GpioDevice::new(shared.hardware.clone());
        Self {
            settings,
            mailbox: bus.mailbox(),
            bus,
            device,
            shared,
            templates: None,
            state_file: None,
        }
    }

    /// Hardware access used by the server.
    pub fn device(&self) -> &GpioDevice {
        &self.device
    }

    /// Run until `Terminate` or until the control channel closes.
    pub fn run(mut self, control: Receiver<ControlCommand>) {
        info!("Protocol server {} started", self.settings.address);
        loop {
            let mailbox = self.mailbox.clone();
            channel::select! {
                recv(control) -> command => match command {
                    Ok(command) => {
                        if self.handle_control(command).is_break() {
                            break;
                        }
                    }
                    Err(_) => {
                        info!("Control channel closed");
                        break;
                    }
                },
                recv(mailbox) -> mail => match mail {
                    Ok(mail) => self.handle_mail(mail),
                    Err(_) => {
                        warn!("Mailbox closed");
                        self.mailbox = channel::never();
                    }
                },
            }
        }
        self.shutdown();
    }

    /// Apply one control command.
    pub fn handle_control(&mut self, command: ControlCommand) -> ControlFlow<()> {
        debug!("Control: {:?}", command);
        match command {
            ControlCommand::Connect { endpoint } => {
                match self.bus.connect(&endpoint, &self.settings.address) {
                    Ok(()) => self.mailbox = self.bus.mailbox(),
                    Err(e) => warn!("Cannot connect to {}: {}", endpoint, e),
                }
            }
            ControlCommand::Producer { stream } => {
                if let Err(e) = self.bus.set_producer(&stream) {
                    warn!("Cannot produce on {}: {}", stream, e);
                }
            }
            ControlCommand::Consumer { stream, pattern } => {
                if let Err(e) = self.bus.set_consumer(&stream, &pattern) {
                    warn!("Cannot consume {} ({}): {}", stream, pattern, e);
                }
            }
            ControlCommand::TestMode { root } => self.device.enable_test_mode(root),
            ControlCommand::TemplateDir(dir) => {
                info!("Template directory {:?}", dir);
                self.templates = Some(TemplateStore::new(dir));
            }
            ControlCommand::NegotiateCapabilities => {
                capability::negotiate(
                    self.bus.as_mut(),
                    &self.settings.inventory_address,
                    &self.shared.hardware,
                    self.settings.request_timeout,
                );
            }
            ControlCommand::SetBaseAddress(base) => {
                self.shared.hardware.write().set_base_address(base);
            }
            ControlCommand::SetOffset(direction, offset) => {
                self.shared.hardware.write().set_offset(direction, offset);
            }
            ControlCommand::SetCount(direction, count) => {
                self.shared.hardware.write().set_count(direction, count);
            }
            ControlCommand::LoadState(path) => {
                if let Err(e) = self.shared.gpo_states.load(&path, &self.device) {
                    warn!("{}", e);
                }
                self.state_file = Some(path);
            }
            ControlCommand::Update => {
                self.sweep();
            }
            ControlCommand::Terminate => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    fn handle_mail(&mut self, mail: Mail) {
        debug!("{} from {} ({} frames)", mail.subject, mail.sender, mail.frames.len());
        let Some(reply) = self.handle_request(&mail.subject, &mail.frames) else {
            return;
        };
        if let Err(e) = self.bus.reply(&mail, &mail.subject, reply.to_frames()) {
            warn!("Reply to {} failed: {}", mail.sender, e);
        }
    }

    /// Parse and serve one request; `None` when no reply is due.
    pub fn handle_request(&mut self, subject: &str, frames: &[String]) -> Option<Reply> {
        match PeerRequest::parse(subject, frames) {
            Ok(request) => self.dispatch(request),
            Err(e) => {
                warn!("Rejected request: {}", e);
                if !e.expects_reply() {
                    return None;
                }
                let reason = match e {
                    RequestError::MissingParam { .. } => ErrorReason::MissingParam,
                    RequestError::UnknownSubject { .. } | RequestError::Malformed { .. } => {
                        ErrorReason::BadCommand
                    }
                };
                Some(Reply::error(e.correlation_id().map(str::to_string), reason))
            }
        }
    }

    /// Serve a parsed request.
    pub fn dispatch(&mut self, request: PeerRequest) -> Option<Reply> {
        match request {
            PeerRequest::OutputInteraction { correlation_id, sensor_id, action } => {
                Some(self.output_interaction(correlation_id, &sensor_id, &action))
            }
            PeerRequest::Manifest { correlation_id, part_numbers } => {
                Some(self.manifest(correlation_id, &part_numbers, false))
            }
            PeerRequest::ManifestSummary { correlation_id, part_numbers } => {
                Some(self.manifest(correlation_id, &part_numbers, true))
            }
            PeerRequest::TemplateAdd { correlation_id, descriptor } => {
                Some(self.template_add(correlation_id, descriptor))
            }
            PeerRequest::OutputDefault { asset_name, channel, default_state } => {
                self.output_default(&asset_name, channel, default_state);
                None
            }
        }
    }

    fn output_interaction(&mut self, corr: String, sensor_id: &str, action: &str) -> Reply {
        let fail = |corr, reason| {
            debug!("GPO_INTERACTION {} {}: {}", sensor_id, action, reason);
            Reply::error(Some(corr), reason)
        };

        let Some(record) = self.shared.registry.find(sensor_id) else {
            return fail(corr, ErrorReason::AssetNotFound);
        };
        if record.direction != Direction::Out {
            return fail(corr, ErrorReason::ActionNotApplicable);
        }
        let Ok(value) = action.parse::<GpioState>() else {
            return fail(corr, ErrorReason::UnknownValue);
        };

        let cached = self
            .shared
            .gpo_states
            .last_action(&record.asset_name)
            .filter(|s| s.is_known())
            .unwrap_or(record.current_state);
        if cached == value {
            return fail(corr, ErrorReason::ActionNotApplicable);
        }

        if let Err(e) = self.device.write(record.channel, value) {
            warn!("Setting {} to {} failed: {}", record.asset_name, value, e);
            return fail(corr, ErrorReason::SetValueFailed);
        }
        self.shared.registry.set_current_state(&record.asset_name, value);
        self.shared.gpo_states.record_interaction(
            &record.asset_name,
            record.channel,
            value,
            record.normal_state,
        );
        info!("{} ({}) set to {}", record.asset_name, record.port_name(), value);
        Reply::ok(Some(corr), Vec::new())
    }

    fn manifest(&self, corr: String, part_numbers: &[String], summary: bool) -> Reply {
        let Some(store) = &self.templates else {
            warn!("Manifest requested without a template directory");
            return Reply::error(Some(corr), ErrorReason::BadCommand);
        };

        let templates = if part_numbers.is_empty() {
            match store.list() {
                Ok(templates) => templates,
                Err(e) => {
                    warn!("Listing templates: {}", e);
                    return Reply::error(Some(corr), ErrorReason::Unknown);
                }
            }
        } else {
            let mut templates = Vec::with_capacity(part_numbers.len());
            for part_number in part_numbers {
                match store.load(part_number) {
                    Ok(template) => templates.push(template),
                    Err(TemplateStoreError::NotFound(_)) => {
                        return Reply::error(Some(corr), ErrorReason::AssetNotFound);
                    }
                    Err(e) => {
                        warn!("Loading template {}: {}", part_number, e);
                        return Reply::error(Some(corr), ErrorReason::AssetNotFound);
                    }
                }
            }
            templates
        };

        let payload = templates
            .iter()
            .flat_map(|t| {
                if summary {
                    t.summary_fields().to_vec()
                } else {
                    t.manifest_fields().to_vec()
                }
            })
            .collect();
        Reply::ok(Some(corr), payload)
    }

    fn template_add(&self, corr: String, descriptor: TemplateDescriptor) -> Reply {
        let template = match descriptor.into_template() {
            Ok(template) => template,
            Err(e) => {
                debug!("GPIO_TEMPLATE_ADD: {}", e);
                return Reply::error(Some(corr), ErrorReason::MissingParam);
            }
        };
        let Some(store) = &self.templates else {
            warn!("Template add without a template directory");
            return Reply::error(Some(corr), ErrorReason::Unknown);
        };
        match store.add(&template) {
            Ok(_) => Reply::ok(Some(corr), Vec::new()),
            Err(e) => {
                warn!("Adding template {}: {}", template.part_number, e);
                Reply::error(Some(corr), ErrorReason::Unknown)
            }
        }
    }

    fn output_default(&self, asset_name: &str, channel: Option<u32>, default_state: GpioState) {
        match channel {
            None => {
                self.shared.gpo_states.delete_state(asset_name);
            }
            Some(channel) => {
                if let Err(e) = self.shared.gpo_states.upsert_state(
                    &self.device,
                    asset_name,
                    channel,
                    default_state,
                ) {
                    warn!("Applying default of {}: {}", asset_name, e);
                }
            }
        }
    }

    /// Read every sensor and publish its status.
    ///
    /// The registry is copied first; each sensor's state is written back
    /// individually so no lock is held across device I/O.
    pub fn sweep(&mut self) -> SweepReport {
        let mut report = SweepReport::default();
        for record in self.shared.registry.snapshot() {
            if let Some(source) = record.power_source {
                match self.device.write(source, GpioState::Open) {
                    Ok(()) => thread::sleep(self.settings.power_settle),
                    Err(e) => warn!("Powering {} from GPO{}: {}", record.asset_name, source, e),
                }
            }

            let mut state = self.device.read(record.channel, record.direction);
            if !state.is_known() && record.direction == Direction::Out {
                if let Some(last) = self.shared.gpo_states.last_action(&record.asset_name) {
                    state = last;
                }
            }
            if !state.is_known() {
                debug!("{} ({}) state unknown", record.asset_name, record.port_name());
                report.skipped += 1;
                continue;
            }

            self.shared.registry.set_current_state(&record.asset_name, state);
            let metric = StatusMetric::channel_status(
                record.metric_owner(),
                &record.asset_name,
                record.direction,
                record.channel,
                state,
            );
            if self.publish(&metric.subject(), StreamMessage::Metric(metric)) {
                report.published += 1;
            }
            if self.check_alert(&record, state) {
                report.alerts += 1;
            }
        }
        debug!("Sweep: {:?}", report);
        report
    }

    /// Publish an alert transition for an input leaving or regaining its
    /// normal state. Returns whether one was published.
    fn check_alert(&mut self, record: &SensorRecord, state: GpioState) -> bool {
        if record.direction != Direction::In || !record.normal_state.is_known() {
            return false;
        }
        let deviates = state != record.normal_state;
        let alert_state = match (deviates, record.alert_triggered) {
            (true, false) => AlertState::Active,
            (false, true) => AlertState::Resolved,
            _ => return false,
        };
        self.shared
            .registry
            .set_alert_triggered(&record.asset_name, deviates);

        let alert = AlertEvent {
            rule: format!("{}@{}", record.sensor_type, record.asset_name),
            asset: record.asset_name.clone(),
            state: alert_state,
            severity: record.alarm_severity.clone(),
            description: record.alarm_message.replace("$status", state.as_str()),
            time: unix_now(),
        };
        info!("Alert {} {:?}: {}", alert.rule, alert.state, alert.description);
        self.publish(&alert.subject(), StreamMessage::Alert(alert))
    }

    fn publish(&mut self, subject: &str, message: StreamMessage) -> bool {
        match self.bus.publish(subject, message) {
            Ok(()) => true,
            Err(e) => {
                warn!("Publishing {} failed: {}", subject, e);
                false
            }
        }
    }

    fn shutdown(&mut self) {
        if let Some(path) = &self.state_file {
            if let Err(e) = self.shared.gpo_states.save(path) {
                warn!("{}", e);
            }
        }
        info!("Protocol server {} stopped", self.settings.address);
    }
}
