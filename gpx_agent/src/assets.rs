//! Asset tracker.
//!
//! Consumes inventory events from the assets stream, keeps the sensor
//! registry in step and forwards output default states to the protocol
//! server as `GPOSTATE` messages. It never touches hardware itself.

use crate::bus::{Delivery, MessageBus};
use crate::control::{ControlCommand, SharedState};
use crate::registry::UpsertOutcome;
use crate::templates::{TemplateStore, TemplateStoreError};
use crossbeam::channel::{self, Receiver};
use gpx_common::asset::AssetEvent;
use gpx_common::consts::{AGENT_ADDRESS, ASSETS_ADDRESS, subject};
use gpx_common::gpio::{Direction, GpioState};
use gpx_common::protocol::{PeerRequest, StreamMessage};
use gpx_common::template::SensorTemplate;
use std::ops::ControlFlow;
use tracing::{debug, info, warn};

/// The asset tracker actor.
pub struct AssetTracker {
    address: String,
    server_address: String,
    bus: Box<dyn MessageBus>,
    deliveries: Receiver<Delivery>,
    shared: SharedState,
    templates: Option<TemplateStore>,
}

impl AssetTracker {
    /// Tracker over `bus`, forwarding output defaults to `server_address`.
    pub fn new(bus: Box<dyn MessageBus>, shared: SharedState, server_address: &str) -> Self {
        Self {
            address: ASSETS_ADDRESS.to_string(),
            server_address: server_address.to_string(),
            deliveries: bus.deliveries(),
            bus,
            shared,
            templates: None,
        }
    }

    /// Tracker forwarding to the default server address.
    pub fn with_defaults(bus: Box<dyn MessageBus>, shared: SharedState) -> Self {
        Self::new(bus, shared, AGENT_ADDRESS)
    }

    /// Run until `Terminate` or until the control channel closes.
    pub fn run(mut self, control: Receiver<ControlCommand>) {
        info!("Asset tracker started");
        loop {
            let deliveries = self.deliveries.clone();
            channel::select! {
                recv(control) -> command => match command {
                    Ok(command) => {
                        if self.handle_control(command).is_break() {
                            break;
                        }
                    }
                    Err(_) => break,
                },
                recv(deliveries) -> delivery => match delivery {
                    Ok(delivery) => self.handle_delivery(delivery),
                    Err(_) => {
                        warn!("Asset stream closed");
                        self.deliveries = channel::never();
                    }
                },
            }
        }
        info!("Asset tracker stopped");
    }

    /// Apply one control command. Commands concerning hardware are ignored.
    pub fn handle_control(&mut self, command: ControlCommand) -> ControlFlow<()> {
        match command {
            ControlCommand::Connect { endpoint } => {
                if let Err(e) = self.bus.connect(&endpoint, &self.address) {
                    warn!("Asset tracker cannot connect to {}: {}", endpoint, e);
                }
                self.deliveries = self.bus.deliveries();
            }
            ControlCommand::Consumer { stream, pattern } => {
                if let Err(e) = self.bus.set_consumer(&stream, &pattern) {
                    warn!("Cannot consume {} ({}): {}", stream, pattern, e);
                }
            }
            ControlCommand::TemplateDir(dir) => self.templates = Some(TemplateStore::new(dir)),
            ControlCommand::Terminate => return ControlFlow::Break(()),
            other => debug!("Asset tracker ignores {:?}", other),
        }
        ControlFlow::Continue(())
    }

    fn handle_delivery(&mut self, delivery: Delivery) {
        match delivery.message {
            StreamMessage::Asset(event) => self.handle_event(&event),
            other => debug!("Ignoring {} on {}: {:?}", delivery.subject, delivery.stream, other),
        }
    }

    /// Apply one inventory event to the registry.
    pub fn handle_event(&mut self, event: &AssetEvent) {
        if !event.is_gpio() && event.direction.is_none() {
            debug!("{} is not a GPIO asset", event.name);
            return;
        }

        let previous = self.shared.registry.get(&event.name);
        let template = if event.is_removal() {
            None
        } else {
            let known = previous.as_ref().map(|p| p.part_number.as_str());
            self.template_for(event, known)
        };

        match self.shared.registry.upsert(event, template.as_ref()) {
            Ok(UpsertOutcome::Created | UpsertOutcome::Updated) => {
                let Some(record) = self.shared.registry.get(&event.name) else {
                    return;
                };
                if record.direction == Direction::Out {
                    self.forward(PeerRequest::OutputDefault {
                        asset_name: record.asset_name.clone(),
                        channel: Some(record.channel),
                        default_state: record.normal_state,
                    });
                } else if previous.is_some_and(|p| p.direction == Direction::Out) {
                    self.forget_output(&event.name);
                }
            }
            Ok(UpsertOutcome::Removed) => {
                if previous.is_some_and(|p| p.direction == Direction::Out) {
                    self.forget_output(&event.name);
                }
            }
            Ok(UpsertOutcome::Ignored) => debug!("Removal of unknown asset {}", event.name),
            Err(e) => warn!("{}", e),
        }
    }

    /// Template for the event's part number, else for the part number the
    /// registry already holds for this asset.
    fn template_for(&self, event: &AssetEvent, known: Option<&str>) -> Option<SensorTemplate> {
        let part_number = event
            .part_number
            .as_deref()
            .or(known)
            .filter(|pn| !pn.is_empty())?;
        let store = self.templates.as_ref()?;
        match store.load(part_number) {
            Ok(template) => Some(template),
            Err(TemplateStoreError::NotFound(_)) => {
                debug!("No template for {} ({})", event.name, part_number);
                None
            }
            Err(e) => {
                warn!("Template for {}: {}", event.name, e);
                None
            }
        }
    }

    fn forget_output(&mut self, asset_name: &str) {
        self.forward(PeerRequest::OutputDefault {
            asset_name: asset_name.to_string(),
            channel: None,
            default_state: GpioState::Unknown,
        });
    }

    fn forward(&mut self, request: PeerRequest) {
        let frames = request.to_frames();
        if let Err(e) = self.bus.send(&self.server_address, subject::GPOSTATE, frames) {
            warn!("Forwarding GPOSTATE to {} failed: {}", self.server_address, e);
        }
    }
}
