//! End-to-end tests of the agent actors.
//!
//! Both actors run on their own threads against an in-process broker, with
//! a fake inventory answering capability requests and a sandboxed device
//! tree standing in for sysfs.

use crossbeam::channel::{self, Receiver, Sender};
use gpx_agent::bus::{Delivery, LocalBroker, LocalClient, Mail, MessageBus};
use gpx_agent::control::{ControlCommand, server_startup, tracker_startup};
use gpx_agent::{AssetTracker, GpioServer, ServerSettings, SharedState};
use gpx_common::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tempfile::TempDir;

const TIMEOUT: Duration = Duration::from_secs(3);

/// Poll `condition` until it holds or the timeout expires.
fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

fn frames(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

/// Inventory answering both capability requests, then exiting.
fn inventory(broker: &LocalBroker, input_count: u32) -> JoinHandle<()> {
    let mut client = broker.client("inventory").unwrap();
    thread::spawn(move || {
        for _ in 0..2 {
            let Ok(mail): Result<Mail, _> = client.mailbox().recv_timeout(TIMEOUT) else {
                return;
            };
            let request = CapabilityRequest::from_frames(&mail.frames).unwrap();
            let cap = match request.direction {
                Direction::In => Capability {
                    direction: Direction::In,
                    count: input_count,
                    base_address: Some(488),
                    offset: -1,
                    mapping: BTreeMap::new(),
                },
                Direction::Out => Capability {
                    direction: Direction::Out,
                    count: 5,
                    base_address: Some(488),
                    offset: 0,
                    mapping: BTreeMap::from([(4, 502), (5, 503)]),
                },
            };
            client
                .reply(
                    &mail,
                    &mail.subject,
                    CapabilityReply::Available(cap).to_frames(&request.correlation_id),
                )
                .unwrap();
        }
    })
}

struct Agent {
    _tmp: TempDir,
    root: PathBuf,
    state_file: PathBuf,
    broker: LocalBroker,
    shared: SharedState,
    server_tx: Sender<ControlCommand>,
    tracker_tx: Sender<ControlCommand>,
    handles: Vec<JoinHandle<()>>,
    inventory: Option<JoinHandle<()>>,
    peer: LocalClient,
    feed: LocalClient,
    observed: Receiver<Delivery>,
    _observer: LocalClient,
}

impl Agent {
    fn start(name: &str, input_count: u32, state: Option<&str>) -> Self {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("sys");
        for pin in [488, 489, 490, 491, 502, 503] {
            let dir = root.join(format!("gpio{pin}"));
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("value"), "0").unwrap();
        }
        let templates = tmp.path().join("templates");
        fs::create_dir_all(&templates).unwrap();
        fs::write(
            templates.join("DCS001.tpl"),
            "manufacturer = \"Eaton\"\n\
             type = \"door-contact-sensor\"\n\
             normal-state = \"closed\"\n\
             gpx-direction = \"GPI\"\n\
             alarm-message = \"Door has been $status\"\n",
        )
        .unwrap();
        let state_file = tmp.path().join("state");
        if let Some(content) = state {
            fs::write(&state_file, content).unwrap();
        }

        let endpoint = format!("inproc://agent-test-{name}");
        let mut config = AgentConfig::default();
        config.bus.endpoint = endpoint.clone();
        config.agent.template_dir = templates;
        config.agent.state_file = state_file.clone();
        config.agent.request_timeout_ms = 2000;
        config.agent.power_settle_ms = 0;

        let broker = LocalBroker::bind(&endpoint);
        let inventory = inventory(&broker, input_count);
        let shared = SharedState::new();

        let server = GpioServer::new(
            ServerSettings::from_config(&config),
            Box::new(LocalClient::new()),
            shared.clone(),
        );
        let tracker = AssetTracker::new(Box::new(LocalClient::new()), shared.clone(), AGENT_ADDRESS);
        let (server_tx, server_rx) = channel::unbounded();
        let (tracker_tx, tracker_rx) = channel::unbounded();
        let handles = vec![
            thread::spawn(move || server.run(server_rx)),
            thread::spawn(move || tracker.run(tracker_rx)),
        ];
        for command in server_startup(&config, Some(&root)) {
            server_tx.send(command).unwrap();
        }
        for command in tracker_startup(&config) {
            tracker_tx.send(command).unwrap();
        }

        let mut observer = broker.client("observer").unwrap();
        observer.set_consumer(DEFAULT_METRICS_STREAM, ".*").unwrap();
        let mut feed = broker.client("feed").unwrap();
        feed.set_producer(DEFAULT_ASSETS_STREAM).unwrap();

        let agent = Self {
            _tmp: tmp,
            root,
            state_file,
            peer: broker.client("peer").unwrap(),
            broker,
            shared,
            server_tx,
            tracker_tx,
            handles,
            inventory: Some(inventory),
            feed,
            observed: observer.deliveries(),
            _observer: observer,
        };
        assert!(wait_until(|| agent.shared.hardware.read().is_ready()));
        agent
    }

    fn value(&self, pin: u32) -> String {
        fs::read_to_string(self.root.join(format!("gpio{pin}/value"))).unwrap()
    }

    fn set_value(&self, pin: u32, value: &str) {
        fs::write(self.root.join(format!("gpio{pin}/value")), value).unwrap();
    }

    /// Publish `event` until the registry reflects it; the tracker may
    /// still be subscribing when the first copy goes out.
    fn announce(&mut self, event: &AssetEvent) {
        let shared = self.shared.clone();
        let feed = &mut self.feed;
        assert!(wait_until(|| {
            feed.publish(&event.name, StreamMessage::Asset(event.clone())).unwrap();
            thread::sleep(Duration::from_millis(20));
            shared.registry.get(&event.name).is_some()
        }));
    }

    fn request(&mut self, subject: &str, parts: &[&str]) -> Vec<String> {
        self.peer
            .request(AGENT_ADDRESS, subject, frames(parts), TIMEOUT)
            .unwrap()
    }

    /// Run a sweep and collect what it published.
    fn sweep(&self, expected: usize) -> Vec<Delivery> {
        self.server_tx.send(ControlCommand::Update).unwrap();
        (0..expected)
            .map(|_| self.observed.recv_timeout(TIMEOUT).unwrap())
            .collect()
    }

    /// Returns the sandbox so callers can inspect files written at shutdown.
    fn stop(mut self) -> TempDir {
        let _ = self.tracker_tx.send(ControlCommand::Terminate);
        let _ = self.server_tx.send(ControlCommand::Terminate);
        for handle in self.handles.drain(..) {
            handle.join().unwrap();
        }
        if let Some(inventory) = self.inventory.take() {
            inventory.join().unwrap();
        }
        self.broker.unbind();
        self._tmp
    }
}

fn door_sensor() -> AssetEvent {
    let mut event = AssetEvent::new(AssetOperation::Create, "sensorgpio-1");
    event.subtype = "sensorgpio".into();
    event.part_number = Some("DCS001".into());
    event.channel = Some(1);
    event.parent = Some("IPC1".into());
    event
}

fn output(name: &str, channel: u32) -> AssetEvent {
    let mut event = AssetEvent::new(AssetOperation::Create, name);
    event.subtype = "gpo".into();
    event.channel = Some(channel);
    event
}

fn metrics(deliveries: &[Delivery]) -> BTreeMap<String, String> {
    deliveries
        .iter()
        .filter_map(|d| match &d.message {
            StreamMessage::Metric(m) => Some((d.subject.clone(), m.value.clone())),
            _ => None,
        })
        .collect()
}

// ─── Tests ──────────────────────────────────────────────────────────

#[test]
fn sweep_publishes_status_of_every_channel() {
    let mut agent = Agent::start("sweep", 10, None);
    agent.announce(&door_sensor());
    agent.announce(&output("gpo-2", 2));
    assert!(wait_until(|| agent.shared.gpo_states.get("gpo-2").is_some()));
    assert_eq!(agent.value(490), "0");

    let published = metrics(&agent.sweep(2));
    assert_eq!(published.get("status.GPI1@IPC1").map(String::as_str), Some("closed"));
    assert_eq!(published.get("status.GPO2@gpo-2").map(String::as_str), Some("closed"));
    agent.stop();
}

#[test]
fn interaction_drives_output_once() {
    let mut agent = Agent::start("interaction", 10, None);
    agent.announce(&output("gpo-2", 2));
    assert!(wait_until(|| agent.shared.gpo_states.get("gpo-2").is_some()));

    assert_eq!(agent.request("GPO_INTERACTION", &["c1", "gpo-2", "open"]), frames(&["c1", "OK"]));
    assert_eq!(agent.value(490), "1");
    assert_eq!(
        agent.request("GPO_INTERACTION", &["c2", "gpo-2", "opened"]),
        frames(&["c2", "ERROR", "ACTION_NOT_APPLICABLE"])
    );
    assert_eq!(
        agent.request("GPO_INTERACTION", &["c3", "gpo-9", "open"]),
        frames(&["c3", "ERROR", "ASSET_NOT_FOUND"])
    );
    agent.stop();
}

#[test]
fn mapped_output_uses_sparse_pin() {
    let mut agent = Agent::start("mapped", 10, None);
    agent.announce(&output("gpo-5", 5));
    assert!(wait_until(|| agent.shared.gpo_states.get("gpo-5").is_some()));

    agent.request("GPO_INTERACTION", &["c1", "gpo-5", "high"]);
    assert_eq!(agent.value(503), "1");
    assert_eq!(agent.value(502), "0");
    agent.stop();
}

#[test]
fn door_opening_raises_and_resolves_alert() {
    let mut agent = Agent::start("alert", 10, None);
    agent.announce(&door_sensor());

    agent.set_value(488, "1");
    let published = agent.sweep(2);
    let alert = published
        .iter()
        .find_map(|d| match &d.message {
            StreamMessage::Alert(a) => Some(a.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(alert.state, AlertState::Active);
    assert_eq!(alert.description, "Door has been opened");
    assert_eq!(alert.rule, "door-contact-sensor@sensorgpio-1");

    // Still open: no second alert.
    let published = agent.sweep(1);
    assert!(matches!(published[0].message, StreamMessage::Metric(_)));
    assert!(agent.observed.recv_timeout(Duration::from_millis(100)).is_err());

    agent.set_value(488, "0");
    let published = agent.sweep(2);
    assert!(published.iter().any(|d| matches!(
        &d.message,
        StreamMessage::Alert(a) if a.state == AlertState::Resolved
    )));
    agent.stop();
}

#[test]
fn disabled_inputs_reject_sensors() {
    let mut agent = Agent::start("no-inputs", 0, None);
    let shared = agent.shared.clone();
    let sensor = door_sensor();
    let gpo = output("gpo-1", 1);
    let feed = &mut agent.feed;
    assert!(wait_until(|| {
        feed.publish(&sensor.name, StreamMessage::Asset(sensor.clone())).unwrap();
        feed.publish(&gpo.name, StreamMessage::Asset(gpo.clone())).unwrap();
        thread::sleep(Duration::from_millis(20));
        shared.registry.get("gpo-1").is_some()
    }));
    assert!(shared.registry.get("sensorgpio-1").is_none());
    assert_eq!(shared.registry.len(), 1);
    agent.stop();
}

#[test]
fn peer_errors_and_manifests() {
    let mut agent = Agent::start("manifest", 10, None);

    assert_eq!(agent.request("GPIO_TEST", &["9"]), frames(&["9", "ERROR", "BAD_COMMAND"]));
    assert_eq!(
        agent.request("GPIO_MANIFEST", &["m1", "NOPE"]),
        frames(&["m1", "ERROR", "ASSET_NOT_FOUND"])
    );
    assert_eq!(
        agent.request("GPIO_MANIFEST_SUMMARY", &["m2"]),
        frames(&["m2", "OK", "DCS001", "Eaton"])
    );

    let added = agent.request(
        "GPIO_TEMPLATE_ADD",
        &["t1", "WLD002", "", "water-leak-detector", "opened", "GPI", "", "CRITICAL", "Water leak $status"],
    );
    assert_eq!(added, frames(&["t1", "OK"]));
    assert_eq!(
        agent.request("GPIO_MANIFEST", &["m3", "WLD002"]),
        frames(&[
            "m3", "OK", "WLD002", "unknown", "water-leak-detector", "opened", "GPI", "internal",
            "CRITICAL", "Water leak $status",
        ])
    );
    agent.stop();
}

#[test]
fn state_file_is_restored_and_saved() {
    let mut agent = Agent::start("state", 10, Some("gpo-3 3 0 1\ngarbage\n"));
    assert!(wait_until(|| agent.shared.gpo_states.get("gpo-3").is_some()));
    let restored = agent.shared.gpo_states.get("gpo-3").unwrap();
    assert_eq!((restored.channel, restored.default_state), (3, GpioState::Closed));
    assert_eq!(restored.last_action, GpioState::Open);
    assert!(restored.in_alert);
    assert!(wait_until(|| agent.value(491) == "1"));

    agent.announce(&output("gpo-2", 2));
    agent.request("GPO_INTERACTION", &["c1", "gpo-2", "open"]);
    let state_file = agent.state_file.clone();
    let _sandbox = agent.stop();

    let saved = fs::read_to_string(&state_file).unwrap();
    assert!(saved.contains("gpo-2 2 0 1"));
    assert!(saved.contains("gpo-3 3 0 1"));
    assert!(!saved.contains("garbage"));
    assert!(!Path::new(&format!("{}.tmp", state_file.display())).exists());
}
