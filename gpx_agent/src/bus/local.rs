//! In-process broker.
//!
//! Brokers are bound to an endpoint name in a process-wide table; clients
//! connect by endpoint, the same way they would to a remote broker. Used by
//! the binary when no external transport is wired and by every test.

use super::{BusError, Delivery, Mail, MessageBus};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use gpx_common::protocol::StreamMessage;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, warn};

/// Brokers by endpoint.
static BROKERS: LazyLock<Mutex<HashMap<String, LocalBroker>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

struct Subscriber {
    owner: String,
    stream: String,
    pattern: Regex,
    sink: Sender<Delivery>,
}

#[derive(Default)]
struct BrokerState {
    mailboxes: HashMap<String, Sender<Mail>>,
    subscribers: Vec<Subscriber>,
}

/// Handle to an in-process broker.
#[derive(Clone)]
pub struct LocalBroker {
    endpoint: String,
    state: Arc<Mutex<BrokerState>>,
}

impl LocalBroker {
    /// Bind a new broker at `endpoint`, replacing any previous one.
    pub fn bind(endpoint: &str) -> Self {
        let broker = Self {
            endpoint: endpoint.to_string(),
            state: Arc::new(Mutex::new(BrokerState::default())),
        };
        if BROKERS
            .lock()
            .insert(endpoint.to_string(), broker.clone())
            .is_some()
        {
            warn!("Broker at {} replaced", endpoint);
        }
        debug!("Broker bound at {}", endpoint);
        broker
    }

    /// Broker bound at `endpoint`.
    pub fn lookup(endpoint: &str) -> Option<Self> {
        BROKERS.lock().get(endpoint).cloned()
    }

    /// Remove this broker from the endpoint table.
    pub fn unbind(&self) {
        let mut brokers = BROKERS.lock();
        if brokers
            .get(&self.endpoint)
            .is_some_and(|b| Arc::ptr_eq(&b.state, &self.state))
        {
            brokers.remove(&self.endpoint);
        }
    }

    /// Endpoint name.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Client already connected under `address`.
    pub fn client(&self, address: &str) -> Result<LocalClient, BusError> {
        let mut client = LocalClient::new();
        client.connect(&self.endpoint, address)?;
        Ok(client)
    }

    fn register(&self, address: &str) -> Receiver<Mail> {
        let (tx, rx) = channel::unbounded();
        if self
            .state
            .lock()
            .mailboxes
            .insert(address.to_string(), tx)
            .is_some()
        {
            warn!("Mailbox {} re-registered on {}", address, self.endpoint);
        }
        rx
    }

    fn unregister(&self, address: &str) {
        let mut state = self.state.lock();
        state.mailboxes.remove(address);
        state.subscribers.retain(|s| s.owner != address);
    }

    fn deliver(&self, address: &str, mail: Mail) -> Result<(), BusError> {
        let state = self.state.lock();
        let mailbox = state
            .mailboxes
            .get(address)
            .ok_or_else(|| BusError::UnknownAddress(address.to_string()))?;
        mailbox.send(mail).map_err(|_| BusError::Disconnected)
    }

    fn subscribe(&self, subscriber: Subscriber) {
        self.state.lock().subscribers.push(subscriber);
    }

    fn broadcast(&self, stream: &str, sender: &str, subject: &str, message: StreamMessage) {
        let mut state = self.state.lock();
        state.subscribers.retain(|s| {
            if s.stream != stream || !s.pattern.is_match(subject) {
                return true;
            }
            s.sink
                .send(Delivery {
                    stream: stream.to_string(),
                    sender: sender.to_string(),
                    subject: subject.to_string(),
                    message: message.clone(),
                })
                .is_ok()
        });
    }
}

/// Client of a [`LocalBroker`].
pub struct LocalClient {
    broker: Option<LocalBroker>,
    address: Option<String>,
    producer: Option<String>,
    mailbox: Receiver<Mail>,
    delivery_tx: Sender<Delivery>,
    delivery_rx: Receiver<Delivery>,
}

impl LocalClient {
    /// Disconnected client.
    pub fn new() -> Self {
        let (delivery_tx, delivery_rx) = channel::unbounded();
        Self {
            broker: None,
            address: None,
            producer: None,
            mailbox: channel::never(),
            delivery_tx,
            delivery_rx,
        }
    }

    fn connected(&self) -> Result<(&LocalBroker, &str), BusError> {
        match (&self.broker, &self.address) {
            (Some(broker), Some(address)) => Ok((broker, address)),
            _ => Err(BusError::NotConnected),
        }
    }
}

impl Default for LocalClient {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LocalClient {
    fn drop(&mut self) {
        if let (Some(broker), Some(address)) = (&self.broker, &self.address) {
            broker.unregister(address);
        }
    }
}

impl MessageBus for LocalClient {
    fn connect(&mut self, endpoint: &str, address: &str) -> Result<(), BusError> {
        let broker =
            LocalBroker::lookup(endpoint).ok_or_else(|| BusError::NoEndpoint(endpoint.to_string()))?;
        if let (Some(old), Some(old_address)) = (&self.broker, &self.address) {
            old.unregister(old_address);
        }
        self.mailbox = broker.register(address);
        self.broker = Some(broker);
        self.address = Some(address.to_string());
        debug!("{} connected to {}", address, endpoint);
        Ok(())
    }

    fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    fn set_producer(&mut self, stream: &str) -> Result<(), BusError> {
        self.connected()?;
        self.producer = Some(stream.to_string());
        Ok(())
    }

    fn set_consumer(&mut self, stream: &str, pattern: &str) -> Result<(), BusError> {
        let (broker, address) = self.connected()?;
        let pattern = Regex::new(pattern).map_err(|e| BusError::InvalidPattern(e.to_string()))?;
        broker.subscribe(Subscriber {
            owner: address.to_string(),
            stream: stream.to_string(),
            pattern,
            sink: self.delivery_tx.clone(),
        });
        Ok(())
    }

    fn mailbox(&self) -> Receiver<Mail> {
        self.mailbox.clone()
    }

    fn deliveries(&self) -> Receiver<Delivery> {
        self.delivery_rx.clone()
    }

    fn publish(&mut self, subject: &str, message: StreamMessage) -> Result<(), BusError> {
        let (broker, address) = self.connected()?;
        let stream = self.producer.as_deref().ok_or(BusError::NoProducer)?;
        broker.broadcast(stream, address, subject, message);
        Ok(())
    }

    fn send(&mut self, address: &str, subject: &str, frames: Vec<String>) -> Result<(), BusError> {
        let (broker, own) = self.connected()?;
        broker.deliver(address, Mail::new(own, subject, frames))
    }

    fn reply(&mut self, to: &Mail, subject: &str, frames: Vec<String>) -> Result<(), BusError> {
        match to.reply_channel() {
            Some(channel) => channel.send(frames).map_err(|_| BusError::Disconnected),
            None => self.send(&to.sender, subject, frames),
        }
    }

    fn request(
        &mut self,
        address: &str,
        subject: &str,
        frames: Vec<String>,
        timeout: Duration,
    ) -> Result<Vec<String>, BusError> {
        let (broker, own) = self.connected()?;
        let (tx, rx) = channel::bounded(1);
        broker.deliver(address, Mail::new(own, subject, frames).with_reply_channel(tx))?;
        rx.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => BusError::Timeout,
            RecvTimeoutError::Disconnected => BusError::Disconnected,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpx_common::gpio::{Direction, GpioState};
    use gpx_common::protocol::StatusMetric;

    fn metric() -> StreamMessage {
        StreamMessage::Metric(StatusMetric::channel_status(
            "IPC1",
            "sensorgpio-1",
            Direction::In,
            1,
            GpioState::Closed,
        ))
    }

    #[test]
    fn test_connect_requires_bound_endpoint() {
        let mut client = LocalClient::new();
        assert_eq!(
            client.connect("inproc://bus-test-missing", "a"),
            Err(BusError::NoEndpoint("inproc://bus-test-missing".into()))
        );
        assert_eq!(client.set_producer("S"), Err(BusError::NotConnected));
    }

    #[test]
    fn test_send_and_reply_to_mailbox() {
        let broker = LocalBroker::bind("inproc://bus-test-send");
        let mut a = broker.client("a").unwrap();
        let mut b = broker.client("b").unwrap();

        a.send("b", "PING", vec!["1".into()]).unwrap();
        let mail = b.mailbox().recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(mail.sender, "a");
        b.reply(&mail, "PING", vec!["1".into(), "OK".into()]).unwrap();

        let answer = a.mailbox().recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(answer.frames, vec!["1", "OK"]);
        assert_eq!(
            a.send("nobody", "PING", vec![]),
            Err(BusError::UnknownAddress("nobody".into()))
        );
        broker.unbind();
    }

    #[test]
    fn test_request_times_out() {
        let broker = LocalBroker::bind("inproc://bus-test-timeout");
        let mut a = broker.client("a").unwrap();
        let _silent = broker.client("silent").unwrap();
        let result = a.request("silent", "HW_CAP", vec![], Duration::from_millis(20));
        assert_eq!(result, Err(BusError::Timeout));
        broker.unbind();
    }

    #[test]
    fn test_request_dropped_without_reply() {
        let broker = LocalBroker::bind("inproc://bus-test-dropped");
        let mut a = broker.client("a").unwrap();
        let b = broker.client("b").unwrap();
        let mailbox = b.mailbox();
        let handle = std::thread::spawn(move || {
            drop(mailbox.recv_timeout(Duration::from_secs(1)).unwrap());
        });
        let result = a.request("b", "GPOSTATE", vec![], Duration::from_secs(1));
        handle.join().unwrap();
        assert_eq!(result, Err(BusError::Disconnected));
        broker.unbind();
    }

    #[test]
    fn test_stream_pattern_filter() {
        let broker = LocalBroker::bind("inproc://bus-test-stream");
        let mut producer = broker.client("producer").unwrap();
        let mut consumer = broker.client("consumer").unwrap();
        consumer.set_consumer("METRICS", "^status\\.GPI").unwrap();
        assert!(matches!(
            consumer.set_consumer("METRICS", "("),
            Err(BusError::InvalidPattern(_))
        ));

        assert_eq!(producer.publish("status.GPI1@IPC1", metric()), Err(BusError::NoProducer));
        producer.set_producer("METRICS").unwrap();
        producer.publish("status.GPO1@IPC1", metric()).unwrap();
        producer.publish("status.GPI1@IPC1", metric()).unwrap();

        let delivery = consumer.deliveries().recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(delivery.subject, "status.GPI1@IPC1");
        assert_eq!(delivery.sender, "producer");
        assert!(consumer.deliveries().try_recv().is_err());
        broker.unbind();
    }

    #[test]
    fn test_drop_unregisters_mailbox() {
        let broker = LocalBroker::bind("inproc://bus-test-drop");
        let mut a = broker.client("a").unwrap();
        drop(broker.client("b").unwrap());
        assert!(matches!(a.send("b", "X", vec![]), Err(BusError::UnknownAddress(_))));
        broker.unbind();
        assert!(LocalBroker::lookup("inproc://bus-test-drop").is_none());
    }
}
