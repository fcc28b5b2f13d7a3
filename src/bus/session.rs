// src/bus/session.rs
//
// MQTT session: Disconnected -> Connecting -> Connected, Connected ->
// Disconnected on network loss, Connecting -> Failed when the first attempt
// is rejected. After the first connect the event loop runs in its own task
// and reconnects with exponential backoff.
//
// Handlers are registered before `connect()`. `on_connected` runs on every
// ConnAck before the event loop polls again, so the SUBSCRIBE it queues goes
// out ahead of anything else and no routed message can be missed.

use bytes::Bytes;
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Duration;

use super::BusClient;
use crate::backoff::Backoff;
use crate::error::{BridgeError, BridgeResult};
use crate::settings::BusConfig;

/// Upper bound on flushing the DISCONNECT packet during shutdown
const DISCONNECT_FLUSH: Duration = Duration::from_secs(1);

pub type ConnectedHandler = Box<dyn Fn(&BusClient) -> BridgeResult<()> + Send + Sync>;
pub type MessageHandler = Box<dyn Fn(&str, Bytes) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

// ============================================================================
// Options
// ============================================================================

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub client_id: String,
    pub keep_alive: Duration,
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
    /// Capacity of the client -> event loop request queue
    pub request_capacity: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            client_id: default_client_id(),
            keep_alive: Duration::from_secs(60),
            reconnect_initial: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(30),
            request_capacity: 100,
        }
    }
}

/// `serial-bridge-` followed by eight hex digits
pub fn default_client_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("serial-bridge-{}", &id[..8])
}

/// Build rumqttc options. Credentials are applied only when both are present.
pub(crate) fn mqtt_options(config: &BusConfig, options: &SessionOptions) -> BridgeResult<MqttOptions> {
    let mut mqttoptions = MqttOptions::new(&options.client_id, &config.broker, config.port);
    mqttoptions.set_keep_alive(options.keep_alive);
    mqttoptions.set_clean_session(true);
    if let Some((username, password)) = config.credentials()? {
        mqttoptions.set_credentials(username, password);
    }
    Ok(mqttoptions)
}

// ============================================================================
// Session
// ============================================================================

pub struct BusSession {
    broker: String,
    client: BusClient,
    eventloop: EventLoop,
    state: watch::Sender<SessionState>,
    reconnect: Backoff,
    on_connected: Option<ConnectedHandler>,
    on_message: Option<MessageHandler>,
}

impl BusSession {
    pub fn new(config: &BusConfig, options: &SessionOptions) -> BridgeResult<Self> {
        let mqttoptions = mqtt_options(config, options)?;
        let (client, eventloop) = AsyncClient::new(mqttoptions, options.request_capacity.max(1));
        let (state, state_rx) = watch::channel(SessionState::Disconnected);

        Ok(Self {
            broker: config.address(),
            client: BusClient::new(client, state_rx),
            eventloop,
            state,
            reconnect: Backoff::new(options.reconnect_initial, options.reconnect_max),
            on_connected: None,
            on_message: None,
        })
    }

    /// Called once per successful connect, including reconnects.
    pub fn on_connected<F>(&mut self, handler: F)
    where
        F: Fn(&BusClient) -> BridgeResult<()> + Send + Sync + 'static,
    {
        self.on_connected = Some(Box::new(handler));
    }

    /// Called once per received PUBLISH, from the event loop task.
    pub fn on_message<F>(&mut self, handler: F)
    where
        F: Fn(&str, Bytes) + Send + Sync + 'static,
    {
        self.on_message = Some(Box::new(handler));
    }

    pub fn client(&self) -> BusClient {
        self.client.clone()
    }

    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Connect and wait for the broker's ConnAck.
    ///
    /// Any failure of this first attempt moves the session to `Failed` and is
    /// returned as `BridgeError::Connect`. On success the event loop is moved
    /// to a background task that reconnects on its own.
    pub async fn connect(mut self) -> BridgeResult<SessionHandle> {
        self.state.send_replace(SessionState::Connecting);
        tlog!("[mqtt] Connecting to {}", self.broker);

        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => break,
                Ok(_) => {}
                Err(e) => {
                    self.state.send_replace(SessionState::Failed);
                    return Err(BridgeError::Connect {
                        broker: self.broker.clone(),
                        reason: describe_connection_error(&e),
                    });
                }
            }
        }

        if let Err(e) = self.handle_connected() {
            self.state.send_replace(SessionState::Failed);
            return Err(BridgeError::Connect {
                broker: self.broker.clone(),
                reason: e.to_string(),
            });
        }

        let (stop, stop_rx) = watch::channel(false);
        let client = self.client.clone();
        let state = self.state.subscribe();
        let task = tokio::spawn(self.drive(stop_rx));

        Ok(SessionHandle {
            client,
            state,
            stop,
            task: Some(task),
        })
    }

    fn handle_connected(&mut self) -> BridgeResult<()> {
        self.state.send_replace(SessionState::Connected);
        tlog!("[mqtt] Connected to {}", self.broker);
        match self.on_connected {
            Some(ref handler) => handler(&self.client),
            None => Ok(()),
        }
    }

    /// Event loop after the first connect. Runs until `stop` is raised or its
    /// sender is dropped.
    ///
    /// `poll()` is only cancelled on stop: a reconnect in progress (TCP connect
    /// plus CONNECT/CONNACK) must be allowed to finish however long it takes.
    async fn drive(mut self, mut stop: watch::Receiver<bool>) {
        loop {
            if *stop.borrow() {
                break;
            }

            let event = tokio::select! {
                event = self.eventloop.poll() => event,
                _ = stop.changed() => break,
            };
            match event {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if let Some(ref handler) = self.on_message {
                        handler(&publish.topic, publish.payload);
                    }
                }
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    self.reconnect.reset();
                    if let Err(e) = self.handle_connected() {
                        tlog!(error: "[mqtt] Re-subscribe after reconnect failed: {}", e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    let was_connected = *self.state.borrow() == SessionState::Connected;
                    self.state.send_replace(SessionState::Disconnected);
                    if was_connected {
                        tlog!(warn: "[mqtt] Connection to {} lost: {}", self.broker, describe_connection_error(&e));
                    }

                    let delay = self.reconnect.next_delay();
                    tlog!("[mqtt] Reconnecting to {} in {:?}", self.broker, delay);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = stop.changed() => break,
                    }
                    self.state.send_replace(SessionState::Connecting);
                }
            }
        }

        self.flush_disconnect().await;
        self.state.send_replace(SessionState::Disconnected);
        tlog!("[mqtt] Disconnected from {}", self.broker);
    }

    /// Queue a DISCONNECT and poll until it is written or the flush window ends.
    async fn flush_disconnect(&mut self) {
        if *self.state.borrow() != SessionState::Connected {
            return;
        }
        self.client.request_disconnect();
        let flushed = tokio::time::timeout(DISCONNECT_FLUSH, async {
            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;
        if flushed.is_err() {
            tlog!(warn: "[mqtt] DISCONNECT not flushed within {:?}", DISCONNECT_FLUSH);
        }
    }
}

fn describe_connection_error(e: &ConnectionError) -> String {
    match e {
        ConnectionError::ConnectionRefused(code) => format!("broker refused connection: {:?}", code),
        other => other.to_string(),
    }
}

// ============================================================================
// Handle
// ============================================================================

/// A connected session whose event loop runs in the background.
pub struct SessionHandle {
    client: BusClient,
    state: watch::Receiver<SessionState>,
    stop: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    pub fn client(&self) -> BusClient {
        self.client.clone()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Send DISCONNECT and stop the event loop task.
    pub async fn disconnect(mut self) {
        self.stop.send_replace(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tlog!(error: "[mqtt] Event loop task panicked: {:?}", e);
            }
        }
    }
}
