// src/relay/router.rs
//
// Inbound router: resolves each bus message to its routes and makes exactly
// one write attempt per matching route.
//
// Writes are handed to the port's relay through its queue, so a port is only
// ever opened by one owner. If that relay has given up, the write goes to a
// fallback writer thread that opens the port for the one write and closes it
// again. `dispatch` never blocks: it runs on the MQTT event loop task.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::time::Duration;

use super::{WriteSender, WRITE_QUEUE_DEPTH};
use crate::io::serial::port::write_once;
use crate::io::serial::PortOpener;
use crate::routes::RouteTable;
use crate::settings::RouteConfig;

/// Timeout for the one-shot fallback handle
const DIRECT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// What happened to one message
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Dispatch {
    /// Handed to a relay's write queue
    pub queued: usize,
    /// Handed to the fallback writer (the port's relay is gone)
    pub direct: usize,
    /// Dropped because a queue was full
    pub dropped: usize,
}

pub struct InboundRouter {
    table: Arc<RouteTable>,
    /// port -> owning relay's write queue
    queues: HashMap<String, WriteSender>,
    /// Fallback writer; `None` if its thread could not be started
    direct: Option<SyncSender<(RouteConfig, Bytes)>>,
}

impl InboundRouter {
    pub fn new(table: Arc<RouteTable>, opener: Arc<dyn PortOpener>) -> Self {
        let (tx, rx) = mpsc::sync_channel(WRITE_QUEUE_DEPTH);
        let direct = match std::thread::Builder::new()
            .name("direct-writer".to_string())
            .spawn(move || direct_writer(opener, rx))
        {
            Ok(_) => Some(tx),
            Err(e) => {
                tlog!(error: "[router] Failed to start fallback writer: {}", e);
                None
            }
        };

        Self {
            table,
            queues: HashMap::new(),
            direct,
        }
    }

    /// Route writes for `port` through the given relay queue.
    pub fn attach_queue(&mut self, port: &str, queue: WriteSender) {
        self.queues.insert(port.to_string(), queue);
    }

    /// Deliver one bus message. Topics without routes are ignored.
    pub fn dispatch(&self, topic: &str, payload: Bytes) -> Dispatch {
        let mut outcome = Dispatch::default();

        for route in self.table.lookup_by_inbound_topic(topic) {
            let Some(queue) = self.queues.get(&route.port) else {
                self.hand_to_direct(route, payload.clone(), &mut outcome);
                continue;
            };
            match queue.try_send(payload.clone()) {
                Ok(()) => outcome.queued += 1,
                Err(TrySendError::Full(dropped)) => {
                    tlog!(
                        warn: "[router] Write queue for {} is full; dropped {} bytes from '{}'",
                        route.port,
                        dropped.len(),
                        topic
                    );
                    outcome.dropped += 1;
                }
                Err(TrySendError::Disconnected(payload)) => {
                    self.hand_to_direct(route, payload, &mut outcome);
                }
            }
        }

        outcome
    }

    fn hand_to_direct(&self, route: &RouteConfig, payload: Bytes, outcome: &mut Dispatch) {
        let sent = match self.direct {
            Some(ref direct) => direct.try_send((route.clone(), payload)),
            None => Err(TrySendError::Disconnected((route.clone(), payload))),
        };
        match sent {
            Ok(()) => outcome.direct += 1,
            Err(TrySendError::Full((_, payload))) | Err(TrySendError::Disconnected((_, payload))) => {
                tlog!(
                    warn: "[router] Fallback writer unavailable; dropped {} bytes for {}",
                    payload.len(),
                    route.port
                );
                outcome.dropped += 1;
            }
        }
    }
}

/// Blocking one-shot writes, in arrival order, until the router is dropped.
fn direct_writer(opener: Arc<dyn PortOpener>, rx: Receiver<(RouteConfig, Bytes)>) {
    for (route, payload) in rx {
        match write_once(opener.as_ref(), &route, &payload, DIRECT_WRITE_TIMEOUT) {
            Ok(()) => tlog!(
                "[router] '{}' -> {} bytes written to {} (direct)",
                route.inbound_topic,
                payload.len(),
                route.port
            ),
            Err(e) => tlog!(error: "[router] {}; message dropped", e),
        }
    }
}
