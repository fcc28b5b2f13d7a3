// src/bus/mod.rs
//
// MQTT side of the bridge: the session (connection lifecycle, reconnect,
// subscriptions) and the publish primitive the relays use.

mod session;

pub use session::{default_client_id, BusSession, SessionHandle, SessionOptions, SessionState};

use rumqttc::{AsyncClient, QoS, SubscribeFilter};
use tokio::sync::watch;

use crate::error::{BridgeError, BridgeResult};

/// Publishes raw payloads to a topic. Implementations must be safe to call
/// from every relay thread at once.
pub trait Publisher: Send + Sync {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> BridgeResult<()>;
}

/// Cloneable handle to the MQTT client.
#[derive(Clone, Debug)]
pub struct BusClient {
    inner: AsyncClient,
    state: watch::Receiver<SessionState>,
}

impl BusClient {
    pub(crate) fn new(inner: AsyncClient, state: watch::Receiver<SessionState>) -> Self {
        Self { inner, state }
    }

    /// Queue one SUBSCRIBE for all `topics`. Does nothing for an empty list.
    pub fn subscribe_all(&self, topics: &[&str]) -> BridgeResult<()> {
        if topics.is_empty() {
            return Ok(());
        }
        let filters = topics
            .iter()
            .map(|t| SubscribeFilter::new(t.to_string(), QoS::AtMostOnce));
        self.inner
            .try_subscribe_many(filters)
            .map_err(|e| BridgeError::Subscribe {
                topics: topics.join(", "),
                reason: e.to_string(),
            })
    }

    pub(crate) fn request_disconnect(&self) {
        let _ = self.inner.try_disconnect();
    }
}

impl Publisher for BusClient {
    /// QoS 0, not retained. Returns once the request is queued for the event loop.
    /// Rejected while the session is not connected, so nothing piles up in the
    /// request queue during an outage.
    fn publish(&self, topic: &str, payload: Vec<u8>) -> BridgeResult<()> {
        if *self.state.borrow() != SessionState::Connected {
            return Err(BridgeError::Publish {
                topic: topic.to_string(),
                reason: "not connected to broker".to_string(),
            });
        }
        self.inner
            .try_publish(topic, QoS::AtMostOnce, false, payload)
            .map_err(|e| BridgeError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording publisher and a minimal MQTT 3.1.1 packet toolkit for fake brokers.

    use super::*;
    use std::sync::Mutex;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpStream;

    /// Read one MQTT packet: (first header byte, body).
    pub async fn read_packet(stream: &mut TcpStream) -> (u8, Vec<u8>) {
        let header = stream.read_u8().await.unwrap();
        let mut len: usize = 0;
        let mut shift = 0;
        loop {
            let b = stream.read_u8().await.unwrap();
            len |= ((b & 0x7f) as usize) << shift;
            if b & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).await.unwrap();
        (header, body)
    }

    /// Topic filters from a SUBSCRIBE body
    pub fn subscribe_topics(body: &[u8]) -> Vec<String> {
        let mut topics = Vec::new();
        let mut i = 2; // packet id
        while i + 2 <= body.len() {
            let n = u16::from_be_bytes([body[i], body[i + 1]]) as usize;
            topics.push(String::from_utf8(body[i + 2..i + 2 + n].to_vec()).unwrap());
            i += 2 + n + 1; // topic + requested QoS
        }
        topics
    }

    /// SUBACK granting QoS 0 for every filter in a SUBSCRIBE body
    pub fn suback_for(body: &[u8]) -> Vec<u8> {
        let count = subscribe_topics(body).len();
        let mut suback = vec![0x90, (2 + count) as u8, body[0], body[1]];
        suback.extend(std::iter::repeat(0u8).take(count));
        suback
    }

    /// QoS 0 PUBLISH packet (short payloads only)
    pub fn publish_packet(topic: &str, payload: &[u8]) -> Vec<u8> {
        let mut packet = vec![0x30, (2 + topic.len() + payload.len()) as u8];
        packet.extend_from_slice(&(topic.len() as u16).to_be_bytes());
        packet.extend_from_slice(topic.as_bytes());
        packet.extend_from_slice(payload);
        packet
    }

    /// (topic, payload) of a QoS 0 PUBLISH body
    pub fn parse_publish(body: &[u8]) -> (String, Vec<u8>) {
        let n = u16::from_be_bytes([body[0], body[1]]) as usize;
        let topic = String::from_utf8(body[2..2 + n].to_vec()).unwrap();
        (topic, body[2 + n..].to_vec())
    }

    /// Records every publish; can be switched to fail.
    #[derive(Default)]
    pub struct RecordingPublisher {
        pub published: Mutex<Vec<(String, Vec<u8>)>>,
        pub fail: std::sync::atomic::AtomicBool,
    }

    impl RecordingPublisher {
        pub fn payloads_for(&self, topic: &str) -> Vec<Vec<u8>> {
            self.published
                .lock()
                .unwrap()
                .iter()
                .filter(|(t, _)| t == topic)
                .map(|(_, p)| p.clone())
                .collect()
        }
    }

    impl Publisher for RecordingPublisher {
        fn publish(&self, topic: &str, payload: Vec<u8>) -> BridgeResult<()> {
            if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(BridgeError::Publish {
                    topic: topic.to_string(),
                    reason: "request channel full".to_string(),
                });
            }
            self.published
                .lock()
                .unwrap()
                .push((topic.to_string(), payload));
            Ok(())
        }
    }
}
