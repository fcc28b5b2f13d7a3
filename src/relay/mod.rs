// src/relay/mod.rs
//
// Serial <-> MQTT relaying: one OutboundRelay per route owns the port, and
// the InboundRouter feeds bus messages to it through a bounded write queue.

mod router;
mod worker;

pub use router::{Dispatch, InboundRouter};
pub use worker::{OutboundRelay, RelayExit, RestartPolicy, POLL_INTERVAL, READ_TIMEOUT};

use bytes::Bytes;
use std::sync::mpsc;

/// Inbound payloads buffered per port before the router starts dropping them
pub const WRITE_QUEUE_DEPTH: usize = 64;

pub type WriteSender = mpsc::SyncSender<Bytes>;
pub type WriteReceiver = mpsc::Receiver<Bytes>;

pub fn write_queue() -> (WriteSender, WriteReceiver) {
    mpsc::sync_channel(WRITE_QUEUE_DEPTH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::testing::RecordingPublisher;
    use crate::io::serial::port::testing::FakeOpener;
    use crate::routes::RouteTable;
    use crate::settings::RouteConfig;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    /// Both directions through one port: s/in -> P1 and P1 -> s/out.
    #[test]
    fn test_bidirectional_scenario() {
        let opener = FakeOpener::default();
        let device = opener.with_device("P1");
        let publisher = Arc::new(RecordingPublisher::default());
        let shutdown = Arc::new(AtomicBool::new(false));
        let route = RouteConfig::new("P1", 9600, "s/out", "s/in");
        let table = Arc::new(RouteTable::build(vec![route.clone()]).unwrap());

        let (tx, rx) = write_queue();
        let mut router = InboundRouter::new(table, Arc::new(opener.clone()));
        router.attach_queue("P1", tx);

        // Arrives before the relay starts; must not be lost
        assert_eq!(router.dispatch("s/in", Bytes::from_static(&[0x01, 0x02])).queued, 1);

        let relay = OutboundRelay::new(
            route,
            Arc::new(opener),
            publisher.clone(),
            rx,
            shutdown.clone(),
            RestartPolicy::default(),
        );
        let worker = std::thread::spawn(move || relay.run());
        device.lock().unwrap().incoming.push_back(vec![0xAA]);

        let deadline = Instant::now() + Duration::from_secs(5);
        while device.lock().unwrap().written.len() < 2 || publisher.payloads_for("s/out").is_empty() {
            assert!(Instant::now() < deadline, "scenario timed out");
            std::thread::sleep(Duration::from_millis(5));
        }
        shutdown.store(true, Ordering::SeqCst);
        assert_eq!(worker.join().unwrap(), RelayExit::Stopped);

        assert_eq!(device.lock().unwrap().written, vec![0x01, 0x02]);
        assert_eq!(publisher.payloads_for("s/out"), vec![vec![0xAA]]);
        assert_eq!(device.lock().unwrap().opens, 1);
    }
}
