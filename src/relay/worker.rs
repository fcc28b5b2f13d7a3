// src/relay/worker.rs
//
// Outbound relay: the single owner of one route's serial port.
//
// Each iteration drains queued inbound writes, then reads whatever bytes the
// port has buffered and publishes them as one chunk to the outbound topic.
// Chunk boundaries are whatever the poll happened to see; they carry no
// meaning. A port open or read error closes the port and the relay reopens
// it after a backoff, up to `RestartPolicy::max_restarts` times in a row.
// Publish failures (bus down, request queue full) drop the chunk only.

use bytes::Bytes;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::backoff::{sleep_unless, Backoff};
use crate::bus::Publisher;
use crate::error::{BridgeError, BridgeResult};
use crate::io::serial::{PortOpener, SerialLink};
use crate::settings::RouteConfig;

/// Read timeout the relay's port is opened with
pub const READ_TIMEOUT: Duration = Duration::from_millis(50);
/// How long an idle relay waits for queued writes before polling the port again
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Bytes of each payload shown in log lines
const LOG_PREVIEW_BYTES: usize = 32;

#[derive(Debug, Clone)]
pub struct RestartPolicy {
    /// Reopen attempts allowed after consecutive failures. 0 means the first
    /// failure is final.
    pub max_restarts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Why a relay stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayExit {
    /// Shutdown was requested
    Stopped,
    /// Restart limit reached; the port is no longer relayed
    Dead { failures: u32, last_error: String },
}

pub struct OutboundRelay {
    route: RouteConfig,
    opener: Arc<dyn PortOpener>,
    publisher: Arc<dyn Publisher>,
    writes: Receiver<Bytes>,
    shutdown: Arc<AtomicBool>,
    policy: RestartPolicy,
}

impl OutboundRelay {
    pub fn new(
        route: RouteConfig,
        opener: Arc<dyn PortOpener>,
        publisher: Arc<dyn Publisher>,
        writes: Receiver<Bytes>,
        shutdown: Arc<AtomicBool>,
        policy: RestartPolicy,
    ) -> Self {
        Self {
            route,
            opener,
            publisher,
            writes,
            shutdown,
            policy,
        }
    }

    /// Run the relay on the blocking thread pool.
    pub fn spawn(self) -> JoinHandle<RelayExit> {
        tokio::task::spawn_blocking(move || self.run())
    }

    /// Supervised loop: open, pump until error, back off, reopen.
    pub fn run(self) -> RelayExit {
        let port = self.route.port.clone();
        let mut backoff = Backoff::new(self.policy.initial_backoff, self.policy.max_backoff);
        let mut failures: u32 = 0;

        loop {
            if self.stopped() {
                return RelayExit::Stopped;
            }

            let result = match self.opener.open(&self.route, READ_TIMEOUT) {
                Ok(mut link) => {
                    tlog!(
                        "[relay:{}] Opened at {} baud ({}), publishing to '{}'",
                        port,
                        self.route.baud_rate,
                        self.route.line_summary(),
                        self.route.outbound_topic
                    );
                    let mut transferred = false;
                    let result = self.pump(link.as_mut(), &mut transferred);
                    if transferred {
                        failures = 0;
                        backoff.reset();
                    }
                    result
                    // link dropped here, closing the port
                }
                Err(e) => Err(e),
            };

            let error = match result {
                Ok(()) => {
                    tlog!("[relay:{}] Stopped", port);
                    return RelayExit::Stopped;
                }
                Err(e) => e,
            };

            failures += 1;
            tlog!(error: "[relay:{}] {}", port, error);
            if failures > self.policy.max_restarts {
                tlog!(
                    error: "[relay:{}] Giving up after {} consecutive failures; port is no longer relayed",
                    port,
                    failures
                );
                return RelayExit::Dead {
                    failures,
                    last_error: error.to_string(),
                };
            }

            let delay = backoff.next_delay();
            tlog!(
                warn: "[relay:{}] Reopening in {:?} (restart {}/{})",
                port,
                delay,
                failures,
                self.policy.max_restarts
            );
            if !sleep_unless(delay, || self.stopped()) {
                return RelayExit::Stopped;
            }
        }
    }

    /// Relay until shutdown (Ok) or a port error (Err).
    fn pump(&self, link: &mut dyn SerialLink, transferred: &mut bool) -> BridgeResult<()> {
        // Chunks dropped since the last successful publish
        let mut dropped: u64 = 0;

        loop {
            if self.stopped() {
                return Ok(());
            }

            // Process pending writes (non-blocking)
            while let Ok(payload) = self.writes.try_recv() {
                self.write_payload(link, &payload, transferred);
            }

            let available = link
                .bytes_to_read()
                .map_err(|e| BridgeError::port_io(&self.route.port, e))?;

            if available > 0 {
                let chunk = self.read_chunk(link, available as usize)?;
                if chunk.is_empty() {
                    continue;
                }
                *transferred = true;
                let len = chunk.len();
                let shown = preview(&chunk);
                match self.publisher.publish(&self.route.outbound_topic, chunk) {
                    Ok(()) => {
                        if dropped > 0 {
                            tlog!(
                                "[relay:{}] Publishing again after dropping {} chunk(s)",
                                self.route.port,
                                dropped
                            );
                            dropped = 0;
                        }
                        tlog!(
                            "[relay:{}] {} bytes -> '{}': {}",
                            self.route.port,
                            len,
                            self.route.outbound_topic,
                            shown
                        );
                    }
                    Err(e) => {
                        if dropped == 0 {
                            tlog!(warn: "[relay:{}] {}; dropping chunks until the bus recovers", self.route.port, e);
                        }
                        dropped += 1;
                    }
                }
            } else {
                // Idle: wait for an inbound write or the next poll
                match self.writes.recv_timeout(POLL_INTERVAL) {
                    Ok(payload) => self.write_payload(link, &payload, transferred),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => std::thread::sleep(POLL_INTERVAL),
                }
            }
        }
    }

    fn read_chunk(&self, link: &mut dyn SerialLink, available: usize) -> BridgeResult<Vec<u8>> {
        let mut chunk = vec![0u8; available];
        match link.read(&mut chunk) {
            Ok(0) => Err(BridgeError::port_io(
                &self.route.port,
                std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "port disconnected"),
            )),
            Ok(n) => {
                chunk.truncate(n);
                Ok(chunk)
            }
            // Timeout is expected for serial reads
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) => Err(BridgeError::port_io(&self.route.port, e)),
        }
    }

    /// Write one inbound payload. Failures drop the payload and are only logged.
    fn write_payload(&self, link: &mut dyn SerialLink, payload: &[u8], transferred: &mut bool) {
        match link.write_all(payload).and_then(|_| link.flush()) {
            Ok(()) => {
                *transferred = true;
                tlog!(
                    "[relay:{}] '{}' -> {} bytes written: {}",
                    self.route.port,
                    self.route.inbound_topic,
                    payload.len(),
                    preview(payload)
                );
            }
            Err(e) => {
                let error = BridgeError::Write {
                    port: self.route.port.clone(),
                    reason: e.to_string(),
                };
                tlog!(error: "[relay:{}] {}; message dropped", self.route.port, error);
            }
        }
    }

    fn stopped(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

/// Hex preview of a payload for log lines
fn preview(payload: &[u8]) -> String {
    if payload.len() > LOG_PREVIEW_BYTES {
        format!(
            "{}... (+{} bytes)",
            hex::encode(&payload[..LOG_PREVIEW_BYTES]),
            payload.len() - LOG_PREVIEW_BYTES
        )
    } else {
        hex::encode(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::testing::RecordingPublisher;
    use crate::io::serial::port::testing::FakeOpener;
    use std::sync::mpsc::sync_channel;
    use std::time::Instant;

    fn wait_until(what: &str, cond: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out waiting for {}", what);
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn quick_policy(max_restarts: u32) -> RestartPolicy {
        RestartPolicy {
            max_restarts,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
        }
    }

    struct Harness {
        opener: FakeOpener,
        publisher: Arc<RecordingPublisher>,
        shutdown: Arc<AtomicBool>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                opener: FakeOpener::default(),
                publisher: Arc::new(RecordingPublisher::default()),
                shutdown: Arc::new(AtomicBool::new(false)),
            }
        }

        fn relay(&self, route: RouteConfig, writes: Receiver<Bytes>, policy: RestartPolicy) -> OutboundRelay {
            OutboundRelay::new(
                route,
                Arc::new(self.opener.clone()),
                self.publisher.clone(),
                writes,
                self.shutdown.clone(),
                policy,
            )
        }
    }

    #[test]
    fn test_chunks_published_in_read_order() {
        let h = Harness::new();
        let device = h.opener.with_device("P1");
        {
            let mut dev = device.lock().unwrap();
            dev.incoming.push_back(vec![0xAA]);
            dev.incoming.push_back(vec![0x01, 0x02, 0x03]);
            dev.incoming.push_back(vec![0x04]);
        }
        let (_tx, rx) = sync_channel(8);
        let relay = h.relay(RouteConfig::new("P1", 9600, "s/out", "s/in"), rx, quick_policy(0));
        let worker = std::thread::spawn(move || relay.run());

        wait_until("three chunks", || h.publisher.payloads_for("s/out").len() == 3);
        h.shutdown.store(true, Ordering::SeqCst);
        assert_eq!(worker.join().unwrap(), RelayExit::Stopped);

        let chunks = h.publisher.payloads_for("s/out");
        assert_eq!(chunks[0], vec![0xAA]);
        assert_eq!(chunks.concat(), vec![0xAA, 0x01, 0x02, 0x03, 0x04]);
        assert_eq!(device.lock().unwrap().opens, 1);
    }

    #[test]
    fn test_queued_writes_written_in_order() {
        let h = Harness::new();
        let device = h.opener.with_device("P1");
        let (tx, rx) = sync_channel(8);
        tx.send(Bytes::from_static(b"one")).unwrap();
        tx.send(Bytes::from_static(b"two")).unwrap();

        let relay = h.relay(RouteConfig::new("P1", 9600, "s/out", "s/in"), rx, quick_policy(0));
        let worker = std::thread::spawn(move || relay.run());

        tx.send(Bytes::from_static(&[0x01, 0x02])).unwrap();
        wait_until("writes", || device.lock().unwrap().written.len() == 8);
        h.shutdown.store(true, Ordering::SeqCst);
        assert_eq!(worker.join().unwrap(), RelayExit::Stopped);

        assert_eq!(device.lock().unwrap().written, b"onetwo\x01\x02".to_vec());
        assert!(h.publisher.published.lock().unwrap().is_empty());
    }

    #[test]
    fn test_open_failure_without_restarts_is_final() {
        let h = Harness::new();
        let (_tx, rx) = sync_channel(8);
        let relay = h.relay(RouteConfig::new("missing", 9600, "s/out", "s/in"), rx, quick_policy(0));

        match relay.run() {
            RelayExit::Dead { failures, last_error } => {
                assert_eq!(failures, 1);
                assert!(last_error.contains("missing"));
            }
            other => panic!("expected dead relay, got {:?}", other),
        }
    }

    #[test]
    fn test_read_error_restarts_then_gives_up() {
        let h = Harness::new();
        let device = h.opener.with_device("P1");
        device.lock().unwrap().fail_reads = true;
        let (_tx, rx) = sync_channel(8);
        let relay = h.relay(RouteConfig::new("P1", 9600, "s/out", "s/in"), rx, quick_policy(2));

        assert!(matches!(relay.run(), RelayExit::Dead { failures: 3, .. }));
        assert_eq!(device.lock().unwrap().opens, 3);
    }

    #[test]
    fn test_publish_failures_drop_chunks_without_restarting() {
        let h = Harness::new();
        let device = h.opener.with_device("P1");
        {
            let mut dev = device.lock().unwrap();
            for i in 0..500u32 {
                dev.incoming.push_back(vec![i as u8]);
            }
        }
        // Bus unavailable: every publish is rejected
        h.publisher.fail.store(true, Ordering::SeqCst);
        let (_tx, rx) = sync_channel(8);
        let relay = h.relay(RouteConfig::new("P1", 9600, "s/out", "s/in"), rx, quick_policy(0));
        let worker = std::thread::spawn(move || relay.run());

        wait_until("all chunks read", || device.lock().unwrap().incoming.is_empty());
        assert!(!worker.is_finished());

        h.publisher.fail.store(false, Ordering::SeqCst);
        device.lock().unwrap().incoming.push_back(vec![0x55]);
        wait_until("publish after recovery", || {
            h.publisher.payloads_for("s/out").last() == Some(&vec![0x55])
        });
        h.shutdown.store(true, Ordering::SeqCst);
        assert_eq!(worker.join().unwrap(), RelayExit::Stopped);

        // At most the chunk in flight when the bus recovered, then the new one
        assert!(h.publisher.payloads_for("s/out").len() <= 2);
        assert_eq!(device.lock().unwrap().opens, 1);
    }

    #[test]
    fn test_write_failure_drops_message_but_keeps_reading() {
        let h = Harness::new();
        let device = h.opener.with_device("P1");
        device.lock().unwrap().fail_writes = true;
        let (tx, rx) = sync_channel(8);
        tx.send(Bytes::from_static(b"lost")).unwrap();

        let relay = h.relay(RouteConfig::new("P1", 9600, "s/out", "s/in"), rx, quick_policy(0));
        let worker = std::thread::spawn(move || relay.run());

        device.lock().unwrap().incoming.push_back(vec![0x42]);
        wait_until("chunk after failed write", || {
            h.publisher.payloads_for("s/out") == vec![vec![0x42]]
        });
        h.shutdown.store(true, Ordering::SeqCst);
        assert_eq!(worker.join().unwrap(), RelayExit::Stopped);
        assert!(device.lock().unwrap().written.is_empty());
    }

    #[test]
    fn test_shutdown_during_backoff() {
        let h = Harness::new();
        let (_tx, rx) = sync_channel(8);
        let policy = RestartPolicy {
            max_restarts: 10,
            initial_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(30),
        };
        let relay = h.relay(RouteConfig::new("missing", 9600, "s/out", "s/in"), rx, policy);
        let worker = std::thread::spawn(move || relay.run());

        std::thread::sleep(Duration::from_millis(50));
        let start = Instant::now();
        h.shutdown.store(true, Ordering::SeqCst);
        assert_eq!(worker.join().unwrap(), RelayExit::Stopped);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_preview_truncates() {
        assert_eq!(preview(&[0x01, 0xab]), "01ab");
        let long = vec![0u8; 40];
        assert!(preview(&long).ends_with("... (+8 bytes)"));
    }
}
