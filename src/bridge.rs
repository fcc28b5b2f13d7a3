// src/bridge.rs
//
// Bridge supervisor: wires the route table, MQTT session, inbound router and
// one outbound relay per route together, and owns the process lifetime.
//
// Startup: build table -> create write queues -> register handlers ->
// connect -> start relays -> wait for the shutdown signal.
// Shutdown: stop relays (bounded wait) -> disconnect the session.

use std::future::Future;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use crate::bus::{BusSession, Publisher, SessionOptions};
use crate::error::BridgeResult;
use crate::io::serial::{PortOpener, SystemPortOpener};
use crate::relay::{write_queue, InboundRouter, OutboundRelay, RelayExit, RestartPolicy};
use crate::routes::RouteTable;
use crate::settings::{BusConfig, RouteConfig};

#[derive(Debug, Clone)]
pub struct BridgeOptions {
    pub config_dir: PathBuf,
    pub log_dir: PathBuf,
    pub session: SessionOptions,
    pub restart: RestartPolicy,
    /// How long shutdown waits for relays before disconnecting anyway
    pub shutdown_grace: Duration,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from("config"),
            log_dir: PathBuf::from("log"),
            session: SessionOptions::default(),
            restart: RestartPolicy::default(),
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

pub struct Bridge {
    bus: BusConfig,
    table: Arc<RouteTable>,
    options: BridgeOptions,
    opener: Arc<dyn PortOpener>,
}

impl Bridge {
    /// Validate the configuration. Fails on duplicate ports or blank topics.
    pub fn new(bus: BusConfig, routes: Vec<RouteConfig>, options: BridgeOptions) -> BridgeResult<Self> {
        let bus = bus.validate()?;
        let table = RouteTable::build(routes)?;
        Ok(Self {
            bus,
            table: Arc::new(table),
            options,
            opener: Arc::new(SystemPortOpener),
        })
    }

    /// Use a different way of opening ports (tests use in-memory ports).
    pub fn with_opener(mut self, opener: Arc<dyn PortOpener>) -> Self {
        self.opener = opener;
        self
    }

    /// Run until `shutdown` completes. Returns early with an error only when
    /// the first connection to the broker fails.
    pub async fn run<S>(self, shutdown: S) -> BridgeResult<()>
    where
        S: Future<Output = ()>,
    {
        let Bridge {
            bus,
            table,
            options,
            opener,
        } = self;

        tlog!("[bridge] {} route(s) configured", table.len());
        for route in table.all() {
            tlog!(
                "[bridge] {} @ {} baud: '{}' -> port -> '{}'",
                route.port,
                route.baud_rate,
                route.inbound_topic,
                route.outbound_topic
            );
        }

        // Queues exist before connecting so messages that arrive ahead of the
        // relays are held rather than dropped.
        let mut router = InboundRouter::new(table.clone(), opener.clone());
        let mut pending = Vec::with_capacity(table.len());
        for route in table.all() {
            let (tx, rx) = write_queue();
            router.attach_queue(&route.port, tx);
            pending.push((route.clone(), rx));
        }
        let router = Arc::new(router);

        let mut session = BusSession::new(&bus, &options.session)?;
        let subscriptions = table.clone();
        session.on_connected(move |client| {
            let topics = subscriptions.inbound_topics();
            client.subscribe_all(&topics)?;
            for topic in &topics {
                tlog!("[mqtt] Subscribed to '{}'", topic);
            }
            Ok(())
        });
        let inbound = router.clone();
        session.on_message(move |topic, payload| {
            inbound.dispatch(topic, payload);
        });

        tokio::pin!(shutdown);
        let handle = tokio::select! {
            result = session.connect() => result?,
            _ = &mut shutdown => {
                tlog!("[bridge] Shutdown requested before the broker connection was made");
                return Ok(());
            }
        };

        let stop = Arc::new(AtomicBool::new(false));
        let publisher: Arc<dyn Publisher> = Arc::new(handle.client());
        let relays: Vec<_> = pending
            .into_iter()
            .map(|(route, rx)| {
                let port = route.port.clone();
                let relay = OutboundRelay::new(
                    route,
                    opener.clone(),
                    publisher.clone(),
                    rx,
                    stop.clone(),
                    options.restart.clone(),
                );
                (port, relay.spawn())
            })
            .collect();
        tlog!("[bridge] Running with {} relay(s)", relays.len());

        shutdown.await;
        tlog!("[bridge] Shutting down");
        stop.store(true, Ordering::Relaxed);

        let join_relays = async {
            for (port, task) in relays {
                match task.await {
                    Ok(RelayExit::Stopped) => {}
                    Ok(RelayExit::Dead { failures, .. }) => {
                        tlog!("[bridge] Relay for {} had stopped after {} failures", port, failures);
                    }
                    Err(e) => tlog!(error: "[bridge] Relay for {} panicked: {:?}", port, e),
                }
            }
        };
        if tokio::time::timeout(options.shutdown_grace, join_relays).await.is_err() {
            tlog!(
                warn: "[bridge] Relays still busy after {:?}; disconnecting anyway",
                options.shutdown_grace
            );
        }

        handle.disconnect().await;
        tlog!("[bridge] Stopped");
        Ok(())
    }
}

/// Resolves on Ctrl+C, or SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tlog!(error: "[bridge] Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tlog!(error: "[bridge] Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
