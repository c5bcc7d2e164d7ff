// Connection manager
//
// Owns the single STOMP session to the messaging endpoint. A driver task
// connects, hands the transport to the router, pumps inbound frames and
// reconnects after a fixed delay until `stop` is called.

use crate::router::TopicRouter;
use crate::stomp::{Command, Frame, HeartBeat, NegotiatedHeartBeat};
use crate::transport::{transport_error, Connector, TransportLink};
use clinicpulse_core::{ClinicPulseError, Credential, LiveConfig};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Disconnecting,
    Errored,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
            ConnectionState::Errored => "errored",
        }
    }

    /// Frames can flow.
    pub fn is_live(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Started, but not currently delivering; a banner-worthy condition.
    pub fn is_degraded(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Errored)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct DriverHandle {
    task: JoinHandle<()>,
    cancelled: Arc<AtomicBool>,
}

impl DriverHandle {
    fn cancel(self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.task.abort();
    }
}

pub struct ConnectionManager {
    config: LiveConfig,
    connector: Arc<dyn Connector>,
    router: Arc<TopicRouter>,
    state: Arc<watch::Sender<ConnectionState>>,
    driver: Mutex<Option<DriverHandle>>,
}

impl ConnectionManager {
    pub fn new(config: LiveConfig, connector: Arc<dyn Connector>, router: Arc<TopicRouter>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            config,
            connector,
            router,
            state: Arc::new(state),
            driver: Mutex::new(None),
        }
    }

    /// Begin connecting with `credential`. Only valid from `Idle`.
    ///
    /// Must be called within a tokio runtime.
    pub fn start(&self, credential: Credential) -> Result<(), ClinicPulseError> {
        let mut driver = self.driver.lock();
        let current = *self.state.borrow();
        if current != ConnectionState::Idle {
            return Err(ClinicPulseError::invalid_transition(current, "start"));
        }
        *driver = Some(self.spawn_driver(credential));
        Ok(())
    }

    /// Tear down every subscription and the session. Idempotent.
    ///
    /// When this returns no handler registered before the call will be
    /// invoked again.
    pub fn stop(&self) {
        let mut driver = self.driver.lock();
        let Some(handle) = driver.take() else {
            return;
        };

        handle.cancel();
        self.state.send_replace(ConnectionState::Disconnecting);

        if let Some(outbound) = self.router.clear() {
            let receipt = format!("disconnect-{}", uuid::Uuid::new_v4());
            let _ = outbound.send(Frame::disconnect(&receipt).encode());
        }

        self.state.send_replace(ConnectionState::Idle);
        tracing::info!("Live connection stopped");
    }

    /// Reconnect with a new credential, keeping every registration.
    ///
    /// Behaves like `start` when idle.
    pub fn restart(&self, credential: Credential) {
        let mut driver = self.driver.lock();
        if let Some(handle) = driver.take() {
            handle.cancel();
            self.router.detach();
            tracing::info!("Live connection restarting with a new credential");
        }
        *driver = Some(self.spawn_driver(credential));
    }

    fn spawn_driver(&self, credential: Credential) -> DriverHandle {
        self.state.send_replace(ConnectionState::Connecting);
        let cancelled = Arc::new(AtomicBool::new(false));
        let session_driver = Driver {
            config: self.config.clone(),
            connector: self.connector.clone(),
            router: self.router.clone(),
            state: self.state.clone(),
            cancelled: cancelled.clone(),
        };
        let task = tokio::spawn(session_driver.run(credential));
        DriverHandle { task, cancelled }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn router(&self) -> &Arc<TopicRouter> {
        &self.router
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(handle) = self.driver.get_mut().take() {
            handle.cancel();
        }
    }
}

// A STOMP session that completed the handshake
struct Established {
    link: TransportLink,
    heart_beat: NegotiatedHeartBeat,
}

struct Driver {
    config: LiveConfig,
    connector: Arc<dyn Connector>,
    router: Arc<TopicRouter>,
    state: Arc<watch::Sender<ConnectionState>>,
    cancelled: Arc<AtomicBool>,
}

impl Driver {
    /// Publish `next` unless `stop` already took over. Returns false once cancelled.
    fn set_state(&self, next: ConnectionState) -> bool {
        let mut applied = false;
        self.state.send_if_modified(|state| {
            if self.cancelled.load(Ordering::SeqCst) {
                return false;
            }
            applied = true;
            if *state == next {
                return false;
            }
            *state = next;
            true
        });
        applied
    }

    async fn run(self, credential: Credential) {
        let url = self.config.url();
        loop {
            if !self.set_state(ConnectionState::Connecting) {
                return;
            }
            let conn_id = uuid::Uuid::new_v4().to_string();
            tracing::debug!("Connecting to {} (conn {})", url, conn_id);

            match self.establish(&url, &credential).await {
                Ok(established) => {
                    if !self.set_state(ConnectionState::Connected) {
                        return;
                    }
                    tracing::info!("Live connection {} established to {}", conn_id, url);
                    self.router.attach(established.link.outbound.clone());
                    if self.cancelled.load(Ordering::SeqCst) {
                        self.router.detach();
                        return;
                    }

                    let reason = self.run_session(established).await;
                    self.router.detach();
                    tracing::warn!("Live connection {} lost: {}", conn_id, reason);
                }
                Err(e) => {
                    tracing::warn!("Live connection {} failed: {}", conn_id, e);
                }
            }

            if !self.set_state(ConnectionState::Errored) {
                return;
            }
            tracing::info!(
                "Reconnecting in {}ms",
                self.config.reconnect_delay().as_millis()
            );
            tokio::time::sleep(self.config.reconnect_delay()).await;
        }
    }

    async fn establish(
        &self,
        url: &str,
        credential: &Credential,
    ) -> Result<Established, ClinicPulseError> {
        let mut link = self.connector.open(url, credential).await?;

        let ours = HeartBeat::new(
            self.config.heartbeat_outgoing_ms,
            self.config.heartbeat_incoming_ms,
        );
        let connect = Frame::connect(&self.config.host(), credential, ours);
        link.outbound
            .send(connect.encode())
            .map_err(|_| transport_error(url, "socket closed before CONNECT"))?;

        let timeout = self.config.handshake_timeout();
        let connected = tokio::time::timeout(timeout, await_connected(url, &mut link.inbound))
            .await
            .map_err(|_| {
                ClinicPulseError::handshake(format!(
                    "no CONNECTED frame within {}ms",
                    timeout.as_millis()
                ))
            })??;

        let theirs = connected
            .header("heart-beat")
            .and_then(HeartBeat::parse)
            .unwrap_or_default();
        let heart_beat = HeartBeat::negotiate(ours, theirs);
        tracing::debug!(
            "STOMP session {} (server heart-beat {}, negotiated {:?})",
            connected.header("version").unwrap_or("1.0"),
            theirs,
            heart_beat
        );

        Ok(Established { link, heart_beat })
    }

    /// Pump frames until the session ends; returns why it ended.
    async fn run_session(&self, established: Established) -> String {
        let Established {
            link: TransportLink {
                outbound,
                mut inbound,
            },
            heart_beat,
        } = established;

        let mut ticker = heart_beat
            .send
            .map(|period| tokio::time::interval_at(Instant::now() + period, period));
        let mut last_seen = Instant::now();

        loop {
            // Server silent for twice its promised interval
            let deadline = heart_beat.expect.map(|expect| last_seen + expect * 2);

            tokio::select! {
                text = inbound.recv() => {
                    let Some(text) = text else {
                        return "transport closed".to_string();
                    };
                    last_seen = Instant::now();

                    match Frame::decode(&text) {
                        Ok(None) => {}
                        Ok(Some(frame)) => match frame.command {
                            Command::Message => {
                                self.router.dispatch(
                                    frame.header("destination"),
                                    frame.header("subscription"),
                                    &frame.body,
                                );
                            }
                            Command::Error => {
                                let detail = frame
                                    .header("message")
                                    .unwrap_or(frame.body.as_str())
                                    .to_string();
                                return format!("server ERROR frame: {}", detail);
                            }
                            Command::Receipt => {
                                tracing::debug!("Receipt {:?}", frame.header("receipt-id"));
                            }
                            other => {
                                tracing::debug!("Ignoring unexpected {} frame", other);
                            }
                        },
                        Err(e) => {
                            tracing::warn!("Ignoring undecodable frame: {}", e);
                        }
                    }
                }

                _ = next_tick(&mut ticker) => {
                    if outbound.send("\n".to_string()).is_err() {
                        return "transport closed".to_string();
                    }
                }

                _ = wait_until(deadline) => {
                    return "heart-beat timeout".to_string();
                }
            }
        }
    }
}

async fn await_connected(
    url: &str,
    inbound: &mut mpsc::UnboundedReceiver<String>,
) -> Result<Frame, ClinicPulseError> {
    loop {
        let Some(text) = inbound.recv().await else {
            return Err(transport_error(url, "socket closed during handshake"));
        };
        match Frame::decode(&text) {
            Ok(None) => continue,
            Ok(Some(frame)) => match frame.command {
                Command::Connected => return Ok(frame),
                Command::Error => {
                    let reason = frame
                        .header("message")
                        .unwrap_or(frame.body.as_str())
                        .to_string();
                    return Err(ClinicPulseError::handshake(reason));
                }
                other => {
                    tracing::debug!("Ignoring {} frame before CONNECTED", other);
                }
            },
            Err(e) => {
                return Err(ClinicPulseError::handshake(format!(
                    "malformed frame: {}",
                    e
                )));
            }
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
