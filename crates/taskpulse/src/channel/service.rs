//! Channel service: owns the socket lifecycle and exposes the tracking API.
//!
//! One spawned driver task owns the connection. It dials, pumps frames
//! through the router, and on any unrequested close schedules exactly one
//! reconnect attempt after a fixed delay. [`TaskChannel::disconnect`] and
//! [`TaskChannel::shutdown`] are the only ways to stop that cycle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_util::sync::CancellationToken;

use taskpulse_protocol::ClientCommand;

use crate::channel::history::{HistoryEntry, HistoryLog};
use crate::channel::registry::{TaskRecord, TaskRegistry};
use crate::channel::router::EventRouter;
use crate::channel::transport::{self, ConnectionState, WsReader, WsSink};
use crate::config::ChannelConfig;
use crate::error::ChannelResult;
use crate::notify::{Notice, Notifier};

/// Bound on queued outbound commands per connection. Subscription traffic is
/// tiny; a full queue means the socket has stalled and the command is dropped.
const OUTBOUND_BUFFER: usize = 64;

/// Notice summary for connection-level events.
const CHANNEL_SUMMARY: &str = "Task tracking";

/// Why an established connection stopped.
enum CloseReason {
    /// The session token was cancelled by `disconnect` or `shutdown`.
    Cancelled,
    /// The server closed the socket (with the close frame it sent, if any)
    /// or the stream ended.
    ClosedByPeer(Option<CloseFrame>),
    /// The stream failed mid-flight.
    Failed(tokio_tungstenite::tungstenite::Error),
}

struct ConnHandle {
    session: CancellationToken,
    driver: JoinHandle<()>,
}

/// Outbound sender of one live connection, tagged with the driver that owns
/// it so a replaced driver's cleanup cannot wipe its successor's sender.
struct OutboundSlot {
    owner: u64,
    tx: mpsc::Sender<String>,
}

struct ChannelShared {
    url: String,
    reconnect_delay: Duration,
    registry: TaskRegistry,
    history: HistoryLog,
    router: EventRouter,
    notifier: Arc<dyn Notifier>,
    state_tx: watch::Sender<ConnectionState>,
    /// Sender for the currently open connection, if any. Cleared as soon as
    /// the connection drops so commands cannot queue against a dead socket.
    outbound: Mutex<Option<OutboundSlot>>,
    /// Driver ids, one per `connect`.
    driver_seq: AtomicU64,
}

/// Live task-tracking channel over one WebSocket connection.
///
/// Construct per scope, call [`connect`](Self::connect) once, and hand clones
/// of the data you read off it to the UI. All state mutation happens on the
/// driver task; every accessor returns a snapshot.
pub struct TaskChannel {
    shared: Arc<ChannelShared>,
    conn: Mutex<Option<ConnHandle>>,
    teardown: CancellationToken,
}

impl TaskChannel {
    /// Build a channel for the given server. Fails if the configured origin
    /// is not an http(s) URL. No connection is made until `connect`.
    pub fn new(config: ChannelConfig, notifier: Arc<dyn Notifier>) -> ChannelResult<Self> {
        let url = transport::endpoint_url(&config.origin, &config.channel_path)?;
        let registry = TaskRegistry::new();
        let history = HistoryLog::new(config.history_limit);
        let teardown = CancellationToken::new();
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let router = EventRouter::new(
            registry.clone(),
            history.clone(),
            notifier.clone(),
            config.completed_retention,
            config.failed_retention,
            teardown.clone(),
        );
        let shared = Arc::new(ChannelShared {
            url,
            reconnect_delay: config.reconnect_delay,
            registry,
            history,
            router,
            notifier,
            state_tx,
            outbound: Mutex::new(None),
            driver_seq: AtomicU64::new(0),
        });
        Ok(Self {
            shared,
            conn: Mutex::new(None),
            teardown,
        })
    }

    /// Start the connection driver. A no-op while a driver is already
    /// running, whether it is connected, dialling, or waiting out the
    /// reconnect delay. Must be called from within a tokio runtime.
    pub fn connect(&self) {
        let mut conn = lock(&self.conn);
        if let Some(handle) = conn.as_ref() {
            if !handle.driver.is_finished() {
                debug!("connect requested while channel is already active");
                return;
            }
        }
        let session = self.teardown.child_token();
        let driver_id = self.shared.driver_seq.fetch_add(1, Ordering::Relaxed);
        let driver = tokio::spawn(self.shared.clone().drive(session.clone(), driver_id));
        *conn = Some(ConnHandle { session, driver });
    }

    /// Stop the driver and suppress any pending reconnect. The state flips
    /// to disconnected immediately; the driver exits on its own.
    pub fn disconnect(&self) {
        let handle = lock(&self.conn).take();
        if let Some(handle) = handle {
            handle.session.cancel();
            self.shared.set_state(ConnectionState::Disconnected);
            info!("task channel disconnect requested");
        }
    }

    /// Disconnect and wait for the driver task to finish. Also cancels every
    /// pending record-removal timer.
    pub async fn shutdown(&self) {
        self.teardown.cancel();
        let handle = lock(&self.conn).take();
        if let Some(handle) = handle {
            let _ = handle.driver.await;
        }
        self.shared.set_state(ConnectionState::Disconnected);
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    /// Watch connection state transitions.
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    /// Snapshot of every tracked task.
    pub fn active_tasks(&self) -> Vec<TaskRecord> {
        self.shared.registry.all()
    }

    pub fn task(&self, task_id: &str) -> Option<TaskRecord> {
        self.shared.registry.get(task_id)
    }

    pub fn running_count(&self) -> usize {
        self.shared.registry.running_count()
    }

    pub fn has_active_tasks(&self) -> bool {
        self.shared.registry.has_running()
    }

    /// Archived envelopes, newest first.
    pub fn task_history(&self) -> Vec<HistoryEntry> {
        self.shared.history.snapshot()
    }

    pub fn clear_task_history(&self) {
        self.shared.history.clear();
    }

    /// Ask the server for updates about one task. Dropped silently when the
    /// channel is not connected.
    pub fn subscribe_task(&self, task_id: impl Into<String>) {
        self.send_command(&ClientCommand::subscribe(task_id));
    }

    /// Stop server updates for one task. Dropped silently when the channel
    /// is not connected.
    pub fn unsubscribe_task(&self, task_id: impl Into<String>) {
        self.send_command(&ClientCommand::unsubscribe(task_id));
    }

    fn send_command(&self, command: &ClientCommand) {
        if !self.is_connected() {
            debug!("not connected; dropping {command:?}");
            return;
        }
        let text = match serde_json::to_string(command) {
            Ok(text) => text,
            Err(err) => {
                warn!("failed to encode command: {err}");
                return;
            }
        };
        let outbound = lock(&self.shared.outbound);
        match outbound.as_ref() {
            Some(slot) => {
                if slot.tx.try_send(text).is_err() {
                    warn!("outbound queue unavailable; dropping {command:?}");
                }
            }
            None => debug!("no open connection; dropping {command:?}"),
        }
    }
}

impl Drop for TaskChannel {
    fn drop(&mut self) {
        self.teardown.cancel();
    }
}

impl ChannelShared {
    fn set_state(&self, next: ConnectionState) {
        let previous = self.state_tx.send_replace(next);
        if previous != next {
            debug!("connection state {previous} -> {next}");
        }
    }

    fn store_outbound(&self, owner: u64, tx: mpsc::Sender<String>) {
        *lock(&self.outbound) = Some(OutboundSlot { owner, tx });
    }

    /// Drop the stored sender, but only if `owner` still owns it. A driver
    /// replaced by a rapid disconnect/connect cycle finishes its teardown
    /// after the new driver has already stored a fresh sender.
    fn clear_outbound(&self, owner: u64) {
        let mut slot = lock(&self.outbound);
        if slot.as_ref().is_some_and(|s| s.owner == owner) {
            *slot = None;
        }
    }

    /// Connection driver. Runs until the session token is cancelled.
    async fn drive(self: Arc<Self>, session: CancellationToken, driver_id: u64) {
        loop {
            self.set_state(ConnectionState::Connecting);
            let dialed = tokio::select! {
                _ = session.cancelled() => {
                    self.set_state(ConnectionState::Disconnected);
                    return;
                }
                dialed = transport::open(&self.url) => dialed,
            };
            // A cancel that raced the dial wins; never surface a connection
            // after disconnect.
            if session.is_cancelled() {
                self.set_state(ConnectionState::Disconnected);
                return;
            }
            match dialed {
                Ok((sink, reader)) => {
                    let (out_tx, out_rx) = mpsc::channel(OUTBOUND_BUFFER);
                    self.store_outbound(driver_id, out_tx);
                    self.set_state(ConnectionState::Connected);
                    info!("task channel connected to {}", self.url);
                    self.notifier.notify(Notice::info(
                        CHANNEL_SUMMARY,
                        "Connected to live task updates",
                    ));

                    let reason = self.run_io(sink, reader, out_rx, &session).await;
                    self.clear_outbound(driver_id);
                    match reason {
                        CloseReason::Cancelled => {
                            self.set_state(ConnectionState::Disconnected);
                            return;
                        }
                        CloseReason::ClosedByPeer(frame) => {
                            match frame {
                                Some(frame) => warn!(
                                    "task channel closed by server: code {}, reason {:?}",
                                    frame.code, frame.reason
                                ),
                                None => warn!("task channel closed by server"),
                            }
                            self.set_state(ConnectionState::Disconnected);
                        }
                        CloseReason::Failed(err) => {
                            warn!("task channel stream error: {err}");
                            self.set_state(ConnectionState::Error);
                            self.notifier.notify(Notice::error(
                                CHANNEL_SUMMARY,
                                "Connection to live task updates failed",
                            ));
                        }
                    }
                }
                Err(err) => {
                    warn!("task channel connect failed: {err}");
                    self.set_state(ConnectionState::Error);
                    self.notifier.notify(Notice::error(
                        CHANNEL_SUMMARY,
                        "Connection to live task updates failed",
                    ));
                }
            }

            // One reconnect attempt per drop, after a fixed delay. A cancel
            // during the wait wins and ends the driver.
            tokio::select! {
                _ = session.cancelled() => {
                    self.set_state(ConnectionState::Disconnected);
                    return;
                }
                _ = tokio::time::sleep(self.reconnect_delay) => {
                    info!(
                        "reconnecting task channel after {}ms",
                        self.reconnect_delay.as_millis()
                    );
                }
            }
        }
    }

    /// Pump one established connection until it closes.
    async fn run_io(
        &self,
        mut sink: WsSink,
        mut reader: WsReader,
        mut out_rx: mpsc::Receiver<String>,
        session: &CancellationToken,
    ) -> CloseReason {
        loop {
            tokio::select! {
                _ = session.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return CloseReason::Cancelled;
                }
                outgoing = out_rx.recv() => {
                    match outgoing {
                        Some(text) => {
                            if let Err(err) = sink.send(Message::Text(text.into())).await {
                                return CloseReason::Failed(err);
                            }
                        }
                        None => return CloseReason::Cancelled,
                    }
                }
                incoming = reader.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => self.router.handle_frame(&text),
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = sink.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            return CloseReason::ClosedByPeer(frame);
                        }
                        None => return CloseReason::ClosedByPeer(None),
                        Some(Ok(_)) => {}
                        Some(Err(err)) => return CloseReason::Failed(err),
                    }
                }
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
