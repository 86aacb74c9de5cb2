//! Connection manager: owns the socket lifecycle state machine, the
//! no-data watchdog, reconnect backoff, and the switch into and out of
//! fallback mode.
//!
//! The manager runs as a single task that exclusively owns the socket, the
//! timers and the canonical [`RaceState`]. Mode switches close and drop the
//! socket before the phase changes, so a superseded socket's events can
//! never reach state belonging to the new mode.

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::negotiation::{negotiate, NegotiatedSession, NegotiationBackend};
use super::socket::SocketConnector;
use super::{Command, ConnectionPhase};
use crate::config::LiveTimingConfig;
use crate::fallback::FallbackSession;
use crate::model::StateSnapshot;
use crate::protocol::{route, subscribe_frame, FrameDemux, Liveness};
use crate::state::RaceState;

/// Transient status shown while a connection attempt is in flight.
pub const STATUS_CONNECTING: &str = "Connecting…";
/// Status shown after an unexpected transport close, until the next attempt.
pub const STATUS_CLOSED: &str = "Connection closed";

pub(crate) struct ConnectionManager {
    config: LiveTimingConfig,
    negotiation: Arc<dyn NegotiationBackend>,
    connector: Arc<dyn SocketConnector>,
    commands: mpsc::UnboundedReceiver<Command>,
    publisher: watch::Sender<StateSnapshot>,
    state: RaceState,
    phase: ConnectionPhase,
    pending: Option<NegotiatedSession>,
    fallback: Option<FallbackSession>,
    /// Set when the current reconnect cycle came from a silent-session
    /// watchdog rather than a transport failure.
    silent_cycle: bool,
}

impl ConnectionManager {
    pub(crate) fn new(
        config: LiveTimingConfig,
        negotiation: Arc<dyn NegotiationBackend>,
        connector: Arc<dyn SocketConnector>,
        commands: mpsc::UnboundedReceiver<Command>,
        publisher: watch::Sender<StateSnapshot>,
    ) -> Self {
        Self {
            config,
            negotiation,
            connector,
            commands,
            publisher,
            state: RaceState::new(),
            phase: ConnectionPhase::Idle,
            pending: None,
            fallback: None,
            silent_cycle: false,
        }
    }

    /// Drive the state machine until shutdown. Negotiation starts
    /// immediately; `Idle` is only re-entered by leaving fallback.
    pub(crate) async fn run(mut self) {
        self.set_phase(ConnectionPhase::Negotiating);
        loop {
            let proceed = match self.phase {
                ConnectionPhase::Idle | ConnectionPhase::Closed => self.idle().await,
                ConnectionPhase::Negotiating => {
                    self.negotiate_once().await;
                    true
                }
                ConnectionPhase::Opening
                | ConnectionPhase::Subscribing
                | ConnectionPhase::Streaming => self.run_live().await,
                ConnectionPhase::Reconnecting => self.backoff().await,
                ConnectionPhase::Fallback => self.run_fallback().await,
            };
            if !proceed {
                break;
            }
        }
        debug!(target = "pitwall::session", "connection manager stopped");
    }

    async fn idle(&mut self) -> bool {
        let command = self.commands.recv().await;
        self.apply_command(command)
    }

    async fn negotiate_once(&mut self) {
        match negotiate(self.negotiation.as_ref(), &self.config).await {
            Ok(session) => {
                self.pending = Some(session);
                self.set_phase(ConnectionPhase::Opening);
            }
            Err(err) => {
                warn!(target = "pitwall::session", error = %err, "negotiation failed");
                self.state.is_connected = false;
                self.state.error = Some(STATUS_CONNECTING.to_string());
                self.publish();
                self.silent_cycle = false;
                self.set_phase(ConnectionPhase::Reconnecting);
            }
        }
    }

    /// Open the socket, send the subscription, and stream until something
    /// ends this connection.
    async fn run_live(&mut self) -> bool {
        let Some(session) = self.pending.take() else {
            self.set_phase(ConnectionPhase::Negotiating);
            return true;
        };
        self.set_phase(ConnectionPhase::Opening);

        let mut socket = match self
            .connector
            .connect(&session.socket_url, session.cookie.as_deref())
            .await
        {
            Ok(socket) => socket,
            Err(err) => {
                warn!(target = "pitwall::session", error = %err, "socket open failed");
                self.state.is_connected = false;
                self.state.error = Some(STATUS_CONNECTING.to_string());
                self.publish();
                self.silent_cycle = false;
                self.set_phase(ConnectionPhase::Reconnecting);
                return true;
            }
        };

        let subscription = subscribe_frame(&self.config.topics);
        if let Err(err) = socket.send_text(&subscription).await {
            warn!(target = "pitwall::session", error = %err, "subscription send failed");
            socket.close().await;
            self.on_socket_lost();
            return true;
        }
        self.set_phase(ConnectionPhase::Subscribing);
        self.state.is_connected = true;
        self.state.error = None;
        self.publish();

        let mut demux = FrameDemux::new();
        let grace = sleep(self.config.subscribe_grace);
        tokio::pin!(grace);
        let watchdog = sleep(self.config.watchdog_timeout);
        tokio::pin!(watchdog);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    None | Some(Command::Shutdown) => {
                        socket.close().await;
                        return false;
                    }
                    Some(Command::StartFallback) => {
                        // Ordering invariant: the live socket is closed and
                        // dropped before fallback state exists, so a late
                        // close or error from it cannot touch the new mode.
                        socket.close().await;
                        drop(socket);
                        self.enter_fallback();
                        return true;
                    }
                    Some(Command::StopFallback) => {}
                    Some(Command::Reconnect) => {
                        socket.close().await;
                        self.state.clear();
                        self.state.is_connected = false;
                        self.state.error = Some(STATUS_CONNECTING.to_string());
                        self.publish();
                        self.set_phase(ConnectionPhase::Negotiating);
                        return true;
                    }
                },
                chunk = socket.next_chunk() => match chunk {
                    Some(Ok(text)) => {
                        let frames = demux.push(&text);
                        if !frames.is_empty() && self.phase == ConnectionPhase::Subscribing {
                            self.set_phase(ConnectionPhase::Streaming);
                        }
                        let mut advanced = false;
                        for frame in &frames {
                            let routed = route(frame);
                            if routed.liveness != Liveness::Silent {
                                self.state.is_connected = true;
                                self.state.error = None;
                            }
                            if !routed.updates.is_empty() {
                                advanced = true;
                            }
                            for (topic, payload) in &routed.updates {
                                self.state.apply(topic, payload);
                            }
                        }
                        if advanced {
                            watchdog
                                .as_mut()
                                .reset(Instant::now() + self.config.watchdog_timeout);
                        }
                        if !frames.is_empty() {
                            self.publish();
                        }
                    }
                    Some(Err(err)) => {
                        warn!(target = "pitwall::session", error = %err, "socket error");
                        socket.close().await;
                        self.on_socket_lost();
                        return true;
                    }
                    None => {
                        debug!(target = "pitwall::session", "socket closed by peer");
                        self.on_socket_lost();
                        return true;
                    }
                },
                _ = &mut grace, if self.phase == ConnectionPhase::Subscribing => {
                    self.set_phase(ConnectionPhase::Streaming);
                }
                _ = &mut watchdog, if self.phase == ConnectionPhase::Streaming => {
                    // A silent stream is the expected shape of "no race
                    // happening right now", not a failure. The socket itself
                    // was healthy, so connectivity stays asserted while a
                    // fresh negotiation is scheduled.
                    info!(target = "pitwall::session", "no data within watchdog window");
                    socket.close().await;
                    self.state.clear();
                    self.state.error = None;
                    self.publish();
                    self.silent_cycle = true;
                    self.set_phase(ConnectionPhase::Reconnecting);
                    return true;
                }
            }
        }
    }

    /// Unexpected transport loss: clear session state and schedule a
    /// reconnect after the fixed backoff.
    fn on_socket_lost(&mut self) {
        self.set_phase(ConnectionPhase::Closed);
        self.state.clear();
        self.state.is_connected = false;
        self.state.error = Some(STATUS_CLOSED.to_string());
        self.publish();
        self.silent_cycle = false;
        self.set_phase(ConnectionPhase::Reconnecting);
    }

    async fn backoff(&mut self) -> bool {
        let delay = sleep(self.config.reconnect_backoff);
        tokio::pin!(delay);
        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    if !self.apply_command(command) {
                        return false;
                    }
                    if self.phase != ConnectionPhase::Reconnecting {
                        return true;
                    }
                }
                _ = &mut delay => {
                    self.silent_cycle = false;
                    self.set_phase(ConnectionPhase::Negotiating);
                    return true;
                }
            }
        }
    }

    async fn run_fallback(&mut self) -> bool {
        let mut session = self.fallback.take().unwrap_or_default();
        let mut ticker = tokio::time::interval(self.config.fallback_tick);
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    None | Some(Command::Shutdown) => return false,
                    Some(Command::StopFallback) => {
                        // The simulator and its ticker drop right here;
                        // nothing keeps mutating after the switch.
                        self.state.clear();
                        self.state.is_connected = false;
                        self.state.error = None;
                        self.set_phase(ConnectionPhase::Idle);
                        self.publish();
                        return true;
                    }
                    Some(Command::StartFallback) => {}
                    Some(Command::Reconnect) => {
                        debug!(
                            target = "pitwall::session",
                            "ignoring reconnect while fallback engaged"
                        );
                    }
                },
                _ = ticker.tick() => {
                    session.tick();
                    self.publisher.send_replace(session.snapshot());
                }
            }
        }
    }

    /// Returns false on shutdown.
    fn apply_command(&mut self, command: Option<Command>) -> bool {
        match command {
            None | Some(Command::Shutdown) => false,
            Some(Command::Reconnect) => {
                if self.phase != ConnectionPhase::Fallback {
                    self.set_phase(ConnectionPhase::Negotiating);
                }
                true
            }
            Some(Command::StartFallback) => {
                self.enter_fallback();
                true
            }
            Some(Command::StopFallback) => {
                if self.phase == ConnectionPhase::Fallback {
                    self.state.clear();
                    self.state.is_connected = false;
                    self.state.error = None;
                    self.set_phase(ConnectionPhase::Idle);
                    self.publish();
                }
                true
            }
        }
    }

    fn enter_fallback(&mut self) {
        self.pending = None;
        self.state.clear();
        self.state.is_connected = false;
        self.state.error = None;
        self.fallback = Some(FallbackSession::new());
        self.set_phase(ConnectionPhase::Fallback);
    }

    fn publish(&self) {
        self.publisher
            .send_replace(self.state.snapshot(self.phase == ConnectionPhase::Fallback));
    }

    fn set_phase(&mut self, phase: ConnectionPhase) {
        if self.phase != phase {
            debug!(
                target = "pitwall::session",
                from = ?self.phase,
                to = ?phase,
                silent = self.silent_cycle,
                "phase transition"
            );
            self.phase = phase;
        }
    }
}
