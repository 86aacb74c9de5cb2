//! Public state facade: a thin handle over the background connection
//! manager task. Consumers read published snapshots and issue imperative
//! controls; they never touch the canonical state directly.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::LiveTimingConfig;
use crate::model::StateSnapshot;
use crate::session::manager::ConnectionManager;
use crate::session::negotiation::{NegotiationBackend, ReqwestNegotiationBackend};
use crate::session::socket::{SocketConnector, TungsteniteConnector};
use crate::session::{Command, NegotiationError};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to build http client: {0}")]
    Http(#[from] NegotiationError),
}

/// Handle to a running live-timing client.
///
/// Created via [`LiveTimingClient::start`], which spawns the connection
/// manager task and begins negotiating immediately. Control methods queue a
/// command and return; the manager applies them in order.
pub struct LiveTimingClient {
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<StateSnapshot>,
    task: Option<JoinHandle<()>>,
}

impl LiveTimingClient {
    /// Start against the production feed endpoints in `config`.
    pub fn start(config: LiveTimingConfig) -> Result<Self, ClientError> {
        let negotiation = Arc::new(ReqwestNegotiationBackend::new()?);
        let connector = Arc::new(TungsteniteConnector::new(config.user_agent.clone()));
        Ok(Self::start_with_backends(config, negotiation, connector))
    }

    /// Start with explicit negotiation and socket backends. This is the seam
    /// scenario tests use to script the upstream.
    pub fn start_with_backends(
        config: LiveTimingConfig,
        negotiation: Arc<dyn NegotiationBackend>,
        connector: Arc<dyn SocketConnector>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(StateSnapshot::default());
        let manager =
            ConnectionManager::new(config, negotiation, connector, command_rx, snapshot_tx);
        let task = tokio::spawn(manager.run());
        Self {
            commands: command_tx,
            snapshots: snapshot_rx,
            task: Some(task),
        }
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> StateSnapshot {
        self.snapshots.borrow().clone()
    }

    /// A receiver that observes every subsequent snapshot publication.
    pub fn subscribe(&self) -> watch::Receiver<StateSnapshot> {
        self.snapshots.clone()
    }

    /// Tear down the current connection (if any) and negotiate afresh.
    pub fn reconnect(&self) {
        self.send(Command::Reconnect);
    }

    /// Switch to the synthetic fallback session. The live socket, if one
    /// exists, is closed and detached before the switch.
    pub fn start_fallback(&self) {
        self.send(Command::StartFallback);
    }

    /// Leave fallback mode and go idle. Call [`reconnect`](Self::reconnect)
    /// afterwards to resume the live feed.
    pub fn stop_fallback(&self) {
        self.send(Command::StopFallback);
    }

    /// Stop the manager task and wait for it to finish.
    pub async fn shutdown(mut self) {
        self.send(Command::Shutdown);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    fn send(&self, command: Command) {
        // A send failure means the manager already stopped; nothing to do.
        let _ = self.commands.send(command);
    }
}

impl Drop for LiveTimingClient {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
