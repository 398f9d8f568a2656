//! Command dispatcher: the single processing path of a session.
//!
//! One tokio task owns the port, the [`ProtocolStateMachine`] and the chain
//! registry inside it. Submissions arrive over an `mpsc` queue with a
//! `oneshot` for the reply; inbound lines and the machine's deadline are
//! raced against them in one `select!`. Nothing else touches the port, so at
//! most one command is ever in flight and a second submission is refused
//! with [`EngineError::Busy`] instead of queuing behind the first.
//!
//! ```text
//!  DispatcherHandle ──Request──►┐
//!  port events ────────────────►├─► worker ──write_line──► port
//!  deadline (sleep_until) ─────►┘      │
//!                                      ├─► watch<ChainStatus>
//!                                      └─► EventLog
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::codec::{self, Codec, ParsedLine};
use crate::commands::{Command, CommandKind, CommandOutcome, DeviceAddress, EngineError};
use crate::config::Config;
use crate::events::{Classification, EventLog, LineDirection};
use crate::protocol::{ChainStatus, Effect, FaultReason, ProtocolStateMachine, Resolution, SystemState};
use crate::traits::{Connection, Connector, PortEvent};

/// Transmitted lines kept for [`DispatcherHandle::history`].
pub const HISTORY_LEN: usize = 64;

const REQUEST_QUEUE: usize = 32;

type Reply<T> = oneshot::Sender<T>;

pub(crate) enum Request {
    Submit {
        command: Command,
        reply: Reply<Result<CommandOutcome, EngineError>>,
    },
    Reconnect {
        reply: Reply<Result<(), EngineError>>,
    },
    Disconnect {
        reply: Reply<()>,
    },
    History {
        reply: Reply<Vec<String>>,
    },
    Shutdown,
}

// ============================================================================
// Handle
// ============================================================================

/// Cheap, cloneable access to a running dispatcher.
#[derive(Clone, Debug)]
pub struct DispatcherHandle {
    requests: mpsc::Sender<Request>,
    status: watch::Receiver<ChainStatus>,
}

impl DispatcherHandle {
    /// Submit a command and wait for its one terminal outcome.
    pub async fn submit(&self, command: Command) -> Result<CommandOutcome, EngineError> {
        self.call(|reply| Request::Submit { command, reply }).await?
    }

    /// Close the port and reopen it through the connector, re-running discovery.
    pub async fn reconnect(&self) -> Result<(), EngineError> {
        self.call(|reply| Request::Reconnect { reply }).await?
    }

    /// Close the port. The worker stays up and can reconnect.
    pub async fn disconnect(&self) -> Result<(), EngineError> {
        self.call(|reply| Request::Disconnect { reply }).await
    }

    /// The last transmitted wire lines, oldest first.
    pub async fn history(&self) -> Result<Vec<String>, EngineError> {
        self.call(|reply| Request::History { reply }).await
    }

    /// Stop the worker. Later calls on any handle fail with `Disconnected`.
    pub async fn shutdown(&self) {
        let _ = self.requests.send(Request::Shutdown).await;
    }

    /// Latest state snapshot.
    pub fn status(&self) -> ChainStatus {
        self.status.borrow().clone()
    }

    /// Receiver that changes whenever the snapshot does.
    pub fn watch(&self) -> watch::Receiver<ChainStatus> {
        self.status.clone()
    }

    async fn call<T>(&self, request: impl FnOnce(Reply<T>) -> Request) -> Result<T, EngineError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(request(reply))
            .await
            .map_err(|_| EngineError::Disconnected)?;
        response.await.map_err(|_| EngineError::Disconnected)
    }
}

// ============================================================================
// Worker
// ============================================================================

/// Spawn the worker on an already-open connection and start discovery.
pub fn spawn(
    config: &Config,
    connector: Arc<dyn Connector>,
    connection: Connection,
    log: Arc<EventLog>,
) -> (DispatcherHandle, JoinHandle<()>) {
    let machine = ProtocolStateMachine::new(config.protocol.clone());
    let (status_tx, status_rx) = watch::channel(machine.status());
    let (requests, requests_rx) = mpsc::channel(REQUEST_QUEUE);

    let mut worker = Worker {
        codec: Codec::from_config(config),
        machine,
        connector,
        connection: None,
        pending_reply: None,
        log,
        status: status_tx,
        history: VecDeque::with_capacity(HISTORY_LEN),
    };
    // Attach before spawning so callers never observe the pre-connect state.
    worker.attach(connection);
    let task = tokio::spawn(worker.run(requests_rx));

    (
        DispatcherHandle {
            requests,
            status: status_rx,
        },
        task,
    )
}

struct Worker {
    codec: Codec,
    machine: ProtocolStateMachine,
    connector: Arc<dyn Connector>,
    connection: Option<Connection>,
    pending_reply: Option<Reply<Result<CommandOutcome, EngineError>>>,
    log: Arc<EventLog>,
    status: watch::Sender<ChainStatus>,
    history: VecDeque<String>,
}

impl Worker {
    async fn run(mut self, mut requests: mpsc::Receiver<Request>) {
        loop {
            let deadline = self
                .machine
                .next_deadline()
                .map(|ms| self.log.clock().instant_at(ms));

            // An expired deadline wins over anything that arrived after it.
            tokio::select! {
                biased;

                _ = sleep_until(deadline) => self.on_deadline(),

                event = next_event(&mut self.connection) => match event {
                    Some(PortEvent::Line(line)) => self.on_line(line),
                    Some(PortEvent::Error(reason)) => self.fault(reason),
                    None => self.fault("port closed".into()),
                },

                request = requests.recv() => match request {
                    Some(Request::Shutdown) => {
                        debug!("shutdown requested");
                        break;
                    }
                    Some(request) => self.on_request(request),
                    None => {
                        debug!("session dropped, dispatcher exiting");
                        break;
                    }
                },
            }
        }

        self.detach();
        self.fail_pending(EngineError::Disconnected);
        self.machine.disconnect();
        self.publish();
    }

    fn now_ms(&self) -> u64 {
        self.log.clock().now_ms()
    }

    // ------------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------------

    fn on_request(&mut self, request: Request) {
        self.on_deadline();
        match request {
            Request::Submit { command, reply } => self.on_submit(command, reply),
            Request::Reconnect { reply } => {
                let _ = reply.send(self.reconnect());
            }
            Request::Disconnect { reply } => {
                self.disconnect();
                let _ = reply.send(());
            }
            Request::History { reply } => {
                let _ = reply.send(self.history.iter().cloned().collect());
            }
            Request::Shutdown => {}
        }
    }

    fn on_submit(&mut self, command: Command, reply: Reply<Result<CommandOutcome, EngineError>>) {
        let now = self.now_ms();
        let encoded = match self.machine.admit(&command, &self.codec, now) {
            Ok(encoded) => encoded,
            Err(err) => {
                debug!(%command, error = %err, "submission refused");
                self.log
                    .local(format!("{command} refused: {err}"), Classification::Failure);
                let _ = reply.send(Err(err));
                return;
            }
        };

        info!(command = %encoded.describe(), "submitting");
        self.pending_reply = Some(reply);
        self.publish();
        if let Err(reason) = self.write(&encoded.line) {
            self.fault(reason);
        }
    }

    fn reconnect(&mut self) -> Result<(), EngineError> {
        self.disconnect();
        match self.connector.open() {
            Ok(connection) => {
                self.attach(connection);
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                error!(%reason, "reconnect failed");
                self.machine.fault(FaultReason::Transport(reason.clone()));
                self.log
                    .local(format!("reconnect failed: {reason}"), Classification::Failure);
                self.publish();
                Err(EngineError::TransportError(reason))
            }
        }
    }

    fn disconnect(&mut self) {
        self.detach();
        self.fail_pending(EngineError::Disconnected);
        self.machine.disconnect();
        self.publish();
    }

    // ------------------------------------------------------------------------
    // Port
    // ------------------------------------------------------------------------

    fn attach(&mut self, connection: Connection) {
        info!(port = connection.port.name(), "port attached");
        self.connection = Some(connection);
        self.machine.connect(self.now_ms());
        self.publish();

        // Ask the master for its chain length; the answer completes discovery.
        let query = codec::wire_line(DeviceAddress::BROADCAST, CommandKind::Status, None);
        if let Err(reason) = self.write(&query) {
            self.fault(reason);
        }
    }

    fn detach(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.port.close();
            debug!(port = connection.port.name(), "port closed");
        }
    }

    fn write(&mut self, line: &str) -> Result<(), String> {
        let connection = self.connection.as_mut().ok_or("port closed")?;
        connection.port.write_line(line).map_err(|e| e.to_string())?;

        debug!(%line, "tx");
        self.log.record(LineDirection::Tx, line, Classification::Command);
        if self.history.len() == HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(line.to_string());
        Ok(())
    }

    fn on_line(&mut self, line: String) {
        self.on_deadline();
        let parsed = codec::decode(&line);
        let effect = self.machine.on_line(&parsed, self.now_ms());

        let classification = match (&effect, &parsed) {
            (Effect::Stray, ParsedLine::Unrecognized(_)) => {
                debug!(%line, "rx unrecognized");
                Classification::Unrecognized
            }
            (Effect::Stray, _) => {
                warn!(%line, state = %self.machine.state(), "rx with nothing to resolve");
                Classification::Unrecognized
            }
            _ => {
                debug!(%line, "rx");
                parsed.classification()
            }
        };
        self.log.record(LineDirection::Rx, line, classification);
        self.apply(effect);
    }

    fn fault(&mut self, reason: String) {
        error!(%reason, "transport failure");
        self.detach();
        self.machine.fault(FaultReason::Transport(reason.clone()));
        self.log
            .local(format!("transport error: {reason}"), Classification::Failure);
        self.fail_pending(EngineError::TransportError(reason));
        self.publish();
    }

    // ------------------------------------------------------------------------
    // Resolution
    // ------------------------------------------------------------------------

    fn on_deadline(&mut self) {
        let Some(effect) = self.machine.poll(self.now_ms()) else {
            return;
        };
        self.apply(effect);
        if self.machine.state() == SystemState::TimeoutRecovery {
            self.machine.recover();
            self.publish();
        }
    }

    fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::Resolved(resolution) => self.resolve(resolution),
            Effect::Discovered(count) => {
                info!(devices = count, "discovery complete");
                self.log.local(
                    format!("discovery complete: {count} devices"),
                    Classification::Success,
                );
            }
            Effect::DiscoveryFailed => {
                warn!("no discovery report within the discovery timeout");
                self.log
                    .local("discovery timed out", Classification::Failure);
            }
            Effect::Stray => {}
        }
        self.publish();
    }

    fn resolve(&mut self, resolution: Resolution) {
        let Resolution {
            pending,
            result,
            elapsed_ms,
        } = resolution;
        let text = match &result {
            Ok(outcome) => {
                info!(command = %pending.describe(), %outcome, elapsed_ms, "resolved");
                format!("{}: {outcome}", pending.describe())
            }
            Err(err) => {
                warn!(command = %pending.describe(), error = %err, elapsed_ms, "failed");
                format!("{} failed: {err}", pending.describe())
            }
        };
        let class = if result.is_ok() {
            Classification::Success
        } else {
            Classification::Failure
        };
        self.log.local(text, class);

        if let Some(reply) = self.pending_reply.take() {
            let _ = reply.send(result);
        }
    }

    fn fail_pending(&mut self, err: EngineError) {
        if let Some(reply) = self.pending_reply.take() {
            let _ = reply.send(Err(err));
        }
    }

    fn publish(&mut self) {
        let next = self.machine.status();
        let previous = self.status.borrow().state;
        if previous != next.state {
            info!(from = %previous, to = %next.state, "state transition");
            self.log
                .local(format!("state: {previous} -> {}", next.state), Classification::State);
        }
        self.status.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

async fn next_event(connection: &mut Option<Connection>) -> Option<PortEvent> {
    match connection {
        Some(connection) => connection.events.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
