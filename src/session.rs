//! Chain session: the interface shells (CLI, HTTP, GUI) program against.
//!
//! A session is built on connect and owns everything for one connection:
//! the dispatcher worker, the demo sequencer and the event log. There is no
//! process-wide state; two sessions on two ports are independent.
//!
//! # Example
//!
//! ```rust
//! use led_chain::hal::MockLink;
//! use led_chain::{ChainSession, Command, CommandOutcome, Config, DeviceAddress, SystemState};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let link = MockLink::simulated(4);
//! let session = ChainSession::connect(Config::default(), link.clone()).unwrap();
//!
//! let status = session.ready().await.unwrap();
//! assert_eq!(status.device_count, 4);
//!
//! let outcome = session
//!     .submit(Command::servo(DeviceAddress::device(2), 90))
//!     .await
//!     .unwrap();
//! assert_eq!(outcome, CommandOutcome::Acknowledged);
//! assert_eq!(link.last_written().as_deref(), Some("002,servo,767"));
//! assert_eq!(session.current_state(), (SystemState::Ready, 4));
//! # });
//! ```

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

use crate::commands::{Command, CommandKind, CommandOutcome, DeviceAddress, EngineError};
use crate::config::{Config, ConfigError};
use crate::demo::{DemoError, DemoHandle, DemoPattern, DemoSequencer};
use crate::dispatcher::{self, DispatcherHandle};
use crate::events::{EventLog, LogEvent, SessionClock};
use crate::protocol::{ChainStatus, FaultReason, SystemState};
use crate::traits::{Connector, PortError};

/// Why a session could not be opened.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The configuration is unusable.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    /// The port could not be opened.
    #[error(transparent)]
    Port(#[from] PortError),
}

/// One connection to one chain.
#[derive(Debug)]
pub struct ChainSession {
    config: Config,
    dispatcher: DispatcherHandle,
    demos: DemoSequencer,
    log: Arc<EventLog>,
    worker: JoinHandle<()>,
}

impl ChainSession {
    /// Open a port through `connector` and start discovery.
    ///
    /// Returns once the discovery query is written; use
    /// [`ready`](Self::ready) to wait for the chain length. Must be called
    /// inside a tokio runtime.
    pub fn connect(config: Config, connector: impl Connector + 'static) -> Result<Self, SessionError> {
        config.validate()?;
        let connector: Arc<dyn Connector> = Arc::new(connector);
        let connection = connector.open()?;

        let log = Arc::new(EventLog::new(SessionClock::start()));
        let (dispatcher, worker) =
            dispatcher::spawn(&config, connector, connection, Arc::clone(&log));
        let demos = DemoSequencer::new(dispatcher.clone(), Arc::clone(&log));
        info!("session connected");

        Ok(Self {
            config,
            dispatcher,
            demos,
            log,
            worker,
        })
    }

    /// Configuration the session runs with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Wait until discovery has finished, one way or the other.
    ///
    /// `Ok` once the chain is usable; `Err` if discovery timed out, the port
    /// failed, or the session was disconnected.
    pub async fn ready(&self) -> Result<ChainStatus, EngineError> {
        let mut watch = self.dispatcher.watch();
        let status = watch
            .wait_for(|s| s.state != SystemState::Initializing)
            .await
            .map_err(|_| EngineError::Disconnected)?
            .clone();

        match status.state {
            SystemState::Ready | SystemState::Processing | SystemState::TimeoutRecovery => {
                Ok(status)
            }
            SystemState::Fault => Err(match status.fault {
                Some(FaultReason::DiscoveryTimeout) => EngineError::DiscoveryTimeout,
                Some(FaultReason::Transport(reason)) => EngineError::TransportError(reason),
                None => EngineError::NotReady(SystemState::Fault),
            }),
            other => Err(EngineError::NotReady(other)),
        }
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    /// Submit a command and wait for its outcome.
    pub async fn submit(&self, command: Command) -> Result<CommandOutcome, EngineError> {
        self.dispatcher.submit(command).await
    }

    /// Submit from loose parts, as a shell would (`value` in degrees or mA).
    pub async fn submit_command(
        &self,
        kind: CommandKind,
        target: DeviceAddress,
        value: Option<u16>,
    ) -> Result<CommandOutcome, EngineError> {
        self.submit(Command::new(kind, target, value)).await
    }

    /// Re-run discovery on the open port. Resolves with the new chain length.
    pub async fn reinit(&self) -> Result<u16, EngineError> {
        match self.submit(Command::reinit()).await? {
            CommandOutcome::Discovered { device_count } => Ok(device_count),
            _ => Ok(self.state().device_count),
        }
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Close the port. Any in-flight command fails with `Disconnected`.
    pub async fn disconnect(&self) -> Result<(), EngineError> {
        self.demos.cancel();
        self.dispatcher.disconnect().await
    }

    /// Close and reopen the port, then re-run discovery from scratch.
    ///
    /// The only way out of [`SystemState::Fault`].
    pub async fn reconnect(&self) -> Result<(), EngineError> {
        self.demos.cancel();
        self.dispatcher.reconnect().await
    }

    /// Disconnect and wait for the worker to stop.
    pub async fn shutdown(self) {
        self.demos.cancel();
        self.dispatcher.shutdown().await;
        let _ = self.worker.await;
        info!("session closed");
    }

    // ------------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------------

    /// Latest snapshot.
    pub fn state(&self) -> ChainStatus {
        self.dispatcher.status()
    }

    /// `(state, chain length)`.
    pub fn current_state(&self) -> (SystemState, u16) {
        let status = self.state();
        (status.state, status.device_count)
    }

    /// Live event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.log.subscribe()
    }

    /// The last `limit` events, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<LogEvent> {
        self.log.recent(limit)
    }

    /// The last transmitted wire lines, oldest first.
    pub async fn history(&self) -> Result<Vec<String>, EngineError> {
        self.dispatcher.history().await
    }

    /// Handle for submitting from other tasks.
    pub fn dispatcher(&self) -> &DispatcherHandle {
        &self.dispatcher
    }

    // ------------------------------------------------------------------------
    // Demos
    // ------------------------------------------------------------------------

    /// Start builtin demo `id` (`1..=3`).
    pub fn start_demo(&self, id: u8) -> Result<DemoHandle, DemoError> {
        self.demos.start_builtin(id)
    }

    /// Start a custom pattern.
    pub fn start_pattern(&self, pattern: DemoPattern) -> Result<DemoHandle, DemoError> {
        self.demos.start(pattern)
    }

    /// Cancel the running demo. Returns whether one was running.
    pub fn cancel_demo(&self) -> bool {
        self.demos.cancel()
    }

    /// Whether a demo is running.
    pub fn demo_running(&self) -> bool {
        self.demos.is_running()
    }
}
