//! Session event log.
//!
//! Every line written or read, every outcome and every state change is
//! recorded as a [`LogEvent`] and fanned out over a `tokio::sync::broadcast`
//! channel. A bounded backlog lets late subscribers (a UI that attaches
//! after connect) catch up with [`EventLog::recent`].
//!
//! Events are stamped from one [`SessionClock`], the same time base the
//! protocol state machine runs on.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::broadcast;
use tokio::time::{Duration, Instant};

/// Events kept for late subscribers.
pub const EVENT_BACKLOG: usize = 256;

/// Capacity of the live broadcast channel.
const CHANNEL_CAPACITY: usize = 256;

// ============================================================================
// Clock
// ============================================================================

/// Milliseconds since session start, on tokio's clock (so paused test time
/// applies).
#[derive(Clone, Copy, Debug)]
pub struct SessionClock {
    start: Instant,
}

impl SessionClock {
    /// Clock starting now.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Milliseconds since start.
    #[inline]
    pub fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// The instant `ms` milliseconds after start.
    #[inline]
    pub fn instant_at(&self, ms: u64) -> Instant {
        self.start + Duration::from_millis(ms)
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::start()
    }
}

// ============================================================================
// Events
// ============================================================================

/// Where a logged line came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum LineDirection {
    /// Written to the port.
    Tx,
    /// Read from the port.
    Rx,
    /// Produced by the engine itself.
    Local,
}

/// What a logged line means.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Classification {
    /// Outbound command line.
    Command,
    /// Inbound acknowledgement.
    Ack,
    /// Inbound error report.
    ErrorReport,
    /// Inbound status report.
    StatusReport,
    /// Inbound discovery report.
    DiscoveryReport,
    /// Inbound line that matched nothing (or arrived too late).
    Unrecognized,
    /// A submission finished successfully.
    Success,
    /// A submission failed (invalid, busy, timed out, ...).
    Failure,
    /// Session state change.
    State,
    /// Demo lifecycle.
    Demo,
}

impl Classification {
    /// Whether this event reports a problem.
    pub const fn is_failure(&self) -> bool {
        matches!(self, Classification::ErrorReport | Classification::Failure)
    }
}

/// One entry of the event stream.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LogEvent {
    /// Milliseconds since session start.
    pub at_ms: u64,
    /// Origin of the line.
    pub direction: LineDirection,
    /// The line, or a human-readable description.
    pub line: String,
    /// Meaning of the line.
    pub classification: Classification,
}

// ============================================================================
// Event Log
// ============================================================================

/// Broadcast event stream with a bounded backlog.
#[derive(Debug)]
pub struct EventLog {
    clock: SessionClock,
    sender: broadcast::Sender<LogEvent>,
    backlog: Mutex<VecDeque<LogEvent>>,
}

impl EventLog {
    /// Empty log stamped from `clock`.
    pub fn new(clock: SessionClock) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            clock,
            sender,
            backlog: Mutex::new(VecDeque::with_capacity(EVENT_BACKLOG)),
        }
    }

    /// The clock events are stamped with.
    pub fn clock(&self) -> &SessionClock {
        &self.clock
    }

    /// Record an event stamped now.
    pub fn record(
        &self,
        direction: LineDirection,
        line: impl Into<String>,
        classification: Classification,
    ) -> LogEvent {
        let event = LogEvent {
            at_ms: self.clock.now_ms(),
            direction,
            line: line.into(),
            classification,
        };
        self.push(event.clone());
        event
    }

    /// Record an engine-produced event.
    pub fn local(&self, line: impl Into<String>, classification: Classification) -> LogEvent {
        self.record(LineDirection::Local, line, classification)
    }

    fn push(&self, event: LogEvent) {
        if let Ok(mut backlog) = self.backlog.lock() {
            if backlog.len() == EVENT_BACKLOG {
                backlog.pop_front();
            }
            backlog.push_back(event.clone());
        }
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }

    /// Live stream of events recorded from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.sender.subscribe()
    }

    /// The last `limit` events, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<LogEvent> {
        match self.backlog.lock() {
            Ok(backlog) => {
                let skip = backlog.len().saturating_sub(limit);
                backlog.iter().skip(skip).cloned().collect()
            }
            Err(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn events_are_stamped_from_session_clock() {
        let log = EventLog::new(SessionClock::start());
        tokio::time::advance(Duration::from_millis(1500)).await;
        let event = log.record(LineDirection::Tx, "000,status", Classification::Command);
        assert_eq!(event.at_ms, 1500);
    }

    #[tokio::test]
    async fn subscribers_see_new_events() {
        let log = EventLog::new(SessionClock::start());
        let mut rx = log.subscribe();
        log.local("connected", Classification::State);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.line, "connected");
        assert_eq!(event.direction, LineDirection::Local);
    }

    #[tokio::test]
    async fn backlog_is_bounded_and_ordered() {
        let log = EventLog::new(SessionClock::start());
        for i in 0..(EVENT_BACKLOG + 10) {
            log.record(LineDirection::Rx, format!("line {i}"), Classification::Unrecognized);
        }
        let all = log.recent(usize::MAX);
        assert_eq!(all.len(), EVENT_BACKLOG);
        assert_eq!(all[0].line, "line 10");

        let last_two = log.recent(2);
        assert_eq!(last_two.len(), 2);
        assert_eq!(last_two[1].line, format!("line {}", EVENT_BACKLOG + 9));
    }

    #[test]
    fn failure_classes() {
        assert!(Classification::Failure.is_failure());
        assert!(Classification::ErrorReport.is_failure());
        assert!(!Classification::Unrecognized.is_failure());
    }
}
