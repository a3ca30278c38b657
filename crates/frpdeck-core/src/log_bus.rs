// ABOUTME: Fan-out of agent output lines to any number of subscribers.
// ABOUTME: Events are tagged with their source config id; nothing is buffered for late subscribers.

use chrono::{DateTime, Utc};
use std::fmt;
use tokio::sync::broadcast;

/// Which channel a log line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogStream {
    Stdout,
    Stderr,
    /// Produced by the supervisor itself (start, stop, exit)
    System,
}

impl fmt::Display for LogStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogStream::Stdout => "stdout",
            LogStream::Stderr => "stderr",
            LogStream::System => "system",
        };
        f.write_str(s)
    }
}

/// One line of output.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    pub source_id: String,
    pub stream: LogStream,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl LogEvent {
    pub fn new(source_id: impl Into<String>, stream: LogStream, text: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            stream,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn system(source_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(source_id, LogStream::System, text)
    }
}

impl fmt::Display for LogEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ts = self.timestamp.format("%H:%M:%S");
        match self.stream {
            LogStream::Stdout => write!(f, "{ts} [{}] {}", self.source_id, self.text),
            LogStream::Stderr => write!(f, "{ts} [{}] ERROR: {}", self.source_id, self.text),
            LogStream::System => write!(f, "{ts} [{}] ** {}", self.source_id, self.text),
        }
    }
}

/// Publish/subscribe channel for [`LogEvent`]s.
///
/// Cloning shares the same channel. Publishing never blocks; a subscriber
/// that falls more than `capacity` events behind loses the oldest ones.
#[derive(Clone)]
pub struct LogBus {
    tx: broadcast::Sender<LogEvent>,
}

impl LogBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: LogEvent) {
        // Nobody listening is not an error
        let _ = self.tx.send(event);
    }

    /// Start receiving events published from now on.
    pub fn subscribe(&self) -> LogSubscription {
        LogSubscription {
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for LogBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// A live subscription. Dropping it unsubscribes.
pub struct LogSubscription {
    rx: broadcast::Receiver<LogEvent>,
}

impl LogSubscription {
    /// Wait for the next event. Returns `None` once every [`LogBus`] clone is gone.
    pub async fn recv(&mut self) -> Option<LogEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Log subscriber lagged, dropped events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<LogEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Log subscriber lagged, dropped events");
                }
                Err(_) => return None,
            }
        }
    }
}
