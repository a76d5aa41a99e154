use cfdeck_core::client::{LineReceiver, OpenedTail};
use cfdeck_core::{LineBatch, SessionId};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Which pane a session (or a pending connect) belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PaneId {
    Single,
    Grid(usize),
}

impl fmt::Display for PaneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaneId::Single => f.write_str("single"),
            PaneId::Grid(index) => write!(f, "grid[{index}]"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailState {
    Connecting,
    Connected,
    Streaming,
    Idle,
    Stopped,
    Error(String),
}

impl TailState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TailState::Connecting => "connecting",
            TailState::Connected => "connected",
            TailState::Streaming => "streaming",
            TailState::Idle => "idle",
            TailState::Stopped => "stopped",
            TailState::Error(_) => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TailState::Stopped | TailState::Error(_))
    }
}

impl fmt::Display for TailState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TailState::Error(message) => write!(f, "error: {message}"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Result of waiting on a stream once.
#[derive(Debug, Clone, PartialEq)]
pub enum TailPoll {
    Batch(LineBatch),
    /// The remote end closed the stream. Do not poll again.
    Closed,
    Err(String),
}

impl TailPoll {
    pub async fn next(stream: &mut LineReceiver) -> Self {
        match stream.recv().await {
            Some(Ok(lines)) => TailPoll::Batch(lines),
            Some(Err(err)) => TailPoll::Err(err.to_string()),
            None => TailPoll::Closed,
        }
    }
}

/// One open log stream.
///
/// The receiver is held here while no poll is armed and moves into the poll
/// task while one is, so at most one read is ever outstanding.
#[derive(Debug)]
pub struct TailSession {
    id: SessionId,
    script_name: String,
    account_id: String,
    pane: PaneId,
    state: TailState,
    stream: Option<LineReceiver>,
    poll_task: Option<JoinHandle<()>>,
    last_batch_at: Option<Instant>,
    batches_received: u64,
    lines_received: u64,
}

impl TailSession {
    pub fn new(opened: OpenedTail, script_name: String, account_id: String, pane: PaneId) -> Self {
        Self {
            id: opened.id,
            script_name,
            account_id,
            pane,
            state: TailState::Connected,
            stream: Some(opened.lines),
            poll_task: None,
            last_batch_at: None,
            batches_received: 0,
            lines_received: 0,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn script_name(&self) -> &str {
        &self.script_name
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn pane(&self) -> PaneId {
        self.pane
    }

    pub fn state(&self) -> &TailState {
        &self.state
    }

    pub fn lines_received(&self) -> u64 {
        self.lines_received
    }

    pub fn batches_received(&self) -> u64 {
        self.batches_received
    }

    pub fn is_poll_armed(&self) -> bool {
        self.poll_task.is_some()
    }

    pub(crate) fn take_stream(&mut self) -> Option<LineReceiver> {
        self.stream.take()
    }

    pub(crate) fn arm(&mut self, task: JoinHandle<()>) {
        self.poll_task = Some(task);
    }

    pub(crate) fn restore_stream(&mut self, stream: LineReceiver) {
        self.poll_task = None;
        self.stream = Some(stream);
    }

    pub(crate) fn record_batch(&mut self, lines: usize) {
        self.state = TailState::Streaming;
        self.last_batch_at = Some(Instant::now());
        self.batches_received += 1;
        self.lines_received += lines as u64;
    }

    pub(crate) fn refresh_idle(&mut self, idle_after: Duration) -> bool {
        if self.state != TailState::Streaming {
            return false;
        }
        let quiet = self
            .last_batch_at
            .map(|at| at.elapsed() >= idle_after)
            .unwrap_or(false);
        if quiet {
            self.state = TailState::Idle;
        }
        quiet
    }

    /// Aborts an armed poll (dropping the receiver) and marks the session
    /// finished with `state`.
    pub(crate) fn finish(&mut self, state: TailState) {
        if let Some(task) = self.poll_task.take() {
            task.abort();
        }
        self.stream = None;
        self.state = state;
    }
}
