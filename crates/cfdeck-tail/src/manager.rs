use crate::session::{PaneId, TailPoll, TailSession, TailState};
use cfdeck_core::client::{ClientError, LineReceiver, OpenedTail, TailClient};
use cfdeck_core::{LineBatch, SessionId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_GRID: usize = 6;

/// Identifies one connect attempt. A connect result is only accepted while
/// its token is still the pending one for that script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StartToken(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailHandle {
    pub token: StartToken,
    pub script_name: String,
    pub pane: PaneId,
}

/// Completions produced by connect, poll and teardown workers. The consumer
/// loop feeds every one of these back through [`TailSessionManager::handle_event`].
#[derive(Debug)]
pub enum TailEvent {
    ConnectFinished {
        token: StartToken,
        account_id: String,
        script_name: String,
        result: Result<OpenedTail, ClientError>,
    },
    Polled {
        session_id: SessionId,
        stream: LineReceiver,
        poll: TailPoll,
    },
    TornDown {
        session_id: SessionId,
        script_name: String,
        result: Result<(), ClientError>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    StaleConnect,
    AccountChanged,
}

/// What changed after an event was applied.
#[derive(Debug, Clone, PartialEq)]
pub enum TailUpdate {
    Connected {
        pane: PaneId,
        script_name: String,
        session_id: SessionId,
    },
    ConnectFailed {
        pane: PaneId,
        script_name: String,
        error: String,
    },
    Batch {
        pane: PaneId,
        script_name: String,
        session_id: SessionId,
        lines: LineBatch,
    },
    Closed {
        pane: PaneId,
        script_name: String,
    },
    StreamFailed {
        pane: PaneId,
        script_name: String,
        error: String,
    },
    Discarded {
        script_name: String,
        reason: DiscardReason,
    },
    TornDown {
        script_name: String,
        error: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// A live session was stopped and its teardown scheduled.
    Stopping,
    /// A connect was still pending; its result will be torn down on arrival.
    CancelledConnect,
    AlreadyStopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PaneSlot {
    Connecting(StartToken),
    Live(SessionId),
    Failed(String),
    Stopped,
}

#[derive(Debug, Clone)]
struct PaneEntry {
    script_name: String,
    slot: PaneSlot,
}

#[derive(Debug, Clone)]
struct TailGrid {
    env_name: String,
    cells: Vec<PaneEntry>,
}

#[derive(Debug, Clone)]
struct PendingStart {
    token: StartToken,
    pane: PaneId,
}

/// Owns every tail session for the single-tail pane and the grid.
///
/// All methods run on the consumer loop. Connects, polls and teardowns run on
/// spawned tasks that only report back through the event channel.
pub struct TailSessionManager {
    client: Arc<dyn TailClient>,
    events: mpsc::UnboundedSender<TailEvent>,
    next_token: u64,
    max_grid: usize,
    single: Option<PaneEntry>,
    grid: Option<TailGrid>,
    sessions: HashMap<SessionId, TailSession>,
    pending: HashMap<String, PendingStart>,
    closing: HashMap<SessionId, String>,
    teardowns: Vec<JoinHandle<()>>,
}

impl TailSessionManager {
    pub fn new(client: Arc<dyn TailClient>) -> (Self, mpsc::UnboundedReceiver<TailEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let manager = Self {
            client,
            events,
            next_token: 0,
            max_grid: DEFAULT_MAX_GRID,
            single: None,
            grid: None,
            sessions: HashMap::new(),
            pending: HashMap::new(),
            closing: HashMap::new(),
            teardowns: Vec::new(),
        };
        (manager, rx)
    }

    pub fn with_max_grid(mut self, max_grid: usize) -> Self {
        self.max_grid = max_grid.max(1);
        self
    }

    /// Opens a tail in the single pane, replacing whatever it held. Any grid
    /// cell tailing the same script is stopped first.
    pub fn start_tail(&mut self, account_id: &str, script_name: &str) -> TailHandle {
        self.stop_pane(PaneId::Single);
        self.release_script(script_name);
        let token = self.begin_connect(account_id, script_name, PaneId::Single);
        self.single = Some(PaneEntry {
            script_name: script_name.to_string(),
            slot: PaneSlot::Connecting(token),
        });
        TailHandle {
            token,
            script_name: script_name.to_string(),
            pane: PaneId::Single,
        }
    }

    pub fn stop_single_tail(&mut self) -> StopOutcome {
        self.stop_pane(PaneId::Single)
    }

    /// Opens one session per target concurrently. Targets are de-duplicated
    /// and capped at `max_grid`; a single tail on a target script is stopped
    /// before its grid connect is issued.
    pub fn start_parallel_tail(
        &mut self,
        env_name: &str,
        account_id: &str,
        targets: &[String],
    ) -> Vec<TailHandle> {
        self.stop_all_parallel_tails();

        let mut seen = HashSet::new();
        let scripts: Vec<&String> = targets
            .iter()
            .filter(|script| !script.is_empty() && seen.insert(script.as_str()))
            .take(self.max_grid)
            .collect();
        if scripts.len() < targets.len() {
            debug!(
                event = "tail_grid_targets_trimmed",
                requested = targets.len(),
                kept = scripts.len(),
                max_grid = self.max_grid
            );
        }

        let mut cells = Vec::with_capacity(scripts.len());
        let mut handles = Vec::with_capacity(scripts.len());
        for (index, script_name) in scripts.into_iter().enumerate() {
            if self.single_script() == Some(script_name.as_str()) {
                self.stop_pane(PaneId::Single);
            }
            self.release_script(script_name);
            let pane = PaneId::Grid(index);
            let token = self.begin_connect(account_id, script_name, pane);
            cells.push(PaneEntry {
                script_name: script_name.clone(),
                slot: PaneSlot::Connecting(token),
            });
            handles.push(TailHandle {
                token,
                script_name: script_name.clone(),
                pane,
            });
        }

        info!(
            event = "tail_grid_started",
            env = env_name,
            account_id,
            cells = cells.len()
        );
        self.grid = Some(TailGrid {
            env_name: env_name.to_string(),
            cells,
        });
        handles
    }

    /// Stops every grid cell, including cells still connecting, and drops the
    /// grid layout.
    pub fn stop_all_parallel_tails(&mut self) {
        let Some(grid) = self.grid.as_ref() else {
            return;
        };
        let env_name = grid.env_name.clone();
        let count = grid.cells.len();
        for index in 0..count {
            self.stop_pane(PaneId::Grid(index));
        }
        self.grid = None;
        info!(event = "tail_grid_stopped", env = %env_name, cells = count);
    }

    pub fn stop_grid_cell(&mut self, index: usize) -> StopOutcome {
        self.stop_pane(PaneId::Grid(index))
    }

    pub fn stop_all(&mut self) {
        self.stop_single_tail();
        self.stop_all_parallel_tails();
        let leftover: Vec<SessionId> = self.sessions.keys().cloned().collect();
        for session_id in leftover {
            self.stop_tail(&session_id);
        }
        self.pending.clear();
    }

    /// Idempotent. Unknown, closed and already-stopped sessions are no-ops,
    /// and `close_tail` is issued at most once per session.
    pub fn stop_tail(&mut self, session_id: &SessionId) -> StopOutcome {
        let Some(mut session) = self.sessions.remove(session_id) else {
            return StopOutcome::AlreadyStopped;
        };
        session.finish(TailState::Stopped);
        let pane = session.pane();
        if let Some(entry) = self.pane_entry_mut(pane) {
            if entry.slot == PaneSlot::Live(session_id.clone()) {
                entry.slot = PaneSlot::Stopped;
            }
        }
        info!(
            event = "tail_stop",
            session_id = %session_id,
            script = session.script_name(),
            pane = %pane,
            lines = session.lines_received()
        );
        self.spawn_teardown(session_id.clone(), session.script_name().to_string());
        StopOutcome::Stopping
    }

    /// Arms a single read on the session's stream. Returns false when the
    /// session is gone or a read is already outstanding.
    pub fn poll_next(&mut self, session_id: &SessionId) -> bool {
        let Some(session) = self.sessions.get_mut(session_id) else {
            return false;
        };
        if session.is_poll_armed() {
            return false;
        }
        let Some(mut stream) = session.take_stream() else {
            return false;
        };
        let events = self.events.clone();
        let id = session_id.clone();
        let task = tokio::spawn(async move {
            let poll = TailPoll::next(&mut stream).await;
            let _ = events.send(TailEvent::Polled {
                session_id: id,
                stream,
                poll,
            });
        });
        session.arm(task);
        true
    }

    /// Applies one worker completion. `current_account` is the registry's
    /// active account at the time the event is observed.
    pub fn handle_event(&mut self, event: TailEvent, current_account: &str) -> Option<TailUpdate> {
        match event {
            TailEvent::ConnectFinished {
                token,
                account_id,
                script_name,
                result,
            } => self.finish_connect(token, account_id, script_name, result, current_account),
            TailEvent::Polled {
                session_id,
                stream,
                poll,
            } => self.finish_poll(session_id, stream, poll),
            TailEvent::TornDown {
                session_id,
                script_name,
                result,
            } => {
                self.closing.remove(&session_id);
                let error = result.err().map(|err| err.to_string());
                match error.as_deref() {
                    Some(message) => warn!(
                        event = "tail_teardown_failed",
                        session_id = %session_id,
                        script = %script_name,
                        error = message
                    ),
                    None => debug!(
                        event = "tail_teardown_done",
                        session_id = %session_id,
                        script = %script_name
                    ),
                }
                Some(TailUpdate::TornDown { script_name, error })
            }
        }
    }

    fn finish_connect(
        &mut self,
        token: StartToken,
        account_id: String,
        script_name: String,
        result: Result<OpenedTail, ClientError>,
        current_account: &str,
    ) -> Option<TailUpdate> {
        let is_current = self
            .pending
            .get(&script_name)
            .map(|pending| pending.token == token)
            .unwrap_or(false);
        if !is_current {
            debug!(event = "tail_connect_stale", script = %script_name);
            self.discard_opened(result, &script_name);
            return Some(TailUpdate::Discarded {
                script_name,
                reason: DiscardReason::StaleConnect,
            });
        }
        let pending = self.pending.remove(&script_name)?;

        if account_id != current_account {
            info!(
                event = "tail_connect_discarded",
                reason = "account_changed",
                script = %script_name,
                issued_under = %account_id,
                current = current_account
            );
            self.discard_opened(result, &script_name);
            self.set_connecting_slot(pending.pane, token, PaneSlot::Stopped);
            return Some(TailUpdate::Discarded {
                script_name,
                reason: DiscardReason::AccountChanged,
            });
        }

        match result {
            Ok(opened) => {
                let session =
                    TailSession::new(opened, script_name.clone(), account_id, pending.pane);
                let session_id = session.id().clone();
                info!(
                    event = "tail_connected",
                    session_id = %session_id,
                    script = %script_name,
                    pane = %pending.pane
                );
                self.sessions.insert(session_id.clone(), session);
                self.set_connecting_slot(pending.pane, token, PaneSlot::Live(session_id.clone()));
                Some(TailUpdate::Connected {
                    pane: pending.pane,
                    script_name,
                    session_id,
                })
            }
            Err(err) => {
                let error = err.to_string();
                warn!(
                    event = "tail_connect_failed",
                    script = %script_name,
                    pane = %pending.pane,
                    error = %error
                );
                self.set_connecting_slot(pending.pane, token, PaneSlot::Failed(error.clone()));
                Some(TailUpdate::ConnectFailed {
                    pane: pending.pane,
                    script_name,
                    error,
                })
            }
        }
    }

    fn finish_poll(
        &mut self,
        session_id: SessionId,
        stream: LineReceiver,
        poll: TailPoll,
    ) -> Option<TailUpdate> {
        // A poll that completed after its session was stopped just drops the stream.
        let session = self.sessions.get_mut(&session_id)?;
        let pane = session.pane();
        let script_name = session.script_name().to_string();
        match poll {
            TailPoll::Batch(lines) => {
                session.restore_stream(stream);
                session.record_batch(lines.len());
                Some(TailUpdate::Batch {
                    pane,
                    script_name,
                    session_id,
                    lines,
                })
            }
            TailPoll::Closed => {
                if let Some(mut session) = self.sessions.remove(&session_id) {
                    session.finish(TailState::Stopped);
                }
                self.set_live_slot(pane, &session_id, PaneSlot::Stopped);
                info!(
                    event = "tail_closed",
                    session_id = %session_id,
                    script = %script_name
                );
                Some(TailUpdate::Closed { pane, script_name })
            }
            TailPoll::Err(error) => {
                if let Some(mut session) = self.sessions.remove(&session_id) {
                    session.finish(TailState::Error(error.clone()));
                }
                self.set_live_slot(pane, &session_id, PaneSlot::Failed(error.clone()));
                warn!(
                    event = "tail_stream_failed",
                    session_id = %session_id,
                    script = %script_name,
                    error = %error
                );
                self.spawn_teardown(session_id, script_name.clone());
                Some(TailUpdate::StreamFailed {
                    pane,
                    script_name,
                    error,
                })
            }
        }
    }

    /// Marks streaming sessions without a recent batch as idle.
    pub fn refresh_idle(&mut self, idle_after: Duration) -> usize {
        self.sessions
            .values_mut()
            .map(|session| session.refresh_idle(idle_after))
            .filter(|went_idle| *went_idle)
            .count()
    }

    /// Drops handles of teardowns that have completed; returns how many remain.
    pub fn reap_teardowns(&mut self) -> usize {
        self.teardowns.retain(|handle| !handle.is_finished());
        self.teardowns.len()
    }

    /// Stops everything and waits for every scheduled teardown to finish.
    pub async fn shutdown(mut self) {
        self.stop_all();
        let handles = std::mem::take(&mut self.teardowns);
        let count = handles.len();
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(event = "tail_teardown_join_failed", error = %err);
            }
        }
        info!(event = "tail_manager_shutdown", teardowns = count);
    }

    pub fn pane_state(&self, pane: PaneId) -> Option<TailState> {
        let entry = self.pane_entry(pane)?;
        let state = match &entry.slot {
            PaneSlot::Connecting(_) => TailState::Connecting,
            PaneSlot::Live(session_id) => self
                .sessions
                .get(session_id)
                .map(|session| session.state().clone())
                .unwrap_or(TailState::Stopped),
            PaneSlot::Failed(error) => TailState::Error(error.clone()),
            PaneSlot::Stopped => TailState::Stopped,
        };
        Some(state)
    }

    pub fn pane_script(&self, pane: PaneId) -> Option<&str> {
        self.pane_entry(pane).map(|entry| entry.script_name.as_str())
    }

    pub fn single_script(&self) -> Option<&str> {
        self.single.as_ref().map(|entry| entry.script_name.as_str())
    }

    pub fn grid_env(&self) -> Option<&str> {
        self.grid.as_ref().map(|grid| grid.env_name.as_str())
    }

    pub fn grid_len(&self) -> usize {
        self.grid.as_ref().map(|grid| grid.cells.len()).unwrap_or(0)
    }

    /// Scripts of grid cells that are connecting or live.
    pub fn all_grid_pane_scripts(&self) -> Vec<String> {
        let Some(grid) = self.grid.as_ref() else {
            return Vec::new();
        };
        grid.cells
            .iter()
            .filter(|entry| match &entry.slot {
                PaneSlot::Connecting(_) => true,
                PaneSlot::Live(session_id) => self.sessions.contains_key(session_id),
                PaneSlot::Failed(_) | PaneSlot::Stopped => false,
            })
            .map(|entry| entry.script_name.clone())
            .collect()
    }

    pub fn session(&self, session_id: &SessionId) -> Option<&TailSession> {
        self.sessions.get(session_id)
    }

    pub fn active_sessions(&self) -> impl Iterator<Item = &TailSession> {
        self.sessions.values()
    }

    /// True while a connect is pending or a session is open for `script_name`.
    pub fn is_tailing(&self, script_name: &str) -> bool {
        self.pending.contains_key(script_name)
            || self
                .sessions
                .values()
                .any(|session| session.script_name() == script_name)
    }

    pub fn closing_count(&self) -> usize {
        self.closing.len()
    }

    fn begin_connect(&mut self, account_id: &str, script_name: &str, pane: PaneId) -> StartToken {
        self.next_token += 1;
        let token = StartToken(self.next_token);
        self.pending
            .insert(script_name.to_string(), PendingStart { token, pane });

        let client = Arc::clone(&self.client);
        let events = self.events.clone();
        let account_id = account_id.to_string();
        let script_name = script_name.to_string();
        info!(
            event = "tail_connect",
            script = %script_name,
            account_id = %account_id,
            pane = %pane
        );
        tokio::spawn(async move {
            let result = client.open_tail(&account_id, &script_name).await;
            let _ = events.send(TailEvent::ConnectFinished {
                token,
                account_id,
                script_name,
                result,
            });
        });
        token
    }

    fn spawn_teardown(&mut self, session_id: SessionId, script_name: String) {
        if self.closing.contains_key(&session_id) {
            return;
        }
        self.closing.insert(session_id.clone(), script_name.clone());
        let client = Arc::clone(&self.client);
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            let result = client.close_tail(&session_id).await;
            let _ = events.send(TailEvent::TornDown {
                session_id,
                script_name,
                result,
            });
        });
        self.teardowns.push(handle);
    }

    fn discard_opened(&mut self, result: Result<OpenedTail, ClientError>, script_name: &str) {
        if let Ok(opened) = result {
            drop(opened.lines);
            self.spawn_teardown(opened.id, script_name.to_string());
        }
    }

    /// Stops whatever currently holds `script_name`, in either a pending
    /// connect or an open session.
    fn release_script(&mut self, script_name: &str) {
        if let Some(pending) = self.pending.remove(script_name) {
            self.set_connecting_slot(pending.pane, pending.token, PaneSlot::Stopped);
        }
        let holders: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|session| session.script_name() == script_name)
            .map(|session| session.id().clone())
            .collect();
        for session_id in holders {
            self.stop_tail(&session_id);
        }
    }

    fn stop_pane(&mut self, pane: PaneId) -> StopOutcome {
        let Some(entry) = self.pane_entry(pane) else {
            return StopOutcome::AlreadyStopped;
        };
        match entry.slot.clone() {
            PaneSlot::Connecting(token) => {
                let script_name = entry.script_name.clone();
                let owns_pending = self
                    .pending
                    .get(&script_name)
                    .map(|pending| pending.token == token)
                    .unwrap_or(false);
                if owns_pending {
                    self.pending.remove(&script_name);
                }
                if let Some(entry) = self.pane_entry_mut(pane) {
                    entry.slot = PaneSlot::Stopped;
                }
                debug!(event = "tail_connect_cancelled", script = %script_name, pane = %pane);
                StopOutcome::CancelledConnect
            }
            PaneSlot::Live(session_id) => {
                let outcome = self.stop_tail(&session_id);
                if let Some(entry) = self.pane_entry_mut(pane) {
                    entry.slot = PaneSlot::Stopped;
                }
                outcome
            }
            PaneSlot::Failed(_) | PaneSlot::Stopped => StopOutcome::AlreadyStopped,
        }
    }

    fn set_connecting_slot(&mut self, pane: PaneId, token: StartToken, slot: PaneSlot) {
        if let Some(entry) = self.pane_entry_mut(pane) {
            if entry.slot == PaneSlot::Connecting(token) {
                entry.slot = slot;
            }
        }
    }

    fn set_live_slot(&mut self, pane: PaneId, session_id: &SessionId, slot: PaneSlot) {
        if let Some(entry) = self.pane_entry_mut(pane) {
            if entry.slot == PaneSlot::Live(session_id.clone()) {
                entry.slot = slot;
            }
        }
    }

    fn pane_entry(&self, pane: PaneId) -> Option<&PaneEntry> {
        match pane {
            PaneId::Single => self.single.as_ref(),
            PaneId::Grid(index) => self.grid.as_ref()?.cells.get(index),
        }
    }

    fn pane_entry_mut(&mut self, pane: PaneId) -> Option<&mut PaneEntry> {
        match pane {
            PaneId::Single => self.single.as_mut(),
            PaneId::Grid(index) => self.grid.as_mut()?.cells.get_mut(index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cfdeck_core::client::LineSender;
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedClient {
        senders: Mutex<Vec<LineSender>>,
        closed: Mutex<Vec<SessionId>>,
    }

    #[async_trait]
    impl TailClient for ScriptedClient {
        async fn open_tail(
            &self,
            _account_id: &str,
            script_name: &str,
        ) -> Result<OpenedTail, ClientError> {
            let (tx, rx) = mpsc::channel(8);
            let mut senders = self.senders.lock().expect("senders lock");
            senders.push(tx);
            Ok(OpenedTail {
                id: SessionId::new(format!("{script_name}-{}", senders.len())),
                lines: rx,
            })
        }

        async fn close_tail(&self, session: &SessionId) -> Result<(), ClientError> {
            self.closed
                .lock()
                .expect("closed lock")
                .push(session.clone());
            Ok(())
        }
    }

    async fn next_update(
        manager: &mut TailSessionManager,
        rx: &mut mpsc::UnboundedReceiver<TailEvent>,
        account: &str,
    ) -> TailUpdate {
        loop {
            let event = rx.recv().await.expect("tail event");
            if let Some(update) = manager.handle_event(event, account) {
                return update;
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn single_tail_connects_and_stops_once() {
        let client = Arc::new(ScriptedClient::default());
        let (mut manager, mut rx) = TailSessionManager::new(client.clone());

        let handle = manager.start_tail("acct-1", "api");
        assert_eq!(handle.pane, PaneId::Single);
        assert_eq!(manager.pane_state(PaneId::Single), Some(TailState::Connecting));
        assert!(manager.is_tailing("api"));

        let session_id = match next_update(&mut manager, &mut rx, "acct-1").await {
            TailUpdate::Connected { session_id, .. } => session_id,
            other => panic!("expected connected, got {other:?}"),
        };
        assert_eq!(manager.pane_state(PaneId::Single), Some(TailState::Connected));

        assert_eq!(manager.stop_tail(&session_id), StopOutcome::Stopping);
        assert_eq!(manager.stop_tail(&session_id), StopOutcome::AlreadyStopped);
        assert_eq!(manager.stop_single_tail(), StopOutcome::AlreadyStopped);
        assert_eq!(manager.pane_state(PaneId::Single), Some(TailState::Stopped));

        let update = next_update(&mut manager, &mut rx, "acct-1").await;
        assert!(matches!(update, TailUpdate::TornDown { error: None, .. }));
        assert_eq!(client.closed.lock().expect("closed lock").len(), 1);
        assert_eq!(manager.closing_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn batches_arrive_in_order_and_closed_stream_needs_no_teardown() {
        let client = Arc::new(ScriptedClient::default());
        let (mut manager, mut rx) = TailSessionManager::new(client.clone());
        manager.start_tail("acct-1", "api");
        let session_id = match next_update(&mut manager, &mut rx, "acct-1").await {
            TailUpdate::Connected { session_id, .. } => session_id,
            other => panic!("expected connected, got {other:?}"),
        };

        let sender = client.senders.lock().expect("senders lock").remove(0);
        for text in ["one", "two"] {
            sender
                .send(Ok(vec![cfdeck_core::LogLine {
                    timestamp: chrono::Utc::now(),
                    level: cfdeck_core::LogLevel::Log,
                    text: text.to_string(),
                }]))
                .await
                .expect("send line");
        }
        drop(sender);

        let mut seen = Vec::new();
        loop {
            assert!(manager.poll_next(&session_id));
            assert!(!manager.poll_next(&session_id));
            match next_update(&mut manager, &mut rx, "acct-1").await {
                TailUpdate::Batch { lines, .. } => seen.push(lines[0].text.clone()),
                TailUpdate::Closed { .. } => break,
                other => panic!("unexpected update {other:?}"),
            }
        }
        assert_eq!(seen, vec!["one", "two"]);
        assert_eq!(manager.pane_state(PaneId::Single), Some(TailState::Stopped));
        assert_eq!(manager.stop_tail(&session_id), StopOutcome::AlreadyStopped);
        assert!(client.closed.lock().expect("closed lock").is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn grid_targets_are_deduplicated_and_capped() {
        let client = Arc::new(ScriptedClient::default());
        let (manager, _rx) = TailSessionManager::new(client);
        let mut manager = manager.with_max_grid(2);
        let targets = vec!["a".to_string(), "a".to_string(), "b".to_string(), "c".to_string()];
        let handles = manager.start_parallel_tail("production", "acct-1", &targets);
        assert_eq!(handles.len(), 2);
        assert_eq!(manager.grid_len(), 2);
        assert_eq!(manager.grid_env(), Some("production"));
        assert_eq!(manager.all_grid_pane_scripts(), vec!["a", "b"]);
        assert_eq!(manager.pane_script(PaneId::Grid(1)), Some("b"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn connect_under_previous_account_is_torn_down() {
        let client = Arc::new(ScriptedClient::default());
        let (mut manager, mut rx) = TailSessionManager::new(client.clone());
        manager.start_tail("acct-1", "api");

        let update = next_update(&mut manager, &mut rx, "acct-2").await;
        assert_eq!(
            update,
            TailUpdate::Discarded {
                script_name: "api".to_string(),
                reason: DiscardReason::AccountChanged,
            }
        );
        assert!(!manager.is_tailing("api"));
        assert_eq!(manager.pane_state(PaneId::Single), Some(TailState::Stopped));

        let update = next_update(&mut manager, &mut rx, "acct-2").await;
        assert!(matches!(update, TailUpdate::TornDown { .. }));
        assert_eq!(
            client.closed.lock().expect("closed lock").as_slice(),
            &[SessionId::new("api-1")]
        );
    }
}
