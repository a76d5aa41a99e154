//! Live log tailing for the single-tail pane and the parallel grid.

pub mod manager;
pub mod session;

pub use manager::{
    DiscardReason, StartToken, StopOutcome, TailEvent, TailHandle, TailSessionManager, TailUpdate,
    DEFAULT_MAX_GRID,
};
pub use session::{PaneId, TailPoll, TailSession, TailState};
