pub mod queue;
pub mod state;

pub use queue::{FailedEventAction, OfflineEventQueue, QueuedEvent, ReplaySummary};
pub use state::OfflineState;
