pub mod cooldown;
pub mod tracker;

pub use cooldown::{CooldownDecision, StopManager};
pub use tracker::{ClosedTrade, ExitReason, PositionStatus, PositionTracker, TrackedPosition};
