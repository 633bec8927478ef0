pub mod anomaly;
pub mod drawdown;
pub mod kelly;
pub mod manager;

pub use anomaly::{anomaly_score, AnomalyInput};
pub use drawdown::DrawdownState;
pub use kelly::{kelly_fraction, KellySizing};
pub use manager::{ApprovedOrder, RejectReason, RiskInput, RiskManager, RiskVerdict};
