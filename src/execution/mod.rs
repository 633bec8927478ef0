pub mod pricing;
pub mod service;

pub use pricing::MakerPricer;
pub use service::{ExecutionOutcome, ExecutionService};
