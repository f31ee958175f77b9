pub mod ids;
pub mod envelope;

pub use ids::JobId;
pub use envelope::{JobEnvelope, JobOutcome, RecoveryStrategy};
