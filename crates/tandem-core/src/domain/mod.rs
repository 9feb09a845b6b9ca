//! Domain model (IDs, envelopes, roles, lifecycle).

pub mod envelope;
pub mod ids;
pub mod state;

pub use envelope::{Payload, PayloadEnvelope, Producer, ProducerVersion};
pub use ids::{PairId, PayloadId, ScheduleId, SessionId};
pub use state::{Lifecycle, Role};
