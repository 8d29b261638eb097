//! Domain model (IDs, envelope, status, actions, errors, events, policies).

pub mod action;
pub mod decision;
pub mod envelope;
pub mod errors;
pub mod events;
pub mod ids;
pub mod retry;
pub mod state;
pub mod stats;

pub use action::{Action, Invocation};
pub use decision::{Decider, Decision, DefaultDecider, MAX_RETRIES_EXCEEDED};
pub use envelope::{
    CreateRequest, DEFAULT_PRIORITY, DEFAULT_QUEUE, Envelope, EnvelopeDefaults, FailureDetail,
    HistoryEntry, Metadata, Payload, RequestMetadata, ResourceId,
};
pub use errors::{ErrorCode, QueueError};
pub use events::QueueEvent;
pub use ids::{EnvelopeId, MessageId};
pub use retry::RetryPolicy;
pub use state::EnvelopeStatus;
pub use stats::QueueStats;
