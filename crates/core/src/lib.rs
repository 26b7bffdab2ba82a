//! `taskrelay-core`: delivery domain building blocks.
//!
//! This crate contains **pure** types and rules for handling a push delivery
//! (no IO, no async): payload decoding, connection lookup, attempt/retry
//! arithmetic and the handling error taxonomy.

pub mod attempt;
pub mod clock;
pub mod connection;
pub mod delivery;
pub mod error;
pub mod id;
pub mod mode;
pub mod payload;

pub use attempt::{AttemptContext, JobDescriptor, RetryPolicy, RetryPolicyOverride};
pub use clock::{Clock, FixedClock, SystemClock};
pub use connection::{ConnectionConfig, ConnectionRegistry, QueueConfigResolver};
pub use delivery::InboundDelivery;
pub use error::{HandlingError, HandlingResult};
pub use id::{JobId, QueueName, TaskName};
pub use mode::RuntimeMode;
pub use payload::{CommandData, CommandReference, JobPayload};
