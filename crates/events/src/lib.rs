//! Job lifecycle events and the sinks that consume them.

pub mod bus;
pub mod in_memory_bus;
pub mod lifecycle;
pub mod sink;

pub use bus::{EventBus, PublishReport, Subscription};
pub use in_memory_bus::{DEFAULT_SUBSCRIBER_BUFFER, InMemoryBusError, InMemoryEventBus};
pub use lifecycle::{ExceptionInfo, JobRef, LifecycleEvent, LifecycleKind};
pub use sink::{BusSink, FanoutSink, LifecycleSink, RecordingSink};
