//! Lifecycle sinks: the pre-wired consumers the worker reports to.
//!
//! Sinks are injected once when the worker is built; no per-request
//! subscription happens. A sink never fails the job: problems are logged and
//! swallowed, since the job outcome is already decided when it is reported.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::bus::EventBus;
use crate::lifecycle::LifecycleEvent;

#[async_trait]
pub trait LifecycleSink: Send + Sync {
    async fn emit(&self, event: &LifecycleEvent);
}

#[async_trait]
impl<S> LifecycleSink for Arc<S>
where
    S: LifecycleSink + ?Sized,
{
    async fn emit(&self, event: &LifecycleEvent) {
        (**self).emit(event).await
    }
}

/// Forwards each event to every inner sink, in registration order.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn LifecycleSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn LifecycleSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl core::fmt::Debug for FanoutSink {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FanoutSink")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

#[async_trait]
impl LifecycleSink for FanoutSink {
    async fn emit(&self, event: &LifecycleEvent) {
        for sink in &self.sinks {
            sink.emit(event).await;
        }
    }
}

/// Publishes events onto an [`EventBus`] for external observers.
#[derive(Debug)]
pub struct BusSink<B> {
    bus: B,
}

impl<B> BusSink<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl<B> LifecycleSink for BusSink<B>
where
    B: EventBus<LifecycleEvent>,
{
    async fn emit(&self, event: &LifecycleEvent) {
        match self.bus.publish(event.clone()) {
            Ok(report) if report.missed > 0 => debug!(
                job_id = %event.job.job_id,
                event = event.name(),
                missed = report.missed,
                "lifecycle observers fell behind"
            ),
            Ok(_) => {}
            Err(e) => {
                warn!(job_id = %event.job.job_id, event = event.name(), error = %e, "lifecycle publish failed")
            }
        }
    }
}

/// Keeps every event in memory (tests and local debugging).
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(LifecycleEvent::name).collect()
    }
}

#[async_trait]
impl LifecycleSink for RecordingSink {
    async fn emit(&self, event: &LifecycleEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryEventBus, JobRef, LifecycleKind};
    use chrono::Utc;
    use taskrelay_core::{JobId, QueueName};

    fn event(kind: LifecycleKind) -> LifecycleEvent {
        LifecycleEvent::new(
            JobRef {
                job_id: JobId::new("job-1").unwrap(),
                display_name: "Job".to_string(),
                connection: "cloudtasks".to_string(),
                queue: QueueName::new("default").unwrap(),
                attempt: 1,
            },
            Utc::now(),
            kind,
        )
    }

    #[tokio::test]
    async fn fanout_preserves_order_for_every_sink() {
        let first = Arc::new(RecordingSink::new());
        let second = Arc::new(RecordingSink::new());
        let fanout = FanoutSink::new().with(first.clone()).with(second.clone());

        fanout.emit(&event(LifecycleKind::Started)).await;
        fanout.emit(&event(LifecycleKind::Succeeded)).await;

        assert_eq!(first.names(), vec!["started", "succeeded"]);
        assert_eq!(second.names(), vec!["started", "succeeded"]);
    }

    #[tokio::test]
    async fn bus_sink_publishes_to_subscribers() {
        let bus: Arc<InMemoryEventBus<LifecycleEvent>> = Arc::new(InMemoryEventBus::new());
        let subscription = bus.subscribe();
        let sink = BusSink::new(bus.clone());

        sink.emit(&event(LifecycleKind::Started)).await;

        let received = subscription.drain();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].name(), "started");
    }

    #[tokio::test]
    async fn full_observer_does_not_stall_emission() {
        let bus: Arc<InMemoryEventBus<LifecycleEvent>> = Arc::new(InMemoryEventBus::with_buffer(1));
        let subscription = bus.subscribe();
        let sink = BusSink::new(bus.clone());

        sink.emit(&event(LifecycleKind::Started)).await;
        sink.emit(&event(LifecycleKind::Succeeded)).await;
        sink.emit(&event(LifecycleKind::Succeeded)).await;

        assert_eq!(subscription.missed(), 2);
        let received = subscription.drain();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].name(), "started");
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(event(LifecycleKind::Started)).unwrap();
        assert_eq!(json["type"], "started");
        assert_eq!(json["job"]["job_id"], "job-1");
    }
}
