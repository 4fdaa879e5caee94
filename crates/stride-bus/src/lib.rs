//! Publish/subscribe plumbing for the Stride pipeline.
//!
//! Messages cross the bus as CloudEvents-style envelopes with JSON bodies.
//! Delivery is at-least-once: a nacked (or timed-out) delivery is retried
//! with backoff until the configured max-deliveries bound, so handlers must
//! be idempotent with respect to their observable side effects.

mod bus;
mod envelope;
mod offload;

pub use bus::{BusConfig, Delivery, HandlerOutcome, InProcessBus, MessageBus, MessageHandler};
pub use envelope::CloudEvent;
pub use offload::{Offloader, DEFAULT_OFFLOAD_THRESHOLD};

/// Raw canonical activities from every ingress path. Single consumer: the
/// orchestrator.
pub const TOPIC_RAW_ACTIVITY: &str = "topic-raw-activity";
/// Enriched events; one subscription per destination.
pub const TOPIC_ENRICHED_ACTIVITY: &str = "topic-enriched-activity";
/// Periodic trigger for the parkrun auto-populator.
pub const TOPIC_PARKRUN_RESULTS_TRIGGER: &str = "topic-parkrun-results-trigger";
/// Lag watchdog notifications for runs stuck in RUNNING.
pub const TOPIC_ENRICHMENT_LAG: &str = "topic-enrichment-lag";
