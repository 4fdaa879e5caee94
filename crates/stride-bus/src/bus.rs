use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use crate::CloudEvent;

/// Handler verdict for one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    Ack,
    Nack,
}

/// One delivery of a message to a subscription. `attempt` starts at 1 and
/// increments on every redelivery; handlers use it to degrade gracefully on
/// later passes.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub event: CloudEvent,
    pub attempt: u32,
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, delivery: Delivery) -> HandlerOutcome;
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish an event on a topic. Returns the message id.
    async fn publish(&self, topic: &str, event: CloudEvent) -> anyhow::Result<String>;
    /// Attach a named subscription to a topic. Every subscription receives
    /// every message published on the topic.
    async fn subscribe(
        &self,
        topic: &str,
        subscription: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Redeliveries stop after this many attempts.
    pub max_deliveries: u32,
    /// A handler that has not returned by this deadline is treated as nack.
    pub ack_deadline: Duration,
    /// Base redelivery backoff; doubles per attempt.
    pub redelivery_backoff: Duration,
    /// Queue depth per subscription.
    pub queue_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_deliveries: 5,
            ack_deadline: Duration::from_secs(30),
            redelivery_backoff: Duration::from_millis(100),
            queue_capacity: 256,
        }
    }
}

struct Subscription {
    name: String,
    tx: mpsc::Sender<Delivery>,
}

/// Single-process bus: per-subscription mpsc queues drained by worker
/// tasks. Matches the at-least-once contract of the hosted bus it stands in
/// for, including bounded redelivery and an ack deadline.
pub struct InProcessBus {
    config: BusConfig,
    topics: RwLock<HashMap<String, Vec<Subscription>>>,
}

impl InProcessBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            topics: RwLock::new(HashMap::new()),
        }
    }

    fn spawn_worker(
        &self,
        topic: &str,
        subscription: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> mpsc::Sender<Delivery> {
        let (tx, mut rx) = mpsc::channel::<Delivery>(self.config.queue_capacity);
        let redeliver = tx.clone();
        let config = self.config.clone();
        let topic = topic.to_string();
        let subscription = subscription.to_string();

        tokio::spawn(async move {
            while let Some(delivery) = rx.recv().await {
                let attempt = delivery.attempt;
                let message_id = delivery.event.id.clone();
                let outcome =
                    match tokio::time::timeout(config.ack_deadline, handler.handle(delivery.clone()))
                        .await
                    {
                        Ok(outcome) => outcome,
                        Err(_) => {
                            warn!(
                                "subscription '{subscription}' exceeded ack deadline for {message_id}"
                            );
                            HandlerOutcome::Nack
                        }
                    };

                match outcome {
                    HandlerOutcome::Ack => {
                        debug!("{topic}/{subscription}: acked {message_id} (attempt {attempt})");
                    }
                    HandlerOutcome::Nack if attempt >= config.max_deliveries => {
                        warn!(
                            "{topic}/{subscription}: dropping {message_id} after {attempt} deliveries"
                        );
                    }
                    HandlerOutcome::Nack => {
                        let backoff = config.redelivery_backoff * 2u32.saturating_pow(attempt - 1);
                        let redeliver = redeliver.clone();
                        let mut next = delivery;
                        next.attempt += 1;
                        tokio::spawn(async move {
                            tokio::time::sleep(backoff).await;
                            let _ = redeliver.send(next).await;
                        });
                    }
                }
            }
        });

        tx
    }
}

#[async_trait]
impl MessageBus for InProcessBus {
    async fn publish(&self, topic: &str, event: CloudEvent) -> anyhow::Result<String> {
        let message_id = event.id.clone();
        let topics = self.topics.read().await;
        let Some(subs) = topics.get(topic) else {
            debug!("publish on '{topic}' with no subscriptions");
            return Ok(message_id);
        };
        for sub in subs {
            sub.tx
                .send(Delivery {
                    event: event.clone(),
                    attempt: 1,
                })
                .await
                .map_err(|_| {
                    anyhow::anyhow!("subscription '{}' on '{topic}' is closed", sub.name)
                })?;
        }
        Ok(message_id)
    }

    async fn subscribe(
        &self,
        topic: &str,
        subscription: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> anyhow::Result<()> {
        let mut topics = self.topics.write().await;
        let subs = topics.entry(topic.to_string()).or_default();
        if subs.iter().any(|s| s.name == subscription) {
            anyhow::bail!("subscription '{subscription}' already exists on '{topic}'");
        }
        let tx = self.spawn_worker(topic, subscription, handler);
        subs.push(Subscription {
            name: subscription.to_string(),
            tx,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Notify;

    struct Counting {
        calls: AtomicU32,
        ack_on_attempt: u32,
        done: Notify,
    }

    #[async_trait]
    impl MessageHandler for Counting {
        async fn handle(&self, delivery: Delivery) -> HandlerOutcome {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            assert_eq!(delivery.attempt, n);
            if delivery.attempt >= self.ack_on_attempt {
                self.done.notify_one();
                HandlerOutcome::Ack
            } else {
                HandlerOutcome::Nack
            }
        }
    }

    fn fast_config() -> BusConfig {
        BusConfig {
            max_deliveries: 3,
            ack_deadline: Duration::from_millis(500),
            redelivery_backoff: Duration::from_millis(5),
            queue_capacity: 16,
        }
    }

    #[tokio::test]
    async fn nack_triggers_redelivery_with_incremented_attempt() {
        let bus = InProcessBus::new(fast_config());
        let handler = Arc::new(Counting {
            calls: AtomicU32::new(0),
            ack_on_attempt: 2,
            done: Notify::new(),
        });
        bus.subscribe("t", "s", handler.clone()).await.unwrap();
        bus.publish("t", CloudEvent::new("test", "t", &1).unwrap())
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(2), handler.done.notified())
            .await
            .unwrap();
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn redelivery_stops_at_max_deliveries() {
        let bus = InProcessBus::new(fast_config());
        let handler = Arc::new(Counting {
            calls: AtomicU32::new(0),
            ack_on_attempt: u32::MAX,
            done: Notify::new(),
        });
        bus.subscribe("t", "s", handler.clone()).await.unwrap();
        bus.publish("t", CloudEvent::new("test", "t", &1).unwrap())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn every_subscription_sees_the_message() {
        let bus = InProcessBus::new(fast_config());
        let a = Arc::new(Counting {
            calls: AtomicU32::new(0),
            ack_on_attempt: 1,
            done: Notify::new(),
        });
        let b = Arc::new(Counting {
            calls: AtomicU32::new(0),
            ack_on_attempt: 1,
            done: Notify::new(),
        });
        bus.subscribe("t", "a", a.clone()).await.unwrap();
        bus.subscribe("t", "b", b.clone()).await.unwrap();
        bus.publish("t", CloudEvent::new("test", "t", &1).unwrap())
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(2), a.done.notified())
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(2), b.done.notified())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn duplicate_subscription_name_is_rejected() {
        let bus = InProcessBus::new(fast_config());
        let handler = Arc::new(Counting {
            calls: AtomicU32::new(0),
            ack_on_attempt: 1,
            done: Notify::new(),
        });
        bus.subscribe("t", "s", handler.clone()).await.unwrap();
        assert!(bus.subscribe("t", "s", handler).await.is_err());
    }
}
