use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::FutureExt;
use health::HealthHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::AgentError;
use crate::message::Message;
use crate::metrics_consts::{HANDLER_ERRORS, HANDLER_TIME, MESSAGES_HANDLED};
use crate::topic::Topic;

/// How often a waiting agent tells the liveness registry it is still there.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

type Handler = Arc<dyn Fn(Message) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Why an agent stopped without failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentExit {
    Shutdown,
    IdleTimeout,
}

/// A handler bound to a topic. The handler is called once per message, in
/// the order the broker stored them, and the next message is only read once
/// it returned.
#[derive(Clone)]
pub struct Agent {
    name: String,
    topic: Topic,
    idle_timeout: Option<Duration>,
    handler: Handler,
}

impl Agent {
    pub fn new<F, Fut>(name: impl Into<String>, topic: Topic, handler: F) -> Self
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            topic,
            idle_timeout: None,
            handler: Arc::new(move |message| handler(message).boxed()),
        }
    }

    /// Stop cleanly when no message arrives for this long.
    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Consumes the topic as part of `group` until `shutdown` fires, the idle
    /// timeout elapses, or something fails.
    ///
    /// A handler error leaves the failed message uncommitted and stops the
    /// agent. Whether it is seen again is up to the broker cursor.
    pub async fn run(
        self,
        group: &str,
        liveness: HealthHandle,
        shutdown: CancellationToken,
    ) -> Result<AgentExit, AgentError> {
        let topic = self.topic.name().to_owned();
        let labels = [("agent", self.name.clone()), ("topic", topic.clone())];

        let mut subscription = self
            .topic
            .broker()
            .subscribe(&topic, group)
            .await
            .map_err(|source| AgentError::Subscribe {
                agent: self.name.clone(),
                topic: topic.clone(),
                source,
            })?;

        info!(
            agent = self.name.as_str(),
            topic = topic.as_str(),
            group,
            "agent started"
        );
        liveness.report_healthy();

        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        let mut idle_deadline = self.idle_timeout.map(|t| tokio::time::Instant::now() + t);

        loop {
            let received = tokio::select! {
                _ = shutdown.cancelled() => return Ok(AgentExit::Shutdown),
                _ = heartbeat.tick() => {
                    liveness.report_healthy();
                    continue;
                }
                _ = idle(idle_deadline) => {
                    info!(agent = self.name.as_str(), "no message before idle timeout");
                    return Ok(AgentExit::IdleTimeout);
                }
                received = subscription.recv() => received,
            };

            let received = received.map_err(|source| AgentError::Receive {
                agent: self.name.clone(),
                topic: topic.clone(),
                source,
            })?;
            let (partition, offset) = (received.partition, received.offset);
            let message = Message::new(received, self.topic.codec());

            let started = Instant::now();
            let result = (self.handler)(message).await;
            metrics::histogram!(HANDLER_TIME, &labels)
                .record(started.elapsed().as_millis() as f64);

            if let Err(e) = result {
                error!(
                    agent = self.name.as_str(),
                    topic = topic.as_str(),
                    partition,
                    offset,
                    "handler failed: {:#}",
                    e
                );
                metrics::counter!(HANDLER_ERRORS, &labels).increment(1);
                liveness.report_unhealthy(format!("handler failed at offset {offset}"));
                return Err(AgentError::Handler {
                    agent: self.name,
                    topic,
                    partition,
                    offset,
                    source: e.into(),
                });
            }

            subscription
                .commit()
                .map_err(|source| AgentError::Commit {
                    agent: self.name.clone(),
                    topic: topic.clone(),
                    partition,
                    offset,
                    source,
                })?;
            metrics::counter!(MESSAGES_HANDLED, &labels).increment(1);
            liveness.report_healthy();
            idle_deadline = self.idle_timeout.map(|t| tokio::time::Instant::now() + t);
        }
    }
}

async fn idle(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use bytes::Bytes;
    use health::{ComponentStatus, HealthRegistry};

    use super::*;
    use crate::broker::{Broker, MemoryBroker};
    use crate::topic::{get_topic, produce_to_topic};

    const GROUP: &str = "agent-tests";

    async fn topic(broker: &MemoryBroker) -> Topic {
        let client: Arc<dyn Broker> = Arc::new(broker.clone());
        get_topic("greetings", &client).await.unwrap()
    }

    #[tokio::test]
    async fn stops_on_shutdown() {
        let broker = MemoryBroker::default();
        let agent = Agent::new("greetings-agent", topic(&broker).await, |_| async {
            anyhow::Ok(())
        });
        let registry = HealthRegistry::new("liveness");
        let shutdown = CancellationToken::new();

        let task = tokio::spawn(agent.run(
            GROUP,
            registry.register("greetings-agent", Duration::from_secs(30)),
            shutdown.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished());
        assert!(registry.get_status().healthy);

        shutdown.cancel();
        assert_eq!(task.await.unwrap().unwrap(), AgentExit::Shutdown);
    }

    #[tokio::test]
    async fn stops_after_idle_timeout() {
        let broker = MemoryBroker::default();
        let agent = Agent::new("greetings-agent", topic(&broker).await, |_| async {
            anyhow::Ok(())
        })
        .idle_timeout(Some(Duration::from_millis(50)));
        let registry = HealthRegistry::new("liveness");

        let exit = agent
            .run(
                GROUP,
                registry.register("greetings-agent", Duration::from_secs(30)),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(exit, AgentExit::IdleTimeout);
    }

    #[tokio::test]
    async fn handler_error_keeps_the_cursor() {
        let broker = MemoryBroker::default();
        let topic = topic(&broker).await;
        let seen = Arc::new(Mutex::new(Vec::new()));

        let recorder = seen.clone();
        let agent = Agent::new("greetings-agent", topic.clone(), move |message: Message| {
            let recorder = recorder.clone();
            async move {
                let payload = message.raw().clone();
                recorder.lock().unwrap().push(payload.clone());
                anyhow::ensure!(payload != Bytes::from_static(b"boom"), "refusing boom");
                Ok(())
            }
        });

        produce_to_topic(&topic, b"fine").await.unwrap();
        produce_to_topic(&topic, b"boom").await.unwrap();
        produce_to_topic(&topic, b"never").await.unwrap();

        let registry = HealthRegistry::new("liveness");
        let handle = registry.register("greetings-agent", Duration::from_secs(30));
        let err = agent
            .run(GROUP, handle, CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::Handler { offset: 1, .. }));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![Bytes::from_static(b"fine"), Bytes::from_static(b"boom")]
        );
        assert_eq!(broker.committed("greetings", GROUP), Some(1));
        assert!(matches!(
            registry.get_status().components.get("greetings-agent"),
            Some(ComponentStatus::Unhealthy(_))
        ));
    }
}
