use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use common_kafka::config::{ConsumerConfig, KafkaConfig};
use health::HealthRegistry;

use crate::error::BrokerError;

pub mod kafka;
pub mod memory;

pub use kafka::KafkaBroker;
pub use memory::MemoryBroker;

/// rdkafka reports statistics every 10 seconds
const KAFKA_LIVENESS_DEADLINE: Duration = Duration::from_secs(30);

/// Where the broker lives: `kafka://host:port[,host:port]` (the scheme is
/// optional) or `memory://` for an in-process broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerUrl {
    Kafka(String),
    Memory,
}

impl FromStr for BrokerUrl {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (scheme, rest) = match s.split_once("://") {
            Some((scheme, rest)) => (scheme.to_lowercase(), rest),
            None => ("kafka".to_string(), s),
        };

        match scheme.as_str() {
            "memory" => Ok(BrokerUrl::Memory),
            "kafka" => {
                let hosts: Vec<&str> = rest
                    .split(',')
                    .map(str::trim)
                    .filter(|h| !h.is_empty())
                    .collect();
                if hosts.is_empty() || hosts.iter().any(|h| !h.contains(':')) {
                    return Err(BrokerError::InvalidUrl(s.to_owned()));
                }
                Ok(BrokerUrl::Kafka(hosts.join(",")))
            }
            _ => Err(BrokerError::InvalidUrl(s.to_owned())),
        }
    }
}

impl fmt::Display for BrokerUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerUrl::Kafka(hosts) => write!(f, "kafka://{hosts}"),
            BrokerUrl::Memory => f.write_str("memory://"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSpec {
    pub name: String,
    pub partitions: i32,
    pub replication: i32,
}

impl TopicSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            partitions: 1,
            replication: 1,
        }
    }
}

/// An encoded message on its way to the broker.
#[derive(Debug, Clone)]
pub struct Record {
    pub key: Option<Bytes>,
    pub payload: Bytes,
}

/// An encoded message as handed out by a subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct Received {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Bytes>,
    pub payload: Bytes,
    pub timestamp_ms: Option<i64>,
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// Creates the topic when it does not exist yet. Calling it again for an
    /// existing topic succeeds.
    async fn ensure_topic(&self, topic: &TopicSpec) -> Result<(), BrokerError>;

    /// Appends one record and returns once the broker acknowledged it.
    async fn publish(&self, topic: &str, record: Record) -> Result<(), BrokerError>;

    /// Joins `group` on `topic`. The subscription starts at the group's
    /// stored cursor.
    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<Box<dyn Subscription>, BrokerError>;

    /// Flushes anything still buffered.
    async fn close(&self) {}
}

#[async_trait]
pub trait Subscription: Send {
    /// Waits until the next message is available. Dropping the future before
    /// it completes loses nothing.
    async fn recv(&mut self) -> Result<Received, BrokerError>;

    /// Advances the group cursor past the message last returned by `recv`.
    fn commit(&mut self) -> Result<(), BrokerError>;
}

pub async fn connect(
    url: &BrokerUrl,
    kafka_config: &KafkaConfig,
    consumer_config: &ConsumerConfig,
    liveness: &HealthRegistry,
) -> Result<Arc<dyn Broker>, BrokerError> {
    match url {
        BrokerUrl::Kafka(hosts) => {
            let handle = liveness.register("kafka-client", KAFKA_LIVENESS_DEADLINE);
            let broker =
                KafkaBroker::connect(hosts, kafka_config.clone(), consumer_config.clone(), handle)
                    .await?;
            Ok(Arc::new(broker))
        }
        BrokerUrl::Memory => Ok(Arc::new(MemoryBroker::new(
            consumer_config.kafka_consumer_offset_reset,
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_url_from_str() {
        assert_eq!(
            "kafka://localhost:9092".parse::<BrokerUrl>().unwrap(),
            BrokerUrl::Kafka("localhost:9092".to_string())
        );
        assert_eq!(
            "kafka:9092".parse::<BrokerUrl>().unwrap(),
            BrokerUrl::Kafka("kafka:9092".to_string())
        );
        assert_eq!(
            "kafka://a:9092, b:9092".parse::<BrokerUrl>().unwrap(),
            BrokerUrl::Kafka("a:9092,b:9092".to_string())
        );
        assert_eq!(
            "memory://".parse::<BrokerUrl>().unwrap(),
            BrokerUrl::Memory
        );
    }

    #[test]
    fn broker_url_rejects_garbage() {
        assert!("".parse::<BrokerUrl>().is_err());
        assert!("kafka://".parse::<BrokerUrl>().is_err());
        assert!("localhost".parse::<BrokerUrl>().is_err());
        assert!("redis://localhost:6379".parse::<BrokerUrl>().is_err());
    }

    #[test]
    fn broker_url_display() {
        assert_eq!(
            BrokerUrl::Kafka("a:9092,b:9092".to_string()).to_string(),
            "kafka://a:9092,b:9092"
        );
        assert_eq!(BrokerUrl::Memory.to_string(), "memory://");
    }
}
