use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, error};

use crate::broker::{Broker, Record, TopicSpec};
use crate::codec::{Codec, Payload};
use crate::error::{BrokerError, ProduceError};
use crate::metrics_consts::{MESSAGES_PRODUCED, PRODUCE_ERRORS};

/// A topic that is known to exist on the broker it was resolved against.
/// Only [`get_topic`] and [`get_topic_with`] hand these out.
#[derive(Clone)]
pub struct Topic {
    spec: TopicSpec,
    codec: Codec,
    broker: Arc<dyn Broker>,
}

impl fmt::Debug for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Topic")
            .field("spec", &self.spec)
            .field("codec", &self.codec)
            .finish_non_exhaustive()
    }
}

impl Topic {
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn partitions(&self) -> i32 {
        self.spec.partitions
    }

    pub fn replication(&self) -> i32 {
        self.spec.replication
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub(crate) fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    /// Encodes the payload with the topic codec and appends it.
    pub async fn send(
        &self,
        key: Option<Bytes>,
        payload: impl Into<Payload>,
    ) -> Result<(), ProduceError> {
        let payload = self.codec.encode(&payload.into())?;
        let record = Record { key, payload };

        match self.broker.publish(self.name(), record).await {
            Ok(()) => {
                metrics::counter!(MESSAGES_PRODUCED, "topic" => self.spec.name.clone())
                    .increment(1);
                debug!(topic = self.name(), "message produced");
                Ok(())
            }
            Err(e) => {
                metrics::counter!(PRODUCE_ERRORS, "topic" => self.spec.name.clone()).increment(1);
                error!(topic = self.name(), "failed to produce message: {}", e);
                Err(e.into())
            }
        }
    }
}

/// Resolves `name` to a topic handle with a single partition and the raw
/// codec, creating the topic if it does not exist yet.
pub async fn get_topic(name: &str, client: &Arc<dyn Broker>) -> Result<Topic, BrokerError> {
    get_topic_with(TopicSpec::new(name), Codec::Raw, client).await
}

pub async fn get_topic_with(
    spec: TopicSpec,
    codec: Codec,
    client: &Arc<dyn Broker>,
) -> Result<Topic, BrokerError> {
    client.ensure_topic(&spec).await?;
    Ok(Topic {
        spec,
        codec,
        broker: client.clone(),
    })
}

/// Appends one message to an already resolved topic.
pub async fn produce_to_topic(
    topic: &Topic,
    message: impl Into<Payload>,
) -> Result<(), ProduceError> {
    topic.send(None, message).await
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::broker::MemoryBroker;

    fn memory() -> (MemoryBroker, Arc<dyn Broker>) {
        let broker = MemoryBroker::default();
        let client: Arc<dyn Broker> = Arc::new(broker.clone());
        (broker, client)
    }

    #[tokio::test]
    async fn get_topic_creates_once() {
        let (broker, client) = memory();

        let first = get_topic("example_kafka_topic1", &client).await.unwrap();
        let second = get_topic("example_kafka_topic1", &client).await.unwrap();

        assert_eq!(first.name(), second.name());
        assert_eq!(first.partitions(), 1);
        assert_eq!(broker.topic_names(), vec!["example_kafka_topic1"]);
    }

    #[tokio::test]
    async fn produce_appends_encoded_payloads() {
        let (broker, client) = memory();
        let topic = get_topic_with(TopicSpec::new("scores"), Codec::Json, &client)
            .await
            .unwrap();

        produce_to_topic(&topic, json!({"score": 3})).await.unwrap();
        assert_eq!(broker.record_count("scores"), 1);

        // Raw bytes must already be json for a json topic
        let err = produce_to_topic(&topic, b"not json").await.unwrap_err();
        assert!(matches!(err, ProduceError::Codec(_)));
        assert_eq!(broker.record_count("scores"), 1);
    }
}
