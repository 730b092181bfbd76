use std::sync::{Arc, Weak};

use rdkafka::{
    consumer::{Consumer, StreamConsumer},
    error::KafkaError,
    Message,
};

use crate::client_config;
use crate::config::{ConsumerConfig, KafkaConfig};

/// A consumer-group member subscribed to exactly one topic. Offsets are
/// never stored automatically: callers store each message's [`Offset`]
/// once they are done with it.
#[derive(Clone)]
pub struct SingleTopicConsumer {
    inner: Arc<Inner>,
}

struct Inner {
    consumer: StreamConsumer,
    topic: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RecvErr {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("Offset error: {0}")]
    Offset(#[from] OffsetErr),
    #[error("Received empty payload")]
    Empty,
}

#[derive(Debug, thiserror::Error)]
pub enum OffsetErr {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("Consumer gone")]
    Gone,
}

#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
    pub timestamp_ms: Option<i64>,
}

impl SingleTopicConsumer {
    pub fn new(
        hosts: &str,
        common_config: &KafkaConfig,
        consumer_config: &ConsumerConfig,
        group: &str,
        topic: &str,
    ) -> Result<Self, KafkaError> {
        let mut client_config = client_config(hosts, common_config);
        client_config
            .set("statistics.interval.ms", "10000")
            .set("group.id", group)
            .set("enable.partition.eof", "false")
            .set("enable.auto.offset.store", "false")
            .set("enable.auto.commit", "true")
            .set(
                "auto.commit.interval.ms",
                consumer_config
                    .kafka_consumer_auto_commit_interval_ms
                    .to_string(),
            )
            .set(
                "auto.offset.reset",
                consumer_config.kafka_consumer_offset_reset.as_str(),
            );

        let consumer: StreamConsumer = client_config.create()?;
        consumer.subscribe(&[topic])?;

        let inner = Inner {
            consumer,
            topic: topic.to_owned(),
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    /// Waits for the next message. Empty (tombstone) payloads have their
    /// offset stored on the spot and are reported as [`RecvErr::Empty`].
    pub async fn recv(&self) -> Result<(ReceivedMessage, Offset), RecvErr> {
        let message = self.inner.consumer.recv().await?;

        let offset = Offset {
            handle: Arc::downgrade(&self.inner),
            partition: message.partition(),
            offset: message.offset(),
        };

        let Some(payload) = message.payload() else {
            offset.store()?;
            return Err(RecvErr::Empty);
        };

        let received = ReceivedMessage {
            topic: message.topic().to_owned(),
            partition: message.partition(),
            offset: message.offset(),
            key: message.key().map(<[u8]>::to_vec),
            payload: payload.to_vec(),
            timestamp_ms: message.timestamp().to_millis(),
        };

        Ok((received, offset))
    }
}

pub struct Offset {
    handle: Weak<Inner>,
    partition: i32,
    offset: i64,
}

impl Offset {
    pub fn partition(&self) -> i32 {
        self.partition
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Marks the message as processed; the next background commit moves the
    /// group cursor past it.
    pub fn store(self) -> Result<(), OffsetErr> {
        let inner = self.handle.upgrade().ok_or(OffsetErr::Gone)?;
        inner
            .consumer
            .store_offset(&inner.topic, self.partition, self.offset)?;
        Ok(())
    }
}
