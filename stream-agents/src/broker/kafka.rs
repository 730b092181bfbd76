use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use common_kafka::admin::TopicAdmin;
use common_kafka::config::{ConsumerConfig, KafkaConfig};
use common_kafka::kafka_consumer::{Offset, RecvErr, SingleTopicConsumer};
use common_kafka::kafka_producer::{create_kafka_producer, flush, send_to_kafka, KafkaContext};
use health::HealthHandle;
use rdkafka::producer::FutureProducer;
use tracing::warn;

use crate::broker::{Broker, Received, Record, Subscription, TopicSpec};
use crate::error::BrokerError;
use crate::metrics_consts::{EMPTY_MESSAGES, RECV_ERRORS};

const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// Apache Kafka through librdkafka. One producer and one admin client are
/// shared by the whole process, each subscription gets its own consumer.
pub struct KafkaBroker {
    hosts: String,
    config: KafkaConfig,
    consumer_config: ConsumerConfig,
    producer: FutureProducer<KafkaContext>,
    admin: TopicAdmin,
}

impl KafkaBroker {
    /// Fails when the cluster cannot be reached within the admin timeout.
    pub async fn connect(
        hosts: &str,
        config: KafkaConfig,
        consumer_config: ConsumerConfig,
        liveness: HealthHandle,
    ) -> Result<Self, BrokerError> {
        let producer = create_kafka_producer(hosts, &config, liveness)
            .await
            .map_err(|source| BrokerError::Connection {
                address: hosts.to_owned(),
                source,
            })?;
        let admin = TopicAdmin::new(hosts, &config)?;

        Ok(Self {
            hosts: hosts.to_owned(),
            config,
            consumer_config,
            producer,
            admin,
        })
    }
}

#[async_trait]
impl Broker for KafkaBroker {
    async fn ensure_topic(&self, topic: &TopicSpec) -> Result<(), BrokerError> {
        self.admin
            .ensure_topic(&topic.name, topic.partitions, topic.replication)
            .await?;
        Ok(())
    }

    async fn publish(&self, topic: &str, record: Record) -> Result<(), BrokerError> {
        send_to_kafka(
            &self.producer,
            topic,
            record.key.as_deref(),
            &record.payload,
        )
        .await?;
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<Box<dyn Subscription>, BrokerError> {
        let consumer = SingleTopicConsumer::new(
            &self.hosts,
            &self.config,
            &self.consumer_config,
            group,
            topic,
        )?;
        Ok(Box::new(KafkaSubscription {
            consumer,
            pending: None,
        }))
    }

    async fn close(&self) {
        flush(&self.producer, self.config.admin_timeout());
    }
}

struct KafkaSubscription {
    consumer: SingleTopicConsumer,
    pending: Option<Offset>,
}

#[async_trait]
impl Subscription for KafkaSubscription {
    async fn recv(&mut self) -> Result<Received, BrokerError> {
        loop {
            match self.consumer.recv().await {
                Ok((message, offset)) => {
                    self.pending = Some(offset);
                    return Ok(Received {
                        topic: message.topic,
                        partition: message.partition,
                        offset: message.offset,
                        key: message.key.map(Bytes::from),
                        payload: Bytes::from(message.payload),
                        timestamp_ms: message.timestamp_ms,
                    });
                }
                Err(RecvErr::Empty) => {
                    warn!(topic = self.consumer.topic(), "received empty message");
                    metrics::counter!(EMPTY_MESSAGES, "topic" => self.consumer.topic().to_owned())
                        .increment(1);
                }
                Err(RecvErr::Kafka(e)) => {
                    // librdkafka reconnects on its own, keep waiting
                    warn!(topic = self.consumer.topic(), "kafka receive error: {}", e);
                    metrics::counter!(RECV_ERRORS, "topic" => self.consumer.topic().to_owned())
                        .increment(1);
                    tokio::time::sleep(RECV_ERROR_BACKOFF).await;
                }
                Err(e @ RecvErr::Offset(_)) => return Err(e.into()),
            }
        }
    }

    fn commit(&mut self) -> Result<(), BrokerError> {
        let offset = self.pending.take().ok_or(BrokerError::NothingToCommit)?;
        offset.store()?;
        Ok(())
    }
}
