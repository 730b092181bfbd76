use std::time::Duration;

use health::HealthRegistry;
use rdkafka::mocking::MockCluster;
use rdkafka::producer::{DefaultProducerContext, FutureProducer};

use crate::config::{ConsumerConfig, KafkaConfig, OffsetReset};
use crate::kafka_producer::{create_kafka_producer, KafkaContext};

pub fn mock_kafka_config() -> KafkaConfig {
    KafkaConfig {
        kafka_producer_linger_ms: 0,
        kafka_producer_queue_mib: 50,
        kafka_producer_queue_messages: 1000,
        kafka_message_timeout_ms: 5000,
        kafka_compression_codec: "none".to_string(),
        kafka_tls: false,
        kafka_admin_timeout_ms: 5000,
    }
}

pub fn mock_consumer_config() -> ConsumerConfig {
    ConsumerConfig {
        kafka_consumer_offset_reset: OffsetReset::Earliest,
        kafka_consumer_auto_commit_interval_ms: 100,
    }
}

/// Starts a single-broker mock cluster with `topic` pre-created, and a
/// producer connected to it.
pub async fn create_mock_kafka(
    topic: &str,
) -> (
    MockCluster<'static, DefaultProducerContext>,
    FutureProducer<KafkaContext>,
) {
    let registry = HealthRegistry::new("liveness");
    let handle = registry.register("producer", Duration::from_secs(30));
    let cluster = MockCluster::new(1).expect("failed to create mock brokers");
    cluster
        .create_topic(topic, 1, 1)
        .expect("failed to create mock topic");

    let producer = create_kafka_producer(&cluster.bootstrap_servers(), &mock_kafka_config(), handle)
        .await
        .expect("failed to create mocked kafka producer");

    (cluster, producer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kafka_consumer::SingleTopicConsumer;
    use crate::kafka_producer::send_to_kafka;

    #[tokio::test]
    async fn produced_message_reaches_the_consumer() {
        let topic = "example_kafka_topic1";
        let (cluster, producer) = create_mock_kafka(topic).await;

        // The first sends can race the broker coming up
        let mut sent = false;
        for _ in 0..20 {
            if send_to_kafka(&producer, topic, None, b"hello").await.is_ok() {
                sent = true;
                break;
            }
        }
        assert!(sent, "mock broker never acknowledged the message");

        let consumer = SingleTopicConsumer::new(
            &cluster.bootstrap_servers(),
            &mock_kafka_config(),
            &mock_consumer_config(),
            "mock-group",
            topic,
        )
        .expect("failed to create consumer");

        let (message, offset) = tokio::time::timeout(Duration::from_secs(30), consumer.recv())
            .await
            .expect("timed out waiting for the message")
            .expect("failed to receive");

        assert_eq!(message.topic, topic);
        assert_eq!(message.payload, b"hello".to_vec());
        assert_eq!(message.key, None);
        assert_eq!(offset.partition(), message.partition);
        offset.store().expect("failed to store offset");
    }
}
