use std::time::Duration;

use health::HealthHandle;
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::ClientContext;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::client_config;
use crate::config::KafkaConfig;

pub struct KafkaContext {
    liveness: HealthHandle,
}

impl From<HealthHandle> for KafkaContext {
    fn from(value: HealthHandle) -> Self {
        KafkaContext { liveness: value }
    }
}

impl rdkafka::ClientContext for KafkaContext {
    fn stats(&self, _: rdkafka::Statistics) {
        // The main rdkafka loop is running and calling us
        self.liveness.report_healthy();
    }
}

pub async fn create_kafka_producer(
    hosts: &str,
    config: &KafkaConfig,
    liveness: HealthHandle,
) -> Result<FutureProducer<KafkaContext>, KafkaError> {
    let mut client_config = client_config(hosts, config);
    client_config
        .set("statistics.interval.ms", "10000")
        .set("linger.ms", config.kafka_producer_linger_ms.to_string())
        .set(
            "message.timeout.ms",
            config.kafka_message_timeout_ms.to_string(),
        )
        .set(
            "compression.codec",
            config.kafka_compression_codec.to_owned(),
        )
        .set(
            "queue.buffering.max.kbytes",
            (config.kafka_producer_queue_mib * 1024).to_string(),
        )
        .set(
            "queue.buffering.max.messages",
            config.kafka_producer_queue_messages.to_string(),
        );

    debug!("rdkafka configuration: {:?}", client_config);
    let api: FutureProducer<KafkaContext> = client_config.create_with_context(liveness.into())?;

    // "Ping" the Kafka brokers by requesting metadata
    match api.client().fetch_metadata(None, config.admin_timeout()) {
        Ok(metadata) => {
            info!(
                "Successfully connected to Kafka brokers. Found {} topics.",
                metadata.topics().len()
            );
        }
        Err(error) => {
            error!("Failed to fetch metadata from Kafka brokers: {:?}", error);
            return Err(error);
        }
    }

    Ok(api)
}

#[derive(Error, Debug)]
pub enum KafkaProduceError {
    #[error("failed to produce to kafka: {error}")]
    KafkaProduceError { error: KafkaError },
    #[error("failed to produce to kafka (timeout)")]
    KafkaProduceCanceled,
}

/// Enqueues one record and waits for the broker acknowledgement.
pub async fn send_to_kafka<C: ClientContext + 'static>(
    kafka_producer: &FutureProducer<C>,
    topic: &str,
    key: Option<&[u8]>,
    payload: &[u8],
) -> Result<(), KafkaProduceError> {
    let record: FutureRecord<'_, [u8], [u8]> = FutureRecord {
        topic,
        partition: None,
        payload: Some(payload),
        key,
        timestamp: None,
        headers: None,
    };

    let delivery = kafka_producer
        .send_result(record)
        .map_err(|(error, _)| KafkaProduceError::KafkaProduceError { error })?;

    match delivery.await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err((error, _))) => Err(KafkaProduceError::KafkaProduceError { error }),
        Err(_) => Err(KafkaProduceError::KafkaProduceCanceled),
    }
}

/// Waits for every queued record to be delivered, used on shutdown.
pub fn flush<C: ClientContext + 'static>(kafka_producer: &FutureProducer<C>, timeout: Duration) {
    if let Err(error) = kafka_producer.flush(timeout) {
        error!("failed to flush kafka producer: {}", error);
    }
}
