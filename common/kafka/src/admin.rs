use std::time::Duration;

use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication, TopicResult};
use rdkafka::client::DefaultClientContext;
use rdkafka::error::KafkaError;
use rdkafka::types::RDKafkaErrorCode;
use thiserror::Error;
use tracing::{debug, info};

use crate::client_config;
use crate::config::KafkaConfig;

#[derive(Error, Debug)]
pub enum TopicAdminError {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("broker refused to create topic {topic}: {code}")]
    Rejected {
        topic: String,
        code: RDKafkaErrorCode,
    },
    #[error("broker returned no result for topic {0}")]
    MissingResult(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicCreation {
    Created,
    AlreadyExisted,
}

pub struct TopicAdmin {
    client: AdminClient<DefaultClientContext>,
    timeout: Duration,
}

impl TopicAdmin {
    pub fn new(hosts: &str, config: &KafkaConfig) -> Result<Self, KafkaError> {
        let client: AdminClient<DefaultClientContext> = client_config(hosts, config).create()?;
        Ok(Self {
            client,
            timeout: config.admin_timeout(),
        })
    }

    /// Creates the topic unless it is already there.
    pub async fn ensure_topic(
        &self,
        name: &str,
        partitions: i32,
        replication: i32,
    ) -> Result<TopicCreation, TopicAdminError> {
        let new_topic = NewTopic::new(name, partitions, TopicReplication::Fixed(replication));
        // Without a request timeout librdkafka waits its own 60s default
        let options = AdminOptions::new()
            .operation_timeout(Some(self.timeout))
            .request_timeout(Some(self.timeout));

        let results = self.client.create_topics(&[new_topic], &options).await?;
        let creation = creation_outcome(name, results)?;
        if creation == TopicCreation::Created {
            info!(topic = name, partitions, replication, "created topic");
        } else {
            debug!(topic = name, "topic already exists");
        }
        Ok(creation)
    }
}

fn creation_outcome(
    name: &str,
    results: Vec<TopicResult>,
) -> Result<TopicCreation, TopicAdminError> {
    match results.into_iter().next() {
        Some(Ok(_)) => Ok(TopicCreation::Created),
        Some(Err((_, RDKafkaErrorCode::TopicAlreadyExists))) => Ok(TopicCreation::AlreadyExisted),
        Some(Err((topic, code))) => Err(TopicAdminError::Rejected { topic, code }),
        None => Err(TopicAdminError::MissingResult(name.to_owned())),
    }
}
