use common_kafka::admin::TopicAdminError;
use common_kafka::kafka_consumer::{OffsetErr, RecvErr};
use common_kafka::kafka_producer::KafkaProduceError;
use rdkafka::error::KafkaError;
use thiserror::Error;

/// Errors talking to the message broker.
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("could not connect to broker at {address}: {source}")]
    Connection {
        address: String,
        #[source]
        source: KafkaError,
    },
    #[error("invalid broker url: {0}")]
    InvalidUrl(String),
    #[error("unknown topic: {0}")]
    UnknownTopic(String),
    #[error("failed to create topic: {0}")]
    TopicAdmin(#[from] TopicAdminError),
    #[error("failed to publish: {0}")]
    Produce(#[from] KafkaProduceError),
    #[error("failed to receive: {0}")]
    Recv(#[from] RecvErr),
    #[error("failed to store offset: {0}")]
    Offset(#[from] OffsetErr),
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("nothing received yet, cannot commit")]
    NothingToCommit,
}

/// Payload encoding and decoding failures.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("invalid json payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

#[derive(Error, Debug)]
pub enum ProduceError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("agent {agent} could not subscribe to {topic}: {source}")]
    Subscribe {
        agent: String,
        topic: String,
        #[source]
        source: BrokerError,
    },
    #[error("agent {agent} stopped receiving from {topic}: {source}")]
    Receive {
        agent: String,
        topic: String,
        #[source]
        source: BrokerError,
    },
    #[error("agent {agent} could not commit {topic}[{partition}]@{offset}: {source}")]
    Commit {
        agent: String,
        topic: String,
        partition: i32,
        offset: i64,
        #[source]
        source: BrokerError,
    },
    #[error("agent {agent} failed handling {topic}[{partition}]@{offset}: {source}")]
    Handler {
        agent: String,
        topic: String,
        partition: i32,
        offset: i64,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("agent {agent} panicked")]
    Panicked { agent: String },
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("invalid configuration: {0}")]
    Config(#[from] envconfig::Error),
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error(transparent)]
    Produce(#[from] ProduceError),
    #[error("an agent named {0} is already registered")]
    DuplicateAgent(String),
    #[error("failed to install metrics recorder: {0}")]
    Metrics(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0} agent(s) failed")]
    AgentsFailed(usize),
}
