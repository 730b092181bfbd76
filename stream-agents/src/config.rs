use std::str::FromStr;
use std::time::Duration;

use common_kafka::config::{ConsumerConfig, KafkaConfig};
use envconfig::Envconfig;

use crate::broker::BrokerUrl;
use crate::codec::Codec;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3310")]
    pub port: u16,

    // Also the consumer group of every agent
    #[envconfig(default = "stream-agents")]
    pub app_id: String,

    #[envconfig(default = "kafka://localhost:9092")]
    pub broker_url: BrokerUrl,

    #[envconfig(default = "raw")]
    pub value_serializer: Codec,

    // One printing agent per topic
    #[envconfig(default = "example_kafka_topic1")]
    pub agent_topics: TopicList,

    pub agent_idle_timeout_ms: Option<EnvMsDuration>,

    #[envconfig(default = "1")]
    pub topic_partitions: i32,

    #[envconfig(default = "1")]
    pub topic_replication: i32,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(nested = true)]
    pub consumer: ConsumerConfig,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn agent_idle_timeout(&self) -> Option<Duration> {
        self.agent_idle_timeout_ms.map(|d| d.0)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(Duration::from_millis(ms)))
    }
}

/// Comma separated topic names, blanks dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicList(pub Vec<String>);

impl FromStr for TopicList {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(TopicList(
            s.split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_owned)
                .collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use common_kafka::config::OffsetReset;

    use super::*;

    #[test]
    fn defaults() {
        let config = Config::init_from_hashmap(&HashMap::new()).unwrap();

        assert_eq!(config.bind(), "0.0.0.0:3310");
        assert_eq!(config.app_id, "stream-agents");
        assert_eq!(
            config.broker_url,
            BrokerUrl::Kafka("localhost:9092".to_string())
        );
        assert_eq!(config.value_serializer, Codec::Raw);
        assert_eq!(
            config.agent_topics,
            TopicList(vec!["example_kafka_topic1".to_string()])
        );
        assert_eq!(config.agent_idle_timeout(), None);
        assert_eq!(
            config.consumer.kafka_consumer_offset_reset,
            OffsetReset::Earliest
        );
    }

    #[test]
    fn overrides() {
        let env = HashMap::from([
            ("APP_ID".to_string(), "myapp".to_string()),
            ("BROKER_URL".to_string(), "memory://".to_string()),
            ("VALUE_SERIALIZER".to_string(), "json".to_string()),
            ("AGENT_TOPICS".to_string(), "a, b,,c".to_string()),
            ("AGENT_IDLE_TIMEOUT_MS".to_string(), "1500".to_string()),
            ("KAFKA_CONSUMER_OFFSET_RESET".to_string(), "latest".to_string()),
        ]);
        let config = Config::init_from_hashmap(&env).unwrap();

        assert_eq!(config.app_id, "myapp");
        assert_eq!(config.broker_url, BrokerUrl::Memory);
        assert_eq!(config.value_serializer, Codec::Json);
        assert_eq!(
            config.agent_topics.0,
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
        assert_eq!(
            config.agent_idle_timeout(),
            Some(Duration::from_millis(1500))
        );
        assert_eq!(
            config.consumer.kafka_consumer_offset_reset,
            OffsetReset::Latest
        );
    }

    #[test]
    fn rejects_unknown_serializer() {
        let env = HashMap::from([("VALUE_SERIALIZER".to_string(), "pickle".to_string())]);
        assert!(Config::init_from_hashmap(&env).is_err());
    }
}
