use std::str::FromStr;
use std::time::Duration;

use envconfig::Envconfig;

#[derive(Envconfig, Clone, Debug)]
pub struct KafkaConfig {
    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32, // Maximum time between producer batches during low traffic

    #[envconfig(default = "400")]
    pub kafka_producer_queue_mib: u32, // Size of the in-memory producer queue in mebibytes

    #[envconfig(default = "10000000")]
    pub kafka_producer_queue_messages: u32, // Maximum number of messages in the in-memory producer queue

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32, // Time before we stop retrying producing a message: 20 seconds

    #[envconfig(default = "none")]
    pub kafka_compression_codec: String, // none, gzip, snappy, lz4, zstd

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    // Bounds the startup metadata ping and topic creation requests
    #[envconfig(default = "15000")]
    pub kafka_admin_timeout_ms: u64,
}

impl KafkaConfig {
    pub fn admin_timeout(&self) -> Duration {
        Duration::from_millis(self.kafka_admin_timeout_ms)
    }
}

#[derive(Envconfig, Clone, Debug)]
pub struct ConsumerConfig {
    // Where a consumer group without a stored cursor starts reading
    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: OffsetReset,

    // Offsets are stored by hand once a message is handled, and committed
    // in the background on this interval
    #[envconfig(default = "5000")]
    pub kafka_consumer_auto_commit_interval_ms: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OffsetReset {
    #[default]
    Earliest,
    Latest,
}

impl OffsetReset {
    pub fn as_str(&self) -> &'static str {
        match self {
            OffsetReset::Earliest => "earliest",
            OffsetReset::Latest => "latest",
        }
    }
}

impl FromStr for OffsetReset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_ref() {
            "earliest" | "smallest" | "beginning" => Ok(OffsetReset::Earliest),
            "latest" | "largest" | "end" => Ok(OffsetReset::Latest),
            _ => Err(format!("unknown offset reset policy: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_reset_from_str() {
        assert_eq!("earliest".parse(), Ok(OffsetReset::Earliest));
        assert_eq!("LATEST".parse(), Ok(OffsetReset::Latest));
        assert_eq!("smallest".parse(), Ok(OffsetReset::Earliest));
        assert!("sideways".parse::<OffsetReset>().is_err());
    }
}
