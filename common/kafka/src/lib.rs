pub mod admin;
pub mod config;
pub mod kafka_consumer;
pub mod kafka_producer;
pub mod test;

/// Shared by the producer, consumers and admin client of one process.
pub fn client_config(hosts: &str, config: &config::KafkaConfig) -> rdkafka::ClientConfig {
    let mut client_config = rdkafka::ClientConfig::new();
    client_config.set("bootstrap.servers", hosts);

    if config.kafka_tls {
        client_config
            .set("security.protocol", "ssl")
            .set("enable.ssl.certificate.verification", "false");
    };

    client_config
}
