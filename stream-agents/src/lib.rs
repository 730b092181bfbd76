pub mod agent;
pub mod app;
pub mod broker;
pub mod cli;
pub mod codec;
pub mod config;
pub mod demo;
pub mod error;
pub mod message;
pub mod metrics_consts;
pub mod server;
pub mod topic;

pub use agent::{Agent, AgentExit};
pub use app::{AgentOutcome, App};
pub use broker::{Broker, BrokerUrl, MemoryBroker};
pub use codec::{Codec, Payload};
pub use message::Message;
pub use topic::{get_topic, get_topic_with, produce_to_topic, Topic};
