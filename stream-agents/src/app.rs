use std::collections::HashSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use health::HealthRegistry;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::agent::{Agent, AgentExit, HEARTBEAT_INTERVAL};
use crate::broker::{self, Broker, TopicSpec};
use crate::codec::{Codec, Payload};
use crate::config::Config;
use crate::error::{AgentError, AppError, BrokerError, ProduceError};
use crate::message::Message;
use crate::metrics_consts::{AGENTS_RUNNING, AGENTS_STOPPED};
use crate::topic::{get_topic_with, Topic};

/// An agent counts as stalled after missing this many heartbeats.
const AGENT_LIVENESS_DEADLINE: Duration = Duration::from_secs(HEARTBEAT_INTERVAL.as_secs() * 3);

/// How an agent ended once the worker is done.
#[derive(Debug)]
pub struct AgentOutcome {
    pub agent: String,
    pub result: Result<AgentExit, AgentError>,
}

/// An application: an identity, a broker client shared by every topic and
/// agent, and the agents the worker runs.
pub struct App {
    id: String,
    broker: Arc<dyn Broker>,
    codec: Codec,
    partitions: i32,
    replication: i32,
    agents: Vec<Agent>,
    liveness: HealthRegistry,
}

impl App {
    /// Connects to the configured broker. Kafka clusters are pinged, so an
    /// unreachable broker fails here.
    pub async fn connect(config: &Config) -> Result<Self, AppError> {
        let liveness = HealthRegistry::new("liveness");
        let broker = broker::connect(
            &config.broker_url,
            &config.kafka,
            &config.consumer,
            &liveness,
        )
        .await?;
        info!(
            app = config.app_id.as_str(),
            broker = %config.broker_url,
            "connected to broker"
        );

        Ok(Self::with_broker(&config.app_id, broker)
            .with_liveness(liveness)
            .codec(config.value_serializer)
            .topic_defaults(config.topic_partitions, config.topic_replication))
    }

    pub fn with_broker(id: &str, broker: Arc<dyn Broker>) -> Self {
        Self {
            id: id.to_owned(),
            broker,
            codec: Codec::Raw,
            partitions: 1,
            replication: 1,
            agents: Vec::new(),
            liveness: HealthRegistry::new("liveness"),
        }
    }

    fn with_liveness(mut self, liveness: HealthRegistry) -> Self {
        self.liveness = liveness;
        self
    }

    /// Codec for topics that do not pick their own.
    pub fn codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    pub fn topic_defaults(mut self, partitions: i32, replication: i32) -> Self {
        self.partitions = partitions;
        self.replication = replication;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    pub fn liveness(&self) -> &HealthRegistry {
        &self.liveness
    }

    /// Resolves a topic with the app defaults, creating it when missing.
    pub async fn topic(&self, name: &str) -> Result<Topic, BrokerError> {
        self.topic_with(name, self.codec).await
    }

    pub async fn topic_with(&self, name: &str, codec: Codec) -> Result<Topic, BrokerError> {
        let spec = TopicSpec {
            name: name.to_owned(),
            partitions: self.partitions,
            replication: self.replication,
        };
        get_topic_with(spec, codec, &self.broker).await
    }

    pub async fn send(
        &self,
        topic: &Topic,
        payload: impl Into<Payload>,
    ) -> Result<(), ProduceError> {
        topic.send(None, payload).await
    }

    /// Registers a handler on `topic`, named after it.
    pub fn agent<F, Fut>(&mut self, topic: &Topic, handler: F) -> Result<&mut Self, AppError>
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name = format!("{}-agent", topic.name());
        self.add_agent(Agent::new(name, topic.clone(), handler))
    }

    pub fn add_agent(&mut self, agent: Agent) -> Result<&mut Self, AppError> {
        if self.agents.iter().any(|a| a.name() == agent.name()) {
            return Err(AppError::DuplicateAgent(agent.name().to_owned()));
        }
        self.agents.push(agent);
        Ok(self)
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    /// Runs every agent until `shutdown` fires or all of them stopped. A
    /// failing agent is logged and reported unhealthy, the others carry on.
    pub async fn run_worker(self, shutdown: CancellationToken) -> Vec<AgentOutcome> {
        if self.agents.is_empty() {
            warn!(app = self.id.as_str(), "no agents registered, waiting for shutdown");
            shutdown.cancelled().await;
            return Vec::new();
        }

        let mut seen = HashSet::new();
        let mut tasks = JoinSet::new();
        for agent in self.agents {
            let name = agent.name().to_owned();
            if !seen.insert(agent.topic().name().to_owned()) {
                warn!(agent = name.as_str(), "several agents share a topic and group");
            }

            let liveness = self.liveness.register(name.clone(), AGENT_LIVENESS_DEADLINE);
            let group = self.id.clone();
            let shutdown = shutdown.clone();
            tasks.spawn(async move {
                let result = AssertUnwindSafe(agent.run(&group, liveness.clone(), shutdown))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| {
                        Err(AgentError::Panicked {
                            agent: name.clone(),
                        })
                    });
                match &result {
                    Ok(_) => liveness.report_stopped(),
                    Err(e) => liveness.report_unhealthy(e.to_string()),
                }
                AgentOutcome {
                    agent: name,
                    result,
                }
            });
        }
        metrics::gauge!(AGENTS_RUNNING).set(tasks.len() as f64);
        info!(app = self.id.as_str(), agents = tasks.len(), "worker started");

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    // Only reachable if the task was aborted
                    error!("agent task did not complete: {}", e);
                    continue;
                }
            };
            match &outcome.result {
                Ok(exit) => info!(agent = outcome.agent.as_str(), ?exit, "agent stopped"),
                Err(e) => error!(agent = outcome.agent.as_str(), "agent failed: {}", e),
            }
            metrics::counter!(AGENTS_STOPPED).increment(1);
            metrics::gauge!(AGENTS_RUNNING).set(tasks.len() as f64);
            outcomes.push(outcome);
        }

        self.broker.close().await;
        info!(app = self.id.as_str(), "worker stopped");
        outcomes
    }
}
