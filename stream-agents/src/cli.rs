use bytes::Bytes;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::signal::unix::SignalKind;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::app::App;
use crate::codec::Codec;
use crate::config::Config;
use crate::demo;
use crate::error::AppError;
use crate::server;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None, arg_required_else_help = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Start the agents and the liveness server, runs until interrupted
    Worker,

    /// Append one message to a topic, creating the topic if needed
    Send {
        topic: String,
        payload: String,

        #[arg(long)]
        key: Option<String>,

        /// raw, json or binary. Defaults to VALUE_SERIALIZER
        #[arg(long)]
        codec: Option<Codec>,
    },

    /// List the agents the worker would start
    Agents,
}

pub async fn run(cli: Cli, config: &Config) -> Result<(), AppError> {
    match cli.command {
        Command::Worker => worker(config).await,
        Command::Send {
            topic,
            payload,
            key,
            codec,
        } => {
            let app = App::connect(config).await?;
            let topic = app
                .topic_with(&topic, codec.unwrap_or(config.value_serializer))
                .await?;
            topic.send(key.map(Bytes::from), payload).await?;
            app.broker().close().await;
            Ok(())
        }
        Command::Agents => {
            // Read from the config alone, listing must not create topics
            for topic in &config.agent_topics.0 {
                println!("{}\t{}", demo::agent_name(topic), topic);
            }
            Ok(())
        }
    }
}

async fn demo_app(config: &Config) -> Result<App, AppError> {
    let mut app = App::connect(config).await?;
    demo::register_printers(
        &mut app,
        &config.agent_topics.0,
        config.agent_idle_timeout(),
        std::io::stdout(),
    )
    .await?;
    Ok(app)
}

async fn worker(config: &Config) -> Result<(), AppError> {
    // Bound first, a taken port fails before any agent starts
    let listener = TcpListener::bind(config.bind()).await?;
    let recorder = server::setup_metrics_recorder()?;
    let app = demo_app(config).await?;

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    let router = server::router(app.liveness().clone(), Some(recorder));
    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        let stop = server_shutdown.clone();
        let result = server::serve(listener, router, async move { stop.cancelled().await }).await;
        if let Err(e) = &result {
            error!("liveness server failed, stopping agents: {}", e);
            server_shutdown.cancel();
        }
        result
    });

    let outcomes = app.run_worker(shutdown.clone()).await;

    // Every agent may have stopped on its own, the server goes down with them
    shutdown.cancel();
    match server.await {
        Ok(result) => result?,
        Err(e) => return Err(AppError::Io(std::io::Error::other(e))),
    }

    let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
    if failed > 0 {
        return Err(AppError::AgentsFailed(failed));
    }
    info!("worker exited cleanly");
    Ok(())
}

async fn cancel_on_signal(shutdown: CancellationToken) {
    match wait_for_shutdown_signal().await {
        Ok(()) => shutdown.cancel(),
        Err(e) => error!("failed to install signal handlers: {}", e),
    }
}

async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            info!("received SIGINT");
        }
        _ = sigterm.recv() => info!("received SIGTERM"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use clap::error::ErrorKind;
    use envconfig::Envconfig;

    use super::*;

    #[test]
    fn no_arguments_prints_usage() {
        let err = Cli::try_parse_from(["stream-agents"]).unwrap_err();
        assert_eq!(
            err.kind(),
            ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
        );
    }

    #[test]
    fn parses_subcommands() {
        let cli = Cli::try_parse_from(["stream-agents", "worker"]).unwrap();
        assert_eq!(cli.command, Command::Worker);

        let cli = Cli::try_parse_from([
            "stream-agents",
            "send",
            "example_kafka_topic1",
            "hello",
            "--codec",
            "json",
        ])
        .unwrap();
        assert_eq!(
            cli.command,
            Command::Send {
                topic: "example_kafka_topic1".to_string(),
                payload: "hello".to_string(),
                key: None,
                codec: Some(Codec::Json),
            }
        );

        let unknown_codec = ["stream-agents", "send", "t", "p", "--codec", "xml"];
        assert!(Cli::try_parse_from(unknown_codec).is_err());
    }

    #[tokio::test]
    async fn worker_returns_once_every_agent_is_idle() {
        let env = HashMap::from([
            ("BROKER_URL".to_string(), "memory://".to_string()),
            ("AGENT_TOPICS".to_string(), "a,b".to_string()),
            ("AGENT_IDLE_TIMEOUT_MS".to_string(), "100".to_string()),
            ("BIND_HOST".to_string(), "127.0.0.1".to_string()),
            ("BIND_PORT".to_string(), "0".to_string()),
        ]);
        let config = Config::init_from_hashmap(&env).unwrap();
        let cli = Cli::try_parse_from(["stream-agents", "worker"]).unwrap();

        run(cli, &config).await.unwrap();
    }

    #[tokio::test]
    async fn worker_fails_when_the_bind_port_is_taken() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();
        let env = HashMap::from([
            ("BROKER_URL".to_string(), "memory://".to_string()),
            ("AGENT_IDLE_TIMEOUT_MS".to_string(), "300".to_string()),
            ("BIND_HOST".to_string(), "127.0.0.1".to_string()),
            ("BIND_PORT".to_string(), port.to_string()),
        ]);
        let config = Config::init_from_hashmap(&env).unwrap();
        let cli = Cli::try_parse_from(["stream-agents", "worker"]).unwrap();

        assert!(matches!(run(cli, &config).await, Err(AppError::Io(_))));
    }

    #[tokio::test]
    async fn listing_agents_does_not_touch_the_broker() {
        // Nothing listens there, connecting would fail
        let env = HashMap::from([
            ("BROKER_URL".to_string(), "kafka://127.0.0.1:1".to_string()),
            ("AGENT_TOPICS".to_string(), "a,b".to_string()),
        ]);
        let config = Config::init_from_hashmap(&env).unwrap();
        let cli = Cli::try_parse_from(["stream-agents", "agents"]).unwrap();

        let listed = tokio::time::timeout(std::time::Duration::from_secs(1), run(cli, &config))
            .await
            .expect("listing agents should not wait on the broker");
        assert!(listed.is_ok());
    }
}
