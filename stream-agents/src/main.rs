use clap::Parser;
use envconfig::Envconfig;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use stream_agents::cli::{self, Cli};
use stream_agents::config::Config;
use stream_agents::error::AppError;

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(
            EnvFilter::builder()
                .with_default_directive(tracing::Level::INFO.into())
                .from_env_lossy(),
        );
    tracing_subscriber::registry().with(log_layer).init();
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Parsed first so that a bare invocation prints usage without touching the broker
    let cli = Cli::parse();
    setup_tracing();

    let config = Config::init_from_env()?;
    if let Err(e) = cli::run(cli, &config).await {
        error!("stream-agents exiting: {}", e);
        return Err(e);
    }
    Ok(())
}
