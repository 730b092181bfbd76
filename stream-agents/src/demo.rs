use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::warn;

use crate::agent::Agent;
use crate::app::App;
use crate::error::AppError;
use crate::message::Message;

pub fn agent_name(topic: &str) -> String {
    format!("{topic}-agent")
}

/// Registers one agent per topic that writes every message it receives to
/// `out`, one line each. Undecodable payloads are logged and skipped.
pub async fn register_printers<W>(
    app: &mut App,
    topics: &[String],
    idle_timeout: Option<Duration>,
    out: W,
) -> Result<(), AppError>
where
    W: Write + Send + 'static,
{
    let out = Arc::new(Mutex::new(out));
    for name in topics {
        let topic = app.topic(name).await?;
        let out = out.clone();
        let agent = Agent::new(agent_name(name), topic, move |message: Message| {
            let out = out.clone();
            async move {
                match message.value() {
                    Ok(value) => {
                        let mut out = out.lock().unwrap_or_else(PoisonError::into_inner);
                        writeln!(out, "{value}")?;
                        out.flush()?;
                    }
                    Err(e) => warn!(
                        topic = message.topic(),
                        offset = message.offset(),
                        "skipping undecodable message: {}",
                        e
                    ),
                }
                anyhow::Ok(())
            }
        })
        .idle_timeout(idle_timeout);
        app.add_agent(agent)?;
    }
    Ok(())
}
