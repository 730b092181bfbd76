use std::collections::HashMap;
use std::ops::Add;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use time::OffsetDateTime;
use tracing::{debug, warn};

/// Liveness tracking for the long-running loops of a worker process.
///
/// Every agent and every broker client registers a component and must keep
/// reporting before its deadline. The process is live when at least one
/// component is registered and every component that is still running
/// reported healthy recently. Components that stopped on purpose (an agent
/// reaching its idle timeout, for example) no longer count against it.
#[derive(Default, Debug)]
pub struct HealthStatus {
    pub healthy: bool,
    pub components: HashMap<String, ComponentStatus>,
}

impl IntoResponse for HealthStatus {
    /// 200 when healthy, 500 otherwise. The body lists every component.
    fn into_response(self) -> Response {
        let body = format!("{self:?}");
        match self.healthy {
            true => (StatusCode::OK, body),
            false => (StatusCode::INTERNAL_SERVER_ERROR, body),
        }
        .into_response()
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ComponentStatus {
    /// Registered, has not reported yet
    Starting,
    /// Reported healthy, must report again before the deadline
    HealthyUntil(OffsetDateTime),
    /// Reported a failure
    Unhealthy(String),
    /// Finished cleanly, ignored by the aggregate status
    Stopped,
    /// Computed when a HealthyUntil deadline has passed
    Stalled,
}

impl ComponentStatus {
    pub fn is_healthy(&self) -> bool {
        match self {
            ComponentStatus::HealthyUntil(until) => until.gt(&OffsetDateTime::now_utc()),
            _ => false,
        }
    }
}

type Components = Arc<RwLock<HashMap<String, ComponentStatus>>>;

#[derive(Clone)]
pub struct HealthHandle {
    component: String,
    deadline: Duration,
    components: Components,
}

impl HealthHandle {
    pub fn component(&self) -> &str {
        &self.component
    }

    /// Must be called more often than the registered deadline.
    pub fn report_healthy(&self) {
        self.report_status(ComponentStatus::HealthyUntil(
            OffsetDateTime::now_utc().add(self.deadline),
        ))
    }

    pub fn report_unhealthy(&self, reason: impl Into<String>) {
        self.report_status(ComponentStatus::Unhealthy(reason.into()))
    }

    pub fn report_stopped(&self) {
        self.report_status(ComponentStatus::Stopped)
    }

    pub fn report_status(&self, status: ComponentStatus) {
        match self.components.write() {
            Ok(mut map) => {
                map.insert(self.component.clone(), status);
            }
            // The probe keeps failing and the orchestrator restarts us
            Err(_) => warn!("poisoned health registry lock"),
        }
    }
}

#[derive(Clone)]
pub struct HealthRegistry {
    name: String,
    components: Components,
}

impl HealthRegistry {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            components: Default::default(),
        }
    }

    /// Registers a component in the Starting state. Registering an existing
    /// name resets it.
    pub fn register(&self, component: impl Into<String>, deadline: Duration) -> HealthHandle {
        let handle = HealthHandle {
            component: component.into(),
            deadline,
            components: self.components.clone(),
        };
        handle.report_status(ComponentStatus::Starting);
        handle
    }

    /// Aggregate status, usable directly as an axum handler result.
    pub fn get_status(&self) -> HealthStatus {
        let Ok(components) = self.components.read() else {
            warn!("poisoned health registry lock");
            return HealthStatus::default();
        };

        let now = OffsetDateTime::now_utc();
        let mut result = HealthStatus {
            healthy: !components.is_empty(),
            components: HashMap::with_capacity(components.len()),
        };

        for (name, status) in components.iter() {
            let status = match status {
                ComponentStatus::HealthyUntil(until) if until.le(&now) => ComponentStatus::Stalled,
                other => other.clone(),
            };
            match status {
                ComponentStatus::HealthyUntil(_) | ComponentStatus::Stopped => {}
                _ => result.healthy = false,
            }
            result.components.insert(name.clone(), status);
        }

        match result.healthy {
            true => debug!("{} health check ok", self.name),
            false => warn!("{} health check failed: {:?}", self.name, result.components),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::ops::Sub;

    use super::*;

    const DEADLINE: Duration = Duration::from_secs(30);

    #[test]
    fn defaults_to_unhealthy() {
        let registry = HealthRegistry::new("liveness");
        assert!(!registry.get_status().healthy);
    }

    #[test]
    fn one_component() {
        let registry = HealthRegistry::new("liveness");
        let handle = registry.register("greetings-agent", DEADLINE);

        let status = registry.get_status();
        assert!(!status.healthy);
        assert_eq!(
            status.components.get("greetings-agent"),
            Some(&ComponentStatus::Starting)
        );

        handle.report_healthy();
        assert!(registry.get_status().healthy);

        handle.report_unhealthy("handler failed");
        let status = registry.get_status();
        assert!(!status.healthy);
        assert_eq!(
            status.components.get("greetings-agent"),
            Some(&ComponentStatus::Unhealthy("handler failed".to_string()))
        );
    }

    #[test]
    fn stale_report_is_stalled() {
        let registry = HealthRegistry::new("liveness");
        let handle = registry.register("one", DEADLINE);

        handle.report_status(ComponentStatus::HealthyUntil(
            OffsetDateTime::now_utc().sub(time::Duration::seconds(1)),
        ));
        let status = registry.get_status();
        assert!(!status.healthy);
        assert_eq!(status.components.get("one"), Some(&ComponentStatus::Stalled));
    }

    #[test]
    fn stopped_components_do_not_fail_the_check() {
        let registry = HealthRegistry::new("liveness");
        let running = registry.register("one", DEADLINE);
        let idle = registry.register("two", DEADLINE);

        running.report_healthy();
        assert!(!registry.get_status().healthy);

        idle.report_stopped();
        assert!(registry.get_status().healthy);

        running.report_unhealthy("broker gone");
        assert!(!registry.get_status().healthy);
    }

    #[test]
    fn into_response() {
        let nok = HealthStatus::default().into_response();
        assert_eq!(nok.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let ok = HealthStatus {
            healthy: true,
            components: Default::default(),
        }
        .into_response();
        assert_eq!(ok.status(), StatusCode::OK);
    }
}
