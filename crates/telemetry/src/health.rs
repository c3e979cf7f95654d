//! Pipeline health: reachability of both ends plus the outcome of the
//! last cycle and the last quality check.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Health status for a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Not checked yet
    Unknown,
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

#[derive(Debug, Clone)]
struct ComponentState {
    status: HealthStatus,
    message: Option<String>,
    checked_at: Option<DateTime<Utc>>,
    consecutive_failures: u64,
}

/// Health of one pipeline component.
#[derive(Debug)]
pub struct ComponentHealth {
    name: &'static str,
    state: RwLock<ComponentState>,
}

impl ComponentHealth {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            state: RwLock::new(ComponentState {
                status: HealthStatus::Unknown,
                message: None,
                checked_at: None,
                consecutive_failures: 0,
            }),
        }
    }

    pub fn set_healthy(&self) {
        let mut state = self.state.write();
        state.status = HealthStatus::Healthy;
        state.message = None;
        state.checked_at = Some(Utc::now());
        state.consecutive_failures = 0;
    }

    pub fn set_unhealthy(&self, msg: impl Into<String>) {
        let mut state = self.state.write();
        state.status = HealthStatus::Unhealthy;
        state.message = Some(msg.into());
        state.checked_at = Some(Utc::now());
        state.consecutive_failures += 1;
    }

    /// Record a failure that is expected to clear on retry. The component
    /// stays degraded until `limit` failures in a row, then turns unhealthy.
    pub fn record_failure(&self, msg: impl Into<String>, limit: u64) {
        let mut state = self.state.write();
        state.consecutive_failures += 1;
        state.status = if state.consecutive_failures >= limit {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Degraded
        };
        state.message = Some(msg.into());
        state.checked_at = Some(Utc::now());
    }

    pub fn status(&self) -> HealthStatus {
        self.state.read().status
    }

    pub fn is_healthy(&self) -> bool {
        self.status().is_healthy()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn message(&self) -> Option<String> {
        self.state.read().message.clone()
    }

    pub fn consecutive_failures(&self) -> u64 {
        self.state.read().consecutive_failures
    }

    fn report(&self) -> ComponentHealthReport {
        let state = self.state.read().clone();
        ComponentHealthReport {
            name: self.name.to_string(),
            status: state.status,
            message: state.message,
            checked_at: state.checked_at,
            consecutive_failures: state.consecutive_failures,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub components: Vec<ComponentHealthReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealthReport {
    pub name: String,
    pub status: HealthStatus,
    pub message: Option<String>,
    pub checked_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u64,
}

/// Health of the whole pipeline.
pub struct HealthRegistry {
    pub queue: ComponentHealth,
    pub store: ComponentHealth,
    /// Last cycle outcome
    pub cycle: ComponentHealth,
    /// Last quality gate result
    pub quality: ComponentHealth,
}

impl HealthRegistry {
    pub const fn new() -> Self {
        Self {
            queue: ComponentHealth::new("queue"),
            store: ComponentHealth::new("store"),
            cycle: ComponentHealth::new("cycle"),
            quality: ComponentHealth::new("quality"),
        }
    }

    fn components(&self) -> [&ComponentHealth; 4] {
        [&self.queue, &self.store, &self.cycle, &self.quality]
    }

    /// The worst known component status wins. Unchecked components are ignored.
    pub fn report(&self) -> HealthReport {
        let components: Vec<_> = self.components().iter().map(|c| c.report()).collect();

        let known = components
            .iter()
            .map(|c| c.status)
            .filter(|s| *s != HealthStatus::Unknown);
        let status = known.fold(HealthStatus::Unknown, |worst, s| match (worst, s) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        });

        HealthReport { status, components }
    }

    /// A cycle can only succeed when both ends are reachable.
    pub fn is_ready(&self) -> bool {
        self.queue.is_healthy() && self.store.is_healthy()
    }
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static HEALTH: HealthRegistry = HealthRegistry::new();

/// Get the global health registry.
pub fn health() -> &'static HealthRegistry {
    &HEALTH
}
