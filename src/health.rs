//! Health Reporting
//!
//! Serving status per logical service, as reported to health checks.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of one logical service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServingStatus {
    Serving,
    NotServing,
    /// The service name was never registered with the reporter
    ServiceUnknown,
}

impl ServingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServingStatus::Serving => "SERVING",
            ServingStatus::NotServing => "NOT_SERVING",
            ServingStatus::ServiceUnknown => "SERVICE_UNKNOWN",
        }
    }
}

impl fmt::Display for ServingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Holds the serving status of every registered service name
#[derive(Debug, Default)]
pub struct HealthReporter {
    statuses: DashMap<String, ServingStatus>,
}

impl HealthReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, service: &str, status: ServingStatus) {
        self.statuses.insert(service.to_string(), status);
    }

    /// Current status of `service`
    pub fn status(&self, service: &str) -> ServingStatus {
        self.statuses
            .get(service)
            .map(|status| *status)
            .unwrap_or(ServingStatus::ServiceUnknown)
    }

    /// True when every known service is serving
    pub fn is_serving(&self) -> bool {
        !self.statuses.is_empty()
            && self
                .statuses
                .iter()
                .all(|entry| *entry.value() == ServingStatus::Serving)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        let health = HealthReporter::new();
        assert_eq!(health.status("svc"), ServingStatus::ServiceUnknown);
        assert!(!health.is_serving());

        health.set("svc", ServingStatus::Serving);
        assert_eq!(health.status("svc"), ServingStatus::Serving);
        assert!(health.is_serving());

        health.set("svc", ServingStatus::NotServing);
        assert!(!health.is_serving());
        assert_eq!(health.status("svc").to_string(), "NOT_SERVING");
    }
}
