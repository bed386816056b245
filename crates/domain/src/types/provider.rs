//! Storage provider identity and health

use serde::{Deserialize, Serialize};

/// Which backend serves queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Relational store
    Primary,
    /// Document store
    Secondary,
    /// Local key/value storage
    Local,
}

crate::impl_domain_status_conversions!(ProviderKind {
    Primary => "primary",
    Secondary => "secondary",
    Local => "local",
});

impl ProviderKind {
    pub fn is_remote(&self) -> bool {
        !matches!(self, ProviderKind::Local)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

crate::impl_domain_status_conversions!(HealthStatus {
    Healthy => "healthy",
    Unhealthy => "unhealthy",
});

/// Result of a liveness probe against the active backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub provider: Option<ProviderKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthReport {
    pub fn healthy(provider: ProviderKind) -> Self {
        Self { status: HealthStatus::Healthy, provider: Some(provider), error: None }
    }

    pub fn unhealthy(provider: Option<ProviderKind>, error: impl Into<String>) -> Self {
        Self { status: HealthStatus::Unhealthy, provider, error: Some(error.into()) }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn provider_names() {
        assert_eq!(ProviderKind::Primary.to_string(), "primary");
        assert_eq!("LOCAL".parse::<ProviderKind>().unwrap(), ProviderKind::Local);
        assert!(ProviderKind::Secondary.is_remote());
        assert!(!ProviderKind::Local.is_remote());
    }

    #[test]
    fn health_report_shape() {
        let report = HealthReport::healthy(ProviderKind::Secondary);
        assert!(report.is_healthy());
        assert_eq!(
            serde_json::to_value(&report).unwrap(),
            json!({"status": "healthy", "provider": "secondary"})
        );

        let report = HealthReport::unhealthy(None, "not initialized");
        assert!(!report.is_healthy());
        assert_eq!(report.error.as_deref(), Some("not initialized"));
    }
}
