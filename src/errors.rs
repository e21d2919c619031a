use serde::{Deserialize, Serialize};

use crate::connector::ConnectorError;

/// Failure taxonomy used for recording, retry decisions, and the operator
/// monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    AuthFailure,
    RateLimited,
    ValidationError,
    TransientNetwork,
    UnrecoverableProject,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// How one failure should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub retryable: bool,
    /// Project-level failures halt the whole run, not just one batch.
    pub project_level: bool,
}

pub fn classify(error: &ConnectorError) -> Classification {
    match error {
        ConnectorError::Auth(_) => Classification {
            kind: ErrorKind::AuthFailure,
            severity: Severity::Critical,
            retryable: false,
            project_level: true,
        },
        ConnectorError::RateLimited { .. } => Classification {
            kind: ErrorKind::RateLimited,
            severity: Severity::Medium,
            retryable: true,
            project_level: false,
        },
        ConnectorError::Validation { .. } => Classification {
            kind: ErrorKind::ValidationError,
            severity: Severity::Low,
            retryable: false,
            project_level: false,
        },
        ConnectorError::Network(_) => Classification {
            kind: ErrorKind::TransientNetwork,
            severity: Severity::Medium,
            retryable: true,
            project_level: false,
        },
        ConnectorError::Upstream { status, .. } => match status {
            401 | 403 => Classification {
                kind: ErrorKind::AuthFailure,
                severity: Severity::Critical,
                retryable: false,
                project_level: true,
            },
            429 => Classification {
                kind: ErrorKind::RateLimited,
                severity: Severity::Medium,
                retryable: true,
                project_level: false,
            },
            s if *s >= 500 => Classification {
                kind: ErrorKind::TransientNetwork,
                severity: Severity::Medium,
                retryable: true,
                project_level: false,
            },
            _ => Classification {
                kind: ErrorKind::Unknown,
                severity: Severity::High,
                retryable: true,
                project_level: false,
            },
        },
        ConnectorError::Unsupported(_) => Classification {
            kind: ErrorKind::UnrecoverableProject,
            severity: Severity::Critical,
            retryable: false,
            project_level: true,
        },
    }
}

/// Operator-facing remediation hint for common failure classes.
pub fn remediation(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::AuthFailure => {
            "Reconnect the affected CRM: the access token has expired or been revoked."
        }
        ErrorKind::RateLimited => {
            "The destination is throttling requests. Lower the concurrent batch count or wait before retrying."
        }
        ErrorKind::ValidationError => {
            "The destination rejected the record. Check for missing required fields or duplicate keys, then retry the record."
        }
        ErrorKind::TransientNetwork => {
            "A network interruption occurred. Retry; if it persists, check connectivity to the CRM endpoint."
        }
        ErrorKind::UnrecoverableProject => {
            "The migration cannot continue as configured. Review the project setup before restarting."
        }
        ErrorKind::Unknown => "An unclassified error occurred. Inspect the message and retry once.",
    }
}

impl From<ErrorKind> for String {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::AuthFailure => "auth_failure",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::TransientNetwork => "transient_network",
            ErrorKind::UnrecoverableProject => "unrecoverable_project",
            ErrorKind::Unknown => "unknown",
        }
        .to_string()
    }
}

impl From<String> for ErrorKind {
    fn from(kind: String) -> Self {
        match kind.as_str() {
            "auth_failure" => ErrorKind::AuthFailure,
            "rate_limited" => ErrorKind::RateLimited,
            "validation_error" => ErrorKind::ValidationError,
            "transient_network" => ErrorKind::TransientNetwork,
            "unrecoverable_project" => ErrorKind::UnrecoverableProject,
            _ => ErrorKind::Unknown,
        }
    }
}

impl From<Severity> for String {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
        .to_string()
    }
}

impl From<String> for Severity {
    fn from(severity: String) -> Self {
        match severity.as_str() {
            "low" => Severity::Low,
            "high" => Severity::High,
            "critical" => Severity::Critical,
            _ => Severity::Medium,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_is_terminal_and_project_level() {
        let c = classify(&ConnectorError::Auth("revoked".into()));
        assert_eq!(c.kind, ErrorKind::AuthFailure);
        assert!(!c.retryable);
        assert!(c.project_level);
    }

    #[test]
    fn upstream_status_codes_map_to_taxonomy() {
        let rate = classify(&ConnectorError::Upstream {
            status: 429,
            message: "slow down".into(),
        });
        assert_eq!(rate.kind, ErrorKind::RateLimited);

        let transient = classify(&ConnectorError::Upstream {
            status: 503,
            message: "unavailable".into(),
        });
        assert_eq!(transient.kind, ErrorKind::TransientNetwork);
        assert!(transient.retryable);

        let auth = classify(&ConnectorError::Upstream {
            status: 401,
            message: "unauthorized".into(),
        });
        assert_eq!(auth.kind, ErrorKind::AuthFailure);
    }

    #[test]
    fn kind_round_trips_through_storage() {
        for kind in [
            ErrorKind::AuthFailure,
            ErrorKind::RateLimited,
            ErrorKind::ValidationError,
            ErrorKind::TransientNetwork,
            ErrorKind::UnrecoverableProject,
            ErrorKind::Unknown,
        ] {
            assert_eq!(ErrorKind::from(String::from(kind)), kind);
        }
    }
}
