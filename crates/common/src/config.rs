//! Common configuration types for RTC coordinator components.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Environment variable overriding the tracing filter.
pub const LOG_FILTER_VAR: &str = "RUST_LOG";

/// Environment variable selecting JSON-formatted logs.
pub const LOG_JSON_VAR: &str = "RTC_LOG_JSON";

/// Observability configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// `EnvFilter` directive string
    pub log_filter: String,
    /// Enable JSON-formatted logs
    pub json_logs: bool,
}

impl ObservabilityConfig {
    /// Build from environment-style variables, falling back to `default_filter`.
    ///
    /// `RTC_LOG_JSON` accepts `true`/`1` (case-insensitive); anything else is false.
    #[must_use]
    pub fn from_vars(vars: &HashMap<String, String>, default_filter: &str) -> Self {
        let log_filter = vars
            .get(LOG_FILTER_VAR)
            .filter(|s| !s.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| default_filter.to_string());

        let json_logs = vars
            .get(LOG_JSON_VAR)
            .is_some_and(|v| v.eq_ignore_ascii_case("true") || v == "1");

        Self {
            log_filter,
            json_logs,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_unset() {
        let cfg = ObservabilityConfig::from_vars(&HashMap::new(), "rtc=debug");
        assert_eq!(cfg.log_filter, "rtc=debug");
        assert!(!cfg.json_logs);
    }

    #[test]
    fn test_overrides() {
        let vars = HashMap::from([
            (LOG_FILTER_VAR.to_string(), "info".to_string()),
            (LOG_JSON_VAR.to_string(), "TRUE".to_string()),
        ]);
        let cfg = ObservabilityConfig::from_vars(&vars, "rtc=debug");
        assert_eq!(cfg.log_filter, "info");
        assert!(cfg.json_logs);
    }
}
