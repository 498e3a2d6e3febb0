//! Agent configuration

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} must be a positive number of seconds, got {value:?}")]
    InvalidSeconds { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    /// Series name, backed by `_tp_metric_<name>`
    pub metrics_name: String,
    pub flush_interval: Duration,
    pub report_interval: Duration,
    /// Streaming query tailed while the agent runs
    pub query: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            metrics_name: "cpu".to_string(),
            flush_interval: Duration::from_secs(5),
            report_interval: Duration::from_secs(1),
            query: None,
        }
    }
}

impl AgentConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            metrics_name: lookup("METRICS_NAME").unwrap_or(defaults.metrics_name),
            flush_interval: seconds(&lookup, "METRICS_FLUSH_SECS")?.unwrap_or(defaults.flush_interval),
            report_interval: seconds(&lookup, "AGENT_REPORT_SECS")?.unwrap_or(defaults.report_interval),
            query: lookup("AGENT_QUERY").filter(|q| !q.trim().is_empty()),
        })
    }
}

fn seconds(lookup: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<Option<Duration>, ConfigError> {
    let Some(value) = lookup(key) else {
        return Ok(None);
    };
    match value.parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Some(Duration::from_secs(secs))),
        _ => Err(ConfigError::InvalidSeconds { key, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_in(env: HashMap<&'static str, &'static str>) -> impl Fn(&str) -> Option<String> {
        move |key| env.get(key).map(|v| v.to_string())
    }

    #[test]
    fn test_defaults() {
        let config = AgentConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, AgentConfig::default());
    }

    #[test]
    fn test_overrides() {
        let env = HashMap::from([
            ("METRICS_NAME", "disk"),
            ("METRICS_FLUSH_SECS", "2"),
            ("AGENT_REPORT_SECS", "10"),
            ("AGENT_QUERY", "select * from car_live_data"),
        ]);
        let config = AgentConfig::from_lookup(lookup_in(env)).unwrap();

        assert_eq!(config.metrics_name, "disk");
        assert_eq!(config.flush_interval, Duration::from_secs(2));
        assert_eq!(config.report_interval, Duration::from_secs(10));
        assert_eq!(config.query.as_deref(), Some("select * from car_live_data"));
    }

    #[test]
    fn test_rejects_zero_and_garbage() {
        let zero = AgentConfig::from_lookup(lookup_in(HashMap::from([("METRICS_FLUSH_SECS", "0")])));
        assert!(matches!(zero, Err(ConfigError::InvalidSeconds { key: "METRICS_FLUSH_SECS", .. })));

        let garbage = AgentConfig::from_lookup(lookup_in(HashMap::from([("AGENT_REPORT_SECS", "soon")])));
        assert!(garbage.is_err());
    }

    #[test]
    fn test_blank_query_is_none() {
        let config = AgentConfig::from_lookup(lookup_in(HashMap::from([("AGENT_QUERY", "  ")]))).unwrap();
        assert!(config.query.is_none());
    }
}
