use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("{var}={value} is not valid: expected {expected}")]
    #[diagnostic(code(steploom::config::invalid))]
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Engine knobs. Everything has a default; `from_env` overrides from
/// `STEPLOOM_*` variables.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Max characters of the cause chain kept in `ErrorInfo.stack`.
    pub stack_limit: usize,
    /// Upper bound on ticks the local driver runs for one workflow.
    pub max_local_loops: usize,
    /// Whether the local driver sleeps through `wait` decisions.
    pub honor_waits: bool,
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset.
    pub log_filter: String,
    /// Max replay journal entries kept in process memory.
    pub journal_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            stack_limit: 4096,
            max_local_loops: 1000,
            honor_waits: false,
            log_filter: "info,steploom=info".to_string(),
            journal_capacity: 1024,
        }
    }
}

impl RuntimeConfig {
    pub const STACK_LIMIT: &'static str = "STEPLOOM_STACK_LIMIT";
    pub const MAX_LOCAL_LOOPS: &'static str = "STEPLOOM_MAX_LOCAL_LOOPS";
    pub const HONOR_WAITS: &'static str = "STEPLOOM_HONOR_WAITS";
    pub const LOG: &'static str = "STEPLOOM_LOG";
    pub const JOURNAL_CAPACITY: &'static str = "STEPLOOM_JOURNAL_CAPACITY";

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable lookup; unset variables keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(value) = lookup(Self::STACK_LIMIT) {
            config.stack_limit = parse_usize(Self::STACK_LIMIT, value)?;
        }
        if let Some(value) = lookup(Self::MAX_LOCAL_LOOPS) {
            config.max_local_loops = parse_usize(Self::MAX_LOCAL_LOOPS, value)?;
        }
        if let Some(value) = lookup(Self::HONOR_WAITS) {
            config.honor_waits = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(ConfigError::Invalid {
                        var: Self::HONOR_WAITS,
                        value,
                        expected: "a boolean",
                    });
                }
            };
        }
        if let Some(value) = lookup(Self::JOURNAL_CAPACITY) {
            config.journal_capacity = parse_usize(Self::JOURNAL_CAPACITY, value)?;
        }
        if let Some(value) = lookup(Self::LOG) {
            config.log_filter = value;
        }
        Ok(config)
    }
}

fn parse_usize(var: &'static str, value: String) -> Result<usize, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        var,
        value,
        expected: "a non-negative integer",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: FxHashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn unset_variables_keep_defaults() {
        assert_eq!(
            RuntimeConfig::from_lookup(lookup(&[])).unwrap(),
            RuntimeConfig::default()
        );
    }

    #[test]
    fn variables_override_defaults() {
        let config = RuntimeConfig::from_lookup(lookup(&[
            ("STEPLOOM_STACK_LIMIT", "128"),
            ("STEPLOOM_MAX_LOCAL_LOOPS", "10"),
            ("STEPLOOM_HONOR_WAITS", "yes"),
            ("STEPLOOM_LOG", "debug"),
            ("STEPLOOM_JOURNAL_CAPACITY", "16"),
        ]))
        .unwrap();
        assert_eq!(config.stack_limit, 128);
        assert_eq!(config.max_local_loops, 10);
        assert!(config.honor_waits);
        assert_eq!(config.log_filter, "debug");
        assert_eq!(config.journal_capacity, 16);
    }

    #[test]
    fn malformed_values_are_reported() {
        let err =
            RuntimeConfig::from_lookup(lookup(&[("STEPLOOM_STACK_LIMIT", "lots")])).unwrap_err();
        assert!(err.to_string().contains("STEPLOOM_STACK_LIMIT=lots"));
        assert!(
            RuntimeConfig::from_lookup(lookup(&[("STEPLOOM_HONOR_WAITS", "maybe")])).is_err()
        );
    }
}
