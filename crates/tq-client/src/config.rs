use crate::error::ClientError;
use std::time::Duration;
use tq_core::completion::DEFAULT_COMPLETION_COOLDOWN;
use tq_core::wire::DEFAULT_MAX_FRAME_BYTES;

pub const DEFAULT_SOCKET_ADDR: &str = "127.0.0.1:4100";
pub const DEFAULT_API_BASE: &str = "http://127.0.0.1:3000";
pub const COMMAND_QUEUE_CAPACITY: usize = 64;
pub const OBSERVER_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub socket_addr: String,
    pub api_base: String,
    pub user_id: Option<String>,
    pub client_id: String,
    pub write_timeout: Duration,
    pub request_timeout: Duration,
    pub queue_capacity: usize,
    pub observer_capacity: usize,
    pub max_backoff: Duration,
    pub completion_cooldown: Duration,
    pub max_frame_bytes: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            socket_addr: DEFAULT_SOCKET_ADDR.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            user_id: None,
            client_id: default_client_id(),
            write_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(15),
            queue_capacity: COMMAND_QUEUE_CAPACITY,
            observer_capacity: OBSERVER_CAPACITY,
            max_backoff: Duration::from_secs(10),
            completion_cooldown: DEFAULT_COMPLETION_COOLDOWN,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl ClientConfig {
    /// Builds a config from flag values, falling back to `TQ_*` variables and
    /// then to the defaults. Empty flags count as unset.
    pub fn resolve(addr_flag: &str, api_base_flag: &str, user_flag: &str) -> Self {
        Self {
            socket_addr: resolve_value(addr_flag, "TQ_SOCKET_ADDR", DEFAULT_SOCKET_ADDR),
            api_base: resolve_value(api_base_flag, "TQ_API_BASE", DEFAULT_API_BASE),
            user_id: resolve_optional(user_flag, "TQ_USER_ID"),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        if self.socket_addr.trim().is_empty() {
            return Err(ClientError::Config("socket address is empty".to_string()));
        }
        let base = self.api_base.trim();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(ClientError::Config(format!(
                "api base must be an http(s) url, got '{base}'"
            )));
        }
        if self.queue_capacity == 0 || self.observer_capacity == 0 {
            return Err(ClientError::Config(
                "queue capacities must be non-zero".to_string(),
            ));
        }
        if self.max_backoff < Duration::from_secs(1) {
            return Err(ClientError::Config(
                "backoff cap must be at least one second".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn resolve_value(flag: &str, env_key: &str, default: &str) -> String {
    resolve_optional(flag, env_key).unwrap_or_else(|| default.to_string())
}

pub fn resolve_optional(flag: &str, env_key: &str) -> Option<String> {
    if !flag.trim().is_empty() {
        return Some(flag.trim().to_string());
    }
    match std::env::var(env_key) {
        Ok(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
        _ => None,
    }
}

pub fn env_true(key: &str) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}

fn default_client_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("tq-{}-{}", std::process::id(), &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_win_over_defaults() {
        let config = ClientConfig::resolve(" 10.0.0.5:9000 ", "https://api.example.test", "u-7");
        assert_eq!(config.socket_addr, "10.0.0.5:9000");
        assert_eq!(config.api_base, "https://api.example.test");
        assert_eq!(config.user_id.as_deref(), Some("u-7"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_env_falls_back_to_default() {
        assert_eq!(
            resolve_value("", "TQ_TEST_UNSET_VARIABLE_FOR_RESOLVE", "fallback"),
            "fallback"
        );
        assert_eq!(resolve_optional("  ", "TQ_TEST_UNSET_VARIABLE_FOR_RESOLVE"), None);
        assert!(!env_true("TQ_TEST_UNSET_VARIABLE_FOR_RESOLVE"));
    }

    #[test]
    fn validate_rejects_bad_values() {
        let config = ClientConfig {
            api_base: "ftp://reports".to_string(),
            ..ClientConfig::default()
        };
        assert!(matches!(config.validate(), Err(ClientError::Config(_))));

        let config = ClientConfig {
            queue_capacity: 0,
            ..ClientConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn client_ids_are_unique_per_config() {
        let a = ClientConfig::default();
        let b = ClientConfig::default();
        assert!(a.client_id.starts_with("tq-"));
        assert_ne!(a.client_id, b.client_id);
    }
}
