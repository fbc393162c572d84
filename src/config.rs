use std::{collections::HashMap, fs, path::Path};

use serde::Deserialize;

use crate::{OpstrayError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// global namespace applied to backends without their own
    pub namespace: String,
    /// suppress desktop notifications globally
    pub mute_notifications: bool,
    /// number of async worker threads, range [1, 32768), defaults to 16
    pub async_worker_thread_number: u16,
    /// time-to-live of cached listings and schemas, in seconds
    pub cache_ttl_seconds: u64,
    /// how many completed jobs stay visible before eviction
    pub job_history_limit: usize,
    /// grace period before a cancelled job is force-terminated
    pub job_cancel_grace_seconds: u64,
    /// per-backend settings, keyed by backend id
    pub backends: HashMap<String, BackendConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// namespace override for this backend
    pub namespace: Option<String>,
    /// renewal interval in seconds; absent disables renewal
    pub renew_interval_seconds: Option<u64>,
    /// path of the backend's schema document, for schema-driven nodes
    pub schema_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            mute_notifications: false,
            async_worker_thread_number: 16,
            cache_ttl_seconds: 30,
            job_history_limit: 50,
            job_cancel_grace_seconds: 5,
            backends: HashMap::new(),
        }
    }
}

impl Config {
    pub fn create<T: AsRef<Path>>(path: T) -> Self {
        let data = fs::read_to_string(path.as_ref()).expect(&format!("failed to load config file {:?}", path.as_ref()));

        Self::load_from_str(data.as_str())
    }

    pub fn load_from_str(toml_str: &str) -> Self {
        let config = toml::from_str::<Config>(toml_str).expect("failed to parse the toml str");
        config
    }

    /// Reject semantically invalid settings. A failed validation leaves
    /// any previously applied configuration in effect.
    pub fn validate(&self) -> Result<()> {
        if self.namespace.contains(char::is_whitespace) {
            return Err(OpstrayError::Config(format!("namespace '{}' must not contain whitespace", self.namespace)));
        }
        if self.async_worker_thread_number == 0 {
            return Err(OpstrayError::Config("async_worker_thread_number must be at least 1".to_string()));
        }
        if self.job_history_limit == 0 {
            return Err(OpstrayError::Config("job_history_limit must be at least 1".to_string()));
        }
        for (backend, settings) in &self.backends {
            if settings.renew_interval_seconds == Some(0) {
                return Err(OpstrayError::Config(format!("renewal interval for {} must be positive", backend)));
            }
            if let Some(namespace) = &settings.namespace {
                if namespace.contains(char::is_whitespace) {
                    return Err(OpstrayError::Config(format!("namespace '{}' for {} must not contain whitespace", namespace, backend)));
                }
            }
        }
        Ok(())
    }

    /// The namespace a backend operates in: its own override, or the
    /// global namespace.
    pub fn effective_namespace(
        &self,
        backend: &str,
    ) -> String {
        self.backends.get(backend).and_then(|b| b.namespace.clone()).unwrap_or_else(|| self.namespace.clone())
    }
}

#[cfg(test)]
mod test {
    use crate::Config;

    #[test]
    fn test_config_deserialize() {
        let toml_str = r#"
        namespace = "team-a"
        mute_notifications = true
        cache_ttl_seconds = 60

        [backends.openbao]
        renew_interval_seconds = 300
        schema_path = "sys/internal/specs/openapi"

        [backends.nomad]
        namespace = "batch"
        "#;
        let config = Config::load_from_str(toml_str);
        assert_eq!(config.namespace, "team-a");
        assert!(config.mute_notifications);
        assert_eq!(config.cache_ttl_seconds, 60);
        assert_eq!(config.backends["openbao"].renew_interval_seconds, Some(300));
        assert_eq!(config.backends["openbao"].schema_path.as_deref(), Some("sys/internal/specs/openapi"));
        assert_eq!(config.effective_namespace("nomad"), "batch");
        assert_eq!(config.effective_namespace("openbao"), "team-a");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let toml_str = r#"
        [backends.openbao]
        renew_interval_seconds = 0
        "#;
        let config = Config::load_from_str(toml_str);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_whitespace_namespace() {
        let mut config = Config::default();
        config.namespace = "team a".to_string();
        assert!(config.validate().is_err());
    }
}
