use std::collections::HashMap;

use config::{Config, ConfigError, Environment};
use serde::Deserialize;

use crate::catalog_store::PostgresCatalogStoreConfig;

/// Prefix of environment overrides, e.g. `LIBRARY__SERVER__PORT=9000`
pub const ENV_PREFIX: &str = "LIBRARY";

/// Older flat variables still honoured when the prefixed ones are absent
const LEGACY_VARIABLES: &[(&str, &str)] = &[
    ("USE_IN_MEMORY_DB", "storage.use_in_memory"),
    ("DB_HOST", "storage.hostname"),
    ("DB_USERNAME", "storage.username"),
    ("DB_PASSWORD", "storage.password"),
];

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct StorageSettings {
    pub use_in_memory: bool,
    pub hostname: String,
    pub username: String,
    pub password: String,
}

impl StorageSettings {
    pub fn postgres_config(&self) -> PostgresCatalogStoreConfig {
        PostgresCatalogStoreConfig {
            hostname: self.hostname.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Settings {
    pub server: ServerSettings,
    pub storage: StorageSettings,
}

impl Settings {
    /// Loads settings from the process environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_variables(std::env::vars().collect())
    }

    /// Built in defaults, then legacy variables, then `LIBRARY__` prefixed ones
    pub fn from_variables(variables: HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("storage.use_in_memory", false)?
            .set_default("storage.hostname", "127.0.0.1")?
            .set_default("storage.username", "postgres")?
            .set_default("storage.password", "postgres")?;

        for (variable, key) in LEGACY_VARIABLES {
            if let Some(value) = variables.get(*variable) {
                builder = builder.set_default(*key, value.as_str())?;
            }
        }

        builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .source(Some(variables)),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod settings_tests {
    use super::*;

    fn variables(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn defaults_apply_without_variables() {
        let settings = Settings::from_variables(HashMap::new()).unwrap();
        assert_eq!(
            settings,
            Settings {
                server: ServerSettings {
                    host: "0.0.0.0".to_string(),
                    port: 8080,
                },
                storage: StorageSettings {
                    use_in_memory: false,
                    hostname: "127.0.0.1".to_string(),
                    username: "postgres".to_string(),
                    password: "postgres".to_string(),
                },
            }
        );
    }

    #[test]
    fn prefixed_variables_override_legacy_ones() {
        let settings = Settings::from_variables(variables(&[
            ("USE_IN_MEMORY_DB", "true"),
            ("DB_HOST", "legacy-db"),
            ("LIBRARY__STORAGE__HOSTNAME", "db.internal"),
            ("LIBRARY__SERVER__PORT", "9090"),
        ]))
        .unwrap();

        assert!(settings.storage.use_in_memory);
        assert_eq!(settings.storage.hostname, "db.internal");
        assert_eq!(settings.server.port, 9090);
        assert_eq!(settings.storage.postgres_config().username, "postgres");
    }

    #[test]
    fn malformed_values_are_rejected() {
        let result = Settings::from_variables(variables(&[("LIBRARY__SERVER__PORT", "eighty")]));
        assert!(result.is_err());
    }
}
