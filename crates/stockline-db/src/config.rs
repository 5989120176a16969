//! # Engine Configuration
//!
//! Settings for the database handle and the services on top of it.
//!
//! ## Load Order
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. Defaults                                                            │
//! │  2. stockline.toml (if present)                                         │
//! │  3. Environment variables                  (later overrides earlier)    │
//! │       STOCKLINE_DATABASE_PATH                                           │
//! │       STOCKLINE_MAX_CONNECTIONS                                         │
//! │       STOCKLINE_REVERSAL_STRATEGY   compensating | delete_and_restore   │
//! │       STOCKLINE_ACTOR_ID                                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example Config File
//! ```toml
//! [database]
//! path = "./data/stockline.db"
//! max_connections = 5
//!
//! [ledger]
//! reversal_strategy = "compensating"
//!
//! [engine]
//! default_actor_id = "backoffice"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};
use crate::pool::DbConfig;
use stockline_core::SYSTEM_ACTOR_ID;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "stockline.toml";

// =============================================================================
// Reversal Strategy
// =============================================================================

/// How the ledger undoes movements when their cause is edited or removed.
///
/// One strategy is applied by every caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReversalStrategy {
    /// Post an inverse entry linked through `reversal_of`. Full audit trail.
    #[default]
    Compensating,
    /// Delete the entries and rewind `current_stock` by their net delta.
    DeleteAndRestore,
}

impl FromStr for ReversalStrategy {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "compensating" | "compensate" => Ok(ReversalStrategy::Compensating),
            "delete_and_restore" | "delete" => Ok(ReversalStrategy::DeleteAndRestore),
            other => Err(DbError::InvalidConfig(format!(
                "unknown reversal strategy: {}",
                other
            ))),
        }
    }
}

// =============================================================================
// Sections
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: PathBuf,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub run_migrations: bool,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: PathBuf::from("stockline.db"),
            max_connections: 5,
            min_connections: 1,
            connect_timeout_secs: 30,
            run_migrations: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSettings {
    pub reversal_strategy: ReversalStrategy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Actor recorded when a caller passes an empty actor id.
    pub default_actor_id: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            default_actor_id: SYSTEM_ACTOR_ID.to_string(),
        }
    }
}

// =============================================================================
// Engine Configuration
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub ledger: LedgerSettings,

    #[serde(default)]
    pub engine: EngineSettings,
}

impl EngineConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// `config_path` falls back to [`CONFIG_FILE_NAME`] in the working
    /// directory. A missing file is not an error.
    pub fn load(config_path: Option<PathBuf>) -> DbResult<Self> {
        let path = config_path.unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
        let mut config = Self::from_file(&path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads config or returns defaults if loading fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load engine config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Parses a TOML document.
    pub fn from_toml(contents: &str) -> DbResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    fn from_file(path: &Path) -> DbResult<Self> {
        if !path.exists() {
            debug!(?path, "Config file not found, using defaults");
            return Ok(Self::default());
        }
        info!(?path, "Loading engine config from file");
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> DbResult<()> {
        if self.database.path.as_os_str().is_empty() {
            return Err(DbError::InvalidConfig("database.path must not be empty".into()));
        }

        if self.database.max_connections == 0 {
            return Err(DbError::InvalidConfig(
                "database.max_connections must be greater than 0".into(),
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(DbError::InvalidConfig(
                "database.min_connections must not exceed max_connections".into(),
            ));
        }

        if self.engine.default_actor_id.trim().is_empty() {
            return Err(DbError::InvalidConfig(
                "engine.default_actor_id must not be empty".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(path) = var("STOCKLINE_DATABASE_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Some(max) = var("STOCKLINE_MAX_CONNECTIONS") {
            match max.parse::<u32>() {
                Ok(n) => self.database.max_connections = n,
                Err(_) => warn!(value = %max, "Ignoring non-numeric STOCKLINE_MAX_CONNECTIONS"),
            }
        }

        if let Some(strategy) = var("STOCKLINE_REVERSAL_STRATEGY") {
            match strategy.parse() {
                Ok(parsed) => {
                    debug!(strategy = %strategy, "Overriding reversal strategy from environment");
                    self.ledger.reversal_strategy = parsed;
                }
                Err(_) => warn!(strategy = %strategy, "Unknown reversal strategy in environment"),
            }
        }

        if let Some(actor) = var("STOCKLINE_ACTOR_ID") {
            self.engine.default_actor_id = actor;
        }
    }

    /// Database settings as a pool configuration.
    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(&self.database.path)
            .max_connections(self.database.max_connections)
            .min_connections(self.database.min_connections)
            .connect_timeout(std::time::Duration::from_secs(self.database.connect_timeout_secs))
            .run_migrations(self.database.run_migrations)
    }

    /// Returns the configured reversal strategy.
    pub fn reversal_strategy(&self) -> ReversalStrategy {
        self.ledger.reversal_strategy
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_strategy_parsing() {
        assert_eq!(
            "compensating".parse::<ReversalStrategy>().unwrap(),
            ReversalStrategy::Compensating
        );
        assert_eq!(
            "Delete-And-Restore".parse::<ReversalStrategy>().unwrap(),
            ReversalStrategy::DeleteAndRestore
        );
        assert!("rewind".parse::<ReversalStrategy>().is_err());
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.reversal_strategy(), ReversalStrategy::Compensating);
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.engine.default_actor_id, SYSTEM_ACTOR_ID);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_sections() {
        let config = EngineConfig::from_toml(
            r#"
            [database]
            path = "/tmp/stock.db"
            max_connections = 3

            [ledger]
            reversal_strategy = "delete_and_restore"
            "#,
        )
        .unwrap();
        assert_eq!(config.database.path, PathBuf::from("/tmp/stock.db"));
        assert_eq!(config.database.max_connections, 3);
        assert_eq!(config.database.min_connections, 1);
        assert_eq!(config.reversal_strategy(), ReversalStrategy::DeleteAndRestore);
    }

    #[test]
    fn test_env_overrides_win() {
        let vars: HashMap<&str, &str> = [
            ("STOCKLINE_DATABASE_PATH", "/var/lib/stockline.db"),
            ("STOCKLINE_MAX_CONNECTIONS", "8"),
            ("STOCKLINE_REVERSAL_STRATEGY", "delete_and_restore"),
            ("STOCKLINE_ACTOR_ID", "ops"),
        ]
        .into_iter()
        .collect();

        let mut config = EngineConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.database.path, PathBuf::from("/var/lib/stockline.db"));
        assert_eq!(config.database.max_connections, 8);
        assert_eq!(config.reversal_strategy(), ReversalStrategy::DeleteAndRestore);
        assert_eq!(config.engine.default_actor_id, "ops");
    }

    #[test]
    fn test_validation() {
        let mut config = EngineConfig::default();
        config.database.max_connections = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.database.min_connections = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = EngineConfig::from_file(Path::new("/nonexistent/stockline.toml")).unwrap();
        assert_eq!(config.database.path, PathBuf::from("stockline.db"));
    }
}
