//! Configuration loading, env substitution, and validation.
//!
//! Config files: `courier.toml`, `courier.yaml`, or `courier.json`
//! Searched in `./` then the user config directory.
//!
//! Supports `${ENV_VAR}` and `${ENV_VAR:-fallback}` substitution in all values.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{
        config_dir, cooldown_store_path, data_dir, discover_and_load, find_config_file,
        load_config,
    },
    schema::{
        AgentBinding, AgentDefaults, AgentEntry, AgentsConfig, CourierConfig, CredentialsConfig,
        DeliveryConfig, DispatchConfig, IsolationMode, MessageQueueMode, MetricsConfig,
        ModelConfig, ProviderEntry, ResetConfig, ResetMode, RunnerConfig, SessionConfig,
        StreamingConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult, validate, validate_config},
};
