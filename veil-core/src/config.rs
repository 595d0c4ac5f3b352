//! Veil Configuration
//!
//! Configuration for the tally engine, decryption coordinator, verifier cost
//! model and spend guard. Supports loading from environment variables with
//! the VEIL_ prefix and from JSON documents.

use serde::{Deserialize, Serialize};
use std::env;

use crate::constants::*;
use crate::error::{CoreError, CoreResult};
use crate::logging::LogLevel;

/// Pass/fail policy applied when a context is finalized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyConfig {
    /// Minimum Yes + Abstain weight
    #[serde(default = "default_quorum")]
    pub quorum_threshold: u128,
    /// Required Yes share of Yes + No, in parts of `BASIS_DENOMINATOR`
    #[serde(default = "default_basis_numerator")]
    pub basis_numerator: u128,
}

fn default_quorum() -> u128 {
    DEFAULT_QUORUM_THRESHOLD
}

fn default_basis_numerator() -> u128 {
    DEFAULT_BASIS_NUMERATOR
}

impl Default for TallyConfig {
    fn default() -> Self {
        Self {
            quorum_threshold: DEFAULT_QUORUM_THRESHOLD,
            basis_numerator: DEFAULT_BASIS_NUMERATOR,
        }
    }
}

impl TallyConfig {
    pub fn validate(&self) -> CoreResult<()> {
        if self.basis_numerator > BASIS_DENOMINATOR {
            return Err(CoreError::Configuration(format!(
                "basis_numerator {} exceeds denominator {}",
                self.basis_numerator, BASIS_DENOMINATOR
            )));
        }
        Ok(())
    }
}

/// Decryption request handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptionConfig {
    /// Deadline offset from the context close time, in seconds
    #[serde(default = "default_deadline")]
    pub deadline_secs: i64,
    /// Maximum decryption requests per context (first request included)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_deadline() -> i64 {
    DEFAULT_DECRYPTION_DEADLINE_SECS
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_DECRYPTION_ATTEMPTS
}

impl Default for DecryptionConfig {
    fn default() -> Self {
        Self {
            deadline_secs: DEFAULT_DECRYPTION_DEADLINE_SECS,
            max_attempts: DEFAULT_MAX_DECRYPTION_ATTEMPTS,
        }
    }
}

/// Linear cost model for threshold verification budgeting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifierConfig {
    #[serde(default = "default_base_cost")]
    pub base_cost: u64,
    #[serde(default = "default_per_signer_cost")]
    pub per_signer_cost: u64,
}

fn default_base_cost() -> u64 {
    DEFAULT_VERIFY_BASE_COST
}

fn default_per_signer_cost() -> u64 {
    DEFAULT_VERIFY_PER_SIGNER_COST
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            base_cost: DEFAULT_VERIFY_BASE_COST,
            per_signer_cost: DEFAULT_VERIFY_PER_SIGNER_COST,
        }
    }
}

/// Policy guard on authorized privileged operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendConfig {
    /// Maximum value of a single operation (None = uncapped)
    #[serde(default)]
    pub per_operation_cap: Option<u128>,
    /// Maximum total value per window (None = uncapped)
    #[serde(default)]
    pub window_value_cap: Option<u128>,
    /// Maximum number of operations per window
    #[serde(default = "default_max_ops")]
    pub max_operations_per_window: u32,
    /// Window length in seconds
    #[serde(default = "default_window")]
    pub window_secs: i64,
}

fn default_max_ops() -> u32 {
    DEFAULT_MAX_OPERATIONS_PER_WINDOW
}

fn default_window() -> i64 {
    DEFAULT_SPEND_WINDOW_SECS
}

impl Default for SpendConfig {
    fn default() -> Self {
        Self {
            per_operation_cap: None,
            window_value_cap: None,
            max_operations_per_window: DEFAULT_MAX_OPERATIONS_PER_WINDOW,
            window_secs: DEFAULT_SPEND_WINDOW_SECS,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,
    /// Extra `EnvFilter` directives, e.g. "veil_tally=debug"
    #[serde(default)]
    pub directives: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            directives: None,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VeilConfig {
    #[serde(default)]
    pub tally: TallyConfig,
    #[serde(default)]
    pub decryption: DecryptionConfig,
    #[serde(default)]
    pub verifier: VerifierConfig,
    #[serde(default)]
    pub spend: SpendConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl VeilConfig {
    /// Development preset: short deadline, verbose logging
    pub fn development() -> Self {
        Self {
            decryption: DecryptionConfig {
                deadline_secs: 300,
                max_attempts: 5,
            },
            logging: LoggingConfig {
                level: LogLevel::Debug,
                directives: None,
            },
            ..Default::default()
        }
    }

    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - VEIL_QUORUM_THRESHOLD: minimum Yes + Abstain weight
    /// - VEIL_BASIS_NUMERATOR: Yes ratio numerator (denominator 1_000_000)
    /// - VEIL_DECRYPTION_DEADLINE_SECS: deadline after close
    /// - VEIL_MAX_DECRYPTION_ATTEMPTS: decryption requests per context
    /// - VEIL_VERIFY_BASE_COST / VEIL_VERIFY_PER_SIGNER_COST: cost model
    /// - VEIL_SPEND_PER_OPERATION_CAP / VEIL_SPEND_WINDOW_VALUE_CAP: spend caps
    /// - VEIL_SPEND_MAX_OPERATIONS / VEIL_SPEND_WINDOW_SECS: rate limit
    /// - VEIL_LOG_LEVEL / VEIL_LOG_DIRECTIVES: logging
    pub fn from_env() -> CoreResult<Self> {
        let defaults = Self::default();

        let config = Self {
            tally: TallyConfig {
                quorum_threshold: env_parse("VEIL_QUORUM_THRESHOLD")
                    .unwrap_or(defaults.tally.quorum_threshold),
                basis_numerator: env_parse("VEIL_BASIS_NUMERATOR")
                    .unwrap_or(defaults.tally.basis_numerator),
            },
            decryption: DecryptionConfig {
                deadline_secs: env_parse("VEIL_DECRYPTION_DEADLINE_SECS")
                    .unwrap_or(defaults.decryption.deadline_secs),
                max_attempts: env_parse("VEIL_MAX_DECRYPTION_ATTEMPTS")
                    .unwrap_or(defaults.decryption.max_attempts),
            },
            verifier: VerifierConfig {
                base_cost: env_parse("VEIL_VERIFY_BASE_COST")
                    .unwrap_or(defaults.verifier.base_cost),
                per_signer_cost: env_parse("VEIL_VERIFY_PER_SIGNER_COST")
                    .unwrap_or(defaults.verifier.per_signer_cost),
            },
            spend: SpendConfig {
                per_operation_cap: env_parse("VEIL_SPEND_PER_OPERATION_CAP"),
                window_value_cap: env_parse("VEIL_SPEND_WINDOW_VALUE_CAP"),
                max_operations_per_window: env_parse("VEIL_SPEND_MAX_OPERATIONS")
                    .unwrap_or(defaults.spend.max_operations_per_window),
                window_secs: env_parse("VEIL_SPEND_WINDOW_SECS")
                    .unwrap_or(defaults.spend.window_secs),
            },
            logging: LoggingConfig {
                level: env::var("VEIL_LOG_LEVEL")
                    .ok()
                    .and_then(|s| LogLevel::parse(&s))
                    .unwrap_or_default(),
                directives: env::var("VEIL_LOG_DIRECTIVES").ok(),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Parse from a JSON document; missing sections take defaults
    pub fn from_json(json: &str) -> CoreResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CoreResult<()> {
        self.tally.validate()?;
        if self.decryption.deadline_secs <= 0 {
            return Err(CoreError::Configuration(
                "decryption deadline must be positive".to_string(),
            ));
        }
        if self.decryption.max_attempts == 0 {
            return Err(CoreError::Configuration(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.spend.window_secs <= 0 {
            return Err(CoreError::Configuration(
                "spend window must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.trim().parse().ok())
}
