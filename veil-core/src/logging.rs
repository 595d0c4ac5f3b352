//! Logging Standards and Conventions
//!
//! All Veil crates log through `tracing` with structured fields.
//!
//! # Log Levels
//!
//! | Level | Usage | Examples |
//! |-------|-------|----------|
//! | ERROR | Invariant violations | Finalize attempted twice, corrupted ciphertext |
//! | WARN  | Rejected or suspicious input | Unauthorized callback, replayed request id |
//! | INFO  | State transitions | Context opened/closed/finalized, key reshared |
//! | DEBUG | Operation flow | Contribution accepted, request registered |
//! | TRACE | Payload detail | Handle digests, plaintext vectors |
//!
//! # Structured Logging Fields
//!
//! - `context_id`: tally context
//! - `request_id`: decryption request
//! - `signer_id`: threshold signer
//! - `operation`: operation name (see [`operations`])
//! - `count`: item count
//! - `error`: error message
//!
//! ```ignore
//! use tracing::info;
//!
//! info!(
//!     context_id = %ctx,
//!     request_id = %req,
//!     operation = operations::REQUEST_DECRYPTION,
//!     count = handles.len(),
//!     "Decryption requested"
//! );
//! ```

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Log level enumeration matching tracing levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }

    /// Parse from string (case-insensitive, accepts "warning")
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "error" => Some(Self::Error),
            "warn" | "warning" => Some(Self::Warn),
            "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            "trace" => Some(Self::Trace),
            _ => None,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Standard log field names
pub mod fields {
    pub const CONTEXT_ID: &str = "context_id";
    pub const REQUEST_ID: &str = "request_id";
    pub const SIGNER_ID: &str = "signer_id";
    pub const CONTRIBUTOR: &str = "contributor";
    pub const OPERATION: &str = "operation";
    pub const GENERATION: &str = "generation";
    pub const COUNT: &str = "count";
    pub const ERROR: &str = "error";
}

/// Operation names
pub mod operations {
    // Tally lifecycle
    pub const OPEN: &str = "open";
    pub const CONTRIBUTE: &str = "contribute";
    pub const REQUEST_CLOSE: &str = "request_close";
    pub const FINALIZE: &str = "finalize";

    // Decryption
    pub const REQUEST_DECRYPTION: &str = "request_decryption";
    pub const DECRYPTION_CALLBACK: &str = "decryption_callback";
    pub const RETRY_DECRYPTION: &str = "retry_decryption";

    // Signatures and keys
    pub const VERIFY: &str = "verify";
    pub const AUTHORIZE: &str = "authorize";
    pub const RESHARE: &str = "reshare";
    pub const ROLLBACK: &str = "rollback";
}

/// Install a global fmt subscriber
///
/// `RUST_LOG` wins over the configured level when set. Returns false if a
/// global subscriber was already installed.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let mut filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    if let Some(directives) = &config.directives {
        for directive in directives.split(',').filter(|d| !d.trim().is_empty()) {
            if let Ok(parsed) = directive.trim().parse() {
                filter = filter.add_directive(parsed);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
