//! Veil Core
//!
//! Shared building blocks for the Veil threshold tally and signature
//! verification engine:
//! - Stable identifiers for contexts, requests, signers and callers
//! - Injectable clock (system time or manually driven for tests)
//! - Two-phase admin handshake (propose / accept)
//! - Configuration with `VEIL_` environment overrides
//! - Logging conventions and subscriber setup

pub mod access;
pub mod clock;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod types;

pub use access::AdminRole;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    DecryptionConfig, LoggingConfig, SpendConfig, TallyConfig, VeilConfig, VerifierConfig,
};
pub use constants::*;
pub use error::{CoreError, CoreResult};
pub use types::*;
