//! Admin Role
//!
//! Ownership of privileged operations (opening contexts, resharing keys)
//! with a two-phase transfer: the current admin proposes a successor and
//! the successor must accept before the role moves.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{CoreError, CoreResult};
use crate::types::Identity;

/// Admin role with pending-transfer handshake
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminRole {
    admin: Identity,
    pending: Option<Identity>,
}

impl AdminRole {
    pub fn new(admin: Identity) -> Self {
        Self {
            admin,
            pending: None,
        }
    }

    /// Current admin
    pub fn admin(&self) -> &Identity {
        &self.admin
    }

    /// Proposed successor, if a transfer is in flight
    pub fn pending(&self) -> Option<&Identity> {
        self.pending.as_ref()
    }

    pub fn is_admin(&self, caller: &Identity) -> bool {
        &self.admin == caller
    }

    /// Fail with `Unauthorized` unless `caller` is the admin
    pub fn ensure_admin(&self, caller: &Identity) -> CoreResult<()> {
        if self.is_admin(caller) {
            Ok(())
        } else {
            Err(CoreError::Unauthorized {
                caller: caller.clone(),
                role: "admin",
            })
        }
    }

    /// Phase one: the admin nominates a successor (replaces any earlier nomination)
    pub fn propose(&mut self, caller: &Identity, successor: Identity) -> CoreResult<()> {
        self.ensure_admin(caller)?;
        info!(admin = %self.admin, successor = %successor, "Admin transfer proposed");
        self.pending = Some(successor);
        Ok(())
    }

    /// Phase two: the nominated successor accepts
    pub fn accept(&mut self, caller: &Identity) -> CoreResult<()> {
        match &self.pending {
            None => Err(CoreError::NoPendingTransfer),
            Some(pending) if pending != caller => Err(CoreError::Unauthorized {
                caller: caller.clone(),
                role: "pending admin",
            }),
            Some(_) => {
                let previous = std::mem::replace(&mut self.admin, caller.clone());
                self.pending = None;
                info!(previous = %previous, admin = %self.admin, "Admin transfer accepted");
                Ok(())
            }
        }
    }

    /// Withdraw a pending nomination
    pub fn cancel(&mut self, caller: &Identity) -> CoreResult<()> {
        self.ensure_admin(caller)?;
        self.pending = None;
        Ok(())
    }
}
