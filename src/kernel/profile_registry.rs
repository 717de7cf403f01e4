//! Kernel child subsystem holding the r/rw/rwg security-profile lattice
//! `spec.md`'s Non-goals reference ("a hardened permission algebra beyond
//! the r/rw/rwg lattice the security profiles already define").
//!
//! Grounded on `spark-core/src/security/policy.rs`'s tiered-capability
//! enum, narrowed to the three tiers the spec names.

use std::collections::BTreeMap;

use crate::error::{codes, KernelError};
use crate::security::Pkr;

/// The three-tier permission lattice: `Read < ReadWrite < ReadWriteGrant`.
/// `Ord` follows declaration order, so `a >= b` is exactly "`a` permits
/// everything `b` permits".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SecurityProfile {
    Read,
    ReadWrite,
    ReadWriteGrant,
}

impl SecurityProfile {
    /// `self` permits `required` when `self` sits at or above `required` in
    /// the lattice — `ReadWriteGrant` satisfies any requirement, `Read`
    /// satisfies only `Read`.
    pub fn permits(self, required: SecurityProfile) -> bool {
        self >= required
    }
}

/// `pkr -> SecurityProfile` table. A principal with no entry is treated as
/// unprivileged (`permits` always fails) rather than defaulting to the most
/// permissive tier.
#[derive(Default)]
pub struct ProfileRegistry {
    profiles: BTreeMap<Pkr, SecurityProfile>,
}

impl ProfileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&mut self, pkr: Pkr, profile: SecurityProfile) {
        self.profiles.insert(pkr, profile);
    }

    pub fn revoke(&mut self, pkr: Pkr) -> bool {
        self.profiles.remove(&pkr).is_some()
    }

    pub fn profile_for(&self, pkr: Pkr) -> Option<SecurityProfile> {
        self.profiles.get(&pkr).copied()
    }

    /// Checks that `pkr` holds at least `required` in the lattice, returning
    /// an `auth` error (matching `AccessControl::validate_ownership`'s
    /// error shape) rather than a bare bool when the call site wants to
    /// propagate a `KernelError`.
    pub fn require(&self, pkr: Pkr, required: SecurityProfile) -> Result<(), KernelError> {
        match self.profile_for(pkr) {
            Some(profile) if profile.permits(required) => Ok(()),
            _ => Err(KernelError::auth(
                codes::AUTH_UNAUTHORIZED_SEND,
                format!("{pkr} does not hold the {required:?} security profile"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_write_grant_permits_every_tier() {
        let mut registry = ProfileRegistry::new();
        let pkr = Pkr::generate();
        registry.grant(pkr, SecurityProfile::ReadWriteGrant);
        assert!(registry.require(pkr, SecurityProfile::Read).is_ok());
        assert!(registry.require(pkr, SecurityProfile::ReadWrite).is_ok());
        assert!(registry.require(pkr, SecurityProfile::ReadWriteGrant).is_ok());
    }

    #[test]
    fn read_only_does_not_permit_write() {
        let mut registry = ProfileRegistry::new();
        let pkr = Pkr::generate();
        registry.grant(pkr, SecurityProfile::Read);
        assert!(registry.require(pkr, SecurityProfile::Read).is_ok());
        assert!(registry.require(pkr, SecurityProfile::ReadWrite).is_err());
    }

    #[test]
    fn unknown_principal_is_unprivileged() {
        let registry = ProfileRegistry::new();
        assert!(registry.require(Pkr::generate(), SecurityProfile::Read).is_err());
    }

    #[test]
    fn revoke_removes_a_granted_profile() {
        let mut registry = ProfileRegistry::new();
        let pkr = Pkr::generate();
        registry.grant(pkr, SecurityProfile::ReadWrite);
        assert!(registry.revoke(pkr));
        assert!(registry.require(pkr, SecurityProfile::Read).is_err());
    }
}
