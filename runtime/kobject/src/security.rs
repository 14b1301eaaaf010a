//! Security descriptors
//!
//! A deliberately small model: an optional owner process and an optional
//! discretionary ACL of allow/deny entries. A missing DACL grants everything,
//! an empty DACL grants nothing but the owner's implicit rights.

use serde::{Deserialize, Serialize};

use crate::access::AccessMask;
use crate::error::{ObjectError, Result};
use crate::process::ProcessId;

/// Who an access control entry applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trustee {
    Everyone,
    Process(ProcessId),
}

impl Trustee {
    fn matches(self, process: ProcessId) -> bool {
        match self {
            Trustee::Everyone => true,
            Trustee::Process(pid) => pid == process,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AceKind {
    Allow,
    Deny,
}

/// Access control entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ace {
    pub kind: AceKind,
    pub trustee: Trustee,
    pub mask: AccessMask,
}

impl Ace {
    pub fn allow(trustee: Trustee, mask: AccessMask) -> Self {
        Self { kind: AceKind::Allow, trustee, mask }
    }

    pub fn deny(trustee: Trustee, mask: AccessMask) -> Self {
        Self { kind: AceKind::Deny, trustee, mask }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityDescriptor {
    pub owner: Option<ProcessId>,
    pub dacl: Option<Vec<Ace>>,
}

impl SecurityDescriptor {
    /// Rights the owner always holds
    pub const OWNER_RIGHTS: AccessMask = AccessMask::READ_CONTROL.union(AccessMask::WRITE_DAC);

    pub fn with_dacl(owner: Option<ProcessId>, dacl: Vec<Ace>) -> Self {
        Self { owner, dacl: Some(dacl) }
    }

    /// Rights of `mapped_all` that `process` may be granted
    ///
    /// ACEs are evaluated in order; the first entry mentioning a right
    /// decides it.
    pub fn granted(&self, process: ProcessId, mapped_all: AccessMask) -> AccessMask {
        let Some(dacl) = &self.dacl else {
            return mapped_all;
        };

        let mut granted = AccessMask::empty();
        let mut decided = AccessMask::empty();
        if self.owner == Some(process) {
            granted |= Self::OWNER_RIGHTS;
            decided |= Self::OWNER_RIGHTS;
        }

        for ace in dacl.iter().filter(|ace| ace.trustee.matches(process)) {
            let undecided = ace.mask - decided;
            if ace.kind == AceKind::Allow {
                granted |= undecided;
            }
            decided |= undecided;
        }

        granted & mapped_all
    }
}

/// Check `desired` (already mapped) against an optional descriptor
///
/// `MAXIMUM_ALLOWED` is replaced by everything the descriptor grants.
/// Returns the access to store in the handle.
pub fn check_access(
    sd: Option<&SecurityDescriptor>,
    process: ProcessId,
    desired: AccessMask,
    mapped_all: AccessMask,
) -> Result<AccessMask> {
    let granted = match sd {
        Some(sd) => sd.granted(process, mapped_all),
        None => mapped_all,
    };

    let mut requested = desired;
    if requested.contains(AccessMask::MAXIMUM_ALLOWED) {
        requested = (requested - AccessMask::MAXIMUM_ALLOWED) | granted;
    }

    if !granted.contains(requested) {
        log::warn!("access check failed for {}: requested {:?}, granted {:?}", process, requested, granted);
        return Err(ObjectError::AccessDenied { requested, granted });
    }
    Ok(requested)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: AccessMask = AccessMask::STANDARD_RIGHTS_ALL.union(AccessMask::specific(0x3));

    #[test]
    fn test_null_dacl_grants_everything() {
        let sd = SecurityDescriptor::default();
        assert_eq!(sd.granted(ProcessId::new(7), ALL), ALL);
    }

    #[test]
    fn test_first_ace_decides() {
        let sd = SecurityDescriptor::with_dacl(
            None,
            vec![
                Ace::deny(Trustee::Everyone, AccessMask::specific(0x2)),
                Ace::allow(Trustee::Everyone, ALL),
            ],
        );
        let granted = sd.granted(ProcessId::new(7), ALL);
        assert!(granted.contains(AccessMask::specific(0x1)));
        assert!(!granted.contains(AccessMask::specific(0x2)));
    }

    #[test]
    fn test_owner_keeps_read_control() {
        let owner = ProcessId::new(3);
        let sd = SecurityDescriptor::with_dacl(Some(owner), Vec::new());
        assert_eq!(sd.granted(owner, ALL), SecurityDescriptor::OWNER_RIGHTS);
        assert_eq!(sd.granted(ProcessId::new(4), ALL), AccessMask::empty());
    }

    #[test]
    fn test_check_access_denies_excess_rights() {
        let sd = SecurityDescriptor::with_dacl(
            None,
            vec![Ace::allow(Trustee::Everyone, AccessMask::specific(0x1))],
        );
        let pid = ProcessId::new(1);
        assert!(check_access(Some(&sd), pid, AccessMask::specific(0x1), ALL).is_ok());
        assert!(matches!(
            check_access(Some(&sd), pid, AccessMask::specific(0x3), ALL),
            Err(ObjectError::AccessDenied { .. })
        ));
    }

    #[test]
    fn test_maximum_allowed() {
        let sd = SecurityDescriptor::with_dacl(
            None,
            vec![Ace::allow(Trustee::Everyone, AccessMask::specific(0x1) | AccessMask::SYNCHRONIZE)],
        );
        let access = check_access(Some(&sd), ProcessId::new(1), AccessMask::MAXIMUM_ALLOWED, ALL).unwrap();
        assert_eq!(access, AccessMask::specific(0x1) | AccessMask::SYNCHRONIZE);
    }
}
