use serde::{Deserialize, Serialize};

use super::Role;
use crate::crypto::{CryptoKeySetId, PublicKey, Signed};
use crate::path::{SyncablePath, TimeId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessChangeKind {
    AddAccess { public_key: PublicKey, role: Role },
    ModifyAccess { old_role: Role, new_role: Role },
    RemoveAccess { old_role: Role },
}

impl AccessChangeKind {
    /// Every role the signer must be allowed to manage for this change
    pub fn touched_roles(&self) -> Vec<Role> {
        match self {
            AccessChangeKind::AddAccess { role, .. } => vec![*role],
            AccessChangeKind::ModifyAccess { old_role, new_role } => vec![*old_role, *new_role],
            AccessChangeKind::RemoveAccess { old_role } => vec![*old_role],
        }
    }

    /// Role the target must hold for this change to apply, `None` for no access
    pub fn expected_role(&self) -> Option<Role> {
        match self {
            AccessChangeKind::AddAccess { .. } => None,
            AccessChangeKind::ModifyAccess { old_role, .. }
            | AccessChangeKind::RemoveAccess { old_role } => Some(*old_role),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessChange {
    pub time_id: TimeId,
    pub target: CryptoKeySetId,
    pub kind: AccessChangeKind,
}

/// Binds an access change to the folder it governs
#[derive(Debug, Clone, Serialize)]
pub struct AccessChangeExtras<'a> {
    pub folder: &'a SyncablePath,
}

pub type SignedAccessChange = Signed<AccessChange>;
