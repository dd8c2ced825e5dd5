use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::change::{AccessChange, AccessChangeExtras, AccessChangeKind, SignedAccessChange};
use super::{AccessControlError, Role};
use crate::crdt::{is_ordered_subsequence, ConflictFreeDocument, DocumentError};
use crate::crypto::{
    CryptoKeySetId, PublicCryptoKeySet, PublicKey, SharedKeyGrant, SharedKeySet, Signed, UserKeys,
};
use crate::linked_data::{BlockEncoded, CodecError};
use crate::path::{SyncablePath, TimeId};

/// State fixed when the folder was created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControlInitial {
    pub folder_path: SyncablePath,
    pub creator: PublicKey,
    pub access: BTreeMap<CryptoKeySetId, Role>,
    pub public_keys: BTreeMap<CryptoKeySetId, PublicKey>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControlDelta {
    pub changes: Vec<SignedAccessChange>,
    pub shared_keys: Vec<SharedKeyGrant>,
}

impl BlockEncoded for AccessControlDelta {}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccessControlSnapshot {
    initial: AccessControlInitial,
    changes: Vec<SignedAccessChange>,
    shared_keys: Vec<SharedKeyGrant>,
}

impl BlockEncoded for AccessControlSnapshot {}

/// Per-folder access control CRDT
///
/// An immutable initial grant set plus a log of signed access changes,
/// ordered by `(time id, signature)`, and an append-only list of shared key
/// grants. The role of a key set at any time is the initial state replayed
/// through every change up to that time.
#[derive(Debug, Clone)]
pub struct AccessControlDocument {
    initial: AccessControlInitial,
    changes: Vec<SignedAccessChange>,
    shared_keys: Vec<SharedKeyGrant>,
    pending: AccessControlDelta,
    state: BTreeMap<CryptoKeySetId, Role>,
    public_keys: BTreeMap<CryptoKeySetId, PublicKey>,
}

impl AccessControlDocument {
    /// Start a folder's document
    ///
    /// `creator` becomes the folder's creator, `others` get their roles in the
    /// initial state. A first shared key set is granted to every reader.
    pub fn new(
        folder_path: SyncablePath,
        creator: &PublicCryptoKeySet,
        others: &[(PublicCryptoKeySet, Role)],
    ) -> Result<Self, AccessControlError> {
        let mut access = BTreeMap::new();
        let mut public_keys = BTreeMap::new();
        access.insert(creator.id.clone(), Role::Creator);
        public_keys.insert(creator.id.clone(), creator.public_key);
        for (key_set, role) in others {
            if key_set.id == creator.id {
                continue;
            }
            access.insert(key_set.id.clone(), *role);
            public_keys.insert(key_set.id.clone(), key_set.public_key);
        }

        let mut document = Self::from_parts(
            AccessControlInitial {
                folder_path,
                creator: creator.public_key,
                access,
                public_keys,
            },
            Vec::new(),
            Vec::new(),
        );
        document.shared_keys = document.grants_for_readers(&SharedKeySet::generate())?;
        Ok(document)
    }

    fn from_parts(
        initial: AccessControlInitial,
        changes: Vec<SignedAccessChange>,
        shared_keys: Vec<SharedKeyGrant>,
    ) -> Self {
        let mut document = Self {
            initial,
            changes,
            shared_keys,
            pending: AccessControlDelta::default(),
            state: BTreeMap::new(),
            public_keys: BTreeMap::new(),
        };
        sort_changes(&mut document.changes);
        document.rebuild_state();
        document
    }

    pub fn from_snapshot(data: &[u8]) -> Result<Self, DocumentError> {
        let snapshot = AccessControlSnapshot::decode(data)?;
        Ok(Self::from_parts(
            snapshot.initial,
            snapshot.changes,
            snapshot.shared_keys,
        ))
    }

    pub fn folder_path(&self) -> &SyncablePath {
        &self.initial.folder_path
    }

    pub fn creator(&self) -> PublicKey {
        self.initial.creator
    }

    pub fn initial(&self) -> &AccessControlInitial {
        &self.initial
    }

    pub fn changes(&self) -> &[SignedAccessChange] {
        &self.changes
    }

    /// Current role of every key set with access
    pub fn get_access_control_state(&self) -> &BTreeMap<CryptoKeySetId, Role> {
        &self.state
    }

    pub fn get_public_keys_by_id(&self) -> &BTreeMap<CryptoKeySetId, PublicKey> {
        &self.public_keys
    }

    pub fn get_shared_keys(&self) -> &[SharedKeyGrant] {
        &self.shared_keys
    }

    pub fn role_of(&self, id: &CryptoKeySetId) -> Option<Role> {
        self.state.get(id).copied()
    }

    /// Role of a key set as of `time_ms`, replaying only earlier changes
    pub fn role_at_time_ms(&self, id: &CryptoKeySetId, time_ms: u64) -> Option<Role> {
        let mut replay = Replay::new(&self.initial);
        for change in &self.changes {
            if change.value.time_id.millis() > time_ms {
                break;
            }
            replay.apply(change);
        }
        replay.state.get(id).copied()
    }

    pub fn did_crypto_key_have_role_at_time_ms(
        &self,
        id: &CryptoKeySetId,
        one_of_roles: &[Role],
        time_ms: u64,
    ) -> bool {
        self.role_at_time_ms(id, time_ms)
            .is_some_and(|role| one_of_roles.contains(&role))
    }

    /// Key sets that currently have read access
    pub fn readers(&self) -> Vec<PublicCryptoKeySet> {
        self.state
            .iter()
            .filter(|(_, role)| role.has_read_access())
            .filter_map(|(id, _)| {
                self.public_keys.get(id).map(|public_key| PublicCryptoKeySet {
                    id: id.clone(),
                    public_key: *public_key,
                })
            })
            .collect()
    }

    /// Id and public key of the newest shared key set
    pub fn current_shared_key(&self) -> Option<(TimeId, PublicKey)> {
        self.shared_keys
            .iter()
            .max_by(|a, b| a.keys_id.cmp(&b.keys_id))
            .map(|grant| (grant.keys_id.clone(), grant.public_key))
    }

    /// Unwrap a shared key set with any key set the user holds
    pub fn recover_shared_keys(
        &self,
        keys_id: &TimeId,
        user_keys: &dyn UserKeys,
    ) -> Option<SharedKeySet> {
        self.shared_keys
            .iter()
            .filter(|grant| &grant.keys_id == keys_id)
            .find_map(|grant| {
                let key_set = user_keys.get_private_crypto_key_set(&grant.recipient)?;
                SharedKeySet::recover(grant, &key_set).ok()
            })
    }

    pub fn recover_current_shared_keys(&self, user_keys: &dyn UserKeys) -> Option<SharedKeySet> {
        let (keys_id, _) = self.current_shared_key()?;
        self.recover_shared_keys(&keys_id, user_keys)
    }

    /// Oldest shared key set, whose secret seeds deterministic ids
    pub fn recover_first_shared_keys(&self, user_keys: &dyn UserKeys) -> Option<SharedKeySet> {
        let first = self.shared_keys.iter().map(|g| &g.keys_id).min()?.clone();
        self.recover_shared_keys(&first, user_keys)
    }

    pub fn add_access(
        &mut self,
        user_keys: &dyn UserKeys,
        public_key: PublicKey,
        role: Role,
    ) -> Result<(), AccessControlError> {
        let target = PublicCryptoKeySet::from(public_key);
        if self.role_of(&target.id).is_some() {
            return Err(AccessControlError::AlreadyGranted(target.id));
        }
        self.check_can_manage(user_keys, &[role])?;

        let grants = if role.has_read_access() {
            self.grants_of_history(user_keys, &target)?
        } else {
            Vec::new()
        };
        self.record(
            user_keys,
            target.id,
            AccessChangeKind::AddAccess { public_key, role },
        )?;
        self.push_grants(grants);
        Ok(())
    }

    pub fn modify_access(
        &mut self,
        user_keys: &dyn UserKeys,
        target: &CryptoKeySetId,
        new_role: Role,
    ) -> Result<(), AccessControlError> {
        let old_role = self
            .role_of(target)
            .ok_or_else(|| AccessControlError::NoAccess(target.clone()))?;
        if old_role == new_role {
            return Ok(());
        }
        self.check_can_manage(user_keys, &[old_role, new_role])?;

        let grants = if new_role.has_read_access() && !old_role.has_read_access() {
            let key_set = self
                .public_keys
                .get(target)
                .map(|public_key| PublicCryptoKeySet::from(*public_key))
                .ok_or_else(|| AccessControlError::NoAccess(target.clone()))?;
            self.grants_of_history(user_keys, &key_set)?
        } else {
            Vec::new()
        };
        self.record(
            user_keys,
            target.clone(),
            AccessChangeKind::ModifyAccess { old_role, new_role },
        )?;
        self.push_grants(grants);

        if old_role.has_read_access() && !new_role.has_read_access() {
            self.rotate_shared_keys()?;
        }
        Ok(())
    }

    pub fn remove_access(
        &mut self,
        user_keys: &dyn UserKeys,
        target: &CryptoKeySetId,
    ) -> Result<(), AccessControlError> {
        let old_role = self
            .role_of(target)
            .ok_or_else(|| AccessControlError::NoAccess(target.clone()))?;
        self.check_can_manage(user_keys, &[old_role])?;
        self.record(
            user_keys,
            target.clone(),
            AccessChangeKind::RemoveAccess { old_role },
        )?;
        if old_role.has_read_access() {
            self.rotate_shared_keys()?;
        }
        Ok(())
    }

    /// Check a delta written by `signer` against this document
    ///
    /// Merging the delta must keep the initial state and the relative order
    /// of every existing change and grant, and must add at least one change.
    /// Every added change must be signed by the signer, who must be admin or
    /// above when it was made, and is checked against the target's actual
    /// role at that point of the history. New shared key grants are limited
    /// to what the added changes call for.
    pub fn validate_delta(&self, signer: &PublicKey, data: &[u8]) -> Result<(), AccessControlError> {
        let signer_id = CryptoKeySetId::for_public_key(signer);
        if !self.role_of(&signer_id).is_some_and(|role| role.is_admin_or_above()) {
            return Err(AccessControlError::Forbidden {
                signer: signer_id,
                reason: "delta signer is not an admin".to_string(),
            });
        }

        let delta = AccessControlDelta::decode(data)?;
        let mut after = self.clone();
        after.merge(&delta);

        if after.initial != self.initial {
            return Err(AccessControlError::InvalidDelta(
                "initial state changed".to_string(),
            ));
        }
        if !is_ordered_subsequence(&self.changes, &after.changes)
            || !is_ordered_subsequence(&self.shared_keys, &after.shared_keys)
        {
            return Err(AccessControlError::InvalidDelta(
                "existing history was reordered or dropped".to_string(),
            ));
        }
        if !delta.changes.iter().any(|change| !self.changes.contains(change)) {
            return Err(AccessControlError::InvalidDelta(
                "delta adds no changes".to_string(),
            ));
        }

        let readers = self.check_new_changes(&after, signer, &signer_id)?;
        self.check_new_grants(&after, &delta, &readers)
    }

    /// Replay the merged history, checking each change this document does not
    /// know yet against the roles as they stand just before it
    fn check_new_changes(
        &self,
        after: &AccessControlDocument,
        signer: &PublicKey,
        signer_id: &CryptoKeySetId,
    ) -> Result<ReaderChanges, AccessControlError> {
        let extras = AccessChangeExtras {
            folder: &self.initial.folder_path,
        };
        let mut replay = Replay::new(&self.initial);
        let mut readers = ReaderChanges::default();
        for change in &after.changes {
            if self.changes.contains(change) {
                replay.apply(change);
                continue;
            }
            if &change.signer != signer {
                return Err(AccessControlError::InvalidDelta(
                    "change signed by another key".to_string(),
                ));
            }
            change.verify(&extras)?;

            let target = &change.value.target;
            if target == &replay.creator {
                return Err(AccessControlError::InvalidDelta(
                    "the folder creator cannot be changed".to_string(),
                ));
            }
            let signer_role = replay
                .state
                .get(signer_id)
                .copied()
                .filter(Role::is_admin_or_above)
                .ok_or_else(|| AccessControlError::Forbidden {
                    signer: signer_id.clone(),
                    reason: format!("not an admin at {}", change.value.time_id),
                })?;
            let current = replay.state.get(target).copied();
            if change.value.kind.expected_role() != current {
                return Err(AccessControlError::InvalidDelta(format!(
                    "change expects {target} to hold {:?}, it holds {:?}",
                    change.value.kind.expected_role(),
                    current
                )));
            }
            for role in change.value.kind.touched_roles() {
                if !signer_role.can_manage(role) {
                    return Err(AccessControlError::Forbidden {
                        signer: signer_id.clone(),
                        reason: format!("{signer_role} may not manage {role}"),
                    });
                }
            }
            if let AccessChangeKind::AddAccess { public_key, .. } = &change.value.kind {
                if &CryptoKeySetId::for_public_key(public_key) != target {
                    return Err(AccessControlError::InvalidDelta(
                        "added key does not match target".to_string(),
                    ));
                }
            }

            let could_read = current.is_some_and(|role| role.has_read_access());
            replay.apply(change);
            let can_read = replay
                .state
                .get(target)
                .is_some_and(|role| role.has_read_access());
            if can_read && !could_read {
                readers.added.insert(target.clone());
            }
            if could_read && !can_read {
                readers.revoked = true;
            }
            readers.targets.insert(target.clone());
        }
        Ok(readers)
    }

    /// Shared key grants a delta may carry
    ///
    /// Known key sets may only be granted to readers the delta adds. A new key
    /// set needs a revoked reader in the same delta, may only go to current
    /// readers or keys the delta touched, and the newest one must reach every
    /// remaining reader.
    fn check_new_grants(
        &self,
        after: &AccessControlDocument,
        delta: &AccessControlDelta,
        readers: &ReaderChanges,
    ) -> Result<(), AccessControlError> {
        let known: BTreeSet<&TimeId> = self.shared_keys.iter().map(|g| &g.keys_id).collect();
        let remaining: BTreeSet<CryptoKeySetId> =
            after.readers().into_iter().map(|reader| reader.id).collect();
        let mut new_sets: BTreeMap<&TimeId, BTreeSet<&CryptoKeySetId>> = BTreeMap::new();

        for grant in delta
            .shared_keys
            .iter()
            .filter(|grant| !self.shared_keys.contains(grant))
        {
            if known.contains(&grant.keys_id) {
                if !readers.added.contains(&grant.recipient) {
                    return Err(AccessControlError::InvalidDelta(format!(
                        "shared keys {} granted to {} without read access being added",
                        grant.keys_id, grant.recipient
                    )));
                }
                continue;
            }
            if !remaining.contains(&grant.recipient) && !readers.targets.contains(&grant.recipient)
            {
                return Err(AccessControlError::InvalidDelta(format!(
                    "shared keys {} granted to {}, who is not a reader",
                    grant.keys_id, grant.recipient
                )));
            }
            new_sets
                .entry(&grant.keys_id)
                .or_default()
                .insert(&grant.recipient);
        }

        if let Some((keys_id, recipients)) = new_sets.iter().next_back() {
            if !readers.revoked {
                return Err(AccessControlError::InvalidDelta(
                    "new shared keys without revoking a reader".to_string(),
                ));
            }
            if let Some(missing) = remaining.iter().find(|id| !recipients.contains(id)) {
                return Err(AccessControlError::InvalidDelta(format!(
                    "shared keys {keys_id} not granted to reader {missing}"
                )));
            }
        }

        let mut key_sets: BTreeMap<&TimeId, &PublicKey> = BTreeMap::new();
        for grant in &after.shared_keys {
            if *key_sets.entry(&grant.keys_id).or_insert(&grant.public_key) != &grant.public_key {
                return Err(AccessControlError::InvalidDelta(
                    "shared key set public key changed".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn check_can_manage(
        &self,
        user_keys: &dyn UserKeys,
        roles: &[Role],
    ) -> Result<(), AccessControlError> {
        let signer = user_keys.signing_key_set();
        let signer_role =
            self.role_of(signer.id())
                .ok_or_else(|| AccessControlError::Forbidden {
                    signer: signer.id().clone(),
                    reason: "signer has no access".to_string(),
                })?;
        match roles.iter().find(|role| !signer_role.can_manage(**role)) {
            Some(role) => Err(AccessControlError::Forbidden {
                signer: signer.id().clone(),
                reason: format!("{signer_role} may not manage {role}"),
            }),
            None => Ok(()),
        }
    }

    fn record(
        &mut self,
        user_keys: &dyn UserKeys,
        target: CryptoKeySetId,
        kind: AccessChangeKind,
    ) -> Result<(), AccessControlError> {
        let change = AccessChange {
            time_id: self.next_time_id(),
            target,
            kind,
        };
        let signed = Signed::sign(
            change,
            &AccessChangeExtras {
                folder: &self.initial.folder_path,
            },
            &user_keys.signing_key_set(),
        )?;
        self.pending.changes.push(signed.clone());
        self.changes.push(signed);
        sort_changes(&mut self.changes);
        self.rebuild_state();
        Ok(())
    }

    /// A time id after every recorded change, even with a lagging clock
    fn next_time_id(&self) -> TimeId {
        let now = TimeId::now();
        match self.changes.last() {
            Some(last) if last.value.time_id.millis() >= now.millis() => {
                TimeId::from_millis(last.value.time_id.millis() + 1)
            }
            _ => now,
        }
    }

    fn grants_for_readers(
        &self,
        key_set: &SharedKeySet,
    ) -> Result<Vec<SharedKeyGrant>, AccessControlError> {
        self.readers()
            .iter()
            .map(|reader| key_set.grant_to(reader).map_err(Into::into))
            .collect()
    }

    /// Grants of every shared key set so far, for a new reader
    fn grants_of_history(
        &self,
        user_keys: &dyn UserKeys,
        reader: &PublicCryptoKeySet,
    ) -> Result<Vec<SharedKeyGrant>, AccessControlError> {
        let keys_ids: BTreeSet<&TimeId> = self.shared_keys.iter().map(|g| &g.keys_id).collect();
        keys_ids
            .into_iter()
            .map(|keys_id| {
                let key_set = self
                    .recover_shared_keys(keys_id, user_keys)
                    .ok_or_else(|| AccessControlError::MissingSharedKeys(keys_id.clone()))?;
                key_set.grant_to(reader).map_err(Into::into)
            })
            .collect()
    }

    fn rotate_shared_keys(&mut self) -> Result<(), AccessControlError> {
        let mut key_set = SharedKeySet::generate();
        if let Some((current, _)) = self.current_shared_key() {
            if current.millis() >= key_set.keys_id.millis() {
                key_set.keys_id = TimeId::from_millis(current.millis() + 1);
            }
        }
        let grants = self.grants_for_readers(&key_set)?;
        tracing::debug!(
            "rotating shared keys of {} for {} readers",
            self.initial.folder_path,
            grants.len()
        );
        self.push_grants(grants);
        Ok(())
    }

    fn push_grants(&mut self, grants: Vec<SharedKeyGrant>) {
        self.pending.shared_keys.extend(grants.iter().cloned());
        self.shared_keys.extend(grants);
    }

    fn merge(&mut self, delta: &AccessControlDelta) {
        for change in &delta.changes {
            if !self.changes.contains(change) {
                self.changes.push(change.clone());
            }
        }
        for grant in &delta.shared_keys {
            if !self.shared_keys.contains(grant) {
                self.shared_keys.push(grant.clone());
            }
        }
        sort_changes(&mut self.changes);
        self.rebuild_state();
    }

    fn rebuild_state(&mut self) {
        let mut replay = Replay::new(&self.initial);
        for change in &self.changes {
            replay.apply(change);
        }
        self.state = replay.state;
        self.public_keys = replay.public_keys;
    }
}

/// Roles and keys as the history is replayed in order
///
/// A change that targets the creator, adds a key that already has access, or
/// expects a role other than the one its target holds is skipped, so every
/// replica derives the same state from the same set of changes.
struct Replay {
    creator: CryptoKeySetId,
    state: BTreeMap<CryptoKeySetId, Role>,
    public_keys: BTreeMap<CryptoKeySetId, PublicKey>,
}

impl Replay {
    fn new(initial: &AccessControlInitial) -> Self {
        Self {
            creator: CryptoKeySetId::for_public_key(&initial.creator),
            state: initial.access.clone(),
            public_keys: initial.public_keys.clone(),
        }
    }

    fn apply(&mut self, change: &SignedAccessChange) {
        let target = &change.value.target;
        if target == &self.creator
            || change.value.kind.expected_role() != self.state.get(target).copied()
        {
            tracing::debug!("skipping inconsistent access change for {}", target);
            return;
        }
        match &change.value.kind {
            AccessChangeKind::AddAccess { public_key, role } => {
                self.state.insert(target.clone(), *role);
                self.public_keys.insert(target.clone(), *public_key);
            }
            AccessChangeKind::ModifyAccess { new_role, .. } => {
                self.state.insert(target.clone(), *new_role);
            }
            AccessChangeKind::RemoveAccess { .. } => {
                self.state.remove(target);
            }
        }
    }
}

/// How the changes of one delta move read access around
#[derive(Debug, Default)]
struct ReaderChanges {
    /// gained read access
    added: BTreeSet<CryptoKeySetId>,
    /// targets of any change
    targets: BTreeSet<CryptoKeySetId>,
    /// some reader lost read access
    revoked: bool,
}

fn sort_changes(changes: &mut [SignedAccessChange]) {
    changes.sort_by(|a, b| {
        a.value
            .time_id
            .cmp(&b.value.time_id)
            .then_with(|| a.signature().cmp(b.signature()))
    });
}

impl ConflictFreeDocument for AccessControlDocument {
    fn encode_snapshot(&self) -> Result<Vec<u8>, CodecError> {
        AccessControlSnapshot {
            initial: self.initial.clone(),
            changes: self.changes.clone(),
            shared_keys: self.shared_keys.clone(),
        }
        .encode()
    }

    fn encode_delta(&self) -> Result<Option<Vec<u8>>, CodecError> {
        if self.pending.changes.is_empty() && self.pending.shared_keys.is_empty() {
            return Ok(None);
        }
        self.pending.encode().map(Some)
    }

    fn apply_delta(&mut self, delta: &[u8]) -> Result<(), DocumentError> {
        let delta = AccessControlDelta::decode(delta)?;
        self.merge(&delta);
        Ok(())
    }

    fn clear_pending(&mut self) {
        self.pending = AccessControlDelta::default();
    }
}
