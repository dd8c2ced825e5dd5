use crate::access::Role;
use crate::crypto::{CryptoKeySetId, PublicKey};
use crate::linked_data::Hash;
use crate::metadata::{container_content_hash, AcceptanceExtras, OriginExtras, StoredItemMetadata};
use crate::path::{SyncableId, SyncableItemType, SyncablePath, TimeId};
use crate::store::{StoreError, SyncableStore, ROOT_NAME};
use crate::trusted_time::{TrustedTimeClaim, TrustedTimeSignature};

/// Roles whose acceptance vouches for someone else's item
const ACCEPTING_ROLES: &[Role] = &[Role::Creator, Role::Owner];

impl SyncableStore {
    /// Verify the provenance of one stored item
    ///
    /// Ancestors are not checked here; path resolution checks each level on
    /// its way down. Successful checks are remembered in the trust marks.
    pub(crate) async fn check_trusted(
        &self,
        path: &SyncablePath,
        stored: &StoredItemMetadata,
    ) -> Result<(), StoreError> {
        if self.trust_marks().is_marked(path) {
            return Ok(());
        }
        if is_document_scaffold(path) {
            self.trust_marks().mark(path);
            return Ok(());
        }

        if path.is_root() {
            self.check_root(path, stored).await?;
        } else {
            let content_hash = self.actual_content_hash(path, stored).await?;
            if content_hash != stored.origin().value.content_hash {
                return Err(StoreError::untrusted(path, "content does not match its origin"));
            }
            match stored.acceptance() {
                Some(_) => self.check_acceptance(path, stored).await?,
                None => self.check_origin(path, stored).await?,
            }
        }
        self.trust_marks().mark(path);
        Ok(())
    }

    async fn check_root(
        &self,
        path: &SyncablePath,
        stored: &StoredItemMetadata,
    ) -> Result<(), StoreError> {
        let origin = stored.origin();
        origin
            .verify(&OriginExtras {
                path,
                item_type: SyncableItemType::Folder,
                name: ROOT_NAME,
            })
            .map_err(|e| StoreError::untrusted(path, format!("bad root signature: {e}")))?;
        let expected = container_content_hash(path, SyncableItemType::Folder, ROOT_NAME)?;
        if origin.value.content_hash != expected {
            return Err(StoreError::untrusted(path, "root hash does not match"));
        }
        // also enforces the expected creator, if one was configured
        self.creator().await?;
        Ok(())
    }

    async fn actual_content_hash(
        &self,
        path: &SyncablePath,
        stored: &StoredItemMetadata,
    ) -> Result<Hash, StoreError> {
        if stored.item_type.is_container() {
            return Ok(container_content_hash(
                path,
                stored.item_type,
                &stored.item.name,
            )?);
        }
        match stored.local.hash {
            Some(hash) => Ok(hash),
            None => Ok(Hash::of(&self.backing().get_data_at_path(path).await?)),
        }
    }

    /// An acceptance replaces the origin check entirely
    async fn check_acceptance(
        &self,
        path: &SyncablePath,
        stored: &StoredItemMetadata,
    ) -> Result<(), StoreError> {
        let Some(acceptance) = stored.acceptance() else {
            return Err(StoreError::untrusted(path, "no acceptance"));
        };
        let content_hash = &stored.origin().value.content_hash;
        acceptance
            .verify(&AcceptanceExtras { path, content_hash })
            .map_err(|e| StoreError::untrusted(path, format!("bad acceptance: {e}")))?;

        let signer = acceptance.signer;
        let folder = path.owning_folder();
        let access = self.access_control_document(&folder).await?;
        let folder_creator = access.with(|access| access.creator()).await;
        let signer_id = CryptoKeySetId::for_public_key(&signer);
        if signer == self.creator().await? || signer == folder_creator {
            return Ok(());
        }
        if self.user_keys().holds(&signer_id) {
            return Ok(());
        }

        let time_id = &acceptance.value.time_id;
        if !self
            .is_trusted_time_valid(
                path,
                &acceptance.value.trusted_time_signature,
                time_id,
                content_hash,
            )
            .await
        {
            return Err(StoreError::untrusted(path, "acceptance has no valid trusted time"));
        }
        let accepted = access
            .with(|access| {
                access.did_crypto_key_have_role_at_time_ms(
                    &signer_id,
                    ACCEPTING_ROLES,
                    time_id.millis(),
                )
            })
            .await;
        if accepted {
            Ok(())
        } else {
            Err(StoreError::untrusted(
                path,
                format!("{signer} could not accept items at {time_id}"),
            ))
        }
    }

    /// The writer must have had write access when the item was written
    ///
    /// "When" is the origin's trusted time if it has one, otherwise now.
    async fn check_origin(
        &self,
        path: &SyncablePath,
        stored: &StoredItemMetadata,
    ) -> Result<(), StoreError> {
        let origin = stored.origin();
        origin
            .verify(&OriginExtras {
                path,
                item_type: stored.item_type,
                name: &stored.item.name,
            })
            .map_err(|e| StoreError::untrusted(path, format!("bad origin: {e}")))?;

        let signer: PublicKey = origin.signer;
        if signer == self.creator().await? {
            return Ok(());
        }

        let signer_id = CryptoKeySetId::for_public_key(&signer);
        let folder = path.owning_folder();
        let access = self.access_control_document(&folder).await?;
        let role = match &origin.value.trusted_time {
            Some(trusted_time) => {
                if !self
                    .is_trusted_time_valid(
                        path,
                        &trusted_time.signature,
                        &trusted_time.time_id,
                        &origin.value.content_hash,
                    )
                    .await
                {
                    return Err(StoreError::untrusted(path, "origin has invalid trusted time"));
                }
                let millis = trusted_time.time_id.millis();
                access
                    .with(|access| access.role_at_time_ms(&signer_id, millis))
                    .await
            }
            None => access.with(|access| access.role_of(&signer_id)).await,
        };
        match role {
            Some(role) if role.has_write_access() => Ok(()),
            Some(role) => Err(StoreError::untrusted(
                path,
                format!("{signer} was a {role} in {folder}"),
            )),
            None => Err(StoreError::untrusted(
                path,
                format!("{signer} had no access to {folder}"),
            )),
        }
    }

    async fn is_trusted_time_valid(
        &self,
        path: &SyncablePath,
        signature: &TrustedTimeSignature,
        time_id: &TimeId,
        content_hash: &Hash,
    ) -> bool {
        let claim = TrustedTimeClaim {
            time_id: time_id.clone(),
            parent_path: path.parent().unwrap_or_else(|| path.clone()),
            content_hash: *content_hash,
        };
        self.trusted_time()
            .is_trusted_time_signature_valid(signature, &claim)
            .await
    }
}

/// Containers of a folder's documents, trusted without signatures
///
/// Their snapshot and delta files are validated by the document kinds.
fn is_document_scaffold(path: &SyncablePath) -> bool {
    let folder = path.owning_folder();
    let Some(relative) = path.relative_to(&folder) else {
        return false;
    };
    let Some((first, rest)) = relative.split_first() else {
        return false;
    };
    if !first.is_folder_system_bundle() {
        return false;
    }
    match rest {
        [] => true,
        [container] => *container == SyncableId::snapshots() || *container == SyncableId::deltas(),
        [container, bundle] => {
            *container == SyncableId::deltas() && bundle.item_type() == SyncableItemType::Bundle
        }
        _ => false,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_document_scaffold_paths() {
        let root = SyncablePath::root("store");
        let access = root.append(SyncableId::access_control());
        let deltas = access.append(SyncableId::deltas());
        let bucket = deltas.append(SyncableId::new_time(SyncableItemType::Bundle, false));

        assert!(is_document_scaffold(&access));
        assert!(is_document_scaffold(&access.append(SyncableId::snapshots())));
        assert!(is_document_scaffold(&deltas));
        assert!(is_document_scaffold(&bucket));
        assert!(!is_document_scaffold(
            &bucket.append(SyncableId::new_time(SyncableItemType::File, false))
        ));
        assert!(!is_document_scaffold(
            &root.append(SyncableId::new_uuid(SyncableItemType::Bundle, false))
        ));
    }
}
