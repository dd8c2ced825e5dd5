//! Folder shared keys
//!
//! Each folder has one or more shared key sets: an Ed25519 keypair whose
//! public half is visible to everyone and whose private half is wrapped
//! (one [`SharedKeyGrant`] per reader) for every key set with read access.
//!
//! Writers only need the public half: a payload is encrypted under a fresh
//! content [`Secret`] which is then wrapped for the shared public key. This
//! is what lets an appender write content it cannot read back.

use serde::{Deserialize, Serialize};

use super::key_set::{CryptoKeySetId, PrivateCryptoKeySet, PublicCryptoKeySet};
use super::keys::{PublicKey, SecretKey};
use super::secret::Secret;
use super::secret_share::{SecretShare, SecretShareError};
use crate::linked_data::CodecError;
use crate::path::TimeId;

const DETERMINISTIC_ID_CONTEXT: &str = "jax-syncable 2024 deterministic id salt";

#[derive(Debug, thiserror::Error)]
pub enum SharedKeyError {
    #[error("share error: {0}")]
    Share(#[from] SecretShareError),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("grant is not addressed to key set {0}")]
    WrongRecipient(CryptoKeySetId),
    #[error("sealed with unknown shared keys {0}")]
    UnknownKeys(TimeId),
}

/// A shared keypair held in the clear by a reader
#[derive(Debug, Clone)]
pub struct SharedKeySet {
    pub keys_id: TimeId,
    secret_key: SecretKey,
}

impl SharedKeySet {
    pub fn generate() -> Self {
        Self {
            keys_id: TimeId::now(),
            secret_key: SecretKey::generate(),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        self.secret_key.public()
    }

    /// Wrap this key set for one reader
    pub fn grant_to(&self, recipient: &PublicCryptoKeySet) -> Result<SharedKeyGrant, SharedKeyError> {
        let share = SecretShare::new(&Secret::from(self.secret_key.to_bytes()), &recipient.public_key)?;
        Ok(SharedKeyGrant {
            keys_id: self.keys_id.clone(),
            public_key: self.public_key(),
            recipient: recipient.id.clone(),
            share,
        })
    }

    /// Unwrap a grant addressed to one of our key sets
    pub fn recover(
        grant: &SharedKeyGrant,
        recipient: &PrivateCryptoKeySet,
    ) -> Result<Self, SharedKeyError> {
        if &grant.recipient != recipient.id() {
            return Err(SharedKeyError::WrongRecipient(recipient.id().clone()));
        }
        let secret = grant.share.recover(recipient.secret_key())?;
        Ok(Self {
            keys_id: grant.keys_id.clone(),
            secret_key: SecretKey::from(*secret),
        })
    }

    /// Salt for content-derived ids, known only to readers of the folder
    pub fn deterministic_id_salt(&self) -> [u8; 32] {
        Secret::from(self.secret_key.to_bytes()).derive(DETERMINISTIC_ID_CONTEXT)
    }

    pub fn open(&self, sealed: &SealedPayload) -> Result<Vec<u8>, SharedKeyError> {
        if sealed.keys_id != self.keys_id {
            return Err(SharedKeyError::UnknownKeys(sealed.keys_id.clone()));
        }
        let content_key = sealed.wrapped_key.recover(&self.secret_key)?;
        Ok(content_key
            .decrypt(&sealed.ciphertext)
            .map_err(SecretShareError::from)?)
    }
}

/// One reader's wrapped copy of a shared key set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedKeyGrant {
    pub keys_id: TimeId,
    pub public_key: PublicKey,
    pub recipient: CryptoKeySetId,
    pub share: SecretShare,
}

/// Ciphertext plus the content key wrapped for a shared public key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedPayload {
    pub keys_id: TimeId,
    pub wrapped_key: SecretShare,
    pub ciphertext: Vec<u8>,
}

impl SealedPayload {
    pub fn seal(
        keys_id: &TimeId,
        public_key: &PublicKey,
        plaintext: &[u8],
    ) -> Result<Self, SharedKeyError> {
        let content_key = Secret::generate();
        let ciphertext = content_key
            .encrypt(plaintext)
            .map_err(SecretShareError::from)?;
        Ok(Self {
            keys_id: keys_id.clone(),
            wrapped_key: SecretShare::new(&content_key, public_key)?,
            ciphertext,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, SharedKeyError> {
        Ok(bincode::serialize(self).map_err(CodecError::from)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, SharedKeyError> {
        Ok(bincode::deserialize(data).map_err(CodecError::from)?)
    }
}
