use std::fmt;

use serde::{Deserialize, Serialize};

use super::keys::{PublicKey, SecretKey};

/// Stable identifier of a crypto key set, derived from its public key
///
/// Access control state is keyed by this id rather than the raw key.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CryptoKeySetId(String);

impl CryptoKeySetId {
    pub fn for_public_key(public_key: &PublicKey) -> Self {
        let digest = blake3::hash(&public_key.to_bytes());
        Self(format!("cks_{}", hex::encode(&digest.as_bytes()[..16])))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CryptoKeySetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for CryptoKeySetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CryptoKeySetId({})", self.0)
    }
}

/// The public half of a key set, as registered in access control documents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicCryptoKeySet {
    pub id: CryptoKeySetId,
    pub public_key: PublicKey,
}

impl From<PublicKey> for PublicCryptoKeySet {
    fn from(public_key: PublicKey) -> Self {
        Self {
            id: CryptoKeySetId::for_public_key(&public_key),
            public_key,
        }
    }
}

/// A key set the local user holds the private half of
///
/// A single Ed25519 key serves both for signing and, converted to X25519,
/// for receiving shares.
#[derive(Debug, Clone)]
pub struct PrivateCryptoKeySet {
    id: CryptoKeySetId,
    secret_key: SecretKey,
}

impl From<SecretKey> for PrivateCryptoKeySet {
    fn from(secret_key: SecretKey) -> Self {
        Self {
            id: CryptoKeySetId::for_public_key(&secret_key.public()),
            secret_key,
        }
    }
}

impl PrivateCryptoKeySet {
    pub fn generate() -> Self {
        SecretKey::generate().into()
    }

    pub fn id(&self) -> &CryptoKeySetId {
        &self.id
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret_key
    }

    pub fn public_key(&self) -> PublicKey {
        self.secret_key.public()
    }

    pub fn public(&self) -> PublicCryptoKeySet {
        PublicCryptoKeySet {
            id: self.id.clone(),
            public_key: self.public_key(),
        }
    }
}

/// The private key sets available to the local user
pub trait UserKeys: Send + Sync {
    /// The key set used to sign everything this user writes
    fn signing_key_set(&self) -> PrivateCryptoKeySet;

    /// Every key set the user holds, signing key included
    fn get_private_crypto_key_sets(&self) -> Vec<PrivateCryptoKeySet>;

    fn get_private_crypto_key_set(&self, id: &CryptoKeySetId) -> Option<PrivateCryptoKeySet> {
        self.get_private_crypto_key_sets()
            .into_iter()
            .find(|key_set| key_set.id() == id)
    }

    fn holds(&self, id: &CryptoKeySetId) -> bool {
        self.get_private_crypto_key_set(id).is_some()
    }
}

/// [`UserKeys`] backed by keys held in memory
#[derive(Debug, Clone)]
pub struct InMemoryUserKeys {
    signing: PrivateCryptoKeySet,
    others: Vec<PrivateCryptoKeySet>,
}

impl InMemoryUserKeys {
    pub fn new(signing: impl Into<PrivateCryptoKeySet>) -> Self {
        Self {
            signing: signing.into(),
            others: Vec::new(),
        }
    }

    pub fn generate() -> Self {
        Self::new(PrivateCryptoKeySet::generate())
    }

    /// Add a key set that can decrypt but is not used for signing
    pub fn with_key_set(mut self, key_set: impl Into<PrivateCryptoKeySet>) -> Self {
        self.others.push(key_set.into());
        self
    }

    pub fn public_key(&self) -> PublicKey {
        self.signing.public_key()
    }

    pub fn id(&self) -> CryptoKeySetId {
        self.signing.id().clone()
    }
}

impl UserKeys for InMemoryUserKeys {
    fn signing_key_set(&self) -> PrivateCryptoKeySet {
        self.signing.clone()
    }

    fn get_private_crypto_key_sets(&self) -> Vec<PrivateCryptoKeySet> {
        std::iter::once(self.signing.clone())
            .chain(self.others.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_key_set_id_is_stable() {
        let key = SecretKey::generate();
        let a = PrivateCryptoKeySet::from(key.clone());
        let b = PrivateCryptoKeySet::from(key);
        assert_eq!(a.id(), b.id());
        assert!(a.id().as_str().starts_with("cks_"));
        assert_eq!(a.public().id, CryptoKeySetId::for_public_key(&a.public_key()));
    }

    #[test]
    fn test_user_keys_lookup() {
        let extra = PrivateCryptoKeySet::generate();
        let keys = InMemoryUserKeys::generate().with_key_set(extra.clone());
        assert!(keys.holds(extra.id()));
        assert!(keys.holds(&keys.id()));
        assert!(!keys.holds(PrivateCryptoKeySet::generate().id()));
        assert_eq!(keys.get_private_crypto_key_sets().len(), 2);
    }
}
