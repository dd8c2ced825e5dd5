//! Trusted time
//!
//! A trusted time source vouches that some content existed under some
//! parent path at a given time. Origins may carry such a signature, and
//! acceptances must, so that a writer's role can be checked at the time
//! the write happened instead of now.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::crypto::{PrivateCryptoKeySet, PublicKey, SecretKey};
use crate::linked_data::{to_dag_cbor, CodecError, Hash};
use crate::path::{SyncablePath, TimeId};

#[derive(Debug, thiserror::Error)]
pub enum TrustedTimeError {
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("trusted time source unavailable: {0}")]
    Unavailable(String),
}

/// Opaque signature over a [`TrustedTimeClaim`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrustedTimeSignature(String);

impl TrustedTimeSignature {
    pub fn new(signature: impl Into<String>) -> Self {
        Self(signature.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// What a trusted time signature attests to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedTimeClaim {
    pub time_id: TimeId,
    pub parent_path: SyncablePath,
    pub content_hash: Hash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedTime {
    pub time_id: TimeId,
    pub signature: TrustedTimeSignature,
}

/// Issues and checks trusted time signatures
///
/// Implementations are typically remote services; the store only ever
/// talks to them through this trait.
#[async_trait]
pub trait TrustedTimeSource: Send + Sync {
    /// Get a signed time for content about to be written under `parent_path`
    ///
    /// Returns `Ok(None)` when this source cannot issue signatures, in which
    /// case writes proceed without trusted time.
    async fn generate_trusted_time(
        &self,
        parent_path: &SyncablePath,
        content_hash: &Hash,
    ) -> Result<Option<TrustedTime>, TrustedTimeError>;

    async fn is_trusted_time_signature_valid(
        &self,
        signature: &TrustedTimeSignature,
        claim: &TrustedTimeClaim,
    ) -> bool;
}

/// A source that never issues and never accepts trusted time
#[derive(Debug, Clone, Default)]
pub struct NoTrustedTimeSource;

#[async_trait]
impl TrustedTimeSource for NoTrustedTimeSource {
    async fn generate_trusted_time(
        &self,
        _parent_path: &SyncablePath,
        _content_hash: &Hash,
    ) -> Result<Option<TrustedTime>, TrustedTimeError> {
        Ok(None)
    }

    async fn is_trusted_time_signature_valid(
        &self,
        _signature: &TrustedTimeSignature,
        _claim: &TrustedTimeClaim,
    ) -> bool {
        false
    }
}

/// Trusted time backed by a time authority keypair
///
/// Every replica knows the authority's public key and can verify; only a
/// replica holding the authority's secret key can issue.
#[derive(Debug, Clone)]
pub struct KeyedTrustedTimeSource {
    authority: PublicKey,
    signer: Option<PrivateCryptoKeySet>,
}

impl KeyedTrustedTimeSource {
    /// A source that can issue signatures
    pub fn issuing(secret_key: SecretKey) -> Self {
        Self {
            authority: secret_key.public(),
            signer: Some(secret_key.into()),
        }
    }

    /// A source that can only verify signatures from `authority`
    pub fn verifying(authority: PublicKey) -> Self {
        Self {
            authority,
            signer: None,
        }
    }

    pub fn authority(&self) -> PublicKey {
        self.authority
    }
}

#[async_trait]
impl TrustedTimeSource for KeyedTrustedTimeSource {
    async fn generate_trusted_time(
        &self,
        parent_path: &SyncablePath,
        content_hash: &Hash,
    ) -> Result<Option<TrustedTime>, TrustedTimeError> {
        let Some(signer) = &self.signer else {
            return Ok(None);
        };
        let claim = TrustedTimeClaim {
            time_id: TimeId::now(),
            parent_path: parent_path.clone(),
            content_hash: *content_hash,
        };
        let signature = signer.secret_key().sign(&to_dag_cbor(&claim)?);
        Ok(Some(TrustedTime {
            time_id: claim.time_id,
            signature: TrustedTimeSignature(hex::encode(signature.to_bytes())),
        }))
    }

    async fn is_trusted_time_signature_valid(
        &self,
        signature: &TrustedTimeSignature,
        claim: &TrustedTimeClaim,
    ) -> bool {
        let Ok(payload) = to_dag_cbor(claim) else {
            return false;
        };
        let Ok(bytes) = hex::decode(signature.as_str()) else {
            return false;
        };
        let Ok(signature) = ed25519_dalek::Signature::from_slice(&bytes) else {
            return false;
        };
        self.authority.verify(&payload, &signature).is_ok()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_keyed_source_roundtrip() {
        let authority = SecretKey::generate();
        let issuer = KeyedTrustedTimeSource::issuing(authority.clone());
        let verifier = KeyedTrustedTimeSource::verifying(authority.public());

        let parent = SyncablePath::root("store");
        let hash = Hash::of(b"content");
        let time = issuer
            .generate_trusted_time(&parent, &hash)
            .await
            .unwrap()
            .unwrap();

        let claim = TrustedTimeClaim {
            time_id: time.time_id.clone(),
            parent_path: parent.clone(),
            content_hash: hash,
        };
        assert!(verifier.is_trusted_time_signature_valid(&time.signature, &claim).await);

        let moved = TrustedTimeClaim {
            parent_path: SyncablePath::root("elsewhere"),
            ..claim
        };
        assert!(!verifier.is_trusted_time_signature_valid(&time.signature, &moved).await);
    }

    #[tokio::test]
    async fn test_verifying_source_cannot_issue() {
        let verifier = KeyedTrustedTimeSource::verifying(SecretKey::generate().public());
        let issued = verifier
            .generate_trusted_time(&SyncablePath::root("store"), &Hash::of(b"x"))
            .await
            .unwrap();
        assert!(issued.is_none());
        assert!(
            NoTrustedTimeSource
                .generate_trusted_time(&SyncablePath::root("store"), &Hash::of(b"x"))
                .await
                .unwrap()
                .is_none()
        );
    }
}
