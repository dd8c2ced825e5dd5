use serde::{Deserialize, Serialize};

use super::key_set::{CryptoKeySetId, PrivateCryptoKeySet};
use super::keys::PublicKey;
use crate::linked_data::{to_dag_cbor, CodecError};

#[derive(Debug, thiserror::Error)]
pub enum SignedError {
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("malformed signature")]
    MalformedSignature,
    #[error("signature does not verify for signer {0}")]
    InvalidSignature(PublicKey),
}

/// Signature extras for values that need no context binding
#[derive(Debug, Clone, Copy, Serialize)]
pub struct NoExtras;

/// A value signed by one key
///
/// The signature covers the DAG-CBOR encoding of `(value, extras)`. Extras
/// are not stored; the verifier rebuilds them from where the value was
/// found (the item path, the folder it governs ...), which binds a
/// signature to its context and stops it being replayed elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signed<T> {
    pub value: T,
    pub signer: PublicKey,
    signature: String,
}

impl<T: Serialize> Signed<T> {
    pub fn sign<E: Serialize>(
        value: T,
        extras: &E,
        key_set: &PrivateCryptoKeySet,
    ) -> Result<Self, SignedError> {
        let payload = to_dag_cbor(&(&value, extras))?;
        let signature = key_set.secret_key().sign(&payload);
        Ok(Self {
            value,
            signer: key_set.public_key(),
            signature: hex::encode(signature.to_bytes()),
        })
    }

    pub fn verify<E: Serialize>(&self, extras: &E) -> Result<(), SignedError> {
        let payload = to_dag_cbor(&(&self.value, extras))?;
        let bytes = hex::decode(&self.signature).map_err(|_| SignedError::MalformedSignature)?;
        let signature = ed25519_dalek::Signature::from_slice(&bytes)
            .map_err(|_| SignedError::MalformedSignature)?;
        self.signer
            .verify(&payload, &signature)
            .map_err(|_| SignedError::InvalidSignature(self.signer))
    }

    pub fn signer_id(&self) -> CryptoKeySetId {
        CryptoKeySetId::for_public_key(&self.signer)
    }

    /// Hex signature, used as a deterministic tie breaker when ordering
    pub fn signature(&self) -> &str {
        &self.signature
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Claim {
        amount: u64,
    }

    #[test]
    fn test_sign_and_verify_with_extras() {
        let key = PrivateCryptoKeySet::generate();
        let signed = Signed::sign(Claim { amount: 3 }, &"context-a", &key).unwrap();
        assert!(signed.verify(&"context-a").is_ok());
        assert!(signed.verify(&"context-b").is_err());
        assert_eq!(signed.signer_id(), *key.id());
    }

    #[test]
    fn test_tampered_value_fails() {
        let key = PrivateCryptoKeySet::generate();
        let mut signed = Signed::sign(Claim { amount: 3 }, &NoExtras, &key).unwrap();
        signed.value.amount = 4;
        assert!(matches!(
            signed.verify(&NoExtras),
            Err(SignedError::InvalidSignature(_))
        ));
    }

    #[test]
    fn test_survives_serialization() {
        let key = PrivateCryptoKeySet::generate();
        let signed = Signed::sign(Claim { amount: 9 }, &NoExtras, &key).unwrap();
        let json = serde_json::to_vec(&signed).unwrap();
        let back: Signed<Claim> = serde_json::from_slice(&json).unwrap();
        assert!(back.verify(&NoExtras).is_ok());
        let bin = bincode::serialize(&signed).unwrap();
        let back: Signed<Claim> = bincode::deserialize(&bin).unwrap();
        assert!(back.verify(&NoExtras).is_ok());
    }
}
