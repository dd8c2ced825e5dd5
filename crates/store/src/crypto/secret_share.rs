//! Wrapping a secret for a single recipient (ECDH + AES Key Wrap)
//!
//! A share is `ephemeral_pubkey (32) || aes_kw(shared_secret, secret) (40)`.
//! The sender converts a fresh Ed25519 keypair and the recipient's key to
//! X25519, runs ECDH and wraps the secret under the result. Only the holder
//! of the recipient's private key can redo the ECDH and unwrap it.
//!
//! Shares carry both the folder shared keys (wrapped per reader) and the
//! per-payload content keys (wrapped for the folder's shared public key).

use std::convert::TryFrom;

use aes_kw::KekAes256 as Kek;
use serde::{Deserialize, Serialize};

use super::keys::{KeyError, PublicKey, SecretKey, PUBLIC_KEY_SIZE};
use super::secret::{Secret, SecretError, SECRET_SIZE};

/// AES-KW integrity block size in bytes
pub const KW_NONCE_SIZE: usize = 8;
pub const SECRET_SHARE_SIZE: usize = PUBLIC_KEY_SIZE + SECRET_SIZE + KW_NONCE_SIZE;

#[derive(Debug, thiserror::Error)]
pub enum SecretShareError {
    #[error("share error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("key error: {0}")]
    Key(#[from] KeyError),
    #[error("secret error: {0}")]
    Secret(#[from] SecretError),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SecretShare([u8; SECRET_SHARE_SIZE]);

impl TryFrom<&[u8]> for SecretShare {
    type Error = SecretShareError;
    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() != SECRET_SHARE_SIZE {
            return Err(anyhow::anyhow!(
                "invalid share size, expected {}, got {}",
                SECRET_SHARE_SIZE,
                bytes.len()
            )
            .into());
        }
        let mut share = [0; SECRET_SHARE_SIZE];
        share.copy_from_slice(bytes);
        Ok(SecretShare(share))
    }
}

impl TryFrom<String> for SecretShare {
    type Error = SecretShareError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<SecretShare> for String {
    fn from(share: SecretShare) -> Self {
        share.to_hex()
    }
}

impl SecretShare {
    pub fn from_hex(hex: &str) -> Result<Self, SecretShareError> {
        let hex = hex.strip_prefix("0x").unwrap_or(hex);
        let mut buff = [0; SECRET_SHARE_SIZE];
        hex::decode_to_slice(hex, &mut buff).map_err(|_| anyhow::anyhow!("hex decode error"))?;
        Ok(SecretShare(buff))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Wrap `secret` so that only the holder of `recipient`'s private key can recover it
    pub fn new(secret: &Secret, recipient: &PublicKey) -> Result<Self, SecretShareError> {
        let ephemeral_private = SecretKey::generate();
        let ephemeral_public = ephemeral_private.public();

        let shared_secret = ephemeral_private
            .to_x25519()
            .diffie_hellman(&recipient.to_x25519()?);

        let kek = Kek::from(*shared_secret.as_bytes());
        let wrapped = kek
            .wrap_vec(secret.bytes())
            .map_err(|_| anyhow::anyhow!("AES-KW wrap error"))?;

        if PUBLIC_KEY_SIZE + wrapped.len() != SECRET_SHARE_SIZE {
            return Err(anyhow::anyhow!("expected share size is incorrect").into());
        };

        let mut share = [0; SECRET_SHARE_SIZE];
        share[..PUBLIC_KEY_SIZE].copy_from_slice(&ephemeral_public.to_bytes());
        share[PUBLIC_KEY_SIZE..].copy_from_slice(&wrapped);
        Ok(SecretShare(share))
    }

    /// Unwrap the secret with the recipient's private key
    ///
    /// An error means the share was made for another recipient or was tampered with.
    pub fn recover(&self, recipient_secret: &SecretKey) -> Result<Secret, SecretShareError> {
        let ephemeral_public = PublicKey::try_from(&self.0[..PUBLIC_KEY_SIZE])?;

        let shared_secret = recipient_secret
            .to_x25519()
            .diffie_hellman(&ephemeral_public.to_x25519()?);

        let kek = Kek::from(*shared_secret.as_bytes());
        let unwrapped = kek
            .unwrap_vec(&self.0[PUBLIC_KEY_SIZE..])
            .map_err(|_| anyhow::anyhow!("AES-KW unwrap error"))?;

        Ok(Secret::from_slice(&unwrapped)?)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_share_secret() {
        let secret = Secret::from_slice(&[42u8; SECRET_SIZE]).unwrap();
        let private_key = SecretKey::generate();
        let share = SecretShare::new(&secret, &private_key.public()).unwrap();
        assert_eq!(secret, share.recover(&private_key).unwrap());
    }

    #[test]
    fn test_share_wrong_recipient() {
        let secret = Secret::generate();
        let alice = SecretKey::generate();
        let bob = SecretKey::generate();
        let share = SecretShare::new(&secret, &alice.public()).unwrap();
        assert_eq!(secret, share.recover(&alice).unwrap());
        assert!(share.recover(&bob).is_err());
    }

    #[test]
    fn test_share_serializes_as_hex() {
        let secret = Secret::generate();
        let private_key = SecretKey::generate();
        let share = SecretShare::new(&secret, &private_key.public()).unwrap();

        let json = serde_json::to_string(&share).unwrap();
        let from_json: SecretShare = serde_json::from_str(&json).unwrap();
        let from_bincode: SecretShare =
            bincode::deserialize(&bincode::serialize(&share).unwrap()).unwrap();
        assert_eq!(share, from_json);
        assert_eq!(share, from_bincode);
        assert_eq!(secret, from_bincode.recover(&private_key).unwrap());
    }

    #[test]
    fn test_share_invalid_length() {
        assert!(SecretShare::try_from(&[0u8; SECRET_SHARE_SIZE - 1][..]).is_err());
        assert!(SecretShare::from_hex("00").is_err());
    }
}
