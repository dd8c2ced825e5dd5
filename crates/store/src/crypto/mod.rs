//! Cryptographic primitives
//!
//! - **Identity & signing**: Ed25519 keypairs ([`SecretKey`]/[`PublicKey`]), grouped
//!   into key sets identified by [`CryptoKeySetId`]; [`Signed`] binds a signature to
//!   a value plus caller-supplied context ("extras").
//! - **Content encryption**: ChaCha20-Poly1305 under a per-payload [`Secret`].
//! - **Key sharing**: ECDH (Ed25519 converted to X25519) plus AES-KW, packaged as a
//!   [`SecretShare`] for one recipient.
//! - **Folder keys**: [`SharedKeySet`]s wrapped per reader in [`SharedKeyGrant`]s;
//!   anyone can seal a payload for a folder, only readers can open it.

mod key_set;
mod keys;
mod secret;
mod secret_share;
mod shared_keys;
mod signed;

pub use ed25519_dalek::Signature;
pub use key_set::{
    CryptoKeySetId, InMemoryUserKeys, PrivateCryptoKeySet, PublicCryptoKeySet, UserKeys,
};
pub use keys::{KeyError, PublicKey, SecretKey};
pub use secret::{Secret, SecretError, BLAKE3_HASH_SIZE};
pub use secret_share::{SecretShare, SecretShareError};
pub use shared_keys::{SealedPayload, SharedKeyError, SharedKeyGrant, SharedKeySet};
pub use signed::{NoExtras, Signed, SignedError};
