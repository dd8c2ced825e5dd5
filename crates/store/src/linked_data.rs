//! Content hashing and deterministic block encoding
//!
//! Everything that gets hashed or signed goes through DAG-CBOR so that
//! two replicas always produce the same bytes (and therefore the same
//! hashes and signatures) for the same logical value.

use std::fmt;
use std::str::FromStr;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Size of a BLAKE3 digest in bytes
pub const HASH_SIZE: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("dag-cbor encode error: {0}")]
    Encode(String),
    #[error("dag-cbor decode error: {0}")]
    Decode(String),
    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid hash: {0}")]
    InvalidHash(String),
}

/// Types that can be written to (and read back from) a DAG-CBOR block
pub trait BlockEncoded: Serialize + DeserializeOwned {
    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        serde_ipld_dagcbor::to_vec(self).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(data: &[u8]) -> Result<Self, CodecError> {
        serde_ipld_dagcbor::from_slice(data).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

/// Deterministically encode any serializable value
pub fn to_dag_cbor<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError> {
    serde_ipld_dagcbor::to_vec(value).map_err(|e| CodecError::Encode(e.to_string()))
}

/// A BLAKE3 content hash
///
/// Serialized as a lowercase hex string so it can be used as a map key
/// in DAG-CBOR and stays readable in JSON metadata.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Hash([u8; HASH_SIZE]);

impl Hash {
    /// Hash raw bytes
    pub fn of(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Hash the DAG-CBOR encoding of a value
    pub fn of_encoded<T: Serialize + ?Sized>(value: &T) -> Result<Self, CodecError> {
        Ok(Self::of(&to_dag_cbor(value)?))
    }

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(hex: &str) -> Result<Self, CodecError> {
        let mut buff = [0; HASH_SIZE];
        hex::decode_to_slice(hex, &mut buff)
            .map_err(|_| CodecError::InvalidHash(hex.to_string()))?;
        Ok(Self(buff))
    }
}

impl From<[u8; HASH_SIZE]> for Hash {
    fn from(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", &self.to_hex()[..12])
    }
}

impl FromStr for Hash {
    type Err = CodecError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl TryFrom<String> for Hash {
    type Error = CodecError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<Hash> for String {
    fn from(hash: Hash) -> Self {
        hash.to_hex()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_hash_hex_roundtrip() {
        let hash = Hash::of(b"hello world");
        let recovered = Hash::from_hex(&hash.to_hex()).unwrap();
        assert_eq!(hash, recovered);
        assert!(Hash::from_hex("zz").is_err());
    }

    #[test]
    fn test_encoded_hash_ignores_insertion_order() {
        let mut a = BTreeMap::new();
        a.insert("b".to_string(), Hash::of(b"2"));
        a.insert("a".to_string(), Hash::of(b"1"));

        let mut b = BTreeMap::new();
        b.insert("a".to_string(), Hash::of(b"1"));
        b.insert("b".to_string(), Hash::of(b"2"));

        assert_eq!(Hash::of_encoded(&a).unwrap(), Hash::of_encoded(&b).unwrap());
    }

    #[test]
    fn test_hash_serializes_as_string() {
        let hash = Hash::of(b"data");
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", hash.to_hex()));
        let back: Hash = bincode::deserialize(&bincode::serialize(&hash).unwrap()).unwrap();
        assert_eq!(hash, back);
    }
}
