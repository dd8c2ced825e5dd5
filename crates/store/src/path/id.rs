use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{IdError, TimeId};

/// The kind of item an id (and therefore a path) refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncableItemType {
    Folder,
    Bundle,
    File,
}

impl SyncableItemType {
    pub fn is_container(&self) -> bool {
        !matches!(self, SyncableItemType::File)
    }

    fn tag(&self) -> char {
        match self {
            SyncableItemType::Folder => 'd',
            SyncableItemType::Bundle => 'b',
            SyncableItemType::File => 'f',
        }
    }

    fn from_tag(tag: char) -> Option<Self> {
        match tag {
            'd' => Some(SyncableItemType::Folder),
            'b' => Some(SyncableItemType::Bundle),
            'f' => Some(SyncableItemType::File),
            _ => None,
        }
    }
}

impl fmt::Display for SyncableItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncableItemType::Folder => write!(f, "folder"),
            SyncableItemType::Bundle => write!(f, "bundle"),
            SyncableItemType::File => write!(f, "file"),
        }
    }
}

/// How the value part of an id was generated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdScheme {
    /// Random v4 uuid
    Uuid,
    /// Hash of the content, salted with the owning folder's shared secret
    Deterministic,
    /// A [`TimeId`], sortable by creation time
    Time,
    /// Fixed ids of system bundles
    Reserved,
}

impl IdScheme {
    fn tag(&self) -> char {
        match self {
            IdScheme::Uuid => 'u',
            IdScheme::Deterministic => 'd',
            IdScheme::Time => 't',
            IdScheme::Reserved => 'r',
        }
    }

    fn from_tag(tag: char) -> Option<Self> {
        match tag {
            'u' => Some(IdScheme::Uuid),
            'd' => Some(IdScheme::Deterministic),
            't' => Some(IdScheme::Time),
            'r' => Some(IdScheme::Reserved),
            _ => None,
        }
    }
}

const ACCESS_CONTROL: &str = "access-control";
const STORE_CHANGES: &str = "store-changes";
const SNAPSHOTS: &str = "snapshots";
const DELTAS: &str = "deltas";

/// A typed identifier of one item within its parent container
///
/// The string form is `<type><encryption><scheme>_<value>`:
///  - type: `d` folder, `b` bundle, `f` file
///  - encryption: `e` encrypted, `p` plain
///  - scheme: `u` uuid, `d` deterministic, `t` time, `r` reserved
///
/// e.g. `fpt_1712345678901-9c1e0f4a55d2b7e3` is a plain, time ordered file.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SyncableId(String);

impl SyncableId {
    fn compose(item_type: SyncableItemType, encrypted: bool, scheme: IdScheme, value: &str) -> Self {
        Self(format!(
            "{}{}{}_{}",
            item_type.tag(),
            if encrypted { 'e' } else { 'p' },
            scheme.tag(),
            value
        ))
    }

    /// A random id
    pub fn new_uuid(item_type: SyncableItemType, encrypted: bool) -> Self {
        Self::compose(
            item_type,
            encrypted,
            IdScheme::Uuid,
            &Uuid::new_v4().simple().to_string(),
        )
    }

    /// A time ordered id using the current time
    pub fn new_time(item_type: SyncableItemType, encrypted: bool) -> Self {
        Self::from_time_id(item_type, encrypted, &TimeId::now())
    }

    pub fn from_time_id(item_type: SyncableItemType, encrypted: bool, time_id: &TimeId) -> Self {
        Self::compose(item_type, encrypted, IdScheme::Time, time_id.as_str())
    }

    /// An id derived from content, so two writers of the same content agree on it
    ///
    /// The salt keeps the id from leaking the content to anyone who does not
    /// hold the folder's shared keys.
    pub fn deterministic(
        item_type: SyncableItemType,
        encrypted: bool,
        content: &[u8],
        salt: Option<&[u8; 32]>,
    ) -> Self {
        let digest = match salt {
            Some(salt) => blake3::keyed_hash(salt, content),
            None => blake3::hash(content),
        };
        Self::compose(
            item_type,
            encrypted,
            IdScheme::Deterministic,
            &hex::encode(&digest.as_bytes()[..16]),
        )
    }

    pub fn access_control() -> Self {
        Self::compose(SyncableItemType::Bundle, false, IdScheme::Reserved, ACCESS_CONTROL)
    }

    pub fn store_changes() -> Self {
        Self::compose(SyncableItemType::Bundle, false, IdScheme::Reserved, STORE_CHANGES)
    }

    pub fn snapshots() -> Self {
        Self::compose(SyncableItemType::Bundle, false, IdScheme::Reserved, SNAPSHOTS)
    }

    pub fn deltas() -> Self {
        Self::compose(SyncableItemType::Bundle, false, IdScheme::Reserved, DELTAS)
    }

    pub fn item_type(&self) -> SyncableItemType {
        // validated on construction
        SyncableItemType::from_tag(self.tag(0)).unwrap_or(SyncableItemType::File)
    }

    pub fn is_encrypted(&self) -> bool {
        self.tag(1) == 'e'
    }

    pub fn scheme(&self) -> IdScheme {
        IdScheme::from_tag(self.tag(2)).unwrap_or(IdScheme::Uuid)
    }

    pub fn value(&self) -> &str {
        &self.0[4..]
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_reserved(&self) -> bool {
        self.scheme() == IdScheme::Reserved
    }

    /// Whether this is the access control or store changes bundle of a folder
    pub fn is_folder_system_bundle(&self) -> bool {
        self.is_reserved() && matches!(self.value(), ACCESS_CONTROL | STORE_CHANGES)
    }

    pub fn time_id(&self) -> Option<TimeId> {
        match self.scheme() {
            IdScheme::Time => self.value().parse().ok(),
            _ => None,
        }
    }

    fn tag(&self, index: usize) -> char {
        self.0.as_bytes()[index] as char
    }

    fn validate(value: &str) -> Result<(), IdError> {
        let invalid = || IdError::InvalidId(value.to_string());
        let bytes = value.as_bytes();
        if bytes.len() < 5 || bytes[3] != b'_' {
            return Err(invalid());
        }
        SyncableItemType::from_tag(bytes[0] as char).ok_or_else(invalid)?;
        if !matches!(bytes[1], b'e' | b'p') {
            return Err(invalid());
        }
        let scheme = IdScheme::from_tag(bytes[2] as char).ok_or_else(invalid)?;
        let rest = &value[4..];
        if !rest
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.')
        {
            return Err(invalid());
        }
        if scheme == IdScheme::Time {
            rest.parse::<TimeId>()?;
        }
        Ok(())
    }
}

impl fmt::Display for SyncableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for SyncableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SyncableId({})", self.0)
    }
}

impl FromStr for SyncableId {
    type Err = IdError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::validate(s)?;
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for SyncableId {
    type Error = IdError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::validate(&value)?;
        Ok(Self(value))
    }
}

impl From<SyncableId> for String {
    fn from(id: SyncableId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_id_parts() {
        let id = SyncableId::new_uuid(SyncableItemType::Folder, true);
        assert_eq!(id.item_type(), SyncableItemType::Folder);
        assert!(id.is_encrypted());
        assert_eq!(id.scheme(), IdScheme::Uuid);

        let parsed: SyncableId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_reserved_ids() {
        let ac = SyncableId::access_control();
        assert_eq!(ac.as_str(), "bpr_access-control");
        assert!(ac.is_folder_system_bundle());
        assert!(SyncableId::store_changes().is_folder_system_bundle());
        assert!(SyncableId::snapshots().is_reserved());
        assert!(!SyncableId::snapshots().is_folder_system_bundle());
    }

    #[test]
    fn test_time_ids_order() {
        let a = SyncableId::from_time_id(SyncableItemType::File, false, &TimeId::from_millis(5));
        let b = SyncableId::from_time_id(SyncableItemType::File, false, &TimeId::from_millis(6));
        assert!(a < b);
        assert_eq!(a.time_id().unwrap().millis(), 5);
    }

    #[test]
    fn test_deterministic_ids_depend_on_salt() {
        let plain = SyncableId::deterministic(SyncableItemType::File, false, b"x", None);
        let again = SyncableId::deterministic(SyncableItemType::File, false, b"x", None);
        let salted =
            SyncableId::deterministic(SyncableItemType::File, false, b"x", Some(&[7u8; 32]));
        assert_eq!(plain, again);
        assert_ne!(plain, salted);
    }

    #[test]
    fn test_invalid_ids() {
        for bad in ["", "xpu_abc", "fzu_abc", "fpu-abc", "fpu_a/b", "fpt_notatime"] {
            assert!(bad.parse::<SyncableId>().is_err(), "{bad} should not parse");
        }
    }
}
