use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::IdError;

/// Number of random hex characters after the timestamp
const RANDOM_SUFFIX_LEN: usize = 16;
/// Width of the zero padded millisecond timestamp
const MILLIS_WIDTH: usize = 13;

/// A time-ordered identifier
///
/// Formatted as `<13 digit unix millis>-<16 random hex chars>`, so plain
/// string comparison sorts ids by creation time, with the random suffix
/// breaking ties between writers that share a millisecond.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeId(String);

impl TimeId {
    pub fn now() -> Self {
        Self::from_millis(chrono::Utc::now().timestamp_millis().max(0) as u64)
    }

    pub fn from_millis(millis: u64) -> Self {
        let mut random = [0u8; RANDOM_SUFFIX_LEN / 2];
        // the suffix only breaks ties, a failed rng still yields a valid id
        let _ = getrandom::getrandom(&mut random);
        Self(format!(
            "{:0width$}-{}",
            millis,
            hex::encode(random),
            width = MILLIS_WIDTH
        ))
    }

    /// Milliseconds since the unix epoch encoded in this id
    pub fn millis(&self) -> u64 {
        self.0[..MILLIS_WIDTH].parse().unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(value: &str) -> Result<(), IdError> {
        let (millis, suffix) = value
            .split_once('-')
            .ok_or_else(|| IdError::InvalidTimeId(value.to_string()))?;
        if millis.len() != MILLIS_WIDTH || !millis.bytes().all(|b| b.is_ascii_digit()) {
            return Err(IdError::InvalidTimeId(value.to_string()));
        }
        if suffix.len() != RANDOM_SUFFIX_LEN || !suffix.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(IdError::InvalidTimeId(value.to_string()));
        }
        Ok(())
    }
}

impl fmt::Display for TimeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for TimeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TimeId({})", self.0)
    }
}

impl FromStr for TimeId {
    type Err = IdError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::validate(s)?;
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for TimeId {
    type Error = IdError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::validate(&value)?;
        Ok(Self(value))
    }
}

impl From<TimeId> for String {
    fn from(id: TimeId) -> Self {
        id.0
    }
}
