//! Provenance checks
//!
//! An item is trusted when one of these holds:
//!
//! - it carries an acceptance signed by the store creator, the folder's
//!   creator, one of the local user's keys, or a key that was creator or
//!   owner of the folder at the acceptance's trusted time;
//! - its origin is signed by the store creator;
//! - its origin is signed by a key with write access to the owning folder,
//!   either at the origin's trusted time or, lacking one, now.
//!
//! The containers holding a folder's documents are trusted as is: the
//! documents validate their own snapshots and deltas.

mod marks;
mod validator;

pub use marks::TrustMarks;
