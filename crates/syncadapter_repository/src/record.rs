//! Record identifiers and records.

use std::fmt;
use uuid::Uuid;

/// Identifier of a record within a collection.
///
/// GUIDs are opaque strings assigned by whichever client created the record.
/// Locally generated GUIDs are 12 characters drawn from a random UUID.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Guid(String);

impl Guid {
    /// Length of locally generated GUIDs.
    pub const GENERATED_LEN: usize = 12;

    /// Wraps an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Creates a new random identifier.
    #[must_use]
    pub fn random() -> Self {
        let simple = Uuid::new_v4().simple().to_string();
        Self(simple[..Self::GENERATED_LEN].to_string())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({})", self.0)
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Guid {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Guid {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A single item of a synchronized collection.
///
/// The payload is opaque to repositories; only the session engine
/// interprets it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Record identifier (upsert key).
    pub guid: Guid,
    /// Collection the record belongs to (e.g. "bookmarks").
    pub collection: String,
    /// Last modification time in milliseconds since the Unix epoch.
    pub last_modified: i64,
    /// Whether this record is a deletion marker.
    pub deleted: bool,
    /// Opaque record body.
    pub payload: Vec<u8>,
}

impl Record {
    /// Creates a live record.
    pub fn new(
        guid: impl Into<Guid>,
        collection: impl Into<String>,
        last_modified: i64,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            guid: guid.into(),
            collection: collection.into(),
            last_modified,
            deleted: false,
            payload,
        }
    }

    /// Creates a deletion marker for `guid`.
    pub fn tombstone(
        guid: impl Into<Guid>,
        collection: impl Into<String>,
        last_modified: i64,
    ) -> Self {
        Self {
            guid: guid.into(),
            collection: collection.into(),
            last_modified,
            deleted: true,
            payload: Vec::new(),
        }
    }

    /// Returns true if the record changed at or after `timestamp`.
    #[must_use]
    pub fn modified_since(&self, timestamp: i64) -> bool {
        self.last_modified >= timestamp
    }
}
