//! The password record model and its canonical byte form.
//!
//! Records are serialized to canonical CBOR before checksumming and
//! encryption. Fields added by later schema versions carry serde defaults so
//! that older payloads deserialize cleanly and the migration chain only has
//! to stamp versions and backfill semantics.

use serde::{Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};
use crate::types::EntryKind;

/// Current record schema version.
pub const CURRENT_VERSION: u8 = 2;

/// A user-defined key/value pair attached to a record (schema v2+).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomField {
    /// Field name shown to the user.
    pub name: String,
    /// Field value; treated as sensitive.
    pub value: String,
}

/// A single password entry, pre-encryption.
///
/// Schema history:
/// - v0: title, username, secret, url, notes, kind, timestamps
/// - v1: added `category_id`
/// - v2: added `custom_fields`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordRecord {
    /// Schema version this record was written at. Absent in v0 payloads.
    #[serde(default)]
    pub schema_version: u8,
    /// Entry title (site or service name).
    pub title: String,
    /// Account username or login.
    pub username: String,
    /// The secret itself (password, key material, note body).
    pub secret: String,
    /// Optional associated URL.
    #[serde(default)]
    pub url: Option<String>,
    /// Optional free-form notes.
    #[serde(default)]
    pub notes: Option<String>,
    /// Classification of the entry.
    #[serde(default)]
    pub kind: EntryKind,
    /// User-defined category (v1+; 0 means uncategorized).
    #[serde(default)]
    pub category_id: u32,
    /// Additional user-defined fields (v2+).
    #[serde(default)]
    pub custom_fields: Vec<CustomField>,
    /// Unix timestamp when the record was created.
    pub created_at: u64,
    /// Unix timestamp of the last content change.
    pub updated_at: u64,
}

impl PasswordRecord {
    /// Creates a new record at the current schema version.
    #[must_use]
    pub const fn new(
        title: String,
        username: String,
        secret: String,
        kind: EntryKind,
        now: u64,
    ) -> Self {
        Self {
            schema_version: CURRENT_VERSION,
            title,
            username,
            secret,
            url: None,
            notes: None,
            kind,
            category_id: 0,
            custom_fields: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Serializes the record to canonical CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Serialization`] on encoder failure.
    pub fn to_canonical_bytes(&self) -> VaultResult<Vec<u8>> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes)
            .map_err(|e| VaultError::Serialization(e.to_string()))?;
        Ok(bytes)
    }

    /// Deserializes a record from canonical CBOR bytes.
    ///
    /// Does not run migrations; see [`crate::codec::migrate`].
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::DataCorruption`] when the bytes are not a valid
    /// record payload.
    pub fn from_canonical_bytes(bytes: &[u8]) -> VaultResult<Self> {
        ciborium::from_reader(bytes)
            .map_err(|e| VaultError::corruption(format!("record payload unreadable: {e}")))
    }
}
