//! Core type definitions for the lockvault.
//!
//! Identifiers are fixed-size newtypes; the master vault and chunk
//! descriptors are flat, index-addressed structures with no pointer graphs.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};

// Identifiers

/// A 32-byte owner identity (public key of the vault owner's wallet).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnerId(pub [u8; 32]);

impl OwnerId {
    /// Creates a new `OwnerId` from raw bytes.
    #[must_use]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes of the identity.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Converts the identity to a hexadecimal string.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OwnerId({})", self.to_hex())
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl AsRef<[u8]> for OwnerId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A monotonically assigned entry identifier.
///
/// Entry ids are globally unique within a vault, strictly increasing, and
/// never reused even after deletion.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryId(pub u64);

impl EntryId {
    /// Returns the raw id value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryId({})", self.0)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Enums

/// Classification of a password entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum EntryKind {
    /// Login credentials (username/password).
    #[default]
    Login = 0x01,
    /// Credit card details.
    CreditCard = 0x02,
    /// Free-form secure note.
    SecureNote = 0x03,
    /// Identity document data.
    Identity = 0x04,
    /// API key.
    ApiKey = 0x05,
    /// SSH key material.
    SshKey = 0x06,
    /// Cryptocurrency wallet data.
    CryptoWallet = 0x07,
}

impl EntryKind {
    /// Converts from a u8 tag value.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Login),
            0x02 => Some(Self::CreditCard),
            0x03 => Some(Self::SecureNote),
            0x04 => Some(Self::Identity),
            0x05 => Some(Self::ApiKey),
            0x06 => Some(Self::SshKey),
            0x07 => Some(Self::CryptoWallet),
            _ => None,
        }
    }
}

/// Per-entry flag bits (favorite, archived).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EntryFlags(pub u8);

impl EntryFlags {
    const FAVORITE: u8 = 0x01;
    const ARCHIVED: u8 = 0x02;

    /// True when the favorite bit is set.
    #[must_use]
    pub const fn is_favorite(self) -> bool {
        self.0 & Self::FAVORITE != 0
    }

    /// True when the archived bit is set.
    #[must_use]
    pub const fn is_archived(self) -> bool {
        self.0 & Self::ARCHIVED != 0
    }

    /// Sets or clears the favorite bit.
    pub const fn set_favorite(&mut self, favorite: bool) {
        if favorite {
            self.0 |= Self::FAVORITE;
        } else {
            self.0 &= !Self::FAVORITE;
        }
    }

    /// Sets or clears the archived bit.
    pub const fn set_archived(&mut self, archived: bool) {
        if archived {
            self.0 |= Self::ARCHIVED;
        } else {
            self.0 &= !Self::ARCHIVED;
        }
    }
}

/// Capacity policy tiers consulted by the allocator.
///
/// Tiers bound the aggregate byte capacity of a vault. Billing for a tier is
/// an external concern; this core only reads the capacity table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapacityTier {
    /// 1 KiB aggregate capacity (~10 entries).
    #[default]
    Free,
    /// 10 KiB aggregate capacity.
    Basic,
    /// 100 KiB aggregate capacity.
    Premium,
    /// 1 MiB aggregate capacity.
    Enterprise,
}

impl CapacityTier {
    /// Maximum aggregate storage for this tier, in bytes.
    #[must_use]
    pub const fn max_total_capacity(self) -> u64 {
        match self {
            Self::Free => 1_024,
            Self::Basic => 10_240,
            Self::Premium => 102_400,
            Self::Enterprise => 1_048_576,
        }
    }

    /// True when moving to `target` is a strict upgrade.
    #[must_use]
    pub const fn can_upgrade_to(self, target: Self) -> bool {
        self.max_total_capacity() < target.max_total_capacity()
    }
}

// Entry headers and chunk descriptors

/// Metadata header for one packed entry within a chunk.
///
/// The `(offset, size)` range addresses the entry's ciphertext inside the
/// chunk's blob region; ranges of live headers never overlap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryHeader {
    /// Globally unique entry id, immutable once assigned.
    pub entry_id: EntryId,
    /// Byte offset of the ciphertext within the chunk blob.
    pub offset: u32,
    /// Ciphertext length in bytes.
    pub size: u32,
    /// Classification of the entry.
    pub kind: EntryKind,
    /// User-defined category id.
    pub category_id: u32,
    /// Keyed hash of the entry title; blind-index material, opaque here.
    pub title_hash: [u8; 32],
    /// Unix timestamp when the entry was created.
    pub created_at: u64,
    /// Unix timestamp of the last modification.
    pub last_modified: u64,
    /// Number of times the entry has been retrieved.
    pub access_count: u32,
    /// Favorite/archived flag bits.
    pub flags: EntryFlags,
}

impl EntryHeader {
    /// End offset (exclusive) of this entry's byte range.
    ///
    /// `None` when `offset + size` overflows, which only a corrupt header
    /// can carry.
    #[must_use]
    pub const fn end(&self) -> Option<u32> {
        self.offset.checked_add(self.size)
    }
}

/// Descriptor for one storage chunk, held in the master vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkDescriptor {
    /// Index of the chunk, assigned sequentially from zero.
    pub chunk_index: u16,
    /// Maximum capacity of the chunk in bytes.
    pub max_capacity: u32,
    /// Bytes currently used (live entries plus internal fragmentation).
    pub used: u32,
    /// Unix timestamp when the chunk was allocated.
    pub created_at: u64,
    /// Unix timestamp of the last mutation.
    pub last_modified: u64,
}

impl ChunkDescriptor {
    /// Free space remaining in the chunk.
    #[must_use]
    pub const fn available(&self) -> u32 {
        self.max_capacity - self.used
    }
}

// Master vault

/// The root descriptor of a vault: chunk list, aggregate usage, and the
/// monotone entry-id counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterVault {
    /// Owner of this vault. Changes only on recovery completion.
    pub owner: OwnerId,
    /// Number of live entries across all chunks.
    pub entry_count: u64,
    /// Next entry id to assign; strictly increasing, never reused.
    pub next_entry_id: u64,
    /// Chunk descriptors in ascending `chunk_index` order.
    pub chunks: Vec<ChunkDescriptor>,
    /// Lookup from entry id to the chunk holding it.
    pub entry_locations: BTreeMap<u64, u16>,
    /// Capacity policy tier for this vault.
    pub tier: CapacityTier,
    /// Aggregate bytes used across all chunks.
    pub storage_used: u64,
    /// Aggregate capacity across all chunks.
    pub total_capacity: u64,
    /// Unix timestamp when the vault was created.
    pub created_at: u64,
    /// Unix timestamp of the last access.
    pub last_accessed: u64,
}

impl MasterVault {
    /// Creates a new empty vault for an owner.
    #[must_use]
    pub const fn new(owner: OwnerId, tier: CapacityTier, now: u64) -> Self {
        Self {
            owner,
            entry_count: 0,
            next_entry_id: 1,
            chunks: Vec::new(),
            entry_locations: BTreeMap::new(),
            tier,
            storage_used: 0,
            total_capacity: 0,
            created_at: now,
            last_accessed: now,
        }
    }

    /// Assigns and returns the next entry id.
    pub const fn take_entry_id(&mut self) -> EntryId {
        let id = self.next_entry_id;
        self.next_entry_id += 1;
        EntryId(id)
    }

    /// Registers a newly allocated chunk.
    pub fn register_chunk(&mut self, descriptor: ChunkDescriptor) {
        self.total_capacity += u64::from(descriptor.max_capacity);
        self.chunks.push(descriptor);
    }

    /// Finds the descriptor for a chunk index.
    #[must_use]
    pub fn descriptor(&self, chunk_index: u16) -> Option<&ChunkDescriptor> {
        self.chunks.iter().find(|c| c.chunk_index == chunk_index)
    }

    /// Finds the descriptor for a chunk index (mutable).
    pub fn descriptor_mut(&mut self, chunk_index: u16) -> Option<&mut ChunkDescriptor> {
        self.chunks.iter_mut().find(|c| c.chunk_index == chunk_index)
    }

    /// Records a change in a chunk's used bytes, keeping aggregates in sync.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::ChunkNotFound`] for an unknown index.
    pub fn update_chunk_usage(&mut self, chunk_index: u16, new_used: u32) -> VaultResult<()> {
        let chunk = self
            .descriptor_mut(chunk_index)
            .ok_or(VaultError::ChunkNotFound(chunk_index))?;
        let old_used = chunk.used;
        chunk.used = new_used;
        if new_used >= old_used {
            self.storage_used += u64::from(new_used - old_used);
        } else {
            self.storage_used -= u64::from(old_used - new_used);
        }
        Ok(())
    }

    /// Locates the chunk holding an entry.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::EntryNotFound`] when the id is unknown.
    pub fn locate(&self, entry_id: EntryId) -> VaultResult<u16> {
        self.entry_locations
            .get(&entry_id.0)
            .copied()
            .ok_or(VaultError::EntryNotFound(entry_id))
    }

    /// True when the tier permits `additional` more bytes.
    #[must_use]
    pub const fn has_capacity_for(&self, additional: u64) -> bool {
        self.storage_used + additional <= self.tier.max_total_capacity()
    }

    /// Updates the last-accessed timestamp.
    pub const fn touch(&mut self, now: u64) {
        self.last_accessed = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_id_monotonic() {
        let mut vault = MasterVault::new(OwnerId::new([1u8; 32]), CapacityTier::Free, 100);
        let first = vault.take_entry_id();
        let second = vault.take_entry_id();
        assert_eq!(first, EntryId(1));
        assert_eq!(second, EntryId(2));
        assert_eq!(vault.next_entry_id, 3);
    }

    #[test]
    fn test_flags_bits() {
        let mut flags = EntryFlags::default();
        assert!(!flags.is_favorite());
        flags.set_favorite(true);
        flags.set_archived(true);
        assert!(flags.is_favorite());
        assert!(flags.is_archived());
        flags.set_favorite(false);
        assert!(!flags.is_favorite());
        assert!(flags.is_archived());
    }

    #[test]
    fn test_tier_upgrade_order() {
        assert!(CapacityTier::Free.can_upgrade_to(CapacityTier::Basic));
        assert!(CapacityTier::Basic.can_upgrade_to(CapacityTier::Enterprise));
        assert!(!CapacityTier::Premium.can_upgrade_to(CapacityTier::Free));
        assert!(!CapacityTier::Premium.can_upgrade_to(CapacityTier::Premium));
    }

    #[test]
    fn test_usage_aggregation() {
        let mut vault = MasterVault::new(OwnerId::new([2u8; 32]), CapacityTier::Basic, 0);
        vault.register_chunk(ChunkDescriptor {
            chunk_index: 0,
            max_capacity: 1024,
            used: 0,
            created_at: 0,
            last_modified: 0,
        });
        vault.update_chunk_usage(0, 300).unwrap();
        assert_eq!(vault.storage_used, 300);
        vault.update_chunk_usage(0, 100).unwrap();
        assert_eq!(vault.storage_used, 100);
        assert!(matches!(
            vault.update_chunk_usage(9, 1),
            Err(VaultError::ChunkNotFound(9))
        ));
    }

    #[test]
    fn test_entry_kind_tags() {
        assert_eq!(EntryKind::from_u8(0x03), Some(EntryKind::SecureNote));
        assert_eq!(EntryKind::from_u8(0xFF), None);
    }
}
