//! Host integration seams.
//!
//! The vault core never talks to disks or wall clocks directly. Hosts
//! provide a [`DurableStore`] for persistence and a [`LogicalClock`] for
//! time; [`memory::MemoryStore`] and [`memory::ManualClock`] are the
//! in-process implementations used by tests.
//!
//! This module also owns the snapshot envelope: the CRC-framed byte format
//! every persisted structure travels in.

pub mod memory;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{VaultError, VaultResult};

/// One write in an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Store `value` under `key`, replacing any previous value.
    Put {
        /// Namespaced storage key.
        key: String,
        /// Snapshot bytes.
        value: Vec<u8>,
    },
    /// Remove `key` if present.
    Delete {
        /// Namespaced storage key.
        key: String,
    },
}

/// Durable key-value persistence provided by the host.
///
/// A commit is all-or-nothing: either every op in the batch becomes durable
/// or none does. The core relies on this to keep the master ledger and chunk
/// snapshots mutually consistent.
pub trait DurableStore: Send + Sync {
    /// Reads the value stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns a host-specific message when the backend fails.
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, String>;

    /// Applies a batch of writes atomically.
    ///
    /// # Errors
    ///
    /// Returns a host-specific message when the backend fails; on error no
    /// op in the batch may have taken effect.
    fn commit(&self, batch: Vec<WriteOp>) -> Result<(), String>;
}

impl<T: DurableStore + ?Sized> DurableStore for std::sync::Arc<T> {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, String> {
        (**self).read(key)
    }

    fn commit(&self, batch: Vec<WriteOp>) -> Result<(), String> {
        (**self).commit(batch)
    }
}

/// Source of Unix timestamps.
///
/// All delay, expiry and rate-limit decisions read time through this trait
/// so tests can drive the clock manually.
pub trait LogicalClock: Send + Sync {
    /// Current Unix time in seconds.
    fn unix_now(&self) -> u64;
}

impl<T: LogicalClock + ?Sized> LogicalClock for std::sync::Arc<T> {
    fn unix_now(&self) -> u64 {
        (**self).unix_now()
    }
}

/// Snapshot envelope layout:
///
/// | Field   | Size | Notes                          |
/// |---------|------|--------------------------------|
/// | magic   | 4    | `b"LVSS"`                      |
/// | version | 2    | little-endian, currently 1     |
/// | kind    | 2    | little-endian discriminator    |
/// | crc32   | 4    | little-endian, over the body   |
/// | body    | var  | canonical CBOR                 |
const SNAPSHOT_MAGIC: [u8; 4] = *b"LVSS";

/// Current snapshot envelope version.
pub const SNAPSHOT_VERSION: u16 = 1;

/// Envelope header length in bytes.
pub const SNAPSHOT_HEADER_SIZE: usize = 12;

/// Snapshot kind for the master ledger.
pub const KIND_MASTER: u16 = 1;
/// Snapshot kind for a storage chunk.
pub const KIND_CHUNK: u16 = 2;
/// Snapshot kind for recovery state.
pub const KIND_RECOVERY: u16 = 3;
/// Snapshot kind for the category registry.
pub const KIND_CATEGORIES: u16 = 4;

/// Frames a serializable value into a CRC-checked snapshot.
///
/// # Errors
///
/// Returns [`VaultError::Serialization`] when CBOR encoding fails.
pub fn encode_snapshot<T: Serialize>(kind: u16, value: &T) -> VaultResult<Vec<u8>> {
    let mut body = Vec::new();
    ciborium::into_writer(value, &mut body)
        .map_err(|e| VaultError::Serialization(e.to_string()))?;

    let mut out = Vec::with_capacity(SNAPSHOT_HEADER_SIZE + body.len());
    out.extend_from_slice(&SNAPSHOT_MAGIC);
    out.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
    out.extend_from_slice(&kind.to_le_bytes());
    out.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Unframes and validates a snapshot produced by [`encode_snapshot`].
///
/// # Errors
///
/// Returns [`VaultError::DataCorruption`] on a bad magic, kind mismatch,
/// truncation or CRC failure, and [`VaultError::UnsupportedVersion`] for an
/// unknown envelope version.
pub fn decode_snapshot<T: DeserializeOwned>(kind: u16, bytes: &[u8]) -> VaultResult<T> {
    if bytes.len() < SNAPSHOT_HEADER_SIZE {
        return Err(VaultError::corruption(format!(
            "snapshot of {} bytes is shorter than the {SNAPSHOT_HEADER_SIZE} byte header",
            bytes.len()
        )));
    }
    if bytes[0..4] != SNAPSHOT_MAGIC {
        return Err(VaultError::corruption("snapshot magic mismatch"));
    }

    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != SNAPSHOT_VERSION {
        return Err(VaultError::UnsupportedVersion {
            found: u8::try_from(version).unwrap_or(u8::MAX),
            current: u8::try_from(SNAPSHOT_VERSION).unwrap_or(u8::MAX),
        });
    }

    let found_kind = u16::from_le_bytes([bytes[6], bytes[7]]);
    if found_kind != kind {
        return Err(VaultError::corruption(format!(
            "snapshot kind {found_kind} where {kind} was expected"
        )));
    }

    let stored_crc = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    let body = &bytes[SNAPSHOT_HEADER_SIZE..];
    if crc32fast::hash(body) != stored_crc {
        return Err(VaultError::corruption("snapshot crc mismatch"));
    }

    ciborium::from_reader(body).map_err(|e| VaultError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CapacityTier, MasterVault, OwnerId};

    fn sample() -> MasterVault {
        MasterVault::new(OwnerId::new([3u8; 32]), CapacityTier::Basic, 100)
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let master = sample();
        let bytes = encode_snapshot(KIND_MASTER, &master).unwrap();
        let back: MasterVault = decode_snapshot(KIND_MASTER, &bytes).unwrap();
        assert_eq!(back, master);
    }

    #[test]
    fn test_snapshot_kind_mismatch() {
        let bytes = encode_snapshot(KIND_MASTER, &sample()).unwrap();
        let result: VaultResult<MasterVault> = decode_snapshot(KIND_CHUNK, &bytes);
        assert!(matches!(result, Err(VaultError::DataCorruption { .. })));
    }

    #[test]
    fn test_snapshot_crc_detects_flip() {
        let mut bytes = encode_snapshot(KIND_MASTER, &sample()).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let result: VaultResult<MasterVault> = decode_snapshot(KIND_MASTER, &bytes);
        assert!(matches!(result, Err(VaultError::DataCorruption { .. })));
    }

    #[test]
    fn test_snapshot_truncated() {
        let bytes = encode_snapshot(KIND_MASTER, &sample()).unwrap();
        let result: VaultResult<MasterVault> = decode_snapshot(KIND_MASTER, &bytes[..8]);
        assert!(matches!(result, Err(VaultError::DataCorruption { .. })));
    }

    #[test]
    fn test_snapshot_bad_magic() {
        let mut bytes = encode_snapshot(KIND_MASTER, &sample()).unwrap();
        bytes[0] = b'X';
        let result: VaultResult<MasterVault> = decode_snapshot(KIND_MASTER, &bytes);
        assert!(matches!(result, Err(VaultError::DataCorruption { .. })));
    }
}
