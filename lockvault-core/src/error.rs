//! Error types for the lockvault core.
//!
//! The taxonomy keeps corruption and schema errors distinct from not-found
//! and authorization errors so callers can react differently (alert vs.
//! retry vs. skip). Recovery-protocol failures are explicit, named
//! conditions and are never treated as transient.

use thiserror::Error;

use crate::types::EntryId;

/// Result type for lockvault operations.
pub type VaultResult<T> = Result<T, VaultError>;

/// Errors raised by lockvault components.
#[derive(Debug, Error)]
pub enum VaultError {
    // Corruption — always fatal to the single record, never silently skipped.
    /// Checksum mismatch or decompression failure on a stored record.
    #[error("data corruption: {context}")]
    DataCorruption {
        /// Description of what failed validation.
        context: String,
    },

    /// Record was written by a newer format than this build understands.
    #[error("unsupported record version: {found} (current is {current})")]
    UnsupportedVersion {
        /// Version found on the wire.
        found: u8,
        /// Highest version this build can decode.
        current: u8,
    },

    // Capacity — recoverable by tier upgrade or explicit expansion.
    /// The capacity policy refuses further storage.
    #[error("storage limit reached: {context}")]
    StorageLimitReached {
        /// Which limit was hit (chunk count, tier capacity, ...).
        context: String,
    },

    /// A chunk cannot hold the requested bytes.
    #[error("insufficient chunk capacity: need {needed}, have {available}")]
    ChunkCapacity {
        /// Bytes required.
        needed: u32,
        /// Bytes free in the chunk.
        available: u32,
    },

    /// A chunk already holds the maximum number of entries.
    #[error("entry limit reached for chunk {chunk_index}")]
    EntryLimit {
        /// The full chunk.
        chunk_index: u16,
    },

    /// Requested expansion exceeds the per-call growth cap.
    #[error("expansion of {requested} bytes exceeds per-call cap of {cap}")]
    ExpansionTooLarge {
        /// Bytes requested.
        requested: u32,
        /// Maximum growth per call.
        cap: u32,
    },

    // Lookup
    /// No entry with the given id exists.
    #[error("entry not found: {0}")]
    EntryNotFound(EntryId),

    /// No category with the given id exists.
    #[error("category not found: {0}")]
    CategoryNotFound(u32),

    /// A category still holding entries cannot be deleted.
    #[error("category {0} still has entries")]
    CategoryNotEmpty(u32),

    /// Category name exceeds the stored-size cap.
    #[error("category name of {got} bytes exceeds cap of {max}")]
    CategoryNameTooLong {
        /// Bytes supplied.
        got: usize,
        /// Maximum stored name size.
        max: usize,
    },

    /// No chunk with the given index exists.
    #[error("chunk not found: {0}")]
    ChunkNotFound(u16),

    // Authentication — fatal to the current operation, retryable after
    // re-authentication.
    /// The signing oracle declined to produce a signature.
    #[error("authentication declined: {reason}")]
    AuthenticationDeclined {
        /// Reason reported by the oracle.
        reason: String,
    },

    /// Signature material has the wrong shape.
    #[error("invalid signature: expected {expected} bytes, got {got}")]
    InvalidSignature {
        /// Expected signature length.
        expected: usize,
        /// Actual length supplied.
        got: usize,
    },

    /// The cached session key has exceeded a lifetime and must be re-derived.
    #[error("session expired")]
    SessionExpired,

    /// Caller is not authorized for the operation.
    #[error("unauthorized")]
    Unauthorized,

    // Recovery protocol
    /// Threshold configuration is invalid (M < 1 or M > N).
    #[error("invalid threshold: {threshold} of {total}")]
    ThresholdMisconfigured {
        /// Configured threshold M.
        threshold: u8,
        /// Configured guardian count N.
        total: u8,
    },

    /// Recovery delay outside the permitted bounds.
    #[error("invalid recovery delay: {seconds}s")]
    InvalidRecoveryDelay {
        /// Requested delay in seconds.
        seconds: u64,
    },

    /// A guardian with this identity is already registered.
    #[error("guardian already exists")]
    GuardianAlreadyExists,

    /// The share index is already assigned to another guardian.
    #[error("duplicate share index: {0}")]
    DuplicateShareIndex(u8),

    /// Share index outside the valid 1..=255 range.
    #[error("invalid share index: {0}")]
    InvalidShareIndex(u8),

    /// No guardian with this identity is registered.
    #[error("guardian not found")]
    GuardianNotFound,

    /// Acceptance attempted by a guardian who is not pending.
    #[error("guardianship already accepted")]
    GuardianAlreadyAccepted,

    /// The guardian exists but is not in the Active state.
    #[error("not an active guardian")]
    NotActiveGuardian,

    /// Removing this guardian would leave fewer than M active guardians.
    #[error("insufficient guardians remaining")]
    InsufficientGuardians,

    /// Guardian mutation refused while a recovery request is live.
    #[error("active recovery request exists")]
    ActiveRecoveryExists,

    /// Fewer than M guardians have confirmed participation.
    #[error("insufficient participants: {confirmed} of {threshold}")]
    InsufficientParticipants {
        /// Guardians confirmed so far.
        confirmed: usize,
        /// Required threshold M.
        threshold: u8,
    },

    /// Completion attempted before the mandatory delay elapsed.
    #[error("recovery not ready")]
    RecoveryNotReady,

    /// The request passed its expiry deadline.
    #[error("recovery request expired")]
    RecoveryExpired,

    /// The submitted proof does not match the challenge hash.
    #[error("invalid recovery proof")]
    InvalidProof,

    /// The request is already Completed or Cancelled.
    #[error("recovery request already terminal")]
    RequestAlreadyTerminal,

    /// No recovery request with that id exists.
    #[error("recovery request not found: {0}")]
    RequestNotFound(u64),

    /// Recovery is not configured for this owner.
    #[error("recovery not configured")]
    RecoveryNotConfigured,

    /// Initiation attempted before the cooldown elapsed.
    #[error("recovery rate limited: retry after {retry_at}")]
    RateLimited {
        /// Logical time at which initiation becomes permitted again.
        retry_at: u64,
    },

    // Crypto / serialization carriers
    /// AEAD encryption failed.
    #[error("encryption failed: {context}")]
    EncryptionFailed {
        /// What was being encrypted.
        context: String,
    },

    /// AEAD authentication failed or ciphertext is malformed.
    #[error("decryption failed: {context}")]
    DecryptionFailed {
        /// What was being decrypted.
        context: String,
    },

    /// Canonical serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Durable store refused or failed a read/commit.
    #[error("store error: {0}")]
    Store(String),
}

impl VaultError {
    /// Creates a corruption error with context.
    pub fn corruption<S: Into<String>>(context: S) -> Self {
        Self::DataCorruption {
            context: context.into(),
        }
    }

    /// Creates a decryption failure with context.
    pub fn decryption<S: Into<String>>(context: S) -> Self {
        Self::DecryptionFailed {
            context: context.into(),
        }
    }

    /// Creates an encryption failure with context.
    pub fn encryption<S: Into<String>>(context: S) -> Self {
        Self::EncryptionFailed {
            context: context.into(),
        }
    }

    /// Creates a storage-limit error with context.
    pub fn limit<S: Into<String>>(context: S) -> Self {
        Self::StorageLimitReached {
            context: context.into(),
        }
    }

    /// True when the error is a per-record corruption or schema failure.
    ///
    /// Bulk listings use this to collect the error alongside successfully
    /// decoded entries instead of aborting the whole listing.
    #[must_use]
    pub const fn is_record_fatal(&self) -> bool {
        matches!(
            self,
            Self::DataCorruption { .. }
                | Self::UnsupportedVersion { .. }
                | Self::DecryptionFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = VaultError::UnsupportedVersion {
            found: 9,
            current: 2,
        };
        assert!(format!("{err}").contains("unsupported record version: 9"));

        let err = VaultError::InsufficientParticipants {
            confirmed: 2,
            threshold: 3,
        };
        assert!(format!("{err}").contains("2 of 3"));
    }

    #[test]
    fn test_record_fatal_classification() {
        assert!(VaultError::corruption("checksum").is_record_fatal());
        assert!(VaultError::decryption("aead").is_record_fatal());
        assert!(!VaultError::EntryNotFound(crate::types::EntryId(7)).is_record_fatal());
    }
}
