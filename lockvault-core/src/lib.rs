//! Encrypted, chunked password vault with guardian-based recovery.
//!
//! Records are serialized to canonical CBOR, checksummed, optionally
//! LZ4-compressed, sealed with XChaCha20-Poly1305 under a signature-derived
//! session key, and packed into capacity-bounded storage chunks tracked by a
//! master ledger. Losing the signing identity is recoverable: the master
//! secret is Shamir-split across guardians, and an M-of-N quorum plus a
//! mandatory time delay plus a possession proof transfers ownership to a
//! new identity.
//!
//! [`vault::PasswordVault`] is the entry point; hosts supply the
//! [`platform::DurableStore`] and [`platform::LogicalClock`] seams.

pub mod allocator;
pub mod category;
pub mod chunk;
pub mod codec;
pub mod crypto;
pub mod error;
pub mod platform;
pub mod recovery;
pub mod session;
pub mod types;
pub mod vault;

pub use category::{Category, CategoryRegistry};
pub use codec::{CustomField, PasswordRecord};
pub use error::{VaultError, VaultResult};
pub use session::{derive_session_key, SessionContext, SessionKey, SigningOracle};
pub use types::{CapacityTier, EntryId, EntryKind, MasterVault, OwnerId};
pub use vault::PasswordVault;
