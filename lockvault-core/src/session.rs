//! Session key derivation and caching.
//!
//! The vault never stores its master encryption key. Each session derives a
//! 256-bit key from a deterministic wallet signature over a domain-separated
//! challenge, via HKDF-SHA256. Determinism matters: the same signature and
//! salt must yield the same key after the in-memory cache is evicted, or old
//! records become undecryptable.

use std::sync::RwLock;

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{VaultError, VaultResult};
use crate::types::OwnerId;

/// Domain-separation prefix for session challenges.
const SESSION_DOMAIN: &[u8] = b"lockvault:session:v1";

/// HKDF info string for session keys.
const SESSION_INFO: &[u8] = b"session-key";

/// Expected signature length (ed25519-shaped oracle output).
const SIGNATURE_LEN: usize = 64;

/// An external signer that produces a deterministic signature over a
/// challenge message.
///
/// The oracle is the trust root of the vault: whoever can sign the session
/// challenge can derive the session key. Wallet custody is out of scope; the
/// oracle is treated as opaque.
pub trait SigningOracle {
    /// Signs the challenge message, returning the raw signature bytes.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when the signer declines.
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, String>;
}

/// A 256-bit session key. Zeroized on drop, redacted in debug output.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; 32]);

impl SessionKey {
    /// Creates a session key from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns a reference to the raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Builds the domain-separated challenge message the oracle signs.
#[must_use]
pub fn session_challenge(owner: &OwnerId, salt: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(SESSION_DOMAIN.len() + 32 + salt.len());
    message.extend_from_slice(SESSION_DOMAIN);
    message.extend_from_slice(owner.as_bytes());
    message.extend_from_slice(salt);
    message
}

/// Derives the session key from an oracle signature.
///
/// Defined as `HKDF-SHA256(ikm = owner || signature || salt, salt,
/// info = "session-key", 32)`. Deterministic in all inputs.
///
/// # Errors
///
/// Returns [`VaultError::InvalidSignature`] when the signature is not
/// exactly 64 bytes.
///
/// # Panics
///
/// This function will not panic - the `expect` is for a condition that
/// cannot fail (32 bytes is always a valid HKDF-SHA256 output length).
pub fn derive_session_key(
    owner: &OwnerId,
    signature: &[u8],
    salt: &[u8],
) -> VaultResult<SessionKey> {
    if signature.len() != SIGNATURE_LEN {
        return Err(VaultError::InvalidSignature {
            expected: SIGNATURE_LEN,
            got: signature.len(),
        });
    }

    let mut ikm = Vec::with_capacity(32 + signature.len() + salt.len());
    ikm.extend_from_slice(owner.as_bytes());
    ikm.extend_from_slice(signature);
    ikm.extend_from_slice(salt);

    let hkdf = Hkdf::<Sha256>::new(Some(salt), &ikm);
    let mut okm = [0u8; 32];
    hkdf.expand(SESSION_INFO, &mut okm)
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    ikm.zeroize();

    Ok(SessionKey(okm))
}

/// Lifetime limits for a cached session key, externally configured.
#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    /// Absolute lifetime in seconds from derivation.
    pub max_lifetime_secs: u64,
    /// Inactivity lifetime in seconds since last use.
    pub idle_timeout_secs: u64,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_lifetime_secs: 3600,
            idle_timeout_secs: 900,
        }
    }
}

/// Cached key plus the timestamps the lifetime predicates need.
struct CachedKey {
    key: SessionKey,
    derived_at: u64,
    last_used: u64,
}

/// Caller-owned session context holding at most one cached key.
///
/// There is no ambient global state: the context is passed explicitly, reads
/// are safe from multiple threads, and `invalidate` clears atomically with
/// no partially cleared state visible.
pub struct SessionContext {
    owner: OwnerId,
    limits: SessionLimits,
    cached: RwLock<Option<CachedKey>>,
}

impl SessionContext {
    /// Creates an empty session context for an owner.
    #[must_use]
    pub const fn new(owner: OwnerId, limits: SessionLimits) -> Self {
        Self {
            owner,
            limits,
            cached: RwLock::new(None),
        }
    }

    /// The owner this context authenticates.
    #[must_use]
    pub const fn owner(&self) -> &OwnerId {
        &self.owner
    }

    /// Authenticates against the oracle and caches the derived key.
    ///
    /// # Errors
    ///
    /// [`VaultError::AuthenticationDeclined`] when the oracle refuses,
    /// [`VaultError::InvalidSignature`] on malformed signature material.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn authenticate(
        &self,
        oracle: &dyn SigningOracle,
        salt: &[u8],
        now: u64,
    ) -> VaultResult<SessionKey> {
        let challenge = session_challenge(&self.owner, salt);
        let signature = oracle
            .sign(&challenge)
            .map_err(|reason| VaultError::AuthenticationDeclined { reason })?;
        let key = derive_session_key(&self.owner, &signature, salt)?;

        let mut cached = self.cached.write().expect("session lock poisoned");
        *cached = Some(CachedKey {
            key: key.clone(),
            derived_at: now,
            last_used: now,
        });
        tracing::debug!(owner = %self.owner, "session key derived");
        Ok(key)
    }

    /// Returns the cached key, enforcing both lifetime predicates.
    ///
    /// An expired key is evicted and [`VaultError::SessionExpired`] returned;
    /// callers must re-authenticate, never silently reuse.
    ///
    /// # Errors
    ///
    /// [`VaultError::SessionExpired`] when no live key is cached.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn current_key(&self, now: u64) -> VaultResult<SessionKey> {
        let mut cached = self.cached.write().expect("session lock poisoned");
        let live = cached.as_ref().is_some_and(|entry| {
            now < entry.derived_at + self.limits.max_lifetime_secs
                && now < entry.last_used + self.limits.idle_timeout_secs
        });
        if !live {
            *cached = None;
            return Err(VaultError::SessionExpired);
        }

        let entry = cached.as_mut().expect("liveness checked above");
        entry.last_used = now;
        Ok(entry.key.clone())
    }

    /// Atomically clears the cached key.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn invalidate(&self) {
        let mut cached = self.cached.write().expect("session lock poisoned");
        *cached = None;
        tracing::debug!(owner = %self.owner, "session invalidated");
    }
}
