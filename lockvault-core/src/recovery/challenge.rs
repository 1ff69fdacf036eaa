//! Recovery challenge envelopes.
//!
//! A recovery request carries a fixed 80-byte envelope holding a random
//! 32-byte challenge sealed under the vault's master secret:
//!
//! | Field      | Size | Notes                       |
//! |------------|------|-----------------------------|
//! | nonce      | 24   | XChaCha20-Poly1305 nonce    |
//! | ciphertext | 32   | sealed challenge bytes      |
//! | tag        | 16   | Poly1305 tag                |
//! | padding    | 8    | zero, reserved              |
//!
//! Only a party who reconstructs the master secret from guardian shares can
//! open the envelope; presenting its plaintext as the completion proof
//! demonstrates possession without placing the secret in the request.

use sha2::{Digest, Sha256};

use crate::crypto::{self, LABEL_CHALLENGE, NONCE_SIZE, TAG_SIZE};
use crate::error::{VaultError, VaultResult};
use crate::session::SessionKey;
use crate::types::OwnerId;

/// Length of the challenge plaintext in bytes.
pub const CHALLENGE_SIZE: usize = 32;

/// Total envelope length in bytes.
pub const ENVELOPE_SIZE: usize = 80;

const PADDING_SIZE: usize = ENVELOPE_SIZE - NONCE_SIZE - CHALLENGE_SIZE - TAG_SIZE;

/// A sealed challenge together with the hash its proof is checked against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedChallenge {
    /// The 80-byte envelope stored on the recovery request.
    pub envelope: [u8; ENVELOPE_SIZE],
    /// `SHA256(challenge plaintext)`.
    pub challenge_hash: [u8; 32],
}

/// Creates a fresh challenge sealed under the master secret.
///
/// # Errors
///
/// Returns [`VaultError::EncryptionFailed`] when sealing fails.
///
/// # Panics
///
/// Panics if the system's random number generator fails.
pub fn create_challenge(
    master_secret: &SessionKey,
    owner: &OwnerId,
) -> VaultResult<SealedChallenge> {
    let mut challenge = [0u8; CHALLENGE_SIZE];
    getrandom::getrandom(&mut challenge).expect("getrandom failed");

    let sealed = crypto::seal(master_secret, owner, LABEL_CHALLENGE, &challenge)?;
    debug_assert_eq!(sealed.len(), NONCE_SIZE + CHALLENGE_SIZE + TAG_SIZE);

    let mut envelope = [0u8; ENVELOPE_SIZE];
    envelope[..sealed.len()].copy_from_slice(&sealed);

    Ok(SealedChallenge {
        envelope,
        challenge_hash: hash_proof(&challenge),
    })
}

/// Opens an envelope with the reconstructed master secret, yielding the
/// proof bytes for completion.
///
/// # Errors
///
/// Returns [`VaultError::DataCorruption`] for a malformed envelope and
/// [`VaultError::DecryptionFailed`] when the secret is wrong or the
/// ciphertext was tampered with.
pub fn open_challenge(
    master_secret: &SessionKey,
    owner: &OwnerId,
    envelope: &[u8],
) -> VaultResult<[u8; CHALLENGE_SIZE]> {
    if envelope.len() != ENVELOPE_SIZE {
        return Err(VaultError::corruption(format!(
            "challenge envelope is {} bytes where {ENVELOPE_SIZE} are required",
            envelope.len()
        )));
    }
    let (sealed, padding) = envelope.split_at(ENVELOPE_SIZE - PADDING_SIZE);
    if padding.iter().any(|&b| b != 0) {
        return Err(VaultError::corruption("challenge envelope padding not zero"));
    }

    let plaintext = crypto::open(master_secret, owner, LABEL_CHALLENGE, sealed)?;
    let challenge: [u8; CHALLENGE_SIZE] = plaintext
        .try_into()
        .map_err(|_| VaultError::corruption("challenge plaintext has wrong length"))?;
    Ok(challenge)
}

/// Hashes proof bytes the way the request stores them.
#[must_use]
pub fn hash_proof(proof: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(proof);
    hasher.finalize().into()
}
