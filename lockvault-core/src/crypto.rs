//! AEAD layer for vault contents.
//!
//! XChaCha20-Poly1305 with a random 24-byte nonce prepended to the
//! ciphertext. Associated data binds every sealed blob to its owner and a
//! domain-separation label, so a ciphertext cannot be replayed across owners
//! or between the entry and recovery domains.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::{VaultError, VaultResult};
use crate::session::SessionKey;
use crate::types::OwnerId;

/// Size of the XChaCha20-Poly1305 nonce in bytes.
pub const NONCE_SIZE: usize = 24;

/// Size of the Poly1305 authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Label sealing password-entry payloads.
pub const LABEL_ENTRY: &[u8] = b"lockvault:entry";

/// Label sealing recovery challenge plaintexts.
pub const LABEL_CHALLENGE: &[u8] = b"lockvault:challenge";

/// HKDF info string for the title blind-index key.
const TITLE_INDEX_INFO: &[u8] = b"lockvault:title-index";

/// Computes the keyed blind-index hash of an entry title.
///
/// Entry headers are persisted outside the AEAD boundary, so the title hash
/// they carry must not be invertible by anyone holding the store. The index
/// key is derived from the session key; equal titles under the same key
/// still collide, which is what makes the hash usable for lookup.
///
/// # Panics
///
/// This function will not panic - the `expect`s are for conditions that
/// cannot fail (fixed HKDF output length, HMAC accepts any key length).
#[must_use]
pub fn title_index(key: &SessionKey, title: &str) -> [u8; 32] {
    let hkdf = Hkdf::<Sha256>::new(None, key.as_bytes());
    let mut index_key = [0u8; 32];
    hkdf.expand(TITLE_INDEX_INFO, &mut index_key)
        .expect("32 bytes is a valid HKDF-SHA256 output length");

    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(&index_key)
        .expect("HMAC-SHA256 accepts any key length");
    mac.update(title.as_bytes());
    index_key.zeroize();
    mac.finalize().into_bytes().into()
}

/// Constructs associated data: `owner || label`.
fn build_associated_data(owner: &OwnerId, label: &[u8]) -> Vec<u8> {
    let mut aad = Vec::with_capacity(32 + label.len());
    aad.extend_from_slice(owner.as_bytes());
    aad.extend_from_slice(label);
    aad
}

/// Generates a random nonce.
///
/// # Panics
///
/// Panics if the system's random number generator fails.
fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    getrandom::getrandom(&mut nonce).expect("getrandom failed");
    nonce
}

/// Encrypts plaintext under the session key.
///
/// Output layout: `nonce(24) || ciphertext || tag(16)`.
///
/// # Errors
///
/// Returns [`VaultError::EncryptionFailed`] if the AEAD call fails.
///
/// # Panics
///
/// This function will not panic - the `expect` is for a condition that
/// cannot fail (key length is always 32 bytes by construction).
pub fn seal(
    key: &SessionKey,
    owner: &OwnerId,
    label: &[u8],
    plaintext: &[u8],
) -> VaultResult<Vec<u8>> {
    let cipher =
        XChaCha20Poly1305::new_from_slice(key.as_bytes()).expect("key length is always 32");

    let nonce_bytes = generate_nonce();
    let nonce = XNonce::from_slice(&nonce_bytes);
    let aad = build_associated_data(owner, label);

    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad: &aad,
            },
        )
        .map_err(|_| VaultError::encryption("XChaCha20-Poly1305 encryption failed"))?;

    let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Decrypts a sealed blob produced by [`seal`].
///
/// # Errors
///
/// Returns [`VaultError::DecryptionFailed`] when the blob is too short,
/// the tag fails to authenticate, or the associated data does not match.
///
/// # Panics
///
/// This function will not panic - the `expect` is for a condition that
/// cannot fail (key length is always 32 bytes by construction).
pub fn open(
    key: &SessionKey,
    owner: &OwnerId,
    label: &[u8],
    sealed: &[u8],
) -> VaultResult<Vec<u8>> {
    if sealed.len() < NONCE_SIZE + TAG_SIZE {
        return Err(VaultError::decryption("sealed blob too short"));
    }

    let cipher =
        XChaCha20Poly1305::new_from_slice(key.as_bytes()).expect("key length is always 32");

    let nonce = XNonce::from_slice(&sealed[..NONCE_SIZE]);
    let aad = build_associated_data(owner, label);

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: &sealed[NONCE_SIZE..],
                aad: &aad,
            },
        )
        .map_err(|_| VaultError::decryption("XChaCha20-Poly1305 authentication failed"))
}
