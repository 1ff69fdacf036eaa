//! Record codec: versioned framing, checksums, and optional compression.
//!
//! The codec sits inside the plaintext envelope, before the AEAD boundary.
//! Versioning and checksumming there means schema evolution never depends on
//! re-deriving keys, and corruption can be told apart from authentication
//! failure for diagnostics.

// Payload lengths are bounded well below u32::MAX, so length casts are
// lossless.
#![allow(clippy::cast_possible_truncation)]

pub mod migrate;
pub mod record;

use sha2::{Digest, Sha256};

use crate::error::{VaultError, VaultResult};

pub use record::{CustomField, PasswordRecord, CURRENT_VERSION};

/// Payloads at or above this size are candidates for compression.
///
/// The compressed form is kept only when strictly smaller than the
/// uncompressed form, so incompressible data never pays the inflation
/// overhead on read.
pub const COMPRESSION_THRESHOLD: usize = 500;

/// Size of the serialized-record header.
/// Layout: version(1) + flags(1) + payload_len(4) + checksum(32) = 38
pub const RECORD_HEADER_SIZE: usize = 38;

/// Flag bit marking a compressed payload.
const FLAG_COMPRESSED: u8 = 0x01;

/// A record in its on-wire form, pre-encryption.
///
/// # Binary Layout
///
/// ```text
/// Offset  Size  Field
/// ------  ----  -----
/// 0       1     version (u8)
/// 1       1     flags (bit 0 = compressed)
/// 2       4     payload_len (u32 LE)
/// 6       32    checksum (SHA-256 over the uncompressed canonical bytes)
/// 38      N     payload
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedRecord {
    /// Record schema version the payload was written at.
    pub version: u8,
    /// Whether `payload` is lz4-compressed.
    pub compressed: bool,
    /// SHA-256 digest of the uncompressed canonical bytes.
    pub checksum: [u8; 32],
    /// Canonical bytes, possibly compressed.
    pub payload: Vec<u8>,
}

impl SerializedRecord {
    /// Total encoded length including the header.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        RECORD_HEADER_SIZE + self.payload.len()
    }

    /// Encodes the record to wire bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.push(self.version);
        buf.push(if self.compressed { FLAG_COMPRESSED } else { 0 });
        buf.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.checksum);
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Decodes wire bytes back into a serialized record.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::DataCorruption`] when the buffer is too short
    /// or the declared payload length does not match.
    pub fn from_bytes(bytes: &[u8]) -> VaultResult<Self> {
        if bytes.len() < RECORD_HEADER_SIZE {
            return Err(VaultError::corruption("record header too short"));
        }

        let version = bytes[0];
        let flags = bytes[1];
        let payload_len = u32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]) as usize;

        let mut checksum = [0u8; 32];
        checksum.copy_from_slice(&bytes[6..38]);

        if bytes.len() != RECORD_HEADER_SIZE + payload_len {
            return Err(VaultError::corruption(format!(
                "record payload length mismatch: declared {payload_len}, got {}",
                bytes.len() - RECORD_HEADER_SIZE
            )));
        }

        Ok(Self {
            version,
            compressed: flags & FLAG_COMPRESSED != 0,
            checksum,
            payload: bytes[RECORD_HEADER_SIZE..].to_vec(),
        })
    }
}

/// Computes the SHA-256 checksum of canonical payload bytes.
#[must_use]
pub fn checksum(canonical: &[u8]) -> [u8; 32] {
    let digest = Sha256::digest(canonical);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Encodes a record into its on-wire form.
///
/// Canonicalizes the record, checksums the uncompressed bytes, then applies
/// the asymmetric compression policy: compression is attempted at or above
/// [`COMPRESSION_THRESHOLD`] and kept only when it strictly wins.
///
/// # Errors
///
/// Returns [`VaultError::Serialization`] on canonicalization failure.
pub fn encode(record: &PasswordRecord) -> VaultResult<SerializedRecord> {
    let canonical = record.to_canonical_bytes()?;
    let digest = checksum(&canonical);

    let (payload, compressed) = if canonical.len() >= COMPRESSION_THRESHOLD {
        let squeezed = lz4_flex::compress_prepend_size(&canonical);
        if squeezed.len() < canonical.len() {
            (squeezed, true)
        } else {
            (canonical, false)
        }
    } else {
        (canonical, false)
    };

    Ok(SerializedRecord {
        version: CURRENT_VERSION,
        compressed,
        checksum: digest,
        payload,
    })
}

/// Decodes and validates an on-wire record, migrating old versions in place.
///
/// Validation order: version gate, decompression, checksum, payload decode,
/// migration chain. The checksum is always verified before the payload is
/// trusted.
///
/// # Errors
///
/// - [`VaultError::UnsupportedVersion`] for versions newer than this build.
/// - [`VaultError::DataCorruption`] on decompression failure or checksum
///   mismatch; corruption is fatal to the record, never coerced to defaults.
pub fn decode(serialized: &SerializedRecord) -> VaultResult<PasswordRecord> {
    if serialized.version > CURRENT_VERSION {
        return Err(VaultError::UnsupportedVersion {
            found: serialized.version,
            current: CURRENT_VERSION,
        });
    }

    let canonical = if serialized.compressed {
        // The lz4 size prefix sits outside the checksummed bytes, so it is
        // cross-checked against the actual decompressed length here.
        let declared = serialized
            .payload
            .get(..4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize)
            .ok_or_else(|| VaultError::corruption("compressed payload shorter than size prefix"))?;
        let inflated = lz4_flex::decompress_size_prepended(&serialized.payload)
            .map_err(|e| VaultError::corruption(format!("decompression failed: {e}")))?;
        if inflated.len() != declared {
            return Err(VaultError::corruption(format!(
                "decompressed length mismatch: declared {declared}, got {}",
                inflated.len()
            )));
        }
        inflated
    } else {
        serialized.payload.clone()
    };

    if checksum(&canonical) != serialized.checksum {
        return Err(VaultError::corruption("record checksum mismatch"));
    }

    let mut record = PasswordRecord::from_canonical_bytes(&canonical)?;
    migrate::migrate_to_current(&mut record, serialized.version)?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;
    use crate::types::EntryKind;

    fn record_with_secret(secret: String) -> PasswordRecord {
        PasswordRecord::new(
            "example.com".to_string(),
            "alice".to_string(),
            secret,
            EntryKind::Login,
            1000,
        )
    }

    /// Pads a record until its canonical form hits `target` bytes exactly.
    ///
    /// CBOR string headers grow at length boundaries, so the padding is
    /// adjusted iteratively until the measured length converges.
    fn record_of_canonical_len(target: usize) -> PasswordRecord {
        let mut record = record_with_secret(String::new());
        let base = record.to_canonical_bytes().unwrap().len();
        assert!(target > base, "target below minimum record size");

        let mut pad = target - base;
        for _ in 0..8 {
            record.secret = "x".repeat(pad);
            let len = record.to_canonical_bytes().unwrap().len();
            if len == target {
                return record;
            }
            if len > target {
                pad -= len - target;
            } else {
                pad += target - len;
            }
        }
        panic!("padding failed to converge on {target} bytes");
    }

    #[test_case("hunter2".to_string(); "small record")]
    #[test_case("a".repeat(2000); "large compressible record")]
    fn test_roundtrip(secret: String) {
        let record = record_with_secret(secret);
        let serialized = encode(&record).unwrap();
        let decoded = decode(&serialized).unwrap();
        assert_eq!(record, decoded);
    }

    #[test]
    fn test_wire_roundtrip() {
        let record = record_with_secret("s3cret".to_string());
        let serialized = encode(&record).unwrap();
        let bytes = serialized.to_bytes();
        assert_eq!(bytes.len(), serialized.encoded_len());
        let reparsed = SerializedRecord::from_bytes(&bytes).unwrap();
        assert_eq!(serialized, reparsed);
    }

    #[test]
    fn test_below_threshold_never_compressed() {
        let record = record_of_canonical_len(COMPRESSION_THRESHOLD - 1);
        let serialized = encode(&record).unwrap();
        assert!(!serialized.compressed);
        assert_eq!(decode(&serialized).unwrap(), record);
    }

    #[test]
    fn test_at_threshold_compressed_when_smaller() {
        // A run of repeated bytes compresses well.
        let record = record_of_canonical_len(COMPRESSION_THRESHOLD);
        let serialized = encode(&record).unwrap();
        assert!(serialized.compressed);
        assert!(serialized.payload.len() < COMPRESSION_THRESHOLD);
        assert_eq!(decode(&serialized).unwrap(), record);
    }

    #[test]
    fn test_incompressible_stays_uncompressed() {
        // Random bytes hex-encoded still defeat lz4 at this size.
        let mut noise = vec![0u8; 600];
        getrandom::getrandom(&mut noise).unwrap();
        let mut record = record_with_secret(hex::encode(noise));
        record.notes = None;
        let canonical = record.to_canonical_bytes().unwrap();
        assert!(canonical.len() >= COMPRESSION_THRESHOLD);

        let serialized = encode(&record).unwrap();
        if serialized.compressed {
            // lz4 must have strictly won; either way the policy held.
            assert!(serialized.payload.len() < canonical.len());
        } else {
            assert_eq!(serialized.payload, canonical);
        }
        assert_eq!(decode(&serialized).unwrap(), record);
    }

    #[test]
    fn test_checksum_independent_of_compression() {
        let record = record_of_canonical_len(600);
        let serialized = encode(&record).unwrap();
        let canonical = record.to_canonical_bytes().unwrap();
        assert_eq!(serialized.checksum, checksum(&canonical));
    }

    #[test]
    fn test_bitflip_detected_everywhere() {
        let record = record_with_secret("payload under test".to_string());
        let serialized = encode(&record).unwrap();

        for i in 0..serialized.payload.len() {
            let mut tampered = serialized.clone();
            tampered.payload[i] ^= 0x01;
            assert!(
                matches!(
                    decode(&tampered),
                    Err(VaultError::DataCorruption { .. })
                ),
                "flip at byte {i} went undetected"
            );
        }
    }

    #[test]
    fn test_bitflip_in_compressed_payload_detected() {
        let record = record_of_canonical_len(800);
        let serialized = encode(&record).unwrap();
        assert!(serialized.compressed);

        for i in 0..serialized.payload.len() {
            let mut tampered = serialized.clone();
            tampered.payload[i] ^= 0x01;
            assert!(
                matches!(
                    decode(&tampered),
                    Err(VaultError::DataCorruption { .. })
                ),
                "flip at compressed byte {i} went undetected"
            );
        }
    }

    #[test]
    fn test_size_prefix_tamper_detected() {
        let record = record_of_canonical_len(800);
        let serialized = encode(&record).unwrap();
        assert!(serialized.compressed);

        // Growing the declared size leaves the compressed stream intact, so
        // only the length cross-check can catch it.
        for i in 0..4 {
            let mut tampered = serialized.clone();
            tampered.payload[i] ^= 0x80;
            assert!(
                matches!(decode(&tampered), Err(VaultError::DataCorruption { .. })),
                "size prefix flip at byte {i} went undetected"
            );
        }
    }

    #[test]
    fn test_future_version_refused_without_migration() {
        let record = record_with_secret("x".to_string());
        let mut serialized = encode(&record).unwrap();
        serialized.version = CURRENT_VERSION + 1;
        assert!(matches!(
            decode(&serialized),
            Err(VaultError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn test_v0_wire_payload_upgrades() {
        // Simulate a v0 writer: canonical bytes of a record whose payload
        // predates category_id/custom_fields, framed at version 0.
        let mut old = record_with_secret("legacy".to_string());
        old.schema_version = 0;
        let canonical = old.to_canonical_bytes().unwrap();
        let serialized = SerializedRecord {
            version: 0,
            compressed: false,
            checksum: checksum(&canonical),
            payload: canonical,
        };

        let decoded = decode(&serialized).unwrap();
        assert_eq!(decoded.schema_version, CURRENT_VERSION);
        assert_eq!(decoded.title, old.title);
        assert_eq!(decoded.created_at, old.created_at);
    }

    #[test]
    fn test_truncated_wire_bytes() {
        let record = record_with_secret("x".to_string());
        let bytes = encode(&record).unwrap().to_bytes();
        assert!(matches!(
            SerializedRecord::from_bytes(&bytes[..bytes.len() - 1]),
            Err(VaultError::DataCorruption { .. })
        ));
        assert!(matches!(
            SerializedRecord::from_bytes(&bytes[..10]),
            Err(VaultError::DataCorruption { .. })
        ));
    }
}
