//! Byte-wise Shamir secret sharing over GF(256).
//!
//! The field is GF(2^8) with the AES reduction polynomial (0x11b). Each
//! secret byte is the constant term of an independent random polynomial of
//! degree `threshold - 1`; a share at index `x` is the polynomial evaluated
//! at `x` for every byte position. Reconstruction interpolates at `x = 0`
//! with Lagrange coefficients.
//!
//! Interpolating with fewer than `threshold` shares produces well-formed
//! garbage rather than an error; callers verify the result against a stored
//! commitment.

use std::fmt;

use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{VaultError, VaultResult};

/// One guardian's share of a split secret.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecretShare {
    /// Evaluation point, never zero.
    #[zeroize(skip)]
    pub index: u8,
    /// One share byte per secret byte.
    pub bytes: Vec<u8>,
}

impl fmt::Debug for SecretShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretShare")
            .field("index", &self.index)
            .field("bytes", &"[redacted]")
            .finish()
    }
}

/// Multiplication in GF(2^8) with the AES polynomial.
const fn gf_mul(mut a: u8, mut b: u8) -> u8 {
    let mut product = 0u8;
    while b != 0 {
        if b & 1 != 0 {
            product ^= a;
        }
        let carry = a & 0x80;
        a <<= 1;
        if carry != 0 {
            a ^= 0x1b;
        }
        b >>= 1;
    }
    product
}

/// Multiplicative inverse via a^254. `a` must be nonzero.
const fn gf_inv(a: u8) -> u8 {
    // a^254 by square-and-multiply over the fixed exponent.
    let mut result = 1u8;
    let mut base = a;
    let mut exp = 254u8;
    while exp != 0 {
        if exp & 1 != 0 {
            result = gf_mul(result, base);
        }
        base = gf_mul(base, base);
        exp >>= 1;
    }
    result
}

/// Horner evaluation of `coeffs` (constant term first) at `x`.
fn eval_poly(coeffs: &[u8], x: u8) -> u8 {
    let mut acc = 0u8;
    for &coeff in coeffs.iter().rev() {
        acc = gf_mul(acc, x) ^ coeff;
    }
    acc
}

/// Splits `secret` into one share per index, any `threshold` of which
/// reconstruct it.
///
/// # Errors
///
/// [`VaultError::ThresholdMisconfigured`] when `threshold` is zero or
/// exceeds the index count, [`VaultError::InvalidShareIndex`] for a zero
/// index, [`VaultError::DuplicateShareIndex`] for a repeated one.
pub fn split_secret(
    secret: &[u8],
    threshold: u8,
    indices: &[u8],
) -> VaultResult<Vec<SecretShare>> {
    let total = u8::try_from(indices.len())
        .map_err(|_| VaultError::InvalidShareIndex(u8::MAX))?;
    if threshold == 0 || threshold > total {
        return Err(VaultError::ThresholdMisconfigured { threshold, total });
    }
    let mut seen = [false; 256];
    for &index in indices {
        if index == 0 {
            return Err(VaultError::InvalidShareIndex(0));
        }
        if seen[usize::from(index)] {
            return Err(VaultError::DuplicateShareIndex(index));
        }
        seen[usize::from(index)] = true;
    }

    let mut rng = rand::thread_rng();
    let mut shares: Vec<SecretShare> = indices
        .iter()
        .map(|&index| SecretShare {
            index,
            bytes: Vec::with_capacity(secret.len()),
        })
        .collect();

    let mut coeffs = vec![0u8; usize::from(threshold)];
    for &byte in secret {
        coeffs[0] = byte;
        rng.fill_bytes(&mut coeffs[1..]);
        for share in &mut shares {
            share.bytes.push(eval_poly(&coeffs, share.index));
        }
    }
    coeffs.zeroize();
    Ok(shares)
}

/// Interpolates the secret at `x = 0` from the given shares.
///
/// With at least the original threshold of honest shares this returns the
/// split secret; with fewer, or with a tampered share, it returns garbage of
/// the same length.
///
/// # Errors
///
/// [`VaultError::InsufficientGuardians`] when no shares are given,
/// [`VaultError::InvalidShareIndex`] / [`VaultError::DuplicateShareIndex`]
/// for malformed index sets, [`VaultError::DataCorruption`] when share
/// lengths disagree.
pub fn reconstruct_secret(shares: &[SecretShare]) -> VaultResult<Vec<u8>> {
    let Some(first) = shares.first() else {
        return Err(VaultError::InsufficientGuardians);
    };
    let len = first.bytes.len();
    let mut seen = [false; 256];
    for share in shares {
        if share.index == 0 {
            return Err(VaultError::InvalidShareIndex(0));
        }
        if seen[usize::from(share.index)] {
            return Err(VaultError::DuplicateShareIndex(share.index));
        }
        seen[usize::from(share.index)] = true;
        if share.bytes.len() != len {
            return Err(VaultError::corruption("share length mismatch"));
        }
    }

    // Lagrange basis at x = 0: l_i = prod_{j != i} x_j / (x_j + x_i).
    let mut basis = Vec::with_capacity(shares.len());
    for (i, share_i) in shares.iter().enumerate() {
        let mut numerator = 1u8;
        let mut denominator = 1u8;
        for (j, share_j) in shares.iter().enumerate() {
            if i == j {
                continue;
            }
            numerator = gf_mul(numerator, share_j.index);
            denominator = gf_mul(denominator, share_j.index ^ share_i.index);
        }
        basis.push(gf_mul(numerator, gf_inv(denominator)));
    }

    let mut secret = vec![0u8; len];
    for (share, &li) in shares.iter().zip(&basis) {
        for (out, &byte) in secret.iter_mut().zip(&share.bytes) {
            *out ^= gf_mul(li, byte);
        }
    }
    Ok(secret)
}
