//! Image verification.
//!
//! A verifier consumes the image bytes incrementally and finally compares
//! the accumulated result against an expected fingerprint.
use crate::error::VerifyError;
use crc::{crc32, Hasher32};
use sha2::{Digest, Sha256};

/// Largest fingerprint an image descriptor can carry (a SHA-256 digest).
pub const MAX_FINGERPRINT_SIZE: usize = 32;
pub const CRC32_SIZE: usize = 4;

pub trait ImageVerifier {
    /// Discards anything accumulated so far.
    fn reset(&mut self);
    fn update(&mut self, bytes: &[u8]);
    /// Compares the accumulated result with `expected`, then resets.
    fn check(&mut self, expected: &[u8]) -> Result<(), VerifyError>;
}

/// CRC32 (IEEE) over the image, expected as four little endian bytes.
pub struct Crc32Verifier {
    digest: crc32::Digest,
}

impl Crc32Verifier {
    pub fn new() -> Self { Self { digest: crc32::Digest::new(crc32::IEEE) } }
}

impl Default for Crc32Verifier {
    fn default() -> Self { Self::new() }
}

impl ImageVerifier for Crc32Verifier {
    fn reset(&mut self) { self.digest.reset(); }
    fn update(&mut self, bytes: &[u8]) { self.digest.write(bytes); }

    fn check(&mut self, expected: &[u8]) -> Result<(), VerifyError> {
        let calculated = self.digest.sum32();
        self.digest.reset();
        if expected == calculated.to_le_bytes() {
            Ok(())
        } else {
            Err(VerifyError::ChecksumMismatch)
        }
    }
}

/// SHA-256 digest of the image.
#[derive(Default)]
pub struct Sha256Verifier {
    hasher: Sha256,
}

impl Sha256Verifier {
    pub fn new() -> Self { Self::default() }
}

impl ImageVerifier for Sha256Verifier {
    fn reset(&mut self) { self.hasher.reset(); }
    fn update(&mut self, bytes: &[u8]) { self.hasher.update(bytes); }

    fn check(&mut self, expected: &[u8]) -> Result<(), VerifyError> {
        let calculated = self.hasher.finalize_reset();
        if expected == calculated.as_slice() {
            Ok(())
        } else {
            Err(VerifyError::SignatureInvalid)
        }
    }
}

/// Expected verification result for an image, from 1 to
/// [`MAX_FINGERPRINT_SIZE`] bytes long.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Fingerprint {
    bytes: [u8; MAX_FINGERPRINT_SIZE],
    length: usize,
}

impl Fingerprint {
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.is_empty() || bytes.len() > MAX_FINGERPRINT_SIZE {
            return None;
        }
        let mut fingerprint = Self { bytes: [0u8; MAX_FINGERPRINT_SIZE], length: bytes.len() };
        fingerprint.bytes[..bytes.len()].copy_from_slice(bytes);
        Some(fingerprint)
    }

    pub fn as_bytes(&self) -> &[u8] { &self.bytes[..self.length] }
}

/// CRC32 (IEEE) of `bytes` in one pass.
pub fn crc32_of(bytes: &[u8]) -> u32 { crc32::checksum_ieee(bytes) }
