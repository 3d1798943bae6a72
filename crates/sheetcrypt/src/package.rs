//! `EncryptedPackage` stream: an LE64 plaintext length followed by the package encrypted in
//! independent 4096-byte segments.

use crate::crypto::{pad_to_block, CipherAlgorithm, HashAlgorithm, AES_BLOCK_SIZE};
use crate::error::OfficeCryptoError;
use crate::kdf::segment_iv;

pub const SEGMENT_LEN: usize = 4096;
pub const SIZE_PREFIX_LEN: usize = 8;

/// Segment parameters from `<keyData>` plus the unwrapped intermediate key.
pub(crate) struct PackageCipher<'a> {
    pub key: &'a [u8],
    pub salt: &'a [u8],
    pub cipher: CipherAlgorithm,
    pub hash: HashAlgorithm,
}

impl PackageCipher<'_> {
    /// Encrypt `plain` segment by segment, zero-padding the last segment to the block size.
    pub fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>, OfficeCryptoError> {
        let mut out = Vec::with_capacity(plain.len().div_ceil(AES_BLOCK_SIZE) * AES_BLOCK_SIZE);
        for (index, segment) in plain.chunks(SEGMENT_LEN).enumerate() {
            let iv = segment_iv(self.salt, segment_index(index)?, self.hash);
            let mut buf = pad_to_block(segment);
            self.cipher.encrypt_cbc(self.key, &iv, &mut buf)?;
            out.extend_from_slice(&buf);
        }
        Ok(out)
    }

    /// Decrypt the segments that hold the first `plain_len` bytes and truncate to that length.
    /// Ciphertext past the last needed block is ignored.
    pub fn decrypt(&self, ciphertext: &[u8], plain_len: u64) -> Result<Vec<u8>, OfficeCryptoError> {
        let plain_len = usize::try_from(plain_len).map_err(|_| {
            OfficeCryptoError::InvalidFormat(format!(
                "EncryptedPackage declares {plain_len} bytes, more than this platform can address"
            ))
        })?;
        let needed = plain_len
            .checked_next_multiple_of(AES_BLOCK_SIZE)
            .filter(|needed| *needed <= ciphertext.len());
        let Some(needed) = needed else {
            return Err(OfficeCryptoError::InvalidFormat(format!(
                "EncryptedPackage declares {plain_len} bytes but carries only {} bytes of ciphertext",
                ciphertext.len()
            )));
        };

        let mut out = ciphertext[..needed].to_vec();
        for (index, segment) in out.chunks_mut(SEGMENT_LEN).enumerate() {
            let iv = segment_iv(self.salt, segment_index(index)?, self.hash);
            self.cipher.decrypt_cbc(self.key, &iv, segment)?;
        }
        out.truncate(plain_len);
        Ok(out)
    }
}

fn segment_index(index: usize) -> Result<u32, OfficeCryptoError> {
    u32::try_from(index).map_err(|_| {
        OfficeCryptoError::InvalidOptions("package exceeds the 2^32 segment limit".to_string())
    })
}

/// Prefix `ciphertext` with the plaintext length.
pub(crate) fn build_stream(plain_len: usize, ciphertext: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(SIZE_PREFIX_LEN + ciphertext.len());
    out.extend_from_slice(&(plain_len as u64).to_le_bytes());
    out.extend_from_slice(ciphertext);
    out
}

/// Split a stream into its declared plaintext length and ciphertext.
pub(crate) fn split_stream(stream: &[u8]) -> Result<(u64, &[u8]), OfficeCryptoError> {
    if stream.len() < SIZE_PREFIX_LEN {
        return Err(OfficeCryptoError::InvalidFormat(format!(
            "EncryptedPackage is {} bytes, too short for its size prefix",
            stream.len()
        )));
    }
    let (prefix, ciphertext) = stream.split_at(SIZE_PREFIX_LEN);
    let mut size = [0u8; SIZE_PREFIX_LEN];
    size.copy_from_slice(prefix);
    Ok((u64::from_le_bytes(size), ciphertext))
}
