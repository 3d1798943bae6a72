//! Agile key derivation.
//!
//! - `H0 = Hash(salt || password_utf16le)`
//! - `Hn = Hash(LE32(n - 1) || Hn-1)` for `spinCount` rounds
//! - `key = Hash(H || blockKey)`, truncated to the key length or padded with `0x36`
//! - `iv = Hash(salt || blockKey)`, truncated to the block size or padded with `0x36`
//!
//! Every function here is pure. Callers derive fresh material per operation and drop it when the
//! operation ends.

use zeroize::Zeroizing;

use crate::crypto::{HashAlgorithm, AES_BLOCK_SIZE};

/// Block key for the key that encrypts `encryptedVerifierHashInput`.
pub const VERIFIER_HASH_INPUT_BLOCK: [u8; 8] = [0xFE, 0xA7, 0xD2, 0x76, 0x3B, 0x4B, 0x9E, 0x79];
/// Block key for the key that encrypts `encryptedVerifierHashValue`.
pub const VERIFIER_HASH_VALUE_BLOCK: [u8; 8] = [0xD7, 0xAA, 0x0F, 0x6D, 0x30, 0x61, 0x34, 0x4E];
/// Block key for the key that encrypts `encryptedKeyValue`.
pub const KEY_VALUE_BLOCK: [u8; 8] = [0x14, 0x6E, 0x0B, 0xE7, 0xAB, 0xAC, 0xD0, 0xD6];
/// Block key for the IV of `encryptedHmacKey`.
pub const HMAC_KEY_BLOCK: [u8; 8] = [0x5F, 0xB2, 0xAD, 0x01, 0x0C, 0xB9, 0xE1, 0xF6];
/// Block key for the IV of `encryptedHmacValue`.
pub const HMAC_VALUE_BLOCK: [u8; 8] = [0xA0, 0x67, 0x7F, 0x02, 0xB2, 0x2C, 0x84, 0x33];

const FILL_BYTE: u8 = 0x36;

pub fn password_utf16le(password: &str) -> Zeroizing<Vec<u8>> {
    let mut out = Zeroizing::new(Vec::with_capacity(password.len() * 2));
    for unit in password.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out
}

/// The spin-count hash chain over the password.
pub fn iterated_hash(
    password: &str,
    salt: &[u8],
    hash: HashAlgorithm,
    spin_count: u32,
) -> Zeroizing<Vec<u8>> {
    let password = password_utf16le(password);
    let mut h = Zeroizing::new(hash.digest_parts(&[salt, password.as_slice()]));
    for i in 0..spin_count {
        *h = hash.digest_parts(&[&i.to_le_bytes(), h.as_slice()]);
    }
    h
}

/// Fit `bytes` to `len`, truncating or padding with `0x36`.
fn fit(mut bytes: Vec<u8>, len: usize) -> Vec<u8> {
    bytes.resize(len, FILL_BYTE);
    bytes
}

/// Purpose key: `Hash(h || block_key)` fitted to `key_len`.
pub fn derive_key(
    h: &[u8],
    block_key: &[u8],
    hash: HashAlgorithm,
    key_len: usize,
) -> Zeroizing<Vec<u8>> {
    Zeroizing::new(fit(hash.digest_parts(&[h, block_key]), key_len))
}

/// Purpose IV: `Hash(salt || block_key)` fitted to the block size, or the salt itself fitted to the
/// block size when no block key applies.
pub fn derive_iv(salt: &[u8], block_key: Option<&[u8]>, hash: HashAlgorithm) -> Vec<u8> {
    match block_key {
        Some(block_key) => fit(hash.digest_parts(&[salt, block_key]), AES_BLOCK_SIZE),
        None => fit(salt.to_vec(), AES_BLOCK_SIZE),
    }
}

/// IV for package segment `index`: `Hash(package_salt || LE32(index))` fitted to the block size.
pub fn segment_iv(package_salt: &[u8], index: u32, hash: HashAlgorithm) -> Vec<u8> {
    derive_iv(package_salt, Some(&index.to_le_bytes()), hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_is_utf16le() {
        assert_eq!(password_utf16le("Ab").as_slice(), &[0x41, 0, 0x62, 0]);
        // U+1F600 encodes as a surrogate pair.
        assert_eq!(
            password_utf16le("\u{1F600}").as_slice(),
            &[0x3D, 0xD8, 0x00, 0xDE]
        );
        assert!(password_utf16le("").is_empty());
    }

    #[test]
    fn zero_spin_is_the_initial_hash() {
        let salt = [1u8; 16];
        let h = iterated_hash("pw", &salt, HashAlgorithm::Sha256, 0);
        let expected = HashAlgorithm::Sha256.digest_parts(&[&salt, password_utf16le("pw").as_slice()]);
        assert_eq!(h.as_slice(), expected.as_slice());
    }

    #[test]
    fn each_round_prefixes_the_iteration_counter() {
        let salt = [9u8; 16];
        let h0 = iterated_hash("pw", &salt, HashAlgorithm::Sha1, 0);
        let h1 = HashAlgorithm::Sha1.digest_parts(&[&0u32.to_le_bytes(), h0.as_slice()]);
        let h2 = HashAlgorithm::Sha1.digest_parts(&[&1u32.to_le_bytes(), &h1]);
        assert_eq!(
            iterated_hash("pw", &salt, HashAlgorithm::Sha1, 2).as_slice(),
            h2.as_slice()
        );
    }

    #[test]
    fn short_digest_is_padded_with_0x36() {
        // SHA-1 yields 20 bytes, AES-256 needs 32.
        let key = derive_key(&[0u8; 20], &KEY_VALUE_BLOCK, HashAlgorithm::Sha1, 32);
        let digest = HashAlgorithm::Sha1.digest_parts(&[&[0u8; 20], &KEY_VALUE_BLOCK]);
        assert_eq!(&key[..20], digest.as_slice());
        assert_eq!(&key[20..], &[0x36; 12]);
    }

    #[test]
    fn long_digest_is_truncated() {
        let key = derive_key(&[5u8; 64], &KEY_VALUE_BLOCK, HashAlgorithm::Sha512, 16);
        assert_eq!(key.len(), 16);
        let digest = HashAlgorithm::Sha512.digest_parts(&[&[5u8; 64], &KEY_VALUE_BLOCK]);
        assert_eq!(key.as_slice(), &digest[..16]);
    }

    #[test]
    fn iv_without_block_key_is_the_salt() {
        let salt: Vec<u8> = (0u8..16).collect();
        assert_eq!(derive_iv(&salt, None, HashAlgorithm::Sha512), salt);
        assert_eq!(
            derive_iv(&[1, 2], None, HashAlgorithm::Sha512),
            [&[1u8, 2][..], &[0x36; 14][..]].concat()
        );
    }

    #[test]
    fn segment_ivs_differ_per_index() {
        let salt = [3u8; 16];
        let a = segment_iv(&salt, 0, HashAlgorithm::Sha512);
        let b = segment_iv(&salt, 1, HashAlgorithm::Sha512);
        assert_eq!(a.len(), 16);
        assert_ne!(a, b);
        assert_eq!(
            a,
            HashAlgorithm::Sha512.digest_parts(&[&salt, &0u32.to_le_bytes()])[..16].to_vec()
        );
    }

    #[test]
    fn block_keys_are_distinct() {
        let keys = [
            VERIFIER_HASH_INPUT_BLOCK,
            VERIFIER_HASH_VALUE_BLOCK,
            KEY_VALUE_BLOCK,
            HMAC_KEY_BLOCK,
            HMAC_VALUE_BLOCK,
        ];
        for (i, a) in keys.iter().enumerate() {
            for b in &keys[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
