//! Hash and block-cipher primitives used by the Agile scheme.
//!
//! Algorithm choice is a closed set: AES-128/192/256 in CBC mode and SHA-1/256/384/512. Names
//! outside that set are rejected where the descriptor is parsed.

use std::fmt;

use aes::{Aes128, Aes192, Aes256};
use cipher::block_padding::NoPadding;
use cipher::{BlockCipher, BlockDecryptMut, BlockEncryptMut, KeyInit, KeyIvInit};
use hmac::{Hmac, Mac};
use sha2::Digest;

use crate::error::OfficeCryptoError;

/// AES block size in bytes. Every Agile descriptor uses it as `blockSize`.
pub const AES_BLOCK_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    pub const ALL: [HashAlgorithm; 4] = [
        HashAlgorithm::Sha1,
        HashAlgorithm::Sha256,
        HashAlgorithm::Sha384,
        HashAlgorithm::Sha512,
    ];

    /// Digest length in bytes.
    pub fn digest_len(self) -> usize {
        match self {
            HashAlgorithm::Sha1 => 20,
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
            HashAlgorithm::Sha512 => 64,
        }
    }

    /// Name as written in the `hashAlgorithm` descriptor attribute.
    pub fn name(self) -> &'static str {
        match self {
            HashAlgorithm::Sha1 => "SHA1",
            HashAlgorithm::Sha256 => "SHA256",
            HashAlgorithm::Sha384 => "SHA384",
            HashAlgorithm::Sha512 => "SHA512",
        }
    }

    /// Parse a descriptor algorithm name. Matching ignores case and a `-` separator, so both
    /// `SHA512` and `sha-512` are accepted.
    pub fn from_name(name: &str) -> Result<Self, OfficeCryptoError> {
        let normalized: String = name
            .trim()
            .chars()
            .filter(|c| *c != '-')
            .map(|c| c.to_ascii_uppercase())
            .collect();
        match normalized.as_str() {
            "SHA1" => Ok(HashAlgorithm::Sha1),
            "SHA256" => Ok(HashAlgorithm::Sha256),
            "SHA384" => Ok(HashAlgorithm::Sha384),
            "SHA512" => Ok(HashAlgorithm::Sha512),
            _ => Err(OfficeCryptoError::UnsupportedEncryption(format!(
                "hash algorithm {name:?}"
            ))),
        }
    }

    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        self.digest_parts(&[data])
    }

    /// `Hash(parts[0] || parts[1] || ...)` without building the concatenation.
    pub fn digest_parts(self, parts: &[&[u8]]) -> Vec<u8> {
        fn run<D: Digest>(parts: &[&[u8]]) -> Vec<u8> {
            let mut hasher = D::new();
            for part in parts {
                hasher.update(part);
            }
            hasher.finalize().to_vec()
        }

        match self {
            HashAlgorithm::Sha1 => run::<sha1::Sha1>(parts),
            HashAlgorithm::Sha256 => run::<sha2::Sha256>(parts),
            HashAlgorithm::Sha384 => run::<sha2::Sha384>(parts),
            HashAlgorithm::Sha512 => run::<sha2::Sha512>(parts),
        }
    }

    /// HMAC over the concatenation of `parts`, keyed by `key`.
    pub fn hmac(self, key: &[u8], parts: &[&[u8]]) -> Result<Vec<u8>, OfficeCryptoError> {
        fn run<M: Mac + KeyInit>(key: &[u8], parts: &[&[u8]]) -> Result<Vec<u8>, OfficeCryptoError> {
            let mut mac = <M as Mac>::new_from_slice(key)
                .map_err(|_| OfficeCryptoError::InvalidFormat("invalid HMAC key".to_string()))?;
            for part in parts {
                mac.update(part);
            }
            Ok(mac.finalize().into_bytes().to_vec())
        }

        match self {
            HashAlgorithm::Sha1 => run::<Hmac<sha1::Sha1>>(key, parts),
            HashAlgorithm::Sha256 => run::<Hmac<sha2::Sha256>>(key, parts),
            HashAlgorithm::Sha384 => run::<Hmac<sha2::Sha384>>(key, parts),
            HashAlgorithm::Sha512 => run::<Hmac<sha2::Sha512>>(key, parts),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherAlgorithm {
    Aes128,
    Aes192,
    Aes256,
}

impl CipherAlgorithm {
    pub const ALL: [CipherAlgorithm; 3] = [
        CipherAlgorithm::Aes128,
        CipherAlgorithm::Aes192,
        CipherAlgorithm::Aes256,
    ];

    pub fn key_bits(self) -> u32 {
        match self {
            CipherAlgorithm::Aes128 => 128,
            CipherAlgorithm::Aes192 => 192,
            CipherAlgorithm::Aes256 => 256,
        }
    }

    pub fn key_len(self) -> usize {
        self.key_bits() as usize / 8
    }

    pub fn block_size(self) -> usize {
        AES_BLOCK_SIZE
    }

    /// Value of the `cipherAlgorithm` attribute. Key size is carried separately in `keyBits`.
    pub fn name(self) -> &'static str {
        "AES"
    }

    /// Resolve a `cipherAlgorithm` / `keyBits` attribute pair.
    pub fn from_descriptor(name: &str, key_bits: u32) -> Result<Self, OfficeCryptoError> {
        if !name.trim().eq_ignore_ascii_case("AES") {
            return Err(OfficeCryptoError::UnsupportedEncryption(format!(
                "cipher algorithm {name:?}"
            )));
        }
        Self::from_key_bits(key_bits)
    }

    pub fn from_key_bits(key_bits: u32) -> Result<Self, OfficeCryptoError> {
        match key_bits {
            128 => Ok(CipherAlgorithm::Aes128),
            192 => Ok(CipherAlgorithm::Aes192),
            256 => Ok(CipherAlgorithm::Aes256),
            other => Err(OfficeCryptoError::UnsupportedEncryption(format!(
                "AES key size {other} bits"
            ))),
        }
    }

    /// CBC-encrypt `buf` in place. `buf` must already be block aligned.
    pub fn encrypt_cbc(self, key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<(), OfficeCryptoError> {
        match self {
            CipherAlgorithm::Aes128 => cbc_encrypt::<Aes128>(key, iv, buf),
            CipherAlgorithm::Aes192 => cbc_encrypt::<Aes192>(key, iv, buf),
            CipherAlgorithm::Aes256 => cbc_encrypt::<Aes256>(key, iv, buf),
        }
    }

    /// CBC-decrypt `buf` in place. `buf` must be block aligned.
    pub fn decrypt_cbc(self, key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<(), OfficeCryptoError> {
        match self {
            CipherAlgorithm::Aes128 => cbc_decrypt::<Aes128>(key, iv, buf),
            CipherAlgorithm::Aes192 => cbc_decrypt::<Aes192>(key, iv, buf),
            CipherAlgorithm::Aes256 => cbc_decrypt::<Aes256>(key, iv, buf),
        }
    }
}

impl fmt::Display for CipherAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AES-{}", self.key_bits())
    }
}

fn check_cbc_input(key: &[u8], iv: &[u8], buf: &[u8]) -> Result<(), OfficeCryptoError> {
    if buf.len() % AES_BLOCK_SIZE != 0 {
        return Err(OfficeCryptoError::InvalidFormat(format!(
            "ciphertext length {} is not a multiple of the AES block size",
            buf.len()
        )));
    }
    if iv.len() != AES_BLOCK_SIZE {
        return Err(OfficeCryptoError::InvalidFormat(format!(
            "AES IV must be {AES_BLOCK_SIZE} bytes (got {})",
            iv.len()
        )));
    }
    if !matches!(key.len(), 16 | 24 | 32) {
        return Err(OfficeCryptoError::InvalidFormat(format!(
            "invalid AES key length {}",
            key.len()
        )));
    }
    Ok(())
}

fn cbc_encrypt<C>(key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<(), OfficeCryptoError>
where
    C: BlockEncryptMut + BlockCipher + KeyInit,
{
    check_cbc_input(key, iv, buf)?;
    let len = buf.len();
    cbc::Encryptor::<C>::new_from_slices(key, iv)
        .map_err(|_| OfficeCryptoError::InvalidFormat("invalid AES key or IV length".to_string()))?
        .encrypt_padded_mut::<NoPadding>(buf, len)
        .map_err(|_| OfficeCryptoError::InvalidFormat("AES-CBC encryption failed".to_string()))?;
    Ok(())
}

fn cbc_decrypt<C>(key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<(), OfficeCryptoError>
where
    C: BlockDecryptMut + BlockCipher + KeyInit,
{
    check_cbc_input(key, iv, buf)?;
    cbc::Decryptor::<C>::new_from_slices(key, iv)
        .map_err(|_| OfficeCryptoError::InvalidFormat("invalid AES key or IV length".to_string()))?
        .decrypt_padded_mut::<NoPadding>(buf)
        .map_err(|_| OfficeCryptoError::InvalidFormat("AES-CBC decryption failed".to_string()))?;
    Ok(())
}

/// Zero-pad `data` up to a multiple of the AES block size.
pub(crate) fn pad_to_block(data: &[u8]) -> Vec<u8> {
    let padded_len = data.len().div_ceil(AES_BLOCK_SIZE) * AES_BLOCK_SIZE;
    let mut out = Vec::with_capacity(padded_len);
    out.extend_from_slice(data);
    out.resize(padded_len, 0);
    out
}

/// Constant-time equality for digests.
pub(crate) fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq as _;
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    #[test]
    fn digests_match_known_vectors() {
        assert_eq!(
            hex(&HashAlgorithm::Sha1.digest(b"abc")),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
        assert_eq!(
            hex(&HashAlgorithm::Sha256.digest(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        for alg in HashAlgorithm::ALL {
            assert_eq!(alg.digest(b"abc").len(), alg.digest_len());
        }
    }

    #[test]
    fn digest_parts_equals_concatenation() {
        for alg in HashAlgorithm::ALL {
            assert_eq!(alg.digest_parts(&[b"ab", b"", b"c"]), alg.digest(b"abc"));
        }
    }

    #[test]
    fn hmac_matches_rfc4231_case_2() {
        let tag = HashAlgorithm::Sha256
            .hmac(b"Jefe", &[b"what do ya want ", b"for nothing?"])
            .unwrap();
        assert_eq!(
            hex(&tag),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn parses_algorithm_names() {
        assert_eq!(HashAlgorithm::from_name("SHA512").unwrap(), HashAlgorithm::Sha512);
        assert_eq!(HashAlgorithm::from_name("sha-1").unwrap(), HashAlgorithm::Sha1);
        assert!(matches!(
            HashAlgorithm::from_name("MD5"),
            Err(OfficeCryptoError::UnsupportedEncryption(_))
        ));
        assert_eq!(
            CipherAlgorithm::from_descriptor("AES", 192).unwrap(),
            CipherAlgorithm::Aes192
        );
        assert!(matches!(
            CipherAlgorithm::from_descriptor("AES", 512),
            Err(OfficeCryptoError::UnsupportedEncryption(_))
        ));
        assert!(matches!(
            CipherAlgorithm::from_descriptor("DES", 128),
            Err(OfficeCryptoError::UnsupportedEncryption(_))
        ));
    }

    #[test]
    fn cbc_roundtrips_for_every_key_size() {
        let iv = [7u8; 16];
        for cipher in CipherAlgorithm::ALL {
            let key = vec![0x42u8; cipher.key_len()];
            let plain: Vec<u8> = (0u8..48).collect();
            let mut buf = plain.clone();
            cipher.encrypt_cbc(&key, &iv, &mut buf).unwrap();
            assert_ne!(buf, plain);
            cipher.decrypt_cbc(&key, &iv, &mut buf).unwrap();
            assert_eq!(buf, plain);
        }
    }

    #[test]
    fn aes128_cbc_matches_nist_vector() {
        // NIST SP 800-38A F.2.1, first block.
        let key = [
            0x2b, 0x7e, 0x15, 0x16, 0x28, 0xae, 0xd2, 0xa6, 0xab, 0xf7, 0x15, 0x88, 0x09, 0xcf,
            0x4f, 0x3c,
        ];
        let iv: Vec<u8> = (0u8..16).collect();
        let mut block = [
            0x6b, 0xc1, 0xbe, 0xe2, 0x2e, 0x40, 0x9f, 0x96, 0xe9, 0x3d, 0x7e, 0x11, 0x73, 0x93,
            0x17, 0x2a,
        ];
        CipherAlgorithm::Aes128
            .encrypt_cbc(&key, &iv, &mut block)
            .unwrap();
        assert_eq!(hex(&block), "7649abac8119b246cee98e9b12e9197d");
    }

    #[test]
    fn cbc_rejects_unaligned_input() {
        let mut buf = [0u8; 15];
        let err = CipherAlgorithm::Aes128
            .decrypt_cbc(&[0u8; 16], &[0u8; 16], &mut buf)
            .unwrap_err();
        assert!(matches!(err, OfficeCryptoError::InvalidFormat(_)));
    }

    #[test]
    fn pads_to_block_boundary() {
        assert_eq!(pad_to_block(&[]).len(), 0);
        assert_eq!(pad_to_block(&[1; 20]).len(), 32);
        assert_eq!(pad_to_block(&[1; 32]).len(), 32);
        assert_eq!(&pad_to_block(&[1; 20])[20..], &[0u8; 12]);
    }

    #[test]
    fn ct_eq_requires_equal_lengths() {
        assert!(ct_eq(b"abc", b"abc"));
        assert!(!ct_eq(b"abc", b"abd"));
        assert!(!ct_eq(b"abc", b"ab"));
    }
}
