//! `dataIntegrity`: an HMAC over the whole `EncryptedPackage` stream, with the HMAC key and value
//! stored encrypted under the intermediate key.

use rand::{CryptoRng, RngCore};
use zeroize::Zeroizing;

use crate::crypto::{ct_eq, pad_to_block};
use crate::descriptor::{DataIntegrity, KeyData};
use crate::error::OfficeCryptoError;
use crate::kdf::{derive_iv, HMAC_KEY_BLOCK, HMAC_VALUE_BLOCK};

/// Compute and wrap the HMAC of `stream` (size prefix and ciphertext).
pub(crate) fn seal<R: RngCore + CryptoRng>(
    stream: &[u8],
    key: &[u8],
    key_data: &KeyData,
    rng: &mut R,
) -> Result<DataIntegrity, OfficeCryptoError> {
    let hash = key_data.hash;
    let mut hmac_key = Zeroizing::new(vec![0u8; hash.digest_len()]);
    rng.fill_bytes(&mut hmac_key);
    let tag = hash.hmac(&hmac_key, &[stream])?;

    let mut encrypted_hmac_key = pad_to_block(&hmac_key);
    let key_iv = derive_iv(&key_data.salt, Some(&HMAC_KEY_BLOCK), hash);
    key_data
        .cipher
        .encrypt_cbc(key, &key_iv, &mut encrypted_hmac_key)?;

    let mut encrypted_hmac_value = pad_to_block(&tag);
    let value_iv = derive_iv(&key_data.salt, Some(&HMAC_VALUE_BLOCK), hash);
    key_data
        .cipher
        .encrypt_cbc(key, &value_iv, &mut encrypted_hmac_value)?;

    Ok(DataIntegrity {
        encrypted_hmac_key,
        encrypted_hmac_value,
    })
}

/// Recompute the HMAC of `stream` and compare it with the stored value.
pub(crate) fn verify(
    stream: &[u8],
    key: &[u8],
    key_data: &KeyData,
    integrity: &DataIntegrity,
) -> Result<(), OfficeCryptoError> {
    let hash = key_data.hash;
    let digest_len = hash.digest_len();

    let mut hmac_key = Zeroizing::new(integrity.encrypted_hmac_key.clone());
    let key_iv = derive_iv(&key_data.salt, Some(&HMAC_KEY_BLOCK), hash);
    key_data.cipher.decrypt_cbc(key, &key_iv, &mut hmac_key)?;
    let hmac_key = hmac_key.get(..digest_len).ok_or_else(|| {
        OfficeCryptoError::InvalidFormat(format!(
            "encryptedHmacKey holds {} bytes, fewer than the {digest_len}-byte digest",
            integrity.encrypted_hmac_key.len()
        ))
    })?;

    let mut expected = integrity.encrypted_hmac_value.clone();
    let value_iv = derive_iv(&key_data.salt, Some(&HMAC_VALUE_BLOCK), hash);
    key_data.cipher.decrypt_cbc(key, &value_iv, &mut expected)?;
    let expected = expected.get(..digest_len).ok_or_else(|| {
        OfficeCryptoError::InvalidFormat(format!(
            "encryptedHmacValue holds {} bytes, fewer than the {digest_len}-byte digest",
            integrity.encrypted_hmac_value.len()
        ))
    })?;

    let actual = hash.hmac(hmac_key, &[stream])?;
    if !ct_eq(&actual, expected) {
        return Err(OfficeCryptoError::IntegrityCheckFailed);
    }
    Ok(())
}
