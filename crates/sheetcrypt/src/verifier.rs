//! Password verifier and intermediate key wrapping for the password key encryptor.

use rand::{CryptoRng, RngCore};
use zeroize::Zeroizing;

use crate::crypto::{ct_eq, pad_to_block, CipherAlgorithm, HashAlgorithm, AES_BLOCK_SIZE};
use crate::descriptor::PasswordKeyEncryptor;
use crate::error::OfficeCryptoError;
use crate::kdf::{
    derive_iv, derive_key, iterated_hash, KEY_VALUE_BLOCK, VERIFIER_HASH_INPUT_BLOCK,
    VERIFIER_HASH_VALUE_BLOCK,
};

pub const SALT_LEN: usize = 16;

/// Parameters for a new password key encryptor.
pub(crate) struct VerifierParams {
    pub cipher: CipherAlgorithm,
    pub hash: HashAlgorithm,
    pub spin_count: u32,
}

fn encrypt_field(
    cipher: CipherAlgorithm,
    key: &[u8],
    iv: &[u8],
    plain: &[u8],
) -> Result<Vec<u8>, OfficeCryptoError> {
    let mut buf = pad_to_block(plain);
    cipher.encrypt_cbc(key, iv, &mut buf)?;
    Ok(buf)
}

/// Decrypt one verifier field. Any failure means the password is rejected.
fn decrypt_field(
    cipher: CipherAlgorithm,
    key: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>, OfficeCryptoError> {
    let mut buf = Zeroizing::new(ciphertext.to_vec());
    cipher
        .decrypt_cbc(key, iv, &mut buf)
        .map_err(|_| OfficeCryptoError::InvalidPassword)?;
    Ok(buf)
}

/// Build the password key encryptor that wraps `intermediate_key`.
pub(crate) fn build<R: RngCore + CryptoRng>(
    password: &str,
    intermediate_key: &[u8],
    params: &VerifierParams,
    rng: &mut R,
) -> Result<PasswordKeyEncryptor, OfficeCryptoError> {
    let mut salt = vec![0u8; SALT_LEN];
    rng.fill_bytes(&mut salt);
    let mut verifier_input = Zeroizing::new(vec![0u8; SALT_LEN]);
    rng.fill_bytes(&mut verifier_input);

    let key_len = params.cipher.key_len();
    let h = iterated_hash(password, &salt, params.hash, params.spin_count);
    let iv = derive_iv(&salt, None, params.hash);

    let input_key = derive_key(&h, &VERIFIER_HASH_INPUT_BLOCK, params.hash, key_len);
    let encrypted_verifier_hash_input =
        encrypt_field(params.cipher, &input_key, &iv, &verifier_input)?;

    let verifier_hash = Zeroizing::new(params.hash.digest(&verifier_input));
    let value_key = derive_key(&h, &VERIFIER_HASH_VALUE_BLOCK, params.hash, key_len);
    let encrypted_verifier_hash_value =
        encrypt_field(params.cipher, &value_key, &iv, &verifier_hash)?;

    let key_value_key = derive_key(&h, &KEY_VALUE_BLOCK, params.hash, key_len);
    let encrypted_key_value = encrypt_field(params.cipher, &key_value_key, &iv, intermediate_key)?;

    Ok(PasswordKeyEncryptor {
        spin_count: params.spin_count,
        salt,
        block_size: AES_BLOCK_SIZE,
        cipher: params.cipher,
        hash: params.hash,
        encrypted_verifier_hash_input,
        encrypted_verifier_hash_value,
        encrypted_key_value,
    })
}

/// Check `password` against the stored verifier and return the password hash chain on success.
pub(crate) fn verify(
    encryptor: &PasswordKeyEncryptor,
    password: &str,
) -> Result<Zeroizing<Vec<u8>>, OfficeCryptoError> {
    let hash = encryptor.hash;
    let key_len = encryptor.cipher.key_len();
    let h = iterated_hash(password, &encryptor.salt, hash, encryptor.spin_count);
    let iv = derive_iv(&encryptor.salt, None, hash);

    let input_key = derive_key(&h, &VERIFIER_HASH_INPUT_BLOCK, hash, key_len);
    let input = decrypt_field(
        encryptor.cipher,
        &input_key,
        &iv,
        &encryptor.encrypted_verifier_hash_input,
    )?;
    // The verifier input is as long as the key encryptor's salt.
    let input = input
        .get(..encryptor.salt.len())
        .ok_or(OfficeCryptoError::InvalidPassword)?;

    let value_key = derive_key(&h, &VERIFIER_HASH_VALUE_BLOCK, hash, key_len);
    let stored = decrypt_field(
        encryptor.cipher,
        &value_key,
        &iv,
        &encryptor.encrypted_verifier_hash_value,
    )?;
    let stored = stored
        .get(..hash.digest_len())
        .ok_or(OfficeCryptoError::InvalidPassword)?;

    let computed = Zeroizing::new(hash.digest(input));
    if !ct_eq(&computed, stored) {
        return Err(OfficeCryptoError::InvalidPassword);
    }
    Ok(h)
}

/// Unwrap the intermediate (package) key with a verified password hash chain.
pub(crate) fn recover_intermediate_key(
    encryptor: &PasswordKeyEncryptor,
    h: &[u8],
    package_key_len: usize,
) -> Result<Zeroizing<Vec<u8>>, OfficeCryptoError> {
    let key = derive_key(
        h,
        &KEY_VALUE_BLOCK,
        encryptor.hash,
        encryptor.cipher.key_len(),
    );
    let iv = derive_iv(&encryptor.salt, None, encryptor.hash);
    let mut decrypted = decrypt_field(encryptor.cipher, &key, &iv, &encryptor.encrypted_key_value)?;
    if decrypted.len() < package_key_len {
        return Err(OfficeCryptoError::InvalidPassword);
    }
    decrypted.truncate(package_key_len);
    Ok(decrypted)
}
