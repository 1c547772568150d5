//! Passphrase encryption of sealed report artifacts.
//!
//! Layout: `HLENC1` magic, 16-byte salt, 12-byte nonce, AES-256-GCM
//! ciphertext (tag included). The key is SHA-256 stretched over the salt and
//! passphrase for [`KDF_ROUNDS`] iterations.

use crate::{BundleError, Result};
use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use sha2::{Digest, Sha256};

/// Leading bytes of every encrypted artifact.
pub const MAGIC: &[u8; 6] = b"HLENC1";

/// Key stretching iterations.
pub const KDF_ROUNDS: u32 = 10_000;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const HEADER_LEN: usize = MAGIC.len() + SALT_LEN + NONCE_LEN;

fn derive_key(passphrase: &str, salt: &[u8]) -> [u8; 32] {
    let mut digest: [u8; 32] = Sha256::new()
        .chain_update(salt)
        .chain_update(passphrase.as_bytes())
        .finalize()
        .into();
    for _ in 1..KDF_ROUNDS {
        digest = Sha256::new()
            .chain_update(digest)
            .chain_update(salt)
            .chain_update(passphrase.as_bytes())
            .finalize()
            .into();
    }
    digest
}

fn cipher(passphrase: &str, salt: &[u8]) -> Result<Aes256Gcm> {
    let key = derive_key(passphrase, salt);
    Aes256Gcm::new_from_slice(&key).map_err(|e| BundleError::Seal(e.to_string()))
}

/// Whether `data` starts with the encrypted-artifact magic.
pub fn is_encrypted(data: &[u8]) -> bool {
    data.starts_with(MAGIC)
}

/// Encrypt `plaintext` with a key derived from `passphrase`.
pub fn encrypt_bytes(plaintext: &[u8], passphrase: &str) -> Result<Vec<u8>> {
    if passphrase.is_empty() {
        return Err(BundleError::Seal("passphrase is empty".to_string()));
    }

    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher(passphrase, &salt)?
        .encrypt(&nonce, plaintext)
        .map_err(|e| BundleError::Seal(e.to_string()))?;

    let mut out = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&salt);
    out.extend_from_slice(nonce.as_slice());
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt data produced by [`encrypt_bytes`].
pub fn decrypt_bytes(data: &[u8], passphrase: &str) -> Result<Vec<u8>> {
    if !is_encrypted(data) {
        return Err(BundleError::Unseal("missing HLENC1 header".to_string()));
    }
    if data.len() <= HEADER_LEN {
        return Err(BundleError::Unseal("truncated artifact".to_string()));
    }

    let salt = &data[MAGIC.len()..MAGIC.len() + SALT_LEN];
    let nonce = Nonce::from_slice(&data[MAGIC.len() + SALT_LEN..HEADER_LEN]);

    cipher(passphrase, salt)?
        .decrypt(nonce, &data[HEADER_LEN..])
        .map_err(|_| BundleError::Unseal("wrong passphrase or corrupted data".to_string()))
}
