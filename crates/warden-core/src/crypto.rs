//! Backup record encryption.
//!
//! Records are sealed with AES-128-GCM under a key derived once per process
//! from the operator passphrase. Each record carries its own random 16-byte IV
//! in front of the ciphertext: `IV || ciphertext || tag`.

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::Aes128;
use aes_gcm::{AesGcm, Key, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::CryptoError;

pub const KEY_LEN: usize = 16;
pub const IV_LEN: usize = 16;
pub const TAG_LEN: usize = 16;

pub const KDF_TIME_COST: u32 = 2;
pub const KDF_MEMORY_COST: u32 = 19 * 1024; // 19 MiB
pub const KDF_PARALLELISM: u32 = 1;

// Fixed so the same passphrase yields the same key across restarts.
const KDF_SALT: &[u8] = b"warden.backup-store.v1";

type BackupCipher = AesGcm<Aes128, U16>;

/// 128-bit key for backup records. Wiped on drop.
#[derive(Clone)]
pub struct BackupKey(Zeroizing<[u8; KEY_LEN]>);

impl BackupKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn derive(passphrase: &str) -> Result<Self, CryptoError> {
        let params = Params::new(
            KDF_MEMORY_COST,
            KDF_TIME_COST,
            KDF_PARALLELISM,
            Some(KEY_LEN),
        )
        .map_err(|e| CryptoError::Kdf(e.to_string()))?;
        let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        argon
            .hash_password_into(passphrase.as_bytes(), KDF_SALT, &mut key[..])
            .map_err(|e| CryptoError::Kdf(e.to_string()))?;
        Ok(Self(key))
    }

    fn cipher(&self) -> BackupCipher {
        BackupCipher::new(Key::<BackupCipher>::from_slice(&self.0[..]))
    }
}

impl std::fmt::Debug for BackupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BackupKey(..)")
    }
}

pub fn generate_iv() -> [u8; IV_LEN] {
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);
    iv
}

pub fn encrypt(key: &BackupKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let iv = generate_iv();
    let sealed = key
        .cipher()
        .encrypt(Nonce::<U16>::from_slice(&iv), plaintext)
        .map_err(|e| CryptoError::Encrypt(e.to_string()))?;
    let mut record = Vec::with_capacity(IV_LEN + sealed.len());
    record.extend_from_slice(&iv);
    record.extend_from_slice(&sealed);
    Ok(record)
}

pub fn decrypt(key: &BackupKey, record: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if record.len() < IV_LEN + TAG_LEN {
        return Err(CryptoError::Truncated {
            len: record.len(),
            min: IV_LEN + TAG_LEN,
        });
    }
    let (iv, sealed) = record.split_at(IV_LEN);
    key.cipher()
        .decrypt(Nonce::<U16>::from_slice(iv), sealed)
        .map_err(|_| CryptoError::Corrupt)
}
