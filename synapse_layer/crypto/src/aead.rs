// Copyright 2024 The Synapse-NG Development Community
// SPDX-License-Identifier: BSD-3-Clause

//! Authenticated symmetric encryption for common-tool credentials.
//!
//! The key is derived deterministically from the owning channel id with a
//! channel-stable salt, so every subscriber of the channel derives the same
//! key and can decrypt when authorized. Decrypted plaintext is returned in a
//! zeroizing buffer and must never be logged or persisted.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm,
    Key,
    Nonce,
};
use blake2::Blake2b;
use digest::{consts::U12, Digest};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use synapse_common_types::ChannelId;
use zeroize::Zeroizing;

/// Application-fixed HKDF salt. Must never change across versions or nodes,
/// otherwise previously encrypted credentials become unreadable.
const CHANNEL_KEY_SALT: &[u8] = b"synapse-ng/channel-key/v1";
const CHANNEL_KEY_INFO: &[u8] = b"common-tools-aead";

const NONCE_LEN: usize = 12;

pub type ChannelKey = Zeroizing<[u8; 32]>;

#[derive(Debug, thiserror::Error)]
pub enum AeadError {
    #[error("Ciphertext is too short to contain a nonce")]
    Truncated,
    #[error("Decryption failed: authentication tag mismatch")]
    TagMismatch,
    #[error("Encryption failed")]
    EncryptFailed,
}

/// Derives the 32-byte AEAD key for a channel using HKDF-SHA256.
pub fn derive_channel_key(channel_id: &ChannelId) -> ChannelKey {
    let hkdf = Hkdf::<Sha256>::new(Some(CHANNEL_KEY_SALT), channel_id.as_str().as_bytes());
    let mut key = Zeroizing::new([0u8; 32]);
    hkdf.expand(CHANNEL_KEY_INFO, key.as_mut())
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    key
}

/// Encrypts `plaintext` under `key` with AES-256-GCM. The returned blob is
/// `nonce || ciphertext` with a fresh 96-bit random nonce.
pub fn encrypt(key: &ChannelKey, plaintext: &[u8]) -> Result<Vec<u8>, AeadError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_ref()));
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| AeadError::EncryptFailed)?;
    let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Deterministic variant for command handlers, which may not draw
/// randomness: the nonce is derived from `seed` (the command id). The seed
/// must be unique per encryption; a ratified command executes exactly once
/// per credential, which guarantees that.
pub fn encrypt_with_seed(key: &ChannelKey, plaintext: &[u8], seed: &[u8]) -> Result<Vec<u8>, AeadError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_ref()));
    let nonce: [u8; NONCE_LEN] = Blake2b::<U12>::digest(seed).into();
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| AeadError::EncryptFailed)?;
    let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Decrypts a `nonce || ciphertext` blob. Fails with [`AeadError::TagMismatch`]
/// if the blob was not produced under `key` or has been modified.
pub fn decrypt(key: &ChannelKey, blob: &[u8]) -> Result<Zeroizing<Vec<u8>>, AeadError> {
    if blob.len() < NONCE_LEN {
        return Err(AeadError::Truncated);
    }
    let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_ref()));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| AeadError::TagMismatch)?;
    Ok(Zeroizing::new(plaintext))
}
