// Copyright 2024 The Synapse-NG Development Community
// SPDX-License-Identifier: BSD-3-Clause

//! Long-lived node identity.
//!
//! Each node owns a single ed25519 keypair generated once and persisted on
//! disk. The node id is the blake2 fingerprint of the public key. No other
//! component touches private key material; everything else goes through
//! [`SynapseKeypair::sign`].

use std::{fs, io, path::Path};

use blake2::Blake2b;
use digest::{consts::U20, Digest};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use synapse_common_types::NodeId;

type Blake2b160 = Blake2b<U20>;

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("Failed to read or write identity file: {0}")]
    Io(#[from] io::Error),
    #[error("Identity file contains invalid key material")]
    InvalidKeyMaterial,
}

pub struct SynapseKeypair {
    signing_key: SigningKey,
    node_id: NodeId,
}

// Key material stays out of Debug output
impl std::fmt::Debug for SynapseKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynapseKeypair")
            .field("node_id", &self.node_id)
            .finish_non_exhaustive()
    }
}

impl SynapseKeypair {
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let node_id = fingerprint(&signing_key.verifying_key());
        Self { signing_key, node_id }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn public_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }
}

/// Verifies `signature` over `message` against a raw 32-byte public key.
/// Any malformed input verifies as false; gossip from unknown peers must
/// never be able to produce an error path here.
pub fn verify(public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
    let Ok(key_bytes) = <[u8; 32]>::try_from(public_key) else {
        return false;
    };
    let Ok(key) = VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };
    let Ok(sig) = Signature::from_slice(signature) else {
        return false;
    };
    key.verify(message, &sig).is_ok()
}

/// The node id for a given public key: hex-encoded 160-bit blake2 digest.
pub fn fingerprint(public_key: &VerifyingKey) -> NodeId {
    let digest = Blake2b160::digest(public_key.as_bytes());
    NodeId::new(hex::encode(digest))
}

/// Fingerprint from raw key bytes; `None` when the bytes are not a valid
/// ed25519 public key.
pub fn fingerprint_bytes(public_key: &[u8]) -> Option<NodeId> {
    let key_bytes = <[u8; 32]>::try_from(public_key).ok()?;
    let key = VerifyingKey::from_bytes(&key_bytes).ok()?;
    Some(fingerprint(&key))
}

/// Loads the signing key from `path`, creating and persisting a new one on
/// first start. The file holds the hex-encoded 32-byte secret and is written
/// with owner-only permissions.
pub fn load_or_create_identity<P: AsRef<Path>>(path: P) -> Result<SynapseKeypair, IdentityError> {
    let path = path.as_ref();
    if path.exists() {
        let contents = fs::read_to_string(path)?;
        let bytes = hex::decode(contents.trim()).map_err(|_| IdentityError::InvalidKeyMaterial)?;
        let secret: [u8; 32] = bytes.try_into().map_err(|_| IdentityError::InvalidKeyMaterial)?;
        return Ok(SynapseKeypair::from_signing_key(SigningKey::from_bytes(&secret)));
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let keypair = SynapseKeypair::generate();
    fs::write(path, hex::encode(keypair.signing_key.to_bytes()))?;
    set_owner_only(path)?;
    Ok(keypair)
}

#[cfg(unix)]
fn set_owner_only(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn set_owner_only(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_round_trip() {
        let keypair = SynapseKeypair::generate();
        let sig = keypair.sign(b"hello gossip");
        assert!(verify(&keypair.public_key_bytes(), b"hello gossip", &sig.to_bytes()));
        assert!(!verify(&keypair.public_key_bytes(), b"tampered", &sig.to_bytes()));
    }

    #[test]
    fn verify_rejects_malformed_inputs() {
        let keypair = SynapseKeypair::generate();
        let sig = keypair.sign(b"msg");
        assert!(!verify(b"short", b"msg", &sig.to_bytes()));
        assert!(!verify(&keypair.public_key_bytes(), b"msg", b"not-a-signature"));
    }

    #[test]
    fn identity_is_persisted_and_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.key");
        let first = load_or_create_identity(&path).unwrap();
        let second = load_or_create_identity(&path).unwrap();
        assert_eq!(first.node_id(), second.node_id());
        assert_eq!(first.public_key_bytes(), second.public_key_bytes());
    }

    #[test]
    fn corrupt_identity_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.key");
        fs::write(&path, "not hex at all").unwrap();
        let err = load_or_create_identity(&path).unwrap_err();
        assert!(matches!(err, IdentityError::InvalidKeyMaterial));
    }

    #[cfg(unix)]
    #[test]
    fn identity_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.key");
        load_or_create_identity(&path).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
