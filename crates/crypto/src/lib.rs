//! Signing capability used by interactions.
//!
//! Interactions only see the [`Signer`] trait and [`verify`]; the Ed25519
//! implementation below is what nodes run with today. Digests for content
//! identifiers and origin-chain links use blake3.

use std::fmt;

use ed25519_dalek::{Signature as DalekSignature, Signer as _, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use rand::rngs::OsRng;
use thiserror::Error;
use zeroize::Zeroizing;

/// Length of public keys and secret seeds.
pub const KEY_LEN: usize = 32;
/// Length of a detached signature.
pub const SIGNATURE_LEN: usize = 64;
/// Length of blake3 digests.
pub const DIGEST_LEN: usize = 32;

/// Largest message accepted for verification (16 MB).
pub const MAX_MESSAGE_LEN: usize = 16 * 1024 * 1024;

const KEY_DERIVATION_CONTEXT: &str = "attestation-node 2024-01 ed25519 signing seed";

/// Errors emitted by cryptographic helpers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("signature verification failed")]
    InvalidSignature,
    #[error("malformed key material")]
    InvalidKey,
    #[error("message of {0} bytes exceeds verification limit")]
    MessageTooLarge(usize),
}

/// A party able to sign bound witnesses.
pub trait Signer: Send + Sync {
    fn public_key(&self) -> [u8; KEY_LEN];

    fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LEN];
}

/// Ed25519 signer holding its secret seed.
pub struct Ed25519Signer {
    signing: SigningKey,
}

impl Ed25519Signer {
    /// Fresh random key from the operating system RNG.
    pub fn generate() -> Self {
        let mut seed = Zeroizing::new([0u8; KEY_LEN]);
        OsRng.fill_bytes(&mut *seed);
        Self::from_seed(&seed)
    }

    pub fn from_seed(seed: &[u8; KEY_LEN]) -> Self {
        Self {
            signing: SigningKey::from_bytes(seed),
        }
    }

    /// Deterministic key derived from arbitrary key material (for example a
    /// passphrase from configuration).
    pub fn derive(material: &[u8]) -> Self {
        let seed = Zeroizing::new(blake3::derive_key(KEY_DERIVATION_CONTEXT, material));
        Self::from_seed(&seed)
    }

    pub fn from_hex(seed_hex: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(seed_hex.trim()).map_err(|_| CryptoError::InvalidKey)?;
        let bytes = Zeroizing::new(bytes);
        let seed: [u8; KEY_LEN] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidKey)?;
        let seed = Zeroizing::new(seed);
        Ok(Self::from_seed(&seed))
    }

    pub fn seed_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.signing.to_bytes()))
    }
}

impl Signer for Ed25519Signer {
    fn public_key(&self) -> [u8; KEY_LEN] {
        self.signing.verifying_key().to_bytes()
    }

    fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LEN] {
        self.signing.sign(message).to_bytes()
    }
}

impl fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ed25519Signer")
            .field("public_key", &hex::encode(self.public_key()))
            .finish_non_exhaustive()
    }
}

/// Verify a detached Ed25519 signature.
pub fn verify(
    public_key: &[u8; KEY_LEN],
    message: &[u8],
    signature: &[u8; SIGNATURE_LEN],
) -> Result<(), CryptoError> {
    if message.len() > MAX_MESSAGE_LEN {
        return Err(CryptoError::MessageTooLarge(message.len()));
    }
    let key = VerifyingKey::from_bytes(public_key).map_err(|_| CryptoError::InvalidKey)?;
    let signature = DalekSignature::from_bytes(signature);
    key.verify_strict(message, &signature)
        .map_err(|_| CryptoError::InvalidSignature)
}

/// blake3 digest of `bytes`.
pub fn digest(bytes: &[u8]) -> [u8; DIGEST_LEN] {
    blake3::hash(bytes).into()
}
