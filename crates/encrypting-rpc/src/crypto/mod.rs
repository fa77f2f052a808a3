//! Identity-based threshold encryption over BN254.
//!
//! The keyper committee publishes an eon public key `s·G2`. A transaction is
//! encrypted towards an identity point in G1; once the committee releases the
//! matching epoch secret key `s·Q` anyone can decrypt it.

mod encryption;
mod identity;

pub use encryption::{
    EncryptedMessage,
    decrypt,
    encrypt,
};
pub use identity::{
    Identity,
    IdentityDeriver,
    KeccakIdentityDeriver,
};

use alloy_primitives::keccak256;
use ark_bn254::{
    Fr,
    G1Affine,
    G2Affine,
};
use ark_ec::AffineRepr;
use ark_ff::PrimeField;
use ark_serialize::{
    CanonicalDeserialize,
    CanonicalSerialize,
};
use thiserror::Error;

/// Length of a compressed G2 point.
pub const G2_COMPRESSED_LEN: usize = 64;
/// Length of an uncompressed G2 point.
pub const G2_UNCOMPRESSED_LEN: usize = 128;
/// Length of sigma and of every message block.
pub const BLOCK_LEN: usize = 32;

pub type Block = [u8; BLOCK_LEN];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid eon public key: {0}")]
    InvalidEonKey(String),
    #[error("malformed ciphertext: {0}")]
    MalformedCiphertext(String),
    #[error("invalid message padding")]
    InvalidPadding,
    #[error("ciphertext does not match the decrypted message")]
    IntegrityCheckFailed,
}

/// Committee public key of one eon.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EonPublicKey(pub(crate) G2Affine);

impl EonPublicKey {
    /// Parses the key as published by the key broadcast contract. Both the
    /// compressed and the uncompressed point encodings are accepted.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let point = match bytes.len() {
            G2_COMPRESSED_LEN => G2Affine::deserialize_compressed(bytes),
            G2_UNCOMPRESSED_LEN => G2Affine::deserialize_uncompressed(bytes),
            len => {
                return Err(CryptoError::InvalidEonKey(format!(
                    "unexpected key length {len}"
                )));
            }
        }
        .map_err(|err| CryptoError::InvalidEonKey(err.to_string()))?;

        if point.is_zero() {
            return Err(CryptoError::InvalidEonKey("point at infinity".into()));
        }
        Ok(Self(point))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(G2_COMPRESSED_LEN);
        self.0
            .serialize_compressed(&mut out)
            .expect("serializing into a Vec cannot fail");
        out
    }
}

/// Committee secret of one eon. The gateway never holds one in production;
/// it exists to derive epoch keys when exercising the scheme end to end.
#[derive(Clone)]
pub struct EonSecretKey(Fr);

impl EonSecretKey {
    pub fn from_seed(seed: &[u8]) -> Self {
        Self(Fr::from_be_bytes_mod_order(keccak256(seed).as_slice()))
    }

    pub fn public_key(&self) -> EonPublicKey {
        EonPublicKey((G2Affine::generator() * self.0).into())
    }

    pub fn epoch_secret_key(&self, identity: &Identity) -> EpochSecretKey {
        EpochSecretKey((identity.point() * self.0).into())
    }
}

/// Decryption key released by the committee for a single identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EpochSecretKey(pub(crate) G1Affine);

/// Domain-separated keccak256, the hash family every derivation in the
/// scheme is built from.
pub(crate) fn tagged_hash(tag: u8, parts: &[&[u8]]) -> Block {
    let mut preimage = Vec::with_capacity(1 + parts.iter().map(|p| p.len()).sum::<usize>());
    preimage.push(tag);
    for part in parts {
        preimage.extend_from_slice(part);
    }
    keccak256(preimage).0
}
