use ark_bn254::{
    Bn254,
    Fr,
    G2Affine,
};
use ark_ec::{
    AffineRepr,
    CurveGroup,
    pairing::{
        Pairing,
        PairingOutput,
    },
};
use ark_ff::PrimeField;
use ark_serialize::{
    CanonicalDeserialize,
    CanonicalSerialize,
};

use super::{
    BLOCK_LEN,
    Block,
    CryptoError,
    EonPublicKey,
    EpochSecretKey,
    G2_COMPRESSED_LEN,
    Identity,
    tagged_hash,
};

const MASK_TAG: u8 = 0x02;
const NONCE_TAG: u8 = 0x03;
const KEYSTREAM_TAG: u8 = 0x04;

/// Ciphertext as submitted to the sequencer contract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedMessage {
    c1: G2Affine,
    c2: Block,
    c3: Vec<Block>,
}

impl EncryptedMessage {
    /// `C1 (compressed G2) ‖ C2 ‖ C3 blocks`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(G2_COMPRESSED_LEN + BLOCK_LEN * (1 + self.c3.len()));
        self.c1
            .serialize_compressed(&mut out)
            .expect("serializing into a Vec cannot fail");
        out.extend_from_slice(&self.c2);
        for block in &self.c3 {
            out.extend_from_slice(block);
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() < G2_COMPRESSED_LEN + 2 * BLOCK_LEN {
            return Err(CryptoError::MalformedCiphertext(format!(
                "ciphertext too short ({} bytes)",
                bytes.len()
            )));
        }
        let (c1_bytes, rest) = bytes.split_at(G2_COMPRESSED_LEN);
        let (c2_bytes, c3_bytes) = rest.split_at(BLOCK_LEN);
        if c3_bytes.len() % BLOCK_LEN != 0 {
            return Err(CryptoError::MalformedCiphertext(
                "payload is not a whole number of blocks".into(),
            ));
        }

        let c1 = G2Affine::deserialize_compressed(c1_bytes)
            .map_err(|err| CryptoError::MalformedCiphertext(err.to_string()))?;
        let c2 = to_block(c2_bytes);
        let c3 = c3_bytes.chunks_exact(BLOCK_LEN).map(to_block).collect();
        Ok(Self { c1, c2, c3 })
    }
}

/// Encrypts `message` towards `identity` under the eon key. `sigma` must be
/// fresh randomness for every call.
pub fn encrypt(
    message: &[u8],
    eon_key: &EonPublicKey,
    identity: &Identity,
    sigma: &Block,
) -> EncryptedMessage {
    let r = nonce_scalar(sigma, message);
    let c1 = (G2Affine::generator() * r).into_affine();

    let shared = Bn254::pairing((identity.point() * r).into_affine(), eon_key.0);
    let c2 = xor(sigma, &mask(&shared));

    let c3 = pad(message)
        .iter()
        .enumerate()
        .map(|(index, block)| xor(block, &keystream_block(sigma, index)))
        .collect();

    EncryptedMessage { c1, c2, c3 }
}

/// Recovers the plaintext with the epoch key released for the identity the
/// message was encrypted to.
pub fn decrypt(
    encrypted: &EncryptedMessage,
    epoch_key: &EpochSecretKey,
) -> Result<Vec<u8>, CryptoError> {
    let shared = Bn254::pairing(epoch_key.0, encrypted.c1);
    let sigma = xor(&encrypted.c2, &mask(&shared));

    let padded: Vec<Block> = encrypted
        .c3
        .iter()
        .enumerate()
        .map(|(index, block)| xor(block, &keystream_block(&sigma, index)))
        .collect();
    let message = unpad(&padded)?;

    let r = nonce_scalar(&sigma, &message);
    if (G2Affine::generator() * r).into_affine() != encrypted.c1 {
        return Err(CryptoError::IntegrityCheckFailed);
    }
    Ok(message)
}

fn nonce_scalar(sigma: &Block, message: &[u8]) -> Fr {
    Fr::from_be_bytes_mod_order(&tagged_hash(NONCE_TAG, &[sigma, message]))
}

fn mask(shared: &PairingOutput<Bn254>) -> Block {
    let mut bytes = Vec::new();
    shared
        .serialize_compressed(&mut bytes)
        .expect("serializing into a Vec cannot fail");
    tagged_hash(MASK_TAG, &[&bytes])
}

fn keystream_block(sigma: &Block, index: usize) -> Block {
    tagged_hash(KEYSTREAM_TAG, &[sigma, &(index as u64).to_be_bytes()])
}

fn xor(a: &Block, b: &Block) -> Block {
    let mut out = [0u8; BLOCK_LEN];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = a[i] ^ b[i];
    }
    out
}

fn to_block(bytes: &[u8]) -> Block {
    let mut block = [0u8; BLOCK_LEN];
    block.copy_from_slice(bytes);
    block
}

/// PKCS#7 padding to whole blocks; always adds at least one byte.
fn pad(message: &[u8]) -> Vec<Block> {
    let pad_len = BLOCK_LEN - message.len() % BLOCK_LEN;
    let mut padded = message.to_vec();
    padded.resize(message.len() + pad_len, pad_len as u8);
    padded.chunks_exact(BLOCK_LEN).map(to_block).collect()
}

fn unpad(blocks: &[Block]) -> Result<Vec<u8>, CryptoError> {
    let last = blocks.last().ok_or(CryptoError::InvalidPadding)?;
    let pad_len = last[BLOCK_LEN - 1] as usize;
    if pad_len == 0 || pad_len > BLOCK_LEN {
        return Err(CryptoError::InvalidPadding);
    }
    if last[BLOCK_LEN - pad_len..]
        .iter()
        .any(|byte| *byte as usize != pad_len)
    {
        return Err(CryptoError::InvalidPadding);
    }

    let mut message: Vec<u8> = blocks.iter().flatten().copied().collect();
    message.truncate(message.len() - pad_len);
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{
        EonSecretKey,
        IdentityDeriver,
        KeccakIdentityDeriver,
    };
    use alloy_primitives::{
        Address,
        B256,
    };

    fn setup() -> (EonSecretKey, Identity) {
        let secret = EonSecretKey::from_seed(b"eon 1");
        let identity = KeccakIdentityDeriver.derive(&B256::repeat_byte(7), Address::repeat_byte(1));
        (secret, identity)
    }

    #[test]
    fn roundtrip_recovers_original_bytes() {
        let (secret, identity) = setup();
        let message = b"\x02\xf8\x6f signed transaction bytes of arbitrary length".to_vec();
        let sigma = [9u8; BLOCK_LEN];

        let encrypted = encrypt(&message, &secret.public_key(), &identity, &sigma);
        let epoch_key = secret.epoch_secret_key(&identity);

        assert_eq!(decrypt(&encrypted, &epoch_key).unwrap(), message);
    }

    #[test]
    fn roundtrip_survives_wire_encoding() {
        let (secret, identity) = setup();
        for len in [0usize, 1, 31, 32, 33, 200] {
            let message: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let encrypted = encrypt(&message, &secret.public_key(), &identity, &[len as u8; 32]);
            let bytes = encrypted.to_bytes();
            assert_eq!(bytes.len(), G2_COMPRESSED_LEN + BLOCK_LEN * (2 + len / BLOCK_LEN));

            let parsed = EncryptedMessage::from_bytes(&bytes).unwrap();
            assert_eq!(parsed, encrypted);
            let plain = decrypt(&parsed, &secret.epoch_secret_key(&identity)).unwrap();
            assert_eq!(plain, message);
        }
    }

    #[test]
    fn wrong_identity_key_fails_integrity_check() {
        let (secret, identity) = setup();
        let other = KeccakIdentityDeriver.derive(&B256::repeat_byte(8), Address::repeat_byte(1));
        let encrypted = encrypt(b"payload", &secret.public_key(), &identity, &[1u8; 32]);

        assert!(decrypt(&encrypted, &secret.epoch_secret_key(&other)).is_err());
    }

    #[test]
    fn ciphertext_hides_plaintext_and_depends_on_sigma() {
        let (secret, identity) = setup();
        let message = [0x41u8; 64];
        let a = encrypt(&message, &secret.public_key(), &identity, &[1u8; 32]);
        let b = encrypt(&message, &secret.public_key(), &identity, &[2u8; 32]);

        assert_ne!(a.to_bytes(), b.to_bytes());
        assert!(!a.to_bytes().windows(32).any(|w| w == &message[..32]));
    }

    #[test]
    fn truncated_ciphertext_is_rejected() {
        assert!(matches!(
            EncryptedMessage::from_bytes(&[0u8; 40]),
            Err(CryptoError::MalformedCiphertext(_))
        ));
    }

    #[test]
    fn padding_is_validated() {
        let mut block = [3u8; BLOCK_LEN];
        assert_eq!(unpad(&[block]).unwrap().len(), BLOCK_LEN - 3);
        block[BLOCK_LEN - 2] = 1;
        assert_eq!(unpad(&[block]), Err(CryptoError::InvalidPadding));
        assert_eq!(unpad(&[[0u8; BLOCK_LEN]]), Err(CryptoError::InvalidPadding));
    }
}
