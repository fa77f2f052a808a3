use alloy_primitives::{
    Address,
    B256,
};
use ark_bn254::{
    Fq,
    G1Affine,
};
use ark_ff::PrimeField;

use super::tagged_hash;

const IDENTITY_TAG: u8 = 0x01;

/// Encryption target derived from an identity prefix and the sender.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    preimage: Vec<u8>,
    point: G1Affine,
}

impl Identity {
    /// Maps arbitrary bytes onto G1 by try-and-increment.
    pub fn from_preimage(preimage: Vec<u8>) -> Self {
        let point = hash_to_g1(&preimage);
        Self { preimage, point }
    }

    pub fn preimage(&self) -> &[u8] {
        &self.preimage
    }

    pub(crate) fn point(&self) -> G1Affine {
        self.point
    }
}

/// Derives the identity a transaction is encrypted towards.
pub trait IdentityDeriver: Send + Sync {
    fn derive(&self, identity_prefix: &B256, sender: Address) -> Identity;
}

/// Hashes `prefix ‖ sender` onto G1 by tagged keccak try-and-increment.
#[derive(Clone, Copy, Debug, Default)]
pub struct KeccakIdentityDeriver;

impl IdentityDeriver for KeccakIdentityDeriver {
    fn derive(&self, identity_prefix: &B256, sender: Address) -> Identity {
        let mut preimage = Vec::with_capacity(32 + 20);
        preimage.extend_from_slice(identity_prefix.as_slice());
        preimage.extend_from_slice(sender.as_slice());
        Identity::from_preimage(preimage)
    }
}

fn hash_to_g1(preimage: &[u8]) -> G1Affine {
    // G1 has cofactor one, so every curve point is in the subgroup.
    let mut counter: u32 = 0;
    loop {
        let digest = tagged_hash(IDENTITY_TAG, &[preimage, &counter.to_be_bytes()]);
        let x = Fq::from_be_bytes_mod_order(&digest);
        if let Some(point) = G1Affine::get_point_from_x_unchecked(x, digest[0] & 1 == 1) {
            return point;
        }
        counter += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let prefix = B256::repeat_byte(0xab);
        let sender = Address::repeat_byte(0x11);
        let a = KeccakIdentityDeriver.derive(&prefix, sender);
        let b = KeccakIdentityDeriver.derive(&prefix, sender);
        assert_eq!(a, b);
        assert_eq!(a.preimage().len(), 52);
    }

    #[test]
    fn prefix_and_sender_both_matter() {
        let prefix = B256::repeat_byte(0xab);
        let sender = Address::repeat_byte(0x11);
        let base = KeccakIdentityDeriver.derive(&prefix, sender);

        let other_prefix = KeccakIdentityDeriver.derive(&B256::repeat_byte(0xac), sender);
        let other_sender = KeccakIdentityDeriver.derive(&prefix, Address::repeat_byte(0x12));
        assert_ne!(base.point(), other_prefix.point());
        assert_ne!(base.point(), other_sender.point());
    }

    #[test]
    fn identity_point_is_on_curve() {
        let identity = Identity::from_preimage(b"anything".to_vec());
        assert!(identity.point().is_on_curve());
        assert!(identity.point().is_in_correct_subgroup_assuming_on_curve());
    }
}
