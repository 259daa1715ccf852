//! BIP-340 style tagged hashing

use k256::{
    elliptic_curve::{bigint::U256, ops::Reduce},
    Scalar,
};
use sha2::{Digest, Sha256};

/// Domain separation tags used throughout the protocol.
pub mod tags {
    /// Hash of the (sorted) key list.
    pub const KEYAGG_LIST: &str = "KeyAgg list";
    /// Per-key aggregation coefficient.
    pub const KEYAGG_COEFFICIENT: &str = "KeyAgg coefficient";
    /// Nonce mixing coefficient `b`.
    pub const NONCE_COEFFICIENT: &str = "MuSig/noncecoef";
    /// Auxiliary randomness for nonce generation.
    pub const NONCE_AUX: &str = "MuSig/aux";
    /// Secret nonce derivation.
    pub const NONCE_GEN: &str = "MuSig/nonce";
    /// Signature challenge.
    pub const CHALLENGE: &str = "BIP0340/challenge";
    /// Taproot output key tweak.
    pub const TAP_TWEAK: &str = "TapTweak";
}

/// Create a hasher primed with `SHA256(tag) || SHA256(tag)`.
pub fn tagged_hash(tag: &str) -> Sha256 {
    let tag_hash = Sha256::digest(tag.as_bytes());
    let mut hasher = Sha256::new();
    hasher.update(tag_hash);
    hasher.update(tag_hash);
    hasher
}

/// Finalize a hasher into a 32-byte array.
pub fn finalize(hasher: Sha256) -> [u8; 32] {
    hasher.finalize().into()
}

/// Finalize a hasher and reduce the digest modulo the curve order.
pub fn hasher_to_scalar(hasher: Sha256) -> Scalar {
    reduce_bytes(&finalize(hasher))
}

/// Reduce 32 big-endian bytes modulo the curve order.
pub fn reduce_bytes(bytes: &[u8; 32]) -> Scalar {
    <Scalar as Reduce<U256>>::reduce_bytes(&(*bytes).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_hash_prefix() {
        let tag = Sha256::digest(b"KeyAgg list");
        let mut manual = Sha256::new();
        manual.update(tag);
        manual.update(tag);
        manual.update(b"payload");

        let mut hasher = tagged_hash(tags::KEYAGG_LIST);
        hasher.update(b"payload");

        assert_eq!(finalize(hasher), <[u8; 32]>::from(manual.finalize()));
    }

    #[test]
    fn test_distinct_tags_separate_domains() {
        let a = finalize(tagged_hash(tags::KEYAGG_LIST));
        let b = finalize(tagged_hash(tags::KEYAGG_COEFFICIENT));
        assert_ne!(a, b);
    }
}
