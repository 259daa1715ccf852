//! Nonce generation and aggregation
//!
//! Each signer draws two secret scalars `(k1, k2)` per session and publishes
//! `(R1, R2) = (k1*G, k2*G)`. The two components are mixed with a
//! message-bound coefficient `b` into the effective nonce `R = R1 + b*R2`.

use k256::{ProjectivePoint, Scalar};
use rand::rngs::OsRng;
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::Digest;
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::codec::{decode_point, encode_point};
use crate::hash::{self, tags};
use crate::types::{point_xonly, xonly_bytes, Message};
use crate::{Error, PublicKey, Result, SecretKey};

/// Size of an encoded public nonce: two compressed points.
pub const PUB_NONCE_SIZE: usize = 66;

/// A signer's secret nonce pair.
///
/// Not `Clone`: a secret nonce is moved into exactly one signing call, which
/// drops it, and dropping wipes both scalars.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretNonce {
    pub(crate) k1: Scalar,
    pub(crate) k2: Scalar,
}

impl SecretNonce {
    /// Public nonce `(k1*G, k2*G)`.
    pub fn public_nonce(&self) -> PublicNonce {
        PublicNonce {
            r1: ProjectivePoint::GENERATOR * self.k1,
            r2: ProjectivePoint::GENERATOR * self.k2,
        }
    }
}

impl std::fmt::Debug for SecretNonce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretNonce(..)")
    }
}

/// A public nonce pair, either one signer's or the sum across signers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicNonce {
    /// First nonce point
    #[serde(with = "crate::codec::point_hex")]
    pub r1: ProjectivePoint,
    /// Second nonce point
    #[serde(with = "crate::codec::point_hex")]
    pub r2: ProjectivePoint,
}

impl PublicNonce {
    /// Encode as `R1 || R2`, each SEC1 compressed.
    pub fn to_bytes(&self) -> [u8; PUB_NONCE_SIZE] {
        let mut bytes = [0u8; PUB_NONCE_SIZE];
        bytes[..33].copy_from_slice(&encode_point(&self.r1));
        bytes[33..].copy_from_slice(&encode_point(&self.r2));
        bytes
    }

    /// Parse an encoded public nonce. Neither point may be the identity.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != PUB_NONCE_SIZE {
            return Err(Error::Deserialization(format!(
                "Public nonce must be {} bytes, got {}",
                PUB_NONCE_SIZE,
                bytes.len()
            )));
        }
        Ok(Self {
            r1: decode_point(&bytes[..33])?,
            r2: decode_point(&bytes[33..])?,
        })
    }
}

/// Secret and public halves of a freshly generated nonce.
#[derive(Debug)]
pub struct NoncePair {
    /// Secret nonce, consumed by signing
    pub secret: SecretNonce,
    /// Public nonce to send to the other signers
    pub public: PublicNonce,
}

/// Optional auxiliary inputs mixed into nonce generation.
///
/// Fresh randomness is always drawn; these inputs add entropy and bind the
/// nonce to its intended use.
#[derive(Debug, Clone, Default)]
pub struct NonceGenOptions<'a> {
    /// The signer's public key
    pub public_key: Option<PublicKey>,
    /// The signer's secret key
    pub secret_key: Option<&'a SecretKey>,
    /// The aggregated key being signed for
    pub aggregated_key: Option<PublicKey>,
    /// The message, if known in advance
    pub message: Option<&'a [u8]>,
    /// Any additional caller-supplied input
    pub extra_input: Option<&'a [u8]>,
}

/// Generate a fresh nonce pair from the operating system RNG.
pub fn generate_nonce() -> Result<NoncePair> {
    generate_nonce_with(&mut OsRng, &NonceGenOptions::default())
}

/// Generate a fresh nonce pair, hedging the RNG output with auxiliary inputs.
///
/// `k_i = TaggedHash("MuSig/nonce", rand || pk || aggpk || msg || extra || i)`
/// where `rand` is the RNG output, masked with the secret key if one is given.
pub fn generate_nonce_with<R: RngCore + CryptoRng>(
    rng: &mut R,
    opts: &NonceGenOptions<'_>,
) -> Result<NoncePair> {
    let mut rand = Zeroizing::new([0u8; 32]);
    rng.try_fill_bytes(&mut *rand)
        .map_err(|e| Error::InvalidNonce(format!("RNG failure: {}", e)))?;

    if let Some(secret_key) = opts.secret_key {
        let mut aux = hash::tagged_hash(tags::NONCE_AUX);
        aux.update(&*rand);
        let mask = Zeroizing::new(hash::finalize(aux));
        let sk_bytes = Zeroizing::new(<[u8; 32]>::from(secret_key.to_bytes()));
        for (i, byte) in rand.iter_mut().enumerate() {
            *byte = sk_bytes[i] ^ mask[i];
        }
    }

    let mut hasher = hash::tagged_hash(tags::NONCE_GEN);
    hasher.update(&*rand);
    match &opts.public_key {
        Some(key) => {
            hasher.update([32u8]);
            hasher.update(xonly_bytes(key));
        }
        None => hasher.update([0u8]),
    }
    match &opts.aggregated_key {
        Some(key) => {
            hasher.update([32u8]);
            hasher.update(xonly_bytes(key));
        }
        None => hasher.update([0u8]),
    }
    match opts.message {
        Some(message) => {
            hasher.update([1u8]);
            hasher.update((message.len() as u64).to_be_bytes());
            hasher.update(message);
        }
        None => hasher.update([0u8]),
    }
    let extra = opts.extra_input.unwrap_or_default();
    hasher.update((extra.len() as u32).to_be_bytes());
    hasher.update(extra);

    let k1 = derive_nonce_scalar(hasher.clone(), 0)?;
    let k2 = derive_nonce_scalar(hasher, 1)?;

    let secret = SecretNonce { k1, k2 };
    let public = secret.public_nonce();

    Ok(NoncePair { secret, public })
}

fn derive_nonce_scalar(mut hasher: sha2::Sha256, index: u8) -> Result<Scalar> {
    hasher.update([index]);
    let k = hash::hasher_to_scalar(hasher);
    if bool::from(k.is_zero()) {
        return Err(Error::InvalidNonce("Derived nonce scalar is zero".into()));
    }
    Ok(k)
}

/// Sum public nonces component-wise.
pub fn aggregate_nonces(nonces: &[PublicNonce]) -> Result<PublicNonce> {
    if nonces.is_empty() {
        return Err(Error::EmptyNonceSet);
    }

    let combined = nonces.iter().fold(
        PublicNonce {
            r1: ProjectivePoint::IDENTITY,
            r2: ProjectivePoint::IDENTITY,
        },
        |acc, nonce| PublicNonce {
            r1: acc.r1 + nonce.r1,
            r2: acc.r2 + nonce.r2,
        },
    );

    debug!(n_nonces = nonces.len(), "Aggregated public nonces");
    Ok(combined)
}

/// `b = TaggedHash("MuSig/noncecoef", R1 || R2 || Q.x || m)`.
pub fn nonce_coefficient(
    combined: &PublicNonce,
    aggregated_key: &PublicKey,
    message: &Message,
) -> Scalar {
    let mut hasher = hash::tagged_hash(tags::NONCE_COEFFICIENT);
    hasher.update(encode_point(&combined.r1));
    hasher.update(encode_point(&combined.r2));
    hasher.update(xonly_bytes(aggregated_key));
    hasher.update(message);
    hash::hasher_to_scalar(hasher)
}

/// Effective nonce `R = R1 + b*R2`, falling back to `G` at infinity.
pub fn effective_nonce(combined: &PublicNonce, b: &Scalar) -> ProjectivePoint {
    let r = combined.r1 + combined.r2 * b;
    if r == ProjectivePoint::IDENTITY {
        ProjectivePoint::GENERATOR
    } else {
        r
    }
}

/// BIP-340 challenge `e = TaggedHash("BIP0340/challenge", R.x || Q.x || m)`.
pub fn challenge(r: &ProjectivePoint, aggregated_key: &PublicKey, message: &Message) -> Scalar {
    let mut hasher = hash::tagged_hash(tags::CHALLENGE);
    hasher.update(point_xonly(r));
    hasher.update(xonly_bytes(aggregated_key));
    hasher.update(message);
    hash::hasher_to_scalar(hasher)
}
