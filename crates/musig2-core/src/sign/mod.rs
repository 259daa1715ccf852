//! Partial signing and signature combination
//!
//! Each signer produces `s_i = k1 + b*k2 + e*a_i*d_i`; the combiner sums the
//! `s_i` and applies the tweak correction once to obtain a BIP-340 signature
//! under the aggregated key.

mod combine;
mod partial;

pub use combine::{combine_and_verify, combine_partial_signatures, CombineOptions, TweakedCombine};
pub use partial::{sign, verify_partial};
pub(crate) use partial::{sign_with_aggregate, verify_partial_with_aggregate};

use k256::{ProjectivePoint, Scalar};
use serde::{Deserialize, Serialize};

use crate::keys::KeyAggOptions;
use crate::types::scalar_from_bytes;
use crate::{Error, Result};

/// Size of an encoded partial signature.
pub const PARTIAL_SIG_SIZE: usize = 32;

/// One signer's contribution to the final signature.
///
/// Only meaningful for the (key set, message, combined nonce) it was made for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialSignature {
    /// Signature scalar `s_i`
    #[serde(with = "crate::codec::scalar_hex")]
    pub s: Scalar,

    /// Effective session nonce `R` the signer computed; absent when decoded
    /// from the wire
    #[serde(skip)]
    pub r: Option<ProjectivePoint>,
}

impl PartialSignature {
    /// Create a partial signature
    pub fn new(s: Scalar, r: Option<ProjectivePoint>) -> Self {
        Self { s, r }
    }

    /// Encode the scalar, big endian.
    pub fn to_bytes(&self) -> [u8; PARTIAL_SIG_SIZE] {
        self.s.to_bytes().into()
    }

    /// Parse an encoded scalar, rejecting values >= n.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let array: [u8; PARTIAL_SIG_SIZE] = bytes.try_into().map_err(|_| {
            Error::Deserialization(format!(
                "Partial signature must be {} bytes, got {}",
                PARTIAL_SIG_SIZE,
                bytes.len()
            ))
        })?;
        let s = scalar_from_bytes(&array)
            .ok_or_else(|| Error::Deserialization("Partial signature exceeds curve order".into()))?;
        Ok(Self { s, r: None })
    }
}

/// Options for [`sign`] and [`verify_partial`].
#[derive(Debug, Clone, Default)]
pub struct SignOptions {
    /// Sort the key set before aggregation
    pub sort: bool,

    /// Precomputed aggregation inputs and tweaks
    pub key_agg: KeyAggOptions,

    /// Skip verifying our own partial signature before returning it
    pub fast_sign: bool,
}
