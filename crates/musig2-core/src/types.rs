//! Core types for the MuSig2 protocol

use k256::{
    elliptic_curve::{
        point::{AffineCoordinates, DecompressPoint},
        subtle::Choice,
        PrimeField,
    },
    schnorr, AffinePoint, FieldBytes, ProjectivePoint, Scalar,
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub use k256::{PublicKey, SecretKey};

/// Message digest being signed
pub type Message = [u8; 32];

/// BIP-340 Schnorr signature (R.x, s)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// x-coordinate of the effective nonce point
    #[serde(with = "crate::codec::hex_array")]
    pub r: [u8; 32],
    /// Signature scalar
    #[serde(with = "crate::codec::hex_array")]
    pub s: [u8; 32],
}

impl Signature {
    /// Create a new signature
    pub fn new(r: [u8; 32], s: [u8; 32]) -> Self {
        Self { r, s }
    }

    /// Convert to bytes (r || s)
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(&self.r);
        bytes[32..].copy_from_slice(&self.s);
        bytes
    }

    /// Parse a 64-byte BIP-340 signature
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 64 {
            return Err(Error::Deserialization(format!(
                "Signature must be 64 bytes, got {}",
                bytes.len()
            )));
        }
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..]);
        Ok(Self { r, s })
    }

    /// Verify against an x-only public key using BIP-340.
    pub fn verify(&self, message: &[u8], key: &PublicKey) -> bool {
        let Ok(verifying_key) = schnorr::VerifyingKey::from_bytes(&xonly_bytes(key)) else {
            return false;
        };
        let Ok(signature) = schnorr::Signature::try_from(self.to_bytes().as_slice()) else {
            return false;
        };
        verifying_key.verify_raw(message, &signature).is_ok()
    }
}

/// A scalar tweak applied to the aggregated key.
///
/// An x-only tweak first normalizes the running key to even y; a plain tweak
/// is added unconditionally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyTweak {
    /// Tweak scalar
    #[serde(with = "crate::codec::scalar_hex")]
    pub tweak: Scalar,
    /// Whether the tweak is applied to the even-y key
    pub is_xonly: bool,
}

impl KeyTweak {
    /// Create an x-only tweak
    pub fn xonly(tweak: Scalar) -> Self {
        Self {
            tweak,
            is_xonly: true,
        }
    }

    /// Create a plain tweak
    pub fn plain(tweak: Scalar) -> Self {
        Self {
            tweak,
            is_xonly: false,
        }
    }

    /// Parse a tweak from 32 big-endian bytes, rejecting values >= n.
    pub fn from_bytes(bytes: &[u8; 32], is_xonly: bool) -> Result<Self> {
        let tweak = scalar_from_bytes(bytes)
            .ok_or_else(|| Error::InvalidTweak("Tweak exceeds curve order".into()))?;
        Ok(Self { tweak, is_xonly })
    }
}

/// Taproot commitment applied after any explicit tweaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaprootTweak {
    /// Key-path only output (BIP-86): commits to an empty script root
    Bip86,
    /// Commit to a tapscript merkle root
    ScriptRoot(#[serde(with = "crate::codec::hex_array")] [u8; 32]),
}

impl TaprootTweak {
    /// Script root bytes hashed into the tweak
    pub fn merkle_root(&self) -> &[u8] {
        match self {
            TaprootTweak::Bip86 => &[],
            TaprootTweak::ScriptRoot(root) => root,
        }
    }
}

/// 32-byte x-only serialization of a public key.
pub fn xonly_bytes(key: &PublicKey) -> [u8; 32] {
    key.as_affine().x().into()
}

/// x-coordinate of a point; the identity maps to zeros.
pub fn point_xonly(point: &ProjectivePoint) -> [u8; 32] {
    point.to_affine().x().into()
}

/// Whether a point has an odd y-coordinate.
pub fn has_odd_y(point: &ProjectivePoint) -> Choice {
    point.to_affine().y_is_odd()
}

/// Lift an x-only key to the point with even y.
pub fn lift_x(key: &PublicKey) -> ProjectivePoint {
    let point = key.to_projective();
    if has_odd_y(&point).into() {
        -point
    } else {
        point
    }
}

/// Parse a 32-byte x-only public key as the point with even y.
pub fn parse_xonly(bytes: &[u8]) -> Result<PublicKey> {
    let x: [u8; 32] = bytes.try_into().map_err(|_| {
        Error::InvalidKeyData(format!("x-only key must be 32 bytes, got {}", bytes.len()))
    })?;
    let affine = Option::<AffinePoint>::from(AffinePoint::decompress(
        &FieldBytes::from(x),
        Choice::from(0),
    ))
    .ok_or_else(|| Error::InvalidKeyData("x-coordinate is not on the curve".into()))?;
    PublicKey::from_affine(affine).map_err(|e| Error::InvalidKeyData(e.to_string()))
}

/// Parse a scalar from 32 big-endian bytes, rejecting values >= n.
pub fn scalar_from_bytes(bytes: &[u8; 32]) -> Option<Scalar> {
    Option::from(Scalar::from_repr(FieldBytes::from(*bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn test_xonly_roundtrip_is_even() {
        let key = SecretKey::random(&mut OsRng).public_key();
        let parsed = parse_xonly(&xonly_bytes(&key)).unwrap();

        assert_eq!(xonly_bytes(&parsed), xonly_bytes(&key));
        assert!(!bool::from(has_odd_y(&parsed.to_projective())));
        assert_eq!(parsed.to_projective(), lift_x(&key));
    }

    #[test]
    fn test_parse_xonly_rejects_bad_length() {
        assert!(matches!(
            parse_xonly(&[2u8; 31]),
            Err(Error::InvalidKeyData(_))
        ));
    }

    #[test]
    fn test_tweak_rejects_overflow() {
        assert!(KeyTweak::from_bytes(&[0xff; 32], true).is_err());
        assert!(KeyTweak::from_bytes(&[0x01; 32], false).is_ok());
    }

    #[test]
    fn test_signature_bytes() {
        let sig = Signature::new([1u8; 32], [2u8; 32]);
        let bytes = sig.to_bytes();
        assert_eq!(Signature::from_bytes(&bytes).unwrap(), sig);
        assert!(Signature::from_bytes(&bytes[..63]).is_err());
    }

    #[test]
    fn test_tweak_json() {
        let tweak = KeyTweak::xonly(Scalar::from(7u64));
        let json = serde_json::to_string(&tweak).unwrap();
        let parsed: KeyTweak = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, tweak);

        let taproot = TaprootTweak::ScriptRoot([9u8; 32]);
        let json = serde_json::to_string(&taproot).unwrap();
        assert_eq!(serde_json::from_str::<TaprootTweak>(&json).unwrap(), taproot);
    }
}
