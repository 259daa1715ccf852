//! Byte and serde adapters for values exchanged between signers
//!
//! Nothing here carries protocol logic; these only move keys, nonces and
//! scalars in and out of their fixed-width encodings.

use k256::{
    elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint},
    AffinePoint, EncodedPoint, ProjectivePoint,
};

use crate::{Error, Result};

/// SEC1 compressed encoding of a point.
///
/// The identity is written as 33 zero bytes so the width stays fixed.
pub fn encode_point(point: &ProjectivePoint) -> [u8; 33] {
    let mut out = [0u8; 33];
    let encoded = point.to_affine().to_encoded_point(true);
    let bytes = encoded.as_bytes();
    if bytes.len() == out.len() {
        out.copy_from_slice(bytes);
    }
    out
}

/// Parse a SEC1 compressed point, rejecting the identity.
pub fn decode_point(bytes: &[u8]) -> Result<ProjectivePoint> {
    let encoded =
        EncodedPoint::from_bytes(bytes).map_err(|e| Error::Deserialization(e.to_string()))?;
    let affine: AffinePoint = Option::from(AffinePoint::from_encoded_point(&encoded))
        .ok_or_else(|| Error::Deserialization("Invalid curve point".into()))?;
    Ok(ProjectivePoint::from(affine))
}

/// Serde for fixed byte arrays: hex strings when human readable, raw bytes otherwise.
pub mod hex_array {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S, const N: usize>(bytes: &[u8; N], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&hex::encode(bytes))
        } else {
            serializer.serialize_bytes(bytes)
        }
    }

    pub fn deserialize<'de, D, const N: usize>(deserializer: D) -> Result<[u8; N], D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes = if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            hex::decode(s).map_err(D::Error::custom)?
        } else {
            Vec::<u8>::deserialize(deserializer)?
        };
        bytes
            .try_into()
            .map_err(|_| D::Error::custom(format!("expected {} bytes", N)))
    }
}

/// Serde for scalars in canonical (non-reduced) 32-byte form.
pub mod scalar_hex {
    use k256::Scalar;
    use serde::{de::Error as _, Deserializer, Serializer};

    pub fn serialize<S>(scalar: &Scalar, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let bytes: [u8; 32] = scalar.to_bytes().into();
        super::hex_array::serialize(&bytes, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Scalar, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes: [u8; 32] = super::hex_array::deserialize(deserializer)?;
        crate::types::scalar_from_bytes(&bytes)
            .ok_or_else(|| D::Error::custom("scalar exceeds curve order"))
    }
}

/// Serde for compressed points.
pub mod point_hex {
    use k256::ProjectivePoint;
    use serde::{de::Error as _, Deserializer, Serializer};

    pub fn serialize<S>(point: &ProjectivePoint, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        super::hex_array::serialize(&super::encode_point(point), serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<ProjectivePoint, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes: [u8; 33] = super::hex_array::deserialize(deserializer)?;
        super::decode_point(&bytes).map_err(D::Error::custom)
    }
}
