//! Tweak derivation for taproot outputs and BIP32 child keys

use derivation_path::{ChildIndex, DerivationPath};
use hmac::{Hmac, Mac};
use k256::{elliptic_curve::sec1::ToEncodedPoint, ProjectivePoint};
use sha2::{Digest, Sha512};

use crate::hash::{self, tags};
use crate::types::{scalar_from_bytes, xonly_bytes, KeyTweak, TaprootTweak};
use crate::{Error, PublicKey, Result};

/// BIP-341 tweak `TaggedHash("TapTweak", P.x || root)` as an x-only tweak.
pub fn taproot_tweak(internal_key: &PublicKey, taproot: &TaprootTweak) -> Result<KeyTweak> {
    let mut hasher = hash::tagged_hash(tags::TAP_TWEAK);
    hasher.update(xonly_bytes(internal_key));
    hasher.update(taproot.merkle_root());

    let tweak = scalar_from_bytes(&hash::finalize(hasher))
        .ok_or_else(|| Error::InvalidTweak("TapTweak hash exceeds curve order".into()))?;
    Ok(KeyTweak::xonly(tweak))
}

/// Plain tweaks deriving a non-hardened BIP32 child of `aggregated_key`.
///
/// Applying the returned tweaks in order to `aggregated_key` yields the child
/// public key at `path`. Hardened steps cannot be derived from a public key.
pub fn derive_bip32_tweaks(
    aggregated_key: &PublicKey,
    chain_code: &[u8; 32],
    path: &str,
) -> Result<Vec<KeyTweak>> {
    let derivation_path: DerivationPath = path
        .parse()
        .map_err(|e| Error::Derivation(format!("Invalid path: {}", e)))?;

    let mut current_key = aggregated_key.to_projective();
    let mut current_chain_code = *chain_code;
    let mut tweaks = Vec::with_capacity(derivation_path.path().len());

    for child_index in derivation_path.path() {
        let index = match child_index {
            ChildIndex::Normal(idx) => *idx,
            ChildIndex::Hardened(_) => {
                return Err(Error::Derivation(
                    "Hardened derivation not supported for aggregated keys".into(),
                ));
            }
        };

        let (tweak, new_chain_code) =
            derive_non_hardened(&current_key, &current_chain_code, index)?;

        current_key += ProjectivePoint::GENERATOR * tweak.tweak;
        if current_key == ProjectivePoint::IDENTITY {
            return Err(Error::Derivation("Derived key is the point at infinity".into()));
        }
        current_chain_code = new_chain_code;
        tweaks.push(tweak);
    }

    Ok(tweaks)
}

/// One CKDpub step: `I = HMAC-SHA512(c, serP(K) || ser32(i))`.
fn derive_non_hardened(
    parent: &ProjectivePoint,
    chain_code: &[u8; 32],
    index: u32,
) -> Result<(KeyTweak, [u8; 32])> {
    let mut hmac = Hmac::<Sha512>::new_from_slice(chain_code)
        .map_err(|e| Error::Derivation(e.to_string()))?;

    hmac.update(parent.to_affine().to_encoded_point(true).as_bytes());
    hmac.update(&index.to_be_bytes());

    let result = hmac.finalize().into_bytes();

    let mut tweak_bytes = [0u8; 32];
    tweak_bytes.copy_from_slice(&result[..32]);
    let mut new_chain_code = [0u8; 32];
    new_chain_code.copy_from_slice(&result[32..]);

    let tweak = scalar_from_bytes(&tweak_bytes)
        .ok_or_else(|| Error::Derivation(format!("Invalid child at index {}", index)))?;

    Ok((KeyTweak::plain(tweak), new_chain_code))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{aggregate_keys, KeyAggOptions};
    use crate::types::lift_x;
    use crate::SecretKey;
    use rand::rngs::OsRng;

    #[test]
    fn test_taproot_tweak_applied_to_internal_key() {
        let keys: Vec<PublicKey> = (0..2)
            .map(|_| SecretKey::random(&mut OsRng).public_key())
            .collect();
        let opts = KeyAggOptions {
            taproot: Some(TaprootTweak::Bip86),
            ..Default::default()
        };
        let agg = aggregate_keys(&keys, true, &opts).unwrap();

        assert_eq!(agg.internal_key, agg.pre_tweaked_key);
        let tweak = taproot_tweak(&agg.internal_key, &TaprootTweak::Bip86).unwrap();
        let expected = lift_x(&agg.internal_key) + ProjectivePoint::GENERATOR * tweak.tweak;
        assert_eq!(agg.final_key.to_projective(), expected);
    }

    #[test]
    fn test_script_root_changes_output_key() {
        let key = SecretKey::random(&mut OsRng).public_key();
        let bip86 = taproot_tweak(&key, &TaprootTweak::Bip86).unwrap();
        let scripted = taproot_tweak(&key, &TaprootTweak::ScriptRoot([7u8; 32])).unwrap();
        assert_ne!(bip86, scripted);
        assert!(bip86.is_xonly && scripted.is_xonly);
    }

    #[test]
    fn test_bip32_tweaks_derive_child() {
        let keys: Vec<PublicKey> = (0..3)
            .map(|_| SecretKey::random(&mut OsRng).public_key())
            .collect();
        let agg = aggregate_keys(&keys, true, &KeyAggOptions::default()).unwrap();
        let chain_code = [0x11u8; 32];

        let tweaks = derive_bip32_tweaks(&agg.final_key, &chain_code, "m/0/7/42").unwrap();
        assert_eq!(tweaks.len(), 3);
        assert!(tweaks.iter().all(|t| !t.is_xonly));

        let derived = aggregate_keys(
            &keys,
            true,
            &KeyAggOptions {
                tweaks: tweaks.clone(),
                ..Default::default()
            },
        )
        .unwrap();

        let sum = tweaks.iter().fold(agg.final_key.to_projective(), |acc, t| {
            acc + ProjectivePoint::GENERATOR * t.tweak
        });
        assert_eq!(derived.final_key.to_projective(), sum);
    }

    #[test]
    fn test_bip32_rejects_hardened() {
        let key = SecretKey::random(&mut OsRng).public_key();
        let result = derive_bip32_tweaks(&key, &[0u8; 32], "m/0'/1");
        assert!(matches!(result, Err(Error::Derivation(_))));
    }
}
