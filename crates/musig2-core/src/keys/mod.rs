//! Key aggregation
//!
//! Combines a multiset of x-only public keys, with optional tweaks, into a
//! single aggregated key plus the bookkeeping signers and the combiner need
//! to sign against it.

mod tweak;

pub use tweak::{derive_bip32_tweaks, taproot_tweak};

use k256::{ProjectivePoint, Scalar};
use sha2::Digest;
use subtle::ConstantTimeEq;
use tracing::{debug, instrument};

use crate::hash::{self, tags};
use crate::types::{has_odd_y, lift_x, point_xonly, xonly_bytes, KeyTweak, TaprootTweak};
use crate::{Error, PublicKey, Result};

/// Optional precomputed inputs and tweaks for [`aggregate_keys`].
#[derive(Debug, Clone, Default)]
pub struct KeyAggOptions {
    /// Precomputed `KeyAgg list` hash of the (sorted) keys
    pub keys_hash: Option<[u8; 32]>,

    /// Precomputed second unique key index; `Some(None)` means all keys are equal
    pub unique_key_index: Option<Option<usize>>,

    /// Tweaks applied in order to the aggregated key
    pub tweaks: Vec<KeyTweak>,

    /// Taproot commitment applied after `tweaks`
    pub taproot: Option<TaprootTweak>,
}

/// One applied tweak and the running key it produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TweakStep {
    /// The tweak that was applied
    pub tweak: KeyTweak,
    /// Whether the running key was negated before adding the tweak
    pub negated: bool,
    /// Running key after this step
    pub key: PublicKey,
}

/// Output of key aggregation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateKey {
    /// Aggregated key after all tweaks
    pub final_key: PublicKey,

    /// Aggregated key before any tweak
    pub pre_tweaked_key: PublicKey,

    /// Key before the taproot tweak; equals `final_key` when none was applied
    pub internal_key: PublicKey,

    /// `KeyAgg list` hash of the (sorted) keys
    pub keys_hash: [u8; 32],

    /// Index of the second unique key, `None` when all keys are equal
    pub unique_key_index: Option<usize>,

    /// Net negation accumulated by x-only tweaks
    pub parity_acc: bool,

    /// Accumulated tweak, with the same sign corrections as the key
    pub tweak_acc: Scalar,

    /// Per-tweak running key snapshots
    pub tweak_steps: Vec<TweakStep>,

    second_key: Option<[u8; 32]>,
}

impl AggregateKey {
    /// Aggregation coefficient of `key` within this key set.
    pub fn coefficient(&self, key: &PublicKey) -> Scalar {
        coefficient_for(&self.keys_hash, self.second_key.as_ref(), key)
    }

    /// Whether any tweak was applied.
    pub fn is_tweaked(&self) -> bool {
        !self.tweak_steps.is_empty()
    }
}

/// Whether two keys are equal under their x-only serialization.
pub fn keys_equal(a: &PublicKey, b: &PublicKey) -> bool {
    xonly_bytes(a).ct_eq(&xonly_bytes(b)).into()
}

/// Return the keys in ascending order of their x-only serialization.
///
/// The sort is stable, so identical keys keep their relative order.
pub fn sort_keys(keys: &[PublicKey]) -> Vec<PublicKey> {
    let mut sorted = keys.to_vec();
    sorted.sort_by_key(xonly_bytes);
    sorted
}

/// `TaggedHash("KeyAgg list", pk_1 || ... || pk_n)` over the x-only keys.
pub fn key_hash_fingerprint(keys: &[PublicKey], sort: bool) -> [u8; 32] {
    let keys = sorted_if(keys, sort);

    let mut hasher = hash::tagged_hash(tags::KEYAGG_LIST);
    for key in keys.iter() {
        hasher.update(xonly_bytes(key));
    }
    hash::finalize(hasher)
}

/// Index of the first key that differs from the first key, if any.
pub fn second_unique_key_index(keys: &[PublicKey], sort: bool) -> Option<usize> {
    let keys = sorted_if(keys, sort);
    let first = keys.first()?;
    keys.iter().position(|key| !keys_equal(key, first))
}

/// Aggregation coefficient for `target` given the key list hash.
///
/// The key at `unique_key_index` gets coefficient one; every other key gets
/// `TaggedHash("KeyAgg coefficient", keys_hash || pk)`.
pub fn aggregation_coefficient(
    keys: &[PublicKey],
    target: &PublicKey,
    keys_hash: &[u8; 32],
    unique_key_index: Option<usize>,
) -> Scalar {
    let second_key = unique_key_index
        .and_then(|idx| keys.get(idx))
        .map(xonly_bytes);
    coefficient_for(keys_hash, second_key.as_ref(), target)
}

fn coefficient_for(
    keys_hash: &[u8; 32],
    second_key: Option<&[u8; 32]>,
    target: &PublicKey,
) -> Scalar {
    let target_bytes = xonly_bytes(target);
    if let Some(second) = second_key {
        if bool::from(second.ct_eq(&target_bytes)) {
            return Scalar::ONE;
        }
    }

    let mut hasher = hash::tagged_hash(tags::KEYAGG_COEFFICIENT);
    hasher.update(keys_hash);
    hasher.update(target_bytes);
    hash::hasher_to_scalar(hasher)
}

fn sorted_if(keys: &[PublicKey], sort: bool) -> std::borrow::Cow<'_, [PublicKey]> {
    if sort {
        std::borrow::Cow::Owned(sort_keys(keys))
    } else {
        std::borrow::Cow::Borrowed(keys)
    }
}

/// Aggregate `keys` into a single public key.
///
/// Keys are treated as x-only. With `should_sort` the result does not depend
/// on the input order. A key set whose keys are all equal is accepted; every
/// coefficient is then hash-derived.
#[instrument(skip(keys, opts), fields(n_keys = keys.len()))]
pub fn aggregate_keys(
    keys: &[PublicKey],
    should_sort: bool,
    opts: &KeyAggOptions,
) -> Result<AggregateKey> {
    if keys.is_empty() {
        return Err(Error::InvalidKeyData("Empty key set".into()));
    }

    let keys = sorted_if(keys, should_sort);

    // Sorting already happened above, so the helpers see the final order.
    let keys_hash = opts
        .keys_hash
        .unwrap_or_else(|| key_hash_fingerprint(&keys, false));
    let unique_key_index = opts
        .unique_key_index
        .unwrap_or_else(|| second_unique_key_index(&keys, false));
    if unique_key_index.is_none() {
        debug!("All keys are equal; no coefficient shortcut");
    }

    let second_key = unique_key_index
        .and_then(|idx| keys.get(idx))
        .map(xonly_bytes);

    let mut acc = ProjectivePoint::IDENTITY;
    for key in keys.iter() {
        let coefficient = coefficient_for(&keys_hash, second_key.as_ref(), key);
        acc += lift_x(key) * coefficient;
    }

    let pre_tweaked_key = to_public_key(&acc)
        .ok_or_else(|| Error::InvalidKeyData("Aggregated key is the point at infinity".into()))?;

    let mut parity_acc = false;
    let mut tweak_acc = Scalar::ZERO;
    let mut tweak_steps = Vec::with_capacity(opts.tweaks.len() + 1);

    for tweak in &opts.tweaks {
        let step = apply_tweak(&mut acc, &mut parity_acc, &mut tweak_acc, tweak)?;
        tweak_steps.push(step);
    }

    let internal_key = to_public_key(&acc)
        .ok_or_else(|| Error::InvalidTweak("Tweaked key is the point at infinity".into()))?;

    if let Some(taproot) = &opts.taproot {
        let tweak = taproot_tweak(&internal_key, taproot)?;
        let step = apply_tweak(&mut acc, &mut parity_acc, &mut tweak_acc, &tweak)?;
        tweak_steps.push(step);
    }

    let final_key = to_public_key(&acc)
        .ok_or_else(|| Error::InvalidTweak("Tweaked key is the point at infinity".into()))?;

    debug!(
        final_key = hex::encode(xonly_bytes(&final_key)),
        n_tweaks = tweak_steps.len(),
        "Aggregated keys"
    );

    Ok(AggregateKey {
        final_key,
        pre_tweaked_key,
        internal_key,
        keys_hash,
        unique_key_index,
        parity_acc,
        tweak_acc,
        tweak_steps,
        second_key,
    })
}

/// Apply one tweak: `Q' = g*Q + t*G`, `gacc' = g*gacc`, `tacc' = t + g*tacc`,
/// where `g = -1` only for an x-only tweak on an odd-y key.
fn apply_tweak(
    acc: &mut ProjectivePoint,
    parity_acc: &mut bool,
    tweak_acc: &mut Scalar,
    tweak: &KeyTweak,
) -> Result<TweakStep> {
    let negated = tweak.is_xonly && bool::from(has_odd_y(acc));
    if negated {
        *acc = -*acc;
        *tweak_acc = -*tweak_acc;
        *parity_acc = !*parity_acc;
    }

    *acc += ProjectivePoint::GENERATOR * tweak.tweak;
    *tweak_acc += tweak.tweak;

    let key = to_public_key(acc)
        .ok_or_else(|| Error::InvalidTweak("Tweaked key is the point at infinity".into()))?;

    debug!(
        is_xonly = tweak.is_xonly,
        negated,
        key = hex::encode(point_xonly(acc)),
        "Applied tweak"
    );

    Ok(TweakStep {
        tweak: *tweak,
        negated,
        key,
    })
}

fn to_public_key(point: &ProjectivePoint) -> Option<PublicKey> {
    PublicKey::from_affine(point.to_affine()).ok()
}
