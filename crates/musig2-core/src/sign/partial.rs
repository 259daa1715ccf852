//! Partial signature generation and verification

use k256::{ProjectivePoint, Scalar};
use tracing::{debug, instrument};
use zeroize::Zeroizing;

use super::{PartialSignature, SignOptions};
use crate::keys::{aggregate_keys, keys_equal, sort_keys, AggregateKey};
use crate::nonce::{challenge, effective_nonce, nonce_coefficient, PublicNonce, SecretNonce};
use crate::types::{has_odd_y, lift_x, point_xonly, Message};
use crate::{Error, PublicKey, Result, SecretKey};

/// Produce this signer's partial signature.
///
/// The secret nonce is taken by value and wiped before this function
/// returns, on success and on every error path.
///
/// # Arguments
/// * `secret_nonce` - Local secret nonce, consumed
/// * `private_key` - Local signing key
/// * `combined_nonce` - Sum of all signers' public nonces
/// * `key_set` - Every co-signer's public key, including ours
/// * `message` - Digest being signed
/// * `opts` - Sorting, precomputed aggregation data and tweaks
#[instrument(skip_all, fields(n_keys = key_set.len()))]
pub fn sign(
    secret_nonce: SecretNonce,
    private_key: &SecretKey,
    combined_nonce: &PublicNonce,
    key_set: &[PublicKey],
    message: &Message,
    opts: &SignOptions,
) -> Result<PartialSignature> {
    let public_key = private_key.public_key();
    let signer_index = signer_position(key_set, &public_key, opts.sort)?;

    let aggregate = aggregate_keys(key_set, opts.sort, &opts.key_agg)?;

    sign_with_aggregate(
        secret_nonce,
        private_key,
        combined_nonce,
        &aggregate,
        message,
        signer_index,
        opts.fast_sign,
    )
}

/// Sign against precomputed aggregation data.
pub(crate) fn sign_with_aggregate(
    secret_nonce: SecretNonce,
    private_key: &SecretKey,
    combined_nonce: &PublicNonce,
    aggregate: &AggregateKey,
    message: &Message,
    signer_index: usize,
    fast_sign: bool,
) -> Result<PartialSignature> {
    let public_key = private_key.public_key();
    let our_nonce = secret_nonce.public_nonce();

    let b = nonce_coefficient(combined_nonce, &aggregate.final_key, message);
    let r = effective_nonce(combined_nonce, &b);

    // Normalize the nonce to even y; the combiner only sees R.x.
    let nonce_negated = bool::from(has_odd_y(&r));
    let (k1, k2) = if nonce_negated {
        (
            Zeroizing::new(-secret_nonce.k1),
            Zeroizing::new(-secret_nonce.k2),
        )
    } else {
        (
            Zeroizing::new(secret_nonce.k1),
            Zeroizing::new(secret_nonce.k2),
        )
    };
    drop(secret_nonce);

    let e = challenge(&r, &aggregate.final_key, message);
    let a = aggregate.coefficient(&public_key);
    let d = Zeroizing::new(signing_scalar(private_key, aggregate));

    let s = *k1 + b * *k2 + e * a * *d;
    let partial = PartialSignature::new(s, Some(r));

    debug!(
        r = hex::encode(point_xonly(&r)),
        nonce_negated,
        "Created partial signature"
    );

    if !fast_sign {
        verify_partial_with_aggregate(
            &partial,
            &our_nonce,
            &public_key,
            combined_nonce,
            aggregate,
            message,
            signer_index,
        )?;
    }

    Ok(partial)
}

/// Verify one signer's partial signature against their public nonce and key.
///
/// Fails with [`Error::InvalidPartialSignature`] carrying the signer's
/// position in the (sorted, if requested) key set.
pub fn verify_partial(
    partial: &PartialSignature,
    signer_nonce: &PublicNonce,
    signer_key: &PublicKey,
    combined_nonce: &PublicNonce,
    key_set: &[PublicKey],
    message: &Message,
    opts: &SignOptions,
) -> Result<()> {
    let signer_index = signer_position(key_set, signer_key, opts.sort)?;
    let aggregate = aggregate_keys(key_set, opts.sort, &opts.key_agg)?;

    verify_partial_with_aggregate(
        partial,
        signer_nonce,
        signer_key,
        combined_nonce,
        &aggregate,
        message,
        signer_index,
    )
}

/// Check `s_i*G == R_i + e*a_i*g*P_i`, with `R_i` parity-normalized like `R`.
pub(crate) fn verify_partial_with_aggregate(
    partial: &PartialSignature,
    signer_nonce: &PublicNonce,
    signer_key: &PublicKey,
    combined_nonce: &PublicNonce,
    aggregate: &AggregateKey,
    message: &Message,
    signer_index: usize,
) -> Result<()> {
    let b = nonce_coefficient(combined_nonce, &aggregate.final_key, message);
    let r = effective_nonce(combined_nonce, &b);

    let mut r_i = signer_nonce.r1 + signer_nonce.r2 * b;
    if bool::from(has_odd_y(&r)) {
        r_i = -r_i;
    }

    let e = challenge(&r, &aggregate.final_key, message);
    let a = aggregate.coefficient(signer_key);

    let mut p_i = lift_x(signer_key);
    if key_negated(aggregate) {
        p_i = -p_i;
    }

    let lhs = ProjectivePoint::GENERATOR * partial.s;
    let rhs = r_i + p_i * (e * a);
    if lhs != rhs {
        return Err(Error::InvalidPartialSignature {
            index: signer_index,
        });
    }
    Ok(())
}

/// Private key with every sign correction applied: the x-only lift of our
/// own key, the final key's parity and the tweak parity accumulator.
fn signing_scalar(private_key: &SecretKey, aggregate: &AggregateKey) -> Scalar {
    let d: Scalar = *private_key.to_nonzero_scalar();
    let own_odd = bool::from(has_odd_y(&private_key.public_key().to_projective()));
    if own_odd ^ key_negated(aggregate) {
        -d
    } else {
        d
    }
}

/// Whether `g * gacc == -1` for the aggregated key.
fn key_negated(aggregate: &AggregateKey) -> bool {
    bool::from(has_odd_y(&aggregate.final_key.to_projective())) ^ aggregate.parity_acc
}

fn signer_position(key_set: &[PublicKey], key: &PublicKey, sort: bool) -> Result<usize> {
    let keys = if sort {
        sort_keys(key_set)
    } else {
        key_set.to_vec()
    };
    keys.iter()
        .position(|k| keys_equal(k, key))
        .ok_or(Error::SignerNotInKeySet)
}
