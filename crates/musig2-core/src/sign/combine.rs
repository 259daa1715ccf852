//! Partial signature combination

use k256::{ProjectivePoint, Scalar};
use tracing::{debug, warn};

use super::PartialSignature;
use crate::keys::AggregateKey;
use crate::nonce::challenge;
use crate::types::{has_odd_y, point_xonly, Message, Signature};
use crate::{Error, Result};

/// Tweak data needed to finish a signature under a tweaked key.
#[derive(Debug, Clone)]
pub struct TweakedCombine {
    /// Message that was signed
    pub message: Message,
    /// Aggregation output carrying the final key and tweak accumulators
    pub aggregate: AggregateKey,
}

/// Options for [`combine_partial_signatures`].
#[derive(Debug, Clone, Default)]
pub struct CombineOptions {
    /// Present when the aggregated key was tweaked
    pub tweaked: Option<TweakedCombine>,
}

/// Sum partial signatures into a BIP-340 signature `(R.x, s)`.
///
/// With a tweaked key the correction `e*g*tacc` is added exactly once.
/// No verification is performed here; see [`combine_and_verify`].
pub fn combine_partial_signatures(
    final_nonce: &ProjectivePoint,
    partials: &[PartialSignature],
    opts: &CombineOptions,
) -> Signature {
    let mut s = partials
        .iter()
        .fold(Scalar::ZERO, |acc, partial| acc + partial.s);

    if let Some(tweaked) = &opts.tweaked {
        let aggregate = &tweaked.aggregate;
        let e = challenge(final_nonce, &aggregate.final_key, &tweaked.message);
        let mut g_tacc = aggregate.tweak_acc;
        if bool::from(has_odd_y(&aggregate.final_key.to_projective())) {
            g_tacc = -g_tacc;
        }
        s += e * g_tacc;
    }

    debug!(n_partials = partials.len(), "Combined partial signatures");
    Signature::new(point_xonly(final_nonce), s.to_bytes().into())
}

/// Combine and check the result against the aggregated key.
pub fn combine_and_verify(
    final_nonce: &ProjectivePoint,
    partials: &[PartialSignature],
    message: &Message,
    aggregate: &AggregateKey,
) -> Result<Signature> {
    let opts = CombineOptions {
        tweaked: aggregate.is_tweaked().then(|| TweakedCombine {
            message: *message,
            aggregate: aggregate.clone(),
        }),
    };
    let signature = combine_partial_signatures(final_nonce, partials, &opts);

    if !signature.verify(message, &aggregate.final_key) {
        warn!("Combined signature failed verification");
        return Err(Error::FinalSignatureInvalid);
    }
    Ok(signature)
}
