//! Signing context for a fixed co-signer set

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::keys::{aggregate_keys, keys_equal, sort_keys, AggregateKey, KeyAggOptions};
use crate::types::{xonly_bytes, KeyTweak, TaprootTweak};
use crate::{Error, PublicKey, Result, SecretKey};

/// Tweaks applied to every session built from a [`Context`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextOptions {
    /// Tweaks applied in order to the aggregated key
    #[serde(default)]
    pub tweaks: Vec<KeyTweak>,

    /// Taproot commitment applied after `tweaks`
    #[serde(default)]
    pub taproot: Option<TaprootTweak>,
}

/// Immutable signing context: our key, the co-signer set and the
/// precomputed aggregation data.
///
/// Built once per co-signer set and shared read-only by any number of
/// [`Session`](super::Session)s.
pub struct Context {
    signing_key: SecretKey,
    public_key: PublicKey,
    signers: Vec<PublicKey>,
    signer_index: usize,
    should_sort: bool,
    opts: ContextOptions,
    aggregate: AggregateKey,
}

impl Context {
    /// Build a context for `signing_key` within `signers`.
    ///
    /// Fails with [`Error::SignerNotInKeySet`] before doing any aggregation
    /// work if our public key is not among `signers`.
    #[instrument(skip(signing_key, signers, opts), fields(n_signers = signers.len()))]
    pub fn new(
        signing_key: SecretKey,
        signers: Vec<PublicKey>,
        should_sort: bool,
        opts: ContextOptions,
    ) -> Result<Self> {
        if signers.is_empty() {
            return Err(Error::InvalidKeyData("Empty signer set".into()));
        }

        let public_key = signing_key.public_key();
        if !signers.iter().any(|key| keys_equal(key, &public_key)) {
            return Err(Error::SignerNotInKeySet);
        }

        let signers = if should_sort {
            sort_keys(&signers)
        } else {
            signers
        };
        let signer_index = signers
            .iter()
            .position(|key| keys_equal(key, &public_key))
            .ok_or(Error::SignerNotInKeySet)?;

        let key_agg = KeyAggOptions {
            tweaks: opts.tweaks.clone(),
            taproot: opts.taproot,
            ..Default::default()
        };
        let aggregate = aggregate_keys(&signers, false, &key_agg)?;

        info!(
            public_key = hex::encode(xonly_bytes(&public_key)),
            aggregated_key = hex::encode(xonly_bytes(&aggregate.final_key)),
            signer_index,
            "Signing context ready"
        );

        Ok(Self {
            signing_key,
            public_key,
            signers,
            signer_index,
            should_sort,
            opts,
            aggregate,
        })
    }

    /// Aggregated key after all tweaks; the key the final signature verifies under.
    pub fn aggregated_key(&self) -> &PublicKey {
        &self.aggregate.final_key
    }

    /// Key before the taproot tweak, if one was requested.
    pub fn internal_key(&self) -> &PublicKey {
        &self.aggregate.internal_key
    }

    /// Our public key.
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// The co-signer set, in aggregation order.
    pub fn signing_keys(&self) -> &[PublicKey] {
        &self.signers
    }

    /// Our position in [`Context::signing_keys`].
    pub fn signer_index(&self) -> usize {
        self.signer_index
    }

    /// `KeyAgg list` hash of the co-signer set.
    pub fn keys_hash(&self) -> &[u8; 32] {
        &self.aggregate.keys_hash
    }

    /// Index of the second unique key, `None` when all keys are equal.
    pub fn unique_key_index(&self) -> Option<usize> {
        self.aggregate.unique_key_index
    }

    /// Number of signers, counting repeated keys.
    pub fn num_signers(&self) -> usize {
        self.signers.len()
    }

    /// Whether the signer set was sorted before aggregation.
    pub fn should_sort(&self) -> bool {
        self.should_sort
    }

    /// Explicit tweaks, in application order.
    pub fn tweaks(&self) -> &[KeyTweak] {
        &self.opts.tweaks
    }

    /// Taproot commitment applied after the explicit tweaks, if any.
    pub fn taproot(&self) -> Option<&TaprootTweak> {
        self.opts.taproot.as_ref()
    }

    /// Full key aggregation output.
    pub fn aggregate(&self) -> &AggregateKey {
        &self.aggregate
    }

    pub(crate) fn signing_key(&self) -> &SecretKey {
        &self.signing_key
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("public_key", &hex::encode(xonly_bytes(&self.public_key)))
            .field("num_signers", &self.signers.len())
            .field("signer_index", &self.signer_index)
            .field("should_sort", &self.should_sort)
            .field("aggregate", &self.aggregate)
            .finish_non_exhaustive()
    }
}
