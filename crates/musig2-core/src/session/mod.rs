//! Signing sessions
//!
//! A [`Session`] drives one message through the two MuSig2 rounds:
//!
//! 1. Exchange public nonces ([`Session::public_nonce`],
//!    [`Session::register_public_nonce`])
//! 2. Sign locally ([`Session::sign`]), exchange partial signatures and
//!    combine them ([`Session::combine_sig`])
//!
//! A session is single use. After it produces a final signature, or hits a
//! fatal error, it must be dropped and a new one created from the
//! [`Context`].

mod context;
mod state;

pub use context::{Context, ContextOptions};
pub use state::{NonceRegistration, SessionState};

use k256::ProjectivePoint;
use rand::rngs::OsRng;
use tracing::{debug, info, instrument, warn};
use zeroize::Zeroize;

use crate::keys::keys_equal;
use crate::nonce::{
    aggregate_nonces, effective_nonce, generate_nonce_with, nonce_coefficient, NonceGenOptions,
    NoncePair, PublicNonce, SecretNonce,
};
use crate::sign::{
    combine_and_verify, sign_with_aggregate, verify_partial_with_aggregate, PartialSignature,
};
use crate::types::{point_xonly, Message, Signature};
use crate::{Error, PublicKey, Result};
use state::Event;

/// One signing run over a [`Context`].
///
/// Not safe for concurrent use; confine it to one thread or lock it.
pub struct Session<'ctx> {
    ctx: &'ctx Context,
    state: SessionState,

    local_nonce: Option<SecretNonce>,
    public_nonce: PublicNonce,
    public_nonces: Vec<PublicNonce>,
    combined_nonce: Option<PublicNonce>,

    message: Option<Message>,
    final_nonce: Option<ProjectivePoint>,
    our_sig: Option<PartialSignature>,
    partial_sigs: Vec<PartialSignature>,
    final_sig: Option<Signature>,
}

impl<'ctx> Session<'ctx> {
    /// Start a session with a freshly generated nonce.
    pub fn new(ctx: &'ctx Context) -> Result<Self> {
        let opts = NonceGenOptions {
            public_key: Some(*ctx.public_key()),
            secret_key: Some(ctx.signing_key()),
            aggregated_key: Some(*ctx.aggregated_key()),
            ..Default::default()
        };
        let nonce = generate_nonce_with(&mut OsRng, &opts)?;
        Self::with_nonce(ctx, nonce)
    }

    /// Start a session with a caller-generated nonce.
    ///
    /// The nonce must never have been used before.
    pub fn with_nonce(ctx: &'ctx Context, nonce: NoncePair) -> Result<Self> {
        let mut session = Self {
            ctx,
            state: SessionState::AwaitingNonces,
            local_nonce: Some(nonce.secret),
            public_nonce: nonce.public,
            public_nonces: Vec::with_capacity(ctx.num_signers()),
            combined_nonce: None,
            message: None,
            final_nonce: None,
            our_sig: None,
            partial_sigs: Vec::with_capacity(ctx.num_signers()),
            final_sig: None,
        };

        session.register_public_nonce(nonce.public)?;
        Ok(session)
    }

    /// Our public nonce, to send to every other signer.
    pub fn public_nonce(&self) -> &PublicNonce {
        &self.public_nonce
    }

    /// Current protocol state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The context this session signs for.
    pub fn context(&self) -> &'ctx Context {
        self.ctx
    }

    /// Nonces registered so far, ours included.
    pub fn num_registered_nonces(&self) -> usize {
        self.public_nonces.len()
    }

    /// Partial signatures held so far, ours included once produced.
    pub fn num_registered_sigs(&self) -> usize {
        self.partial_sigs.len()
    }

    /// Sum of every signer's public nonce, once all have arrived.
    pub fn combined_nonce(&self) -> Option<&PublicNonce> {
        self.combined_nonce.as_ref()
    }

    /// Message bound by [`Session::sign`].
    pub fn message(&self) -> Option<&Message> {
        self.message.as_ref()
    }

    /// Our partial signature, to send to every other signer.
    pub fn our_partial_sig(&self) -> Option<&PartialSignature> {
        self.our_sig.as_ref()
    }

    /// The verified final signature, once combined.
    pub fn final_sig(&self) -> Option<&Signature> {
        self.final_sig.as_ref()
    }

    /// Register a signer's public nonce.
    ///
    /// Nonces are counted, not matched to signers: the round completes when
    /// as many nonces as signers have arrived. Nonces arriving after that
    /// are ignored.
    pub fn register_public_nonce(&mut self, nonce: PublicNonce) -> Result<NonceRegistration> {
        if self.combined_nonce.is_some() {
            warn!("Ignoring public nonce received after the nonce round completed");
            return Ok(NonceRegistration::AlreadyComplete);
        }

        if nonce.r1 == ProjectivePoint::IDENTITY || nonce.r2 == ProjectivePoint::IDENTITY {
            return Err(Error::InvalidNonce("Nonce point at infinity".into()));
        }
        if self.public_nonces.contains(&nonce) {
            warn!(
                r1 = hex::encode(point_xonly(&nonce.r1)),
                "Registered a public nonce identical to an earlier one"
            );
        }

        self.public_nonces.push(nonce);
        let remaining = self.ctx.num_signers() - self.public_nonces.len();
        if remaining > 0 {
            debug!(remaining, "Registered public nonce");
            return Ok(NonceRegistration::Pending(remaining));
        }

        let combined = aggregate_nonces(&self.public_nonces)?;
        self.combined_nonce = Some(combined);
        self.transition(Event::NoncesComplete);

        info!(n_nonces = self.public_nonces.len(), "Nonce round complete");
        Ok(NonceRegistration::Complete)
    }

    /// Produce our partial signature over `message`.
    ///
    /// Consumes the secret nonce. A second call fails with
    /// [`Error::SigningContextReuse`] and leaves the first signature intact.
    /// If every other partial signature is already held, this also combines
    /// the final signature.
    #[instrument(skip(self, message), fields(signer_index = self.ctx.signer_index()))]
    pub fn sign(&mut self, message: &Message) -> Result<PartialSignature> {
        if self.local_nonce.is_none() {
            return Err(Error::SigningContextReuse);
        }
        let combined = self.combined_nonce.ok_or(Error::CombinedNonceUnavailable)?;
        let secret_nonce = self.consume_nonce()?;

        let ctx = self.ctx;
        let aggregate = ctx.aggregate();
        let partial = match sign_with_aggregate(
            secret_nonce,
            ctx.signing_key(),
            &combined,
            aggregate,
            message,
            ctx.signer_index(),
            false,
        ) {
            Ok(partial) => partial,
            Err(e) => {
                self.transition(Event::Fatal);
                return Err(e);
            }
        };

        let b = nonce_coefficient(&combined, &aggregate.final_key, message);
        self.final_nonce = Some(effective_nonce(&combined, &b));
        self.message = Some(*message);
        self.our_sig = Some(partial);
        self.partial_sigs.push(partial);
        self.transition(Event::Signed);

        info!(
            n_sigs = self.partial_sigs.len(),
            n_signers = ctx.num_signers(),
            "Created local partial signature"
        );

        if self.partial_sigs.len() == ctx.num_signers() {
            self.combine()?;
        }
        Ok(partial)
    }

    /// Register another signer's partial signature.
    ///
    /// Returns `true` once the final signature has been combined and
    /// verified. Signatures may arrive before we sign; one slot stays
    /// reserved for our own.
    #[instrument(skip_all, fields(n_sigs = self.partial_sigs.len()))]
    pub fn combine_sig(&mut self, partial: PartialSignature) -> Result<bool> {
        let reserved = usize::from(self.our_sig.is_none());
        if self.state.is_terminal()
            || self.partial_sigs.len() + reserved >= self.ctx.num_signers()
        {
            return Err(Error::AlreadyHaveAllSigs);
        }

        self.partial_sigs.push(partial);
        debug!(n_sigs = self.partial_sigs.len(), "Registered partial signature");

        if self.our_sig.is_some() && self.partial_sigs.len() == self.ctx.num_signers() {
            self.combine()?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Check one signer's partial signature against their public nonce.
    ///
    /// Lets a caller attribute a [`Error::FinalSignatureInvalid`] to a
    /// specific signer when it knows who sent which nonce.
    pub fn verify_partial_sig(
        &self,
        partial: &PartialSignature,
        signer_nonce: &PublicNonce,
        signer_key: &PublicKey,
        message: &Message,
    ) -> Result<()> {
        let combined = self
            .combined_nonce
            .as_ref()
            .ok_or(Error::CombinedNonceUnavailable)?;
        let signer_index = self
            .ctx
            .signing_keys()
            .iter()
            .position(|key| keys_equal(key, signer_key))
            .ok_or(Error::SignerNotInKeySet)?;

        verify_partial_with_aggregate(
            partial,
            signer_nonce,
            signer_key,
            combined,
            self.ctx.aggregate(),
            message,
            signer_index,
        )
    }

    /// Move the secret nonce out, wiping the session's slot in place.
    fn consume_nonce(&mut self) -> Result<SecretNonce> {
        let secret_nonce = match self.local_nonce.as_ref() {
            Some(nonce) => SecretNonce {
                k1: nonce.k1,
                k2: nonce.k2,
            },
            None => return Err(Error::SigningContextReuse),
        };
        self.local_nonce.zeroize();
        Ok(secret_nonce)
    }

    fn combine(&mut self) -> Result<()> {
        let (Some(final_nonce), Some(message)) = (self.final_nonce, self.message) else {
            return Err(Error::CombinedNonceUnavailable);
        };

        match combine_and_verify(
            &final_nonce,
            &self.partial_sigs,
            &message,
            self.ctx.aggregate(),
        ) {
            Ok(signature) => {
                info!(
                    r = hex::encode(signature.r),
                    s = hex::encode(signature.s),
                    "Final signature combined"
                );
                self.final_sig = Some(signature);
                self.transition(Event::SignaturesComplete);
                Ok(())
            }
            Err(e) => {
                self.transition(Event::Fatal);
                Err(e)
            }
        }
    }

    fn transition(&mut self, event: Event) {
        match self.state.next(event) {
            Some(next) => {
                debug!(from = %self.state, to = %next, "Session state transition");
                self.state = next;
            }
            None => {
                debug!(state = %self.state, ?event, "Ignored session event");
            }
        }
    }
}

impl std::fmt::Debug for Session<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("has_nonce", &self.local_nonce.is_some())
            .field("n_nonces", &self.public_nonces.len())
            .field("n_sigs", &self.partial_sigs.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nonce::generate_nonce;
    use crate::types::{has_odd_y, xonly_bytes, KeyTweak, TaprootTweak};
    use crate::SecretKey;
    use k256::elliptic_curve::Field;
    use k256::{schnorr, Scalar};
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn contexts(n: usize, seed: u64, opts: ContextOptions) -> Vec<Context> {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let keys: Vec<SecretKey> = (0..n).map(|_| SecretKey::random(&mut rng)).collect();
        let signers: Vec<PublicKey> = keys.iter().map(|k| k.public_key()).collect();

        keys.into_iter()
            .map(|key| Context::new(key, signers.clone(), true, opts.clone()).unwrap())
            .collect()
    }

    fn exchange_nonces(sessions: &mut [Session<'_>]) {
        let nonces: Vec<PublicNonce> = sessions.iter().map(|s| *s.public_nonce()).collect();
        for (i, session) in sessions.iter_mut().enumerate() {
            for (j, nonce) in nonces.iter().enumerate() {
                if i != j {
                    session.register_public_nonce(*nonce).unwrap();
                }
            }
            assert_eq!(session.state(), SessionState::NonceComplete);
        }
    }

    fn run_to_completion(sessions: &mut [Session<'_>], message: &Message) -> Vec<Signature> {
        exchange_nonces(sessions);

        let partials: Vec<PartialSignature> = sessions
            .iter_mut()
            .map(|s| s.sign(message).unwrap())
            .collect();

        for (i, session) in sessions.iter_mut().enumerate() {
            for (j, partial) in partials.iter().enumerate() {
                if i != j {
                    session.combine_sig(*partial).unwrap();
                }
            }
            assert_eq!(session.state(), SessionState::Combined);
        }

        sessions.iter().map(|s| *s.final_sig().unwrap()).collect()
    }

    fn schnorr_verify(key: &PublicKey, message: &Message, signature: &Signature) -> bool {
        let verifying_key = schnorr::VerifyingKey::from_bytes(&xonly_bytes(key)).unwrap();
        let signature = schnorr::Signature::try_from(&signature.to_bytes()[..]).unwrap();
        verifying_key.verify_raw(message, &signature).is_ok()
    }

    fn raw_bytes<T>(value: &T) -> Vec<u8> {
        // SAFETY: reads exactly size_of::<T>() bytes of a live value.
        unsafe {
            std::slice::from_raw_parts(value as *const T as *const u8, std::mem::size_of::<T>())
        }
        .to_vec()
    }

    fn nonce_patterns(session: &Session<'_>) -> [Vec<u8>; 2] {
        let nonce = session.local_nonce.as_ref().unwrap();
        [raw_bytes(&nonce.k1), raw_bytes(&nonce.k2)]
    }

    fn assert_nonce_slot_wiped(session: &Session<'_>, patterns: &[Vec<u8>; 2]) {
        assert!(session.local_nonce.is_none());
        let slot = raw_bytes(&session.local_nonce);
        for pattern in patterns {
            assert!(slot.windows(pattern.len()).all(|w| w != pattern.as_slice()));
        }
    }

    #[test]
    fn test_two_party_signing() {
        tracing_subscriber::fmt().with_test_writer().try_init().ok();

        let ctxs = contexts(2, 1, ContextOptions::default());
        let mut sessions: Vec<Session<'_>> =
            ctxs.iter().map(|c| Session::new(c).unwrap()).collect();
        let message = [0xabu8; 32];

        let sigs = run_to_completion(&mut sessions, &message);
        assert_eq!(sigs[0], sigs[1]);
        assert!(schnorr_verify(ctxs[0].aggregated_key(), &message, &sigs[0]));
    }

    #[test]
    fn test_three_party_tweaked_signing() {
        let opts = ContextOptions {
            tweaks: vec![
                KeyTweak::xonly(Scalar::random(&mut rand::rngs::OsRng)),
                KeyTweak::plain(Scalar::random(&mut rand::rngs::OsRng)),
            ],
            taproot: Some(TaprootTweak::ScriptRoot([0x5au8; 32])),
        };
        let ctxs = contexts(3, 2, opts);
        let mut sessions: Vec<Session<'_>> =
            ctxs.iter().map(|c| Session::new(c).unwrap()).collect();
        let message = [0x11u8; 32];

        let sigs = run_to_completion(&mut sessions, &message);
        assert!(sigs.iter().all(|s| *s == sigs[0]));
        assert!(schnorr_verify(ctxs[2].aggregated_key(), &message, &sigs[0]));
        assert!(!schnorr_verify(ctxs[2].internal_key(), &message, &sigs[0]));
    }

    #[test]
    fn test_single_signer_session() {
        let ctxs = contexts(1, 3, ContextOptions::default());
        let mut session = Session::new(&ctxs[0]).unwrap();
        assert_eq!(session.state(), SessionState::NonceComplete);

        let message = [7u8; 32];
        session.sign(&message).unwrap();
        assert_eq!(session.state(), SessionState::Combined);
        let signature = session.final_sig().unwrap();
        assert!(signature.verify(&message, ctxs[0].aggregated_key()));
    }

    #[test]
    fn test_sign_twice_is_reuse() {
        let ctxs = contexts(2, 4, ContextOptions::default());
        let mut sessions: Vec<Session<'_>> =
            ctxs.iter().map(|c| Session::new(c).unwrap()).collect();
        exchange_nonces(&mut sessions);

        let message = [1u8; 32];
        let first = sessions[0].sign(&message).unwrap();
        let second = sessions[0].sign(&[2u8; 32]);

        assert_eq!(second, Err(Error::SigningContextReuse));
        assert!(Error::SigningContextReuse.is_fatal());
        assert_eq!(sessions[0].our_partial_sig(), Some(&first));
        assert_eq!(sessions[0].message(), Some(&message));
    }

    #[test]
    fn test_sign_before_nonce_round() {
        let ctxs = contexts(2, 5, ContextOptions::default());
        let other = Session::new(&ctxs[1]).unwrap();
        let mut session = Session::new(&ctxs[0]).unwrap();

        let message = [3u8; 32];
        assert_eq!(session.sign(&message), Err(Error::CombinedNonceUnavailable));

        // The nonce survives a premature sign attempt.
        session.register_public_nonce(*other.public_nonce()).unwrap();
        assert!(session.sign(&message).is_ok());
    }

    #[test]
    fn test_late_nonce_is_ignored() {
        let ctxs = contexts(2, 6, ContextOptions::default());
        let mut sessions: Vec<Session<'_>> =
            ctxs.iter().map(|c| Session::new(c).unwrap()).collect();
        exchange_nonces(&mut sessions);

        let combined = *sessions[0].combined_nonce().unwrap();
        let late = generate_nonce().unwrap().public;
        assert_eq!(
            sessions[0].register_public_nonce(late),
            Ok(NonceRegistration::AlreadyComplete)
        );
        assert_eq!(sessions[0].num_registered_nonces(), 2);
        assert_eq!(sessions[0].combined_nonce(), Some(&combined));
    }

    #[test]
    fn test_duplicate_nonce_is_counted() {
        let ctxs = contexts(3, 7, ContextOptions::default());
        let mut session = Session::new(&ctxs[0]).unwrap();
        let nonce = generate_nonce().unwrap().public;

        assert_eq!(
            session.register_public_nonce(nonce),
            Ok(NonceRegistration::Pending(1))
        );
        assert_eq!(
            session.register_public_nonce(nonce),
            Ok(NonceRegistration::Complete)
        );
    }

    #[test]
    fn test_excess_partial_signatures_rejected() {
        let ctxs = contexts(2, 8, ContextOptions::default());
        let mut sessions: Vec<Session<'_>> =
            ctxs.iter().map(|c| Session::new(c).unwrap()).collect();
        let message = [9u8; 32];
        run_to_completion(&mut sessions, &message);

        let final_sig = *sessions[0].final_sig().unwrap();
        let extra = *sessions[1].our_partial_sig().unwrap();
        assert_eq!(sessions[0].combine_sig(extra), Err(Error::AlreadyHaveAllSigs));
        assert_eq!(sessions[0].final_sig(), Some(&final_sig));
        assert_eq!(sessions[0].num_registered_sigs(), 2);
    }

    #[test]
    fn test_signatures_before_local_sign() {
        let ctxs = contexts(3, 9, ContextOptions::default());
        let mut sessions: Vec<Session<'_>> =
            ctxs.iter().map(|c| Session::new(c).unwrap()).collect();
        exchange_nonces(&mut sessions);
        let message = [4u8; 32];

        let p1 = sessions[1].sign(&message).unwrap();
        let p2 = sessions[2].sign(&message).unwrap();

        assert_eq!(sessions[0].combine_sig(p1), Ok(false));
        assert_eq!(sessions[0].combine_sig(p2), Ok(false));
        // Our own slot is reserved.
        assert_eq!(sessions[0].combine_sig(p2), Err(Error::AlreadyHaveAllSigs));

        sessions[0].sign(&message).unwrap();
        assert_eq!(sessions[0].state(), SessionState::Combined);
        assert!(sessions[0]
            .final_sig()
            .unwrap()
            .verify(&message, ctxs[0].aggregated_key()));
    }

    #[test]
    fn test_corrupted_partial_signature() {
        let ctxs = contexts(2, 10, ContextOptions::default());
        let mut sessions: Vec<Session<'_>> =
            ctxs.iter().map(|c| Session::new(c).unwrap()).collect();
        exchange_nonces(&mut sessions);
        let message = [5u8; 32];

        let peer_nonce = *sessions[1].public_nonce();
        sessions[0].sign(&message).unwrap();
        let mut bad = sessions[1].sign(&message).unwrap();
        bad.s += Scalar::ONE;

        let result = sessions[0].combine_sig(bad);
        assert_eq!(result, Err(Error::FinalSignatureInvalid));
        assert!(Error::FinalSignatureInvalid.is_fatal());
        assert_eq!(sessions[0].state(), SessionState::Failed);
        assert_eq!(sessions[0].final_sig(), None);

        let peer_index = ctxs[1].signer_index();
        assert_eq!(
            sessions[0].verify_partial_sig(&bad, &peer_nonce, ctxs[1].public_key(), &message),
            Err(Error::InvalidPartialSignature { index: peer_index })
        );
        assert_eq!(sessions[0].combine_sig(bad), Err(Error::AlreadyHaveAllSigs));
    }

    #[test]
    fn test_nonce_slot_wiped_after_sign() {
        let ctxs = contexts(1, 11, ContextOptions::default());
        let mut session = Session::new(&ctxs[0]).unwrap();
        let patterns = nonce_patterns(&session);

        session.sign(&[6u8; 32]).unwrap();
        assert_nonce_slot_wiped(&session, &patterns);
    }

    #[test]
    fn test_nonce_slot_wiped_when_sign_fails() {
        let ctxs = contexts(2, 12, ContextOptions::default());
        let mut sessions: Vec<Session<'_>> =
            ctxs.iter().map(|c| Session::new(c).unwrap()).collect();
        exchange_nonces(&mut sessions);
        let message = [0x33u8; 32];

        let mut bad = sessions[1].sign(&message).unwrap();
        bad.s += Scalar::ONE;
        assert_eq!(sessions[0].combine_sig(bad), Ok(false));

        let patterns = nonce_patterns(&sessions[0]);
        assert_eq!(sessions[0].sign(&message), Err(Error::FinalSignatureInvalid));
        assert_eq!(sessions[0].state(), SessionState::Failed);
        assert_nonce_slot_wiped(&sessions[0], &patterns);
    }

    #[test]
    fn test_tweaked_single_key_matches_schnorr_signing_key() {
        let mut rng = ChaCha20Rng::seed_from_u64(13);
        let tweak = Scalar::random(&mut rng);
        let opts = ContextOptions {
            tweaks: vec![KeyTweak::xonly(tweak)],
            ..Default::default()
        };
        let ctxs = contexts(1, 14, opts);
        let ctx = &ctxs[0];
        let aggregate = ctx.aggregate();

        // Tweaked secret: a*d on the even-y lift, negated with an odd
        // pre-tweak key, plus the tweak.
        let mut d: Scalar = *ctx.signing_key().to_nonzero_scalar();
        if bool::from(has_odd_y(&ctx.public_key().to_projective())) {
            d = -d;
        }
        let mut x = aggregate.coefficient(ctx.public_key()) * d;
        if bool::from(has_odd_y(&aggregate.pre_tweaked_key.to_projective())) {
            x = -x;
        }
        x += tweak;

        let signing_key = schnorr::SigningKey::from_bytes(&x.to_bytes()).unwrap();
        let verifying_key = signing_key.verifying_key();
        assert_eq!(
            verifying_key.to_bytes().as_slice(),
            &xonly_bytes(ctx.aggregated_key())[..]
        );

        let message = [0x77u8; 32];
        let mut session = Session::new(ctx).unwrap();
        session.sign(&message).unwrap();
        let signature = session.final_sig().unwrap().to_bytes();
        let signature = schnorr::Signature::try_from(&signature[..]).unwrap();
        assert!(verifying_key.verify_raw(&message, &signature).is_ok());

        let reference = signing_key.sign_raw(&message, &[0u8; 32]).unwrap();
        let reference = Signature::from_bytes(&reference.to_bytes()).unwrap();
        assert!(reference.verify(&message, ctx.aggregated_key()));
    }
}
