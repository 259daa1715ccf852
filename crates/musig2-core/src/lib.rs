//! # MuSig2 Core
//!
//! Core protocol logic for MuSig2 multi-signatures over secp256k1.
//!
//! This crate provides:
//! - Key aggregation with sorting, x-only and plain tweaks, and taproot
//!   commitments
//! - Two-point nonce generation and aggregation
//! - Partial signing, partial signature verification and combination into a
//!   BIP-340 Schnorr signature
//! - A [`Context`] per co-signer set and a single-use [`Session`] per
//!   message that enforces one-shot nonce use
//!
//! ## Protocol Overview
//!
//! MuSig2 lets `n` signers produce one Schnorr signature under an aggregated
//! key in two rounds:
//! 1. Every signer publishes a public nonce pair
//! 2. Every signer publishes a partial signature; anyone can sum them
//!
//! Transport between signers is left to the caller.
//!
//! ## Example
//!
//! ```rust,ignore
//! use musig2_core::{Context, ContextOptions, Session};
//!
//! let ctx = Context::new(secret_key, signers, true, ContextOptions::default())?;
//! let mut session = Session::new(&ctx)?;
//!
//! // Send session.public_nonce() to the others, register theirs
//! session.register_public_nonce(peer_nonce)?;
//!
//! // Sign, send our partial signature, register theirs
//! let partial = session.sign(&message)?;
//! session.combine_sig(peer_partial)?;
//!
//! let signature = session.final_sig();
//! ```

pub mod codec;
pub mod error;
pub mod hash;
pub mod keys;
pub mod nonce;
pub mod session;
pub mod sign;
pub mod types;

pub use error::{Error, Result};
pub use keys::{aggregate_keys, AggregateKey, KeyAggOptions};
pub use nonce::{aggregate_nonces, generate_nonce, NoncePair, PublicNonce, SecretNonce};
pub use session::{Context, ContextOptions, NonceRegistration, Session, SessionState};
pub use sign::{PartialSignature, SignOptions};
pub use types::{KeyTweak, Message, PublicKey, SecretKey, Signature, TaprootTweak};

/// Protocol version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
