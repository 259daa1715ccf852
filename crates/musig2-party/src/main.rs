//! MuSig2 Party CLI
//!
//! Command-line interface for MuSig2 operations:
//! - Key generation
//! - Key aggregation over a signer set
//! - Local signing runs over a set of key files
//! - BIP-340 signature verification

use anyhow::{anyhow, bail, Context as _, Result};
use clap::{Parser, Subcommand};
use musig2_core::{
    keys::{aggregate_keys, KeyAggOptions},
    types::{parse_xonly, xonly_bytes},
    Context, ContextOptions, KeyTweak, Message, PartialSignature, PublicKey, PublicNonce,
    SecretKey, Session, Signature, TaprootTweak,
};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, Level};

/// MuSig2 Party - multi-signature signer node
#[derive(Parser)]
#[command(name = "musig2-party")]
#[command(about = "MuSig2 Schnorr multi-signature party")]
#[command(version)]
struct Cli {
    /// Data directory for key files
    #[arg(short, long, env = "MUSIG2_DEST", default_value = "./data")]
    dest: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a signing key
    Keygen {
        /// Key index, used in the file name
        #[arg(short, long)]
        index: usize,
    },

    /// Show a stored key
    Info {
        /// Key index
        #[arg(short, long)]
        index: usize,
    },

    /// Aggregate the keys of a signer set
    Aggregate {
        /// Signer set file (JSON)
        #[arg(short, long, env = "MUSIG2_SIGNER_SET")]
        signer_set: PathBuf,
    },

    /// Sign a message with a set of local key files
    Sign {
        /// Signer set file (JSON)
        #[arg(short, long, env = "MUSIG2_SIGNER_SET")]
        signer_set: PathBuf,

        /// Message to sign (hex encoded 32-byte hash)
        #[arg(short, long)]
        message: String,

        /// Indices of the key files to sign with (comma-separated)
        #[arg(short, long)]
        indices: String,
    },

    /// Verify a BIP-340 signature
    Verify {
        /// Public key (hex, x-only or compressed)
        #[arg(short, long)]
        key: String,

        /// Signed message (hex encoded 32-byte hash)
        #[arg(short, long)]
        message: String,

        /// Signature (hex encoded, 64 bytes)
        #[arg(short, long)]
        signature: String,
    },
}

/// A stored signing key.
#[derive(Debug, Serialize, Deserialize)]
struct KeyFile {
    index: usize,
    secret_key: String,
    public_key: String,
}

/// Co-signer set description, written by hand or by another tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SignerSet {
    /// Public keys (hex, x-only or compressed)
    keys: Vec<String>,

    /// Sort keys before aggregation
    #[serde(default = "default_sort")]
    sort: bool,

    #[serde(default)]
    tweaks: Vec<KeyTweak>,

    #[serde(default)]
    taproot: Option<TaprootTweak>,
}

fn default_sort() -> bool {
    true
}

impl SignerSet {
    fn public_keys(&self) -> Result<Vec<PublicKey>> {
        self.keys.iter().map(|key| parse_public_key(key)).collect()
    }

    fn context_options(&self) -> ContextOptions {
        ContextOptions {
            tweaks: self.tweaks.clone(),
            taproot: self.taproot,
        }
    }
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    // Ensure data directory exists
    std::fs::create_dir_all(&cli.dest)?;

    match cli.command {
        Commands::Keygen { index } => {
            run_keygen(&cli.dest, index)?;
        }
        Commands::Info { index } => {
            show_info(&cli.dest, index)?;
        }
        Commands::Aggregate { ref signer_set } => {
            run_aggregate(signer_set)?;
        }
        Commands::Sign {
            ref signer_set,
            ref message,
            ref indices,
        } => {
            run_sign(&cli.dest, signer_set, message, indices)?;
        }
        Commands::Verify {
            ref key,
            ref message,
            ref signature,
        } => {
            run_verify(key, message, signature)?;
        }
    }

    Ok(())
}

fn run_keygen(dest: &Path, index: usize) -> Result<()> {
    let secret_key = SecretKey::random(&mut OsRng);
    let public_key = hex::encode(xonly_bytes(&secret_key.public_key()));

    let key_file = KeyFile {
        index,
        secret_key: hex::encode(secret_key.to_bytes()),
        public_key: public_key.clone(),
    };

    let path = key_path(dest, index);
    let json = serde_json::to_string_pretty(&key_file)?;
    std::fs::write(&path, json)?;

    info!(index, public_key = %public_key, path = ?path, "Key generated and saved");

    println!("Public Key: {}", public_key);

    Ok(())
}

fn show_info(dest: &Path, index: usize) -> Result<()> {
    let secret_key = load_key(dest, index)?;
    let public_key = secret_key.public_key();

    println!("Key Info:");
    println!("  Index: {}", index);
    println!("  Public Key (x-only): {}", hex::encode(xonly_bytes(&public_key)));
    println!(
        "  Public Key (compressed): {}",
        hex::encode(public_key.to_sec1_bytes())
    );

    Ok(())
}

fn run_aggregate(signer_set_path: &Path) -> Result<()> {
    let signer_set = load_signer_set(signer_set_path)?;
    let keys = signer_set.public_keys()?;

    let opts = KeyAggOptions {
        tweaks: signer_set.tweaks.clone(),
        taproot: signer_set.taproot,
        ..Default::default()
    };
    let aggregate = aggregate_keys(&keys, signer_set.sort, &opts)?;

    println!("Aggregated Key:");
    println!("  Key: {}", hex::encode(xonly_bytes(&aggregate.final_key)));
    println!(
        "  Internal Key: {}",
        hex::encode(xonly_bytes(&aggregate.internal_key))
    );
    println!("  Keys Hash: {}", hex::encode(aggregate.keys_hash));
    match aggregate.unique_key_index {
        Some(idx) => println!("  Second Unique Key Index: {}", idx),
        None => println!("  Second Unique Key Index: none (all keys equal)"),
    }
    println!("  Tweaks Applied: {}", aggregate.tweak_steps.len());

    Ok(())
}

fn run_sign(dest: &Path, signer_set_path: &Path, message: &str, indices: &str) -> Result<()> {
    let signer_set = load_signer_set(signer_set_path)?;
    let keys = signer_set.public_keys()?;
    let message = parse_message(message)?;
    let indices = parse_indices(indices)?;

    if indices.len() != keys.len() {
        bail!(
            "Signer set has {} keys but {} key files were given",
            keys.len(),
            indices.len()
        );
    }

    info!(
        indices = ?indices,
        n_signers = keys.len(),
        message = hex::encode(message),
        "Starting local signing run"
    );

    let contexts = indices
        .iter()
        .map(|&index| {
            let secret_key = load_key(dest, index)?;
            Context::new(
                secret_key,
                keys.clone(),
                signer_set.sort,
                signer_set.context_options(),
            )
            .with_context(|| format!("Key file {} does not fit the signer set", index))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut sessions = contexts
        .iter()
        .map(Session::new)
        .collect::<musig2_core::Result<Vec<_>>>()?;

    // Round 1: every session sees every other session's public nonce
    let nonces: Vec<PublicNonce> = sessions.iter().map(|s| *s.public_nonce()).collect();
    for (i, session) in sessions.iter_mut().enumerate() {
        for (j, nonce) in nonces.iter().enumerate() {
            if i != j {
                session.register_public_nonce(*nonce)?;
            }
        }
    }

    // Round 2: sign, then hand every partial signature to the others
    let partials = sessions
        .iter_mut()
        .map(|s| s.sign(&message))
        .collect::<musig2_core::Result<Vec<PartialSignature>>>()?;
    for (i, session) in sessions.iter_mut().enumerate() {
        for (j, partial) in partials.iter().enumerate() {
            if i != j {
                session.combine_sig(*partial)?;
            }
        }
    }

    let signature = sessions
        .first()
        .and_then(|s| s.final_sig())
        .copied()
        .ok_or_else(|| anyhow!("Signing run did not produce a signature"))?;

    let aggregated_key = contexts[0].aggregated_key();
    info!(
        r = hex::encode(signature.r),
        s = hex::encode(signature.s),
        "Signature generated"
    );

    println!("Signature:");
    println!("  r: {}", hex::encode(signature.r));
    println!("  s: {}", hex::encode(signature.s));
    println!("  Hex: {}", hex::encode(signature.to_bytes()));
    println!("  Key: {}", hex::encode(xonly_bytes(aggregated_key)));

    Ok(())
}

fn run_verify(key: &str, message: &str, signature: &str) -> Result<()> {
    let public_key = parse_public_key(key)?;
    let message = parse_message(message)?;
    let signature = Signature::from_bytes(&hex::decode(signature)?)?;

    if signature.verify(&message, &public_key) {
        println!("Signature is valid");
        Ok(())
    } else {
        bail!("Signature is invalid")
    }
}

fn key_path(dest: &Path, index: usize) -> PathBuf {
    dest.join(format!("key.{}.json", index))
}

fn load_key(dest: &Path, index: usize) -> Result<SecretKey> {
    let path = key_path(dest, index);
    let json = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let key_file: KeyFile = serde_json::from_str(&json)?;
    let secret_key = SecretKey::from_slice(&hex::decode(&key_file.secret_key)?)
        .map_err(|_| anyhow!("Invalid secret key in {}", path.display()))?;
    Ok(secret_key)
}

fn load_signer_set(path: &Path) -> Result<SignerSet> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let signer_set: SignerSet = serde_json::from_str(&json)?;
    Ok(signer_set)
}

fn parse_public_key(key: &str) -> Result<PublicKey> {
    let bytes = hex::decode(key.trim())?;
    match bytes.len() {
        32 => Ok(parse_xonly(&bytes)?),
        33 => PublicKey::from_sec1_bytes(&bytes).map_err(|_| anyhow!("Invalid public key {}", key)),
        n => bail!("Public key must be 32 or 33 bytes, got {}", n),
    }
}

fn parse_message(message: &str) -> Result<Message> {
    hex::decode(message.trim())?
        .try_into()
        .map_err(|_| anyhow!("Message must be 32 bytes"))
}

fn parse_indices(indices: &str) -> Result<Vec<usize>> {
    let indices = indices
        .split(',')
        .map(|s| s.trim().parse())
        .collect::<std::result::Result<Vec<usize>, _>>()?;
    Ok(indices)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_indices() {
        assert_eq!(parse_indices("0, 2,5").unwrap(), vec![0, 2, 5]);
        assert!(parse_indices("0,x").is_err());
    }

    #[test]
    fn test_parse_public_key_forms() {
        let secret_key = SecretKey::random(&mut OsRng);
        let public_key = secret_key.public_key();

        let xonly = parse_public_key(&hex::encode(xonly_bytes(&public_key))).unwrap();
        let compressed = parse_public_key(&hex::encode(public_key.to_sec1_bytes())).unwrap();
        assert_eq!(xonly_bytes(&xonly), xonly_bytes(&public_key));
        assert_eq!(compressed, public_key);
        assert!(parse_public_key("00").is_err());
    }

    #[test]
    fn test_signer_set_defaults() {
        let key = hex::encode(xonly_bytes(&SecretKey::random(&mut OsRng).public_key()));
        let json = format!(r#"{{"keys": ["{}"]}}"#, key);
        let signer_set: SignerSet = serde_json::from_str(&json).unwrap();

        assert!(signer_set.sort);
        assert!(signer_set.tweaks.is_empty());
        assert_eq!(signer_set.taproot, None);
        assert_eq!(signer_set.public_keys().unwrap().len(), 1);
    }

    #[test]
    fn test_signer_set_with_taproot() {
        let json = r#"{"keys": [], "sort": false, "taproot": "bip86"}"#;
        let signer_set: SignerSet = serde_json::from_str(json).unwrap();
        assert!(!signer_set.sort);
        assert_eq!(signer_set.context_options().taproot, Some(TaprootTweak::Bip86));
    }
}
