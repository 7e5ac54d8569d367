//! Signed state-changing commands.
//!
//! A command is hashed as `blake3("ea-factory:command" || json)` and signed
//! with ed25519. The caller of a verified command is the account address of
//! its signer.

use blake3::Hasher;
use ed25519_dalek::{Signature, VerifyingKey};
use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;
use thiserror::Error;

use crate::{Address, EntityParams, Hash, TemplateRef};

/// State-changing factory operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    /// Construct the factory; the signer becomes owner.
    Deploy {
        /// Initial template.
        template: TemplateRef,
        /// Salt mixed into the factory identity.
        salt: u64,
    },
    /// Replace the active template.
    SetTemplate {
        /// New template.
        template: TemplateRef,
    },
    /// Hand factory ownership to another account.
    TransferOwnership {
        /// New owner.
        new_owner: Address,
    },
    /// Clone, initialize, and register a new entity.
    Create(EntityParams),
}

impl Command {
    /// Operation name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Deploy { .. } => "deploy",
            Self::SetTemplate { .. } => "set_template",
            Self::TransferOwnership { .. } => "transfer_ownership",
            Self::Create(_) => "create",
        }
    }
}

/// Command plus detached signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedCommand {
    /// The command.
    pub command: Command,
    /// Signer verifying key.
    pub signer: [u8; 32],
    /// Signature over [`command_hash`].
    #[serde(with = "BigArray")]
    pub signature: [u8; 64],
}

impl SignedCommand {
    /// Verify the signature and return the caller address.
    pub fn verify(&self) -> Result<Address, SignatureError> {
        let key = VerifyingKey::from_bytes(&self.signer).map_err(|_| SignatureError::MalformedKey)?;
        let digest = command_hash(&self.command)?;
        let signature = Signature::from_bytes(&self.signature);
        key.verify_strict(&digest, &signature)
            .map_err(|_| SignatureError::Invalid)?;
        Ok(Address::from_verifying_key(&key))
    }
}

/// Signed command rejected before reaching the factory.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignatureError {
    /// Signer bytes are not a valid ed25519 point.
    #[error("malformed signer key")]
    MalformedKey,
    /// Signature does not match.
    #[error("signature verification failed")]
    Invalid,
    /// Command could not be encoded for hashing.
    #[error("command encoding failed: {0}")]
    Encoding(String),
}

/// Domain-separated digest that signers sign.
pub fn command_hash(command: &Command) -> Result<Hash, SignatureError> {
    let bytes =
        serde_json::to_vec(command).map_err(|e| SignatureError::Encoding(e.to_string()))?;
    let mut hasher = Hasher::new();
    hasher.update(b"ea-factory:command");
    hasher.update(&bytes);
    Ok(*hasher.finalize().as_bytes())
}
