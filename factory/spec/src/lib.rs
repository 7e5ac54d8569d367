//! Factory value types: addresses, identifiers, deterministic clone
//! address derivation, the error taxonomy, events, and signed commands.
#![deny(missing_docs)]

use std::fmt;
use std::str::FromStr;

use blake3::Hasher;
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod command;
pub mod events;

pub use command::{command_hash, Command, SignatureError, SignedCommand};
pub use events::{EventSink, FactoryEvent};

/// Raw 32-byte digest.
pub type Hash = [u8; 32];

/// Opaque 32-byte location of an account, factory, template, or clone.
///
/// Serializes as `0x`-prefixed hex.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(Hash);

impl Address {
    /// The null address.
    pub const ZERO: Address = Address([0u8; 32]);

    /// Wrap raw bytes.
    pub const fn from_bytes(bytes: Hash) -> Self {
        Self(bytes)
    }

    /// Borrow the raw bytes.
    pub fn as_bytes(&self) -> &Hash {
        &self.0
    }

    /// True for [`Address::ZERO`].
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Account address for an ed25519 verifying key.
    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        let mut hasher = Hasher::new();
        hasher.update(b"ea-factory:account");
        hasher.update(key.as_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    /// Parse `0x`-prefixed or bare hex.
    pub fn from_hex(text: &str) -> Result<Self, AddressParseError> {
        let digits = text
            .strip_prefix("0x")
            .or_else(|| text.strip_prefix("0X"))
            .unwrap_or(text);
        if digits.len() != 64 {
            return Err(AddressParseError::Length(digits.len()));
        }
        let mut out = [0u8; 32];
        hex::decode_to_slice(digits, &mut out)
            .map_err(|e| AddressParseError::Hex(e.to_string()))?;
        Ok(Self(out))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for Address {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::from_hex(&text).map_err(serde::de::Error::custom)
    }
}

/// Address text could not be parsed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AddressParseError {
    /// Wrong number of hex digits.
    #[error("expected 64 hex digits, got {0}")]
    Length(usize),
    /// Non-hex characters.
    #[error("invalid hex: {0}")]
    Hex(String),
}

/// Reference to the template every future clone is based on.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateRef(Address);

impl TemplateRef {
    /// Wrap a template location.
    pub const fn new(address: Address) -> Self {
        Self(address)
    }

    /// The underlying address.
    pub fn address(&self) -> Address {
        self.0
    }

    /// Borrow the raw bytes.
    pub fn as_bytes(&self) -> &Hash {
        self.0.as_bytes()
    }

    /// A zero reference is never a valid template.
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl fmt::Display for TemplateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for TemplateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TemplateRef({})", self.0)
    }
}

impl From<Address> for TemplateRef {
    fn from(address: Address) -> Self {
        Self(address)
    }
}

/// Caller-chosen key naming one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u64);

impl EntityId {
    /// 32-byte big-endian salt used for address derivation.
    pub fn salt(&self) -> Hash {
        let mut salt = [0u8; 32];
        salt[24..].copy_from_slice(&self.0.to_be_bytes());
        salt
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<u64> for EntityId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Parameters handed to a clone's one-time initializer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityParams {
    /// Entity identifier.
    pub id: EntityId,
    /// Display name.
    pub name: String,
    /// Short symbol.
    pub symbol: String,
    /// Ordered category list.
    pub categories: Vec<String>,
    /// Per-item metadata URI prefix.
    pub base_uri: String,
    /// Collection-level metadata URI.
    pub contract_uri: String,
    /// Administrative owner of the clone.
    pub owner: Address,
}

/// Identity of a factory deployed by `deployer` with `salt`.
pub fn derive_factory_address(deployer: &Address, salt: u64) -> Address {
    let mut hasher = Hasher::new();
    hasher.update(b"ea-factory:factory");
    hasher.update(deployer.as_bytes());
    hasher.update(&salt.to_be_bytes());
    Address(*hasher.finalize().as_bytes())
}

/// Deterministic clone location for `id` under `factory` and `template`.
///
/// Pure: the result depends only on its three inputs, so it can be computed
/// before the clone exists and will match the address `create` deploys to.
pub fn derive_clone_address(factory: &Address, template: &TemplateRef, id: EntityId) -> Address {
    let mut hasher = Hasher::new();
    hasher.update(b"ea-factory:clone");
    hasher.update(factory.as_bytes());
    hasher.update(template.as_bytes());
    hasher.update(&id.salt());
    Address(*hasher.finalize().as_bytes())
}

/// Broad class of a [`FactoryError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Caller lacks the required privilege.
    Authorization,
    /// Malformed input.
    Validation,
    /// Identifier or address already claimed.
    Conflict,
    /// Index outside the registry.
    Range,
}

/// Factory operation failure. Every variant aborts the operation with no
/// state change.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum FactoryError {
    /// Caller is not the owner.
    #[error("unauthorized caller {caller}")]
    Unauthorized {
        /// Rejected caller.
        caller: Address,
    },
    /// Template reference is zero.
    #[error("invalid template reference")]
    InvalidTemplate,
    /// Designated owner is zero.
    #[error("owner must not be the zero address")]
    ZeroOwner,
    /// Identifier already bound to a clone.
    #[error("identifier {0} already exists")]
    DuplicateIdentifier(EntityId),
    /// Something already occupies the derived address.
    #[error("deployment collision at {0}")]
    DeploymentCollision(Address),
    /// Enumeration index past the end.
    #[error("index {index} out of range (count {count})")]
    IndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Current count.
        count: usize,
    },
    /// Clone initializer already ran.
    #[error("clone at {0} is already initialized")]
    AlreadyInitialized(Address),
}

impl FactoryError {
    /// Error class.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Unauthorized { .. } => ErrorCategory::Authorization,
            Self::InvalidTemplate | Self::ZeroOwner => ErrorCategory::Validation,
            Self::DuplicateIdentifier(_)
            | Self::DeploymentCollision(_)
            | Self::AlreadyInitialized(_) => ErrorCategory::Conflict,
            Self::IndexOutOfRange { .. } => ErrorCategory::Range,
        }
    }
}
