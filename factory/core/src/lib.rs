//! Factory core library: owner gate, template registry, clone type,
//! deployment space, instance factory, hash-chained event journal, and the
//! command sequencer that serializes every state change.
#![deny(missing_docs)]

use blake3::Hasher;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use factory_spec::{EventSink, FactoryEvent, Hash};

pub mod access;
pub mod collection;
pub mod factory;
pub mod sequencer;
pub mod space;
pub mod template;

pub use access::Ownable;
pub use collection::TicketCollection;
pub use factory::InstanceFactory;
pub use sequencer::{Receipt, ReplayError, Sequencer, SubmitError};
pub use space::DeploymentSpace;
pub use template::TemplateRegistry;

/// One journaled event with its chain link.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JournalEntry {
    /// Zero-based position.
    pub seq: u64,
    /// Hash of the previous entry.
    pub prev: Option<Hash>,
    /// The event.
    pub event: FactoryEvent,
    /// Hash of this entry.
    pub hash: Hash,
}

/// Journal integrity failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JournalError {
    /// Sequence numbers are not contiguous.
    #[error("sequence gap: expected {expected}, found {found}")]
    SequenceGap {
        /// Expected sequence number.
        expected: u64,
        /// Sequence number found.
        found: u64,
    },
    /// `prev` does not point at the preceding entry.
    #[error("broken chain at {0}")]
    BrokenChain(u64),
    /// Stored hash does not match the entry contents.
    #[error("hash mismatch at {0}")]
    HashMismatch(u64),
}

/// Append-only, hash-chained record of every emitted event.
///
/// Only the owner appends; shared borrows are read-only.
#[derive(Debug, Default, Clone)]
pub struct EventJournal {
    entries: Vec<JournalEntry>,
}

impl EventJournal {
    /// Create an empty journal.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Append an event, linking it to the current tail.
    pub fn append(&mut self, event: FactoryEvent) -> Hash {
        let seq = self.entries.len() as u64;
        let prev = self.entries.last().map(|e| e.hash);
        let hash = entry_hash(seq, prev.as_ref(), &event);
        self.entries.push(JournalEntry {
            seq,
            prev,
            event,
            hash,
        });
        hash
    }

    /// Read a slice of entries.
    pub fn read(&self, offset: usize, limit: usize) -> Vec<JournalEntry> {
        self.entries.iter().skip(offset).take(limit).cloned().collect()
    }

    /// All entries, oldest first.
    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    /// Events only, in order.
    pub fn events(&self) -> Vec<FactoryEvent> {
        self.entries.iter().map(|e| e.event.clone()).collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing has been journaled.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Hash of the newest entry.
    pub fn tail_hash(&self) -> Option<Hash> {
        self.entries.last().map(|e| e.hash)
    }

    /// Merkle root over entry hashes.
    pub fn merkle_root(&self) -> Option<Hash> {
        merkle_root(&self.entries)
    }
}

impl EventSink for EventJournal {
    fn emit(&mut self, event: FactoryEvent) {
        self.append(event);
    }
}

/// Merkle root over the hashes of `entries`; `None` when empty.
pub fn merkle_root(entries: &[JournalEntry]) -> Option<Hash> {
    if entries.is_empty() {
        return None;
    }
    let leaves: Vec<Hash> = entries.iter().map(|e| e.hash).collect();
    Some(compute_merkle(&leaves))
}

/// Journal length and Merkle root at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Checkpoint {
    /// Journal length at checkpoint.
    pub length: usize,
    /// Merkle root.
    pub root: Hash,
}

/// Emits a checkpoint each time the journal advances by an interval.
#[derive(Debug, Default)]
pub struct CheckpointWriter {
    last_len: usize,
}

impl CheckpointWriter {
    /// Create new writer.
    pub fn new() -> Self {
        Self { last_len: 0 }
    }

    /// Emit a checkpoint over `entries` if they advanced by at least
    /// `interval` since the last one.
    pub fn maybe_checkpoint(&mut self, entries: &[JournalEntry], interval: usize) -> Option<Checkpoint> {
        let len = entries.len();
        if len >= self.last_len + interval.max(1) {
            let root = merkle_root(entries)?;
            self.last_len = len;
            debug!(length = len, "journal checkpoint");
            return Some(Checkpoint { length: len, root });
        }
        None
    }
}

/// Check a journal slice starting from sequence zero for tampering or
/// reordering.
pub fn verify_journal(entries: &[JournalEntry]) -> Result<(), JournalError> {
    let mut prev: Option<Hash> = None;
    for (idx, entry) in entries.iter().enumerate() {
        let expected = idx as u64;
        if entry.seq != expected {
            return Err(JournalError::SequenceGap {
                expected,
                found: entry.seq,
            });
        }
        if entry.prev != prev {
            return Err(JournalError::BrokenChain(entry.seq));
        }
        if entry_hash(entry.seq, entry.prev.as_ref(), &entry.event) != entry.hash {
            return Err(JournalError::HashMismatch(entry.seq));
        }
        prev = Some(entry.hash);
    }
    Ok(())
}

fn entry_hash(seq: u64, prev: Option<&Hash>, event: &FactoryEvent) -> Hash {
    let mut hasher = Hasher::new();
    hasher.update(b"ea-factory:journal");
    hasher.update(&seq.to_be_bytes());
    hasher.update(prev.unwrap_or(&[0u8; 32]));
    hash_event(&mut hasher, event);
    *hasher.finalize().as_bytes()
}

fn hash_event(hasher: &mut Hasher, event: &FactoryEvent) {
    hash_field(hasher, event.kind().as_bytes());
    match event {
        FactoryEvent::TemplateUpdated { template } => {
            hasher.update(template.as_bytes());
        }
        FactoryEvent::Created {
            id,
            address,
            name,
            symbol,
        } => {
            hasher.update(&id.salt());
            hasher.update(address.as_bytes());
            hash_field(hasher, name.as_bytes());
            hash_field(hasher, symbol.as_bytes());
        }
        FactoryEvent::OwnershipTransferred { previous, new } => {
            hasher.update(previous.as_bytes());
            hasher.update(new.as_bytes());
        }
    }
}

// Length-prefixed so adjacent strings cannot alias.
fn hash_field(hasher: &mut Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

fn compute_merkle(items: &[Hash]) -> Hash {
    let mut leaves = items.to_vec();
    if leaves.is_empty() {
        return [0u8; 32];
    }
    while leaves.len() > 1 {
        leaves = leaves
            .chunks(2)
            .map(|chunk| {
                let mut hasher = Hasher::new();
                hasher.update(b"ea-factory:merkle");
                hasher.update(&chunk[0]);
                if chunk.len() == 2 {
                    hasher.update(&chunk[1]);
                } else {
                    hasher.update(&chunk[0]);
                }
                *hasher.finalize().as_bytes()
            })
            .collect();
    }
    leaves[0]
}

/// Command signing helpers.
pub mod signing {
    use ed25519_dalek::{Signer, SigningKey};
    use factory_spec::{command_hash, Command, SignatureError, SignedCommand};

    /// Sign a command with the provided key.
    pub fn sign_command(command: Command, signer: &SigningKey) -> Result<SignedCommand, SignatureError> {
        let digest = command_hash(&command)?;
        let signature = signer.sign(&digest);
        Ok(SignedCommand {
            command,
            signer: signer.verifying_key().to_bytes(),
            signature: signature.to_bytes(),
        })
    }
}
