//! Command sequencer: verifies signed commands and applies them to one
//! factory in a strict total order.
//!
//! The factory, its registry, order index, and active template sit behind a
//! single mutex. Signature checks happen outside the lock; everything from
//! the authorization check to event publication happens inside it, so two
//! racing `create` calls for the same identifier resolve by lock order and the
//! loser sees `DuplicateIdentifier` with no side effects.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast::{self, Receiver, Sender};
use tracing::info;

use factory_spec::{
    Address, Command, EntityId, FactoryError, FactoryEvent, SignatureError, SignedCommand,
    TemplateRef,
};

use crate::collection::TicketCollection;
use crate::factory::InstanceFactory;
use crate::space::DeploymentSpace;
use crate::JournalEntry;

/// Submission rejected; nothing was applied.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubmitError {
    /// Signature did not verify.
    #[error(transparent)]
    Signature(#[from] SignatureError),
    /// Factory rejected the operation.
    #[error(transparent)]
    Factory(#[from] FactoryError),
    /// The first command must be a deploy.
    #[error("genesis command must be deploy, got {0}")]
    NotGenesis(&'static str),
    /// Deploy submitted to a running factory.
    #[error("factory already deployed")]
    AlreadyDeployed,
}

/// Replay of a committed command log failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReplayError {
    /// No genesis command.
    #[error("command log is empty")]
    Empty,
    /// A logged command no longer applies.
    #[error("command {position} rejected during replay: {source}")]
    Rejected {
        /// Zero-based log position.
        position: usize,
        /// Underlying rejection.
        source: SubmitError,
    },
}

/// Proof that a command committed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Receipt {
    /// Position in the total order; genesis is zero.
    pub sequence: u64,
    /// Verified caller.
    pub caller: Address,
    /// Address produced by a `create`.
    pub address: Option<Address>,
    /// Events emitted by this command.
    pub events: Vec<FactoryEvent>,
}

struct State {
    factory: InstanceFactory,
    committed: Vec<SignedCommand>,
}

/// Serializing front door for one factory.
pub struct Sequencer {
    state: Mutex<State>,
    events: Sender<FactoryEvent>,
}

impl Sequencer {
    /// Start from a signed `Deploy` command; its signer becomes owner.
    pub fn genesis(deploy: SignedCommand, space: DeploymentSpace) -> Result<Self, SubmitError> {
        let deployer = deploy.verify()?;
        let factory = match &deploy.command {
            Command::Deploy { template, salt } => {
                InstanceFactory::deploy(deployer, *salt, *template, space)?
            }
            other => return Err(SubmitError::NotGenesis(other.name())),
        };
        info!(factory = %factory.identity(), owner = %deployer, "sequencer genesis");
        let (events, _) = broadcast::channel(1024);
        Ok(Self {
            state: Mutex::new(State {
                factory,
                committed: vec![deploy],
            }),
            events,
        })
    }

    /// Rebuild from a previously committed command log.
    pub fn replay(
        commands: impl IntoIterator<Item = SignedCommand>,
        space: DeploymentSpace,
    ) -> Result<Self, ReplayError> {
        let mut commands = commands.into_iter();
        let genesis = commands.next().ok_or(ReplayError::Empty)?;
        let sequencer = Self::genesis(genesis, space)
            .map_err(|source| ReplayError::Rejected { position: 0, source })?;
        for (offset, command) in commands.enumerate() {
            sequencer
                .submit(command)
                .map_err(|source| ReplayError::Rejected {
                    position: offset + 1,
                    source,
                })?;
        }
        Ok(sequencer)
    }

    /// Verify and apply one command.
    pub fn submit(&self, signed: SignedCommand) -> Result<Receipt, SubmitError> {
        let caller = signed.verify()?;
        let mut state = self.state.lock();
        let before = state.factory.journal().len();
        let address = match &signed.command {
            Command::Deploy { .. } => return Err(SubmitError::AlreadyDeployed),
            Command::SetTemplate { template } => {
                state.factory.set_template(caller, *template)?;
                None
            }
            Command::TransferOwnership { new_owner } => {
                state.factory.transfer_ownership(caller, *new_owner)?;
                None
            }
            Command::Create(params) => Some(state.factory.create(caller, params.clone())?),
        };
        let events: Vec<FactoryEvent> = state
            .factory
            .journal()
            .read(before, usize::MAX)
            .into_iter()
            .map(|entry| entry.event)
            .collect();
        let op = signed.command.name();
        state.committed.push(signed);
        let sequence = (state.committed.len() - 1) as u64;
        for event in &events {
            // No subscribers is fine.
            let _ = self.events.send(event.clone());
        }
        info!(sequence, op, %caller, "command committed");
        Ok(Receipt {
            sequence,
            caller,
            address,
            events,
        })
    }

    /// Receive every event committed after this call.
    pub fn subscribe(&self) -> Receiver<FactoryEvent> {
        self.events.subscribe()
    }

    /// Committed commands in order, genesis first.
    pub fn committed(&self) -> Vec<SignedCommand> {
        self.state.lock().committed.clone()
    }

    /// Run a read-only closure against the factory.
    pub fn with_factory<T>(&self, f: impl FnOnce(&InstanceFactory) -> T) -> T {
        f(&self.state.lock().factory)
    }

    /// See [`InstanceFactory::predict_address`].
    pub fn predict_address(&self, id: EntityId) -> Address {
        self.with_factory(|f| f.predict_address(id))
    }

    /// See [`InstanceFactory::entity_address_of`].
    pub fn entity_address_of(&self, id: EntityId) -> Option<Address> {
        self.with_factory(|f| f.entity_address_of(id))
    }

    /// See [`InstanceFactory::count_entities`].
    pub fn count_entities(&self) -> usize {
        self.with_factory(InstanceFactory::count_entities)
    }

    /// See [`InstanceFactory::entity_at`].
    pub fn entity_at(&self, index: usize) -> Result<Address, FactoryError> {
        self.with_factory(|f| f.entity_at(index))
    }

    /// See [`InstanceFactory::entity`].
    pub fn entity(&self, id: EntityId) -> Option<TicketCollection> {
        self.with_factory(|f| f.entity(id))
    }

    /// Active template.
    pub fn current_template(&self) -> TemplateRef {
        self.with_factory(InstanceFactory::current_template)
    }

    /// Current owner.
    pub fn owner(&self) -> Address {
        self.with_factory(InstanceFactory::owner)
    }

    /// Factory identity.
    pub fn identity(&self) -> Address {
        self.with_factory(InstanceFactory::identity)
    }

    /// Full event journal.
    pub fn journal_entries(&self) -> Vec<JournalEntry> {
        self.with_factory(|f| f.journal().read(0, usize::MAX))
    }
}
