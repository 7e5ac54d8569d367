//! Single-owner gate for mutating operations.

use serde::{Deserialize, Serialize};
use tracing::info;

use factory_spec::{Address, EventSink, FactoryError, FactoryEvent};

/// Stored owner identity compared against every privileged caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ownable {
    owner: Address,
}

impl Ownable {
    /// Install `owner`, emitting the initial transfer from zero.
    pub fn new(owner: Address, sink: &mut impl EventSink) -> Result<Self, FactoryError> {
        if owner.is_zero() {
            return Err(FactoryError::ZeroOwner);
        }
        sink.emit(FactoryEvent::OwnershipTransferred {
            previous: Address::ZERO,
            new: owner,
        });
        Ok(Self { owner })
    }

    /// Current owner.
    pub fn owner(&self) -> Address {
        self.owner
    }

    /// Fail with `Unauthorized` unless `caller` is the owner.
    pub fn ensure_owner(&self, caller: &Address) -> Result<(), FactoryError> {
        if *caller != self.owner {
            return Err(FactoryError::Unauthorized { caller: *caller });
        }
        Ok(())
    }

    /// Hand ownership to `new_owner`.
    pub fn transfer(
        &mut self,
        caller: &Address,
        new_owner: Address,
        sink: &mut impl EventSink,
    ) -> Result<(), FactoryError> {
        self.ensure_owner(caller)?;
        if new_owner.is_zero() {
            return Err(FactoryError::ZeroOwner);
        }
        let previous = std::mem::replace(&mut self.owner, new_owner);
        info!(%previous, new = %new_owner, "ownership transferred");
        sink.emit(FactoryEvent::OwnershipTransferred {
            previous,
            new: new_owner,
        });
        Ok(())
    }
}
