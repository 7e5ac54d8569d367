//! Template registry: the single active template all future clones copy.

use tracing::{info, warn};

use factory_spec::{Address, EventSink, FactoryError, FactoryEvent, TemplateRef};

use crate::access::Ownable;

/// Owner-gated holder of the active template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateRegistry {
    access: Ownable,
    active: TemplateRef,
}

impl TemplateRegistry {
    /// Construct with `owner` and the initial `template`.
    pub fn initialize(
        owner: Address,
        template: TemplateRef,
        sink: &mut impl EventSink,
    ) -> Result<Self, FactoryError> {
        if template.is_zero() {
            return Err(FactoryError::InvalidTemplate);
        }
        let access = Ownable::new(owner, sink)?;
        sink.emit(FactoryEvent::TemplateUpdated { template });
        info!(%template, %owner, "template registry initialized");
        Ok(Self {
            access,
            active: template,
        })
    }

    /// Replace the active template. Existing clones are unaffected.
    pub fn set_template(
        &mut self,
        caller: &Address,
        template: TemplateRef,
        sink: &mut impl EventSink,
    ) -> Result<(), FactoryError> {
        let outcome = self.access.ensure_owner(caller).and_then(|()| {
            if template.is_zero() {
                Err(FactoryError::InvalidTemplate)
            } else {
                Ok(())
            }
        });
        if let Err(err) = outcome {
            warn!(%caller, error = %err, "set_template rejected");
            return Err(err);
        }
        self.active = template;
        sink.emit(FactoryEvent::TemplateUpdated { template });
        info!(%template, "template updated");
        Ok(())
    }

    /// Active template.
    pub fn current(&self) -> TemplateRef {
        self.active
    }

    /// Registry owner.
    pub fn owner(&self) -> Address {
        self.access.owner()
    }

    /// Fail unless `caller` owns the registry.
    pub fn ensure_owner(&self, caller: &Address) -> Result<(), FactoryError> {
        self.access.ensure_owner(caller)
    }

    /// Hand ownership to `new_owner`.
    pub fn transfer_ownership(
        &mut self,
        caller: &Address,
        new_owner: Address,
        sink: &mut impl EventSink,
    ) -> Result<(), FactoryError> {
        self.access.transfer(caller, new_owner, sink).map_err(|err| {
            warn!(%caller, error = %err, "transfer_ownership rejected");
            err
        })
    }
}
