//! Instance factory: deterministic clone creation and the append-only
//! identifier registry.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use factory_spec::{
    derive_clone_address, derive_factory_address, Address, EntityId, EntityParams, EventSink,
    FactoryError, FactoryEvent, TemplateRef,
};

use crate::collection::TicketCollection;
use crate::space::DeploymentSpace;
use crate::template::TemplateRegistry;
use crate::EventJournal;

/// Clones the active template per entity at a predictable address and keeps
/// the identifier → address registry plus creation order.
///
/// Every mutating method either commits fully or returns an error with no
/// change to the registry, the order index, the space, or the journal.
#[derive(Debug)]
pub struct InstanceFactory {
    identity: Address,
    templates: TemplateRegistry,
    registry: BTreeMap<EntityId, Address>,
    order: Vec<Address>,
    space: DeploymentSpace,
    journal: EventJournal,
}

impl InstanceFactory {
    /// Deploy a factory whose identity derives from `deployer` and `salt`.
    /// The deployer becomes owner.
    pub fn deploy(
        deployer: Address,
        salt: u64,
        template: TemplateRef,
        space: DeploymentSpace,
    ) -> Result<Self, FactoryError> {
        Self::new(derive_factory_address(&deployer, salt), deployer, template, space)
    }

    /// Construct with an explicit identity.
    pub fn new(
        identity: Address,
        owner: Address,
        template: TemplateRef,
        space: DeploymentSpace,
    ) -> Result<Self, FactoryError> {
        let mut journal = EventJournal::new();
        let templates = TemplateRegistry::initialize(owner, template, &mut journal)?;
        info!(factory = %identity, "factory constructed");
        Ok(Self {
            identity,
            templates,
            registry: BTreeMap::new(),
            order: Vec::new(),
            space,
            journal,
        })
    }

    /// Factory identity mixed into every derived address.
    pub fn identity(&self) -> Address {
        self.identity
    }

    /// Current owner.
    pub fn owner(&self) -> Address {
        self.templates.owner()
    }

    /// Active template.
    pub fn current_template(&self) -> TemplateRef {
        self.templates.current()
    }

    /// Handle to the space clones are deployed into.
    pub fn space(&self) -> &DeploymentSpace {
        &self.space
    }

    /// Shared view of every emitted event; only the factory appends.
    pub fn journal(&self) -> &EventJournal {
        &self.journal
    }

    /// Replace the active template (owner only).
    pub fn set_template(&mut self, caller: Address, template: TemplateRef) -> Result<(), FactoryError> {
        self.templates
            .set_template(&caller, template, &mut self.journal)
    }

    /// Transfer factory ownership (owner only).
    pub fn transfer_ownership(&mut self, caller: Address, new_owner: Address) -> Result<(), FactoryError> {
        self.templates
            .transfer_ownership(&caller, new_owner, &mut self.journal)
    }

    /// Address the clone for `id` will occupy under the active template.
    pub fn predict_address(&self, id: EntityId) -> Address {
        let address = derive_clone_address(&self.identity, &self.templates.current(), id);
        debug!(%id, %address, "predicted clone address");
        address
    }

    /// Clone the active template for `params.id`, initialize it, and
    /// register it. Owner only.
    pub fn create(&mut self, caller: Address, params: EntityParams) -> Result<Address, FactoryError> {
        self.try_create(caller, params).map_err(|err| {
            warn!(%caller, error = %err, "create rejected");
            err
        })
    }

    fn try_create(&mut self, caller: Address, params: EntityParams) -> Result<Address, FactoryError> {
        self.templates.ensure_owner(&caller)?;
        if params.owner.is_zero() {
            return Err(FactoryError::ZeroOwner);
        }
        if self.registry.contains_key(&params.id) {
            return Err(FactoryError::DuplicateIdentifier(params.id));
        }
        let address = self.predict_address(params.id);
        // Initialize before deploying so the clone is never reachable blank.
        let mut clone = TicketCollection::blank(address, self.templates.current());
        clone.initialize(&params)?;
        self.space.deploy(clone)?;

        self.registry.insert(params.id, address);
        self.order.push(address);
        info!(id = %params.id, %address, owner = %params.owner, "entity created");
        self.journal.emit(FactoryEvent::Created {
            id: params.id,
            address,
            name: params.name,
            symbol: params.symbol,
        });
        Ok(address)
    }

    /// Registered address for `id`, or `None` if never created.
    pub fn entity_address_of(&self, id: EntityId) -> Option<Address> {
        self.registry.get(&id).copied()
    }

    /// Number of entities created.
    pub fn count_entities(&self) -> usize {
        self.order.len()
    }

    /// Address of the `index`-th created entity.
    pub fn entity_at(&self, index: usize) -> Result<Address, FactoryError> {
        self.order
            .get(index)
            .copied()
            .ok_or(FactoryError::IndexOutOfRange {
                index,
                count: self.order.len(),
            })
    }

    /// All created addresses in creation order.
    pub fn entities(&self) -> &[Address] {
        &self.order
    }

    /// Snapshot of the clone registered for `id`.
    pub fn entity(&self, id: EntityId) -> Option<TicketCollection> {
        self.entity_address_of(id)
            .and_then(|address| self.space.get(&address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address::from_bytes([byte; 32])
    }

    fn factory() -> InstanceFactory {
        InstanceFactory::deploy(addr(1), 0, TemplateRef::new(addr(0xaa)), DeploymentSpace::new())
            .unwrap()
    }

    fn params(id: u64, owner: Address) -> EntityParams {
        EntityParams {
            id: EntityId(id),
            name: format!("Event {id}"),
            symbol: format!("EV{id}"),
            categories: vec!["General".into()],
            base_uri: "https://example.com/".into(),
            contract_uri: "https://example.com/contract".into(),
            owner,
        }
    }

    #[test]
    fn construction_journals_owner_then_template() {
        let f = factory();
        let events = f.journal().events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind(), "OwnershipTransferred");
        assert_eq!(
            events[1],
            FactoryEvent::TemplateUpdated {
                template: TemplateRef::new(addr(0xaa))
            }
        );
        assert_eq!(f.owner(), addr(1));
    }

    #[test]
    fn construction_rejects_zero_template() {
        let err = InstanceFactory::deploy(
            addr(1),
            0,
            TemplateRef::new(Address::ZERO),
            DeploymentSpace::new(),
        )
        .unwrap_err();
        assert_eq!(err, FactoryError::InvalidTemplate);
    }

    #[test]
    fn identity_depends_on_salt() {
        let a = InstanceFactory::deploy(addr(1), 0, TemplateRef::new(addr(2)), DeploymentSpace::new())
            .unwrap();
        let b = InstanceFactory::deploy(addr(1), 1, TemplateRef::new(addr(2)), DeploymentSpace::new())
            .unwrap();
        assert_ne!(a.identity(), b.identity());
        assert_ne!(a.predict_address(EntityId(1)), b.predict_address(EntityId(1)));
    }

    #[test]
    fn create_lands_at_prediction() {
        let mut f = factory();
        let predicted = f.predict_address(EntityId(1));
        let created = f.create(addr(1), params(1, addr(2))).unwrap();
        assert_eq!(created, predicted);
        assert_eq!(f.entity_address_of(EntityId(1)), Some(predicted));
        assert_eq!(f.entity_at(0), Ok(predicted));
        assert_eq!(f.entity(EntityId(1)).map(|c| c.owner()), Some(addr(2)));
    }

    #[test]
    fn check_order_owner_before_duplicate() {
        let mut f = factory();
        f.create(addr(1), params(1, addr(2))).unwrap();
        assert_eq!(
            f.create(addr(2), params(1, addr(2))),
            Err(FactoryError::Unauthorized { caller: addr(2) })
        );
        assert_eq!(
            f.create(addr(1), params(1, Address::ZERO)),
            Err(FactoryError::ZeroOwner)
        );
        assert_eq!(
            f.create(addr(1), params(1, addr(3))),
            Err(FactoryError::DuplicateIdentifier(EntityId(1)))
        );
    }

    #[test]
    fn entity_at_past_end() {
        let f = factory();
        assert_eq!(
            f.entity_at(0),
            Err(FactoryError::IndexOutOfRange { index: 0, count: 0 })
        );
    }

    #[test]
    fn template_change_moves_predictions_not_clones() {
        let mut f = factory();
        let first = f.create(addr(1), params(1, addr(2))).unwrap();
        let before = f.predict_address(EntityId(2));
        f.set_template(addr(1), TemplateRef::new(addr(0xbb))).unwrap();
        assert_ne!(f.predict_address(EntityId(2)), before);
        assert_eq!(f.entity_address_of(EntityId(1)), Some(first));
        assert_eq!(
            f.entity(EntityId(1)).map(|c| c.template()),
            Some(TemplateRef::new(addr(0xaa)))
        );
        let second = f.create(addr(1), params(2, addr(2))).unwrap();
        assert_eq!(
            f.space().get(&second).map(|c| c.template()),
            Some(TemplateRef::new(addr(0xbb)))
        );
    }

    #[test]
    fn transferred_owner_can_create() {
        let mut f = factory();
        f.transfer_ownership(addr(1), addr(5)).unwrap();
        assert!(f.create(addr(1), params(1, addr(2))).is_err());
        assert!(f.create(addr(5), params(1, addr(2))).is_ok());
    }
}
