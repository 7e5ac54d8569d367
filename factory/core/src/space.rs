//! Shared address space hosting deployed clones.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use factory_spec::{Address, FactoryError};

use crate::collection::TicketCollection;

/// Address → clone map shared between the factory and other deployers.
///
/// Each address is occupied at most once; occupants are never replaced.
#[derive(Debug, Default, Clone)]
pub struct DeploymentSpace {
    objects: Arc<RwLock<BTreeMap<Address, TicketCollection>>>,
}

impl DeploymentSpace {
    /// Create an empty space.
    pub fn new() -> Self {
        Self::default()
    }

    /// Place `object` at its own address, failing if occupied.
    pub fn deploy(&self, object: TicketCollection) -> Result<Address, FactoryError> {
        let address = object.address();
        let mut objects = self.objects.write();
        if objects.contains_key(&address) {
            return Err(FactoryError::DeploymentCollision(address));
        }
        objects.insert(address, object);
        Ok(address)
    }

    /// Snapshot of the object at `address`.
    pub fn get(&self, address: &Address) -> Option<TicketCollection> {
        self.objects.read().get(address).cloned()
    }

    /// Whether `address` is occupied.
    pub fn contains(&self, address: &Address) -> bool {
        self.objects.read().contains_key(address)
    }

    /// Run `f` against the object at `address`.
    pub fn modify<T>(
        &self,
        address: &Address,
        f: impl FnOnce(&mut TicketCollection) -> T,
    ) -> Option<T> {
        self.objects.write().get_mut(address).map(f)
    }

    /// Number of occupied addresses.
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// True when nothing is deployed.
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use factory_spec::TemplateRef;

    fn blank(byte: u8) -> TicketCollection {
        TicketCollection::blank(
            Address::from_bytes([byte; 32]),
            TemplateRef::new(Address::from_bytes([0xee; 32])),
        )
    }

    #[test]
    fn deploy_then_collide() {
        let space = DeploymentSpace::new();
        let at = space.deploy(blank(1)).unwrap();
        assert!(space.contains(&at));
        assert_eq!(
            space.deploy(blank(1)),
            Err(FactoryError::DeploymentCollision(at))
        );
        assert_eq!(space.len(), 1);
    }

    #[test]
    fn clones_share_storage() {
        let space = DeploymentSpace::new();
        let handle = space.clone();
        handle.deploy(blank(2)).unwrap();
        assert!(space.get(&Address::from_bytes([2; 32])).is_some());
        assert!(space.modify(&Address::from_bytes([3; 32]), |_| ()).is_none());
    }
}
