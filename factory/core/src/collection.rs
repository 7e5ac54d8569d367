//! Per-entity clone: a ticket collection initialized exactly once.

use serde::{Deserialize, Serialize};
use tracing::info;

use factory_spec::{Address, EntityId, EntityParams, FactoryError, TemplateRef};

/// Clone of the active template bound to one entity.
///
/// Starts blank and becomes usable only after [`TicketCollection::initialize`],
/// which rejects any second call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketCollection {
    address: Address,
    template: TemplateRef,
    initialized: bool,
    entity_id: EntityId,
    name: String,
    symbol: String,
    ticket_types: Vec<String>,
    base_uri: String,
    contract_uri: String,
    owner: Address,
}

impl TicketCollection {
    /// Uninitialized clone of `template` located at `address`.
    pub fn blank(address: Address, template: TemplateRef) -> Self {
        Self {
            address,
            template,
            initialized: false,
            entity_id: EntityId(0),
            name: String::new(),
            symbol: String::new(),
            ticket_types: Vec::new(),
            base_uri: String::new(),
            contract_uri: String::new(),
            owner: Address::ZERO,
        }
    }

    /// One-time initializer.
    pub fn initialize(&mut self, params: &EntityParams) -> Result<(), FactoryError> {
        if self.initialized {
            return Err(FactoryError::AlreadyInitialized(self.address));
        }
        if params.owner.is_zero() {
            return Err(FactoryError::ZeroOwner);
        }
        self.entity_id = params.id;
        self.name = params.name.clone();
        self.symbol = params.symbol.clone();
        self.ticket_types = params.categories.clone();
        self.base_uri = params.base_uri.clone();
        self.contract_uri = params.contract_uri.clone();
        self.owner = params.owner;
        self.initialized = true;
        Ok(())
    }

    /// Hand administrative control to `new_owner`.
    pub fn transfer_ownership(
        &mut self,
        caller: &Address,
        new_owner: Address,
    ) -> Result<(), FactoryError> {
        if *caller != self.owner {
            return Err(FactoryError::Unauthorized { caller: *caller });
        }
        if new_owner.is_zero() {
            return Err(FactoryError::ZeroOwner);
        }
        info!(collection = %self.address, new = %new_owner, "collection ownership transferred");
        self.owner = new_owner;
        Ok(())
    }

    /// Metadata URI for `token_id`; empty when no base URI is set.
    pub fn token_uri(&self, token_id: u64) -> String {
        if self.base_uri.is_empty() {
            return String::new();
        }
        format!("{}{}", self.base_uri, token_id)
    }

    /// Own location.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Template this clone was copied from.
    pub fn template(&self) -> TemplateRef {
        self.template
    }

    /// Whether the initializer has run.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Entity identifier.
    pub fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    /// Collection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Collection symbol.
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Ticket categories in creation order.
    pub fn ticket_types(&self) -> &[String] {
        &self.ticket_types
    }

    /// Per-token metadata prefix.
    pub fn base_uri(&self) -> &str {
        &self.base_uri
    }

    /// Collection metadata URI.
    pub fn contract_uri(&self) -> &str {
        &self.contract_uri
    }

    /// Administrative owner.
    pub fn owner(&self) -> Address {
        self.owner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address::from_bytes([byte; 32])
    }

    fn params(owner: Address) -> EntityParams {
        EntityParams {
            id: EntityId(1),
            name: "Test Event".into(),
            symbol: "TEST".into(),
            categories: vec!["General".into(), "VIP".into()],
            base_uri: "https://example.com/api/token/".into(),
            contract_uri: "https://example.com/api/contract/".into(),
            owner,
        }
    }

    #[test]
    fn initialize_populates_fields() {
        let mut clone = TicketCollection::blank(addr(9), TemplateRef::new(addr(7)));
        assert!(!clone.is_initialized());
        clone.initialize(&params(addr(2))).unwrap();
        assert!(clone.is_initialized());
        assert_eq!(clone.entity_id(), EntityId(1));
        assert_eq!(clone.name(), "Test Event");
        assert_eq!(clone.symbol(), "TEST");
        assert_eq!(clone.ticket_types(), ["General", "VIP"]);
        assert_eq!(clone.contract_uri(), "https://example.com/api/contract/");
        assert_eq!(clone.owner(), addr(2));
        assert_eq!(clone.template(), TemplateRef::new(addr(7)));
    }

    #[test]
    fn second_initialize_is_rejected() {
        let mut clone = TicketCollection::blank(addr(9), TemplateRef::new(addr(7)));
        clone.initialize(&params(addr(2))).unwrap();
        let mut other = params(addr(3));
        other.name = "Hijack".into();
        assert_eq!(
            clone.initialize(&other),
            Err(FactoryError::AlreadyInitialized(addr(9)))
        );
        assert_eq!(clone.name(), "Test Event");
        assert_eq!(clone.owner(), addr(2));
    }

    #[test]
    fn zero_owner_leaves_clone_blank() {
        let mut clone = TicketCollection::blank(addr(9), TemplateRef::new(addr(7)));
        assert_eq!(
            clone.initialize(&params(Address::ZERO)),
            Err(FactoryError::ZeroOwner)
        );
        assert!(!clone.is_initialized());
    }

    #[test]
    fn owner_gated_transfer() {
        let mut clone = TicketCollection::blank(addr(9), TemplateRef::new(addr(7)));
        clone.initialize(&params(addr(2))).unwrap();
        assert!(clone.transfer_ownership(&addr(5), addr(6)).is_err());
        clone.transfer_ownership(&addr(2), addr(6)).unwrap();
        assert_eq!(clone.owner(), addr(6));
    }

    #[test]
    fn token_uri_appends_id() {
        let mut clone = TicketCollection::blank(addr(9), TemplateRef::new(addr(7)));
        assert_eq!(clone.token_uri(4), "");
        clone.initialize(&params(addr(2))).unwrap();
        assert_eq!(clone.token_uri(4), "https://example.com/api/token/4");
    }
}
