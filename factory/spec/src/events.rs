//! Notifications emitted by the template registry and the instance factory.

use serde::{Deserialize, Serialize};

use crate::{Address, EntityId, TemplateRef};

/// Factory notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data")]
pub enum FactoryEvent {
    /// The active template changed.
    TemplateUpdated {
        /// New active template.
        template: TemplateRef,
    },
    /// A clone was deployed, initialized, and registered.
    Created {
        /// Entity identifier.
        id: EntityId,
        /// Clone location.
        address: Address,
        /// Entity name.
        name: String,
        /// Entity symbol.
        symbol: String,
    },
    /// The factory owner changed.
    OwnershipTransferred {
        /// Previous owner (zero at construction).
        previous: Address,
        /// New owner.
        new: Address,
    },
}

impl FactoryEvent {
    /// Short label used in logs and CLI output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TemplateUpdated { .. } => "TemplateUpdated",
            Self::Created { .. } => "Created",
            Self::OwnershipTransferred { .. } => "OwnershipTransferred",
        }
    }
}

/// Anything that accepts emitted events.
pub trait EventSink {
    /// Record one event.
    fn emit(&mut self, event: FactoryEvent);
}

impl EventSink for Vec<FactoryEvent> {
    fn emit(&mut self, event: FactoryEvent) {
        self.push(event);
    }
}
