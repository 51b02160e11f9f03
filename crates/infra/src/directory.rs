//! Association directory store: the association record, owners and properties.
//!
//! Directory records are plain state rather than event streams. Writes are
//! serialized so uniqueness checks (property numbers) cannot race.

use std::sync::{Mutex, RwLock};

use levy_billing::{Association, Owner, Property};
use levy_core::{DomainError, DomainResult, OwnerId, PropertyId};

use crate::read_model::{InMemoryReadStore, ReadStore};

#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    association: RwLock<Association>,
    owners: InMemoryReadStore<OwnerId, Owner>,
    properties: InMemoryReadStore<PropertyId, Property>,
    writes: Mutex<()>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn association(&self) -> Association {
        self.association.read().map(|a| a.clone()).unwrap_or_default()
    }

    pub fn set_association(&self, association: Association) -> DomainResult<Association> {
        association.validate()?;
        let mut slot = self
            .association
            .write()
            .map_err(|_| DomainError::invariant("association lock poisoned"))?;
        *slot = association.clone();
        Ok(association)
    }

    /// Sorted by name.
    pub fn owners(&self) -> Vec<Owner> {
        let mut out = self.owners.list();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn owner(&self, owner_id: &OwnerId) -> Option<Owner> {
        self.owners.get(owner_id)
    }

    pub fn add_owner(&self, owner: Owner) -> DomainResult<Owner> {
        owner.validate()?;
        let _guard = self.lock_writes()?;
        if self.owners.get(&owner.owner_id).is_some() {
            return Err(DomainError::conflict(format!("owner {} already exists", owner.owner_id)));
        }
        self.owners.upsert(owner.owner_id, owner.clone());
        Ok(owner)
    }

    /// Sorted by property number.
    pub fn properties(&self) -> Vec<Property> {
        let mut out = self.properties.list();
        out.sort_by_key(|p| p.number);
        out
    }

    /// Properties included in billing runs, by number.
    pub fn active_properties(&self) -> Vec<Property> {
        self.properties().into_iter().filter(|p| p.active).collect()
    }

    pub fn property(&self, property_id: &PropertyId) -> Option<Property> {
        self.properties.get(property_id)
    }

    pub fn add_property(&self, property: Property) -> DomainResult<Property> {
        property.validate()?;
        let _guard = self.lock_writes()?;
        if self.owners.get(&property.owner_id).is_none() {
            return Err(DomainError::not_found(format!("owner {}", property.owner_id)));
        }
        if self.properties.get(&property.property_id).is_some() {
            return Err(DomainError::conflict(format!(
                "property {} already exists",
                property.property_id
            )));
        }
        if self.properties.list().iter().any(|p| p.number == property.number) {
            return Err(DomainError::conflict(format!(
                "property number {} is already in use",
                property.number
            )));
        }
        self.properties.upsert(property.property_id, property.clone());
        Ok(property)
    }

    /// Keep the record but exclude it from future billing runs.
    pub fn deactivate_property(&self, property_id: &PropertyId) -> DomainResult<Property> {
        let _guard = self.lock_writes()?;
        let mut property = self
            .properties
            .get(property_id)
            .ok_or_else(|| DomainError::not_found(format!("property {property_id}")))?;
        property.active = false;
        self.properties.upsert(*property_id, property.clone());
        Ok(property)
    }

    pub fn remove_property(&self, property_id: &PropertyId) -> DomainResult<Property> {
        let _guard = self.lock_writes()?;
        self.properties
            .remove(property_id)
            .ok_or_else(|| DomainError::not_found(format!("property {property_id}")))
    }

    fn lock_writes(&self) -> DomainResult<std::sync::MutexGuard<'_, ()>> {
        self.writes
            .lock()
            .map_err(|_| DomainError::invariant("directory lock poisoned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn owner(name: &str) -> Owner {
        Owner {
            owner_id: OwnerId::new(),
            name: name.to_string(),
            email: Some(format!("{}@example.org", name.to_lowercase())),
            phone: None,
        }
    }

    fn property(owner_id: OwnerId, number: u32) -> Property {
        Property {
            property_id: PropertyId::new(),
            number,
            designation: format!("Ängen 1:{number}"),
            share_ratio: Decimal::ONE,
            address: None,
            owner_id,
            active: true,
        }
    }

    #[test]
    fn property_numbers_are_unique() {
        let dir = InMemoryDirectory::new();
        let anna = dir.add_owner(owner("Anna")).unwrap();
        dir.add_property(property(anna.owner_id, 1)).unwrap();

        let err = dir.add_property(property(anna.owner_id, 1)).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
        assert_eq!(dir.properties().len(), 1);
    }

    #[test]
    fn property_requires_a_known_owner() {
        let dir = InMemoryDirectory::new();
        let err = dir.add_property(property(OwnerId::new(), 1)).unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    #[test]
    fn deactivated_properties_leave_the_billing_set() {
        let dir = InMemoryDirectory::new();
        let anna = dir.add_owner(owner("Anna")).unwrap();
        let p1 = dir.add_property(property(anna.owner_id, 2)).unwrap();
        dir.add_property(property(anna.owner_id, 1)).unwrap();

        dir.deactivate_property(&p1.property_id).unwrap();
        let active: Vec<u32> = dir.active_properties().iter().map(|p| p.number).collect();
        assert_eq!(active, vec![1]);
        assert_eq!(dir.properties().len(), 2);
    }

    #[test]
    fn association_is_validated() {
        let dir = InMemoryDirectory::new();
        assert!(dir.set_association(Association::default()).is_err());
        let saved = dir
            .set_association(Association {
                name: "Ängens samfällighetsförening".to_string(),
                ..Association::default()
            })
            .unwrap();
        assert_eq!(dir.association(), saved);
    }
}
