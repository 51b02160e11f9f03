//! Directory operations that depend on invoice state.

use levy_billing::{Association, Owner, Property, PropertyDeletionPolicy};
use levy_core::PropertyId;

use super::{BillingServices, ServiceError};
use crate::projections::InvoiceFilter;

/// What happened to a property on delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyRemoval {
    Deleted,
    /// Invoices reference it; it was deactivated instead.
    Deactivated,
}

impl BillingServices {
    pub fn association(&self) -> Association {
        self.directory.association()
    }

    pub fn update_association(&self, association: Association) -> Result<Association, ServiceError> {
        Ok(self.directory.set_association(association)?)
    }

    pub fn owners(&self) -> Vec<Owner> {
        self.directory.owners()
    }

    pub fn add_owner(&self, owner: Owner) -> Result<Owner, ServiceError> {
        Ok(self.directory.add_owner(owner)?)
    }

    pub fn properties(&self) -> Vec<Property> {
        self.directory.properties()
    }

    pub fn add_property(&self, property: Property) -> Result<Property, ServiceError> {
        Ok(self.directory.add_property(property)?)
    }

    /// A property no invoice references is removed. Otherwise the configured
    /// policy decides between refusing and deactivating it.
    pub fn delete_property(&self, property_id: PropertyId) -> Result<PropertyRemoval, ServiceError> {
        // Generation must not stage the property between the check and the removal.
        let _guard = self.lock_generation()?;

        if self.directory.property(&property_id).is_none() {
            return Err(ServiceError::not_found(format!("property {property_id}")));
        }

        let invoiced = !self
            .invoices
            .query(&InvoiceFilter {
                property_id: Some(property_id),
                ..InvoiceFilter::default()
            })
            .is_empty();
        if !invoiced {
            self.directory.remove_property(&property_id)?;
            tracing::info!(property_id = %property_id, "property deleted");
            return Ok(PropertyRemoval::Deleted);
        }

        match self.config.property_deletion {
            PropertyDeletionPolicy::Reject => Err(ServiceError::State(format!(
                "property {property_id} has invoices and cannot be deleted"
            ))),
            PropertyDeletionPolicy::SoftBlock => {
                self.directory.deactivate_property(&property_id)?;
                tracing::info!(property_id = %property_id, "invoiced property deactivated instead of deleted");
                Ok(PropertyRemoval::Deactivated)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use super::*;
    use crate::config::BillingConfig;
    use crate::retry::RetryPolicy;

    #[test]
    fn uninvoiced_property_is_removed() {
        let services = seeded(2);
        let property = services.properties()[1].clone();
        assert_eq!(services.delete_property(property.property_id).unwrap(), PropertyRemoval::Deleted);
        assert_eq!(services.properties().len(), 1);
        assert!(matches!(
            services.delete_property(property.property_id),
            Err(ServiceError::NotFound(_))
        ));
    }

    #[test]
    fn invoiced_property_is_rejected_by_default() {
        let (services, invoices) = generated(1);
        let err = services.delete_property(invoices[0].property_id).unwrap_err();
        assert!(matches!(err, ServiceError::State(_)));
        assert_eq!(services.properties().len(), 1);
    }

    #[test]
    fn soft_block_deactivates_and_excludes_from_billing() {
        let config = BillingConfig {
            property_deletion: PropertyDeletionPolicy::SoftBlock,
            ..BillingConfig::default()
        };
        let services = BillingServices::new(config).with_retry_policy(RetryPolicy::no_retry());
        seed_directory(&services, 2);
        let billing = services.create_billing(annual_fee_2024(), true).unwrap();
        let invoiced = services.billing_invoices(billing.billing_id).unwrap()[0].property_id;

        assert_eq!(services.delete_property(invoiced).unwrap(), PropertyRemoval::Deactivated);
        assert_eq!(services.properties().len(), 2);

        let next = services
            .create_billing(levy_billing::BillingTerms { period: 2, ..annual_fee_2024() }, true)
            .unwrap();
        assert_eq!(services.billing_invoices(next.billing_id).unwrap().len(), 1);
    }

    #[test]
    fn deletion_racing_generation_never_orphans_an_invoice() {
        for _ in 0..50 {
            let services = seeded(2);
            let target = services.properties()[0].property_id;
            let billing = services.create_billing(annual_fee_2024(), false).unwrap();

            let (generated, removed) = std::thread::scope(|s| {
                let generate = s.spawn(|| services.generate_invoices(billing.billing_id));
                let delete = s.spawn(|| services.delete_property(target));
                (generate.join().unwrap(), delete.join().unwrap())
            });

            let report = generated.unwrap();
            let known: Vec<PropertyId> = services.properties().iter().map(|p| p.property_id).collect();
            let invoices = services.invoices(&InvoiceFilter::default());
            assert!(invoices.iter().all(|inv| known.contains(&inv.property_id)));
            match removed {
                Ok(PropertyRemoval::Deleted) => assert_eq!(report.invoices.len(), 1),
                Err(ServiceError::State(_)) => assert_eq!(report.invoices.len(), 2),
                other => panic!("unexpected removal outcome: {other:?}"),
            }
        }
    }
}
