use std::sync::Arc;

use crate::diff::{has_changes, FieldMap, FieldSource};
use crate::import::{EntityProcessor, Outcome, ProcessError, ResolvedEntity, ResolvedSupplier};
use crate::schema::EntityKind;
use crate::settings::SharedSettings;
use crate::store::{NewSupplier, Store, StoreError, SupplierRecord};

pub struct SupplierService {
    store: Arc<dyn Store>,
    settings: Arc<SharedSettings>,
}

const FIELDS: FieldMap = &[
    ("name", FieldSource::Key("name")),
    ("contact_name", FieldSource::Key("contact_name")),
    ("contact_email", FieldSource::Key("contact_email")),
    ("contact_phone", FieldSource::Key("contact_phone")),
    ("notes", FieldSource::Key("notes")),
];

impl SupplierService {
    pub fn new(store: Arc<dyn Store>, settings: Arc<SharedSettings>) -> Self {
        Self { store, settings }
    }

    pub fn exists(&self, slug: &str) -> Result<bool, StoreError> {
        Ok(self.store.supplier_by_slug(slug)?.is_some())
    }

    pub fn find_by_slug(&self, slug: &str) -> Result<Option<SupplierRecord>, StoreError> {
        self.store.supplier_by_slug(slug)
    }

    pub fn upsert(
        &self,
        data: &ResolvedSupplier,
    ) -> Result<(SupplierRecord, Outcome), ProcessError> {
        let existing = self.store.supplier_by_slug(&data.slug)?;
        let new = NewSupplier {
            slug: data.slug.clone(),
            name: data.name.clone(),
            contact_name: data.contact_name.clone(),
            contact_email: data.contact_email.clone(),
            contact_phone: data.contact_phone.clone(),
            notes: data.notes.clone(),
        };
        let incoming = serde_json::to_value(&new).expect("supplier serialises");

        match existing {
            None => {
                let record = self.store.insert_supplier(new)?;
                self.settings.invalidate_derived();
                Ok((record, Outcome::Created))
            }
            Some(existing) => {
                let current = serde_json::to_value(&existing).expect("supplier serialises");
                if has_changes(Some(&current), &incoming, FIELDS) {
                    let record = self.store.update_supplier(existing.id, new)?;
                    self.settings.invalidate_derived();
                    Ok((record, Outcome::Upserted))
                } else {
                    Ok((existing, Outcome::Ignored))
                }
            }
        }
    }

    pub fn delete(&self, slug: &str) -> Result<(), ProcessError> {
        let record = self
            .store
            .supplier_by_slug(slug)?
            .ok_or_else(|| StoreError::NotFound {
                kind: EntityKind::Supplier,
                slug: slug.to_string(),
            })?;
        self.store.delete_supplier(record.id)?;
        self.settings.invalidate_derived();
        Ok(())
    }
}

impl EntityProcessor for SupplierService {
    fn process(&self, entity: &ResolvedEntity) -> Result<Outcome, ProcessError> {
        let ResolvedEntity::Supplier(data) = entity else {
            return Err(ProcessError::Invariant(format!(
                "supplier processor received a {}",
                entity.kind()
            )));
        };
        self.upsert(data).map(|(_, outcome)| outcome)
    }
}
