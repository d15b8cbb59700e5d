use std::sync::Arc;

use crate::diff::{has_changes, FieldMap, FieldSource};
use crate::import::{EntityProcessor, Outcome, ProcessError, ResolvedEntity, ResolvedIngredient};
use crate::schema::EntityKind;
use crate::settings::SharedSettings;
use crate::store::{IngredientRecord, NewIngredient, Store, StoreError};

pub struct IngredientService {
    store: Arc<dyn Store>,
    settings: Arc<SharedSettings>,
}

// supplier_id is in the map so that an allowed supplier change (setting one
// where there was none) still registers as an upsert; forbidden changes are
// rejected before the comparison runs.
const FIELDS: FieldMap = &[
    ("name", FieldSource::Key("name")),
    ("category", FieldSource::Key("category")),
    ("purchase_unit", FieldSource::Key("purchase_unit")),
    ("purchase_cost", FieldSource::Key("purchase_cost")),
    ("includes_vat", FieldSource::Key("includes_vat")),
    ("conversion_rule", FieldSource::Key("conversion_rule")),
    ("supplier_id", FieldSource::Key("supplier_id")),
    ("notes", FieldSource::Key("notes")),
    ("last_purchased", FieldSource::Key("last_purchased")),
];

impl IngredientService {
    pub fn new(store: Arc<dyn Store>, settings: Arc<SharedSettings>) -> Self {
        Self { store, settings }
    }

    pub fn exists(&self, slug: &str) -> Result<bool, StoreError> {
        Ok(self.store.ingredient_by_slug(slug)?.is_some())
    }

    pub fn find_by_slug(&self, slug: &str) -> Result<Option<IngredientRecord>, StoreError> {
        self.store.ingredient_by_slug(slug)
    }

    pub fn upsert(
        &self,
        data: &ResolvedIngredient,
    ) -> Result<(IngredientRecord, Outcome), ProcessError> {
        let supplier_id = match &data.supplier_slug {
            None => None,
            Some(slug) => {
                let supplier = self.store.supplier_by_slug(slug)?.ok_or_else(|| {
                    ProcessError::MissingDependency {
                        entity: data.slug.clone(),
                        dependency: slug.clone(),
                    }
                })?;
                Some(supplier.id)
            }
        };

        let existing = self.store.ingredient_by_slug(&data.slug)?;
        if let Some(existing) = &existing {
            if existing.supplier_id.is_some() && existing.supplier_id != supplier_id {
                return Err(ProcessError::ImmutableField {
                    entity: data.slug.clone(),
                    field: "supplier",
                });
            }
        }

        let new = NewIngredient {
            slug: data.slug.clone(),
            name: data.name.clone(),
            category: data.category.clone(),
            purchase_unit: data.purchase_unit.clone(),
            purchase_cost: data.purchase_cost,
            includes_vat: data.includes_vat,
            conversion_rule: data.conversion_rule.clone(),
            supplier_id,
            notes: data.notes.clone(),
            last_purchased: data.last_purchased,
        };
        let incoming = serde_json::to_value(&new).expect("ingredient serialises");

        match existing {
            None => {
                let record = self.store.insert_ingredient(new)?;
                self.settings.invalidate_derived();
                Ok((record, Outcome::Created))
            }
            Some(existing) => {
                let current = serde_json::to_value(&existing).expect("ingredient serialises");
                if has_changes(Some(&current), &incoming, FIELDS) {
                    let record = self.store.update_ingredient(existing.id, new)?;
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
            .ingredient_by_slug(slug)?
            .ok_or_else(|| StoreError::NotFound {
                kind: EntityKind::Ingredient,
                slug: slug.to_string(),
            })?;
        self.store.delete_ingredient(record.id)?;
        self.settings.invalidate_derived();
        Ok(())
    }
}

impl EntityProcessor for IngredientService {
    fn process(&self, entity: &ResolvedEntity) -> Result<Outcome, ProcessError> {
        let ResolvedEntity::Ingredient(data) = entity else {
            return Err(ProcessError::Invariant(format!(
                "ingredient processor received a {}",
                entity.kind()
            )));
        };
        self.upsert(data).map(|(_, outcome)| outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::ResolvedSupplier;
    use crate::service::SupplierService;
    use crate::store::MemoryStore;

    fn services() -> (SupplierService, IngredientService) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let settings = Arc::new(SharedSettings::default());
        (
            SupplierService::new(store.clone(), settings.clone()),
            IngredientService::new(store, settings),
        )
    }

    fn resolved(slug: &str, supplier: Option<&str>) -> ResolvedIngredient {
        ResolvedIngredient {
            slug: slug.into(),
            name: slug.to_uppercase(),
            category: "misc".into(),
            purchase_unit: "1kg".into(),
            purchase_cost: 599,
            includes_vat: false,
            conversion_rule: None,
            supplier_slug: supplier.map(Into::into),
            notes: None,
            last_purchased: None,
        }
    }

    fn supplier(slug: &str) -> ResolvedSupplier {
        ResolvedSupplier {
            slug: slug.into(),
            name: slug.to_uppercase(),
            contact_name: None,
            contact_email: None,
            contact_phone: None,
            notes: None,
        }
    }

    #[test]
    fn missing_supplier_is_a_missing_dependency() {
        let (_, ingredients) = services();
        let err = ingredients.upsert(&resolved("ham", Some("ghost"))).unwrap_err();
        assert!(matches!(
            err,
            ProcessError::MissingDependency { ref dependency, .. } if dependency == "ghost"
        ));
    }

    #[test]
    fn supplier_is_immutable_after_creation() {
        let (suppliers, ingredients) = services();
        suppliers.upsert(&supplier("s1")).unwrap();
        suppliers.upsert(&supplier("s2")).unwrap();

        let (record, outcome) = ingredients.upsert(&resolved("ham", Some("s1"))).unwrap();
        assert_eq!(outcome, Outcome::Created);

        let err = ingredients.upsert(&resolved("ham", Some("s2"))).unwrap_err();
        assert!(matches!(
            err,
            ProcessError::ImmutableField { field: "supplier", .. }
        ));
        // and the store is untouched
        let unchanged = ingredients.find_by_slug("ham").unwrap().unwrap();
        assert_eq!(unchanged.supplier_id, record.supplier_id);
    }

    #[test]
    fn setting_a_supplier_where_there_was_none_is_an_upsert() {
        let (suppliers, ingredients) = services();
        suppliers.upsert(&supplier("s1")).unwrap();

        ingredients.upsert(&resolved("ham", None)).unwrap();
        let (record, outcome) = ingredients.upsert(&resolved("ham", Some("s1"))).unwrap();
        assert_eq!(outcome, Outcome::Upserted);
        assert!(record.supplier_id.is_some());
    }

    #[test]
    fn unchanged_reimport_is_ignored() {
        let (suppliers, ingredients) = services();
        suppliers.upsert(&supplier("s1")).unwrap();
        ingredients.upsert(&resolved("ham", Some("s1"))).unwrap();
        let (_, outcome) = ingredients.upsert(&resolved("ham", Some("s1"))).unwrap();
        assert_eq!(outcome, Outcome::Ignored);
    }
}
