//! In-process store driver.
//!
//! Everything lives in one `RwLock`, which also gives
//! [`Store::replace_recipe_lines`] its atomicity: the whole swap happens
//! under a single write guard.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::schema::EntityKind;

use super::{
    IngredientRecord, NewIngredient, NewRecipe, NewRecipeLine, NewSupplier, RecipeLineRecord,
    RecipeRecord, RecipeWithLines, Store, StoreError, SupplierRecord,
};

#[derive(Debug, Default)]
struct Tables {
    suppliers: Vec<SupplierRecord>,
    ingredients: Vec<IngredientRecord>,
    recipes: Vec<RecipeRecord>,
    lines: Vec<RecipeLineRecord>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn duplicate_check<T>(
    rows: &[T],
    slug_of: impl Fn(&T) -> &str,
    slug: &str,
    kind: EntityKind,
) -> Result<(), StoreError> {
    if rows.iter().any(|r| slug_of(r) == slug) {
        Err(StoreError::Duplicate {
            kind,
            slug: slug.to_string(),
        })
    } else {
        Ok(())
    }
}

impl Store for MemoryStore {
    fn supplier_by_slug(&self, slug: &str) -> Result<Option<SupplierRecord>, StoreError> {
        Ok(self
            .read()
            .suppliers
            .iter()
            .find(|s| s.slug == slug)
            .cloned())
    }

    fn supplier_by_id(&self, id: i64) -> Result<Option<SupplierRecord>, StoreError> {
        Ok(self.read().suppliers.iter().find(|s| s.id == id).cloned())
    }

    fn insert_supplier(&self, new: NewSupplier) -> Result<SupplierRecord, StoreError> {
        let mut t = self.write();
        duplicate_check(&t.suppliers, |s| &s.slug, &new.slug, EntityKind::Supplier)?;
        let record = SupplierRecord {
            id: t.next_id(),
            slug: new.slug,
            name: new.name,
            contact_name: new.contact_name,
            contact_email: new.contact_email,
            contact_phone: new.contact_phone,
            notes: new.notes,
        };
        t.suppliers.push(record.clone());
        Ok(record)
    }

    fn update_supplier(&self, id: i64, new: NewSupplier) -> Result<SupplierRecord, StoreError> {
        let mut t = self.write();
        let row = t
            .suppliers
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(StoreError::MissingRow {
                kind: EntityKind::Supplier,
                id,
            })?;
        row.name = new.name;
        row.contact_name = new.contact_name;
        row.contact_email = new.contact_email;
        row.contact_phone = new.contact_phone;
        row.notes = new.notes;
        Ok(row.clone())
    }

    fn delete_supplier(&self, id: i64) -> Result<(), StoreError> {
        let mut t = self.write();
        let Some(pos) = t.suppliers.iter().position(|s| s.id == id) else {
            return Err(StoreError::MissingRow {
                kind: EntityKind::Supplier,
                id,
            });
        };
        let users = t
            .ingredients
            .iter()
            .filter(|i| i.supplier_id == Some(id))
            .map(|i| i.slug.clone())
            .collect::<Vec<_>>();
        if !users.is_empty() {
            return Err(StoreError::InUse {
                kind: EntityKind::Supplier,
                slug: t.suppliers[pos].slug.clone(),
                references: format!("ingredients [{}]", users.join(", ")),
            });
        }
        t.suppliers.remove(pos);
        Ok(())
    }

    fn suppliers(&self) -> Result<Vec<SupplierRecord>, StoreError> {
        Ok(self.read().suppliers.clone())
    }

    fn ingredient_by_slug(&self, slug: &str) -> Result<Option<IngredientRecord>, StoreError> {
        Ok(self
            .read()
            .ingredients
            .iter()
            .find(|i| i.slug == slug)
            .cloned())
    }

    fn ingredient_by_id(&self, id: i64) -> Result<Option<IngredientRecord>, StoreError> {
        Ok(self.read().ingredients.iter().find(|i| i.id == id).cloned())
    }

    fn insert_ingredient(&self, new: NewIngredient) -> Result<IngredientRecord, StoreError> {
        let mut t = self.write();
        duplicate_check(&t.ingredients, |i| &i.slug, &new.slug, EntityKind::Ingredient)?;
        if let Some(supplier_id) = new.supplier_id {
            if !t.suppliers.iter().any(|s| s.id == supplier_id) {
                return Err(StoreError::MissingRow {
                    kind: EntityKind::Supplier,
                    id: supplier_id,
                });
            }
        }
        let record = IngredientRecord {
            id: t.next_id(),
            slug: new.slug,
            name: new.name,
            category: new.category,
            purchase_unit: new.purchase_unit,
            purchase_cost: new.purchase_cost,
            includes_vat: new.includes_vat,
            conversion_rule: new.conversion_rule,
            supplier_id: new.supplier_id,
            notes: new.notes,
            last_purchased: new.last_purchased,
        };
        t.ingredients.push(record.clone());
        Ok(record)
    }

    fn update_ingredient(
        &self,
        id: i64,
        new: NewIngredient,
    ) -> Result<IngredientRecord, StoreError> {
        let mut t = self.write();
        if let Some(supplier_id) = new.supplier_id {
            if !t.suppliers.iter().any(|s| s.id == supplier_id) {
                return Err(StoreError::MissingRow {
                    kind: EntityKind::Supplier,
                    id: supplier_id,
                });
            }
        }
        let row = t
            .ingredients
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or(StoreError::MissingRow {
                kind: EntityKind::Ingredient,
                id,
            })?;
        row.name = new.name;
        row.category = new.category;
        row.purchase_unit = new.purchase_unit;
        row.purchase_cost = new.purchase_cost;
        row.includes_vat = new.includes_vat;
        row.conversion_rule = new.conversion_rule;
        row.supplier_id = new.supplier_id;
        row.notes = new.notes;
        row.last_purchased = new.last_purchased;
        Ok(row.clone())
    }

    fn delete_ingredient(&self, id: i64) -> Result<(), StoreError> {
        let mut t = self.write();
        let Some(pos) = t.ingredients.iter().position(|i| i.id == id) else {
            return Err(StoreError::MissingRow {
                kind: EntityKind::Ingredient,
                id,
            });
        };
        let used_by = t
            .lines
            .iter()
            .filter(|l| l.ingredient_id == Some(id))
            .map(|l| l.recipe_id)
            .collect::<Vec<_>>();
        if !used_by.is_empty() {
            let names = t
                .recipes
                .iter()
                .filter(|r| used_by.contains(&r.id))
                .map(|r| r.slug.clone())
                .collect::<Vec<_>>();
            return Err(StoreError::InUse {
                kind: EntityKind::Ingredient,
                slug: t.ingredients[pos].slug.clone(),
                references: format!("recipes [{}]", names.join(", ")),
            });
        }
        t.ingredients.remove(pos);
        Ok(())
    }

    fn ingredients(&self) -> Result<Vec<IngredientRecord>, StoreError> {
        Ok(self.read().ingredients.clone())
    }

    fn recipe_by_slug(&self, slug: &str) -> Result<Option<RecipeRecord>, StoreError> {
        Ok(self.read().recipes.iter().find(|r| r.slug == slug).cloned())
    }

    fn recipe_by_id(&self, id: i64) -> Result<Option<RecipeRecord>, StoreError> {
        Ok(self.read().recipes.iter().find(|r| r.id == id).cloned())
    }

    fn insert_recipe(&self, new: NewRecipe) -> Result<RecipeRecord, StoreError> {
        let mut t = self.write();
        duplicate_check(&t.recipes, |r| &r.slug, &new.slug, EntityKind::Recipe)?;
        if let Some(parent_id) = new.parent_id {
            if !t.recipes.iter().any(|r| r.id == parent_id) {
                return Err(StoreError::MissingRow {
                    kind: EntityKind::Recipe,
                    id: parent_id,
                });
            }
        }
        let record = RecipeRecord {
            id: t.next_id(),
            slug: new.slug,
            name: new.name,
            stage: new.stage,
            class: new.class,
            category: new.category,
            sell_price: new.sell_price,
            includes_vat: new.includes_vat,
            target_margin: new.target_margin,
            yield_amount: new.yield_amount,
            yield_unit: new.yield_unit,
            parent_id: new.parent_id,
        };
        t.recipes.push(record.clone());
        Ok(record)
    }

    fn update_recipe(&self, id: i64, new: NewRecipe) -> Result<RecipeRecord, StoreError> {
        let mut t = self.write();
        if let Some(parent_id) = new.parent_id {
            if !t.recipes.iter().any(|r| r.id == parent_id) {
                return Err(StoreError::MissingRow {
                    kind: EntityKind::Recipe,
                    id: parent_id,
                });
            }
        }
        let row = t
            .recipes
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(StoreError::MissingRow {
                kind: EntityKind::Recipe,
                id,
            })?;
        row.name = new.name;
        row.stage = new.stage;
        row.class = new.class;
        row.category = new.category;
        row.sell_price = new.sell_price;
        row.includes_vat = new.includes_vat;
        row.target_margin = new.target_margin;
        row.yield_amount = new.yield_amount;
        row.yield_unit = new.yield_unit;
        row.parent_id = new.parent_id;
        Ok(row.clone())
    }

    fn delete_recipe(&self, id: i64) -> Result<(), StoreError> {
        let mut t = self.write();
        let Some(pos) = t.recipes.iter().position(|r| r.id == id) else {
            return Err(StoreError::MissingRow {
                kind: EntityKind::Recipe,
                id,
            });
        };
        let used_by = t
            .lines
            .iter()
            .filter(|l| l.sub_recipe_id == Some(id))
            .map(|l| l.recipe_id)
            .collect::<Vec<_>>();
        if !used_by.is_empty() {
            let names = t
                .recipes
                .iter()
                .filter(|r| used_by.contains(&r.id))
                .map(|r| r.slug.clone())
                .collect::<Vec<_>>();
            return Err(StoreError::InUse {
                kind: EntityKind::Recipe,
                slug: t.recipes[pos].slug.clone(),
                references: format!("recipes [{}]", names.join(", ")),
            });
        }
        let recipe_id = t.recipes[pos].id;
        t.lines.retain(|l| l.recipe_id != recipe_id);
        t.recipes.remove(pos);
        Ok(())
    }

    fn recipes(&self) -> Result<Vec<RecipeRecord>, StoreError> {
        Ok(self.read().recipes.clone())
    }

    fn recipe_with_lines(&self, slug: &str) -> Result<Option<RecipeWithLines>, StoreError> {
        let t = self.read();
        let Some(recipe) = t.recipes.iter().find(|r| r.slug == slug).cloned() else {
            return Ok(None);
        };
        let lines = t
            .lines
            .iter()
            .filter(|l| l.recipe_id == recipe.id)
            .cloned()
            .collect();
        Ok(Some(RecipeWithLines { recipe, lines }))
    }

    fn lines_for_recipe(&self, recipe_id: i64) -> Result<Vec<RecipeLineRecord>, StoreError> {
        Ok(self
            .read()
            .lines
            .iter()
            .filter(|l| l.recipe_id == recipe_id)
            .cloned()
            .collect())
    }

    fn replace_recipe_lines(
        &self,
        recipe_id: i64,
        lines: Vec<NewRecipeLine>,
    ) -> Result<(), StoreError> {
        let mut t = self.write();
        if !t.recipes.iter().any(|r| r.id == recipe_id) {
            return Err(StoreError::MissingRow {
                kind: EntityKind::Recipe,
                id: recipe_id,
            });
        }
        // validate every referent before touching the table
        for line in &lines {
            if line.ingredient_id.is_some() == line.sub_recipe_id.is_some() {
                return Err(StoreError::Backend(
                    "recipe line must reference exactly one of ingredient or sub recipe".into(),
                ));
            }
            if let Some(id) = line.ingredient_id {
                if !t.ingredients.iter().any(|i| i.id == id) {
                    return Err(StoreError::MissingRow {
                        kind: EntityKind::Ingredient,
                        id,
                    });
                }
            }
            if let Some(id) = line.sub_recipe_id {
                if !t.recipes.iter().any(|r| r.id == id) {
                    return Err(StoreError::MissingRow {
                        kind: EntityKind::Recipe,
                        id,
                    });
                }
            }
        }
        t.lines.retain(|l| l.recipe_id != recipe_id);
        for line in lines {
            let id = t.next_id();
            t.lines.push(RecipeLineRecord {
                id,
                recipe_id,
                ingredient_id: line.ingredient_id,
                sub_recipe_id: line.sub_recipe_id,
                unit: line.unit,
                notes: line.notes,
            });
        }
        Ok(())
    }
}
