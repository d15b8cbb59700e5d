//! The narrow query interface between the engine and whatever holds the
//! data.
//!
//! Tables mirror the entity model: suppliers, ingredients, recipes and
//! recipe lines, every slug unique, foreign keys by integer id. The
//! in-process [`MemoryStore`] is the driver the CLI and the tests run on;
//! SQL drivers implement the same trait behind the same seam.

mod memory;

pub use memory::MemoryStore;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use crate::schema::{EntityKind, RecipeClass, Stage};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} not found: '{slug}'")]
    NotFound { kind: EntityKind, slug: String },
    #[error("{kind} id {id} does not exist")]
    MissingRow { kind: EntityKind, id: i64 },
    #[error("{kind} slug '{slug}' already exists")]
    Duplicate { kind: EntityKind, slug: String },
    #[error("{kind} '{slug}' is still referenced by {references}")]
    InUse {
        kind: EntityKind,
        slug: String,
        references: String,
    },
    #[error("store failure: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SupplierRecord {
    pub id: i64,
    pub slug: String,
    pub name: String,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NewSupplier {
    pub slug: String,
    pub name: String,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngredientRecord {
    pub id: i64,
    pub slug: String,
    pub name: String,
    pub category: String,
    /// Quantity-with-unit string, parsed on demand.
    pub purchase_unit: String,
    /// Minor units.
    pub purchase_cost: i64,
    pub includes_vat: bool,
    pub conversion_rule: Option<String>,
    pub supplier_id: Option<i64>,
    pub notes: Option<String>,
    pub last_purchased: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NewIngredient {
    pub slug: String,
    pub name: String,
    pub category: String,
    pub purchase_unit: String,
    pub purchase_cost: i64,
    pub includes_vat: bool,
    pub conversion_rule: Option<String>,
    pub supplier_id: Option<i64>,
    pub notes: Option<String>,
    pub last_purchased: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecipeRecord {
    pub id: i64,
    pub slug: String,
    pub name: String,
    pub stage: Stage,
    pub class: RecipeClass,
    pub category: Option<String>,
    /// As entered; `includes_vat` says how to read it. `None` when the
    /// price is inherited through `parent_id`.
    pub sell_price: Option<i64>,
    pub includes_vat: bool,
    pub target_margin: u8,
    pub yield_amount: Option<Decimal>,
    pub yield_unit: Option<String>,
    pub parent_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewRecipe {
    pub slug: String,
    pub name: String,
    pub stage: Stage,
    pub class: RecipeClass,
    pub category: Option<String>,
    pub sell_price: Option<i64>,
    pub includes_vat: bool,
    pub target_margin: u8,
    pub yield_amount: Option<Decimal>,
    pub yield_unit: Option<String>,
    pub parent_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecipeLineRecord {
    pub id: i64,
    pub recipe_id: i64,
    pub ingredient_id: Option<i64>,
    pub sub_recipe_id: Option<i64>,
    /// Quantity-with-unit string for the line.
    pub unit: String,
    pub notes: Option<String>,
}

/// One of `ingredient_id` / `sub_recipe_id`, never both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecipeLine {
    pub ingredient_id: Option<i64>,
    pub sub_recipe_id: Option<i64>,
    pub unit: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RecipeWithLines {
    pub recipe: RecipeRecord,
    pub lines: Vec<RecipeLineRecord>,
}

/// The storage seam. Single-writer: callers serialise mutations through
/// the import pipeline, so implementations only need per-call atomicity —
/// except [`Store::replace_recipe_lines`], which must swap the whole line
/// set or none of it.
pub trait Store: Send + Sync {
    fn supplier_by_slug(&self, slug: &str) -> Result<Option<SupplierRecord>, StoreError>;
    fn supplier_by_id(&self, id: i64) -> Result<Option<SupplierRecord>, StoreError>;
    fn insert_supplier(&self, new: NewSupplier) -> Result<SupplierRecord, StoreError>;
    fn update_supplier(&self, id: i64, new: NewSupplier) -> Result<SupplierRecord, StoreError>;
    fn delete_supplier(&self, id: i64) -> Result<(), StoreError>;
    fn suppliers(&self) -> Result<Vec<SupplierRecord>, StoreError>;

    fn ingredient_by_slug(&self, slug: &str) -> Result<Option<IngredientRecord>, StoreError>;
    fn ingredient_by_id(&self, id: i64) -> Result<Option<IngredientRecord>, StoreError>;
    fn insert_ingredient(&self, new: NewIngredient) -> Result<IngredientRecord, StoreError>;
    fn update_ingredient(&self, id: i64, new: NewIngredient)
        -> Result<IngredientRecord, StoreError>;
    fn delete_ingredient(&self, id: i64) -> Result<(), StoreError>;
    fn ingredients(&self) -> Result<Vec<IngredientRecord>, StoreError>;

    fn recipe_by_slug(&self, slug: &str) -> Result<Option<RecipeRecord>, StoreError>;
    fn recipe_by_id(&self, id: i64) -> Result<Option<RecipeRecord>, StoreError>;
    fn insert_recipe(&self, new: NewRecipe) -> Result<RecipeRecord, StoreError>;
    fn update_recipe(&self, id: i64, new: NewRecipe) -> Result<RecipeRecord, StoreError>;
    fn delete_recipe(&self, id: i64) -> Result<(), StoreError>;
    fn recipes(&self) -> Result<Vec<RecipeRecord>, StoreError>;

    /// Recipe plus its own lines in one round trip.
    fn recipe_with_lines(&self, slug: &str) -> Result<Option<RecipeWithLines>, StoreError>;
    fn lines_for_recipe(&self, recipe_id: i64) -> Result<Vec<RecipeLineRecord>, StoreError>;
    /// Atomic delete-then-insert of a recipe's whole line set.
    fn replace_recipe_lines(
        &self,
        recipe_id: i64,
        lines: Vec<NewRecipeLine>,
    ) -> Result<(), StoreError>;
}
