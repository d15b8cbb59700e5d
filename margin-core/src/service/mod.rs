//! Entity services: lookup, upsert, delete and the commit-time processor
//! for each entity kind.
//!
//! The services own the rules the store cannot express: change detection
//! that produces the `ignored` outcome, immutability of an ingredient's
//! supplier and a recipe's parent, and the union of template lines when a
//! recipe is read with its relations.

mod ingredient;
mod recipe;
mod supplier;

pub use ingredient::IngredientService;
pub use recipe::{effective_costing, merged_lines, EffectiveCosting, RecipeService, RecipeView};
pub use supplier::SupplierService;
