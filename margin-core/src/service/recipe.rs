use std::sync::Arc;

use crate::diff::{has_changes, FieldMap, FieldSource};
use crate::import::{
    EntityProcessor, Outcome, ProcessError, ResolvedEntity, ResolvedLine, ResolvedRecipe,
};
use crate::schema::{EntityKind, LineKind};
use crate::settings::SharedSettings;
use crate::store::{
    NewRecipe, NewRecipeLine, RecipeLineRecord, RecipeRecord, Store, StoreError,
};

/// Bound on parent-chain walks; mirrors the costing recursion bound.
const MAX_PARENT_DEPTH: usize = 10;

pub struct RecipeService {
    store: Arc<dyn Store>,
    settings: Arc<SharedSettings>,
}

const FIELDS: FieldMap = &[
    ("name", FieldSource::Key("name")),
    ("stage", FieldSource::Key("stage")),
    ("class", FieldSource::Key("class")),
    ("category", FieldSource::Key("category")),
    ("sell_price", FieldSource::Key("sell_price")),
    ("includes_vat", FieldSource::Key("includes_vat")),
    ("target_margin", FieldSource::Key("target_margin")),
    ("yield_amount", FieldSource::Key("yield_amount")),
    ("yield_unit", FieldSource::Key("yield_unit")),
    ("parent_id", FieldSource::Key("parent_id")),
];

/// A recipe read with its relations: lines are the union of the recipe's
/// own lines and everything its ancestor templates contribute.
#[derive(Debug, Clone)]
pub struct RecipeView {
    pub recipe: RecipeRecord,
    pub lines: Vec<RecipeLineRecord>,
}

impl RecipeService {
    pub fn new(store: Arc<dyn Store>, settings: Arc<SharedSettings>) -> Self {
        Self { store, settings }
    }

    pub fn exists(&self, slug: &str) -> Result<bool, StoreError> {
        Ok(self.store.recipe_by_slug(slug)?.is_some())
    }

    pub fn find_by_slug(
        &self,
        slug: &str,
        with_lines: bool,
    ) -> Result<Option<RecipeView>, StoreError> {
        let Some(recipe) = self.store.recipe_by_slug(slug)? else {
            return Ok(None);
        };
        let lines = if with_lines {
            merged_lines(self.store.as_ref(), &recipe)?
        } else {
            Vec::new()
        };
        Ok(Some(RecipeView { recipe, lines }))
    }

    pub fn upsert(&self, data: &ResolvedRecipe) -> Result<(RecipeRecord, Outcome), ProcessError> {
        let settings = self.settings.current();

        let parent = match &data.parent_slug {
            None => None,
            Some(slug) => Some(self.store.recipe_by_slug(slug)?.ok_or_else(|| {
                ProcessError::MissingDependency {
                    entity: data.slug.clone(),
                    dependency: slug.clone(),
                }
            })?),
        };
        let parent_id = parent.as_ref().map(|p| p.id);

        // a price must exist somewhere: here or up the parent chain
        if data.sell_price.is_none() {
            let inherited = match &parent {
                Some(parent) => effective_costing(self.store.as_ref(), parent)?,
                None => None,
            };
            if inherited.is_none() {
                return Err(ProcessError::Invariant(format!(
                    "'{}' has no sell price and no ancestor provides one",
                    data.slug
                )));
            }
        }

        let existing = self.store.recipe_by_slug(&data.slug)?;
        if let Some(existing) = &existing {
            if existing.parent_id.is_some() && existing.parent_id != parent_id {
                return Err(ProcessError::ImmutableField {
                    entity: data.slug.clone(),
                    field: "parent",
                });
            }
        }

        let new = NewRecipe {
            slug: data.slug.clone(),
            name: data.name.clone(),
            stage: data.stage,
            class: data.class,
            category: data.category.clone(),
            sell_price: data.sell_price,
            includes_vat: data.includes_vat.unwrap_or(settings.price_includes_vat),
            target_margin: data.target_margin.unwrap_or(settings.target_margin),
            yield_amount: data.yield_amount,
            yield_unit: data.yield_unit.clone(),
            parent_id,
        };
        let incoming = serde_json::to_value(&new).expect("recipe serialises");
        let lines = self.resolve_lines(data)?;

        match existing {
            None => {
                let record = self.store.insert_recipe(new)?;
                self.store.replace_recipe_lines(record.id, lines)?;
                self.settings.invalidate_derived();
                Ok((record, Outcome::Created))
            }
            Some(existing) => {
                let current = serde_json::to_value(&existing).expect("recipe serialises");
                let scalars_changed = has_changes(Some(&current), &incoming, FIELDS);
                let lines_changed =
                    !lines_match(&self.store.lines_for_recipe(existing.id)?, &lines);

                if !scalars_changed && !lines_changed {
                    return Ok((existing, Outcome::Ignored));
                }
                let record = if scalars_changed {
                    self.store.update_recipe(existing.id, new)?
                } else {
                    existing
                };
                if lines_changed {
                    self.store.replace_recipe_lines(record.id, lines)?;
                }
                self.settings.invalidate_derived();
                Ok((record, Outcome::Upserted))
            }
        }
    }

    pub fn delete(&self, slug: &str) -> Result<(), ProcessError> {
        let record = self
            .store
            .recipe_by_slug(slug)?
            .ok_or_else(|| StoreError::NotFound {
                kind: EntityKind::Recipe,
                slug: slug.to_string(),
            })?;
        self.store.delete_recipe(record.id)?;
        self.settings.invalidate_derived();
        Ok(())
    }

    fn resolve_lines(&self, data: &ResolvedRecipe) -> Result<Vec<NewRecipeLine>, ProcessError> {
        let mut lines = Vec::with_capacity(data.lines.len());
        for line in &data.lines {
            lines.push(self.resolve_line(&data.slug, line)?);
        }
        Ok(lines)
    }

    fn resolve_line(
        &self,
        recipe_slug: &str,
        line: &ResolvedLine,
    ) -> Result<NewRecipeLine, ProcessError> {
        let missing = || ProcessError::MissingDependency {
            entity: recipe_slug.to_string(),
            dependency: line.slug.clone(),
        };
        match line.kind {
            LineKind::Ingredient => {
                let ingredient = self
                    .store
                    .ingredient_by_slug(&line.slug)?
                    .ok_or_else(missing)?;
                Ok(NewRecipeLine {
                    ingredient_id: Some(ingredient.id),
                    sub_recipe_id: None,
                    unit: line.unit.clone(),
                    notes: line.notes.clone(),
                })
            }
            LineKind::Recipe => {
                let child = self.store.recipe_by_slug(&line.slug)?.ok_or_else(missing)?;
                if child.yield_amount.is_none() || child.yield_unit.is_none() {
                    return Err(ProcessError::Invariant(format!(
                        "'{}' uses '{}' as a sub recipe, but it declares no yield",
                        recipe_slug, line.slug
                    )));
                }
                Ok(NewRecipeLine {
                    ingredient_id: None,
                    sub_recipe_id: Some(child.id),
                    unit: line.unit.clone(),
                    notes: line.notes.clone(),
                })
            }
        }
    }
}

fn lines_match(existing: &[RecipeLineRecord], incoming: &[NewRecipeLine]) -> bool {
    existing.len() == incoming.len()
        && existing.iter().zip(incoming).all(|(old, new)| {
            old.ingredient_id == new.ingredient_id
                && old.sub_recipe_id == new.sub_recipe_id
                && old.unit == new.unit
                && old.notes == new.notes
        })
}

impl EntityProcessor for RecipeService {
    fn process(&self, entity: &ResolvedEntity) -> Result<Outcome, ProcessError> {
        let ResolvedEntity::Recipe(data) = entity else {
            return Err(ProcessError::Invariant(format!(
                "recipe processor received a {}",
                entity.kind()
            )));
        };
        self.upsert(data).map(|(_, outcome)| outcome)
    }
}

/// Union of a recipe's lines with everything its ancestors contribute,
/// outermost template first. Overlay semantics are deliberately absent: a
/// line declared by both parent and child appears twice.
pub fn merged_lines(
    store: &dyn Store,
    recipe: &RecipeRecord,
) -> Result<Vec<RecipeLineRecord>, StoreError> {
    let mut chain = vec![recipe.clone()];
    let mut current = recipe.clone();
    while let Some(parent_id) = current.parent_id {
        if chain.len() > MAX_PARENT_DEPTH {
            tracing::warn!(
                "parent chain of '{}' deeper than {MAX_PARENT_DEPTH}, truncating",
                recipe.slug
            );
            break;
        }
        let Some(parent) = store.recipe_by_id(parent_id)? else {
            tracing::warn!("recipe '{}' has a dangling parent id {parent_id}", current.slug);
            break;
        };
        chain.push(parent.clone());
        current = parent;
    }

    let mut lines = Vec::new();
    for recipe in chain.iter().rev() {
        lines.extend(store.lines_for_recipe(recipe.id)?);
    }
    Ok(lines)
}

/// The price a margin calculation should use: the recipe's own, or the
/// first one found up the parent chain, with the VAT flag of whichever
/// record supplied it. The target margin is always the recipe's own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveCosting {
    pub sell_price: i64,
    pub includes_vat: bool,
    pub target_margin: u8,
}

pub fn effective_costing(
    store: &dyn Store,
    recipe: &RecipeRecord,
) -> Result<Option<EffectiveCosting>, StoreError> {
    let mut current = recipe.clone();
    for _ in 0..=MAX_PARENT_DEPTH {
        if let Some(price) = current.sell_price {
            return Ok(Some(EffectiveCosting {
                sell_price: price,
                includes_vat: current.includes_vat,
                target_margin: recipe.target_margin,
            }));
        }
        match current.parent_id {
            Some(parent_id) => match store.recipe_by_id(parent_id)? {
                Some(parent) => current = parent,
                None => return Ok(None),
            },
            None => return Ok(None),
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::ResolvedIngredient;
    use crate::service::IngredientService;
    use crate::schema::{RecipeClass, Stage};
    use crate::store::MemoryStore;

    struct Fixture {
        store: Arc<dyn Store>,
        recipes: RecipeService,
        ingredients: IngredientService,
    }

    fn fixture() -> Fixture {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let settings = Arc::new(SharedSettings::default());
        Fixture {
            store: store.clone(),
            recipes: RecipeService::new(store.clone(), settings.clone()),
            ingredients: IngredientService::new(store, settings),
        }
    }

    fn ingredient(slug: &str) -> ResolvedIngredient {
        ResolvedIngredient {
            slug: slug.into(),
            name: slug.to_uppercase(),
            category: "misc".into(),
            purchase_unit: "1kg".into(),
            purchase_cost: 100,
            includes_vat: false,
            conversion_rule: None,
            supplier_slug: None,
            notes: None,
            last_purchased: None,
        }
    }

    fn recipe(slug: &str) -> ResolvedRecipe {
        ResolvedRecipe {
            slug: slug.into(),
            name: slug.to_uppercase(),
            stage: Stage::Active,
            class: RecipeClass::MenuItem,
            category: None,
            sell_price: Some(400),
            includes_vat: None,
            target_margin: None,
            yield_amount: None,
            yield_unit: None,
            parent_slug: None,
            lines: Vec::new(),
        }
    }

    fn line(kind: LineKind, slug: &str, unit: &str) -> ResolvedLine {
        ResolvedLine {
            kind,
            slug: slug.into(),
            unit: unit.into(),
            notes: None,
        }
    }

    #[test]
    fn defaults_come_from_settings() {
        let f = fixture();
        let (record, _) = f.recipes.upsert(&recipe("pie")).unwrap();
        assert_eq!(record.target_margin, 65);
        assert!(!record.includes_vat);
    }

    #[test]
    fn missing_line_ingredient_is_a_missing_dependency() {
        let f = fixture();
        let mut data = recipe("pie");
        data.lines.push(line(LineKind::Ingredient, "ghost", "25g"));
        let err = f.recipes.upsert(&data).unwrap_err();
        assert!(matches!(err, ProcessError::MissingDependency { .. }));
    }

    #[test]
    fn parent_is_immutable_after_creation() {
        let f = fixture();
        f.recipes.upsert(&recipe("base-a")).unwrap();
        f.recipes.upsert(&recipe("base-b")).unwrap();

        let mut child = recipe("child");
        child.parent_slug = Some("base-a".into());
        f.recipes.upsert(&child).unwrap();

        child.parent_slug = Some("base-b".into());
        let err = f.recipes.upsert(&child).unwrap_err();
        assert!(matches!(
            err,
            ProcessError::ImmutableField { field: "parent", .. }
        ));
    }

    #[test]
    fn price_must_exist_somewhere() {
        let f = fixture();
        let mut data = recipe("orphan");
        data.sell_price = None;
        let err = f.recipes.upsert(&data).unwrap_err();
        assert!(matches!(err, ProcessError::Invariant(_)));

        // with a priced parent it goes through
        f.recipes.upsert(&recipe("base")).unwrap();
        let mut child = recipe("child");
        child.sell_price = None;
        child.parent_slug = Some("base".into());
        let (record, _) = f.recipes.upsert(&child).unwrap();
        let effective = effective_costing(f.store.as_ref(), &record)
            .unwrap()
            .unwrap();
        assert_eq!(effective.sell_price, 400);
    }

    #[test]
    fn sub_recipe_lines_require_a_yield() {
        let f = fixture();
        f.recipes.upsert(&recipe("sauce")).unwrap();

        let mut data = recipe("pie");
        data.lines.push(line(LineKind::Recipe, "sauce", "50ml"));
        let err = f.recipes.upsert(&data).unwrap_err();
        assert!(matches!(err, ProcessError::Invariant(_)));
    }

    #[test]
    fn line_set_changes_are_upserts() {
        let f = fixture();
        f.ingredients.upsert(&ingredient("ham")).unwrap();

        let mut data = recipe("sandwich");
        data.lines.push(line(LineKind::Ingredient, "ham", "25g"));
        let (_, outcome) = f.recipes.upsert(&data).unwrap();
        assert_eq!(outcome, Outcome::Created);

        let (_, outcome) = f.recipes.upsert(&data).unwrap();
        assert_eq!(outcome, Outcome::Ignored);

        data.lines[0].unit = "30g".into();
        let (record, outcome) = f.recipes.upsert(&data).unwrap();
        assert_eq!(outcome, Outcome::Upserted);
        let lines = f.store.lines_for_recipe(record.id).unwrap();
        assert_eq!(lines[0].unit, "30g");
    }

    #[test]
    fn reading_with_lines_unions_the_template() {
        let f = fixture();
        f.ingredients.upsert(&ingredient("bun")).unwrap();
        f.ingredients.upsert(&ingredient("beef")).unwrap();

        let mut base = recipe("burger-base");
        base.class = RecipeClass::BaseTemplate;
        base.lines.push(line(LineKind::Ingredient, "bun", "1 unit"));
        f.recipes.upsert(&base).unwrap();

        let mut child = recipe("house-burger");
        child.parent_slug = Some("burger-base".into());
        child.lines.push(line(LineKind::Ingredient, "beef", "150g"));
        f.recipes.upsert(&child).unwrap();

        let view = f
            .recipes
            .find_by_slug("house-burger", true)
            .unwrap()
            .unwrap();
        assert_eq!(view.lines.len(), 2);
        // template lines come first
        assert_eq!(view.lines[0].unit, "1 unit");
        assert_eq!(view.lines[1].unit, "150g");
    }
}
