//! Recursive recipe costing and margin derivation.
//!
//! Costs are computed in integer minor units with `Decimal` scaling in
//! between; every rounding step rounds up so the computed cost never
//! flatters the margin. Lines that cannot be parsed or converted
//! contribute zero and surface a warning instead of failing the whole
//! recipe; structural problems (unknown recipe, nesting deeper than
//! [`MAX_COST_DEPTH`]) are hard errors.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::convert::{convert, ConversionRule};
use crate::quantity;
use crate::schema::{EntityKind, LineKind};
use crate::service::{effective_costing, merged_lines};
use crate::settings::Settings;
use crate::store::{RecipeLineRecord, RecipeRecord, Store, StoreError};

/// Recursion bound for nested sub-recipes.
pub const MAX_COST_DEPTH: usize = 10;

pub struct CostEngine<'a> {
    store: &'a dyn Store,
    settings: Settings,
}

#[derive(Debug, Clone, Serialize)]
pub struct CostTreeNode {
    pub kind: LineKind,
    pub name: String,
    /// The line's quantity string as written.
    pub unit: String,
    pub amount: Decimal,
    /// Minor units, rounded up.
    pub cost: i64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<CostTreeNode>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CostResult {
    pub recipe: RecipeRecord,
    pub tree: Vec<CostTreeNode>,
    /// Minor units.
    pub total_cost: i64,
    pub warnings: Vec<CostWarning>,
}

/// All monetary fields in minor units; percentages to two decimals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarginResult {
    pub cost: i64,
    pub sell_price_ex_vat: i64,
    pub customer_price: i64,
    pub vat_amount: i64,
    pub profit: i64,
    pub actual_margin: Decimal,
    pub target_margin: u8,
    pub margin_delta: Decimal,
    pub meets_target: bool,
    pub vat_applicable: bool,
}

#[derive(Debug, Error)]
pub enum CostError {
    #[error("recipe not found: '{0}'")]
    RecipeNotFound(String),
    #[error("recipe nesting exceeds {MAX_COST_DEPTH} levels at '{slug}'")]
    DepthExceeded { slug: String },
    #[error("recipe '{0}' has no sell price, its own or inherited")]
    MissingSellPrice(String),
    #[error("arithmetic overflow while costing")]
    Overflow,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Non-fatal problems found while costing; the affected lines contribute
/// their fallback and the calculation carries on.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum CostWarning {
    #[error("'{recipe}': cannot parse quantity '{unit}' for '{item}', line skipped")]
    UnparseableLineUnit {
        recipe: String,
        item: String,
        unit: String,
    },
    #[error("'{ingredient}': cannot parse purchase unit '{unit}', line skipped")]
    UnparseablePurchaseUnit { ingredient: String, unit: String },
    #[error("'{recipe}': no conversion from '{from}' to '{to}' for '{ingredient}', line skipped")]
    NoConversionPath {
        recipe: String,
        ingredient: String,
        from: String,
        to: String,
    },
    #[error(
        "'{recipe}': cannot convert '{from}' to yield unit '{to}' of '{sub_recipe}', \
         using its full cost"
    )]
    YieldFallback {
        recipe: String,
        sub_recipe: String,
        from: String,
        to: String,
    },
    #[error("'{recipe}': sub recipe '{sub_recipe}' declares no yield, using its full cost")]
    MissingYield { recipe: String, sub_recipe: String },
}

impl<'a> CostEngine<'a> {
    pub fn new(store: &'a dyn Store, settings: Settings) -> Self {
        Self { store, settings }
    }

    /// Fully-loaded cost of a recipe, sub-recipes included.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn cost(&self, slug: &str) -> Result<CostResult, CostError> {
        let recipe = self
            .store
            .recipe_by_slug(slug)?
            .ok_or_else(|| CostError::RecipeNotFound(slug.to_string()))?;
        let mut warnings = Vec::new();
        let (tree, total_cost) = self.cost_recipe(&recipe, 0, &mut warnings)?;
        Ok(CostResult {
            recipe,
            tree,
            total_cost,
            warnings,
        })
    }

    /// Margin of an already-costed recipe against its target.
    pub fn margin(&self, result: &CostResult) -> Result<MarginResult, CostError> {
        let costing = effective_costing(self.store, &result.recipe)?
            .ok_or_else(|| CostError::MissingSellPrice(result.recipe.slug.clone()))?;

        let (sell_ex, vat_amount) = if costing.includes_vat {
            let price = Decimal::from(costing.sell_price);
            let ex = ceil_minor(price / (Decimal::ONE + self.settings.vat_rate))?;
            (ex, costing.sell_price - ex)
        } else {
            (costing.sell_price, 0)
        };

        let profit = sell_ex - result.total_cost;
        let actual_margin = if sell_ex > 0 {
            round_percent(Decimal::from(profit) * dec!(100) / Decimal::from(sell_ex))
        } else {
            Decimal::ZERO
        };
        let target = Decimal::from(costing.target_margin);

        Ok(MarginResult {
            cost: result.total_cost,
            sell_price_ex_vat: sell_ex,
            customer_price: costing.sell_price,
            vat_amount,
            profit,
            actual_margin,
            target_margin: costing.target_margin,
            margin_delta: actual_margin - target,
            meets_target: actual_margin >= target,
            vat_applicable: costing.includes_vat,
        })
    }

    fn cost_recipe(
        &self,
        recipe: &RecipeRecord,
        depth: usize,
        warnings: &mut Vec<CostWarning>,
    ) -> Result<(Vec<CostTreeNode>, i64), CostError> {
        let lines = merged_lines(self.store, recipe)?;
        let mut tree = Vec::with_capacity(lines.len());
        let mut total: i64 = 0;
        for line in &lines {
            let node = if let Some(ingredient_id) = line.ingredient_id {
                self.cost_ingredient_line(recipe, line, ingredient_id, warnings)?
            } else if let Some(sub_recipe_id) = line.sub_recipe_id {
                self.cost_sub_recipe_line(recipe, line, sub_recipe_id, depth, warnings)?
            } else {
                continue;
            };
            total = total.checked_add(node.cost).ok_or(CostError::Overflow)?;
            tree.push(node);
        }
        Ok((tree, total))
    }

    fn cost_ingredient_line(
        &self,
        recipe: &RecipeRecord,
        line: &RecipeLineRecord,
        ingredient_id: i64,
        warnings: &mut Vec<CostWarning>,
    ) -> Result<CostTreeNode, CostError> {
        let ingredient =
            self.store
                .ingredient_by_id(ingredient_id)?
                .ok_or(StoreError::MissingRow {
                    kind: EntityKind::Ingredient,
                    id: ingredient_id,
                })?;
        let node = |amount: Decimal, cost: i64| CostTreeNode {
            kind: LineKind::Ingredient,
            name: ingredient.name.clone(),
            unit: line.unit.clone(),
            amount,
            cost,
            children: Vec::new(),
        };

        let Some(required) = quantity::parse(&line.unit).amount().cloned() else {
            warnings.push(CostWarning::UnparseableLineUnit {
                recipe: recipe.slug.clone(),
                item: ingredient.name.clone(),
                unit: line.unit.clone(),
            });
            return Ok(node(Decimal::ZERO, 0));
        };
        let purchase = match quantity::parse(&ingredient.purchase_unit).amount().cloned() {
            Some(purchase) if !purchase.value.is_zero() => purchase,
            _ => {
                warnings.push(CostWarning::UnparseablePurchaseUnit {
                    ingredient: ingredient.name.clone(),
                    unit: ingredient.purchase_unit.clone(),
                });
                return Ok(node(required.value, 0));
            }
        };

        let rule = ingredient
            .conversion_rule
            .as_deref()
            .and_then(|raw| match raw.parse::<ConversionRule>() {
                Ok(rule) => Some(rule),
                Err(e) => {
                    tracing::trace!("ignoring conversion rule of '{}': {e}", ingredient.slug);
                    None
                }
            });

        let Some(converted) = convert(
            required.value,
            &required.unit,
            &purchase.unit,
            rule.as_ref(),
        ) else {
            warnings.push(CostWarning::NoConversionPath {
                recipe: recipe.slug.clone(),
                ingredient: ingredient.name.clone(),
                from: required.unit.clone(),
                to: purchase.unit.clone(),
            });
            return Ok(node(required.value, 0));
        };

        let purchase_cost = Decimal::from(ingredient.purchase_cost);
        let purchase_ex = if ingredient.includes_vat {
            purchase_cost / (Decimal::ONE + self.settings.vat_rate)
        } else {
            purchase_cost
        };
        let cost = ceil_minor(converted / purchase.value * purchase_ex)?;
        Ok(node(required.value, cost))
    }

    fn cost_sub_recipe_line(
        &self,
        recipe: &RecipeRecord,
        line: &RecipeLineRecord,
        sub_recipe_id: i64,
        depth: usize,
        warnings: &mut Vec<CostWarning>,
    ) -> Result<CostTreeNode, CostError> {
        let child = self
            .store
            .recipe_by_id(sub_recipe_id)?
            .ok_or(StoreError::MissingRow {
                kind: EntityKind::Recipe,
                id: sub_recipe_id,
            })?;
        if depth + 1 > MAX_COST_DEPTH {
            return Err(CostError::DepthExceeded { slug: child.slug });
        }
        let (children, child_total) = self.cost_recipe(&child, depth + 1, warnings)?;

        let required = quantity::parse(&line.unit).amount().cloned();
        let (amount, cost) = match (&required, &child.yield_amount, &child.yield_unit) {
            (Some(required), Some(yield_amount), Some(yield_unit))
                if !yield_amount.is_zero() =>
            {
                match convert(required.value, &required.unit, yield_unit, None) {
                    Some(converted) => {
                        let scaled =
                            ceil_minor(Decimal::from(child_total) * converted / yield_amount)?;
                        (required.value, scaled)
                    }
                    None => {
                        warnings.push(CostWarning::YieldFallback {
                            recipe: recipe.slug.clone(),
                            sub_recipe: child.slug.clone(),
                            from: required.unit.clone(),
                            to: yield_unit.clone(),
                        });
                        (required.value, child_total)
                    }
                }
            }
            (Some(required), _, _) => {
                warnings.push(CostWarning::MissingYield {
                    recipe: recipe.slug.clone(),
                    sub_recipe: child.slug.clone(),
                });
                (required.value, child_total)
            }
            (None, _, _) => {
                warnings.push(CostWarning::UnparseableLineUnit {
                    recipe: recipe.slug.clone(),
                    item: child.name.clone(),
                    unit: line.unit.clone(),
                });
                (Decimal::ZERO, child_total)
            }
        };

        Ok(CostTreeNode {
            kind: LineKind::Recipe,
            name: child.name.clone(),
            unit: line.unit.clone(),
            amount,
            cost,
            children,
        })
    }
}

fn ceil_minor(value: Decimal) -> Result<i64, CostError> {
    value.ceil().to_i64().ok_or(CostError::Overflow)
}

fn round_percent(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}
