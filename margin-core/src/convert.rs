//! Unit conversion between purchase units and recipe line units.
//!
//! Two mechanisms, tried in order: a built-in table of dimensional units
//! (mass, volume, count) and an optional per-ingredient [`ConversionRule`]
//! such as `1 loaf = 16 slices`. When neither applies the conversion
//! returns `None` and the caller decides whether that is fatal.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use thiserror::Error;

use crate::quantity::{self, Quantity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Dimension {
    Mass,
    Volume,
    Count,
}

/// Canonical lookup key for a unit token: lowercased, singular, inner
/// whitespace folded to `-` so `fl oz` and `fl-oz` meet.
pub fn unit_key(unit: &str) -> String {
    quantity::singular(unit)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

/// Built-in units: `(dimension, factor to the dimension's base unit)`.
/// Base units are grams and millilitres.
fn builtin(key: &str) -> Option<(Dimension, Decimal)> {
    use Dimension::*;
    let entry = match key {
        "g" | "gram" => (Mass, dec!(1)),
        "kg" | "kilogram" => (Mass, dec!(1000)),
        "oz" | "ounce" => (Mass, dec!(28.349523125)),
        "lb" | "pound" => (Mass, dec!(453.59237)),
        "ml" | "millilitre" | "milliliter" => (Volume, dec!(1)),
        "l" | "litre" | "liter" => (Volume, dec!(1000)),
        "fl-oz" | "floz" | "fluid-ounce" => (Volume, dec!(29.5735295625)),
        "cup" => (Volume, dec!(240)),
        "tsp" | "teaspoon" => (Volume, dec!(5)),
        "tbsp" | "tablespoon" => (Volume, dec!(15)),
        "unit" | "piece" | "each" | "item" => (Count, dec!(1)),
        _ => return None,
    };
    Some(entry)
}

/// A user-defined equivalence between two units, `"<a> <unit_a> = <b> <unit_b>"`.
///
/// Units are stored singularised so `1 loaf = 16 slices` applies to a line
/// written as `2 slices`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRule {
    pub from_amount: Decimal,
    pub from_unit: String,
    pub to_amount: Decimal,
    pub to_unit: String,
}

#[derive(Debug, Error)]
#[error("invalid conversion rule: '{0}'")]
pub struct RuleError(pub String);

impl std::str::FromStr for ConversionRule {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (lhs, rhs) = s.split_once('=').ok_or_else(|| RuleError(s.to_string()))?;
        let parse_side = |side: &str| match quantity::parse(side) {
            Quantity::Measured(a) if a.value > Decimal::ZERO => Some(a),
            _ => None,
        };
        let from = parse_side(lhs).ok_or_else(|| RuleError(s.to_string()))?;
        let to = parse_side(rhs).ok_or_else(|| RuleError(s.to_string()))?;
        Ok(Self {
            from_amount: from.value,
            from_unit: unit_key(&from.unit),
            to_amount: to.value,
            to_unit: unit_key(&to.unit),
        })
    }
}

/// Convert `value` from `from` to `to`.
///
/// Tried in order: identical singular units, the built-in dimensional
/// table, the rule in either direction. `None` means no conversion path.
pub fn convert(value: Decimal, from: &str, to: &str, rule: Option<&ConversionRule>) -> Option<Decimal> {
    let from_key = unit_key(from);
    let to_key = unit_key(to);

    if from_key == to_key {
        return Some(value);
    }

    if let (Some((from_dim, from_factor)), Some((to_dim, to_factor))) =
        (builtin(&from_key), builtin(&to_key))
    {
        if from_dim == to_dim {
            return Some(value * from_factor / to_factor);
        }
    }

    if let Some(rule) = rule {
        if rule.from_unit == from_key && rule.to_unit == to_key {
            return Some(value * rule.to_amount / rule.from_amount);
        }
        if rule.to_unit == from_key && rule.from_unit == to_key {
            return Some(value * rule.from_amount / rule.to_amount);
        }
    }

    tracing::trace!(from, to, "no conversion path");
    None
}
