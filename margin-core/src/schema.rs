//! Declarative entity documents.
//!
//! Every entity file is a `{object, data}` document in YAML or JSON. The
//! payload under `data` is typed per entity and checked against the
//! invariants the store relies on; violations come back as structured
//! diagnostics rather than a single opaque message.

use camino::Utf8Path;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::convert::ConversionRule;

/// Extensions an entity file may use. Path references must end in one of
/// these; `slug:` references must not.
pub const ENTITY_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EntityKind {
    Supplier,
    Ingredient,
    Recipe,
}

impl EntityKind {
    /// Directory the filesystem storage writes this kind into.
    pub fn plural_dir(&self) -> &'static str {
        match self {
            EntityKind::Supplier => "suppliers",
            EntityKind::Ingredient => "ingredients",
            EntityKind::Recipe => "recipes",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Yaml,
    Json,
}

impl DocumentFormat {
    pub fn from_path(path: &Utf8Path) -> Option<Self> {
        match path.extension()? {
            "yaml" | "yml" => Some(DocumentFormat::Yaml),
            "json" => Some(DocumentFormat::Json),
            _ => None,
        }
    }
}

/// The outer `{object, data}` shape shared by every entity file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub object: EntityKind,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{object} payload does not match the schema: {message}")]
    Shape {
        object: EntityKind,
        message: String,
    },
    #[error("invalid {object} '{name}': {}", join_diagnostics(.diagnostics))]
    Invalid {
        object: EntityKind,
        name: String,
        diagnostics: Vec<Diagnostic>,
    },
}

fn join_diagnostics(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(Diagnostic::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Parse the outer document from text.
pub fn parse_document(text: &str, format: DocumentFormat) -> Result<Document, SchemaError> {
    let doc = match format {
        DocumentFormat::Yaml => serde_yaml::from_str(text)?,
        DocumentFormat::Json => serde_json::from_str(text)?,
    };
    Ok(doc)
}

/// Typed payloads, one per [`EntityKind`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EntityPayload {
    Supplier(SupplierPayload),
    Ingredient(IngredientPayload),
    Recipe(RecipePayload),
}

impl EntityPayload {
    /// Deserialize and validate the `data` of a document.
    pub fn from_document(doc: &Document) -> Result<Self, SchemaError> {
        fn typed<T: serde::de::DeserializeOwned>(
            object: EntityKind,
            data: &serde_json::Value,
        ) -> Result<T, SchemaError> {
            serde_json::from_value(data.clone()).map_err(|e| SchemaError::Shape {
                object,
                message: e.to_string(),
            })
        }

        let payload = match doc.object {
            EntityKind::Supplier => EntityPayload::Supplier(typed(doc.object, &doc.data)?),
            EntityKind::Ingredient => EntityPayload::Ingredient(typed(doc.object, &doc.data)?),
            EntityKind::Recipe => EntityPayload::Recipe(typed(doc.object, &doc.data)?),
        };
        payload.validate()?;
        Ok(payload)
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            EntityPayload::Supplier(_) => EntityKind::Supplier,
            EntityPayload::Ingredient(_) => EntityKind::Ingredient,
            EntityPayload::Recipe(_) => EntityKind::Recipe,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            EntityPayload::Supplier(p) => &p.name,
            EntityPayload::Ingredient(p) => &p.name,
            EntityPayload::Recipe(p) => &p.name,
        }
    }

    /// The entity slug: explicit if given, otherwise derived from the name.
    pub fn slug(&self) -> String {
        let explicit = match self {
            EntityPayload::Supplier(p) => p.slug.as_deref(),
            EntityPayload::Ingredient(p) => p.slug.as_deref(),
            EntityPayload::Recipe(p) => p.slug.as_deref(),
        };
        match explicit {
            Some(s) => s.to_string(),
            None => slugify(self.name()),
        }
    }

    fn validate(&self) -> Result<(), SchemaError> {
        let mut diagnostics = Vec::new();
        match self {
            EntityPayload::Supplier(p) => p.collect_diagnostics(&mut diagnostics),
            EntityPayload::Ingredient(p) => p.collect_diagnostics(&mut diagnostics),
            EntityPayload::Recipe(p) => p.collect_diagnostics(&mut diagnostics),
        }
        if diagnostics.is_empty() {
            Ok(())
        } else {
            Err(SchemaError::Invalid {
                object: self.kind(),
                name: self.name().to_string(),
                diagnostics,
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SupplierPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<ContactPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ContactPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl SupplierPayload {
    fn collect_diagnostics(&self, out: &mut Vec<Diagnostic>) {
        require_name(&self.name, out);
        check_slug(self.slug.as_deref(), out);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct IngredientPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    pub name: String,
    pub category: String,
    pub purchase: PurchasePayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supplier: Option<Uses>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversion_rate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_purchased: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PurchasePayload {
    /// Quantity-with-unit string, e.g. `1kg` or `6 units`.
    pub unit: String,
    /// Minor units (pence).
    pub cost: i64,
    #[serde(default)]
    pub vat: bool,
}

/// A reference to another entity, `{uses: "<reference>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Uses {
    pub uses: String,
}

impl IngredientPayload {
    fn collect_diagnostics(&self, out: &mut Vec<Diagnostic>) {
        require_name(&self.name, out);
        check_slug(self.slug.as_deref(), out);
        if self.category.trim().is_empty() {
            out.push(Diagnostic {
                field: "category".into(),
                message: "must not be empty".into(),
            });
        }
        if self.purchase.cost < 0 {
            out.push(Diagnostic {
                field: "purchase.cost".into(),
                message: format!("must not be negative (got {})", self.purchase.cost),
            });
        }
        if self.purchase.unit.trim().is_empty() {
            out.push(Diagnostic {
                field: "purchase.unit".into(),
                message: "must not be empty".into(),
            });
        }
        if let Some(rule) = &self.conversion_rate {
            if rule.parse::<ConversionRule>().is_err() {
                out.push(Diagnostic {
                    field: "conversionRate".into(),
                    message: format!("not of the form '<a> <unit> = <b> <unit>': '{rule}'"),
                });
            }
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    #[default]
    Development,
    Active,
    Discontinued,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RecipeClass {
    #[default]
    MenuItem,
    BaseTemplate,
    SubRecipe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LineKind {
    Ingredient,
    Recipe,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RecipePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<RecipeClass>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub costing: Option<CostingPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yield_amount: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yield_unit: Option<String>,
    #[serde(default)]
    pub ingredients: Vec<LinePayload>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CostingPayload {
    /// Minor units; required unless `extends` provides it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<i64>,
    /// Target margin, whole percent 0-100.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub margin: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vat: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LinePayload {
    pub uses: String,
    /// Advisory; the actual kind of the referent wins.
    #[serde(
        default,
        rename = "type",
        skip_serializing_if = "Option::is_none"
    )]
    pub type_hint: Option<LineKind>,
    pub with: LineBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LineBody {
    /// Quantity-with-unit string for the line, e.g. `25g`.
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl RecipePayload {
    fn collect_diagnostics(&self, out: &mut Vec<Diagnostic>) {
        require_name(&self.name, out);
        check_slug(self.slug.as_deref(), out);

        let price = self.costing.as_ref().and_then(|c| c.price);
        if price.is_none() && self.extends.is_none() {
            out.push(Diagnostic {
                field: "costing.price".into(),
                message: "required unless `extends` is set".into(),
            });
        }
        if let Some(price) = price {
            if price < 0 {
                out.push(Diagnostic {
                    field: "costing.price".into(),
                    message: format!("must not be negative (got {price})"),
                });
            }
        }
        if let Some(margin) = self.costing.as_ref().and_then(|c| c.margin) {
            if !(0..=100).contains(&margin) {
                out.push(Diagnostic {
                    field: "costing.margin".into(),
                    message: format!("must be between 0 and 100 (got {margin})"),
                });
            }
        }
        if self.class == Some(RecipeClass::SubRecipe)
            && (self.yield_amount.is_none() || self.yield_unit.is_none())
        {
            out.push(Diagnostic {
                field: "yieldAmount".into(),
                message: "sub recipes must declare yieldAmount and yieldUnit".into(),
            });
        }
        for (i, line) in self.ingredients.iter().enumerate() {
            if line.uses.trim().is_empty() {
                out.push(Diagnostic {
                    field: format!("ingredients[{i}].uses"),
                    message: "must not be empty".into(),
                });
            }
            if line.with.unit.trim().is_empty() {
                out.push(Diagnostic {
                    field: format!("ingredients[{i}].with.unit"),
                    message: "must not be empty".into(),
                });
            }
        }
    }
}

fn require_name(name: &str, out: &mut Vec<Diagnostic>) {
    if name.trim().is_empty() {
        out.push(Diagnostic {
            field: "name".into(),
            message: "must not be empty".into(),
        });
    }
}

fn check_slug(slug: Option<&str>, out: &mut Vec<Diagnostic>) {
    let Some(slug) = slug else { return };
    let valid = !slug.is_empty()
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
    if !valid {
        out.push(Diagnostic {
            field: "slug".into(),
            message: format!("must be lowercase alphanumeric with '-' or '_' (got '{slug}')"),
        });
    }
}

/// Derive a url-safe slug from a display name.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use test_case::test_case;

    fn yaml(text: &str) -> Result<EntityPayload, SchemaError> {
        let doc = parse_document(text, DocumentFormat::Yaml)?;
        EntityPayload::from_document(&doc)
    }

    #[test]
    fn supplier_document() {
        let p = yaml(indoc! {"
            object: supplier
            data:
              name: Smith & Sons
              contact:
                email: orders@smith.example
        "})
        .unwrap();
        assert_eq!(p.kind(), EntityKind::Supplier);
        assert_eq!(p.slug(), "smith-sons");
    }

    #[test]
    fn ingredient_document() {
        let p = yaml(indoc! {"
            object: ingredient
            data:
              name: Dry Cured Ham
              category: meat
              purchase:
                unit: 1kg
                cost: 599
              supplier:
                uses: '@/suppliers/smith.yaml'
              conversionRate: 1 kg = 40 slices
              lastPurchased: 2026-05-14
        "})
        .unwrap();
        let EntityPayload::Ingredient(i) = &p else {
            panic!("expected ingredient");
        };
        assert_eq!(i.purchase.cost, 599);
        assert!(!i.purchase.vat);
        assert_eq!(p.slug(), "dry-cured-ham");
    }

    #[test]
    fn recipe_document_with_lines() {
        let p = yaml(indoc! {"
            object: recipe
            data:
              slug: ham-sandwich
              name: Ham Sandwich
              stage: active
              class: menu_item
              costing:
                price: 400
                margin: 65
                vat: true
              ingredients:
                - uses: slug:ham
                  with:
                    unit: 25g
                - uses: ./bread.yaml
                  type: ingredient
                  with:
                    unit: 2 slices
        "})
        .unwrap();
        let EntityPayload::Recipe(r) = &p else {
            panic!("expected recipe");
        };
        assert_eq!(r.ingredients.len(), 2);
        assert_eq!(r.ingredients[1].type_hint, Some(LineKind::Ingredient));
        assert_eq!(p.slug(), "ham-sandwich");
    }

    #[test]
    fn json_document() {
        let text = r#"{"object": "supplier", "data": {"name": "Acme"}}"#;
        let doc = parse_document(text, DocumentFormat::Json).unwrap();
        let p = EntityPayload::from_document(&doc).unwrap();
        assert_eq!(p.slug(), "acme");
    }

    #[test]
    fn negative_cost_is_invalid() {
        let err = yaml(indoc! {"
            object: ingredient
            data:
              name: Ham
              category: meat
              purchase:
                unit: 1kg
                cost: -5
        "})
        .unwrap_err();
        let SchemaError::Invalid { diagnostics, .. } = err else {
            panic!("expected invalid");
        };
        assert_eq!(diagnostics[0].field, "purchase.cost");
    }

    #[test]
    fn recipe_price_required_without_extends() {
        let err = yaml(indoc! {"
            object: recipe
            data:
              name: Mystery Dish
        "})
        .unwrap_err();
        assert!(matches!(err, SchemaError::Invalid { .. }));
    }

    #[test]
    fn recipe_price_optional_with_extends() {
        let p = yaml(indoc! {"
            object: recipe
            data:
              name: House Burger
              extends: slug:burger-base
        "})
        .unwrap();
        assert_eq!(p.kind(), EntityKind::Recipe);
    }

    #[test]
    fn margin_out_of_range() {
        let err = yaml(indoc! {"
            object: recipe
            data:
              name: Pie
              costing:
                price: 400
                margin: 130
        "})
        .unwrap_err();
        let SchemaError::Invalid { diagnostics, .. } = err else {
            panic!("expected invalid");
        };
        assert_eq!(diagnostics[0].field, "costing.margin");
    }

    #[test]
    fn sub_recipe_requires_yield() {
        let err = yaml(indoc! {"
            object: recipe
            data:
              name: Gravy
              class: sub_recipe
              costing:
                price: 0
        "})
        .unwrap_err();
        assert!(matches!(err, SchemaError::Invalid { .. }));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = yaml(indoc! {"
            object: supplier
            data:
              name: Acme
              nam: typo
        "})
        .unwrap_err();
        assert!(matches!(err, SchemaError::Shape { .. }));
    }

    #[test_case("Dry Cured Ham", "dry-cured-ham")]
    #[test_case("  Smith & Sons Ltd.", "smith-sons-ltd")]
    #[test_case("Crème brûlée", "cr-me-br-l-e" ; "non ascii folds to dashes")]
    #[test_case("UPPER", "upper")]
    fn slugs(name: &str, expected: &str) {
        assert_eq!(slugify(name), expected);
    }
}
