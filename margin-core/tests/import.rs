//! End-to-end import pipeline tests over a real directory of entity files
//! and the in-memory store.

use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use indoc::indoc;
use rust_decimal_macros::dec;

use margin_core::cost::CostEngine;
use margin_core::import::{ErrorKind, ImportOptions, ImportReport, Importer};
use margin_core::schema::EntityKind;
use margin_core::store::{MemoryStore, Store};
use margin_core::{SharedSettings, Settings};

struct Collection {
    _dir: tempfile::TempDir,
    root: Utf8PathBuf,
    store: Arc<MemoryStore>,
    importer: Importer,
}

impl Collection {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 tempdir");
        let store = Arc::new(MemoryStore::new());
        let settings = Arc::new(SharedSettings::new(Settings::default()));
        let importer = Importer::new(store.clone(), settings);
        Self {
            _dir: dir,
            root,
            store,
            importer,
        }
    }

    fn write(&self, rel: &str, content: &str) -> Utf8PathBuf {
        let path = self.root.join(rel);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(&path, content).expect("write fixture");
        path
    }

    fn import(&self, files: &[Utf8PathBuf]) -> ImportReport {
        self.importer
            .import(files, &ImportOptions::new(self.root.clone()))
    }

    fn import_with(&self, files: &[Utf8PathBuf], options: ImportOptions) -> ImportReport {
        self.importer.import(files, &options)
    }
}

fn sandwich_fixtures(c: &Collection) -> Utf8PathBuf {
    c.write(
        "suppliers/smith.yaml",
        indoc! {"
            object: supplier
            data:
              name: Smith & Sons
              contact:
                email: orders@smith.example
        "},
    );
    c.write(
        "ingredients/ham.yaml",
        indoc! {"
            object: ingredient
            data:
              slug: ham
              name: Dry Cured Ham
              category: meat
              purchase:
                unit: 1kg
                cost: 599
              supplier:
                uses: '@/suppliers/smith.yaml'
        "},
    );
    c.write(
        "recipes/sandwich.yaml",
        indoc! {"
            object: recipe
            data:
              slug: ham-sandwich
              name: Ham Sandwich
              stage: active
              costing:
                price: 400
                margin: 65
              ingredients:
                - uses: '@/ingredients/ham.yaml'
                  with:
                    unit: 25g
        "},
    )
}

#[test]
fn references_are_pulled_in_and_committed_in_dependency_order() {
    let c = Collection::new();
    let recipe = sandwich_fixtures(&c);

    // importing just the recipe drags in the ingredient and the supplier
    let report = c.import(&[recipe]);
    assert!(report.ok(), "unexpected errors: {:?}", report.errors);
    assert_eq!(report.stats.created, 3);
    assert_eq!(report.stats.total(), 3);

    let ham = c.store.ingredient_by_slug("ham").unwrap().unwrap();
    let smith = c.store.supplier_by_slug("smith-sons").unwrap().unwrap();
    assert_eq!(ham.supplier_id, Some(smith.id));

    let recipe = c.store.recipe_with_lines("ham-sandwich").unwrap().unwrap();
    assert_eq!(recipe.lines.len(), 1);
    assert_eq!(recipe.lines[0].ingredient_id, Some(ham.id));

    assert_eq!(
        report
            .slug_path(EntityKind::Ingredient, "ham")
            .map(Utf8Path::file_name),
        Some(Some("ham.yaml"))
    );
}

#[test]
fn reimport_without_changes_ignores_everything() {
    let c = Collection::new();
    let recipe = sandwich_fixtures(&c);

    let first = c.import(&[recipe.clone()]);
    assert_eq!(first.stats.created, 3);

    let second = c.import(&[recipe]);
    assert!(second.ok());
    assert_eq!(second.stats.created, 0);
    assert_eq!(second.stats.upserted, 0);
    assert_eq!(second.stats.failed, 0);
    assert_eq!(second.stats.ignored, 3);
}

#[test]
fn a_price_change_upserts_only_the_touched_file() {
    let c = Collection::new();
    let recipe = sandwich_fixtures(&c);
    c.import(&[recipe.clone()]);

    c.write(
        "ingredients/ham.yaml",
        indoc! {"
            object: ingredient
            data:
              slug: ham
              name: Dry Cured Ham
              category: meat
              purchase:
                unit: 1kg
                cost: 650
              supplier:
                uses: '@/suppliers/smith.yaml'
        "},
    );

    let report = c.import(&[recipe]);
    assert!(report.ok());
    assert_eq!(report.stats.upserted, 1);
    assert_eq!(report.stats.ignored, 2);
    assert_eq!(
        c.store
            .ingredient_by_slug("ham")
            .unwrap()
            .unwrap()
            .purchase_cost,
        650
    );
}

#[test]
fn imported_recipe_costs_and_margins_as_specified() {
    let c = Collection::new();
    let recipe = sandwich_fixtures(&c);
    c.import(&[recipe]);

    let engine = CostEngine::new(c.store.as_ref(), Settings::default());
    let cost = engine.cost("ham-sandwich").unwrap();
    // ceil((25/1000) * 599) = 15
    assert_eq!(cost.total_cost, 15);

    let margin = engine.margin(&cost).unwrap();
    assert_eq!(margin.sell_price_ex_vat, 400);
    assert_eq!(margin.profit, 385);
    assert_eq!(margin.actual_margin, dec!(96.25));
    assert!(margin.meets_target);
}

#[test]
fn full_menu_costs_through_vat_rules_yields_and_templates() {
    let c = Collection::new();
    c.write(
        "suppliers/mill.json",
        r#"{"object": "supplier", "data": {"slug": "mill", "name": "The Mill"}}"#,
    );
    c.write(
        "ingredients/oil.yaml",
        indoc! {"
            object: ingredient
            data:
              slug: oil
              name: Olive Oil
              category: pantry
              purchase:
                unit: 1l
                cost: 1200
                vat: true
        "},
    );
    c.write(
        "ingredients/tomato.yaml",
        indoc! {"
            object: ingredient
            data:
              slug: tomato
              name: Tomato
              category: veg
              purchase:
                unit: 1kg
                cost: 300
        "},
    );
    c.write(
        "ingredients/bread.yaml",
        indoc! {"
            object: ingredient
            data:
              slug: bread
              name: Sourdough
              category: bakery
              purchase:
                unit: 1 loaf
                cost: 192
              conversionRate: 1 loaf = 16 slices
              supplier:
                uses: ../suppliers/mill.json
        "},
    );
    c.write(
        "recipes/sauce.yaml",
        indoc! {"
            object: recipe
            data:
              slug: sauce
              name: Tomato Sauce
              class: sub_recipe
              costing:
                price: 0
              yieldAmount: 500
              yieldUnit: ml
              ingredients:
                - uses: '@/ingredients/tomato.yaml'
                  with:
                    unit: 1kg
        "},
    );
    c.write(
        "recipes/base.yaml",
        indoc! {"
            object: recipe
            data:
              slug: bruschetta-base
              name: Bruschetta Base
              class: base_template
              costing:
                price: 0
              ingredients:
                - uses: '@/ingredients/bread.yaml'
                  with:
                    unit: 2 slices
        "},
    );
    let special = c.write(
        "recipes/special.yaml",
        indoc! {"
            object: recipe
            data:
              slug: the-special
              name: The Special
              stage: active
              extends: ./base.yaml
              costing:
                price: 480
                vat: true
              ingredients:
                - uses: '@/ingredients/oil.yaml'
                  with:
                    unit: 100ml
                - uses: ./sauce.yaml
                  type: ingredient   # wrong on purpose; the referent wins
                  with:
                    unit: 50ml
        "},
    );

    let report = c.import(&[special]);
    assert!(report.ok(), "unexpected errors: {:?}", report.errors);
    assert_eq!(report.stats.created, 7);

    // the declared type hint loses to the referent's actual kind
    let own_lines = c.store.recipe_with_lines("the-special").unwrap().unwrap().lines;
    assert_eq!(own_lines.len(), 2);
    assert!(own_lines[1].sub_recipe_id.is_some());

    let engine = CostEngine::new(c.store.as_ref(), Settings::default());
    let cost = engine.cost("the-special").unwrap();
    assert!(cost.warnings.is_empty(), "{:?}", cost.warnings);

    // template line first, then the recipe's own
    assert_eq!(cost.tree.len(), 3);
    // bread: ceil((2/16) * 192) = 24
    assert_eq!(cost.tree[0].cost, 24);
    // oil: 1200 / 1.2 = 1000 ex VAT; (100/1000) * 1000 = 100
    assert_eq!(cost.tree[1].cost, 100);
    // sauce totals 300; scaled by 50/500 yield = 30
    assert_eq!(cost.tree[2].cost, 30);
    assert_eq!(cost.total_cost, 154);

    let margin = engine.margin(&cost).unwrap();
    assert_eq!(margin.sell_price_ex_vat, 400);
    assert_eq!(margin.vat_amount, 80);
    assert_eq!(margin.customer_price, 480);
    assert_eq!(margin.profit, 246);
    assert_eq!(margin.actual_margin, dec!(61.50));
    assert!(!margin.meets_target);
}

#[test]
fn mutual_recipe_references_fail_with_the_cycle_path() {
    let c = Collection::new();
    let a = c.write(
        "recipes/a.yaml",
        indoc! {"
            object: recipe
            data:
              name: A
              costing:
                price: 100
              yieldAmount: 1
              yieldUnit: portion
              ingredients:
                - uses: ./b.yaml
                  with:
                    unit: 1 portion
        "},
    );
    c.write(
        "recipes/b.yaml",
        indoc! {"
            object: recipe
            data:
              name: B
              costing:
                price: 100
              yieldAmount: 1
              yieldUnit: portion
              ingredients:
                - uses: ./a.yaml
                  with:
                    unit: 1 portion
        "},
    );

    let report = c.import(&[a]);
    assert_eq!(report.stats.failed, 2);
    assert!(report
        .errors
        .iter()
        .all(|e| e.kind == ErrorKind::DependencyCycle));
    let message = &report.errors[0].message;
    assert!(message.contains("a.yaml") && message.contains("b.yaml"), "{message}");
    assert!(c.store.recipes().unwrap().is_empty());
}

#[test]
fn changing_a_committed_supplier_is_rejected_and_leaves_the_store_alone() {
    let c = Collection::new();
    for slug in ["s1", "s2"] {
        c.write(
            &format!("suppliers/{slug}.yaml"),
            &format!("object: supplier\ndata:\n  slug: {slug}\n  name: {slug}\n"),
        );
    }
    let ham = c.write(
        "ingredients/ham.yaml",
        indoc! {"
            object: ingredient
            data:
              slug: ham
              name: Ham
              category: meat
              purchase:
                unit: 1kg
                cost: 599
              supplier:
                uses: '@/suppliers/s1.yaml'
        "},
    );
    let report = c.import(&[ham.clone()]);
    assert!(report.ok());
    let original = c.store.ingredient_by_slug("ham").unwrap().unwrap();

    c.write(
        "ingredients/ham.yaml",
        indoc! {"
            object: ingredient
            data:
              slug: ham
              name: Ham
              category: meat
              purchase:
                unit: 1kg
                cost: 599
              supplier:
                uses: '@/suppliers/s2.yaml'
        "},
    );
    let report = c.import(&[ham]);
    assert_eq!(report.stats.failed, 1);
    assert_eq!(report.errors[0].kind, ErrorKind::ImmutableField);

    let unchanged = c.store.ingredient_by_slug("ham").unwrap().unwrap();
    assert_eq!(unchanged.supplier_id, original.supplier_id);
}

#[test]
fn import_only_resolves_without_persisting() {
    let c = Collection::new();
    let recipe = sandwich_fixtures(&c);

    let mut options = ImportOptions::new(c.root.clone());
    options.import_only = true;
    let report = c.import_with(&[recipe], options);

    assert!(report.ok());
    let resolved = report.resolved.as_ref().expect("resolved map");
    assert_eq!(resolved.len(), 3);
    // dependency order: supplier before ingredient before recipe
    let kinds: Vec<_> = resolved.values().map(|e| e.kind()).collect();
    assert_eq!(
        kinds,
        [
            EntityKind::Supplier,
            EntityKind::Ingredient,
            EntityKind::Recipe
        ]
    );
    assert!(c.store.recipes().unwrap().is_empty());
    assert!(c.store.ingredients().unwrap().is_empty());
    assert!(c.store.suppliers().unwrap().is_empty());
}

#[test]
fn missing_path_reference_is_reported_per_file() {
    let c = Collection::new();
    let ham = c.write(
        "ingredients/ham.yaml",
        indoc! {"
            object: ingredient
            data:
              name: Ham
              category: meat
              purchase:
                unit: 1kg
                cost: 599
              supplier:
                uses: '@/suppliers/ghost.yaml'
        "},
    );
    let report = c.import(&[ham]);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].kind, ErrorKind::ReferenceUnresolved);
    assert!(c.store.ingredients().unwrap().is_empty());
}

#[test]
fn malformed_files_are_collected_not_fatal() {
    let c = Collection::new();
    let bad = c.write("suppliers/bad.yaml", "object: supplier\ndata: [not, a, map]\n");
    let good = c.write(
        "suppliers/good.yaml",
        "object: supplier\ndata:\n  name: Good\n",
    );

    let report = c.import(&[bad.clone(), good.clone()]);
    assert_eq!(report.stats.created, 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].kind, ErrorKind::InputMalformed);

    // fail-fast aborts before the good file
    let c = Collection::new();
    let bad = c.write("suppliers/bad.yaml", "object: supplier\ndata: [not, a, map]\n");
    let good = c.write(
        "suppliers/good.yaml",
        "object: supplier\ndata:\n  name: Good\n",
    );
    let mut options = ImportOptions::new(c.root.clone());
    options.fail_fast = true;
    let report = c.import_with(&[bad, good], options);
    assert_eq!(report.errors.len(), 1);
    assert!(c.store.suppliers().unwrap().is_empty());
}

#[test]
fn slug_references_resolve_against_the_same_invocation() {
    let c = Collection::new();
    c.write(
        "ingredients/ham.yaml",
        indoc! {"
            object: ingredient
            data:
              slug: ham
              name: Ham
              category: meat
              purchase:
                unit: 1kg
                cost: 599
        "},
    );
    let recipe = c.write(
        "recipes/sandwich.yaml",
        indoc! {"
            object: recipe
            data:
              slug: sandwich
              name: Sandwich
              costing:
                price: 400
              ingredients:
                - uses: slug:ham
                  with:
                    unit: 25g
        "},
    );

    // the symbolic reference adds no edge, so both files must be inputs
    let ham_path = c.root.join("ingredients/ham.yaml");
    let report = c.import(&[ham_path, recipe]);
    assert!(report.ok(), "unexpected errors: {:?}", report.errors);
    assert_eq!(report.stats.created, 2);
    let lines = c.store.recipe_with_lines("sandwich").unwrap().unwrap().lines;
    assert!(lines[0].ingredient_id.is_some());
}

#[test]
fn cancellation_stops_between_files() {
    let c = Collection::new();
    let recipe = sandwich_fixtures(&c);

    let options = ImportOptions::new(c.root.clone());
    options.cancel.cancel();
    let report = c.import_with(&[recipe], options);
    assert!(report.cancelled);
    assert_eq!(report.stats.total(), 0);
}
