//! The three-phase import pipeline.
//!
//! Phase 1 reads and validates every input file, registers it in the
//! dependency graph and follows path references recursively. Phase 2 walks
//! the graph in dependency order and materialises resolved payloads in
//! which every reference has become a plain slug and every recipe line
//! carries its real kind. Phase 3 commits each file through the processor
//! registered for its entity kind.
//!
//! Errors are per-file and collected; `fail_fast` turns the first one into
//! a stop. Cancellation is observed between files, never mid-file.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::NaiveDate;
use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use crate::graph::{DependencyGraph, GraphError};
use crate::reference::{normalize_path, Reference, ReferenceError};
use crate::schema::{
    Document, DocumentFormat, EntityKind, EntityPayload, LineKind, RecipeClass, Stage,
};
use crate::service::{IngredientService, RecipeService, SupplierService};
use crate::settings::SharedSettings;
use crate::store::{Store, StoreError};

/// Cooperative cancellation flag, checked between files.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Stop at the first error instead of collecting.
    pub fail_fast: bool,
    /// Run phases 1-2 only and return the resolved map.
    pub import_only: bool,
    /// Base for `@/` references; relative input paths resolve against it.
    pub project_root: Utf8PathBuf,
    pub cancel: CancelToken,
}

impl ImportOptions {
    pub fn new(project_root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            fail_fast: false,
            import_only: false,
            project_root: project_root.into(),
            cancel: CancelToken::new(),
        }
    }
}

/// What a processor did with an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Outcome {
    Created,
    Upserted,
    Ignored,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportStats {
    pub created: usize,
    pub upserted: usize,
    pub ignored: usize,
    pub failed: usize,
}

impl ImportStats {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Created => self.created += 1,
            Outcome::Upserted => self.upserted += 1,
            Outcome::Ignored => self.ignored += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.created + self.upserted + self.ignored + self.failed
    }
}

impl std::fmt::Display for ImportStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} created, {} upserted, {} ignored, {} failed",
            self.created, self.upserted, self.ignored, self.failed
        )
    }
}

/// Classification of a per-file failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    InputMalformed,
    ReferenceUnresolved,
    DependencyCycle,
    MissingDependency,
    ImmutableField,
    InvariantViolation,
    StoreFailure,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileError {
    pub file: Utf8PathBuf,
    pub kind: ErrorKind,
    pub message: String,
}

impl std::fmt::Display for FileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}: {}", self.file, self.kind, self.message)
    }
}

/// Failure inside an entity processor at commit time.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("'{entity}' depends on '{dependency}', which is not in the store")]
    MissingDependency { entity: String, dependency: String },
    #[error("cannot change {field} of existing '{entity}'")]
    ImmutableField {
        entity: String,
        field: &'static str,
    },
    #[error("{0}")]
    Invariant(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ProcessError {
    fn kind(&self) -> ErrorKind {
        match self {
            ProcessError::MissingDependency { .. } => ErrorKind::MissingDependency,
            ProcessError::ImmutableField { .. } => ErrorKind::ImmutableField,
            ProcessError::Invariant(_) => ErrorKind::InvariantViolation,
            ProcessError::Store(_) => ErrorKind::StoreFailure,
        }
    }
}

/// Per-entity-kind commit hook. The default table persists through the
/// entity services; tests swap in their own.
pub trait EntityProcessor: Send + Sync {
    fn process(&self, entity: &ResolvedEntity) -> Result<Outcome, ProcessError>;
}

/// A payload with every reference replaced by a plain slug.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ResolvedEntity {
    Supplier(ResolvedSupplier),
    Ingredient(ResolvedIngredient),
    Recipe(ResolvedRecipe),
}

impl ResolvedEntity {
    pub fn kind(&self) -> EntityKind {
        match self {
            ResolvedEntity::Supplier(_) => EntityKind::Supplier,
            ResolvedEntity::Ingredient(_) => EntityKind::Ingredient,
            ResolvedEntity::Recipe(_) => EntityKind::Recipe,
        }
    }

    pub fn slug(&self) -> &str {
        match self {
            ResolvedEntity::Supplier(s) => &s.slug,
            ResolvedEntity::Ingredient(i) => &i.slug,
            ResolvedEntity::Recipe(r) => &r.slug,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedSupplier {
    pub slug: String,
    pub name: String,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedIngredient {
    pub slug: String,
    pub name: String,
    pub category: String,
    pub purchase_unit: String,
    pub purchase_cost: i64,
    pub includes_vat: bool,
    pub conversion_rule: Option<String>,
    pub supplier_slug: Option<String>,
    pub notes: Option<String>,
    pub last_purchased: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedRecipe {
    pub slug: String,
    pub name: String,
    pub stage: Stage,
    pub class: RecipeClass,
    pub category: Option<String>,
    pub sell_price: Option<i64>,
    /// `None` falls back to the configured default at commit.
    pub includes_vat: Option<bool>,
    /// `None` falls back to the configured default at commit.
    pub target_margin: Option<u8>,
    pub yield_amount: Option<Decimal>,
    pub yield_unit: Option<String>,
    pub parent_slug: Option<String>,
    pub lines: Vec<ResolvedLine>,
}

/// A recipe line with its authoritative kind, inferred from the referent.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedLine {
    pub kind: LineKind,
    pub slug: String,
    pub unit: String,
    pub notes: Option<String>,
}

#[derive(Debug)]
pub struct ImportReport {
    pub stats: ImportStats,
    pub errors: Vec<FileError>,
    /// Only populated for `import_only` runs.
    pub resolved: Option<IndexMap<Utf8PathBuf, ResolvedEntity>>,
    slugs: HashMap<(EntityKind, String), Utf8PathBuf>,
    pub cancelled: bool,
}

impl ImportReport {
    pub fn slug_path(&self, kind: EntityKind, slug: &str) -> Option<&Utf8Path> {
        self.slugs
            .get(&(kind, slug.to_string()))
            .map(Utf8PathBuf::as_path)
    }

    pub fn slug_map(&self) -> &HashMap<(EntityKind, String), Utf8PathBuf> {
        &self.slugs
    }

    pub fn ok(&self) -> bool {
        self.errors.is_empty()
    }
}

pub struct Importer {
    store: Arc<dyn Store>,
    processors: HashMap<EntityKind, Box<dyn EntityProcessor>>,
}

impl Importer {
    /// An importer committing through the default entity services.
    pub fn new(store: Arc<dyn Store>, settings: Arc<SharedSettings>) -> Self {
        let mut processors: HashMap<EntityKind, Box<dyn EntityProcessor>> = HashMap::new();
        processors.insert(
            EntityKind::Supplier,
            Box::new(SupplierService::new(store.clone(), settings.clone())),
        );
        processors.insert(
            EntityKind::Ingredient,
            Box::new(IngredientService::new(store.clone(), settings.clone())),
        );
        processors.insert(
            EntityKind::Recipe,
            Box::new(RecipeService::new(store.clone(), settings)),
        );
        Self { store, processors }
    }

    /// An importer with a custom processor table.
    pub fn with_processors(
        store: Arc<dyn Store>,
        processors: HashMap<EntityKind, Box<dyn EntityProcessor>>,
    ) -> Self {
        Self { store, processors }
    }

    #[tracing::instrument(level = "debug", skip_all, fields(files = files.len()))]
    pub fn import(&self, files: &[Utf8PathBuf], options: &ImportOptions) -> ImportReport {
        let mut run = Run {
            store: self.store.as_ref(),
            options,
            graph: DependencyGraph::new(),
            slugs: HashMap::new(),
            failed_scans: HashSet::new(),
            errors: Vec::new(),
            stats: ImportStats::default(),
            cancelled: false,
        };

        // phase 1: scan & graph build
        for file in files {
            if options.cancel.is_cancelled() {
                run.cancelled = true;
                break;
            }
            let path = run.canonical_input(file);
            if run.graph.contains(&path) || run.failed_scans.contains(&path) {
                continue;
            }
            if let Err(error) = run.scan_file(&path) {
                run.failed_scans.insert(path);
                run.errors.push(error);
                if options.fail_fast {
                    return run.into_report(None);
                }
            }
        }

        // phase 2: reference resolution in dependency order
        let Some(order) = run.commit_order() else {
            return run.into_report(None);
        };
        let mut resolved: IndexMap<Utf8PathBuf, ResolvedEntity> = IndexMap::new();
        for path in order {
            match run.resolve_file(&path) {
                Ok(entity) => {
                    resolved.insert(path, entity);
                }
                Err(error) => {
                    run.stats.failed += 1;
                    run.errors.push(error);
                    if options.fail_fast {
                        return run.into_report(None);
                    }
                }
            }
        }

        if options.import_only {
            return run.into_report(Some(resolved));
        }

        // phase 3: commit through the processor table
        let mut committed: HashSet<Utf8PathBuf> = HashSet::new();
        for (path, entity) in &resolved {
            if options.cancel.is_cancelled() {
                tracing::info!("import cancelled, aborting before '{path}'");
                run.cancelled = true;
                break;
            }
            if committed.contains(path) {
                continue;
            }
            let Some(processor) = self.processors.get(&entity.kind()) else {
                run.stats.failed += 1;
                run.errors.push(FileError {
                    file: path.clone(),
                    kind: ErrorKind::InvariantViolation,
                    message: format!("no processor registered for {}", entity.kind()),
                });
                continue;
            };
            match processor.process(entity) {
                Ok(outcome) => {
                    tracing::debug!(%path, %outcome, "committed");
                    run.stats.record(outcome);
                    committed.insert(path.clone());
                }
                Err(error) => {
                    run.stats.failed += 1;
                    run.errors.push(FileError {
                        file: path.clone(),
                        kind: error.kind(),
                        message: error.to_string(),
                    });
                    if options.fail_fast {
                        break;
                    }
                }
            }
        }

        run.into_report(None)
    }
}

struct Run<'a> {
    store: &'a dyn Store,
    options: &'a ImportOptions,
    graph: DependencyGraph<ScannedFile>,
    slugs: HashMap<(EntityKind, String), Utf8PathBuf>,
    failed_scans: HashSet<Utf8PathBuf>,
    errors: Vec<FileError>,
    stats: ImportStats,
    cancelled: bool,
}

#[derive(Debug)]
struct ScannedFile {
    slug: String,
    payload: EntityPayload,
}

impl Run<'_> {
    fn canonical_input(&self, path: &Utf8Path) -> Utf8PathBuf {
        if path.is_absolute() {
            normalize_path(path)
        } else {
            normalize_path(&self.options.project_root.join(path))
        }
    }

    fn into_report(self, resolved: Option<IndexMap<Utf8PathBuf, ResolvedEntity>>) -> ImportReport {
        ImportReport {
            stats: self.stats,
            errors: self.errors,
            resolved,
            slugs: self.slugs,
            cancelled: self.cancelled,
        }
    }

    #[tracing::instrument(level = "trace", skip(self))]
    fn scan_file(&mut self, path: &Utf8Path) -> Result<(), FileError> {
        let malformed = |message: String| FileError {
            file: path.to_path_buf(),
            kind: ErrorKind::InputMalformed,
            message,
        };

        let Some(format) = DocumentFormat::from_path(path) else {
            return Err(malformed("not an entity file extension".into()));
        };
        let text = std::fs::read_to_string(path).map_err(|e| malformed(e.to_string()))?;
        let document: Document = crate::schema::parse_document(&text, format)
            .map_err(|e| malformed(e.to_string()))?;
        let payload =
            EntityPayload::from_document(&document).map_err(|e| malformed(e.to_string()))?;

        let kind = payload.kind();
        let slug = payload.slug();
        if let Some(other) = self.slugs.get(&(kind, slug.clone())) {
            if other != path {
                return Err(malformed(format!(
                    "duplicate {kind} slug '{slug}', already declared by '{other}'"
                )));
            }
        }
        self.slugs.insert((kind, slug.clone()), path.to_path_buf());
        self.graph
            .add_node(path.to_path_buf(), ScannedFile { slug, payload });

        // follow path references; symbolic slug references add no edges
        let raw_refs = match &self.graph.get(path).expect("node just added").payload {
            EntityPayload::Supplier(_) => Vec::new(),
            EntityPayload::Ingredient(p) => {
                p.supplier.iter().map(|u| u.uses.clone()).collect()
            }
            EntityPayload::Recipe(p) => p
                .extends
                .iter()
                .cloned()
                .chain(p.ingredients.iter().map(|l| l.uses.clone()))
                .collect(),
        };

        for raw in raw_refs {
            let reference = Reference::parse(&raw).map_err(|e: ReferenceError| {
                malformed(format!("invalid reference '{raw}': {e}"))
            })?;
            let Some(target) = reference.resolve(&self.options.project_root, path) else {
                continue;
            };
            if !self.graph.contains(&target) {
                if self.failed_scans.contains(&target) {
                    return Err(FileError {
                        file: path.to_path_buf(),
                        kind: ErrorKind::ReferenceUnresolved,
                        message: format!("referenced file failed to load: '{target}'"),
                    });
                }
                if !target.is_file() {
                    return Err(FileError {
                        file: path.to_path_buf(),
                        kind: ErrorKind::ReferenceUnresolved,
                        message: format!("referenced file does not exist: '{target}'"),
                    });
                }
                if let Err(nested) = self.scan_file(&target) {
                    self.failed_scans.insert(target.clone());
                    self.errors.push(nested);
                    return Err(FileError {
                        file: path.to_path_buf(),
                        kind: ErrorKind::ReferenceUnresolved,
                        message: format!("referenced file failed to load: '{target}'"),
                    });
                }
            }
            self.graph
                .set_dependency(path, &target)
                .expect("both nodes present");
        }

        Ok(())
    }

    /// Dependency-ordered list of scanned files, with cycle members
    /// reported and left out. Files whose scan failed after their node was
    /// registered are left out the same way. `None` means fail-fast
    /// kicked in.
    fn commit_order(&mut self) -> Option<Vec<Utf8PathBuf>> {
        let mut poisoned: HashSet<Utf8PathBuf> = self.failed_scans.clone();
        loop {
            match self.graph.topological_order_excluding(&poisoned) {
                Ok(order) => {
                    return Some(order.into_iter().map(Utf8Path::to_path_buf).collect());
                }
                Err(GraphError::Cycle(cycle)) => {
                    let message = cycle.to_string();
                    tracing::warn!("dependency cycle: {message}");
                    for node in &cycle.0 {
                        if poisoned.insert(node.clone()) {
                            self.stats.failed += 1;
                            self.errors.push(FileError {
                                file: node.clone(),
                                kind: ErrorKind::DependencyCycle,
                                message: message.clone(),
                            });
                        }
                    }
                    if self.options.fail_fast {
                        return None;
                    }
                }
                Err(GraphError::UnknownNode(_)) => unreachable!("walk starts from known nodes"),
            }
        }
    }

    fn resolve_file(&self, path: &Utf8Path) -> Result<ResolvedEntity, FileError> {
        let node = self.graph.get(path).expect("ordered node in graph");
        let entity = match &node.payload {
            EntityPayload::Supplier(p) => ResolvedEntity::Supplier(ResolvedSupplier {
                slug: node.slug.clone(),
                name: p.name.clone(),
                contact_name: p.contact.as_ref().and_then(|c| c.name.clone()),
                contact_email: p.contact.as_ref().and_then(|c| c.email.clone()),
                contact_phone: p.contact.as_ref().and_then(|c| c.phone.clone()),
                notes: p.notes.clone(),
            }),
            EntityPayload::Ingredient(p) => {
                let supplier_slug = match &p.supplier {
                    None => None,
                    Some(uses) => {
                        Some(self.referent_slug(path, &uses.uses, EntityKind::Supplier)?)
                    }
                };
                ResolvedEntity::Ingredient(ResolvedIngredient {
                    slug: node.slug.clone(),
                    name: p.name.clone(),
                    category: p.category.clone(),
                    purchase_unit: p.purchase.unit.clone(),
                    purchase_cost: p.purchase.cost,
                    includes_vat: p.purchase.vat,
                    conversion_rule: p.conversion_rate.clone(),
                    supplier_slug,
                    notes: p.notes.clone(),
                    last_purchased: p.last_purchased,
                })
            }
            EntityPayload::Recipe(p) => {
                let parent_slug = match &p.extends {
                    None => None,
                    Some(raw) => Some(self.referent_slug(path, raw, EntityKind::Recipe)?),
                };
                let mut lines = Vec::with_capacity(p.ingredients.len());
                for (i, line) in p.ingredients.iter().enumerate() {
                    let (kind, slug) = self.line_referent(path, &line.uses, line.type_hint)?;
                    if let Some(hint) = line.type_hint {
                        if hint != kind {
                            tracing::debug!(
                                "{path}: ingredients[{i}] declares type '{hint}' but \
                                 '{slug}' is a {kind}; using the actual kind"
                            );
                        }
                    }
                    lines.push(ResolvedLine {
                        kind,
                        slug,
                        unit: line.with.unit.clone(),
                        notes: line.with.notes.clone(),
                    });
                }
                ResolvedEntity::Recipe(ResolvedRecipe {
                    slug: node.slug.clone(),
                    name: p.name.clone(),
                    stage: p.stage.unwrap_or_default(),
                    class: p.class.unwrap_or_default(),
                    category: p.category.clone(),
                    sell_price: p.costing.as_ref().and_then(|c| c.price),
                    includes_vat: p.costing.as_ref().and_then(|c| c.vat),
                    target_margin: p
                        .costing
                        .as_ref()
                        .and_then(|c| c.margin)
                        .map(|m| m as u8),
                    yield_amount: p.yield_amount,
                    yield_unit: p.yield_unit.clone(),
                    parent_slug,
                    lines,
                })
            }
        };
        Ok(entity)
    }

    /// Slug of a reference that must point at `expected`.
    fn referent_slug(
        &self,
        from: &Utf8Path,
        raw: &str,
        expected: EntityKind,
    ) -> Result<String, FileError> {
        let unresolved = |message: String| FileError {
            file: from.to_path_buf(),
            kind: ErrorKind::ReferenceUnresolved,
            message,
        };
        let reference =
            Reference::parse(raw).map_err(|e| unresolved(format!("'{raw}': {e}")))?;
        match &reference {
            Reference::Slug(slug) => {
                let in_graph = self.slugs.contains_key(&(expected, slug.clone()));
                let in_store = self.slug_in_store(expected, slug).map_err(|e| {
                    unresolved(format!("'{raw}': store lookup failed: {e}"))
                })?;
                if in_graph || in_store {
                    Ok(slug.clone())
                } else {
                    Err(unresolved(format!(
                        "'{raw}': no {expected} with that slug in this import or the store"
                    )))
                }
            }
            _ => {
                let target = reference
                    .resolve(&self.options.project_root, from)
                    .expect("path reference resolves");
                let node = self.graph.get(&target).ok_or_else(|| {
                    unresolved(format!("'{raw}': '{target}' is not part of this import"))
                })?;
                if node.payload.kind() != expected {
                    return Err(unresolved(format!(
                        "'{raw}': expected a {expected}, found a {}",
                        node.payload.kind()
                    )));
                }
                Ok(node.slug.clone())
            }
        }
    }

    /// Kind and slug of a recipe line referent. The declared hint only
    /// breaks ties when a slug names both an ingredient and a recipe.
    fn line_referent(
        &self,
        from: &Utf8Path,
        raw: &str,
        hint: Option<LineKind>,
    ) -> Result<(LineKind, String), FileError> {
        let unresolved = |message: String| FileError {
            file: from.to_path_buf(),
            kind: ErrorKind::ReferenceUnresolved,
            message,
        };
        let reference =
            Reference::parse(raw).map_err(|e| unresolved(format!("'{raw}': {e}")))?;
        match &reference {
            Reference::Slug(slug) => {
                let as_ingredient = self.slugs.contains_key(&(EntityKind::Ingredient, slug.clone()))
                    || self
                        .slug_in_store(EntityKind::Ingredient, slug)
                        .map_err(|e| unresolved(format!("'{raw}': store lookup failed: {e}")))?;
                let as_recipe = self.slugs.contains_key(&(EntityKind::Recipe, slug.clone()))
                    || self
                        .slug_in_store(EntityKind::Recipe, slug)
                        .map_err(|e| unresolved(format!("'{raw}': store lookup failed: {e}")))?;
                let kind = match (as_ingredient, as_recipe) {
                    (true, true) => match hint {
                        Some(LineKind::Recipe) => LineKind::Recipe,
                        _ => LineKind::Ingredient,
                    },
                    (true, false) => LineKind::Ingredient,
                    (false, true) => LineKind::Recipe,
                    (false, false) => {
                        return Err(unresolved(format!(
                            "'{raw}': no ingredient or recipe with that slug in this \
                             import or the store"
                        )))
                    }
                };
                Ok((kind, slug.clone()))
            }
            _ => {
                let target = reference
                    .resolve(&self.options.project_root, from)
                    .expect("path reference resolves");
                let node = self.graph.get(&target).ok_or_else(|| {
                    unresolved(format!("'{raw}': '{target}' is not part of this import"))
                })?;
                let kind = match node.payload.kind() {
                    EntityKind::Ingredient => LineKind::Ingredient,
                    EntityKind::Recipe => LineKind::Recipe,
                    EntityKind::Supplier => {
                        return Err(unresolved(format!(
                            "'{raw}': a recipe line cannot use a supplier"
                        )))
                    }
                };
                Ok((kind, node.slug.clone()))
            }
        }
    }

    fn slug_in_store(&self, kind: EntityKind, slug: &str) -> Result<bool, StoreError> {
        Ok(match kind {
            EntityKind::Supplier => self.store.supplier_by_slug(slug)?.is_some(),
            EntityKind::Ingredient => self.store.ingredient_by_slug(slug)?.is_some(),
            EntityKind::Recipe => self.store.recipe_by_slug(slug)?.is_some(),
        })
    }
}
