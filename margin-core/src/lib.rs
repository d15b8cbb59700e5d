//! Menu costing engine.
//!
//! Suppliers, ingredients and recipes are described in declarative YAML or
//! JSON files. This crate ingests them — resolving cross-file references,
//! ordering commits along the dependency graph and classifying every
//! entity as created, upserted or ignored — and computes the fully-loaded
//! cost and profit margin of every recipe against a target.
//!
//! The main pieces:
//!
//! - [`import::Importer`]: the three-phase import pipeline.
//! - [`cost::CostEngine`]: recursive costing and margin derivation.
//! - [`store::Store`]: the narrow seam to whatever persists the data;
//!   [`store::MemoryStore`] is the in-process driver.
//! - [`service`]: per-entity lookup/upsert/delete plus the commit-time
//!   processors the pipeline dispatches to.
//!
//! Monetary amounts are integer minor units throughout; intermediate
//! arithmetic is [`rust_decimal::Decimal`], never floats.

pub mod convert;
pub mod cost;
pub mod diff;
pub mod graph;
pub mod import;
pub mod quantity;
pub mod reference;
pub mod schema;
pub mod service;
pub mod settings;
pub mod store;

pub use cost::{CostEngine, CostResult, MarginResult, MAX_COST_DEPTH};
pub use import::{CancelToken, ImportOptions, ImportReport, ImportStats, Importer};
pub use settings::{Settings, SharedSettings};
