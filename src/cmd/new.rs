use anstream::println;
use anyhow::{bail, Result};
use clap::Args;
use margin_core::schema::{slugify, Document, EntityKind};
use margin_fs::{storage_for, StorageMode};
use owo_colors::OwoColorize;
use serde_json::json;

use crate::Context;

#[derive(Debug, Args)]
pub struct NewArgs {
    /// Entity kind: supplier, ingredient or recipe
    kind: EntityKind,

    /// Display name of the new entity
    name: String,

    /// Explicit slug (defaults to one derived from the name)
    #[arg(long)]
    slug: Option<String>,
}

pub fn run(ctx: &Context, args: NewArgs) -> Result<()> {
    let slug = args.slug.clone().unwrap_or_else(|| slugify(&args.name));
    if slug.is_empty() {
        bail!("cannot derive a slug from '{}'", args.name);
    }

    let document = Document {
        object: args.kind,
        data: skeleton(args.kind, &args.name, args.slug.as_deref()),
    };

    let storage = storage_for(ctx.config.storage_mode);
    let target = ctx
        .base_path
        .join(args.kind.plural_dir())
        .join(&slug)
        .with_extension("yaml");
    if target.is_file() {
        bail!("'{target}' already exists");
    }

    let path = storage.write(args.kind, &slug, &document, &ctx.base_path, None)?;
    if storage.mode() == StorageMode::DatabaseOnly {
        println!(
            "{} {} '{slug}' (database-only mode, no file written)",
            "Created".green().bold(),
            args.kind
        );
    } else {
        println!("{} {} '{slug}' at {path}", "Created".green().bold(), args.kind);
    }
    Ok(())
}

/// Minimal payload that passes validation; placeholders are meant to be
/// edited before the first real import.
fn skeleton(kind: EntityKind, name: &str, slug: Option<&str>) -> serde_json::Value {
    let mut data = match kind {
        EntityKind::Supplier => json!({ "name": name }),
        EntityKind::Ingredient => json!({
            "name": name,
            "category": "uncategorised",
            "purchase": { "unit": "1 unit", "cost": 0 },
        }),
        EntityKind::Recipe => json!({
            "name": name,
            "stage": "development",
            "costing": { "price": 0 },
            "ingredients": [],
        }),
    };
    if let Some(slug) = slug {
        data["slug"] = json!(slug);
    }
    data
}
