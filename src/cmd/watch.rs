use std::collections::HashMap;
use std::time::Duration;

use anstream::{eprintln, println};
use anyhow::Result;
use camino::Utf8PathBuf;
use clap::Args;
use margin_core::import::ImportOptions;
use margin_core::schema::EntityKind;
use margin_core::service::{IngredientService, RecipeService, SupplierService};
use margin_fs::watch::{self, WatchAction, WatchEvent, WatchMessage, WatchOptions};
use owo_colors::OwoColorize;

use crate::util::{import_collection, print_errors};
use crate::Context;

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Debounce window in milliseconds
    #[arg(long, default_value_t = 150)]
    debounce: u64,
}

pub fn run(ctx: &Context, args: WatchArgs) -> Result<()> {
    // initial sync, and the slug bootstrap for deletes of unseen paths
    let report = import_collection(ctx)?;
    println!("Initial import: {}", report.stats);
    print_errors(ctx, &report.errors);

    let bootstrap: HashMap<Utf8PathBuf, (EntityKind, String)> = report
        .slug_map()
        .iter()
        .map(|((kind, slug), path)| (path.clone(), (*kind, slug.clone())))
        .collect();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(watch_loop(ctx, args, bootstrap))
}

async fn watch_loop(
    ctx: &Context,
    args: WatchArgs,
    bootstrap: HashMap<Utf8PathBuf, (EntityKind, String)>,
) -> Result<()> {
    let options = WatchOptions {
        debounce: Duration::from_millis(args.debounce),
        bootstrap,
    };
    let (_watcher, mut rx) = watch::watch(&ctx.base_path, ctx.importer().clone(), options)
        .map_err(|e| anyhow::anyhow!("cannot watch '{}': {e}", ctx.base_path))?;
    println!(
        "Watching '{}' (Ctrl-C to stop)",
        ctx.base_path.as_str().bold()
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            message = rx.recv() => match message {
                None => break,
                Some(WatchMessage::Error(error)) => {
                    eprintln!("{} {error}", "error:".red().bold());
                }
                Some(WatchMessage::Event(event)) => apply(ctx, &event),
            }
        }
    }
    println!("Stopped watching");
    Ok(())
}

/// One event at a time: the watcher is the single writer for this store.
fn apply(ctx: &Context, event: &WatchEvent) {
    let rel = event.path.strip_prefix(&ctx.base_path).unwrap_or(&event.path);
    println!(
        "{} {} '{}' {}",
        format!("[{}]", event.action).cyan(),
        event.kind,
        event.slug,
        rel.to_string().dimmed()
    );

    match event.action {
        WatchAction::Created | WatchAction::Updated => {
            let options = ImportOptions::new(ctx.base_path.clone());
            let report = ctx.importer().import(&[event.path.clone()], &options);
            if !report.ok() {
                print_errors(ctx, &report.errors);
            } else if report.stats.ignored == report.stats.total() {
                tracing::debug!("'{}' unchanged in the store", event.slug);
            } else {
                println!("  {}", report.stats);
            }
        }
        WatchAction::Deleted => {
            let store = ctx.store().clone();
            let settings = ctx.shared_settings().clone();
            let result = match event.kind {
                EntityKind::Supplier => {
                    SupplierService::new(store, settings).delete(&event.slug)
                }
                EntityKind::Ingredient => {
                    IngredientService::new(store, settings).delete(&event.slug)
                }
                EntityKind::Recipe => RecipeService::new(store, settings).delete(&event.slug),
            };
            if let Err(error) = result {
                eprintln!("{} {error}", "error:".red().bold());
            }
        }
    }
}
