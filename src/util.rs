use anyhow::Result;
use camino::Utf8PathBuf;
use margin_core::import::{FileError, ImportOptions, ImportReport};
use margin_fs::EntityEntry;

use crate::Context;

/// Minor units to a display amount, `-£1.05` style.
pub fn money(minor: i64) -> String {
    let sign = if minor < 0 { "-" } else { "" };
    let abs = minor.unsigned_abs();
    format!("{sign}£{}.{:02}", abs / 100, abs % 100)
}

/// Every entity file in the collection, discovery order.
pub fn collection_files(ctx: &Context) -> Result<Vec<Utf8PathBuf>> {
    let entries = margin_fs::all_entities(&ctx.base_path, ctx.config.max_depth)?;
    Ok(entries.into_iter().map(EntityEntry::into_path).collect())
}

/// Import the whole collection into this run's store.
pub fn import_collection(ctx: &Context) -> Result<ImportReport> {
    let files = collection_files(ctx)?;
    let options = ImportOptions::new(ctx.base_path.clone());
    Ok(ctx.importer().import(&files, &options))
}

pub fn print_errors(ctx: &Context, errors: &[FileError]) {
    use owo_colors::OwoColorize;

    for error in errors {
        let file = error
            .file
            .strip_prefix(&ctx.base_path)
            .unwrap_or(&error.file);
        anstream::eprintln!(
            "{} {}: {}",
            format!("[{}]", error.kind).red().bold(),
            file,
            error.message
        );
    }
}
