use anstream::println;
use anyhow::{bail, Result};
use camino::Utf8PathBuf;
use clap::Args;
use margin_core::import::ImportOptions;
use owo_colors::OwoColorize;

use crate::util::print_errors;
use crate::{Context, UnrecoverableInput};

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// Entity files to import
    ///
    /// Referenced files are pulled in automatically.
    #[arg(required = true)]
    files: Vec<Utf8PathBuf>,

    /// Stop at the first error
    #[arg(long)]
    fail_fast: bool,

    /// Resolve references without persisting anything
    #[arg(long)]
    dry_run: bool,
}

pub fn run(ctx: &Context, args: ImportArgs) -> Result<()> {
    for file in &args.files {
        let absolute = if file.is_absolute() {
            file.clone()
        } else {
            ctx.base_path.join(file)
        };
        if !absolute.is_file() {
            return Err(UnrecoverableInput(format!("no such file: '{file}'")).into());
        }
    }

    let mut options = ImportOptions::new(ctx.base_path.clone());
    options.fail_fast = args.fail_fast;
    options.import_only = args.dry_run;

    let report = ctx.importer().import(&args.files, &options);

    if let Some(resolved) = &report.resolved {
        let mut table = tabular::Table::new("{:<}  {:<}  {:<}");
        for (path, entity) in resolved {
            let path = path.strip_prefix(&ctx.base_path).unwrap_or(path);
            table.add_row(tabular::row!(
                entity.kind().to_string(),
                entity.slug(),
                path
            ));
        }
        println!("{table}");
        println!("{} entities resolved, nothing persisted", resolved.len());
    } else {
        println!(
            "{} created, {} upserted, {} ignored, {}",
            report.stats.created.green(),
            report.stats.upserted.yellow(),
            report.stats.ignored.dimmed(),
            if report.stats.failed > 0 {
                format!("{} failed", report.stats.failed).red().to_string()
            } else {
                "0 failed".to_string()
            }
        );
    }

    print_errors(ctx, &report.errors);
    if !report.ok() {
        bail!("import finished with {} error(s)", report.errors.len());
    }
    Ok(())
}
