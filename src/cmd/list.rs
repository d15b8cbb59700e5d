use anstream::println;
use anyhow::Result;
use clap::Args;
use margin_core::schema::EntityKind;
use owo_colors::OwoColorize;

use crate::Context;

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Only count the entity files
    #[arg(short = 'n', long)]
    count: bool,

    /// Display paths relative to the collection root
    #[arg(short, long)]
    paths: bool,
}

pub fn run(ctx: &Context, args: ListArgs) -> Result<()> {
    let mut entries = Vec::new();
    for entry in margin_fs::all_entities(&ctx.base_path, ctx.config.max_depth)? {
        let payload = entry.read().and_then(|c| c.payload());
        entries.push((entry, payload));
    }

    if args.count {
        let mut counts = [0usize; 3];
        let mut broken = 0usize;
        for (_, payload) in &entries {
            match payload {
                Ok(p) => match p.kind() {
                    EntityKind::Supplier => counts[0] += 1,
                    EntityKind::Ingredient => counts[1] += 1,
                    EntityKind::Recipe => counts[2] += 1,
                },
                Err(_) => broken += 1,
            }
        }
        use tabular::{row, table};
        let mut table = table!(
            "{:>}  {:<}",
            row!("Suppliers", counts[0]),
            row!("Ingredients", counts[1]),
            row!("Recipes", counts[2])
        );
        if broken > 0 {
            table.add_row(row!("Unreadable", broken));
        }
        println!("{table}");
        return Ok(());
    }

    let mut table = tabular::Table::new("{:<}  {:<}  {:<}");
    for (entry, payload) in &entries {
        let mut row = tabular::Row::new();
        match payload {
            Ok(payload) => {
                row.add_cell(payload.kind().to_string());
                row.add_cell(payload.slug());
            }
            Err(_) => {
                row.add_ansi_cell("cannot parse".red().bold().to_string());
                row.add_cell("");
            }
        }
        if args.paths {
            let rel = entry
                .path()
                .strip_prefix(&ctx.base_path)
                .unwrap_or(entry.path());
            row.add_cell(rel);
        } else {
            row.add_cell(entry.file_name());
        }
        table.add_row(row);
    }
    println!("{table}");
    Ok(())
}
