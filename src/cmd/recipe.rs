use anstream::println;
use anyhow::{bail, Context as _, Result};
use clap::{Args, Subcommand};
use margin_core::cost::{CostEngine, CostResult, CostTreeNode, MarginResult};
use margin_core::schema::Stage;
use margin_core::store::Store;
use owo_colors::OwoColorize;

use crate::util::{import_collection, money, print_errors};
use crate::Context;

#[derive(Debug, Args)]
pub struct RecipeArgs {
    #[command(subcommand)]
    command: RecipeCommand,
}

#[derive(Debug, Subcommand)]
enum RecipeCommand {
    /// Cost one or more recipes and show the margin breakdown
    #[command(visible_alias = "calc")]
    Calculate(CalculateArgs),
    /// Margin table over the collection
    Report(ReportArgs),
}

#[derive(Debug, Args)]
struct CalculateArgs {
    /// Recipe slugs
    #[arg(required = true)]
    slugs: Vec<String>,

    /// Hide the per-line cost tree
    #[arg(long)]
    no_tree: bool,
}

#[derive(Debug, Args)]
struct ReportArgs {
    /// Include recipes in every stage, not just active ones
    #[arg(long, short)]
    all: bool,
}

pub fn run(ctx: &Context, args: RecipeArgs) -> Result<()> {
    let report = import_collection(ctx)?;
    print_errors(ctx, &report.errors);
    if !report.ok() {
        bail!(
            "collection import failed ({} error(s)); costs would be incomplete",
            report.errors.len()
        );
    }

    match args.command {
        RecipeCommand::Calculate(args) => calculate(ctx, args),
        RecipeCommand::Report(args) => margin_report(ctx, args),
    }
}

fn calculate(ctx: &Context, args: CalculateArgs) -> Result<()> {
    let engine = CostEngine::new(ctx.store().as_ref(), ctx.shared_settings().current());
    for (i, slug) in args.slugs.iter().enumerate() {
        if i > 0 {
            println!();
        }
        let cost = engine
            .cost(slug)
            .with_context(|| format!("cannot cost '{slug}'"))?;
        let margin = engine.margin(&cost)?;
        print_recipe(&cost, &margin, !args.no_tree);
    }
    Ok(())
}

fn print_recipe(cost: &CostResult, margin: &MarginResult, tree: bool) {
    println!(
        "{} {}",
        cost.recipe.name.bold(),
        format!("({})", cost.recipe.slug).dimmed()
    );

    if tree {
        for node in &cost.tree {
            print_node(node, 1);
        }
    }

    for warning in &cost.warnings {
        println!("  {} {warning}", "warning:".yellow().bold());
    }

    println!("  {:<18} {}", "total cost", money(margin.cost).bold());
    println!(
        "  {:<18} {}{}",
        "sell price ex VAT",
        money(margin.sell_price_ex_vat),
        if margin.vat_applicable {
            format!(
                " {}",
                format!(
                    "(customer pays {}, VAT {})",
                    money(margin.customer_price),
                    money(margin.vat_amount)
                )
                .dimmed()
            )
        } else {
            String::new()
        }
    );
    println!("  {:<18} {}", "profit", money(margin.profit));
    let margin_str = format!("{}%", margin.actual_margin);
    let delta = if margin.margin_delta.is_sign_negative() {
        margin.margin_delta.to_string()
    } else {
        format!("+{}", margin.margin_delta)
    };
    println!(
        "  {:<18} {} against a target of {}% ({delta})",
        "margin",
        if margin.meets_target {
            margin_str.green().bold().to_string()
        } else {
            margin_str.red().bold().to_string()
        },
        margin.target_margin,
    );
}

fn print_node(node: &CostTreeNode, depth: usize) {
    println!(
        "{}{} {} {}",
        "  ".repeat(depth),
        format!("{:>8}", money(node.cost)),
        node.name,
        format!("({})", node.unit).dimmed()
    );
    for child in &node.children {
        print_node(child, depth + 1);
    }
}

fn margin_report(ctx: &Context, args: ReportArgs) -> Result<()> {
    let engine = CostEngine::new(ctx.store().as_ref(), ctx.shared_settings().current());
    let cache = ctx.shared_settings().cache();

    let mut recipes = ctx.store().recipes()?;
    recipes.sort_by(|a, b| a.slug.cmp(&b.slug));

    let mut table = tabular::Table::new("{:<}  {:>}  {:>}  {:>}  {:>}  {:<}");
    table.add_row(tabular::row!(
        "recipe", "cost", "price ex VAT", "margin", "target", "ok"
    ));

    let mut below_target = 0usize;
    let mut shown = 0usize;
    for recipe in &recipes {
        if !args.all && recipe.stage != Stage::Active {
            continue;
        }

        let cache_key = format!("margin:{}", recipe.slug);
        let margin: MarginResult = match cache
            .get(&cache_key)
            .and_then(|v| serde_json::from_value(v).ok())
        {
            Some(margin) => margin,
            None => {
                let cost = engine.cost(&recipe.slug)?;
                let margin = engine.margin(&cost)?;
                cache.put(
                    cache_key,
                    serde_json::to_value(&margin).expect("margin serialises"),
                );
                margin
            }
        };

        shown += 1;
        if !margin.meets_target {
            below_target += 1;
        }
        let mut row = tabular::Row::new();
        row.add_cell(&recipe.slug);
        row.add_cell(money(margin.cost));
        row.add_cell(money(margin.sell_price_ex_vat));
        row.add_ansi_cell(if margin.meets_target {
            format!("{}%", margin.actual_margin).green().to_string()
        } else {
            format!("{}%", margin.actual_margin).red().to_string()
        });
        row.add_cell(format!("{}%", margin.target_margin));
        row.add_ansi_cell(if margin.meets_target {
            "yes".green().to_string()
        } else {
            "NO".red().bold().to_string()
        });
        table.add_row(row);
    }

    println!("{table}");
    if shown == 0 {
        println!("no recipes to report on");
    } else if below_target > 0 {
        println!(
            "{} of {} recipe(s) below target",
            below_target.red().bold(),
            shown
        );
    } else {
        println!("all {} recipe(s) meet their target", shown.green());
    }
    Ok(())
}
