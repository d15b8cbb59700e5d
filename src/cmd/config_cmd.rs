use anstream::println;
use anyhow::Result;
use clap::Args;
use owo_colors::OwoColorize;

use crate::Context;

#[derive(Debug, Args)]
pub struct ConfigArgs {}

pub fn run(ctx: &Context, _args: ConfigArgs) -> Result<()> {
    if ctx.config_path.is_file() {
        println!(
            "Configuration has been loaded from:\n\t{}",
            ctx.config_path.yellow()
        );
    } else {
        println!(
            "No configuration file at {}; using defaults",
            ctx.config_path.yellow()
        );
    }
    let c = toml::to_string_pretty(&ctx.config)?;
    let fence = "+++".dimmed();
    println!("{fence}");
    println!("{}", c.trim());
    println!("{fence}");
    Ok(())
}
