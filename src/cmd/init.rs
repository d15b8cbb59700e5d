use std::fs;

use anstream::println;
use anyhow::{bail, Result};
use camino::Utf8PathBuf;
use clap::Args;
use owo_colors::OwoColorize;

use crate::args::GlobalArgs;
use crate::config::{config_file_path, Config};
use crate::MARGIN_DIR;

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Directory to initialise
    ///
    /// Defaults to the working directory.
    path: Option<Utf8PathBuf>,

    /// Re-write the configuration of an already initialised collection
    #[arg(long)]
    force: bool,
}

pub fn run(args: &InitArgs, global: &GlobalArgs) -> Result<()> {
    let base = args
        .path
        .clone()
        .or_else(|| global.path.clone())
        .unwrap_or_else(|| Utf8PathBuf::from("."));

    if base.join(MARGIN_DIR).is_dir() && !args.force {
        bail!("'{base}' is already an initialised collection");
    }

    for dir in ["suppliers", "ingredients", "recipes"] {
        fs::create_dir_all(base.join(dir))?;
    }

    let mut config = Config::default();
    config.override_with_args(global);
    let config_path = config_file_path(&base);
    config.write(&config_path)?;

    println!("{} collection at '{base}'", "Initialised".green().bold());
    println!("  configuration: {config_path}");
    Ok(())
}
