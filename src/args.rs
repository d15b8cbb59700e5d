use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use margin_fs::StorageMode;

use crate::cmd;

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub global_args: GlobalArgs,
}

#[derive(Debug, Subcommand, strum::Display)]
pub enum Command {
    /// Initialise a collection
    #[command(visible_alias = "initialise")]
    Init(cmd::init::InitArgs),
    /// Import entity files into the store
    #[command(visible_alias = "i")]
    Import(cmd::import::ImportArgs),
    /// Cost recipes and check margins
    #[command(visible_alias = "r")]
    Recipe(cmd::recipe::RecipeArgs),
    /// List the entity files in the collection
    #[command(visible_alias = "ls")]
    List(cmd::list::ListArgs),
    /// Create a skeleton entity file
    New(cmd::new::NewArgs),
    /// See the loaded configuration
    Config(cmd::config_cmd::ConfigArgs),
    #[cfg(feature = "watch")]
    /// Watch the collection and re-import changed files
    Watch(cmd::watch::WatchArgs),
}

#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// Change the collection base path
    ///
    /// This path is used to load configuration, resolve `@/` references
    /// and discover entity files.
    #[arg(long, value_name = "PATH", value_hint = clap::ValueHint::DirPath, global = true)]
    pub path: Option<Utf8PathBuf>,

    /// Use a specific configuration file
    #[arg(long, value_name = "FILE", hide_short_help = true, global = true)]
    pub config_file: Option<Utf8PathBuf>,

    /// Override the storage mode (filesystem or database_only)
    #[arg(long, hide_short_help = true, global = true)]
    pub storage_mode: Option<StorageMode>,

    /// Override the VAT rate, e.g. 0.2
    #[arg(long, hide_short_help = true, global = true)]
    pub vat: Option<rust_decimal::Decimal>,

    /// Override the target margin, whole percent
    #[arg(long, hide_short_help = true, global = true)]
    pub margin_target: Option<u8>,

    #[command(flatten)]
    pub color: colorchoice_clap::Color,

    #[arg(long, hide_short_help = true, global = true)]
    pub debug_trace: bool,
}
