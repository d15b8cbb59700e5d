use std::sync::Arc;

use anstream::ColorChoice;
use anyhow::{bail, Context as _, Result};
use args::{CliArgs, Command, GlobalArgs};
use camino::Utf8PathBuf;
use clap::Parser;
use config::Config;
use margin_core::import::Importer;
use margin_core::store::MemoryStore;
use margin_core::SharedSettings;
use once_cell::sync::OnceCell;

// commands
mod cmd;

// other modules
mod args;
mod config;
mod util;

const MARGIN_DIR: &str = ".margin";
const APP_NAME: &str = "menu-margin";

fn main() -> std::process::ExitCode {
    match try_main() {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            if err.downcast_ref::<NotInitialised>().is_some() {
                // documented contract: 409 when the collection is missing
                std::process::exit(409);
            }
            if err.downcast_ref::<UnrecoverableInput>().is_some() {
                std::process::exit(2);
            }
            std::process::ExitCode::FAILURE
        }
    }
}

fn try_main() -> Result<()> {
    let args = CliArgs::parse();

    let color_ctx = init_color(args.global_args.color);
    if args.global_args.debug_trace {
        tracing_subscriber::FmtSubscriber::builder()
            .compact()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(color_ctx.color_stderr)
            .init();
    } else {
        tracing_subscriber::FmtSubscriber::builder()
            .compact()
            .with_target(false)
            .with_writer(std::io::stderr)
            .with_ansi(color_ctx.color_stderr)
            .init();
    }

    // init must run before the initialised check
    if let Command::Init(init_args) = &args.command {
        return cmd::init::run(init_args, &args.global_args);
    }

    let ctx = configure_context(args.global_args, color_ctx)?;

    match args.command {
        Command::Init(_) => unreachable!(),
        Command::Import(args) => cmd::import::run(&ctx, args),
        Command::Recipe(args) => cmd::recipe::run(&ctx, args),
        Command::List(args) => cmd::list::run(&ctx, args),
        Command::New(args) => cmd::new::run(&ctx, args),
        Command::Config(args) => cmd::config_cmd::run(&ctx, args),
        #[cfg(feature = "watch")]
        Command::Watch(args) => cmd::watch::run(&ctx, args),
    }
}

/// The collection has not been initialised; maps to exit code 409.
#[derive(Debug)]
pub struct NotInitialised(pub Utf8PathBuf);

impl std::fmt::Display for NotInitialised {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "'{}' is not an initialised collection (run `margin init`)",
            self.0
        )
    }
}

impl std::error::Error for NotInitialised {}

/// Input the run cannot recover from; maps to exit code 2.
#[derive(Debug)]
pub struct UnrecoverableInput(pub String);

impl std::fmt::Display for UnrecoverableInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for UnrecoverableInput {}

pub struct ColorContext {
    pub color_stderr: bool,
}

fn init_color(color: colorchoice_clap::Color) -> ColorContext {
    color.write_global();
    let color_stderr = anstream::AutoStream::choice(&std::io::stderr()) != ColorChoice::Never;

    ColorContext { color_stderr }
}

pub struct Context {
    pub base_path: Utf8PathBuf,
    pub config_path: Utf8PathBuf,
    pub config: Config,
    pub global_args: GlobalArgs,
    pub color: ColorContext,
    store: Arc<MemoryStore>,
    settings: Arc<SharedSettings>,
    importer: OnceCell<Arc<Importer>>,
}

#[tracing::instrument(level = "debug", skip_all)]
fn configure_context(args: GlobalArgs, color_ctx: ColorContext) -> Result<Context> {
    let base_path = args.path.clone().unwrap_or_else(|| Utf8PathBuf::from("."));
    if !base_path.is_dir() {
        bail!("base path is not a directory: '{base_path}'");
    }
    if !base_path.join(MARGIN_DIR).is_dir() {
        return Err(NotInitialised(base_path).into());
    }
    // canonical so graph keys, watcher paths and the slug map all agree
    let base_path = base_path
        .canonicalize_utf8()
        .with_context(|| format!("cannot canonicalise '{base_path}'"))?;

    let config_path = args
        .config_file
        .clone()
        .unwrap_or_else(|| config::config_file_path(&base_path));
    let mut config = Config::read(&config_path)?;
    config.override_with_args(&args);
    config
        .settings()
        .validate()
        .map_err(|e| UnrecoverableInput(format!("invalid configuration: {e}")))?;

    let settings = Arc::new(SharedSettings::new(config.settings()));
    Ok(Context {
        base_path,
        config_path,
        config,
        global_args: args,
        color: color_ctx,
        store: Arc::new(MemoryStore::new()),
        settings,
        importer: OnceCell::new(),
    })
}

impl Context {
    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn shared_settings(&self) -> &Arc<SharedSettings> {
        &self.settings
    }

    pub fn importer(&self) -> &Arc<Importer> {
        self.importer
            .get_or_init(|| Arc::new(Importer::new(self.store.clone(), self.settings.clone())))
    }
}
