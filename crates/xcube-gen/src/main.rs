//! xcube-gen
//!
//! Generates a data cube from a request file.

use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};
use xcube_core::progress::{ProgressContext, ProgressObserverRegistry, ThreadedProgressObserver};
use xcube_core::store::DataStoreRegistry;
use xcube_core::XcubeError;

use xcube_gen::storeconfig::load_store_configs;
use xcube_gen::{
    generate_cube, ApiProgressCallbackObserver, GenConfig, StorePool,
    TerminalProgressCallbackObserver,
};

/// xcube cube generator
#[derive(Parser, Debug)]
#[command(name = "xcube-gen")]
#[command(about = "Generate a data cube from a YAML or JSON request")]
struct Args {
    /// Generation request file
    request: PathBuf,

    /// Named data store instances referenced as `@name`
    #[arg(long, env = "XCUBE_STORE_CONFIGS")]
    stores: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, env = "XCUBE_LOG_JSON")]
    log_json: bool,

    /// Seconds between two progress reports
    #[arg(long, default_value_t = 1.0, env = "XCUBE_PROGRESS_DT")]
    progress_dt: f64,

    /// Do not print progress to the terminal
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> ExitCode {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_tracing(&args);

    match run(&args) {
        Ok(data_id) => {
            info!(data_id = %data_id, "Cube generation finished");
            println!("{}", data_id);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Cube generation failed: {:#}", e);
            let code = e
                .downcast_ref::<XcubeError>()
                .map_or(1, XcubeError::exit_code);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

fn init_tracing(args: &Args) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    // Progress lines go to stdout, logs to stderr.
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr);

    if args.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn run(args: &Args) -> anyhow::Result<String> {
    let config = GenConfig::from_file(&args.request)
        .with_context(|| format!("Failed to load request {}", args.request.display()))?;

    let pool = match &args.stores {
        Some(path) => {
            let configs = load_store_configs(path)?;
            StorePool::from_configs(DataStoreRegistry::with_defaults(), &configs)?
        }
        None => StorePool::default(),
    };

    let registry = Arc::new(ProgressObserverRegistry::new());
    let mut observers = Vec::new();

    if !args.quiet {
        // Plain lines when stdout is redirected.
        let display = if io::stdout().is_terminal() {
            TerminalProgressCallbackObserver::new()
        } else {
            TerminalProgressCallbackObserver::with_sink(io::stdout())
        };
        let terminal = ThreadedProgressObserver::new(
            Arc::new(display),
            0.0,
            args.progress_dt,
        )?;
        terminal.activate(&registry)?;
        observers.push(terminal);
    }

    if let Some(callback_config) = &config.callback_config {
        let api = ThreadedProgressObserver::new(
            Arc::new(ApiProgressCallbackObserver::new(callback_config)?),
            0.0,
            args.progress_dt,
        )?;
        api.activate(&registry)?;
        observers.push(api);
        info!("Reporting progress to the job API");
    }

    let context = ProgressContext::new(registry);
    let result = generate_cube(&context, &pool, &config);

    let mut deactivated = Ok(());
    for observer in &observers {
        if let Err(e) = observer.deactivate() {
            error!(error = %e, "Progress observer failed");
            deactivated = deactivated.and(Err(e));
        }
    }

    let data_id = result?;
    deactivated?;
    Ok(data_id)
}
