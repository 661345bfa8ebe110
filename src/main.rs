//! Binary entry point for the `vmherd` CLI.

use std::io::{self, Write};
use std::process;

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, fmt};

use vmherd::vcloud::VcloudApiError;
use vmherd::{
    ConfigError, LiveProvisioners, SettingsError, Shepherd, ShepherdError, ShepherdSettings,
    ToolConfig,
};

mod cli;

use cli::{Cli, Verb};

#[derive(Debug, Error)]
enum CliError {
    #[error("invalid log filter '{filter}': {message}")]
    Logging { filter: String, message: String },
    #[error("failed to install log subscriber: {0}")]
    Subscriber(#[from] TryInitError),
    #[error("settings error: {0}")]
    Settings(#[from] SettingsError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("backend error: {0}")]
    Backend(#[from] VcloudApiError),
    #[error(transparent)]
    Shepherd(#[from] ShepherdError),
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    let exit_code = match run(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

/// Builds the log filter: `RUST_LOG` wins, otherwise `--log-level`.
fn log_filter(level: &str) -> Result<EnvFilter, CliError> {
    EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(level).map_err(|err| CliError::Logging {
            filter: level.to_owned(),
            message: err.to_string(),
        })
    })
}

fn init_logging(level: &str, json: bool) -> Result<(), CliError> {
    let filter = log_filter(level)?;
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(io::stderr))
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(io::stderr))
            .try_init()?;
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<(), CliError> {
    init_logging(&cli.log_level, cli.log_json)?;

    let (settings_path, artifacts) = match &cli.command {
        Verb::Deploy(command) => (
            command.settings.config.as_str(),
            command.paths.iter().map(Utf8PathBuf::from).collect(),
        ),
        Verb::Destroy(arg) | Verb::CleanEnvironment(arg) | Verb::PrepareEnvironment(arg) => {
            (arg.config.as_str(), Vec::new())
        }
    };

    let settings = ShepherdSettings::from_path(Utf8Path::new(settings_path))?;
    info!(settings = settings_path, entries = settings.len(), "loaded settings");
    let factory = LiveProvisioners::new(ToolConfig::load_without_cli_args()?)?;
    let shepherd = Shepherd::new(settings, factory);

    match cli.command {
        Verb::Deploy(_) => shepherd.deploy(&artifacts).await?,
        Verb::Destroy(_) => shepherd.destroy().await?,
        Verb::CleanEnvironment(_) => shepherd.clean_environment().await?,
        Verb::PrepareEnvironment(_) => shepherd.prepare_environment().await?,
    }
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
