//! Engine Runner - supervise an engine process with save-gated restarts.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use engine_runner::config::{ConfigLoader, DebugProfile, LoadedConfig, RunnerConfig};
use engine_runner::display;
use engine_runner::runner::{Runner, RunnerError, RunStatus};
use engine_runner::save::{OperationKind, SaveOperation, SaveWatcher};

#[derive(Parser)]
#[command(
    name = "engine-runner",
    about = "Supervise an engine process with save-gated restarts",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Config file to use instead of the default search paths.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the engine and stream its output until it exits.
    Run {
        /// Profile name from the config file.
        #[arg(short, long)]
        profile: Option<String>,
        /// Startup instruction written to the startup file.
        #[arg(short, long, default_value = "")]
        instruction: String,
        /// Delay the launch until a simulated save finishes after MS milliseconds.
        #[arg(long, value_name = "MS")]
        after_save: Option<u64>,
        /// Make the simulated save fail, cancelling the launch.
        #[arg(long, requires = "after_save")]
        fail_save: bool,
        /// Print status changes and output as JSON lines.
        #[arg(long)]
        json: bool,
        /// Ad-hoc command to run instead of a profile.
        #[arg(last = true)]
        command: Vec<String>,
    },
    /// List configured profiles.
    Profiles,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Runner(#[from] RunnerError),
    #[error("Unknown profile: {0}")]
    UnknownProfile(String),
    #[error("No profile selected; pass --profile, set default_profile, or give a command after --")]
    NoProfile,
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn config_loader(path: Option<PathBuf>) -> ConfigLoader {
    path.map_or_else(ConfigLoader::new, ConfigLoader::with_path)
}

fn resolve_profile(
    config: &RunnerConfig,
    name: Option<&str>,
    command: Vec<String>,
) -> Result<DebugProfile, CliError> {
    let mut command = command.into_iter();
    if let Some(executable) = command.next() {
        return Ok(DebugProfile::new(executable).args(command));
    }

    match config.profile(name) {
        Some((name, profile)) => {
            tracing::info!(profile = name, "Using profile");
            Ok(profile.clone())
        }
        None => match name {
            Some(name) => Err(CliError::UnknownProfile(name.to_string())),
            None => Err(CliError::NoProfile),
        },
    }
}

struct RunArgs {
    profile: Option<String>,
    instruction: String,
    after_save: Option<u64>,
    fail_save: bool,
    json: bool,
    command: Vec<String>,
}

fn report(status: &RunStatus, json: bool) {
    if json {
        display::print_status_json(status);
    } else {
        display::print_state_change(status);
    }
}

fn report_output(text: &str, json: bool) {
    if json {
        println!("{}", serde_json::json!({ "output": text }));
    } else {
        display::print_output(text);
    }
}

async fn run(config: RunnerConfig, args: RunArgs) -> Result<RunStatus, CliError> {
    let profile = resolve_profile(&config, args.profile.as_deref(), args.command)?;

    let runner = Runner::spawn(config.runner.clone());
    runner.configure(profile, args.instruction).await?;

    let mut states = runner.subscribe();
    let mut output = runner.subscribe_output();

    if let Some(delay_ms) = args.after_save {
        runner.start(true).await?;

        let operation = SaveOperation::new(OperationKind::Save);
        let watcher = SaveWatcher::attach(&runner, &operation);
        let fail = args.fail_save;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            operation.complete(fail);
        });
        let json = args.json;
        tokio::spawn(async move {
            let outcome = watcher.finished().await;
            if json {
                tracing::info!(?outcome, "Save watcher finished");
            } else {
                display::print_watch_outcome(&outcome);
            }
        });
    } else {
        runner.start(false).await?;
    }

    let initial = states.borrow_and_update().clone();
    report(&initial, args.json);

    // a launch failure or a very short run may already be over here
    let mut active = initial.running;
    let mut interrupted = false;
    while active {
        tokio::select! {
            biased;

            chunk = output.recv() => match chunk {
                Ok(text) => report_output(&text, args.json),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Output display fell behind");
                }
                Err(RecvError::Closed) => active = false,
            },
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = states.borrow_and_update().clone();
                report(&status, args.json);
                active = status.running;
            }
            result = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                if let Err(e) = result {
                    tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
                }
                tracing::info!("Interrupted, stopping engine");
                runner.stop().await?;
            }
        }
    }

    while let Ok(text) = output.try_recv() {
        report_output(&text, args.json);
    }

    let status = runner.status();
    runner.shutdown().await;
    Ok(status)
}

fn list_profiles(loader: &ConfigLoader, loaded: &LoadedConfig) {
    display::print_config_source(loaded.source.as_deref(), loader.search_paths());
    let config = &loaded.config;
    if config.profiles.is_empty() {
        println!("No profiles configured");
        return;
    }
    for (name, profile) in &config.profiles {
        let is_default = config.default_profile.as_deref() == Some(name.as_str());
        display::print_profile(name, profile, is_default);
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let loader = config_loader(cli.config);
    let loaded = match loader.load_with_source() {
        Ok(loaded) => loaded,
        Err(e) => {
            display::print_error(&e.to_string());
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Commands::Run {
            profile,
            instruction,
            after_save,
            fail_save,
            json,
            command,
        } => {
            let args = RunArgs {
                profile,
                instruction,
                after_save,
                fail_save,
                json,
                command,
            };
            match run(loaded.config, args).await {
                Ok(status) if status.last_exit.as_ref().map_or(true, |e| e.is_success()) => {
                    ExitCode::SUCCESS
                }
                Ok(_) => ExitCode::FAILURE,
                Err(e) => {
                    display::print_error(&e.to_string());
                    ExitCode::FAILURE
                }
            }
        }
        Commands::Profiles => {
            list_profiles(&loader, &loaded);
            ExitCode::SUCCESS
        }
    }
}
