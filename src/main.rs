//! CLI Driver - run an external executable through the typed interface.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::oneshot;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli_driver::config::{ConfigLoader, DriverConfig, EnvPolicy};
use cli_driver::display;
use cli_driver::process::StreamKind;
use cli_driver::{Command, Handlers, Interface, TerminationReason};

#[derive(Parser)]
#[command(
    name = "cli-driver",
    about = "Drive an external executable and stream its output",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Config file (defaults to ./.cli-driver.toml, then the user config dir).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command through the driven executable.
    Run {
        /// Executable to drive (overrides the config file).
        #[arg(short, long)]
        executable: Option<PathBuf>,
        /// Working directory for the process.
        #[arg(long)]
        cwd: Option<PathBuf>,
        /// Environment override as KEY=VALUE (repeatable).
        #[arg(short = 'E', long = "env", value_parser = parse_env_pair)]
        env: Vec<(String, String)>,
        /// Start from an empty environment instead of inheriting.
        #[arg(long)]
        replace_env: bool,
        /// Run with elevated privileges.
        #[arg(long)]
        elevate: bool,
        /// Terminate the process after this many seconds.
        #[arg(long)]
        timeout: Option<u64>,
        /// Do not echo output live; print the decoded response at the end.
        #[arg(short, long)]
        quiet: bool,
        /// Do not truncate stderr summaries.
        #[arg(long)]
        raw: bool,
        /// Base command followed by its arguments.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Print the effective configuration as TOML.
    Config,
}

struct RunArgs {
    timeout: Option<u64>,
    elevate: bool,
    quiet: bool,
    raw: bool,
    command: Vec<String>,
}

fn parse_env_pair(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{s}'")),
    }
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

fn load_config(path: Option<PathBuf>) -> Option<DriverConfig> {
    let loader = path.map_or_else(ConfigLoader::new, ConfigLoader::with_path);
    match loader.load() {
        Ok(config) => Some(config),
        Err(e) => {
            display::print_error(&e.to_string());
            None
        }
    }
}

/// Map a finished run onto a shell-style exit code.
fn exit_code(status: i32, reason: TerminationReason) -> ExitCode {
    let code = match reason {
        TerminationReason::Exit => u8::try_from(status).unwrap_or(1),
        TerminationReason::UncaughtSignal => u8::try_from(128 + status.max(0)).unwrap_or(1),
    };
    ExitCode::from(code)
}

enum Interrupt {
    Timeout,
    CtrlC,
}

async fn run(mut interface: Interface, args: RunArgs) -> ExitCode {
    let (base, rest) = args
        .command
        .split_first()
        .map_or(("", &[][..]), |(base, rest)| (base.as_str(), rest));
    let command = Command::new(base)
        .args(rest.iter().cloned())
        .elevated(args.elevate);

    display::print_run_start(&display::format_command_line(
        &interface.command_line(&command),
    ));

    let (tx, mut rx) = oneshot::channel();
    let mut handlers = Handlers::new().on_completion(move |completion| {
        let _ = tx.send(completion);
    });
    if !args.quiet {
        handlers = handlers
            .on_output(|bytes| display::print_chunk(StreamKind::Stdout, bytes))
            .on_error(|bytes| display::print_chunk(StreamKind::Stderr, bytes));
    }

    if let Err(e) = interface.send(command, handlers).await {
        display::print_error(&e.to_string());
        return ExitCode::from(127);
    }

    let deadline = async {
        match args.timeout {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };

    let outcome = tokio::select! {
        result = &mut rx => Ok(result),
        () = deadline => Err(Interrupt::Timeout),
        _ = tokio::signal::ctrl_c() => Err(Interrupt::CtrlC),
    };

    let result = match outcome {
        Ok(result) => result,
        Err(interrupt) => {
            match interrupt {
                Interrupt::Timeout => tracing::warn!("timeout reached, terminating process"),
                Interrupt::CtrlC => tracing::warn!("interrupted, terminating process"),
            }
            interface.terminate_execution();
            rx.await
        }
    };

    let Ok(completion) = result else {
        interface.shutdown().await;
        display::print_error("process finished without reporting completion");
        return ExitCode::FAILURE;
    };

    if args.quiet {
        if let Some(ref text) = completion.response {
            display::print_chunk(StreamKind::Stdout, text.as_bytes());
        }
    }
    display::print_completion(&completion.exit, completion.error.as_ref(), args.raw);

    exit_code(completion.status(), completion.reason())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let Some(mut config) = load_config(cli.config) else {
        return ExitCode::from(2);
    };

    match cli.command {
        Commands::Config => match toml::to_string_pretty(&config) {
            Ok(text) => {
                print!("{text}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                display::print_error(&e.to_string());
                ExitCode::FAILURE
            }
        },
        Commands::Run {
            executable,
            cwd,
            env,
            replace_env,
            elevate,
            timeout,
            quiet,
            raw,
            command,
        } => {
            if executable.is_some() {
                config.executable = executable;
            }
            if cwd.is_some() {
                config.working_dir = cwd;
            }
            if replace_env {
                config.env_policy = EnvPolicy::Replace;
            }
            config.env.extend(env);

            let interface = match Interface::from_config(&config) {
                Ok(interface) => interface,
                Err(e) => {
                    display::print_error(&e.to_string());
                    return ExitCode::from(2);
                }
            };

            tracing::info!(
                executable = %interface.executable().display(),
                elevate,
                "Starting run"
            );

            run(
                interface,
                RunArgs {
                    timeout,
                    elevate,
                    quiet,
                    raw,
                    command,
                },
            )
            .await
        }
    }
}
