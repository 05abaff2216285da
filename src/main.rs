use buildrelay::commands::run::{
    check_command, collect_ambient, failure_exit_code, load_config, run_command, ConfigSource,
};
use buildrelay::pipeline::report::EXIT_CONFIG_ERROR;
use buildrelay::telemetry::init_tracing;
use clap::Parser;
use colored::Colorize;
use std::env;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::Level;

#[derive(Parser)]
#[command(name = "buildrelay")]
#[command(about = "Sync a repository, build it, and report the outcome", long_about = None)]
struct Cli {
    /// Run configuration file (TOML)
    #[arg(long, short, conflicts_with = "inline", required_unless_present = "inline")]
    config: Option<PathBuf>,

    /// Run configuration as an inline TOML string
    #[arg(long)]
    inline: Option<String>,

    /// Validate and print the configuration without running anything
    #[arg(long)]
    check: bool,

    /// Build even when the sync brought no new commits
    #[arg(long)]
    force: bool,

    /// Write the final run report as JSON to this path
    #[arg(long)]
    report: Option<PathBuf>,

    /// Default log level when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: Level,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.json_logs, cli.log_level);

    let source = match (cli.config, cli.inline) {
        (Some(path), _) => ConfigSource::File(path),
        (None, Some(raw)) => ConfigSource::Inline(raw),
        (None, None) => {
            eprintln!("{} one of --config or --inline is required", "error:".red());
            return ExitCode::from(EXIT_CONFIG_ERROR as u8);
        }
    };

    let cwd = match env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("{} cannot read current directory: {}", "error:".red(), e);
            return ExitCode::from(EXIT_CONFIG_ERROR as u8);
        }
    };
    let ambient_env = collect_ambient(env::vars_os());

    let mut config = match load_config(&source, &cwd, ambient_env.clone()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red(), e);
            return ExitCode::from(failure_exit_code(&e) as u8);
        }
    };

    if cli.force {
        config.build.skip_unchanged = false;
    }

    if cli.check {
        return match check_command(&config) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("{} {:#}", "error:".red(), e);
                ExitCode::from(EXIT_CONFIG_ERROR as u8)
            }
        };
    }

    let show_progress = std::io::stderr().is_terminal();
    match run_command(&config, &ambient_env, cli.report.as_deref(), show_progress).await {
        Ok(code) => ExitCode::from(code as u8),
        Err(e) => {
            eprintln!("{} {:#}", "error:".red(), e);
            ExitCode::from(failure_exit_code(&e) as u8)
        }
    }
}
