use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use wh_cli::client::DaemonClient;
use wh_cli::commands::submit::SubmitArgs;
use wh_cli::commands::{close_all, report, sessions, status, submit};
use wh_cli::{Cli, Commands, Config, SessionsAction, daemon};

fn load_config(config_path: Option<&Path>) -> Result<Config> {
    let config = Config::load_from(config_path).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");
    Ok(config)
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    let Some(command) = cli.command else {
        use clap::CommandFactory;
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let config = load_config(cli.config.as_deref())?;

    match command {
        Commands::Daemon => runtime()?.block_on(daemon::run(&config))?,
        Commands::Report {
            date,
            week,
            month,
            json,
        } => {
            let today = date.unwrap_or_else(|| chrono::Utc::now().date_naive());
            let period = if month {
                report::Period::Month(today)
            } else if week {
                report::Period::Week(today)
            } else {
                report::Period::Day(today)
            };
            if let Some(parent) = config.database_path.parent() {
                std::fs::create_dir_all(parent).context("failed to create database directory")?;
            }
            report::run(&config.database_path, period, json)?;
        }
        Commands::Status => {
            let client = DaemonClient::new(config.daemon_url())?;
            runtime()?.block_on(status::run(&client))?;
        }
        Commands::Sessions(action) => {
            let client = DaemonClient::new(config.daemon_url())?;
            let rt = runtime()?;
            match action {
                SessionsAction::Active { json } => rt.block_on(sessions::active(&client, json))?,
                SessionsAction::Pending { json } => {
                    rt.block_on(sessions::pending(&client, json))?;
                }
                SessionsAction::Blocks { session_id, json } => {
                    rt.block_on(sessions::blocks(&client, &session_id, json))?;
                }
            }
        }
        Commands::CloseAll { json } => {
            let client = DaemonClient::new(config.daemon_url())?;
            runtime()?.block_on(close_all::run(&client, json))?;
        }
        Commands::Submit {
            project,
            path,
            activity_type,
            source,
            command,
            description,
        } => {
            let client = DaemonClient::new(config.daemon_url())?;
            let args = SubmitArgs {
                project,
                path,
                activity_type,
                source,
                command,
                description,
            };
            runtime()?.block_on(submit::run(&client, args))?;
        }
    }

    Ok(())
}
