use std::fs;
use std::net::SocketAddr;
use std::path::Path;

use clap::{CommandFactory, FromArgMatches};
use colored::Colorize;
use eyre::{Context, Result};
use tracing::{debug, info};

use funcbridge::cli::{Cli, Command, generate_after_help, get_log_path};
use funcbridge::config::Config;
use funcbridge::domain::{FunctionsConfiguration, TaskResult};
use funcbridge::http::WorkerClient;
use funcbridge::registry::Registry;

/// Setup logging to file
fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level).map(str::to_uppercase).as_deref() {
        Some("TRACE") => tracing::Level::TRACE,
        Some("DEBUG") => tracing::Level::DEBUG,
        Some("INFO") | None => tracing::Level::INFO,
        Some("WARN") | Some("WARNING") => tracing::Level::WARN,
        Some("ERROR") => tracing::Level::ERROR,
        Some(other) => {
            eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", other);
            tracing::Level::INFO
        }
    };

    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cmd = Cli::command().after_help(generate_after_help());
    let cli = Cli::from_arg_matches(&cmd.get_matches())?;

    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Serve { bind } => cmd_serve(&config, bind).await,
        Command::Poll {
            component,
            state_machine,
            url,
        } => cmd_poll(&url, &component, &state_machine).await,
        Command::Resolve { file, url } => cmd_resolve(&url, &file).await,
        Command::SetTimeout { ms, url } => cmd_set_timeout(&url, ms).await,
        Command::Resources { url } => cmd_resources(&url).await,
    }
}

/// Host the configured managers until ctrl-c
async fn cmd_serve(config: &Config, bind: Option<SocketAddr>) -> Result<()> {
    debug!(?bind, "cmd_serve: called");
    if config.managers.is_empty() {
        return Err(eyre::eyre!(
            "No managers configured. Add a `managers` section to the config file."
        ));
    }

    let default_bind = bind.unwrap_or(config.server.bind);
    let registry = Registry::global();

    registry.set_configuration(config.functions.to_configuration())?;
    for resource in &config.string_resources {
        registry.add_key_value(&resource.component, &resource.key, &resource.value);
    }

    for manager in &config.managers {
        let addr = manager.bind.unwrap_or(default_bind);
        registry
            .create_manager(&manager.component, &manager.state_machine, Some(addr))
            .await
            .context(format!("Failed to host {}/{}", manager.component, manager.state_machine))?;
        println!(
            "{} {}/{} on http://{}",
            "Serving".green().bold(),
            manager.component,
            manager.state_machine,
            addr
        );
    }

    info!(managers = registry.len(), "funcbridge serving");
    tokio::signal::ctrl_c().await.context("Failed to listen for ctrl-c")?;

    println!("{}", "Shutting down...".yellow());
    registry.shutdown().await;
    Ok(())
}

/// Fetch one task and print it
async fn cmd_poll(url: &str, component: &str, state_machine: &str) -> Result<()> {
    debug!(%url, %component, %state_machine, "cmd_poll: called");
    let client = WorkerClient::new(url)?;

    match client.fetch_task(component, state_machine).await? {
        Some(task) => println!("{}", serde_json::to_string_pretty(&task)?),
        None => println!("{}", "No task available".dimmed()),
    }
    Ok(())
}

/// Post a result file
async fn cmd_resolve(url: &str, file: &Path) -> Result<()> {
    debug!(%url, file = %file.display(), "cmd_resolve: called");
    let content = fs::read_to_string(file).context(format!("Failed to read {}", file.display()))?;
    let result: TaskResult = serde_json::from_str(&content).context("Failed to parse function result")?;

    WorkerClient::new(url)?.post_result(&result).await?;
    println!("{} {}", "Resolved".green().bold(), result.correlation_id);
    Ok(())
}

/// Replace the timeout configuration
async fn cmd_set_timeout(url: &str, ms: Option<i64>) -> Result<()> {
    debug!(%url, ?ms, "cmd_set_timeout: called");
    let configuration = FunctionsConfiguration { timeout_in_millis: ms };

    WorkerClient::new(url)?.post_configuration(&configuration).await?;
    match ms {
        Some(ms) => println!("{} {} ms", "Timeout set to".green(), ms),
        None => println!("{}", "Timeout removed".green()),
    }
    Ok(())
}

/// Print string resources
async fn cmd_resources(url: &str) -> Result<()> {
    debug!(%url, "cmd_resources: called");
    let resources = WorkerClient::new(url)?.string_resources().await?;

    if resources.is_empty() {
        println!("{}", "No string resources".dimmed());
        return Ok(());
    }
    for resource in resources {
        println!(
            "{:<24} {:<24} {}",
            resource.component_name.cyan(),
            resource.key.bold(),
            resource.value
        );
    }
    Ok(())
}
