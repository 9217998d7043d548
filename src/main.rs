use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

mod cli;

use cli::Cli;
use cli::commands::Commands;
use cli::run::RunOptions;
use prochost::config::Config;
use prochost::service::ServiceDirectory;

fn setup_logging(verbose: bool) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("prochost")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("prochost.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        None => handle_run_command(RunOptions {
            hosts: 1,
            duration: None,
            fake: false,
            warm_spare: true,
        }, config),
        Some(Commands::Run {
            hosts,
            duration,
            fake,
            no_spare,
        }) => handle_run_command(
            RunOptions {
                hosts: *hosts,
                duration: duration.map(Duration::from_secs),
                fake: *fake,
                warm_spare: !*no_spare,
            },
            config,
        ),
        Some(Commands::Config) => handle_config_command(config),
        Some(Commands::Services) => handle_services_command(config),
    }
}

fn handle_run_command(options: RunOptions, config: &Config) -> Result<()> {
    println!(
        "{} {} host(s){}",
        "Starting".cyan(),
        options.hosts,
        if options.fake { " with in-memory workers" } else { "" }
    );
    cli::run::run(config, options)
}

fn handle_config_command(config: &Config) -> Result<()> {
    let yaml = serde_yaml::to_string(config).context("Failed to serialize config")?;
    println!("{}", "Effective configuration:".bold());
    println!("{}", yaml);
    Ok(())
}

fn handle_services_command(config: &Config) -> Result<()> {
    let directory = ServiceDirectory::from_config(&config.services).context("Invalid service configuration")?;
    if directory.is_empty() {
        println!("{}", "No services configured".dimmed());
        return Ok(());
    }
    println!("{}", format!("{} service(s):", directory.len()).bold());
    for entry in directory.entries() {
        let startup = if entry.startup { "startup".green() } else { "on demand".dimmed() };
        println!(
            "  {:<24} {:<16} {:<28} {}",
            entry.name.cyan(),
            entry.policy.to_string(),
            entry.display_name,
            startup
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Setup logging first
    setup_logging(cli.is_verbose()).context("Failed to setup logging")?;

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).context("Application failed")?;

    Ok(())
}
