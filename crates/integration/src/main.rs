//! audit-config: inspect and manage audit platform configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use integration::bootstrap::write_config_file;
use integration::{ensure_config_file, init_logging, initialize_audit_config, Application, BootstrapOptions};
use serde_json::Value;
use std::path::PathBuf;
use tracing::{info, warn};
use types::Environment;

#[derive(Parser, Debug)]
#[command(name = "audit-config", version, about = "Manage audit platform configuration")]
struct Cli {
    /// Target environment (defaults to AUDIT_ENV, then development)
    #[arg(long, global = true)]
    env: Option<Environment>,

    /// Configuration file (defaults to $AUDIT_CONFIG_DIR/audit-config.<env>.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write the default configuration for the environment
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Load and validate the stored configuration
    Validate,
    /// Print the stored configuration
    Show {
        /// Do not mask credentials and keys
        #[arg(long)]
        include_sensitive: bool,
        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },
    /// Print the value at a dotted path
    Get { path: String },
    /// Set the value at a dotted path; the value is parsed as JSON, else taken as a string
    Set {
        path: String,
        value: String,
        #[arg(long)]
        changed_by: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Serve the configuration and log changes until interrupted
    Watch,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    Json,
    Yaml,
}

#[tokio::main]
async fn main() -> Result<()> {
    let dotenv = dotenv::dotenv();
    let cli = Cli::parse();

    let default_level = if matches!(cli.command, Command::Watch) { "info" } else { "warn" };
    let log = init_logging(default_level)?;

    if let Err(e) = dotenv {
        if !e.to_string().contains("No such file or directory") {
            warn!("Could not load .env file: {}", e);
        }
    }

    let mut options = BootstrapOptions::from_env()?;
    options.environment = cli.env.or(options.environment);
    options.config_path = cli.config.clone();

    match cli.command {
        Command::Init { force } => {
            let environment = options.environment()?;
            let path = options.config_path(environment);
            let factory = config::ConfigFactory::new(options.overrides.clone());

            let written = if force {
                write_config_file(&path, environment, &factory).await?;
                true
            } else {
                ensure_config_file(&path, environment, &factory).await?
            };
            if !written {
                println!("{} already exists; use --force to overwrite", path.display());
                return Ok(());
            }

            // stamp the version and encrypt when secure storage applies
            options.hot_reload = Some(false);
            options.create_if_missing = false;
            initialize_audit_config(options).await?.shutdown().await?;
            println!("Wrote {} configuration to {}", environment, path.display());
        }
        Command::Validate => {
            let bootstrap = one_shot(options).await?;
            let report = bootstrap.manager.validate_current_config()?;
            println!("{}: {}", bootstrap.config_path.display(), report.summary());
            for warning in &report.warnings {
                println!("  warning {}: {}", warning.path, warning.message);
            }
            bootstrap.shutdown().await?;
        }
        Command::Show { include_sensitive, format } => {
            let bootstrap = one_shot(options).await?;
            let tree = bootstrap.manager.export_config(include_sensitive)?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&tree)?),
                OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&tree)?),
            }
            bootstrap.shutdown().await?;
        }
        Command::Get { path } => {
            let bootstrap = one_shot(options).await?;
            let value = bootstrap.manager.get_config_value(&path)?;
            println!("{}", serde_json::to_string_pretty(&value)?);
            bootstrap.shutdown().await?;
        }
        Command::Set {
            path,
            value,
            changed_by,
            reason,
        } => {
            let value = serde_json::from_str(&value).unwrap_or(Value::String(value));
            let bootstrap = one_shot(options).await?;
            let event = bootstrap
                .manager
                .update_config(&path, value, &changed_by, reason.as_deref())
                .await
                .with_context(|| format!("Failed to update {}", path))?;
            println!(
                "{}: {} -> {} ({})",
                event.path,
                event.previous_value,
                event.new_value,
                event.new_version.as_deref().unwrap_or("-")
            );
            bootstrap.shutdown().await?;
        }
        Command::Watch => {
            info!("Starting audit-config v{}", env!("CARGO_PKG_VERSION"));
            let bootstrap = initialize_audit_config(options).await?;

            let level = bootstrap.manager.get_config()?.logging.level.clone();
            if let Err(e) = log.set_level(&level) {
                warn!("Could not apply configured log level: {:#}", e);
            }

            Application::new(bootstrap, Some(&log)).run().await?;
        }
    }

    Ok(())
}

/// Bootstrap without the watcher for single commands
async fn one_shot(mut options: BootstrapOptions) -> Result<integration::AuditConfigBootstrap> {
    options.hot_reload = Some(false);
    options.create_if_missing = false;
    initialize_audit_config(options).await
}
