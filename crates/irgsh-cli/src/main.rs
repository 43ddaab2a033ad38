//! irgsh operator CLI.

use clap::{Parser, Subcommand};
use irgsh_core::fleet::{InstanceStatus, InstanceType};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use url::Url;

mod commands;

const DEFAULT_CONFIG_PATH: &str = "/etc/irgsh/config.kdl";

#[derive(Parser)]
#[command(name = "irgsh")]
#[command(about = "irgsh package pipeline CLI", long_about = None)]
struct Cli {
    /// Chief API URL
    #[arg(long, env = "IRGSH_API_URL", default_value = "http://localhost:8080")]
    api_url: Url,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the state of a pipeline
    Status {
        /// Pipeline id
        uuid: String,
    },
    /// Run a recorded pipeline again under a new id
    Retry {
        /// Pipeline id
        uuid: String,
    },
    /// List recent pipelines
    Jobs {
        /// Maximum number of jobs to show
        #[arg(long, default_value = "50")]
        limit: usize,
        /// List ISO builds instead of package pipelines
        #[arg(long)]
        iso: bool,
    },
    /// List worker instances, or show one
    Instances {
        /// Instance id
        id: Option<String>,
        /// Only instances of this type
        #[arg(long = "type")]
        instance_type: Option<InstanceType>,
        /// Only instances with this status
        #[arg(long)]
        status: Option<InstanceStatus>,
    },
    /// Queue a standalone ISO build
    BuildIso {
        /// Repository holding the ISO recipe
        #[arg(long)]
        repo_url: Option<String>,
        /// Branch of the recipe repository
        #[arg(long)]
        branch: Option<String>,
    },
    /// Report a worker to the fleet registry until interrupted
    Heartbeat {
        /// System configuration
        #[arg(long, env = "IRGSH_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
        /// Kind of worker being reported
        #[arg(long = "type")]
        instance_type: InstanceType,
        /// Worker directory whose disk usage is reported
        #[arg(long)]
        workdir: PathBuf,
        /// Tasks the worker runs in parallel
        #[arg(long, default_value = "1")]
        concurrency: u32,
        /// Override the reported hostname
        #[arg(long)]
        hostname: Option<String>,
    },
    /// Remove stale fleet entries once
    Janitor {
        /// System configuration
        #[arg(long, env = "IRGSH_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
    /// Validate a system configuration
    Validate {
        /// Path to the configuration file
        #[arg(default_value = DEFAULT_CONFIG_PATH)]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let api = commands::ApiClient::new(cli.api_url);

    match cli.command {
        Commands::Status { uuid } => {
            commands::pipelines::status(&api, &uuid).await?;
        }
        Commands::Retry { uuid } => {
            commands::pipelines::retry(&api, &uuid).await?;
        }
        Commands::Jobs { limit, iso } => {
            if iso {
                commands::pipelines::iso_jobs(&api, limit).await?;
            } else {
                commands::pipelines::jobs(&api, limit).await?;
            }
        }
        Commands::Instances {
            id,
            instance_type,
            status,
        } => match id {
            Some(id) => commands::fleet::instance(&api, &id).await?,
            None => commands::fleet::instances(&api, instance_type, status).await?,
        },
        Commands::BuildIso { repo_url, branch } => {
            commands::pipelines::build_iso(&api, repo_url, branch).await?;
        }
        Commands::Heartbeat {
            config,
            instance_type,
            workdir,
            concurrency,
            hostname,
        } => {
            commands::fleet::heartbeat(&config, instance_type, workdir, concurrency, hostname)
                .await?;
        }
        Commands::Janitor { config } => {
            commands::fleet::janitor(&config).await?;
        }
        Commands::Validate { path } => {
            commands::validate(&path)?;
        }
    }

    Ok(())
}
