//! Main binary for the topolink agent daemon (topolinkd)

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use topolink_agent::{init_agent, AgentConfig, Result};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "topolinkd")]
#[command(about = "Topology-aware accelerator broker daemon")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    log_level: String,

    /// Socket directory override
    #[arg(long, value_name = "DIR")]
    socket_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the agent
    Start {
        /// Override configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Generate default configuration
    Config {
        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate configuration
    Validate {
        /// Configuration file to validate
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Start { ref config }) => {
            let config_path = config.clone().or(cli.config.clone());
            start_agent(config_path, &cli).await
        }
        Some(Commands::Config { output }) => generate_config(output).await,
        Some(Commands::Validate { config }) => validate_config(config).await,
        None => {
            // Default behavior: start the agent
            let config_path = cli.config.clone();
            start_agent(config_path, &cli).await
        }
    }
}

async fn start_agent(config_path: Option<PathBuf>, cli: &Cli) -> Result<()> {
    // Load configuration
    let mut config = if let Some(config_path) = config_path {
        info!("Loading configuration from: {}", config_path.display());
        AgentConfig::from_file(config_path)?
    } else {
        info!("Using default configuration");
        AgentConfig::default()
    };

    // Apply CLI overrides
    if !cli.log_level.is_empty() {
        config.logging.level = cli.log_level.clone();
    }

    if let Some(ref socket_dir) = cli.socket_dir {
        config.plugin.socket_dir = socket_dir.clone();
    }

    // Initialize and run the agent
    let mut agent = init_agent(&config).await?;

    if let Err(e) = agent.run().await {
        error!("Agent failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

async fn generate_config(output: Option<PathBuf>) -> Result<()> {
    let config = AgentConfig::default();

    if let Some(output_path) = output {
        config.to_file(&output_path)?;
        println!("Generated configuration file: {}", output_path.display());
    } else {
        let yaml = serde_yaml::to_string(&config).map_err(|e| {
            topolink_agent::AgentError::Config(format!("Failed to serialize config: {}", e))
        })?;
        println!("{}", yaml);
    }

    Ok(())
}

async fn validate_config(config_path: PathBuf) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());

    let config = AgentConfig::from_file(&config_path)?;
    config.validate()?;

    println!("Configuration is valid");
    println!("Agent name: {}", config.agent.name);
    println!("Resource name: {}", config.agent.resource_name);
    println!("Socket: {}", config.plugin.socket_path().display());
    println!("Registry socket: {}", config.plugin.registry_socket_path().display());
    println!("Strategy: {}", config.plugin.strategy);
    println!(
        "Inventory: {} backend, {} devices",
        config.inventory.backend, config.inventory.device_count
    );

    Ok(())
}
