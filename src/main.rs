//! `lab-instruments` diagnostic CLI.
//!
//! ```text
//! lab-instruments list                      # every VISA resource with its *IDN?
//! lab-instruments identify GPIB0::1::INSTR  # one resource
//! lab-instruments identify                  # every enabled configured instrument
//! lab-instruments config                    # print the resolved configuration
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lab_instruments::config::{LabConfig, DEFAULT_CONFIG_PATH};
use lab_instruments::discovery::{
    identify_configured, identify_resources, list_connected_instruments,
};
use lab_instruments::transport::VisaResourceManager;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "lab-instruments", version, about = "Bench instrument diagnostics")]
struct Cli {
    /// Configuration file
    #[arg(long, short, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List connected resources and their identity strings
    List,
    /// Query *IDN? of one resource, or of every enabled configured instrument
    Identify {
        resource: Option<String>,
    },
    /// Print the resolved configuration as TOML
    Config,
}

fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = LabConfig::load_from(&cli.config).with_context(|| {
        format!(
            "Failed to load configuration from {}",
            cli.config.display()
        )
    })?;
    init_tracing(&config.log_level);

    let rm = VisaResourceManager::new(config.visa.clone());

    match cli.command {
        Command::List => {
            let found = list_connected_instruments(&rm)
                .await
                .context("Failed to enumerate VISA resources")?;
            if found.is_empty() {
                println!("No instruments found");
            }
            for instrument in &found {
                println!("{}", instrument.summary());
            }
        }
        Command::Identify {
            resource: Some(resource),
        } => {
            for instrument in identify_resources(&rm, [resource]).await {
                println!("{}", instrument.summary());
            }
        }
        Command::Identify { resource: None } => {
            let entries: Vec<_> = config
                .enabled_instruments()
                .into_iter()
                .cloned()
                .collect();
            if entries.is_empty() {
                println!("No instruments configured in {}", cli.config.display());
            }
            let found = identify_configured(&rm, &entries).await;
            for (entry, instrument) in entries.iter().zip(found) {
                println!("{:<12} {}", entry.id, instrument.summary());
            }
        }
        Command::Config => {
            let rendered =
                toml::to_string_pretty(&config).context("Failed to render configuration")?;
            print!("{}", rendered);
        }
    }

    Ok(())
}
