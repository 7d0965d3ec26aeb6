//! Campaign sync CLI
//!
//! Local execution entry point. For AWS Lambda, use `campaign-sync-lambda`.

use std::path::PathBuf;

use campaign_sync::{
    config::{self, DEFAULT_CONFIG_PATH},
    error::{AppError, Result},
    models::{CampaignInput, CampaignPatch, CardNeedle, SearchScope, StagePair},
    pipeline::{ChatEvent, Engine},
};
use clap::{Parser, Subcommand};
use serde::Serialize;

/// Campaign rule matching and CRM stage synchronization
#[derive(Parser, Debug)]
#[command(
    name = "campaign-sync",
    version,
    about = "Route chat leads between CRM stages and expire stale cards"
)]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the expiration sweep once
    Sweep,

    /// Manage campaigns
    #[command(subcommand)]
    Campaign(CampaignCommand),

    /// Look up a card in the CRM
    FindCard {
        #[arg(long)]
        username: Option<String>,

        #[arg(long)]
        full_name: Option<String>,

        #[arg(long)]
        pipeline: Option<String>,

        #[arg(long)]
        status: Option<String>,

        /// Search the whole CRM instead of one stage
        #[arg(long, conflicts_with_all = ["pipeline", "status"])]
        global: bool,
    },

    /// Move a card to a pipeline/status pair
    MoveCard {
        card_id: String,

        #[arg(long)]
        pipeline: String,

        #[arg(long)]
        status: String,
    },

    /// Route one chat event as the webhook would
    Route {
        #[arg(long)]
        username: String,

        #[arg(long)]
        text: String,

        #[arg(long)]
        full_name: Option<String>,
    },

    /// Validate configuration
    Validate,
}

#[derive(Subcommand, Debug)]
enum CampaignCommand {
    /// List campaigns in creation order
    List {
        /// Only live campaigns
        #[arg(long)]
        active: bool,
    },

    /// Show one campaign
    Get { id: String },

    /// Create a campaign from a JSON file
    Create {
        #[arg(long)]
        file: PathBuf,
    },

    /// Merge a JSON patch into a campaign
    Update {
        id: String,

        #[arg(long)]
        file: PathBuf,
    },

    /// Delete a campaign and its counters
    Delete { id: String },

    /// Check a campaign JSON for trigger conflicts without saving
    Check {
        #[arg(long)]
        file: PathBuf,

        /// Campaign id to leave out of the comparison
        #[arg(long)]
        exclude: Option<String>,
    },
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool, default_level: &str) {
    let level = if verbose { "debug" } else { default_level };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // The level lives in the config, so peek at it before logging starts.
    let level = campaign_sync::models::Config::load(&cli.config)
        .map(|c| c.logging.level)
        .unwrap_or_else(|_| "info".to_string());
    init_logging(cli.verbose, &level);

    let config = match config::load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            log::error!("Config validation failed: {}", e);
            return Err(e);
        }
    };

    if let Command::Validate = cli.command {
        log::info!("✓ Config OK ({})", cli.config.display());
        return Ok(());
    }

    let engine = Engine::new(&config, config::open_store(&config))?;
    let result = run(&engine, &config, cli.command).await;
    if let Err(e) = &result {
        log::error!("{} [{}]", e, e.code());
    }
    result
}

async fn run(
    engine: &Engine,
    config: &campaign_sync::models::Config,
    command: Command,
) -> Result<()> {
    match command {
        Command::Sweep => {
            let report = engine.sweep.run().await;
            print_json(&report)?;
        }

        Command::Campaign(command) => campaign(engine, command).await?,

        Command::FindCard {
            username,
            full_name,
            pipeline,
            status,
            global,
        } => {
            let needle = CardNeedle::new(username.as_deref(), full_name.as_deref());
            let scope = if global {
                SearchScope::global()
            } else {
                SearchScope {
                    pipeline_id: pipeline,
                    status_id: status,
                    ..SearchScope::default()
                }
            };
            let options = config.locator.search_options();
            match engine.locator.find(&needle, &scope, &options).await? {
                Some(card) => print_json(&card)?,
                None => log::info!("No matching card within {} page(s)", options.max_pages),
            }
        }

        Command::MoveCard {
            card_id,
            pipeline,
            status,
        } => {
            let outcome = engine
                .mover
                .move_card(&card_id, &StagePair::new(pipeline, status))
                .await?;
            log::info!("Move result: {:?}", outcome);
        }

        Command::Route {
            username,
            text,
            full_name,
        } => {
            let event = ChatEvent {
                username: Some(username),
                text: Some(text),
                full_name,
            };
            let outcome = engine.router.handle(&event).await?;
            print_json(&outcome)?;
        }

        Command::Validate => {}
    }
    Ok(())
}

async fn campaign(engine: &Engine, command: CampaignCommand) -> Result<()> {
    let registry = &engine.registry;
    match command {
        CampaignCommand::List { active } => {
            let campaigns = registry.list(active).await?;
            log::info!("{} campaign(s)", campaigns.len());
            print_json(&campaigns)?;
        }

        CampaignCommand::Get { id } => match registry.get(&id).await? {
            Some(campaign) => print_json(&campaign)?,
            None => return Err(AppError::CampaignNotFound(id)),
        },

        CampaignCommand::Create { file } => {
            let input: CampaignInput = config::load_json(&file)?;
            let campaign = registry.create(input).await?;
            print_json(&campaign)?;
        }

        CampaignCommand::Update { id, file } => {
            let patch: CampaignPatch = config::load_json(&file)?;
            let campaign = registry.update(&id, patch).await?;
            print_json(&campaign)?;
        }

        CampaignCommand::Delete { id } => {
            if !registry.delete(&id).await? {
                return Err(AppError::CampaignNotFound(id));
            }
            log::info!("Deleted campaign {}", id);
        }

        CampaignCommand::Check { file, exclude } => {
            let input: CampaignInput = config::load_json(&file)?;
            let id = exclude.clone().unwrap_or_else(|| "candidate".into());
            let candidate = input.into_campaign(id, chrono::Utc::now());
            let outcome = registry.validate(&candidate, exclude.as_deref()).await?;
            print_json(&outcome)?;
            if !outcome.ok {
                return Err(AppError::validation(format!(
                    "{} conflicting trigger value(s)",
                    outcome.conflicts.len()
                )));
            }
        }
    }
    Ok(())
}

