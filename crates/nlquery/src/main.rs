//! # nlquery CLI (`nlq`)
//!
//! The `nlq` binary drives the classification pipeline from the command
//! line. All commands accept a `--config` flag pointing to a TOML
//! configuration file; see `config/nlq.example.toml`.
//!
//! | Command | Description |
//! |---------|-------------|
//! | `nlq classify "<text>"` | Run the pipeline and print the outcome |
//! | `nlq catalog validate` | Load and validate the intent catalog |
//! | `nlq catalog show` | List intents, risk tiers, and templates |
//! | `nlq schema show` | Print the configured schema metadata |
//!
//! ## Examples
//!
//! ```bash
//! nlq classify "list all tables"
//! nlq classify "drop table staging.payments" --confirm
//! nlq classify "how many rows in orders" --json
//! nlq catalog validate
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use nlquery::config::load_config;
use nlquery::pipeline::{Outcome, Pipeline};
use nlquery_core::dsl::Resolution;
use nlquery_core::render::ExecutorPayload;
use nlquery_core::risk;

/// nlquery — classify natural-language database-administration requests
/// into validated, risk-gated, parameterized SQL.
#[derive(Parser)]
#[command(
    name = "nlq",
    about = "Classify natural-language database-administration requests into risk-gated SQL",
    version,
    long_about = "nlquery converts free-text requests into one of a fixed set of catalog-defined \
    intents via deterministic rules, semantic similarity, and an optional guarded completion \
    fallback; validates arguments against schema metadata; applies a risk/confirmation policy; \
    and renders a parameterized SQL statement for an external executor."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/nlq.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify one request and print the outcome.
    Classify {
        /// The natural-language request.
        text: String,

        /// Confirm execution of medium/high-risk statements.
        #[arg(long)]
        confirm: bool,

        /// Print the full outcome as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Inspect or validate the intent catalog.
    Catalog {
        #[command(subcommand)]
        command: CatalogCommands,
    },

    /// Inspect the configured schema metadata.
    Schema {
        #[command(subcommand)]
        command: SchemaCommands,
    },
}

#[derive(Subcommand)]
enum CatalogCommands {
    /// Load and validate the catalog; reports rule overlaps and bad patterns.
    Validate,
    /// List intents with risk tiers and template summaries.
    Show,
}

#[derive(Subcommand)]
enum SchemaCommands {
    /// Print tables and columns the slot filler validates against.
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Classify {
            text,
            confirm,
            json,
        } => {
            let pipeline = Pipeline::from_config(&config).await?;
            let outcome = pipeline.classify(&text, confirm).await?;
            print_outcome(&text, outcome, confirm, json)?;
        }
        Commands::Catalog { command } => match command {
            CatalogCommands::Validate => {
                let pipeline = Pipeline::from_config(&config).await?;
                let bundle = pipeline.snapshot();
                println!(
                    "Catalog OK: {} intents, {} rules, {} exemplars indexed",
                    bundle.catalog.intents().len(),
                    bundle.catalog.rules().len(),
                    bundle.index.len()
                );
            }
            CatalogCommands::Show => {
                let pipeline = Pipeline::from_config(&config).await?;
                let bundle = pipeline.snapshot();
                for def in bundle.catalog.intents() {
                    println!("{:<16} {:<7} {}", def.label, def.risk.to_string(), def.description);
                    println!("{:<16} {:<7} └─ {}", "", "", def.template);
                }
            }
        },
        Commands::Schema { command } => match command {
            SchemaCommands::Show => {
                if config.schema.tables.is_empty() {
                    println!("No schema metadata configured.");
                }
                for (table, columns) in &config.schema.tables {
                    println!("{}", table);
                    for (column, ty) in columns {
                        println!("  {:<24} {}", column, ty);
                    }
                }
            }
        },
    }

    Ok(())
}

fn print_outcome(input: &str, outcome: Outcome, confirmed: bool, json: bool) -> Result<()> {
    if json {
        let payload = serde_json::json!({
            "input": input,
            "resolution": outcome.resolution,
            "decision": outcome.decision,
            "statement": outcome.statement,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    match &outcome.resolution {
        Resolution::Action(action) => {
            let decision = outcome
                .decision
                .expect("action outcome always carries a risk decision");
            let statement = outcome
                .statement
                .expect("action outcome always carries a rendered statement");

            println!("intent:     {} ({} via {})", action.intent, format_confidence(action.confidence), action.stage);
            println!("risk:       {}", decision.tier);
            println!("sql:        {}", statement.sql);
            if !statement.params.is_empty() {
                println!("params:     {:?}", statement.params);
            }

            if decision.confirmation_required && !confirmed {
                println!(
                    "status:     confirmation required — re-run with --confirm to authorize this {} risk statement",
                    decision.tier
                );
                return Ok(());
            }

            let token = if decision.confirmation_required {
                Some(risk::authorize(&decision, confirmed, chrono::Utc::now())?)
            } else {
                None
            };
            let payload = ExecutorPayload::new(statement, token, &decision)?;
            println!("executor:   {}", serde_json::to_string(&payload)?);
        }
        Resolution::Clarification(c) => {
            println!("needs clarification: {}", c.prompt);
            for candidate in &c.candidates {
                println!(
                    "  - {} ({} via {})",
                    candidate.label,
                    format_confidence(candidate.confidence),
                    candidate.stage
                );
            }
        }
        Resolution::Unknown(u) => {
            println!("no resolvable intent: {}", u.reason);
        }
    }
    Ok(())
}

fn format_confidence(confidence: f32) -> String {
    format!("{:.0}%", confidence * 100.0)
}
