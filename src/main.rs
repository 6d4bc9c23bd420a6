// SPDX-License-Identifier: MIT OR Apache-2.0

//! stylerag - Fashion styling-rule retrieval engine
//!
//! Segments and tags styling rules into a local SQLite vector index, and
//! turns questionnaire profiles into budgeted grounding passages.

mod cli;
mod commands;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Commands};
use commands::{Output, ProfileArgs};
use stylerag::config::Config;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // Initialize tracing with STYLERAG_LOG env var (e.g., STYLERAG_LOG=debug stylerag retrieve ...)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("STYLERAG_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let out = Output {
        format: cli.format,
        compact: cli.compact,
    };

    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "stylerag", &mut std::io::stdout());
        return Ok(());
    }

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(index) = cli.index {
        config.index.path = Some(index);
    }

    match cli.command {
        Commands::Ingest {
            path,
            source,
            hints,
            quiet,
        } => {
            commands::run_ingest(&config, &path, source.as_deref(), &hints, quiet, out)?;
        }
        Commands::Retrieve {
            profile,
            gender,
            occasion,
            style,
            color,
            season,
            k_target,
            k_min,
            budget,
            provenance,
        } => {
            let profile = ProfileArgs {
                file: profile,
                gender,
                occasion,
                style,
                color,
                season,
            };
            commands::run_retrieve(&config, profile, k_target, k_min, budget, provenance, out)?;
        }
        Commands::Delete { source } => {
            commands::run_delete(&config, &source, out)?;
        }
        Commands::Stats => {
            commands::run_stats(&config, out)?;
        }
        Commands::Vocabulary => {
            commands::run_vocabulary(&config, out)?;
        }
        Commands::Clear { yes } => {
            commands::run_clear(&config, yes, out)?;
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}
