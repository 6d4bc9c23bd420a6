// SPDX-License-Identifier: MIT OR Apache-2.0

//! CLI argument parsing using clap

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// stylerag - Fashion styling-rule retrieval engine
///
/// Ingests styling rules into a local, metadata-filterable vector index and
/// retrieves grounding passages for a user's style profile.
#[derive(Parser, Debug)]
#[command(name = "stylerag")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to .styleragrc.toml, then ~/.config/stylerag/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Index file (overrides the configured path)
    #[arg(long, global = true)]
    pub index: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Compact JSON output (no pretty formatting)
    #[arg(long, global = true)]
    pub compact: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for results
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest documents into the index
    ///
    /// A directory is scanned for .txt and .md files; a .json or .jsonl file
    /// is read as records with `source`, `text` and optional `hints`; any
    /// other file is ingested as a single document.
    Ingest {
        /// File or directory to ingest
        path: PathBuf,

        /// Source name for a single text file (defaults to the file path)
        #[arg(long)]
        source: Option<String>,

        /// Document-level hint as facet=value (repeatable)
        #[arg(long = "hint", value_name = "FACET=VALUE")]
        hints: Vec<String>,

        /// Hide the progress bar
        #[arg(short, long)]
        quiet: bool,
    },

    /// Retrieve grounding passages for a style profile
    Retrieve {
        /// Profile JSON file, e.g. {"occasion": "party", "style": "boho"}
        #[arg(long)]
        profile: Option<PathBuf>,

        /// Gender answer
        #[arg(long)]
        gender: Option<String>,

        /// Occasion answer
        #[arg(long)]
        occasion: Option<String>,

        /// Style answer
        #[arg(long)]
        style: Option<String>,

        /// Color answer
        #[arg(long)]
        color: Option<String>,

        /// Season answer
        #[arg(long)]
        season: Option<String>,

        /// Number of chunks to request
        #[arg(short = 'k', long)]
        k_target: Option<usize>,

        /// Minimum number of chunks before filters are relaxed
        #[arg(long)]
        k_min: Option<usize>,

        /// Token budget for the assembled context
        #[arg(long)]
        budget: Option<usize>,

        /// Include source, chunk id and score for each passage
        #[arg(long)]
        provenance: bool,
    },

    /// Remove every chunk of a source
    Delete {
        /// Source name
        source: String,
    },

    /// Show index statistics
    Stats,

    /// List the allowed metadata values
    Vocabulary,

    /// Delete every chunk and unpin the embedding model
    Clear {
        /// Required confirmation
        #[arg(long)]
        yes: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell type
        #[arg(value_enum)]
        shell: Shell,
    },
}
