// SPDX-License-Identifier: MIT OR Apache-2.0

//! Subcommand implementations.

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

use stylerag::config::Config;
use stylerag::engine::{Engine, IngestReport, RetrievalResponse};
use stylerag::index::ChunkIndex;
use stylerag::ingest::{load_records, load_text_dir, parse_hint_arg, SourceDocument};
use stylerag::output::{
    colorize_dim, colorize_error, colorize_facet, colorize_heading, colorize_score,
    colorize_source, to_json, use_colors,
};
use stylerag::profile::UserProfile;
use stylerag::vocabulary::{Facet, ProfileFacet};

use crate::cli::OutputFormat;

/// Shared output settings.
#[derive(Debug, Clone, Copy)]
pub struct Output {
    pub format: OutputFormat,
    pub compact: bool,
}

impl Output {
    fn json<T: Serialize>(&self, value: &T) -> Result<()> {
        println!("{}", to_json(value, self.compact)?);
        Ok(())
    }
}

/// Profile answers given on the command line.
#[derive(Debug, Default)]
pub struct ProfileArgs {
    pub file: Option<std::path::PathBuf>,
    pub gender: Option<String>,
    pub occasion: Option<String>,
    pub style: Option<String>,
    pub color: Option<String>,
    pub season: Option<String>,
}

impl ProfileArgs {
    /// Loads the profile file, if any, then applies flag answers on top.
    fn into_profile(self) -> Result<UserProfile> {
        let mut profile = match &self.file {
            Some(path) => UserProfile::from_json_file(path)?,
            None => UserProfile::new(),
        };
        let answers = [
            (ProfileFacet::Gender, self.gender),
            (ProfileFacet::Occasion, self.occasion),
            (ProfileFacet::Style, self.style),
            (ProfileFacet::Color, self.color),
            (ProfileFacet::Season, self.season),
        ];
        for (facet, answer) in answers {
            if let Some(answer) = answer {
                profile.set(facet, answer);
            }
        }
        Ok(profile)
    }
}

pub fn run_ingest(
    config: &Config,
    path: &Path,
    source: Option<&str>,
    hints: &[String],
    quiet: bool,
    out: Output,
) -> Result<()> {
    let mut docs = load_documents(path, source)?;
    for hint in hints {
        let (facet, value) = parse_hint_arg(hint)?;
        for doc in docs.iter_mut() {
            doc.add_hint(facet.clone(), value.clone());
        }
    }
    if docs.is_empty() {
        bail!("No documents found in {}", path.display());
    }

    let engine = Engine::open(config).context("Failed to open engine")?;

    let pb = if quiet || out.format == OutputFormat::Json {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(docs.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{bar:40.cyan/blue}] {pos}/{len} documents | Ingesting")
                .expect("valid progress bar template")
                .progress_chars("##."),
        );
        pb
    };
    let reports = engine.ingest_batch(&docs, Some(&pb));
    pb.finish_and_clear();

    let failed = reports.iter().filter(|r| !r.is_ok()).count();
    match out.format {
        OutputFormat::Json => out.json(&reports)?,
        OutputFormat::Text => print_ingest_reports(
            &reports,
            engine.rejected_tags(),
            engine.low_confidence_chunks(),
        ),
    }

    if failed > 0 {
        bail!("{} of {} documents failed to ingest", failed, reports.len());
    }
    Ok(())
}

fn load_documents(path: &Path, source: Option<&str>) -> Result<Vec<SourceDocument>> {
    if path.is_dir() {
        return load_text_dir(path);
    }

    match path.extension().and_then(|e| e.to_str()) {
        Some("json") | Some("jsonl") => load_records(path),
        _ => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read file: {}", path.display()))?;
            let source = source
                .map(str::to_string)
                .unwrap_or_else(|| path.to_string_lossy().replace('\\', "/"));
            Ok(vec![SourceDocument::new(source, text)])
        }
    }
}

fn print_ingest_reports(reports: &[IngestReport], rejected_tags: u64, low_confidence: u64) {
    let use_color = use_colors();
    let mut chunks = 0;
    for report in reports {
        match &report.error {
            None => chunks += report.chunks,
            Some(failure) => println!(
                "{} {}: {}",
                colorize_error("failed", use_color),
                colorize_source(&report.source, use_color),
                failure.message
            ),
        }
    }
    let ok = reports.iter().filter(|r| r.is_ok()).count();
    println!(
        "Ingested {} chunks from {} of {} documents",
        chunks,
        ok,
        reports.len()
    );
    if rejected_tags > 0 {
        println!(
            "{}",
            colorize_dim(
                &format!("{} extracted tags were outside the vocabulary", rejected_tags),
                use_color
            )
        );
    }
    if low_confidence > 0 {
        println!(
            "{}",
            colorize_dim(
                &format!("{} chunks held back below min_confidence", low_confidence),
                use_color
            )
        );
    }
}

pub fn run_retrieve(
    config: &Config,
    profile: ProfileArgs,
    k_target: Option<usize>,
    k_min: Option<usize>,
    budget: Option<usize>,
    provenance: bool,
    out: Output,
) -> Result<()> {
    let profile = profile.into_profile()?;
    let retrieval = config.retrieval();
    let k_target = k_target.unwrap_or_else(|| retrieval.k_target());
    let k_min = k_min.unwrap_or_else(|| retrieval.k_min().min(k_target));
    let budget = budget.unwrap_or_else(|| retrieval.token_budget());

    let engine = Engine::open(config).context("Failed to open engine")?;
    let response = engine.retrieve_with_budget(&profile, k_target, k_min, budget, provenance)?;

    match out.format {
        OutputFormat::Json => out.json(&response)?,
        OutputFormat::Text => print_response(&response),
    }
    Ok(())
}

fn print_response(response: &RetrievalResponse) {
    let use_color = use_colors();

    println!("{} {}", colorize_heading("Query:", use_color), response.query_text);
    let mut filter = response.applied_filter.to_string();
    if !response.dropped_facets.is_empty() {
        let dropped: Vec<&str> = response.dropped_facets.iter().map(|f| f.as_str()).collect();
        filter.push_str(&format!(" (relaxed: {})", dropped.join(", ")));
    }
    println!("{} {}", colorize_heading("Filter:", use_color), filter);

    if response.passages.is_empty() {
        println!("{}", colorize_dim("No passages found.", use_color));
        return;
    }

    for (i, passage) in response.passages.iter().enumerate() {
        println!();
        match response.provenance.as_ref().and_then(|p| p.get(i)) {
            Some(p) => println!(
                "[{}] {} #{} {} {}",
                i + 1,
                colorize_source(&p.source, use_color),
                p.ordinal,
                colorize_score(p.score, use_color),
                colorize_dim(&p.chunk_id, use_color)
            ),
            None => println!("[{}]", i + 1),
        }
        println!("{}", passage.trim_end());
    }
    println!();
    println!(
        "{}",
        colorize_dim(
            &format!(
                "{} passages, {} tokens, {} candidates",
                response.passages.len(),
                response.tokens_used,
                response.candidates
            ),
            use_color
        )
    );
}

fn open_index(config: &Config) -> Result<ChunkIndex> {
    let vocabulary = config.index().load_vocabulary()?;
    let path = config.index().path();
    ChunkIndex::open(&path, vocabulary.version())
        .with_context(|| format!("Failed to open index: {}", path.display()))
}

pub fn run_delete(config: &Config, source: &str, out: Output) -> Result<()> {
    let index = open_index(config)?;
    let removed = index.delete_by_source(source)?;
    match out.format {
        OutputFormat::Json => out.json(&serde_json::json!({ "source": source, "removed": removed }))?,
        OutputFormat::Text => println!("Removed {} chunks for {}", removed, source),
    }
    Ok(())
}

pub fn run_stats(config: &Config, out: Output) -> Result<()> {
    let index = open_index(config)?;
    let stats = index.stats()?;
    match out.format {
        OutputFormat::Json => out.json(&stats)?,
        OutputFormat::Text => {
            let use_color = use_colors();
            let path = stats
                .path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(memory)".to_string());
            println!("{} {}", colorize_heading("Index:", use_color), path);
            println!("Chunks: {}", stats.chunks);
            println!("Sources: {}", stats.sources);
            println!(
                "Model: {}",
                stats.model_id.as_deref().unwrap_or("(not pinned)")
            );
            match stats.dimension {
                Some(dim) => println!("Dimension: {}", dim),
                None => println!("Dimension: (not pinned)"),
            }
            println!(
                "Vocabulary: {}",
                stats.vocabulary_version.as_deref().unwrap_or("(unknown)")
            );
        }
    }
    Ok(())
}

pub fn run_vocabulary(config: &Config, out: Output) -> Result<()> {
    let vocabulary = config.index().load_vocabulary()?;
    match out.format {
        OutputFormat::Json => {
            let facets: BTreeMap<&str, Vec<&str>> = Facet::ALL
                .iter()
                .map(|facet| (facet.as_str(), vocabulary.values(*facet).collect()))
                .collect();
            out.json(&serde_json::json!({
                "version": vocabulary.version(),
                "facets": facets,
            }))?;
        }
        OutputFormat::Text => {
            let use_color = use_colors();
            println!(
                "{} {}",
                colorize_heading("Vocabulary", use_color),
                vocabulary.version()
            );
            for facet in Facet::ALL {
                let values: Vec<&str> = vocabulary.values(facet).collect();
                println!("{}: {}", colorize_facet(facet.as_str(), use_color), values.join(", "));
            }
        }
    }
    Ok(())
}

pub fn run_clear(config: &Config, yes: bool, out: Output) -> Result<()> {
    if !yes {
        bail!("Refusing to clear the index without --yes");
    }
    let index = open_index(config)?;
    index.clear()?;
    match out.format {
        OutputFormat::Json => out.json(&serde_json::json!({ "cleared": true }))?,
        OutputFormat::Text => println!("Index cleared"),
    }
    Ok(())
}
