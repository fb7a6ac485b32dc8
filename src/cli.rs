//! Thin CLI surface: argument parsing and dispatch onto [`kbvault::vault`].
//! Interactive profile management, shell completions, and output
//! formatting beyond plain text/JSON are deliberately out of scope here.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use kbvault::cancel::CancelToken;
use kbvault::config::{self, Profile};
use kbvault::hybrid::{SearchMode, Weights};
use kbvault::text::Query;
use kbvault::vault::Vault;

#[derive(Parser)]
#[command(name = "kbvault")]
#[command(about = "Text, semantic, and hybrid search over a markdown note vault")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Profile to load; defaults to the active profile pointer, then "default".
    #[arg(long, global = true)]
    profile: Option<String>,

    /// Vault root directory (the local storage root when `storage.path` is unset).
    #[arg(long, global = true, default_value = ".")]
    vault: PathBuf,

    /// Show debug logging (sets RUST_LOG=debug).
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new note.
    New { title: String, content: String },
    /// Replace a note's body, preserving its frontmatter save for `updated`.
    Edit { id: String, content: String },
    /// Delete a note.
    Rm { id: String },
    /// Search the vault.
    Search {
        query: String,
        #[arg(long, value_enum, default_value = "hybrid")]
        mode: ModeArg,
        /// Falls back to the profile's `vector.search.default_limit` when unset.
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Falls back to the profile's `vector.search.min_score` when unset.
        #[arg(long)]
        threshold: Option<f64>,
        /// Falls back to the profile's `vector.search.text_weight` when unset.
        #[arg(long)]
        text_weight: Option<f64>,
        /// Falls back to the profile's `vector.search.vector_weight` when unset.
        #[arg(long)]
        vector_weight: Option<f64>,
    },
    /// Reconcile the text index, link graph, and vector index from storage.
    Rebuild,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum ModeArg {
    Text,
    Vector,
    Hybrid,
}

impl From<ModeArg> for SearchMode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::Text => SearchMode::TextOnly,
            ModeArg::Vector => SearchMode::VectorOnly,
            ModeArg::Hybrid => SearchMode::Hybrid,
        }
    }
}

fn load_profile(cli: &Cli) -> Result<Profile> {
    let config_dir = config::config_dir().context("resolving configuration directory")?;
    let profile_name = cli
        .profile
        .clone()
        .or_else(|| config::active_profile_name(&config_dir))
        .unwrap_or_else(|| "default".to_string());
    Profile::load(&config_dir, &profile_name).with_context(|| format!("loading profile '{profile_name}'"))
}

/// Runs the parsed CLI and returns the process exit code; errors are
/// printed to stderr and mapped through [`kbvault::ErrorKind::exit_code`]
/// when they originate from the core, or `1` otherwise.
pub async fn run(cli: Cli) -> i32 {
    match run_inner(cli).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("error: {e:#}");
            match e.downcast_ref::<kbvault::Error>() {
                Some(core_err) => core_err.kind().exit_code(),
                None => 1,
            }
        }
    }
}

async fn run_inner(cli: Cli) -> Result<()> {
    let cancel = CancelToken::never();
    let profile = load_profile(&cli)?;
    let vault = Vault::open(&profile, &cli.vault).context("opening vault")?;

    match &cli.command {
        Commands::New { title, content } => {
            let note = vault.create_note(title.clone(), content.clone(), &cancel).await?;
            println!("{}", note.id);
        }
        Commands::Edit { id, content } => {
            let id = kbvault::Identifier::parse(id).context("invalid note identifier")?;
            let note = vault.edit_note(id, content, &cancel).await?;
            println!("{}", note.id);
        }
        Commands::Rm { id } => {
            let id = kbvault::Identifier::parse(id).context("invalid note identifier")?;
            vault.delete_note(id, &cancel).await?;
        }
        Commands::Search {
            query,
            mode,
            limit,
            threshold,
            text_weight,
            vector_weight,
        } => {
            let mode: SearchMode = (*mode).into();
            let search = &profile.vector.search;
            let limit = limit.unwrap_or(search.default_limit).min(search.max_limit);
            let threshold = threshold.unwrap_or(search.min_score);
            match mode {
                SearchMode::TextOnly => {
                    let hits = vault.search_text(&Query::new(query.clone()), &cancel).await?;
                    for hit in hits.into_iter().take(limit) {
                        println!("{}\t{:.4}", hit.id.to_string().cyan(), hit.score);
                    }
                }
                _ => {
                    let weights = Weights {
                        text: text_weight.unwrap_or(search.text_weight),
                        vector: vector_weight.unwrap_or(search.vector_weight),
                    };
                    let result = vault
                        .search_hybrid(query, mode, weights, threshold, limit, &cancel)
                        .await?;
                    if result.fallback_to_text {
                        eprintln!("{}", "warning: semantic search unavailable, showing text-only results".yellow());
                    }
                    for hit in result.hits {
                        println!("{}\t{:.4}", hit.id.to_string().cyan(), hit.combined);
                    }
                }
            }
        }
        Commands::Rebuild => {
            let spinner = ProgressBar::new_spinner();
            spinner.set_style(ProgressStyle::with_template("{spinner} {msg}").expect("valid template"));
            spinner.set_message("reconciling index, graph, and vector state from storage...");
            spinner.enable_steady_tick(std::time::Duration::from_millis(100));
            vault.rebuild(&cancel).await?;
            spinner.finish_with_message("rebuild complete".green().to_string());
        }
    }
    Ok(())
}
