//! CLI binary for simscan: run the pipeline, inspect results, manage the store.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use simscan_core::config::PipelineOptions;
use simscan_core::types::{SourceLocator, SubmissionRef};
use simscan_engine::rules::RuleSpec;
use simscan_engine::{ResultHandle, run_pipeline};
use simscan_store::FingerprintStore;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "simscan", about = "Winnowing-based similarity detection for code submissions")]
struct Cli {
    /// Fingerprint store directory (defaults to ./simscan-store)
    #[arg(short, long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one submission through the full pipeline
    Run {
        /// Submission source: a git URL or a local directory
        source: String,

        /// Submission id (unique within the step)
        #[arg(long)]
        submission: String,

        /// Assignment step the submission belongs to
        #[arg(long)]
        step: String,

        /// Owning group id
        #[arg(long, default_value = "default")]
        group: String,

        /// Owning project id
        #[arg(long, default_value = "default")]
        project: String,

        /// Git ref to clone (branch or tag; git sources only)
        #[arg(long)]
        git_ref: Option<String>,

        /// JSON file with the rule list: [{"name": ..., "params": {...}}]
        #[arg(long)]
        rules: Option<PathBuf>,

        /// k-gram size override
        #[arg(long)]
        k_gram_size: Option<usize>,

        /// Winnowing window override
        #[arg(long)]
        window_size: Option<usize>,

        /// Alert threshold override
        #[arg(long)]
        alert_threshold: Option<f64>,

        /// Run deadline override, in milliseconds
        #[arg(long)]
        deadline_ms: Option<u64>,

        /// Worker pool width override (0 = logical cores)
        #[arg(long)]
        parallelism: Option<usize>,
    },

    /// Print stored similarity results for a step, highest score first
    Report {
        /// Assignment step to report on
        step: String,

        /// Restrict to results involving this submission
        #[arg(long)]
        submission: Option<String>,

        /// Only results at or above this score
        #[arg(long, default_value = "0.0")]
        min_score: f64,
    },

    /// Dump match regions (and optionally token streams) for one pair
    Regions {
        /// Assignment step
        step: String,

        /// First submission of the pair
        submission_a: String,

        /// Second submission of the pair
        submission_b: String,

        /// Include both sides' token streams for the matched files
        #[arg(long)]
        with_tokens: bool,
    },

    /// Delete a submission and everything derived from it
    Delete {
        /// Assignment step
        step: String,

        /// Submission to delete
        submission: String,
    },

    /// Show store statistics
    Info,

    /// Check the store schema version; clear and restamp on mismatch
    Migrate,
}

fn store_dir(cli: &Cli) -> PathBuf {
    cli.store
        .clone()
        .unwrap_or_else(|| PathBuf::from("simscan-store"))
}

/// Process config from ./simscan.toml and SIMSCAN_* env vars, with CLI
/// flags layered on top. Explicit flags always win.
fn resolve_options(
    k_gram_size: Option<usize>,
    window_size: Option<usize>,
    alert_threshold: Option<f64>,
    deadline_ms: Option<u64>,
    parallelism: Option<usize>,
) -> Result<PipelineOptions> {
    let cwd = std::env::current_dir().context("failed to get current directory")?;
    let mut options = PipelineOptions::load(&cwd)?;
    if let Some(k) = k_gram_size {
        options.k_gram_size = k;
    }
    if let Some(w) = window_size {
        options.window_size = w;
    }
    if let Some(threshold) = alert_threshold {
        options.alert_threshold = threshold;
    }
    if let Some(deadline) = deadline_ms {
        options.deadline_ms = deadline;
    }
    if let Some(width) = parallelism {
        options.parallelism = width;
    }
    options.validate()?;
    Ok(options)
}

fn parse_source(source: &str, git_ref: Option<String>) -> SourceLocator {
    if source.starts_with("http://")
        || source.starts_with("https://")
        || source.starts_with("git@")
        || source.starts_with("ssh://")
    {
        SourceLocator::Git {
            url: source.to_string(),
            reference: git_ref,
        }
    } else {
        SourceLocator::Local {
            path: PathBuf::from(source),
        }
    }
}

fn load_rules(path: Option<&PathBuf>) -> Result<Vec<RuleSpec>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read rules file {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("rules file {} is not a valid rule list", path.display()))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let dir = store_dir(&cli);

    match cli.command {
        Commands::Run {
            source,
            submission,
            step,
            group,
            project,
            git_ref,
            rules,
            k_gram_size,
            window_size,
            alert_threshold,
            deadline_ms,
            parallelism,
        } => {
            let options = resolve_options(
                k_gram_size,
                window_size,
                alert_threshold,
                deadline_ms,
                parallelism,
            )?;
            let rule_specs = load_rules(rules.as_ref())?;
            let store =
                FingerprintStore::open(&dir, options.k_gram_size, options.window_size)?;

            let submission_ref = SubmissionRef {
                submission_id: submission,
                step_id: step,
                group_id: group,
                project_id: project,
                source: parse_source(&source, git_ref),
                submitted_at: Utc::now(),
            };

            let outcome = run_pipeline(&submission_ref, &rule_specs, &options, &store);
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }

        Commands::Report {
            step,
            submission,
            min_score,
        } => {
            let options = PipelineOptions::load(&std::env::current_dir()?)?;
            let store =
                FingerprintStore::open(&dir, options.k_gram_size, options.window_size)?;
            let mut results = store.step_similarities(&step)?;
            results.retain(|r| r.score >= min_score);
            if let Some(submission) = &submission {
                results.retain(|r| {
                    &r.submission_a == submission || &r.submission_b == submission
                });
            }
            results.sort_by(|a, b| {
                b.score
                    .total_cmp(&a.score)
                    .then_with(|| a.id.cmp(&b.id))
            });

            let rows: Vec<serde_json::Value> = results
                .iter()
                .map(|r| {
                    serde_json::json!({
                        "submission_a": r.submission_a,
                        "submission_b": r.submission_b,
                        "score": r.score,
                        "region_count": r.regions.len(),
                        "low_confidence": r.low_confidence,
                        "truncated": r.truncated,
                        "created_at": r.created_at,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }

        Commands::Regions {
            step,
            submission_a,
            submission_b,
            with_tokens,
        } => {
            let options = PipelineOptions::load(&std::env::current_dir()?)?;
            let store =
                FingerprintStore::open(&dir, options.k_gram_size, options.window_size)?;
            let handle = ResultHandle::new(&store, &step, &submission_a);
            let Some(result) = handle.result(&submission_b)? else {
                anyhow::bail!(
                    "no stored result for {submission_a} vs {submission_b} in step {step}"
                );
            };

            let mut output = serde_json::to_value(&result)?;
            if with_tokens {
                let mut streams = serde_json::Map::new();
                for region in &result.regions {
                    for (owner, file) in [
                        (&result.submission_a, &region.a_file),
                        (&result.submission_b, &region.b_file),
                    ] {
                        let key = format!("{owner}:{file}");
                        if !streams.contains_key(&key)
                            && let Some(stream) = handle.token_stream(owner, file)?
                        {
                            streams.insert(key, serde_json::to_value(&stream)?);
                        }
                    }
                }
                output["token_streams"] = serde_json::Value::Object(streams);
            }
            println!("{}", serde_json::to_string_pretty(&output)?);
        }

        Commands::Delete { step, submission } => {
            let options = PipelineOptions::load(&std::env::current_dir()?)?;
            let store =
                FingerprintStore::open(&dir, options.k_gram_size, options.window_size)?;
            store.delete_submission(&step, &submission)?;
            println!("deleted {submission} from step {step}");
        }

        Commands::Info => {
            let options = PipelineOptions::load(&std::env::current_dir()?)?;
            let store =
                FingerprintStore::open(&dir, options.k_gram_size, options.window_size)?;
            println!("{}", serde_json::to_string_pretty(&store.stats()?)?);
        }

        Commands::Migrate => {
            let options = PipelineOptions::load(&std::env::current_dir()?)?;
            let report =
                FingerprintStore::migrate(&dir, options.k_gram_size, options.window_size)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
