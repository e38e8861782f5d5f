use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use job_match_core::{
    ExaContentClient, InMemoryRefinementCache, JobMatchOrchestrator, JobMatchResult, JobSource,
    MatchOptions, OpenAiModel, RetryPolicy, WeaviateEndpoint, WeaviateStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "job-match", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Weaviate base URL
    #[arg(long, default_value = "http://localhost:8080")]
    weaviate_url: String,

    /// Weaviate deployment kind; hosted requires an API key.
    #[arg(long, value_enum, default_value = "local")]
    weaviate_mode: StoreMode,

    /// Weaviate API key (hosted mode)
    #[arg(long, env = "WEAVIATE_API_KEY", default_value = "")]
    weaviate_api_key: String,

    /// Weaviate class holding experience records
    #[arg(long, default_value = "Experience")]
    weaviate_class: String,

    /// Exa API base URL
    #[arg(long, default_value = "https://api.exa.ai")]
    exa_url: String,

    /// Exa API key
    #[arg(long, env = "EXA_API_KEY", default_value = "")]
    exa_api_key: String,

    /// OpenAI-compatible API base URL
    #[arg(long, default_value = "https://api.openai.com/v1")]
    openai_url: String,

    /// OpenAI API key
    #[arg(long, env = "OPENAI_API_KEY", default_value = "")]
    openai_api_key: String,

    /// Model used for experience refinement
    #[arg(long, default_value = "gpt-4o-mini")]
    openai_model: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum StoreMode {
    Local,
    Hosted,
}

#[derive(Subcommand)]
enum Command {
    /// Match a job posting against stored experiences.
    Match {
        /// Job posting URL. Mutually exclusive with --text-file.
        #[arg(long, conflicts_with = "text_file")]
        url: Option<String>,

        /// File with pasted job description text instead of a URL.
        #[arg(long)]
        text_file: Option<PathBuf>,

        /// Job title (manual input only).
        #[arg(long, default_value = "")]
        title: String,

        /// Company name (manual input only).
        #[arg(long, default_value = "")]
        company: String,

        /// Minimum aggregated score a candidate must reach.
        #[arg(long, default_value = "0.3")]
        min_score: f64,

        /// Maximum number of experiences in the result.
        #[arg(long, default_value = "10")]
        max_experiences: usize,

        /// Bonus per extra query that matched a record.
        #[arg(long, default_value = "0.05")]
        diversity_bonus: f64,

        /// Overall timeout in seconds.
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Write the full result as JSON to this path.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print a previously saved match result.
    Show {
        /// Path to a saved result JSON file.
        #[arg(long)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Match {
            url,
            text_file,
            title,
            company,
            min_score,
            max_experiences,
            diversity_bonus,
            timeout_secs,
            output,
        } => {
            let endpoint = match cli.weaviate_mode {
                StoreMode::Local => WeaviateEndpoint::Local {
                    base_url: cli.weaviate_url.clone(),
                },
                StoreMode::Hosted => {
                    anyhow::ensure!(
                        !cli.weaviate_api_key.is_empty(),
                        "hosted weaviate mode requires --weaviate-api-key"
                    );
                    WeaviateEndpoint::Hosted {
                        base_url: cli.weaviate_url.clone(),
                        api_key: cli.weaviate_api_key.clone(),
                    }
                }
            };

            let options = MatchOptions {
                min_relevance_score: min_score,
                max_experiences_to_match: max_experiences,
                diversity_bonus,
                timeout: timeout_secs.map(Duration::from_secs),
                ..Default::default()
            };

            let store = Arc::new(WeaviateStore::new(endpoint, cli.weaviate_class.as_str()));
            let model = OpenAiModel::new(
                cli.openai_url.as_str(),
                cli.openai_api_key.as_str(),
                cli.openai_model.as_str(),
            )
            .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            let content = ExaContentClient::new(
                cli.exa_url.as_str(),
                cli.exa_api_key.as_str(),
                RetryPolicy::default(),
            );

            let orchestrator = JobMatchOrchestrator::new(
                content,
                store,
                Arc::new(model),
                Arc::new(InMemoryRefinementCache::new()),
                options,
            )
            .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            info!(started_at = %Utc::now().to_rfc3339(), "job-match boot");

            let source = match (url, text_file) {
                (Some(url), None) => JobSource::Url(url),
                (None, Some(path)) => {
                    let text = std::fs::read_to_string(&path)
                        .with_context(|| format!("reading {}", path.display()))?;
                    let job = job_match_core::parse_manual_text(&title, &company, &text)
                        .map_err(|error| anyhow::anyhow!(error.to_string()))?;
                    JobSource::Description(job)
                }
                _ => anyhow::bail!("provide exactly one of --url or --text-file"),
            };

            let result = orchestrator
                .match_job(source)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            print_result(&result);

            if let Some(path) = output {
                result
                    .save_to_file(&path)
                    .with_context(|| format!("writing {}", path.display()))?;
                println!("saved: {}", path.display());
            }
        }
        Command::Show { file } => {
            let result = JobMatchResult::load_from_file(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            print_result(&result);
        }
    }

    Ok(())
}

fn print_result(result: &JobMatchResult) {
    println!("job: {}", result.job_url);
    println!(
        "match_score: {:.2} ({} experiences)",
        result.match_score,
        result.matched_experiences.len()
    );

    for experience in &result.matched_experiences {
        println!(
            "[{:.2}] {}: {}",
            experience.relevance_score,
            experience.original_experience_id,
            experience.refined_accomplishment
        );
        if !experience.refinement_notes.is_empty() {
            println!("  notes: {}", experience.refinement_notes);
        }
    }

    if !result.aggregated_skills.is_empty() {
        println!("skills: {}", result.aggregated_skills.join(", "));
    }
    if !result.aggregated_tools.is_empty() {
        println!("tools: {}", result.aggregated_tools.join(", "));
    }

    let metadata = &result.processing_metadata;
    println!(
        "queries: {} candidates: {} cache: {}/{} fallbacks: {} partial: {}",
        metadata.query_count,
        metadata.candidate_count,
        metadata.cache_hits,
        metadata.cache_hits + metadata.cache_misses,
        metadata.refinement_fallbacks,
        metadata.partial
    );
    for (stage, millis) in &metadata.stage_timings_ms {
        println!("  stage {stage}: {millis}ms");
    }
}
