//! poet-bench CLI: multi-dimensional value scoring for AI research agents.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use miette::Result;

use poet_bench::batch::{BatchCoordinator, ReportOptions, load_tasks, write_artifacts};
use poet_bench::config::PoetConfig;
use poet_bench::error::PoetResult;
use poet_bench::eval::QualityTable;
use poet_bench::knowledge::{KnowledgeQuery, KnowledgeStore, PersistenceMode};
use poet_bench::llm::{OpenAiClient, TextGenerator};

#[derive(Parser)]
#[command(name = "poet-bench", version, about = "Efficiency, quality and strategic value scoring for AI agents")]
struct Cli {
    /// TOML configuration file (defaults apply when omitted).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Knowledge base snapshot (overrides `knowledge.path`).
    #[arg(long, global = true)]
    knowledge_base: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a JSONL file of agent outputs.
    Run {
        /// Name of the evaluated model, used in artifact file names.
        model: String,

        /// JSONL task file (id, prompt, article, ...).
        #[arg(long)]
        input: PathBuf,

        /// Directory for the detailed, summary and report JSON files.
        #[arg(long, default_value = "results/poet")]
        output_dir: PathBuf,

        /// RACE rubric results (JSON array or JSONL).
        #[arg(long)]
        race_results: Option<PathBuf>,

        /// FACT citation results (JSON array or JSONL).
        #[arg(long)]
        fact_results: Option<PathBuf>,

        /// Worker pool size (overrides `batch.max_workers`).
        #[arg(long)]
        max_workers: Option<usize>,

        /// Evaluate only the first N tasks.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Inspect the knowledge base.
    Kb {
        #[command(subcommand)]
        action: KbAction,
    },

    /// Manage configuration files.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum KbAction {
    /// Show unit counts per domain and tag.
    Stats,
    /// List the most relevant units of a domain.
    Search {
        /// Domain to search.
        #[arg(long)]
        domain: String,

        /// Keep units with any of these tags.
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Keep units containing any of these keywords.
        #[arg(long = "keyword")]
        keywords: Vec<String>,

        /// Maximum number of units listed.
        #[arg(long, default_value = "10")]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write the default configuration to a file.
    Init {
        /// Destination path.
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    run(Cli::parse())?;
    Ok(())
}

fn run(cli: Cli) -> PoetResult<()> {
    match cli.command {
        Commands::Config {
            action: ConfigAction::Init { path },
        } => {
            PoetConfig::default().save(&path)?;
            println!("Wrote default configuration to {}", path.display());
        }

        Commands::Run {
            model,
            input,
            output_dir,
            race_results,
            fact_results,
            max_workers,
            limit,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            config.llm = config
                .llm
                .with_env_overrides()
                .with_deadline(Duration::from_secs(config.batch.llm_timeout_secs));
            if let Some(path) = cli.knowledge_base {
                config.knowledge.path = path;
            }
            let workers = max_workers.unwrap_or(config.batch.max_workers);
            let options = ReportOptions::from(&config.batch);

            let loaded = load_tasks(&input, limit)?;
            let mut tasks = loaded.tasks;
            for task in &mut tasks {
                task.model_name = Some(model.clone());
            }
            let quality = if race_results.is_some() || fact_results.is_some() {
                Some(QualityTable::load(race_results.as_deref(), fact_results.as_deref())?)
            } else {
                None
            };

            let store = Arc::new(open_store(&config));
            let client = OpenAiClient::new(config.llm.clone());
            tracing::info!(judge = client.model(), "using judge model");
            let generator: Arc<dyn TextGenerator> = Arc::new(client);

            let coordinator = BatchCoordinator::new(config, generator, store)?;
            let mut outcome = coordinator.run(&tasks, workers, quality.as_ref())?;
            outcome.record_rejected(loaded.rejected);
            let report = outcome.report(&model, &options);
            let paths = write_artifacts(&outcome, &report, &output_dir, &model)?;

            println!("POET evaluation of {model}");
            println!(
                "  tasks: {} evaluated, {} failed, {} skipped",
                report.summary.evaluated, report.summary.failed, report.summary.skipped
            );
            println!(
                "  overall: mean {:.3}  min {:.3}  max {:.3}",
                report.summary.mean_overall, report.summary.min_overall, report.summary.max_overall
            );
            println!(
                "  efficiency {:.3}  quality {:.3}  strategic {:.3}",
                report.efficiency.mean_score, report.quality.mean_score, report.strategic.mean_score
            );
            if !report.degraded_task_ids.is_empty() {
                println!("  degraded: {}", report.degraded_task_ids.join(", "));
            }
            for flag in &report.improvement_flags {
                println!("  ! {}", flag.recommendation);
            }
            println!("  report: {}", paths.report.display());
        }

        Commands::Kb { action } => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(path) = cli.knowledge_base {
                config.knowledge.path = path;
            }
            let store = KnowledgeStore::open_read_only(&config.knowledge.path);

            match action {
                KbAction::Stats => {
                    let stats = store.stats();
                    println!("Knowledge base: {}", config.knowledge.path.display());
                    println!("  units: {}  total usage: {}", stats.total_units, stats.total_usage);
                    if !stats.domains.is_empty() {
                        println!("  domains:");
                        for (domain, count) in &stats.domains {
                            println!("    {domain}: {count}");
                        }
                    }
                    if !stats.tags.is_empty() {
                        println!("  tags:");
                        for (tag, count) in &stats.tags {
                            println!("    {tag}: {count}");
                        }
                    }
                }
                KbAction::Search {
                    domain,
                    tags,
                    keywords,
                    limit,
                } => {
                    let query = KnowledgeQuery::domain(domain.as_str())
                        .with_tags(tags)
                        .with_keywords(keywords)
                        .with_limit(limit);
                    let units = store.find_relevant(&query);
                    if units.is_empty() {
                        println!("No knowledge units found in \"{domain}\".");
                    }
                    for (i, unit) in units.iter().enumerate() {
                        let tags: Vec<&str> = unit.tags.iter().map(String::as_str).collect();
                        println!(
                            "  {}. [{}] q={:.1} used={} {}",
                            i + 1,
                            unit.id,
                            unit.quality_score,
                            unit.usage_count,
                            unit.content
                        );
                        if !tags.is_empty() {
                            println!("     tags: {}", tags.join(", "));
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> PoetResult<PoetConfig> {
    Ok(match path {
        Some(path) => PoetConfig::load(path)?,
        None => PoetConfig::default(),
    })
}

fn open_store(config: &PoetConfig) -> KnowledgeStore {
    let mode = if config.knowledge.strict_persistence {
        PersistenceMode::Strict
    } else {
        PersistenceMode::Degrade
    };
    KnowledgeStore::open(&config.knowledge.path)
        .with_consistency_window(config.knowledge.consistency_window)
        .with_persistence_mode(mode)
}
