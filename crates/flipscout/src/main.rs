use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::{error, info, warn};
use rust_decimal::Decimal;
use serde::Serialize;

use flipscout::db::item_repo::{ItemQuery, ItemSortKey, SortOrder};
use flipscout::db::{default_database_path, Database};
use flipscout::model::{Classification, Metric};
use flipscout::{
    load_config, CacheLayer, Config, FlipscoutError, JobDispatcher, JobRequest, LookupSources,
    Pipeline, PipelineConfig, ResearchService, ServiceError, WorkerPool,
};

/// flipscout - batch resale research.
#[derive(Parser, Debug)]
#[command(name = "flipscout")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the JSON configuration file. Built-in defaults apply when absent.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a job from identifiers and run it
    Submit(SubmitArgs),
    /// Run the pending items of an existing job
    Run { job_id: String },
    /// Reset failed items of a job and run it again
    Retry { job_id: String },
    /// Show a job with its classification breakdown
    Show { job_id: String },
    /// List jobs, newest first
    Jobs {
        #[arg(long, default_value = "20")]
        limit: u64,
        #[arg(long, default_value = "0")]
        offset: u64,
    },
    /// List a job's items
    Items(ItemsArgs),
    /// Flag or unflag an item as a purchase candidate
    Mark {
        item_id: i64,
        /// Clear the flag instead of setting it
        #[arg(long)]
        unset: bool,
        #[arg(long)]
        note: Option<String>,
    },
    /// Recompute an item's profit and verdict from stored data
    Reevaluate { item_id: i64 },
    /// List flagged purchase candidates
    Candidates {
        #[arg(long)]
        job: Option<String>,
    },
    /// Show the ranked buy-side options stored for an item
    Sourcing { job_id: String, identifier: String },
    /// Show archived price or rank history for an item
    History {
        job_id: String,
        identifier: String,
        /// PRICE or RANK
        #[arg(long, default_value = "PRICE", value_parser = parse_metric)]
        metric: Metric,
    },
}

#[derive(Parser, Debug)]
struct SubmitArgs {
    /// Identifiers to research
    identifiers: Vec<String>,

    /// Read identifiers from a file, one per line
    #[arg(short, long)]
    file: Option<PathBuf>,

    #[arg(long)]
    point_rate_normal: Option<Decimal>,
    #[arg(long)]
    point_rate_bonus: Option<Decimal>,
    #[arg(long)]
    min_profit: Option<i64>,
    #[arg(long)]
    min_profit_rate: Option<Decimal>,
    #[arg(long)]
    max_rank: Option<i64>,
    #[arg(long)]
    min_sales_30: Option<i64>,

    /// Store and print the job without running it
    #[arg(long)]
    no_run: bool,
}

#[derive(Parser, Debug)]
struct ItemsArgs {
    job_id: String,
    #[arg(long, value_parser = parse_classification)]
    classification: Option<Classification>,
    /// Only items flagged as purchase candidates
    #[arg(long)]
    candidates: bool,
    #[arg(long, default_value = "profit_amount", value_parser = parse_sort_key)]
    sort: ItemSortKey,
    #[arg(long, default_value = "desc", value_parser = parse_sort_order)]
    order: SortOrder,
    #[arg(long, default_value = "50")]
    limit: u64,
    #[arg(long, default_value = "0")]
    offset: u64,
}

fn parse_metric(s: &str) -> Result<Metric, String> {
    s.to_uppercase().parse()
}

fn parse_classification(s: &str) -> Result<Classification, String> {
    s.to_uppercase().parse()
}

fn parse_sort_key(s: &str) -> Result<ItemSortKey, String> {
    s.parse()
}

fn parse_sort_order(s: &str) -> Result<SortOrder, String> {
    s.parse()
}

/// Accepts jobs and discards them, for commands that store without running.
struct NoDispatch;

impl JobDispatcher for NoDispatch {
    fn enqueue(&self, job_id: &str) -> Result<(), flipscout::WorkerError> {
        info!("Job {} stored; run it with `flipscout run {}`", job_id, job_id);
        Ok(())
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match load_config(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load config: {}", e);
                return ExitCode::FAILURE;
            }
        },
        None => Config::default(),
    };

    flipscout::logging::init(&config.logging);

    match run(cli.command, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(command: Commands, config: &Config) -> flipscout::Result<()> {
    let db = open_database(config)?;
    let service = ResearchService::new(db.clone(), config.defaults.clone());

    match command {
        Commands::Submit(args) => {
            let request = build_request(&args)?;
            if args.no_run {
                let job = service.create_job(&request, &NoDispatch)?;
                return print_json(&job);
            }
            let pool = start_pool(config, &db)?;
            let outcome = service.create_job(&request, &pool).map(|job| job.id);
            finish(pool, outcome, &service)
        }
        Commands::Run { job_id } => {
            service.get_job(&job_id)?;
            let pool = start_pool(config, &db)?;
            let outcome = pool.enqueue(&job_id).map(|()| job_id).map_err(ServiceError::from);
            finish(pool, outcome, &service)
        }
        Commands::Retry { job_id } => {
            let pool = start_pool(config, &db)?;
            match service.retry_failed(&job_id, &pool) {
                Ok(0) => {
                    pool.shutdown();
                    pool.wait();
                    println!("No failed items in job {}", job_id);
                    Ok(())
                }
                Ok(reset) => {
                    info!("Retrying {} failed items", reset);
                    finish(pool, Ok(job_id), &service)
                }
                Err(e) => {
                    pool.shutdown();
                    pool.wait();
                    Err(e.into())
                }
            }
        }
        Commands::Show { job_id } => {
            #[derive(Serialize)]
            struct JobView {
                job: flipscout::db::job_repo::JobRow,
                classifications: flipscout::db::item_repo::ClassificationCounts,
            }
            let job = service.get_job(&job_id)?;
            let classifications = service.classification_counts(&job_id)?;
            print_json(&JobView {
                job,
                classifications,
            })
        }
        Commands::Jobs { limit, offset } => {
            let (jobs, total) = service.list_jobs(offset, limit)?;
            print_json(&serde_json::json!({ "total": total, "jobs": jobs }))
        }
        Commands::Items(args) => {
            let query = ItemQuery {
                job_id: args.job_id,
                classification: args.classification,
                is_candidate: args.candidates.then_some(true),
                sort: args.sort,
                order: args.order,
                limit: Some(args.limit),
                offset: Some(args.offset),
            };
            let (items, total) = service.list_items(&query)?;
            print_json(&serde_json::json!({ "total": total, "items": items }))
        }
        Commands::Mark {
            item_id,
            unset,
            note,
        } => print_json(&service.update_candidate(item_id, !unset, note.as_deref())?),
        Commands::Reevaluate { item_id } => print_json(&service.reevaluate_item(item_id)?),
        Commands::Candidates { job } => print_json(&service.list_candidates(job.as_deref())?),
        Commands::Sourcing { job_id, identifier } => {
            print_json(&service.sourcing_candidates(&job_id, &identifier)?)
        }
        Commands::History {
            job_id,
            identifier,
            metric,
        } => print_json(&service.item_history(&job_id, &identifier, metric)?),
    }
}

fn open_database(config: &Config) -> flipscout::Result<Database> {
    let path = match &config.database.path {
        Some(path) => PathBuf::from(path),
        None => default_database_path().ok_or_else(|| {
            flipscout::ConfigError::Validation {
                message: "no home directory; set database.path".to_string(),
            }
        })?,
    };
    Ok(Database::open(&path)?)
}

fn build_request(args: &SubmitArgs) -> flipscout::Result<JobRequest> {
    let mut identifiers = args.identifiers.clone();
    if let Some(file) = &args.file {
        identifiers.extend(read_identifier_file(file)?);
    }
    Ok(JobRequest {
        point_rate_normal: args.point_rate_normal,
        point_rate_bonus: args.point_rate_bonus,
        threshold_profit_amount: args.min_profit,
        threshold_profit_rate: args.min_profit_rate,
        threshold_rank: args.max_rank,
        threshold_sales_30: args.min_sales_30,
        ..JobRequest::new(identifiers)
    })
}

fn read_identifier_file(path: &Path) -> flipscout::Result<Vec<String>> {
    let content = std::fs::read_to_string(path).map_err(|e| flipscout::ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(content.lines().map(str::to_string).collect())
}

/// Starts the worker pool and wires Ctrl-C to its shutdown flag.
fn start_pool(config: &Config, db: &Database) -> flipscout::Result<WorkerPool> {
    let cache = CacheLayer::new(db.clone(), config.cache.ttl_seconds);
    let sources = LookupSources::from_config(config, cache)?;
    let pipeline = Pipeline::new(
        db.clone(),
        sources,
        Arc::new(PipelineConfig::from_config(config)),
    );

    let shutdown = pipeline.shutdown_flag();
    if let Err(e) = ctrlc::set_handler(move || {
        warn!("Interrupt received, finishing the current item...");
        shutdown.store(true, Ordering::Relaxed);
    }) {
        warn!("Failed to install Ctrl-C handler: {}", e);
    }

    Ok(WorkerPool::new(pipeline, config.pipeline.worker_count)?)
}

/// Waits for the dispatched job, prints the refreshed job and stops the pool.
fn finish(
    pool: WorkerPool,
    dispatched: Result<String, ServiceError>,
    service: &ResearchService,
) -> flipscout::Result<()> {
    let job_id = match dispatched {
        Ok(job_id) => job_id,
        Err(e) => {
            pool.shutdown();
            pool.wait();
            return Err(e.into());
        }
    };

    let summary = pool.recv_result();
    pool.shutdown();
    pool.wait();

    match summary {
        Some(summary) if summary.success => {
            if summary.report.as_ref().is_some_and(|r| r.interrupted) {
                warn!("Job {} interrupted; run it again to continue", job_id);
            }
            print_json(&service.get_job(&job_id)?)
        }
        Some(summary) => Err(FlipscoutError::Worker(flipscout::WorkerError::JobFailed {
            job_id,
            message: summary.error.unwrap_or_default(),
        })),
        None => Err(FlipscoutError::Worker(flipscout::WorkerError::ChannelClosed)),
    }
}

fn print_json<T: Serialize>(value: &T) -> flipscout::Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    println!("{}", text);
    Ok(())
}
