use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use log::{debug, error, info, warn};
use regex::Regex;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info_span, Instrument};

use crate::calculator;
use crate::db::item_repo::{self, ItemRow};
use crate::db::job_repo::{self, JobCounts, JobRow};
use crate::db::{candidate_repo, timeseries_repo, Database};
use crate::lookup::{LookupError, LookupSources};
use crate::matcher::{self, MatchOutcome};
use crate::model::{Classification, ItemState, JobStatus};
use crate::sanitize;

use super::config::PipelineConfig;
use super::context::{CatalogIdentity, DemandSnapshot, EnrichedSnapshot, SellSideData};
use super::error::PipelineError;
use super::progress::{ProgressEvent, ProgressReporter};

/// Source tag stored on archived history points.
const HISTORY_SOURCE: &str = "DEMAND";

static RE_IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]{10}$").unwrap());

/// Whether `identifier` has the shape the providers accept.
pub fn is_valid_identifier(identifier: &str) -> bool {
    RE_IDENTIFIER.is_match(identifier)
}

/// What one run of a job did.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub job_id: String,
    pub status: JobStatus,
    pub counts: JobCounts,
    /// Items claimed and finished by this run.
    pub processed: usize,
    /// Stopped early by the shutdown flag.
    pub interrupted: bool,
}

type JobLocks = Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>;

/// Runs research jobs item by item. Cloning shares the database, the
/// lookup sources, the shutdown flag and the per-job locks.
#[derive(Clone)]
pub struct Pipeline {
    db: Database,
    sources: LookupSources,
    config: Arc<PipelineConfig>,
    shutdown: Arc<AtomicBool>,
    job_locks: JobLocks,
}

impl Pipeline {
    pub fn new(db: Database, sources: LookupSources, config: Arc<PipelineConfig>) -> Self {
        Self {
            db,
            sources,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
            job_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// The flag checked between items. Raising it stops further claims.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Runs every pending item of a job.
    ///
    /// Item failures are recorded on the item and never fail the job. Only an
    /// error outside the per-item guard (a storage failure) marks the job
    /// `FAILED`. Running the same job twice is harmless: concurrent runs are
    /// serialized and already finished items are never claimed again.
    pub async fn run_job(
        &self,
        job_id: &str,
        progress: &dyn ProgressReporter,
    ) -> Result<RunReport, PipelineError> {
        let lock = self.job_lock(job_id);
        let _guard = lock.lock().await;

        self.run_locked(job_id, progress)
            .instrument(info_span!("job", job_id = %job_id))
            .await
    }

    async fn run_locked(
        &self,
        job_id: &str,
        progress: &dyn ProgressReporter,
    ) -> Result<RunReport, PipelineError> {
        let job = job_repo::find_by_id(&self.db, job_id)?
            .ok_or_else(|| PipelineError::JobNotFound(job_id.to_string()))?;

        job_repo::update_status(&self.db, job_id, JobStatus::Running)?;
        info!("Job {} started", job_id);

        match self.process_job(&job, progress).await {
            Ok(report) => {
                job_repo::update_status(&self.db, job_id, report.status)?;
                if report.status == JobStatus::Done {
                    progress.report(ProgressEvent::JobFinished {
                        job_id: job_id.to_string(),
                        counts: report.counts,
                    });
                }
                info!(
                    "Job {} {}: {} processed, {} success, {} failed, {} pass, {} review",
                    job_id,
                    report.status,
                    report.processed,
                    report.counts.success,
                    report.counts.fail,
                    report.counts.pass,
                    report.counts.review
                );
                Ok(report)
            }
            Err(e) => {
                error!("Job {} failed: {}", job_id, e);
                if let Err(status_err) =
                    job_repo::update_status(&self.db, job_id, JobStatus::Failed)
                {
                    error!("Failed to mark job {} as failed: {}", job_id, status_err);
                }
                Err(e)
            }
        }
    }

    fn job_lock(&self, job_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.job_locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(job_id.to_string()).or_default())
    }

    async fn process_job(
        &self,
        job: &JobRow,
        progress: &dyn ProgressReporter,
    ) -> Result<RunReport, PipelineError> {
        let recovered = item_repo::reset_stale_processing(&self.db, &job.id)?;
        if recovered > 0 {
            warn!("Recovered {} items left in PROCESSING by an interrupted run", recovered);
        }

        let pending = item_repo::list_pending(&self.db, &job.id, self.config.claim_limit)?;
        debug!("Job {}: {} pending items claimed for this run", job.id, pending.len());

        let mut processed = 0;
        let mut interrupted = false;
        for item in &pending {
            if self.is_shutdown() {
                info!("Shutdown requested, leaving remaining items of job {} pending", job.id);
                interrupted = true;
                break;
            }
            if !item_repo::claim(&self.db, item.id)? {
                debug!("Item {} already claimed, skipping", item.identifier);
                continue;
            }
            self.run_item(job, item, progress).await?;
            processed += 1;
        }

        let counts = job_repo::recompute_counts(&self.db, &job.id)?;
        Ok(RunReport {
            job_id: job.id.clone(),
            status: if interrupted {
                // Unclaimed items remain, so the next run resumes the job.
                JobStatus::Pending
            } else {
                JobStatus::Done
            },
            counts,
            processed,
            interrupted,
        })
    }

    /// The per-item guard: any error from the item's stages fails only this
    /// item, with the error text truncated.
    async fn run_item(
        &self,
        job: &JobRow,
        item: &ItemRow,
        progress: &dyn ProgressReporter,
    ) -> Result<(), PipelineError> {
        progress.report(ProgressEvent::ItemStarted {
            job_id: job.id.clone(),
            identifier: item.identifier.clone(),
        });

        let span = info_span!("item", job_id = %job.id, identifier = %item.identifier);
        let (state, classification) = match self.process_item(job, item).instrument(span).await {
            Ok(finished) => finished,
            Err(e) => {
                let reason =
                    sanitize::truncate_chars(&e.to_string(), self.config.fail_reason_max_chars);
                warn!("Item {} failed: {}", item.identifier, reason);
                item_repo::mark_failed(&self.db, item.id, &reason)?;
                (ItemState::Failed, None)
            }
        };

        progress.report(ProgressEvent::ItemFinished {
            job_id: job.id.clone(),
            identifier: item.identifier.clone(),
            state,
            classification,
        });
        Ok(())
    }

    async fn process_item(
        &self,
        job: &JobRow,
        item: &ItemRow,
    ) -> Result<(ItemState, Option<Classification>), PipelineError> {
        if !is_valid_identifier(&item.identifier) {
            item_repo::mark_skipped(&self.db, item.id, "invalid identifier format")?;
            return Ok((ItemState::Skipped, None));
        }

        // Stage 1: demand
        let Some(demand) = self
            .step_demand(&item.identifier)
            .instrument(info_span!("demand"))
            .await?
        else {
            item_repo::mark_failed(&self.db, item.id, "no demand data")?;
            return Ok((ItemState::Failed, None));
        };
        self.step_archive_history(job, &demand)?;

        // Screening gate
        let thresholds = job.thresholds();
        let screening = calculator::screen(
            demand.record.rank_current,
            demand.record.sales_30,
            &thresholds,
        );
        if !screening.is_empty() {
            debug!("Item {} screened out: {:?}", item.identifier, screening);
            candidate_repo::replace_for_item(&self.db, &job.id, &item.identifier, &[])?;
            item_repo::save_outcome(&self.db, item.id, &demand.screened_outcome(&screening))?;
            return Ok((ItemState::Success, Some(Classification::Fail)));
        }

        // Stage 2: sell side, then buy-side matching
        let sell_side = self
            .step_sell_side(&demand)
            .instrument(info_span!("sell_side"))
            .await;
        let identity = demand.identity().filled_from(sell_side.catalog.as_ref());
        let matched = self
            .step_match(&item.identifier, &identity, job.point_rate_total)
            .instrument(info_span!("match"))
            .await;
        let enriched = EnrichedSnapshot {
            demand,
            identity,
            sell_side,
            matched,
        };

        // Stage 3: evaluate and persist
        let evaluated = enriched.evaluate(&thresholds);
        candidate_repo::replace_for_item(
            &self.db,
            &job.id,
            &item.identifier,
            evaluated.enriched.candidates(),
        )?;
        item_repo::save_outcome(&self.db, item.id, &evaluated.outcome())?;

        let classification = evaluated.evaluation.classification;
        debug!("Item {} classified {}", item.identifier, classification);
        Ok((ItemState::Success, Some(classification)))
    }

    async fn step_demand(&self, identifier: &str) -> Result<Option<DemandSnapshot>, LookupError> {
        let record = self.sources.demand.fetch(identifier).await?;
        Ok(record.map(|r| DemandSnapshot::new(identifier, r)))
    }

    fn step_archive_history(&self, job: &JobRow, demand: &DemandSnapshot) -> Result<(), PipelineError> {
        let points = demand.history_points();
        let written =
            timeseries_repo::upsert_points(&self.db, &job.id, &demand.identifier, HISTORY_SOURCE, &points)?;
        if written > 0 {
            debug!("Archived {} history points for {}", written, demand.identifier);
        }
        Ok(())
    }

    /// Never fails: the first lookup error is logged and the remaining
    /// sell-side calls are skipped, keeping what was already fetched.
    async fn step_sell_side(&self, demand: &DemandSnapshot) -> SellSideData {
        let mut data = SellSideData::default();
        if let Err(e) = self.fetch_sell_side(demand, &mut data).await {
            warn!("Sell-side lookup failed for {}: {}", demand.identifier, e);
        }
        data
    }

    async fn fetch_sell_side(
        &self,
        demand: &DemandSnapshot,
        data: &mut SellSideData,
    ) -> Result<(), LookupError> {
        let source = &self.sources.sell_side;
        let identifier = demand.identifier.as_str();

        data.offers = source.offers(identifier).await?;
        if let Some(price) = data.lowest_price() {
            data.fees = source.fees(identifier, price).await?;
        }
        if demand.identity().needs_catalog() {
            data.catalog = source.catalog(identifier).await?;
        }
        data.restriction = source.restriction(identifier).await?;
        Ok(())
    }

    /// `None` when the search failed, which later classifies as REVIEW.
    async fn step_match(
        &self,
        identifier: &str,
        identity: &CatalogIdentity,
        point_rate: Decimal,
    ) -> Option<MatchOutcome> {
        match matcher::find_candidates(
            self.sources.buy_side.as_ref(),
            identity.catalog_code.as_deref(),
            identity.model_number.as_deref(),
            point_rate,
        )
        .await
        {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!("Buy-side matching failed for {}: {}", identifier, e);
                None
            }
        }
    }
}
