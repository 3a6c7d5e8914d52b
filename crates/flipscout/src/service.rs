//! Job-level operations behind the CLI: submit, inspect, retry, curate and
//! re-evaluate.

use log::{info, warn};
use thiserror::Error;

use crate::calculator::{self, ProfitInputs};
use crate::config::DefaultsConfig;
use crate::db::candidate_repo::{self, CandidateRow};
use crate::db::item_repo::{self, ClassificationCounts, ItemQuery, ItemRow};
use crate::db::job_repo::{self, JobFilter, JobRow};
use crate::db::timeseries_repo::{self, TimeseriesPoint};
use crate::db::{Database, DatabaseError};
use crate::error::WorkerError;
use crate::model::{ItemState, JobStatus, Metric};
use crate::worker::{JobDispatcher, JobRequest};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Dispatch failed: {0}")]
    Worker(#[from] WorkerError),
}

pub type Result<T> = std::result::Result<T, ServiceError>;

pub struct ResearchService {
    db: Database,
    defaults: DefaultsConfig,
}

impl ResearchService {
    pub fn new(db: Database, defaults: DefaultsConfig) -> Self {
        Self { db, defaults }
    }

    /// Validates and stores a job with one pending item per identifier, then
    /// hands it to `dispatcher`. A dispatch failure is returned after the job
    /// is stored; the job stays `PENDING` and can be run later.
    pub fn create_job(
        &self,
        request: &JobRequest,
        dispatcher: &dyn JobDispatcher,
    ) -> Result<JobRow> {
        let prepared = request
            .prepare(&self.defaults)
            .map_err(ServiceError::Validation)?;
        job_repo::insert_with_items(&self.db, &prepared.job, &prepared.identifiers)?;
        info!(
            "Created job {} with {} items",
            prepared.job.id,
            prepared.identifiers.len()
        );

        dispatcher.enqueue(&prepared.job.id)?;
        Ok(prepared.job)
    }

    pub fn get_job(&self, job_id: &str) -> Result<JobRow> {
        job_repo::find_by_id(&self.db, job_id)?
            .ok_or_else(|| ServiceError::NotFound(format!("job {}", job_id)))
    }

    /// Newest first, with the total number of jobs.
    pub fn list_jobs(&self, offset: u64, limit: u64) -> Result<(Vec<JobRow>, u64)> {
        let filter = JobFilter {
            status: None,
            limit: Some(limit),
            offset: Some(offset),
        };
        Ok(job_repo::query(&self.db, &filter)?)
    }

    /// Resets every failed item to pending and re-dispatches the job when
    /// anything was reset. Succeeded items are left alone.
    ///
    /// A job that is `RUNNING` keeps its status; the run in progress owns it
    /// and the reset items are picked up by the dispatched run.
    pub fn retry_failed(&self, job_id: &str, dispatcher: &dyn JobDispatcher) -> Result<usize> {
        self.get_job(job_id)?;

        let reset = item_repo::reset_failed(&self.db, job_id)?;
        if reset == 0 {
            info!("Job {} has no failed items to retry", job_id);
            return Ok(0);
        }

        if self.get_job(job_id)?.status == JobStatus::Running {
            info!("Job {} is running, leaving its status in place", job_id);
        } else {
            job_repo::update_status(&self.db, job_id, JobStatus::Pending)?;
        }
        job_repo::recompute_counts(&self.db, job_id)?;
        info!("Reset {} failed items of job {}", reset, job_id);

        dispatcher.enqueue(job_id)?;
        Ok(reset)
    }

    pub fn list_items(&self, query: &ItemQuery) -> Result<(Vec<ItemRow>, u64)> {
        self.get_job(&query.job_id)?;
        Ok(item_repo::query(&self.db, query)?)
    }

    pub fn classification_counts(&self, job_id: &str) -> Result<ClassificationCounts> {
        self.get_job(job_id)?;
        Ok(item_repo::classification_counts(&self.db, job_id)?)
    }

    /// Sets the purchase-candidate flag. `note` replaces the stored note only
    /// when given.
    pub fn update_candidate(
        &self,
        item_id: i64,
        is_candidate: bool,
        note: Option<&str>,
    ) -> Result<ItemRow> {
        if !item_repo::update_candidate(&self.db, item_id, is_candidate, note)? {
            return Err(ServiceError::NotFound(format!("item {}", item_id)));
        }
        self.get_item(item_id)
    }

    pub fn list_candidates(&self, job_id: Option<&str>) -> Result<Vec<ItemRow>> {
        Ok(item_repo::list_candidates(&self.db, job_id)?)
    }

    /// Ranked buy-side options stored for one item.
    pub fn sourcing_candidates(&self, job_id: &str, identifier: &str) -> Result<Vec<CandidateRow>> {
        let identifier = identifier.trim().to_uppercase();
        if item_repo::find_by_identifier(&self.db, job_id, &identifier)?.is_none() {
            return Err(ServiceError::NotFound(format!(
                "item {} in job {}",
                identifier, job_id
            )));
        }
        Ok(candidate_repo::list_for_item(&self.db, job_id, &identifier)?)
    }

    /// Archived daily history of one metric, oldest first.
    pub fn item_history(
        &self,
        job_id: &str,
        identifier: &str,
        metric: Metric,
    ) -> Result<Vec<TimeseriesPoint>> {
        let identifier = identifier.trim().to_uppercase();
        Ok(timeseries_repo::list_for_item(&self.db, job_id, &identifier, metric)?)
    }

    /// Recomputes profit and verdict from the stored fields with the job's
    /// thresholds. Only items that completed processing can be re-evaluated.
    pub fn reevaluate_item(&self, item_id: i64) -> Result<ItemRow> {
        let item = self.get_item(item_id)?;
        if item.state != ItemState::Success {
            return Err(ServiceError::Validation(format!(
                "item {} is {}, only SUCCESS items can be re-evaluated",
                item_id, item.state
            )));
        }
        let job = self.get_job(&item.job_id)?;

        let (figures, evaluation) =
            calculator::evaluate_item(&ProfitInputs::from(&item), &job.thresholds());
        item_repo::update_evaluation(
            &self.db,
            item_id,
            figures.payout,
            figures.profit_amount,
            figures.profit_rate,
            evaluation.classification,
            &evaluation.reason_texts(),
        )?;
        job_repo::recompute_counts(&self.db, &job.id)?;

        if item.classification != Some(evaluation.classification) {
            warn!(
                "Item {} re-evaluated from {:?} to {}",
                item.identifier, item.classification, evaluation.classification
            );
        }
        self.get_item(item_id)
    }

    fn get_item(&self, item_id: i64) -> Result<ItemRow> {
        item_repo::find_by_id(&self.db, item_id)?
            .ok_or_else(|| ServiceError::NotFound(format!("item {}", item_id)))
    }
}
