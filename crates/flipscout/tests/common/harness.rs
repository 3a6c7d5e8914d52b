//! Test harness for isolated pipeline runs.
//!
//! Each harness owns a temp-file database and a fresh set of fakes, so tests
//! never share state.

#![allow(dead_code)]

use std::sync::Arc;

use tempfile::TempDir;

use flipscout::config::DefaultsConfig;
use flipscout::db::item_repo::{self, ItemRow};
use flipscout::db::job_repo::{self, JobRow};
use flipscout::db::Database;
use flipscout::lookup::LookupSources;
use flipscout::pipeline::progress::{NoopProgress, ProgressReporter};
use flipscout::pipeline::runner::RunReport;
use flipscout::{JobDispatcher, JobRequest, Pipeline, PipelineConfig, ResearchService, WorkerError};

use super::fakes::{FakeBuySide, FakeDemand, FakeSellSide};

/// Stores jobs without running them; tests drive the pipeline directly.
pub struct NoDispatch;

impl JobDispatcher for NoDispatch {
    fn enqueue(&self, _job_id: &str) -> Result<(), WorkerError> {
        Ok(())
    }
}

pub struct TestHarness {
    temp_dir: TempDir,
    pub db: Database,
    pub demand: Arc<FakeDemand>,
    pub sell_side: Arc<FakeSellSide>,
    pub buy_side: Arc<FakeBuySide>,
    pub service: ResearchService,
    pipeline: Pipeline,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(PipelineConfig::default())
    }

    pub fn with_config(config: PipelineConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = Database::open(&temp_dir.path().join("flipscout.db"))
            .expect("Failed to open database");

        let demand = Arc::new(FakeDemand::default());
        let sell_side = Arc::new(FakeSellSide::default());
        let buy_side = Arc::new(FakeBuySide::default());
        let sources = LookupSources {
            demand: demand.clone(),
            sell_side: sell_side.clone(),
            buy_side: buy_side.clone(),
        };

        let pipeline = Pipeline::new(db.clone(), sources, Arc::new(config));
        let service = ResearchService::new(db.clone(), DefaultsConfig::default());

        Self {
            temp_dir,
            db,
            demand,
            sell_side,
            buy_side,
            service,
            pipeline,
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Creates a job with default settings and returns its id.
    pub fn submit(&self, identifiers: &[&str]) -> String {
        self.submit_request(JobRequest::new(identifiers.iter().copied()))
    }

    /// Creates a job with no point-back, so net cost equals the listing price.
    pub fn submit_without_points(&self, identifiers: &[&str]) -> String {
        let request = JobRequest {
            point_rate_normal: Some(rust_decimal::Decimal::ZERO),
            point_rate_bonus: Some(rust_decimal::Decimal::ZERO),
            ..JobRequest::new(identifiers.iter().copied())
        };
        self.submit_request(request)
    }

    pub fn submit_request(&self, request: JobRequest) -> String {
        self.service
            .create_job(&request, &NoDispatch)
            .expect("Failed to create job")
            .id
    }

    pub async fn run(&self, job_id: &str) -> RunReport {
        self.run_with(job_id, &NoopProgress).await
    }

    pub async fn run_with(&self, job_id: &str, progress: &dyn ProgressReporter) -> RunReport {
        self.pipeline
            .run_job(job_id, progress)
            .await
            .expect("Pipeline run failed")
    }

    pub fn job(&self, job_id: &str) -> JobRow {
        job_repo::find_by_id(&self.db, job_id)
            .expect("Failed to load job")
            .expect("Job not found")
    }

    pub fn item(&self, job_id: &str, identifier: &str) -> ItemRow {
        item_repo::find_by_identifier(&self.db, job_id, identifier)
            .expect("Failed to load item")
            .expect("Item not found")
    }
}
