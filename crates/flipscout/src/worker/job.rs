use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::DefaultsConfig;
use crate::db::job_repo::JobRow;
use crate::db::now_timestamp;
use crate::model::JobStatus;
use crate::pipeline::runner::RunReport;

/// Most identifiers a single job may carry.
pub const MAX_IDENTIFIERS: usize = 1000;

/// A research job submission. Unset rates and thresholds fall back to the
/// configured defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobRequest {
    pub identifiers: Vec<String>,
    #[serde(default)]
    pub point_rate_normal: Option<Decimal>,
    #[serde(default)]
    pub point_rate_bonus: Option<Decimal>,
    #[serde(default)]
    pub threshold_profit_amount: Option<i64>,
    #[serde(default)]
    pub threshold_profit_rate: Option<Decimal>,
    #[serde(default)]
    pub threshold_rank: Option<i64>,
    #[serde(default)]
    pub threshold_sales_30: Option<i64>,
}

/// A validated request: the job row to insert and its item identifiers.
#[derive(Debug, Clone)]
pub struct PreparedJob {
    pub job: JobRow,
    pub identifiers: Vec<String>,
}

impl JobRequest {
    pub fn new<I, S>(identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            identifiers: identifiers.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Trimmed, upper-cased, de-duplicated identifiers in first-seen order.
    /// Blank entries are dropped.
    pub fn normalized_identifiers(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.identifiers
            .iter()
            .map(|id| id.trim().to_uppercase())
            .filter(|id| !id.is_empty())
            .filter(|id| seen.insert(id.clone()))
            .collect()
    }

    /// Validates the request and resolves defaults. Every problem found is
    /// reported, joined with "; ".
    pub fn prepare(&self, defaults: &DefaultsConfig) -> Result<PreparedJob, String> {
        let identifiers = self.normalized_identifiers();
        let point_rate_normal = self.point_rate_normal.unwrap_or(defaults.point_rate_normal);
        let point_rate_bonus = self.point_rate_bonus.unwrap_or(defaults.point_rate_bonus);
        let threshold_profit_amount = self
            .threshold_profit_amount
            .unwrap_or(defaults.threshold_profit_amount);
        let threshold_profit_rate = self
            .threshold_profit_rate
            .unwrap_or(defaults.threshold_profit_rate);
        let threshold_rank = self.threshold_rank.unwrap_or(defaults.threshold_rank);
        let threshold_sales_30 = self.threshold_sales_30.unwrap_or(defaults.threshold_sales_30);

        let mut errors = Vec::new();
        if identifiers.is_empty() {
            errors.push("at least one identifier is required".to_string());
        }
        if identifiers.len() > MAX_IDENTIFIERS {
            errors.push(format!(
                "at most {} identifiers per job, got {}",
                MAX_IDENTIFIERS,
                identifiers.len()
            ));
        }
        for (name, rate) in [
            ("point_rate_normal", point_rate_normal),
            ("point_rate_bonus", point_rate_bonus),
            ("threshold_profit_rate", threshold_profit_rate),
        ] {
            if rate < Decimal::ZERO || rate > Decimal::ONE {
                errors.push(format!("{} must be between 0 and 1, got {}", name, rate));
            }
        }
        if threshold_rank < 1 {
            errors.push(format!("threshold_rank must be at least 1, got {}", threshold_rank));
        }
        if threshold_profit_amount < 0 {
            errors.push(format!(
                "threshold_profit_amount must not be negative, got {}",
                threshold_profit_amount
            ));
        }
        if threshold_sales_30 < 0 {
            errors.push(format!(
                "threshold_sales_30 must not be negative, got {}",
                threshold_sales_30
            ));
        }
        if !errors.is_empty() {
            return Err(errors.join("; "));
        }

        let now = now_timestamp();
        let job = JobRow {
            id: uuid::Uuid::new_v4().to_string(),
            status: JobStatus::Pending,
            point_rate_normal,
            point_rate_bonus,
            point_rate_total: point_rate_normal + point_rate_bonus,
            threshold_profit_amount,
            threshold_profit_rate,
            threshold_rank,
            threshold_sales_30,
            total_count: identifiers.len() as i64,
            success_count: 0,
            fail_count: 0,
            pass_count: 0,
            review_count: 0,
            created_at: now.clone(),
            updated_at: now,
            started_at: None,
            completed_at: None,
        };
        Ok(PreparedJob { job, identifiers })
    }
}

/// What a worker reports back after running one dispatched job.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub job_id: String,
    pub success: bool,
    pub report: Option<RunReport>,
    pub error: Option<String>,
}

impl JobSummary {
    pub fn completed(report: RunReport) -> Self {
        Self {
            job_id: report.job_id.clone(),
            success: true,
            report: Some(report),
            error: None,
        }
    }

    pub fn failure(job_id: &str, error: impl Into<String>) -> Self {
        Self {
            job_id: job_id.to_string(),
            success: false,
            report: None,
            error: Some(error.into()),
        }
    }
}
