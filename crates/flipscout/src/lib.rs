pub mod cache;
pub mod calculator;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod lookup;
pub mod matcher;
pub mod model;
pub mod pipeline;
pub mod sanitize;
pub mod secrets;
pub mod service;
pub mod worker;

pub use cache::CacheLayer;
pub use config::{load_config, Config};
pub use db::{Database, DatabaseError};
pub use error::{ConfigError, FlipscoutError, Result, WorkerError};
pub use lookup::{LookupError, LookupSources};
pub use pipeline::{Pipeline, PipelineConfig, PipelineError};
pub use secrets::{resolve_secret, SecretError};
pub use service::{ResearchService, ServiceError};
pub use worker::{JobDispatcher, JobRequest, JobSummary, WorkerPool};
