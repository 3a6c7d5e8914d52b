pub mod job;
pub mod pool;

pub use job::{JobRequest, JobSummary, PreparedJob, MAX_IDENTIFIERS};
pub use pool::{JobDispatcher, WorkerPool};
