use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error(transparent)]
    Lookup(#[from] crate::lookup::LookupError),

    #[error("Storage failed: {0}")]
    Database(#[from] crate::db::DatabaseError),
}
