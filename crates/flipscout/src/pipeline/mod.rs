pub mod config;
pub mod context;
pub mod error;
pub mod progress;
pub mod runner;

pub use config::PipelineConfig;
pub use context::{CatalogIdentity, DemandSnapshot, EnrichedSnapshot, EvaluatedSnapshot, SellSideData};
pub use error::PipelineError;
pub use progress::{BroadcastProgress, NoopProgress, ProgressEvent, ProgressReporter};
pub use runner::{is_valid_identifier, Pipeline};
