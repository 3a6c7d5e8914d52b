use crate::config::Config;

/// Orchestrator settings taken from the `pipeline` config section.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Upper bound on the items claimed by one run.
    pub claim_limit: usize,
    pub fail_reason_max_chars: usize,
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            claim_limit: config.pipeline.claim_limit,
            fail_reason_max_chars: config.pipeline.fail_reason_max_chars,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}
