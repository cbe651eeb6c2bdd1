//! Run configuration.

use std::num::NonZeroUsize;
use std::thread;

use crate::error::{PipelineError, Result};

/// Rows per block when not configured.
pub const DEFAULT_BLOCK_SIZE: usize = 1024;

/// Settings for one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Number of workers, and so of shards per processor.
    pub workers: usize,
    /// Maximum rows per block read from the input.
    pub block_size: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            workers: thread::available_parallelism().map_or(1, NonZeroUsize::get),
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(PipelineError::InvalidConfig(
                "workers must be at least 1".to_string(),
            ));
        }
        if self.block_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "block size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
