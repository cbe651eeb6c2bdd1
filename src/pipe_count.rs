//! `count` pipe: counts rows and emits the total once the input ends.
//!
//! ```text
//! extract("status=<status>") | count(rows)
//! ```

use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::block::{BlockColumn, BlockResult};
use crate::error::Result;
use crate::fields_set::FieldsSet;
use crate::pipe::{Pipe, PipeProcessor, Shards, StopSignal};
use crate::quote::quote_token_if_needed;

/// Result column name when `count()` has no argument.
pub const DEFAULT_RESULT_NAME: &str = "count";

#[derive(Debug, Clone)]
pub struct PipeCount {
    result_name: String,
}

impl PipeCount {
    pub fn new(result_name: impl Into<String>) -> Self {
        Self {
            result_name: result_name.into(),
        }
    }
}

impl fmt::Display for PipeCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "count({})", quote_token_if_needed(&self.result_name))
    }
}

impl Pipe for PipeCount {
    fn name(&self) -> &'static str {
        "count"
    }

    fn update_needed_fields(&self, needed: &mut FieldsSet, unneeded: &mut FieldsSet) {
        needed.reset();
        unneeded.reset();
    }

    fn new_processor(
        &self,
        workers: usize,
        stop: StopSignal,
        next: Arc<dyn PipeProcessor>,
    ) -> Arc<dyn PipeProcessor> {
        debug!(pipe = self.name(), text = %self, workers, "building processor");
        Arc::new(PipeCountProcessor {
            result_name: self.result_name.clone(),
            stop,
            next,
            shards: Shards::new(workers, || 0),
        })
    }
}

struct PipeCountProcessor {
    result_name: String,
    stop: StopSignal,
    next: Arc<dyn PipeProcessor>,

    // rows seen by each worker
    shards: Shards<u64>,
}

impl PipeProcessor for PipeCountProcessor {
    fn write_block(&self, worker_id: usize, br: &BlockResult) {
        if self.stop.is_stopped() {
            return;
        }
        *self.shards.claim(worker_id) += br.rows_count() as u64;
        trace!(worker_id, rows = br.rows_count(), "count consumed block");
    }

    fn flush(&self) -> Result<()> {
        if self.stop.is_stopped() {
            return Ok(());
        }
        let mut total = 0u64;
        self.shards.for_each(|rows| total += *rows);

        debug!(result = %self.result_name, total, "count flushed");
        let br = BlockResult::new(vec![0])
            .with_column(BlockColumn::new(self.result_name.as_str(), vec![total.to_string()]));
        self.next.write_block(0, &br);
        Ok(())
    }
}
