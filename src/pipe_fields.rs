//! `fields` pipe: keeps only the listed columns.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::block::BlockResult;
use crate::error::Result;
use crate::fields_set::{FieldsSet, STAR};
use crate::pipe::{Pipe, PipeProcessor, StopSignal};
use crate::quote::quote_token_if_needed;

#[derive(Debug, Clone)]
pub struct PipeFields {
    fields: Vec<String>,
    contains_star: bool,
}

impl PipeFields {
    pub fn new(fields: Vec<String>) -> Self {
        let contains_star = fields.iter().any(|f| f == STAR);
        Self {
            fields,
            contains_star,
        }
    }
}

impl fmt::Display for PipeFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fields ")?;
        for (i, name) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            if name == STAR {
                write!(f, "{STAR}")?;
            } else {
                write!(f, "{}", quote_token_if_needed(name))?;
            }
        }
        Ok(())
    }
}

impl Pipe for PipeFields {
    fn name(&self) -> &'static str {
        "fields"
    }

    fn update_needed_fields(&self, needed: &mut FieldsSet, unneeded: &mut FieldsSet) {
        if self.contains_star {
            return;
        }
        if needed.contains(STAR) {
            needed.reset();
            for f in &self.fields {
                if !unneeded.contains(f) {
                    needed.add(f);
                }
            }
            unneeded.reset();
        } else {
            let orig = needed.clone();
            needed.reset();
            for f in &self.fields {
                if orig.contains(f) {
                    needed.add(f);
                }
            }
        }
    }

    fn new_processor(
        &self,
        workers: usize,
        stop: StopSignal,
        next: Arc<dyn PipeProcessor>,
    ) -> Arc<dyn PipeProcessor> {
        debug!(pipe = self.name(), text = %self, workers, "building processor");
        Arc::new(PipeFieldsProcessor {
            pf: self.clone(),
            stop,
            next,
        })
    }
}

// stateless: no shards needed
struct PipeFieldsProcessor {
    pf: PipeFields,
    stop: StopSignal,
    next: Arc<dyn PipeProcessor>,
}

impl PipeProcessor for PipeFieldsProcessor {
    fn write_block(&self, worker_id: usize, br: &BlockResult) {
        if br.is_empty() || self.stop.is_stopped() {
            return;
        }
        if self.pf.contains_star {
            self.next.write_block(worker_id, br);
            return;
        }

        let mut out = br.with_same_rows();
        for name in &self.pf.fields {
            out.set_column(br.get_shared_column(name));
        }
        trace!(worker_id, rows = out.rows_count(), "fields wrote block");
        self.next.write_block(worker_id, &out);
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}
