//! `extract` pipe: pulls fields out of a text column with a pattern.
//!
//! ```text
//! extract(_msg, "ip=<ip> user=<user> ")
//! ```
//!
//! Every named placeholder becomes an output column. Rows that do not
//! match get empty strings for the fields that were not captured.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::block::{BlockColumn, BlockResult};
use crate::error::Result;
use crate::extract_format::ExtractFormat;
use crate::fields_set::FieldsSet;
use crate::format_parser::{ExtractFormatStep, parse_extract_format_steps};
use crate::pipe::{Pipe, PipeProcessor, Shards, StopSignal};
use crate::quote::{quote_string, quote_token_if_needed};

/// Field read by `extract` when none is given.
pub const DEFAULT_FIELD: &str = "_msg";

#[derive(Debug, Clone)]
pub struct PipeExtract {
    field: String,
    steps: Arc<[ExtractFormatStep]>,

    // pattern as written, kept for rendering
    steps_str: String,
}

impl PipeExtract {
    /// Compiles `pattern` for extraction from `field`.
    pub fn new(field: impl Into<String>, pattern: impl Into<String>) -> Result<Self> {
        let steps_str = pattern.into();
        let steps = parse_extract_format_steps(&steps_str)?;
        Ok(Self {
            field: field.into(),
            steps,
            steps_str,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.steps_str
    }

    /// Names of the columns this pipe produces.
    pub fn output_fields(&self) -> impl Iterator<Item = &str> {
        self.steps
            .iter()
            .filter(|step| step.is_named())
            .map(|step| step.field.as_str())
    }
}

impl fmt::Display for PipeExtract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "extract({}, {})",
            quote_token_if_needed(&self.field),
            quote_string(&self.steps_str)
        )
    }
}

impl Pipe for PipeExtract {
    fn name(&self) -> &'static str {
        "extract"
    }

    fn update_needed_fields(&self, needed: &mut FieldsSet, unneeded: &mut FieldsSet) {
        needed.add(&self.field);

        for step in self.steps.iter() {
            if step.is_named() {
                unneeded.remove(&step.field);
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

        let shards = Shards::new(workers, || PipeExtractProcessorShard {
            ef: ExtractFormat::new(Arc::clone(&self.steps)),
        });
        Arc::new(PipeExtractProcessor {
            field: self.field.clone(),
            output_fields: self.output_fields().map(str::to_string).collect(),
            stop,
            next,
            shards,
        })
    }
}

struct PipeExtractProcessor {
    field: String,
    output_fields: Vec<String>,
    stop: StopSignal,
    next: Arc<dyn PipeProcessor>,

    shards: Shards<PipeExtractProcessorShard>,
}

struct PipeExtractProcessorShard {
    ef: ExtractFormat,
}

impl PipeExtractProcessorShard {
    /// Extracts one column per output field from `values`.
    fn extract_columns(&mut self, values: &[String], columns: usize) -> Vec<Vec<String>> {
        let mut out: Vec<Vec<String>> = (0..columns)
            .map(|_| Vec::with_capacity(values.len()))
            .collect();
        for v in values {
            self.ef.apply(v);
            for (column, (_, value)) in out.iter_mut().zip(self.ef.fields()) {
                column.push(value.to_string());
            }
        }
        out
    }
}

impl PipeProcessor for PipeExtractProcessor {
    fn write_block(&self, worker_id: usize, br: &BlockResult) {
        if br.is_empty() || self.stop.is_stopped() {
            return;
        }

        let mut out = br.clone();
        {
            let mut shard = self.shards.claim(worker_id);
            let c = br.get_column_by_name(&self.field);
            if c.is_const() {
                // same input on every row: match once
                shard.ef.apply(c.value_at(0));
                for (name, (_, value)) in self.output_fields.iter().zip(shard.ef.fields()) {
                    out.set_column(BlockColumn::new_const(name.as_str(), value));
                }
            } else {
                let values = c.get_values(br);
                let columns = shard.extract_columns(values, self.output_fields.len());
                for (name, values) in self.output_fields.iter().zip(columns) {
                    out.set_column(BlockColumn::new(name.as_str(), values));
                }
            }
        }
        trace!(worker_id, rows = br.rows_count(), "extract wrote block");

        self.next.write_block(worker_id, &out);
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::fields_set::STAR;
    use parking_lot::Mutex;

    /// Downstream processor that keeps every block it receives.
    #[derive(Default)]
    struct Collect {
        blocks: Mutex<Vec<(usize, BlockResult)>>,
    }

    impl PipeProcessor for Collect {
        fn write_block(&self, worker_id: usize, br: &BlockResult) {
            self.blocks.lock().push((worker_id, br.clone()));
        }

        fn flush(&self) -> Result<()> {
            Ok(())
        }
    }

    fn block(messages: &[&str]) -> BlockResult {
        let timestamps = (0..messages.len() as i64).collect();
        BlockResult::new(timestamps).with_column(BlockColumn::new(
            "_msg",
            messages.iter().map(|s| s.to_string()).collect(),
        ))
    }

    fn values(br: &BlockResult, name: &str) -> Vec<String> {
        br.get_column_by_name(name).get_values(br).to_vec()
    }

    fn run(pe: &PipeExtract, workers: usize, blocks: &[(usize, BlockResult)]) -> Arc<Collect> {
        let sink = Arc::new(Collect::default());
        let pp = pe.new_processor(workers, StopSignal::new(), sink.clone());
        for (worker_id, br) in blocks {
            pp.write_block(*worker_id, br);
        }
        pp.flush().unwrap();
        sink
    }

    #[test]
    fn test_render() {
        let pe = PipeExtract::new("_msg", "ip=<ip> ").unwrap();
        assert_eq!(pe.to_string(), r#"extract(_msg, "ip=<ip> ")"#);

        let pe = PipeExtract::new("log line", "a=\"<a>\"").unwrap();
        assert_eq!(pe.to_string(), r#"extract("log line", "a=\"<a>\"")"#);
    }

    #[test]
    fn test_new_rejects_malformed_pattern() {
        let err = PipeExtract::new("_msg", "<_>").unwrap_err();
        assert!(matches!(err, PipelineError::MalformedPattern { .. }));
    }

    #[test]
    fn test_update_needed_fields() {
        let pe = PipeExtract::new("src", "<a> <_> <b>").unwrap();
        let mut needed = FieldsSet::new();
        let mut unneeded = FieldsSet::new();
        unneeded.add_all(["a", "b", "c"]);
        pe.update_needed_fields(&mut needed, &mut unneeded);
        assert!(needed.contains("src"));
        assert!(!unneeded.contains("a"));
        assert!(!unneeded.contains("b"));
        assert!(unneeded.contains("c"));
    }

    #[test]
    fn test_update_needed_fields_with_star() {
        let pe = PipeExtract::new("src", "<a>").unwrap();
        let mut needed = FieldsSet::all();
        let mut unneeded = FieldsSet::new();
        pe.update_needed_fields(&mut needed, &mut unneeded);
        assert!(needed.contains(STAR));
        assert!(needed.contains("src"));
        assert!(unneeded.is_empty());
    }

    #[test]
    fn test_extracted_columns_are_added() {
        let pe = PipeExtract::new("_msg", "ip=<ip> msg=<msg>").unwrap();
        let br = block(&[r#"ip="1.2.3.4" msg=ok"#, "ip=5.6.7.8 msg=fail", "garbage"]);
        let sink = run(&pe, 1, &[(0, br)]);

        let blocks = sink.blocks.lock();
        assert_eq!(blocks.len(), 1);
        let out = &blocks[0].1;
        assert_eq!(out.column_names().collect::<Vec<_>>(), vec!["_msg", "ip", "msg"]);
        assert_eq!(values(out, "ip"), vec!["1.2.3.4", "5.6.7.8", ""]);
        assert_eq!(values(out, "msg"), vec!["ok", "fail", ""]);
        assert_eq!(out.timestamps(), [0, 1, 2]);
    }

    #[test]
    fn test_extracted_column_replaces_existing() {
        let pe = PipeExtract::new("_msg", "level=<level>").unwrap();
        let br = block(&["level=warn"]).with_column(BlockColumn::new("level", vec!["old".into()]));
        let sink = run(&pe, 1, &[(0, br)]);
        let blocks = sink.blocks.lock();
        assert_eq!(values(&blocks[0].1, "level"), vec!["warn"]);
        assert_eq!(blocks[0].1.columns().len(), 2);
    }

    #[test]
    fn test_missing_source_field_yields_empty_values() {
        let pe = PipeExtract::new("other", "<x>").unwrap();
        let sink = run(&pe, 1, &[(0, block(&["a", "b"]))]);
        let blocks = sink.blocks.lock();
        assert_eq!(values(&blocks[0].1, "x"), vec!["", ""]);
    }

    #[test]
    fn test_const_source_column() {
        let pe = PipeExtract::new("host", "<name>.<domain>").unwrap();
        let br = BlockResult::new(vec![1, 2, 3]).with_column(BlockColumn::new_const("host", "db.local"));
        let sink = run(&pe, 1, &[(0, br)]);
        let blocks = sink.blocks.lock();
        let out = &blocks[0].1;
        assert!(out.get_column_by_name("name").is_const());
        assert_eq!(values(out, "name"), vec!["db", "db", "db"]);
        assert_eq!(values(out, "domain"), vec!["local", "local", "local"]);
    }

    #[test]
    fn test_empty_block_is_not_forwarded() {
        let pe = PipeExtract::new("_msg", "<x>").unwrap();
        let sink = run(&pe, 1, &[(0, BlockResult::new(vec![]))]);
        assert!(sink.blocks.lock().is_empty());
    }

    #[test]
    fn test_stopped_processor_skips_blocks() {
        let pe = PipeExtract::new("_msg", "<x>").unwrap();
        let sink = Arc::new(Collect::default());
        let stop = StopSignal::new();
        let pp = pe.new_processor(1, stop.clone(), sink.clone());
        stop.stop();
        pp.write_block(0, &block(&["a"]));
        assert!(sink.blocks.lock().is_empty());
    }

    #[test]
    fn test_worker_id_is_forwarded() {
        let pe = PipeExtract::new("_msg", "<x>").unwrap();
        let sink = run(&pe, 3, &[(2, block(&["a"])), (0, block(&["b"]))]);
        let ids: Vec<usize> = sink.blocks.lock().iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![2, 0]);
    }

    #[test]
    fn test_sharded_matches_single_threaded() {
        let pe = PipeExtract::new("_msg", "user=<user> status=<status>").unwrap();
        let rows: Vec<String> = (0..400)
            .map(|i| match i % 4 {
                0 => format!("user=u{i} status=ok"),
                1 => format!("user=\"u {i}\" status=500"),
                2 => format!("noise {i}"),
                _ => format!("user=u{i}"),
            })
            .collect();
        let chunks: Vec<BlockResult> = rows
            .chunks(25)
            .enumerate()
            .map(|(n, chunk)| {
                let start = (n * 25) as i64;
                BlockResult::new((start..start + chunk.len() as i64).collect())
                    .with_column(BlockColumn::new("_msg", chunk.to_vec()))
            })
            .collect();

        let workers = 4;
        let sink = Arc::new(Collect::default());
        let pp = pe.new_processor(workers, StopSignal::new(), sink.clone());
        std::thread::scope(|s| {
            for worker_id in 0..workers {
                let pp = &pp;
                let chunks = &chunks;
                s.spawn(move || {
                    for br in chunks.iter().skip(worker_id).step_by(workers) {
                        pp.write_block(worker_id, br);
                    }
                });
            }
        });

        let mut sharded: Vec<(i64, String, String)> = Vec::new();
        for (_, br) in sink.blocks.lock().iter() {
            let users = values(br, "user");
            let statuses = values(br, "status");
            for (i, ts) in br.timestamps().iter().enumerate() {
                sharded.push((*ts, users[i].clone(), statuses[i].clone()));
            }
        }
        sharded.sort();

        let mut ef = ExtractFormat::new(parse_extract_format_steps(pe.pattern()).unwrap());
        let expected: Vec<(i64, String, String)> = rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                ef.apply(row);
                let f: Vec<String> = ef.fields().map(|(_, v)| v.to_string()).collect();
                (i as i64, f[0].clone(), f[1].clone())
            })
            .collect();
        assert_eq!(sharded, expected);
    }
}
