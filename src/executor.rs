//! Block-at-a-time pipeline executor.
//!
//! Every pipe gets one processor with a shard per worker. Worker threads
//! pull blocks from a shared channel and push each one through the whole
//! processor chain before taking the next. Once the input is exhausted,
//! processors are flushed in order, so anything a stage emits on flush
//! still passes through every later stage.

use std::any::Any;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::bounded;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::block::BlockResult;
use crate::config::RunConfig;
use crate::dsl::Pipeline;
use crate::error::{PipelineError, Result};
use crate::pipe::{Pipe, PipeProcessor, StopSignal};

/// Final processor of a chain: keeps every block it receives.
#[derive(Default)]
pub struct CollectProcessor {
    blocks: Mutex<Vec<BlockResult>>,
}

impl CollectProcessor {
    pub fn take_blocks(&self) -> Vec<BlockResult> {
        std::mem::take(&mut *self.blocks.lock())
    }
}

impl PipeProcessor for CollectProcessor {
    fn write_block(&self, _worker_id: usize, br: &BlockResult) {
        if !br.is_empty() {
            self.blocks.lock().push(br.clone());
        }
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Builds processors for `pipes`, last pipe first, each writing to the
/// one after it. Returned in execution order.
pub fn build_processors(
    pipes: &[Box<dyn Pipe>],
    workers: usize,
    stop: &StopSignal,
    sink: Arc<dyn PipeProcessor>,
) -> Vec<Arc<dyn PipeProcessor>> {
    let mut processors = Vec::with_capacity(pipes.len());
    let mut next = sink;
    for p in pipes.iter().rev() {
        next = p.new_processor(workers, stop.clone(), next);
        processors.push(Arc::clone(&next));
    }
    processors.reverse();
    processors
}

/// Counts of what a run read from its input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub blocks: usize,
    pub rows: usize,
}

/// Runs `pipeline` over a stream of blocks, writing output into `sink`.
///
/// Blocks are pulled from `blocks` only as fast as workers take them, so
/// the stream may be unbounded. An input error ends the run after the
/// workers drain what was already queued; nothing is flushed in that case.
pub fn execute_stream(
    pipeline: &Pipeline,
    blocks: impl IntoIterator<Item = Result<BlockResult>>,
    sink: Arc<dyn PipeProcessor>,
    config: &RunConfig,
    stop: &StopSignal,
) -> Result<RunStats> {
    config.validate()?;
    let workers = config.workers;
    info!(pipeline = %pipeline, workers, "starting pipeline");

    let processors = build_processors(pipeline.pipes(), workers, stop, Arc::clone(&sink));
    let head: Arc<dyn PipeProcessor> = match processors.first() {
        Some(pp) => Arc::clone(pp),
        None => Arc::clone(&sink),
    };

    let (tx, rx) = bounded::<BlockResult>(workers * 2);
    let mut stats = RunStats::default();
    let mut read_error = None;

    let failures: Vec<String> = thread::scope(|s| {
        let handles: Vec<_> = (0..workers)
            .map(|worker_id| {
                let rx = rx.clone();
                let head = &head;
                s.spawn(move || {
                    for br in rx.iter() {
                        head.write_block(worker_id, &br);
                    }
                    debug!(worker_id, "worker done");
                })
            })
            .collect();
        drop(rx);

        for item in blocks {
            if stop.is_stopped() {
                warn!(sent_blocks = stats.blocks, "pipeline cancelled, dropping remaining input");
                break;
            }
            let br = match item {
                Ok(br) => br,
                Err(e) => {
                    read_error = Some(e);
                    break;
                }
            };
            let rows = br.rows_count();
            if tx.send(br).is_err() {
                // every worker is gone
                break;
            }
            stats.blocks += 1;
            stats.rows += rows;
        }
        drop(tx);

        handles
            .into_iter()
            .filter_map(|h| h.join().err().map(panic_message))
            .collect()
    });
    if let Some(first) = failures.into_iter().next() {
        return Err(PipelineError::WorkerFailed(first));
    }
    if let Some(e) = read_error {
        return Err(e);
    }

    // Flush propagation: each stage flushes into stages not yet flushed
    for pp in &processors {
        pp.flush()?;
    }
    sink.flush()?;

    info!(blocks = stats.blocks, rows = stats.rows, "pipeline finished");
    Ok(stats)
}

/// Runs `pipeline` over in-memory `blocks` and collects the output.
///
/// Output blocks from different workers arrive in no particular order.
pub fn execute_blocks(
    pipeline: &Pipeline,
    blocks: impl IntoIterator<Item = BlockResult>,
    config: &RunConfig,
    stop: &StopSignal,
) -> Result<Vec<BlockResult>> {
    let sink = Arc::new(CollectProcessor::default());
    execute_stream(pipeline, blocks.into_iter().map(Ok), sink.clone(), config, stop)?;
    Ok(sink.take_blocks())
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

impl Pipeline {
    /// Runs this pipeline over `blocks`. See [`execute_blocks`].
    pub fn run(
        &self,
        blocks: impl IntoIterator<Item = BlockResult>,
        config: &RunConfig,
        stop: &StopSignal,
    ) -> Result<Vec<BlockResult>> {
        execute_blocks(self, blocks, config, stop)
    }

    /// Runs this pipeline over a block stream into `sink`. See [`execute_stream`].
    pub fn run_into(
        &self,
        blocks: impl IntoIterator<Item = Result<BlockResult>>,
        sink: Arc<dyn PipeProcessor>,
        config: &RunConfig,
        stop: &StopSignal,
    ) -> Result<RunStats> {
        execute_stream(self, blocks, sink, config, stop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockColumn;
    use crate::fields_set::FieldsSet;
    use crate::input::{NdjsonSink, read_ndjson};
    use std::cell::Cell;
    use std::fmt;
    use std::fs;
    use std::io::Cursor;
    use std::path::Path;

    fn config(workers: usize) -> RunConfig {
        RunConfig {
            workers,
            block_size: 3,
        }
    }

    fn messages(rows: &[&str]) -> BlockResult {
        BlockResult::new((0..rows.len() as i64).collect()).with_column(BlockColumn::new(
            "_msg",
            rows.iter().map(|s| s.to_string()).collect(),
        ))
    }

    /// Run `pipeline_text` over NDJSON input and return sorted output lines.
    fn run_sorted(input: &str, pipeline_text: &str, workers: usize) -> Vec<String> {
        let pipeline = Pipeline::parse(pipeline_text).unwrap();
        let config = config(workers);
        let stop = StopSignal::new();
        let blocks = read_ndjson(
            Cursor::new(input.as_bytes()),
            config.block_size,
            &pipeline.needed_fields(),
        );
        let sink = Arc::new(NdjsonSink::new(Vec::new(), stop.clone()));
        pipeline.run_into(blocks, sink.clone(), &config, &stop).unwrap();

        let buf = Arc::try_unwrap(sink).ok().unwrap().into_inner();
        let mut lines: Vec<String> = String::from_utf8(buf)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect();
        lines.sort();
        lines
    }

    /// Assert 1 worker and several workers produce the same rows for a pipeline fixture.
    fn assert_equivalence(fixture: &str) {
        let spec_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("specs");
        let input = fs::read_to_string(spec_dir.join("input.ndjson")).unwrap();
        let pipeline = fs::read_to_string(spec_dir.join(fixture)).unwrap();

        let single = run_sorted(&input, &pipeline, 1);
        let sharded = run_sorted(&input, &pipeline, 4);

        assert!(!single.is_empty(), "no output for {fixture}");
        assert_eq!(single, sharded, "sharded output differs for {fixture}");
    }

    // --- Unit tests ---

    #[test]
    fn test_build_processors_chains_in_order() {
        let pipeline = Pipeline::parse(r#"extract("a=<a>") | fields a"#).unwrap();
        let sink = Arc::new(CollectProcessor::default());
        let processors = build_processors(pipeline.pipes(), 2, &StopSignal::new(), sink.clone());
        assert_eq!(processors.len(), 2);

        processors[0].write_block(1, &messages(&["a=1", "b=2"]));
        let out = sink.take_blocks();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].column_names().collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(out[0].get_column_by_name("a").get_values(&out[0]), ["1", ""]);
    }

    #[test]
    fn test_execute_extract() {
        let pipeline = Pipeline::parse(r#"extract("ip=<ip> msg=<msg>")"#).unwrap();
        let input = vec![
            messages(&[r#"ip="1.2.3.4" msg=ok"#, "ip=5.6.7.8 msg=fail"]),
            messages(&["garbage"]),
        ];
        let output = pipeline.run(input, &config(2), &StopSignal::new()).unwrap();
        let mut rows: Vec<(String, String)> = output
            .iter()
            .flat_map(|br| {
                let ip = br.get_column_by_name("ip").get_values(br).to_vec();
                let msg = br.get_column_by_name("msg").get_values(br).to_vec();
                ip.into_iter().zip(msg)
            })
            .collect();
        rows.sort();
        assert_eq!(
            rows,
            vec![
                ("".to_string(), "".to_string()),
                ("1.2.3.4".to_string(), "ok".to_string()),
                ("5.6.7.8".to_string(), "fail".to_string()),
            ]
        );
    }

    #[test]
    fn test_flush_output_passes_through_later_stages() {
        let pipeline = Pipeline::parse("count(n) | extract(n, \"<first>\")").unwrap();
        let input = vec![messages(&["a", "b"]), messages(&["c"])];
        let output = pipeline.run(input, &config(3), &StopSignal::new()).unwrap();
        assert_eq!(output.len(), 1);
        assert_eq!(output[0].get_column_by_name("first").value_at(0), "3");
    }

    #[test]
    fn test_empty_input() {
        let pipeline = Pipeline::parse(r#"extract("<a>")"#).unwrap();
        let output = pipeline
            .run(Vec::new(), &config(2), &StopSignal::new())
            .unwrap();
        assert!(output.is_empty());
    }

    #[test]
    fn test_cancelled_run_drops_input() {
        let pipeline = Pipeline::parse("count(n)").unwrap();
        let stop = StopSignal::new();
        stop.stop();
        let output = pipeline
            .run(vec![messages(&["a"])], &config(2), &stop)
            .unwrap();
        assert!(output.is_empty());
    }

    #[test]
    fn test_invalid_config() {
        let pipeline = Pipeline::parse("count").unwrap();
        let err = pipeline
            .run(Vec::new(), &config(0), &StopSignal::new())
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    #[test]
    fn test_unbounded_stream_stops_on_signal() {
        let pipeline = Pipeline::parse(r#"extract("<a>")"#).unwrap();
        let stop = StopSignal::new();
        let pulled = Cell::new(0usize);
        // never ends on its own
        let blocks = std::iter::repeat_with(|| {
            pulled.set(pulled.get() + 1);
            if pulled.get() == 50 {
                stop.stop();
            }
            Ok(messages(&["x", "y"]))
        });
        let sink = Arc::new(CollectProcessor::default());
        let stats = pipeline
            .run_into(blocks, sink.clone(), &config(3), &stop)
            .unwrap();

        assert_eq!(pulled.get(), 50);
        assert_eq!(stats, RunStats { blocks: 49, rows: 98 });
        // blocks still queued when the signal fired are skipped
        let out_rows: usize = sink.take_blocks().iter().map(|br| br.rows_count()).sum();
        assert!(out_rows <= 98);
    }

    #[test]
    fn test_stream_pulls_blocks_lazily() {
        let pipeline = Pipeline::parse("count(n)").unwrap();
        let pulled = Cell::new(0usize);
        let blocks = (0..10).map(|_| {
            pulled.set(pulled.get() + 1);
            Ok(messages(&["a"]))
        });
        let sink = Arc::new(CollectProcessor::default());
        let stats = pipeline
            .run_into(blocks, sink.clone(), &config(2), &StopSignal::new())
            .unwrap();
        assert_eq!(pulled.get(), 10);
        assert_eq!(stats.rows, 10);
        assert_eq!(sink.take_blocks()[0].get_column_by_name("n").value_at(0), "10");
    }

    #[test]
    fn test_stream_read_error_ends_run() {
        let pipeline = Pipeline::parse("count(n)").unwrap();
        let blocks = vec![
            Ok(messages(&["a"])),
            Err(PipelineError::Io(std::io::Error::other("disk gone"))),
            Ok(messages(&["b"])),
        ];
        let sink = Arc::new(CollectProcessor::default());
        let err = pipeline
            .run_into(blocks, sink.clone(), &config(2), &StopSignal::new())
            .unwrap_err();
        assert!(matches!(err, PipelineError::Io(_)));
        // no flush after a failed read
        assert!(sink.take_blocks().is_empty());
    }

    #[derive(Debug)]
    struct PanicPipe;

    impl fmt::Display for PanicPipe {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "panic")
        }
    }

    struct PanicProcessor;

    impl PipeProcessor for PanicProcessor {
        fn write_block(&self, _worker_id: usize, _br: &BlockResult) {
            panic!("boom");
        }

        fn flush(&self) -> Result<()> {
            Ok(())
        }
    }

    impl Pipe for PanicPipe {
        fn name(&self) -> &'static str {
            "panic"
        }

        fn update_needed_fields(&self, _needed: &mut FieldsSet, _unneeded: &mut FieldsSet) {}

        fn new_processor(
            &self,
            _workers: usize,
            _stop: StopSignal,
            _next: Arc<dyn PipeProcessor>,
        ) -> Arc<dyn PipeProcessor> {
            Arc::new(PanicProcessor)
        }
    }

    #[test]
    fn test_worker_panic_is_reported() {
        let pipeline = Pipeline::from_pipes(vec![Box::new(PanicPipe)]);
        let blocks: Vec<BlockResult> = (0..10).map(|_| messages(&["x"])).collect();
        let err = pipeline
            .run(blocks, &config(2), &StopSignal::new())
            .unwrap_err();
        match err {
            PipelineError::WorkerFailed(msg) => assert_eq!(msg, "boom"),
            other => panic!("unexpected {other:?}"),
        }
    }

    // --- Equivalence tests for all pipeline fixtures ---

    macro_rules! equiv_test {
        ($name:ident, $file:expr) => {
            #[test]
            fn $name() {
                assert_equivalence($file);
            }
        };
    }

    equiv_test!(equiv_access_log, "access-log.pipe");
    equiv_test!(equiv_anonymous_captures, "anonymous-captures.pipe");
    equiv_test!(equiv_count_all, "count-all.pipe");
    equiv_test!(equiv_count_extracted, "count-extracted.pipe");
    equiv_test!(equiv_extract_kv, "extract-kv.pipe");
    equiv_test!(equiv_quoted_values, "quoted-values.pipe");
    equiv_test!(equiv_html_entities, "html-entities.pipe");
}
