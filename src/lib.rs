//! # logpipe
//!
//! Block-at-a-time log query pipes with pattern-based field extraction.
//!
//! Log rows are processed as column-oriented blocks: one column per field,
//! one value per row, plus a shared timestamp array. A query is a chain of
//! pipes. Each pipe builds a processor holding one private shard per
//! worker, and workers push blocks through the chain concurrently.
//!
//! ## Overview
//!
//! - **Patterns**: `ip=<ip> user=<user> ` compiles once into literal/field
//!   steps and then matches rows without backtracking
//! - **Quoted values**: `"..."` and `` `...` `` values are unquoted at match
//!   time
//! - **Shards**: per-worker matcher state, padded to a cache line
//! - **Flush**: stateful pipes such as `count` emit their result when the
//!   input ends
//!
//! ## Example
//!
//! ```
//! use logpipe::{BlockColumn, BlockResult, Pipeline, RunConfig, StopSignal};
//!
//! let pipeline = Pipeline::parse(r#"extract("ip=<ip> user=<user>") | fields user"#).unwrap();
//!
//! let block = BlockResult::new(vec![0, 1]).with_column(BlockColumn::new(
//!     "_msg",
//!     vec!["ip=1.2.3.4 user=ann".to_string(), "no match".to_string()],
//! ));
//!
//! let config = RunConfig { workers: 1, block_size: 1024 };
//! let output = pipeline.run(vec![block], &config, &StopSignal::new()).unwrap();
//!
//! let users = output[0].get_column_by_name("user");
//! assert_eq!(users.get_values(&output[0]), ["ann", ""]);
//! ```

pub mod block;
pub mod config;
pub mod dsl;
pub mod error;
pub mod executor;
pub mod extract_format;
pub mod fields_set;
pub mod format_parser;
pub mod input;
pub mod pipe;
pub mod pipe_count;
pub mod pipe_extract;
pub mod pipe_fields;
pub mod quote;

pub use block::{BlockColumn, BlockResult};
pub use config::{DEFAULT_BLOCK_SIZE, RunConfig};
pub use dsl::{Pipeline, execute_pipeline, parse_pipes};
pub use error::{PipelineError, Result};
pub use executor::{CollectProcessor, RunStats, build_processors, execute_blocks, execute_stream};
pub use extract_format::ExtractFormat;
pub use fields_set::{FieldsSet, NeededFields};
pub use format_parser::{ExtractFormatStep, parse_extract_format_steps};
pub use input::{
    NdjsonBlocks, NdjsonSink, TextBlocks, read_ndjson, read_text_lines, write_ndjson,
};
pub use pipe::{CachePadded, Pipe, PipeProcessor, Shards, StopSignal};
pub use pipe_count::PipeCount;
pub use pipe_extract::PipeExtract;
pub use pipe_fields::PipeFields;
