//! CLI tool to run a pipeline over log lines.
//!
//! Usage:
//!   logpipe-run '<pipeline>' --input logs.ndjson
//!   logpipe-run @query.pipe --input app.log --format text -o out.ndjson
//!
//! Reads stdin when no input file is given and writes NDJSON to stdout
//! unless `--output` is set. A query starting with `@` names a pipeline file.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::fmt;

use logpipe::{
    BlockResult, DEFAULT_BLOCK_SIZE, NdjsonSink, Pipeline, RunConfig, StopSignal, read_ndjson,
    read_text_lines,
};

#[derive(Debug, Parser)]
#[command(name = "logpipe-run", version, about = "Run a log query pipeline")]
struct Cli {
    /// Pipeline text, or @path to read it from a file
    query: String,

    /// Input file (default: stdin)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Input format
    #[arg(long, value_enum, default_value = "ndjson")]
    format: InputFormat,

    /// Worker threads (default: available parallelism)
    #[arg(short, long, value_parser = parse_positive_usize)]
    workers: Option<usize>,

    /// Maximum rows per block
    #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE, value_parser = parse_positive_usize)]
    block_size: usize,

    /// Log level
    #[arg(long, value_enum, default_value = "warn")]
    log_level: LogLevel,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

/// Input format argument.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum InputFormat {
    /// One JSON object per line
    Ndjson,
    /// Plain text, each line becomes `_msg`
    Text,
}

/// Log level argument.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

fn parse_positive_usize(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;
    if value == 0 {
        return Err("value must be at least 1".to_string());
    }
    Ok(value)
}

fn init_logging(level: LogLevel) {
    // stderr keeps stdout clean for output rows
    fmt::Subscriber::builder()
        .with_max_level(tracing::Level::from(level))
        .with_writer(io::stderr)
        .init();
}

fn read_query(query: &str) -> Result<String> {
    match query.strip_prefix('@') {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("reading pipeline file '{path}'")),
        None => Ok(query.to_string()),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level);

    let pipeline_text = read_query(&cli.query)?;
    let pipeline = Pipeline::parse(&pipeline_text).context("parsing pipeline")?;

    let mut config = RunConfig {
        block_size: cli.block_size,
        ..RunConfig::default()
    };
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }

    let reader: Box<dyn BufRead> = match &cli.input {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("opening input '{}'", path.display()))?,
        )),
        None => Box::new(io::stdin().lock()),
    };
    let blocks: Box<dyn Iterator<Item = logpipe::Result<BlockResult>>> = match cli.format {
        InputFormat::Ndjson => Box::new(read_ndjson(
            reader,
            config.block_size,
            &pipeline.needed_fields(),
        )),
        InputFormat::Text => Box::new(read_text_lines(reader, config.block_size)),
    };

    let writer: Box<dyn Write + Send> = match &cli.output {
        Some(path) => {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                fs::create_dir_all(parent).with_context(|| {
                    format!("creating output directory for '{}'", path.display())
                })?;
            }
            let file = File::create(path)
                .with_context(|| format!("creating output '{}'", path.display()))?;
            Box::new(BufWriter::new(file))
        }
        None => Box::new(BufWriter::new(io::stdout())),
    };

    // rows are written as blocks leave the pipeline
    let stop = StopSignal::new();
    let sink = Arc::new(NdjsonSink::new(writer, stop.clone()));
    let stats = pipeline
        .run_into(blocks, sink.clone(), &config, &stop)
        .context("running pipeline")?;

    let input_count = stats.rows;
    let output_count = sink.rows_written();
    match &cli.output {
        Some(path) => eprintln!(
            "Processed {} -> {} rows, output: {}",
            input_count,
            output_count,
            path.display()
        ),
        None => eprintln!("Processed {input_count} -> {output_count} rows"),
    }
    info!(input_count, output_count, "done");

    Ok(())
}
