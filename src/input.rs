//! Reading log lines into blocks and writing blocks back out.
//!
//! Readers are lazy: each yields a block once `block_size` rows have been
//! read, so input of any length is processed with bounded memory. NDJSON
//! input maps every top-level key of a line to a column. Only the columns
//! a pipeline needs are kept; the rest are dropped while reading.

use std::collections::HashMap;
use std::io::{self, BufRead, Write};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::warn;

use crate::block::{BlockColumn, BlockResult};
use crate::error::{PipelineError, Result};
use crate::fields_set::NeededFields;
use crate::pipe::{PipeProcessor, StopSignal};

/// Field holding the row timestamp in NDJSON input.
pub const TIME_FIELD: &str = "_time";

/// Field holding the raw line in text input.
pub const MSG_FIELD: &str = "_msg";

/// Accumulates rows until a block is full.
struct BlockBuilder {
    block_size: usize,
    timestamps: Vec<i64>,
    // column name -> per-row values, in first-seen order
    names: Vec<String>,
    columns: HashMap<String, Vec<String>>,
}

impl BlockBuilder {
    fn new(block_size: usize) -> Self {
        Self {
            block_size,
            timestamps: Vec::with_capacity(block_size),
            names: Vec::new(),
            columns: HashMap::new(),
        }
    }

    /// Adds a row; returns the block once it is full.
    fn add_row(&mut self, timestamp: i64, fields: Vec<(String, String)>) -> Option<BlockResult> {
        let row = self.timestamps.len();
        self.timestamps.push(timestamp);
        for (name, value) in fields {
            let column = self.columns.entry(name).or_insert_with_key(|name| {
                self.names.push(name.clone());
                vec![String::new(); row]
            });
            column.push(value);
        }
        for column in self.columns.values_mut() {
            column.resize(row + 1, String::new());
        }
        if self.timestamps.len() >= self.block_size {
            return self.finish_block();
        }
        None
    }

    fn finish_block(&mut self) -> Option<BlockResult> {
        if self.timestamps.is_empty() {
            return None;
        }
        let mut br = BlockResult::new(std::mem::take(&mut self.timestamps));
        for name in self.names.drain(..) {
            if let Some(values) = self.columns.remove(&name) {
                br.set_column(BlockColumn::new(name, values));
            }
        }
        Some(br)
    }
}

/// Splits a reader into lines without decoding them.
struct LineReader<R> {
    reader: R,
    buf: Vec<u8>,
    line_num: usize,
}

impl<R: BufRead> LineReader<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            line_num: 0,
        }
    }

    /// Next `(1-based line number, line)` without its terminator.
    fn next_line(&mut self) -> io::Result<Option<(usize, &[u8])>> {
        self.buf.clear();
        if self.reader.read_until(b'\n', &mut self.buf)? == 0 {
            return Ok(None);
        }
        self.line_num += 1;

        let mut line = self.buf.as_slice();
        if let Some(rest) = line.strip_suffix(b"\n") {
            line = rest.strip_suffix(b"\r").unwrap_or(rest);
        }
        Ok(Some((self.line_num, line)))
    }
}

/// Blocks decoded from NDJSON input. See [`read_ndjson`].
pub struct NdjsonBlocks<R> {
    lines: LineReader<R>,
    builder: BlockBuilder,
    needed: NeededFields,
    ordinal: i64,
    done: bool,
}

/// Reads NDJSON objects into blocks of at most `block_size` rows.
///
/// Blank lines are skipped. Strings are kept as-is, other values are
/// rendered as JSON text. An integer `_time` becomes the row timestamp;
/// otherwise the row ordinal is used. The first error ends the stream.
pub fn read_ndjson<R: BufRead>(
    reader: R,
    block_size: usize,
    needed: &NeededFields,
) -> NdjsonBlocks<R> {
    NdjsonBlocks {
        lines: LineReader::new(reader),
        builder: BlockBuilder::new(block_size),
        needed: needed.clone(),
        ordinal: 0,
        done: false,
    }
}

fn parse_ndjson_row(
    line: &[u8],
    line_num: usize,
    needed: &NeededFields,
    ordinal: i64,
) -> Result<(i64, Vec<(String, String)>)> {
    let obj: serde_json::Map<String, Value> =
        serde_json::from_slice(line).map_err(|source| PipelineError::Json {
            line: line_num,
            source,
        })?;

    let timestamp = obj
        .get(TIME_FIELD)
        .and_then(Value::as_i64)
        .unwrap_or(ordinal);

    let fields = obj
        .into_iter()
        .filter(|(name, _)| needed.is_needed(name))
        .map(|(name, value)| {
            let value = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (name, value)
        })
        .collect();
    Ok((timestamp, fields))
}

impl<R: BufRead> Iterator for NdjsonBlocks<R> {
    type Item = Result<BlockResult>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            let (line_num, line) = match self.lines.next_line() {
                Ok(Some(next)) => next,
                Ok(None) => {
                    self.done = true;
                    return self.builder.finish_block().map(Ok);
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            };
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            let ordinal = self.ordinal;
            self.ordinal += 1;
            match parse_ndjson_row(line, line_num, &self.needed, ordinal) {
                Ok((timestamp, fields)) => {
                    if let Some(br) = self.builder.add_row(timestamp, fields) {
                        return Some(Ok(br));
                    }
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Blocks of plain text lines. See [`read_text_lines`].
pub struct TextBlocks<R> {
    lines: LineReader<R>,
    builder: BlockBuilder,
    ordinal: i64,
    done: bool,
}

/// Reads plain text lines into blocks with a single `_msg` column.
///
/// Invalid UTF-8 is replaced with U+FFFD; the line is kept.
pub fn read_text_lines<R: BufRead>(reader: R, block_size: usize) -> TextBlocks<R> {
    TextBlocks {
        lines: LineReader::new(reader),
        builder: BlockBuilder::new(block_size),
        ordinal: 0,
        done: false,
    }
}

impl<R: BufRead> Iterator for TextBlocks<R> {
    type Item = Result<BlockResult>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            let (line_num, line) = match self.lines.next_line() {
                Ok(Some(next)) => next,
                Ok(None) => {
                    self.done = true;
                    return self.builder.finish_block().map(Ok);
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            };
            if line.is_empty() {
                continue;
            }

            let msg = match std::str::from_utf8(line) {
                Ok(s) => s.to_string(),
                Err(_) => {
                    warn!(line = line_num, "invalid UTF-8 in text input, replacing bad bytes");
                    String::from_utf8_lossy(line).into_owned()
                }
            };
            let ordinal = self.ordinal;
            self.ordinal += 1;
            if let Some(br) = self
                .builder
                .add_row(ordinal, vec![(MSG_FIELD.to_string(), msg)])
            {
                return Some(Ok(br));
            }
        }
    }
}

fn write_rows(writer: &mut impl Write, br: &BlockResult) -> io::Result<()> {
    for row in 0..br.rows_count() {
        let mut line = String::from("{");
        for (i, (name, value)) in br.row_fields(row).enumerate() {
            if i > 0 {
                line.push(',');
            }
            line.push_str(&Value::from(name).to_string());
            line.push(':');
            line.push_str(&Value::from(value).to_string());
        }
        line.push_str("}\n");
        writer.write_all(line.as_bytes())?;
    }
    Ok(())
}

/// Writes every row of `blocks` as one JSON object per line, keeping
/// column order.
pub fn write_ndjson(mut writer: impl Write, blocks: &[BlockResult]) -> Result<()> {
    for br in blocks {
        write_rows(&mut writer, br)?;
    }
    writer.flush()?;
    Ok(())
}

struct SinkState<W> {
    writer: W,
    rows: usize,
    error: Option<io::Error>,
}

/// Final processor that writes rows as NDJSON as soon as they arrive.
///
/// A write error stops the run; it is returned from [`PipeProcessor::flush`].
pub struct NdjsonSink<W> {
    state: Mutex<SinkState<W>>,
    stop: StopSignal,
}

impl<W: Write + Send> NdjsonSink<W> {
    pub fn new(writer: W, stop: StopSignal) -> Self {
        Self {
            state: Mutex::new(SinkState {
                writer,
                rows: 0,
                error: None,
            }),
            stop,
        }
    }

    pub fn rows_written(&self) -> usize {
        self.state.lock().rows
    }

    pub fn into_inner(self) -> W {
        self.state.into_inner().writer
    }
}

impl<W: Write + Send> PipeProcessor for NdjsonSink<W> {
    fn write_block(&self, _worker_id: usize, br: &BlockResult) {
        let mut state = self.state.lock();
        if state.error.is_some() {
            return;
        }
        if let Err(e) = write_rows(&mut state.writer, br) {
            warn!(error = %e, "writing output failed, stopping pipeline");
            state.error = Some(e);
            self.stop.stop();
            return;
        }
        state.rows += br.rows_count();
    }

    fn flush(&self) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(e) = state.error.take() {
            return Err(e.into());
        }
        state.writer.flush()?;
        Ok(())
    }
}
