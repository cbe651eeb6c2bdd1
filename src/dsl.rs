//! Parser for pipeline text.
//!
//! Pipeline format:
//! ```text
//! extract(_msg, "ip=<ip> user=<user> ")
//! | fields ip, user
//! | count(rows)
//! ```
//!
//! - Pipes are separated by `|`; line breaks are plain whitespace
//! - Strings are double-quoted (backslash escapes) or backtick-quoted (raw)
//! - Lines starting with `#` are comments
//!
//! Supported pipes:
//! - `extract(field, "pattern")` - extract fields from `field` with a pattern
//! - `extract("pattern")` or `extract "pattern"` - same, reading `_msg`
//! - `fields f1, f2, ...` - keep only the listed fields (`*` keeps all)
//! - `count(name)` - emit the number of rows as field `name` (default `count`)

use std::fmt;
use std::io::Cursor;
use std::sync::Arc;

use crate::config::RunConfig;
use crate::error::{PipelineError, Result};
use crate::fields_set::NeededFields;
use crate::input::{NdjsonSink, read_ndjson};
use crate::pipe::{Pipe, StopSignal};
use crate::pipe_count::{DEFAULT_RESULT_NAME, PipeCount};
use crate::pipe_extract::{DEFAULT_FIELD, PipeExtract};
use crate::pipe_fields::PipeFields;
use crate::quote::{is_token_char, try_unquote_string};

/// A parsed pipeline: pipes in execution order.
#[derive(Debug)]
pub struct Pipeline {
    pipes: Vec<Box<dyn Pipe>>,
}

impl Pipeline {
    /// Parses pipeline text.
    pub fn parse(text: &str) -> Result<Self> {
        let pipes = parse_pipes(text)?;
        Ok(Self { pipes })
    }

    pub fn from_pipes(pipes: Vec<Box<dyn Pipe>>) -> Self {
        Self { pipes }
    }

    pub fn pipes(&self) -> &[Box<dyn Pipe>] {
        &self.pipes
    }

    /// Columns the source has to load for this pipeline.
    pub fn needed_fields(&self) -> NeededFields {
        NeededFields::for_pipeline(&self.pipes)
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, p) in self.pipes.iter().enumerate() {
            if i > 0 {
                write!(f, " | ")?;
            }
            write!(f, "{p}")?;
        }
        Ok(())
    }
}

/// Execute pipeline text over NDJSON input.
///
/// Returns (output_ndjson, input_rows, output_rows) on success.
pub fn execute_pipeline(
    input_text: &str,
    pipeline_text: &str,
    config: &RunConfig,
) -> Result<(String, usize, usize)> {
    let pipeline = Pipeline::parse(pipeline_text)?;
    let blocks = read_ndjson(
        Cursor::new(input_text.as_bytes()),
        config.block_size,
        &pipeline.needed_fields(),
    );

    let stop = StopSignal::new();
    let sink = Arc::new(NdjsonSink::new(Vec::new(), stop.clone()));
    let stats = pipeline.run_into(blocks, sink.clone(), config, &stop)?;
    let output_count = sink.rows_written();

    let buf = match Arc::try_unwrap(sink) {
        Ok(sink) => sink.into_inner(),
        Err(_) => panic!("BUG: output sink is still shared after the run"),
    };
    let output_text = String::from_utf8_lossy(&buf).into_owned();

    Ok((output_text, stats.rows, output_count))
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Quoted(String),
    LParen,
    RParen,
    Comma,
    Pipe,
    Star,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Word(w) => write!(f, "{w}"),
            Token::Quoted(q) => write!(f, "{q:?}"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Comma => write!(f, ","),
            Token::Pipe => write!(f, "|"),
            Token::Star => write!(f, "*"),
        }
    }
}

/// Split pipeline text into `(offset, token)` pairs.
fn tokenize(text: &str) -> Result<Vec<(usize, Token)>> {
    let mut tokens = Vec::new();
    let mut i = 0;

    while let Some(c) = text[i..].chars().next() {
        let single = match c {
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            ',' => Some(Token::Comma),
            '|' => Some(Token::Pipe),
            '*' => Some(Token::Star),
            _ => None,
        };
        if let Some(token) = single {
            tokens.push((i, token));
            i += 1;
            continue;
        }

        if c.is_whitespace() {
            i += c.len_utf8();
        } else if c == '#' {
            // Comment runs to end of line
            i = text[i..].find('\n').map_or(text.len(), |n| i + n);
        } else if c == '"' || c == '`' {
            let Some((value, n)) = try_unquote_string(&text[i..]) else {
                return Err(PipelineError::syntax(i, "unterminated or invalid string"));
            };
            tokens.push((i, Token::Quoted(value)));
            i += n;
        } else if is_token_char(c) {
            let n = text[i..]
                .find(|c: char| !is_token_char(c))
                .unwrap_or(text.len() - i);
            tokens.push((i, Token::Word(text[i..i + n].to_string())));
            i += n;
        } else {
            return Err(PipelineError::syntax(i, format!("unexpected character {c:?}")));
        }
    }

    Ok(tokens)
}

/// Parse pipeline text into pipes, in execution order.
pub fn parse_pipes(text: &str) -> Result<Vec<Box<dyn Pipe>>> {
    let tokens = tokenize(text)?;
    if tokens.is_empty() {
        return Err(PipelineError::EmptyPipeline);
    }

    let mut pipes = Vec::new();
    let mut start = 0;
    for (n, (offset, token)) in tokens.iter().enumerate() {
        if *token == Token::Pipe {
            pipes.push(parse_pipe(&tokens[start..n], *offset)?);
            start = n + 1;
        }
    }
    pipes.push(parse_pipe(&tokens[start..], text.len())?);

    Ok(pipes)
}

/// Cursor over the tokens of a single pipe.
struct PipeTokens<'a> {
    tokens: &'a [(usize, Token)],
    pos: usize,
    end: usize,
}

impl<'a> PipeTokens<'a> {
    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |(o, _)| *o)
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    /// Consumes the current token.
    fn bump(&mut self) -> Option<&'a Token> {
        let t = self.peek();
        self.pos += 1;
        t
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token) -> Result<()> {
        let offset = self.offset();
        match self.bump() {
            Some(t) if t == token => Ok(()),
            Some(t) => Err(PipelineError::syntax(
                offset,
                format!("expected {token}, found {t}"),
            )),
            None => Err(PipelineError::syntax(offset, format!("expected {token}"))),
        }
    }

    /// A field name or string argument.
    fn string(&mut self, what: &str) -> Result<String> {
        let offset = self.offset();
        match self.bump() {
            Some(Token::Word(w)) => Ok(w.clone()),
            Some(Token::Quoted(q)) => Ok(q.clone()),
            Some(t) => Err(PipelineError::syntax(
                offset,
                format!("expected {what}, found {t}"),
            )),
            None => Err(PipelineError::syntax(offset, format!("missing {what}"))),
        }
    }

    fn finish(&self) -> Result<()> {
        match self.peek() {
            None => Ok(()),
            Some(t) => Err(PipelineError::syntax(
                self.offset(),
                format!("unexpected {t}"),
            )),
        }
    }
}

fn parse_pipe(tokens: &[(usize, Token)], end: usize) -> Result<Box<dyn Pipe>> {
    let mut pt = PipeTokens {
        tokens,
        pos: 0,
        end,
    };
    let offset = pt.offset();
    let name = match pt.bump() {
        Some(Token::Word(w)) => w.to_lowercase(),
        Some(t) => {
            return Err(PipelineError::syntax(
                offset,
                format!("expected pipe name, found {t}"),
            ));
        }
        None => return Err(PipelineError::syntax(offset, "missing pipe")),
    };

    let pipe: Box<dyn Pipe> = match name.as_str() {
        "extract" => Box::new(parse_extract(&mut pt)?),
        "fields" => Box::new(parse_fields(&mut pt)?),
        "count" => Box::new(parse_count(&mut pt)?),
        _ => return Err(PipelineError::UnknownPipe(name)),
    };
    pt.finish()?;
    Ok(pipe)
}

/// Parse `extract(field, "pattern")`, `extract("pattern")` or `extract "pattern"`.
fn parse_extract(pt: &mut PipeTokens<'_>) -> Result<PipeExtract> {
    if !pt.eat(&Token::LParen) {
        let pattern = pt.string("extract pattern")?;
        return PipeExtract::new(DEFAULT_FIELD, pattern);
    }

    let first = pt.string("extract pattern")?;
    let pe = if pt.eat(&Token::Comma) {
        let pattern = pt.string("extract pattern")?;
        PipeExtract::new(first, pattern)?
    } else {
        PipeExtract::new(DEFAULT_FIELD, first)?
    };
    pt.expect(&Token::RParen)?;
    Ok(pe)
}

/// Parse `fields a, b, ...`.
fn parse_fields(pt: &mut PipeTokens<'_>) -> Result<PipeFields> {
    let mut fields = Vec::new();
    loop {
        if pt.eat(&Token::Star) {
            fields.push("*".to_string());
        } else {
            fields.push(pt.string("field name")?);
        }
        if !pt.eat(&Token::Comma) {
            break;
        }
    }
    Ok(PipeFields::new(fields))
}

/// Parse `count`, `count()` or `count(name)`.
fn parse_count(pt: &mut PipeTokens<'_>) -> Result<PipeCount> {
    if !pt.eat(&Token::LParen) {
        return Ok(PipeCount::new(DEFAULT_RESULT_NAME));
    }
    if pt.eat(&Token::RParen) {
        return Ok(PipeCount::new(DEFAULT_RESULT_NAME));
    }
    let name = pt.string("result name")?;
    pt.expect(&Token::RParen)?;
    Ok(PipeCount::new(name))
}
