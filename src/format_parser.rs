//! Parser for `extract` patterns.
//!
//! A pattern is literal text interleaved with `<name>` placeholders:
//!
//! ```text
//! ip=<ip> user=<user> <_> took <duration>ms
//! ```
//!
//! `<_>` and `<*>` match text without storing it. Two placeholders must be
//! separated by literal text, otherwise the matcher could not tell where
//! the first one ends.

use std::sync::Arc;

use crate::error::{PipelineError, Result};

/// One literal prefix followed by an optional capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractFormatStep {
    /// Literal text that must precede the capture.
    pub prefix: String,
    /// Capture name; empty for anonymous captures and the trailing literal.
    pub field: String,
}

impl ExtractFormatStep {
    pub fn new(prefix: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            field: field.into(),
        }
    }

    pub fn is_named(&self) -> bool {
        !self.field.is_empty()
    }
}

/// Parses `pattern` into matching steps.
///
/// The steps are immutable afterwards and are shared by every matcher
/// built from them.
pub fn parse_extract_format_steps(pattern: &str) -> Result<Arc<[ExtractFormatStep]>> {
    let mut steps = Vec::new();
    let mut has_named_field = false;

    let Some(n) = pattern.find('<') else {
        return Err(PipelineError::malformed(pattern, "missing <...> fields"));
    };
    let mut prefix = &pattern[..n];
    let mut s = &pattern[n + 1..];
    loop {
        let Some(n) = s.find('>') else {
            return Err(PipelineError::malformed(
                pattern,
                format!("missing '>' for <{s}"),
            ));
        };
        let mut field = &s[..n];
        s = &s[n + 1..];

        if field == "_" || field == "*" {
            field = "";
        }
        has_named_field |= !field.is_empty();
        steps.push(ExtractFormatStep::new(prefix, field));
        if s.is_empty() {
            break;
        }

        match s.find('<') {
            None => {
                steps.push(ExtractFormatStep::new(s, ""));
                break;
            }
            Some(0) => {
                return Err(PipelineError::malformed(
                    pattern,
                    format!("missing delimiter after <{field}>"),
                ));
            }
            Some(n) => {
                prefix = &s[..n];
                s = &s[n + 1..];
            }
        }
    }

    if !has_named_field {
        return Err(PipelineError::malformed(
            pattern,
            "missing named fields like <name>",
        ));
    }

    for step in &mut steps {
        step.prefix = htmlize::unescape(step.prefix.as_str()).into_owned();
    }

    Ok(steps.into())
}
