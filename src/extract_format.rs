//! Non-backtracking matcher for compiled `extract` patterns.
//!
//! Matching walks the input once, left to right. Each capture ends at the
//! first occurrence of the next literal prefix, and that choice is never
//! revisited. A capture that starts with a quoted literal takes the
//! unquoted value instead, and the next prefix must follow the closing
//! quote immediately.

use std::sync::Arc;

use crate::format_parser::ExtractFormatStep;
use crate::quote::try_unquote_string;

/// A matcher owned by a single shard.
///
/// `matches` is overwritten by every [`ExtractFormat::apply`] call; the
/// named captures are read back through [`ExtractFormat::fields`].
#[derive(Debug)]
pub struct ExtractFormat {
    steps: Arc<[ExtractFormatStep]>,

    // one slot per step, cleared before each input
    matches: Vec<String>,

    // indexes of steps with a non-empty field name
    fields: Vec<usize>,
}

impl ExtractFormat {
    /// Builds a matcher over `steps`.
    ///
    /// # Panics
    ///
    /// Panics if `steps` is empty or has no named field. The parser never
    /// produces such steps.
    pub fn new(steps: Arc<[ExtractFormatStep]>) -> Self {
        assert!(!steps.is_empty(), "BUG: steps cannot be empty");

        let fields: Vec<usize> = steps
            .iter()
            .enumerate()
            .filter(|(_, step)| step.is_named())
            .map(|(i, _)| i)
            .collect();
        assert!(!fields.is_empty(), "BUG: fields cannot be empty");

        Self {
            matches: vec![String::new(); steps.len()],
            steps,
            fields,
        }
    }

    /// Names of the fields this matcher produces, in pattern order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|&i| self.steps[i].field.as_str())
    }

    /// `(name, value)` for every named capture of the last `apply`.
    ///
    /// Fields that did not match hold empty strings.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .map(|&i| (self.steps[i].field.as_str(), self.matches[i].as_str()))
    }

    /// Matches `s` against the pattern, overwriting previous results.
    pub fn apply(&mut self, s: &str) {
        for m in &mut self.matches {
            m.clear();
        }

        let steps = &self.steps;
        let mut s = s;

        let prefix = steps[0].prefix.as_str();
        if !prefix.is_empty() {
            let Some(n) = s.find(prefix) else {
                // mismatch
                return;
            };
            s = &s[n + prefix.len()..];
        }

        for i in 0..steps.len() {
            let next_prefix = steps.get(i + 1).map_or("", |step| step.prefix.as_str());

            if let Some((value, n)) = try_unquote_string(s) {
                self.matches[i] = value;
                s = &s[n..];
                let Some(rest) = s.strip_prefix(next_prefix) else {
                    // mismatch
                    return;
                };
                s = rest;
            } else {
                if next_prefix.is_empty() {
                    self.matches[i].push_str(s);
                    return;
                }
                let Some(n) = s.find(next_prefix) else {
                    // mismatch
                    return;
                };
                self.matches[i].push_str(&s[..n]);
                s = &s[n + next_prefix.len()..];
            }
        }
    }
}
