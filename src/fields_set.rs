//! Field sets used to decide which columns a pipeline reads.
//!
//! Pipes are visited back-to-front; each one adjusts the sets of fields
//! its upstream must provide (`needed`) and may skip (`unneeded`). The
//! source then loads only the columns that survive.

use std::collections::BTreeSet;
use std::fmt;

use crate::pipe::Pipe;

/// Wildcard meaning "every field".
pub const STAR: &str = "*";

/// A set of case-sensitive field names, where `*` stands for all fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldsSet {
    fields: BTreeSet<String>,
}

impl FieldsSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A set containing every field.
    pub fn all() -> Self {
        let mut fs = Self::new();
        fs.add(STAR);
        fs
    }

    pub fn reset(&mut self) {
        self.fields.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn add(&mut self, field: &str) {
        if self.contains(STAR) {
            return;
        }
        if field == STAR {
            self.fields.clear();
        }
        self.fields.insert(field.to_string());
    }

    pub fn add_all<'a>(&mut self, fields: impl IntoIterator<Item = &'a str>) {
        for f in fields {
            self.add(f);
        }
    }

    /// Removes `field`. Removing `*` clears the set.
    pub fn remove(&mut self, field: &str) {
        if field == STAR {
            self.fields.clear();
            return;
        }
        self.fields.remove(field);
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains(field) || self.fields.contains(STAR)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(String::as_str)
    }
}

impl fmt::Display for FieldsSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, name) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{name}")?;
        }
        write!(f, "]")
    }
}

/// Result of needed-fields analysis over a whole pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeededFields {
    pub needed: FieldsSet,
    pub unneeded: FieldsSet,
}

impl NeededFields {
    /// Runs the analysis over `pipes` in reverse execution order.
    pub fn for_pipeline(pipes: &[Box<dyn Pipe>]) -> Self {
        let mut needed = FieldsSet::all();
        let mut unneeded = FieldsSet::new();
        for p in pipes.iter().rev() {
            p.update_needed_fields(&mut needed, &mut unneeded);
        }
        Self { needed, unneeded }
    }

    /// Whether the source must load the column `name`.
    pub fn is_needed(&self, name: &str) -> bool {
        if self.needed.contains(STAR) {
            return !self.unneeded.contains(name);
        }
        self.needed.contains(name)
    }
}
