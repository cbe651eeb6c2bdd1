//! Columnar blocks flowing between pipes.
//!
//! A block holds a shared timestamp array and named columns, each with one
//! value per row. Blocks are immutable once handed to a pipe: a pipe that
//! changes columns builds a new block, sharing the untouched columns with
//! its input through `Arc`.

use std::borrow::Cow;
use std::sync::{Arc, OnceLock};

/// Values of one column.
#[derive(Debug, Clone)]
enum ColumnValues {
    /// One value per row.
    Values(Vec<String>),
    /// The same value on every row, expanded on first read.
    Const {
        value: String,
        expanded: OnceLock<Vec<String>>,
    },
}

/// A named column inside a [`BlockResult`].
#[derive(Debug, Clone)]
pub struct BlockColumn {
    name: String,
    values: ColumnValues,
}

impl BlockColumn {
    pub fn new(name: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            name: name.into(),
            values: ColumnValues::Values(values),
        }
    }

    /// A column holding `value` on every row.
    pub fn new_const(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: ColumnValues::Const {
                value: value.into(),
                expanded: OnceLock::new(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_const(&self) -> bool {
        matches!(self.values, ColumnValues::Const { .. })
    }

    /// Per-row values of this column in `br`.
    ///
    /// Constant columns are materialized once, sized to the block.
    pub fn get_values(&self, br: &BlockResult) -> &[String] {
        match &self.values {
            ColumnValues::Values(values) => values,
            ColumnValues::Const { value, expanded } => {
                expanded.get_or_init(|| vec![value.clone(); br.rows_count()])
            }
        }
    }

    /// Value at `row` without expanding constant columns.
    pub fn value_at(&self, row: usize) -> &str {
        match &self.values {
            ColumnValues::Values(values) => &values[row],
            ColumnValues::Const { value, .. } => value,
        }
    }

    fn len(&self) -> Option<usize> {
        match &self.values {
            ColumnValues::Values(values) => Some(values.len()),
            ColumnValues::Const { .. } => None,
        }
    }
}

/// A batch of rows stored column by column.
#[derive(Debug, Clone, Default)]
pub struct BlockResult {
    timestamps: Arc<[i64]>,
    columns: Vec<Arc<BlockColumn>>,
}

impl BlockResult {
    pub fn new(timestamps: Vec<i64>) -> Self {
        Self {
            timestamps: timestamps.into(),
            columns: Vec::new(),
        }
    }

    /// A block with the same rows as `self` and no columns.
    pub fn with_same_rows(&self) -> Self {
        Self {
            timestamps: Arc::clone(&self.timestamps),
            columns: Vec::new(),
        }
    }

    pub fn timestamps(&self) -> &[i64] {
        &self.timestamps
    }

    pub fn rows_count(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn columns(&self) -> &[Arc<BlockColumn>] {
        &self.columns
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name())
    }

    /// Returns the column named `name`.
    ///
    /// A missing column reads as an empty string on every row.
    pub fn get_column_by_name(&self, name: &str) -> Cow<'_, BlockColumn> {
        match self.columns.iter().find(|c| c.name == name) {
            Some(c) => Cow::Borrowed(c.as_ref()),
            None => Cow::Owned(BlockColumn::new_const(name, "")),
        }
    }

    /// Like [`BlockResult::get_column_by_name`], sharing the column
    /// instead of borrowing it.
    pub fn get_shared_column(&self, name: &str) -> Arc<BlockColumn> {
        match self.columns.iter().find(|c| c.name == name) {
            Some(c) => Arc::clone(c),
            None => Arc::new(BlockColumn::new_const(name, "")),
        }
    }

    /// Adds `column`, replacing any column with the same name.
    pub fn set_column(&mut self, column: impl Into<Arc<BlockColumn>>) {
        let column = column.into();
        if let Some(n) = column.len() {
            assert_eq!(
                n,
                self.rows_count(),
                "BUG: column {:?} has {} values, block has {} rows",
                column.name,
                n,
                self.rows_count()
            );
        }
        match self.columns.iter_mut().find(|c| c.name == column.name) {
            Some(slot) => *slot = column,
            None => self.columns.push(column),
        }
    }

    pub fn with_column(mut self, column: impl Into<Arc<BlockColumn>>) -> Self {
        self.set_column(column);
        self
    }

    /// `(name, value)` pairs of row `row`, in column order.
    pub fn row_fields(&self, row: usize) -> impl Iterator<Item = (&str, &str)> {
        self.columns
            .iter()
            .map(move |c| (c.name(), c.value_at(row)))
    }
}
