//! Row representation.
//!
//! A [`Row`] holds values already decoded by the token stream, aligned with
//! the result set's shared column metadata.

use std::sync::Arc;

use mssql_types::{FromSql, SqlValue, TypeError};
use tds_protocol::{ColMetaData, Column};

/// A row from a result set.
#[derive(Clone, PartialEq)]
pub struct Row {
    values: Vec<SqlValue>,
    metadata: Arc<ColMetaData>,
}

impl Row {
    pub(crate) fn new(values: Vec<SqlValue>, metadata: Arc<ColMetaData>) -> Self {
        Self { values, metadata }
    }

    /// Get a value by column index with type conversion.
    ///
    /// A NULL converts only into `Option<T>`; any other target type fails
    /// with [`TypeError::UnexpectedNull`].
    pub fn get<T: FromSql>(&self, index: usize) -> Result<T, TypeError> {
        self.values
            .get(index)
            .ok_or_else(|| TypeError::TypeMismatch {
                expected: "valid column index",
                actual: format!("index {index} out of bounds"),
            })
            .and_then(T::from_sql)
    }

    /// Get a value by column name (case-insensitive) with type conversion.
    pub fn get_by_name<T: FromSql>(&self, name: &str) -> Result<T, TypeError> {
        let index = self
            .find_column(name)
            .ok_or_else(|| TypeError::TypeMismatch {
                expected: "valid column name",
                actual: format!("column '{name}' not found"),
            })?;
        self.get(index)
    }

    /// Try to get a value by column index, returning None if NULL, missing
    /// or not convertible.
    pub fn try_get<T: FromSql>(&self, index: usize) -> Option<T> {
        self.values
            .get(index)
            .and_then(|v| T::from_sql_nullable(v).ok().flatten())
    }

    /// Get the raw value by index.
    #[must_use]
    pub fn get_raw(&self, index: usize) -> Option<&SqlValue> {
        self.values.get(index)
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the row has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Column definitions, in row order.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.metadata.columns
    }

    /// Check if a column value is NULL. Missing columns count as NULL.
    #[must_use]
    pub fn is_null(&self, index: usize) -> bool {
        self.values.get(index).is_none_or(SqlValue::is_null)
    }

    /// Iterate over the raw values.
    pub fn iter(&self) -> std::slice::Iter<'_, SqlValue> {
        self.values.iter()
    }

    /// Take the raw values.
    #[must_use]
    pub fn into_values(self) -> Vec<SqlValue> {
        self.values
    }

    fn find_column(&self, name: &str) -> Option<usize> {
        self.metadata
            .columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }
}

impl std::fmt::Debug for Row {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(
                self.metadata
                    .columns
                    .iter()
                    .map(|c| c.name.as_str())
                    .zip(self.values.iter()),
            )
            .finish()
    }
}

impl<'a> IntoIterator for &'a Row {
    type Item = &'a SqlValue;
    type IntoIter = std::slice::Iter<'a, SqlValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}
