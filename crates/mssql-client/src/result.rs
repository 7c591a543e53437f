//! Result handles.
//!
//! A response is collected in full before it is handed to the caller, so a
//! response that fails to decode never exposes a partial row.

use std::sync::Arc;

use mssql_types::SqlValue;
use tds_protocol::{ColMetaData, Column, Done, ServerMessage, Token};

use crate::error::{Error, Result};
use crate::row::Row;

/// One result set: the rows between a COLMETADATA and the DONE that ends it.
#[derive(Debug, Clone)]
pub struct ResultSet {
    metadata: Arc<ColMetaData>,
    rows: Vec<Row>,
    rows_affected: Option<u64>,
}

impl ResultSet {
    fn new(metadata: Arc<ColMetaData>) -> Self {
        Self {
            metadata,
            rows: Vec::new(),
            rows_affected: None,
        }
    }

    /// Column definitions.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.metadata.columns
    }

    /// Rows in server order.
    #[must_use]
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Row count reported by the DONE token that ended this set.
    #[must_use]
    pub fn rows_affected(&self) -> Option<u64> {
        self.rows_affected
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if the set has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Take the rows.
    #[must_use]
    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }
}

/// An output parameter from a stored procedure call.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputParam {
    /// Parameter name as reported by the server, including `@`.
    pub name: String,
    /// Parameter ordinal.
    pub ordinal: u16,
    /// Parameter value.
    pub value: SqlValue,
}

/// Everything a request produced.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    result_sets: Vec<ResultSet>,
    rows_affected: u64,
    return_status: Option<i32>,
    output_params: Vec<OutputParam>,
    messages: Vec<ServerMessage>,
}

impl QueryResult {
    /// All result sets, in order.
    #[must_use]
    pub fn result_sets(&self) -> &[ResultSet] {
        &self.result_sets
    }

    /// Columns of the first result set; empty when nothing was selected.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        self.result_sets
            .first()
            .map(ResultSet::columns)
            .unwrap_or_default()
    }

    /// Rows of the first result set.
    #[must_use]
    pub fn rows(&self) -> &[Row] {
        self.result_sets
            .first()
            .map(ResultSet::rows)
            .unwrap_or_default()
    }

    /// Sum of the row counts of every DONE token that carried one.
    #[must_use]
    pub fn rows_affected(&self) -> u64 {
        self.rows_affected
    }

    /// Stored procedure return status.
    #[must_use]
    pub fn return_status(&self) -> Option<i32> {
        self.return_status
    }

    /// Output parameters, in the order the server returned them.
    #[must_use]
    pub fn output_params(&self) -> &[OutputParam] {
        &self.output_params
    }

    /// Get an output parameter by name, with or without the leading `@`.
    #[must_use]
    pub fn get_output(&self, name: &str) -> Option<&OutputParam> {
        let name = name.trim_start_matches('@');
        self.output_params
            .iter()
            .find(|p| p.name.trim_start_matches('@').eq_ignore_ascii_case(name))
    }

    /// INFO messages the server sent with the response.
    #[must_use]
    pub fn messages(&self) -> &[ServerMessage] {
        &self.messages
    }
}

impl IntoIterator for QueryResult {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;

    /// Iterate over the rows of the first result set.
    fn into_iter(self) -> Self::IntoIter {
        self.result_sets
            .into_iter()
            .next()
            .map(ResultSet::into_rows)
            .unwrap_or_default()
            .into_iter()
    }
}

/// Accumulates the tokens of one response.
#[derive(Debug, Default)]
pub(crate) struct ResultBuilder {
    result: QueryResult,
    current: Option<ResultSet>,
    error: Option<ServerMessage>,
    finished: bool,
}

impl ResultBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Add a decoded token. Session-level tokens (ENVCHANGE, LOGINACK and
    /// the like) are ignored here.
    pub(crate) fn push(&mut self, token: Token) {
        match token {
            Token::ColMetaData(metadata) => {
                self.close_set(None);
                if !metadata.is_empty() {
                    self.current = Some(ResultSet::new(metadata));
                }
            }
            Token::Row(values) => {
                if let Some(set) = self.current.as_mut() {
                    let row = Row::new(values, Arc::clone(&set.metadata));
                    set.rows.push(row);
                }
            }
            Token::Done(done) | Token::DoneProc(done) => {
                self.complete(&done);
                if !done.has_more() {
                    self.finished = true;
                }
            }
            Token::DoneInProc(done) => self.complete(&done),
            Token::ReturnStatus(status) => self.result.return_status = Some(status),
            Token::ReturnValue(value) => self.result.output_params.push(OutputParam {
                name: value.name,
                ordinal: value.ordinal,
                value: value.value,
            }),
            Token::Error(message) => {
                if self.error.is_none() {
                    self.error = Some(message);
                }
            }
            Token::Info(message) => self.result.messages.push(message),
            Token::LoginAck(_)
            | Token::EnvChange(_)
            | Token::Order(_)
            | Token::FeatureExtAck(_)
            | Token::SessionState(_) => {}
        }
    }

    /// Whether a DONE without the MORE flag has been seen.
    pub(crate) fn is_finished(&self) -> bool {
        self.finished
    }

    /// Finish the response. The first ERROR token fails the whole request.
    pub(crate) fn finish(mut self) -> Result<QueryResult> {
        self.close_set(None);
        match self.error {
            Some(message) => Err(Error::server(message)),
            None => Ok(self.result),
        }
    }

    fn complete(&mut self, done: &Done) {
        let count = done.rows_affected();
        if let Some(count) = count {
            self.result.rows_affected += count;
        }
        self.close_set(count);
    }

    fn close_set(&mut self, count: Option<u64>) {
        if let Some(mut set) = self.current.take() {
            set.rows_affected = count;
            self.result.result_sets.push(set);
        }
    }
}
