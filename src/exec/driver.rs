//! Database driver seam.
//!
//! The actual driver is an external collaborator; everything above it
//! talks to these traits. A driver receives a rendered
//! [`SqlStatement`] (text plus ordered binds) and never sees specs,
//! plans, or the catalog.

use async_trait::async_trait;

use crate::error::DriverError;
use crate::spec::Value;
use crate::sql::SqlStatement;

/// One batch of result rows with its column header.
#[derive(Debug, Clone, PartialEq)]
pub struct RowBatch {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl RowBatch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A single database connection.
///
/// A connection holds at most one open cursor; `open_cursor` replaces
/// any previous one.
#[async_trait]
pub trait Connection: Send {
    /// Executes a statement and returns up to `max_rows` rows.
    async fn fetch_page(
        &mut self,
        statement: &SqlStatement,
        max_rows: u64,
    ) -> Result<RowBatch, DriverError>;

    /// Executes a statement expected to yield a single value (count
    /// queries). `None` when the statement returned no rows.
    async fn fetch_scalar(&mut self, statement: &SqlStatement) -> Result<Option<Value>, DriverError>;

    /// Asks the engine's planner for the estimated result cardinality
    /// without executing. `Ok(None)` when the engine cannot estimate
    /// this particular statement.
    async fn estimate_cardinality(
        &mut self,
        statement: &SqlStatement,
    ) -> Result<Option<u64>, DriverError>;

    /// Opens a server-side cursor over the statement, fetching
    /// `chunk_rows` rows per [`Connection::next_chunk`] call.
    async fn open_cursor(
        &mut self,
        statement: &SqlStatement,
        chunk_rows: u64,
    ) -> Result<(), DriverError>;

    /// Next chunk from the open cursor; `Ok(None)` when exhausted.
    async fn next_chunk(&mut self) -> Result<Option<RowBatch>, DriverError>;
}

/// Opens new connections for the pool.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Connection>, DriverError>;
}
