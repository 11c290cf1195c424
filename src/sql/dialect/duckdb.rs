//! DuckDB dialect.
//!
//! DuckDB is close to ANSI/PostgreSQL syntax:
//! - Double quote identifier quoting
//! - `?` positional bind placeholders
//! - LIMIT/OFFSET pagination
//! - Native BOOLEAN type
//!
//! DuckDB is the embedded-analytical target; it has no usable
//! pre-execution cardinality probe, so cost estimation is off and the
//! execution timeout is the only brake.

use super::helpers;
use super::SqlDialect;

/// DuckDB dialect.
#[derive(Debug, Clone, Copy)]
pub struct DuckDb;

impl SqlDialect for DuckDb {
    fn name(&self) -> &'static str {
        "duckdb"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    // Defaults: `?` placeholders, LIMIT/OFFSET, no cost estimation,
    // boolean predicates supported.
}
