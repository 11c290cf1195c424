//! SQL dialect definitions and formatting rules.
//!
//! This module provides a trait-based abstraction for SQL dialect
//! differences. Each dialect implements `SqlDialect` to handle its
//! specific syntax:
//!
//! - Bind placeholders: `?` (DuckDB) vs `:p1, :p2, ...` (Oracle)
//! - Pagination: LIMIT/OFFSET vs OFFSET FETCH
//! - Capability flags the renderer consults before emitting a construct
//!
//! # Usage
//!
//! ```ignore
//! use tabula::sql::{Dialect, SqlDialect};
//!
//! let dialect = Dialect::Oracle;
//! let ph = dialect.placeholder(0);  // :p1
//! ```

mod duckdb;
pub mod helpers;
mod oracle;

pub use duckdb::DuckDb;
pub use oracle::Oracle;

use super::token::{Token, TokenStream};

/// SQL dialect trait - defines how SQL constructs are rendered.
///
/// The default implementations follow ANSI SQL where possible.
pub trait SqlDialect: std::fmt::Debug {
    /// Dialect name for display/logging.
    fn name(&self) -> &'static str;

    // =========================================================================
    // Identifier Quoting
    // =========================================================================

    /// Quote an identifier (table, column, alias).
    ///
    /// Both supported dialects use ANSI double quotes.
    fn quote_identifier(&self, ident: &str) -> String;

    // =========================================================================
    // Bind Placeholders
    // =========================================================================

    /// Placeholder text for the bind at zero-based `position` in the
    /// statement, counted in order of appearance.
    ///
    /// - DuckDB: `?`
    /// - Oracle: `:p1`, `:p2`, ...
    fn placeholder(&self, position: usize) -> String {
        let _ = position;
        "?".into()
    }

    // =========================================================================
    // Pagination
    // =========================================================================

    /// Emit LIMIT/OFFSET or equivalent pagination clause.
    ///
    /// - DuckDB: `LIMIT n OFFSET m` (default)
    /// - Oracle: `OFFSET m ROWS FETCH NEXT n ROWS ONLY` (override)
    fn emit_limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> TokenStream {
        let mut ts = TokenStream::new();

        if let Some(lim) = limit {
            ts.push(Token::Limit)
                .space()
                .push(Token::LitInt(lim as i64));
        }

        if let Some(off) = offset {
            if limit.is_some() {
                ts.space();
            }
            ts.push(Token::Offset)
                .space()
                .push(Token::LitInt(off as i64));
        }

        ts
    }

    // =========================================================================
    // Capabilities
    // =========================================================================

    /// Whether this dialect supports FULL OUTER JOIN.
    fn supports_full_outer_join(&self) -> bool {
        true
    }

    /// Whether this dialect can answer a cardinality probe (EXPLAIN-style)
    /// before execution.
    fn supports_cost_estimation(&self) -> bool {
        false
    }

    /// Whether a boolean value can be bound into a comparison predicate.
    ///
    /// Oracle has no SQL-level BOOLEAN type in the versions the
    /// warehouses run, so boolean binds are rejected during rendering.
    fn supports_boolean_predicates(&self) -> bool {
        true
    }
}

/// Supported SQL dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    #[default]
    DuckDb,
    Oracle,
}

impl Dialect {
    /// Get the dialect implementation.
    pub fn dialect(&self) -> &'static dyn SqlDialect {
        match self {
            Dialect::DuckDb => &DuckDb,
            Dialect::Oracle => &Oracle,
        }
    }
}

// Implement SqlDialect for Dialect enum by delegating to concrete types
impl SqlDialect for Dialect {
    fn name(&self) -> &'static str {
        self.dialect().name()
    }

    fn quote_identifier(&self, ident: &str) -> String {
        self.dialect().quote_identifier(ident)
    }

    fn placeholder(&self, position: usize) -> String {
        self.dialect().placeholder(position)
    }

    fn emit_limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> TokenStream {
        self.dialect().emit_limit_offset(limit, offset)
    }

    fn supports_full_outer_join(&self) -> bool {
        self.dialect().supports_full_outer_join()
    }

    fn supports_cost_estimation(&self) -> bool {
        self.dialect().supports_cost_estimation()
    }

    fn supports_boolean_predicates(&self) -> bool {
        self.dialect().supports_boolean_predicates()
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.dialect().name())
    }
}

impl std::str::FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "duckdb" => Ok(Dialect::DuckDb),
            "oracle" => Ok(Dialect::Oracle),
            other => Err(format!("unknown dialect '{}'", other)),
        }
    }
}
