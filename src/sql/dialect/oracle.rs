//! Oracle dialect.
//!
//! Oracle has significant differences from ANSI:
//! - Named bind placeholders (`:p1`, `:p2`, ...)
//! - OFFSET/FETCH pagination (12c+), no LIMIT keyword
//! - No SQL-level BOOLEAN type, so boolean binds are rejected
//! - EXPLAIN PLAN gives a pre-execution cardinality estimate
//!
//! Oracle is the enterprise-warehouse target and the reason the governor
//! runs a cost probe before admitting a query.

use super::helpers;
use super::SqlDialect;
use crate::sql::token::TokenStream;

/// Oracle dialect.
#[derive(Debug, Clone, Copy)]
pub struct Oracle;

impl SqlDialect for Oracle {
    fn name(&self) -> &'static str {
        "oracle"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn placeholder(&self, position: usize) -> String {
        format!(":p{}", position + 1)
    }

    fn emit_limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> TokenStream {
        helpers::emit_offset_fetch(limit, offset)
    }

    fn supports_cost_estimation(&self) -> bool {
        true
    }

    fn supports_boolean_predicates(&self) -> bool {
        false
    }
}
