//! Shared helper functions for dialect implementations.

use crate::sql::token::{Token, TokenStream};

/// Quote with double quotes (ANSI style): `"identifier"`.
/// Embedded double quotes are doubled.
pub fn quote_double(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Oracle/SQL-standard pagination: `OFFSET m ROWS FETCH NEXT n ROWS ONLY`.
///
/// The OFFSET clause is always emitted when a FETCH is, since FETCH
/// without OFFSET is valid but an explicit zero keeps output uniform.
pub fn emit_offset_fetch(limit: Option<u64>, offset: Option<u64>) -> TokenStream {
    let mut ts = TokenStream::new();

    if limit.is_none() && offset.is_none() {
        return ts;
    }

    let off = offset.unwrap_or(0);
    ts.push(Token::Offset)
        .space()
        .push(Token::LitInt(off as i64))
        .space()
        .push(Token::Rows);

    if let Some(lim) = limit {
        ts.space()
            .push(Token::Fetch)
            .space()
            .push(Token::Next)
            .space()
            .push(Token::LitInt(lim as i64))
            .space()
            .push(Token::Rows)
            .space()
            .push(Token::Only);
    }

    ts
}
