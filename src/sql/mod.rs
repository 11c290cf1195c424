//! SQL generation: token streams, dialects, and the plan renderer.
//!
//! The renderer turns an [`crate::plan::ExecutionPlan`] into a
//! [`render::SqlStatement`] for one dialect. All dynamic values travel as
//! ordered binds next to the text; the token layer has no way to inline
//! a literal operand.

pub mod dialect;
pub mod render;
pub mod token;

pub use dialect::{Dialect, SqlDialect};
pub use render::{render, render_count, SqlStatement};
pub use token::{Token, TokenStream};
