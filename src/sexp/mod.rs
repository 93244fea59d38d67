//! R expression trees.
//!
//! Expressions arrive as the single `DT_SEXP` parameter of an eval
//! response and decode into a [`Sexp`] tree. All nodes parsed from one
//! response share that response's payload buffer; the buffer is released
//! when the last node referencing it is dropped.

mod node;
mod parse;

pub use node::{RList, RListIter, RStrings, Sexp, SexpKind};
pub use parse::{parse_at, parse_sexp};
