//! Lowering passes for the Tern IR.
//!
//! Currently one pass lives here: structured `try/finally` elimination
//! ([`finally::eliminate_finally`]), which rewrites every exit path
//! crossing a finally clause into an explicit sequence that runs the
//! cleanup code before control transfers. Later phases can assume that
//! no `Try` node carries a finally clause.

pub mod diagnostics;
pub mod error;
pub mod finally;

pub use error::LowerError;
pub use finally::{eliminate_finally, lower_function};
