//! Shared leaf types for the Tern compiler crates.

pub mod span;

pub use span::Span;
