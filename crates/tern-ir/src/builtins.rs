//! Well-known type registration and lookup.
//!
//! The symbol table maps names to types the way the front end left
//! them. Lowering passes do not care about most of it; they resolve the
//! handful of well-known entries they need once, up front, through
//! [`Builtins::resolve`], and treat the results as immutable constants
//! for the duration of the run.

use std::fmt;

use rustc_hash::FxHashMap;

use crate::expr::Expr;
use crate::ty::Ty;
use tern_common::Span;

/// Name-keyed table of resolved types.
#[derive(Clone, Debug, Default)]
pub struct SymbolTable {
    types: FxHashMap<String, Ty>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A table pre-populated with the well-known names every checked
    /// module can rely on:
    /// - `Unit` -- the no-value type (the empty tuple)
    /// - `Never` -- the bottom type of diverging expressions
    /// - `Throwable` -- the base type of everything that can be thrown
    /// - the primitive value types `Int`, `Bool`, `String`
    pub fn with_defaults() -> Self {
        let mut table = Self::new();
        table.insert("Unit", Ty::unit());
        table.insert("Never", Ty::Never);
        table.insert("Throwable", Ty::con("Throwable"));
        table.insert("Int", Ty::int());
        table.insert("Bool", Ty::bool());
        table.insert("String", Ty::string());
        table
    }

    pub fn insert(&mut self, name: impl Into<String>, ty: Ty) {
        self.types.insert(name.into(), ty);
    }

    pub fn lookup(&self, name: &str) -> Option<&Ty> {
        self.types.get(name)
    }
}

/// The well-known types a lowering pass needs to synthesize nodes.
#[derive(Clone, Debug)]
pub struct Builtins {
    /// The no-value type; also the type of the synthesized unit constant.
    pub unit: Ty,
    /// The bottom type given to synthesized jumps.
    pub never: Ty,
    /// The base type bound by synthesized catch-all clauses.
    pub throwable: Ty,
}

impl Builtins {
    /// Resolve the well-known names from `table`. Fails fast on the
    /// first missing entry; a table without these names cannot have
    /// come from a completed front end.
    pub fn resolve(table: &SymbolTable) -> Result<Builtins, BuiltinsError> {
        let lookup = |name: &str| -> Result<Ty, BuiltinsError> {
            table
                .lookup(name)
                .cloned()
                .ok_or_else(|| BuiltinsError::Missing { name: name.to_string() })
        };
        Ok(Builtins {
            unit: lookup("Unit")?,
            never: lookup("Never")?,
            throwable: lookup("Throwable")?,
        })
    }

    /// The unit constant as an expression.
    pub fn unit_expr(&self, span: Span) -> Expr {
        Expr::new(crate::expr::ExprKind::Unit, self.unit.clone(), span)
    }
}

/// Failure to resolve a well-known symbol at pass initialization.
#[derive(Clone, Debug, PartialEq)]
pub enum BuiltinsError {
    Missing { name: String },
}

impl fmt::Display for BuiltinsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuiltinsError::Missing { name } => {
                write!(f, "well-known symbol `{}` is not registered", name)
            }
        }
    }
}

impl std::error::Error for BuiltinsError {}
