//! The IR expression tree.
//!
//! Function bodies are trees of [`Expr`] nodes. Each node carries its
//! result type and source span. Control-flow targets (functions, loops,
//! locals) are identified by id newtypes, never by name: two loops with
//! the same source text are still distinct jump targets.

use tern_common::Span;

use crate::ty::Ty;

// ── Identities ───────────────────────────────────────────────────────

/// Identity of a function or lambda body. `Return` nodes name the
/// function they exit via this id. Lowering passes also mint ids of
/// this kind for synthesized return targets (returnable blocks).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct FuncId(pub u32);

/// Identity of a loop; `Break`/`Continue` name their target via this id.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct LoopId(pub u32);

/// Identity of a local variable slot.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct LocalId(pub u32);

/// Identity of a transient rewrite placeholder (see [`ExprKind::Hole`]).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct HoleId(pub u32);

/// Allocator for fresh ids. A module owns one generator so that ids
/// synthesized during lowering never collide with ids already in use.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IdGen {
    next_func: u32,
    next_loop: u32,
    next_local: u32,
}

impl IdGen {
    pub fn fresh_func(&mut self) -> FuncId {
        let id = FuncId(self.next_func);
        self.next_func += 1;
        id
    }

    pub fn fresh_loop(&mut self) -> LoopId {
        let id = LoopId(self.next_loop);
        self.next_loop += 1;
        id
    }

    pub fn fresh_local(&mut self) -> LocalId {
        let id = LocalId(self.next_local);
        self.next_local += 1;
        id
    }
}

// ── Expressions ──────────────────────────────────────────────────────

/// An IR expression node.
#[derive(Clone, Debug, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: Ty,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, ty: Ty, span: Span) -> Self {
        Self { kind, ty, span }
    }

    /// The unit value.
    pub fn unit(span: Span) -> Self {
        Self::new(ExprKind::Unit, Ty::unit(), span)
    }

    pub fn int(value: i64, span: Span) -> Self {
        Self::new(ExprKind::IntLit(value), Ty::int(), span)
    }

    pub fn block(stmts: Vec<Expr>, ty: Ty, span: Span) -> Self {
        Self::new(ExprKind::Block(stmts), ty, span)
    }

    /// Pre-order visit of this node and every node below it, including
    /// catch bodies and nested function bodies.
    pub fn for_each(&self, f: &mut impl FnMut(&Expr)) {
        f(self);
        match &self.kind {
            ExprKind::Unit
            | ExprKind::IntLit(_)
            | ExprKind::BoolLit(_)
            | ExprKind::StringLit(_)
            | ExprKind::GetLocal(_)
            | ExprKind::Break(_)
            | ExprKind::Continue(_)
            | ExprKind::Hole(_) => {}
            ExprKind::Assign { value, .. } => value.for_each(f),
            ExprKind::Let { init, .. } => {
                if let Some(init) = init {
                    init.for_each(f);
                }
            }
            ExprKind::Block(stmts) => {
                for stmt in stmts {
                    stmt.for_each(f);
                }
            }
            ExprKind::Call { args, .. } => {
                for arg in args {
                    arg.for_each(f);
                }
            }
            ExprKind::If {
                cond,
                then_body,
                else_body,
            } => {
                cond.for_each(f);
                then_body.for_each(f);
                else_body.for_each(f);
            }
            ExprKind::While { cond, body, .. } => {
                cond.for_each(f);
                body.for_each(f);
            }
            ExprKind::Return { value, .. } => value.for_each(f),
            ExprKind::Throw(value) => value.for_each(f),
            ExprKind::Try {
                body,
                catches,
                finally,
            } => {
                body.for_each(f);
                for catch in catches {
                    catch.body.for_each(f);
                }
                if let Some(finally) = finally {
                    finally.for_each(f);
                }
            }
            ExprKind::Closure(func) => func.body.for_each(f),
            ExprKind::ReturnableBlock { body, .. } => {
                for stmt in body {
                    stmt.for_each(f);
                }
            }
        }
    }

    /// Mutable references to the direct child expressions of this node.
    pub fn children_mut(&mut self) -> Vec<&mut Expr> {
        match &mut self.kind {
            ExprKind::Unit
            | ExprKind::IntLit(_)
            | ExprKind::BoolLit(_)
            | ExprKind::StringLit(_)
            | ExprKind::GetLocal(_)
            | ExprKind::Break(_)
            | ExprKind::Continue(_)
            | ExprKind::Hole(_) => Vec::new(),
            ExprKind::Assign { value, .. } => vec![&mut **value],
            ExprKind::Let { init, .. } => init.iter_mut().map(|e| &mut **e).collect(),
            ExprKind::Block(stmts) => stmts.iter_mut().collect(),
            ExprKind::Call { args, .. } => args.iter_mut().collect(),
            ExprKind::If {
                cond,
                then_body,
                else_body,
            } => vec![&mut **cond, &mut **then_body, &mut **else_body],
            ExprKind::While { cond, body, .. } => vec![&mut **cond, &mut **body],
            ExprKind::Return { value, .. } => vec![&mut **value],
            ExprKind::Throw(value) => vec![&mut **value],
            ExprKind::Try {
                body,
                catches,
                finally,
            } => {
                let mut children: Vec<&mut Expr> = vec![&mut **body];
                children.extend(catches.iter_mut().map(|c| &mut c.body));
                children.extend(finally.iter_mut().map(|e| &mut **e));
                children
            }
            ExprKind::Closure(func) => vec![&mut func.body],
            ExprKind::ReturnableBlock { body, .. } => body.iter_mut().collect(),
        }
    }
}

/// The shape of an [`Expr`].
#[derive(Clone, Debug, PartialEq)]
pub enum ExprKind {
    /// The unit value.
    Unit,
    IntLit(i64),
    BoolLit(bool),
    StringLit(String),
    /// Read a local variable.
    GetLocal(LocalId),
    /// Assign to a local variable; the expression itself is unit.
    Assign { local: LocalId, value: Box<Expr> },
    /// Declare a local variable, optionally with an initializer. The
    /// declaration is a statement; the expression itself is unit.
    Let {
        local: LocalId,
        name: String,
        init: Option<Box<Expr>>,
    },
    /// A sequence of expressions; the block's value is the last one's.
    Block(Vec<Expr>),
    /// Direct call to a function by symbol name.
    Call { func: String, args: Vec<Expr> },
    If {
        cond: Box<Expr>,
        then_body: Box<Expr>,
        else_body: Box<Expr>,
    },
    While {
        loop_id: LoopId,
        cond: Box<Expr>,
        body: Box<Expr>,
    },
    Break(LoopId),
    Continue(LoopId),
    /// Exit the function (or returnable block) identified by `target`
    /// with `value`.
    Return { target: FuncId, value: Box<Expr> },
    Throw(Box<Expr>),
    Try {
        body: Box<Expr>,
        catches: Vec<Catch>,
        finally: Option<Box<Expr>>,
    },
    /// A nested function or lambda body; `Return`s inside it target the
    /// contained function's id.
    Closure(Box<Function>),
    /// An inline body labeled by a function id: a `Return` targeting
    /// `target` exits this block with the returned value. Lowering
    /// passes use this to express "resume here after pending cleanup".
    ReturnableBlock { target: FuncId, body: Vec<Expr> },
    /// Transient placeholder produced and consumed within a single tree
    /// rewrite. Never present in well-formed input or output trees.
    Hole(HoleId),
}

/// One catch clause of a `Try`.
#[derive(Clone, Debug, PartialEq)]
pub struct Catch {
    pub param: LocalId,
    pub param_name: String,
    pub param_ty: Ty,
    pub body: Expr,
    pub span: Span,
}

// ── Functions and modules ────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub struct Param {
    pub local: LocalId,
    pub name: String,
    pub ty: Ty,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Function {
    pub id: FuncId,
    pub name: String,
    pub params: Vec<Param>,
    pub ret_ty: Ty,
    pub body: Expr,
}

/// A collection of lowered or to-be-lowered functions together with the
/// id generator all of them draw from.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Module {
    pub functions: Vec<Function>,
    pub ids: IdGen,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_function(&mut self, func: Function) {
        self.functions.push(func);
    }

    pub fn get_function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }
}
