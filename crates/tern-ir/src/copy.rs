//! Structural deep copy with fresh declarations.
//!
//! [`fresh_copy`] clones a subtree and re-mints the identity of every
//! declaration *inside* it: locals introduced by `Let` and catch
//! parameters, loop ids, and the function ids of nested closures and
//! returnable blocks. References to those declarations are rewritten to
//! the fresh ids; references to ids declared outside the subtree are
//! preserved. The result shares nothing with the original, so a rewrite
//! may insert copies of one template at several points of a tree
//! without ever aliasing a node.

use rustc_hash::FxHashMap;

use crate::expr::{Catch, Expr, ExprKind, FuncId, Function, IdGen, LocalId, LoopId, Param};

/// Clone `expr`, re-minting every declaration inside the subtree.
pub fn fresh_copy(expr: &Expr, ids: &mut IdGen) -> Expr {
    Copier {
        ids,
        locals: FxHashMap::default(),
        loops: FxHashMap::default(),
        funcs: FxHashMap::default(),
    }
    .copy_expr(expr)
}

struct Copier<'a> {
    ids: &'a mut IdGen,
    locals: FxHashMap<LocalId, LocalId>,
    loops: FxHashMap<LoopId, LoopId>,
    funcs: FxHashMap<FuncId, FuncId>,
}

impl Copier<'_> {
    fn copy_expr(&mut self, expr: &Expr) -> Expr {
        let kind = match &expr.kind {
            ExprKind::Unit => ExprKind::Unit,
            ExprKind::IntLit(v) => ExprKind::IntLit(*v),
            ExprKind::BoolLit(b) => ExprKind::BoolLit(*b),
            ExprKind::StringLit(s) => ExprKind::StringLit(s.clone()),
            ExprKind::Hole(h) => ExprKind::Hole(*h),
            ExprKind::GetLocal(local) => ExprKind::GetLocal(self.local_ref(*local)),
            ExprKind::Assign { local, value } => ExprKind::Assign {
                local: self.local_ref(*local),
                value: Box::new(self.copy_expr(value)),
            },
            ExprKind::Let { local, name, init } => {
                let fresh = self.declare_local(*local);
                ExprKind::Let {
                    local: fresh,
                    name: name.clone(),
                    init: init.as_ref().map(|e| Box::new(self.copy_expr(e))),
                }
            }
            ExprKind::Block(stmts) => {
                ExprKind::Block(stmts.iter().map(|e| self.copy_expr(e)).collect())
            }
            ExprKind::Call { func, args } => ExprKind::Call {
                func: func.clone(),
                args: args.iter().map(|e| self.copy_expr(e)).collect(),
            },
            ExprKind::If {
                cond,
                then_body,
                else_body,
            } => ExprKind::If {
                cond: Box::new(self.copy_expr(cond)),
                then_body: Box::new(self.copy_expr(then_body)),
                else_body: Box::new(self.copy_expr(else_body)),
            },
            ExprKind::While { loop_id, cond, body } => {
                let fresh = self.declare_loop(*loop_id);
                ExprKind::While {
                    loop_id: fresh,
                    cond: Box::new(self.copy_expr(cond)),
                    body: Box::new(self.copy_expr(body)),
                }
            }
            ExprKind::Break(loop_id) => ExprKind::Break(self.loop_ref(*loop_id)),
            ExprKind::Continue(loop_id) => ExprKind::Continue(self.loop_ref(*loop_id)),
            ExprKind::Return { target, value } => ExprKind::Return {
                target: self.func_ref(*target),
                value: Box::new(self.copy_expr(value)),
            },
            ExprKind::Throw(value) => ExprKind::Throw(Box::new(self.copy_expr(value))),
            ExprKind::Try {
                body,
                catches,
                finally,
            } => ExprKind::Try {
                body: Box::new(self.copy_expr(body)),
                catches: catches.iter().map(|c| self.copy_catch(c)).collect(),
                finally: finally.as_ref().map(|e| Box::new(self.copy_expr(e))),
            },
            ExprKind::Closure(func) => ExprKind::Closure(Box::new(self.copy_function(func))),
            ExprKind::ReturnableBlock { target, body } => {
                let fresh = self.declare_func(*target);
                ExprKind::ReturnableBlock {
                    target: fresh,
                    body: body.iter().map(|e| self.copy_expr(e)).collect(),
                }
            }
        };
        Expr::new(kind, expr.ty.clone(), expr.span)
    }

    fn copy_catch(&mut self, catch: &Catch) -> Catch {
        let param = self.declare_local(catch.param);
        Catch {
            param,
            param_name: catch.param_name.clone(),
            param_ty: catch.param_ty.clone(),
            body: self.copy_expr(&catch.body),
            span: catch.span,
        }
    }

    fn copy_function(&mut self, func: &Function) -> Function {
        let id = self.declare_func(func.id);
        let params = func
            .params
            .iter()
            .map(|p| Param {
                local: self.declare_local(p.local),
                name: p.name.clone(),
                ty: p.ty.clone(),
            })
            .collect();
        Function {
            id,
            name: func.name.clone(),
            params,
            ret_ty: func.ret_ty.clone(),
            body: self.copy_expr(&func.body),
        }
    }

    fn declare_local(&mut self, old: LocalId) -> LocalId {
        let fresh = self.ids.fresh_local();
        self.locals.insert(old, fresh);
        fresh
    }

    fn declare_loop(&mut self, old: LoopId) -> LoopId {
        let fresh = self.ids.fresh_loop();
        self.loops.insert(old, fresh);
        fresh
    }

    fn declare_func(&mut self, old: FuncId) -> FuncId {
        let fresh = self.ids.fresh_func();
        self.funcs.insert(old, fresh);
        fresh
    }

    fn local_ref(&self, old: LocalId) -> LocalId {
        self.locals.get(&old).copied().unwrap_or(old)
    }

    fn loop_ref(&self, old: LoopId) -> LoopId {
        self.loops.get(&old).copied().unwrap_or(old)
    }

    fn func_ref(&self, old: FuncId) -> FuncId {
        self.funcs.get(&old).copied().unwrap_or(old)
    }
}
