//! Elimination of structured `try/finally` from function bodies.
//!
//! Every exit path that would skip a finally clause -- normal
//! completion, each catch's completion, exceptional propagation, and
//! non-local `break`/`continue`/`return` -- is rewritten into an
//! explicit sequence that runs the finally code exactly once before
//! control transfers. Jumps are threaded through synthesized return
//! targets ([`ExprKind::ReturnableBlock`]); one target is minted per
//! (try scope, jump) pair and cached, so code growth is linear in the
//! number of distinct jump targets, not in the number of jump sites.
//!
//! After this pass no `Try` node carries a finally clause.

use rustc_hash::FxHashMap;

use tern_common::Span;
use tern_ir::{
    fresh_copy, Builtins, Catch, Expr, ExprKind, FuncId, Function, HoleId, IdGen, LoopId, Module,
    Ty,
};

use crate::error::LowerError;

// ── Entry points ─────────────────────────────────────────────────────

/// Run the pass over every function in `module`, in place.
pub fn eliminate_finally(module: &mut Module, builtins: &Builtins) -> Result<(), LowerError> {
    let mut functions = std::mem::take(&mut module.functions);
    let result = functions
        .iter_mut()
        .try_for_each(|func| lower_function(func, &mut module.ids, builtins));
    module.functions = functions;
    result
}

/// Lower a single function body in place.
///
/// The scope stack and temporary counter are per-invocation state:
/// every call starts from a fresh context, and nested closures
/// reachable from the body are lowered within the same walk.
pub fn lower_function(
    func: &mut Function,
    ids: &mut IdGen,
    builtins: &Builtins,
) -> Result<(), LowerError> {
    let span = func.body.span;
    let body = std::mem::replace(&mut func.body, Expr::unit(span));
    let mut ctx = FunctionLowerer::new(builtins, ids);
    func.body = ctx.lower_body(func.id, body)?;
    Ok(())
}

// ── High-level jumps ─────────────────────────────────────────────────

/// A structured control transfer, identified by kind and target. Two
/// jumps are the same jump -- and share one inlined finally path per
/// try scope -- exactly when kind and target coincide.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
enum Jump {
    Return(FuncId),
    Break(LoopId),
    Continue(LoopId),
}

impl Jump {
    /// Does `scope` satisfy this jump's target?
    fn targets(&self, scope: &Scope) -> bool {
        match (self, scope) {
            (Jump::Return(func), Scope::Function(id)) => func == id,
            (Jump::Break(lp), Scope::Loop(id)) | (Jump::Continue(lp), Scope::Loop(id)) => lp == id,
            _ => false,
        }
    }

    /// Emit the concrete low-level jump carrying `value`.
    fn lower(self, value: Expr, span: Span, never: &Ty) -> Expr {
        match self {
            Jump::Return(target) => Expr::new(
                ExprKind::Return { target, value: Box::new(value) },
                never.clone(),
                span,
            ),
            Jump::Break(loop_id) => Expr::new(
                ExprKind::Block(vec![
                    value,
                    Expr::new(ExprKind::Break(loop_id), never.clone(), span),
                ]),
                never.clone(),
                span,
            ),
            Jump::Continue(loop_id) => Expr::new(
                ExprKind::Block(vec![
                    value,
                    Expr::new(ExprKind::Continue(loop_id), never.clone(), span),
                ]),
                never.clone(),
                span,
            ),
        }
    }

    /// Short name used for synthesized placeholder functions.
    fn label(&self) -> String {
        match self {
            Jump::Return(func) => format!("return_F{}", func.0),
            Jump::Break(lp) => format!("break_L{}", lp.0),
            Jump::Continue(lp) => format!("continue_L{}", lp.0),
        }
    }

    /// Human-readable description for diagnostics.
    fn describe(&self) -> String {
        match self {
            Jump::Return(func) => format!("`return` targeting @F{}", func.0),
            Jump::Break(lp) => format!("`break` targeting @L{}", lp.0),
            Jump::Continue(lp) => format!("`continue` targeting @L{}", lp.0),
        }
    }
}

// ── Scopes ───────────────────────────────────────────────────────────

/// One frame of the lexical scope stack. The stack order is the sole
/// source of truth for which finally blocks lie between a jump and its
/// target.
enum Scope {
    Function(FuncId),
    Loop(LoopId),
    Try(TryScope),
}

/// An active try rewrite.
struct TryScope {
    /// The expression the rewrite will emit for this try. Starts as a
    /// hole and accumulates one inline-finally layer per distinct jump
    /// that crosses the scope; the hole is substituted with the
    /// synthetic outer try when the scope is popped. Only ever moved
    /// and wrapped, never copied, so exactly one hole occurrence
    /// exists.
    pending: Expr,
    hole: HoleId,
    /// The transformed finally clause. Every occurrence of the finally
    /// code in the output is a fresh structural copy of this template.
    finally_template: Expr,
    /// At most one placeholder per distinct jump; a second jump of the
    /// same kind and target reuses the cached entry instead of
    /// re-inlining the finally block.
    jumps: FxHashMap<Jump, PlaceholderFn>,
}

/// A synthesized return target for one (scope, jump) pair. Placeholders
/// never enter the module's function list; each exists only as the
/// label of one returnable block and the target of the returns that
/// resume there.
#[derive(Clone, Debug)]
struct PlaceholderFn {
    id: FuncId,
    #[allow(dead_code)]
    name: String,
    ret_ty: Ty,
}

// ── Per-function transformer ─────────────────────────────────────────

struct FunctionLowerer<'a> {
    builtins: &'a Builtins,
    ids: &'a mut IdGen,
    scopes: Vec<Scope>,
    temp_index: u32,
    next_hole: u32,
}

impl<'a> FunctionLowerer<'a> {
    fn new(builtins: &'a Builtins, ids: &'a mut IdGen) -> Self {
        Self {
            builtins,
            ids,
            scopes: Vec::new(),
            temp_index: 0,
            next_hole: 0,
        }
    }

    fn lower_body(&mut self, func_id: FuncId, body: Expr) -> Result<Expr, LowerError> {
        self.with_scope(Scope::Function(func_id), |ctx| ctx.transform(body))
    }

    fn with_scope<R>(&mut self, scope: Scope, f: impl FnOnce(&mut Self) -> R) -> R {
        self.scopes.push(scope);
        let out = f(self);
        self.scopes.pop();
        out
    }

    // ── Tree walk ────────────────────────────────────────────────────

    fn transform(&mut self, expr: Expr) -> Result<Expr, LowerError> {
        let Expr { kind, ty, span } = expr;
        match kind {
            kind @ (ExprKind::Unit
            | ExprKind::IntLit(_)
            | ExprKind::BoolLit(_)
            | ExprKind::StringLit(_)
            | ExprKind::GetLocal(_)
            | ExprKind::Hole(_)) => Ok(Expr::new(kind, ty, span)),

            ExprKind::Assign { local, value } => {
                let value = self.transform(*value)?;
                Ok(Expr::new(
                    ExprKind::Assign { local, value: Box::new(value) },
                    ty,
                    span,
                ))
            }
            ExprKind::Let { local, name, init } => {
                let init = match init {
                    Some(init) => Some(Box::new(self.transform(*init)?)),
                    None => None,
                };
                Ok(Expr::new(ExprKind::Let { local, name, init }, ty, span))
            }
            ExprKind::Block(stmts) => {
                let stmts = stmts
                    .into_iter()
                    .map(|stmt| self.transform(stmt))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Expr::new(ExprKind::Block(stmts), ty, span))
            }
            ExprKind::Call { func, args } => {
                let args = args
                    .into_iter()
                    .map(|arg| self.transform(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Expr::new(ExprKind::Call { func, args }, ty, span))
            }
            ExprKind::If {
                cond,
                then_body,
                else_body,
            } => {
                let cond = self.transform(*cond)?;
                let then_body = self.transform(*then_body)?;
                let else_body = self.transform(*else_body)?;
                Ok(Expr::new(
                    ExprKind::If {
                        cond: Box::new(cond),
                        then_body: Box::new(then_body),
                        else_body: Box::new(else_body),
                    },
                    ty,
                    span,
                ))
            }
            ExprKind::Throw(value) => {
                let value = self.transform(*value)?;
                Ok(Expr::new(ExprKind::Throw(Box::new(value)), ty, span))
            }

            ExprKind::While { loop_id, cond, body } => {
                self.with_scope(Scope::Loop(loop_id), |ctx| {
                    let cond = ctx.transform(*cond)?;
                    let body = ctx.transform(*body)?;
                    Ok(Expr::new(
                        ExprKind::While {
                            loop_id,
                            cond: Box::new(cond),
                            body: Box::new(body),
                        },
                        ty,
                        span,
                    ))
                })
            }
            ExprKind::Closure(func) => {
                let Function {
                    id,
                    name,
                    params,
                    ret_ty,
                    body,
                } = *func;
                let body = self.with_scope(Scope::Function(id), |ctx| ctx.transform(body))?;
                Ok(Expr::new(
                    ExprKind::Closure(Box::new(Function {
                        id,
                        name,
                        params,
                        ret_ty,
                        body,
                    })),
                    ty,
                    span,
                ))
            }
            ExprKind::ReturnableBlock { target, body } => {
                // An inline body is a return target like any function.
                let body = self.with_scope(Scope::Function(target), |ctx| {
                    body.into_iter()
                        .map(|stmt| ctx.transform(stmt))
                        .collect::<Result<Vec<_>, _>>()
                })?;
                Ok(Expr::new(ExprKind::ReturnableBlock { target, body }, ty, span))
            }

            ExprKind::Break(loop_id) => {
                let jump = Jump::Break(loop_id);
                let tries = self.intervening_tries(&jump, span)?;
                if tries.is_empty() {
                    return Ok(Expr::new(ExprKind::Break(loop_id), ty, span));
                }
                let value = self.builtins.unit_expr(span);
                self.thread_jump(&tries, 0, jump, value, span)
            }
            ExprKind::Continue(loop_id) => {
                let jump = Jump::Continue(loop_id);
                let tries = self.intervening_tries(&jump, span)?;
                if tries.is_empty() {
                    return Ok(Expr::new(ExprKind::Continue(loop_id), ty, span));
                }
                let value = self.builtins.unit_expr(span);
                self.thread_jump(&tries, 0, jump, value, span)
            }
            ExprKind::Return { target, value } => {
                let value = self.transform(*value)?;
                let jump = Jump::Return(target);
                let tries = self.intervening_tries(&jump, span)?;
                if tries.is_empty() {
                    return Ok(Expr::new(
                        ExprKind::Return { target, value: Box::new(value) },
                        ty,
                        span,
                    ));
                }
                self.thread_jump(&tries, 0, jump, value, span)
            }

            ExprKind::Try {
                body,
                catches,
                finally,
            } => match finally {
                Some(finally) => self.lower_try(*body, catches, *finally, ty, span),
                None => {
                    let body = self.transform(*body)?;
                    let mut lowered = Vec::with_capacity(catches.len());
                    for catch in catches {
                        let Catch {
                            param,
                            param_name,
                            param_ty,
                            body,
                            span: catch_span,
                        } = catch;
                        lowered.push(Catch {
                            param,
                            param_name,
                            param_ty,
                            body: self.transform(body)?,
                            span: catch_span,
                        });
                    }
                    Ok(Expr::new(
                        ExprKind::Try {
                            body: Box::new(body),
                            catches: lowered,
                            finally: None,
                        },
                        ty,
                        span,
                    ))
                }
            },
        }
    }

    // ── Jump threading ───────────────────────────────────────────────

    /// Indices (innermost first) of the try scopes strictly between the
    /// jump site and its target frame. Fails when the target is nowhere
    /// on the stack.
    fn intervening_tries(&self, jump: &Jump, span: Span) -> Result<Vec<usize>, LowerError> {
        let mut tries = Vec::new();
        for (idx, scope) in self.scopes.iter().enumerate().rev() {
            if jump.targets(scope) {
                return Ok(tries);
            }
            if matches!(scope, Scope::Try(_)) {
                tries.push(idx);
            }
        }
        Err(LowerError::UnresolvedJumpTarget {
            jump: jump.describe(),
            span,
        })
    }

    /// Thread `jump` carrying `value` through the try scopes at
    /// `tries[pos..]`, inlining each scope's finally block at most once
    /// per distinct jump.
    fn thread_jump(
        &mut self,
        tries: &[usize],
        pos: usize,
        jump: Jump,
        value: Expr,
        span: Span,
    ) -> Result<Expr, LowerError> {
        let Some(&idx) = tries.get(pos) else {
            // Past the outermost intervening scope: emit the literal jump.
            return Ok(jump.lower(value, span, &self.builtins.never));
        };

        let cached = self.try_scope_mut(idx).jumps.get(&jump).map(|ph| ph.id);
        if let Some(target) = cached {
            return Ok(self.resume_with(target, value, span));
        }

        // First time this jump crosses this scope: inline one copy of
        // the finally block and thread the continuation through the
        // remaining outer scopes.
        let placeholder = PlaceholderFn {
            id: self.ids.fresh_func(),
            name: jump.label(),
            ret_ty: value.ty.clone(),
        };
        let (pending, template) = {
            let scope = self.try_scope_mut(idx);
            let pending = std::mem::replace(&mut scope.pending, Expr::unit(span));
            (pending, scope.finally_template.clone())
        };
        let inlined = self.inline_finally(&placeholder, pending, &template, span);
        let threaded = self.thread_jump(tries, pos + 1, jump, inlined, span)?;
        let scope = self.try_scope_mut(idx);
        scope.pending = threaded;
        scope.jumps.insert(jump, placeholder.clone());
        Ok(self.resume_with(placeholder.id, value, span))
    }

    /// `return` into a synthesized placeholder: resume at its inline
    /// body after any pending cleanup has run.
    fn resume_with(&self, target: FuncId, value: Expr, span: Span) -> Expr {
        Expr::new(
            ExprKind::Return { target, value: Box::new(value) },
            self.builtins.never.clone(),
            span,
        )
    }

    /// Build the inline expansion of one finally execution: run `value`
    /// inside a returnable block labeled by `placeholder`, then a fresh
    /// copy of the finally code, then -- for value-carrying types --
    /// read back the temporary holding the result.
    fn inline_finally(
        &mut self,
        placeholder: &PlaceholderFn,
        value: Expr,
        finally: &Expr,
        span: Span,
    ) -> Expr {
        let ret_ty = placeholder.ret_ty.clone();
        let finally_copy = fresh_copy(finally, self.ids);
        if ret_ty.carries_value() {
            let tmp = self.ids.fresh_local();
            let tmp_name = format!("tmp{}", self.temp_index);
            self.temp_index += 1;
            let inline = Expr::new(
                ExprKind::ReturnableBlock {
                    target: placeholder.id,
                    body: vec![self.resume_with(placeholder.id, value, span)],
                },
                ret_ty.clone(),
                span,
            );
            let decl = Expr::new(
                ExprKind::Let {
                    local: tmp,
                    name: tmp_name,
                    init: Some(Box::new(inline)),
                },
                self.builtins.unit.clone(),
                span,
            );
            let read = Expr::new(ExprKind::GetLocal(tmp), ret_ty.clone(), span);
            Expr::new(ExprKind::Block(vec![decl, finally_copy, read]), ret_ty, span)
        } else {
            let inline = Expr::new(
                ExprKind::ReturnableBlock {
                    target: placeholder.id,
                    body: vec![value],
                },
                ret_ty.clone(),
                span,
            );
            Expr::new(ExprKind::Block(vec![inline, finally_copy]), ret_ty, span)
        }
    }

    // ── Try rewrite ──────────────────────────────────────────────────

    /// Rewrite `try { body } catch ... finally { f }` so that every
    /// exit runs one fresh copy of `f`. Normal completion is modeled as
    /// a jump to a fallthrough placeholder, so it shares the once-only
    /// inlining discipline of every other exit.
    fn lower_try(
        &mut self,
        body: Expr,
        catches: Vec<Catch>,
        finally: Expr,
        ty: Ty,
        span: Span,
    ) -> Result<Expr, LowerError> {
        // Jumps inside the finally clause belong to the enclosing
        // scopes, so it is transformed before the new scope is pushed.
        let finally_template = self.transform(finally)?;

        let hole = HoleId(self.next_hole);
        self.next_hole += 1;
        self.scopes.push(Scope::Try(TryScope {
            pending: Expr::new(ExprKind::Hole(hole), self.builtins.never.clone(), span),
            hole,
            finally_template,
            jumps: FxHashMap::default(),
        }));

        let fall_through = PlaceholderFn {
            id: self.ids.fresh_func(),
            name: "fallthrough".to_string(),
            ret_ty: ty,
        };

        let parts = self.lower_try_parts(body, catches, &fall_through);
        let scope = match self.scopes.pop() {
            Some(Scope::Try(scope)) => scope,
            _ => return Err(LowerError::DanglingRewrite { span }),
        };
        let (body, catches) = parts?;
        let TryScope {
            mut pending,
            hole,
            finally_template,
            ..
        } = scope;

        // Synthetic outer try: one finally copy on the exceptional
        // path, rethrowing after it runs.
        let caught = self.ids.fresh_local();
        let throwable = self.builtins.throwable.clone();
        let never = self.builtins.never.clone();
        let rethrow = Expr::new(
            ExprKind::Throw(Box::new(Expr::new(
                ExprKind::GetLocal(caught),
                throwable.clone(),
                span,
            ))),
            never.clone(),
            span,
        );
        let catch_all = Catch {
            param: caught,
            param_name: "t".to_string(),
            param_ty: throwable,
            body: Expr::new(
                ExprKind::Block(vec![fresh_copy(&finally_template, self.ids), rethrow]),
                never.clone(),
                span,
            ),
            span,
        };
        let inner_try = Expr::new(
            ExprKind::Try {
                body: Box::new(body),
                catches,
                finally: None,
            },
            never.clone(),
            span,
        );
        let synthetic = Expr::new(
            ExprKind::Try {
                body: Box::new(inner_try),
                catches: vec![catch_all],
                finally: None,
            },
            never,
            span,
        );

        if !fill_hole(&mut pending, hole, synthetic) {
            return Err(LowerError::DanglingRewrite { span });
        }

        Ok(self.inline_finally(&fall_through, pending, &finally_template, span))
    }

    /// Transform the try body and catches inside the active try scope,
    /// routing each one's result into the fallthrough placeholder.
    fn lower_try_parts(
        &mut self,
        body: Expr,
        catches: Vec<Catch>,
        fall_through: &PlaceholderFn,
    ) -> Result<(Expr, Vec<Catch>), LowerError> {
        let body = self.transform(body)?;
        let body_span = body.span;
        let body = self.resume_with(fall_through.id, body, body_span);

        let mut lowered = Vec::with_capacity(catches.len());
        for catch in catches {
            let Catch {
                param,
                param_name,
                param_ty,
                body,
                span,
            } = catch;
            let body = self.transform(body)?;
            let body_span = body.span;
            let body = self.resume_with(fall_through.id, body, body_span);
            lowered.push(Catch {
                param,
                param_name,
                param_ty,
                body,
                span,
            });
        }
        Ok((body, lowered))
    }

    fn try_scope_mut(&mut self, idx: usize) -> &mut TryScope {
        match &mut self.scopes[idx] {
            Scope::Try(scope) => scope,
            _ => unreachable!("scope index {idx} is not a try scope"),
        }
    }
}

// ── Hole substitution ────────────────────────────────────────────────

/// Substitute `replacement` for the unique `Hole(hole)` inside `expr`.
/// Returns false if the hole was not found.
fn fill_hole(expr: &mut Expr, hole: HoleId, replacement: Expr) -> bool {
    let mut slot = Some(replacement);
    fill_hole_inner(expr, hole, &mut slot);
    slot.is_none()
}

fn fill_hole_inner(expr: &mut Expr, hole: HoleId, slot: &mut Option<Expr>) {
    if slot.is_none() {
        return;
    }
    if matches!(expr.kind, ExprKind::Hole(h) if h == hole) {
        if let Some(replacement) = slot.take() {
            *expr = replacement;
        }
        return;
    }
    for child in expr.children_mut() {
        fill_hole_inner(child, hole, slot);
        if slot.is_none() {
            return;
        }
    }
}
