//! Shared support for the lowering integration tests.
//!
//! Contains a reference evaluator for IR trees plus terse builders for
//! constructing test functions. The evaluator executes both structured
//! trees (finally clauses honored) and lowered trees (no finally left),
//! logging intrinsic calls, so scenario tests can run the same function
//! before and after lowering and compare observable behavior.
//!
//! Conventions: calls to names not defined in the module are intrinsics
//! that append `name(args)` to the log and return unit. Thrown string
//! values carry their "class" as the string tag; a catch clause whose
//! parameter type is `Throwable` catches everything, and one typed
//! `Con(name)` catches thrown strings with a matching tag.

use rustc_hash::FxHashMap;
use tern_common::Span;
use tern_ir::{
    Builtins, Catch, Expr, ExprKind, FuncId, Function, IdGen, LocalId, LoopId, Module, Param,
    SymbolTable, Ty,
};
use tern_lower::eliminate_finally;

// ── Values and control flow ──────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Unit,
    Int(i64),
    Bool(bool),
    Str(String),
}

/// The result of evaluating an expression: either a value, or a
/// control-flow signal still looking for its target.
#[derive(Clone, Debug, PartialEq)]
pub enum Flow {
    Value(Value),
    Returning(FuncId, Value),
    Breaking(LoopId),
    Continuing(LoopId),
    Thrown(Value),
}

macro_rules! eval_value {
    ($self:ident, $expr:expr) => {
        match $self.eval($expr) {
            Flow::Value(v) => v,
            other => return other,
        }
    };
}

// ── Evaluator ────────────────────────────────────────────────────────

pub struct Evaluator<'a> {
    module: &'a Module,
    pub log: Vec<String>,
    locals: FxHashMap<LocalId, Value>,
}

impl<'a> Evaluator<'a> {
    pub fn new(module: &'a Module) -> Self {
        Self {
            module,
            log: Vec::new(),
            locals: FxHashMap::default(),
        }
    }

    /// Call a module function by name. `Flow::Value` is the normal
    /// result; `Flow::Thrown` means the call completed exceptionally.
    pub fn call(&mut self, name: &str, args: &[Value]) -> Flow {
        let func = self
            .module
            .get_function(name)
            .unwrap_or_else(|| panic!("no function named {name}"))
            .clone();
        for (param, arg) in func.params.iter().zip(args) {
            self.locals.insert(param.local, arg.clone());
        }
        match self.eval(&func.body) {
            Flow::Returning(target, value) if target == func.id => Flow::Value(value),
            flow => flow,
        }
    }

    fn eval(&mut self, expr: &Expr) -> Flow {
        match &expr.kind {
            ExprKind::Unit => Flow::Value(Value::Unit),
            ExprKind::IntLit(v) => Flow::Value(Value::Int(*v)),
            ExprKind::BoolLit(b) => Flow::Value(Value::Bool(*b)),
            ExprKind::StringLit(s) => Flow::Value(Value::Str(s.clone())),
            ExprKind::GetLocal(local) => {
                let value = self
                    .locals
                    .get(local)
                    .unwrap_or_else(|| panic!("read of unbound local %{}", local.0))
                    .clone();
                Flow::Value(value)
            }
            ExprKind::Assign { local, value } => {
                let value = eval_value!(self, value);
                self.locals.insert(*local, value);
                Flow::Value(Value::Unit)
            }
            ExprKind::Let { local, init, .. } => {
                let value = match init {
                    Some(init) => eval_value!(self, init),
                    None => Value::Unit,
                };
                self.locals.insert(*local, value);
                Flow::Value(Value::Unit)
            }
            ExprKind::Block(stmts) => {
                let mut last = Value::Unit;
                for stmt in stmts {
                    last = eval_value!(self, stmt);
                }
                Flow::Value(last)
            }
            ExprKind::Call { func, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(eval_value!(self, arg));
                }
                if let Some(callee) = self.module.get_function(func) {
                    let callee = callee.clone();
                    for (param, value) in callee.params.iter().zip(values) {
                        self.locals.insert(param.local, value);
                    }
                    match self.eval(&callee.body) {
                        Flow::Returning(target, value) if target == callee.id => {
                            Flow::Value(value)
                        }
                        flow => flow,
                    }
                } else {
                    let rendered: Vec<String> = values.iter().map(render).collect();
                    self.log.push(format!("{}({})", func, rendered.join(", ")));
                    Flow::Value(Value::Unit)
                }
            }
            ExprKind::If {
                cond,
                then_body,
                else_body,
            } => match eval_value!(self, cond) {
                Value::Bool(true) => self.eval(then_body),
                Value::Bool(false) => self.eval(else_body),
                other => panic!("if condition evaluated to {other:?}"),
            },
            ExprKind::While { loop_id, cond, body } => loop {
                match eval_value!(self, cond) {
                    Value::Bool(true) => {}
                    Value::Bool(false) => return Flow::Value(Value::Unit),
                    other => panic!("while condition evaluated to {other:?}"),
                }
                match self.eval(body) {
                    Flow::Value(_) => {}
                    Flow::Breaking(target) if target == *loop_id => {
                        return Flow::Value(Value::Unit)
                    }
                    Flow::Continuing(target) if target == *loop_id => {}
                    flow => return flow,
                }
            },
            ExprKind::Break(loop_id) => Flow::Breaking(*loop_id),
            ExprKind::Continue(loop_id) => Flow::Continuing(*loop_id),
            ExprKind::Return { target, value } => {
                let value = eval_value!(self, value);
                Flow::Returning(*target, value)
            }
            ExprKind::Throw(value) => {
                let value = eval_value!(self, value);
                Flow::Thrown(value)
            }
            ExprKind::Try {
                body,
                catches,
                finally,
            } => {
                let mut flow = self.eval(body);
                let thrown = match &flow {
                    Flow::Thrown(exc) => Some(exc.clone()),
                    _ => None,
                };
                if let Some(exc) = thrown {
                    for catch in catches {
                        if catch_matches(&catch.param_ty, &exc) {
                            self.locals.insert(catch.param, exc.clone());
                            flow = self.eval(&catch.body);
                            break;
                        }
                    }
                }
                if let Some(finally) = finally {
                    match self.eval(finally) {
                        Flow::Value(_) => {}
                        // A jump out of the finally clause replaces the
                        // pending completion.
                        other => return other,
                    }
                }
                flow
            }
            // Closures are opaque values here; the tests that involve
            // them only assert on structure, never on invocation.
            ExprKind::Closure(_) => Flow::Value(Value::Unit),
            ExprKind::ReturnableBlock { target, body } => {
                let mut last = Value::Unit;
                for stmt in body {
                    match self.eval(stmt) {
                        Flow::Value(v) => last = v,
                        Flow::Returning(t, v) if t == *target => return Flow::Value(v),
                        flow => return flow,
                    }
                }
                Flow::Value(last)
            }
            ExprKind::Hole(hole) => panic!("hole {} survived into an evaluated tree", hole.0),
        }
    }
}

fn catch_matches(param_ty: &Ty, exc: &Value) -> bool {
    if let Ty::Con(con) = param_ty {
        if con.name == "Throwable" {
            return true;
        }
        if let Value::Str(tag) = exc {
            return tag == &con.name;
        }
    }
    false
}

fn render(value: &Value) -> String {
    match value {
        Value::Unit => "()".to_string(),
        Value::Int(v) => v.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Str(s) => s.clone(),
    }
}

// ── Runs ─────────────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
pub struct RunResult {
    pub flow: Flow,
    pub log: Vec<String>,
}

pub fn run(module: &Module, name: &str, args: &[Value]) -> RunResult {
    let mut evaluator = Evaluator::new(module);
    let flow = evaluator.call(name, args);
    RunResult {
        flow,
        log: evaluator.log,
    }
}

pub fn builtins() -> Builtins {
    Builtins::resolve(&SymbolTable::with_defaults()).expect("default symbols resolve")
}

/// Clone `module` and run the pass over the clone.
pub fn lower(module: &Module) -> Module {
    let mut lowered = module.clone();
    eliminate_finally(&mut lowered, &builtins()).expect("lowering succeeds");
    lowered
}

// ── Builders ─────────────────────────────────────────────────────────

pub fn sp() -> Span {
    Span::new(0, 0)
}

pub fn unit() -> Expr {
    Expr::unit(sp())
}

pub fn int(v: i64) -> Expr {
    Expr::int(v, sp())
}

pub fn boolean(b: bool) -> Expr {
    Expr::new(ExprKind::BoolLit(b), Ty::bool(), sp())
}

pub fn string(s: &str) -> Expr {
    Expr::new(ExprKind::StringLit(s.to_string()), Ty::string(), sp())
}

pub fn get_local(local: LocalId, ty: Ty) -> Expr {
    Expr::new(ExprKind::GetLocal(local), ty, sp())
}

pub fn assign(local: LocalId, value: Expr) -> Expr {
    Expr::new(
        ExprKind::Assign { local, value: Box::new(value) },
        Ty::unit(),
        sp(),
    )
}

pub fn let_(local: LocalId, name: &str, init: Option<Expr>) -> Expr {
    Expr::new(
        ExprKind::Let {
            local,
            name: name.to_string(),
            init: init.map(Box::new),
        },
        Ty::unit(),
        sp(),
    )
}

pub fn block(stmts: Vec<Expr>, ty: Ty) -> Expr {
    Expr::block(stmts, ty, sp())
}

pub fn call(func: &str, args: Vec<Expr>, ty: Ty) -> Expr {
    Expr::new(
        ExprKind::Call { func: func.to_string(), args },
        ty,
        sp(),
    )
}

pub fn call0(func: &str) -> Expr {
    call(func, vec![], Ty::unit())
}

pub fn if_(cond: Expr, then_body: Expr, else_body: Expr, ty: Ty) -> Expr {
    Expr::new(
        ExprKind::If {
            cond: Box::new(cond),
            then_body: Box::new(then_body),
            else_body: Box::new(else_body),
        },
        ty,
        sp(),
    )
}

pub fn while_(loop_id: LoopId, cond: Expr, body: Expr) -> Expr {
    Expr::new(
        ExprKind::While {
            loop_id,
            cond: Box::new(cond),
            body: Box::new(body),
        },
        Ty::unit(),
        sp(),
    )
}

pub fn brk(loop_id: LoopId) -> Expr {
    Expr::new(ExprKind::Break(loop_id), Ty::Never, sp())
}

pub fn cont(loop_id: LoopId) -> Expr {
    Expr::new(ExprKind::Continue(loop_id), Ty::Never, sp())
}

pub fn ret(target: FuncId, value: Expr) -> Expr {
    Expr::new(
        ExprKind::Return { target, value: Box::new(value) },
        Ty::Never,
        sp(),
    )
}

pub fn throw(value: Expr) -> Expr {
    Expr::new(ExprKind::Throw(Box::new(value)), Ty::Never, sp())
}

pub fn catch(param: LocalId, name: &str, param_ty: Ty, body: Expr) -> Catch {
    Catch {
        param,
        param_name: name.to_string(),
        param_ty,
        body,
        span: sp(),
    }
}

pub fn try_catches(body: Expr, catches: Vec<Catch>, finally: Option<Expr>, ty: Ty) -> Expr {
    Expr::new(
        ExprKind::Try {
            body: Box::new(body),
            catches,
            finally: finally.map(Box::new),
        },
        ty,
        sp(),
    )
}

pub fn try_finally(body: Expr, finally: Expr, ty: Ty) -> Expr {
    try_catches(body, vec![], Some(finally), ty)
}

pub fn closure(id: FuncId, name: &str, ret_ty: Ty, body: Expr) -> Expr {
    let func_ty = Ty::fun(vec![], ret_ty.clone());
    Expr::new(
        ExprKind::Closure(Box::new(Function {
            id,
            name: name.to_string(),
            params: vec![],
            ret_ty,
            body,
        })),
        func_ty,
        sp(),
    )
}

/// A module holding one zero-parameter function whose body is produced
/// by `build` (given the module's id generator and the function's id).
pub fn func_module(
    name: &str,
    ret_ty: Ty,
    build: impl FnOnce(&mut IdGen, FuncId) -> Expr,
) -> Module {
    let mut module = Module::new();
    let id = module.ids.fresh_func();
    let body = build(&mut module.ids, id);
    module.add_function(Function {
        id,
        name: name.to_string(),
        params: vec![],
        ret_ty,
        body,
    });
    module
}

/// A module holding one single-parameter function.
pub fn func_module_with_param(
    name: &str,
    param_name: &str,
    param_ty: Ty,
    ret_ty: Ty,
    build: impl FnOnce(&mut IdGen, FuncId, LocalId) -> Expr,
) -> Module {
    let mut module = Module::new();
    let id = module.ids.fresh_func();
    let param = module.ids.fresh_local();
    let body = build(&mut module.ids, id, param);
    module.add_function(Function {
        id,
        name: name.to_string(),
        params: vec![Param {
            local: param,
            name: param_name.to_string(),
            ty: param_ty,
        }],
        ret_ty,
        body,
    });
    module
}

// ── Structural assertions ────────────────────────────────────────────

/// Count the nodes of `expr` satisfying `pred`.
pub fn count_matching(expr: &Expr, mut pred: impl FnMut(&Expr) -> bool) -> usize {
    let mut count = 0;
    expr.for_each(&mut |e| {
        if pred(e) {
            count += 1;
        }
    });
    count
}

/// Count calls to `name` anywhere in `expr`.
pub fn count_calls(expr: &Expr, name: &str) -> usize {
    count_matching(expr, |e| {
        matches!(&e.kind, ExprKind::Call { func, .. } if func == name)
    })
}

/// Assert that no try node in the module carries a finally clause and
/// that no rewrite holes survived.
pub fn assert_no_finally(module: &Module) {
    for func in &module.functions {
        func.body.for_each(&mut |e| match &e.kind {
            ExprKind::Try { finally: Some(_), .. } => {
                panic!("function `{}` still contains a finally clause", func.name)
            }
            ExprKind::Hole(hole) => {
                panic!("function `{}` contains leftover hole {}", func.name, hole.0)
            }
            _ => {}
        });
    }
}
