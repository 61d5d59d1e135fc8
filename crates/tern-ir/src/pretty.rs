//! Pretty-printing for IR trees.
//!
//! Provides human-readable output for debugging lowering passes.
//! Identities print with a sigil (`@F` functions, `@L` loops, `%`
//! locals) so synthesized targets are distinguishable at a glance.

use std::fmt::Write;

use crate::expr::{Expr, ExprKind, Function, Module};

/// Trait for pretty-printing IR constructs.
pub trait PrettyPrint {
    fn pretty_print(&self) -> String;
}

impl PrettyPrint for Module {
    fn pretty_print(&self) -> String {
        let mut output = String::new();
        for func in &self.functions {
            output.push_str(&func.pretty_print());
            output.push('\n');
        }
        output
    }
}

impl PrettyPrint for Function {
    fn pretty_print(&self) -> String {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| format!("%{} {}: {}", p.local.0, p.name, p.ty))
            .collect();
        let mut output = format!(
            "fn {}@F{}({}) -> {} ",
            self.name,
            self.id.0,
            params.join(", "),
            self.ret_ty
        );
        write_expr(&mut output, &self.body, 0);
        output.push('\n');
        output
    }
}

impl PrettyPrint for Expr {
    fn pretty_print(&self) -> String {
        let mut output = String::new();
        write_expr(&mut output, self, 0);
        output
    }
}

fn write_expr(out: &mut String, expr: &Expr, indent: usize) {
    match &expr.kind {
        ExprKind::Unit => out.push_str("()"),
        ExprKind::IntLit(v) => {
            let _ = write!(out, "{}", v);
        }
        ExprKind::BoolLit(b) => {
            let _ = write!(out, "{}", b);
        }
        ExprKind::StringLit(s) => {
            let _ = write!(out, "{:?}", s);
        }
        ExprKind::GetLocal(local) => {
            let _ = write!(out, "%{}", local.0);
        }
        ExprKind::Assign { local, value } => {
            let _ = write!(out, "%{} = ", local.0);
            write_expr(out, value, indent);
        }
        ExprKind::Let { local, name, init } => {
            let _ = write!(out, "let %{} {}", local.0, name);
            if let Some(init) = init {
                out.push_str(" = ");
                write_expr(out, init, indent);
            }
        }
        ExprKind::Block(stmts) => write_stmts(out, stmts, indent),
        ExprKind::Call { func, args } => {
            let _ = write!(out, "{}(", func);
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_expr(out, arg, indent);
            }
            out.push(')');
        }
        ExprKind::If {
            cond,
            then_body,
            else_body,
        } => {
            out.push_str("if ");
            write_expr(out, cond, indent);
            out.push(' ');
            write_expr(out, then_body, indent);
            out.push_str(" else ");
            write_expr(out, else_body, indent);
        }
        ExprKind::While { loop_id, cond, body } => {
            let _ = write!(out, "while @L{} ", loop_id.0);
            write_expr(out, cond, indent);
            out.push(' ');
            write_expr(out, body, indent);
        }
        ExprKind::Break(loop_id) => {
            let _ = write!(out, "break @L{}", loop_id.0);
        }
        ExprKind::Continue(loop_id) => {
            let _ = write!(out, "continue @L{}", loop_id.0);
        }
        ExprKind::Return { target, value } => {
            let _ = write!(out, "return @F{} ", target.0);
            write_expr(out, value, indent);
        }
        ExprKind::Throw(value) => {
            out.push_str("throw ");
            write_expr(out, value, indent);
        }
        ExprKind::Try {
            body,
            catches,
            finally,
        } => {
            out.push_str("try ");
            write_expr(out, body, indent);
            for catch in catches {
                let _ = write!(
                    out,
                    " catch (%{} {}: {}) ",
                    catch.param.0, catch.param_name, catch.param_ty
                );
                write_expr(out, &catch.body, indent);
            }
            if let Some(finally) = finally {
                out.push_str(" finally ");
                write_expr(out, finally, indent);
            }
        }
        ExprKind::Closure(func) => {
            let params: Vec<String> = func
                .params
                .iter()
                .map(|p| format!("%{} {}: {}", p.local.0, p.name, p.ty))
                .collect();
            let _ = write!(
                out,
                "fn {}@F{}({}) -> {} ",
                func.name,
                func.id.0,
                params.join(", "),
                func.ret_ty
            );
            write_expr(out, &func.body, indent);
        }
        ExprKind::ReturnableBlock { target, body } => {
            let _ = write!(out, "inline @F{} ", target.0);
            write_stmts(out, body, indent);
        }
        ExprKind::Hole(hole) => {
            let _ = write!(out, "<hole {}>", hole.0);
        }
    }
}

fn write_stmts(out: &mut String, stmts: &[Expr], indent: usize) {
    if stmts.is_empty() {
        out.push_str("{}");
        return;
    }
    out.push_str("{\n");
    for stmt in stmts {
        for _ in 0..indent + 2 {
            out.push(' ');
        }
        write_expr(out, stmt, indent + 2);
        out.push('\n');
    }
    for _ in 0..indent {
        out.push(' ');
    }
    out.push('}');
}
