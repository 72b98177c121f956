//! AST 프린터
//!
//! 두 가지 출력을 제공합니다.
//!
//! - [`print_source`]: 다시 파싱 가능한 소스 형태. `parse(print_source(ast))`는
//!   구조적으로 동일한 AST를 생성합니다. `--dump-ast`가 사용합니다.
//! - [`print_tree`]: 타입 주석이 달린 들여쓰기 트리. `--dump-ast-types`가
//!   사용합니다.
//!
//! 소스 출력은 이항/단항 표현식을 모두 괄호로 감싸 우선순위를 보존합니다.

use std::fmt::Write;

use crate::ast::{Ast, BinOp, Cond, Decl, Expr, ExprKind, Item, Stmt, UnOp};

/// AST를 다시 파싱 가능한 소스 텍스트로 출력합니다.
pub fn print_source(ast: &Ast) -> String {
    let mut out = String::new();
    for item in &ast.items {
        match item {
            Item::Decl(decl) => print_decl(&mut out, decl),
            Item::Stmt(stmt) => print_stmt(&mut out, stmt, 0),
        }
    }
    out
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

fn print_decl(out: &mut String, decl: &Decl) {
    match decl {
        Decl::Metric(m) => {
            if m.hidden {
                out.push_str("hidden ");
            }
            let _ = write!(out, "{} {}", m.kind, m.name);
            if !m.labels.is_empty() {
                let _ = write!(out, " by {}", m.labels.join(", "));
            }
            if !m.buckets.is_empty() {
                let bounds: Vec<String> = m.buckets.iter().map(|b| fmt_float(*b)).collect();
                let _ = write!(out, " buckets {}", bounds.join(", "));
            }
            if let Some(alias) = &m.alias {
                let _ = write!(out, " as \"{}\"", escape_str(alias));
            }
            out.push('\n');
        }
        Decl::Const(c) => {
            let _ = writeln!(out, "const {} /{}/", c.name, escape_regex(&c.pattern));
        }
    }
}

fn print_stmt(out: &mut String, stmt: &Stmt, depth: usize) {
    indent(out, depth);
    match stmt {
        Stmt::Cond(cond) => {
            match &cond.cond {
                Cond::Expr(expr) => print_expr(out, expr),
                Cond::Otherwise(_) => out.push_str("otherwise"),
            }
            out.push_str(" {\n");
            for s in &cond.then_block {
                print_stmt(out, s, depth + 1);
            }
            indent(out, depth);
            out.push('}');
            if let Some(else_block) = &cond.else_block {
                out.push_str(" else {\n");
                for s in else_block {
                    print_stmt(out, s, depth + 1);
                }
                indent(out, depth);
                out.push('}');
            }
            out.push('\n');
        }
        Stmt::Next(_) => out.push_str("next\n"),
        Stmt::Del { metric, keys, .. } => {
            let _ = write!(out, "del {metric}[");
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                print_expr(out, key);
            }
            out.push_str("]\n");
        }
        Stmt::Expr(expr) => {
            print_expr(out, expr);
            out.push('\n');
        }
    }
}

fn print_expr(out: &mut String, expr: &Expr) {
    match &expr.kind {
        ExprKind::IntLit(v) => {
            let _ = write!(out, "{v}");
        }
        ExprKind::FloatLit(v) => out.push_str(&fmt_float(*v)),
        ExprKind::StrLit(s) => {
            let _ = write!(out, "\"{}\"", escape_str(s));
        }
        ExprKind::RegexLit(p) => {
            let _ = write!(out, "/{}/", escape_regex(p));
        }
        ExprKind::Ident(name) => out.push_str(name),
        ExprKind::CapRef { name, .. } => {
            let _ = write!(out, "${name}");
        }
        ExprKind::Index { target, keys } => {
            print_expr(out, target);
            out.push('[');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                print_expr(out, key);
            }
            out.push(']');
        }
        ExprKind::Binary { op, lhs, rhs } => {
            out.push('(');
            print_expr(out, lhs);
            let _ = write!(out, " {} ", binop_text(*op));
            print_expr(out, rhs);
            out.push(')');
        }
        ExprKind::Unary { op, operand } => {
            out.push('(');
            out.push_str(match op {
                UnOp::Not => "!",
                UnOp::Neg => "-",
            });
            print_expr(out, operand);
            out.push(')');
        }
        ExprKind::Match {
            negated,
            operand,
            pattern,
        } => {
            if let Some(operand) = operand {
                print_expr(out, operand);
                out.push_str(if *negated { " !~ " } else { " =~ " });
            }
            print_expr(out, pattern);
        }
        ExprKind::Assign { target, value } => {
            print_expr(out, target);
            out.push_str(" = ");
            print_expr(out, value);
        }
        ExprKind::AddAssign { target, value } => {
            print_expr(out, target);
            out.push_str(" += ");
            print_expr(out, value);
        }
        ExprKind::Inc(target) => {
            print_expr(out, target);
            out.push_str("++");
        }
        ExprKind::Call { builtin, args } => {
            out.push_str(builtin.name());
            out.push('(');
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                print_expr(out, arg);
            }
            out.push(')');
        }
    }
}

fn binop_text(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::Mod => "%",
        BinOp::Pow => "**",
        BinOp::Lt => "<",
        BinOp::Le => "<=",
        BinOp::Gt => ">",
        BinOp::Ge => ">=",
        BinOp::Eq => "==",
        BinOp::Ne => "!=",
        BinOp::And => "&&",
        BinOp::Or => "||",
        BinOp::BitAnd => "&",
        BinOp::BitOr => "|",
        BinOp::BitXor => "^",
        BinOp::Shl => "<<",
        BinOp::Shr => ">>",
    }
}

/// f64를 다시 float으로 렉싱되는 십진 표기로 출력합니다.
fn fmt_float(v: f64) -> String {
    let repr = format!("{v:?}");
    if repr.contains(['e', 'E']) {
        // 렉서는 지수 표기를 지원하지 않음
        let mut s = format!("{v:.12}");
        while s.ends_with('0') && !s.ends_with(".0") {
            s.pop();
        }
        s
    } else if repr.contains('.') {
        repr
    } else {
        format!("{repr}.0")
    }
}

fn escape_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out
}

fn escape_regex(p: &str) -> String {
    p.replace('/', "\\/")
}

/// 타입 주석이 달린 들여쓰기 트리를 출력합니다.
pub fn print_tree(ast: &Ast) -> String {
    let mut out = String::new();
    for item in &ast.items {
        match item {
            Item::Decl(Decl::Metric(m)) => {
                let _ = writeln!(
                    out,
                    "decl {} {} labels={:?} hidden={}",
                    m.kind, m.name, m.labels, m.hidden
                );
            }
            Item::Decl(Decl::Const(c)) => {
                let _ = writeln!(out, "const {} /{}/", c.name, c.pattern);
            }
            Item::Stmt(stmt) => tree_stmt(&mut out, stmt, 0),
        }
    }
    out
}

fn tree_stmt(out: &mut String, stmt: &Stmt, depth: usize) {
    indent(out, depth);
    match stmt {
        Stmt::Cond(cond) => {
            match &cond.cond {
                Cond::Expr(expr) => {
                    out.push_str("cond ");
                    tree_expr_inline(out, expr);
                    out.push('\n');
                }
                Cond::Otherwise(_) => out.push_str("cond otherwise\n"),
            }
            for s in &cond.then_block {
                tree_stmt(out, s, depth + 1);
            }
            if let Some(else_block) = &cond.else_block {
                indent(out, depth);
                out.push_str("else\n");
                for s in else_block {
                    tree_stmt(out, s, depth + 1);
                }
            }
        }
        Stmt::Next(_) => out.push_str("next\n"),
        Stmt::Del { metric, keys, .. } => {
            let _ = write!(out, "del {metric} keys=[");
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                tree_expr_inline(out, key);
            }
            out.push_str("]\n");
        }
        Stmt::Expr(expr) => {
            tree_expr_inline(out, expr);
            out.push('\n');
        }
    }
}

fn tree_expr_inline(out: &mut String, expr: &Expr) {
    let mut src = String::new();
    print_expr(&mut src, expr);
    let _ = write!(out, "{src} : {}", expr.ty);
}
