//! 타입 체커 — 2-패스 타입 검사 및 AST 주석
//!
//! 1차 패스는 선언을 수집하여 심볼 테이블을 만들고, 2차 패스는 타입을
//! 상향식으로 전파하며 각 [`Expr`]의 `ty`를 채웁니다. 캡처 그룹 참조는
//! 둘러싼 조건의 패턴에 대해 그룹 번호로 해석됩니다.
//!
//! 메트릭 값 형식은 Int로 시작하여 Float 값이 할당되는 사용처가 보이면
//! Float로 넓어집니다 (Timer는 Int 고정).

use std::collections::HashMap;
use std::rc::Rc;

use metrail_core::{MetricKind, ValueKind};

use crate::ast::{Ast, BinOp, Builtin, Cond, Decl, Expr, ExprKind, Item, Stmt, UnOp};
use crate::error::{CompileError, CompileErrors};
use crate::span::Span;
use crate::symtab::{MetricSymbol, PatternSymbol, SymbolTable};
use crate::types::Type;

/// AST를 검사하고 타입 주석을 채웁니다.
///
/// 성공하면 코드 생성기가 사용할 심볼 테이블을 반환합니다.
/// 에러는 누적되어 한 번에 반환됩니다.
pub fn check(ast: &mut Ast) -> Result<SymbolTable, CompileErrors> {
    let mut checker = Checker::new();
    checker.collect_decls(ast);
    checker.check_items(ast);
    checker.errors.into_result(checker.symtab)
}

/// 컴파일된 패턴의 캡처 그룹 정보
struct PatternInfo {
    group_count: usize,
    names: HashMap<String, usize>,
}

struct Checker {
    symtab: SymbolTable,
    errors: CompileErrors,
    pattern_cache: HashMap<String, Rc<PatternInfo>>,
    /// 둘러싼 조건들의 패턴 스택. 안쪽 스코프가 뒤에 온다.
    scopes: Vec<Vec<Rc<PatternInfo>>>,
}

impl Checker {
    fn new() -> Self {
        Self {
            symtab: SymbolTable::new(),
            errors: CompileErrors::new(),
            pattern_cache: HashMap::new(),
            scopes: Vec::new(),
        }
    }

    // --- 1차 패스: 선언 수집 ---

    fn collect_decls(&mut self, ast: &Ast) {
        for item in &ast.items {
            let Item::Decl(decl) = item else { continue };
            match decl {
                Decl::Metric(m) => {
                    if m.kind == MetricKind::Histogram {
                        self.validate_buckets(&m.buckets, m.span);
                    }
                    let sym = MetricSymbol {
                        name: m.name.clone(),
                        kind: m.kind,
                        labels: m.labels.clone(),
                        hidden: m.hidden,
                        alias: m.alias.clone(),
                        buckets: m.buckets.clone(),
                        value_kind: m.kind.default_value_kind(),
                        span: m.span,
                    };
                    if self.symtab.insert_metric(sym).is_err() {
                        self.errors.push(CompileError::DuplicateMetric {
                            span: m.span,
                            name: m.name.clone(),
                        });
                    }
                }
                Decl::Const(c) => {
                    // 패턴 유효성은 등록 시점에 검증
                    if self.pattern_info(&c.pattern, c.span).is_some() {
                        let sym = PatternSymbol {
                            name: c.name.clone(),
                            pattern: c.pattern.clone(),
                            span: c.span,
                        };
                        if self.symtab.insert_pattern(sym).is_err() {
                            self.errors.push(CompileError::Parse {
                                span: c.span,
                                reason: format!("duplicate const '{}'", c.name),
                            });
                        }
                    }
                }
            }
        }
    }

    fn validate_buckets(&mut self, buckets: &[f64], span: Span) {
        for pair in buckets.windows(2) {
            if pair[1] <= pair[0] {
                self.errors.push(CompileError::TypeMismatch {
                    span,
                    reason: "histogram buckets must be strictly increasing".to_owned(),
                });
                return;
            }
        }
    }

    fn pattern_info(&mut self, pattern: &str, span: Span) -> Option<Rc<PatternInfo>> {
        if let Some(info) = self.pattern_cache.get(pattern) {
            return Some(Rc::clone(info));
        }
        match regex::Regex::new(pattern) {
            Ok(re) => {
                let names = re
                    .capture_names()
                    .enumerate()
                    .filter_map(|(i, name)| name.map(|n| (n.to_owned(), i)))
                    .collect();
                let info = Rc::new(PatternInfo {
                    group_count: re.captures_len() - 1,
                    names,
                });
                self.pattern_cache
                    .insert(pattern.to_owned(), Rc::clone(&info));
                Some(info)
            }
            Err(e) => {
                self.errors.push(CompileError::Regex {
                    span,
                    reason: e.to_string(),
                });
                None
            }
        }
    }

    // --- 2차 패스: 타입 전파 ---

    fn check_items(&mut self, ast: &mut Ast) {
        for item in &mut ast.items {
            if let Item::Stmt(stmt) = item {
                self.check_stmt(stmt);
            }
        }
    }

    fn check_stmt(&mut self, stmt: &mut Stmt) {
        match stmt {
            Stmt::Cond(cond) => {
                let mut scope_patterns = Vec::new();
                match &mut cond.cond {
                    Cond::Expr(expr) => {
                        let ty = self.check_expr(expr);
                        // 조건 위치의 패턴 참조는 암묵적 입력 라인 매치
                        if ty == Type::Pattern {
                            wrap_as_line_match(expr);
                        } else if ty != Type::Bool && ty != Type::None {
                            self.errors.push(CompileError::TypeMismatch {
                                span: expr.span,
                                reason: format!("condition must be boolean, found {ty}"),
                            });
                        }
                        self.collect_patterns(expr, &mut scope_patterns);
                    }
                    Cond::Otherwise(_) => {}
                }

                self.scopes.push(scope_patterns);
                for s in &mut cond.then_block {
                    self.check_stmt(s);
                }
                self.scopes.pop();

                // else 블록에서는 매치가 성립하지 않았으므로 캡처가 바인딩되지 않음
                if let Some(else_block) = &mut cond.else_block {
                    for s in else_block {
                        self.check_stmt(s);
                    }
                }
            }
            Stmt::Next(_) => {}
            Stmt::Del { metric, keys, span } => {
                let arity = match self.symtab.metric(metric) {
                    Some((_, sym)) => sym.labels.len(),
                    None => {
                        self.errors.push(CompileError::UndefinedSymbol {
                            span: *span,
                            name: metric.clone(),
                        });
                        return;
                    }
                };
                if keys.len() != arity {
                    self.errors.push(CompileError::ArityMismatch {
                        span: *span,
                        reason: format!(
                            "metric '{metric}' has {arity} labels, del supplies {}",
                            keys.len()
                        ),
                    });
                }
                for key in keys {
                    self.check_label_key(key);
                }
            }
            Stmt::Expr(expr) => {
                self.check_expr(expr);
            }
        }
    }

    /// 조건식 내의 모든 패턴을 평가 순서대로 수집합니다.
    fn collect_patterns(&mut self, expr: &Expr, out: &mut Vec<Rc<PatternInfo>>) {
        match &expr.kind {
            ExprKind::Match { pattern, .. } => {
                if let Some(p) = self.resolve_pattern_text(pattern) {
                    if let Some(info) = self.pattern_info(&p, pattern.span) {
                        out.push(info);
                    }
                }
            }
            ExprKind::Binary { lhs, rhs, .. } => {
                self.collect_patterns(lhs, out);
                self.collect_patterns(rhs, out);
            }
            ExprKind::Unary { operand, .. } => self.collect_patterns(operand, out),
            _ => {}
        }
    }

    fn resolve_pattern_text(&self, pattern: &Expr) -> Option<String> {
        match &pattern.kind {
            ExprKind::RegexLit(p) => Some(p.clone()),
            ExprKind::Ident(name) => self.symtab.pattern(name).map(|s| s.pattern.clone()),
            _ => None,
        }
    }

    fn check_label_key(&mut self, key: &mut Expr) {
        let ty = self.check_expr(key);
        if !matches!(ty, Type::Int | Type::Float | Type::String | Type::None) {
            self.errors.push(CompileError::TypeMismatch {
                span: key.span,
                reason: format!("label value must be scalar, found {ty}"),
            });
        }
    }

    fn check_expr(&mut self, expr: &mut Expr) -> Type {
        let ty = self.infer(expr);
        expr.ty = ty;
        ty
    }

    fn infer(&mut self, expr: &mut Expr) -> Type {
        let span = expr.span;
        match &mut expr.kind {
            ExprKind::IntLit(_) => Type::Int,
            ExprKind::FloatLit(_) => Type::Float,
            ExprKind::StrLit(_) => Type::String,
            ExprKind::RegexLit(p) => {
                let p = p.clone();
                self.pattern_info(&p, span);
                Type::Pattern
            }
            ExprKind::Ident(name) => {
                if let Some((_, sym)) = self.symtab.metric(name) {
                    if !sym.labels.is_empty() {
                        let reason = format!(
                            "metric '{name}' has {} labels and must be indexed",
                            sym.labels.len()
                        );
                        self.errors
                            .push(CompileError::ArityMismatch { span, reason });
                    }
                    value_type(sym.value_kind)
                } else if self.symtab.pattern(name).is_some() {
                    Type::Pattern
                } else {
                    self.errors.push(CompileError::UndefinedSymbol {
                        span,
                        name: name.clone(),
                    });
                    Type::None
                }
            }
            ExprKind::CapRef { name, group } => {
                *group = self.resolve_capref(name, span);
                Type::String
            }
            ExprKind::Index { target, keys } => {
                let (arity, value_kind) = match &target.kind {
                    ExprKind::Ident(name) => match self.symtab.metric(name) {
                        Some((_, sym)) => {
                            target.ty = value_type(sym.value_kind);
                            (sym.labels.len(), sym.value_kind)
                        }
                        None => {
                            self.errors.push(CompileError::UndefinedSymbol {
                                span: target.span,
                                name: name.clone(),
                            });
                            return Type::None;
                        }
                    },
                    _ => {
                        self.errors.push(CompileError::TypeMismatch {
                            span: target.span,
                            reason: "only metrics can be indexed with labels".to_owned(),
                        });
                        return Type::None;
                    }
                };
                if keys.len() != arity {
                    self.errors.push(CompileError::ArityMismatch {
                        span,
                        reason: format!(
                            "metric expects {arity} label values, found {}",
                            keys.len()
                        ),
                    });
                }
                for key in keys {
                    self.check_label_key(key);
                }
                value_type(value_kind)
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let op = *op;
                let mut lt = self.check_expr(lhs);
                let mut rt = self.check_expr(rhs);
                // 논리 연산자의 Pattern 피연산자는 암묵적 입력 라인 매치
                if matches!(op, BinOp::And | BinOp::Or) {
                    if lt == Type::Pattern {
                        wrap_as_line_match(lhs);
                        lt = Type::Bool;
                    }
                    if rt == Type::Pattern {
                        wrap_as_line_match(rhs);
                        rt = Type::Bool;
                    }
                }
                self.binary_type(op, lt, rt, span)
            }
            ExprKind::Unary { op, operand } => {
                let op = *op;
                let mut ty = self.check_expr(operand);
                if op == UnOp::Not && ty == Type::Pattern {
                    wrap_as_line_match(operand);
                    ty = Type::Bool;
                }
                match op {
                    UnOp::Not => {
                        if ty != Type::Bool && ty != Type::None {
                            self.errors.push(CompileError::TypeMismatch {
                                span,
                                reason: format!("'!' expects boolean, found {ty}"),
                            });
                        }
                        Type::Bool
                    }
                    UnOp::Neg => {
                        if !ty.is_numeric() && ty != Type::None {
                            self.errors.push(CompileError::TypeMismatch {
                                span,
                                reason: format!("'-' expects a number, found {ty}"),
                            });
                        }
                        if ty == Type::Float { Type::Float } else { Type::Int }
                    }
                }
            }
            ExprKind::Match {
                operand, pattern, ..
            } => {
                if let Some(operand) = operand {
                    let ty = self.check_expr(operand);
                    if ty != Type::String && ty != Type::None {
                        self.errors.push(CompileError::TypeMismatch {
                            span: operand.span,
                            reason: format!("match operand must be a string, found {ty}"),
                        });
                    }
                }
                let pt = self.check_expr(pattern);
                if pt != Type::Pattern && pt != Type::None {
                    self.errors.push(CompileError::TypeMismatch {
                        span: pattern.span,
                        reason: format!("match pattern must be a regex, found {pt}"),
                    });
                }
                Type::Bool
            }
            ExprKind::Assign { target, value } => {
                let vt = self.check_expr(value);
                self.check_metric_write(&mut **target, WriteOp::Set, vt, span);
                Type::None
            }
            ExprKind::AddAssign { target, value } => {
                let vt = self.check_expr(value);
                self.check_metric_write(&mut **target, WriteOp::Add, vt, span);
                Type::None
            }
            ExprKind::Inc(target) => {
                self.check_metric_write(&mut **target, WriteOp::Inc, Type::Int, span);
                Type::None
            }
            ExprKind::Call { builtin, args } => {
                let builtin = *builtin;
                if args.len() != builtin.arity() {
                    self.errors.push(CompileError::ArityMismatch {
                        span,
                        reason: format!(
                            "{}() expects {} arguments, found {}",
                            builtin.name(),
                            builtin.arity(),
                            args.len()
                        ),
                    });
                    for arg in args {
                        self.check_expr(arg);
                    }
                    return builtin_return_type(builtin);
                }
                let arg_types: Vec<Type> =
                    args.iter_mut().map(|a| self.check_expr(a)).collect();
                self.check_builtin_args(builtin, &arg_types, span);
                builtin_return_type(builtin)
            }
        }
    }

    fn binary_type(&mut self, op: BinOp, lt: Type, rt: Type, span: Span) -> Type {
        // 에러 전파 중에는 추가 진단을 내지 않음
        if lt == Type::None || rt == Type::None {
            return match op {
                BinOp::And | BinOp::Or | BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le
                | BinOp::Gt | BinOp::Ge => Type::Bool,
                _ => Type::None,
            };
        }
        match op {
            BinOp::Add => {
                if lt == Type::String && rt == Type::String {
                    Type::String
                } else if let Some(ty) = lt.promote(rt) {
                    ty
                } else {
                    self.errors.push(CompileError::TypeMismatch {
                        span,
                        reason: format!("cannot add {lt} and {rt}"),
                    });
                    Type::None
                }
            }
            BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod | BinOp::Pow => {
                match lt.promote(rt) {
                    Some(ty) => ty,
                    None => {
                        self.errors.push(CompileError::TypeMismatch {
                            span,
                            reason: format!("arithmetic requires numbers, found {lt} and {rt}"),
                        });
                        Type::None
                    }
                }
            }
            BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor | BinOp::Shl | BinOp::Shr => {
                if lt.promote(rt) == Some(Type::Int) {
                    Type::Int
                } else {
                    self.errors.push(CompileError::TypeMismatch {
                        span,
                        reason: format!("bitwise operators require integers, found {lt} and {rt}"),
                    });
                    Type::None
                }
            }
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge | BinOp::Eq | BinOp::Ne => {
                let comparable = (lt == Type::String && rt == Type::String)
                    || lt.promote(rt).is_some();
                if !comparable {
                    self.errors.push(CompileError::TypeMismatch {
                        span,
                        reason: format!("cannot compare {lt} and {rt}"),
                    });
                }
                Type::Bool
            }
            BinOp::And | BinOp::Or => {
                if lt != Type::Bool || rt != Type::Bool {
                    self.errors.push(CompileError::TypeMismatch {
                        span,
                        reason: format!("logical operators require booleans, found {lt} and {rt}"),
                    });
                }
                Type::Bool
            }
        }
    }

    /// 메트릭 쓰기 대상(식별자 또는 인덱싱)을 검사합니다.
    fn check_metric_write(&mut self, target: &mut Expr, op: WriteOp, value_ty: Type, span: Span) {
        // 대상의 타입 주석과 레이블 키를 먼저 채움
        self.check_expr(target);

        let name = match metric_target_name(target) {
            Some(name) => name.to_owned(),
            None => {
                self.errors.push(CompileError::TypeMismatch {
                    span: target.span,
                    reason: "assignment target must be a metric".to_owned(),
                });
                return;
            }
        };
        let Some((_, sym)) = self.symtab.metric(&name) else {
            // 미정의 메트릭은 check_expr에서 이미 보고됨
            return;
        };
        let kind = sym.kind;

        let ok = match (kind, op) {
            (MetricKind::Counter, WriteOp::Inc | WriteOp::Add) => value_ty.is_numeric(),
            (MetricKind::Counter, WriteOp::Set) => {
                self.errors.push(CompileError::TypeMismatch {
                    span,
                    reason: format!("counter '{name}' cannot be set, use '++' or '+='"),
                });
                return;
            }
            (MetricKind::Gauge, _) => value_ty.is_numeric(),
            (MetricKind::Timer, WriteOp::Set) => {
                matches!(value_ty, Type::Int | Type::Timestamp)
            }
            (MetricKind::Text, WriteOp::Set) => value_ty == Type::String,
            (MetricKind::Histogram, WriteOp::Set) => value_ty.is_numeric(),
            _ => {
                self.errors.push(CompileError::TypeMismatch {
                    span,
                    reason: format!("operation not supported on {kind} '{name}'"),
                });
                return;
            }
        };

        if !ok && value_ty != Type::None {
            self.errors.push(CompileError::TypeMismatch {
                span,
                reason: format!("cannot write {value_ty} to {kind} '{name}'"),
            });
            return;
        }

        if value_ty == Type::Float {
            self.symtab.widen_metric(&name);
        }
    }

    fn check_builtin_args(&mut self, builtin: Builtin, args: &[Type], span: Span) {
        let expect = |checker: &mut Self, idx: usize, want: &str, ok: bool| {
            if !ok && args[idx] != Type::None {
                checker.errors.push(CompileError::TypeMismatch {
                    span,
                    reason: format!(
                        "{}() argument {} must be {want}, found {}",
                        builtin.name(),
                        idx + 1,
                        args[idx]
                    ),
                });
            }
        };
        match builtin {
            Builtin::Strptime => {
                expect(self, 0, "a string", args[0] == Type::String);
                expect(self, 1, "a format string", args[1] == Type::String);
            }
            Builtin::Strtol => {
                expect(self, 0, "a string", args[0] == Type::String);
                expect(self, 1, "an integer base", args[1] == Type::Int);
            }
            Builtin::Settime => {
                expect(
                    self,
                    0,
                    "a timestamp or integer",
                    matches!(args[0], Type::Int | Type::Timestamp),
                );
            }
            Builtin::Tolower | Builtin::Len => {
                expect(self, 0, "a string", args[0] == Type::String);
            }
            Builtin::Timestamp | Builtin::Getfilename => {}
        }
    }

    fn resolve_capref(&mut self, name: &str, span: Span) -> Option<usize> {
        if let Ok(num) = name.parse::<usize>() {
            if num == 0 {
                // $0은 마지막 매치 전체 (매치 전에는 입력 라인)
                return Some(0);
            }
            let max_groups = self
                .scopes
                .iter()
                .rev()
                .flat_map(|scope| scope.iter())
                .map(|p| p.group_count)
                .max()
                .unwrap_or(0);
            if num > max_groups {
                self.errors.push(CompileError::UndefinedSymbol {
                    span,
                    name: format!("${name}"),
                });
                return None;
            }
            return Some(num);
        }
        // 이름 있는 그룹: 안쪽 스코프부터, 나중 패턴이 앞선 패턴을 가림
        for scope in self.scopes.iter().rev() {
            for info in scope.iter().rev() {
                if let Some(&idx) = info.names.get(name) {
                    return Some(idx);
                }
            }
        }
        self.errors.push(CompileError::UndefinedSymbol {
            span,
            name: format!("${name}"),
        });
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteOp {
    Set,
    Add,
    Inc,
}

/// Pattern 타입 표현식을 입력 라인 매치로 감쌉니다.
fn wrap_as_line_match(expr: &mut Expr) {
    let span = expr.span;
    let inner = std::mem::replace(expr, Expr::new(ExprKind::IntLit(0), span));
    *expr = Expr::new(
        ExprKind::Match {
            negated: false,
            operand: None,
            pattern: Box::new(inner),
        },
        span,
    );
    expr.ty = Type::Bool;
}

fn metric_target_name(target: &Expr) -> Option<&str> {
    match &target.kind {
        ExprKind::Ident(name) => Some(name),
        ExprKind::Index { target, .. } => match &target.kind {
            ExprKind::Ident(name) => Some(name),
            _ => None,
        },
        _ => None,
    }
}

fn value_type(kind: ValueKind) -> Type {
    match kind {
        ValueKind::Int => Type::Int,
        ValueKind::Float => Type::Float,
        ValueKind::String => Type::String,
        ValueKind::Buckets => Type::Buckets,
    }
}

fn builtin_return_type(builtin: Builtin) -> Type {
    match builtin {
        Builtin::Strptime | Builtin::Timestamp => Type::Timestamp,
        Builtin::Settime => Type::None,
        Builtin::Tolower | Builtin::Getfilename => Type::String,
        Builtin::Len | Builtin::Strtol => Type::Int,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;
    use crate::parser::parse;

    fn check_src(src: &str) -> Result<SymbolTable, CompileErrors> {
        let mut ast = parse(lex(src).unwrap()).unwrap();
        check(&mut ast)
    }

    #[test]
    fn simple_counter_program_checks() {
        let symtab = check_src("counter lines_total\n/.*/ { lines_total++ }\n").unwrap();
        assert_eq!(symtab.metric_count(), 1);
    }

    #[test]
    fn undefined_metric_is_reported() {
        let errs = check_src("/x/ { nope++ }\n").unwrap_err();
        assert!(errs.to_string().contains("undefined symbol 'nope'"));
    }

    #[test]
    fn duplicate_metric_is_reported() {
        let errs = check_src("counter a\ngauge a\n").unwrap_err();
        assert!(errs.to_string().contains("duplicate metric 'a'"));
    }

    #[test]
    fn counter_cannot_be_set() {
        let errs = check_src("counter c\n/x/ { c = 5 }\n").unwrap_err();
        assert!(errs.to_string().contains("cannot be set"));
    }

    #[test]
    fn label_arity_is_enforced() {
        let errs = check_src("counter c by a, b\n/x/ { c[$0]++ }\n").unwrap_err();
        assert!(errs.to_string().contains("arity"));
    }

    #[test]
    fn unindexed_use_of_labelled_metric_is_an_error() {
        let errs = check_src("counter c by a\n/x/ { c++ }\n").unwrap_err();
        assert!(errs.to_string().contains("must be indexed"));
    }

    #[test]
    fn capref_by_number_resolves_within_pattern() {
        let symtab = check_src("counter c by m\n/^(GET|POST) / { c[$1]++ }\n");
        assert!(symtab.is_ok());
    }

    #[test]
    fn capref_out_of_range_is_reported() {
        let errs = check_src("counter c by m\n/^(GET) / { c[$2]++ }\n").unwrap_err();
        assert!(errs.to_string().contains("$2"));
    }

    #[test]
    fn named_capture_group_resolves() {
        let symtab =
            check_src("counter c by m\n/^(?P<verb>GET|POST) / { c[$verb]++ }\n").unwrap();
        assert_eq!(symtab.metric_count(), 1);
    }

    #[test]
    fn capref_outside_any_pattern_is_reported() {
        let errs = check_src("counter c by m\nc[$1]++\n").unwrap_err();
        assert!(errs.to_string().contains("$1"));
    }

    #[test]
    fn int_plus_float_promotes() {
        let symtab = check_src("gauge g\n/x/ { g = 1 + 2.5 }\n").unwrap();
        assert_eq!(symtab.metric("g").unwrap().1.value_kind, ValueKind::Float);
    }

    #[test]
    fn gauge_stays_int_without_float_usage() {
        let symtab = check_src("gauge g\n/x/ { g = 3 }\n").unwrap();
        assert_eq!(symtab.metric("g").unwrap().1.value_kind, ValueKind::Int);
    }

    #[test]
    fn string_arithmetic_is_an_error() {
        let errs = check_src("gauge g\n/x/ { g = \"a\" - 1 }\n").unwrap_err();
        assert!(errs.to_string().contains("arithmetic requires numbers"));
    }

    #[test]
    fn string_concat_is_allowed_for_text() {
        assert!(check_src("text t\n/x/ { t = \"a\" + \"b\" }\n").is_ok());
    }

    #[test]
    fn strtol_converts_capture_to_int() {
        assert!(check_src("counter c\n/n=(\\S+)/ { c += strtol($1, 10) }\n").is_ok());
    }

    #[test]
    fn settime_accepts_strptime_result() {
        assert!(check_src(
            "counter c\n/^(\\d+-\\d+-\\d+)/ { settime(strptime($1, \"%Y-%m-%d\")) }\n"
        )
        .is_ok());
    }

    #[test]
    fn settime_rejects_string() {
        let errs = check_src("counter c\n/(\\d+)/ { settime($1) }\n").unwrap_err();
        assert!(errs.to_string().contains("settime"));
    }

    #[test]
    fn builtin_arity_is_enforced() {
        let errs = check_src("counter c\n/x/ { settime() }\n").unwrap_err();
        assert!(errs.to_string().contains("expects 1 arguments"));
    }

    #[test]
    fn condition_must_be_boolean() {
        let errs = check_src("counter c\n1 + 2 { c++ }\n").unwrap_err();
        assert!(errs.to_string().contains("condition must be boolean"));
    }

    #[test]
    fn const_pattern_as_condition() {
        assert!(check_src("const ERROR /^E/\ncounter errors\nERROR { errors++ }\n").is_ok());
    }

    #[test]
    fn pattern_operands_of_logical_ops_become_matches() {
        let src = "const A /^a/\ncounter c\nA && /b$/ { c++ }\n";
        assert!(check_src(src).is_ok());
    }

    #[test]
    fn negated_pattern_condition() {
        assert!(check_src("counter c\n!/^#/ { c++ }\n").is_ok());
    }

    #[test]
    fn invalid_regex_is_reported() {
        let errs = check_src("counter c\n/(unclosed/ { c++ }\n").unwrap_err();
        assert!(errs.to_string().contains("invalid regex"));
    }

    #[test]
    fn unsorted_histogram_buckets_are_rejected() {
        let errs = check_src("histogram h buckets 5, 1, 10\n").unwrap_err();
        assert!(errs.to_string().contains("strictly increasing"));
    }

    #[test]
    fn del_arity_is_enforced() {
        let errs = check_src("counter c by a\n/(x)/ { del c[$1, $1] }\n").unwrap_err();
        assert!(errs.to_string().contains("del supplies 2"));
    }

    #[test]
    fn multiple_errors_in_one_pass() {
        let errs = check_src("counter c\n/x/ { d++ }\n/y/ { e++ }\n").unwrap_err();
        assert_eq!(errs.len(), 2);
    }

    #[test]
    fn match_against_capture_in_nested_block() {
        assert!(check_src(
            "counter c\n/^(\\S+) / { $1 =~ /err/ { c++ } }\n"
        )
        .is_ok());
    }
}
