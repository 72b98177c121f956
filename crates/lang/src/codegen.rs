//! 코드 생성기 — 타입 주석이 달린 AST를 선형 바이트코드로 낮춥니다.
//!
//! 정규식은 여기서 한 번만 컴파일되어 정규식 테이블에 들어가고, `Match`
//! 명령어는 인덱스만 참조합니다. 문자열/실수 상수는 인터닝됩니다.
//! 같은 소스에 대해 항상 동일한 바이트코드를 생성합니다 (진단용 소스
//! 위치 메타데이터 제외).
//!
//! `otherwise`는 스코프별 합성 지역 플래그로 낮춥니다. 같은 블록의 어떤
//! 조건이든 성립하면 플래그가 세워지고, `otherwise` 블록은 플래그가
//! 내려가 있을 때만 실행됩니다.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use crate::ast::{Ast, BinOp, Builtin, Cond, Expr, ExprKind, Item, Stmt, UnOp};
use crate::bytecode::{CompiledRegex, Instr, MetricDescriptor, Program};
use crate::error::{CompileError, CompileErrors};
use crate::symtab::SymbolTable;
use crate::types::Type;

/// 검사된 AST로부터 프로그램을 생성합니다.
pub fn codegen(
    name: &str,
    source: &str,
    ast: &Ast,
    symtab: &SymbolTable,
) -> Result<Program, CompileErrors> {
    let mut gen = CodeGen::new(symtab);
    gen.run(ast);
    let digest = source_digest(source);
    let metrics = symtab
        .metrics()
        .map(|sym| MetricDescriptor {
            name: sym.name.clone(),
            kind: sym.kind,
            value_kind: sym.value_kind,
            labels: sym.labels.clone(),
            buckets: sym.buckets.clone(),
            hidden: sym.hidden,
            alias: sym.alias.clone(),
            source_line: sym.span.line,
        })
        .collect();
    gen.errors.clone().into_result(Program {
        name: name.to_owned(),
        digest,
        instrs: gen.instrs,
        strings: gen.strings,
        floats: gen.floats,
        regexes: gen.regexes,
        metrics,
        num_locals: gen.num_locals,
        num_captures: gen.num_captures,
    })
}

/// 소스 텍스트의 결정적 다이제스트를 계산합니다.
fn source_digest(source: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    source.hash(&mut hasher);
    hasher.finish()
}

struct CodeGen<'a> {
    symtab: &'a SymbolTable,
    instrs: Vec<Instr>,
    strings: Vec<String>,
    string_idx: HashMap<String, usize>,
    floats: Vec<f64>,
    float_idx: HashMap<u64, usize>,
    regexes: Vec<CompiledRegex>,
    regex_idx: HashMap<String, usize>,
    num_locals: usize,
    num_captures: usize,
    errors: CompileErrors,
}

impl<'a> CodeGen<'a> {
    fn new(symtab: &'a SymbolTable) -> Self {
        Self {
            symtab,
            instrs: Vec::new(),
            strings: Vec::new(),
            string_idx: HashMap::new(),
            floats: Vec::new(),
            float_idx: HashMap::new(),
            regexes: Vec::new(),
            regex_idx: HashMap::new(),
            num_locals: 0,
            // 슬롯 0은 항상 입력 라인($0)
            num_captures: 1,
            errors: CompileErrors::new(),
        }
    }

    fn run(&mut self, ast: &Ast) {
        let stmts: Vec<&Stmt> = ast
            .items
            .iter()
            .filter_map(|item| match item {
                Item::Stmt(stmt) => Some(stmt),
                Item::Decl(_) => None,
            })
            .collect();
        self.gen_block(&stmts);
        self.emit(Instr::Halt);
    }

    fn emit(&mut self, instr: Instr) -> usize {
        self.instrs.push(instr);
        self.instrs.len() - 1
    }

    fn here(&self) -> usize {
        self.instrs.len()
    }

    fn patch(&mut self, at: usize) {
        let target = self.here();
        match &mut self.instrs[at] {
            Instr::Jmp(t) | Instr::JmpIfFalse(t) => *t = target,
            other => unreachable!("patching non-jump instruction {other:?}"),
        }
    }

    fn intern_string(&mut self, s: &str) -> usize {
        if let Some(&idx) = self.string_idx.get(s) {
            return idx;
        }
        let idx = self.strings.len();
        self.strings.push(s.to_owned());
        self.string_idx.insert(s.to_owned(), idx);
        idx
    }

    fn intern_float(&mut self, v: f64) -> usize {
        let bits = v.to_bits();
        if let Some(&idx) = self.float_idx.get(&bits) {
            return idx;
        }
        let idx = self.floats.len();
        self.floats.push(v);
        self.float_idx.insert(bits, idx);
        idx
    }

    fn intern_regex(&mut self, pattern: &str, span: crate::span::Span) -> Option<usize> {
        if let Some(&idx) = self.regex_idx.get(pattern) {
            return Some(idx);
        }
        match regex::Regex::new(pattern) {
            Ok(regex) => {
                self.num_captures = self.num_captures.max(regex.captures_len());
                let idx = self.regexes.len();
                self.regexes.push(CompiledRegex {
                    pattern: pattern.to_owned(),
                    regex,
                });
                self.regex_idx.insert(pattern.to_owned(), idx);
                Some(idx)
            }
            Err(e) => {
                // 체커가 이미 검증했으므로 도달하지 않아야 함
                self.errors.push(CompileError::Regex {
                    span,
                    reason: e.to_string(),
                });
                None
            }
        }
    }

    fn alloc_local(&mut self) -> usize {
        let slot = self.num_locals;
        self.num_locals += 1;
        slot
    }

    // --- 문장 ---

    fn gen_block(&mut self, stmts: &[&Stmt]) {
        // otherwise가 있는 블록만 매치 플래그를 유지
        let flag = if stmts
            .iter()
            .any(|s| matches!(s, Stmt::Cond(c) if matches!(c.cond, Cond::Otherwise(_))))
        {
            let slot = self.alloc_local();
            self.emit(Instr::PushFalse);
            self.emit(Instr::StoreLocal(slot));
            Some(slot)
        } else {
            None
        };

        for stmt in stmts {
            self.gen_stmt(stmt, flag);
        }
    }

    fn gen_stmt(&mut self, stmt: &Stmt, scope_flag: Option<usize>) {
        match stmt {
            Stmt::Cond(cond) => {
                match &cond.cond {
                    Cond::Expr(expr) => {
                        self.gen_expr(expr);
                    }
                    Cond::Otherwise(_) => {
                        match scope_flag {
                            Some(slot) => {
                                self.emit(Instr::LoadLocal(slot));
                                self.emit(Instr::Not);
                            }
                            // gen_block이 항상 플래그를 할당하므로 도달 불가
                            None => {
                                self.emit(Instr::PushTrue);
                            }
                        }
                    }
                }
                let skip = self.emit(Instr::JmpIfFalse(0));

                if let (Some(slot), Cond::Expr(_)) = (scope_flag, &cond.cond) {
                    self.emit(Instr::PushTrue);
                    self.emit(Instr::StoreLocal(slot));
                }

                let then_refs: Vec<&Stmt> = cond.then_block.iter().collect();
                self.gen_block(&then_refs);

                match &cond.else_block {
                    Some(else_block) => {
                        let done = self.emit(Instr::Jmp(0));
                        self.patch(skip);
                        let else_refs: Vec<&Stmt> = else_block.iter().collect();
                        self.gen_block(&else_refs);
                        self.patch(done);
                    }
                    None => self.patch(skip),
                }
            }
            Stmt::Next(_) => {
                self.emit(Instr::Next);
            }
            Stmt::Del { metric, keys, .. } => {
                let Some((idx, _)) = self.symtab.metric(metric) else {
                    return;
                };
                self.emit(Instr::Mload(idx));
                for key in keys {
                    self.gen_expr(key);
                }
                self.emit(Instr::Del(keys.len()));
            }
            Stmt::Expr(expr) => {
                self.gen_expr(expr);
                if expr.ty != Type::None {
                    self.emit(Instr::Pop);
                }
            }
        }
    }

    // --- 표현식 ---

    fn gen_expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::IntLit(v) => {
                self.emit(Instr::PushInt(*v));
            }
            ExprKind::FloatLit(v) => {
                let idx = self.intern_float(*v);
                self.emit(Instr::PushFloat(idx));
            }
            ExprKind::StrLit(s) => {
                let idx = self.intern_string(s);
                self.emit(Instr::PushStr(idx));
            }
            ExprKind::RegexLit(_) => {
                // 패턴은 Match 노드가 소비함. 체커가 다른 위치를 거부
            }
            ExprKind::Ident(name) => {
                if let Some((idx, _)) = self.symtab.metric(name) {
                    self.emit(Instr::Mload(idx));
                    self.emit(Instr::Dload(0));
                }
            }
            ExprKind::CapRef { group, .. } => {
                self.emit(Instr::Capref(group.unwrap_or(0)));
            }
            ExprKind::Index { target, keys } => {
                self.gen_datum_load(target, keys);
            }
            ExprKind::Binary { op, lhs, rhs } => {
                self.gen_expr(lhs);
                self.gen_expr(rhs);
                self.gen_binop(*op, expr.ty, lhs.ty);
            }
            ExprKind::Unary { op, operand } => {
                self.gen_expr(operand);
                match op {
                    UnOp::Not => self.emit(Instr::Not),
                    UnOp::Neg => self.emit(Instr::Neg),
                };
            }
            ExprKind::Match {
                negated,
                operand,
                pattern,
            } => {
                match operand {
                    Some(operand) => self.gen_expr(operand),
                    None => {
                        self.emit(Instr::PushLine);
                    }
                }
                let text = self.pattern_text(pattern);
                if let Some(idx) = self.intern_regex(&text, pattern.span) {
                    self.emit(Instr::Match(idx));
                }
                if *negated {
                    self.emit(Instr::Not);
                }
            }
            ExprKind::Assign { target, value } => {
                self.gen_write(target, value, WriteKind::Set);
            }
            ExprKind::AddAssign { target, value } => {
                self.gen_write(target, value, WriteKind::Add);
            }
            ExprKind::Inc(target) => {
                self.gen_target_datum(target);
                self.emit(Instr::Inc);
            }
            ExprKind::Call { builtin, args } => {
                for arg in args {
                    self.gen_expr(arg);
                }
                let instr = match builtin {
                    Builtin::Strptime => Instr::Strptime,
                    Builtin::Timestamp => Instr::Timestamp,
                    Builtin::Settime => Instr::Settime,
                    Builtin::Tolower => Instr::Tolower,
                    Builtin::Len => Instr::Len,
                    Builtin::Strtol => Instr::Strtol,
                    Builtin::Getfilename => Instr::Getfilename,
                };
                self.emit(instr);
            }
        }
    }

    fn pattern_text(&self, pattern: &Expr) -> String {
        match &pattern.kind {
            ExprKind::RegexLit(p) => p.clone(),
            ExprKind::Ident(name) => self
                .symtab
                .pattern(name)
                .map(|s| s.pattern.clone())
                .unwrap_or_default(),
            _ => String::new(),
        }
    }

    fn gen_binop(&mut self, op: BinOp, result_ty: Type, lhs_ty: Type) {
        let instr = match op {
            BinOp::Add => {
                if lhs_ty == Type::String {
                    Instr::Concat
                } else if result_ty == Type::Float {
                    Instr::AddFloat
                } else {
                    Instr::AddInt
                }
            }
            BinOp::Sub => arith(result_ty, Instr::SubInt, Instr::SubFloat),
            BinOp::Mul => arith(result_ty, Instr::MulInt, Instr::MulFloat),
            BinOp::Div => arith(result_ty, Instr::DivInt, Instr::DivFloat),
            BinOp::Mod => arith(result_ty, Instr::ModInt, Instr::ModFloat),
            BinOp::Pow => arith(result_ty, Instr::PowInt, Instr::PowFloat),
            BinOp::BitAnd => Instr::BitAnd,
            BinOp::BitOr => Instr::BitOr,
            BinOp::BitXor => Instr::BitXor,
            BinOp::Shl => Instr::Shl,
            BinOp::Shr => Instr::Shr,
            BinOp::Lt => Instr::CmpLt,
            BinOp::Le => Instr::CmpLe,
            BinOp::Gt => Instr::CmpGt,
            BinOp::Ge => Instr::CmpGe,
            BinOp::Eq => Instr::CmpEq,
            BinOp::Ne => Instr::CmpNe,
            BinOp::And => Instr::And,
            BinOp::Or => Instr::Or,
        };
        self.emit(instr);
    }

    /// 쓰기 대상의 datum 참조를 스택에 올립니다.
    fn gen_target_datum(&mut self, target: &Expr) {
        match &target.kind {
            ExprKind::Ident(name) => {
                if let Some((idx, _)) = self.symtab.metric(name) {
                    self.emit(Instr::Mload(idx));
                    self.emit(Instr::Dload(0));
                }
            }
            ExprKind::Index { target, keys } => {
                self.gen_datum_load(target, keys);
            }
            // 체커가 메트릭 외 대상을 거부함
            _ => {}
        }
    }

    fn gen_datum_load(&mut self, target: &Expr, keys: &[Expr]) {
        let ExprKind::Ident(name) = &target.kind else {
            return;
        };
        let Some((idx, _)) = self.symtab.metric(name) else {
            return;
        };
        self.emit(Instr::Mload(idx));
        for key in keys {
            self.gen_expr(key);
        }
        self.emit(Instr::Dload(keys.len()));
    }

    fn gen_write(&mut self, target: &Expr, value: &Expr, kind: WriteKind) {
        let name = match &target.kind {
            ExprKind::Ident(name) => name.clone(),
            ExprKind::Index { target, .. } => match &target.kind {
                ExprKind::Ident(name) => name.clone(),
                _ => return,
            },
            _ => return,
        };
        let Some((_, sym)) = self.symtab.metric(&name) else {
            return;
        };
        let value_kind = sym.value_kind;

        self.gen_target_datum(target);
        self.gen_expr(value);

        use metrail_core::ValueKind;
        let instr = match (kind, value_kind) {
            (WriteKind::Set, ValueKind::Int) => Instr::Iset,
            (WriteKind::Set, ValueKind::Float | ValueKind::Buckets) => Instr::Fset,
            (WriteKind::Set, ValueKind::String) => Instr::Sset,
            (WriteKind::Add, ValueKind::Float) => Instr::Fadd,
            (WriteKind::Add, _) => Instr::Iadd,
        };
        self.emit(instr);
    }
}

#[derive(Debug, Clone, Copy)]
enum WriteKind {
    Set,
    Add,
}

fn arith(result_ty: Type, int_instr: Instr, float_instr: Instr) -> Instr {
    if result_ty == Type::Float {
        float_instr
    } else {
        int_instr
    }
}
