//! 파서 — 토큰 스트림을 AST로 변환하는 재귀 하강 파서
//!
//! 문장 단위로 에러를 복구합니다. 문장 파싱이 실패하면 에러를 누적하고
//! 다음 개행 또는 블록 경계까지 건너뛴 뒤 계속합니다. 에러가 하나라도
//! 있으면 파싱 후 컴파일이 중단됩니다.
//!
//! 연산자 우선순위는 C와 같고, 패턴 매치(`=~`)는 논리 연산자보다
//! 강하게 결합합니다.

use metrail_core::MetricKind;

use crate::ast::{
    Ast, BinOp, Builtin, Cond, CondStmt, ConstDecl, Decl, Expr, ExprKind, Item, MetricDecl, Stmt,
    UnOp,
};
use crate::error::{CompileError, CompileErrors};
use crate::lexer::{Token, TokenKind};
use crate::span::Span;

/// 토큰 목록을 파싱하여 AST를 생성합니다.
pub fn parse(tokens: Vec<Token>) -> Result<Ast, CompileErrors> {
    Parser::new(tokens).run()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    errors: CompileErrors,
}

/// 문장 파싱 실패 표식. 에러 자체는 `Parser::errors`에 누적됩니다.
struct Recover;

type PResult<T> = Result<T, Recover>;

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            errors: CompileErrors::new(),
        }
    }

    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].kind
    }

    fn peek_span(&self) -> Span {
        self.tokens[self.pos.min(self.tokens.len() - 1)].span
    }

    fn bump(&mut self) -> Token {
        let tok = self.tokens[self.pos.min(self.tokens.len() - 1)].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn at(&self, kind: &TokenKind) -> bool {
        self.peek() == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> PResult<Token> {
        if self.at(kind) {
            Ok(self.bump())
        } else {
            self.error_here(format!("expected {what}, found {}", describe(self.peek())));
            Err(Recover)
        }
    }

    fn error_here(&mut self, reason: String) {
        let span = self.peek_span();
        self.errors.push(CompileError::Parse { span, reason });
    }

    fn skip_newlines(&mut self) {
        while self.eat(&TokenKind::Newline) {}
    }

    /// 에러 복구: 다음 개행 또는 블록 닫힘까지 건너뜁니다.
    fn synchronize(&mut self) {
        loop {
            match self.peek() {
                TokenKind::Newline => {
                    self.bump();
                    return;
                }
                TokenKind::RBrace | TokenKind::Eof => return,
                _ => {
                    self.bump();
                }
            }
        }
    }

    fn run(mut self) -> Result<Ast, CompileErrors> {
        let mut items = Vec::new();
        loop {
            self.skip_newlines();
            if self.at(&TokenKind::Eof) {
                break;
            }
            match self.item() {
                Ok(item) => items.push(item),
                Err(Recover) => self.synchronize(),
            }
        }
        self.errors.into_result(Ast { items })
    }

    fn item(&mut self) -> PResult<Item> {
        match self.peek() {
            TokenKind::Hidden
            | TokenKind::Counter
            | TokenKind::Gauge
            | TokenKind::Timer
            | TokenKind::Text
            | TokenKind::Histogram => Ok(Item::Decl(Decl::Metric(self.metric_decl()?))),
            TokenKind::Const => Ok(Item::Decl(Decl::Const(self.const_decl()?))),
            TokenKind::Def => {
                self.error_here("'def' decorators are not supported".to_owned());
                Err(Recover)
            }
            _ => Ok(Item::Stmt(self.stmt()?)),
        }
    }

    // --- 선언 ---

    fn metric_decl(&mut self) -> PResult<MetricDecl> {
        let start = self.peek_span();
        let hidden = self.eat(&TokenKind::Hidden);
        let kind = match self.bump().kind {
            TokenKind::Counter => MetricKind::Counter,
            TokenKind::Gauge => MetricKind::Gauge,
            TokenKind::Timer => MetricKind::Timer,
            TokenKind::Text => MetricKind::Text,
            TokenKind::Histogram => MetricKind::Histogram,
            _ => {
                self.error_here("expected metric kind after 'hidden'".to_owned());
                return Err(Recover);
            }
        };
        let name = self.ident("metric name")?;

        let mut labels = Vec::new();
        let mut alias = None;
        let mut buckets = Vec::new();
        loop {
            match self.peek() {
                TokenKind::By => {
                    self.bump();
                    labels.push(self.ident("label name")?);
                    while self.eat(&TokenKind::Comma) {
                        labels.push(self.ident("label name")?);
                    }
                }
                TokenKind::As => {
                    self.bump();
                    match self.bump() {
                        Token {
                            kind: TokenKind::StrLit(s),
                            ..
                        } => alias = Some(s),
                        _ => {
                            self.error_here("expected string literal after 'as'".to_owned());
                            return Err(Recover);
                        }
                    }
                }
                // `buckets`는 histogram 선언에서만 쓰이는 소프트 키워드
                TokenKind::Ident(id) if id == "buckets" => {
                    self.bump();
                    buckets.push(self.bucket_bound()?);
                    while self.eat(&TokenKind::Comma) {
                        buckets.push(self.bucket_bound()?);
                    }
                    if kind != MetricKind::Histogram {
                        self.errors.push(CompileError::Parse {
                            span: start,
                            reason: format!("'buckets' is only valid on histogram, not {kind}"),
                        });
                        return Err(Recover);
                    }
                }
                _ => break,
            }
        }

        Ok(MetricDecl {
            kind,
            hidden,
            name,
            labels,
            alias,
            buckets,
            span: start,
        })
    }

    fn bucket_bound(&mut self) -> PResult<f64> {
        match self.bump() {
            Token {
                kind: TokenKind::IntLit(v),
                ..
            } => Ok(v as f64),
            Token {
                kind: TokenKind::FloatLit(v),
                ..
            } => Ok(v),
            _ => {
                self.error_here("expected numeric bucket bound".to_owned());
                Err(Recover)
            }
        }
    }

    fn const_decl(&mut self) -> PResult<ConstDecl> {
        let start = self.peek_span();
        self.bump(); // const
        let name = self.ident("const name")?;
        match self.bump() {
            Token {
                kind: TokenKind::RegexLit(pattern),
                ..
            } => Ok(ConstDecl {
                name,
                pattern,
                span: start,
            }),
            _ => {
                self.error_here("expected regex literal in const declaration".to_owned());
                Err(Recover)
            }
        }
    }

    fn ident(&mut self, what: &str) -> PResult<String> {
        match self.peek() {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.bump();
                Ok(name)
            }
            _ => {
                self.error_here(format!("expected {what}, found {}", describe(self.peek())));
                Err(Recover)
            }
        }
    }

    // --- 문장 ---

    fn stmt(&mut self) -> PResult<Stmt> {
        match self.peek() {
            TokenKind::Next => {
                let span = self.bump().span;
                self.stmt_end()?;
                Ok(Stmt::Next(span))
            }
            TokenKind::Del => self.del_stmt(),
            TokenKind::Otherwise => {
                let span = self.bump().span;
                let then_block = self.block()?;
                let else_block = self.else_tail()?;
                Ok(Stmt::Cond(CondStmt {
                    cond: Cond::Otherwise(span),
                    then_block,
                    else_block,
                    span,
                }))
            }
            _ => {
                let expr = self.expr()?;
                if self.at(&TokenKind::LBrace) {
                    // 패턴-액션 또는 조건부 블록
                    let span = expr.span;
                    let then_block = self.block()?;
                    let else_block = self.else_tail()?;
                    Ok(Stmt::Cond(CondStmt {
                        cond: Cond::Expr(normalize_cond(expr)),
                        then_block,
                        else_block,
                        span,
                    }))
                } else {
                    self.stmt_end()?;
                    Ok(Stmt::Expr(expr))
                }
            }
        }
    }

    fn del_stmt(&mut self) -> PResult<Stmt> {
        let span = self.bump().span; // del
        let metric = self.ident("metric name after 'del'")?;
        self.expect(&TokenKind::LBracket, "'['")?;
        let mut keys = vec![self.expr()?];
        while self.eat(&TokenKind::Comma) {
            keys.push(self.expr()?);
        }
        self.expect(&TokenKind::RBracket, "']'")?;
        self.stmt_end()?;
        Ok(Stmt::Del { metric, keys, span })
    }

    /// 문장 종결: 개행, 블록 닫힘, 또는 EOF
    fn stmt_end(&mut self) -> PResult<()> {
        match self.peek() {
            TokenKind::Newline => {
                self.bump();
                Ok(())
            }
            TokenKind::RBrace | TokenKind::Eof => Ok(()),
            _ => {
                self.error_here(format!(
                    "expected end of statement, found {}",
                    describe(self.peek())
                ));
                Err(Recover)
            }
        }
    }

    fn block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect(&TokenKind::LBrace, "'{'")?;
        let mut stmts = Vec::new();
        loop {
            self.skip_newlines();
            if self.eat(&TokenKind::RBrace) {
                return Ok(stmts);
            }
            if self.at(&TokenKind::Eof) {
                self.error_here("unclosed block, expected '}'".to_owned());
                return Err(Recover);
            }
            match self.stmt() {
                Ok(stmt) => stmts.push(stmt),
                Err(Recover) => self.synchronize(),
            }
        }
    }

    /// `} else { ... }` 꼬리. else가 없으면 소비하지 않습니다.
    fn else_tail(&mut self) -> PResult<Option<Vec<Stmt>>> {
        // else는 닫는 중괄호와 같은 라인 또는 다음 라인에 올 수 있음
        let checkpoint = self.pos;
        self.skip_newlines();
        if self.eat(&TokenKind::Else) {
            let block = self.block()?;
            Ok(Some(block))
        } else {
            self.pos = checkpoint;
            Ok(None)
        }
    }

    // --- 표현식 (우선순위 하강) ---

    fn expr(&mut self) -> PResult<Expr> {
        self.assignment()
    }

    fn assignment(&mut self) -> PResult<Expr> {
        let lhs = self.logical_or()?;
        match self.peek() {
            TokenKind::Assign => {
                self.bump();
                let value = self.assignment()?;
                let span = lhs.span.to(value.span);
                Ok(Expr::new(
                    ExprKind::Assign {
                        target: Box::new(lhs),
                        value: Box::new(value),
                    },
                    span,
                ))
            }
            TokenKind::PlusAssign => {
                self.bump();
                let value = self.assignment()?;
                let span = lhs.span.to(value.span);
                Ok(Expr::new(
                    ExprKind::AddAssign {
                        target: Box::new(lhs),
                        value: Box::new(value),
                    },
                    span,
                ))
            }
            _ => Ok(lhs),
        }
    }

    fn logical_or(&mut self) -> PResult<Expr> {
        let mut lhs = self.logical_and()?;
        while self.eat(&TokenKind::OrOr) {
            let rhs = self.logical_and()?;
            lhs = binary(BinOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn logical_and(&mut self) -> PResult<Expr> {
        let mut lhs = self.bit_or()?;
        while self.eat(&TokenKind::AndAnd) {
            let rhs = self.bit_or()?;
            lhs = binary(BinOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn bit_or(&mut self) -> PResult<Expr> {
        let mut lhs = self.bit_xor()?;
        while self.eat(&TokenKind::BitOr) {
            let rhs = self.bit_xor()?;
            lhs = binary(BinOp::BitOr, lhs, rhs);
        }
        Ok(lhs)
    }

    fn bit_xor(&mut self) -> PResult<Expr> {
        let mut lhs = self.bit_and()?;
        while self.eat(&TokenKind::BitXor) {
            let rhs = self.bit_and()?;
            lhs = binary(BinOp::BitXor, lhs, rhs);
        }
        Ok(lhs)
    }

    fn bit_and(&mut self) -> PResult<Expr> {
        let mut lhs = self.match_expr()?;
        while self.eat(&TokenKind::BitAnd) {
            let rhs = self.match_expr()?;
            lhs = binary(BinOp::BitAnd, lhs, rhs);
        }
        Ok(lhs)
    }

    fn match_expr(&mut self) -> PResult<Expr> {
        let lhs = self.equality()?;
        let negated = match self.peek() {
            TokenKind::Match => false,
            TokenKind::NotMatch => true,
            _ => return Ok(lhs),
        };
        self.bump();
        let pattern = self.pattern_operand()?;
        let span = lhs.span.to(pattern.span);
        Ok(Expr::new(
            ExprKind::Match {
                negated,
                operand: Some(Box::new(lhs)),
                pattern: Box::new(pattern),
            },
            span,
        ))
    }

    /// `=~` 우변: 정규식 리터럴 또는 const 패턴 참조
    fn pattern_operand(&mut self) -> PResult<Expr> {
        match self.bump() {
            Token {
                kind: TokenKind::RegexLit(p),
                span,
            } => Ok(Expr::new(ExprKind::RegexLit(p), span)),
            Token {
                kind: TokenKind::Ident(name),
                span,
            } => Ok(Expr::new(ExprKind::Ident(name), span)),
            _ => {
                self.error_here("expected regex literal or pattern name after match".to_owned());
                Err(Recover)
            }
        }
    }

    fn equality(&mut self) -> PResult<Expr> {
        let mut lhs = self.relational()?;
        loop {
            let op = match self.peek() {
                TokenKind::Eq => BinOp::Eq,
                TokenKind::Ne => BinOp::Ne,
                _ => return Ok(lhs),
            };
            self.bump();
            let rhs = self.relational()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn relational(&mut self) -> PResult<Expr> {
        let mut lhs = self.shift()?;
        loop {
            let op = match self.peek() {
                TokenKind::Lt => BinOp::Lt,
                TokenKind::Le => BinOp::Le,
                TokenKind::Gt => BinOp::Gt,
                TokenKind::Ge => BinOp::Ge,
                _ => return Ok(lhs),
            };
            self.bump();
            let rhs = self.shift()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn shift(&mut self) -> PResult<Expr> {
        let mut lhs = self.additive()?;
        loop {
            let op = match self.peek() {
                TokenKind::Shl => BinOp::Shl,
                TokenKind::Shr => BinOp::Shr,
                _ => return Ok(lhs),
            };
            self.bump();
            let rhs = self.additive()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn additive(&mut self) -> PResult<Expr> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.bump();
            let rhs = self.multiplicative()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn multiplicative(&mut self) -> PResult<Expr> {
        let mut lhs = self.power()?;
        loop {
            let op = match self.peek() {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::Percent => BinOp::Mod,
                _ => return Ok(lhs),
            };
            self.bump();
            let rhs = self.power()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn power(&mut self) -> PResult<Expr> {
        let lhs = self.unary()?;
        if self.eat(&TokenKind::Pow) {
            // 우결합
            let rhs = self.power()?;
            Ok(binary(BinOp::Pow, lhs, rhs))
        } else {
            Ok(lhs)
        }
    }

    fn unary(&mut self) -> PResult<Expr> {
        let op = match self.peek() {
            TokenKind::Not => UnOp::Not,
            TokenKind::Minus => UnOp::Neg,
            _ => return self.postfix(),
        };
        let span = self.bump().span;
        let operand = self.unary()?;
        let full = span.to(operand.span);
        Ok(Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            full,
        ))
    }

    fn postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.primary()?;
        loop {
            match self.peek() {
                TokenKind::LBracket => {
                    self.bump();
                    let mut keys = vec![self.expr()?];
                    while self.eat(&TokenKind::Comma) {
                        keys.push(self.expr()?);
                    }
                    let end = self.expect(&TokenKind::RBracket, "']'")?.span;
                    let span = expr.span.to(end);
                    expr = Expr::new(
                        ExprKind::Index {
                            target: Box::new(expr),
                            keys,
                        },
                        span,
                    );
                }
                TokenKind::Inc => {
                    let end = self.bump().span;
                    let span = expr.span.to(end);
                    expr = Expr::new(ExprKind::Inc(Box::new(expr)), span);
                }
                _ => return Ok(expr),
            }
        }
    }

    fn primary(&mut self) -> PResult<Expr> {
        let builtin = match self.peek() {
            TokenKind::Strptime => Some(Builtin::Strptime),
            TokenKind::Timestamp => Some(Builtin::Timestamp),
            TokenKind::Settime => Some(Builtin::Settime),
            TokenKind::Tolower => Some(Builtin::Tolower),
            TokenKind::Len => Some(Builtin::Len),
            TokenKind::Strtol => Some(Builtin::Strtol),
            TokenKind::Getfilename => Some(Builtin::Getfilename),
            _ => None,
        };
        if let Some(builtin) = builtin {
            return self.call(builtin);
        }

        let tok = self.bump();
        let expr = match tok.kind {
            TokenKind::IntLit(v) => Expr::new(ExprKind::IntLit(v), tok.span),
            TokenKind::FloatLit(v) => Expr::new(ExprKind::FloatLit(v), tok.span),
            TokenKind::StrLit(s) => Expr::new(ExprKind::StrLit(s), tok.span),
            TokenKind::RegexLit(p) => Expr::new(ExprKind::RegexLit(p), tok.span),
            TokenKind::Ident(name) => Expr::new(ExprKind::Ident(name), tok.span),
            TokenKind::CapRef(name) => {
                Expr::new(ExprKind::CapRef { name, group: None }, tok.span)
            }
            TokenKind::LParen => {
                let inner = self.expr()?;
                self.expect(&TokenKind::RParen, "')'")?;
                return Ok(inner);
            }
            other => {
                self.errors.push(CompileError::Parse {
                    span: tok.span,
                    reason: format!("expected expression, found {}", describe(&other)),
                });
                return Err(Recover);
            }
        };
        Ok(expr)
    }

    fn call(&mut self, builtin: Builtin) -> PResult<Expr> {
        let start = self.bump().span;
        self.expect(&TokenKind::LParen, "'('")?;
        let mut args = Vec::new();
        if !self.at(&TokenKind::RParen) {
            args.push(self.expr()?);
            while self.eat(&TokenKind::Comma) {
                args.push(self.expr()?);
            }
        }
        let end = self.expect(&TokenKind::RParen, "')'")?.span;
        Ok(Expr::new(
            ExprKind::Call { builtin, args },
            start.to(end),
        ))
    }
}

fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
    let span = lhs.span.to(rhs.span);
    Expr::new(
        ExprKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
        span,
    )
}

/// 조건 위치의 정규식 리터럴을 입력 라인 매치로 정규화합니다.
///
/// `/re/ { ... }`는 `입력라인 =~ /re/ { ... }`와 같습니다.
fn normalize_cond(expr: Expr) -> Expr {
    match expr.kind {
        ExprKind::RegexLit(_) => {
            let span = expr.span;
            Expr::new(
                ExprKind::Match {
                    negated: false,
                    operand: None,
                    pattern: Box::new(expr),
                },
                span,
            )
        }
        _ => expr,
    }
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Ident(name) => format!("identifier '{name}'"),
        TokenKind::CapRef(name) => format!("capture reference '${name}'"),
        TokenKind::IntLit(v) => format!("integer {v}"),
        TokenKind::FloatLit(v) => format!("float {v}"),
        TokenKind::StrLit(_) => "string literal".to_owned(),
        TokenKind::RegexLit(_) => "regex literal".to_owned(),
        TokenKind::Newline => "end of line".to_owned(),
        TokenKind::Eof => "end of input".to_owned(),
        other => format!("'{other:?}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;

    fn parse_src(src: &str) -> Result<Ast, CompileErrors> {
        parse(lex(src).unwrap())
    }

    #[test]
    fn parse_counter_decl_with_labels_and_alias() {
        let ast = parse_src("counter requests by method, code as \"http_requests\"\n").unwrap();
        let Item::Decl(Decl::Metric(decl)) = &ast.items[0] else {
            panic!("expected metric decl");
        };
        assert_eq!(decl.kind, MetricKind::Counter);
        assert_eq!(decl.name, "requests");
        assert_eq!(decl.labels, vec!["method", "code"]);
        assert_eq!(decl.alias.as_deref(), Some("http_requests"));
        assert!(!decl.hidden);
    }

    #[test]
    fn parse_hidden_gauge() {
        let ast = parse_src("hidden gauge state\n").unwrap();
        let Item::Decl(Decl::Metric(decl)) = &ast.items[0] else {
            panic!("expected metric decl");
        };
        assert!(decl.hidden);
        assert_eq!(decl.kind, MetricKind::Gauge);
    }

    #[test]
    fn parse_histogram_with_buckets() {
        let ast = parse_src("histogram latency buckets 1, 5, 10 by code\n").unwrap();
        let Item::Decl(Decl::Metric(decl)) = &ast.items[0] else {
            panic!("expected metric decl");
        };
        assert_eq!(decl.buckets, vec![1.0, 5.0, 10.0]);
        assert_eq!(decl.labels, vec!["code"]);
    }

    #[test]
    fn buckets_on_counter_is_an_error() {
        assert!(parse_src("counter c buckets 1, 2\n").is_err());
    }

    #[test]
    fn parse_pattern_action() {
        let ast = parse_src("counter hits\n/^GET/ { hits++ }\n").unwrap();
        let Item::Stmt(Stmt::Cond(cond)) = &ast.items[1] else {
            panic!("expected cond stmt");
        };
        let Cond::Expr(expr) = &cond.cond else {
            panic!("expected expr cond");
        };
        // 조건 위치의 정규식은 입력 라인 매치로 정규화됨
        assert!(matches!(
            &expr.kind,
            ExprKind::Match { operand: None, .. }
        ));
        assert_eq!(cond.then_block.len(), 1);
    }

    #[test]
    fn parse_else_block() {
        let ast = parse_src("counter a\ncounter b\n/x/ { a++ } else { b++ }\n").unwrap();
        let Item::Stmt(Stmt::Cond(cond)) = &ast.items[2] else {
            panic!("expected cond stmt");
        };
        assert!(cond.else_block.is_some());
    }

    #[test]
    fn parse_otherwise() {
        let ast = parse_src("counter misses\notherwise { misses++ }\n").unwrap();
        let Item::Stmt(Stmt::Cond(cond)) = &ast.items[1] else {
            panic!("expected cond stmt");
        };
        assert!(matches!(cond.cond, Cond::Otherwise(_)));
    }

    #[test]
    fn parse_indexed_increment_with_capref() {
        let ast = parse_src("counter hits by method\n/^(GET|POST)/ { hits[$1]++ }\n").unwrap();
        let Item::Stmt(Stmt::Cond(cond)) = &ast.items[1] else {
            panic!("expected cond stmt");
        };
        let Stmt::Expr(expr) = &cond.then_block[0] else {
            panic!("expected expr stmt");
        };
        let ExprKind::Inc(target) = &expr.kind else {
            panic!("expected inc, got {:?}", expr.kind);
        };
        assert!(matches!(target.kind, ExprKind::Index { .. }));
    }

    #[test]
    fn parse_del_statement() {
        let ast = parse_src("counter seen by ip\n/(\\S+)/ { del seen[$1] }\n").unwrap();
        let Item::Stmt(Stmt::Cond(cond)) = &ast.items[1] else {
            panic!("expected cond stmt");
        };
        assert!(matches!(cond.then_block[0], Stmt::Del { .. }));
    }

    #[test]
    fn precedence_mul_binds_tighter_than_add() {
        let ast = parse_src("gauge g\ng = 1 + 2 * 3\n").unwrap();
        let Item::Stmt(Stmt::Expr(expr)) = &ast.items[1] else {
            panic!("expected expr stmt");
        };
        let ExprKind::Assign { value, .. } = &expr.kind else {
            panic!("expected assign");
        };
        let ExprKind::Binary { op, rhs, .. } = &value.kind else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinOp::Add);
        assert!(matches!(
            rhs.kind,
            ExprKind::Binary { op: BinOp::Mul, .. }
        ));
    }

    #[test]
    fn match_binds_tighter_than_logical_and() {
        let ast = parse_src("counter c\n$1 =~ /x/ && $2 =~ /y/ { c++ }\n").unwrap();
        let Item::Stmt(Stmt::Cond(cond)) = &ast.items[1] else {
            panic!("expected cond");
        };
        let Cond::Expr(expr) = &cond.cond else {
            panic!("expected expr cond");
        };
        let ExprKind::Binary { op, lhs, rhs } = &expr.kind else {
            panic!("expected binary, got {:?}", expr.kind);
        };
        assert_eq!(*op, BinOp::And);
        assert!(matches!(lhs.kind, ExprKind::Match { .. }));
        assert!(matches!(rhs.kind, ExprKind::Match { .. }));
    }

    #[test]
    fn power_is_right_associative() {
        let ast = parse_src("gauge g\ng = 2 ** 3 ** 2\n").unwrap();
        let Item::Stmt(Stmt::Expr(expr)) = &ast.items[1] else {
            panic!("expected expr stmt");
        };
        let ExprKind::Assign { value, .. } = &expr.kind else {
            panic!("expected assign");
        };
        let ExprKind::Binary { op, rhs, .. } = &value.kind else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinOp::Pow);
        assert!(matches!(
            rhs.kind,
            ExprKind::Binary { op: BinOp::Pow, .. }
        ));
    }

    #[test]
    fn parse_builtin_calls() {
        let ast = parse_src("counter c\n/ts=(\\d+)/ { settime(strtol($1, 10)) }\n").unwrap();
        let Item::Stmt(Stmt::Cond(cond)) = &ast.items[1] else {
            panic!("expected cond");
        };
        let Stmt::Expr(expr) = &cond.then_block[0] else {
            panic!("expected expr stmt");
        };
        let ExprKind::Call { builtin, args } = &expr.kind else {
            panic!("expected call");
        };
        assert_eq!(*builtin, Builtin::Settime);
        assert_eq!(args.len(), 1);
    }

    #[test]
    fn def_is_rejected() {
        let errs = parse_src("def measure { }\n").unwrap_err();
        assert!(errs.to_string().contains("not supported"));
    }

    #[test]
    fn errors_accumulate_across_statements() {
        let errs = parse_src("counter c\nc = = 1\nc = = 2\n").unwrap_err();
        assert!(errs.len() >= 2);
    }

    #[test]
    fn nested_blocks() {
        let ast = parse_src("counter c\n/a/ {\n  /b/ {\n    c++\n  }\n}\n").unwrap();
        let Item::Stmt(Stmt::Cond(outer)) = &ast.items[1] else {
            panic!("expected cond");
        };
        assert!(matches!(outer.then_block[0], Stmt::Cond(_)));
    }

    #[test]
    fn unary_not_and_negation() {
        let ast = parse_src("gauge g\ng = -3\n").unwrap();
        let Item::Stmt(Stmt::Expr(expr)) = &ast.items[1] else {
            panic!("expected expr stmt");
        };
        let ExprKind::Assign { value, .. } = &expr.kind else {
            panic!("expected assign");
        };
        assert!(matches!(
            value.kind,
            ExprKind::Unary { op: UnOp::Neg, .. }
        ));
    }
}
