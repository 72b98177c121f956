//! 렉서 — 바이트 스트림을 위치 정보가 달린 토큰 스트림으로 변환합니다.
//!
//! 주석은 `#`부터 라인 끝까지입니다. 개행은 문장 구분자이므로
//! [`TokenKind::Newline`] 토큰으로 보존됩니다.
//!
//! `/`는 나눗셈과 정규식 리터럴 양쪽에 쓰입니다. 직전의 유효 토큰이
//! 피연산자를 끝내는 토큰(식별자, 리터럴, `)`, `]`, 캡처 참조, `++`)이면
//! 나눗셈으로, 그 외에는 정규식 시작으로 해석합니다.

use crate::error::{CompileError, CompileErrors};
use crate::span::Span;

/// 토큰 종류
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // 리터럴과 이름
    /// 식별자
    Ident(String),
    /// 캡처 그룹 참조: `$0`, `$1`, `$name`
    CapRef(String),
    /// 정수 리터럴
    IntLit(i64),
    /// 부동소수점 리터럴
    FloatLit(f64),
    /// 문자열 리터럴 (이스케이프 해제된 값)
    StrLit(String),
    /// 정규식 리터럴 (`/.../`, 구분자 제외, `\/`는 `/`로 해제)
    RegexLit(String),

    // 키워드
    Counter,
    Gauge,
    Timer,
    Text,
    Histogram,
    Hidden,
    Const,
    By,
    As,
    Next,
    Def,
    Del,
    Else,
    Otherwise,
    Getfilename,
    Strptime,
    Strtol,
    Timestamp,
    Settime,
    Tolower,
    Len,

    // 연산자
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Pow,
    Assign,
    PlusAssign,
    Inc,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    AndAnd,
    OrOr,
    Not,
    Match,
    NotMatch,
    Shl,
    Shr,
    BitAnd,
    BitOr,
    BitXor,

    // 구두점
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,

    /// 문장 구분자
    Newline,
    /// 입력 끝
    Eof,
}

impl TokenKind {
    /// 이 토큰이 피연산자를 끝내는지 — 직후의 `/`가 나눗셈인지 판정에 사용
    fn ends_operand(&self) -> bool {
        matches!(
            self,
            TokenKind::Ident(_)
                | TokenKind::CapRef(_)
                | TokenKind::IntLit(_)
                | TokenKind::FloatLit(_)
                | TokenKind::StrLit(_)
                | TokenKind::RParen
                | TokenKind::RBracket
                | TokenKind::Inc
        )
    }
}

/// 위치 정보가 달린 토큰
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// 토큰 종류
    pub kind: TokenKind,
    /// 소스 위치
    pub span: Span,
}

/// 식별자를 키워드로 해석합니다. 키워드가 아니면 None.
fn keyword(ident: &str) -> Option<TokenKind> {
    let kind = match ident {
        "counter" => TokenKind::Counter,
        "gauge" => TokenKind::Gauge,
        "timer" => TokenKind::Timer,
        "text" => TokenKind::Text,
        "histogram" => TokenKind::Histogram,
        "hidden" => TokenKind::Hidden,
        "const" => TokenKind::Const,
        "by" => TokenKind::By,
        "as" => TokenKind::As,
        "next" => TokenKind::Next,
        "def" => TokenKind::Def,
        "del" => TokenKind::Del,
        "else" => TokenKind::Else,
        "otherwise" => TokenKind::Otherwise,
        "getfilename" => TokenKind::Getfilename,
        "strptime" => TokenKind::Strptime,
        "strtol" => TokenKind::Strtol,
        "timestamp" => TokenKind::Timestamp,
        "settime" => TokenKind::Settime,
        "tolower" => TokenKind::Tolower,
        "len" => TokenKind::Len,
        _ => return None,
    };
    Some(kind)
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    col: u32,
    tokens: Vec<Token>,
    errors: CompileErrors,
}

impl Lexer {
    fn new(src: &str) -> Self {
        Self {
            chars: src.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
            tokens: Vec::new(),
            errors: CompileErrors::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek2(&self) -> Option<char> {
        self.chars.get(self.pos + 1).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += 1;
        if ch == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(ch)
    }

    fn push(&mut self, kind: TokenKind, start_col: u32) {
        let end_col = self.col.saturating_sub(1).max(start_col);
        self.tokens.push(Token {
            kind,
            span: Span::new(self.line, start_col, end_col),
        });
    }

    fn error(&mut self, span: Span, reason: impl Into<String>) {
        self.errors.push(CompileError::Lex {
            span,
            reason: reason.into(),
        });
    }

    /// 직전의 유효 토큰이 피연산자를 끝내면 `/`는 나눗셈
    ///
    /// 예외: `const NAME /re/`처럼 현재 논리 라인이 `const`로 시작했으면
    /// 식별자 뒤라도 정규식 시작으로 해석합니다.
    fn slash_is_division(&self) -> bool {
        let line_starts_with_const = self
            .tokens
            .iter()
            .rev()
            .take_while(|t| t.kind != TokenKind::Newline)
            .last()
            .is_some_and(|t| t.kind == TokenKind::Const);
        if line_starts_with_const {
            return false;
        }
        self.tokens
            .iter()
            .rev()
            .find(|t| t.kind != TokenKind::Newline)
            .is_some_and(|t| t.kind.ends_operand())
    }

    fn run(mut self) -> Result<Vec<Token>, CompileErrors> {
        while let Some(ch) = self.peek() {
            let start_col = self.col;
            let start_line = self.line;
            match ch {
                ' ' | '\t' | '\r' => {
                    self.bump();
                }
                '\n' => {
                    self.bump();
                    // 연속 개행은 하나로 축약
                    if !matches!(
                        self.tokens.last().map(|t| &t.kind),
                        Some(TokenKind::Newline) | None
                    ) {
                        self.tokens.push(Token {
                            kind: TokenKind::Newline,
                            span: Span::point(start_line, start_col),
                        });
                    }
                }
                '#' => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                'a'..='z' | 'A'..='Z' | '_' => self.lex_ident(),
                '0'..='9' => self.lex_number(),
                '"' => self.lex_string(),
                '$' => self.lex_capref(),
                '/' => {
                    if self.slash_is_division() {
                        self.bump();
                        self.push(TokenKind::Slash, start_col);
                    } else {
                        self.lex_regex();
                    }
                }
                _ => self.lex_operator(),
            }
        }
        self.tokens.push(Token {
            kind: TokenKind::Eof,
            span: Span::point(self.line, self.col),
        });
        self.errors.into_result(self.tokens)
    }

    fn lex_ident(&mut self) {
        let start_col = self.col;
        let mut ident = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                ident.push(c);
                self.bump();
            } else {
                break;
            }
        }
        let kind = keyword(&ident).unwrap_or(TokenKind::Ident(ident));
        self.push(kind, start_col);
    }

    fn lex_number(&mut self) {
        let start_col = self.col;
        let start_line = self.line;
        let mut digits = String::new();
        let mut is_float = false;
        while let Some(c) = self.peek() {
            match c {
                '0'..='9' => {
                    digits.push(c);
                    self.bump();
                }
                '.' if !is_float && self.peek2().is_some_and(|c| c.is_ascii_digit()) => {
                    is_float = true;
                    digits.push(c);
                    self.bump();
                }
                _ => break,
            }
        }
        if is_float {
            match digits.parse::<f64>() {
                Ok(v) => self.push(TokenKind::FloatLit(v), start_col),
                Err(_) => self.error(
                    Span::new(start_line, start_col, self.col.saturating_sub(1)),
                    format!("invalid float literal '{digits}'"),
                ),
            }
        } else {
            match digits.parse::<i64>() {
                Ok(v) => self.push(TokenKind::IntLit(v), start_col),
                Err(_) => self.error(
                    Span::new(start_line, start_col, self.col.saturating_sub(1)),
                    format!("integer literal '{digits}' out of range"),
                ),
            }
        }
    }

    fn lex_string(&mut self) {
        let start_col = self.col;
        let start_line = self.line;
        self.bump(); // 여는 따옴표
        let mut value = String::new();
        loop {
            match self.bump() {
                Some('"') => {
                    self.push(TokenKind::StrLit(value), start_col);
                    return;
                }
                Some('\\') => match self.bump() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('\\') => value.push('\\'),
                    Some('"') => value.push('"'),
                    Some(other) => {
                        let span = Span::point(self.line, self.col.saturating_sub(1));
                        self.error(span, format!("unknown escape '\\{other}' in string"));
                    }
                    None => break,
                },
                Some('\n') | None => break,
                Some(c) => value.push(c),
            }
        }
        self.error(
            Span::point(start_line, start_col),
            "unterminated string literal",
        );
    }

    fn lex_capref(&mut self) {
        let start_col = self.col;
        let start_line = self.line;
        self.bump(); // '$'
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                name.push(c);
                self.bump();
            } else {
                break;
            }
        }
        if name.is_empty() {
            self.error(
                Span::point(start_line, start_col),
                "expected capture group name or number after '$'",
            );
            return;
        }
        self.push(TokenKind::CapRef(name), start_col);
    }

    fn lex_regex(&mut self) {
        let start_col = self.col;
        let start_line = self.line;
        self.bump(); // 여는 '/'
        let mut pattern = String::new();
        loop {
            match self.bump() {
                Some('/') => {
                    self.push(TokenKind::RegexLit(pattern), start_col);
                    return;
                }
                Some('\\') => match self.bump() {
                    // `\/`만 해제하고 나머지 이스케이프는 regex 엔진에 그대로 전달
                    Some('/') => pattern.push('/'),
                    Some(other) => {
                        pattern.push('\\');
                        pattern.push(other);
                    }
                    None => break,
                },
                Some('\n') | None => break,
                Some(c) => pattern.push(c),
            }
        }
        self.error(
            Span::point(start_line, start_col),
            "unterminated regex literal",
        );
    }

    fn lex_operator(&mut self) {
        let start_col = self.col;
        let start_line = self.line;
        let ch = match self.bump() {
            Some(c) => c,
            None => return,
        };
        let next = self.peek();
        let kind = match (ch, next) {
            ('*', Some('*')) => {
                self.bump();
                TokenKind::Pow
            }
            ('+', Some('+')) => {
                self.bump();
                TokenKind::Inc
            }
            ('+', Some('=')) => {
                self.bump();
                TokenKind::PlusAssign
            }
            ('=', Some('=')) => {
                self.bump();
                TokenKind::Eq
            }
            ('=', Some('~')) => {
                self.bump();
                TokenKind::Match
            }
            ('!', Some('=')) => {
                self.bump();
                TokenKind::Ne
            }
            ('!', Some('~')) => {
                self.bump();
                TokenKind::NotMatch
            }
            ('<', Some('=')) => {
                self.bump();
                TokenKind::Le
            }
            ('<', Some('<')) => {
                self.bump();
                TokenKind::Shl
            }
            ('>', Some('=')) => {
                self.bump();
                TokenKind::Ge
            }
            ('>', Some('>')) => {
                self.bump();
                TokenKind::Shr
            }
            ('&', Some('&')) => {
                self.bump();
                TokenKind::AndAnd
            }
            ('|', Some('|')) => {
                self.bump();
                TokenKind::OrOr
            }
            ('+', _) => TokenKind::Plus,
            ('-', _) => TokenKind::Minus,
            ('*', _) => TokenKind::Star,
            ('%', _) => TokenKind::Percent,
            ('=', _) => TokenKind::Assign,
            ('<', _) => TokenKind::Lt,
            ('>', _) => TokenKind::Gt,
            ('!', _) => TokenKind::Not,
            ('&', _) => TokenKind::BitAnd,
            ('|', _) => TokenKind::BitOr,
            ('^', _) => TokenKind::BitXor,
            ('(', _) => TokenKind::LParen,
            (')', _) => TokenKind::RParen,
            ('[', _) => TokenKind::LBracket,
            (']', _) => TokenKind::RBracket,
            ('{', _) => TokenKind::LBrace,
            ('}', _) => TokenKind::RBrace,
            (',', _) => TokenKind::Comma,
            (other, _) => {
                self.error(
                    Span::point(start_line, start_col),
                    format!("unexpected character '{other}'"),
                );
                return;
            }
        };
        self.push(kind, start_col);
    }
}

/// 소스 전체를 토큰화합니다.
///
/// 에러가 있어도 가능한 한 계속 진행하여 모든 렉서 에러를 한 번에
/// 보고합니다. 에러가 하나라도 있으면 `Err`를 반환합니다.
pub fn lex(src: &str) -> Result<Vec<Token>, CompileErrors> {
    Lexer::new(src).run()
}
