//! 추상 구문 트리
//!
//! 파서가 생성하고 타입 체커가 타입 주석을 채우는 트리입니다.
//! 모든 노드는 진단을 위한 [`Span`]을 보존합니다.

use metrail_core::MetricKind;

use crate::span::Span;
use crate::types::Type;

/// 컴파일 단위 — 선언과 문장의 순서 보존 시퀀스
#[derive(Debug, Clone, PartialEq)]
pub struct Ast {
    /// 소스 순서대로의 최상위 항목들
    pub items: Vec<Item>,
}

/// 최상위 항목
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    /// 선언 (메트릭, const 패턴)
    Decl(Decl),
    /// 실행 문장
    Stmt(Stmt),
}

/// 선언
#[derive(Debug, Clone, PartialEq)]
pub enum Decl {
    /// 메트릭 선언
    Metric(MetricDecl),
    /// 이름 있는 정규식 바인딩: `const FOO /re/`
    Const(ConstDecl),
}

/// 메트릭 선언: `counter foo by bar, baz as "alias"`
#[derive(Debug, Clone, PartialEq)]
pub struct MetricDecl {
    /// 메트릭 종류
    pub kind: MetricKind,
    /// 내보내기에서 숨김 (프로그램 내부 상태 용도)
    pub hidden: bool,
    /// 메트릭 이름
    pub name: String,
    /// 레이블 키 목록 (`by` 절)
    pub labels: Vec<String>,
    /// 내보내기용 별칭 (`as` 절)
    pub alias: Option<String>,
    /// 히스토그램 버킷 상한 목록 (`buckets` 절, histogram 전용)
    pub buckets: Vec<f64>,
    /// 선언 위치
    pub span: Span,
}

/// const 패턴 선언
#[derive(Debug, Clone, PartialEq)]
pub struct ConstDecl {
    /// 바인딩 이름
    pub name: String,
    /// 정규식 패턴 (구분자 제외)
    pub pattern: String,
    /// 선언 위치
    pub span: Span,
}

/// 문장
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// 조건부 블록 (패턴-액션 포함)
    Cond(CondStmt),
    /// 현재 라인 처리 중단
    Next(Span),
    /// datum 삭제: `del metric[keys]`
    Del {
        /// 대상 메트릭 이름
        metric: String,
        /// 레이블 키 표현식
        keys: Vec<Expr>,
        /// 문장 위치
        span: Span,
    },
    /// 표현식 문장 (할당, 증가, 빌틴 호출)
    Expr(Expr),
}

/// 조건부 블록
#[derive(Debug, Clone, PartialEq)]
pub struct CondStmt {
    /// 조건
    pub cond: Cond,
    /// 조건 성립 시 실행 블록
    pub then_block: Vec<Stmt>,
    /// else 블록
    pub else_block: Option<Vec<Stmt>>,
    /// 문장 위치
    pub span: Span,
}

/// 조건 종류
#[derive(Debug, Clone, PartialEq)]
pub enum Cond {
    /// 불리언 표현식 (패턴 매치 포함)
    Expr(Expr),
    /// 같은 스코프의 어떤 조건도 성립하지 않았을 때
    Otherwise(Span),
}

/// 표현식 — 종류, 위치, 타입 주석
///
/// `ty`는 파서 단계에서 [`Type::None`]이고 타입 체커가 채웁니다.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    /// 표현식 종류
    pub kind: ExprKind,
    /// 소스 위치
    pub span: Span,
    /// 타입 체커가 부여한 타입
    pub ty: Type,
}

impl Expr {
    /// 타입 주석 없는 새 표현식을 생성합니다.
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self {
            kind,
            span,
            ty: Type::None,
        }
    }
}

/// 이항 연산자
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    /// 덧셈 (문자열이면 연결)
    Add,
    /// 뺄셈
    Sub,
    /// 곱셈
    Mul,
    /// 나눗셈
    Div,
    /// 나머지
    Mod,
    /// 거듭제곱
    Pow,
    /// 미만
    Lt,
    /// 이하
    Le,
    /// 초과
    Gt,
    /// 이상
    Ge,
    /// 같음
    Eq,
    /// 다름
    Ne,
    /// 논리 AND (양쪽 모두 평가)
    And,
    /// 논리 OR (양쪽 모두 평가)
    Or,
    /// 비트 AND
    BitAnd,
    /// 비트 OR
    BitOr,
    /// 비트 XOR
    BitXor,
    /// 좌측 시프트
    Shl,
    /// 우측 시프트
    Shr,
}

/// 단항 연산자
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    /// 논리 부정
    Not,
    /// 산술 부정
    Neg,
}

/// 빌틴 함수
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    /// `strptime(s, format)` — 문자열을 타임스탬프로 파싱
    Strptime,
    /// `timestamp()` — 현재 유효 타임스탬프
    Timestamp,
    /// `settime(ts)` — 현재 라인의 유효 타임스탬프 설정
    Settime,
    /// `tolower(s)`
    Tolower,
    /// `len(s)`
    Len,
    /// `strtol(s, base)`
    Strtol,
    /// `getfilename()` — 현재 라인의 파일명
    Getfilename,
}

impl Builtin {
    /// DSL 표기 이름을 반환합니다.
    pub fn name(self) -> &'static str {
        match self {
            Self::Strptime => "strptime",
            Self::Timestamp => "timestamp",
            Self::Settime => "settime",
            Self::Tolower => "tolower",
            Self::Len => "len",
            Self::Strtol => "strtol",
            Self::Getfilename => "getfilename",
        }
    }

    /// 기대하는 인자 수를 반환합니다.
    pub fn arity(self) -> usize {
        match self {
            Self::Strptime | Self::Strtol => 2,
            Self::Settime | Self::Tolower | Self::Len => 1,
            Self::Timestamp | Self::Getfilename => 0,
        }
    }
}

/// 표현식 종류
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// 정수 리터럴
    IntLit(i64),
    /// 부동소수점 리터럴
    FloatLit(f64),
    /// 문자열 리터럴
    StrLit(String),
    /// 정규식 리터럴
    RegexLit(String),
    /// 식별자 (메트릭 또는 const 패턴 참조)
    Ident(String),
    /// 캡처 그룹 참조. `group`은 타입 체커가 해석한 그룹 번호
    CapRef {
        /// `$` 뒤의 이름 또는 번호
        name: String,
        /// 해석된 그룹 번호 (체커가 채움)
        group: Option<usize>,
    },
    /// 레이블 인덱싱: `metric[k1, k2]`
    Index {
        /// 대상 (메트릭 식별자)
        target: Box<Expr>,
        /// 레이블 값 표현식
        keys: Vec<Expr>,
    },
    /// 이항 연산
    Binary {
        /// 연산자
        op: BinOp,
        /// 좌변
        lhs: Box<Expr>,
        /// 우변
        rhs: Box<Expr>,
    },
    /// 단항 연산
    Unary {
        /// 연산자
        op: UnOp,
        /// 피연산자
        operand: Box<Expr>,
    },
    /// 패턴 매치: `expr =~ /re/`. operand가 None이면 입력 라인에 매칭
    Match {
        /// `!~`이면 true
        negated: bool,
        /// 매칭 대상 (None = 입력 라인)
        operand: Option<Box<Expr>>,
        /// 패턴 (정규식 리터럴 또는 const 참조)
        pattern: Box<Expr>,
    },
    /// 할당: `target = value`
    Assign {
        /// 대상 (메트릭 또는 인덱싱)
        target: Box<Expr>,
        /// 값
        value: Box<Expr>,
    },
    /// 증가 할당: `target += value`
    AddAssign {
        /// 대상
        target: Box<Expr>,
        /// 값
        value: Box<Expr>,
    },
    /// 증가: `target++`
    Inc(Box<Expr>),
    /// 빌틴 호출
    Call {
        /// 빌틴 종류
        builtin: Builtin,
        /// 인자
        args: Vec<Expr>,
    },
}
