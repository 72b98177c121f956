//! 바이트코드 정의
//!
//! 스택 VM이 실행하는 선형 명령어 스트림과 컴파일된 프로그램 컨테이너를
//! 정의합니다. 문자열/실수 상수는 사이드 테이블에 인터닝되고 명령어는
//! 테이블 인덱스만 담습니다. 정규식은 코드 생성 시 한 번 컴파일되어
//! 정규식 테이블에 저장됩니다.

use std::fmt;

use metrail_core::{MetricKind, ValueKind};

/// 단일 바이트코드 명령어
///
/// 산술은 타입별 변형(`...Int`/`...Float`)으로 나뉩니다. Float 변형은
/// Int 피연산자를 자동 승격합니다. Datum 연산(`Inc`, `Iadd`, `Iset`,
/// `Fset`, `Sset`, `Fadd`, `Del`)은 `Dload`가 올린 datum 참조를 소비하며
/// 즉시 커밋됩니다.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Instr {
    /// 정수 상수 push
    PushInt(i64),
    /// 실수 상수 push (floats 테이블 인덱스)
    PushFloat(usize),
    /// 문자열 상수 push (strings 테이블 인덱스)
    PushStr(usize),
    /// true push
    PushTrue,
    /// false push
    PushFalse,
    /// 현재 입력 라인 텍스트 push
    PushLine,
    /// 스택 최상단 버림
    Pop,

    /// 지역 슬롯 로드
    LoadLocal(usize),
    /// 지역 슬롯 저장
    StoreLocal(usize),

    /// 정수 덧셈
    AddInt,
    /// 정수 뺄셈
    SubInt,
    /// 정수 곱셈
    MulInt,
    /// 정수 나눗셈 (0 나누기는 런타임 에러)
    DivInt,
    /// 정수 나머지
    ModInt,
    /// 정수 거듭제곱
    PowInt,
    /// 실수 덧셈 (Int 피연산자 승격)
    AddFloat,
    /// 실수 뺄셈
    SubFloat,
    /// 실수 곱셈
    MulFloat,
    /// 실수 나눗셈
    DivFloat,
    /// 실수 나머지
    ModFloat,
    /// 실수 거듭제곱
    PowFloat,
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
    /// 산술 부정
    Neg,
    /// 문자열 연결
    Concat,

    /// 미만 비교
    CmpLt,
    /// 이하 비교
    CmpLe,
    /// 초과 비교
    CmpGt,
    /// 이상 비교
    CmpGe,
    /// 동등 비교
    CmpEq,
    /// 비동등 비교
    CmpNe,
    /// 논리 AND (양쪽 모두 이미 평가됨)
    And,
    /// 논리 OR
    Or,
    /// 논리 부정
    Not,

    /// 무조건 분기 (명령어 인덱스)
    Jmp(usize),
    /// 스택 최상단이 false면 분기
    JmpIfFalse(usize),

    /// 정규식 매치 (regexes 테이블 인덱스). 스택의 문자열을 소비하고
    /// Bool을 push. 성공 시 캡처 그룹을 프레임에 기록
    Match(usize),
    /// 캡처 그룹 참조 (그룹 번호) -> 문자열 push
    Capref(usize),

    /// 메트릭 참조 push (metrics 테이블 인덱스)
    Mload(usize),
    /// N개 레이블 값과 메트릭 참조를 pop하고 datum 참조를 push.
    /// 없는 레이블 튜플은 생성
    Dload(usize),
    /// datum 1 증가
    Inc,
    /// datum에 정수 더하기
    Iadd,
    /// datum에 실수 더하기
    Fadd,
    /// datum 정수 설정
    Iset,
    /// datum 실수 설정 (히스토그램이면 관측 기록)
    Fset,
    /// datum 문자열 설정
    Sset,
    /// N개 레이블 값과 메트릭 참조를 pop하고 해당 datum 제거
    Del(usize),

    /// 현재 라인의 유효 타임스탬프 설정
    Settime,
    /// 문자열을 타임스탬프로 파싱
    Strptime,
    /// 현재 유효 타임스탬프 push
    Timestamp,
    /// 소문자 변환
    Tolower,
    /// 문자열 길이
    Len,
    /// 진법 변환 정수 파싱
    Strtol,
    /// 현재 라인의 파일명 push
    Getfilename,

    /// 현재 라인 처리 중단
    Next,
    /// 프로그램 종료
    Halt,
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PushInt(v) => write!(f, "push_int {v}"),
            Self::PushFloat(i) => write!(f, "push_float [{i}]"),
            Self::PushStr(i) => write!(f, "push_str [{i}]"),
            Self::PushTrue => f.write_str("push_true"),
            Self::PushFalse => f.write_str("push_false"),
            Self::PushLine => f.write_str("push_line"),
            Self::Pop => f.write_str("pop"),
            Self::LoadLocal(i) => write!(f, "load_local {i}"),
            Self::StoreLocal(i) => write!(f, "store_local {i}"),
            Self::AddInt => f.write_str("add_int"),
            Self::SubInt => f.write_str("sub_int"),
            Self::MulInt => f.write_str("mul_int"),
            Self::DivInt => f.write_str("div_int"),
            Self::ModInt => f.write_str("mod_int"),
            Self::PowInt => f.write_str("pow_int"),
            Self::AddFloat => f.write_str("add_float"),
            Self::SubFloat => f.write_str("sub_float"),
            Self::MulFloat => f.write_str("mul_float"),
            Self::DivFloat => f.write_str("div_float"),
            Self::ModFloat => f.write_str("mod_float"),
            Self::PowFloat => f.write_str("pow_float"),
            Self::BitAnd => f.write_str("bit_and"),
            Self::BitOr => f.write_str("bit_or"),
            Self::BitXor => f.write_str("bit_xor"),
            Self::Shl => f.write_str("shl"),
            Self::Shr => f.write_str("shr"),
            Self::Neg => f.write_str("neg"),
            Self::Concat => f.write_str("concat"),
            Self::CmpLt => f.write_str("cmp_lt"),
            Self::CmpLe => f.write_str("cmp_le"),
            Self::CmpGt => f.write_str("cmp_gt"),
            Self::CmpGe => f.write_str("cmp_ge"),
            Self::CmpEq => f.write_str("cmp_eq"),
            Self::CmpNe => f.write_str("cmp_ne"),
            Self::And => f.write_str("and"),
            Self::Or => f.write_str("or"),
            Self::Not => f.write_str("not"),
            Self::Jmp(t) => write!(f, "jmp {t}"),
            Self::JmpIfFalse(t) => write!(f, "jmp_if_false {t}"),
            Self::Match(i) => write!(f, "match [{i}]"),
            Self::Capref(g) => write!(f, "capref {g}"),
            Self::Mload(i) => write!(f, "mload [{i}]"),
            Self::Dload(n) => write!(f, "dload {n}"),
            Self::Inc => f.write_str("inc"),
            Self::Iadd => f.write_str("iadd"),
            Self::Fadd => f.write_str("fadd"),
            Self::Iset => f.write_str("iset"),
            Self::Fset => f.write_str("fset"),
            Self::Sset => f.write_str("sset"),
            Self::Del(n) => write!(f, "del {n}"),
            Self::Settime => f.write_str("settime"),
            Self::Strptime => f.write_str("strptime"),
            Self::Timestamp => f.write_str("timestamp"),
            Self::Tolower => f.write_str("tolower"),
            Self::Len => f.write_str("len"),
            Self::Strtol => f.write_str("strtol"),
            Self::Getfilename => f.write_str("getfilename"),
            Self::Next => f.write_str("next"),
            Self::Halt => f.write_str("halt"),
        }
    }
}

/// 프로그램이 선언한 메트릭 서술자
///
/// 런타임이 스토어에 `find_or_create`를 호출할 때 사용합니다.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricDescriptor {
    /// 메트릭 이름
    pub name: String,
    /// 메트릭 종류
    pub kind: MetricKind,
    /// 값 저장 형식
    pub value_kind: ValueKind,
    /// 레이블 키 목록
    pub labels: Vec<String>,
    /// 히스토그램 버킷 상한 (+∞ 제외)
    pub buckets: Vec<f64>,
    /// 내보내기에서 숨김
    pub hidden: bool,
    /// 내보내기용 별칭
    pub alias: Option<String>,
    /// 선언된 소스 라인 (진단/출처 표기용)
    pub source_line: u32,
}

/// 컴파일된 정규식과 원본 패턴
#[derive(Debug, Clone)]
pub struct CompiledRegex {
    /// 원본 패턴 텍스트
    pub pattern: String,
    /// 컴파일된 정규식
    pub regex: regex::Regex,
}

/// 컴파일된 프로그램 — 빌드 후 불변
#[derive(Debug, Clone)]
pub struct Program {
    /// 프로그램 이름 (소스 파일명)
    pub name: String,
    /// 소스 다이제스트 (변경 감지용)
    pub digest: u64,
    /// 명령어 스트림
    pub instrs: Vec<Instr>,
    /// 인터닝된 문자열 상수
    pub strings: Vec<String>,
    /// 인터닝된 실수 상수
    pub floats: Vec<f64>,
    /// 정규식 테이블
    pub regexes: Vec<CompiledRegex>,
    /// 선언 순서의 메트릭 서술자
    pub metrics: Vec<MetricDescriptor>,
    /// 프레임 지역 슬롯 수
    pub num_locals: usize,
    /// 캡처 배열 크기 (그룹 0 포함 최대 그룹 수)
    pub num_captures: usize,
}

impl Program {
    /// 디스어셈블리 텍스트를 생성합니다. `--dump-bytecode` 출력이며
    /// 결정성 테스트의 비교 기준이기도 합니다.
    pub fn disassemble(&self) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        let _ = writeln!(out, "program {} digest={:016x}", self.name, self.digest);
        for (i, m) in self.metrics.iter().enumerate() {
            let _ = writeln!(
                out,
                "metric [{i}] {} {} labels={:?} line={}",
                m.kind, m.name, m.labels, m.source_line
            );
        }
        for (i, s) in self.strings.iter().enumerate() {
            let _ = writeln!(out, "string [{i}] {s:?}");
        }
        for (i, v) in self.floats.iter().enumerate() {
            let _ = writeln!(out, "float [{i}] {v:?}");
        }
        for (i, r) in self.regexes.iter().enumerate() {
            let _ = writeln!(out, "regex [{i}] /{}/", r.pattern);
        }
        for (pc, instr) in self.instrs.iter().enumerate() {
            let _ = writeln!(out, "{pc:4}  {instr}");
        }
        out
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.disassemble())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instr_display_is_stable() {
        assert_eq!(Instr::PushInt(7).to_string(), "push_int 7");
        assert_eq!(Instr::Match(2).to_string(), "match [2]");
        assert_eq!(Instr::JmpIfFalse(14).to_string(), "jmp_if_false 14");
        assert_eq!(Instr::Dload(3).to_string(), "dload 3");
    }
}
