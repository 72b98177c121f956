//! 가상 머신 — 컴파일된 프로그램을 로그 라인마다 실행하는 스택 머신
//!
//! VM 하나가 프로그램 하나를 소유합니다. 라인마다 스택과 프레임을
//! 리셋하고 PC 0부터 `halt` 또는 `next`까지 실행합니다. datum 변경은
//! 명령어 실행 즉시 커밋되며 트랜잭션이 없습니다. 런타임 에러는 현재
//! 라인에 국한되고, 프로그램별 에러 카운터에 집계된 뒤 VM은 다음
//! 라인을 계속 처리합니다.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use metrail_core::telemetry::{self, LABEL_PROG};
use metrail_core::LogLine;
use metrail_lang::{Instr, Program};

use crate::error::{RuntimeError, StoreError};
use crate::store::{Datum, DatumValue, Metric, Store};
use crate::timeparse::{self, TimeOptions};

/// 프로그램별 실행 통계
///
/// loader와 VM이 공유하며, 테스트와 상태 표시가 익스포터를 거치지 않고
/// 직접 읽을 수 있습니다.
#[derive(Debug, Default)]
pub struct ProgStats {
    /// 로드 성공 수
    pub loads: AtomicU64,
    /// 컴파일 실패 수
    pub load_errors: AtomicU64,
    /// 라인 실행 중 런타임 에러 수
    pub runtime_errors: AtomicU64,
    /// 백프레셔로 드롭된 라인 수
    pub lines_dropped: AtomicU64,
    /// 처리한 라인 수
    pub lines_processed: AtomicU64,
}

/// 스택 값
#[derive(Debug, Clone)]
enum Value {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Metric(Arc<Metric>),
    Datum(Arc<Datum>),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::Bool(_) => "bool",
            Self::Metric(_) => "metric",
            Self::Datum(_) => "datum",
        }
    }
}

/// 하나의 프로그램을 실행하는 VM 인스턴스
pub struct Vm {
    program: Arc<Program>,
    /// program.metrics와 인덱스가 정렬된 스토어 핸들
    metrics: Vec<Arc<Metric>>,
    stats: Arc<ProgStats>,
    time_opts: TimeOptions,

    // 라인마다 리셋되는 실행 상태
    stack: Vec<Value>,
    captures: Vec<Option<String>>,
    locals: Vec<Value>,
    /// 현재 라인의 유효 타임스탬프 (epoch 초)
    effective_ts: i64,
}

impl Vm {
    /// 프로그램의 메트릭을 스토어에 등록하고 VM을 생성합니다.
    ///
    /// 서술자 충돌은 로드 실패로 이어집니다 (기존 프로그램은 유지됨).
    pub fn new(
        program: Arc<Program>,
        store: &Store,
        stats: Arc<ProgStats>,
        time_opts: TimeOptions,
    ) -> Result<Self, StoreError> {
        let mut metrics = Vec::with_capacity(program.metrics.len());
        for desc in &program.metrics {
            metrics.push(store.find_or_create(&program.name, desc)?);
        }
        let num_captures = program.num_captures;
        let num_locals = program.num_locals;
        Ok(Self {
            program,
            metrics,
            stats,
            time_opts,
            stack: Vec::with_capacity(16),
            captures: vec![None; num_captures],
            locals: vec![Value::Int(0); num_locals],
            effective_ts: 0,
        })
    }

    /// 프로그램 이름을 반환합니다.
    pub fn name(&self) -> &str {
        &self.program.name
    }

    /// 한 라인을 실행합니다.
    ///
    /// 런타임 에러는 집계/로깅만 하고 전파하지 않습니다. 에러 전까지의
    /// datum 변경은 그대로 남습니다.
    pub fn process_line(&mut self, line: &LogLine) {
        self.stats.lines_processed.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = self.execute(line) {
            self.stats.runtime_errors.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(
                telemetry::PROG_RUNTIME_ERRORS_TOTAL,
                LABEL_PROG => self.program.name.clone()
            )
            .increment(1);
            tracing::debug!(
                prog = %self.program.name,
                line = %line.text,
                error = %e,
                "runtime error, line dropped"
            );
        }
    }

    fn reset(&mut self, line: &LogLine) {
        self.stack.clear();
        for slot in &mut self.captures {
            *slot = None;
        }
        // $0은 매치 전까지 입력 라인 전체
        self.captures[0] = Some(line.text.clone());
        for slot in &mut self.locals {
            *slot = Value::Int(0);
        }
        self.effective_ts = line
            .received_at
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
    }

    fn execute(&mut self, line: &LogLine) -> Result<(), RuntimeError> {
        self.reset(line);
        let program = Arc::clone(&self.program);
        let mut pc = 0usize;

        while pc < program.instrs.len() {
            let instr = program.instrs[pc];
            pc += 1;
            match instr {
                Instr::PushInt(v) => self.stack.push(Value::Int(v)),
                Instr::PushFloat(i) => self.stack.push(Value::Float(program.floats[i])),
                Instr::PushStr(i) => {
                    self.stack.push(Value::Str(program.strings[i].clone()));
                }
                Instr::PushTrue => self.stack.push(Value::Bool(true)),
                Instr::PushFalse => self.stack.push(Value::Bool(false)),
                Instr::PushLine => self.stack.push(Value::Str(line.text.clone())),
                Instr::Pop => {
                    self.pop(pc)?;
                }

                Instr::LoadLocal(slot) => self.stack.push(self.locals[slot].clone()),
                Instr::StoreLocal(slot) => {
                    self.locals[slot] = self.pop(pc)?;
                }

                Instr::AddInt => self.int_binop(pc, |a, b| {
                    a.checked_add(b).ok_or_else(overflow)
                })?,
                Instr::SubInt => self.int_binop(pc, |a, b| {
                    a.checked_sub(b).ok_or_else(overflow)
                })?,
                Instr::MulInt => self.int_binop(pc, |a, b| {
                    a.checked_mul(b).ok_or_else(overflow)
                })?,
                Instr::DivInt => self.int_binop(pc, |a, b| {
                    if b == 0 {
                        Err(RuntimeError::DivideByZero)
                    } else {
                        Ok(a / b)
                    }
                })?,
                Instr::ModInt => self.int_binop(pc, |a, b| {
                    if b == 0 {
                        Err(RuntimeError::DivideByZero)
                    } else {
                        Ok(a % b)
                    }
                })?,
                Instr::PowInt => self.int_binop(pc, |a, b| {
                    let exp = u32::try_from(b)
                        .map_err(|_| RuntimeError::Range("negative exponent".to_owned()))?;
                    a.checked_pow(exp).ok_or_else(overflow)
                })?,
                Instr::AddFloat => self.float_binop(pc, |a, b| a + b)?,
                Instr::SubFloat => self.float_binop(pc, |a, b| a - b)?,
                Instr::MulFloat => self.float_binop(pc, |a, b| a * b)?,
                Instr::DivFloat => self.float_binop(pc, |a, b| a / b)?,
                Instr::ModFloat => self.float_binop(pc, |a, b| a % b)?,
                Instr::PowFloat => self.float_binop(pc, f64::powf)?,
                Instr::BitAnd => self.int_binop(pc, |a, b| Ok(a & b))?,
                Instr::BitOr => self.int_binop(pc, |a, b| Ok(a | b))?,
                Instr::BitXor => self.int_binop(pc, |a, b| Ok(a ^ b))?,
                Instr::Shl => self.int_binop(pc, |a, b| {
                    let s = u32::try_from(b)
                        .ok()
                        .filter(|s| *s < 64)
                        .ok_or_else(|| RuntimeError::Range(format!("shift by {b}")))?;
                    Ok(a << s)
                })?,
                Instr::Shr => self.int_binop(pc, |a, b| {
                    let s = u32::try_from(b)
                        .ok()
                        .filter(|s| *s < 64)
                        .ok_or_else(|| RuntimeError::Range(format!("shift by {b}")))?;
                    Ok(a >> s)
                })?,
                Instr::Neg => {
                    let v = self.pop(pc)?;
                    let out = match v {
                        Value::Int(v) => Value::Int(
                            v.checked_neg().ok_or_else(overflow)?,
                        ),
                        Value::Float(v) => Value::Float(-v),
                        other => return Err(type_err("number", &other)),
                    };
                    self.stack.push(out);
                }
                Instr::Concat => {
                    let rhs = self.pop_str(pc)?;
                    let lhs = self.pop_str(pc)?;
                    self.stack.push(Value::Str(lhs + &rhs));
                }

                Instr::CmpLt => self.compare(pc, |o| o == std::cmp::Ordering::Less)?,
                Instr::CmpLe => self.compare(pc, |o| o != std::cmp::Ordering::Greater)?,
                Instr::CmpGt => self.compare(pc, |o| o == std::cmp::Ordering::Greater)?,
                Instr::CmpGe => self.compare(pc, |o| o != std::cmp::Ordering::Less)?,
                Instr::CmpEq => self.compare(pc, |o| o == std::cmp::Ordering::Equal)?,
                Instr::CmpNe => self.compare(pc, |o| o != std::cmp::Ordering::Equal)?,
                Instr::And => {
                    let rhs = self.pop_bool(pc)?;
                    let lhs = self.pop_bool(pc)?;
                    self.stack.push(Value::Bool(lhs && rhs));
                }
                Instr::Or => {
                    let rhs = self.pop_bool(pc)?;
                    let lhs = self.pop_bool(pc)?;
                    self.stack.push(Value::Bool(lhs || rhs));
                }
                Instr::Not => {
                    let v = self.pop_bool(pc)?;
                    self.stack.push(Value::Bool(!v));
                }

                Instr::Jmp(target) => pc = target,
                Instr::JmpIfFalse(target) => {
                    if !self.pop_bool(pc)? {
                        pc = target;
                    }
                }

                Instr::Match(idx) => {
                    let input = self.pop_str(pc)?;
                    let regex = &program.regexes[idx].regex;
                    match regex.captures(&input) {
                        Some(caps) => {
                            for (i, slot) in self.captures.iter_mut().enumerate() {
                                *slot = caps.get(i).map(|m| m.as_str().to_owned());
                            }
                            self.stack.push(Value::Bool(true));
                        }
                        None => self.stack.push(Value::Bool(false)),
                    }
                }
                Instr::Capref(group) => {
                    let v = self
                        .captures
                        .get(group)
                        .and_then(|c| c.clone())
                        .ok_or(RuntimeError::NoMatch(group))?;
                    self.stack.push(Value::Str(v));
                }

                Instr::Mload(idx) => {
                    self.stack.push(Value::Metric(Arc::clone(&self.metrics[idx])));
                }
                Instr::Dload(n) => {
                    let labels = self.pop_labels(pc, n)?;
                    let metric = self.pop_metric(pc)?;
                    let datum = metric.datum(&labels)?;
                    self.stack.push(Value::Datum(datum));
                }
                Instr::Inc => {
                    let datum = self.pop_datum(pc)?;
                    datum.incr(self.effective_ts);
                }
                Instr::Iadd => {
                    let delta = self.pop_int(pc)?;
                    let datum = self.pop_datum(pc)?;
                    datum.add_int(delta, self.effective_ts);
                }
                Instr::Fadd => {
                    let delta = self.pop_float(pc)?;
                    let datum = self.pop_datum(pc)?;
                    datum.add_float(delta, self.effective_ts);
                }
                Instr::Iset => {
                    let v = self.pop_int(pc)?;
                    let datum = self.pop_datum(pc)?;
                    datum.set_int(v, self.effective_ts);
                }
                Instr::Fset => {
                    let v = self.pop_float(pc)?;
                    let datum = self.pop_datum(pc)?;
                    datum.set_float(v, self.effective_ts);
                }
                Instr::Sset => {
                    let v = self.pop_str(pc)?;
                    let datum = self.pop_datum(pc)?;
                    datum.set_str(v, self.effective_ts);
                }
                Instr::Del(n) => {
                    let labels = self.pop_labels(pc, n)?;
                    let metric = self.pop_metric(pc)?;
                    metric.remove_datum(&labels);
                }

                Instr::Settime => {
                    self.effective_ts = self.pop_int(pc)?;
                }
                Instr::Strptime => {
                    let format = self.pop_str(pc)?;
                    let input = self.pop_str(pc)?;
                    let ts = timeparse::strptime(&input, &format, &self.time_opts)?;
                    self.stack.push(Value::Int(ts));
                }
                Instr::Timestamp => self.stack.push(Value::Int(self.effective_ts)),
                Instr::Tolower => {
                    let s = self.pop_str(pc)?;
                    self.stack.push(Value::Str(s.to_lowercase()));
                }
                Instr::Len => {
                    let s = self.pop_str(pc)?;
                    self.stack.push(Value::Int(s.len() as i64));
                }
                Instr::Strtol => {
                    let base = self.pop_int(pc)?;
                    let s = self.pop_str(pc)?;
                    let base = u32::try_from(base)
                        .ok()
                        .filter(|b| (2..=36).contains(b))
                        .ok_or_else(|| RuntimeError::Range(format!("strtol base {base}")))?;
                    let v = i64::from_str_radix(s.trim(), base).map_err(|_| {
                        RuntimeError::Strtol {
                            input: s.clone(),
                            base,
                        }
                    })?;
                    self.stack.push(Value::Int(v));
                }
                Instr::Getfilename => {
                    self.stack.push(Value::Str(line.filename.clone()));
                }

                Instr::Next | Instr::Halt => return Ok(()),
            }
        }
        Ok(())
    }

    // --- 스택 헬퍼 ---

    fn pop(&mut self, pc: usize) -> Result<Value, RuntimeError> {
        self.stack.pop().ok_or(RuntimeError::StackUnderflow(pc))
    }

    /// datum 참조는 현재 값으로 역참조됩니다.
    fn deref(value: Value) -> Value {
        match value {
            Value::Datum(d) => match d.read() {
                DatumValue::Int(v) => Value::Int(v),
                DatumValue::Float(v) => Value::Float(v),
                DatumValue::Str(s) => Value::Str(s),
                // 버킷은 스칼라 문맥에서 합계로 읽힘
                DatumValue::Buckets(b) => Value::Float(b.sum),
            },
            other => other,
        }
    }

    fn pop_int(&mut self, pc: usize) -> Result<i64, RuntimeError> {
        match Self::deref(self.pop(pc)?) {
            Value::Int(v) => Ok(v),
            Value::Float(v) => Ok(v as i64),
            other => Err(type_err("int", &other)),
        }
    }

    fn pop_float(&mut self, pc: usize) -> Result<f64, RuntimeError> {
        match Self::deref(self.pop(pc)?) {
            Value::Float(v) => Ok(v),
            Value::Int(v) => Ok(v as f64),
            other => Err(type_err("float", &other)),
        }
    }

    fn pop_str(&mut self, pc: usize) -> Result<String, RuntimeError> {
        match Self::deref(self.pop(pc)?) {
            Value::Str(s) => Ok(s),
            other => Err(type_err("string", &other)),
        }
    }

    fn pop_bool(&mut self, pc: usize) -> Result<bool, RuntimeError> {
        match self.pop(pc)? {
            Value::Bool(b) => Ok(b),
            other => Err(type_err("bool", &other)),
        }
    }

    fn pop_metric(&mut self, pc: usize) -> Result<Arc<Metric>, RuntimeError> {
        match self.pop(pc)? {
            Value::Metric(m) => Ok(m),
            other => Err(type_err("metric", &other)),
        }
    }

    fn pop_datum(&mut self, pc: usize) -> Result<Arc<Datum>, RuntimeError> {
        match self.pop(pc)? {
            Value::Datum(d) => Ok(d),
            other => Err(type_err("datum", &other)),
        }
    }

    /// 레이블 값 n개를 pop합니다. push 순서대로 반환되며 스칼라는
    /// 문자열로 강제 변환됩니다.
    fn pop_labels(&mut self, pc: usize, n: usize) -> Result<Vec<String>, RuntimeError> {
        let mut labels = vec![String::new(); n];
        for slot in labels.iter_mut().rev() {
            *slot = match Self::deref(self.pop(pc)?) {
                Value::Str(s) => s,
                Value::Int(v) => v.to_string(),
                Value::Float(v) => v.to_string(),
                other => return Err(type_err("label value", &other)),
            };
        }
        Ok(labels)
    }

    fn int_binop(
        &mut self,
        pc: usize,
        f: impl FnOnce(i64, i64) -> Result<i64, RuntimeError>,
    ) -> Result<(), RuntimeError> {
        let rhs = self.pop_int(pc)?;
        let lhs = self.pop_int(pc)?;
        self.stack.push(Value::Int(f(lhs, rhs)?));
        Ok(())
    }

    fn float_binop(
        &mut self,
        pc: usize,
        f: impl FnOnce(f64, f64) -> f64,
    ) -> Result<(), RuntimeError> {
        let rhs = self.pop_float(pc)?;
        let lhs = self.pop_float(pc)?;
        self.stack.push(Value::Float(f(lhs, rhs)));
        Ok(())
    }

    fn compare(
        &mut self,
        pc: usize,
        f: impl FnOnce(std::cmp::Ordering) -> bool,
    ) -> Result<(), RuntimeError> {
        let rhs = Self::deref(self.pop(pc)?);
        let lhs = Self::deref(self.pop(pc)?);
        let ordering = match (&lhs, &rhs) {
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Int(a), Value::Float(b)) => {
                (*a as f64).partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal)
            }
            (Value::Float(a), Value::Int(b)) => a
                .partial_cmp(&(*b as f64))
                .unwrap_or(std::cmp::Ordering::Equal),
            (Value::Float(a), Value::Float(b)) => {
                a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal)
            }
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            _ => return Err(type_err(lhs.type_name(), &rhs)),
        };
        self.stack.push(Value::Bool(f(ordering)));
        Ok(())
    }
}

fn overflow() -> RuntimeError {
    RuntimeError::Range("integer overflow".to_owned())
}

fn type_err(expected: &'static str, got: &Value) -> RuntimeError {
    RuntimeError::Type {
        expected,
        got: got.type_name(),
    }
}
