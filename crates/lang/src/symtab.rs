//! 심볼 테이블
//!
//! 타입 체커 1차 패스가 선언을 수집하여 구성합니다. 메트릭은 선언 순서의
//! 인덱스를 보존하며, 이 인덱스가 바이트코드 `Mload`의 피연산자가 됩니다.

use std::collections::HashMap;

use metrail_core::{MetricKind, ValueKind};

use crate::span::Span;

/// 메트릭 심볼
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSymbol {
    /// 메트릭 이름
    pub name: String,
    /// 메트릭 종류
    pub kind: MetricKind,
    /// 레이블 키 목록
    pub labels: Vec<String>,
    /// 내보내기에서 숨김
    pub hidden: bool,
    /// 내보내기용 별칭
    pub alias: Option<String>,
    /// 히스토그램 버킷 상한
    pub buckets: Vec<f64>,
    /// 값 저장 형식. 체커가 사용처를 보고 Int에서 Float로 넓힐 수 있음
    pub value_kind: ValueKind,
    /// 선언 위치
    pub span: Span,
}

/// const 패턴 심볼
#[derive(Debug, Clone, PartialEq)]
pub struct PatternSymbol {
    /// 바인딩 이름
    pub name: String,
    /// 정규식 패턴
    pub pattern: String,
    /// 선언 위치
    pub span: Span,
}

/// 컴파일 단위의 심볼 테이블
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    metrics: Vec<MetricSymbol>,
    metric_index: HashMap<String, usize>,
    patterns: HashMap<String, PatternSymbol>,
}

impl SymbolTable {
    /// 빈 테이블을 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 메트릭 심볼을 등록합니다.
    ///
    /// 이미 같은 이름이 있으면 `Err`에 기존 심볼의 선언 위치를 담아
    /// 반환합니다.
    pub fn insert_metric(&mut self, sym: MetricSymbol) -> Result<usize, Span> {
        if let Some(&idx) = self.metric_index.get(&sym.name) {
            return Err(self.metrics[idx].span);
        }
        let idx = self.metrics.len();
        self.metric_index.insert(sym.name.clone(), idx);
        self.metrics.push(sym);
        Ok(idx)
    }

    /// 이름으로 메트릭을 찾습니다.
    pub fn metric(&self, name: &str) -> Option<(usize, &MetricSymbol)> {
        self.metric_index
            .get(name)
            .map(|&idx| (idx, &self.metrics[idx]))
    }

    /// 인덱스로 메트릭을 찾습니다.
    pub fn metric_at(&self, idx: usize) -> Option<&MetricSymbol> {
        self.metrics.get(idx)
    }

    /// 메트릭의 값 형식을 넓힙니다 (Int -> Float).
    pub fn widen_metric(&mut self, name: &str) {
        if let Some(&idx) = self.metric_index.get(name) {
            let sym = &mut self.metrics[idx];
            if sym.value_kind == ValueKind::Int && sym.kind != MetricKind::Timer {
                sym.value_kind = ValueKind::Float;
            }
        }
    }

    /// 선언 순서대로 모든 메트릭을 순회합니다.
    pub fn metrics(&self) -> impl Iterator<Item = &MetricSymbol> {
        self.metrics.iter()
    }

    /// 등록된 메트릭 수를 반환합니다.
    pub fn metric_count(&self) -> usize {
        self.metrics.len()
    }

    /// const 패턴을 등록합니다. 같은 이름이 있으면 기존 위치를 반환합니다.
    pub fn insert_pattern(&mut self, sym: PatternSymbol) -> Result<(), Span> {
        if let Some(existing) = self.patterns.get(&sym.name) {
            return Err(existing.span);
        }
        self.patterns.insert(sym.name.clone(), sym);
        Ok(())
    }

    /// 이름으로 const 패턴을 찾습니다.
    pub fn pattern(&self, name: &str) -> Option<&PatternSymbol> {
        self.patterns.get(name)
    }
}
