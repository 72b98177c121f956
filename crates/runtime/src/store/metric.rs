//! 메트릭과 datum 셀
//!
//! [`Metric`]은 레이블 튜플에서 [`Datum`]으로의 매핑을 가집니다.
//! datum 셀은 자체 뮤텍스로 보호되어 서로 다른 datum에 대한 동시 변경이
//! 서로를 막지 않습니다. 스냅샷은 메트릭 단위의 일관된 복사본입니다.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use metrail_core::{MetricKind, ValueKind};
use serde::Serialize;

use crate::error::StoreError;

/// 메트릭 출처 표기: 선언한 프로그램과 소스 라인
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricSource {
    /// 프로그램 파일명
    pub program: String,
    /// 선언 라인 번호
    pub line: u32,
}

/// 히스토그램 버킷 집합
///
/// `bounds`는 순증가 상한 목록이며 마지막 버킷은 암묵적 +∞입니다.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketSet {
    /// 버킷 상한 (+∞ 제외)
    pub bounds: Vec<f64>,
    /// 버킷별 관측 수. 길이 = bounds.len() + 1 (+∞ 버킷 포함)
    pub counts: Vec<u64>,
    /// 관측 값 합계
    pub sum: f64,
    /// 총 관측 수
    pub count: u64,
}

impl BucketSet {
    /// 주어진 상한으로 빈 버킷 집합을 생성합니다.
    pub fn new(bounds: Vec<f64>) -> Self {
        let counts = vec![0; bounds.len() + 1];
        Self {
            bounds,
            counts,
            sum: 0.0,
            count: 0,
        }
    }

    /// 값을 관측합니다.
    pub fn observe(&mut self, v: f64) {
        let idx = self
            .bounds
            .iter()
            .position(|&b| v <= b)
            .unwrap_or(self.bounds.len());
        self.counts[idx] += 1;
        self.sum += v;
        self.count += 1;
    }
}

/// datum에 저장되는 값
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DatumValue {
    /// 정수
    Int(i64),
    /// 부동소수점
    Float(f64),
    /// 문자열
    Str(String),
    /// 히스토그램 버킷
    Buckets(BucketSet),
}

#[derive(Debug)]
struct DatumCell {
    value: DatumValue,
    /// Unix epoch 초. None이면 아직 갱신된 적 없음
    last_update: Option<i64>,
}

/// 특정 레이블 튜플 아래의 값+타임스탬프 셀
///
/// 모든 변경 연산은 셀 뮤텍스 아래에서 수행되고 즉시 커밋됩니다.
#[derive(Debug)]
pub struct Datum {
    cell: Mutex<DatumCell>,
}

/// datum의 일관된 읽기 복사본
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatumSnapshot {
    /// 레이블 값 튜플 (메트릭의 label_keys와 같은 순서)
    pub label_values: Vec<String>,
    /// 값
    pub value: DatumValue,
    /// 마지막 갱신 시각 (epoch 초)
    pub last_update: Option<i64>,
}

impl Datum {
    fn new(value_kind: ValueKind, buckets: &[f64]) -> Self {
        let value = match value_kind {
            ValueKind::Int => DatumValue::Int(0),
            ValueKind::Float => DatumValue::Float(0.0),
            ValueKind::String => DatumValue::Str(String::new()),
            ValueKind::Buckets => DatumValue::Buckets(BucketSet::new(buckets.to_vec())),
        };
        Self {
            cell: Mutex::new(DatumCell {
                value,
                last_update: None,
            }),
        }
    }

    fn with_cell<R>(&self, f: impl FnOnce(&mut DatumCell) -> R) -> R {
        let mut cell = self.cell.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut cell)
    }

    /// 1 증가시킵니다.
    pub fn incr(&self, ts: i64) {
        self.add_int(1, ts);
    }

    /// 정수를 더합니다. Float 셀이면 승격해서 더합니다.
    pub fn add_int(&self, delta: i64, ts: i64) {
        self.with_cell(|cell| {
            match &mut cell.value {
                DatumValue::Int(v) => *v = v.wrapping_add(delta),
                DatumValue::Float(v) => *v += delta as f64,
                other => *other = DatumValue::Int(delta),
            }
            cell.last_update = Some(ts);
        });
    }

    /// 실수를 더합니다. Int 셀은 Float로 넓어집니다.
    pub fn add_float(&self, delta: f64, ts: i64) {
        self.with_cell(|cell| {
            match &mut cell.value {
                DatumValue::Float(v) => *v += delta,
                DatumValue::Int(v) => cell.value = DatumValue::Float(*v as f64 + delta),
                other => *other = DatumValue::Float(delta),
            }
            cell.last_update = Some(ts);
        });
    }

    /// 정수 값을 설정합니다.
    pub fn set_int(&self, v: i64, ts: i64) {
        self.with_cell(|cell| {
            match &mut cell.value {
                DatumValue::Buckets(b) => b.observe(v as f64),
                DatumValue::Float(f) => *f = v as f64,
                other => *other = DatumValue::Int(v),
            }
            cell.last_update = Some(ts);
        });
    }

    /// 실수 값을 설정합니다. 버킷 셀이면 관측으로 기록합니다.
    pub fn set_float(&self, v: f64, ts: i64) {
        self.with_cell(|cell| {
            match &mut cell.value {
                DatumValue::Buckets(b) => b.observe(v),
                other => *other = DatumValue::Float(v),
            }
            cell.last_update = Some(ts);
        });
    }

    /// 문자열 값을 설정합니다.
    pub fn set_str(&self, v: String, ts: i64) {
        self.with_cell(|cell| {
            cell.value = DatumValue::Str(v);
            cell.last_update = Some(ts);
        });
    }

    /// 현재 값을 복사해 읽습니다.
    pub fn read(&self) -> DatumValue {
        self.with_cell(|cell| cell.value.clone())
    }

    /// 마지막 갱신 시각을 읽습니다.
    pub fn last_update(&self) -> Option<i64> {
        self.with_cell(|cell| cell.last_update)
    }
}

/// 단일 메트릭: 서술자 + 레이블 튜플별 datum 맵
#[derive(Debug)]
pub struct Metric {
    /// 메트릭 이름
    pub name: String,
    /// 메트릭 종류
    pub kind: MetricKind,
    /// 값 저장 형식
    pub value_kind: ValueKind,
    /// 레이블 키 (고정 순서)
    pub label_keys: Vec<String>,
    /// 히스토그램 버킷 상한
    pub buckets: Vec<f64>,
    /// 내보내기에서 숨김
    pub hidden: bool,
    /// 내보내기용 별칭
    pub alias: Option<String>,
    /// 출처 표기 (설정으로 생략 가능)
    pub source: Option<MetricSource>,
    /// datum 만료 TTL (초). 0이면 만료 없음
    ttl_secs: AtomicU64,
    datums: RwLock<HashMap<Vec<String>, std::sync::Arc<Datum>>>,
}

/// 메트릭의 일관된 읽기 복사본
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSnapshot {
    /// 메트릭 이름
    pub name: String,
    /// 소유 프로그램 (prog 레이블 생략 설정이면 None)
    pub program: Option<String>,
    /// 메트릭 종류
    pub kind: MetricKind,
    /// 레이블 키
    pub label_keys: Vec<String>,
    /// 내보내기용 별칭
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// 출처 표기
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<MetricSource>,
    /// datum 목록
    pub data: Vec<DatumSnapshot>,
}

impl Metric {
    pub(crate) fn new(
        name: String,
        kind: MetricKind,
        value_kind: ValueKind,
        label_keys: Vec<String>,
        buckets: Vec<f64>,
        hidden: bool,
        alias: Option<String>,
        source: Option<MetricSource>,
    ) -> Self {
        Self {
            name,
            kind,
            value_kind,
            label_keys,
            buckets,
            hidden,
            alias,
            source,
            ttl_secs: AtomicU64::new(0),
            datums: RwLock::new(HashMap::new()),
        }
    }

    /// datum 만료 TTL을 설정합니다. 0이면 만료 없음.
    pub fn set_ttl(&self, ttl: Duration) {
        self.ttl_secs.store(ttl.as_secs(), Ordering::Relaxed);
    }

    /// 현재 TTL을 반환합니다.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs.load(Ordering::Relaxed))
    }

    /// 레이블 튜플의 datum을 찾거나 생성합니다.
    ///
    /// 레이블 수가 선언된 arity와 다르면 `LabelArity` 에러를 반환합니다.
    pub fn datum(&self, label_values: &[String]) -> Result<std::sync::Arc<Datum>, StoreError> {
        if label_values.len() != self.label_keys.len() {
            return Err(StoreError::LabelArity {
                name: self.name.clone(),
                expected: self.label_keys.len(),
                got: label_values.len(),
            });
        }
        {
            let datums = self.datums.read().unwrap_or_else(|e| e.into_inner());
            if let Some(d) = datums.get(label_values) {
                return Ok(std::sync::Arc::clone(d));
            }
        }
        let mut datums = self.datums.write().unwrap_or_else(|e| e.into_inner());
        let d = datums
            .entry(label_values.to_vec())
            .or_insert_with(|| {
                std::sync::Arc::new(Datum::new(self.value_kind, &self.buckets))
            });
        Ok(std::sync::Arc::clone(d))
    }

    /// 레이블 튜플의 datum을 제거합니다. 없으면 아무 일도 하지 않습니다.
    pub fn remove_datum(&self, label_values: &[String]) {
        let mut datums = self.datums.write().unwrap_or_else(|e| e.into_inner());
        datums.remove(label_values);
    }

    /// 현재 datum 수를 반환합니다.
    pub fn datum_count(&self) -> usize {
        self.datums.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// TTL이 지난 datum을 제거하고 제거 수를 반환합니다.
    pub fn gc(&self, now: i64) -> usize {
        let ttl = self.ttl_secs.load(Ordering::Relaxed);
        if ttl == 0 {
            return 0;
        }
        let mut datums = self.datums.write().unwrap_or_else(|e| e.into_inner());
        let before = datums.len();
        datums.retain(|_, d| match d.last_update() {
            Some(ts) => now.saturating_sub(ts) <= ttl as i64,
            None => true,
        });
        before - datums.len()
    }

    /// 메트릭 단위의 일관된 스냅샷을 만듭니다.
    ///
    /// 레이블 튜플은 결정적 출력(JSON 덤프, 테스트)을 위해 정렬됩니다.
    pub fn snapshot(&self, program: Option<&str>) -> MetricSnapshot {
        let datums = self.datums.read().unwrap_or_else(|e| e.into_inner());
        let mut data: Vec<DatumSnapshot> = datums
            .iter()
            .map(|(labels, d)| DatumSnapshot {
                label_values: labels.clone(),
                value: d.read(),
                last_update: d.last_update(),
            })
            .collect();
        data.sort_by(|a, b| a.label_values.cmp(&b.label_values));
        MetricSnapshot {
            name: self.name.clone(),
            program: program.map(str::to_owned),
            kind: self.kind,
            label_keys: self.label_keys.clone(),
            alias: self.alias.clone(),
            source: self.source.clone(),
            data,
        }
    }
}
