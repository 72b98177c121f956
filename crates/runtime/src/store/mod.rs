//! 메트릭 스토어 — 타입 있는 동시성 메트릭 레지스트리
//!
//! `(프로그램, 이름)`을 키로 메트릭을 관리합니다. 스토어 수준의
//! RwLock은 구조적 변경(메트릭 추가/제거)만 보호하고, datum 변경은
//! 메트릭 내부의 세밀한 잠금이 처리합니다. 여러 VM 태스크(쓰기)와
//! 익스포터(읽기)가 동시에 접근합니다.
//!
//! `omit_prog_label` 설정이면 키가 이름만으로 접히고, 서로 다른
//! 프로그램이 같은 이름을 호환되지 않는 서술자로 선언하면
//! [`StoreError::DescriptorConflict`]로 거부됩니다.

mod metric;

pub use metric::{BucketSet, Datum, DatumSnapshot, DatumValue, Metric, MetricSnapshot, MetricSource};

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::SystemTime;

use metrail_core::{MetricKind, ValueKind};
use metrail_lang::MetricDescriptor;

use crate::error::StoreError;

type MetricKey = (Option<String>, String);

struct Registered {
    metric: Arc<Metric>,
    owners: HashSet<String>,
}

/// 스토어 동작 옵션
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    /// 메트릭 키에서 프로그램을 접음 (`omitProgLabel`)
    pub omit_prog_label: bool,
    /// 메트릭에 (프로그램, 소스 라인) 출처를 붙이지 않음
    pub omit_metric_source: bool,
}

/// 메트릭 스토어
pub struct Store {
    options: StoreOptions,
    metrics: RwLock<HashMap<MetricKey, Registered>>,
    /// 소유권 인덱스: 프로그램 -> 키 목록. 구조 잠금과 별도로 유지
    ownership: Mutex<HashMap<String, Vec<MetricKey>>>,
}

impl Store {
    /// 기본 옵션으로 스토어를 생성합니다.
    pub fn new() -> Self {
        Self::with_options(StoreOptions::default())
    }

    /// 옵션을 지정하여 스토어를 생성합니다.
    pub fn with_options(options: StoreOptions) -> Self {
        Self {
            options,
            metrics: RwLock::new(HashMap::new()),
            ownership: Mutex::new(HashMap::new()),
        }
    }

    fn key(&self, program: &str, name: &str) -> MetricKey {
        if self.options.omit_prog_label {
            (None, name.to_owned())
        } else {
            (Some(program.to_owned()), name.to_owned())
        }
    }

    /// 서술자에 맞는 메트릭을 찾거나 생성합니다.
    ///
    /// 같은 키의 메트릭이 이미 있으면 서술자가 호환되는지 검증합니다.
    /// 종류, 레이블 키, 값 클래스(숫자/문자열/버킷)가 다르면
    /// [`StoreError::DescriptorConflict`]를 반환합니다. 호환되면 기존
    /// 메트릭을 반환하므로 같은 서술자에 대해 멱등합니다.
    pub fn find_or_create(
        &self,
        program: &str,
        desc: &MetricDescriptor,
    ) -> Result<Arc<Metric>, StoreError> {
        let key = self.key(program, &desc.name);

        let mut metrics = self.metrics.write().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = metrics.get_mut(&key) {
            check_compatible(&existing.metric, desc)?;
            existing.owners.insert(program.to_owned());
            self.record_ownership(program, &key);
            return Ok(Arc::clone(&existing.metric));
        }

        let source = if self.options.omit_metric_source {
            None
        } else {
            Some(MetricSource {
                program: program.to_owned(),
                line: desc.source_line,
            })
        };
        let metric = Arc::new(Metric::new(
            desc.name.clone(),
            desc.kind,
            desc.value_kind,
            desc.labels.clone(),
            desc.buckets.clone(),
            desc.hidden,
            desc.alias.clone(),
            source,
        ));
        let mut owners = HashSet::new();
        owners.insert(program.to_owned());
        metrics.insert(
            key.clone(),
            Registered {
                metric: Arc::clone(&metric),
                owners,
            },
        );
        drop(metrics);
        self.record_ownership(program, &key);
        Ok(metric)
    }

    fn record_ownership(&self, program: &str, key: &MetricKey) {
        let mut ownership = self.ownership.lock().unwrap_or_else(|e| e.into_inner());
        let keys = ownership.entry(program.to_owned()).or_default();
        if !keys.contains(key) {
            keys.push(key.clone());
        }
    }

    /// datum을 찾거나 생성한 뒤 콜백을 호출합니다.
    ///
    /// 서로 다른 datum에 대한 동시 호출은 서로 막지 않습니다.
    pub fn with_datum<R>(
        &self,
        metric: &Metric,
        label_values: &[String],
        f: impl FnOnce(&Datum) -> R,
    ) -> Result<R, StoreError> {
        let datum = metric.datum(label_values)?;
        Ok(f(&datum))
    }

    /// 프로그램의 메트릭 소유권을 해제합니다.
    ///
    /// 다른 프로그램이 여전히 소유한 메트릭은 유지되고, 소유자가 없어진
    /// 메트릭은 스토어에서 제거됩니다.
    pub fn remove_program(&self, program: &str) {
        let keys = {
            let mut ownership = self.ownership.lock().unwrap_or_else(|e| e.into_inner());
            ownership.remove(program).unwrap_or_default()
        };
        if keys.is_empty() {
            return;
        }
        let mut metrics = self.metrics.write().unwrap_or_else(|e| e.into_inner());
        for key in keys {
            if let Some(existing) = metrics.get_mut(&key) {
                existing.owners.remove(program);
                if existing.owners.is_empty() {
                    metrics.remove(&key);
                }
            }
        }
    }

    /// 익스포터를 위한 일관된 읽기 뷰를 만듭니다.
    ///
    /// 스토어 잠금은 메트릭 목록 복사 동안만 잡고, 각 메트릭의 복사는
    /// 해당 메트릭의 잠금 아래에서 수행됩니다. 숨김 메트릭은 제외됩니다.
    /// 출력은 (프로그램, 이름) 순으로 정렬됩니다.
    pub fn snapshot(&self) -> Vec<MetricSnapshot> {
        let entries: Vec<(MetricKey, Arc<Metric>)> = {
            let metrics = self.metrics.read().unwrap_or_else(|e| e.into_inner());
            metrics
                .iter()
                .map(|(k, v)| (k.clone(), Arc::clone(&v.metric)))
                .collect()
        };
        let mut snapshots: Vec<MetricSnapshot> = entries
            .into_iter()
            .filter(|(_, m)| !m.hidden)
            .map(|((program, _), m)| m.snapshot(program.as_deref()))
            .collect();
        snapshots.sort_by(|a, b| (&a.program, &a.name).cmp(&(&b.program, &b.name)));
        snapshots
    }

    /// 이름(과 프로그램)으로 메트릭을 찾습니다. 주로 테스트와 상태
    /// 표시에 사용됩니다.
    pub fn find(&self, program: &str, name: &str) -> Option<Arc<Metric>> {
        let key = self.key(program, name);
        let metrics = self.metrics.read().unwrap_or_else(|e| e.into_inner());
        metrics.get(&key).map(|r| Arc::clone(&r.metric))
    }

    /// 등록된 메트릭 수를 반환합니다.
    pub fn metric_count(&self) -> usize {
        self.metrics.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// TTL이 지난 datum을 모든 메트릭에서 제거합니다.
    ///
    /// 제거된 datum 수를 반환합니다.
    pub fn gc(&self, now: SystemTime) -> usize {
        let now_secs = now
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let entries: Vec<Arc<Metric>> = {
            let metrics = self.metrics.read().unwrap_or_else(|e| e.into_inner());
            metrics.values().map(|r| Arc::clone(&r.metric)).collect()
        };
        let mut removed = 0;
        for metric in entries {
            removed += metric.gc(now_secs);
        }
        if removed > 0 {
            tracing::debug!(removed, "expired metric datums collected");
        }
        removed
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

/// 기존 메트릭과 새 서술자의 호환성을 검증합니다.
fn check_compatible(existing: &Metric, desc: &MetricDescriptor) -> Result<(), StoreError> {
    if existing.kind != desc.kind {
        return Err(StoreError::DescriptorConflict {
            name: desc.name.clone(),
            reason: format!("kind {} != {}", existing.kind, desc.kind),
        });
    }
    if existing.label_keys != desc.labels {
        return Err(StoreError::DescriptorConflict {
            name: desc.name.clone(),
            reason: format!(
                "label keys {:?} != {:?}",
                existing.label_keys, desc.labels
            ),
        });
    }
    if value_class(existing.value_kind) != value_class(desc.value_kind) {
        return Err(StoreError::DescriptorConflict {
            name: desc.name.clone(),
            reason: format!(
                "value type {:?} != {:?}",
                existing.value_kind, desc.value_kind
            ),
        });
    }
    if existing.kind == MetricKind::Histogram && existing.buckets != desc.buckets {
        return Err(StoreError::DescriptorConflict {
            name: desc.name.clone(),
            reason: "histogram bucket bounds differ".to_owned(),
        });
    }
    Ok(())
}

/// Int와 Float는 같은 클래스 (datum이 자동 승격)
fn value_class(kind: ValueKind) -> u8 {
    match kind {
        ValueKind::Int | ValueKind::Float => 0,
        ValueKind::String => 1,
        ValueKind::Buckets => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(name: &str, kind: MetricKind, labels: &[&str]) -> MetricDescriptor {
        MetricDescriptor {
            name: name.to_owned(),
            kind,
            value_kind: kind.default_value_kind(),
            labels: labels.iter().map(|s| (*s).to_owned()).collect(),
            buckets: Vec::new(),
            hidden: false,
            alias: None,
            source_line: 1,
        }
    }

    #[test]
    fn find_or_create_is_idempotent() {
        let store = Store::new();
        let a = store
            .find_or_create("p.mtl", &desc("c", MetricKind::Counter, &[]))
            .unwrap();
        let b = store
            .find_or_create("p.mtl", &desc("c", MetricKind::Counter, &[]))
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.metric_count(), 1);
    }

    #[test]
    fn kind_conflict_is_rejected() {
        let store = Store::new();
        store
            .find_or_create("p.mtl", &desc("c", MetricKind::Counter, &[]))
            .unwrap();
        let err = store
            .find_or_create("p.mtl", &desc("c", MetricKind::Gauge, &[]))
            .unwrap_err();
        assert!(matches!(err, StoreError::DescriptorConflict { .. }));
    }

    #[test]
    fn same_name_different_programs_coexist() {
        let store = Store::new();
        store
            .find_or_create("a.mtl", &desc("c", MetricKind::Counter, &[]))
            .unwrap();
        store
            .find_or_create("b.mtl", &desc("c", MetricKind::Gauge, &[]))
            .unwrap();
        assert_eq!(store.metric_count(), 2);
    }

    #[test]
    fn omit_prog_label_collapses_key_and_detects_conflict() {
        let store = Store::with_options(StoreOptions {
            omit_prog_label: true,
            ..Default::default()
        });
        store
            .find_or_create("a.mtl", &desc("c", MetricKind::Counter, &[]))
            .unwrap();
        // 같은 서술자는 공유
        store
            .find_or_create("b.mtl", &desc("c", MetricKind::Counter, &[]))
            .unwrap();
        assert_eq!(store.metric_count(), 1);
        // 종류가 다르면 로드 시점 거부
        let err = store
            .find_or_create("c.mtl", &desc("c", MetricKind::Gauge, &[]))
            .unwrap_err();
        assert!(matches!(err, StoreError::DescriptorConflict { .. }));
    }

    #[test]
    fn shared_metric_survives_single_program_unload() {
        let store = Store::with_options(StoreOptions {
            omit_prog_label: true,
            ..Default::default()
        });
        store
            .find_or_create("a.mtl", &desc("c", MetricKind::Counter, &[]))
            .unwrap();
        store
            .find_or_create("b.mtl", &desc("c", MetricKind::Counter, &[]))
            .unwrap();

        store.remove_program("a.mtl");
        assert_eq!(store.metric_count(), 1);

        store.remove_program("b.mtl");
        assert_eq!(store.metric_count(), 0);
    }

    #[test]
    fn remove_program_drops_owned_metrics() {
        let store = Store::new();
        store
            .find_or_create("a.mtl", &desc("one", MetricKind::Counter, &[]))
            .unwrap();
        store
            .find_or_create("b.mtl", &desc("two", MetricKind::Counter, &[]))
            .unwrap();
        store.remove_program("a.mtl");
        assert_eq!(store.metric_count(), 1);
        assert!(store.find("b.mtl", "two").is_some());
    }

    #[test]
    fn snapshot_excludes_hidden_metrics() {
        let store = Store::new();
        let mut hidden = desc("internal", MetricKind::Gauge, &[]);
        hidden.hidden = true;
        store.find_or_create("p.mtl", &hidden).unwrap();
        store
            .find_or_create("p.mtl", &desc("visible", MetricKind::Counter, &[]))
            .unwrap();
        let snap = store.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].name, "visible");
    }

    #[test]
    fn snapshot_reflects_datum_state() {
        let store = Store::new();
        let m = store
            .find_or_create("p.mtl", &desc("c", MetricKind::Counter, &["k"]))
            .unwrap();
        store
            .with_datum(&m, &["a".to_owned()], |d| d.incr(7))
            .unwrap();
        let snap = store.snapshot();
        assert_eq!(snap[0].data.len(), 1);
        assert_eq!(snap[0].data[0].value, DatumValue::Int(1));
        assert_eq!(snap[0].data[0].last_update, Some(7));
    }

    #[test]
    fn gc_sweeps_all_metrics() {
        let store = Store::new();
        let m = store
            .find_or_create("p.mtl", &desc("c", MetricKind::Counter, &["ip"]))
            .unwrap();
        m.set_ttl(std::time::Duration::from_secs(60));
        m.datum(&["1.1.1.1".to_owned()]).unwrap().incr(0);

        let removed = store.gc(SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(120));
        assert_eq!(removed, 1);
    }

    #[test]
    fn omit_metric_source_suppresses_attribution() {
        let store = Store::with_options(StoreOptions {
            omit_metric_source: true,
            ..Default::default()
        });
        let m = store
            .find_or_create("p.mtl", &desc("c", MetricKind::Counter, &[]))
            .unwrap();
        assert!(m.source.is_none());
    }
}
