//! 런타임 통합 테스트
//!
//! loader + VM + 스토어 + tailer를 실제 채널 배선으로 연결하여
//! 엔드투엔드 시나리오를 검증합니다.

use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use metrail_core::LogLine;
use metrail_runtime::store::DatumValue;
use metrail_runtime::{
    Loader, LoaderConfig, ProgramEvent, ProgramWatcher, Store, Tailer, TailerConfig,
    WatcherConfig,
};

async fn write_program(dir: &Path, name: &str, src: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    tokio::fs::write(&path, src).await.unwrap();
    path
}

/// loader를 배선하고 (라인 송신측, 이벤트 송신측, join 핸들)을 반환
fn spawn_loader(
    loader: Loader,
) -> (
    mpsc::Sender<LogLine>,
    mpsc::Sender<ProgramEvent>,
    tokio::task::JoinHandle<Loader>,
) {
    let (line_tx, line_rx) = mpsc::channel(64);
    let (event_tx, event_rx) = mpsc::channel(16);
    let handle = tokio::spawn(loader.run(line_rx, event_rx));
    (line_tx, event_tx, handle)
}

fn int_value(store: &Store, prog: &str, name: &str, labels: &[&str]) -> i64 {
    let m = store
        .find(prog, name)
        .unwrap_or_else(|| panic!("metric {name} not found"));
    let labels: Vec<String> = labels.iter().map(|s| (*s).to_owned()).collect();
    match m.datum(&labels).unwrap().read() {
        DatumValue::Int(v) => v,
        other => panic!("expected int, got {other:?}"),
    }
}

#[tokio::test]
async fn simple_counter_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    write_program(
        dir.path(),
        "lines.mtl",
        "counter lines_total\n/.*/ { lines_total++ }\n",
    )
    .await;

    let store = Arc::new(Store::new());
    let mut loader = Loader::new(LoaderConfig::default(), Arc::clone(&store));
    loader.load_all(dir.path()).await.unwrap();

    let (line_tx, _event_tx, handle) = spawn_loader(loader);
    for text in ["a", "b", "c"] {
        line_tx.send(LogLine::new("/log", text)).await.unwrap();
    }
    drop(line_tx);
    let loader = handle.await.unwrap();

    assert_eq!(int_value(&store, "lines.mtl", "lines_total", &[]), 3);
    assert_eq!(loader.line_count(), 3);
}

#[tokio::test]
async fn label_capture_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    write_program(
        dir.path(),
        "methods.mtl",
        "counter method_total by method\n/^(GET|POST) / { method_total[$1]++ }\n",
    )
    .await;

    let store = Arc::new(Store::new());
    let mut loader = Loader::new(LoaderConfig::default(), Arc::clone(&store));
    loader.load_all(dir.path()).await.unwrap();

    let (line_tx, _event_tx, handle) = spawn_loader(loader);
    for text in ["GET /foo", "POST /bar", "GET /baz"] {
        line_tx.send(LogLine::new("/log", text)).await.unwrap();
    }
    drop(line_tx);
    handle.await.unwrap();

    assert_eq!(
        int_value(&store, "methods.mtl", "method_total", &["GET"]),
        2
    );
    assert_eq!(
        int_value(&store, "methods.mtl", "method_total", &["POST"]),
        1
    );
}

#[tokio::test]
async fn timestamp_override_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    write_program(
        dir.path(),
        "ts.mtl",
        "counter c\n/ts=(\\d+) / { settime(strtol($1, 10))\nc++ }\n",
    )
    .await;

    let store = Arc::new(Store::new());
    let mut loader = Loader::new(LoaderConfig::default(), Arc::clone(&store));
    loader.load_all(dir.path()).await.unwrap();

    let (line_tx, _event_tx, handle) = spawn_loader(loader);
    line_tx
        .send(LogLine::new("/log", "ts=1700000000 hello"))
        .await
        .unwrap();
    drop(line_tx);
    handle.await.unwrap();

    let m = store.find("ts.mtl", "c").unwrap();
    let d = m.datum(&[]).unwrap();
    assert_eq!(d.read(), DatumValue::Int(1));
    assert_eq!(d.last_update(), Some(1_700_000_000));
}

#[tokio::test]
async fn runtime_error_isolation_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    write_program(
        dir.path(),
        "sum.mtl",
        "counter c\n/n=(\\S+)/ { c += strtol($1, 10) }\n",
    )
    .await;

    let store = Arc::new(Store::new());
    let mut loader = Loader::new(LoaderConfig::default(), Arc::clone(&store));
    loader.load_all(dir.path()).await.unwrap();
    let stats = loader.stats("sum.mtl").unwrap();

    let (line_tx, _event_tx, handle) = spawn_loader(loader);
    for text in ["n=5", "n=abc", "n=7"] {
        line_tx.send(LogLine::new("/log", text)).await.unwrap();
    }
    drop(line_tx);
    handle.await.unwrap();

    assert_eq!(int_value(&store, "sum.mtl", "c", &[]), 12);
    assert_eq!(stats.runtime_errors.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn hot_reload_keeps_old_program_on_compile_failure() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_program(
        dir.path(),
        "p.mtl",
        "counter v1_total\n/.*/ { v1_total++ }\n",
    )
    .await;

    let store = Arc::new(Store::new());
    let mut loader = Loader::new(LoaderConfig::default(), Arc::clone(&store));
    loader.load_all(dir.path()).await.unwrap();
    let stats = loader.stats("p.mtl").unwrap();

    let (line_tx, event_tx, handle) = spawn_loader(loader);

    line_tx.send(LogLine::new("/log", "one")).await.unwrap();

    // v2는 구문 에러
    tokio::fs::write(&path, "counter v2 {{{\n").await.unwrap();
    event_tx
        .send(ProgramEvent::Modified(path.clone()))
        .await
        .unwrap();

    // 리로드 실패 후에도 v1이 계속 라인을 집계해야 함
    line_tx.send(LogLine::new("/log", "two")).await.unwrap();
    drop(line_tx);
    drop(event_tx);
    handle.await.unwrap();

    assert_eq!(int_value(&store, "p.mtl", "v1_total", &[]), 2);
    assert!(stats.load_errors.load(Ordering::Relaxed) >= 1);
    assert_eq!(stats.loads.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn hot_reload_swaps_program_and_preserves_metric_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_program(dir.path(), "p.mtl", "counter c\n/.*/ { c++ }\n").await;

    let store = Arc::new(Store::new());
    let mut loader = Loader::new(LoaderConfig::default(), Arc::clone(&store));
    loader.load_all(dir.path()).await.unwrap();

    let (line_tx, event_tx, handle) = spawn_loader(loader);
    line_tx.send(LogLine::new("/log", "one")).await.unwrap();

    // v2: 같은 메트릭 선언 + 주석 추가 (semantics 동일, digest 변경)
    tokio::fs::write(&path, "# v2\ncounter c\n/.*/ { c++ }\n")
        .await
        .unwrap();
    event_tx
        .send(ProgramEvent::Modified(path.clone()))
        .await
        .unwrap();

    // 이벤트 처리를 기다렸다가 다음 라인 전송
    tokio::time::sleep(Duration::from_millis(100)).await;
    line_tx.send(LogLine::new("/log", "two")).await.unwrap();
    drop(line_tx);
    drop(event_tx);
    let loader = handle.await.unwrap();

    // 리로드를 가로질러 datum 값이 보존됨
    assert_eq!(int_value(&store, "p.mtl", "c", &[]), 2);
    let stats = loader.stats("p.mtl").unwrap();
    assert_eq!(stats.loads.load(Ordering::Relaxed), 2);
}

#[tokio::test]
async fn unload_on_delete_event_removes_metrics() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_program(dir.path(), "p.mtl", "counter c\n/.*/ { c++ }\n").await;

    let store = Arc::new(Store::new());
    let mut loader = Loader::new(LoaderConfig::default(), Arc::clone(&store));
    loader.load_all(dir.path()).await.unwrap();
    assert_eq!(store.metric_count(), 1);

    let (line_tx, event_tx, handle) = spawn_loader(loader);
    event_tx
        .send(ProgramEvent::Deleted(path))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(line_tx);
    drop(event_tx);
    let loader = handle.await.unwrap();

    assert_eq!(store.metric_count(), 0);
    assert!(loader.program_names().is_empty());
}

#[tokio::test]
async fn stale_datum_gc_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    write_program(
        dir.path(),
        "ips.mtl",
        "counter hits by ip\n/ts=(\\d+) ip=(\\S+)/ { settime(strtol($1, 10))\nhits[$2]++ }\n",
    )
    .await;

    let store = Arc::new(Store::new());
    let mut loader = Loader::new(LoaderConfig::default(), Arc::clone(&store));
    loader.load_all(dir.path()).await.unwrap();

    let (line_tx, _event_tx, handle) = spawn_loader(loader);
    // t=0에 1.1.1.1, t=100에 2.2.2.2
    line_tx
        .send(LogLine::new("/log", "ts=0 ip=1.1.1.1"))
        .await
        .unwrap();
    line_tx
        .send(LogLine::new("/log", "ts=100 ip=2.2.2.2"))
        .await
        .unwrap();
    drop(line_tx);
    handle.await.unwrap();

    let m = store.find("ips.mtl", "hits").unwrap();
    m.set_ttl(Duration::from_secs(60));
    assert_eq!(m.datum_count(), 2);

    // t=120에서 GC: 1.1.1.1만 만료
    store.gc(SystemTime::UNIX_EPOCH + Duration::from_secs(120));
    let snap = store.snapshot();
    assert_eq!(snap[0].data.len(), 1);
    assert_eq!(snap[0].data[0].label_values, vec!["2.2.2.2".to_owned()]);
}

#[tokio::test]
async fn every_line_reaches_every_program_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    write_program(dir.path(), "a.mtl", "counter a\n/.*/ { a++ }\n").await;
    write_program(dir.path(), "b.mtl", "counter b\n/.*/ { b++ }\n").await;

    let store = Arc::new(Store::new());
    let mut loader = Loader::new(LoaderConfig::default(), Arc::clone(&store));
    loader.load_all(dir.path()).await.unwrap();
    let stats_a = loader.stats("a.mtl").unwrap();
    let stats_b = loader.stats("b.mtl").unwrap();

    let (line_tx, _event_tx, handle) = spawn_loader(loader);
    for i in 0..100 {
        line_tx
            .send(LogLine::new("/log", format!("line {i}")))
            .await
            .unwrap();
    }
    drop(line_tx);
    handle.await.unwrap();

    assert_eq!(int_value(&store, "a.mtl", "a", &[]), 100);
    assert_eq!(int_value(&store, "b.mtl", "b", &[]), 100);
    assert_eq!(stats_a.lines_processed.load(Ordering::Relaxed), 100);
    assert_eq!(stats_b.lines_processed.load(Ordering::Relaxed), 100);
    assert_eq!(stats_a.lines_dropped.load(Ordering::Relaxed), 0);
    assert_eq!(stats_b.lines_dropped.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn tailer_to_loader_pipeline_one_shot() {
    let progs = tempfile::tempdir().unwrap();
    write_program(
        progs.path(),
        "lines.mtl",
        "counter lines_total\n/.*/ { lines_total++ }\n",
    )
    .await;

    let logs = tempfile::tempdir().unwrap();
    let log_path = logs.path().join("app.log");
    tokio::fs::write(&log_path, "one\ntwo\nthree\n").await.unwrap();

    let store = Arc::new(Store::new());
    let mut loader = Loader::new(LoaderConfig::default(), Arc::clone(&store));
    loader.load_all(progs.path()).await.unwrap();

    let (line_tx, line_rx) = mpsc::channel(64);
    let (_event_tx, event_rx) = mpsc::channel::<ProgramEvent>(1);
    let tailer = Tailer::new(
        TailerConfig {
            paths: vec![log_path],
            one_shot: true,
            ..Default::default()
        },
        line_tx,
        CancellationToken::new(),
    );

    let loader_handle = tokio::spawn(loader.run(line_rx, event_rx));
    tailer.run().await.unwrap();
    // tailer가 채널을 닫으면 loader가 드레인 후 반환 (VMsDone)
    let loader = loader_handle.await.unwrap();

    assert_eq!(int_value(&store, "lines.mtl", "lines_total", &[]), 3);
    assert_eq!(loader.line_count(), 3);
}

#[tokio::test]
async fn watcher_driven_hot_reload() {
    let progs = tempfile::tempdir().unwrap();
    let path = write_program(progs.path(), "p.mtl", "counter c\n/.*/ { c++ }\n").await;

    let store = Arc::new(Store::new());
    let mut loader = Loader::new(LoaderConfig::default(), Arc::clone(&store));
    loader.load_all(progs.path()).await.unwrap();

    let (line_tx, line_rx) = mpsc::channel(64);
    let (event_tx, event_rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let watcher = ProgramWatcher::new(
        WatcherConfig {
            dir: progs.path().to_owned(),
            extension: "mtl".to_owned(),
            poll_interval_ms: 10,
        },
        event_tx,
        cancel.clone(),
    );
    let watcher_handle = tokio::spawn(watcher.run());
    let loader_handle = tokio::spawn(loader.run(line_rx, event_rx));

    // 감시자 초기 스캔이 끝난 뒤 새 프로그램 추가
    tokio::time::sleep(Duration::from_millis(50)).await;
    write_program(progs.path(), "extra.mtl", "counter x\n/.*/ { x++ }\n").await;
    let _ = path;

    // 감시자가 Created를 전달하고 loader가 로드할 때까지 대기
    tokio::time::sleep(Duration::from_millis(200)).await;
    line_tx.send(LogLine::new("/log", "hello")).await.unwrap();

    drop(line_tx);
    cancel.cancel();
    watcher_handle.await.unwrap();
    let loader = loader_handle.await.unwrap();

    assert_eq!(loader.program_names(), vec!["extra.mtl", "p.mtl"]);
    assert_eq!(int_value(&store, "extra.mtl", "x", &[]), 1);
    assert_eq!(int_value(&store, "p.mtl", "c", &[]), 1);
}

#[tokio::test]
async fn snapshot_serializes_to_json() {
    let dir = tempfile::tempdir().unwrap();
    write_program(
        dir.path(),
        "m.mtl",
        "counter hits by method\n/^(\\S+) / { hits[$1]++ }\n",
    )
    .await;

    let store = Arc::new(Store::new());
    let mut loader = Loader::new(LoaderConfig::default(), Arc::clone(&store));
    loader.load_all(dir.path()).await.unwrap();

    let (line_tx, _event_tx, handle) = spawn_loader(loader);
    line_tx.send(LogLine::new("/log", "GET /")).await.unwrap();
    drop(line_tx);
    handle.await.unwrap();

    let json = serde_json::to_string_pretty(&store.snapshot()).unwrap();
    assert!(json.contains("\"hits\""));
    assert!(json.contains("\"GET\""));
    assert!(json.contains("\"m.mtl\""));
}
