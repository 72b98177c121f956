//! 프로그램 loader — 컴파일, VM 생명주기, 라인 팬아웃을 관리합니다.
//!
//! loader는 모든 활성 프로그램을 소유합니다. 프로그램마다 VM 태스크
//! 하나와 bounded 큐 하나가 있고, 단일 수신 루프가 인바운드 라인을
//! 모든 VM 큐에 브로드캐스트합니다. 전송이 타임아웃되면 그 VM에
//! 한해서만 라인을 드롭하고 집계합니다.
//!
//! # 핫 리로드
//! 감시자 이벤트로 재컴파일합니다. 성공하면 새 VM 태스크를 스폰하고
//! 핸들을 교체한 뒤 이전 VM의 큐를 닫아 드레인 후 은퇴시킵니다.
//! 실패하면 이전 프로그램이 그대로 유지됩니다.
//!
//! # 종료
//! 인바운드 라인 채널이 닫히면 모든 VM 큐를 닫고 각 태스크의 완료를
//! 기다립니다. `run()`의 반환이 곧 모든 VM의 종료 신호입니다.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use metrail_core::telemetry::{self, LABEL_PROG};
use metrail_core::{LogLine, MetrailError, PipelineError};
use metrail_lang::{compile, CompileErrors, Program};

use crate::store::Store;
use crate::timeparse::TimeOptions;
use crate::vm::{ProgStats, Vm};
use crate::watch::ProgramEvent;

/// loader 설정
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// 프로그램 파일 확장자 (점 제외)
    pub extension: String,
    /// VM별 수신 큐 깊이
    pub queue_depth: usize,
    /// 브로드캐스트 전송 타임아웃
    pub publish_timeout: Duration,
    /// 타임스탬프 파싱 옵션 (모든 VM 공유)
    pub time_opts: TimeOptions,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            extension: "mtl".to_owned(),
            queue_depth: 128,
            publish_timeout: Duration::from_secs(1),
            time_opts: TimeOptions::default(),
        }
    }
}

/// 활성 프로그램의 핸들
struct ProgramHandle {
    digest: u64,
    tx: mpsc::Sender<LogLine>,
    join: JoinHandle<()>,
    stats: Arc<ProgStats>,
}

/// 초기 로드 결과 요약
#[derive(Debug, Default)]
pub struct LoadSummary {
    /// 성공적으로 로드된 프로그램 수
    pub loaded: usize,
    /// 실패한 프로그램과 진단 목록
    pub failures: Vec<(String, String)>,
}

impl LoadSummary {
    /// 실패가 하나도 없는지 확인합니다.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// 프로그램 loader
pub struct Loader {
    config: LoaderConfig,
    store: Arc<Store>,
    programs: HashMap<String, ProgramHandle>,
    /// 프로그램별 통계. 핸들 교체 후에도 이름으로 유지
    stats: Arc<RwLock<HashMap<String, Arc<ProgStats>>>>,
    line_count: Arc<AtomicU64>,
}

impl Loader {
    /// 새 loader를 생성합니다.
    pub fn new(config: LoaderConfig, store: Arc<Store>) -> Self {
        Self {
            config,
            store,
            programs: HashMap::new(),
            stats: Arc::new(RwLock::new(HashMap::new())),
            line_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// 지금까지 수신한 라인 수를 반환합니다.
    pub fn line_count(&self) -> u64 {
        self.line_count.load(Ordering::Relaxed)
    }

    /// 활성 프로그램 이름 목록을 반환합니다 (정렬됨).
    pub fn program_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.programs.keys().cloned().collect();
        names.sort();
        names
    }

    /// 프로그램별 통계를 반환합니다.
    pub fn stats(&self, name: &str) -> Option<Arc<ProgStats>> {
        self.stats
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .map(Arc::clone)
    }

    fn stats_for(&self, name: &str) -> Arc<ProgStats> {
        let mut stats = self.stats.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(stats.entry(name.to_owned()).or_default())
    }

    /// 디렉토리의 모든 프로그램 파일을 컴파일하여 로드합니다.
    ///
    /// 개별 파일의 실패는 건너뛰고 요약에 모읍니다. 실패한 파일이
    /// 있어도 성공한 프로그램은 로드됩니다.
    pub async fn load_all(&mut self, dir: &Path) -> Result<LoadSummary, MetrailError> {
        let mut summary = LoadSummary::default();
        let mut paths = Vec::new();

        let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| {
            MetrailError::Pipeline(PipelineError::InitFailed(format!(
                "failed to read program directory {}: {e}",
                dir.display()
            )))
        })?;
        while let Some(entry) = entries.next_entry().await.map_err(MetrailError::Io)? {
            let path = entry.path();
            if path
                .extension()
                .is_some_and(|ext| ext == self.config.extension.as_str())
            {
                paths.push(path);
            }
        }
        paths.sort();

        for path in paths {
            match self.load_program(&path).await {
                Ok(true) => summary.loaded += 1,
                Ok(false) => {}
                Err(e) => {
                    summary
                        .failures
                        .push((program_name(&path), e.to_string()));
                }
            }
        }

        info!(
            loaded = summary.loaded,
            failed = summary.failures.len(),
            dir = %dir.display(),
            "initial program load complete"
        );
        metrics::gauge!(telemetry::PROGRAMS_LOADED).set(self.programs.len() as f64);
        Ok(summary)
    }

    /// 프로그램 파일 하나를 (재)로드합니다.
    ///
    /// 반환값: 새로 로드/교체되었으면 true, 내용이 같아 건너뛰었으면
    /// false. 컴파일 실패 시 기존 프로그램은 유지되고 에러가 집계됩니다.
    pub async fn load_program(&mut self, path: &Path) -> Result<bool, LoadError> {
        let name = program_name(path);
        let stats = self.stats_for(&name);

        let source = match tokio::fs::read_to_string(path).await {
            Ok(source) => source,
            Err(e) => {
                stats.load_errors.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(
                    telemetry::PROG_LOAD_ERRORS_TOTAL,
                    LABEL_PROG => name.clone()
                )
                .increment(1);
                return Err(LoadError::Io {
                    name,
                    source: e,
                });
            }
        };

        let program = match compile(&name, &source) {
            Ok(program) => Arc::new(program),
            Err(errors) => {
                stats.load_errors.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(
                    telemetry::PROG_LOAD_ERRORS_TOTAL,
                    LABEL_PROG => name.clone()
                )
                .increment(1);
                warn!(prog = %name, "compile failed, keeping previous program:\n{errors}");
                return Err(LoadError::Compile { name, errors });
            }
        };

        if let Some(existing) = self.programs.get(&name) {
            if existing.digest == program.digest {
                debug!(prog = %name, "program unchanged, skipping reload");
                return Ok(false);
            }
        }

        let vm = match Vm::new(
            Arc::clone(&program),
            &self.store,
            Arc::clone(&stats),
            self.config.time_opts,
        ) {
            Ok(vm) => vm,
            Err(e) => {
                stats.load_errors.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(
                    telemetry::PROG_LOAD_ERRORS_TOTAL,
                    LABEL_PROG => name.clone()
                )
                .increment(1);
                warn!(prog = %name, error = %e, "metric registration failed, keeping previous program");
                return Err(LoadError::Store {
                    name,
                    source: e,
                });
            }
        };

        let (tx, rx) = mpsc::channel(self.config.queue_depth);
        let join = tokio::spawn(vm_task(vm, rx));
        let handle = ProgramHandle {
            digest: program.digest,
            tx,
            join,
            stats: Arc::clone(&stats),
        };

        // 교체: 이전 VM은 큐를 닫아 드레인 후 은퇴
        if let Some(old) = self.programs.insert(name.clone(), handle) {
            drop(old.tx);
            if let Err(e) = old.join.await {
                error!(prog = %name, error = %e, "retired vm task panicked");
            }
            info!(prog = %name, "program reloaded");
        } else {
            info!(prog = %name, "program loaded");
        }

        stats.loads.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(
            telemetry::PROG_LOADS_TOTAL,
            LABEL_PROG => name.clone()
        )
        .increment(1);
        metrics::gauge!(telemetry::PROGRAMS_LOADED).set(self.programs.len() as f64);
        Ok(true)
    }

    /// 프로그램을 내리고 메트릭 소유권을 해제합니다.
    ///
    /// 다른 프로그램이 공유하는 메트릭은 스토어에 남습니다.
    pub async fn unload_program(&mut self, name: &str) {
        let Some(handle) = self.programs.remove(name) else {
            return;
        };
        drop(handle.tx);
        if let Err(e) = handle.join.await {
            error!(prog = %name, error = %e, "vm task panicked during unload");
        }
        self.store.remove_program(name);
        metrics::gauge!(telemetry::PROGRAMS_LOADED).set(self.programs.len() as f64);
        info!(prog = %name, "program unloaded");
    }

    /// 메인 루프: 라인 팬아웃과 감시자 이벤트 처리
    ///
    /// 인바운드 라인 채널이 닫히면 모든 VM을 드레인하고 반환합니다.
    /// 이 함수의 반환이 모든 VM 종료의 신호입니다.
    pub async fn run(
        mut self,
        mut lines: mpsc::Receiver<LogLine>,
        mut events: mpsc::Receiver<ProgramEvent>,
    ) -> Self {
        loop {
            tokio::select! {
                maybe_line = lines.recv() => {
                    match maybe_line {
                        Some(line) => self.fan_out(line).await,
                        None => break,
                    }
                }
                Some(event) = events.recv() => {
                    self.handle_event(event).await;
                }
            }
        }

        info!("lines channel closed, draining all vms");
        self.drain_all().await;
        self
    }

    /// 라인 하나를 모든 활성 VM에 브로드캐스트합니다.
    ///
    /// VM별 bounded 큐에 블로킹 전송하되, 타임아웃되면 그 VM에
    /// 한해서만 드롭하고 집계합니다.
    async fn fan_out(&mut self, line: LogLine) {
        self.line_count.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(telemetry::LINE_COUNT).increment(1);

        for (name, handle) in &self.programs {
            match timeout(self.config.publish_timeout, handle.tx.send(line.clone())).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => {
                    // VM 태스크가 죽음 -- 드롭으로 집계하고 계속
                    handle.stats.lines_dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(prog = %name, "vm queue closed unexpectedly, line dropped");
                }
                Err(_) => {
                    handle.stats.lines_dropped.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!(
                        telemetry::LINES_DROPPED_TOTAL,
                        LABEL_PROG => name.clone()
                    )
                    .increment(1);
                    warn!(
                        prog = %name,
                        timeout_ms = self.config.publish_timeout.as_millis() as u64,
                        "backpressure timeout, line dropped for this vm"
                    );
                }
            }
        }
    }

    async fn handle_event(&mut self, event: ProgramEvent) {
        match event {
            ProgramEvent::Created(path) | ProgramEvent::Modified(path) => {
                // 실패는 이미 집계/로깅됨. 기존 프로그램 유지
                let _ = self.load_program(&path).await;
            }
            ProgramEvent::Deleted(path) => {
                self.unload_program(&program_name(&path)).await;
            }
        }
    }

    /// 모든 VM 큐를 닫고 태스크 완료를 기다립니다.
    async fn drain_all(&mut self) {
        for (name, handle) in self.programs.drain() {
            drop(handle.tx);
            if let Err(e) = handle.join.await {
                error!(prog = %name, error = %e, "vm task panicked during shutdown");
            }
        }
        info!("all vms drained");
    }
}

/// VM 태스크: 큐가 닫힐 때까지 라인을 순서대로 실행합니다.
async fn vm_task(mut vm: Vm, mut rx: mpsc::Receiver<LogLine>) {
    debug!(prog = %vm.name(), "vm task started");
    while let Some(line) = rx.recv().await {
        vm.process_line(&line);
    }
    debug!(prog = %vm.name(), "vm task drained and exiting");
}

/// 경로에서 프로그램 이름(파일명)을 얻습니다.
fn program_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// 프로그램 로드 실패
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// 소스 읽기 실패
    #[error("failed to read program '{name}': {source}")]
    Io {
        /// 프로그램 이름
        name: String,
        /// I/O 에러
        source: std::io::Error,
    },

    /// 컴파일 실패
    #[error("failed to compile program '{name}':\n{errors}")]
    Compile {
        /// 프로그램 이름
        name: String,
        /// 누적된 진단
        errors: CompileErrors,
    },

    /// 메트릭 등록 실패 (서술자 충돌)
    #[error("failed to register metrics for '{name}': {source}")]
    Store {
        /// 프로그램 이름
        name: String,
        /// 스토어 에러
        source: crate::error::StoreError,
    },
}

/// 컴파일 전용 경로: 디렉토리의 모든 프로그램을 컴파일만 합니다.
///
/// 요청된 덤프를 stdout으로 출력하고, 프로그램별 결과를 반환합니다.
pub async fn compile_only(
    dir: &Path,
    extension: &str,
    dumps: DumpOptions,
) -> Result<Vec<(String, Result<Program, CompileErrors>)>, MetrailError> {
    let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| {
        MetrailError::Pipeline(PipelineError::InitFailed(format!(
            "failed to read program directory {}: {e}",
            dir.display()
        )))
    })?;
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(MetrailError::Io)? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == extension) {
            paths.push(path);
        }
    }
    paths.sort();

    let mut results = Vec::new();
    for path in paths {
        let name = program_name(&path);
        let source = tokio::fs::read_to_string(&path).await.map_err(MetrailError::Io)?;
        let result = compile_with_dumps(&name, &source, &dumps);
        results.push((name, result));
    }
    Ok(results)
}

/// 진단 덤프 선택
#[derive(Debug, Clone, Copy, Default)]
pub struct DumpOptions {
    /// 파싱 직후 AST 출력
    pub ast: bool,
    /// 타입 체크 후 타입 주석 트리 출력
    pub ast_types: bool,
    /// 바이트코드 디스어셈블리 출력
    pub bytecode: bool,
}

fn compile_with_dumps(
    name: &str,
    source: &str,
    dumps: &DumpOptions,
) -> Result<Program, CompileErrors> {
    use metrail_lang::{checker, codegen, lexer, parser, printer};

    let tokens = lexer::lex(source)?;
    let mut ast = parser::parse(tokens)?;
    if dumps.ast {
        println!("# {name}: ast");
        print!("{}", printer::print_source(&ast));
    }
    let symtab = checker::check(&mut ast)?;
    if dumps.ast_types {
        println!("# {name}: typed ast");
        print!("{}", printer::print_tree(&ast));
    }
    let program = codegen::codegen(name, source, &ast, &symtab)?;
    if dumps.bytecode {
        println!("# {name}: bytecode");
        print!("{program}");
    }
    Ok(program)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    async fn write_program(dir: &Path, name: &str, src: &str) -> PathBuf {
        let path = dir.join(name);
        tokio::fs::write(&path, src).await.unwrap();
        path
    }

    #[tokio::test]
    async fn load_all_loads_valid_and_reports_invalid() {
        let dir = tempfile::tempdir().unwrap();
        write_program(dir.path(), "good.mtl", "counter c\n/.*/ { c++ }\n").await;
        write_program(dir.path(), "bad.mtl", "counter c\n/x/ { nope++ }\n").await;
        write_program(dir.path(), "ignored.txt", "not a program").await;

        let store = Arc::new(Store::new());
        let mut loader = Loader::new(LoaderConfig::default(), store);
        let summary = loader.load_all(dir.path()).await.unwrap();

        assert_eq!(summary.loaded, 1);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].0, "bad.mtl");
        assert_eq!(loader.program_names(), vec!["good.mtl"]);

        let stats = loader.stats("bad.mtl").unwrap();
        assert_eq!(stats.load_errors.load(Ordering::Relaxed), 1);

        loader.unload_program("good.mtl").await;
    }

    #[tokio::test]
    async fn unchanged_program_is_not_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_program(dir.path(), "p.mtl", "counter c\n/.*/ { c++ }\n").await;

        let store = Arc::new(Store::new());
        let mut loader = Loader::new(LoaderConfig::default(), store);
        assert!(loader.load_program(&path).await.unwrap());
        assert!(!loader.load_program(&path).await.unwrap());

        let stats = loader.stats("p.mtl").unwrap();
        assert_eq!(stats.loads.load(Ordering::Relaxed), 1);

        loader.unload_program("p.mtl").await;
    }

    #[tokio::test]
    async fn unload_removes_metrics_from_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_program(dir.path(), "p.mtl", "counter c\n/.*/ { c++ }\n").await;

        let store = Arc::new(Store::new());
        let mut loader = Loader::new(LoaderConfig::default(), Arc::clone(&store));
        loader.load_program(&path).await.unwrap();
        assert_eq!(store.metric_count(), 1);

        loader.unload_program("p.mtl").await;
        assert_eq!(store.metric_count(), 0);
    }

    #[tokio::test]
    async fn compile_only_reports_all_programs() {
        let dir = tempfile::tempdir().unwrap();
        write_program(dir.path(), "a.mtl", "counter c\n/.*/ { c++ }\n").await;
        write_program(dir.path(), "b.mtl", "@@\n").await;

        let results = compile_only(dir.path(), "mtl", DumpOptions::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].1.is_ok());
        assert!(results[1].1.is_err());
    }
}
