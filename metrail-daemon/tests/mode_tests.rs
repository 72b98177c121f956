//! 데몬 실행 모드 통합 테스트
//!
//! one-shot과 compile-only 경로를 실제 파일 시스템 픽스처로 검증합니다.

use std::path::Path;

use metrail_core::MetrailConfig;
use metrail_daemon::orchestrator;

async fn write(path: &Path, content: &str) {
    tokio::fs::write(path, content).await.unwrap();
}

fn base_config(progs: &Path) -> MetrailConfig {
    let mut config = MetrailConfig::default();
    config.programs.path = progs.display().to_string();
    // 테스트에서는 전역 레코더를 설치하지 않음
    config.export.enabled = false;
    config
}

#[tokio::test]
async fn one_shot_mode_processes_files_and_exits() {
    let progs = tempfile::tempdir().unwrap();
    write(
        &progs.path().join("lines.mtl"),
        "counter lines_total\n/.*/ { lines_total++ }\n",
    )
    .await;

    let logs = tempfile::tempdir().unwrap();
    let log_path = logs.path().join("app.log");
    write(&log_path, "one\ntwo\nthree\n").await;

    let mut config = base_config(progs.path());
    config.runtime.one_shot = true;
    config.logs.paths = vec![log_path.display().to_string()];

    let code = orchestrator::run(config).await.unwrap();
    assert_eq!(code, 0);
}

#[tokio::test]
async fn compile_only_reports_success() {
    let progs = tempfile::tempdir().unwrap();
    write(
        &progs.path().join("good.mtl"),
        "counter c\n/.*/ { c++ }\n",
    )
    .await;

    let mut config = base_config(progs.path());
    config.runtime.compile_only = true;

    let code = orchestrator::run(config).await.unwrap();
    assert_eq!(code, 0);
}

#[tokio::test]
async fn compile_only_fails_on_bad_program() {
    let progs = tempfile::tempdir().unwrap();
    write(&progs.path().join("bad.mtl"), "counter c\n/x/ { nope++ }\n").await;

    let mut config = base_config(progs.path());
    config.runtime.compile_only = true;

    let code = orchestrator::run(config).await.unwrap();
    assert_eq!(code, 1);
}

#[tokio::test]
async fn compile_only_with_dumps_does_not_fail() {
    let progs = tempfile::tempdir().unwrap();
    write(
        &progs.path().join("dump.mtl"),
        "counter hits by verb\n/^(GET|POST) / { hits[$1]++ }\n",
    )
    .await;

    let mut config = base_config(progs.path());
    config.runtime.compile_only = true;
    config.runtime.dump_ast = true;
    config.runtime.dump_ast_types = true;
    config.runtime.dump_bytecode = true;

    let code = orchestrator::run(config).await.unwrap();
    assert_eq!(code, 0);
}

#[tokio::test]
async fn one_shot_with_invalid_program_dir_errors() {
    let mut config = MetrailConfig::default();
    config.programs.path = "/nonexistent/progs".to_owned();
    config.runtime.one_shot = true;
    config.export.enabled = false;

    assert!(orchestrator::run(config).await.is_err());
}
