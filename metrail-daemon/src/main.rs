//! metrail 데몬 엔트리포인트
//!
//! CLI 플래그를 파싱하고 TOML 설정과 병합한 뒤 orchestrator에 실행을
//! 위임합니다.

use anyhow::{Context, Result};
use clap::Parser;

use metrail_core::MetrailConfig;
use metrail_daemon::cli::{apply_overrides, Cli};
use metrail_daemon::{logging, orchestrator};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 설정 파일이 있으면 로드, 없으면 기본값에서 시작
    let mut config = if cli.config.exists() {
        MetrailConfig::load(&cli.config)
            .await
            .with_context(|| format!("failed to load config {}", cli.config.display()))?
    } else {
        MetrailConfig::default()
    };
    apply_overrides(&mut config, &cli);

    config.validate().context("config validation failed")?;
    if cli.validate {
        println!("configuration ok");
        return Ok(());
    }

    logging::init_tracing(&config.general)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        progs = %config.programs.path,
        "metrail starting"
    );

    let code = orchestrator::run(config).await?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
