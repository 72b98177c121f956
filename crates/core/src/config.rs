//! 설정 관리 — metrail.toml 파싱 및 런타임 설정

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Metrail 통합 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetrailConfig {
    /// 일반 설정
    pub general: GeneralConfig,
    /// 프로그램 로딩 설정
    pub programs: ProgramConfig,
    /// 로그 수집 설정
    pub logs: LogConfig,
    /// 실행 모드 및 VM 런타임 설정
    pub runtime: RuntimeConfig,
    /// 메트릭 내보내기 설정
    pub export: ExportConfig,
    /// GC 주기 설정
    pub gc: GcConfig,
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "pretty".to_owned(),
        }
    }
}

/// 프로그램 로딩 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgramConfig {
    /// DSL 소스 파일이 위치한 디렉토리
    pub path: String,
    /// 프로그램 파일 확장자
    pub extension: String,
    /// 디렉토리 변경 감시 주기 (밀리초)
    pub poll_interval_ms: u64,
}

impl Default for ProgramConfig {
    fn default() -> Self {
        Self {
            path: "/etc/metrail/progs".to_owned(),
            extension: "mtl".to_owned(),
            poll_interval_ms: 1000,
        }
    }
}

/// 로그 수집 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// tail 대상 파일 경로 목록
    pub paths: Vec<String>,
    /// 파일 상태 체크 주기 (밀리초)
    pub poll_interval_ms: u64,
    /// 최대 라인 길이 (바이트)
    pub max_line_length: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            poll_interval_ms: 250,
            max_line_length: 64 * 1024,
        }
    }
}

/// 실행 모드 및 VM 런타임 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// true면 모든 입력 파일을 처음부터 EOF까지 읽고 종료
    pub one_shot: bool,
    /// true면 프로그램을 컴파일만 하고 종료
    pub compile_only: bool,
    /// 파싱 직후 AST 덤프 (compile_only 경로)
    pub dump_ast: bool,
    /// 타입 체크 후 AST 덤프 (compile_only 경로)
    pub dump_ast_types: bool,
    /// 코드 생성 후 바이트코드 덤프 (compile_only 경로)
    pub dump_bytecode: bool,
    /// VM별 수신 큐 깊이
    pub queue_depth: usize,
    /// 브로드캐스트 전송 타임아웃 (밀리초). 초과 시 해당 VM에 한해 라인 드롭
    pub publish_timeout_ms: u64,
    /// TZ 정보가 없는 타임스탬프에 적용할 타임존 (utc, local, ±HH:MM)
    pub override_timezone: Option<String>,
    /// 연도가 없는 syslog 타임스탬프에 현재 연도를 채움
    pub syslog_use_current_year: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            one_shot: false,
            compile_only: false,
            dump_ast: false,
            dump_ast_types: false,
            dump_bytecode: false,
            queue_depth: 128,
            publish_timeout_ms: 1000,
            override_timezone: None,
            syslog_use_current_year: false,
        }
    }
}

/// 메트릭 내보내기 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Prometheus 엔드포인트 활성화 여부
    pub enabled: bool,
    /// 바인드 주소
    pub listen_addr: String,
    /// 바인드 포트
    pub port: u16,
    /// 스토어 스냅샷을 facade로 반영하는 주기 (초)
    pub export_interval_secs: u64,
    /// 메트릭에 (프로그램, 소스 라인) 출처를 붙이지 않음
    pub omit_metric_source: bool,
    /// 내보낸 메트릭에서 prog 레이블 제거
    pub omit_prog_label: bool,
    /// 내보낼 때 datum의 last_update_time 포함 (JSON 덤프)
    pub emit_metric_timestamp: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: "127.0.0.1".to_owned(),
            port: 3903,
            export_interval_secs: 1,
            omit_metric_source: false,
            omit_prog_label: false,
            emit_metric_timestamp: false,
        }
    }
}

/// GC 주기 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GcConfig {
    /// 만료된 메트릭 datum 제거 주기 (초)
    pub expired_metric_interval_secs: u64,
    /// 더 이상 갱신되지 않는 로그 파일 상태 정리 주기 (초)
    pub stale_log_interval_secs: u64,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            expired_metric_interval_secs: 3600,
            stale_log_interval_secs: 3600,
        }
    }
}

impl MetrailConfig {
    /// TOML 설정 파일을 읽어 파싱합니다.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|_| ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })?;
        toml::from_str(&content).map_err(|e| ConfigError::ParseFailed {
            reason: e.to_string(),
        })
    }

    /// 설정 값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.runtime.queue_depth == 0 {
            return Err(ConfigError::InvalidValue {
                field: "runtime.queue_depth".to_owned(),
                reason: "must be greater than zero".to_owned(),
            });
        }
        if self.logs.max_line_length == 0 {
            return Err(ConfigError::InvalidValue {
                field: "logs.max_line_length".to_owned(),
                reason: "must be greater than zero".to_owned(),
            });
        }
        if self.programs.extension.starts_with('.') {
            return Err(ConfigError::InvalidValue {
                field: "programs.extension".to_owned(),
                reason: "extension is matched without the leading dot".to_owned(),
            });
        }
        match self.general.log_format.as_str() {
            "json" | "pretty" => {}
            other => {
                return Err(ConfigError::InvalidValue {
                    field: "general.log_format".to_owned(),
                    reason: format!("unknown format '{other}', expected 'json' or 'pretty'"),
                });
            }
        }
        if let Some(tz) = &self.runtime.override_timezone {
            if !is_valid_timezone_spec(tz) {
                return Err(ConfigError::InvalidValue {
                    field: "runtime.override_timezone".to_owned(),
                    reason: format!("'{tz}' is not 'utc', 'local', or a fixed offset like '+09:00'"),
                });
            }
        }
        Ok(())
    }
}

/// 타임존 지정 문자열이 허용된 형식인지 확인합니다.
fn is_valid_timezone_spec(spec: &str) -> bool {
    if spec == "utc" || spec == "local" {
        return true;
    }
    // 고정 오프셋: ±HH:MM
    let bytes = spec.as_bytes();
    bytes.len() == 6
        && (bytes[0] == b'+' || bytes[0] == b'-')
        && bytes[1].is_ascii_digit()
        && bytes[2].is_ascii_digit()
        && bytes[3] == b':'
        && bytes[4].is_ascii_digit()
        && bytes[5].is_ascii_digit()
}
