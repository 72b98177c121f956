//! 내부 텔레메트리 상수 및 설명 등록
//!
//! metrail 자체의 동작을 관측하는 메트릭 이름을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`
//! 매크로를 호출합니다. DSL 프로그램이 생성하는 메트릭은 여기가 아니라
//! 런타임 스토어가 관리합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `metrail_`
//! - 접미어: `_total` (counter), 없음 (gauge)

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 프로그램 소스 파일명 레이블 키
pub const LABEL_PROG: &str = "prog";

/// 로그 파일 경로 레이블 키
pub const LABEL_LOGFILE: &str = "logfile";

// ─── Loader 메트릭 ─────────────────────────────────────────────────

/// Loader: 수신한 전체 로그 라인 수 (counter)
pub const LINE_COUNT: &str = "metrail_line_count";

/// Loader: 프로그램 로드 성공 수 (counter, label: prog)
pub const PROG_LOADS_TOTAL: &str = "metrail_prog_loads_total";

/// Loader: 프로그램 로드 실패 수 (counter, label: prog)
pub const PROG_LOAD_ERRORS_TOTAL: &str = "metrail_prog_load_errors_total";

/// VM: 라인 실행 중 런타임 에러 수 (counter, label: prog)
pub const PROG_RUNTIME_ERRORS_TOTAL: &str = "metrail_prog_runtime_errors_total";

/// Loader: 백프레셔로 드롭된 라인 수 (counter, label: prog)
pub const LINES_DROPPED_TOTAL: &str = "metrail_lines_dropped_total";

// ─── Tailer 메트릭 ─────────────────────────────────────────────────

/// Tailer: 파일별 읽은 라인 수 (counter, label: logfile)
pub const LOG_LINES_TOTAL: &str = "metrail_log_lines_total";

/// Tailer: 파일별 I/O 에러 수 (counter, label: logfile)
pub const LOG_ERRORS_TOTAL: &str = "metrail_log_errors_total";

/// Tailer: 파일별 로테이션 감지 수 (counter, label: logfile)
pub const LOG_ROTATIONS_TOTAL: &str = "metrail_log_rotations_total";

/// Tailer: 파일별 truncation 감지 수 (counter, label: logfile)
pub const LOG_TRUNCATES_TOTAL: &str = "metrail_log_truncates_total";

// ─── Watcher 메트릭 ────────────────────────────────────────────────

/// Watcher: 프로그램 디렉토리 감시 에러 수 (counter)
pub const WATCHER_ERRORS_TOTAL: &str = "metrail_watcher_errors_total";

// ─── Daemon 메트릭 ─────────────────────────────────────────────────

/// Daemon: 빌드 정보 (gauge, 항상 1, label: version)
pub const BUILD_INFO: &str = "metrail_build_info";

/// Daemon: 로드된 프로그램 수 (gauge)
pub const PROGRAMS_LOADED: &str = "metrail_programs_loaded";

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 내부 메트릭의 설명(description)을 등록합니다.
///
/// 전역 레코더 설치 후 한 번만 호출해야 합니다.
/// 일반적으로 `metrail-daemon`의 시작 시점에서 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge};

    describe_counter!(
        LINE_COUNT,
        "Total number of log lines received by the program loader"
    );
    describe_counter!(
        PROG_LOADS_TOTAL,
        "Number of program load events by program source filename"
    );
    describe_counter!(
        PROG_LOAD_ERRORS_TOTAL,
        "Number of compile errors encountered per program source filename"
    );
    describe_counter!(
        PROG_RUNTIME_ERRORS_TOTAL,
        "Number of runtime errors encountered while executing programs"
    );
    describe_counter!(
        LINES_DROPPED_TOTAL,
        "Number of lines dropped due to per-VM queue backpressure"
    );

    describe_counter!(LOG_LINES_TOTAL, "Number of lines read per log file");
    describe_counter!(LOG_ERRORS_TOTAL, "Number of IO errors per log file");
    describe_counter!(
        LOG_ROTATIONS_TOTAL,
        "Number of log rotation events per log file"
    );
    describe_counter!(
        LOG_TRUNCATES_TOTAL,
        "Number of log truncation events per log file"
    );

    describe_counter!(
        WATCHER_ERRORS_TOTAL,
        "Number of errors raised by the program directory watcher"
    );

    describe_gauge!(
        BUILD_INFO,
        "Build information (always 1, with version label)"
    );
    describe_gauge!(PROGRAMS_LOADED, "Number of programs currently loaded");
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_METRIC_NAMES: &[&str] = &[
        LINE_COUNT,
        PROG_LOADS_TOTAL,
        PROG_LOAD_ERRORS_TOTAL,
        PROG_RUNTIME_ERRORS_TOTAL,
        LINES_DROPPED_TOTAL,
        LOG_LINES_TOTAL,
        LOG_ERRORS_TOTAL,
        LOG_ROTATIONS_TOTAL,
        LOG_TRUNCATES_TOTAL,
        WATCHER_ERRORS_TOTAL,
        BUILD_INFO,
        PROGRAMS_LOADED,
    ];

    #[test]
    fn all_metrics_start_with_metrail_prefix() {
        for name in ALL_METRIC_NAMES {
            assert!(
                name.starts_with("metrail_"),
                "Metric '{}' does not start with 'metrail_' prefix",
                name
            );
        }
    }

    #[test]
    fn describe_all_does_not_panic() {
        // 레코더가 설치되지 않은 상태에서도 panic이 없어야 한다
        describe_all();
    }

    #[test]
    fn label_keys_are_lowercase() {
        for label in [LABEL_PROG, LABEL_LOGFILE] {
            assert_eq!(label.to_lowercase(), *label);
        }
    }
}
